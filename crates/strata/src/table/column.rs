//! Typed struct-of-arrays storage backing a single block.

use crate::error::{Result, StrataError};
use crate::schema::ColumnType;
use std::collections::HashMap;

/// Locates a logical column inside the typed storage arrays.
///
/// The table builds this mapping once at creation; every read and write
/// goes through it instead of re-scanning the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnLocation {
    /// The column's primitive type, selecting the array family.
    pub ty: ColumnType,
    /// Index within that family's arrays.
    pub index: usize,
}

/// Column-oriented buffer for one block.
///
/// All arrays of one storage grow in lockstep: after `n` appended rows,
/// every column's array holds exactly `n` entries. String columns are
/// dictionary-encoded with dense, insertion-ordered IDs. Dictionaries are
/// private to the storage and never shared across blocks, which keeps every
/// block independently serializable and loadable.
#[derive(Debug, Default)]
pub struct ColumnStorage {
    pub(crate) int64_cols: Vec<Vec<i64>>,
    pub(crate) float64_cols: Vec<Vec<f64>>,
    pub(crate) string_cols: Vec<Vec<u32>>,
    pub(crate) string_dicts: Vec<HashMap<String, u32>>,
    pub(crate) string_reads: Vec<Vec<String>>,
}

impl ColumnStorage {
    /// Builds an empty storage sized for `col_types`, assigning every
    /// logical column its [`ColumnLocation`] by walking the types in order.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSchema` for column types the engine does not store
    /// (`Boolean` is reserved).
    pub fn new(col_types: &[ColumnType]) -> Result<(Self, Vec<ColumnLocation>)> {
        let mut storage = Self::default();
        let mut locations = Vec::with_capacity(col_types.len());

        for &ty in col_types {
            let index = match ty {
                ColumnType::Int64 => {
                    storage.int64_cols.push(Vec::new());
                    storage.int64_cols.len() - 1
                }
                ColumnType::Float64 => {
                    storage.float64_cols.push(Vec::new());
                    storage.float64_cols.len() - 1
                }
                ColumnType::String => {
                    storage.string_cols.push(Vec::new());
                    storage.string_dicts.push(HashMap::new());
                    storage.string_reads.push(Vec::new());
                    storage.string_cols.len() - 1
                }
                ColumnType::Boolean => {
                    return Err(StrataError::InvalidSchema(
                        "boolean columns are not supported".into(),
                    ));
                }
            };
            locations.push(ColumnLocation { ty, index });
        }

        Ok((storage, locations))
    }

    /// Appends to an int64 column.
    pub fn append_int64(&mut self, loc: ColumnLocation, v: i64) {
        self.int64_cols[loc.index].push(v);
    }

    /// Appends to a float64 column.
    pub fn append_float64(&mut self, loc: ColumnLocation, v: f64) {
        self.float64_cols[loc.index].push(v);
    }

    /// Appends to a string column, interning into the column's dictionary.
    ///
    /// A string seen for the first time receives the next dense ID;
    /// repeated strings reuse their existing ID. IDs are stable for the
    /// lifetime of the storage.
    pub fn append_string(&mut self, loc: ColumnLocation, s: &str) -> u32 {
        let dict = &mut self.string_dicts[loc.index];
        let id = match dict.get(s) {
            Some(&id) => id,
            None => {
                let id = dict.len() as u32;
                dict.insert(s.to_string(), id);
                self.string_reads[loc.index].push(s.to_string());
                id
            }
        };
        self.string_cols[loc.index].push(id);
        id
    }

    /// Resolves a string column cell back through the dictionary.
    pub(crate) fn string_at(&self, loc: ColumnLocation, row: usize) -> &str {
        let id = self.string_cols[loc.index][row];
        &self.string_reads[loc.index][id as usize]
    }
}
