//! Table schema definitions and validation.

use crate::error::{Result, StrataError};
use std::collections::HashSet;
use std::fmt;

/// Primitive type of a column.
///
/// The storage engine implements `Int64`, `Float64` and `String`;
/// `Boolean` is reserved for a future release and rejected at table
/// creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// 64-bit signed integer.
    Int64,
    /// 64-bit IEEE-754 floating point.
    Float64,
    /// UTF-8 string, dictionary-encoded per block.
    String,
    /// Reserved.
    Boolean,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Int64 => "int64",
            Self::Float64 => "float64",
            Self::String => "string",
            Self::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

/// A named, typed column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name, unique within a schema.
    pub name: String,
    /// Primitive type of the column.
    pub ty: ColumnType,
}

impl Column {
    /// Creates a new column.
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// A table schema: an ordered column list plus the designated time column.
///
/// The time column must name an `Int64` column; appended rows must carry
/// non-decreasing values in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    /// Table name.
    pub name: String,
    /// Name of the monotonic time column.
    pub time_column: String,
    /// Ordered column list.
    pub columns: Vec<Column>,
}

impl Schema {
    /// Creates a schema. Call [`Schema::validate`] (or hand it to a table)
    /// before use.
    pub fn new(
        name: impl Into<String>,
        time_column: impl Into<String>,
        columns: Vec<Column>,
    ) -> Self {
        Self {
            name: name.into(),
            time_column: time_column.into(),
            columns,
        }
    }

    /// Validates self-consistency.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSchema` for: an empty schema name, zero columns, an
    /// empty column name, a duplicate column name, a time column that does
    /// not name any column, or a time column that is not `Int64`.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(StrataError::InvalidSchema(
                "schema name cannot be empty".into(),
            ));
        }
        if self.columns.is_empty() {
            return Err(StrataError::InvalidSchema(
                "schema must have at least one column".into(),
            ));
        }

        let mut names = HashSet::new();
        let mut time_column_found = false;

        for col in &self.columns {
            if col.name.is_empty() {
                return Err(StrataError::InvalidSchema(
                    "column name cannot be empty".into(),
                ));
            }
            if !names.insert(col.name.as_str()) {
                return Err(StrataError::InvalidSchema(format!(
                    "duplicate column name {}",
                    col.name
                )));
            }
            if col.name == self.time_column {
                time_column_found = true;
                if col.ty != ColumnType::Int64 {
                    return Err(StrataError::InvalidSchema(format!(
                        "time column {} must be of type int64",
                        col.name
                    )));
                }
            }
        }

        if !time_column_found {
            return Err(StrataError::InvalidSchema(format!(
                "time column {} not found",
                self.time_column
            )));
        }

        Ok(())
    }

    /// Returns the column types in schema order.
    pub fn column_types(&self) -> Vec<ColumnType> {
        self.columns.iter().map(|c| c.ty).collect()
    }

    /// Returns the logical index of the time column, if present.
    pub fn time_column_index(&self) -> Option<usize> {
        self.columns.iter().position(|c| c.name == self.time_column)
    }
}
