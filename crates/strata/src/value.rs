//! Runtime-typed values and rows for the append path.
//!
//! Two layers feed the same append machinery: [`Row`], a by-name map that
//! is type-checked when appended, and [`RowBuilder`], a schema-bound
//! builder that type-checks eagerly and hands values over in schema order
//! without a per-row map allocation.

use crate::error::{Result, StrataError};
use crate::schema::{ColumnType, Schema};
use std::collections::HashMap;

/// A single dynamically-typed cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit IEEE-754 floating point.
    Float64(f64),
    /// UTF-8 string.
    String(String),
}

impl Value {
    /// Returns the column type this value inhabits.
    pub fn column_type(&self) -> ColumnType {
        match self {
            Self::Int64(_) => ColumnType::Int64,
            Self::Float64(_) => ColumnType::Float64,
            Self::String(_) => ColumnType::String,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// A row addressed by column name.
pub type Row = HashMap<String, Value>;

/// Schema-bound row builder for the typed append path.
///
/// Values are type-checked as they are set; [`RowBuilder::finish`] yields
/// them in schema order for [`Table::append`](crate::table::Table::append).
#[derive(Debug)]
pub struct RowBuilder<'a> {
    schema: &'a Schema,
    values: Vec<Option<Value>>,
}

impl<'a> RowBuilder<'a> {
    /// Creates a builder for one row of `schema`.
    pub fn new(schema: &'a Schema) -> Self {
        Self {
            schema,
            values: vec![None; schema.columns.len()],
        }
    }

    /// Sets a column value, type-checking it against the schema.
    ///
    /// # Errors
    ///
    /// `Query` for a column the schema does not declare, `TypeMismatch`
    /// when the value's type differs from the column's.
    pub fn set(mut self, column: &str, value: impl Into<Value>) -> Result<Self> {
        let idx = self
            .schema
            .columns
            .iter()
            .position(|c| c.name == column)
            .ok_or_else(|| StrataError::Query(format!("column {column} not found")))?;

        let value = value.into();
        let expected = self.schema.columns[idx].ty;
        if value.column_type() != expected {
            return Err(StrataError::TypeMismatch {
                column: column.to_string(),
                expected,
            });
        }

        self.values[idx] = Some(value);
        Ok(self)
    }

    /// Finishes the row, returning its values in schema order.
    ///
    /// # Errors
    ///
    /// `MissingColumn` when any column was left unset.
    pub fn finish(self) -> Result<Vec<Value>> {
        let mut out = Vec::with_capacity(self.values.len());
        for (slot, col) in self.values.into_iter().zip(&self.schema.columns) {
            out.push(slot.ok_or_else(|| StrataError::MissingColumn(col.name.clone()))?);
        }
        Ok(out)
    }
}
