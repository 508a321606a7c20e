//! Error and Result types for strata storage operations.

use crate::schema::ColumnType;
use std::io;
use thiserror::Error;

/// A convenience `Result` type for strata operations.
pub type Result<T> = std::result::Result<T, StrataError>;

/// The error type for storage and query operations.
#[derive(Debug, Error)]
pub enum StrataError {
    /// Schema failed validation.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// A table with the same name is already registered.
    #[error("table {0} already exists")]
    DuplicateTable(String),

    /// A required column is missing from a row.
    #[error("column {0} not found")]
    MissingColumn(String),

    /// Row width does not match the schema width.
    #[error("row must have {expected} columns, got {got}")]
    ColumnCountMismatch {
        /// Number of columns declared by the schema.
        expected: usize,
        /// Number of values supplied.
        got: usize,
    },

    /// A value's type does not match its column's declared type.
    #[error("column {column} must be of type {expected}")]
    TypeMismatch {
        /// Name of the offending column.
        column: String,
        /// Type declared by the schema.
        expected: ColumnType,
    },

    /// Row timestamp is older than the last accepted timestamp.
    #[error("timestamp {ts} is older than last accepted timestamp {last_ts}")]
    OutOfOrder {
        /// Timestamp of the rejected row.
        ts: i64,
        /// Last timestamp the table accepted.
        last_ts: i64,
    },

    /// I/O failure in the write-ahead log.
    #[error("wal I/O error: {0}")]
    WalIo(#[source] io::Error),

    /// The write-ahead log handle was closed.
    #[error("wal is closed")]
    WalClosed,

    /// A write-ahead log record could not be decoded.
    #[error("corrupt wal record: {0}")]
    WalCorrupt(String),

    /// I/O failure in block storage.
    #[error("storage I/O error: {0}")]
    StorageIo(#[source] io::Error),

    /// A block file could not be encoded or decoded.
    #[error("file format error: {0}")]
    FileFormat(String),

    /// The block has neither serialized bytes nor a file path.
    #[error("block has no serialized bytes and no file path")]
    BlockUnmaterialized,

    /// Invalid query: unknown column or unsupported operator.
    #[error("query error: {0}")]
    Query(String),
}

impl From<parquet::errors::ParquetError> for StrataError {
    fn from(err: parquet::errors::ParquetError) -> Self {
        Self::FileFormat(err.to_string())
    }
}

impl From<arrow::error::ArrowError> for StrataError {
    fn from(err: arrow::error::ArrowError) -> Self {
        Self::FileFormat(err.to_string())
    }
}
