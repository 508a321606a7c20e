//! Strata - embeddable append-only time-ordered columnar storage.
//!
//! A caller opens a named [`Database`], declares a typed [`Schema`] with
//! one monotonic time column, appends rows in non-decreasing time order,
//! and scans them back with optional predicate filters - within one
//! process run, or after a restart via recovery.
//!
//! # Components
//!
//! - [`Schema`] / [`Column`] / [`ColumnType`]: the typed column list plus
//!   the designated time column
//! - [`Table`]: the active block, rotation policy, close-time persistence
//!   and recovery
//! - [`TableReader`]: streaming scans with statistics-based block skipping
//! - [`Wal`]: fsynced per-table row journal that makes unflushed appends
//!   crash-safe
//! - [`Database`]: registry wiring tables, journals and recovery together
//!
//! # Example
//!
//! ```rust,ignore
//! use strata::{Column, ColumnType, CreateTableOptions, Database, FilterOp, Row, Schema, Value};
//!
//! let db = Database::open("market")?;
//! let schema = Schema::new("trades", "ts", vec![
//!     Column::new("ts", ColumnType::Int64),
//!     Column::new("symbol", ColumnType::String),
//!     Column::new("price", ColumnType::Float64),
//! ]);
//! let table = db.create_table(schema, CreateTableOptions { enable_wal: true })?;
//!
//! let mut guard = table.lock();
//! let mut row = Row::new();
//! row.insert("ts".into(), Value::Int64(1));
//! row.insert("symbol".into(), Value::String("AAPL".into()));
//! row.insert("price".into(), Value::Float64(150.0));
//! guard.append_row(&row)?;
//!
//! let mut reader = guard.reader().filter("symbol", FilterOp::Eq, "AAPL");
//! while let Some(row) = reader.next()? {
//!     // ...
//! }
//! ```

#![deny(missing_docs)]

pub mod db;
pub mod error;
pub mod schema;
pub mod table;
pub mod value;
pub mod wal;

pub use db::{CreateTableOptions, Database};
pub use error::{Result, StrataError};
pub use schema::{Column, ColumnType, Schema};
pub use table::{Block, FilterOp, Table, TableConfig, TableReader};
pub use value::{Row, RowBuilder, Value};
pub use wal::Wal;
