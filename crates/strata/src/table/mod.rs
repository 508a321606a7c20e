//! Table orchestration: the append path with WAL durability, block
//! rotation, close-time persistence and recovery from disk.
//!
//! A table owns exactly one active [`Block`] plus an ordered list of sealed
//! cold blocks. Appends journal to the write-ahead log first, then mutate
//! the active block; when the active block reaches the configured size it
//! rotates into the cold list. Recovery rebuilds the cold list from block
//! file names and Parquet statistics, after which the database layer
//! replays the journal into the empty active block.

pub mod block;
pub mod column;
pub mod reader;

pub(crate) mod codec;

pub use block::Block;
pub use column::{ColumnLocation, ColumnStorage};
pub use reader::{FilterOp, TableReader};

use crate::error::{Result, StrataError};
use crate::schema::{ColumnType, Schema};
use crate::value::{Row, Value};
use crate::wal::Wal;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Default maximum rows per block before rotation.
pub const DEFAULT_MAX_BLOCK_SIZE: usize = 10_000_000;

/// Default on-disk data root, relative to the process working directory.
pub const DEFAULT_DATA_ROOT: &str = "_data_internal";

/// Placement and rotation policy for a table.
#[derive(Debug, Clone)]
pub struct TableConfig {
    /// Rows per block before the active block rotates.
    pub max_block_size: usize,
    /// Materialize rotated blocks to disk instead of in-memory bytes.
    pub use_disk_storage: bool,
    /// Root directory for on-disk data.
    pub data_root: PathBuf,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
            use_disk_storage: false,
            data_root: PathBuf::from(DEFAULT_DATA_ROOT),
        }
    }
}

/// A single append-only, time-ordered table.
///
/// All mutating operations must come from one logical caller; concurrent
/// readers are only safe while no writer is active.
#[derive(Debug)]
pub struct Table {
    schema: Schema,
    locations: Vec<ColumnLocation>,
    time_col_idx: usize,
    last_ts: Option<i64>,
    row_count: usize,
    active_block: Block,
    cold_blocks: Vec<Block>,
    wal: Option<Arc<Wal>>,
    config: TableConfig,
    db_name: String,
}

impl Table {
    /// Creates a table for `schema` inside database `db_name` with the
    /// default configuration.
    pub fn create(schema: Schema, wal: Option<Arc<Wal>>, db_name: impl Into<String>) -> Result<Self> {
        Self::create_with_config(schema, wal, db_name, TableConfig::default())
    }

    /// Creates a table with an explicit configuration.
    ///
    /// # Errors
    ///
    /// `InvalidSchema` when the schema fails validation or contains a
    /// column type the engine does not store.
    pub fn create_with_config(
        schema: Schema,
        wal: Option<Arc<Wal>>,
        db_name: impl Into<String>,
        config: TableConfig,
    ) -> Result<Self> {
        schema.validate()?;

        let time_col_idx = schema.time_column_index().ok_or_else(|| {
            StrataError::InvalidSchema(format!("time column {} not found", schema.time_column))
        })?;
        let (active_block, locations) = Block::new(&schema.column_types())?;

        Ok(Self {
            schema,
            locations,
            time_col_idx,
            last_ts: None,
            row_count: 0,
            active_block,
            cold_blocks: Vec::new(),
            wal,
            config,
            db_name: db_name.into(),
        })
    }

    /// The table's schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Total rows across the active and cold blocks.
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Sealed cold blocks in rotation order.
    pub fn cold_blocks(&self) -> &[Block] {
        &self.cold_blocks
    }

    /// Sets the rotation threshold. Only meaningful before the first
    /// append.
    pub fn set_max_block_size(&mut self, rows: usize) {
        self.config.max_block_size = rows;
    }

    /// Switches rotated blocks to on-disk materialization. Only meaningful
    /// before the first append.
    pub fn set_use_disk_storage(&mut self, on: bool) {
        self.config.use_disk_storage = on;
    }

    pub(crate) fn attach_wal(&mut self, wal: Arc<Wal>) {
        self.wal = Some(wal);
    }

    pub(crate) fn column_location(&self, name: &str) -> Option<ColumnLocation> {
        self.schema
            .columns
            .iter()
            .position(|c| c.name == name)
            .map(|i| self.locations[i])
    }

    fn table_dir(&self) -> PathBuf {
        self.config
            .data_root
            .join(&self.db_name)
            .join(&self.schema.name)
    }

    fn block_file_path(&self, max_ts: i64, row_count: usize, cold_idx: usize) -> PathBuf {
        self.table_dir()
            .join(format!("Ts{max_ts}R{row_count}i{cold_idx}.parquet"))
    }

    /// Appends one row given as a by-name map.
    ///
    /// The row is journaled to the WAL (durably) before any in-memory state
    /// changes, and validated in full before the active block is touched: a
    /// failed append leaves the table exactly as it was.
    ///
    /// # Errors
    ///
    /// `ColumnCountMismatch`/`MissingColumn` for a malformed row,
    /// `TypeMismatch` for a value of the wrong type, `OutOfOrder` when the
    /// timestamp regresses, `WalIo` when journaling fails.
    pub fn append_row(&mut self, row: &Row) -> Result<()> {
        let ordered = self.ordered_values(row)?;
        self.append_ordered(&ordered)
    }

    /// Appends one row given in schema order, as produced by
    /// [`RowBuilder::finish`](crate::value::RowBuilder::finish). Shares the
    /// validation and durability behavior of [`Table::append_row`].
    pub fn append(&mut self, values: &[Value]) -> Result<()> {
        if values.len() != self.schema.columns.len() {
            return Err(StrataError::ColumnCountMismatch {
                expected: self.schema.columns.len(),
                got: values.len(),
            });
        }
        let ordered: Vec<&Value> = values.iter().collect();
        self.append_ordered(&ordered)
    }

    /// Appends a replayed row without journaling it again.
    pub(crate) fn load_row_no_wal(&mut self, row: &Row) -> Result<()> {
        let ordered = self.ordered_values(row)?;
        self.append_helper(&ordered)
    }

    fn ordered_values<'r>(&self, row: &'r Row) -> Result<Vec<&'r Value>> {
        if row.len() != self.schema.columns.len() {
            return Err(StrataError::ColumnCountMismatch {
                expected: self.schema.columns.len(),
                got: row.len(),
            });
        }
        self.schema
            .columns
            .iter()
            .map(|col| {
                row.get(&col.name)
                    .ok_or_else(|| StrataError::MissingColumn(col.name.clone()))
            })
            .collect()
    }

    fn append_ordered(&mut self, values: &[&Value]) -> Result<()> {
        if self.config.use_disk_storage && self.wal.is_none() {
            let wal = Wal::new(self.table_dir().join("wal"), self.schema.clone())?;
            self.wal = Some(Arc::new(wal));
        }

        if let Some(wal) = &self.wal {
            wal.append_values(values)?;
        }

        self.append_helper(values)
    }

    fn append_helper(&mut self, values: &[&Value]) -> Result<()> {
        if values.len() != self.schema.columns.len() {
            return Err(StrataError::ColumnCountMismatch {
                expected: self.schema.columns.len(),
                got: values.len(),
            });
        }

        // Validate everything up front so a failed append cannot leave a
        // partially written row behind.
        let ts = match values[self.time_col_idx] {
            Value::Int64(ts) => *ts,
            _ => {
                return Err(StrataError::TypeMismatch {
                    column: self.schema.columns[self.time_col_idx].name.clone(),
                    expected: ColumnType::Int64,
                });
            }
        };
        if let Some(last_ts) = self.last_ts {
            if ts < last_ts {
                return Err(StrataError::OutOfOrder { ts, last_ts });
            }
        }
        for (col, value) in self.schema.columns.iter().zip(values) {
            if value.column_type() != col.ty {
                return Err(StrataError::TypeMismatch {
                    column: col.name.clone(),
                    expected: col.ty,
                });
            }
        }

        let storage = self
            .active_block
            .storage
            .as_mut()
            .ok_or(StrataError::BlockUnmaterialized)?;
        for (logical, value) in values.iter().enumerate() {
            let loc = self.locations[logical];
            match value {
                Value::Int64(v) => storage.append_int64(loc, *v),
                Value::Float64(v) => storage.append_float64(loc, *v),
                Value::String(s) => {
                    storage.append_string(loc, s);
                }
            }
        }

        self.active_block.row_count += 1;
        self.row_count += 1;
        self.last_ts = Some(ts);
        self.active_block.max_ts = ts;

        if self.active_block.row_count >= self.config.max_block_size {
            self.rotate_active()?;
        }
        Ok(())
    }

    fn rotate_active(&mut self) -> Result<()> {
        let use_disk = self.config.use_disk_storage;
        let path = use_disk.then(|| {
            self.block_file_path(
                self.active_block.max_ts,
                self.active_block.row_count,
                self.cold_blocks.len(),
            )
        });

        self.active_block
            .rotate(path.as_deref(), &self.schema, &self.locations)?;

        if use_disk {
            if let Some(wal) = &self.wal {
                // The rotated block is fsynced before the journal shrinks.
                wal.reset()?;
            }
        }

        debug!(
            rows = self.active_block.row_count,
            max_ts = self.active_block.max_ts,
            on_disk = use_disk,
            "rotated block"
        );

        let (fresh, _) = Block::new(&self.schema.column_types())?;
        let sealed = std::mem::replace(&mut self.active_block, fresh);
        self.cold_blocks.push(sealed);
        Ok(())
    }

    /// Persists any unflushed data: the active block when it holds rows,
    /// then every cold block not yet on disk. Safe to call more than once;
    /// appending after a close fails.
    pub fn close(&mut self) -> Result<()> {
        if self.active_block.row_count > 0 {
            let path = self.block_file_path(
                self.active_block.max_ts,
                self.active_block.row_count,
                self.cold_blocks.len(),
            );
            self.active_block
                .persist(&path, &self.schema, &self.locations)?;

            if let Some(wal) = &self.wal {
                wal.reset()?;
            }
        }

        for i in 0..self.cold_blocks.len() {
            if self.cold_blocks[i].is_on_disk() {
                continue;
            }
            let path =
                self.block_file_path(self.cold_blocks[i].max_ts, self.cold_blocks[i].row_count, i);
            self.cold_blocks[i].persist(&path, &self.schema, &self.locations)?;
        }

        Ok(())
    }

    /// Rebuilds the cold-block list from the table's on-disk directory.
    ///
    /// Files named `Ts<max_ts>R<rows>i<idx>.parquet` become sealed on-disk
    /// blocks with statistics recovered from their Parquet metadata; other
    /// files are ignored. A matching file that cannot be opened, or whose
    /// statistics cannot be read, is skipped with a warning so the
    /// remaining blocks can still be served. Any on-disk evidence switches
    /// future rotations to disk.
    pub fn load_from_disk(&mut self) -> Result<()> {
        let dir = self.table_dir();
        match fs::metadata(&dir) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(StrataError::StorageIo(io::Error::other(format!(
                    "path {} is not a directory",
                    dir.display()
                ))));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StrataError::StorageIo(e)),
        }

        let mut loaded: Vec<(Block, usize)> = Vec::new();
        for entry in fs::read_dir(&dir).map_err(StrataError::StorageIo)? {
            let entry = entry.map_err(StrataError::StorageIo)?;
            let path = entry.path();
            if path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some((max_ts, row_count, iter)) = parse_block_file_name(name) else {
                continue;
            };

            let stats = match codec::read_stats(&path, &self.schema, &self.locations) {
                Ok(stats) => stats,
                Err(err) => {
                    warn!(file = %path.display(), error = %err, "skipping unreadable block file");
                    continue;
                }
            };

            let mut block = Block::from_disk(path, max_ts, row_count);
            block.int_min = stats.int_min;
            block.int_max = stats.int_max;
            block.float_min = stats.float_min;
            block.float_max = stats.float_max;

            self.row_count += row_count;
            loaded.push((block, iter));
        }

        // Rotation order equals (max_ts, iter): ties on max_ts are broken
        // by the rotation index encoded in the file name.
        loaded.sort_by_key(|(block, iter)| (block.max_ts, *iter));

        if let Some((last, _)) = loaded.last() {
            if self.last_ts.map_or(true, |ts| last.max_ts > ts) {
                self.last_ts = Some(last.max_ts);
            }
        }
        debug!(blocks = loaded.len(), table = %self.schema.name, "loaded blocks from disk");

        self.cold_blocks
            .extend(loaded.into_iter().map(|(block, _)| block));
        self.config.use_disk_storage = true;
        Ok(())
    }

    /// Returns a streaming reader over the table's blocks.
    ///
    /// The block set is snapshotted at call time; the scan yields cold
    /// blocks in rotation order, then the active block.
    pub fn reader(&self) -> TableReader<'_> {
        TableReader::new(self)
    }
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Parses `Ts<max_ts>R<rows>i<idx>.parquet`, the cold-block file name
/// produced by rotation. Returns `None` for anything else.
pub(crate) fn parse_block_file_name(name: &str) -> Option<(i64, usize, usize)> {
    let rest = name.strip_suffix(".parquet")?;
    let rest = rest.strip_prefix("Ts")?;

    let (ts_part, rest) = rest.split_at(rest.find('R')?);
    let rest = rest.strip_prefix('R')?;
    let (rows_part, rest) = rest.split_at(rest.find('i')?);
    let idx_part = rest.strip_prefix('i')?;

    let ts_digits = ts_part.strip_prefix('-').unwrap_or(ts_part);
    if !all_digits(ts_digits) || !all_digits(rows_part) || !all_digits(idx_part) {
        return None;
    }

    let max_ts = ts_part.parse::<i64>().ok()?;
    let row_count = rows_part.parse::<usize>().ok()?;
    let iter = idx_part.parse::<usize>().ok()?;
    Some((max_ts, row_count, iter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Column;
    use crate::value::RowBuilder;
    use tempfile::TempDir;

    fn metric_schema() -> Schema {
        Schema::new(
            "flush_test",
            "ts",
            vec![
                Column::new("ts", ColumnType::Int64),
                Column::new("val", ColumnType::Float64),
            ],
        )
    }

    fn make_row(ts: i64, val: f64) -> Row {
        let mut row = Row::new();
        row.insert("ts".into(), Value::Int64(ts));
        row.insert("val".into(), Value::Float64(val));
        row
    }

    #[test]
    fn test_append_accumulates_rows() {
        let mut table = Table::create(metric_schema(), None, "test_db").unwrap();
        for i in 0..5 {
            table.append_row(&make_row(i * 100, i as f64)).unwrap();
        }
        assert_eq!(table.row_count(), 5);
        assert_eq!(table.cold_blocks().len(), 0);
    }

    #[test]
    fn test_out_of_order_append_rejected() {
        let mut table = Table::create(metric_schema(), None, "test_db").unwrap();
        table.append_row(&make_row(100, 1.0)).unwrap();

        let err = table.append_row(&make_row(50, 2.0)).unwrap_err();
        assert!(matches!(err, StrataError::OutOfOrder { ts: 50, last_ts: 100 }));
        assert_eq!(table.row_count(), 1);
    }

    #[test]
    fn test_equal_timestamps_accepted() {
        let mut table = Table::create(metric_schema(), None, "test_db").unwrap();
        table.append_row(&make_row(200, 1.0)).unwrap();
        table.append_row(&make_row(200, 2.0)).unwrap();
        table.append_row(&make_row(200, 3.0)).unwrap();
        assert_eq!(table.row_count(), 3);
    }

    #[test]
    fn test_failed_append_leaves_no_partial_row() {
        let mut table = Table::create(metric_schema(), None, "test_db").unwrap();
        table.append_row(&make_row(100, 1.0)).unwrap();

        // Valid timestamp, wrong type for the second column: nothing of the
        // row may stick.
        let mut bad = Row::new();
        bad.insert("ts".into(), Value::Int64(200));
        bad.insert("val".into(), Value::String("oops".into()));
        assert!(matches!(
            table.append_row(&bad),
            Err(StrataError::TypeMismatch { .. })
        ));

        assert_eq!(table.row_count(), 1);
        let mut reader = table.reader();
        let mut seen = 0;
        while let Some(row) = reader.next().unwrap() {
            assert_eq!(row["ts"], Value::Int64(100));
            seen += 1;
        }
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_missing_and_extra_columns_rejected() {
        let mut table = Table::create(metric_schema(), None, "test_db").unwrap();

        let mut short = Row::new();
        short.insert("ts".into(), Value::Int64(1));
        assert!(matches!(
            table.append_row(&short),
            Err(StrataError::ColumnCountMismatch { expected: 2, got: 1 })
        ));

        let mut renamed = Row::new();
        renamed.insert("ts".into(), Value::Int64(1));
        renamed.insert("value".into(), Value::Float64(1.0));
        assert!(matches!(
            table.append_row(&renamed),
            Err(StrataError::MissingColumn(_))
        ));
    }

    #[test]
    fn test_typed_builder_append() {
        let schema = metric_schema();
        let mut table = Table::create(schema.clone(), None, "test_db").unwrap();

        let values = RowBuilder::new(&schema)
            .set("ts", 100i64)
            .unwrap()
            .set("val", 1.5)
            .unwrap()
            .finish()
            .unwrap();
        table.append(&values).unwrap();

        assert_eq!(table.row_count(), 1);
    }

    #[test]
    fn test_rotation_to_memory_blocks() {
        let mut table = Table::create(metric_schema(), None, "test_db").unwrap();
        table.set_max_block_size(50);

        for i in 0..50 {
            table.append_row(&make_row(i, i as f64)).unwrap();
        }

        assert_eq!(table.cold_blocks().len(), 1);
        let cold = &table.cold_blocks()[0];
        assert!(!cold.has_live_storage());
        assert!(!cold.in_memory_data().unwrap().is_empty());
        assert!(!cold.is_on_disk());
        assert_eq!(cold.row_count(), 50);

        let mut reader = table.reader();
        let mut count = 0i64;
        while let Some(row) = reader.next().unwrap() {
            assert_eq!(row["ts"], Value::Int64(count));
            count += 1;
        }
        assert_eq!(count, 50);
    }

    #[test]
    fn test_rotation_to_disk_blocks() {
        let dir = TempDir::new().unwrap();
        let config = TableConfig {
            max_block_size: 50,
            use_disk_storage: true,
            data_root: dir.path().to_path_buf(),
        };
        let mut table =
            Table::create_with_config(metric_schema(), None, "test_db", config).unwrap();

        for i in 0..50 {
            table.append_row(&make_row(i, i as f64)).unwrap();
        }

        assert_eq!(table.cold_blocks().len(), 1);
        let cold = &table.cold_blocks()[0];
        assert!(cold.is_on_disk());
        assert!(cold.file_path().unwrap().exists());
        assert!(!cold.has_live_storage());

        let mut reader = table.reader();
        let mut count = 0i64;
        while let Some(row) = reader.next().unwrap() {
            assert_eq!(row["ts"], Value::Int64(count));
            count += 1;
        }
        assert_eq!(count, 50);
    }

    #[test]
    fn test_block_bound_respected() {
        let mut table = Table::create(metric_schema(), None, "test_db").unwrap();
        table.set_max_block_size(10);

        for i in 0..35 {
            table.append_row(&make_row(i, i as f64)).unwrap();
        }

        assert_eq!(table.cold_blocks().len(), 3);
        let cold_rows: usize = table.cold_blocks().iter().map(|b| b.row_count()).sum();
        assert_eq!(cold_rows + table.active_block.row_count, 35);
        for block in table.cold_blocks() {
            assert!(block.row_count() <= 10);
        }
    }

    #[test]
    fn test_cold_blocks_ordered_by_max_ts() {
        let mut table = Table::create(metric_schema(), None, "test_db").unwrap();
        table.set_max_block_size(5);

        for i in 0..23 {
            table.append_row(&make_row(i * 10, 0.0)).unwrap();
        }

        let max_ts: Vec<i64> = table.cold_blocks().iter().map(|b| b.max_ts()).collect();
        let mut sorted = max_ts.clone();
        sorted.sort_unstable();
        assert_eq!(max_ts, sorted);
        assert!(table.active_block.max_ts >= *max_ts.last().unwrap());
    }

    #[test]
    fn test_close_persists_and_recovery_restores() {
        let dir = TempDir::new().unwrap();
        let config = TableConfig {
            max_block_size: 100,
            use_disk_storage: true,
            data_root: dir.path().to_path_buf(),
        };

        {
            let mut table =
                Table::create_with_config(metric_schema(), None, "e2e_db", config.clone())
                    .unwrap();
            for i in 0..250 {
                table.append_row(&make_row(i * 10, i as f64)).unwrap();
            }
            table.close().unwrap();
            // Second close is a no-op.
            table.close().unwrap();
        }

        let mut table =
            Table::create_with_config(metric_schema(), None, "e2e_db", config).unwrap();
        table.load_from_disk().unwrap();
        assert_eq!(table.row_count(), 250);
        assert_eq!(table.cold_blocks().len(), 3);

        let mut reader = table.reader();
        let mut expected = 0i64;
        while let Some(row) = reader.next().unwrap() {
            assert_eq!(row["ts"], Value::Int64(expected * 10));
            expected += 1;
        }
        assert_eq!(expected, 250);
    }

    #[test]
    fn test_load_from_disk_ignores_foreign_files() {
        let dir = TempDir::new().unwrap();
        let table_dir = dir.path().join("scratch_db").join("flush_test");
        fs::create_dir_all(&table_dir).unwrap();
        fs::write(table_dir.join("notes.txt"), b"not a block").unwrap();
        fs::write(table_dir.join("Ts10R5i0.parquet"), b"garbage").unwrap();

        let config = TableConfig {
            data_root: dir.path().to_path_buf(),
            ..TableConfig::default()
        };
        let mut table =
            Table::create_with_config(metric_schema(), None, "scratch_db", config).unwrap();
        // The matching-but-corrupt file is skipped with a warning, the
        // text file silently.
        table.load_from_disk().unwrap();
        assert_eq!(table.row_count(), 0);
        assert!(table.cold_blocks().is_empty());
    }

    #[test]
    fn test_parse_block_file_name() {
        assert_eq!(
            parse_block_file_name("Ts1200R50i3.parquet"),
            Some((1200, 50, 3))
        );
        assert_eq!(
            parse_block_file_name("Ts-5R2i0.parquet"),
            Some((-5, 2, 0))
        );
        assert_eq!(parse_block_file_name("Ts12R5i1.tmp"), None);
        assert_eq!(parse_block_file_name("snapshot.parquet"), None);
        assert_eq!(parse_block_file_name("TsxRyiz.parquet"), None);
        assert_eq!(parse_block_file_name("Ts1R2i.parquet"), None);
        assert_eq!(parse_block_file_name("Ts1R-2i0.parquet"), None);
    }
}
