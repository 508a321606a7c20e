//! Block lifecycle: a bounded run of rows, live while active, sealed into
//! Parquet bytes or an on-disk file on rotation.

use crate::error::{Result, StrataError};
use crate::schema::{ColumnType, Schema};
use crate::table::codec;
use crate::table::column::{ColumnLocation, ColumnStorage};
use bytes::Bytes;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// A bounded group of rows in columnar form.
///
/// Exactly one materialization holds the data at any time: the live
/// [`ColumnStorage`] while the block is active, serialized Parquet bytes
/// after an in-memory rotation, or an on-disk file after a disk rotation or
/// [`Block::persist`]. Once sealed a block is never mutated again; its
/// min/max statistics drive the reader's pushdown skip.
#[derive(Debug, Default)]
pub struct Block {
    pub(crate) storage: Option<ColumnStorage>,
    pub(crate) row_count: usize,
    pub(crate) max_ts: i64,
    pub(crate) path: Option<PathBuf>,
    pub(crate) data: Option<Bytes>,
    pub(crate) sealed: bool,
    pub(crate) int_min: Vec<i64>,
    pub(crate) int_max: Vec<i64>,
    pub(crate) float_min: Vec<f64>,
    pub(crate) float_max: Vec<f64>,
}

impl Block {
    /// Creates an empty active block with fresh storage and zeroed
    /// statistics, returning the storage's column locations.
    pub fn new(col_types: &[ColumnType]) -> Result<(Self, Vec<ColumnLocation>)> {
        let (storage, locations) = ColumnStorage::new(col_types)?;

        let num_int = col_types.iter().filter(|t| **t == ColumnType::Int64).count();
        let num_float = col_types
            .iter()
            .filter(|t| **t == ColumnType::Float64)
            .count();

        let block = Self {
            storage: Some(storage),
            int_min: vec![0; num_int],
            int_max: vec![0; num_int],
            float_min: vec![0.0; num_float],
            float_max: vec![0.0; num_float],
            ..Self::default()
        };
        Ok((block, locations))
    }

    /// Constructs a sealed block backed by an existing file, as recovery
    /// does. Statistics start empty and are filled by the caller.
    pub(crate) fn from_disk(path: PathBuf, max_ts: i64, row_count: usize) -> Self {
        Self {
            path: Some(path),
            max_ts,
            row_count,
            sealed: true,
            ..Self::default()
        }
    }

    /// Number of rows the block logically holds.
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Largest timestamp written to the block.
    pub fn max_ts(&self) -> i64 {
        self.max_ts
    }

    /// True once the block has been sealed.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// True when the block's materialization is an on-disk file.
    pub fn is_on_disk(&self) -> bool {
        self.path.is_some()
    }

    /// The block's file path, if it is on disk.
    pub fn file_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The serialized bytes, if the block was rotated without disk storage.
    pub fn in_memory_data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// True while the block still owns live column storage.
    pub fn has_live_storage(&self) -> bool {
        self.storage.is_some()
    }

    /// Recomputes per-column min/max statistics from the live storage.
    ///
    /// Empty columns are skipped, leaving their statistics at zero; a block
    /// whose storage has already been released is left untouched.
    pub fn update_stats(&mut self) {
        let Some(storage) = &self.storage else {
            return;
        };

        for (i, col) in storage.int64_cols.iter().enumerate() {
            if let (Some(&min), Some(&max)) = (col.iter().min(), col.iter().max()) {
                self.int_min[i] = min;
                self.int_max[i] = max;
            }
        }
        for (i, col) in storage.float64_cols.iter().enumerate() {
            if col.is_empty() {
                continue;
            }
            self.float_min[i] = col.iter().copied().fold(f64::INFINITY, f64::min);
            self.float_max[i] = col.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        }
    }

    /// Seals the block: refreshes statistics, encodes the columns to
    /// Parquet (an on-disk file at `target`, or an in-memory buffer when
    /// `target` is `None`), then releases the live storage.
    ///
    /// # Errors
    ///
    /// `BlockUnmaterialized` when the live storage was already released;
    /// `StorageIo`/`FileFormat` on write or encode failures.
    pub fn rotate(
        &mut self,
        target: Option<&Path>,
        schema: &Schema,
        locations: &[ColumnLocation],
    ) -> Result<()> {
        self.update_stats();

        let storage = self.storage.as_ref().ok_or(StrataError::BlockUnmaterialized)?;

        match target {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).map_err(StrataError::StorageIo)?;
                }
                let file = File::create(path).map_err(StrataError::StorageIo)?;
                codec::write_block(&file, storage, self.row_count, schema, locations)?;
                // The WAL is only reset once this block is durable.
                file.sync_all().map_err(StrataError::StorageIo)?;
                self.path = Some(path.to_path_buf());
                self.data = None;
            }
            None => {
                let mut buf = Vec::new();
                codec::write_block(&mut buf, storage, self.row_count, schema, locations)?;
                self.data = Some(Bytes::from(buf));
                self.path = None;
            }
        }

        self.storage = None;
        self.sealed = true;
        Ok(())
    }

    /// Ensures the block is on disk at `path`. A no-op when already on
    /// disk; otherwise refreshes statistics and writes out either the
    /// serialized bytes or the live storage, releasing both.
    ///
    /// # Errors
    ///
    /// `BlockUnmaterialized` when there is nothing to write.
    pub fn persist(
        &mut self,
        path: &Path,
        schema: &Schema,
        locations: &[ColumnLocation],
    ) -> Result<()> {
        if self.path.is_some() {
            return Ok(());
        }

        self.update_stats();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(StrataError::StorageIo)?;
        }
        let file = File::create(path).map_err(StrataError::StorageIo)?;

        if let Some(data) = &self.data {
            (&file).write_all(data).map_err(StrataError::StorageIo)?;
        } else if let Some(storage) = &self.storage {
            codec::write_block(&file, storage, self.row_count, schema, locations)?;
        } else {
            return Err(StrataError::BlockUnmaterialized);
        }
        file.sync_all().map_err(StrataError::StorageIo)?;

        self.path = Some(path.to_path_buf());
        self.data = None;
        self.storage = None;
        self.sealed = true;
        Ok(())
    }

    /// Rematerializes a sealed block's columns into `dest`, interning
    /// strings into the destination's dictionaries.
    ///
    /// # Errors
    ///
    /// `BlockUnmaterialized` when the block has neither serialized bytes
    /// nor a file path; decode failures surface as `FileFormat`.
    pub fn load_into(
        &self,
        dest: &mut ColumnStorage,
        schema: &Schema,
        locations: &[ColumnLocation],
    ) -> Result<()> {
        if let Some(data) = &self.data {
            codec::read_into(data.clone(), dest, schema, locations)
        } else if let Some(path) = &self.path {
            let file = File::open(path).map_err(StrataError::StorageIo)?;
            codec::read_into(file, dest, schema, locations)
        } else {
            Err(StrataError::BlockUnmaterialized)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Column;
    use tempfile::TempDir;

    fn tick_schema() -> Schema {
        Schema::new(
            "load_test",
            "ts",
            vec![
                Column::new("ts", ColumnType::Int64),
                Column::new("val", ColumnType::Float64),
                Column::new("sym", ColumnType::String),
            ],
        )
    }

    fn filled_block(schema: &Schema) -> (Block, Vec<ColumnLocation>) {
        let (mut block, locations) = Block::new(&schema.column_types()).unwrap();
        let storage = block.storage.as_mut().unwrap();

        storage.append_int64(locations[0], 10);
        storage.append_float64(locations[1], 10.5);
        storage.append_string(locations[2], "A");

        storage.append_int64(locations[0], 20);
        storage.append_float64(locations[1], 20.5);
        storage.append_string(locations[2], "B");

        block.row_count = 2;
        block.max_ts = 20;
        (block, locations)
    }

    #[test]
    fn test_update_stats_computes_min_max() {
        let schema = tick_schema();
        let (mut block, _) = filled_block(&schema);

        block.update_stats();
        assert_eq!(block.int_min, vec![10]);
        assert_eq!(block.int_max, vec![20]);
        assert_eq!(block.float_min, vec![10.5]);
        assert_eq!(block.float_max, vec![20.5]);
    }

    #[test]
    fn test_update_stats_skips_empty_columns() {
        let schema = tick_schema();
        let (mut block, _) = Block::new(&schema.column_types()).unwrap();

        block.update_stats();
        assert_eq!(block.int_min, vec![0]);
        assert_eq!(block.int_max, vec![0]);
    }

    #[test]
    fn test_rotate_to_memory_releases_storage() {
        let schema = tick_schema();
        let (mut block, locations) = filled_block(&schema);

        block.rotate(None, &schema, &locations).unwrap();

        assert!(block.is_sealed());
        assert!(!block.has_live_storage());
        assert!(!block.is_on_disk());
        assert!(!block.in_memory_data().unwrap().is_empty());
    }

    #[test]
    fn test_rotate_to_disk_writes_file() {
        let schema = tick_schema();
        let (mut block, locations) = filled_block(&schema);

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("block.parquet");
        block.rotate(Some(&path), &schema, &locations).unwrap();

        assert!(block.is_on_disk());
        assert!(block.in_memory_data().is_none());
        assert!(!block.has_live_storage());
        assert!(path.exists());
    }

    #[test]
    fn test_load_into_round_trips_columns() {
        let schema = tick_schema();
        let (mut block, locations) = filled_block(&schema);
        block.rotate(None, &schema, &locations).unwrap();

        let (mut dest, _) = ColumnStorage::new(&schema.column_types()).unwrap();
        block.load_into(&mut dest, &schema, &locations).unwrap();

        assert_eq!(dest.int64_cols[0], vec![10, 20]);
        assert_eq!(dest.float64_cols[0], vec![10.5, 20.5]);
        assert_eq!(dest.string_at(locations[2], 1), "B");
    }

    #[test]
    fn test_persist_is_idempotent() {
        let schema = tick_schema();
        let (mut block, locations) = filled_block(&schema);
        block.rotate(None, &schema, &locations).unwrap();

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("block.parquet");
        block.persist(&path, &schema, &locations).unwrap();
        assert!(block.is_on_disk());
        assert!(block.in_memory_data().is_none());

        let other = dir.path().join("other.parquet");
        block.persist(&other, &schema, &locations).unwrap();
        assert_eq!(block.file_path(), Some(path.as_path()));
        assert!(!other.exists());
    }

    #[test]
    fn test_load_into_without_materialization_fails() {
        let schema = tick_schema();
        let block = Block::from_disk(PathBuf::from("missing.parquet"), 0, 0);
        let mut unmaterialized = block;
        unmaterialized.path = None;

        let (mut dest, locations) = ColumnStorage::new(&schema.column_types()).unwrap();
        let err = unmaterialized
            .load_into(&mut dest, &schema, &locations)
            .unwrap_err();
        assert!(matches!(err, StrataError::BlockUnmaterialized));
    }
}
