//! Parquet encoding and decoding for block data.
//!
//! A sealed block serializes to a self-describing Parquet file: columns
//! named and ordered per the table schema (Int64, Double, ByteArray), one
//! row group, page statistics enabled so min/max survive a cold restart.
//! Decoding reads small record batches and matches columns by name, so a
//! file written under an extended schema still loads the columns it shares
//! with the reader's schema.

use crate::error::{Result, StrataError};
use crate::schema::{ColumnType, Schema};
use crate::table::column::{ColumnLocation, ColumnStorage};
use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema as ArrowSchema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::{EnabledStatistics, WriterProperties};
use parquet::file::reader::ChunkReader;
use parquet::file::statistics::Statistics;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

/// Values decoded per read call; small enough to stay cache-resident.
const READ_BATCH_SIZE: usize = 256;

/// Per-column min/max statistics recovered from a block file, indexed by
/// the per-type column index.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct ColumnStats {
    pub(crate) int_min: Vec<i64>,
    pub(crate) int_max: Vec<i64>,
    pub(crate) float_min: Vec<f64>,
    pub(crate) float_max: Vec<f64>,
}

fn arrow_schema(schema: &Schema) -> Result<Arc<ArrowSchema>> {
    let mut fields = Vec::with_capacity(schema.columns.len());
    for col in &schema.columns {
        let data_type = match col.ty {
            ColumnType::Int64 => DataType::Int64,
            ColumnType::Float64 => DataType::Float64,
            ColumnType::String => DataType::Utf8,
            ColumnType::Boolean => {
                return Err(StrataError::InvalidSchema(
                    "boolean columns are not supported".into(),
                ));
            }
        };
        fields.push(Field::new(&col.name, data_type, false));
    }
    Ok(Arc::new(ArrowSchema::new(fields)))
}

/// Encodes a block's columns into `sink` as a single-row-group Parquet
/// file, dereferencing dictionary IDs to string bytes on the way out.
pub(crate) fn write_block<W: Write + Send>(
    sink: W,
    storage: &ColumnStorage,
    row_count: usize,
    schema: &Schema,
    locations: &[ColumnLocation],
) -> Result<()> {
    let arrow = arrow_schema(schema)?;

    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(schema.columns.len());
    for (logical, col) in schema.columns.iter().enumerate() {
        let loc = locations[logical];
        let array: ArrayRef = match col.ty {
            ColumnType::Int64 => Arc::new(Int64Array::from(storage.int64_cols[loc.index].clone())),
            ColumnType::Float64 => {
                Arc::new(Float64Array::from(storage.float64_cols[loc.index].clone()))
            }
            ColumnType::String => {
                let reads = &storage.string_reads[loc.index];
                Arc::new(StringArray::from_iter_values(
                    storage.string_cols[loc.index]
                        .iter()
                        .map(|&id| reads[id as usize].as_str()),
                ))
            }
            ColumnType::Boolean => {
                return Err(StrataError::InvalidSchema(
                    "boolean columns are not supported".into(),
                ));
            }
        };
        arrays.push(array);
    }

    let batch = RecordBatch::try_new(arrow.clone(), arrays)?;

    let props = WriterProperties::builder()
        .set_max_row_group_size(row_count.max(1))
        .set_statistics_enabled(EnabledStatistics::Page)
        .build();

    let mut writer = ArrowWriter::try_new(sink, arrow, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

/// Decodes every row of `input` into `dest`, interning strings into the
/// destination's dictionaries.
pub(crate) fn read_into<R: ChunkReader + 'static>(
    input: R,
    dest: &mut ColumnStorage,
    schema: &Schema,
    locations: &[ColumnLocation],
) -> Result<()> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(input)?
        .with_batch_size(READ_BATCH_SIZE)
        .build()?;

    for batch in reader {
        let batch = batch?;
        for (logical, col) in schema.columns.iter().enumerate() {
            let loc = locations[logical];
            let array = batch.column_by_name(&col.name).ok_or_else(|| {
                StrataError::FileFormat(format!("column {} not found in block file", col.name))
            })?;

            match loc.ty {
                ColumnType::Int64 => {
                    let values =
                        array
                            .as_any()
                            .downcast_ref::<Int64Array>()
                            .ok_or_else(|| {
                                StrataError::FileFormat(format!(
                                    "column {} is not int64",
                                    col.name
                                ))
                            })?;
                    for i in 0..values.len() {
                        dest.append_int64(loc, values.value(i));
                    }
                }
                ColumnType::Float64 => {
                    let values =
                        array
                            .as_any()
                            .downcast_ref::<Float64Array>()
                            .ok_or_else(|| {
                                StrataError::FileFormat(format!(
                                    "column {} is not float64",
                                    col.name
                                ))
                            })?;
                    for i in 0..values.len() {
                        dest.append_float64(loc, values.value(i));
                    }
                }
                ColumnType::String => {
                    let values =
                        array
                            .as_any()
                            .downcast_ref::<StringArray>()
                            .ok_or_else(|| {
                                StrataError::FileFormat(format!(
                                    "column {} is not a string column",
                                    col.name
                                ))
                            })?;
                    for i in 0..values.len() {
                        dest.append_string(loc, values.value(i));
                    }
                }
                ColumnType::Boolean => {
                    return Err(StrataError::InvalidSchema(
                        "boolean columns are not supported".into(),
                    ));
                }
            }
        }
    }

    Ok(())
}

/// Recovers per-column min/max statistics from a block file on disk.
///
/// Statistics accumulate across row groups. A schema column missing from
/// the file, or one without usable statistics, is an error so recovery can
/// skip the file rather than serve it with unsound bounds.
pub(crate) fn read_stats(
    path: &Path,
    schema: &Schema,
    locations: &[ColumnLocation],
) -> Result<ColumnStats> {
    let file = File::open(path).map_err(StrataError::StorageIo)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let metadata = builder.metadata().clone();

    let num_int = locations
        .iter()
        .filter(|l| l.ty == ColumnType::Int64)
        .count();
    let num_float = locations
        .iter()
        .filter(|l| l.ty == ColumnType::Float64)
        .count();

    let mut stats = ColumnStats {
        int_min: vec![0; num_int],
        int_max: vec![0; num_int],
        float_min: vec![0.0; num_float],
        float_max: vec![0.0; num_float],
    };

    for (logical, col) in schema.columns.iter().enumerate() {
        let loc = locations[logical];
        if !matches!(loc.ty, ColumnType::Int64 | ColumnType::Float64) {
            continue;
        }

        let mut int_acc: Option<(i64, i64)> = None;
        let mut float_acc: Option<(f64, f64)> = None;

        for rg_idx in 0..metadata.num_row_groups() {
            let row_group = metadata.row_group(rg_idx);
            let chunk = row_group
                .columns()
                .iter()
                .find(|c| c.column_descr().name() == col.name)
                .ok_or_else(|| {
                    StrataError::FileFormat(format!(
                        "column {} not found in block file",
                        col.name
                    ))
                })?;

            match (loc.ty, chunk.statistics()) {
                (ColumnType::Int64, Some(Statistics::Int64(s))) => {
                    let (Some(&min), Some(&max)) = (s.min_opt(), s.max_opt()) else {
                        return Err(StrataError::FileFormat(format!(
                            "missing statistics for column {}",
                            col.name
                        )));
                    };
                    int_acc = Some(match int_acc {
                        Some((lo, hi)) => (lo.min(min), hi.max(max)),
                        None => (min, max),
                    });
                }
                (ColumnType::Float64, Some(Statistics::Double(s))) => {
                    let (Some(&min), Some(&max)) = (s.min_opt(), s.max_opt()) else {
                        return Err(StrataError::FileFormat(format!(
                            "missing statistics for column {}",
                            col.name
                        )));
                    };
                    float_acc = Some(match float_acc {
                        Some((lo, hi)) => (lo.min(min), hi.max(max)),
                        None => (min, max),
                    });
                }
                _ => {
                    return Err(StrataError::FileFormat(format!(
                        "missing statistics for column {}",
                        col.name
                    )));
                }
            }
        }

        match loc.ty {
            ColumnType::Int64 => {
                if let Some((lo, hi)) = int_acc {
                    stats.int_min[loc.index] = lo;
                    stats.int_max[loc.index] = hi;
                }
            }
            ColumnType::Float64 => {
                if let Some((lo, hi)) = float_acc {
                    stats.float_min[loc.index] = lo;
                    stats.float_max[loc.index] = hi;
                }
            }
            _ => {}
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Column;
    use bytes::Bytes;
    use tempfile::TempDir;

    fn tick_schema() -> Schema {
        Schema::new(
            "ticks",
            "ts",
            vec![
                Column::new("ts", ColumnType::Int64),
                Column::new("price", ColumnType::Float64),
                Column::new("symbol", ColumnType::String),
            ],
        )
    }

    fn filled_storage(schema: &Schema) -> (ColumnStorage, Vec<ColumnLocation>) {
        let (mut storage, locations) = ColumnStorage::new(&schema.column_types()).unwrap();
        let rows = [
            (100i64, 150.5, "AAPL"),
            (200, 2800.0, "GOOG"),
            (300, 151.0, "AAPL"),
        ];
        for (ts, price, symbol) in rows {
            storage.append_int64(locations[0], ts);
            storage.append_float64(locations[1], price);
            storage.append_string(locations[2], symbol);
        }
        (storage, locations)
    }

    #[test]
    fn test_write_then_read_preserves_rows() {
        let schema = tick_schema();
        let (storage, locations) = filled_storage(&schema);

        let mut buf = Vec::new();
        write_block(&mut buf, &storage, 3, &schema, &locations).unwrap();
        assert!(!buf.is_empty());

        let (mut dest, _) = ColumnStorage::new(&schema.column_types()).unwrap();
        read_into(Bytes::from(buf), &mut dest, &schema, &locations).unwrap();

        assert_eq!(dest.int64_cols[0], vec![100, 200, 300]);
        assert_eq!(dest.float64_cols[0], vec![150.5, 2800.0, 151.0]);
        assert_eq!(dest.string_at(locations[2], 0), "AAPL");
        assert_eq!(dest.string_at(locations[2], 1), "GOOG");
        assert_eq!(dest.string_at(locations[2], 2), "AAPL");
        // Repeated strings re-intern to the same dictionary ID.
        assert_eq!(dest.string_cols[0][0], dest.string_cols[0][2]);
    }

    #[test]
    fn test_read_stats_recovers_min_max() {
        let schema = tick_schema();
        let (storage, locations) = filled_storage(&schema);

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("block.parquet");
        let file = File::create(&path).unwrap();
        write_block(&file, &storage, 3, &schema, &locations).unwrap();

        let stats = read_stats(&path, &schema, &locations).unwrap();
        assert_eq!(stats.int_min, vec![100]);
        assert_eq!(stats.int_max, vec![300]);
        assert_eq!(stats.float_min, vec![150.5]);
        assert_eq!(stats.float_max, vec![2800.0]);
    }

    #[test]
    fn test_read_into_requires_schema_columns() {
        let schema = tick_schema();
        let (storage, locations) = filled_storage(&schema);

        let mut buf = Vec::new();
        write_block(&mut buf, &storage, 3, &schema, &locations).unwrap();

        let wider = Schema::new(
            "ticks",
            "ts",
            vec![
                Column::new("ts", ColumnType::Int64),
                Column::new("volume", ColumnType::Int64),
            ],
        );
        let (mut dest, wider_locations) = ColumnStorage::new(&wider.column_types()).unwrap();
        let err = read_into(Bytes::from(buf), &mut dest, &wider, &wider_locations).unwrap_err();
        assert!(matches!(err, StrataError::FileFormat(_)));
    }
}
