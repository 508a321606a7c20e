//! Write-ahead log for a single table.
//!
//! Every accepted row is journaled here before it touches in-memory state,
//! which makes unflushed appends crash-safe. The journal is one append-only
//! file, `wal/wal.dat` inside the table's directory, holding a sequence of
//! length-prefixed records:
//!
//! ```text
//! ┌─────────────────┬─────────────────────────────────────────────┐
//! │ u32 length (LE) │ payload (one row)                           │
//! ├─────────────────┼─────────────────────────────────────────────┤
//! │ u32 length (LE) │ payload                                     │
//! └─────────────────┴─────────────────────────────────────────────┘
//! ```
//!
//! A payload encodes one row column by column in schema order: Int64 as
//! 8 bytes little-endian, Float64 as its IEEE-754 bit pattern
//! little-endian, String as `[u32 length LE][UTF-8 bytes]`. Zero-length
//! records are legal and skipped on replay (reserved for padding).
//!
//! [`Wal::append_values`] returns only after the record is fsynced. After a
//! rotation whose output reached durable storage, [`Wal::reset`] truncates
//! the journal so it only needs to cover the currently-active block.

use crate::error::{Result, StrataError};
use crate::schema::{ColumnType, Schema};
use crate::table::Table;
use crate::value::{Row, Value};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name of the journal inside the WAL directory.
const WAL_FILE: &str = "wal.dat";

/// Append-only, fsynced row journal scoped to one table.
///
/// The handle carries its own exclusive lock; append, replay and reset are
/// mutually exclusive. The caller must supply the same schema the journal
/// was written under when reopening it.
#[derive(Debug)]
pub struct Wal {
    path: PathBuf,
    schema: Schema,
    file: Mutex<Option<File>>,
}

impl Wal {
    /// Opens (creating if needed) the journal file under `dir`.
    ///
    /// # Errors
    ///
    /// `WalIo` when the directory or file cannot be created or opened.
    pub fn new(dir: impl AsRef<Path>, schema: Schema) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(StrataError::WalIo)?;
        let path = dir.join(WAL_FILE);
        let file = Self::open_file(&path)?;
        Ok(Self {
            path,
            schema,
            file: Mutex::new(Some(file)),
        })
    }

    fn open_file(path: &Path) -> Result<File> {
        OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .map_err(StrataError::WalIo)
    }

    /// Journals one row, given in schema order. Durable when this returns.
    ///
    /// # Errors
    ///
    /// `WalClosed` after [`Wal::close`]; `TypeMismatch` when a value does
    /// not match its column; `WalIo` when the write or fsync fails, in
    /// which case the row is not considered appended.
    pub fn append_values(&self, values: &[&Value]) -> Result<()> {
        let payload = self.encode_values(values)?;

        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or(StrataError::WalClosed)?;
        file.write_all(&(payload.len() as u32).to_le_bytes())
            .map_err(StrataError::WalIo)?;
        file.write_all(&payload).map_err(StrataError::WalIo)?;
        file.sync_all().map_err(StrataError::WalIo)?;
        Ok(())
    }

    fn encode_values(&self, values: &[&Value]) -> Result<Vec<u8>> {
        if values.len() != self.schema.columns.len() {
            return Err(StrataError::ColumnCountMismatch {
                expected: self.schema.columns.len(),
                got: values.len(),
            });
        }

        let mut buf = Vec::with_capacity(values.len() * 8);
        for (col, value) in self.schema.columns.iter().zip(values) {
            match (col.ty, value) {
                (ColumnType::Int64, Value::Int64(v)) => buf.extend_from_slice(&v.to_le_bytes()),
                (ColumnType::Float64, Value::Float64(v)) => {
                    buf.extend_from_slice(&v.to_le_bytes())
                }
                (ColumnType::String, Value::String(s)) => {
                    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
                    buf.extend_from_slice(s.as_bytes());
                }
                _ => {
                    return Err(StrataError::TypeMismatch {
                        column: col.name.clone(),
                        expected: col.ty,
                    });
                }
            }
        }
        Ok(buf)
    }

    /// Decodes one record payload into a row keyed by column name.
    fn decode_payload(&self, payload: &[u8]) -> Result<Row> {
        let mut pos = 0usize;
        let mut row = Row::with_capacity(self.schema.columns.len());

        for col in &self.schema.columns {
            let value = match col.ty {
                ColumnType::Int64 => Value::Int64(i64::from_le_bytes(read_array(payload, &mut pos)?)),
                ColumnType::Float64 => {
                    Value::Float64(f64::from_le_bytes(read_array(payload, &mut pos)?))
                }
                ColumnType::String => {
                    let len = u32::from_le_bytes(read_array(payload, &mut pos)?) as usize;
                    let bytes = read_slice(payload, &mut pos, len)?;
                    let s = std::str::from_utf8(bytes).map_err(|_| {
                        StrataError::WalCorrupt(format!("invalid utf-8 in column {}", col.name))
                    })?;
                    Value::String(s.to_string())
                }
                ColumnType::Boolean => {
                    return Err(StrataError::WalCorrupt(format!(
                        "unsupported column type for {}",
                        col.name
                    )));
                }
            };
            row.insert(col.name.clone(), value);
        }

        Ok(row)
    }

    /// Replays every journaled row into `table` through its no-WAL append
    /// path, in journal order.
    ///
    /// The table must not have this journal attached while replay runs; the
    /// database layer attaches it once replay completes.
    ///
    /// # Errors
    ///
    /// `WalClosed` after [`Wal::close`]; any decode or short-read error
    /// aborts the replay.
    pub fn replay(&self, table: &mut Table) -> Result<()> {
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or(StrataError::WalClosed)?;
        file.seek(SeekFrom::Start(0)).map_err(StrataError::WalIo)?;

        let mut replayed = 0usize;
        loop {
            let mut len_buf = [0u8; 4];
            match file.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(StrataError::WalIo(e)),
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            if len == 0 {
                continue;
            }

            let mut payload = vec![0u8; len];
            file.read_exact(&mut payload).map_err(StrataError::WalIo)?;

            let row = self.decode_payload(&payload)?;
            table.load_row_no_wal(&row)?;
            replayed += 1;
        }

        debug!(rows = replayed, path = %self.path.display(), "replayed wal");
        Ok(())
    }

    /// Truncates the journal by removing and recreating its file. Called
    /// after a rotation whose cold block reached durable storage.
    pub fn reset(&self) -> Result<()> {
        let mut guard = self.file.lock();
        // Close before removing so the handle never points at a dead inode.
        *guard = None;
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StrataError::WalIo(e)),
        }
        *guard = Some(Self::open_file(&self.path)?);
        debug!(path = %self.path.display(), "reset wal");
        Ok(())
    }

    /// Closes the file handle. Later appends fail with `WalClosed`.
    pub fn close(&self) {
        *self.file.lock() = None;
    }
}

fn read_array<const N: usize>(payload: &[u8], pos: &mut usize) -> Result<[u8; N]> {
    let slice = read_slice(payload, pos, N)?;
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    Ok(out)
}

fn read_slice<'p>(payload: &'p [u8], pos: &mut usize, len: usize) -> Result<&'p [u8]> {
    let end = pos
        .checked_add(len)
        .filter(|&end| end <= payload.len())
        .ok_or_else(|| StrataError::WalCorrupt("record truncated".into()))?;
    let slice = &payload[*pos..end];
    *pos = end;
    Ok(slice)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Column;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn metric_schema() -> Schema {
        Schema::new(
            "test_table",
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

    fn append(wal: &Wal, row: &Row) {
        let ordered: Vec<&Value> = [&row["ts"], &row["val"]].into();
        wal.append_values(&ordered).unwrap();
    }

    #[test]
    fn test_append_and_replay() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::new(dir.path(), metric_schema()).unwrap();

        append(&wal, &make_row(1, 1.1));
        append(&wal, &make_row(2, 2.2));

        let mut table = Table::create(metric_schema(), None, "test_db").unwrap();
        wal.replay(&mut table).unwrap();

        assert_eq!(table.row_count(), 2);
    }

    #[test]
    fn test_reset_discards_journal() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::new(dir.path(), metric_schema()).unwrap();

        append(&wal, &make_row(1, 1.1));
        wal.reset().unwrap();

        let mut table = Table::create(metric_schema(), None, "test_db").unwrap();
        wal.replay(&mut table).unwrap();
        assert_eq!(table.row_count(), 0);

        // Appends after a reset land in the fresh journal.
        append(&wal, &make_row(2, 2.2));
        let mut table = Table::create(metric_schema(), None, "test_db").unwrap();
        wal.replay(&mut table).unwrap();
        assert_eq!(table.row_count(), 1);
    }

    #[test]
    fn test_replay_survives_process_restart() {
        let dir = TempDir::new().unwrap();
        {
            let wal = Wal::new(dir.path(), metric_schema()).unwrap();
            for i in 0..10 {
                append(&wal, &make_row(i, i as f64 * 1.5));
            }
        }

        let wal = Wal::new(dir.path(), metric_schema()).unwrap();
        let mut table = Table::create(metric_schema(), None, "test_db").unwrap();
        wal.replay(&mut table).unwrap();
        assert_eq!(table.row_count(), 10);
    }

    #[test]
    fn test_zero_length_records_are_skipped() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::new(dir.path(), metric_schema()).unwrap();

        append(&wal, &make_row(1, 1.0));
        {
            let mut guard = wal.file.lock();
            let file = guard.as_mut().unwrap();
            file.write_all(&0u32.to_le_bytes()).unwrap();
        }
        append(&wal, &make_row(2, 2.0));

        let mut table = Table::create(metric_schema(), None, "test_db").unwrap();
        wal.replay(&mut table).unwrap();
        assert_eq!(table.row_count(), 2);
    }

    #[test]
    fn test_append_after_close_fails() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::new(dir.path(), metric_schema()).unwrap();
        wal.close();

        let row = make_row(1, 1.0);
        let ordered: Vec<&Value> = [&row["ts"], &row["val"]].into();
        assert!(matches!(
            wal.append_values(&ordered),
            Err(StrataError::WalClosed)
        ));
    }

    #[test]
    fn test_encode_rejects_type_mismatch() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::new(dir.path(), metric_schema()).unwrap();

        let bad = [&Value::Float64(1.0), &Value::Float64(1.0)];
        assert!(matches!(
            wal.append_values(&bad),
            Err(StrataError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_record_aborts_replay() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::new(dir.path(), metric_schema()).unwrap();

        append(&wal, &make_row(1, 1.0));
        {
            let mut guard = wal.file.lock();
            let file = guard.as_mut().unwrap();
            // A length prefix promising more bytes than exist.
            file.write_all(&64u32.to_le_bytes()).unwrap();
            file.write_all(&[0xde, 0xad]).unwrap();
        }

        let mut table = Table::create(metric_schema(), None, "test_db").unwrap();
        assert!(wal.replay(&mut table).is_err());
    }

    #[test]
    fn test_string_payload_round_trip() {
        let schema = Schema::new(
            "logs",
            "ts",
            vec![
                Column::new("ts", ColumnType::Int64),
                Column::new("msg", ColumnType::String),
            ],
        );
        let dir = TempDir::new().unwrap();
        let wal = Wal::new(dir.path(), schema.clone()).unwrap();

        let values = [&Value::Int64(7), &Value::String("error found".into())];
        let payload = wal.encode_values(&values).unwrap();
        let row = wal.decode_payload(&payload).unwrap();

        assert_eq!(row["ts"], Value::Int64(7));
        assert_eq!(row["msg"], Value::String("error found".into()));
    }

    #[test]
    fn test_wal_is_shareable_across_handles() {
        let dir = TempDir::new().unwrap();
        let wal = Arc::new(Wal::new(dir.path(), metric_schema()).unwrap());
        append(&wal, &make_row(1, 1.0));
        let clone = wal.clone();
        append(&clone, &make_row(2, 2.0));

        let mut table = Table::create(metric_schema(), None, "test_db").unwrap();
        wal.replay(&mut table).unwrap();
        assert_eq!(table.row_count(), 2);
    }
}
