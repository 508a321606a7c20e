//! Database registry: maps table names to table handles and wires the
//! recovery sequence (load blocks from disk, then replay the journal).

use crate::error::{Result, StrataError};
use crate::schema::Schema;
use crate::table::{Table, TableConfig, DEFAULT_DATA_ROOT};
use crate::wal::Wal;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

/// Options for [`Database::create_table`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateTableOptions {
    /// Open a write-ahead log for the table at creation time.
    pub enable_wal: bool,
}

/// A named collection of tables rooted at `<data_root>/<name>/`.
///
/// The registry carries its own read/write lock; each table handle is an
/// `Arc<Mutex<Table>>` so one writer at a time can drive it.
#[derive(Debug)]
pub struct Database {
    name: String,
    root: PathBuf,
    tables: RwLock<HashMap<String, Arc<Mutex<Table>>>>,
}

impl Database {
    /// Opens a database under the default data root.
    pub fn open(name: impl Into<String>) -> Result<Self> {
        Self::open_at(DEFAULT_DATA_ROOT, name)
    }

    /// Opens a database under an explicit data root. Tests point this at a
    /// scratch directory.
    pub fn open_at(root: impl Into<PathBuf>, name: impl Into<String>) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            root: root.into(),
            tables: RwLock::new(HashMap::new()),
        })
    }

    /// The database name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn wal_dir(&self, table: &str) -> PathBuf {
        self.root.join(&self.name).join(table).join("wal")
    }

    fn table_config(&self) -> TableConfig {
        TableConfig {
            data_root: self.root.clone(),
            ..TableConfig::default()
        }
    }

    /// Creates a new table for `schema`.
    ///
    /// # Errors
    ///
    /// `DuplicateTable` when the name is taken, `InvalidSchema` when the
    /// schema fails validation, `WalIo` when the journal cannot be opened.
    pub fn create_table(
        &self,
        schema: Schema,
        opts: CreateTableOptions,
    ) -> Result<Arc<Mutex<Table>>> {
        let mut tables = self.tables.write();
        if tables.contains_key(&schema.name) {
            return Err(StrataError::DuplicateTable(schema.name.clone()));
        }

        let wal = if opts.enable_wal {
            Some(Arc::new(Wal::new(
                self.wal_dir(&schema.name),
                schema.clone(),
            )?))
        } else {
            None
        };

        let name = schema.name.clone();
        let table = Table::create_with_config(schema, wal, self.name.clone(), self.table_config())?;
        let handle = Arc::new(Mutex::new(table));
        tables.insert(name, handle.clone());
        Ok(handle)
    }

    /// Returns the existing handle for `schema`'s table, or reconstructs
    /// one from disk: open the WAL on its conventional path, load cold
    /// blocks, replay the journal into the empty active block, then attach
    /// the WAL for subsequent appends.
    pub fn open_table(&self, schema: Schema) -> Result<Arc<Mutex<Table>>> {
        let mut tables = self.tables.write();
        if let Some(handle) = tables.get(&schema.name) {
            return Ok(handle.clone());
        }

        let wal = Arc::new(Wal::new(self.wal_dir(&schema.name), schema.clone())?);
        let name = schema.name.clone();
        let mut table =
            Table::create_with_config(schema, None, self.name.clone(), self.table_config())?;
        table.load_from_disk()?;
        wal.replay(&mut table)?;
        table.attach_wal(wal);

        let handle = Arc::new(Mutex::new(table));
        tables.insert(name, handle.clone());
        Ok(handle)
    }

    /// Looks up a registered table handle by name.
    pub fn table(&self, name: &str) -> Option<Arc<Mutex<Table>>> {
        self.tables.read().get(name).cloned()
    }

    /// Names of all registered tables, sorted.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Persists every registered table's unflushed blocks.
    pub fn close(&self) -> Result<()> {
        let tables = self.tables.read();
        for table in tables.values() {
            table.lock().close()?;
        }
        Ok(())
    }

    /// Removes the database's on-disk directory. Intended for test
    /// environments; absent data is not an error.
    pub fn destroy(self) -> Result<()> {
        let dir = self.root.join(&self.name);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StrataError::StorageIo(e)),
        }
    }
}
