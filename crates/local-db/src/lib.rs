use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{
    Builder, Database, ReadOnlyDatabase, ReadTransaction, ReadableDatabase, ReadableTable,
    TableDefinition, WriteTransaction,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
const EVENTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("events");
const EVENT_BLOCKS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("event_blocks");
const ROLLUPS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("rollups");
const CURSORS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("cursors");
const CHECKPOINTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("checkpoints");

const META_KEY: &str = "meta";
const WARP_DIR: &str = "warp";

pub const CURRENT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub root_dir: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("db"),
        }
    }
}

/// Logical tables. Every value is a MessagePack document keyed by a `|`-separated string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Meta,
    /// Raw event records keyed by event name and log id.
    Events,
    /// Secondary index of events in chain order, value is the `Events` key.
    EventBlocks,
    /// Folded rows per collection.
    Rollups,
    Cursors,
    Checkpoints,
}

impl Table {
    pub const ALL: [Table; 6] = [
        Table::Meta,
        Table::Events,
        Table::EventBlocks,
        Table::Rollups,
        Table::Cursors,
        Table::Checkpoints,
    ];

    const fn definition(self) -> TableDefinition<'static, &'static str, &'static [u8]> {
        match self {
            Table::Meta => META_TABLE,
            Table::Events => EVENTS_TABLE,
            Table::EventBlocks => EVENT_BLOCKS_TABLE,
            Table::Rollups => ROLLUPS_TABLE,
            Table::Cursors => CURSORS_TABLE,
            Table::Checkpoints => CHECKPOINTS_TABLE,
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|table| table.name() == name)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Table::Meta => "meta",
            Table::Events => "events",
            Table::EventBlocks => "event_blocks",
            Table::Rollups => "rollups",
            Table::Cursors => "cursors",
            Table::Checkpoints => "checkpoints",
        }
    }
}

#[derive(Debug)]
pub struct DbStore {
    root_dir: PathBuf,
    db: Database,
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("db error: {0}")]
    Database(#[from] redb::DatabaseError),
    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),
    #[error("table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("unsupported schema version {version}")]
    UnsupportedSchemaVersion { version: u32 },
    #[error("database needs repair; open a repaired copy instead")]
    NeedsRepair,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    pub schema_version: u32,
    pub app_version: String,
    pub created_at: u64,
}

impl Meta {
    fn new() -> Result<Self, DbError> {
        Ok(Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: now_epoch_secs()?,
        })
    }
}

/// Highest block fully merged for one event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorMeta {
    pub block: u64,
    pub updated_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderMeta {
    pub number: u64,
    pub hash: [u8; 32],
    pub timestamp: u64,
    pub parent_hash: [u8; 32],
}

/// Published snapshot of a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentMeta {
    pub name: String,
    pub hash: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub id: u64,
    pub begin: HeaderMeta,
    pub end: HeaderMeta,
    #[serde(default)]
    pub content: Option<ContentMeta>,
    pub sealed: bool,
    pub event_count: u64,
    pub created_at: u64,
}

impl DbStore {
    pub fn open(config: DbConfig) -> Result<Self, DbError> {
        let root_dir = config.root_dir;
        std::fs::create_dir_all(warp_dir(&root_dir))?;
        let db_path = db_path(&root_dir);

        loop {
            let db = if db_path.exists() {
                Database::open(&db_path)?
            } else {
                Database::create(&db_path)?
            };

            let store = Self {
                root_dir: root_dir.clone(),
                db,
            };
            store.initialize_schema()?;

            match store.read_meta()? {
                None => {
                    let meta = Meta::new()?;
                    store.write_meta(&meta)?;
                    return Ok(store);
                }
                Some(meta) if meta.schema_version > CURRENT_SCHEMA_VERSION => {
                    drop(store);
                    backup_db(&db_path)?;
                    continue;
                }
                Some(meta) if meta.schema_version < CURRENT_SCHEMA_VERSION => {
                    if let Err(err) =
                        store.run_migrations(meta.schema_version, CURRENT_SCHEMA_VERSION)
                    {
                        if matches!(err, DbError::UnsupportedSchemaVersion { .. }) {
                            drop(store);
                            backup_db(&db_path)?;
                            continue;
                        }
                        return Err(err);
                    }

                    let meta = Meta {
                        schema_version: CURRENT_SCHEMA_VERSION,
                        app_version: env!("CARGO_PKG_VERSION").to_string(),
                        created_at: meta.created_at,
                    };
                    store.write_meta(&meta)?;
                    return Ok(store);
                }
                Some(_) => return Ok(store),
            }
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn warp_dir(&self) -> PathBuf {
        warp_dir(&self.root_dir)
    }

    pub fn db_path(&self) -> PathBuf {
        db_path(&self.root_dir)
    }

    pub fn read(&self) -> Result<DbReadTxn, DbError> {
        Ok(DbReadTxn {
            txn: self.db.begin_read()?,
        })
    }

    /// Starts a write transaction. Nothing is visible to readers until
    /// [`DbWriteTxn::commit`]; dropping the transaction discards it.
    pub fn write(&self) -> Result<DbWriteTxn, DbError> {
        Ok(DbWriteTxn {
            txn: self.db.begin_write()?,
        })
    }

    pub fn get<T: DeserializeOwned>(&self, table: Table, key: &str) -> Result<Option<T>, DbError> {
        self.read()?.get(table, key)
    }

    pub fn get_cursor(&self, name: &str) -> Result<Option<CursorMeta>, DbError> {
        self.get(Table::Cursors, name)
    }

    pub fn list_cursors(&self) -> Result<Vec<(String, CursorMeta)>, DbError> {
        self.read()?.scan(Table::Cursors, "")
    }

    pub fn list_checkpoints(&self) -> Result<Vec<CheckpointMeta>, DbError> {
        let rows: Vec<(String, CheckpointMeta)> = self.read()?.scan(Table::Checkpoints, "")?;
        Ok(rows.into_iter().map(|(_, meta)| meta).collect())
    }

    /// Raw rows of a table, for inspection tools.
    pub fn dump(&self, table: Table, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, DbError> {
        self.read()?.scan_raw(table, prefix)
    }

    fn initialize_schema(&self) -> Result<(), DbError> {
        let txn = self.db.begin_write()?;
        for table in Table::ALL {
            txn.open_table(table.definition())?;
        }
        txn.commit()?;
        Ok(())
    }

    fn read_meta(&self) -> Result<Option<Meta>, DbError> {
        self.get(Table::Meta, META_KEY)
    }

    fn write_meta(&self, meta: &Meta) -> Result<(), DbError> {
        let mut txn = self.write()?;
        txn.put(Table::Meta, META_KEY, meta)?;
        txn.commit()
    }

    fn run_migrations(&self, from: u32, to: u32) -> Result<(), DbError> {
        let mut version = from;
        while version < to {
            match version {
                0 => {}
                _ => {
                    return Err(DbError::UnsupportedSchemaVersion { version });
                }
            }
            version += 1;
        }
        Ok(())
    }
}

pub struct DbReadTxn {
    txn: ReadTransaction,
}

impl DbReadTxn {
    pub fn get<T: DeserializeOwned>(&self, table: Table, key: &str) -> Result<Option<T>, DbError> {
        let table = self.txn.open_table(table.definition())?;
        match table.get(key)? {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }

    /// All rows whose key starts with `prefix`, in key order.
    pub fn scan<T: DeserializeOwned>(
        &self,
        table: Table,
        prefix: &str,
    ) -> Result<Vec<(String, T)>, DbError> {
        self.scan_raw(table, prefix)?
            .into_iter()
            .map(|(key, value)| Ok((key, decode(&value)?)))
            .collect()
    }

    pub fn scan_raw(&self, table: Table, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, DbError> {
        let table = self.txn.open_table(table.definition())?;
        let range_end = format!("{prefix}~");
        let mut out = Vec::new();
        for entry in table.range(prefix..range_end.as_str())? {
            let (key, value) = entry?;
            out.push((key.value().to_string(), value.value().to_vec()));
        }
        Ok(out)
    }

    /// Rows with keys in `[start, end)`.
    pub fn range<T: DeserializeOwned>(
        &self,
        table: Table,
        start: &str,
        end: &str,
    ) -> Result<Vec<(String, T)>, DbError> {
        let table = self.txn.open_table(table.definition())?;
        let mut out = Vec::new();
        for entry in table.range(start..end)? {
            let (key, value) = entry?;
            out.push((key.value().to_string(), decode(value.value())?));
        }
        Ok(out)
    }
}

pub struct DbWriteTxn {
    txn: WriteTransaction,
}

impl DbWriteTxn {
    pub fn get<T: DeserializeOwned>(&self, table: Table, key: &str) -> Result<Option<T>, DbError> {
        let table = self.txn.open_table(table.definition())?;
        match table.get(key)? {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn put<T: Serialize>(&mut self, table: Table, key: &str, value: &T) -> Result<(), DbError> {
        let data = encode(value)?;
        let mut table = self.txn.open_table(table.definition())?;
        table.insert(key, data.as_slice())?;
        Ok(())
    }

    /// Returns whether the key existed.
    pub fn delete(&mut self, table: Table, key: &str) -> Result<bool, DbError> {
        let mut table = self.txn.open_table(table.definition())?;
        let removed = table.remove(key)?.is_some();
        Ok(removed)
    }

    pub fn scan<T: DeserializeOwned>(
        &self,
        table: Table,
        prefix: &str,
    ) -> Result<Vec<(String, T)>, DbError> {
        let table = self.txn.open_table(table.definition())?;
        let range_end = format!("{prefix}~");
        let mut out = Vec::new();
        for entry in table.range(prefix..range_end.as_str())? {
            let (key, value) = entry?;
            out.push((key.value().to_string(), decode(value.value())?));
        }
        Ok(out)
    }

    pub fn clear(&mut self, table: Table, prefix: &str) -> Result<usize, DbError> {
        let range_end = format!("{prefix}~");
        let mut table = self.txn.open_table(table.definition())?;
        let keys: Vec<String> = table
            .range(prefix..range_end.as_str())?
            .map(|entry| entry.map(|(key, _)| key.value().to_string()))
            .collect::<Result<_, _>>()?;
        for key in &keys {
            table.remove(key.as_str())?;
        }
        Ok(keys.len())
    }

    pub fn get_cursor(&self, name: &str) -> Result<Option<CursorMeta>, DbError> {
        self.get(Table::Cursors, name)
    }

    pub fn put_cursor(&mut self, name: &str, block: u64) -> Result<(), DbError> {
        let meta = CursorMeta {
            block,
            updated_at: now_epoch_secs()?,
        };
        self.put(Table::Cursors, name, &meta)
    }

    pub fn put_checkpoint(&mut self, meta: &CheckpointMeta) -> Result<(), DbError> {
        self.put(Table::Checkpoints, &checkpoint_key(meta.id), meta)
    }

    pub fn delete_checkpoint(&mut self, id: u64) -> Result<bool, DbError> {
        self.delete(Table::Checkpoints, &checkpoint_key(id))
    }

    pub fn commit(self) -> Result<(), DbError> {
        self.txn.commit()?;
        Ok(())
    }
}

/// Read-only view of a node database, safe to open beside a stopped node.
pub struct DbInspector {
    path: PathBuf,
    db: ReadOnlyDatabase,
}

impl DbInspector {
    /// `path` is either the database file or a node's root directory.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let path = resolve_db_path(path);
        match ReadOnlyDatabase::open(&path) {
            Ok(db) => Ok(Self { path, db }),
            Err(redb::DatabaseError::RepairAborted) => Err(DbError::NeedsRepair),
            Err(err) => Err(err.into()),
        }
    }

    /// Copies the database to `<file>.copy`, repairs the copy and opens it. The original
    /// is never written.
    pub fn open_repaired_copy(path: &Path) -> Result<Self, DbError> {
        let source = resolve_db_path(path);
        let copy = copy_path(&source);
        std::fs::copy(&source, &copy)?;
        let mut db = Builder::new().open(&copy)?;
        db.check_integrity()?;
        drop(db);
        Self::open(&copy)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get_raw(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>, DbError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(table.definition())?;
        Ok(table.get(key)?.map(|value| value.value().to_vec()))
    }

    /// Up to `limit` rows in key order, restricted to keys starting with `prefix` if given.
    pub fn scan_raw(
        &self,
        table: Table,
        prefix: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(String, Vec<u8>)>, DbError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(table.definition())?;
        let end = prefix.map(|prefix| format!("{prefix}~"));
        let range = match (prefix, end.as_deref()) {
            (Some(prefix), Some(end)) => table.range(prefix..end)?,
            _ => table.range::<&str>(..)?,
        };
        let mut out = Vec::new();
        for entry in range.take(limit) {
            let (key, value) = entry?;
            out.push((key.value().to_string(), value.value().to_vec()));
        }
        Ok(out)
    }
}

/// The database file for `path`, which may be the file itself or a node's root directory.
#[must_use]
pub fn resolve_db_path(path: &Path) -> PathBuf {
    if path.is_dir() {
        db_path(path)
    } else {
        path.to_path_buf()
    }
}

#[must_use]
pub fn checkpoint_key(id: u64) -> String {
    format!("{id:020}")
}

pub fn now_epoch_secs() -> Result<u64, DbError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(std::io::Error::other)?;
    Ok(now.as_secs())
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, DbError> {
    Ok(rmp_serde::to_vec_named(value)?)
}

pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, DbError> {
    Ok(rmp_serde::from_slice(data)?)
}

fn warp_dir(root_dir: &Path) -> PathBuf {
    root_dir.join(WARP_DIR)
}

fn db_path(root_dir: &Path) -> PathBuf {
    warp_dir(root_dir).join("db.redb")
}

fn copy_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|file| file.to_string_lossy().to_string())
        .filter(|file| !file.is_empty())
        .unwrap_or_else(|| "db.redb".to_string());
    path.with_file_name(format!("{name}.copy"))
}

fn backup_db(db_path: &Path) -> Result<(), DbError> {
    let ts = now_epoch_secs()?;
    let file_name = format!("db.redb.bak.{ts}");
    let backup_path = db_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(file_name);
    std::fs::rename(db_path, backup_path)?;
    Ok(())
}
