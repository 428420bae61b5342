use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod transfers;

pub use transfers::{
    BLOCK_INDEX_TABLE, PARTY_INDEX_TABLE, StoredTransfer, TRANSFER_KEYS_TABLE, TRANSFERS_TABLE,
    TransferPage, TransferRecord, UpsertSummary, address_key,
};

pub const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

const META_KEY: &str = "meta";
const LEDGER_DIR: &str = "ledger";
const DB_FILE: &str = "db.redb";

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
    #[error("transfer key points at missing row {id}")]
    MissingTransfer { id: u64 },
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

impl DbStore {
    pub fn open(config: DbConfig) -> Result<Self, DbError> {
        let root_dir = config.root_dir;
        std::fs::create_dir_all(ledger_dir(&root_dir))?;
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

    pub fn db_path(&self) -> PathBuf {
        db_path(&self.root_dir)
    }

    fn initialize_schema(&self) -> Result<(), DbError> {
        let txn = self.db.begin_write()?;
        txn.open_table(META_TABLE)?;
        txn.open_table(TRANSFERS_TABLE)?;
        txn.open_table(TRANSFER_KEYS_TABLE)?;
        txn.open_table(PARTY_INDEX_TABLE)?;
        txn.open_table(BLOCK_INDEX_TABLE)?;
        txn.commit()?;
        Ok(())
    }

    fn read_meta(&self) -> Result<Option<Meta>, DbError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(META_TABLE)?;
        match table.get(META_KEY)? {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }

    fn write_meta(&self, meta: &Meta) -> Result<(), DbError> {
        let data = encode(meta)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(META_TABLE)?;
            table.insert(META_KEY, data.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// No migrations exist yet, so every older schema is rebuilt from scratch.
    fn run_migrations(&self, from: u32, to: u32) -> Result<(), DbError> {
        if from < to {
            return Err(DbError::UnsupportedSchemaVersion { version: from });
        }
        Ok(())
    }
}

/// Resolves either a db root directory or the database file itself.
pub fn resolve_db_path(path: &Path) -> PathBuf {
    if path.is_dir() {
        db_path(path)
    } else {
        path.to_path_buf()
    }
}

fn ledger_dir(root_dir: &Path) -> PathBuf {
    root_dir.join(LEDGER_DIR)
}

fn db_path(root_dir: &Path) -> PathBuf {
    ledger_dir(root_dir).join(DB_FILE)
}

fn backup_db(db_path: &Path) -> Result<(), DbError> {
    let ts = now_epoch_secs()?;
    let file_name = format!("{DB_FILE}.bak.{ts}");
    let backup_path = db_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(file_name);
    std::fs::rename(db_path, backup_path)?;
    Ok(())
}

pub(crate) fn now_epoch_secs() -> Result<u64, DbError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(std::io::Error::other)?;
    Ok(now.as_secs())
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, DbError> {
    Ok(rmp_serde::to_vec_named(value)?)
}

pub(crate) fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, DbError> {
    Ok(rmp_serde::from_slice(data)?)
}

/// Throwaway stores for tests. Each one lives in its own directory under the
/// system temp dir, removed again when the guard is dropped.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use super::{DbConfig, DbError, DbStore};
    use std::ops::Deref;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    static NEXT: AtomicU64 = AtomicU64::new(0);

    /// A unique directory that is deleted on drop.
    #[derive(Debug)]
    pub struct TempDir {
        path: PathBuf,
    }

    impl TempDir {
        pub fn new() -> Self {
            let pid = std::process::id();
            let seq = NEXT.fetch_add(1, Ordering::Relaxed);
            let nanos = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|duration| duration.as_nanos())
                .unwrap_or(0);
            let path = std::env::temp_dir()
                .join("transfer-ledger-tests")
                .join(format!("db-{pid}-{nanos}-{seq}"));
            Self { path }
        }

        pub fn path(&self) -> &Path {
            &self.path
        }
    }

    impl Default for TempDir {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }

    /// An open store inside a [`TempDir`].
    #[derive(Debug)]
    pub struct TempStore {
        // Field order matters: the store closes before the directory goes.
        store: Arc<DbStore>,
        dir: TempDir,
    }

    impl TempStore {
        pub fn open() -> Result<Self, DbError> {
            let dir = TempDir::new();
            let store = DbStore::open(DbConfig {
                root_dir: dir.path().to_path_buf(),
            })?;
            Ok(Self {
                store: Arc::new(store),
                dir,
            })
        }

        /// Shared handle for services that keep the store.
        pub fn handle(&self) -> Arc<DbStore> {
            self.store.clone()
        }

        pub fn root(&self) -> &Path {
            self.dir.path()
        }
    }

    impl Deref for TempStore {
        type Target = DbStore;

        fn deref(&self) -> &DbStore {
            &self.store
        }
    }
}
