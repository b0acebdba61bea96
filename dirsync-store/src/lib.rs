//! # dirsync-store
//!
//! Durable record store over a single SQLite key-value table.
//!
//! Every record lives at `user:<surrogate_key>` with its JSON encoding as the
//! value. Listing is a key-ordered range scan over that namespace, read in
//! pages so the connection is never held while waiting on a slow consumer.
//!
//! All SQLite work runs on tokio's blocking pool.

pub mod error;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use dirsync_core::config::StorageConfig;
use dirsync_core::{record_channel, Delivery, Record, RecordSender, RecordStream, SurrogateKey};

pub use error::StoreError;
use error::sqlite_err;

/// Namespace tag for user records.
pub const USER_PREFIX: &str = "user:";
/// Exclusive upper bound of the user namespace (`':' + 1 == ';'`).
const USER_PREFIX_END: &str = "user;";
/// Rows fetched per lock acquisition during `list`.
const LIST_PAGE_SIZE: usize = 128;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
) WITHOUT ROWID;";

type Shared = Arc<Mutex<Option<Connection>>>;

/// Handle to the record store. Clones share one connection.
#[derive(Debug, Clone)]
pub struct Store {
    conn: Shared,
    location: Arc<str>,
}

fn storage_key(key: &SurrogateKey) -> String {
    format!("{USER_PREFIX}{key}")
}

impl Store {
    /// Open the store described by `config`, creating the schema if needed.
    pub fn open(config: &StorageConfig) -> Result<Self, StoreError> {
        if config.in_memory {
            Self::open_in_memory()
        } else {
            Self::open_path(&config.path)
        }
    }

    /// Volatile store; contents vanish on close.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(sqlite_err("open", None))?;
        Self::init(conn, ":memory:".into())
    }

    /// Persistent store at `path`. The parent directory is created if absent.
    pub fn open_path(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| StoreError::Io {
                path: dir.to_path_buf(),
                source: e,
            })?;
        }
        let conn = Connection::open(path).map_err(sqlite_err("open", None))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(sqlite_err("configure", None))?;
        Self::init(conn, path.display().to_string().into())
    }

    fn init(conn: Connection, location: Arc<str>) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)
            .map_err(sqlite_err("migrate", None))?;
        info!(location = %location, "store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            location,
        })
    }

    /// Where the data lives (`:memory:` or the database file path).
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Point lookup. `Ok(None)` when the key is not stored.
    pub async fn get(&self, key: &SurrogateKey) -> Result<Option<Record>, StoreError> {
        let key = storage_key(key);
        self.blocking(move |conn| read_one(conn, &key)).await
    }

    /// Write every record in one transaction. On error nothing is applied.
    ///
    /// Returns the number of records written.
    pub async fn upsert_batch(&self, records: Vec<Record>) -> Result<usize, StoreError> {
        let rows = records
            .iter()
            .map(|r| {
                let key = storage_key(&r.surrogate_key);
                serde_json::to_string(r)
                    .map(|value| (key.clone(), value))
                    .map_err(|source| StoreError::Codec { key, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.blocking(move |conn| {
            if rows.is_empty() {
                return Ok(0);
            }
            let tx = conn
                .transaction()
                .map_err(sqlite_err("upsert_batch", None))?;
            {
                let mut stmt = tx
                    .prepare_cached("INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)")
                    .map_err(sqlite_err("upsert_batch", None))?;
                for (key, value) in &rows {
                    stmt.execute(params![key, value])
                        .map_err(sqlite_err("upsert_batch", Some(key)))?;
                }
            }
            tx.commit().map_err(sqlite_err("upsert_batch", None))?;
            debug!(count = rows.len(), "batch committed");
            Ok(rows.len())
        })
        .await
    }

    /// Delete `key`. Deleting an absent key succeeds.
    pub async fn remove(&self, key: &SurrogateKey) -> Result<(), StoreError> {
        let key = storage_key(key);
        self.blocking(move |conn| {
            conn.execute("DELETE FROM kv WHERE key = ?1", params![key])
                .map_err(sqlite_err("remove", Some(&key)))?;
            Ok(())
        })
        .await
    }

    /// Number of stored records.
    pub async fn count(&self) -> Result<u64, StoreError> {
        self.blocking(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM kv WHERE key >= ?1 AND key < ?2",
                params![USER_PREFIX, USER_PREFIX_END],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n.max(0) as u64)
            .map_err(sqlite_err("count", None))
        })
        .await
    }

    /// Stream every record in key order.
    ///
    /// The producer stops as soon as `cancel` fires (ending the stream with
    /// [`StoreError::Cancelled`]) or the consumer drops the stream.
    pub fn list(&self, cancel: CancellationToken) -> RecordStream<StoreError> {
        let (tx, rx) = record_channel();
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            if let Err(err) = scan(&conn, &tx, &cancel) {
                tx.fail(err);
            }
        });
        rx
    }

    /// Release the connection. Every later call returns [`StoreError::Closed`].
    pub async fn close(&self) -> Result<(), StoreError> {
        let conn = Arc::clone(&self.conn);
        let location = Arc::clone(&self.location);
        tokio::task::spawn_blocking(move || {
            let taken = lock(&conn).take().ok_or(StoreError::Closed)?;
            taken
                .close()
                .map_err(|(_, e)| sqlite_err("close", None)(e))?;
            info!(location = %location, "store closed");
            Ok(())
        })
        .await?
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || with_conn(&conn, f)).await?
    }
}

fn lock(conn: &Shared) -> MutexGuard<'_, Option<Connection>> {
    // A panic while holding the lock cannot leave a half-applied transaction
    // behind: rusqlite rolls back on drop.
    conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn with_conn<T>(
    conn: &Shared,
    f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    let mut guard = lock(conn);
    let conn = guard.as_mut().ok_or(StoreError::Closed)?;
    f(conn)
}

fn read_one(conn: &mut Connection, key: &str) -> Result<Option<Record>, StoreError> {
    let value: Option<String> = conn
        .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
            row.get(0)
        })
        .optional()
        .map_err(sqlite_err("get", Some(key)))?;
    value.map(|v| decode(key, &v)).transpose()
}

fn decode(key: &str, value: &str) -> Result<Record, StoreError> {
    serde_json::from_str(value).map_err(|source| StoreError::Codec {
        key: key.to_string(),
        source,
    })
}

/// Page through the user namespace, pushing each record to `tx`.
fn scan(
    conn: &Shared,
    tx: &RecordSender<StoreError>,
    cancel: &CancellationToken,
) -> Result<(), StoreError> {
    let mut after = USER_PREFIX.to_string();
    let mut inclusive = true;
    loop {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let page = with_conn(conn, |conn| read_page(conn, &after, inclusive))?;
        let exhausted = page.len() < LIST_PAGE_SIZE;
        for (key, value) in page {
            let record = decode(&key, &value)?;
            match tx.blocking_send(record, cancel) {
                Delivery::Delivered => {}
                Delivery::Closed => return Ok(()),
                Delivery::Cancelled => return Err(StoreError::Cancelled),
            }
            after = key;
            inclusive = false;
        }
        if exhausted {
            return Ok(());
        }
    }
}

fn read_page(
    conn: &mut Connection,
    after: &str,
    inclusive: bool,
) -> Result<Vec<(String, String)>, StoreError> {
    let sql = if inclusive {
        "SELECT key, value FROM kv WHERE key >= ?1 AND key < ?2 ORDER BY key LIMIT ?3"
    } else {
        "SELECT key, value FROM kv WHERE key > ?1 AND key < ?2 ORDER BY key LIMIT ?3"
    };
    let mut stmt = conn
        .prepare_cached(sql)
        .map_err(sqlite_err("list", None))?;
    let rows = stmt
        .query_map(
            params![after, USER_PREFIX_END, LIST_PAGE_SIZE as i64],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )
        .map_err(sqlite_err("list", None))?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(sqlite_err("list", None))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
