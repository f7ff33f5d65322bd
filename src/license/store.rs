//! License Store
//!
//! Durable storage for license records. The SQLite implementation keeps a
//! single connection behind a mutex and runs every statement on the blocking
//! pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use super::record::{LicenseRecord, NewLicense};

/// License store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("License not found: {0}")]
    NotFound(i64),

    #[error("License store is not connected")]
    NotConnected,

    #[error("Store task failed: {0}")]
    TaskFailed(String),
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence contract for license records
#[async_trait]
pub trait LicenseStore: Send + Sync {
    /// All stored licenses
    async fn list(&self) -> StoreResult<Vec<LicenseRecord>>;

    /// Persist the validity fields of an existing record
    async fn save(&self, record: &LicenseRecord) -> StoreResult<()>;

    /// Store a new license
    async fn insert(&self, license: NewLicense) -> StoreResult<LicenseRecord>;

    /// Remove a license; returns whether it existed
    async fn delete(&self, id: i64) -> StoreResult<bool>;
}

/// SQLite-backed license store
pub struct SqliteLicenseStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLicenseStore {
    /// Open (or create) the app database at `path`
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        Self::init_database(&conn)?;
        info!("Opened license store at {:?}", path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open a throwaway in-memory database
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_database(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Initialize the license table
    pub fn init_database(conn: &Connection) -> Result<(), rusqlite::Error> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS license_keys (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL,
                license_key TEXT NOT NULL,
                valid_until TEXT NOT NULL,
                support_until TEXT NOT NULL,
                max_allowed_app_release TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_license_keys_email ON license_keys(email)",
            [],
        )?;

        debug!("License table initialized");
        Ok(())
    }

    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::TaskFailed(e.to_string()))?
    }
}

fn parse_timestamp(idx: usize, value: String) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn record_from_row(row: &Row<'_>) -> Result<LicenseRecord, rusqlite::Error> {
    Ok(LicenseRecord {
        id: row.get(0)?,
        email: row.get(1)?,
        key: row.get(2)?,
        valid_until: parse_timestamp(3, row.get(3)?)?,
        support_until: parse_timestamp(4, row.get(4)?)?,
        max_allowed_app_release: row.get(5)?,
        created_at: parse_timestamp(6, row.get(6)?)?,
        updated_at: parse_timestamp(7, row.get(7)?)?,
    })
}

#[async_trait]
impl LicenseStore for SqliteLicenseStore {
    async fn list(&self) -> StoreResult<Vec<LicenseRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, email, license_key, valid_until, support_until,
                 max_allowed_app_release, created_at, updated_at
                 FROM license_keys ORDER BY id",
            )?;
            let records = stmt
                .query_map([], record_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        })
        .await
    }

    async fn save(&self, record: &LicenseRecord) -> StoreResult<()> {
        let record = record.clone();
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE license_keys
                 SET valid_until = ?1, support_until = ?2, max_allowed_app_release = ?3, updated_at = ?4
                 WHERE id = ?5",
                params![
                    record.valid_until.to_rfc3339(),
                    record.support_until.to_rfc3339(),
                    record.max_allowed_app_release,
                    Utc::now().to_rfc3339(),
                    record.id
                ],
            )?;

            if updated == 0 {
                return Err(StoreError::NotFound(record.id));
            }
            debug!("Saved license {} ({})", record.id, record.email);
            Ok(())
        })
        .await
    }

    async fn insert(&self, license: NewLicense) -> StoreResult<LicenseRecord> {
        self.with_conn(move |conn| {
            let now = Utc::now();
            conn.execute(
                "INSERT INTO license_keys (email, license_key, valid_until, support_until,
                 max_allowed_app_release, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    license.email,
                    license.key,
                    license.status.valid_until.to_rfc3339(),
                    license.status.support_until.to_rfc3339(),
                    license.status.max_allowed_app_release,
                    now.to_rfc3339()
                ],
            )?;

            let record = LicenseRecord {
                id: conn.last_insert_rowid(),
                email: license.email,
                key: license.key,
                valid_until: license.status.valid_until,
                support_until: license.status.support_until,
                max_allowed_app_release: license.status.max_allowed_app_release,
                created_at: now,
                updated_at: now,
            };
            info!("Stored license {} ({})", record.id, record.email);
            Ok(record)
        })
        .await
    }

    async fn delete(&self, id: i64) -> StoreResult<bool> {
        self.with_conn(move |conn| {
            let deleted = conn.execute("DELETE FROM license_keys WHERE id = ?1", params![id])?;
            Ok(deleted > 0)
        })
        .await
    }
}

/// Slot for the store, filled in once bootstrap has opened it
pub struct StoreHandle {
    store: RwLock<Option<Arc<dyn LicenseStore>>>,
}

impl StoreHandle {
    pub fn new() -> Self {
        Self {
            store: RwLock::new(None),
        }
    }

    /// Install the connected store, replacing any previous one
    pub fn install(&self, store: Arc<dyn LicenseStore>) {
        *self.store.write() = Some(store);
    }

    /// The connected store, or `NotConnected` before bootstrap
    pub fn get(&self) -> StoreResult<Arc<dyn LicenseStore>> {
        self.store.read().clone().ok_or(StoreError::NotConnected)
    }

    pub fn is_connected(&self) -> bool {
        self.store.read().is_some()
    }
}

impl Default for StoreHandle {
    fn default() -> Self {
        Self::new()
    }
}
