//! Sidecar Bootstrap
//!
//! One-time initialization triggered by the host: connect the app database,
//! run an initial license revalidation pass and schedule the periodic one.

use anyhow::Context;
use async_trait::async_trait;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::client::LicenseAuthority;
use super::revalidation::{RevalidationLoop, Revalidator};
use super::store::{LicenseStore, SqliteLicenseStore, StoreHandle};

/// Work performed when the host asks the sidecar to initialize
#[async_trait]
pub trait Bootstrap: Send + Sync {
    /// Initialize shared resources and start background revalidation
    async fn bootstrap(&self) -> anyhow::Result<RevalidationLoop>;
}

/// Bootstrap backed by the SQLite app database
pub struct LicenseBootstrap {
    db_path: PathBuf,
    store: Arc<StoreHandle>,
    authority: Arc<dyn LicenseAuthority>,
    interval: Duration,
}

impl LicenseBootstrap {
    pub fn new(
        db_path: impl Into<PathBuf>,
        store: Arc<StoreHandle>,
        authority: Arc<dyn LicenseAuthority>,
        interval: Duration,
    ) -> Self {
        Self {
            db_path: db_path.into(),
            store,
            authority,
            interval,
        }
    }
}

#[async_trait]
impl Bootstrap for LicenseBootstrap {
    async fn bootstrap(&self) -> anyhow::Result<RevalidationLoop> {
        let path = self.db_path.clone();
        let store = tokio::task::spawn_blocking(move || SqliteLicenseStore::open(&path))
            .await
            .context("License store open task failed")?
            .with_context(|| format!("Failed to open license store at {:?}", self.db_path))?;

        let store: Arc<dyn LicenseStore> = Arc::new(store);
        self.store.install(store.clone());

        let revalidator = Arc::new(Revalidator::new(store, self.authority.clone()));
        revalidator
            .run_once()
            .await
            .context("Initial license revalidation failed")?;

        info!("Bootstrap complete");
        Ok(revalidator.start(self.interval))
    }
}
