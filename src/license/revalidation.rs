//! License Revalidation
//!
//! Periodically refreshes every stored license against the licensing
//! authority. Records are revalidated concurrently and independently:
//! - success: validity fields overwritten from the authority and saved
//! - rejection (classified failure): license expires immediately and is saved
//! - anything else: record left untouched until the next run

use chrono::Utc;
use futures::future::join_all;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::client::LicenseAuthority;
use super::record::LicenseRecord;
use super::store::{LicenseStore, StoreResult};
use crate::config::MAX_LICENSE_CHECK_INTERVAL_SECS;

/// What happened to one record during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Updated from the authority's response
    Refreshed,
    /// Rejected by the authority and expired
    Expired,
    /// Authority unreachable or erroring; record untouched
    Skipped,
    /// Update computed but could not be persisted
    SaveFailed,
}

/// Totals for one revalidation run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RevalidationSummary {
    pub refreshed: usize,
    pub expired: usize,
    pub skipped: usize,
    pub save_failed: usize,
}

impl RevalidationSummary {
    fn record(&mut self, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Refreshed => self.refreshed += 1,
            RecordOutcome::Expired => self.expired += 1,
            RecordOutcome::Skipped => self.skipped += 1,
            RecordOutcome::SaveFailed => self.save_failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.refreshed + self.expired + self.skipped + self.save_failed
    }
}

/// Runs revalidation passes over the license store
pub struct Revalidator {
    store: Arc<dyn LicenseStore>,
    authority: Arc<dyn LicenseAuthority>,
}

impl Revalidator {
    pub fn new(store: Arc<dyn LicenseStore>, authority: Arc<dyn LicenseAuthority>) -> Self {
        Self { store, authority }
    }

    /// Revalidate every stored license once. Fails only if the licenses
    /// cannot be listed; per-record failures are counted, not returned.
    pub async fn run_once(&self) -> StoreResult<RevalidationSummary> {
        let licenses = self.store.list().await?;
        debug!("Revalidating {} licenses", licenses.len());

        let outcomes = join_all(licenses.into_iter().map(|license| self.revalidate(license))).await;

        let mut summary = RevalidationSummary::default();
        for outcome in outcomes {
            summary.record(outcome);
        }

        info!(
            "License revalidation finished: {} refreshed, {} expired, {} skipped, {} not saved",
            summary.refreshed, summary.expired, summary.skipped, summary.save_failed
        );
        Ok(summary)
    }

    async fn revalidate(&self, mut license: LicenseRecord) -> RecordOutcome {
        match self.authority.get_license(&license.email, &license.key).await {
            Ok(status) => {
                license.apply_status(&status);
                self.persist(&license, RecordOutcome::Refreshed).await
            }
            Err(e) if e.is_classified() => {
                warn!("License {} ({}) rejected, expiring: {}", license.id, license.email, e);
                license.expire_at(Utc::now());
                self.persist(&license, RecordOutcome::Expired).await
            }
            Err(e) => {
                warn!(
                    "Could not revalidate license {} ({}), leaving as is: {}",
                    license.id, license.email, e
                );
                RecordOutcome::Skipped
            }
        }
    }

    async fn persist(&self, license: &LicenseRecord, outcome: RecordOutcome) -> RecordOutcome {
        match self.store.save(license).await {
            Ok(()) => outcome,
            Err(e) => {
                error!("Failed to save license {} ({}): {}", license.id, license.email, e);
                RecordOutcome::SaveFailed
            }
        }
    }

    /// Start periodic revalidation. The first run happens one `period` from
    /// now; runs never overlap. Periods beyond one year are capped.
    pub fn start(self: Arc<Self>, period: Duration) -> RevalidationLoop {
        let max_period = Duration::from_secs(MAX_LICENSE_CHECK_INTERVAL_SECS);
        let period = if period > max_period {
            warn!("License revalidation period {:?} capped to {:?}", period, max_period);
            max_period
        } else {
            period
        };
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once().await {
                            error!("License revalidation run failed: {}", e);
                        }
                    }
                }
            }

            info!("License revalidation stopped");
        });

        info!("License revalidation scheduled every {:?}", period);
        RevalidationLoop {
            stop_tx: Some(stop_tx),
            handle,
        }
    }
}

/// Handle to a running periodic revalidation task
pub struct RevalidationLoop {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl RevalidationLoop {
    /// Ask the loop to stop after any in-progress run
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop and wait for the loop to exit
    pub async fn shutdown(mut self) {
        self.stop();
        if let Err(e) = (&mut self.handle).await {
            error!("License revalidation task failed: {}", e);
        }
    }
}
