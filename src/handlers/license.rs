//! License handler group: manage stored license keys.
//!
//! All operations need the app database, so they fail until the host has
//! bootstrapped the sidecar.

use anyhow::Context;
use chrono::{DateTime, Utc};
use log::info;
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{HandlerContext, HandlerGroup};
use crate::license::{LicenseAuthority, LicenseRecord, NewLicense, StoreHandle};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddLicenseArgs {
    pub email: String,
    pub key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoveLicenseArgs {
    pub id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoveLicenseReply {
    pub removed: bool,
}

/// Reply to `license/status`
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseSummary {
    /// At least one stored license is currently valid
    pub licensed: bool,
    pub valid_until: Option<DateTime<Utc>>,
    pub support_until: Option<DateTime<Utc>>,
    pub max_allowed_app_release: Option<String>,
}

impl LicenseSummary {
    /// Summarize from the valid license that lasts longest
    pub fn from_records(records: &[LicenseRecord], now: DateTime<Utc>) -> Self {
        records
            .iter()
            .filter(|r| r.is_valid_at(now))
            .max_by_key(|r| r.valid_until)
            .map(|best| Self {
                licensed: true,
                valid_until: Some(best.valid_until),
                support_until: Some(best.support_until),
                max_allowed_app_release: best.max_allowed_app_release.clone(),
            })
            .unwrap_or_default()
    }
}

async fn list(store: Arc<StoreHandle>) -> anyhow::Result<Vec<LicenseRecord>> {
    Ok(store.get()?.list().await?)
}

async fn add(
    store: Arc<StoreHandle>,
    authority: Arc<dyn LicenseAuthority>,
    args: AddLicenseArgs,
) -> anyhow::Result<LicenseRecord> {
    let store = store.get()?;
    let status = authority
        .get_license(&args.email, &args.key)
        .await
        .with_context(|| format!("License for {} could not be verified", args.email))?;

    let record = store
        .insert(NewLicense {
            email: args.email,
            key: args.key,
            status,
        })
        .await?;

    info!("Added license {} for {}", record.id, record.email);
    Ok(record)
}

async fn remove(store: Arc<StoreHandle>, args: RemoveLicenseArgs) -> anyhow::Result<RemoveLicenseReply> {
    let removed = store.get()?.delete(args.id).await?;
    if removed {
        info!("Removed license {}", args.id);
    }
    Ok(RemoveLicenseReply { removed })
}

async fn status(store: Arc<StoreHandle>) -> anyhow::Result<LicenseSummary> {
    let records = store.get()?.list().await?;
    Ok(LicenseSummary::from_records(&records, Utc::now()))
}

pub fn group(ctx: &HandlerContext) -> HandlerGroup {
    let list_store = ctx.store.clone();
    let add_store = ctx.store.clone();
    let authority = ctx.authority.clone();
    let remove_store = ctx.store.clone();
    let status_store = ctx.store.clone();

    HandlerGroup::new("license")
        .handler("license/list", move |_: IgnoredAny| list(list_store.clone()))
        .handler("license/add", move |args: AddLicenseArgs| {
            add(add_store.clone(), authority.clone(), args)
        })
        .handler("license/remove", move |args: RemoveLicenseArgs| {
            remove(remove_store.clone(), args)
        })
        .handler("license/status", move |_: IgnoredAny| status(status_store.clone()))
}
