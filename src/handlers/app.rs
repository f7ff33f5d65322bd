//! App handler group: liveness, effective configuration and open sessions.

use serde::de::IgnoredAny;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use super::{HandlerContext, HandlerGroup};
use crate::config::SidecarConfig;
use crate::session::{SessionInfo, SessionTable};

/// Reply to `app/ping`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PingReply {
    pub version: &'static str,
    pub uptime_secs: u64,
}

async fn ping(started_at: Instant) -> anyhow::Result<PingReply> {
    Ok(PingReply {
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: started_at.elapsed().as_secs(),
    })
}

/// Reply to `app/config`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigView {
    pub app_db_path: String,
    pub cloud_url: String,
    pub license_check_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub development: bool,
}

impl From<&SidecarConfig> for ConfigView {
    fn from(config: &SidecarConfig) -> Self {
        Self {
            app_db_path: config.app_db_path.display().to_string(),
            cloud_url: config.cloud_url.clone(),
            license_check_interval_secs: config.license_check_interval_secs,
            request_timeout_secs: config.request_timeout_secs,
            development: config.development,
        }
    }
}

async fn config(config: Arc<SidecarConfig>) -> anyhow::Result<ConfigView> {
    Ok(ConfigView::from(config.as_ref()))
}

async fn sessions(sessions: Arc<SessionTable>) -> anyhow::Result<Vec<SessionInfo>> {
    let mut list = sessions.list();
    list.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(list)
}

pub fn group(ctx: &HandlerContext) -> HandlerGroup {
    let started_at = ctx.started_at;
    let cfg = ctx.config.clone();
    let table = ctx.sessions.clone();

    HandlerGroup::new("app")
        .handler("app/ping", move |_: IgnoredAny| ping(started_at))
        .handler("app/config", move |_: IgnoredAny| config(cfg.clone()))
        .handler("app/sessions", move |_: IgnoredAny| sessions(table.clone()))
}
