// Utility sidecar: session-multiplexed request dispatch for a desktop host,
// plus background license revalidation.

// Declare modules
pub mod config;
pub mod control;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod ipc;
pub mod license;
pub mod session;

use log::{error, info};
use std::sync::Arc;
use std::time::Instant;

use crate::config::SidecarConfig;
use crate::control::ControlListener;
use crate::dispatch::Dispatcher;
use crate::error::SidecarResult;
use crate::handlers::{HandlerContext, HandlerRegistry};
use crate::license::{CloudClient, LicenseAuthority, LicenseBootstrap, StoreHandle};
use crate::session::SessionTable;

/// Run the sidecar on this process's stdin/stdout until the host closes it
pub async fn run(config: SidecarConfig) -> SidecarResult<()> {
    let config = Arc::new(config);
    info!(
        "Starting utility sidecar {} (db: {:?}, cloud: {})",
        env!("CARGO_PKG_VERSION"),
        config.app_db_path,
        config.cloud_url
    );

    let authority: Arc<dyn LicenseAuthority> = Arc::new(CloudClient::new(
        config.cloud_base_url()?,
        config.request_timeout(),
    )?);
    let store = Arc::new(StoreHandle::new());
    let sessions = Arc::new(SessionTable::new());

    let ctx = HandlerContext {
        config: config.clone(),
        store: store.clone(),
        authority: authority.clone(),
        sessions: sessions.clone(),
        started_at: Instant::now(),
    };
    let registry = Arc::new(HandlerRegistry::from_groups(handlers::default_groups(&ctx)));
    info!("Operations: {}", registry.names().join(", "));
    let dispatcher = Arc::new(Dispatcher::new(registry, sessions));

    let bootstrap = Arc::new(LicenseBootstrap::new(
        config.app_db_path.clone(),
        store,
        authority,
        config.license_check_interval(),
    ));

    let (parent, host) = ipc::parent_channel();
    let listener = tokio::spawn(ControlListener::new(parent, dispatcher, bootstrap).run());

    ipc::stdio::bridge_stdio(host).await;

    if let Err(e) = listener.await {
        error!("Control listener failed: {}", e);
    }
    info!("Utility sidecar stopped");
    Ok(())
}
