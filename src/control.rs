//! Control-Channel Listener
//!
//! Handles the host's control messages:
//! - `init` with a transferred port opens a session
//! - `init` without a port bootstraps the sidecar, then signals `ready`
//! - `close` destroys a session
//!
//! Bootstrap runs in the background so sessions can be opened meanwhile.
//! When the host side of the control channel closes, every session is
//! destroyed and revalidation stops.

use log::{debug, error, info, warn};
use serde::Deserialize;
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};

use crate::dispatch::Dispatcher;
use crate::ipc::{ControlMessage, HostEvent, HostSignal, MessagePort, ParentPort};
use crate::license::{Bootstrap, RevalidationLoop};
use crate::session::SessionTable;

type BootstrapOutcome = Result<anyhow::Result<RevalidationLoop>, JoinError>;

/// Initialization state of the sidecar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Uninitialized,
    Bootstrapping,
    Bootstrapped,
}

enum Step {
    Event(HostEvent),
    BootstrapFinished(BootstrapOutcome),
    Closed,
}

/// Listener for the host control channel
pub struct ControlListener {
    parent: ParentPort,
    sessions: Arc<SessionTable>,
    dispatcher: Arc<Dispatcher>,
    bootstrap: Arc<dyn Bootstrap>,
    state: ListenerState,
    pending: Option<JoinHandle<anyhow::Result<RevalidationLoop>>>,
    revalidation: Option<RevalidationLoop>,
}

impl ControlListener {
    pub fn new(parent: ParentPort, dispatcher: Arc<Dispatcher>, bootstrap: Arc<dyn Bootstrap>) -> Self {
        Self {
            parent,
            sessions: dispatcher.sessions().clone(),
            dispatcher,
            bootstrap,
            state: ListenerState::Uninitialized,
            pending: None,
            revalidation: None,
        }
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    /// Process control events until the host closes the channel
    pub async fn run(mut self) {
        info!("Control listener started");

        loop {
            let step = tokio::select! {
                event = self.parent.events.recv() => match event {
                    Some(event) => Step::Event(event),
                    None => Step::Closed,
                },
                outcome = join_pending(&mut self.pending) => Step::BootstrapFinished(outcome),
            };

            match step {
                Step::Event(event) => self.handle_event(event),
                Step::BootstrapFinished(outcome) => self.finish_bootstrap(outcome),
                Step::Closed => break,
            }
        }

        self.shutdown().await;
    }

    fn handle_event(&mut self, event: HostEvent) {
        let HostEvent { data, port } = event;

        let message = match ControlMessage::deserialize(&data) {
            Ok(message) => message,
            Err(e) => {
                warn!("Unrecognized control message {}: {}", data, e);
                return;
            }
        };

        match (message, port) {
            (ControlMessage::Init { session_id: Some(session_id) }, Some(port)) => {
                self.open_session(session_id, port);
            }
            (ControlMessage::Init { session_id: None }, Some(_)) => {
                warn!("Received session port without a session id, dropping it");
            }
            (ControlMessage::Init { .. }, None) => self.start_bootstrap(),
            (ControlMessage::Close { session_id }, _) => {
                debug!("Close requested for session {}", session_id);
                self.sessions.destroy(&session_id);
            }
            (ControlMessage::Unrecognized, _) => {
                warn!("Unrecognized control message type: {}", data);
            }
        }
    }

    fn open_session(&self, session_id: String, port: MessagePort) {
        info!("Received port for session {}", session_id);
        let (outbound, inbound) = port.split();

        self.sessions.create(&session_id);
        match self.sessions.attach_channel(&session_id, outbound) {
            Ok(close_rx) => {
                tokio::spawn(
                    self.dispatcher
                        .clone()
                        .serve_session(session_id, inbound, close_rx),
                );
            }
            Err(e) => error!("Failed to attach channel: {}", e),
        }
    }

    fn start_bootstrap(&mut self) {
        match self.state {
            ListenerState::Uninitialized => {
                info!("Bootstrapping sidecar");
                self.state = ListenerState::Bootstrapping;
                let bootstrap = self.bootstrap.clone();
                self.pending = Some(tokio::spawn(async move { bootstrap.bootstrap().await }));
            }
            ListenerState::Bootstrapping => {
                warn!("Bootstrap already in progress, ignoring init");
            }
            ListenerState::Bootstrapped => {
                warn!("Sidecar already bootstrapped, signalling ready again");
                self.signal_ready();
            }
        }
    }

    fn finish_bootstrap(&mut self, outcome: BootstrapOutcome) {
        match outcome {
            Ok(Ok(revalidation)) => {
                self.revalidation = Some(revalidation);
                self.state = ListenerState::Bootstrapped;
                info!("Sidecar ready");
                self.signal_ready();
            }
            Ok(Err(e)) => {
                error!("Bootstrap failed: {:#}", e);
                self.state = ListenerState::Uninitialized;
            }
            Err(e) => {
                error!("Bootstrap task failed: {}", e);
                self.state = ListenerState::Uninitialized;
            }
        }
    }

    fn signal_ready(&self) {
        if let Err(e) = self.parent.outbound.post(&HostSignal::Ready) {
            warn!("Failed to signal ready to host: {}", e);
        }
    }

    async fn shutdown(mut self) {
        info!("Control channel closed, shutting down");

        if let Some(pending) = self.pending.take() {
            pending.abort();
        }

        self.sessions.destroy_all();

        if let Some(revalidation) = self.revalidation.take() {
            revalidation.shutdown().await;
        }
    }
}

/// Await the in-flight task, or never resolve when there is none
async fn join_pending<T>(pending: &mut Option<JoinHandle<T>>) -> Result<T, JoinError> {
    match pending.as_mut() {
        Some(handle) => {
            let result = handle.await;
            *pending = None;
            result
        }
        None => std::future::pending().await,
    }
}
