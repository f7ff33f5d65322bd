//! Request Dispatcher
//!
//! Reads request envelopes from session channels and runs each one in its
//! own task, so a slow handler never holds up another request. Every
//! well-formed request gets exactly one reply (or error reply), routed to
//! the session named by its `sId` argument.

use futures::FutureExt;
use log::{debug, error, warn};
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::handlers::HandlerRegistry;
use crate::ipc::{PortReceiver, ReplyEnvelope, RequestEnvelope};
use crate::session::{DeliveryOutcome, SessionTable};

/// Handlers running longer than this are reported
const SLOW_HANDLER_THRESHOLD: Duration = Duration::from_secs(10);

/// Routes requests to handlers and replies back to sessions
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    sessions: Arc<SessionTable>,
}

impl Dispatcher {
    pub fn new(registry: Arc<HandlerRegistry>, sessions: Arc<SessionTable>) -> Self {
        Self { registry, sessions }
    }

    pub fn sessions(&self) -> &Arc<SessionTable> {
        &self.sessions
    }

    /// Serve one session's inbound channel until the session is closed or
    /// the caller hangs up. Requests still running keep going; their
    /// replies are dropped if the session is gone by then.
    pub async fn serve_session(
        self: Arc<Self>,
        session_id: String,
        mut inbound: PortReceiver,
        mut close_rx: oneshot::Receiver<()>,
    ) {
        debug!("Serving session {}", session_id);

        loop {
            tokio::select! {
                biased;
                _ = &mut close_rx => {
                    debug!("Session {} closed, stopping request loop", session_id);
                    break;
                }
                message = inbound.recv() => match message {
                    Some(raw) => {
                        self.spawn_request(&session_id, raw);
                    }
                    None => {
                        debug!("Session {} channel ended", session_id);
                        break;
                    }
                }
            }
        }
    }

    /// Run one inbound message in its own task. The task yields the
    /// delivery outcome, or `None` if nothing could be replied to.
    pub fn spawn_request(
        self: &Arc<Self>,
        origin: &str,
        raw: Value,
    ) -> JoinHandle<Option<DeliveryOutcome>> {
        let dispatcher = Arc::clone(self);
        let origin = origin.to_string();
        tokio::spawn(async move { dispatcher.dispatch(&origin, raw).await })
    }

    async fn dispatch(&self, origin: &str, raw: Value) -> Option<DeliveryOutcome> {
        let id = raw.get("id").cloned();
        let request: RequestEnvelope = match serde_json::from_value(raw) {
            Ok(request) => request,
            Err(e) => {
                warn!("Malformed request on session {}: {}", origin, e);
                let reply = ReplyEnvelope::failure(id?, format!("Malformed request: {}", e), None);
                return Some(self.deliver(origin, &reply));
            }
        };

        let target = request
            .session_token()
            .unwrap_or(origin)
            .to_string();
        let reply = self.handle_request(request).await;
        Some(self.deliver(&target, &reply))
    }

    /// Invoke the named handler and build its reply. Never fails: handler
    /// errors and panics become error replies.
    pub async fn handle_request(&self, request: RequestEnvelope) -> ReplyEnvelope {
        let RequestEnvelope { id, name, args } = request;
        debug!("Request {} received: {}", id, name);

        let Some(handler) = self.registry.get(&name) else {
            warn!("Invalid handler name: {}", name);
            return ReplyEnvelope::failure(id, format!("Invalid handler name: {}", name), None);
        };

        let start = Instant::now();
        let result = AssertUnwindSafe(handler.call(args)).catch_unwind().await;
        let elapsed = start.elapsed();
        if elapsed >= SLOW_HANDLER_THRESHOLD {
            warn!("Handler {} took {:?} for request {}", name, elapsed, id);
        }

        match result {
            Ok(Ok(data)) => {
                debug!("Request {} ({}) succeeded in {:?}", id, name, elapsed);
                ReplyEnvelope::success(id, data)
            }
            Ok(Err(e)) => {
                debug!("Request {} ({}) failed: {}", id, name, e);
                ReplyEnvelope::failure(id, e.message, e.stack)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Handler {} panicked on request {}: {}", name, id, message);
                ReplyEnvelope::failure(id, format!("Handler {} panicked: {}", name, message), None)
            }
        }
    }

    fn deliver(&self, session_id: &str, reply: &ReplyEnvelope) -> DeliveryOutcome {
        let outcome = self.sessions.post(session_id, reply);
        if outcome.is_delivered() {
            debug!("Reply {} delivered to session {}", reply.id, session_id);
        } else {
            warn!(
                "Reply {} for session {} dropped: {}",
                reply.id, session_id, outcome
            );
        }
        outcome
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::HandlerGroup;
    use crate::ipc::MessagePort;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct DoThingArgs {
        x: i64,
    }

    async fn do_thing(args: DoThingArgs) -> anyhow::Result<Value> {
        Ok(json!({"y": args.x + 1}))
    }

    async fn slow(_: Value) -> anyhow::Result<&'static str> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok("slow")
    }

    async fn fast(_: Value) -> anyhow::Result<&'static str> {
        Ok("fast")
    }

    async fn fails(_: Value) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("connection refused").context("query failed"))
    }

    async fn explode(_: Value) -> anyhow::Result<()> {
        panic!("handler bug")
    }

    fn dispatcher() -> Arc<Dispatcher> {
        let group = HandlerGroup::new("test")
            .handler("doThing", do_thing)
            .handler("slow", slow)
            .handler("fast", fast)
            .handler("fails", fails)
            .handler("explode", explode);
        let registry = Arc::new(HandlerRegistry::from_groups(vec![group]));
        Arc::new(Dispatcher::new(registry, Arc::new(SessionTable::new())))
    }

    /// Open a session and return the caller's end of its channel
    fn open_session(dispatcher: &Arc<Dispatcher>, session_id: &str) -> MessagePort {
        let (caller, sidecar) = MessagePort::pair();
        let (outbound, inbound) = sidecar.split();
        dispatcher.sessions().create(session_id);
        let close_rx = dispatcher
            .sessions()
            .attach_channel(session_id, outbound)
            .unwrap();
        tokio::spawn(dispatcher.clone().serve_session(session_id.to_string(), inbound, close_rx));
        caller
    }

    async fn next(port: &mut MessagePort) -> Value {
        tokio::time::timeout(Duration::from_secs(5), port.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_reply_and_error_replies() {
        let dispatcher = dispatcher();
        let mut caller = open_session(&dispatcher, "s1");

        caller
            .post(&json!({"id": "r1", "name": "doThing", "args": {"sId": "s1", "x": 1}}))
            .unwrap();
        assert_eq!(next(&mut caller).await, json!({"id": "r1", "type": "reply", "data": {"y": 2}}));

        caller
            .post(&json!({"id": "r2", "name": "fails", "args": {"sId": "s1"}}))
            .unwrap();
        let reply = next(&mut caller).await;
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["error"], "query failed");
        assert!(reply["stack"].as_str().unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_unknown_handler_name() {
        let dispatcher = dispatcher();
        let mut caller = open_session(&dispatcher, "s1");

        caller
            .post(&json!({"id": 9, "name": "nope", "args": {"sId": "s1"}}))
            .unwrap();
        assert_eq!(
            next(&mut caller).await,
            json!({"id": 9, "type": "error", "error": "Invalid handler name: nope"})
        );
    }

    #[tokio::test]
    async fn test_bad_arguments_and_malformed_requests() {
        let dispatcher = dispatcher();
        let mut caller = open_session(&dispatcher, "s1");

        caller
            .post(&json!({"id": 1, "name": "doThing", "args": {"x": "one"}}))
            .unwrap();
        let reply = next(&mut caller).await;
        assert!(reply["error"]
            .as_str()
            .unwrap()
            .starts_with("Invalid arguments for doThing:"));

        caller.post(&json!({"id": 2, "args": {}})).unwrap();
        let reply = next(&mut caller).await;
        assert_eq!(reply["id"], 2);
        assert!(reply["error"].as_str().unwrap().starts_with("Malformed request:"));
    }

    #[tokio::test]
    async fn test_malformed_without_id_gets_no_reply() {
        let dispatcher = dispatcher();
        let outcome = dispatcher
            .spawn_request("s1", json!("not an envelope"))
            .await
            .unwrap();
        assert_eq!(outcome, None);
    }

    #[tokio::test]
    async fn test_panicking_handler_becomes_error_reply() {
        let dispatcher = dispatcher();
        let mut caller = open_session(&dispatcher, "s1");

        caller
            .post(&json!({"id": "p", "name": "explode", "args": {"sId": "s1"}}))
            .unwrap();
        let reply = next(&mut caller).await;
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["error"], "Handler explode panicked: handler bug");

        // The session keeps serving afterwards
        caller
            .post(&json!({"id": "q", "name": "fast", "args": {"sId": "s1"}}))
            .unwrap();
        assert_eq!(next(&mut caller).await["data"], "fast");
    }

    #[tokio::test]
    async fn test_slow_handler_does_not_block() {
        let dispatcher = dispatcher();
        let mut first = open_session(&dispatcher, "s1");
        let mut second = open_session(&dispatcher, "s2");

        first
            .post(&json!({"id": "slow", "name": "slow", "args": {"sId": "s1"}}))
            .unwrap();
        first
            .post(&json!({"id": "fast-1", "name": "fast", "args": {"sId": "s1"}}))
            .unwrap();
        second
            .post(&json!({"id": "fast-2", "name": "fast", "args": {"sId": "s2"}}))
            .unwrap();

        let quick = Duration::from_millis(150);
        let other = tokio::time::timeout(quick, second.recv()).await.unwrap().unwrap();
        assert_eq!(other["id"], "fast-2");

        let same = tokio::time::timeout(quick, first.recv()).await.unwrap().unwrap();
        assert_eq!(same["id"], "fast-1");

        assert_eq!(next(&mut first).await["id"], "slow");
    }

    #[tokio::test]
    async fn test_reply_routed_by_session_token() {
        let dispatcher = dispatcher();
        let mut first = open_session(&dispatcher, "s1");
        let mut second = open_session(&dispatcher, "s2");

        first
            .post(&json!({"id": "x", "name": "fast", "args": {"sId": "s2"}}))
            .unwrap();
        assert_eq!(next(&mut second).await["id"], "x");

        // Without a token the reply goes back where the request came from
        first.post(&json!({"id": "y", "name": "fast"})).unwrap();
        assert_eq!(next(&mut first).await["id"], "y");
    }

    #[tokio::test]
    async fn test_reply_to_destroyed_session_is_dropped() {
        let dispatcher = dispatcher();
        let outcome = dispatcher
            .spawn_request("s1", json!({"id": 1, "name": "fast", "args": {"sId": "gone"}}))
            .await
            .unwrap();
        assert_eq!(outcome, Some(DeliveryOutcome::SessionNotFound));
    }

    #[tokio::test]
    async fn test_close_stops_session_loop() {
        let dispatcher = dispatcher();
        let mut caller = open_session(&dispatcher, "s1");

        assert!(dispatcher.sessions().destroy("s1"));
        let end = tokio::time::timeout(Duration::from_secs(5), caller.recv())
            .await
            .unwrap();
        assert!(end.is_none());
    }
}
