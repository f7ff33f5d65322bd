//! Handlers Module
//!
//! Operations callers can invoke by name. Each operation declares typed
//! arguments and a typed result; the registry stores them behind the common
//! `Handler` trait so groups can be composed at startup.

pub mod app;
pub mod dev;
pub mod license;
pub mod registry;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

use crate::config::SidecarConfig;
use crate::license::{LicenseAuthority, StoreHandle};
use crate::session::SessionTable;

pub use registry::HandlerRegistry;

/// Failure raised by a handler, reported to the caller as an error reply
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
    /// Diagnostic trace
    pub stack: Option<String>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Arguments did not match the operation's declared shape
    pub fn invalid_args(name: &str, err: serde_json::Error) -> Self {
        Self::new(format!("Invalid arguments for {}: {}", name, err))
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        // Debug output of anyhow carries the cause chain (and a backtrace when enabled)
        Self {
            message: err.to_string(),
            stack: Some(format!("{:?}", err)),
        }
    }
}

/// Result type alias for handlers
pub type HandlerResult<T> = Result<T, HandlerError>;

/// An asynchronous operation invocable by name
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, args: Value) -> HandlerResult<Value>;
}

/// Adapts a typed async function into a `Handler`
struct FnHandler<F, A, R> {
    name: String,
    f: F,
    _types: PhantomData<fn(A) -> R>,
}

#[async_trait]
impl<F, Fut, A, R> Handler for FnHandler<F, A, R>
where
    F: Fn(A) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<R>> + Send,
    A: DeserializeOwned + Send,
    R: Serialize,
{
    async fn call(&self, args: Value) -> HandlerResult<Value> {
        let args: A =
            serde_json::from_value(args).map_err(|e| HandlerError::invalid_args(&self.name, e))?;
        let result = (self.f)(args).await?;
        serde_json::to_value(result).map_err(|e| {
            HandlerError::new(format!("Failed to serialize result of {}: {}", self.name, e))
        })
    }
}

/// A named set of operations registered together
pub struct HandlerGroup {
    pub name: &'static str,
    handlers: Vec<(String, Arc<dyn Handler>)>,
}

impl HandlerGroup {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handlers: Vec::new(),
        }
    }

    /// Register a typed async function under `name`
    pub fn handler<F, Fut, A, R>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        A: DeserializeOwned + Send + 'static,
        R: Serialize + 'static,
    {
        let name = name.into();
        let handler = FnHandler {
            name: name.clone(),
            f,
            _types: PhantomData,
        };
        self.with(name, Arc::new(handler))
    }

    /// Register an existing handler object under `name`
    pub fn with(mut self, name: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.handlers.push((name.into(), handler));
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub(crate) fn into_entries(self) -> Vec<(String, Arc<dyn Handler>)> {
        self.handlers
    }
}

/// Shared resources available to the built-in handler groups
#[derive(Clone)]
pub struct HandlerContext {
    pub config: Arc<SidecarConfig>,
    pub store: Arc<StoreHandle>,
    pub authority: Arc<dyn LicenseAuthority>,
    pub sessions: Arc<SessionTable>,
    pub started_at: Instant,
}

/// Built-in handler groups, in merge order
pub fn default_groups(ctx: &HandlerContext) -> Vec<HandlerGroup> {
    let mut groups = vec![app::group(ctx), license::group(ctx)];
    if ctx.config.development {
        groups.push(dev::group());
    }
    groups
}
