//! Development handler group, registered only in development mode.

use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use super::HandlerGroup;

/// Upper bound for `dev/sleep`
const MAX_SLEEP_MS: u64 = 60_000;

#[derive(Debug, Clone, Deserialize)]
pub struct SleepArgs {
    pub ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FailArgs {
    #[serde(default)]
    pub message: Option<String>,
}

async fn echo(args: Value) -> anyhow::Result<Value> {
    Ok(args)
}

async fn sleep(args: SleepArgs) -> anyhow::Result<u64> {
    let ms = args.ms.min(MAX_SLEEP_MS);
    tokio::time::sleep(Duration::from_millis(ms)).await;
    Ok(ms)
}

async fn fail(args: FailArgs) -> anyhow::Result<()> {
    let message = args.message.unwrap_or_else(|| "Requested failure".to_string());
    Err(anyhow::anyhow!(message).context("dev/fail"))
}

pub fn group() -> HandlerGroup {
    HandlerGroup::new("dev")
        .handler("dev/echo", echo)
        .handler("dev/sleep", sleep)
        .handler("dev/fail", fail)
}
