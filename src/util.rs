//! Shared utility functions.

use std::time::Duration;

use serde_json::Value;
use tokio::time::timeout;

use crate::agent::{AgentOutput, Dispatch};
use crate::error::AgentError;
use crate::orchestration::journal::Journal;

/// Run one agent call, failing with [`AgentError::Timeout`] once `duration` elapses.
pub async fn dispatch_with_timeout(
    agent: &dyn Dispatch,
    input: Value,
    journal: &Journal,
    duration: Duration,
) -> Result<AgentOutput, AgentError> {
    match timeout(duration, agent.execute(input, journal)).await {
        Ok(result) => result,
        Err(_) => Err(AgentError::Timeout {
            agent: agent.name().to_string(),
            timeout: duration,
        }),
    }
}
