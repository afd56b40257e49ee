pub mod chrome;
#[cfg(test)]
pub mod fake;

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::debug;

use crate::error::SessionError;

pub use chrome::ChromeSession;

/// Exclusive handle on one interactive browser tab.
///
/// Every call may block until the page answers; implementations must not
/// hang forever. `evaluate` returns the script's value as text: strings are
/// returned verbatim, other JSON values serialized, `null`/`undefined` as `None`.
#[async_trait]
pub trait PageSession: Send {
    async fn navigate(&mut self, url: &str) -> Result<bool, SessionError>;

    async fn current_url(&mut self) -> Result<Option<String>, SessionError>;

    async fn evaluate(&mut self, script: &str) -> Result<Option<String>, SessionError>;
}

/// Bounded polling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Wait {
    pub timeout_ms: u64,
    pub interval_ms: u64,
}

impl Wait {
    #[cfg(test)]
    pub const fn new(timeout_ms: u64, interval_ms: u64) -> Self {
        Wait { timeout_ms, interval_ms }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

/// Poll `predicate` (a script evaluating to a boolean) until it holds or the
/// timeout elapses. Transient evaluation errors count as "not ready yet".
pub async fn wait_until<S: PageSession + ?Sized>(
    session: &mut S,
    predicate: &str,
    wait: Wait,
) -> Result<bool, SessionError> {
    let start = Instant::now();
    loop {
        match session.evaluate(predicate).await {
            Ok(value) if is_truthy(value.as_deref()) => return Ok(true),
            Ok(_) => {}
            Err(SessionError::Closed) => return Err(SessionError::Closed),
            Err(e) => debug!("readiness check failed, retrying: {}", e),
        }
        if start.elapsed() >= wait.timeout() {
            return Ok(false);
        }
        tokio::time::sleep(wait.interval()).await;
    }
}

fn is_truthy(value: Option<&str>) -> bool {
    matches!(value.map(str::trim), Some("true"))
}
