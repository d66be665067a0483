//! Exponential-backoff connect retry for the ComfyUI WebSocket.
//!
//! Only the handshake is retried: [`connect_with_backoff`] keeps trying with
//! increasing delays until a connection succeeds, the attempt budget is
//! spent, or the [`CancellationToken`] is triggered.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::client::{ComfyUIClient, ComfyUIClientError, ComfyUIConnection};

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Total number of handshake attempts (at least one is always made).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            max_attempts: 3,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Connect to ComfyUI, retrying failed handshakes with exponential backoff.
///
/// Returns the last handshake error once `max_attempts` is exhausted, or a
/// connection error immediately if `cancel` fires.
pub async fn connect_with_backoff(
    client: &ComfyUIClient,
    client_id: &str,
    connect_timeout: Duration,
    config: &ReconnectConfig,
    cancel: &CancellationToken,
) -> Result<ComfyUIConnection, ComfyUIClientError> {
    let cancelled = || ComfyUIClientError::Connection("Connect cancelled".into());
    let max_attempts = config.max_attempts.max(1);
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(cancelled()),
            result = client.connect(client_id, connect_timeout) => result,
        };

        let err = match result {
            Ok(conn) => {
                if attempt > 1 {
                    tracing::info!(client_id = %client_id, attempt, "Connected to ComfyUI after retry");
                }
                return Ok(conn);
            }
            Err(e) => e,
        };

        if attempt >= max_attempts {
            tracing::warn!(
                client_id = %client_id,
                attempt,
                error = %err,
                "Giving up connecting to ComfyUI",
            );
            return Err(err);
        }

        tracing::warn!(
            client_id = %client_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Connect attempt failed, retrying",
        );

        // Wait before the next attempt, respecting cancellation.
        tokio::select! {
            _ = cancel.cancelled() => return Err(cancelled()),
            _ = tokio::time::sleep(delay) => {}
        }

        delay = next_delay(delay, config);
    }
}
