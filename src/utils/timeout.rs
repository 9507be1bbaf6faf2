//! Timeout constants and async timeout wrappers.

use std::future::Future;
use std::time::Duration;

use crate::error::{ProtocolError, Result};

/// Default per-receive timeout; doubles as the heartbeat round length.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(10);

/// Default per-send timeout.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for the initial TCP connect.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(120);

/// Timeout for graceful server shutdown.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Run `future` with a deadline, mapping expiry to `ProtocolError::Timeout`.
pub async fn with_timeout<F, T>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}
