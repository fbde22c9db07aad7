//! Bounded retry for transient transport failures
//!
//! Only an explicitly enumerated set of failure signatures is retried;
//! anything else propagates immediately with the original error intact.

use crate::error::{AcpError, Error, ProviderError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Default retry cap for `send_prompt`
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base delay; the actual delay scales linearly with the attempt number
pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);

/// Remote error substrings treated as transient
const TRANSIENT_SIGNATURES: &[&str] = &[
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "broken pipe",
    "unavailable",
    "busy",
    "rate limit",
    "rate-limit",
    "overloaded",
];

/// Whether an error matches the transient signature set
pub fn is_transient(error: &Error) -> bool {
    match error {
        Error::Acp(AcpError::Timeout) => true,
        Error::Acp(AcpError::ConnectionFailed(_)) => true,
        Error::Acp(AcpError::TransportClosed) => true,
        Error::Acp(AcpError::Remote { message, .. }) => {
            let message = message.to_lowercase();
            TRANSIENT_SIGNATURES.iter().any(|sig| message.contains(sig))
        }
        Error::Provider(ProviderError::Unavailable(_)) => true,
        Error::Provider(ProviderError::RateLimited(_)) => true,
        Error::Io(e) => matches!(
            e.kind(),
            std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe
        ),
        _ => false,
    }
}

/// Delay before the given attempt (1-based); linear in the attempt number
pub fn retry_delay(attempt: u32) -> Duration {
    RETRY_BASE_DELAY * attempt
}

/// Run `op`, retrying transient failures up to `max_retries` times.
///
/// The final error is the original one from the last attempt, not a
/// wrapper.
pub async fn with_retry<T, F, Fut>(label: &str, max_retries: u32, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if attempt < max_retries && is_transient(&error) => {
                attempt += 1;
                let delay = retry_delay(attempt);
                warn!(
                    "{}: transient failure (attempt {}/{}), retrying in {:?}: {}",
                    label, attempt, max_retries, delay, error
                );
                tokio::time::sleep(delay).await;
            }
            Err(error) => return Err(error),
        }
    }
}
