use std::future::Future;

use tokio::time::sleep;

use crate::config::RetryConfig;
use crate::error::Result;

/// Run `f`, redelivering after transient errors with exponential backoff.
///
/// Non-transient errors are returned immediately. After `max_retries`
/// redeliveries the last error is returned.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() || attempt >= config.max_retries => return Err(e),
            Err(e) => {
                let delay = config.delay_for_attempt(attempt);
                tracing::warn!(
                    operation,
                    attempt = attempt + 1,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after transient error"
                );
                attempt += 1;
                sleep(delay).await;
            }
        }
    }
}
