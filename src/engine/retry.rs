use std::future::Future;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::clients::error::ApiError;

/// Call envelope around every target-system mutation. Classifies failures
/// as retryable, duplicate (idempotent no-op), or fatal-for-the-caller.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Run `op` with bounded retries and linear backoff.
    ///
    /// Returns `Ok(Some(value))` on success and `Ok(None)` when the API
    /// reported the resource already exists — callers must treat `None` as
    /// "the desired end-state already holds", never as failure. A 404 is
    /// returned as-is for the caller to interpret (e.g. label-not-found
    /// triggers creation).
    pub async fn call<T, F, Fut>(
        &self,
        description: &str,
        mut op: F,
    ) -> Result<Option<T>, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(Some(value)),
                Err(e) if e.is_retryable() => {
                    if attempt >= self.max_attempts {
                        error!("Max retries reached for '{description}'. Error: {e}");
                        return Err(ApiError::RetriesExhausted {
                            description: description.to_string(),
                            attempts: attempt,
                            message: e.to_string(),
                        });
                    }
                    let delay = self.base_delay * attempt;
                    warn!(
                        "Retryable error during '{description}' (attempt {attempt}/{}): {e}. Retrying in {delay:?}...",
                        self.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_duplicate() => {
                    info!("'{description}': already exists or duplicate. Treating as no-op. ({e})");
                    return Ok(None);
                }
                Err(e) if e.is_not_found() => {
                    debug!("'{description}' returned 404 (not found)");
                    return Err(e);
                }
                Err(e) => {
                    error!("Error during '{description}': {e}");
                    return Err(e);
                }
            }
        }
    }
}
