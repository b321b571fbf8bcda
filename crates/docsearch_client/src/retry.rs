use std::future::Future;

use client_logging::client_warn;
use docsearch_core::{ClientError, RetryDecision, RetryPolicy};

/// Runs `attempt` until it succeeds, fails terminally, or `policy` runs out.
///
/// Attempts are strictly sequential. A terminal failure is returned as is;
/// a retryable failure that outlasts the policy returns `Exhausted` wrapping
/// the last failure.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut attempt: F,
) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut index = 0u32;
    loop {
        let err = match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        match policy.decide(&err.kind, index) {
            RetryDecision::RetryAfter(delay) => {
                client_warn!(
                    "{} failed (attempt {}): {}; retrying in {:?}",
                    label,
                    index + 1,
                    err,
                    delay
                );
                tokio::time::sleep(delay).await;
                index += 1;
            }
            RetryDecision::GiveUp if index > 0 && RetryPolicy::is_retryable(&err.kind) => {
                return Err(ClientError::exhausted(index + 1, err));
            }
            RetryDecision::GiveUp => return Err(err),
        }
    }
}
