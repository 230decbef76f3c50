use crate::RetryPolicy;
use claimline_ledger::LedgerResult;
use std::future::Future;
use tracing::warn;

/// Run `op`, retrying transient ledger errors per `policy`. Other errors return at once.
pub(crate) async fn with_retry<T, F, Fut>(policy: &RetryPolicy, name: &'static str, mut op: F) -> LedgerResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = LedgerResult<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(op = name, attempt, delay_ms = delay.as_millis() as u64, error = %err, "transient ledger error, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claimline_ledger::LedgerError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
        }
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_retry(&fast(3), "fetch_edge", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(LedgerError::Network("flaky".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: LedgerResult<()> = with_retry(&fast(2), "fetch_edge", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(LedgerError::Network("down".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_transient_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: LedgerResult<()> = with_retry(&fast(5), "fetch_edge", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(LedgerError::Reverted("nope".into()))
        })
        .await;
        assert_eq!(result, Err(LedgerError::Reverted("nope".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
