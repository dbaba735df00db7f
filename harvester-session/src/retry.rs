//! Bounded retry with an explicit error classifier.
//!
//! The classifier maps each failure to retryable or terminal instead of
//! dispatching on error types at every call site. Timeouts are the one
//! transient class the collaborator produces; everything else ends the
//! attempt immediately.

use std::future::Future;

use crate::error::SessionError;

/// Whether a failed call is worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    Terminal,
}

/// Default classifier: only timeouts are retryable.
pub fn transient_only(err: &SessionError) -> ErrorClass {
    match err {
        SessionError::Timeout { .. } => ErrorClass::Retryable,
        _ => ErrorClass::Terminal,
    }
}

/// Run `op` up to `attempts` times, retrying failures the classifier marks
/// retryable. The final error is returned unchanged.
pub async fn retry<T, F, Fut, C>(
    attempts: u32,
    operation: &str,
    classify: C,
    mut op: F,
) -> Result<T, SessionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SessionError>>,
    C: Fn(&SessionError) -> ErrorClass,
{
    let mut remaining = attempts.max(1);
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                remaining -= 1;
                if remaining == 0 || classify(&err) == ErrorClass::Terminal {
                    return Err(err);
                }
                tracing::warn!(operation, error = %err, "retrying after transient failure");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn timeout() -> SessionError {
        SessionError::Timeout {
            operation: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn returns_first_success() {
        let calls = AtomicU32::new(0);
        let result = retry(3, "op", transient_only, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, SessionError>(7) }
        })
        .await;
        assert_eq!(result.expect("success"), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_timeouts_up_to_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry(3, "op", transient_only, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(timeout()) }
        })
        .await;
        assert!(matches!(result, Err(SessionError::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn terminal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry(3, "op", transient_only, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(SessionError::Protocol("broken".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(SessionError::Protocol(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry(3, "op", transient_only, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(timeout())
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.expect("third call succeeds"), 2);
    }
}
