//! Fail-open helper for side channels that must never stop a run
//!
//! Use this for infrastructure operations such as the activity log and
//! scheduler event notifications. Do not use it for checkpoint commits or
//! run-state persistence: those decide whether a run is resumable.

use std::future::Future;
use tracing::warn;

use crate::Result;

/// Execute an operation that should fail open.
///
/// Logs the error via `tracing::warn!` on failure and returns `None`.
///
/// ```no_run
/// use cadence_core::fail_open::fail_open;
/// use cadence_core::Result;
///
/// async fn append_event() -> Result<()> {
///     Ok(())
/// }
///
/// async fn example() {
///     let written = fail_open("activity_log", || append_event()).await;
///     assert!(written.is_some());
/// }
/// ```
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!(operation = operation_name, error = %e, "operation failed (fail-open)");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CadenceError;

    #[tokio::test]
    async fn test_fail_open_success() {
        let result = fail_open("test_op", || async { Ok::<_, CadenceError>(42) }).await;
        assert_eq!(result, Some(42));
    }

    #[tokio::test]
    async fn test_fail_open_failure() {
        let result = fail_open("test_op", || async {
            Err::<i32, _>(CadenceError::Other("disk full".to_string()))
        })
        .await;
        assert_eq!(result, None);
    }
}
