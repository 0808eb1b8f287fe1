//! Fail-open utilities for graceful degradation
//!
//! Probing is advisory: a session must never fail because a state file was
//! locked, unreadable or unwritable. Wrap infrastructure operations in these
//! helpers so failures become a warning and the caller carries on with the
//! last persisted state.
//!
//! DO NOT use fail-open for:
//! - Configuration loading (a broken config should be reported)
//! - The pure circuit transitions (they cannot fail)

use tracing::warn;

use crate::Result;

/// Execute a blocking operation that should fail open
///
/// Logs the error via `tracing::warn!` on failure and returns `None`.
///
/// # Usage
///
/// ```no_run
/// use vigil_core::fail_open::fail_open;
/// use vigil_core::Result;
///
/// fn append_history() -> Result<()> {
///     Ok(())
/// }
///
/// let result = fail_open("uptime_history", append_history);
/// // result is None if append_history() failed, otherwise Some(())
/// ```
///
/// # Examples of appropriate use:
/// - Circuit store writes during a probe batch
/// - Uptime history appends
/// - Schedule run marks
pub fn fail_open<F, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Result<T>,
{
    match f() {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}

/// Like [`fail_open`], but runs `f` on the blocking thread pool
///
/// State file writes wait on a file lock. Running them through this helper
/// keeps the async runtime (and every timer on it) moving while they wait,
/// so a caller can bound the whole operation with `tokio::time::timeout`.
/// If that timeout fires, the write carries on in the background and either
/// lands whole or not at all.
pub async fn fail_open_blocking<F, T>(operation_name: &'static str, f: F) -> Option<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(move || fail_open(operation_name, f)).await {
        Ok(val) => val,
        Err(e) => {
            warn!("{} failed (fail-open): worker panicked: {}", operation_name, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VigilError;

    #[test]
    fn test_fail_open_success() {
        let result = fail_open("test_op", || Ok::<_, VigilError>(42));
        assert_eq!(result, Some(42));
    }

    #[test]
    fn test_fail_open_failure() {
        let result = fail_open("test_op", || {
            Err::<i32, _>(VigilError::Store("locked".to_string()))
        });
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_fail_open_blocking_keeps_timers_running() {
        let slow = fail_open_blocking("slow_write", || {
            std::thread::sleep(std::time::Duration::from_millis(500));
            Ok::<_, VigilError>(1)
        });
        let started = std::time::Instant::now();
        let out = tokio::time::timeout(std::time::Duration::from_millis(50), slow).await;

        assert!(out.is_err());
        assert!(started.elapsed() < std::time::Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_fail_open_blocking_failure() {
        let result = fail_open_blocking("test_op", || {
            Err::<i32, _>(VigilError::Store("locked".to_string()))
        })
        .await;
        assert_eq!(result, None);
    }
}
