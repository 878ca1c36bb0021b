use std::fmt;
use std::future::Future;

use tracing::warn;

/// Await a fallible side effect whose failure must not propagate.
///
/// Failures are logged and counted under
/// `hostpilot_best_effort_failures_total{operation}`.
pub async fn best_effort<T, E, F>(operation: &'static str, future: F) -> Option<T>
where
    F: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    match future.await {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(operation, error = %e, "Best-effort operation failed");
            metrics::counter!("hostpilot_best_effort_failures_total", "operation" => operation)
                .increment(1);
            None
        }
    }
}
