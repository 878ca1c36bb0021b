use thiserror::Error;

use crate::envelope::Timing;

/// Failure of a unit of work as seen by the caller of
/// [`Interceptor::save_changes`](crate::Interceptor::save_changes).
///
/// Only `PostCommit` (and `Cancelled` with `timing == PostCommit`) can occur
/// after the writes are durable; every other variant means nothing was
/// persisted.
#[derive(Error, Debug)]
pub enum DispatchError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    #[error("Pre-commit handler '{handler}' failed: {source}")]
    PreCommit {
        handler: &'static str,
        #[source]
        source: E,
    },

    #[error("Commit failed: {0}")]
    Commit(#[source] E),

    #[error("Post-commit handler '{handler}' failed: {source}")]
    PostCommit {
        handler: &'static str,
        #[source]
        source: E,
    },

    #[error("Unit of work cancelled during {timing}")]
    Cancelled {
        handler: Option<&'static str>,
        timing: Timing,
    },

    #[error("Pre-commit events did not settle after {max_passes} passes ({pending} still pending)")]
    FixedPointOverflow { max_passes: usize, pending: usize },
}

impl<E> DispatchError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// True when the writes of the unit of work were persisted
    pub fn is_committed(&self) -> bool {
        matches!(
            self,
            DispatchError::PostCommit { .. }
                | DispatchError::Cancelled {
                    timing: Timing::PostCommit,
                    ..
                }
        )
    }

    pub fn handler(&self) -> Option<&'static str> {
        match self {
            DispatchError::PreCommit { handler, .. } | DispatchError::PostCommit { handler, .. } => {
                Some(*handler)
            }
            DispatchError::Cancelled { handler, .. } => *handler,
            _ => None,
        }
    }
}
