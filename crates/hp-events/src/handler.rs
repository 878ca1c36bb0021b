//! Event handlers and the per-kind handler registry

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::envelope::{DomainEvent, Timing};
use crate::unit_of_work::{PendingWrite, UnitOfWork};

/// Which timings a handler subscribes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOn {
    PreCommit,
    PostCommit,
    /// Dual-fire: invoked once per timing, with timing-appropriate arguments
    Both,
}

impl FireOn {
    pub fn includes(self, timing: Timing) -> bool {
        matches!(
            (self, timing),
            (FireOn::Both, _)
                | (FireOn::PreCommit, Timing::PreCommit)
                | (FireOn::PostCommit, Timing::PostCommit)
        )
    }
}

/// What a post-commit failure means for the caller.
///
/// Pre-commit failures always abort the unit of work regardless of policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Failure is reported to the caller (the commit has still happened)
    Critical,
    /// Failure is logged and swallowed
    BestEffort,
}

/// A handler subscribed to one event kind.
///
/// Pre-commit invocations get the live unit of work and may mutate pending
/// writes or raise further events. Post-commit invocations get the
/// committed writes read-only.
#[async_trait]
pub trait EventHandler<E: DomainEvent, W: PendingWrite>: Send + Sync {
    fn name(&self) -> &'static str;

    fn fire_on(&self) -> FireOn;

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Critical
    }

    async fn pre_commit(&self, _event: &E, _uow: &mut UnitOfWork<E, W>) -> Result<(), W::Error> {
        Ok(())
    }

    async fn post_commit(&self, _event: &E, _committed: &W) -> Result<(), W::Error> {
        Ok(())
    }

    /// Undo side effects a successful `pre_commit` made outside the unit of
    /// work. Invoked when the unit of work is not committed.
    async fn abort(&self, _event: &E, _pending: &W) -> Result<(), W::Error> {
        Ok(())
    }
}

/// Ordered handler chains keyed by event kind.
///
/// Handlers run in registration order; there is no reflection or discovery.
pub struct HandlerRegistry<E: DomainEvent, W: PendingWrite> {
    chains: IndexMap<E::Kind, Vec<Arc<dyn EventHandler<E, W>>>>,
}

impl<E: DomainEvent, W: PendingWrite> Default for HandlerRegistry<E, W> {
    fn default() -> Self {
        Self {
            chains: IndexMap::new(),
        }
    }
}

impl<E: DomainEvent, W: PendingWrite> HandlerRegistry<E, W> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: E::Kind, handler: Arc<dyn EventHandler<E, W>>) -> &mut Self {
        self.chains.entry(kind).or_default().push(handler);
        self
    }

    /// Builder form of [`register`](Self::register)
    pub fn with(mut self, kind: E::Kind, handler: Arc<dyn EventHandler<E, W>>) -> Self {
        self.register(kind, handler);
        self
    }

    pub fn handlers_for(&self, kind: E::Kind) -> &[Arc<dyn EventHandler<E, W>>] {
        self.chains.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn handler_names(&self, kind: E::Kind) -> Vec<&'static str> {
        self.handlers_for(kind).iter().map(|h| h.name()).collect()
    }

    pub fn kinds(&self) -> impl Iterator<Item = &E::Kind> {
        self.chains.keys()
    }

    /// Total number of registrations across all kinds
    pub fn len(&self) -> usize {
        self.chains.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}
