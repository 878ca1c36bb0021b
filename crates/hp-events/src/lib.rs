//! HostPilot Domain Event Dispatch
//!
//! Transactional event dispatch around a single logical write:
//! - [`Envelope`] pairs a raw event with a [`Timing`] tag
//! - [`Outbox`] is owned by the [`UnitOfWork`] and queues envelopes
//! - [`HandlerRegistry`] holds ordered handler chains per event kind
//! - [`Interceptor`] runs pre-commit handlers to a fixed point, commits,
//!   then runs post-commit handlers
//!
//! # Example
//!
//! ```ignore
//! let mut uow = UnitOfWork::new(ChangeSet::default());
//! uow.work_mut().projects.add(project);
//! uow.raise(project_key, PlatformEvent::ProjectCreated { .. }, &Timing::BOTH);
//!
//! let committed = interceptor.save_changes(uow, store.as_ref(), &cancel).await?;
//! ```

pub mod cancel;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod outbox;
pub mod policy;
pub mod unit_of_work;

pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use envelope::{DomainEvent, EntityKey, Envelope, Timing};
pub use error::DispatchError;
pub use handler::{EventHandler, FailurePolicy, FireOn, HandlerRegistry};
pub use outbox::Outbox;
pub use policy::best_effort;
pub use unit_of_work::{
    Committed, Committer, Interceptor, PendingWrite, UnitOfWork, DEFAULT_MAX_PASSES,
};
