//! Event envelopes and timing tags

use std::fmt;
use std::hash::Hash;

/// A raw domain event.
///
/// Events carry no timing information of their own; the timing a handler
/// observes comes from the [`Envelope`] it was queued in.
pub trait DomainEvent: Clone + fmt::Debug + Send + Sync + 'static {
    /// Discriminant used for handler lookup and outbox deduplication
    type Kind: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

/// When a handler observes an event relative to the commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timing {
    /// Inside the unit of work, before anything is persisted
    PreCommit,
    /// After the commit succeeded
    PostCommit,
}

impl Timing {
    pub const BOTH: [Timing; 2] = [Timing::PreCommit, Timing::PostCommit];
    pub const PRE: [Timing; 1] = [Timing::PreCommit];
    pub const POST: [Timing; 1] = [Timing::PostCommit];

    pub fn as_str(&self) -> &'static str {
        match self {
            Timing::PreCommit => "pre_commit",
            Timing::PostCommit => "post_commit",
        }
    }
}

impl fmt::Display for Timing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the entity an event was raised on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    pub entity_type: &'static str,
    pub id: String,
}

impl EntityKey {
    pub fn new(entity_type: &'static str, id: impl Into<String>) -> Self {
        Self {
            entity_type,
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.id)
    }
}

/// An event plus the timing it will be delivered at.
///
/// Entity events carry the key of the entity that raised them. Notification
/// events have no entity and are always [`Timing::PostCommit`].
#[derive(Debug, Clone)]
pub struct Envelope<E> {
    entity: Option<EntityKey>,
    event: E,
    timing: Timing,
}

impl<E: DomainEvent> Envelope<E> {
    pub fn for_entity(entity: EntityKey, event: E, timing: Timing) -> Self {
        Self {
            entity: Some(entity),
            event,
            timing,
        }
    }

    pub fn notification(event: E) -> Self {
        Self {
            entity: None,
            event,
            timing: Timing::PostCommit,
        }
    }

    pub fn entity(&self) -> Option<&EntityKey> {
        self.entity.as_ref()
    }

    pub fn event(&self) -> &E {
        &self.event
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    pub fn kind(&self) -> E::Kind {
        self.event.kind()
    }

    pub fn is_notification(&self) -> bool {
        self.entity.is_none()
    }
}
