//! Per-unit-of-work event outbox

use std::collections::{HashSet, VecDeque};

use tracing::trace;

use crate::envelope::{DomainEvent, EntityKey, Envelope, Timing};

/// Queue of envelopes raised during one unit of work.
///
/// Entity events are deduplicated on `(entity, kind, timing)` for the
/// lifetime of the outbox, so raising the same event twice (or raising it
/// again from a later pre-commit pass) is a no-op. Notifications are not
/// deduplicated.
pub struct Outbox<E: DomainEvent> {
    pre_commit: VecDeque<Envelope<E>>,
    post_commit: Vec<Envelope<E>>,
    seen: HashSet<(EntityKey, E::Kind, Timing)>,
}

impl<E: DomainEvent> Default for Outbox<E> {
    fn default() -> Self {
        Self {
            pre_commit: VecDeque::new(),
            post_commit: Vec::new(),
            seen: HashSet::new(),
        }
    }
}

impl<E: DomainEvent> Outbox<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `event` for each requested timing. Returns how many envelopes
    /// were actually queued after deduplication.
    pub fn raise(&mut self, entity: EntityKey, event: E, timings: &[Timing]) -> usize {
        let kind = event.kind();
        let mut queued = 0;

        for &timing in timings {
            if !self.seen.insert((entity.clone(), kind, timing)) {
                trace!(entity = %entity, kind = ?kind, timing = %timing, "Event already raised, skipping");
                continue;
            }

            let envelope = Envelope::for_entity(entity.clone(), event.clone(), timing);
            match timing {
                Timing::PreCommit => self.pre_commit.push_back(envelope),
                Timing::PostCommit => self.post_commit.push(envelope),
            }
            queued += 1;
        }

        queued
    }

    /// Queue a notification. Notifications only ever fire after commit.
    pub fn notify(&mut self, event: E) {
        self.post_commit.push(Envelope::notification(event));
    }

    pub fn has_pending_pre_commit(&self) -> bool {
        !self.pre_commit.is_empty()
    }

    pub fn pending_pre_commit(&self) -> usize {
        self.pre_commit.len()
    }

    pub fn pending_post_commit(&self) -> usize {
        self.post_commit.len()
    }

    /// Drain everything queued for the current pre-commit pass
    pub fn take_pre_commit(&mut self) -> Vec<Envelope<E>> {
        self.pre_commit.drain(..).collect()
    }

    pub fn take_post_commit(&mut self) -> Vec<Envelope<E>> {
        std::mem::take(&mut self.post_commit)
    }

    pub fn is_empty(&self) -> bool {
        self.pre_commit.is_empty() && self.post_commit.is_empty()
    }
}
