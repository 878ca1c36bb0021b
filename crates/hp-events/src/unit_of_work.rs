//! Unit of work and the save-changes interceptor

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn, Instrument};

use crate::cancel::CancelSignal;
use crate::envelope::{DomainEvent, EntityKey, Envelope, Timing};
use crate::error::DispatchError;
use crate::handler::{EventHandler, FailurePolicy, HandlerRegistry};
use crate::outbox::Outbox;

pub const DEFAULT_MAX_PASSES: usize = 10;

/// The pending writes of a unit of work
pub trait PendingWrite: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;
}

/// Persists pending writes atomically: all of them or none.
#[async_trait]
pub trait Committer<W: PendingWrite>: Send + Sync {
    async fn commit(&self, work: &mut W) -> Result<(), W::Error>;
}

/// Pending writes plus the outbox of events raised against them
pub struct UnitOfWork<E: DomainEvent, W: PendingWrite> {
    work: W,
    outbox: Outbox<E>,
}

impl<E: DomainEvent, W: PendingWrite> UnitOfWork<E, W> {
    pub fn new(work: W) -> Self {
        Self {
            work,
            outbox: Outbox::new(),
        }
    }

    pub fn work(&self) -> &W {
        &self.work
    }

    pub fn work_mut(&mut self) -> &mut W {
        &mut self.work
    }

    pub fn outbox(&self) -> &Outbox<E> {
        &self.outbox
    }

    /// Raise an entity event for the given timings
    pub fn raise(&mut self, entity: EntityKey, event: E, timings: &[Timing]) -> usize {
        self.outbox.raise(entity, event, timings)
    }

    /// Queue a post-commit notification
    pub fn notify(&mut self, event: E) {
        self.outbox.notify(event);
    }

    pub fn into_work(self) -> W {
        self.work
    }
}

/// Result of a successful [`Interceptor::save_changes`]
#[derive(Debug)]
pub struct Committed<W> {
    pub work: W,
    /// Pre-commit passes run before the fixed point was reached
    pub passes: usize,
    /// Best-effort post-commit handlers that failed
    pub best_effort_failures: Vec<&'static str>,
}

enum PostCommitFailure<Err> {
    Handler(Err),
    Cancelled,
}

impl<Err: fmt::Display> fmt::Display for PostCommitFailure<Err> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostCommitFailure::Handler(e) => write!(f, "{}", e),
            PostCommitFailure::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Runs the dispatch protocol around a commit:
///
/// 1. Drain pre-commit envelopes in passes until none remain, invoking
///    handlers in registration order. Any failure aborts the unit of work.
/// 2. Commit the pending writes.
/// 3. Invoke post-commit handlers on a spawned task. Best-effort failures
///    are logged, the first critical failure is reported after all
///    handlers ran.
///
/// When the unit of work fails before or at the commit, every pre-commit
/// invocation that completed gets [`EventHandler::abort`].
pub struct Interceptor<E: DomainEvent, W: PendingWrite> {
    registry: Arc<HandlerRegistry<E, W>>,
    max_passes: usize,
}

impl<E: DomainEvent, W: PendingWrite> Clone for Interceptor<E, W> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            max_passes: self.max_passes,
        }
    }
}

impl<E: DomainEvent, W: PendingWrite> Interceptor<E, W> {
    pub fn new(registry: Arc<HandlerRegistry<E, W>>) -> Self {
        Self {
            registry,
            max_passes: DEFAULT_MAX_PASSES,
        }
    }

    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes.max(1);
        self
    }

    pub fn max_passes(&self) -> usize {
        self.max_passes
    }

    pub fn registry(&self) -> &HandlerRegistry<E, W> {
        &self.registry
    }

    pub async fn save_changes<C>(
        &self,
        mut uow: UnitOfWork<E, W>,
        committer: &C,
        cancel: &CancelSignal,
    ) -> Result<Committed<W>, DispatchError<W::Error>>
    where
        C: Committer<W> + ?Sized,
    {
        let mut completed = Vec::new();
        let passes = match self.run_pre_commit(&mut uow, &mut completed, cancel).await {
            Ok(passes) => passes,
            Err(e) => {
                abort_pre_commit(completed, uow.work()).await;
                return Err(e);
            }
        };

        // Cancellation is honoured up to the commit but never during it.
        if cancel.is_cancelled() {
            warn!("Unit of work cancelled before commit");
            abort_pre_commit(completed, uow.work()).await;
            return Err(DispatchError::Cancelled {
                handler: None,
                timing: Timing::PreCommit,
            });
        }

        let post_commit = uow.outbox.take_post_commit();
        let mut work = uow.into_work();

        if let Err(e) = committer.commit(&mut work).await {
            abort_pre_commit(completed, &work).await;
            return Err(DispatchError::Commit(e));
        }

        metrics::histogram!("hostpilot_dispatch_passes").record(passes as f64);
        debug!(passes, post_commit = post_commit.len(), "Unit of work committed");

        // Once committed, post-commit handlers run to completion even if the
        // caller stops polling this future.
        let registry = self.registry.clone();
        let signal = cancel.clone();
        let task = tokio::spawn(
            async move {
                let outcome = run_post_commit(&registry, post_commit, &work, &signal).await;
                (work, outcome)
            }
            .in_current_span(),
        );

        let (work, outcome) = match task.await {
            Ok(done) => done,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => {
                error!(error = %e, "Post-commit dispatch task did not finish");
                return Err(DispatchError::Cancelled {
                    handler: None,
                    timing: Timing::PostCommit,
                });
            }
        };

        Ok(Committed {
            work,
            passes,
            best_effort_failures: outcome?,
        })
    }

    async fn run_pre_commit(
        &self,
        uow: &mut UnitOfWork<E, W>,
        completed: &mut Vec<(Arc<dyn EventHandler<E, W>>, E)>,
        cancel: &CancelSignal,
    ) -> Result<usize, DispatchError<W::Error>> {
        let mut passes = 0;

        while uow.outbox.has_pending_pre_commit() {
            if passes >= self.max_passes {
                let pending = uow.outbox.pending_pre_commit();
                error!(
                    max_passes = self.max_passes,
                    pending, "Pre-commit dispatch did not reach a fixed point"
                );
                return Err(DispatchError::FixedPointOverflow {
                    max_passes: self.max_passes,
                    pending,
                });
            }
            passes += 1;

            let batch = uow.outbox.take_pre_commit();
            debug!(pass = passes, events = batch.len(), "Dispatching pre-commit events");

            for envelope in batch {
                let kind = envelope.kind();
                for handler in self.registry.handlers_for(kind) {
                    if !handler.fire_on().includes(Timing::PreCommit) {
                        continue;
                    }

                    let mut signal = cancel.clone();
                    let result = tokio::select! {
                        biased;
                        _ = signal.cancelled() => {
                            warn!(handler = handler.name(), "Unit of work cancelled during pre-commit dispatch");
                            return Err(DispatchError::Cancelled {
                                handler: Some(handler.name()),
                                timing: Timing::PreCommit,
                            });
                        }
                        result = handler.pre_commit(envelope.event(), uow) => result,
                    };

                    if let Err(source) = result {
                        warn!(
                            handler = handler.name(),
                            kind = ?kind,
                            error = %source,
                            "Pre-commit handler failed, aborting unit of work"
                        );
                        return Err(DispatchError::PreCommit {
                            handler: handler.name(),
                            source,
                        });
                    }

                    completed.push((handler.clone(), envelope.event().clone()));
                }
            }
        }

        Ok(passes)
    }
}

/// Compensate completed pre-commit invocations, newest first, after the
/// unit of work failed to commit. Failures are logged and swallowed.
async fn abort_pre_commit<E, W>(completed: Vec<(Arc<dyn EventHandler<E, W>>, E)>, work: &W)
where
    E: DomainEvent,
    W: PendingWrite,
{
    for (handler, event) in completed.into_iter().rev() {
        if let Err(e) = handler.abort(&event, work).await {
            warn!(handler = handler.name(), error = %e, "Pre-commit compensation failed");
        }
    }
}

async fn run_post_commit<E, W>(
    registry: &HandlerRegistry<E, W>,
    envelopes: Vec<Envelope<E>>,
    work: &W,
    cancel: &CancelSignal,
) -> Result<Vec<&'static str>, DispatchError<W::Error>>
where
    E: DomainEvent,
    W: PendingWrite,
{
    let mut best_effort_failures = Vec::new();
    let mut critical: Option<DispatchError<W::Error>> = None;

    for envelope in envelopes {
        let kind = envelope.kind();
        for handler in registry.handlers_for(kind) {
            if !handler.fire_on().includes(Timing::PostCommit) {
                continue;
            }

            let mut signal = cancel.clone();
            let outcome = tokio::select! {
                biased;
                _ = signal.cancelled() => Err(PostCommitFailure::Cancelled),
                result = handler.post_commit(envelope.event(), work) => {
                    result.map_err(PostCommitFailure::Handler)
                }
            };

            let Err(failure) = outcome else {
                continue;
            };

            metrics::counter!("hostpilot_post_commit_failures_total", "handler" => handler.name())
                .increment(1);

            match handler.failure_policy() {
                FailurePolicy::BestEffort => {
                    warn!(
                        handler = handler.name(),
                        kind = ?kind,
                        error = %failure,
                        "Best-effort post-commit handler failed"
                    );
                    best_effort_failures.push(handler.name());
                }
                FailurePolicy::Critical => {
                    error!(
                        handler = handler.name(),
                        kind = ?kind,
                        error = %failure,
                        "Post-commit handler failed after commit"
                    );
                    if critical.is_none() {
                        critical = Some(match failure {
                            PostCommitFailure::Handler(source) => DispatchError::PostCommit {
                                handler: handler.name(),
                                source,
                            },
                            PostCommitFailure::Cancelled => DispatchError::Cancelled {
                                handler: Some(handler.name()),
                                timing: Timing::PostCommit,
                            },
                        });
                    }
                }
            }
        }
    }

    match critical {
        Some(e) => Err(e),
        None => Ok(best_effort_failures),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancel_pair;
    use crate::handler::{EventHandler, FireOn};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone)]
    enum TestEvent {
        Created(String),
        Expand(u32),
        Notice,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum TestKind {
        Created,
        Expand,
        Notice,
    }

    impl DomainEvent for TestEvent {
        type Kind = TestKind;

        fn kind(&self) -> TestKind {
            match self {
                TestEvent::Created(_) => TestKind::Created,
                TestEvent::Expand(_) => TestKind::Expand,
                TestEvent::Notice => TestKind::Notice,
            }
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("{0}")]
    struct TestError(String);

    #[derive(Debug, Default)]
    struct Rows {
        rows: Vec<String>,
        committed: bool,
    }

    impl PendingWrite for Rows {
        type Error = TestError;
    }

    #[derive(Default)]
    struct Store {
        commits: Mutex<Vec<Vec<String>>>,
        fail: bool,
    }

    impl Store {
        fn commit_count(&self) -> usize {
            self.commits.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Committer<Rows> for Store {
        async fn commit(&self, work: &mut Rows) -> Result<(), TestError> {
            if self.fail {
                return Err(TestError("disk full".into()));
            }
            work.committed = true;
            self.commits.lock().unwrap().push(work.rows.clone());
            Ok(())
        }
    }

    type Log = Arc<Mutex<Vec<String>>>;
    type Registry = HandlerRegistry<TestEvent, Rows>;

    /// Records every invocation as `name@timing`
    struct Recorder {
        name: &'static str,
        fire_on: FireOn,
        policy: FailurePolicy,
        fail_on: Option<Timing>,
        log: Log,
    }

    impl Recorder {
        fn new(name: &'static str, fire_on: FireOn, log: &Log) -> Self {
            Self {
                name,
                fire_on,
                policy: FailurePolicy::Critical,
                fail_on: None,
                log: log.clone(),
            }
        }

        fn failing(mut self, timing: Timing, policy: FailurePolicy) -> Self {
            self.fail_on = Some(timing);
            self.policy = policy;
            self
        }

        fn record(&self, timing: Timing) -> Result<(), TestError> {
            self.log.lock().unwrap().push(format!("{}@{}", self.name, timing));
            if self.fail_on == Some(timing) {
                return Err(TestError(format!("{} failed", self.name)));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl EventHandler<TestEvent, Rows> for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        fn fire_on(&self) -> FireOn {
            self.fire_on
        }

        fn failure_policy(&self) -> FailurePolicy {
            self.policy
        }

        async fn pre_commit(
            &self,
            _event: &TestEvent,
            uow: &mut UnitOfWork<TestEvent, Rows>,
        ) -> Result<(), TestError> {
            uow.work_mut().rows.push(self.name.to_string());
            self.record(Timing::PreCommit)
        }

        async fn post_commit(&self, _event: &TestEvent, committed: &Rows) -> Result<(), TestError> {
            assert!(committed.committed, "post-commit must observe committed state");
            self.record(Timing::PostCommit)
        }

        async fn abort(&self, _event: &TestEvent, pending: &Rows) -> Result<(), TestError> {
            assert!(!pending.committed);
            self.log.lock().unwrap().push(format!("{}@abort", self.name));
            Ok(())
        }
    }

    /// Post-commit handler that takes a while
    struct Slow {
        delay: Duration,
        log: Log,
    }

    #[async_trait]
    impl EventHandler<TestEvent, Rows> for Slow {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn fire_on(&self) -> FireOn {
            FireOn::PostCommit
        }

        async fn post_commit(&self, _event: &TestEvent, _committed: &Rows) -> Result<(), TestError> {
            tokio::time::sleep(self.delay).await;
            self.log.lock().unwrap().push("slow@post_commit".to_string());
            Ok(())
        }
    }

    /// On `Created`, raises an `Expand` for the same entity
    struct Cascade;

    #[async_trait]
    impl EventHandler<TestEvent, Rows> for Cascade {
        fn name(&self) -> &'static str {
            "cascade"
        }

        fn fire_on(&self) -> FireOn {
            FireOn::PreCommit
        }

        async fn pre_commit(
            &self,
            event: &TestEvent,
            uow: &mut UnitOfWork<TestEvent, Rows>,
        ) -> Result<(), TestError> {
            if let TestEvent::Created(id) = event {
                uow.raise(EntityKey::new("row", id.clone()), TestEvent::Expand(0), &Timing::PRE);
            }
            Ok(())
        }
    }

    /// Raises `Expand(n + 1)` on a fresh entity forever
    struct Runaway;

    #[async_trait]
    impl EventHandler<TestEvent, Rows> for Runaway {
        fn name(&self) -> &'static str {
            "runaway"
        }

        fn fire_on(&self) -> FireOn {
            FireOn::PreCommit
        }

        async fn pre_commit(
            &self,
            event: &TestEvent,
            uow: &mut UnitOfWork<TestEvent, Rows>,
        ) -> Result<(), TestError> {
            if let TestEvent::Expand(n) = event {
                let next = n + 1;
                uow.raise(EntityKey::new("row", next.to_string()), TestEvent::Expand(next), &Timing::PRE);
            }
            Ok(())
        }
    }

    fn created(uow: &mut UnitOfWork<TestEvent, Rows>, id: &str) {
        uow.raise(
            EntityKey::new("row", id),
            TestEvent::Created(id.to_string()),
            &Timing::BOTH,
        );
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_handlers_run_in_registration_order_and_cascade() {
        let log = Log::default();
        let registry = Registry::new()
            .with(TestKind::Created, Arc::new(Recorder::new("first", FireOn::PreCommit, &log)))
            .with(TestKind::Created, Arc::new(Cascade))
            .with(TestKind::Created, Arc::new(Recorder::new("second", FireOn::Both, &log)))
            .with(TestKind::Expand, Arc::new(Recorder::new("expander", FireOn::PreCommit, &log)));
        let interceptor = Interceptor::new(Arc::new(registry));
        let store = Store::default();

        let mut uow = UnitOfWork::new(Rows::default());
        created(&mut uow, "a");

        let committed = interceptor
            .save_changes(uow, &store, &CancelSignal::never())
            .await
            .unwrap();

        assert_eq!(committed.passes, 2);
        assert_eq!(committed.work.rows, vec!["first", "second", "expander"]);
        assert_eq!(
            entries(&log),
            vec![
                "first@pre_commit",
                "second@pre_commit",
                "expander@pre_commit",
                "second@post_commit"
            ]
        );
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn test_pre_commit_failure_aborts_without_commit() {
        let log = Log::default();
        let registry = Registry::new()
            .with(
                TestKind::Created,
                Arc::new(Recorder::new("boom", FireOn::Both, &log).failing(Timing::PreCommit, FailurePolicy::BestEffort)),
            )
            .with(TestKind::Created, Arc::new(Recorder::new("never", FireOn::Both, &log)));
        let interceptor = Interceptor::new(Arc::new(registry));
        let store = Store::default();

        let mut uow = UnitOfWork::new(Rows::default());
        created(&mut uow, "a");

        let err = interceptor
            .save_changes(uow, &store, &CancelSignal::never())
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::PreCommit { handler: "boom", .. }));
        assert!(!err.is_committed());
        assert_eq!(store.commit_count(), 0);
        assert_eq!(entries(&log), vec!["boom@pre_commit"]);
    }

    #[tokio::test]
    async fn test_commit_failure_skips_post_commit() {
        let log = Log::default();
        let registry = Registry::new()
            .with(TestKind::Created, Arc::new(Recorder::new("dual", FireOn::Both, &log)));
        let interceptor = Interceptor::new(Arc::new(registry));
        let store = Store {
            fail: true,
            ..Default::default()
        };

        let mut uow = UnitOfWork::new(Rows::default());
        created(&mut uow, "a");

        let err = interceptor
            .save_changes(uow, &store, &CancelSignal::never())
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Commit(_)));
        assert_eq!(entries(&log), vec!["dual@pre_commit", "dual@abort"]);
    }

    #[tokio::test]
    async fn test_pre_commit_failure_aborts_completed_handlers_newest_first() {
        let log = Log::default();
        let registry = Registry::new()
            .with(TestKind::Created, Arc::new(Recorder::new("first", FireOn::Both, &log)))
            .with(TestKind::Created, Arc::new(Recorder::new("second", FireOn::PreCommit, &log)))
            .with(
                TestKind::Created,
                Arc::new(Recorder::new("third", FireOn::PreCommit, &log).failing(Timing::PreCommit, FailurePolicy::Critical)),
            );
        let interceptor = Interceptor::new(Arc::new(registry));
        let store = Store::default();

        let mut uow = UnitOfWork::new(Rows::default());
        created(&mut uow, "a");

        let err = interceptor
            .save_changes(uow, &store, &CancelSignal::never())
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::PreCommit { handler: "third", .. }));
        assert_eq!(store.commit_count(), 0);
        assert_eq!(
            entries(&log),
            vec![
                "first@pre_commit",
                "second@pre_commit",
                "third@pre_commit",
                "second@abort",
                "first@abort"
            ]
        );
    }

    #[tokio::test]
    async fn test_successful_commit_never_aborts() {
        let log = Log::default();
        let registry = Registry::new()
            .with(TestKind::Created, Arc::new(Recorder::new("dual", FireOn::Both, &log)));
        let interceptor = Interceptor::new(Arc::new(registry));

        let mut uow = UnitOfWork::new(Rows::default());
        created(&mut uow, "a");

        interceptor
            .save_changes(uow, &Store::default(), &CancelSignal::never())
            .await
            .unwrap();

        assert!(!entries(&log).iter().any(|e| e.ends_with("@abort")));
    }

    #[tokio::test]
    async fn test_post_commit_completes_after_caller_is_dropped() {
        let log = Log::default();
        let registry = Registry::new().with(
            TestKind::Created,
            Arc::new(Slow {
                delay: Duration::from_millis(200),
                log: log.clone(),
            }),
        );
        let interceptor = Interceptor::new(Arc::new(registry));
        let store = Arc::new(Store::default());

        let mut uow = UnitOfWork::new(Rows::default());
        created(&mut uow, "a");

        let timed_out = tokio::time::timeout(
            Duration::from_millis(50),
            interceptor.save_changes(uow, store.as_ref(), &CancelSignal::never()),
        )
        .await
        .is_err();
        assert!(timed_out);
        assert_eq!(store.commit_count(), 1);
        assert!(entries(&log).is_empty());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(entries(&log), vec!["slow@post_commit"]);
    }

    #[tokio::test]
    async fn test_fixed_point_overflow() {
        let registry = Registry::new().with(TestKind::Expand, Arc::new(Runaway));
        let interceptor = Interceptor::new(Arc::new(registry)).with_max_passes(3);
        let store = Store::default();

        let mut uow = UnitOfWork::new(Rows::default());
        uow.raise(EntityKey::new("row", "0"), TestEvent::Expand(0), &Timing::PRE);

        let err = interceptor
            .save_changes(uow, &store, &CancelSignal::never())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DispatchError::FixedPointOverflow {
                max_passes: 3,
                pending: 1
            }
        ));
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_raise_invokes_handler_once() {
        let log = Log::default();
        let registry = Registry::new()
            .with(TestKind::Created, Arc::new(Recorder::new("dual", FireOn::Both, &log)));
        let interceptor = Interceptor::new(Arc::new(registry));

        let mut uow = UnitOfWork::new(Rows::default());
        created(&mut uow, "a");
        created(&mut uow, "a");

        interceptor
            .save_changes(uow, &Store::default(), &CancelSignal::never())
            .await
            .unwrap();

        assert_eq!(entries(&log), vec!["dual@pre_commit", "dual@post_commit"]);
    }

    #[tokio::test]
    async fn test_best_effort_post_commit_failure_is_swallowed() {
        let log = Log::default();
        let registry = Registry::new()
            .with(
                TestKind::Created,
                Arc::new(
                    Recorder::new("flaky", FireOn::PostCommit, &log)
                        .failing(Timing::PostCommit, FailurePolicy::BestEffort),
                ),
            )
            .with(TestKind::Created, Arc::new(Recorder::new("after", FireOn::PostCommit, &log)));
        let interceptor = Interceptor::new(Arc::new(registry));

        let mut uow = UnitOfWork::new(Rows::default());
        created(&mut uow, "a");

        let committed = interceptor
            .save_changes(uow, &Store::default(), &CancelSignal::never())
            .await
            .unwrap();

        assert_eq!(committed.best_effort_failures, vec!["flaky"]);
        assert_eq!(entries(&log), vec!["flaky@post_commit", "after@post_commit"]);
    }

    #[tokio::test]
    async fn test_critical_post_commit_failure_reported_after_commit() {
        let log = Log::default();
        let registry = Registry::new()
            .with(
                TestKind::Created,
                Arc::new(
                    Recorder::new("billing", FireOn::PostCommit, &log)
                        .failing(Timing::PostCommit, FailurePolicy::Critical),
                ),
            )
            .with(TestKind::Created, Arc::new(Recorder::new("after", FireOn::PostCommit, &log)));
        let interceptor = Interceptor::new(Arc::new(registry));
        let store = Store::default();

        let mut uow = UnitOfWork::new(Rows::default());
        created(&mut uow, "a");

        let err = interceptor
            .save_changes(uow, &store, &CancelSignal::never())
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::PostCommit { handler: "billing", .. }));
        assert!(err.is_committed());
        assert_eq!(store.commit_count(), 1);
        assert_eq!(entries(&log), vec!["billing@post_commit", "after@post_commit"]);
    }

    #[tokio::test]
    async fn test_notifications_only_fire_post_commit() {
        let log = Log::default();
        let registry = Registry::new()
            .with(TestKind::Notice, Arc::new(Recorder::new("notice", FireOn::Both, &log)));
        let interceptor = Interceptor::new(Arc::new(registry));

        let mut uow = UnitOfWork::new(Rows::default());
        uow.notify(TestEvent::Notice);

        let committed = interceptor
            .save_changes(uow, &Store::default(), &CancelSignal::never())
            .await
            .unwrap();

        assert_eq!(committed.passes, 0);
        assert_eq!(entries(&log), vec!["notice@post_commit"]);
    }

    #[tokio::test]
    async fn test_cancelled_before_dispatch_never_commits() {
        let log = Log::default();
        let registry = Registry::new()
            .with(TestKind::Created, Arc::new(Recorder::new("dual", FireOn::Both, &log)));
        let interceptor = Interceptor::new(Arc::new(registry));
        let store = Store::default();
        let (handle, signal) = cancel_pair();
        handle.cancel();

        let mut uow = UnitOfWork::new(Rows::default());
        created(&mut uow, "a");

        let err = interceptor.save_changes(uow, &store, &signal).await.unwrap_err();

        assert!(matches!(
            err,
            DispatchError::Cancelled {
                timing: Timing::PreCommit,
                ..
            }
        ));
        assert_eq!(store.commit_count(), 0);
        assert!(entries(&log).is_empty());
    }

    #[tokio::test]
    async fn test_empty_unit_of_work_still_commits() {
        let interceptor = Interceptor::new(Arc::new(Registry::new()));
        let store = Store::default();

        let committed = interceptor
            .save_changes(UnitOfWork::new(Rows::default()), &store, &CancelSignal::never())
            .await
            .unwrap();

        assert_eq!(committed.passes, 0);
        assert!(committed.work.committed);
        assert_eq!(store.commit_count(), 1);
    }
}
