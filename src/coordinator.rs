//! Per-submission state machine.
//!
//! A [`WorkCoordinator`] is shared by exactly two threads: the producer that
//! submitted the work and the pool worker that runs it. Both mutate the same
//! `Progress` under one mutex; the producer may block on the paired condvar
//! until the worker reaches the state its wait mode asks for.
//!
//! Start timeouts are detected on both sides. The producer notices when its
//! bounded wait expires; the worker notices, for fire-and-forget work, when
//! the item sat in the queue for too long. Either side may win, and both go
//! through the same guarded transition out of `Created`, so only one of them
//! ever records the timeout.

use super::{
    context,
    errors::{Abandoned, BoxError, EnqueueError, ErrorCode, PanicError, TxError, WorkError},
    model::{WaitMode, WorkState},
    probe::WorkProbe,
    transaction::{TransactionManager, TxHandle},
    work::{ExecutionContext, WorkEvent, WorkEventKind, WorkListener},
};
use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Condvar, Mutex, MutexGuard,
    },
    time::{Duration, Instant},
};
use tracing::{debug, warn};


static SUBMISSION_IDS: AtomicU64 = AtomicU64::new(1);

fn next_submission_id() -> u64 {
    SUBMISSION_IDS.fetch_add(1, Ordering::Relaxed)
}

/// Outcome of the worker-side pre-invoke step.
pub(crate) enum Admission {
    /// Run the body. Carries the imported transaction, if any.
    Proceed(Option<TxHandle>),
    /// The submission already timed out or was rejected.
    Denied,
}

struct Progress {
    state: WorkState,
    error: Option<WorkError>,
}

/// Everything a coordinator needs besides the work body itself.
pub(crate) struct Submission {
    pub mode: WaitMode,
    pub start_timeout: Option<Duration>,
    pub context: Option<ExecutionContext>,
    pub listener: Option<Arc<dyn WorkListener>>,
    pub work_name: Option<Arc<str>>,
    pub owner: Arc<str>,
    pub probe: Option<Arc<dyn WorkProbe>>,
    pub tx_manager: Arc<dyn TransactionManager>,
}

pub(crate) struct WorkCoordinator {
    id: u64,
    mode: WaitMode,
    start_timeout: Option<Duration>,
    submitted_at: Instant,
    context: Option<ExecutionContext>,
    listener: Option<Arc<dyn WorkListener>>,
    work_name: Option<Arc<str>>,
    owner: Arc<str>,
    probe: Option<Arc<dyn WorkProbe>>,
    tx_manager: Arc<dyn TransactionManager>,
    progress: Mutex<Progress>,
    signal: Condvar,
}

fn guarded<T>(call: impl FnOnce() -> Result<T, TxError>) -> Result<T, BoxError> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(Box::new(e)),
        Err(payload) => Err(Box::new(PanicError::from_payload(payload))),
    }
}

impl WorkCoordinator {
    pub(crate) fn new(submission: Submission) -> Arc<Self> {
        Arc::new(Self {
            id: next_submission_id(),
            mode: submission.mode,
            start_timeout: submission.start_timeout,
            submitted_at: Instant::now(),
            context: submission.context,
            listener: submission.listener,
            work_name: submission.work_name,
            owner: submission.owner,
            probe: submission.probe,
            tx_manager: submission.tx_manager,
            progress: Mutex::new(Progress {
                state: WorkState::Created,
                error: None,
            }),
            signal: Condvar::new(),
        })
    }

    #[inline]
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn state(&self) -> WorkState {
        self.progress().state
    }

    pub(crate) fn error(&self) -> Option<WorkError> {
        self.progress().error.clone()
    }

    /// False once the submission timed out or has a recorded failure.
    pub(crate) fn proceed(&self) -> bool {
        let progress = self.progress();
        progress.state != WorkState::TimedOut && progress.error.is_none()
    }

    pub(crate) fn is_timed_out(&self) -> bool {
        self.state() == WorkState::TimedOut
    }

    fn progress(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn probe(&self, f: impl FnOnce(&dyn WorkProbe)) {
        if let Some(probe) = &self.probe {
            f(probe.as_ref());
        }
    }

    fn fire(&self, kind: WorkEventKind, error: Option<WorkError>) {
        let Some(listener) = &self.listener else {
            return;
        };
        let event = WorkEvent {
            kind,
            work_id: self.id,
            work_name: self.work_name.clone(),
            error,
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match kind {
            WorkEventKind::Accepted => listener.work_accepted(&event),
            WorkEventKind::Started => listener.work_started(&event),
            WorkEventKind::Completed => listener.work_completed(&event),
            WorkEventKind::Rejected => listener.work_rejected(&event),
        }));
        if let Err(payload) = outcome {
            let panic = PanicError::from_payload(payload);
            warn!(work_id = self.id, owner = %self.owner, ?kind, %panic, "work listener panicked");
            self.set_error(Box::new(panic));
        }
    }

    /// Records the submission: fires `accepted` and counts it as queued.
    pub(crate) fn accept(&self) {
        debug!(work_id = self.id, owner = %self.owner, mode = %self.mode, timeout = ?self.start_timeout, "work accepted");
        self.fire(WorkEventKind::Accepted, None);
        self.probe(|p| {
            p.work_submitted();
            p.work_queued();
        });
    }

    /// Records a failure, classified by the phase it happened in. The first
    /// recorded failure wins.
    pub(crate) fn set_error(&self, failure: BoxError) {
        let mut progress = self.progress();
        if progress.error.is_some() {
            debug!(work_id = self.id, failure = %failure, "dropping secondary failure");
            return;
        }
        let started = matches!(progress.state, WorkState::Started | WorkState::Completed);
        progress.error = Some(WorkError::classify(failure, started));
    }

    /// Moves `Created` to `TimedOut`. Returns false when another path already
    /// moved the submission on.
    pub(crate) fn time_out(&self) -> bool {
        let error = {
            let mut progress = self.progress();
            if progress.state != WorkState::Created {
                return false;
            }
            let error = progress.error.get_or_insert_with(WorkError::start_timed_out).clone();
            progress.state = WorkState::TimedOut;
            self.signal.notify_all();
            error
        };

        debug!(work_id = self.id, owner = %self.owner, waited = ?self.submitted_at.elapsed(), "work start timed out");
        self.fire(WorkEventKind::Rejected, Some(error));
        self.probe(|p| p.work_timed_out());
        true
    }

    /// Moves `Created` to `Rejected`, keeping an already recorded failure
    /// over `error`.
    pub(crate) fn reject(&self, error: WorkError) -> bool {
        let error = {
            let mut progress = self.progress();
            if progress.state != WorkState::Created {
                return false;
            }
            let error = progress.error.get_or_insert(error).clone();
            progress.state = WorkState::Rejected;
            self.signal.notify_all();
            error
        };

        debug!(work_id = self.id, owner = %self.owner, %error, "work rejected");
        self.fire(WorkEventKind::Rejected, Some(error));
        self.probe(|p| p.work_rejected());
        true
    }

    pub(crate) fn reject_enqueue(&self, cause: EnqueueError) -> bool {
        let rejected = self.reject(WorkError::rejected(ErrorCode::Undefined, cause));
        self.probe(|p| p.work_dequeued());
        rejected
    }

    /// Called when the pool drops the work without running it.
    pub(crate) fn abandon(&self) {
        if self.reject(WorkError::rejected(ErrorCode::Undefined, Abandoned)) {
            self.probe(|p| p.work_dequeued());
        }
    }

    /// Worker-side step before the body runs: stale-queue check, transaction
    /// import and the `Created -> Started` transition.
    pub(crate) fn pre_invoke(&self) -> Admission {
        let waited = self.submitted_at.elapsed();
        self.probe(|p| p.work_waited_for(waited));

        if self.mode == WaitMode::NoWait && self.start_timeout.is_some_and(|t| waited.as_millis() > t.as_millis()) {
            self.time_out();
        }

        // A failure recorded while still queued (e.g. a panicking listener)
        // turns into a rejection here.
        let pending = {
            let progress = self.progress();
            (progress.state == WorkState::Created)
                .then(|| progress.error.clone())
                .flatten()
        };
        if let Some(error) = pending {
            self.reject(error);
        }

        if !self.proceed() {
            self.probe(|p| p.work_dequeued());
            return Admission::Denied;
        }

        let imported = match self.context.as_ref().and_then(|c| c.xid.as_ref()) {
            Some(xid) => {
                let timeout = self.context.as_ref().and_then(|c| c.transaction_timeout);
                match guarded(|| self.tx_manager.import_transaction(xid, timeout)) {
                    Ok(handle) => {
                        debug!(work_id = self.id, %xid, "transaction imported");
                        Some(handle)
                    }
                    Err(cause) => {
                        warn!(work_id = self.id, owner = %self.owner, %xid, %cause, "transaction import failed");
                        self.reject(WorkError::Rejected {
                            code: ErrorCode::TxRecreateFailed,
                            cause: Some(Arc::from(cause)),
                        });
                        self.probe(|p| p.work_dequeued());
                        return Admission::Denied;
                    }
                }
            }
            None => None,
        };

        let started = {
            let mut progress = self.progress();
            if progress.state == WorkState::Created && progress.error.is_none() {
                progress.state = WorkState::Started;
                self.signal.notify_all();
                true
            } else {
                false
            }
        };

        if !started {
            // The producer timed out between our checks and the transition.
            if let Some(handle) = imported {
                self.detach(handle);
            }
            self.probe(|p| p.work_dequeued());
            return Admission::Denied;
        }

        self.probe(|p| {
            p.work_processing_started();
            p.work_dequeued();
        });
        debug!(work_id = self.id, owner = %self.owner, waited = ?waited, "work started");
        self.fire(WorkEventKind::Started, None);

        context::set_unauthenticated();
        Admission::Proceed(imported)
    }

    fn detach(&self, handle: TxHandle) {
        let xid = handle.xid().clone();
        if let Err(cause) = guarded(|| self.tx_manager.release(handle)) {
            warn!(work_id = self.id, %xid, %cause, "failed to release transaction");
        }
        if let Err(cause) = guarded(|| self.tx_manager.clear_thread_association()) {
            warn!(work_id = self.id, %xid, %cause, "failed to clear transaction association");
        }
    }

    /// Worker-side step after the body returned or failed.
    pub(crate) fn post_invoke(&self, imported: Option<TxHandle>) {
        if let Some(handle) = imported {
            let xid = handle.xid().clone();
            if let Err(cause) = guarded(|| self.tx_manager.release(handle)) {
                warn!(work_id = self.id, %xid, %cause, "failed to release transaction");
                self.set_error(cause);
            }
            if let Err(cause) = guarded(|| self.tx_manager.clear_thread_association()) {
                warn!(work_id = self.id, %xid, %cause, "failed to clear transaction association");
                self.set_error(cause);
            }
        }

        if !self.is_timed_out() {
            self.probe(|p| {
                p.work_processing_completed();
                p.work_processed();
            });
            self.fire(WorkEventKind::Completed, self.error());
        }

        {
            let mut progress = self.progress();
            if progress.state == WorkState::Started {
                progress.state = WorkState::Completed;
            }
            self.signal.notify_all();
        }
        debug!(work_id = self.id, owner = %self.owner, failed = self.error().is_some(), "work completed");

        context::set_unauthenticated();
    }

    /// Blocks the producer according to the wait mode. Returns at once for
    /// fire-and-forget work or when the submission already failed.
    pub(crate) fn lock(&self) {
        if self.mode == WaitMode::NoWait {
            return;
        }

        let mut progress = self.progress();
        // A failure recorded before the start already decided the outcome.
        let failed_early = progress.error.is_some() && progress.state == WorkState::Created;
        if failed_early || progress.state.releases(self.mode) {
            return;
        }

        // A zero bound puts no deadline on the producer.
        if let Some(timeout) = self.start_timeout.filter(|t| !t.is_zero()) {
            let deadline = self.submitted_at + timeout;
            while progress.state == WorkState::Created {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                progress = match self.signal.wait_timeout(progress, deadline - now) {
                    Ok((guard, _)) => guard,
                    Err(e) => e.into_inner().0,
                };
            }

            if progress.state == WorkState::Created {
                drop(progress);
                self.time_out();
                progress = self.progress();
            }
        }

        while !progress.state.releases(self.mode) {
            progress = self.signal.wait(progress).unwrap_or_else(|e| e.into_inner());
        }
    }
}

impl fmt::Display for WorkCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.id, self.work_name.as_deref().unwrap_or("work"))
    }
}

impl fmt::Debug for WorkCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let progress = self.progress();
        f.debug_struct("WorkCoordinator")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("mode", &self.mode)
            .field("state", &progress.state)
            .field("error", &progress.error)
            .finish()
    }
}
