use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::debug;

///
/// ProcessResult
///
/// What the delegate did with one `process_next` invocation.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProcessResult {
    /// A barrier request was dispatched; wait for its completion before
    /// considering the next request.
    ProcessedBarrier,
    /// A concurrent request was dispatched; `process_next` is re-invoked in
    /// the same activation until a non-concurrent result is observed.
    ProcessedConcurrent,
    /// Nothing to dispatch.
    DidNotProcess,
}

///
/// QueueDelegate
///
/// The scheduler delegates dequeue decisions: `process_next` dequeues and
/// dispatches at most one request, synchronously reporting what it did.
/// The delegate is authoritative about when there is nothing left to do.
///

pub trait QueueDelegate: Send + Sync {
    fn process_next(&self) -> ProcessResult;
}

///
/// SchedulerMode
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SchedulerMode {
    #[default]
    Idle,
    Processing,
    WaitingForRetry,
}

///
/// SchedulerStatus
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SchedulerStatus {
    pub mode: SchedulerMode,
    pub retry_timer_pending: bool,
}

///
/// QueueScheduler
///
/// State machine governing when the request queue may be drained:
/// `idle`, `processing` (a barrier is in flight), or `waiting_for_retry`
/// (a failure armed the retry timer). At most one retry timer exists at any
/// time, and `flush` always results in at least one `process_next`
/// invocation regardless of prior state.
///

#[derive(Clone)]
pub struct QueueScheduler {
    shared: Arc<SchedulerShared>,
}

///
/// WeakScheduler
///
/// Non-owning scheduler handle for completion callbacks, so the delegate
/// and the scheduler do not keep each other alive.
///

#[derive(Clone)]
pub struct WeakScheduler {
    shared: Weak<SchedulerShared>,
}

impl WeakScheduler {
    #[must_use]
    pub fn upgrade(&self) -> Option<QueueScheduler> {
        self.shared
            .upgrade()
            .map(|shared| QueueScheduler { shared })
    }
}

struct SchedulerShared {
    delegate: Arc<dyn QueueDelegate>,
    retry_interval: Duration,
    state: Mutex<SchedulerState>,
}

#[derive(Default)]
struct SchedulerState {
    mode: SchedulerMode,
    timer: Option<AbortHandle>,
    timer_generation: u64,
}

impl QueueScheduler {
    #[must_use]
    pub fn new(delegate: Arc<dyn QueueDelegate>, retry_interval: Duration) -> Self {
        Self {
            shared: Arc::new(SchedulerShared {
                delegate,
                retry_interval,
                state: Mutex::new(SchedulerState::default()),
            }),
        }
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakScheduler {
        WeakScheduler {
            shared: Arc::downgrade(&self.shared),
        }
    }

    #[must_use]
    pub fn status(&self) -> SchedulerStatus {
        let state = self.lock();

        SchedulerStatus {
            mode: state.mode,
            retry_timer_pending: state.timer.is_some(),
        }
    }

    // ─────────────────────────────────────────────
    // EVENTS
    // ─────────────────────────────────────────────

    /// A new request was enqueued. Ignored while a barrier is in flight;
    /// otherwise any pending retry timer is invalidated and the queue is
    /// drained.
    pub fn did_enqueue_new_request(&self) {
        let mut state = self.lock();
        match state.mode {
            SchedulerMode::Processing => {}
            SchedulerMode::Idle | SchedulerMode::WaitingForRetry => {
                invalidate_timer(&mut state);
                self.activate(&mut state);
            }
        }
    }

    /// Force a processing attempt, even mid-retry or with a barrier in
    /// flight; the delegate decides whether anything can be dispatched.
    pub fn flush(&self) {
        let mut state = self.lock();
        invalidate_timer(&mut state);
        self.activate(&mut state);
    }

    /// A dispatched request completed successfully.
    pub fn request_did_succeed(&self) {
        let mut state = self.lock();
        match state.mode {
            // The armed timer already covers the pending retry.
            SchedulerMode::WaitingForRetry => {}
            SchedulerMode::Idle | SchedulerMode::Processing => self.activate(&mut state),
        }
    }

    /// A dispatched request failed: arm the retry timer, unless one is
    /// already pending for an earlier failure.
    pub fn request_did_fail(&self) {
        let mut state = self.lock();
        match state.mode {
            SchedulerMode::WaitingForRetry => {}
            SchedulerMode::Idle | SchedulerMode::Processing => self.schedule_retry(&mut state),
        }
    }

    // ─────────────────────────────────────────────
    // INTERNALS
    // ─────────────────────────────────────────────

    fn lock(&self) -> std::sync::MutexGuard<'_, SchedulerState> {
        self.shared.state.lock().expect("scheduler state poisoned")
    }

    fn timer_fired(&self, generation: u64) {
        let mut state = self.lock();
        if state.timer_generation != generation || state.mode != SchedulerMode::WaitingForRetry {
            return;
        }
        state.timer = None;
        self.activate(&mut state);
    }

    // The concurrent-dispatch loop: keep invoking the delegate until a
    // non-concurrent result settles the next mode.
    fn activate(&self, state: &mut SchedulerState) {
        loop {
            match self.shared.delegate.process_next() {
                ProcessResult::ProcessedConcurrent => {}
                ProcessResult::ProcessedBarrier => {
                    state.mode = SchedulerMode::Processing;
                    return;
                }
                ProcessResult::DidNotProcess => {
                    state.mode = SchedulerMode::Idle;
                    return;
                }
            }
        }
    }

    fn schedule_retry(&self, state: &mut SchedulerState) {
        invalidate_timer(state);
        state.timer_generation += 1;
        let generation = state.timer_generation;

        debug!(interval = ?self.shared.retry_interval, "arming retry timer");
        let scheduler = self.clone();
        let interval = self.shared.retry_interval;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            scheduler.timer_fired(generation);
        });

        state.timer = Some(handle.abort_handle());
        state.mode = SchedulerMode::WaitingForRetry;
    }
}

// Invalidate any pending retry timer; a stale firing that already passed
// the abort is rejected by the generation check.
fn invalidate_timer(state: &mut SchedulerState) {
    if let Some(timer) = state.timer.take() {
        timer.abort();
    }
    state.timer_generation += 1;
}
