use crate::client::{
    ProcessResult, QueueDelegate, QueueRequest, QueueScheduler, RequestConfig, RequestSender,
    WeakScheduler,
};
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, OnceLock, Weak},
    time::Duration,
};
use tracing::{debug, warn};

///
/// RequestQueue
///
/// Default in-memory request queue wired to a [`QueueScheduler`]. Honors the
/// barrier contract: a barrier is dequeued only when nothing is in flight,
/// and nothing is dequeued while a barrier is in flight. A failed request
/// returns to the head of the queue and the scheduler arms its retry timer.
///

pub struct RequestQueue {
    core: Arc<QueueCore>,
    scheduler: QueueScheduler,
}

struct QueueCore {
    weak_self: Weak<QueueCore>,
    sender: Arc<dyn RequestSender>,
    scheduler: OnceLock<WeakScheduler>,
    state: Mutex<QueueState>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueueRequest>,
    barrier_in_flight: bool,
    concurrent_in_flight: usize,
    next_id: u64,
}

impl RequestQueue {
    #[must_use]
    pub fn new(sender: Arc<dyn RequestSender>, retry_interval: Duration) -> Self {
        let core = Arc::new_cyclic(|weak_self| QueueCore {
            weak_self: weak_self.clone(),
            sender,
            scheduler: OnceLock::new(),
            state: Mutex::new(QueueState::default()),
        });
        let scheduler = QueueScheduler::new(core.clone(), retry_interval);
        let _ = core.scheduler.set(scheduler.downgrade());

        Self { core, scheduler }
    }

    /// Enqueue a request and nudge the scheduler. Returns the request id.
    pub fn enqueue(&self, config: RequestConfig, is_barrier: bool, payload: Vec<u8>) -> u64 {
        let id = {
            let mut state = self.core.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.pending.push_back(QueueRequest {
                id,
                config,
                is_barrier,
                payload,
            });
            id
        };

        self.scheduler.did_enqueue_new_request();
        id
    }

    /// Force a processing attempt even mid-retry.
    pub fn flush(&self) {
        self.scheduler.flush();
    }

    /// Number of requests waiting to be dispatched.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.core.lock().pending.len()
    }

    /// Whether any request is currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> bool {
        let state = self.core.lock();
        state.barrier_in_flight || state.concurrent_in_flight > 0
    }

    #[must_use]
    pub const fn scheduler(&self) -> &QueueScheduler {
        &self.scheduler
    }
}

impl QueueCore {
    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().expect("queue state poisoned")
    }

    fn dispatch(&self, request: QueueRequest, is_barrier: bool) {
        let Some(core) = self.weak_self.upgrade() else {
            return;
        };

        debug!(id = request.id, is_barrier, "dispatching queued request");
        tokio::spawn(async move {
            let outcome = core.sender.send(request.clone()).await;
            let scheduler = core.scheduler.get().and_then(WeakScheduler::upgrade);

            match outcome {
                Ok(()) => {
                    {
                        let mut state = core.lock();
                        clear_in_flight(&mut state, is_barrier);
                    }
                    if let Some(scheduler) = scheduler {
                        scheduler.request_did_succeed();
                    }
                }
                Err(err) => {
                    warn!(id = request.id, %err, "queued request failed; will retry");
                    {
                        let mut state = core.lock();
                        clear_in_flight(&mut state, is_barrier);
                        state.pending.push_front(request);
                    }
                    if let Some(scheduler) = scheduler {
                        scheduler.request_did_fail();
                    }
                }
            }
        });
    }
}

fn clear_in_flight(state: &mut QueueState, is_barrier: bool) {
    if is_barrier {
        state.barrier_in_flight = false;
    } else {
        state.concurrent_in_flight = state.concurrent_in_flight.saturating_sub(1);
    }
}

impl QueueDelegate for QueueCore {
    fn process_next(&self) -> ProcessResult {
        let request = {
            let mut state = self.lock();
            if state.barrier_in_flight {
                return ProcessResult::DidNotProcess;
            }
            let Some(head) = state.pending.front() else {
                return ProcessResult::DidNotProcess;
            };
            if head.is_barrier && state.concurrent_in_flight > 0 {
                // A barrier never overlaps an in-flight concurrent.
                return ProcessResult::DidNotProcess;
            }

            let request = state.pending.pop_front().expect("head checked above");
            if request.is_barrier {
                state.barrier_in_flight = true;
            } else {
                state.concurrent_in_flight += 1;
            }
            request
        };

        let is_barrier = request.is_barrier;
        self.dispatch(request, is_barrier);

        if is_barrier {
            ProcessResult::ProcessedBarrier
        } else {
            ProcessResult::ProcessedConcurrent
        }
    }
}
