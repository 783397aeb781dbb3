use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{AbortHandle, HashState, StepHasher};
use crate::errors::{panic_message, HashError, Result};
use crate::latch::BinaryLatch;

struct Inbox {
    request: Option<u64>,
    result: Option<Result<u64>>,
    state: HashState,
    finished: bool,
    shutdown: bool,
}

struct Shared {
    inbox: Mutex<Inbox>,
    /// Worker waits here for the next request
    go: BinaryLatch,
    /// Caller waits here for the step result
    done: BinaryLatch,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inbox> {
        self.inbox.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Runs the steps of a [`StepHasher`] on a dedicated thread.
///
/// Each call to [`BackgroundHasher::step`] hands one bounded increment to
/// the worker and waits for it on a [`BinaryLatch`], giving up after the
/// caller's timeout. An increment that timed out keeps running and its
/// result is collected with [`BackgroundHasher::poll`].
pub struct BackgroundHasher {
    label: String,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<StepHasher>>,
    abort: AbortHandle,
    in_flight: bool,
}

impl BackgroundHasher {
    pub fn spawn(hasher: StepHasher) -> Result<Self> {
        let label = hasher.label().to_owned();
        let abort = hasher.abort_handle();
        let shared = Arc::new(Shared {
            inbox: Mutex::new(Inbox {
                request: None,
                result: None,
                state: hasher.state().clone(),
                finished: hasher.finished(),
                shutdown: false,
            }),
            go: BinaryLatch::new(),
            done: BinaryLatch::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name(format!("hasher-{}", label))
            .spawn(move || work(hasher, worker_shared))?;
        log::debug!("hasher/{}: worker thread started", label);

        Ok(Self {
            label,
            shared,
            thread: Some(thread),
            abort,
            in_flight: false,
        })
    }

    /// Requests a step of at most `max_bytes` and waits up to `timeout` for
    /// it. Returns `Ok(None)` when the step is still running.
    pub fn step(
        &mut self,
        max_bytes: u64,
        timeout: Duration,
    ) -> Result<Option<u64>> {
        if self.in_flight {
            return Err(HashError::contract(format!(
                "hasher {}: previous step is still in flight",
                self.label
            )));
        }
        self.shared.lock().request = Some(max_bytes);
        self.in_flight = true;
        self.shared.go.signal();
        self.poll(timeout)
    }

    /// Waits up to `timeout` for the step in flight.
    pub fn poll(&mut self, timeout: Duration) -> Result<Option<u64>> {
        if !self.in_flight {
            return Err(HashError::contract(format!(
                "hasher {}: no step in flight",
                self.label
            )));
        }
        if !self.shared.done.wait_timeout(timeout) {
            log::debug!(
                "hasher/{}: step still running after {:?}",
                self.label,
                timeout
            );
            return Ok(None);
        }
        self.in_flight = false;
        match self.shared.lock().result.take() {
            Some(result) => result.map(Some),
            None => Err(HashError::contract(format!(
                "hasher {}: worker signaled without a result",
                self.label
            ))),
        }
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// State as of the last completed step.
    pub fn state(&self) -> HashState {
        self.shared.lock().state.clone()
    }

    pub fn finished(&self) -> bool {
        self.shared.lock().finished
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Stops the worker after its current step and returns the hasher.
    pub fn join(mut self) -> Result<StepHasher> {
        let thread = match self.thread.take() {
            Some(thread) => thread,
            None => {
                return Err(HashError::contract(format!(
                    "hasher {}: worker already stopped",
                    self.label
                )))
            }
        };
        self.shutdown();
        thread
            .join()
            .map_err(|payload| HashError::Panicked(panic_message(&*payload)))
    }

    fn shutdown(&self) {
        self.shared.lock().shutdown = true;
        self.shared.go.signal();
    }
}

impl Drop for BackgroundHasher {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.shutdown();
            if thread.join().is_err() {
                log::warn!("hasher/{}: worker thread panicked", self.label);
            }
        }
    }
}

fn work(mut hasher: StepHasher, shared: Arc<Shared>) -> StepHasher {
    loop {
        shared.go.wait();
        let request = {
            let mut inbox = shared.lock();
            if inbox.shutdown {
                break;
            }
            inbox.request.take()
        };
        let max_bytes = match request {
            Some(max_bytes) => max_bytes,
            None => continue,
        };

        let result = hasher.step_isolated(max_bytes);
        {
            let mut inbox = shared.lock();
            inbox.result = Some(result);
            inbox.state = hasher.state().clone();
            inbox.finished = hasher.finished();
        }
        shared.done.signal();
    }
    log::debug!("hasher/{}: worker thread stopped", hasher.label());
    hasher
}
