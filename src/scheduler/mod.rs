//! Cooperative round-robin scheduling of many [`StepHasher`]s.
//!
//! The scheduler owns admitted hashers and, on every [`StepScheduler::run`],
//! hands each active job a slice of the byte or time budget per round. Jobs
//! that reach a terminal state leave the active set, get their outcome
//! recorded and join a bounded history. Jobs still active when the deadline
//! passes keep their state and continue on the next run.

mod config;
mod report;

pub use config::SchedulerConfig;
pub use report::{Budget, JobId, JobReport, JobState, RunSummary};

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::errors::{HashError, Result};
use crate::hasher::{HashState, StepHasher};

/// Receives the report and the hasher of a job once it is done.
pub type CompletionCallback = Box<dyn FnOnce(&JobReport, StepHasher) + Send>;

struct Job {
    id: JobId,
    hasher: StepHasher,
    deadline: Option<Instant>,
    time_used: Duration,
    callback: Option<CompletionCallback>,
}

impl Job {
    fn is_done(&self) -> bool {
        self.hasher.state().is_terminal()
    }
}

#[derive(Debug, Clone, Copy)]
enum Slice {
    Bytes(u64),
    /// Step in `step_bytes` increments until this instant
    Until(Instant),
}

pub struct StepScheduler {
    config: SchedulerConfig,
    active: VecDeque<Job>,
    completed: VecDeque<JobReport>,
    /// Hashers of finished jobs admitted without a callback
    retired: HashMap<JobId, StepHasher>,
    next_seq: u64,
    total_bytes: u64,
    total_time: Duration,
}

impl Default for StepScheduler {
    fn default() -> Self {
        Self::with_valid_config(SchedulerConfig::default())
    }
}

impl StepScheduler {
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_valid_config(config))
    }

    fn with_valid_config(config: SchedulerConfig) -> Self {
        Self {
            config,
            active: VecDeque::new(),
            completed: VecDeque::new(),
            retired: HashMap::new(),
            next_seq: 1,
            total_bytes: 0,
            total_time: Duration::ZERO,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Adds a job to the end of the round. A job whose `deadline` passes
    /// before it is done gets aborted with [`HashError::Timeout`].
    pub fn admit(
        &mut self,
        hasher: StepHasher,
        deadline: Option<Instant>,
    ) -> JobId {
        self.enqueue(hasher, deadline, None)
    }

    pub fn admit_with_callback<F>(
        &mut self,
        hasher: StepHasher,
        deadline: Option<Instant>,
        callback: F,
    ) -> JobId
    where
        F: FnOnce(&JobReport, StepHasher) + Send + 'static,
    {
        self.enqueue(hasher, deadline, Some(Box::new(callback)))
    }

    fn enqueue(
        &mut self,
        hasher: StepHasher,
        deadline: Option<Instant>,
        callback: Option<CompletionCallback>,
    ) -> JobId {
        let id = JobId(self.next_seq);
        self.next_seq += 1;
        log::info!(
            "scheduler/{}: admitted {} {}, estimated {:?}",
            id,
            hasher.type_string(),
            hasher.label(),
            hasher.estimated_duration()
        );
        self.active.push_back(Job {
            id,
            hasher,
            deadline,
            time_used: Duration::ZERO,
            callback,
        });
        id
    }

    /// Drives the active jobs round-robin until they are all done or
    /// `deadline` passes.
    ///
    /// `budget` is spent anew in every round and split evenly between the
    /// jobs active at its start, at least one byte each. A time slice never
    /// reaches past `deadline`. Faults of one job, panics included, only end
    /// that job. A round in which no job made progress or finished ends the
    /// run early with `stalled` set.
    pub fn run(&mut self, budget: Budget, deadline: Instant) -> RunSummary {
        let mut summary = RunSummary::default();

        'rounds: while !self.active.is_empty() {
            let jobs = self.active.len();
            let slice = match budget {
                Budget::Bytes(total) => {
                    Slice::Bytes((total / jobs as u64).max(1))
                }
                Budget::Time(total) => {
                    let share =
                        total / u32::try_from(jobs).unwrap_or(u32::MAX);
                    let until =
                        Instant::now().checked_add(share).unwrap_or(deadline);
                    Slice::Until(until.min(deadline))
                }
            };
            summary.rounds += 1;
            log::trace!(
                "scheduler: round {} over {} jobs, slice {:?}",
                summary.rounds,
                jobs,
                slice
            );

            let mut round_bytes = 0;
            let mut ix = 0;
            while ix < self.active.len() {
                if Instant::now() >= deadline {
                    summary.suspended = true;
                    self.active.rotate_left(ix);
                    log::debug!(
                        "scheduler: deadline passed, {} jobs suspended",
                        self.active.len()
                    );
                    break 'rounds;
                }

                let step_bytes = self.config.step_bytes;
                let (processed, error) =
                    Self::advance(&mut self.active[ix], slice, step_bytes);
                round_bytes += processed;

                if self.active[ix].is_done() {
                    if let Some(job) = self.active.remove(ix) {
                        summary.completed.push(job.id);
                        self.retire(job, error);
                    }
                } else {
                    ix += 1;
                }
            }
            summary.bytes_hashed += round_bytes;

            if round_bytes == 0 && self.active.len() == jobs {
                summary.stalled = true;
                log::debug!(
                    "scheduler: no progress in round {}, {} jobs stalled",
                    summary.rounds,
                    jobs
                );
                break;
            }
        }

        log::debug!(
            "scheduler: run ended after {} rounds, {} bytes, {} jobs done",
            summary.rounds,
            summary.bytes_hashed,
            summary.completed.len()
        );
        summary
    }

    /// One slice of work for one job. Returns the bytes processed and the
    /// error that ended the job, if any.
    fn advance(
        job: &mut Job,
        slice: Slice,
        step_bytes: u64,
    ) -> (u64, Option<HashError>) {
        if let Some(deadline) = job.deadline {
            if Instant::now() >= deadline {
                log::warn!(
                    "scheduler/{}: {} missed its deadline, aborting",
                    job.id,
                    job.hasher.label()
                );
                job.hasher.abort();
                return (0, Some(HashError::Timeout));
            }
        }

        let started = Instant::now();
        let mut processed = 0;
        let mut error = None;
        match slice {
            Slice::Bytes(max) => match job.hasher.step_isolated(max) {
                Ok(n) => processed = n,
                Err(e) => error = Some(e),
            },
            Slice::Until(until) => loop {
                match job.hasher.step_isolated(step_bytes) {
                    Ok(n) => processed += n,
                    Err(e) => {
                        error = Some(e);
                        break;
                    }
                }
                if job.hasher.finished()
                    || job.is_done()
                    || Instant::now() >= until
                {
                    break;
                }
            },
        }
        if error.is_none() {
            if let Err(e) = job.hasher.conclude_isolated() {
                error = Some(e);
            }
        }
        job.time_used += started.elapsed();
        (processed, error)
    }

    fn retire(&mut self, mut job: Job, error: Option<HashError>) {
        let error = error.or_else(|| match job.hasher.state() {
            HashState::Aborted => Some(HashError::Aborted),
            _ => None,
        });
        match &error {
            Some(e) => log::warn!(
                "scheduler/{}: {} ended after {:?}: {}",
                job.id,
                job.hasher.label(),
                job.time_used,
                e
            ),
            None => log::info!(
                "scheduler/{}: {} done, {} bytes in {:?}",
                job.id,
                job.hasher.label(),
                job.hasher.bytes_hashed(),
                job.time_used
            ),
        }
        if let Err(e) = job.hasher.record_outcome(job.time_used, error) {
            log::error!("scheduler/{}: {}", job.id, e);
        }

        self.total_bytes += job.hasher.bytes_hashed();
        self.total_time += job.time_used;

        let report = JobReport::new(job.id, &job.hasher, job.time_used);
        self.completed.push_back(report.clone());
        while self.completed.len() > self.config.completed_max {
            self.completed.pop_front();
        }
        match job.callback.take() {
            Some(callback) => callback(&report, job.hasher),
            None => {
                self.retired.insert(job.id, job.hasher);
            }
        }
    }

    fn position(&self, id: JobId) -> Result<usize> {
        self.active
            .iter()
            .position(|job| job.id == id)
            .ok_or_else(|| {
                HashError::contract(format!("{} is not an active job", id))
            })
    }

    /// Single step of one job outside of any run. Errors of the job itself
    /// end up in its recorded outcome, only an unknown id is returned.
    pub fn step_job(&mut self, id: JobId, max_bytes: u64) -> Result<u64> {
        let ix = self.position(id)?;
        let step_bytes = self.config.step_bytes;
        let slice = Slice::Bytes(max_bytes);
        let (processed, error) =
            Self::advance(&mut self.active[ix], slice, step_bytes);
        if self.active[ix].is_done() {
            if let Some(job) = self.active.remove(ix) {
                self.retire(job, error);
            }
        }
        Ok(processed)
    }

    pub fn cancel(&mut self, id: JobId) -> Result<()> {
        let ix = self.position(id)?;
        if let Some(mut job) = self.active.remove(ix) {
            job.hasher.abort();
            self.retire(job, Some(HashError::Aborted));
        }
        Ok(())
    }

    /// Cancels every active job whose label matches. Returns how many.
    pub fn cancel_matching<P>(&mut self, predicate: P) -> usize
    where
        P: Fn(&str) -> bool,
    {
        let ids: Vec<JobId> = self
            .active
            .iter()
            .filter(|job| predicate(job.hasher.label()))
            .map(|job| job.id)
            .collect();
        for id in &ids {
            if let Err(e) = self.cancel(*id) {
                log::warn!("scheduler/{}: cancel failed: {}", id, e);
            }
        }
        ids.len()
    }

    /// Hasher of a finished job that was admitted without a callback.
    pub fn take_retired(&mut self, id: JobId) -> Option<StepHasher> {
        self.retired.remove(&id)
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Active jobs in the order the next round visits them.
    pub fn queue_snapshot(&self) -> Vec<JobReport> {
        self.active
            .iter()
            .map(|job| JobReport::new(job.id, &job.hasher, job.time_used))
            .collect()
    }

    /// The most recent finished jobs, oldest first.
    pub fn completed_snapshot(&self) -> Vec<JobReport> {
        self.completed.iter().cloned().collect()
    }

    /// Bytes per millisecond over all retired jobs, once enough hashing
    /// time was observed.
    pub fn hash_speed(&self) -> Option<u64> {
        if self.total_time < self.config.min_speed_sample() {
            return None;
        }
        let millis = self.total_time.as_millis().max(1);
        u64::try_from(self.total_bytes as u128 / millis).ok()
    }

    pub fn pad_estimate(&self, estimate: Duration) -> Duration {
        let pad = estimate.as_nanos()
            * u128::from(self.config.estimate_pad_percent)
            / 100;
        let pad = Duration::from_nanos(u64::try_from(pad).unwrap_or(u64::MAX));
        estimate + pad + self.config.estimate_pad_constant()
    }

    /// Whether a job estimated at `estimate` would still fit before
    /// `deadline` after the remaining estimates of all active jobs.
    pub fn can_schedule_before(
        &self,
        estimate: Duration,
        deadline: Instant,
    ) -> bool {
        let available = deadline.saturating_duration_since(Instant::now());
        let committed: Duration = self
            .active
            .iter()
            .map(|job| {
                let left = job
                    .hasher
                    .estimated_duration()
                    .saturating_sub(job.time_used);
                self.pad_estimate(left)
            })
            .sum();
        committed + self.pad_estimate(estimate) <= available
    }
}
