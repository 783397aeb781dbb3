//! Resumable, time-bounded content hashing.
//!
//! Content is digested in small byte- or time-bounded increments so that a
//! large collection can be hashed across many scheduler turns without ever
//! blocking for long. The building blocks, leaves first:
//!
//! - [`source`]: byte producers, fault injection and throttling
//! - [`latch`]: single-slot handoff between threads
//! - [`digest`]: digest accumulators
//! - [`hasher`]: the resumable [`StepHasher`] and its background worker
//! - [`scheduler`]: round-robin [`StepScheduler`] over many hashers

pub mod digest;
pub mod errors;
pub mod hasher;
pub mod latch;
pub mod scheduler;
pub mod source;

pub use digest::{DigestKind, Digester};
pub use errors::{HashError, Result};
pub use hasher::{
    AbortHandle, BackgroundHasher, ContentUnit, HashBlock, HashState,
    StepHasher,
};
pub use latch::BinaryLatch;
pub use scheduler::{
    Budget, JobId, JobReport, JobState, SchedulerConfig, StepScheduler,
};
pub use source::{ByteSource, ReadOutcome, SourceKind};

pub const KILOBYTE: u64 = 1024;
pub const MEGABYTE: u64 = 1024 * KILOBYTE;
