//! Resumable hashing of a set of content units in bounded steps.
//!
//! A [`StepHasher`] owns its units and digesters. Every call to
//! [`StepHasher::step`] pulls at most the requested number of bytes, feeds
//! them to all digesters and returns, so hashing gigabytes never blocks the
//! caller for longer than one step. At the end of every unit the digests are
//! finalized into a [`HashBlock`].

mod block;
mod unit;
mod worker;

pub use block::{BlockListener, HashBlock};
pub use unit::ContentUnit;
pub use worker::BackgroundHasher;

use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::digest::Digester;
use crate::errors::{panic_message, HashError, Result};
use crate::source::{ByteSink, ReadOutcome};
use crate::KILOBYTE;

const BUFFER_CAPACITY: usize = 64 * KILOBYTE as usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashState {
    Idle,
    Running,
    Finished,
    Aborted,
    Failed(String),
}

impl HashState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HashState::Finished | HashState::Aborted | HashState::Failed(_)
        )
    }
}

/// Requests an abort from any thread.
///
/// The hasher honours the request at its next step boundary: a step that
/// is already running completes, then the hasher becomes `Aborted`.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What the scheduler recorded when the job left `Running`.
#[derive(Debug)]
pub struct HashOutcome {
    pub elapsed: Duration,
    pub error: Option<HashError>,
}

#[derive(Debug, Default)]
struct UnitProgress {
    content_bytes: u64,
    bytes_hashed: u64,
}

pub struct StepHasher {
    /// Label for logging
    label: String,
    pending: VecDeque<ContentUnit>,
    current: Option<ContentUnit>,
    /// Nonce-seeded digesters, cloned at the start of every unit
    prototypes: Vec<Box<dyn Digester>>,
    /// Digesters of the unit being hashed
    working: Vec<Box<dyn Digester>>,
    progress: UnitProgress,
    nonce_len: u64,
    include_names: bool,
    /// `None` means unbounded: the job ends when every unit is exhausted
    bytes_left: Option<u64>,
    explicit_budget: bool,
    exhausted: bool,
    estimated_duration: Duration,
    state: HashState,
    abort_flag: AbortHandle,
    listener: Option<Box<dyn BlockListener>>,
    tee: Option<Box<dyn ByteSink>>,
    blocks: Vec<HashBlock>,
    bytes_hashed: u64,
    buffer: Vec<u8>,
    outcome: Option<HashOutcome>,
}

impl StepHasher {
    /// Creates a hasher feeding every unit to `digesters`, in order.
    ///
    /// The byte budget follows the units added later: the sum of their
    /// lengths when all of them are known, unbounded otherwise.
    pub fn new(
        label: impl Into<String>,
        digesters: Vec<Box<dyn Digester>>,
    ) -> Result<Self> {
        let label = label.into();
        if digesters.is_empty() {
            return Err(HashError::contract(format!(
                "hasher {} needs at least one digester",
                label
            )));
        }
        Ok(Self {
            label,
            pending: VecDeque::new(),
            current: None,
            prototypes: digesters,
            working: Vec::new(),
            progress: UnitProgress::default(),
            nonce_len: 0,
            include_names: false,
            bytes_left: Some(0),
            explicit_budget: false,
            exhausted: false,
            estimated_duration: Duration::ZERO,
            state: HashState::Idle,
            abort_flag: AbortHandle::default(),
            listener: None,
            tee: None,
            blocks: Vec::new(),
            bytes_hashed: 0,
            buffer: Vec::new(),
            outcome: None,
        })
    }

    /// Seeds each digester with its nonce before any content.
    pub fn with_nonces(mut self, nonces: Vec<Vec<u8>>) -> Result<Self> {
        if nonces.len() != self.prototypes.len() {
            return Err(HashError::contract(format!(
                "hasher {}: {} nonces for {} digesters",
                self.label,
                nonces.len(),
                self.prototypes.len()
            )));
        }
        if self.state != HashState::Idle {
            return Err(HashError::contract(format!(
                "hasher {}: nonces must be set before hashing starts",
                self.label
            )));
        }
        for (digester, nonce) in self.prototypes.iter_mut().zip(&nonces) {
            digester.update(nonce);
        }
        self.nonce_len += nonces.iter().map(|n| n.len() as u64).sum::<u64>();
        Ok(self)
    }

    pub fn with_unit(mut self, unit: ContentUnit) -> Self {
        self.pending.push_back(unit);
        self.derive_budget();
        self
    }

    pub fn with_units(
        mut self,
        units: impl IntoIterator<Item = ContentUnit>,
    ) -> Self {
        self.pending.extend(units);
        self.derive_budget();
        self
    }

    /// Caps the job at `budget` content bytes, whatever the units hold.
    pub fn with_byte_budget(mut self, budget: u64) -> Self {
        self.bytes_left = Some(budget);
        self.explicit_budget = true;
        self
    }

    /// Runs until every unit reaches its end of stream.
    pub fn unbounded(mut self) -> Self {
        self.bytes_left = None;
        self.explicit_budget = true;
        self
    }

    /// Feeds each unit's name to the digesters ahead of its content.
    pub fn include_names(mut self, include: bool) -> Self {
        self.include_names = include;
        self
    }

    pub fn with_listener(
        mut self,
        listener: impl BlockListener + 'static,
    ) -> Self {
        self.listener = Some(Box::new(listener));
        self
    }

    /// Copies every hashed content byte into `sink`.
    pub fn with_tee(mut self, sink: impl ByteSink + 'static) -> Self {
        self.tee = Some(Box::new(sink));
        self
    }

    pub fn with_estimated_duration(mut self, estimate: Duration) -> Self {
        self.estimated_duration = estimate;
        self
    }

    fn derive_budget(&mut self) {
        if !self.explicit_budget {
            // unknown when any length is unknown or the total overflows
            self.bytes_left = self
                .pending
                .iter()
                .map(ContentUnit::fixed_len)
                .try_fold(0u64, |total, len| total.checked_add(len?));
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> &HashState {
        &self.state
    }

    pub fn bytes_left(&self) -> Option<u64> {
        self.bytes_left
    }

    /// Content bytes hashed so far.
    pub fn bytes_hashed(&self) -> u64 {
        self.bytes_hashed
    }

    pub fn units_hashed(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks(&self) -> &[HashBlock] {
        &self.blocks
    }

    pub fn take_blocks(&mut self) -> Vec<HashBlock> {
        std::mem::take(&mut self.blocks)
    }

    /// Advisory duration used for planning, never derived from progress.
    pub fn estimated_duration(&self) -> Duration {
        self.estimated_duration
    }

    pub fn set_estimated_duration(&mut self, estimate: Duration) {
        self.estimated_duration = estimate;
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_flag.clone()
    }

    /// Short description for status displays, e.g. `B(2)`.
    pub fn type_string(&self) -> String {
        format!("B({})", self.prototypes.len())
    }

    pub fn outcome(&self) -> Option<&HashOutcome> {
        self.outcome.as_ref()
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.outcome.as_ref().map(|o| o.elapsed)
    }

    /// True once the budget is spent or every unit is exhausted.
    ///
    /// The state itself moves to `Finished` on the next [`Self::step`] or
    /// [`Self::conclude`].
    pub fn finished(&self) -> bool {
        self.exhausted || self.bytes_left == Some(0)
    }

    /// Hashes up to `max_bytes` content bytes and returns how many were
    /// processed.
    ///
    /// With a known, positive budget the step is clamped to
    /// `max(1, min(bytes_left, max_bytes))`, so even a zero request makes
    /// progress. Without a budget a zero request is a no-op. Terminal
    /// hashers return 0 without touching anything. A read failure moves the
    /// hasher to `Failed` and is returned.
    pub fn step(&mut self, max_bytes: u64) -> Result<u64> {
        if self.state.is_terminal() {
            return Ok(0);
        }
        if self.abort_flag.is_aborted() {
            self.abort();
            return Ok(0);
        }
        if self.state == HashState::Idle {
            log::debug!(
                "hasher/{}: started {} with {} units",
                self.label,
                self.type_string(),
                self.pending.len()
            );
            self.state = HashState::Running;
        }
        if self.finished() {
            self.conclude()?;
            return Ok(0);
        }

        let chunk = match self.bytes_left {
            Some(left) => left.min(max_bytes).max(1),
            None => max_bytes,
        };
        let processed = match self.hash_up_to(chunk) {
            Ok(processed) => processed,
            Err(e) => {
                self.fail(&e);
                return Err(e);
            }
        };
        self.bytes_hashed += processed;
        if let Some(left) = self.bytes_left.as_mut() {
            *left -= processed;
        }
        log::trace!(
            "hasher/{}: {} bytes hashed in this step",
            self.label,
            processed
        );

        if self.abort_flag.is_aborted() {
            self.abort();
        }
        Ok(processed)
    }

    /// Moves a hasher whose work is done to `Finished`: the unit cut short
    /// by the budget is finalized and every remaining source is closed.
    /// Does nothing while work remains or once terminal.
    pub fn conclude(&mut self) -> Result<()> {
        if self.state.is_terminal() || !self.finished() {
            return Ok(());
        }
        if let Err(e) = self.complete() {
            self.fail(&e);
            return Err(e);
        }
        Ok(())
    }

    /// Stops hashing for good. The partial digests are dropped.
    pub fn abort(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.abort_flag.abort();
        self.release();
        self.state = HashState::Aborted;
        log::info!(
            "hasher/{}: aborted after {} bytes",
            self.label,
            self.bytes_hashed
        );
    }

    /// Records elapsed time and terminal error once the hasher is done.
    /// Recording twice is a contract violation.
    pub fn record_outcome(
        &mut self,
        elapsed: Duration,
        error: Option<HashError>,
    ) -> Result<()> {
        if self.outcome.is_some() {
            return Err(HashError::contract(format!(
                "outcome of hasher {} already recorded",
                self.label
            )));
        }
        if !self.state.is_terminal() {
            return Err(HashError::contract(format!(
                "hasher {} is still {:?}",
                self.label, self.state
            )));
        }
        log::debug!(
            "hasher/{}: outcome recorded, {:?} elapsed, error: {:?}",
            self.label,
            elapsed,
            error
        );
        self.outcome = Some(HashOutcome { elapsed, error });
        Ok(())
    }

    /// Like [`Self::step`], but a panic raised by a source or digester is
    /// caught and fails this hasher instead of unwinding into the caller.
    pub(crate) fn step_isolated(&mut self, max_bytes: u64) -> Result<u64> {
        self.isolated(|hasher| hasher.step(max_bytes))
    }

    /// Like [`Self::conclude`], with the same panic isolation as
    /// [`Self::step_isolated`]. Finalizing blocks closes sources and calls
    /// the listener, either of which may panic.
    pub(crate) fn conclude_isolated(&mut self) -> Result<()> {
        self.isolated(Self::conclude)
    }

    fn isolated<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        match catch_unwind(AssertUnwindSafe(|| f(&mut *self))) {
            Ok(result) => result,
            Err(payload) => {
                let e = HashError::Panicked(panic_message(&*payload));
                if !self.state.is_terminal() {
                    self.fail(&e);
                }
                Err(e)
            }
        }
    }

    fn hash_up_to(&mut self, chunk: u64) -> Result<u64> {
        if self.buffer.is_empty() {
            self.buffer = vec![0; BUFFER_CAPACITY];
        }
        let mut remaining = chunk;
        let mut processed = 0;
        while remaining > 0 {
            if self.current.is_none() && !self.start_unit() {
                self.exhausted = true;
                break;
            }
            let want = remaining.min(self.buffer.len() as u64) as usize;
            let outcome = match self.current.as_mut() {
                Some(unit) => unit.source_mut().read(&mut self.buffer[..want])?,
                None => break,
            };
            match outcome {
                // the source has nothing right now, try again next step
                ReadOutcome::Bytes(0) => {
                    log::trace!(
                        "hasher/{}: source stalled after {} bytes this step",
                        self.label,
                        processed
                    );
                    break;
                }
                ReadOutcome::Bytes(n) => {
                    let data = &self.buffer[..n];
                    for digester in self.working.iter_mut() {
                        digester.update(data);
                    }
                    if let Some(tee) = self.tee.as_mut() {
                        tee.write_all(data)?;
                    }
                    self.progress.content_bytes += n as u64;
                    self.progress.bytes_hashed +=
                        (n * self.working.len()) as u64;
                    processed += n as u64;
                    remaining -= n as u64;
                }
                ReadOutcome::EndOfStream => self.end_unit(true)?,
            }
        }
        Ok(processed)
    }

    // false when no unit is left
    fn start_unit(&mut self) -> bool {
        let unit = match self.pending.pop_front() {
            Some(unit) => unit,
            None => return false,
        };
        self.working = self.prototypes.clone();
        self.progress = UnitProgress {
            content_bytes: 0,
            bytes_hashed: self.nonce_len,
        };
        if self.include_names {
            let name = unit.name().as_bytes();
            for digester in self.working.iter_mut() {
                digester.update(name);
            }
            self.progress.bytes_hashed +=
                (name.len() * self.working.len()) as u64;
        }
        log::trace!("hasher/{}: starting unit {}", self.label, unit.name());
        self.current = Some(unit);
        true
    }

    fn end_unit(&mut self, at_end_of_stream: bool) -> Result<()> {
        let unit = match self.current.take() {
            Some(unit) => unit,
            None => return Ok(()),
        };
        let truncated = !at_end_of_stream
            && unit
                .fixed_len()
                .map_or(true, |len| self.progress.content_bytes < len);
        let (name, closed) = unit.close();
        closed?;

        let progress = std::mem::take(&mut self.progress);
        let block = HashBlock {
            name,
            content_bytes: progress.content_bytes,
            bytes_hashed: progress.bytes_hashed,
            digests: self.working.iter().map(|d| d.finalize()).collect(),
            truncated,
        };
        self.working.clear();
        log::debug!(
            "hasher/{}: unit {} done, {} bytes, digests {:?}",
            self.label,
            block.name,
            block.content_bytes,
            block.hex_digests()
        );
        if let Some(listener) = self.listener.as_mut() {
            listener.block_done(&block);
        }
        self.blocks.push(block);
        Ok(())
    }

    fn complete(&mut self) -> Result<()> {
        self.end_unit(false)?;
        // empty units right behind the last one read are complete as well
        while self.pending.front().and_then(ContentUnit::fixed_len) == Some(0)
        {
            self.start_unit();
            self.end_unit(true)?;
        }
        self.close_pending();
        if let Some(mut tee) = self.tee.take() {
            tee.close()?;
        }
        self.state = HashState::Finished;
        log::info!(
            "hasher/{}: finished, {} bytes in {} units",
            self.label,
            self.bytes_hashed,
            self.blocks.len()
        );
        Ok(())
    }

    fn fail(&mut self, error: &HashError) {
        self.release();
        self.state = HashState::Failed(error.to_string());
        log::error!("hasher/{}: failed: {}", self.label, error);
    }

    // Closes everything still open, errors are only logged.
    fn release(&mut self) {
        if let Some(unit) = self.current.take() {
            let (name, closed) = unit.close();
            if let Err(e) = closed {
                log::warn!(
                    "hasher/{}: closing unit {} failed: {}",
                    self.label,
                    name,
                    e
                );
            }
        }
        self.close_pending();
        if let Some(mut tee) = self.tee.take() {
            if let Err(e) = tee.close() {
                log::warn!("hasher/{}: closing tee failed: {}", self.label, e);
            }
        }
        self.working.clear();
        self.progress = UnitProgress::default();
    }

    fn close_pending(&mut self) {
        for unit in self.pending.drain(..) {
            let (name, closed) = unit.close();
            if let Err(e) = closed {
                log::warn!(
                    "hasher/{}: closing unread unit {} failed: {}",
                    self.label,
                    name,
                    e
                );
            }
        }
    }
}

impl fmt::Debug for StepHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepHasher")
            .field("label", &self.label)
            .field("type", &self.type_string())
            .field("state", &self.state)
            .field("bytes_left", &self.bytes_left)
            .field("bytes_hashed", &self.bytes_hashed)
            .field("pending_units", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::DigestKind;
    use crate::source::{
        ByteSource, Fault, FaultInjector, FillSource, RandomSource,
        StringSource, VecSink,
    };
    use rstest::rstest;
    use std::io;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::thread;

    fn digesters() -> Vec<Box<dyn Digester>> {
        vec![DigestKind::Blake3.digester(), DigestKind::Crc32.digester()]
    }

    /// Counts `close` calls on the wrapped source.
    struct CountingSource<S> {
        inner: S,
        closes: Arc<AtomicUsize>,
    }

    impl<S: ByteSource> ByteSource for CountingSource<S> {
        fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
            self.inner.read(buf)
        }

        fn close(&mut self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.inner.close()
        }

        fn is_closed(&self) -> bool {
            self.inner.is_closed()
        }

        fn fixed_len(&self) -> Option<u64> {
            self.inner.fixed_len()
        }
    }

    fn counted<S: ByteSource>(
        inner: S,
    ) -> (CountingSource<S>, Arc<AtomicUsize>) {
        let closes = Arc::new(AtomicUsize::new(0));
        let source = CountingSource {
            inner,
            closes: Arc::clone(&closes),
        };
        (source, closes)
    }

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl ByteSink for SharedSink {
        fn write(&mut self, buf: &[u8]) -> Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }

        fn is_closed(&self) -> bool {
            false
        }
    }

    #[rstest]
    #[case(1)]
    #[case(7)]
    #[case(100)]
    #[case(4096)]
    #[case(100_000)]
    fn step_budget_is_conserved(#[case] k: u64) {
        const BUDGET: u64 = 10_000;
        let mut hasher = StepHasher::new("budget", digesters())
            .unwrap()
            .with_unit(ContentUnit::new("random", RandomSource::new(9)))
            .with_byte_budget(BUDGET);

        let mut total = 0;
        while !hasher.finished() {
            let remaining = hasher.bytes_left().unwrap();
            let n = hasher.step(k).unwrap();
            assert!(n <= remaining.min(k), "step {} consumed {}", k, n);
            assert!(n > 0);
            total += n;
        }
        assert_eq!(total, BUDGET);
        assert_eq!(hasher.bytes_hashed(), BUDGET);
        assert_eq!(hasher.state(), &HashState::Running);

        assert_eq!(hasher.step(k).unwrap(), 0);
        assert_eq!(hasher.state(), &HashState::Finished);
    }

    #[test]
    fn zero_request_still_makes_progress() {
        let mut hasher = StepHasher::new("floor", digesters())
            .unwrap()
            .with_unit(ContentUnit::new("fill", FillSource::new(b'a', 3)));

        assert_eq!(hasher.bytes_left(), Some(3));
        for left in [2, 1, 0] {
            assert_eq!(hasher.step(0).unwrap(), 1);
            assert_eq!(hasher.bytes_left(), Some(left));
        }
        assert!(hasher.finished());
    }

    #[test]
    fn zero_request_on_unbounded_job_is_a_no_op() {
        let mut hasher = StepHasher::new("no-op", digesters())
            .unwrap()
            .with_unit(ContentUnit::new("random", RandomSource::new(1)));

        assert_eq!(hasher.bytes_left(), None);
        assert_eq!(hasher.step(0).unwrap(), 0);
        assert_eq!(hasher.state(), &HashState::Running);
        assert_eq!(hasher.step(10).unwrap(), 10);
        assert!(!hasher.finished());
    }

    #[test]
    fn finished_is_visible_before_the_transition() {
        let (source, closes) = counted(FillSource::new(b'x', 10));
        let mut hasher = StepHasher::new("check", digesters())
            .unwrap()
            .with_unit(ContentUnit::new("fill", source));

        assert_eq!(hasher.state(), &HashState::Idle);
        assert_eq!(hasher.step(10).unwrap(), 10);
        assert!(hasher.finished());
        assert_eq!(hasher.state(), &HashState::Running);
        assert_eq!(closes.load(Ordering::SeqCst), 0);

        assert_eq!(hasher.step(10).unwrap(), 0);
        assert_eq!(hasher.state(), &HashState::Finished);
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        // budget ended exactly at the unit's end, nothing was cut short
        assert!(!hasher.blocks()[0].truncated);
        assert_eq!(hasher.step(10).unwrap(), 0);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[rstest]
    #[case(1)]
    #[case(5)]
    #[case(64)]
    #[case(1_000_000)]
    fn blocks_match_one_shot_digests(#[case] step: u64) {
        let units: [(&str, &[u8]); 3] =
            [("a", b"first unit"), ("b", b""), ("c", b"third")];
        let nonces = vec![b"n1".to_vec(), b"nonce2".to_vec()];
        let seen = Arc::new(Mutex::new(Vec::new()));
        let listener = {
            let seen = Arc::clone(&seen);
            move |block: &HashBlock| seen.lock().unwrap().push(block.clone())
        };

        let mut hasher = StepHasher::new("blocks", digesters())
            .unwrap()
            .with_nonces(nonces.clone())
            .unwrap()
            .include_names(true)
            .with_listener(listener)
            .with_units(units.iter().map(|(name, data)| {
                ContentUnit::new(*name, StringSource::new(*data))
            }));

        while !hasher.finished() {
            hasher.step(step).unwrap();
        }
        hasher.conclude().unwrap();
        assert_eq!(hasher.state(), &HashState::Finished);

        let blocks = hasher.blocks();
        assert_eq!(blocks.len(), 3);
        assert_eq!(*seen.lock().unwrap(), blocks.to_vec());
        for (block, (name, data)) in blocks.iter().zip(units.iter()) {
            assert_eq!(block.name, *name);
            assert_eq!(block.content_bytes, data.len() as u64);
            assert!(!block.truncated);
            let per_digester = (name.len() + data.len()) as u64;
            assert_eq!(block.bytes_hashed, 8 + 2 * per_digester);

            for (ix, kind) in
                [DigestKind::Blake3, DigestKind::Crc32].iter().enumerate()
            {
                let mut input = nonces[ix].clone();
                input.extend_from_slice(name.as_bytes());
                input.extend_from_slice(data);
                assert_eq!(block.digests[ix], kind.digest(&input));
            }
        }
    }

    #[test]
    fn budget_cut_marks_block_truncated() {
        let mut hasher = StepHasher::new("cut", digesters())
            .unwrap()
            .with_unit(ContentUnit::new("s", StringSource::from("abcdef")))
            .with_unit(ContentUnit::new("t", StringSource::from("never")))
            .with_byte_budget(4);

        assert_eq!(hasher.step(100).unwrap(), 4);
        assert_eq!(hasher.step(100).unwrap(), 0);
        let blocks = hasher.blocks();
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].truncated);
        assert_eq!(blocks[0].digests[1], DigestKind::Crc32.digest(b"abcd"));
    }

    #[test]
    fn short_content_finishes_when_exhausted() {
        let mut hasher = StepHasher::new("short", digesters())
            .unwrap()
            .with_unit(ContentUnit::new("fill", FillSource::new(0, 10)))
            .with_byte_budget(100);

        assert_eq!(hasher.step(50).unwrap(), 10);
        assert!(hasher.finished());
        assert_eq!(hasher.bytes_left(), Some(90));
        hasher.conclude().unwrap();
        assert_eq!(hasher.state(), &HashState::Finished);
    }

    #[test]
    fn abort_closes_sources_and_stops_stepping() {
        let (first, first_closes) = counted(RandomSource::new(1));
        let (second, second_closes) = counted(FillSource::new(0, 10));
        let mut hasher = StepHasher::new("abort", digesters())
            .unwrap()
            .with_unit(ContentUnit::new("first", first))
            .with_unit(ContentUnit::new("second", second));

        assert_eq!(hasher.step(100).unwrap(), 100);
        hasher.abort();
        assert_eq!(hasher.state(), &HashState::Aborted);
        assert_eq!(first_closes.load(Ordering::SeqCst), 1);
        assert_eq!(second_closes.load(Ordering::SeqCst), 1);
        assert!(hasher.blocks().is_empty());

        assert_eq!(hasher.step(100).unwrap(), 0);
        hasher.abort();
        assert_eq!(first_closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn abort_from_another_thread_is_consistent() {
        let mut hasher = StepHasher::new("racy", digesters())
            .unwrap()
            .with_unit(ContentUnit::new("random", RandomSource::new(3)));
        let handle = hasher.abort_handle();

        let aborter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            handle.abort();
        });
        let mut returned = 0;
        while !hasher.state().is_terminal() {
            returned += hasher.step(512).unwrap();
        }
        aborter.join().unwrap();

        assert_eq!(hasher.state(), &HashState::Aborted);
        assert_eq!(returned, hasher.bytes_hashed());
        assert_eq!(hasher.step(512).unwrap(), 0);
    }

    #[test]
    fn read_failure_fails_the_job() {
        let source = FaultInjector::new(RandomSource::new(5));
        let faults = source.handle();
        let (after, after_closes) = counted(FillSource::new(0, 4));
        let mut hasher = StepHasher::new("faulty", digesters())
            .unwrap()
            .with_unit(ContentUnit::new("faulty", source))
            .with_unit(ContentUnit::new("after", after));

        assert_eq!(hasher.step(16).unwrap(), 16);
        faults.arm_read_failure(Fault::io(io::ErrorKind::Other, "reset"));
        match hasher.step(16) {
            Err(HashError::Io(e)) => assert_eq!(e.to_string(), "reset"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            hasher.state(),
            HashState::Failed(reason) if reason.contains("reset")
        ));
        assert_eq!(after_closes.load(Ordering::SeqCst), 1);
        assert_eq!(hasher.step(16).unwrap(), 0);
    }

    #[test]
    fn close_failure_at_end_of_unit_fails_the_job() {
        let source = FaultInjector::new(FillSource::new(1, 4));
        source.arm_close_failure(Fault::io(io::ErrorKind::Other, "stuck"));
        let mut hasher = StepHasher::new("close", digesters())
            .unwrap()
            .with_unit(ContentUnit::new("fill", source))
            .unbounded();

        assert!(hasher.step(100).is_err());
        assert!(matches!(hasher.state(), HashState::Failed(_)));
        assert!(hasher.blocks().is_empty());
    }

    #[test]
    fn record_outcome_only_once_and_only_when_done() {
        let mut hasher = StepHasher::new("outcome", digesters())
            .unwrap()
            .with_unit(ContentUnit::new("fill", FillSource::new(0, 1)));

        assert!(matches!(
            hasher.record_outcome(Duration::ZERO, None),
            Err(HashError::Contract(_))
        ));
        hasher.step(1).unwrap();
        hasher.step(1).unwrap();
        hasher
            .record_outcome(Duration::from_millis(3), None)
            .unwrap();
        assert_eq!(hasher.elapsed(), Some(Duration::from_millis(3)));
        assert!(matches!(
            hasher.record_outcome(Duration::ZERO, None),
            Err(HashError::Contract(_))
        ));
    }

    #[test]
    fn tee_receives_content() {
        let sink = SharedSink::default();
        let mut hasher = StepHasher::new("tee", digesters())
            .unwrap()
            .with_unit(ContentUnit::new("a", StringSource::from("hello ")))
            .with_unit(ContentUnit::new("b", StringSource::from("world")))
            .with_tee(sink.clone());

        while !hasher.finished() {
            hasher.step(3).unwrap();
        }
        hasher.conclude().unwrap();
        assert_eq!(&*sink.0.lock().unwrap(), b"hello world");
    }

    #[test]
    fn tee_write_failure_fails_the_job() {
        let sink = FaultInjector::new(VecSink::new());
        sink.arm_write_failure(Fault::io(io::ErrorKind::BrokenPipe, "gone"));
        let mut hasher = StepHasher::new("tee", digesters())
            .unwrap()
            .with_unit(ContentUnit::new("a", StringSource::from("abc")))
            .with_tee(sink);

        assert!(hasher.step(3).is_err());
        assert!(matches!(hasher.state(), HashState::Failed(_)));
    }

    #[test]
    fn construction_contracts() {
        assert!(matches!(
            StepHasher::new("none", Vec::new()),
            Err(HashError::Contract(_))
        ));
        let hasher = StepHasher::new("two", digesters()).unwrap();
        assert_eq!(hasher.type_string(), "B(2)");
        assert!(matches!(
            hasher.with_nonces(vec![b"one".to_vec()]),
            Err(HashError::Contract(_))
        ));
    }

    #[test]
    fn empty_job_finishes_on_first_step() {
        let mut hasher = StepHasher::new("empty", digesters())
            .unwrap()
            .with_estimated_duration(Duration::from_secs(1));
        assert!(hasher.finished());
        assert_eq!(hasher.step(10).unwrap(), 0);
        assert_eq!(hasher.state(), &HashState::Finished);
        assert_eq!(hasher.estimated_duration(), Duration::from_secs(1));
    }

    #[rstest]
    #[case(vec![("a", "abc"), ("b", "")])]
    #[case(vec![("a", "")])]
    #[case(vec![("a", ""), ("b", "xy"), ("c", ""), ("d", "")])]
    fn empty_units_still_get_blocks(#[case] units: Vec<(&str, &str)>) {
        let mut hasher = StepHasher::new("empty units", digesters())
            .unwrap()
            .with_units(units.iter().map(|(name, content)| {
                ContentUnit::new(*name, StringSource::from(*content))
            }));
        while !hasher.state().is_terminal() {
            hasher.step(1).unwrap();
        }
        assert_eq!(hasher.state(), &HashState::Finished);

        let names: Vec<_> =
            hasher.blocks().iter().map(|b| b.name.as_str()).collect();
        let expected: Vec<_> = units.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, expected);
        for (block, (_, content)) in hasher.blocks().iter().zip(&units) {
            assert_eq!(block.content_bytes, content.len() as u64);
            assert!(!block.truncated);
            assert_eq!(
                block.digests,
                vec![
                    DigestKind::Blake3.digest(content.as_bytes()),
                    DigestKind::Crc32.digest(content.as_bytes()),
                ]
            );
        }
    }

    #[test]
    fn overflowing_total_length_is_unbounded() {
        let hasher = StepHasher::new("huge", digesters())
            .unwrap()
            .with_unit(ContentUnit::new("a", FillSource::new(1, u64::MAX)))
            .with_unit(ContentUnit::new("b", FillSource::new(1, 1)));
        assert_eq!(hasher.bytes_left(), None);
        assert!(!hasher.finished());

        let hasher = StepHasher::new("max", digesters())
            .unwrap()
            .with_unit(ContentUnit::new("a", FillSource::new(1, u64::MAX - 1)))
            .with_unit(ContentUnit::new("b", FillSource::new(1, 1)));
        assert_eq!(hasher.bytes_left(), Some(u64::MAX));
    }

    /// Has nothing to deliver yet, whatever the buffer size.
    struct StalledSource {
        closed: bool,
    }

    impl ByteSource for StalledSource {
        fn read(&mut self, _buf: &mut [u8]) -> Result<ReadOutcome> {
            Ok(ReadOutcome::Bytes(0))
        }

        fn close(&mut self) -> Result<()> {
            self.closed = true;
            Ok(())
        }

        fn is_closed(&self) -> bool {
            self.closed
        }

        fn fixed_len(&self) -> Option<u64> {
            Some(100)
        }
    }

    #[test]
    fn stalled_source_yields_the_step() {
        let mut hasher = StepHasher::new("stalled", digesters())
            .unwrap()
            .with_unit(ContentUnit::new("a", StalledSource { closed: false }));

        // the forced one-byte floor does not apply when nothing is available
        assert_eq!(hasher.step(0).unwrap(), 0);
        assert_eq!(hasher.step(50).unwrap(), 0);
        assert_eq!(hasher.state(), &HashState::Running);
        assert_eq!(hasher.bytes_left(), Some(100));
        assert!(!hasher.finished());
        assert!(hasher.blocks().is_empty());
    }

    #[test]
    fn panic_while_concluding_fails_only_the_hasher() {
        let source = FaultInjector::new(FillSource::new(0, 10));
        let faults = source.handle();
        let mut hasher = StepHasher::new("close panic", digesters())
            .unwrap()
            .with_unit(ContentUnit::new("a", source));

        assert_eq!(hasher.step_isolated(10).unwrap(), 10);
        assert!(hasher.finished());
        faults.arm_close_failure(Fault::panic("close blew up"));

        match hasher.conclude_isolated() {
            Err(HashError::Panicked(msg)) => assert!(msg.contains("blew up")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(hasher.state(), HashState::Failed(_)));
        assert!(hasher.blocks().is_empty());
        assert_eq!(hasher.step_isolated(10).unwrap(), 0);
    }
}
