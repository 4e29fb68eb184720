use super::sink::Sink;
use chrono::{DateTime, Local};
use logfan_core::{RunConfig, RunOutcome, RunPhase, RunStatus};
use parking_lot::Mutex;
use portable_atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// Everything that belongs to one run.
///
/// A fresh `RunState` is built by every start, so cancellation tokens, the
/// emitter tracker and the counters are never reused across runs. It is
/// shared by `Arc` between the controller, the reader task and every emitter
/// task.
///
/// The byte counter has a single writer (the reader, once per completed
/// worker group) and any number of concurrent readers.
pub struct RunState {
    pub id: u64,
    pub config: RunConfig,
    pub sink: Sink,
    reader_token: CancellationToken,
    worker_token: CancellationToken,
    workers: TaskTracker,
    bytes_committed: AtomicU64,
    chunks_read: AtomicU64,
    emit_errors: AtomicU64,
    stop_requested: AtomicBool,
    started_at: Instant,
    started_wall: DateTime<Local>,
    finished: Mutex<Option<(RunOutcome, Instant)>>,
}

impl RunState {
    pub fn new(id: u64, config: RunConfig, sink: Sink, started_wall: DateTime<Local>) -> Self {
        Self {
            id,
            config,
            sink,
            reader_token: CancellationToken::new(),
            worker_token: CancellationToken::new(),
            workers: TaskTracker::new(),
            bytes_committed: AtomicU64::new(0),
            chunks_read: AtomicU64::new(0),
            emit_errors: AtomicU64::new(0),
            stop_requested: AtomicBool::new(false),
            started_at: Instant::now(),
            started_wall,
            finished: Mutex::new(None),
        }
    }

    /// Cancelled in the second phase of a stop; the reader exits on it.
    pub const fn reader_token(&self) -> &CancellationToken {
        &self.reader_token
    }

    /// Cancelled in the first phase of a stop; emitters check it at entry.
    pub const fn worker_token(&self) -> &CancellationToken {
        &self.worker_token
    }

    /// Tracks every emitter task spawned for this run.
    pub const fn workers(&self) -> &TaskTracker {
        &self.workers
    }

    /// Records a completed worker group in which at least one emitter ran.
    pub fn commit_chunk(&self, bytes: u64) {
        self.bytes_committed.fetch_add(bytes, Ordering::AcqRel);
        self.chunks_read.fetch_add(1, Ordering::AcqRel);
    }

    pub fn record_emit_errors(&self, count: u64) {
        if count > 0 {
            self.emit_errors.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn bytes_committed(&self) -> u64 {
        self.bytes_committed.load(Ordering::Acquire)
    }

    pub fn chunks_read(&self) -> u64 {
        self.chunks_read.load(Ordering::Acquire)
    }

    pub fn emit_errors(&self) -> u64 {
        self.emit_errors.load(Ordering::Relaxed)
    }

    /// Marks the run as stopping. Returns `false` if it already was.
    pub fn request_stop(&self) -> bool {
        !self.stop_requested.swap(true, Ordering::AcqRel)
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    pub fn started_wall(&self) -> DateTime<Local> {
        self.started_wall
    }

    /// Records how the reader ended. Only the first outcome is kept.
    pub fn finish(&self, outcome: RunOutcome) {
        let mut finished = self.finished.lock();
        if finished.is_none() {
            *finished = Some((outcome, Instant::now()));
        }
    }

    pub fn outcome(&self) -> Option<RunOutcome> {
        self.finished.lock().as_ref().map(|(outcome, _)| outcome.clone())
    }

    pub fn is_finished(&self) -> bool {
        self.finished.lock().is_some()
    }

    /// Time since the run started, frozen once the reader has exited.
    pub fn elapsed(&self) -> Duration {
        match self.finished.lock().as_ref() {
            Some((_, at)) => at.duration_since(self.started_at),
            None => self.started_at.elapsed(),
        }
    }

    pub fn status(&self, phase: RunPhase) -> RunStatus {
        RunStatus {
            phase,
            run_id: Some(self.id),
            source: Some(self.config.source.clone()),
            output: self.sink.path().map(|p| p.display().to_string()),
            mode: Some(self.config.mode),
            workers: Some(self.config.workers),
            chunk_size: Some(self.config.chunk_size),
            chunks_read: self.chunks_read(),
            bytes_committed: self.bytes_committed(),
            emit_errors: self.emit_errors(),
            stop_requested: self.stop_requested(),
            outcome: self.outcome(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logfan_core::EmitMode;

    fn state() -> RunState {
        let config = RunConfig {
            chunk_size: 16,
            workers: 2,
            delay: Duration::ZERO,
            to_file: false,
            source: "part_aa.log".to_string(),
            mode: EmitMode::Replicate,
        };
        RunState::new(1, config, Sink::log(), Local::now())
    }

    #[test]
    fn counters_accumulate() {
        let state = state();
        state.commit_chunk(32);
        state.commit_chunk(10);
        state.record_emit_errors(0);
        state.record_emit_errors(2);
        assert_eq!(state.bytes_committed(), 42);
        assert_eq!(state.chunks_read(), 2);
        assert_eq!(state.emit_errors(), 2);
    }

    #[test]
    fn first_outcome_wins() {
        let state = state();
        assert!(!state.is_finished());
        state.finish(RunOutcome::Completed);
        state.finish(RunOutcome::Cancelled);
        assert_eq!(state.outcome(), Some(RunOutcome::Completed));
    }

    #[test]
    fn stop_request_is_reported_once() {
        let state = state();
        assert!(state.request_stop());
        assert!(!state.request_stop());
        assert!(state.stop_requested());
    }

    #[test]
    fn tokens_are_independent() {
        let state = state();
        state.worker_token().cancel();
        assert!(state.worker_token().is_cancelled());
        assert!(!state.reader_token().is_cancelled());
    }
}
