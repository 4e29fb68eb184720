//! Run lifecycle: `Idle -> Running -> Stopping -> Idle`.
//!
//! [`RunController`] owns at most one active run. Start and stop are
//! serialized by an async lifecycle lock, so "one active run" is enforced
//! rather than assumed. Status and metrics reads never touch that lock.
//!
//! ## Stop sequence
//!
//! 1. Cancel the worker token and wait for every emitter task of the run
//!    (drains the group of the chunk in flight).
//! 2. Cancel the reader token and wait for the reader task.
//! 3. Close the sink (a no-op if the reader already closed it).
//!
//! Stop has no timeout. Emitters are cooperative, so a stop that lands while
//! a group is sleeping returns after that group's delay.
//!
//! Both start and stop run on their own task. A caller that goes away halfway
//! (an HTTP client hanging up) cannot leave a half-started or half-stopped
//! run behind.

use super::{
    memory::log_available_memory, metrics, reader::read_chunks, sink::Sink, state::RunState,
};
use crate::server::telemetry::{increment_runs_failed, increment_runs_started, record_stop_duration};
use chrono::Local;
use logfan_core::{
    Error, MetricsSnapshot, Result, RunConfig, RunOutcome, RunPhase, RunStatus,
};
use parking_lot::RwLock;
use portable_atomic::{AtomicBool, AtomicU64, Ordering};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{fs::File, sync::Mutex, task::JoinHandle};
use tracing::Instrument;

/// Filesystem locations used by every run.
#[derive(Clone, Debug)]
pub struct ControllerSettings {
    /// Directory holding the source files.
    pub log_dir: PathBuf,
    /// Directory where file-mode runs create their output file.
    pub output_dir: PathBuf,
}

/// Result of a stop request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StopReport {
    /// `false` when there was no run to stop.
    pub stopped: bool,
    pub run_id: Option<u64>,
    pub outcome: Option<RunOutcome>,
    pub bytes_committed: u64,
    pub elapsed: Duration,
}

impl StopReport {
    const fn idle() -> Self {
        Self {
            stopped: false,
            run_id: None,
            outcome: None,
            bytes_committed: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// Human readable confirmation returned by `/stop`.
    pub fn message(&self) -> String {
        if !self.stopped {
            return "No active run; nothing to stop.".to_string();
        }
        match &self.outcome {
            Some(RunOutcome::Failed { error }) => format!(
                "All workers stopped. The run had already failed: {error} ({} bytes committed)",
                self.bytes_committed
            ),
            Some(RunOutcome::Completed) => format!(
                "All workers stopped. The run had already reached end of file ({} bytes committed)",
                self.bytes_committed
            ),
            _ => format!(
                "All workers stopped successfully ({} bytes committed)",
                self.bytes_committed
            ),
        }
    }
}

struct ActiveRun {
    state: Arc<RunState>,
    reader: JoinHandle<()>,
}

struct Inner {
    settings: ControllerSettings,
    lifecycle: Mutex<Option<ActiveRun>>,
    /// Current run, or the last one once it has ended. Read by status and
    /// metrics without the lifecycle lock.
    current: RwLock<Option<Arc<RunState>>>,
    stopping: AtomicBool,
    shutting_down: AtomicBool,
    next_run_id: AtomicU64,
}

/// Owns the lifecycle of the (single) active run.
#[derive(Clone)]
pub struct RunController {
    inner: Arc<Inner>,
}

impl RunController {
    pub fn new(settings: ControllerSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                lifecycle: Mutex::new(None),
                current: RwLock::new(None),
                stopping: AtomicBool::new(false),
                shutting_down: AtomicBool::new(false),
                next_run_id: AtomicU64::new(1),
            }),
        }
    }

    /// Starts a run and returns as soon as the reader has been spawned.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] if `config` fails validation.
    /// - [`Error::RunInProgress`] if the previous run's reader is still alive.
    /// - [`Error::SourceNotFound`] / [`Error::SourceUnreadable`] if the source
    ///   cannot be used. No output file is created in that case.
    /// - [`Error::SinkOpen`] if file mode is requested and the output file
    ///   cannot be created.
    /// - [`Error::ServiceShutdown`] once [`RunController::shutdown`] was called.
    pub async fn start(&self, config: RunConfig) -> Result<RunStatus> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.start(config).await })
            .await
            .map_err(|e| Error::Internal {
                reason: format!("start task failed: {e}"),
            })?
    }

    /// Stops the active run, blocking until every emitter and the reader have
    /// exited. Idempotent: without an active run this is a no-op.
    pub async fn stop(&self) -> StopReport {
        let inner = Arc::clone(&self.inner);
        match tokio::spawn(async move { inner.stop().await }).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("Stop task failed: {e}");
                StopReport::idle()
            }
        }
    }

    /// Refuses further starts and stops the active run, if any.
    pub async fn shutdown(&self) -> StopReport {
        self.inner.shutting_down.store(true, Ordering::Release);
        self.stop().await
    }

    pub fn phase(&self) -> RunPhase {
        self.inner.phase(self.inner.current.read().as_deref())
    }

    pub fn status(&self) -> RunStatus {
        let current = self.inner.current.read().clone();
        match current {
            Some(state) => state.status(self.inner.phase(Some(&state))),
            None => RunStatus::default(),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        let current = self.inner.current.read().clone();
        metrics::snapshot(current.as_deref())
    }

    /// Handle on the current (or last) run.
    pub fn current_run(&self) -> Option<Arc<RunState>> {
        self.inner.current.read().clone()
    }
}

impl Inner {
    fn phase(&self, current: Option<&RunState>) -> RunPhase {
        if self.stopping.load(Ordering::Acquire) {
            return RunPhase::Stopping;
        }
        match current {
            Some(state) if !state.is_finished() => RunPhase::Running,
            _ => RunPhase::Idle,
        }
    }

    async fn start(&self, config: RunConfig) -> Result<RunStatus> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(Error::ServiceShutdown);
        }
        config.validate()?;

        let mut active = self.lifecycle.lock().await;

        if let Some(run) = active.as_ref() {
            if !run.reader.is_finished() {
                return Err(Error::RunInProgress {
                    source_file: run.state.config.source.clone(),
                });
            }
        }
        if let Some(finished) = active.take() {
            reap(finished).await;
        }

        let source_path = self.settings.log_dir.join(&config.source);
        let (source, source_bytes) = open_source(&source_path).await?;
        tracing::info!(
            "Reading {} ({source_bytes} bytes) in chunks of {}",
            source_path.display(),
            config.chunk_size
        );
        log_available_memory(source_bytes).await;

        let started_wall = Local::now();
        let sink = if config.to_file {
            Sink::open_file(&self.settings.output_dir, started_wall).await?
        } else {
            Sink::log()
        };

        let id = self.next_run_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(RunState::new(id, config, sink, started_wall));
        *self.current.write() = Some(Arc::clone(&state));

        let span = tracing::info_span!("run", id);
        let reader = tokio::spawn(drive_reader(Arc::clone(&state), source).instrument(span));

        tracing::info!(
            "Started run {id}: {} workers, {:?} delay, {:?} mode, to_file={}",
            state.config.workers,
            state.config.delay,
            state.config.mode,
            state.config.to_file
        );
        increment_runs_started();

        let status = state.status(RunPhase::Running);
        *active = Some(ActiveRun { state, reader });
        Ok(status)
    }

    async fn stop(&self) -> StopReport {
        let started = Instant::now();
        let mut active = self.lifecycle.lock().await;

        let Some(run) = active.take() else {
            tracing::debug!("Stop requested with no active run");
            return StopReport::idle();
        };

        self.stopping.store(true, Ordering::Release);
        run.state.request_stop();
        tracing::info!("Stop processing command received for run {}", run.state.id);

        // Phase 1: emitters.
        run.state.worker_token().cancel();
        run.state.workers().close();
        run.state.workers().wait().await;
        tracing::info!("All worker tasks stopped");

        // Phase 2: reader.
        run.state.reader_token().cancel();
        if let Err(e) = run.reader.await {
            tracing::error!("Reader task for run {} died: {e}", run.state.id);
            run.state.finish(RunOutcome::Failed {
                error: format!("reader task died: {e}"),
            });
        }
        tracing::info!("Main read task stopped");

        run.state.finish(RunOutcome::Cancelled);
        run.state.sink.close().await;
        self.stopping.store(false, Ordering::Release);

        let elapsed = started.elapsed();
        record_stop_duration(elapsed.as_secs_f64() * 1000.0);
        tracing::info!("All tasks stopped successfully in {elapsed:?}");

        StopReport {
            stopped: true,
            run_id: Some(run.state.id),
            outcome: run.state.outcome(),
            bytes_committed: run.state.bytes_committed(),
            elapsed,
        }
    }
}

/// Cleans up a run whose reader already exited on its own.
async fn reap(run: ActiveRun) {
    if let Err(e) = run.reader.await {
        tracing::error!("Reader task for run {} died: {e}", run.state.id);
    }
    run.state.sink.close().await;
}

/// Body of the reader task: read to the end, record the outcome, close the
/// sink.
async fn drive_reader(state: Arc<RunState>, source: File) {
    let outcome = match read_chunks(&state, source).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!("Run {} failed: {e}", state.id);
            increment_runs_failed();
            RunOutcome::Failed {
                error: e.to_string(),
            }
        }
    };
    state.finish(outcome);

    if state.sink.close().await {
        tracing::debug!("Sink closed by reader");
    }

    tracing::info!(
        chunks = state.chunks_read(),
        bytes = state.bytes_committed(),
        emit_errors = state.emit_errors(),
        "Reader finished: {:?}",
        state.outcome()
    );
}

/// Opens the source read-only, returning it with its size.
async fn open_source(path: &Path) -> Result<(File, u64)> {
    let display = || path.display().to_string();
    let unreadable = |e: std::io::Error| Error::SourceUnreadable {
        path: display(),
        reason: e.to_string(),
    };

    let meta = match tokio::fs::metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::SourceNotFound { path: display() });
        }
        Err(e) => return Err(unreadable(e)),
    };
    if !meta.is_file() {
        return Err(Error::SourceUnreadable {
            path: display(),
            reason: "not a regular file".to_string(),
        });
    }

    let file = File::open(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::SourceNotFound { path: display() },
        _ => unreadable(e),
    })?;
    Ok((file, meta.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use logfan_core::EmitMode;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        controller: RunController,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let controller = RunController::new(ControllerSettings {
                log_dir: dir.path().join("logs"),
                output_dir: dir.path().join("out"),
            });
            std::fs::create_dir_all(dir.path().join("logs")).unwrap();
            Self { dir, controller }
        }

        fn source(&self, name: &str, len: usize) {
            let data: Vec<u8> = (0..len).map(|i| b'a' + (i % 26) as u8).collect();
            std::fs::write(self.dir.path().join("logs").join(name), data).unwrap();
        }

        fn outputs(&self) -> Vec<PathBuf> {
            match std::fs::read_dir(self.dir.path().join("out")) {
                Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
                Err(_) => Vec::new(),
            }
        }

        async fn wait_finished(&self) -> RunOutcome {
            let state = self.controller.current_run().unwrap();
            for _ in 0..500 {
                if let Some(outcome) = state.outcome() {
                    return outcome;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("run did not finish");
        }
    }

    fn config(source: &str, chunk_size: usize, workers: usize) -> RunConfig {
        RunConfig {
            chunk_size,
            workers,
            delay: Duration::ZERO,
            to_file: false,
            source: source.to_string(),
            mode: EmitMode::Replicate,
        }
    }

    #[tokio::test]
    async fn runs_to_end_of_file() {
        let fx = Fixture::new();
        fx.source("part_aa.log", 10_000);

        let status = fx
            .controller
            .start(config("part_aa.log", 4096, 2))
            .await
            .unwrap();
        assert_eq!(status.run_id, Some(1));

        assert_eq!(fx.wait_finished().await, RunOutcome::Completed);
        let status = fx.controller.status();
        assert_eq!(status.phase, RunPhase::Idle);
        assert_eq!(status.chunks_read, 3);
        assert_eq!(status.bytes_committed, 20_000);
        assert!(fx.controller.current_run().unwrap().sink.is_closed());
    }

    #[tokio::test]
    async fn file_mode_writes_every_copy() {
        let fx = Fixture::new();
        fx.source("part_aa.log", 5_000);
        let mut cfg = config("part_aa.log", 1024, 3);
        cfg.to_file = true;

        fx.controller.start(cfg).await.unwrap();
        assert_eq!(fx.wait_finished().await, RunOutcome::Completed);

        let outputs = fx.outputs();
        assert_eq!(outputs.len(), 1);
        assert_eq!(std::fs::read(&outputs[0]).unwrap().len(), 15_000);
    }

    #[tokio::test]
    async fn missing_source_fails_without_output() {
        let fx = Fixture::new();
        let mut cfg = config("part_aa.log", 4096, 2);
        cfg.to_file = true;

        let err = fx.controller.start(cfg).await.unwrap_err();

        assert!(matches!(err, Error::SourceNotFound { .. }));
        assert!(fx.outputs().is_empty());
        assert_eq!(fx.controller.phase(), RunPhase::Idle);
    }

    #[tokio::test]
    async fn start_then_stop_then_start_again() {
        let fx = Fixture::new();
        fx.source("part_aa.log", 1_000_000);
        let mut cfg = config("part_aa.log", 16, 2);
        cfg.to_file = true;

        fx.controller.start(cfg.clone()).await.unwrap();
        let report = fx.controller.stop().await;
        assert!(report.stopped);

        let first = fx.controller.current_run().unwrap();
        assert!(first.sink.is_closed());
        assert!(first.reader_token().is_cancelled());
        assert!(first.stop_requested());
        assert_eq!(fx.controller.phase(), RunPhase::Idle);

        assert_eq!(first.bytes_committed() % 16, 0);

        let status = fx.controller.start(cfg).await.unwrap();
        assert_eq!(status.run_id, Some(2));
        assert_eq!(status.bytes_committed, 0);
        fx.controller.stop().await;
    }

    #[tokio::test]
    async fn second_stop_is_a_noop() {
        let fx = Fixture::new();
        fx.source("part_aa.log", 100_000);
        fx.controller
            .start(config("part_aa.log", 8, 1))
            .await
            .unwrap();

        assert!(fx.controller.stop().await.stopped);
        let again = fx.controller.stop().await;
        assert!(!again.stopped);
        assert_eq!(again.message(), "No active run; nothing to stop.");
    }

    #[tokio::test]
    async fn stop_without_any_run() {
        let fx = Fixture::new();
        assert_eq!(fx.controller.stop().await, StopReport::idle());
        assert_eq!(fx.controller.status(), RunStatus::default());
    }

    #[tokio::test]
    async fn concurrent_stops_do_not_deadlock() {
        let fx = Fixture::new();
        fx.source("part_aa.log", 100_000);
        let mut cfg = config("part_aa.log", 64, 2);
        cfg.delay = Duration::from_millis(100);
        fx.controller.start(cfg).await.unwrap();

        let (a, b) = tokio::join!(fx.controller.stop(), fx.controller.stop());
        assert!(a.stopped ^ b.stopped);
        assert!(fx.controller.current_run().unwrap().sink.is_closed());
    }

    #[tokio::test]
    async fn start_while_running_is_rejected() {
        let fx = Fixture::new();
        fx.source("part_aa.log", 100_000);
        fx.source("part_ab.log", 10);
        let mut cfg = config("part_aa.log", 64, 1);
        cfg.delay = Duration::from_millis(50);
        fx.controller.start(cfg).await.unwrap();

        let err = fx
            .controller
            .start(config("part_ab.log", 64, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RunInProgress { .. }));

        let current = fx.controller.current_run().unwrap();
        assert_eq!(current.config.source, "part_aa.log");
        assert_eq!(fx.controller.phase(), RunPhase::Running);
        fx.controller.stop().await;
    }

    #[tokio::test]
    async fn stop_waits_for_in_flight_delay() {
        let fx = Fixture::new();
        fx.source("part_aa.log", 64);
        let delay = Duration::from_millis(300);
        let mut cfg = config("part_aa.log", 16, 3);
        cfg.delay = delay;

        fx.controller.start(cfg).await.unwrap();
        // Let the first group get past its cancellation check.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let report = fx.controller.stop().await;

        assert!(report.elapsed >= delay - Duration::from_millis(100));
        assert!(report.elapsed < delay + Duration::from_millis(500));
        // The in-flight group finished; nothing after it was dispatched.
        let state = fx.controller.current_run().unwrap();
        assert_eq!(state.chunks_read(), 1);
        assert_eq!(state.bytes_committed(), 48);
        assert_eq!(report.outcome, Some(RunOutcome::Cancelled));
    }

    #[tokio::test]
    async fn finished_run_allows_new_start() {
        let fx = Fixture::new();
        fx.source("part_aa.log", 100);
        fx.controller
            .start(config("part_aa.log", 10, 2))
            .await
            .unwrap();
        fx.wait_finished().await;

        let status = fx
            .controller
            .start(config("part_aa.log", 10, 2))
            .await
            .unwrap();
        assert_eq!(status.run_id, Some(2));
        fx.wait_finished().await;

        let report = fx.controller.stop().await;
        assert!(report.stopped);
        assert_eq!(report.outcome, Some(RunOutcome::Completed));
        assert!(report.message().contains("end of file"));
    }

    #[tokio::test]
    async fn shutdown_refuses_new_runs() {
        let fx = Fixture::new();
        fx.source("part_aa.log", 100);
        fx.controller.shutdown().await;
        assert_eq!(
            fx.controller
                .start(config("part_aa.log", 10, 1))
                .await
                .unwrap_err(),
            Error::ServiceShutdown
        );
    }

    #[tokio::test]
    async fn directory_source_is_rejected() {
        let fx = Fixture::new();
        std::fs::create_dir_all(fx.dir.path().join("logs").join("nested.log")).unwrap();
        let err = fx
            .controller
            .start(config("nested.log", 10, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SourceUnreadable { .. }));
    }
}
