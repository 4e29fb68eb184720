//! Destination for emitted chunk bytes.
//!
//! A [`Sink`] is chosen once per run: either the log stream or an output file
//! created under the output directory and named after the run-start time.
//! File writes from concurrent emitters are serialized by an async mutex so
//! two chunks never interleave inside the file. Closing is idempotent; the
//! first close flushes and syncs the file, later calls are no-ops.

use chrono::{DateTime, Local};
use logfan_core::{Error, Result};
use portable_atomic::{AtomicBool, Ordering};
use std::path::{Path, PathBuf};
use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
    sync::Mutex,
};

/// Tracing target used for chunks delivered in log mode.
pub const EMIT_TARGET: &str = "logfan::emit";

enum SinkKind {
    Log,
    File {
        path: PathBuf,
        file: Mutex<Option<File>>,
    },
}

pub struct Sink {
    kind: SinkKind,
    closed: AtomicBool,
}

impl Sink {
    pub const fn log() -> Self {
        Self {
            kind: SinkKind::Log,
            closed: AtomicBool::new(false),
        }
    }

    /// Creates (or appends to) `<dir>/<YYYY-MM-DD_HH-MM-SS>.log`, creating
    /// `dir` if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SinkOpen`] if the directory or file cannot be created.
    pub async fn open_file(dir: &Path, started_at: DateTime<Local>) -> Result<Self> {
        let path = dir.join(output_file_name(started_at));
        let open_err = |e: std::io::Error| Error::SinkOpen {
            path: path.display().to_string(),
            reason: e.to_string(),
        };

        tokio::fs::create_dir_all(dir).await.map_err(open_err)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(open_err)?;

        tracing::info!("Writing chunks to {}", path.display());

        Ok(Self {
            kind: SinkKind::File {
                path,
                file: Mutex::new(Some(file)),
            },
            closed: AtomicBool::new(false),
        })
    }

    /// Path of the output file, if this is a file sink.
    pub fn path(&self) -> Option<&Path> {
        match &self.kind {
            SinkKind::Log => None,
            SinkKind::File { path, .. } => Some(path),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Delivers one payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SinkClosed`] once the sink has been closed and
    /// [`Error::SinkWrite`] if the file write fails.
    pub async fn deliver(&self, worker: usize, chunk_index: u64, payload: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(Error::SinkClosed);
        }

        match &self.kind {
            SinkKind::Log => {
                tracing::info!(
                    target: EMIT_TARGET,
                    worker,
                    chunk = chunk_index,
                    "{}",
                    String::from_utf8_lossy(payload)
                );
                Ok(())
            }
            SinkKind::File { file, .. } => {
                let mut guard = file.lock().await;
                let Some(file) = guard.as_mut() else {
                    return Err(Error::SinkClosed);
                };
                file.write_all(payload)
                    .await
                    .map_err(|e| Error::SinkWrite {
                        chunk_index,
                        reason: e.to_string(),
                    })
            }
        }
    }

    /// Closes the sink. Returns `true` only for the call that actually closed
    /// it.
    pub async fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        if let SinkKind::File { path, file } = &self.kind {
            // Taking the handle under the lock waits out any write in flight.
            let Some(mut file) = file.lock().await.take() else {
                return true;
            };
            if let Err(e) = file.flush().await {
                tracing::warn!("Failed to flush {}: {e}", path.display());
            }
            if let Err(e) = file.sync_all().await {
                tracing::warn!("Failed to sync {}: {e}", path.display());
            }
            tracing::debug!("Closed output file {}", path.display());
        }
        true
    }
}

/// Output file name for a run started at `started_at`.
pub fn output_file_name(started_at: DateTime<Local>) -> String {
    started_at.format("%Y-%m-%d_%H-%M-%S.log").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn file_name_uses_run_start_time() {
        let ts = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(output_file_name(ts), "2024-03-09_07-05-01.log");
    }

    #[tokio::test]
    async fn file_sink_appends_and_closes_once() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let sink = Sink::open_file(&out, Local::now()).await.unwrap();
        let path = sink.path().unwrap().to_path_buf();
        assert!(path.starts_with(&out));

        sink.deliver(0, 1, b"hello ").await.unwrap();
        sink.deliver(1, 1, b"world").await.unwrap();

        assert!(sink.close().await);
        assert!(!sink.close().await);
        assert!(sink.is_closed());

        let written = std::fs::read(&path).unwrap();
        assert_eq!(written, b"hello world");
    }

    #[tokio::test]
    async fn deliver_after_close_fails() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Sink::open_file(dir.path(), Local::now()).await.unwrap();
        sink.close().await;
        assert_eq!(sink.deliver(0, 1, b"late").await, Err(Error::SinkClosed));

        let log = Sink::log();
        assert!(log.close().await);
        assert_eq!(log.deliver(0, 1, b"late").await, Err(Error::SinkClosed));
    }

    #[tokio::test]
    async fn log_sink_has_no_path() {
        let sink = Sink::log();
        assert!(sink.path().is_none());
        sink.deliver(2, 7, b"line").await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_writes_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let sink = std::sync::Arc::new(Sink::open_file(dir.path(), Local::now()).await.unwrap());
        let payload = vec![b'x'; 64 * 1024];

        let writers: Vec<_> = (0..8)
            .map(|worker| {
                let sink = std::sync::Arc::clone(&sink);
                let mut payload = payload.clone();
                payload.fill(b'a' + worker as u8);
                tokio::spawn(async move { sink.deliver(worker, 1, &payload).await })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }
        sink.close().await;

        let written = std::fs::read(sink.path().unwrap()).unwrap();
        assert_eq!(written.len(), 8 * payload.len());
        for block in written.chunks(payload.len()) {
            assert!(block.iter().all(|b| *b == block[0]));
        }
    }
}
