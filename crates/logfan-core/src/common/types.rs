//! # Run Configuration and Wire Types
//!
//! This module defines the types shared between the engine and the HTTP
//! control plane: the immutable parameters of a run, the unit of work handed
//! to a worker group, and the JSON bodies exchanged with clients.
//!
//! ## Overview
//!
//! - [`RunConfig`] - validated, immutable parameters of one run
//! - [`EmitMode`] - whether a worker group replicates or splits its chunk
//! - [`Chunk`] - one slice of the source file, tagged with its read order
//! - [`StartRequest`] - the `/start` body, resolved against [`RunDefaults`]
//! - [`MetricsSnapshot`] and [`RunStatus`] - read-only views of a run
//!
//! ## Accounting
//!
//! A worker group commits bytes only after every emitter in it has finished.
//! In [`EmitMode::Replicate`] each delivering emitter counts the full chunk,
//! so a run that reaches end of file commits `file_size × workers` bytes. In
//! [`EmitMode::Split`] the emitters share the chunk and the run commits
//! exactly `file_size` bytes.

use crate::{Error, Result};
use bytes::Bytes;
use core::time::Duration;
use serde::{Deserialize, Serialize};

/// Number of bytes in the "GB" unit reported by [`MetricsSnapshot`].
pub const BYTES_PER_GB: f64 = 1_000_000_000.0;

/// Largest accepted chunk size. The reader allocates one buffer of this size
/// per run.
pub const MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024;

/// Largest accepted worker count. Every chunk spawns this many emitter tasks.
pub const MAX_WORKERS: usize = 65_536;

/// How a chunk is distributed across the emitters of its worker group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmitMode {
    /// Every emitter delivers the whole chunk.
    #[default]
    Replicate,
    /// The chunk is cut into `workers` contiguous parts, one per emitter.
    Split,
}

impl EmitMode {
    pub const fn from_split(split: bool) -> Self {
        if split { Self::Split } else { Self::Replicate }
    }
}

/// Immutable parameters of a single run.
#[derive(Clone, Debug, PartialEq)]
pub struct RunConfig {
    /// Maximum number of bytes read per chunk.
    pub chunk_size: usize,
    /// Number of emitters dispatched for every chunk.
    pub workers: usize,
    /// Simulated processing time applied by each emitter after delivery.
    pub delay: Duration,
    /// Append chunks to an output file instead of logging them.
    pub to_file: bool,
    /// File name of the source, relative to the server's log directory.
    pub source: String,
    pub mode: EmitMode,
}

impl RunConfig {
    /// Checks the invariants the engine relies on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if the chunk size is zero or above
    /// [`MAX_CHUNK_SIZE`], the worker count is zero or above [`MAX_WORKERS`], or
    /// the source is not a plain file name.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(invalid("chunk must be greater than 0"));
        }
        if self.chunk_size > MAX_CHUNK_SIZE {
            return Err(invalid(format!(
                "chunk must be at most {MAX_CHUNK_SIZE} bytes, got {}",
                self.chunk_size
            )));
        }
        if self.workers == 0 {
            return Err(invalid("workers must be at least 1"));
        }
        if self.workers > MAX_WORKERS {
            return Err(invalid(format!(
                "workers must be at most {MAX_WORKERS}, got {}",
                self.workers
            )));
        }
        if self.source.trim().is_empty() {
            return Err(invalid("primaryLogFile must not be empty"));
        }
        if self.source.contains(['/', '\\']) || self.source == "." || self.source == ".." {
            return Err(invalid(format!(
                "primaryLogFile must be a plain file name, got {:?}",
                self.source
            )));
        }
        Ok(())
    }

    /// Bytes committed for one chunk when every emitter delivers.
    pub const fn committed_per_chunk(&self, chunk_len: usize) -> u64 {
        match self.mode {
            EmitMode::Replicate => (chunk_len as u64) * (self.workers as u64),
            EmitMode::Split => chunk_len as u64,
        }
    }
}

fn invalid(reason: impl Into<String>) -> Error {
    Error::InvalidRequest {
        reason: reason.into(),
    }
}

/// One slice of the source file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    /// 1-based position in read order.
    pub index: u64,
    pub bytes: Bytes,
}

impl Chunk {
    pub const fn new(index: u64, bytes: Bytes) -> Self {
        Self { index, bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Cuts `bytes` into `parts` contiguous, zero-copy slices.
///
/// Every slice holds `len / parts` bytes except the last, which also takes
/// the remainder. When `len < parts` the leading slices are empty.
pub fn split_payload(bytes: &Bytes, parts: usize) -> Vec<Bytes> {
    if parts == 0 {
        return Vec::new();
    }
    let size = bytes.len() / parts;
    (0..parts)
        .map(|i| {
            let start = i * size;
            let end = if i == parts - 1 { bytes.len() } else { start + size };
            bytes.slice(start..end)
        })
        .collect()
}

/// The payload each emitter of a worker group receives, indexed by ordinal.
pub fn payloads_for(mode: EmitMode, chunk: &Chunk, workers: usize) -> Vec<Bytes> {
    match mode {
        EmitMode::Replicate => vec![chunk.bytes.clone(); workers],
        EmitMode::Split => split_payload(&chunk.bytes, workers),
    }
}

/// Server-side fallbacks for fields a [`StartRequest`] leaves out.
#[derive(Clone, Debug, PartialEq)]
pub struct RunDefaults {
    pub chunk_size: usize,
    pub workers: usize,
    pub delay_secs: f64,
    pub source: String,
    pub split: bool,
}

impl Default for RunDefaults {
    fn default() -> Self {
        Self {
            chunk_size: 4096,
            workers: 4,
            delay_secs: 0.0,
            source: "part_aa.log".to_string(),
            split: false,
        }
    }
}

/// Body of `POST /start`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StartRequest {
    pub chunk: Option<usize>,
    pub workers: Option<usize>,
    /// Seconds; fractional values are honoured.
    pub delay: Option<f64>,
    pub tofile: Option<bool>,
    #[serde(rename = "primaryLogFile")]
    pub primary_log_file: Option<String>,
    pub split: Option<bool>,
}

impl StartRequest {
    /// Fills in missing fields from `defaults` and validates the result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] for a negative or non-finite delay,
    /// or any violation reported by [`RunConfig::validate`].
    pub fn resolve(self, defaults: &RunDefaults) -> Result<RunConfig> {
        let delay_secs = self.delay.unwrap_or(defaults.delay_secs);
        let delay = Duration::try_from_secs_f64(delay_secs).map_err(|_| {
            invalid(format!(
                "delay must be a finite, non-negative number of seconds, got {delay_secs}"
            ))
        })?;

        let config = RunConfig {
            chunk_size: self.chunk.unwrap_or(defaults.chunk_size),
            workers: self.workers.unwrap_or(defaults.workers),
            delay,
            to_file: self.tofile.unwrap_or(false),
            source: self
                .primary_log_file
                .unwrap_or_else(|| defaults.source.clone()),
            mode: EmitMode::from_split(self.split.unwrap_or(defaults.split)),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Body of `GET /metrics`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime: String,
    #[serde(rename = "bytes_written (GB)")]
    pub bytes_written_gb: f64,
    #[serde(rename = "throughput (GB/s)")]
    pub throughput_gbps: f64,
}

/// Lifecycle phase of the run controller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    #[default]
    Idle,
    Running,
    Stopping,
}

/// How a run ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum RunOutcome {
    /// The reader reached end of file.
    Completed,
    /// A stop request ended the run.
    Cancelled,
    /// The reader failed; the run ended early.
    Failed { error: String },
}

/// Body of `GET /status`: the current run, or the last one if none is active.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub phase: RunPhase,
    pub run_id: Option<u64>,
    pub source: Option<String>,
    pub output: Option<String>,
    pub mode: Option<EmitMode>,
    pub workers: Option<usize>,
    pub chunk_size: Option<usize>,
    pub chunks_read: u64,
    pub bytes_committed: u64,
    pub emit_errors: u64,
    pub stop_requested: bool,
    pub outcome: Option<RunOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(mode: EmitMode) -> RunConfig {
        RunConfig {
            chunk_size: 4096,
            workers: 2,
            delay: Duration::ZERO,
            to_file: false,
            source: "part_aa.log".to_string(),
            mode,
        }
    }

    #[test]
    fn validate_rejects_zero_chunk_and_workers() {
        let mut cfg = config(EmitMode::Replicate);
        cfg.chunk_size = 0;
        assert!(matches!(cfg.validate(), Err(Error::InvalidRequest { .. })));

        let mut cfg = config(EmitMode::Replicate);
        cfg.workers = 0;
        assert!(matches!(cfg.validate(), Err(Error::InvalidRequest { .. })));

        let mut cfg = config(EmitMode::Replicate);
        cfg.workers = MAX_WORKERS + 1;
        assert!(matches!(cfg.validate(), Err(Error::InvalidRequest { .. })));

        cfg.workers = MAX_WORKERS;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn resolve_rejects_huge_worker_count() {
        let request: StartRequest = serde_json::from_str(
            r#"{"chunk":4096,"workers":1000000000000,"primaryLogFile":"part_aa.log"}"#,
        )
        .unwrap();
        assert!(matches!(
            request.resolve(&RunDefaults::default()),
            Err(Error::InvalidRequest { .. })
        ));
    }

    #[test]
    fn validate_rejects_paths() {
        for source in ["../etc/passwd", "a/b.log", "..", "", "  "] {
            let mut cfg = config(EmitMode::Replicate);
            cfg.source = source.to_string();
            assert!(cfg.validate().is_err(), "accepted {source:?}");
        }
        assert!(config(EmitMode::Split).validate().is_ok());
    }

    #[test]
    fn split_gives_remainder_to_last_part() {
        let bytes = Bytes::from_static(b"abcdefghij");
        let parts = split_payload(&bytes, 3);
        assert_eq!(parts, vec![&b"abc"[..], &b"def"[..], &b"ghij"[..]]);
        assert_eq!(parts.iter().map(Bytes::len).sum::<usize>(), bytes.len());
    }

    #[test]
    fn split_with_more_parts_than_bytes() {
        let bytes = Bytes::from_static(b"ab");
        let parts = split_payload(&bytes, 4);
        assert_eq!(parts.len(), 4);
        assert!(parts[..3].iter().all(Bytes::is_empty));
        assert_eq!(parts[3], &b"ab"[..]);
    }

    #[test]
    fn replicate_payloads_share_the_chunk() {
        let chunk = Chunk::new(1, Bytes::from_static(b"line\n"));
        let payloads = payloads_for(EmitMode::Replicate, &chunk, 3);
        assert_eq!(payloads.len(), 3);
        assert!(payloads.iter().all(|p| *p == chunk.bytes));
    }

    #[test]
    fn committed_bytes_follow_mode() {
        assert_eq!(config(EmitMode::Replicate).committed_per_chunk(1808), 3616);
        assert_eq!(config(EmitMode::Split).committed_per_chunk(1808), 1808);
    }

    #[test]
    fn start_request_uses_wire_names_and_defaults() {
        let req: StartRequest = serde_json::from_str(
            r#"{"chunk":1024,"workers":3,"delay":0.5,"tofile":true,"primaryLogFile":"part_ab.log"}"#,
        )
        .unwrap();
        let cfg = req.resolve(&RunDefaults::default()).unwrap();
        assert_eq!(cfg.chunk_size, 1024);
        assert_eq!(cfg.workers, 3);
        assert_eq!(cfg.delay, Duration::from_millis(500));
        assert!(cfg.to_file);
        assert_eq!(cfg.source, "part_ab.log");
        assert_eq!(cfg.mode, EmitMode::Replicate);

        let cfg = StartRequest::default()
            .resolve(&RunDefaults::default())
            .unwrap();
        assert_eq!(cfg.chunk_size, 4096);
        assert_eq!(cfg.source, "part_aa.log");
        assert!(!cfg.to_file);
    }

    #[test]
    fn start_request_rejects_negative_delay() {
        let req = StartRequest {
            delay: Some(-1.0),
            ..StartRequest::default()
        };
        assert!(matches!(
            req.resolve(&RunDefaults::default()),
            Err(Error::InvalidRequest { .. })
        ));
    }

    #[test]
    fn metrics_snapshot_wire_names() {
        let snapshot = MetricsSnapshot {
            uptime: "1.5s".to_string(),
            bytes_written_gb: 0.00002,
            throughput_gbps: 0.0,
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["uptime"], "1.5s");
        assert_eq!(json["bytes_written (GB)"], 0.00002);
        assert!(json.get("throughput (GB/s)").is_some());
    }

    #[test]
    fn outcome_is_tagged() {
        let json = serde_json::to_value(RunOutcome::Failed {
            error: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["error"], "boom");
    }
}
