//! Chunk reader: the loop that turns the source file into worker groups.
//!
//! The reader owns the source handle. It reads fixed-size chunks in file
//! order and, for each non-empty chunk, spawns exactly `workers` emitters on
//! the run's task tracker. It then waits for the whole group before reading
//! again, so at most one chunk's group is alive at any time and chunk `i + 1`
//! is never delivered before chunk `i` has been delivered by every emitter.
//!
//! ## Exit conditions
//!
//! - End of stream: [`RunOutcome::Completed`].
//! - Reader token cancelled (checked at the top of the loop and raced against
//!   every read): [`RunOutcome::Cancelled`].
//! - Worker token cancelled: nothing more is dispatched. The reader parks
//!   until the reader token follows, which the second phase of a stop
//!   guarantees, then exits with [`RunOutcome::Cancelled`].
//! - Any other read error: [`Error::Read`].

use super::{
    emitter::{EmitJob, EmitOutcome, emit},
    state::RunState,
};
use crate::server::telemetry::record_chunk_committed;
use bytes::Bytes;
use futures::future::join_all;
use logfan_core::{Chunk, Error, Result, RunOutcome, payloads_for};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Per-group tally, used for accounting and logs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GroupReport {
    pub committed: u64,
    pub delivered: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Runs the read loop until end of stream, cancellation or a read error.
///
/// # Errors
///
/// Returns [`Error::Read`] if the source fails with anything other than end
/// of stream. Emitter failures are counted on the run, never returned.
pub async fn read_chunks<R>(state: &Arc<RunState>, mut source: R) -> Result<RunOutcome>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0_u8; state.config.chunk_size];
    let mut index = 0_u64;

    loop {
        if state.reader_token().is_cancelled() {
            tracing::info!("Stopping reader after {index} chunks");
            return Ok(RunOutcome::Cancelled);
        }

        if state.worker_token().is_cancelled() {
            tracing::debug!("Workers cancelled, reader waiting for its own cancellation");
            state.reader_token().cancelled().await;
            tracing::info!("Stopping reader after {index} chunks");
            return Ok(RunOutcome::Cancelled);
        }

        let next = index + 1;
        let read = tokio::select! {
            biased;
            () = state.reader_token().cancelled() => {
                tracing::info!("Stopping reader during read of chunk {next}");
                return Ok(RunOutcome::Cancelled);
            }
            read = fill_chunk(&mut source, &mut buf) => read,
        };

        let n = read.map_err(|e| Error::Read {
            chunk_index: next,
            reason: e.to_string(),
        })?;

        let chunk = Chunk::new(next, Bytes::copy_from_slice(&buf[..n]));
        if chunk.is_empty() {
            tracing::info!("Reached end of file after {index} chunks");
            return Ok(RunOutcome::Completed);
        }

        index = next;
        let report = dispatch_group(state, &chunk).await;

        tracing::debug!(
            chunk = index,
            len = chunk.len(),
            delivered = report.delivered,
            skipped = report.skipped,
            failed = report.failed,
            "Total bytes written: {}",
            state.bytes_committed()
        );
    }
}

/// Reads until `buf` is full or the source is exhausted, so only the final
/// chunk of a file can be shorter than the chunk size.
async fn fill_chunk<R>(source: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Spawns the worker group for `chunk`, waits for every emitter and commits
/// the delivered bytes to the run.
///
/// A group in which every emitter skipped (the stop landed between the read
/// and the dispatch) is not counted as a chunk.
pub async fn dispatch_group(state: &Arc<RunState>, chunk: &Chunk) -> GroupReport {
    dispatch_with(state, chunk, |job, state| async move {
        emit(job, &state.sink, state.worker_token()).await
    })
    .await
}

async fn dispatch_with<F, Fut>(state: &Arc<RunState>, chunk: &Chunk, emitter: F) -> GroupReport
where
    F: Fn(EmitJob, Arc<RunState>) -> Fut,
    Fut: Future<Output = EmitOutcome> + Send + 'static,
{
    let payloads = payloads_for(state.config.mode, chunk, state.config.workers);

    let handles: Vec<_> = payloads
        .into_iter()
        .enumerate()
        .map(|(worker, payload)| {
            let job = EmitJob {
                worker,
                chunk_index: chunk.index,
                payload,
                delay: state.config.delay,
            };
            state.workers().spawn(emitter(job, Arc::clone(state)))
        })
        .collect();

    let mut report = GroupReport::default();
    for result in join_all(handles).await {
        match result {
            Ok(EmitOutcome::Delivered(bytes)) => {
                report.delivered += 1;
                report.committed += bytes as u64;
            }
            Ok(EmitOutcome::Skipped) => report.skipped += 1,
            Ok(EmitOutcome::Failed) => report.failed += 1,
            Err(e) => {
                tracing::error!("Emitter for chunk {} died: {e}", chunk.index);
                report.failed += 1;
            }
        }
    }

    state.record_emit_errors(report.failed as u64);
    if report.delivered + report.failed == 0 {
        return report;
    }

    state.commit_chunk(report.committed);
    record_chunk_committed(report.committed);

    let expected = state.config.committed_per_chunk(chunk.len());
    if report.committed < expected {
        tracing::debug!(
            "Chunk {} committed {} of {expected} bytes",
            chunk.index,
            report.committed
        );
    }
    report
}
