use super::sink::Sink;
use crate::server::telemetry::increment_emit_errors;
use bytes::Bytes;
use core::time::Duration;
use tokio_util::sync::CancellationToken;

/// One unit of work for an emitter.
#[derive(Clone, Debug)]
pub struct EmitJob {
    /// Ordinal within the worker group, `0..workers`.
    pub worker: usize,
    pub chunk_index: u64,
    pub payload: Bytes,
    pub delay: Duration,
}

/// What an emitter did with its job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmitOutcome {
    /// The payload reached the sink; carries the number of bytes delivered.
    Delivered(usize),
    /// Cancellation was observed before delivery.
    Skipped,
    /// The sink rejected the payload.
    Failed,
}

/// Delivers `job` to `sink` at most once.
///
/// The worker token is checked once, at entry. An emitter that gets past the
/// check delivers and then sleeps out its full delay even if cancellation is
/// raised meanwhile, so a stop waits for at most one delay per in-flight
/// emitter. Sink errors are logged and reported as [`EmitOutcome::Failed`];
/// they never affect the other emitters of the group.
pub async fn emit(job: EmitJob, sink: &Sink, cancel: &CancellationToken) -> EmitOutcome {
    if cancel.is_cancelled() {
        tracing::debug!(
            "Stopping writing worker {} for chunk {}",
            job.worker,
            job.chunk_index
        );
        return EmitOutcome::Skipped;
    }

    tracing::trace!(
        "Starting worker {} for chunk index {}",
        job.worker,
        job.chunk_index
    );

    let outcome = match sink.deliver(job.worker, job.chunk_index, &job.payload).await {
        Ok(()) => EmitOutcome::Delivered(job.payload.len()),
        Err(e) => {
            tracing::warn!("Worker {} failed to deliver: {e}", job.worker);
            increment_emit_errors();
            EmitOutcome::Failed
        }
    };

    if !job.delay.is_zero() {
        tokio::time::sleep(job.delay).await;
    }

    tracing::trace!(
        "Shutting down worker {} for chunk index {}",
        job.worker,
        job.chunk_index
    );
    outcome
}
