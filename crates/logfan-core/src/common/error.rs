//! Error types for the chunk fan-out service.
//!
//! This module defines the central `Error` enum, which captures every
//! recoverable and reportable failure of a run and of the HTTP control plane.
//! It implements [`IntoResponse`] so handlers can return it directly and have
//! it rendered with an appropriate status code and a plain-text description.
//!
//! ## Error Cases
//! - `InvalidRequest`: The start request was malformed or out of bounds.
//! - `SourceNotFound`: The source file does not exist.
//! - `SourceUnreadable`: The source file exists but cannot be used.
//! - `SinkOpen`: The output file for a run could not be created.
//! - `SinkWrite`: An emitter failed to write its chunk to the output file.
//! - `SinkClosed`: A write arrived after the run's sink was closed.
//! - `RunInProgress`: A start arrived while another run is still active.
//! - `Read`: The reader hit an I/O error other than end of stream.
//! - `Encode`: A response body could not be serialized.
//! - `ServiceShutdown`: The process is shutting down.
//! - `Internal`: A lifecycle task died unexpectedly.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the chunk fan-out service.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The start request was invalid or exceeded constraints.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The source file does not exist.
    #[error("Source file not found: {path}")]
    SourceNotFound { path: String },

    /// The source file exists but cannot be opened or is not a regular file.
    #[error("Source file {path} is unusable: {reason}")]
    SourceUnreadable { path: String, reason: String },

    /// The output file could not be created.
    #[error("Failed to open output file {path}: {reason}")]
    SinkOpen { path: String, reason: String },

    /// Writing a chunk to the output file failed.
    #[error("Failed to write chunk {chunk_index}: {reason}")]
    SinkWrite { chunk_index: u64, reason: String },

    /// The sink was already closed when a write arrived.
    #[error("Sink is closed")]
    SinkClosed,

    /// Another run is still active.
    #[error("A run is already in progress (source: {source_file})")]
    RunInProgress { source_file: String },

    /// Reading the source failed with something other than end of stream.
    #[error("Failed to read chunk {chunk_index}: {reason}")]
    Read { chunk_index: u64, reason: String },

    /// A response body could not be encoded.
    #[error("Encoding error: {reason}")]
    Encode { reason: String },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,

    /// A lifecycle task panicked or was aborted.
    #[error("Internal error: {reason}")]
    Internal { reason: String },
}

impl Error {
    /// The HTTP status a client sees for this error.
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest { .. } | Self::SourceUnreadable { .. } => StatusCode::BAD_REQUEST,
            Self::SourceNotFound { .. } => StatusCode::NOT_FOUND,
            Self::RunInProgress { .. } => StatusCode::CONFLICT,
            Self::ServiceShutdown => StatusCode::SERVICE_UNAVAILABLE,
            Self::SinkOpen { .. }
            | Self::SinkWrite { .. }
            | Self::SinkClosed
            | Self::Read { .. }
            | Self::Encode { .. }
            | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}
