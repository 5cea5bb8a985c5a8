use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use super::format::ExportFormat;

/// A converted document ready to be streamed back to the caller.
#[derive(Debug, Clone)]
pub struct ExportedDocument {
    pub format: ExportFormat,
    pub bytes: Bytes,
}

impl ExportedDocument {
    pub fn new(format: ExportFormat, bytes: Bytes) -> Self {
        Self { format, bytes }
    }
}

/// Failures surfaced by the export pipeline.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("converter unavailable at `{binary}`: {source}")]
    ConverterUnavailable {
        binary: String,
        #[source]
        source: io::Error,
    },
    #[error("conversion failed (exit {exit_code:?}): {stderr}")]
    ConverterFailed {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("converter exited successfully but produced no {format} output")]
    MissingOutput { format: ExportFormat },
    #[error("conversion timed out after {seconds}s")]
    Timeout { seconds: u64 },
    #[error("export worker pool is shut down")]
    PoolClosed,
    #[error("io error during conversion: {0}")]
    Io(#[from] io::Error),
}

impl ExportError {
    /// Short machine-readable tag used in logs and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            ExportError::ConverterUnavailable { .. } => "converter_unavailable",
            ExportError::ConverterFailed { .. } => "converter_failed",
            ExportError::MissingOutput { .. } => "missing_output",
            ExportError::Timeout { .. } => "timeout",
            ExportError::PoolClosed => "pool_closed",
            ExportError::Io(_) => "io",
        }
    }
}

/// Turns normalised Markdown into a finished document.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    async fn convert(&self, markdown: &str, format: ExportFormat) -> Result<Bytes, ExportError>;
}
