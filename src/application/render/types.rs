use serde::Serialize;
use thiserror::Error;

/// Sanitised preview fragment plus what the rewrite stage found in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewOutput {
    pub html: String,
    pub contains_code: bool,
    pub contains_math: bool,
    pub contains_mermaid: bool,
}

/// Structured errors surfaced by the preview pipeline.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("markdown rendering failed: {message}")]
    Markdown { message: String },
    #[error("syntax highlighting failed: {language}: {message}")]
    Highlighting { language: String, message: String },
    #[error("document processing failed: {message}")]
    Document { message: String },
}
