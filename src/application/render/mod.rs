//! Live preview rendering for the editor page.
//!
//! The pipeline is pure apart from the on-disk diagram cache: Markdown in,
//! sanitised HTML out, with structured errors for the caller to map.

mod service;
mod types;

pub use service::PreviewRenderer;
pub use types::{PreviewOutput, RenderError};
