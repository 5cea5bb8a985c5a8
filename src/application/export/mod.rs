//! Markdown to DOCX/PDF export through Pandoc.

mod format;
mod normalize;
mod pandoc;
mod service;
mod types;

pub use format::{ExportFormat, UnknownFormat};
pub use normalize::{normalize_for_export, normalize_for_preview};
pub use pandoc::PandocConverter;
pub use service::ExportService;
pub use types::{DocumentConverter, ExportError, ExportedDocument};
