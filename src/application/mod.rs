//! Application services: export orchestration and live preview.

pub mod error;
pub mod export;
pub mod render;
