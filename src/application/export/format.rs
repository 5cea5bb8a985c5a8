use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
const PDF_MIME: &str = "application/pdf";

/// Document formats the export pipeline can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Docx,
    Pdf,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown export type `{0}`")]
pub struct UnknownFormat(pub String);

impl ExportFormat {
    /// Writer name understood by `pandoc -t`.
    pub fn pandoc_target(self) -> &'static str {
        match self {
            ExportFormat::Docx => "docx",
            ExportFormat::Pdf => "pdf",
        }
    }

    pub fn extension(self) -> &'static str {
        self.pandoc_target()
    }

    pub fn mime(self) -> &'static str {
        match self {
            ExportFormat::Docx => DOCX_MIME,
            ExportFormat::Pdf => PDF_MIME,
        }
    }

    /// File name offered to browsers in the `Content-Disposition` header.
    pub fn download_name(self) -> &'static str {
        match self {
            ExportFormat::Docx => "output.docx",
            ExportFormat::Pdf => "output.pdf",
        }
    }

    pub fn as_str(self) -> &'static str {
        self.pandoc_target()
    }
}

impl FromStr for ExportFormat {
    type Err = UnknownFormat;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "docx" => Ok(ExportFormat::Docx),
            "pdf" => Ok(ExportFormat::Pdf),
            _ => Err(UnknownFormat(value.to_string())),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
