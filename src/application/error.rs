use std::error::Error as StdError;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::{application::export::ExportError, infra::error::InfraError};

/// Diagnostic chain attached to failed responses and logged by the HTTP
/// middleware. Never sent to the client.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self { source, messages }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug)]
enum PublicBody {
    Text(&'static str),
    Json(String),
}

/// Handler failure: a public body for the client plus an [`ErrorReport`].
#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    body: PublicBody,
    report: ErrorReport,
}

impl HttpError {
    /// Plain-text response carrying a fixed public message.
    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        error: &dyn StdError,
    ) -> Self {
        Self {
            status,
            body: PublicBody::Text(public_message),
            report: ErrorReport::from_error(source, error),
        }
    }

    /// `{"error": "<message>"}` response exposing the error's own message.
    pub fn json(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        Self {
            status,
            body: PublicBody::Json(error.to_string()),
            report: ErrorReport::from_error(source, error),
        }
    }

}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = match self.body {
            PublicBody::Text(message) => (self.status, message).into_response(),
            PublicBody::Json(message) => {
                (self.status, Json(json!({ "error": message }))).into_response()
            }
        };
        self.report.attach(&mut response);
        response
    }
}

/// Top-level failure surfaced by the binary entry points.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn report_collects_the_source_chain() {
        let err = ExportError::ConverterUnavailable {
            binary: "pandoc".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
        };
        let report = ErrorReport::from_error("test", &err);

        assert_eq!(report.messages.len(), 2);
        assert_eq!(report.messages[1], "no such file");
    }

    #[test]
    fn responses_carry_the_report_extension() {
        let err = io::Error::other("disk full");
        let response =
            HttpError::json("test", StatusCode::INTERNAL_SERVER_ERROR, &err).into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let report = response
            .extensions()
            .get::<ErrorReport>()
            .expect("report attached");
        assert_eq!(report.source, "test");
        assert_eq!(report.messages, vec!["disk full".to_string()]);
    }
}
