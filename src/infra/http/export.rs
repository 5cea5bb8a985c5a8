use axum::{
    Form,
    extract::{Query, State},
    http::{
        HeaderValue, StatusCode,
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::application::{
    error::HttpError,
    export::{ExportError, ExportFormat, ExportedDocument},
};

use super::{HttpState, public::EditorForm};

const SOURCE: &str = "infra::http::export";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(super) struct ExportQuery {
    #[serde(rename = "type")]
    kind: Option<String>,
}

pub(super) async fn export_document(
    State(state): State<HttpState>,
    Query(query): Query<ExportQuery>,
    Form(form): Form<EditorForm>,
) -> Response {
    let format = match query.kind.as_deref() {
        None => ExportFormat::default(),
        Some(raw) => match raw.parse::<ExportFormat>() {
            Ok(format) => format,
            Err(err) => {
                return HttpError::from_error(
                    SOURCE,
                    StatusCode::BAD_REQUEST,
                    "unknown export type",
                    &err,
                )
                .into_response();
            }
        },
    };

    match state.exports.export(&form.markdown_input, format).await {
        Ok(document) => attachment_response(document),
        Err(err) => export_error_response(&err),
    }
}

fn attachment_response(document: ExportedDocument) -> Response {
    let disposition = format!("attachment; filename=\"{}\"", document.format.download_name());
    let mut response = document.bytes.into_response();
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(document.format.mime()));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(CONTENT_DISPOSITION, value);
    }
    response
}

pub(super) fn export_status(err: &ExportError) -> StatusCode {
    match err {
        ExportError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        ExportError::PoolClosed => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Failures become `{"error": "..."}` with the converter's message.
fn export_error_response(err: &ExportError) -> Response {
    HttpError::json(SOURCE, export_status(err), err).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_map_to_gateway_timeout() {
        assert_eq!(
            export_status(&ExportError::Timeout { seconds: 120 }),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn converter_failures_map_to_internal_error() {
        let err = ExportError::ConverterFailed {
            exit_code: Some(1),
            stderr: "boom".to_string(),
        };
        assert_eq!(export_status(&err), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            export_status(&ExportError::MissingOutput {
                format: ExportFormat::Pdf
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn attachment_carries_format_headers() {
        let response = attachment_response(ExportedDocument::new(
            ExportFormat::Docx,
            bytes::Bytes::from_static(b"PK"),
        ));

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[CONTENT_DISPOSITION],
            "attachment; filename=\"output.docx\""
        );
        assert_eq!(response.headers()[CONTENT_TYPE], ExportFormat::Docx.mime());
    }
}
