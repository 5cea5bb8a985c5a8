use axum::{
    Form,
    extract::State,
    http::{
        HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_TYPE},
    },
    response::{Html, IntoResponse, Response},
};
use serde::Deserialize;
use tracing::debug;

use crate::{
    application::error::HttpError,
    presentation::views::{IndexTemplate, render_template_response},
};

use super::HttpState;

const PREVIEW_SOURCE: &str = "infra::http::preview";

/// Form body posted by the editor page.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(super) struct EditorForm {
    pub(super) markdown_input: String,
}

pub(super) async fn index() -> Response {
    render_template_response(IndexTemplate::default(), StatusCode::OK)
}

pub(super) async fn preview(State(state): State<HttpState>, Form(form): Form<EditorForm>) -> Response {
    let renderer = state.preview.clone();
    let task = tokio::task::spawn_blocking(move || renderer.render(&form.markdown_input));

    let rendered = match tokio::time::timeout(state.preview_timeout, task).await {
        Ok(joined) => joined,
        Err(elapsed) => {
            return HttpError::from_error(
                PREVIEW_SOURCE,
                StatusCode::GATEWAY_TIMEOUT,
                "Preview rendering timed out",
                &elapsed,
            )
            .into_response();
        }
    };

    match rendered {
        Ok(Ok(output)) => {
            debug!(
                target = "infra::http::preview",
                html_bytes = output.html.len(),
                contains_code = output.contains_code,
                contains_math = output.contains_math,
                contains_mermaid = output.contains_mermaid,
                "Preview rendered"
            );
            Html(output.html).into_response()
        }
        Ok(Err(err)) => HttpError::from_error(
            PREVIEW_SOURCE,
            StatusCode::INTERNAL_SERVER_ERROR,
            "Preview rendering failed",
            &err,
        )
        .into_response(),
        Err(join_err) => HttpError::from_error(
            PREVIEW_SOURCE,
            StatusCode::INTERNAL_SERVER_ERROR,
            "Preview rendering failed",
            &join_err,
        )
        .into_response(),
    }
}

pub(super) async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

pub(super) async fn highlight_css(State(state): State<HttpState>) -> Response {
    let mut response = state.preview.highlight_css().to_string().into_response();
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/css; charset=utf-8"),
    );
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("public, max-age=3600"));
    response
}
