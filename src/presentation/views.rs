use askama::Template;
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};

use crate::application::error::HttpError;

/// Render an askama page with `status`, or a 500 carrying the template error.
pub fn render_template_response<T: Template>(template: T, status: StatusCode) -> Response {
    match template.render() {
        Ok(html) => (status, Html(html)).into_response(),
        Err(err) => HttpError::from_error(
            "presentation::views::render_template_response",
            StatusCode::INTERNAL_SERVER_ERROR,
            "Template rendering failed",
            &err,
        )
        .into_response(),
    }
}

/// Editor page with a Markdown textarea, live preview pane and export buttons.
#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub title: &'static str,
    pub formats: Vec<FormatLink>,
}

/// One export button on the editor page.
pub struct FormatLink {
    pub label: &'static str,
    pub query: &'static str,
}

impl Default for IndexTemplate {
    fn default() -> Self {
        Self {
            title: "Markdown Export",
            formats: vec![
                FormatLink {
                    label: "Word (.docx)",
                    query: "docx",
                },
                FormatLink {
                    label: "PDF (.pdf)",
                    query: "pdf",
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_page_links_every_format() {
        let html = IndexTemplate::default().render().expect("template renders");

        assert!(html.contains("name=\"markdown_input\""));
        assert!(html.contains("/export?type=docx"));
        assert!(html.contains("/export?type=pdf"));
        assert!(html.contains("/static/highlight.css"));
    }
}
