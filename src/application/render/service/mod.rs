mod config;
mod highlight;
mod math;
mod mermaid;
mod rewrite;

use std::time::{Duration, Instant};

use comrak::{Arena, format_html, nodes::AstNode, options::Options, parse_document};
use metrics::counter;
use syntect::{html::ClassStyle, parsing::SyntaxSet};
use tracing::{info, warn};

use crate::application::export::normalize_for_preview;
use crate::application::render::types::{PreviewOutput, RenderError};
use crate::config::RenderSettings;

use self::mermaid::MermaidRenderer;
use config::{build_sanitizer, default_options};
use rewrite::{RewriteOutcome, rewrite_ast};

const METRIC_PREVIEW_TOTAL: &str = "mdexport_preview_total";
const CLASS_STYLE: ClassStyle = ClassStyle::SpacedPrefixed { prefix: "syntax-" };

/// Comrak-based preview pipeline with Syntect highlighting, KaTeX math,
/// Mermaid diagrams and Ammonia sanitisation.
pub struct PreviewRenderer {
    options: Options<'static>,
    syntax_set: SyntaxSet,
    sanitizer: ammonia::Builder<'static>,
    mermaid: Option<MermaidRenderer>,
    diagram_budget: Duration,
    stylesheet: String,
}

impl PreviewRenderer {
    /// Diagrams are disabled, with a warning, when the cache directory cannot
    /// be created. Everything else still renders.
    pub fn new(settings: &RenderSettings) -> Self {
        let mermaid = match MermaidRenderer::new(
            settings.mermaid_cli_path.clone(),
            settings.mermaid_cache_dir.clone(),
        ) {
            Ok(renderer) => {
                info!(
                    target = "application::render::mermaid",
                    cli_path = %renderer.cli_path().display(),
                    cache_dir = %settings.mermaid_cache_dir.display(),
                    "Mermaid renderer ready"
                );
                Some(renderer)
            }
            Err(err) => {
                warn!(
                    target = "application::render::mermaid",
                    cli_path = %settings.mermaid_cli_path.display(),
                    cache_dir = %settings.mermaid_cache_dir.display(),
                    error = %err,
                    "Mermaid renderer disabled"
                );
                None
            }
        };
        Self::build(mermaid, settings.mermaid_timeout)
    }

    /// Renderer that reports every diagram as an error instead of running `mmdc`.
    pub fn without_diagrams() -> Self {
        Self::build(None, Duration::ZERO)
    }

    fn build(mermaid: Option<MermaidRenderer>, diagram_budget: Duration) -> Self {
        let stylesheet = highlight::stylesheet(CLASS_STYLE).unwrap_or_else(|err| {
            warn!(
                target = "application::render::highlight",
                error = %err,
                "Highlight stylesheet unavailable"
            );
            String::new()
        });

        Self {
            options: default_options(),
            syntax_set: SyntaxSet::load_defaults_newlines(),
            sanitizer: build_sanitizer(),
            mermaid,
            diagram_budget,
            stylesheet,
        }
    }

    /// CSS for the classes emitted on highlighted code blocks.
    pub fn highlight_css(&self) -> &str {
        &self.stylesheet
    }

    /// Render editor Markdown to a sanitised HTML fragment. Runs `mmdc`
    /// synchronously on a cache miss, so async callers should use a blocking
    /// task. Diagrams still pending when the budget runs out become inline
    /// errors.
    pub fn render(&self, markdown: &str) -> Result<PreviewOutput, RenderError> {
        let result = self.render_inner(markdown);
        let label = if result.is_ok() { "ok" } else { "error" };
        counter!(METRIC_PREVIEW_TOTAL, "result" => label).increment(1);
        result
    }

    fn render_inner(&self, markdown: &str) -> Result<PreviewOutput, RenderError> {
        let diagram_deadline = Instant::now() + self.diagram_budget;
        let normalized = normalize_for_preview(markdown);
        let arena = Arena::new();
        let root = parse_document(&arena, &normalized, &self.options);

        let outcome = rewrite_ast(
            root,
            &self.syntax_set,
            &CLASS_STYLE,
            self.mermaid.as_ref(),
            diagram_deadline,
        )?;
        let rendered = render_html_stage(root, &self.options)?;
        let sanitized = self.sanitizer.clean(&rendered).to_string();
        let html = outcome.restore(sanitized);

        let RewriteOutcome {
            contains_code,
            contains_math,
            contains_mermaid,
            ..
        } = outcome;

        Ok(PreviewOutput {
            html,
            contains_code,
            contains_math,
            contains_mermaid,
        })
    }
}

fn render_html_stage<'a>(
    root: &'a AstNode<'a>,
    options: &Options<'static>,
) -> Result<String, RenderError> {
    let mut html = String::new();
    format_html(root, options, &mut html).map_err(|err| RenderError::Markdown {
        message: err.to_string(),
    })?;
    Ok(html)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_tables_and_strikethrough() {
        let renderer = PreviewRenderer::without_diagrams();
        let output = renderer
            .render("| a | b |\n|---|---|\n| 1 | ~~2~~ |\n")
            .expect("render");

        assert!(output.html.contains("<table>"), "got: {}", output.html);
        assert!(output.html.contains("<del>2</del>"), "got: {}", output.html);
    }

    #[test]
    fn newlines_become_line_breaks() {
        let renderer = PreviewRenderer::without_diagrams();
        let output = renderer.render("first\nsecond").expect("render");

        assert!(output.html.contains("first<br"), "got: {}", output.html);
    }

    #[test]
    fn raw_scripts_are_removed() {
        let renderer = PreviewRenderer::without_diagrams();
        let output = renderer
            .render("hello\n\n<script>alert(1)</script>\n")
            .expect("render");

        assert!(!output.html.contains("script"), "got: {}", output.html);
        assert!(output.html.contains("hello"));
    }

    #[test]
    fn mathjax_delimiters_render_with_katex() {
        let renderer = PreviewRenderer::without_diagrams();
        let output = renderer
            .render(r"Energy \( E \) and \[E = mc^2\] done")
            .expect("render");

        assert!(output.contains_math);
        assert!(output.html.contains("data-role=\"math-block\""), "got: {}", output.html);
        assert!(output.html.contains("data-role=\"math-inline\""), "got: {}", output.html);
        assert!(!output.html.contains("KATEX_"), "got: {}", output.html);
    }

    #[test]
    fn typed_placeholder_text_is_left_alone() {
        let renderer = PreviewRenderer::without_diagrams();
        let output = renderer
            .render("`__KATEX_PLACEHOLDER_0__` next to $a$")
            .expect("render");

        assert!(
            output.html.contains("<code>__KATEX_PLACEHOLDER_0__</code>"),
            "got: {}",
            output.html
        );
        assert_eq!(output.html.matches("data-role=\"math-inline\"").count(), 1);
    }

    #[test]
    fn code_blocks_are_highlighted_and_flagged() {
        let renderer = PreviewRenderer::without_diagrams();
        let output = renderer
            .render("```rust\nfn main() {}\n```\n")
            .expect("render");

        assert!(output.contains_code);
        assert!(output.html.contains("syntax-highlight"), "got: {}", output.html);
    }

    #[test]
    fn diagram_failures_render_inline_errors() {
        let renderer = PreviewRenderer::without_diagrams();
        let output = renderer
            .render("```mermaid\ngraph TD; A-->B\n```\n")
            .expect("render");

        assert!(!output.contains_mermaid);
        assert!(
            output.html.contains("[Mermaid Error:"),
            "got: {}",
            output.html
        );
    }

    #[test]
    fn stylesheet_is_generated() {
        let renderer = PreviewRenderer::without_diagrams();
        assert!(renderer.highlight_css().contains(".syntax-"));
    }
}
