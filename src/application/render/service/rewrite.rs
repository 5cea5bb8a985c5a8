use std::time::Instant;

use comrak::nodes::{AstNode, NodeHtmlBlock, NodeValue};
use syntect::{html::ClassStyle, parsing::SyntaxSet};
use tracing::warn;
use uuid::Uuid;

use crate::application::render::types::RenderError;

use super::{
    highlight, math,
    mermaid::{MermaidRenderer, is_diagram_language},
};

pub(crate) struct RewriteOutcome {
    pub(crate) contains_code: bool,
    pub(crate) contains_math: bool,
    pub(crate) contains_mermaid: bool,
    pub(crate) fragments: Vec<Fragment>,
    nonce: String,
}

/// Markup swapped in after sanitisation. Block fragments sit inside a bare
/// `<div>` placeholder; inline ones replace the placeholder text directly.
#[derive(Clone)]
pub(crate) struct Fragment {
    pub(crate) placeholder: String,
    pub(crate) html: String,
    pub(crate) is_block: bool,
}

impl RewriteOutcome {
    /// Placeholders embed a fresh nonce so text typed into the editor can
    /// never collide with them.
    fn new() -> Self {
        Self {
            contains_code: false,
            contains_math: false,
            contains_mermaid: false,
            fragments: Vec::new(),
            nonce: Uuid::new_v4().simple().to_string(),
        }
    }

    fn stash(&mut self, kind: &str, html: String, is_block: bool) -> String {
        let placeholder = format!("__{kind}_{}_{}__", self.nonce, self.fragments.len());
        self.fragments.push(Fragment {
            placeholder: placeholder.clone(),
            html,
            is_block,
        });
        placeholder
    }

    pub(crate) fn restore(&self, html: String) -> String {
        self.fragments.iter().fold(html, |acc, fragment| {
            if fragment.is_block {
                acc.replace(&format!("<div>{}</div>", fragment.placeholder), &fragment.html)
            } else {
                acc.replace(&fragment.placeholder, &fragment.html)
            }
        })
    }
}

pub(crate) fn rewrite_ast<'a>(
    root: &'a AstNode<'a>,
    syntax_set: &SyntaxSet,
    class_style: &ClassStyle,
    mermaid: Option<&MermaidRenderer>,
    diagram_deadline: Instant,
) -> Result<RewriteOutcome, RenderError> {
    let mut walker = RewriteWalker {
        syntax_set,
        class_style,
        mermaid,
        diagram_deadline,
        outcome: RewriteOutcome::new(),
    };
    walker.visit_nodes(root)?;
    Ok(walker.outcome)
}

struct RewriteWalker<'a> {
    syntax_set: &'a SyntaxSet,
    class_style: &'a ClassStyle,
    mermaid: Option<&'a MermaidRenderer>,
    diagram_deadline: Instant,
    outcome: RewriteOutcome,
}

impl RewriteWalker<'_> {
    fn visit_nodes(&mut self, node: &AstNode<'_>) -> Result<(), RenderError> {
        if !self.handle_math_node(node) {
            if let Some((info, literal)) = extract_code_block(node) {
                let language = info.split_whitespace().next().map(str::to_string);
                match language.as_deref() {
                    Some(lang) if is_diagram_language(lang) => {
                        self.handle_diagram_block(node, &literal);
                    }
                    lang => {
                        let html = highlight::highlight_code(
                            lang,
                            &literal,
                            self.syntax_set,
                            self.class_style,
                        )?;
                        self.outcome.contains_code = true;
                        replace_with_block(node, html);
                    }
                }
            }
        }

        let mut child = node.first_child();
        while let Some(next) = child {
            self.visit_nodes(next)?;
            child = next.next_sibling();
        }

        Ok(())
    }

    fn handle_math_node(&mut self, node: &AstNode<'_>) -> bool {
        let math = {
            let data = node.data.borrow();
            match &data.value {
                NodeValue::Math(math) => Some((math.literal.clone(), math.display_math)),
                _ => None,
            }
        };
        let Some((literal, display_mode)) = math else {
            return false;
        };

        match math::render_math_html(&literal, display_mode) {
            Ok(html) => {
                self.outcome.contains_math = true;
                if display_mode {
                    let container =
                        format!("<div data-role=\"math-block\" data-math-style=\"display\">{html}</div>");
                    let placeholder = self.outcome.stash("KATEX", container, true);
                    replace_with_block(node, format!("<div>{placeholder}</div>"));
                } else {
                    let container = format!(
                        "<span data-role=\"math-inline\" data-math-style=\"inline\">{html}</span>"
                    );
                    let placeholder = self.outcome.stash("KATEX", container, false);
                    node.data.borrow_mut().value = NodeValue::HtmlInline(placeholder);
                }
            }
            Err(err) => {
                warn!(
                    target = "application::render::math",
                    display = display_mode,
                    "KaTeX rendering failed: {err}"
                );
                self.outcome.contains_code = true;
                let escaped = escape_html(&literal);
                if display_mode {
                    replace_with_block(
                        node,
                        format!("<pre data-language=\"math\"><code data-math-style=\"display\">{escaped}</code></pre>"),
                    );
                } else {
                    node.data.borrow_mut().value = NodeValue::HtmlInline(format!(
                        "<code data-math-style=\"inline\">{escaped}</code>"
                    ));
                }
            }
        }

        true
    }

    fn handle_diagram_block(&mut self, node: &AstNode<'_>, literal: &str) {
        let rendered = match self.mermaid {
            Some(renderer) => renderer
                .render_svg(literal, self.diagram_deadline)
                .map_err(|err| err.to_string()),
            None => Err("diagram renderer is not configured".to_string()),
        };

        match rendered {
            Ok(svg) => {
                self.outcome.contains_mermaid = true;
                let figure = format!("<figure data-role=\"diagram-mermaid\">{svg}</figure>");
                let placeholder = self.outcome.stash("MERMAID", figure, true);
                replace_with_block(node, format!("<div>{placeholder}</div>"));
            }
            Err(message) => {
                warn!(
                    target = "application::render::mermaid",
                    error = %message,
                    "Diagram rendering failed; emitting inline error"
                );
                replace_with_block(node, mermaid_error_html(&message));
            }
        }
    }
}

pub(crate) fn mermaid_error_html(message: &str) -> String {
    format!(
        "<p><strong>[Mermaid Error: {}]</strong></p>",
        escape_html(message)
    )
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn replace_with_block(node: &AstNode<'_>, literal: String) {
    node.data.borrow_mut().value = NodeValue::HtmlBlock(NodeHtmlBlock {
        block_type: 0,
        literal,
    });
}

fn extract_code_block(node: &AstNode<'_>) -> Option<(String, String)> {
    let data = node.data.borrow();
    if let NodeValue::CodeBlock(block) = &data.value {
        Some((block.info.trim().to_string(), block.literal.clone()))
    } else {
        None
    }
}
