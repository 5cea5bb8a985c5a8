//! Markdown rewriting applied before handing a document to Pandoc.
//!
//! Browser editors tend to produce MathJax-style delimiters (`\(`, `\[`) and
//! arithmatex wrappers. Pandoc's `tex_math_dollars` reader and the preview's
//! dollar-math parser both want `$`/`$$` instead, and display blocks need to
//! sit in their own paragraph. Each pass is a `&str -> String` function
//! applied in sequence.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static DISPLAY_MATH_MID_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)([^\n])(\s*)\\\[(.*?)\\\]([^\n])").expect("valid regex")
});

static DISPLAY_MATH_OWN_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?ms)^(\s*)\\\[(.*?)\\\](\s*)$").expect("valid regex"));

static ARITHMATEX_SPAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<span class="arithmatex">(.*?)</span>"#).expect("valid regex"));

static PADDED_INLINE_MATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$ +(.+?) +\$").expect("valid regex"));

/// Full export pipeline: vertical-space shorthand, display-math isolation,
/// delimiter conversion and inline padding removal.
pub fn normalize_for_export(markdown: &str) -> String {
    let mut result = expand_vspace_shorthand(markdown);
    result = isolate_display_math(&result);
    result = strip_arithmatex_spans(&result);
    result = convert_math_delimiters(&result);
    result = tighten_inline_math(&result);
    result
}

/// Preview pipeline: everything except the LaTeX-only `\[1mm]` rewrite.
pub fn normalize_for_preview(markdown: &str) -> String {
    let mut result = isolate_display_math(markdown);
    result = strip_arithmatex_spans(&result);
    result = convert_math_delimiters(&result);
    tighten_inline_math(&result)
}

/// `\[1mm]` is a LaTeX line-break argument, not display math.
fn expand_vspace_shorthand(markdown: &str) -> String {
    markdown.replace(r"\[1mm]", r"\vspace{1mm}")
}

/// Put every `\[...\]` block in its own paragraph.
fn isolate_display_math(markdown: &str) -> String {
    let padded = DISPLAY_MATH_MID_LINE.replace_all(markdown, |caps: &Captures<'_>| {
        format!("{}\n\n\\[{}\\]\n\n{}", &caps[1], &caps[3], &caps[4])
    });

    DISPLAY_MATH_OWN_LINE
        .replace_all(&padded, |caps: &Captures<'_>| format!("\n\\[{}\\]\n", &caps[2]))
        .into_owned()
}

fn strip_arithmatex_spans(markdown: &str) -> String {
    ARITHMATEX_SPAN.replace_all(markdown, "${1}").into_owned()
}

fn convert_math_delimiters(markdown: &str) -> String {
    markdown
        .replace(r"\(", "$")
        .replace(r"\)", "$")
        .replace(r"\[", "$$")
        .replace(r"\]", "$$")
}

/// `$ x $` becomes `$x$`. Spans touching another `$` belong to `$$` blocks
/// and are left alone.
fn tighten_inline_math(markdown: &str) -> String {
    let bytes = markdown.as_bytes();
    let mut output = String::with_capacity(markdown.len());
    let mut copied_until = 0;
    let mut search_from = 0;

    while let Some(caps) = PADDED_INLINE_MATH.captures_at(markdown, search_from) {
        let (Some(whole), Some(content)) = (caps.get(0), caps.get(1)) else {
            break;
        };
        let (start, end) = (whole.start(), whole.end());

        let preceded_by_dollar = start > 0 && bytes[start - 1] == b'$';
        let followed_by_dollar = end < bytes.len() && bytes[end] == b'$';
        if preceded_by_dollar || followed_by_dollar {
            // `$` is ASCII, so start + 1 stays on a char boundary.
            search_from = start + 1;
            continue;
        }

        output.push_str(&markdown[copied_until..start]);
        output.push('$');
        output.push_str(content.as_str());
        output.push('$');
        copied_until = end;
        search_from = end;
    }

    output.push_str(&markdown[copied_until..]);
    output
}
