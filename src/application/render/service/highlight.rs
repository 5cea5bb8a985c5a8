use syntect::{
    highlighting::ThemeSet,
    html::{ClassStyle, ClassedHTMLGenerator, css_for_theme_with_class_style},
    parsing::{SyntaxReference, SyntaxSet},
    util::LinesWithEndings,
};

use crate::application::render::types::RenderError;

const STYLESHEET_THEME: &str = "InspiredGitHub";

pub(crate) fn highlight_code(
    language: Option<&str>,
    code: &str,
    syntax_set: &SyntaxSet,
    class_style: &ClassStyle,
) -> Result<String, RenderError> {
    let lang_token = language.unwrap_or("text");
    let syntax =
        find_syntax(syntax_set, lang_token).unwrap_or_else(|| syntax_set.find_syntax_plain_text());

    let mut code_with_newline = code.to_string();
    if !code_with_newline.ends_with('\n') {
        code_with_newline.push('\n');
    }

    let mut generator =
        ClassedHTMLGenerator::new_with_class_style(syntax, syntax_set, *class_style);

    for line in LinesWithEndings::from(code_with_newline.as_str()) {
        generator
            .parse_html_for_line_which_includes_newline(line)
            .map_err(|err| RenderError::Highlighting {
                language: lang_token.to_string(),
                message: err.to_string(),
            })?;
    }

    let highlighted = generator.finalize();
    let lang = ammonia::clean_text(&lang_token.to_ascii_lowercase());
    Ok(format!(
        "<pre class=\"syntax-highlight syntax-lang-{lang}\" data-language=\"{lang}\"><code class=\"language-{lang} syntax-code\">{highlighted}</code></pre>"
    ))
}

/// Stylesheet for the `syntax-` prefixed classes emitted by [`highlight_code`].
pub(crate) fn stylesheet(class_style: ClassStyle) -> Result<String, RenderError> {
    let themes = ThemeSet::load_defaults();
    let theme = themes
        .themes
        .get(STYLESHEET_THEME)
        .ok_or_else(|| RenderError::Highlighting {
            language: "css".to_string(),
            message: format!("theme `{STYLESHEET_THEME}` is not bundled"),
        })?;

    css_for_theme_with_class_style(theme, class_style).map_err(|err| RenderError::Highlighting {
        language: "css".to_string(),
        message: err.to_string(),
    })
}

fn find_syntax<'a>(syntax_set: &'a SyntaxSet, token: &str) -> Option<&'a SyntaxReference> {
    let lowercase = token.to_ascii_lowercase();
    syntax_set
        .find_syntax_by_token(&lowercase)
        .or_else(|| syntax_set.find_syntax_by_name(&lowercase))
        .or_else(|| syntax_set.find_syntax_by_extension(&lowercase))
}

#[cfg(test)]
mod tests {
    use super::*;

    const STYLE: ClassStyle = ClassStyle::SpacedPrefixed { prefix: "syntax-" };

    #[test]
    fn known_language_gets_token_classes() {
        let syntax_set = SyntaxSet::load_defaults_newlines();
        let html = highlight_code(Some("rust"), "fn main() {}", &syntax_set, &STYLE)
            .expect("highlighted");

        assert!(html.starts_with("<pre class=\"syntax-highlight syntax-lang-rust\""));
        assert!(html.contains("syntax-"), "got: {html}");
    }

    #[test]
    fn unknown_language_falls_back_to_plain_text() {
        let syntax_set = SyntaxSet::load_defaults_newlines();
        let html = highlight_code(Some("nosuchlang"), "a < b", &syntax_set, &STYLE)
            .expect("highlighted");

        assert!(html.contains("data-language=\"nosuchlang\""));
        assert!(html.contains("a &lt; b"), "got: {html}");
    }

    #[test]
    fn stylesheet_targets_prefixed_classes() {
        let css = stylesheet(STYLE).expect("css");
        assert!(css.contains(".syntax-"), "got: {css}");
    }
}
