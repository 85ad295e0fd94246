use std::sync::{Mutex, PoisonError};

use mdv_render::{AdapterError, CodeHighlighter, Theme};
use syntect::highlighting::ThemeSet;
use syntect::html::{ClassStyle, ClassedHTMLGenerator, css_for_theme_with_class_style};
use syntect::parsing::{SyntaxReference, SyntaxSet};
use syntect::util::LinesWithEndings;

/// Prefix of every class emitted by [`SyntectHighlighter`].
pub const CLASS_PREFIX: &str = "hl-";

const CLASS_STYLE: ClassStyle = ClassStyle::SpacedPrefixed {
    prefix: CLASS_PREFIX,
};

/// Languages rendered by other stages.
const RESERVED_LANGUAGES: [&str; 2] = ["math", "mermaid"];

fn palette(theme: Theme) -> &'static str {
    match theme {
        Theme::Light => "InspiredGitHub",
        Theme::Dark => "base16-ocean.dark",
    }
}

/// Class-based syntax highlighting with syntect's bundled grammars.
///
/// Output only carries classes, so switching theme swaps the
/// [`stylesheet`](CodeHighlighter::stylesheet) and never touches highlighted
/// blocks.
pub struct SyntectHighlighter {
    syntax_set: SyntaxSet,
    themes: ThemeSet,
    theme: Mutex<Theme>,
}

impl std::fmt::Debug for SyntectHighlighter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyntectHighlighter")
            .field("syntaxes", &self.syntax_set.syntaxes().len())
            .field("theme", &self.current_theme())
            .finish_non_exhaustive()
    }
}

impl Default for SyntectHighlighter {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntectHighlighter {
    /// Load the default grammars and palettes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            syntax_set: SyntaxSet::load_defaults_newlines(),
            themes: ThemeSet::load_defaults(),
            theme: Mutex::new(Theme::default()),
        }
    }

    fn current_theme(&self) -> Theme {
        *self.theme.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn find_syntax(&self, token: &str) -> Option<&SyntaxReference> {
        let lowercase = token.to_ascii_lowercase();
        self.syntax_set
            .find_syntax_by_token(&lowercase)
            .or_else(|| self.syntax_set.find_syntax_by_name(&lowercase))
            .or_else(|| self.syntax_set.find_syntax_by_extension(&lowercase))
    }
}

impl CodeHighlighter for SyntectHighlighter {
    fn highlight(&self, source: &str, language: &str) -> Result<Option<String>, AdapterError> {
        if language.is_empty() || RESERVED_LANGUAGES.contains(&language) {
            return Ok(None);
        }
        let Some(syntax) = self.find_syntax(language) else {
            return Ok(None);
        };

        let mut code = source.to_owned();
        if !code.ends_with('\n') {
            code.push('\n');
        }

        let mut generator =
            ClassedHTMLGenerator::new_with_class_style(syntax, &self.syntax_set, CLASS_STYLE);
        for line in LinesWithEndings::from(&code) {
            generator
                .parse_html_for_line_which_includes_newline(line)
                .map_err(|e| AdapterError::Highlight {
                    language: language.to_owned(),
                    message: e.to_string(),
                })?;
        }
        Ok(Some(generator.finalize()))
    }

    fn set_theme(&self, theme: Theme) {
        *self.theme.lock().unwrap_or_else(PoisonError::into_inner) = theme;
        tracing::debug!(%theme, palette = palette(theme), "Highlighter palette switched");
    }

    fn stylesheet(&self) -> Option<String> {
        let name = palette(self.current_theme());
        let Some(theme) = self.themes.themes.get(name) else {
            tracing::warn!(palette = name, "Highlighter palette missing");
            return None;
        };
        match css_for_theme_with_class_style(theme, CLASS_STYLE) {
            Ok(css) => Some(css),
            Err(e) => {
                tracing::warn!(palette = name, error = %e, "Failed to generate highlighter CSS");
                None
            }
        }
    }
}
