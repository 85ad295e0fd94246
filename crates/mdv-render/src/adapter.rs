//! Capabilities the pipeline needs from rendering backends.
//!
//! Math and highlighting are synchronous and run while the executor holds the
//! document. Diagram rendering and clipboard access are asynchronous and run
//! with the document released.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AdapterError;
use crate::theme::Theme;

/// Layout mode for a math expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathMode {
    /// Flows with the surrounding text.
    Inline,
    /// Rendered as a centered block.
    Display,
}

/// Typesets one math expression into HTML.
pub trait MathRenderer: Send + Sync {
    /// Render `source` in the given mode.
    fn render(&self, source: &str, mode: MathMode) -> Result<String, AdapterError>;
}

/// Highlights one code block into HTML.
pub trait CodeHighlighter: Send + Sync {
    /// Highlight `source` as `language`.
    ///
    /// Returns `Ok(None)` when the language is not registered; the block is
    /// then left as plain text without being treated as an error.
    fn highlight(&self, source: &str, language: &str) -> Result<Option<String>, AdapterError>;

    /// Switch the palette used by [`stylesheet`](Self::stylesheet).
    ///
    /// Highlighted markup is class-based, so existing blocks never need to
    /// be re-highlighted.
    fn set_theme(&self, _theme: Theme) {}

    /// CSS for the current palette, if the highlighter provides one.
    fn stylesheet(&self) -> Option<String> {
        None
    }
}

/// One diagram to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagramRequest {
    /// Unique id usable as an element id inside the output.
    pub id: String,
    /// Diagram source.
    pub source: String,
    /// Palette to render with.
    pub theme: Theme,
}

impl DiagramRequest {
    /// Create a request with a fresh id.
    #[must_use]
    pub fn new(source: impl Into<String>, theme: Theme) -> Self {
        Self {
            id: format!("mermaid-{}", uuid::Uuid::new_v4()),
            source: source.into(),
            theme,
        }
    }
}

/// Renders diagram source into SVG markup.
#[async_trait]
pub trait DiagramRenderer: Send + Sync {
    /// Render one diagram.
    async fn render(&self, request: DiagramRequest) -> Result<String, AdapterError>;
}

/// Writes text to the system clipboard.
#[async_trait]
pub trait Clipboard: Send + Sync {
    /// Replace the clipboard contents with `text`.
    async fn write_text(&self, text: &str) -> Result<(), AdapterError>;
}

/// The set of backends a pass renders with.
///
/// A missing backend disables its stage: units of that kind are left
/// unprocessed.
#[derive(Clone, Default)]
pub struct Adapters {
    /// Math typesetting.
    pub math: Option<Arc<dyn MathRenderer>>,
    /// Code highlighting.
    pub highlighter: Option<Arc<dyn CodeHighlighter>>,
    /// Diagram rendering.
    pub diagrams: Option<Arc<dyn DiagramRenderer>>,
}

impl std::fmt::Debug for Adapters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapters")
            .field("math", &self.math.is_some())
            .field("highlighter", &self.highlighter.is_some())
            .field("diagrams", &self.diagrams.is_some())
            .finish()
    }
}
