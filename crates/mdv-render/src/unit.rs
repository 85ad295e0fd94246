//! Renderable unit model.
//!
//! Units are recognized purely from the markup conventions of the upstream
//! HTML producer. Their render status lives on the element itself as
//! [`STATUS_ATTR`], so a fresh scan never needs memory of earlier passes.

use mdv_dom::{Document, ElementData, NodeId};

/// Attribute holding a unit's [`UnitStatus`]. Absent means unprocessed.
pub const STATUS_ATTR: &str = "data-render-status";

/// Attribute preserving the source of a unit whose content was replaced.
pub const ORIGINAL_CONTENT_ATTR: &str = "data-original-content";

/// Class given to inline error markup.
pub const ERROR_CLASS: &str = "render-error";

/// Kind of renderable region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitKind {
    /// `span.math.math-inline`
    InlineMath,
    /// `span.math.math-display`
    DisplayMath,
    /// `.language-math` or `pre.preprocessed-math`
    BlockMath,
    /// `pre.mermaid`
    Diagram,
    /// `pre > code.language-*`
    CodeBlock,
}

impl UnitKind {
    /// Math kinds in the order the executor processes them.
    pub const MATH: [Self; 3] = [Self::InlineMath, Self::DisplayMath, Self::BlockMath];

    /// Whether the element at `id` is a unit of this kind.
    #[must_use]
    pub fn matches(self, doc: &Document, id: NodeId, element: &ElementData) -> bool {
        match self {
            Self::InlineMath => {
                (element.tag() == "span"
                    && element.has_class("math")
                    && element.has_class("math-inline"))
                    || element.has_class("preprocessed-math-inline")
            }
            Self::DisplayMath => {
                (element.tag() == "span"
                    && element.has_class("math")
                    && element.has_class("math-display"))
                    || element.has_class("preprocessed-math-display")
            }
            Self::BlockMath => {
                element.has_class("language-math")
                    || (element.tag() == "pre" && element.has_class("preprocessed-math"))
            }
            Self::Diagram => {
                element.tag() == "pre"
                    && (element.has_class("mermaid") || element.has_class("preprocessed-mermaid"))
            }
            Self::CodeBlock => {
                element.tag() == "code"
                    && doc
                        .parent(id)
                        .and_then(|parent| doc.element(parent))
                        .is_some_and(|parent| parent.tag() == "pre")
                    && code_language(element).is_some()
            }
        }
    }

    /// Short label used in logs and error markup.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::InlineMath | Self::DisplayMath | Self::BlockMath => "Math",
            Self::Diagram => "Diagram",
            Self::CodeBlock => "Code",
        }
    }

    /// Whether error markup for this kind must stay inline.
    pub(crate) fn is_inline(self) -> bool {
        matches!(self, Self::InlineMath)
    }
}

/// Language token of a highlightable code element.
///
/// `language-math` and `language-mermaid` belong to other kinds and yield
/// `None`.
#[must_use]
pub fn code_language(element: &ElementData) -> Option<&str> {
    element
        .classes()
        .filter_map(|class| class.strip_prefix("language-"))
        .find(|lang| !lang.is_empty())
        .filter(|lang| !matches!(*lang, "math" | "mermaid"))
}

/// Render status of a unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnitStatus {
    /// Not yet attempted.
    #[default]
    Unprocessed,
    /// Rendered successfully (or intentionally left as is).
    Processed,
    /// Render attempted and failed; error markup is shown.
    Errored,
}

impl UnitStatus {
    /// Attribute value, `None` for [`UnitStatus::Unprocessed`].
    #[must_use]
    pub fn as_attr(self) -> Option<&'static str> {
        match self {
            Self::Unprocessed => None,
            Self::Processed => Some("processed"),
            Self::Errored => Some("errored"),
        }
    }

    /// Read the status recorded on an element.
    ///
    /// Unrecognized values count as processed so a unit is never rendered
    /// twice.
    #[must_use]
    pub fn of(element: &ElementData) -> Self {
        match element.attribute(STATUS_ATTR) {
            None => Self::Unprocessed,
            Some("errored") => Self::Errored,
            Some(_) => Self::Processed,
        }
    }
}

/// One unprocessed region found by the scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderableUnit {
    /// Element holding the unit.
    pub id: NodeId,
    /// Unit kind.
    pub kind: UnitKind,
    /// Source to render.
    pub source: String,
    /// Language token for code blocks.
    pub language: Option<String>,
}

impl RenderableUnit {
    pub(crate) fn from_element(
        doc: &Document,
        id: NodeId,
        element: &ElementData,
        kind: UnitKind,
    ) -> Self {
        let source = match element.attribute(ORIGINAL_CONTENT_ATTR) {
            Some(original) => original.to_owned(),
            // Whitespace is significant in code
            None if kind == UnitKind::CodeBlock => doc.text_content(id),
            None => doc.text_content(id).trim().to_owned(),
        };
        let language = (kind == UnitKind::CodeBlock)
            .then(|| code_language(element).map(str::to_owned))
            .flatten();
        Self {
            id,
            kind,
            source,
            language,
        }
    }
}
