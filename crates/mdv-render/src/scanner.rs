//! Unit scanner.

use mdv_config::ViewerConfig;
use mdv_dom::{Document, NodeId};

use crate::unit::{RenderableUnit, UnitKind, UnitStatus};

/// Class names that locate the viewer in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerSelectors {
    /// Class of the observed container.
    pub container_class: String,
    /// Class of the content root inside the container.
    pub content_class: String,
}

impl Default for ViewerSelectors {
    fn default() -> Self {
        Self::from(&ViewerConfig::default())
    }
}

impl From<&ViewerConfig> for ViewerSelectors {
    fn from(config: &ViewerConfig) -> Self {
        Self {
            container_class: config.container_class.clone(),
            content_class: config.content_class.clone(),
        }
    }
}

/// First element carrying the container class.
#[must_use]
pub fn find_container(doc: &Document, selectors: &ViewerSelectors) -> Option<NodeId> {
    doc.find_first(doc.root(), |_, el| el.has_class(&selectors.container_class))
}

/// Content root: the container itself if it carries the content class,
/// otherwise its first descendant that does.
#[must_use]
pub fn find_content_root(doc: &Document, selectors: &ViewerSelectors) -> Option<NodeId> {
    let container = find_container(doc, selectors)?;
    if doc
        .element(container)
        .is_some_and(|el| el.has_class(&selectors.content_class))
    {
        return Some(container);
    }
    doc.find_first(container, |_, el| el.has_class(&selectors.content_class))
}

/// Unprocessed units of `kind` below `content_root`, in document order.
///
/// A root that no longer resolves or is detached yields no units.
#[must_use]
pub fn scan(doc: &Document, content_root: NodeId, kind: UnitKind) -> Vec<RenderableUnit> {
    if !doc.is_connected(content_root) {
        return Vec::new();
    }
    doc.descendants(content_root)
        .filter_map(|id| {
            let element = doc.element(id)?;
            (kind.matches(doc, id, element) && UnitStatus::of(element) == UnitStatus::Unprocessed)
                .then(|| RenderableUnit::from_element(doc, id, element, kind))
        })
        .collect()
}

/// Units of `kind` below `content_root` that already carry a status.
pub(crate) fn scan_marked(doc: &Document, content_root: NodeId, kind: UnitKind) -> Vec<NodeId> {
    if !doc.is_connected(content_root) {
        return Vec::new();
    }
    doc.find_all(content_root, |id, el| {
        kind.matches(doc, id, el) && UnitStatus::of(el) != UnitStatus::Unprocessed
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PAGE: &str = r#"<div class="markdown-viewer"><article class="markdown-body">
<p>Inline <span class="math math-inline">a</span> and <span class="math math-inline" data-render-status="processed">b</span></p>
<pre class="mermaid">graph TD; A-->B</pre>
<p><span class="math math-inline">c</span></p>
</article></div>"#;

    fn selectors() -> ViewerSelectors {
        ViewerSelectors::default()
    }

    #[test]
    fn test_scan_returns_unprocessed_in_document_order() {
        let doc = Document::parse(PAGE).unwrap();
        let root = find_content_root(&doc, &selectors()).unwrap();

        let sources: Vec<String> = scan(&doc, root, UnitKind::InlineMath)
            .into_iter()
            .map(|unit| unit.source)
            .collect();

        assert_eq!(sources, vec!["a".to_owned(), "c".to_owned()]);
    }

    #[test]
    fn test_scan_by_kind() {
        let doc = Document::parse(PAGE).unwrap();
        let root = find_content_root(&doc, &selectors()).unwrap();

        let diagrams = scan(&doc, root, UnitKind::Diagram);
        assert_eq!(diagrams.len(), 1);
        assert_eq!(diagrams[0].source, "graph TD; A-->B");
        assert!(scan(&doc, root, UnitKind::CodeBlock).is_empty());
    }

    #[test]
    fn test_scan_missing_root_is_empty() {
        let mut doc = Document::parse(PAGE).unwrap();
        let root = find_content_root(&doc, &selectors()).unwrap();
        doc.remove(root).unwrap();

        assert!(scan(&doc, root, UnitKind::InlineMath).is_empty());
    }

    #[test]
    fn test_scan_detached_root_is_empty() {
        let mut doc = Document::new();
        let detached = doc.create_element("div");
        doc.set_inner_html(detached, r#"<span class="math math-inline">x</span>"#)
            .unwrap();

        assert!(scan(&doc, detached, UnitKind::InlineMath).is_empty());
    }

    #[test]
    fn test_find_content_root_absent() {
        let doc = Document::parse(r#"<div class="markdown-viewer"></div>"#).unwrap();
        assert!(find_container(&doc, &selectors()).is_some());
        assert!(find_content_root(&doc, &selectors()).is_none());
    }

    #[test]
    fn test_container_may_be_content_root() {
        let doc = Document::parse(r#"<main class="markdown-viewer markdown-body"></main>"#)
            .unwrap();
        assert_eq!(
            find_content_root(&doc, &selectors()),
            find_container(&doc, &selectors())
        );
    }

    #[test]
    fn test_scan_marked_finds_processed_only() {
        let doc = Document::parse(PAGE).unwrap();
        let root = find_content_root(&doc, &selectors()).unwrap();
        assert_eq!(scan_marked(&doc, root, UnitKind::InlineMath).len(), 1);
    }
}
