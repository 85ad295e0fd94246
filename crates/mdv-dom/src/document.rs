//! Arena-backed document tree.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::DomError;
use crate::html::{self, FragmentNode};
use crate::observer::{
    MutationCallback, MutationKind, MutationOrigin, MutationRecord, ObserveOptions, Observer,
    ObserverId,
};

/// A document shared between the content producer and the render pipeline.
pub type SharedDocument = Arc<Mutex<Document>>;

/// Lock a shared document, recovering the guard if a previous holder panicked.
pub fn lock_document(document: &SharedDocument) -> MutexGuard<'_, Document> {
    document.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Identifier of a node in a [`Document`].
///
/// Arena slots are recycled once their node is removed. The generation
/// changes on every reuse, so a stale id never resolves to the new node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub(crate) index: usize,
    pub(crate) generation: u32,
}

impl NodeId {
    #[cfg(test)]
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            generation: 0,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.generation == 0 {
            write!(f, "#{}", self.index)
        } else {
            write!(f, "#{}.{}", self.index, self.generation)
        }
    }
}

/// Element tag and attributes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ElementData {
    tag: String,
    attrs: Vec<(String, String)>,
}

impl ElementData {
    fn new(tag: &str, attrs: Vec<(String, String)>) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attrs,
        }
    }

    /// Lowercase tag name.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Attribute value by name.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Whether the attribute is present.
    #[must_use]
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attribute(name).is_some()
    }

    /// Attributes in source order.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Whitespace-separated entries of the `class` attribute.
    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attribute("class").unwrap_or_default().split_whitespace()
    }

    /// Whether the `class` attribute contains `class`.
    #[must_use]
    pub fn has_class(&self, class: &str) -> bool {
        self.classes().any(|c| c == class)
    }

    /// Returns `true` when the stored value changed.
    fn set_attribute(&mut self, name: &str, value: &str) -> bool {
        if let Some(entry) = self.attrs.iter_mut().find(|(key, _)| key == name) {
            if entry.1 == value {
                return false;
            }
            value.clone_into(&mut entry.1);
        } else {
            self.attrs.push((name.to_owned(), value.to_owned()));
        }
        true
    }

    /// Returns `true` when the attribute existed.
    fn remove_attribute(&mut self, name: &str) -> bool {
        let before = self.attrs.len();
        self.attrs.retain(|(key, _)| key != name);
        self.attrs.len() != before
    }
}

/// Payload of a node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeData {
    /// Element node.
    Element(ElementData),
    /// Text node.
    Text(String),
}

struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// An HTML document held as an arena of nodes.
///
/// The document always has a root `html` element. Nodes created with
/// [`create_element`](Self::create_element) start detached and become part of
/// the tree once appended under a connected node. Only mutations of connected
/// nodes are reported to observers.
pub struct Document {
    nodes: Vec<Slot>,
    free: Vec<usize>,
    root: NodeId,
    observers: Vec<Observer>,
    next_observer_id: u64,
    origin: MutationOrigin,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("nodes", &(self.nodes.len() - self.free.len()))
            .field("observers", &self.observers.len())
            .field("origin", &self.origin)
            .finish()
    }
}

impl Document {
    /// Create an empty document with an `html` root element.
    #[must_use]
    pub fn new() -> Self {
        let root = Node {
            data: NodeData::Element(ElementData::new("html", Vec::new())),
            parent: None,
            children: Vec::new(),
        };
        Self {
            nodes: vec![Slot {
                generation: 0,
                node: Some(root),
            }],
            free: Vec::new(),
            root: NodeId {
                index: 0,
                generation: 0,
            },
            observers: Vec::new(),
            next_observer_id: 1,
            origin: MutationOrigin::External,
        }
    }

    /// Parse `html` into a new document, placing the fragment under the root.
    ///
    /// # Errors
    ///
    /// Returns an error if the fragment cannot be tokenized.
    pub fn parse(html: &str) -> Result<Self, DomError> {
        let mut doc = Self::new();
        let root = doc.root;
        doc.set_inner_html(root, html)?;
        Ok(doc)
    }

    /// Wrap the document for sharing between producer and pipeline.
    #[must_use]
    pub fn into_shared(self) -> SharedDocument {
        Arc::new(Mutex::new(self))
    }

    /// The root element.
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes
            .get(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    /// Whether `id` still resolves to a node.
    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    /// Node payload.
    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&NodeData> {
        self.node(id).map(|node| &node.data)
    }

    /// Element payload, `None` for text nodes and unknown ids.
    #[must_use]
    pub fn element(&self, id: NodeId) -> Option<&ElementData> {
        match self.get(id) {
            Some(NodeData::Element(element)) => Some(element),
            _ => None,
        }
    }

    fn element_mut(&mut self, id: NodeId) -> Result<&mut ElementData, DomError> {
        match self.node_mut(id).map(|node| &mut node.data) {
            Some(NodeData::Element(element)) => Ok(element),
            Some(NodeData::Text(_)) => Err(DomError::NotAnElement(id)),
            None => Err(DomError::UnknownNode(id)),
        }
    }

    /// Parent of `id`.
    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|node| node.parent)
    }

    /// Children of `id` in order (empty for unknown ids).
    #[must_use]
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map_or(&[], |node| node.children.as_slice())
    }

    /// Element children of `id` in order.
    pub fn child_elements(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(id)
            .iter()
            .copied()
            .filter(|&child| self.element(child).is_some())
    }

    /// Whether `ancestor` is `node` or one of its ancestors.
    #[must_use]
    pub fn is_inclusive_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    /// Whether `id` is attached under the document root.
    #[must_use]
    pub fn is_connected(&self, id: NodeId) -> bool {
        self.contains(id) && self.is_inclusive_ancestor(self.root, id)
    }

    /// Pre-order traversal of the subtree below `id` (excluding `id`).
    #[must_use]
    pub fn descendants(&self, id: NodeId) -> Descendants<'_> {
        let mut stack: Vec<NodeId> = self.children(id).to_vec();
        stack.reverse();
        Descendants { doc: self, stack }
    }

    /// First element below `root` in document order matching `predicate`.
    pub fn find_first<F>(&self, root: NodeId, mut predicate: F) -> Option<NodeId>
    where
        F: FnMut(NodeId, &ElementData) -> bool,
    {
        self.descendants(root)
            .find(|&id| self.element(id).is_some_and(|el| predicate(id, el)))
    }

    /// All elements below `root` in document order matching `predicate`.
    pub fn find_all<F>(&self, root: NodeId, mut predicate: F) -> Vec<NodeId>
    where
        F: FnMut(NodeId, &ElementData) -> bool,
    {
        self.descendants(root)
            .filter(|&id| self.element(id).is_some_and(|el| predicate(id, el)))
            .collect()
    }

    /// Concatenated text of the subtree.
    #[must_use]
    pub fn text_content(&self, id: NodeId) -> String {
        match self.get(id) {
            Some(NodeData::Text(text)) => text.clone(),
            Some(NodeData::Element(_)) => self
                .descendants(id)
                .filter_map(|child| match self.get(child) {
                    Some(NodeData::Text(text)) => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
            None => String::new(),
        }
    }

    /// HTML serialization of the children of `id`.
    #[must_use]
    pub fn inner_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        html::serialize_children(self, id, &mut out);
        out
    }

    /// HTML serialization of `id` including itself.
    #[must_use]
    pub fn outer_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        html::serialize_node(self, id, &mut out);
        out
    }

    /// Create a detached element.
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.insert_node(NodeData::Element(ElementData::new(tag, Vec::new())))
    }

    /// Create a detached text node.
    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.insert_node(NodeData::Text(text.to_owned()))
    }

    fn insert_node(&mut self, data: NodeData) -> NodeId {
        let node = Node {
            data,
            parent: None,
            children: Vec::new(),
        };
        if let Some(index) = self.free.pop()
            && let Some(slot) = self.nodes.get_mut(index)
        {
            slot.node = Some(node);
            return NodeId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.nodes.len();
        self.nodes.push(Slot {
            generation: 0,
            node: Some(node),
        });
        NodeId {
            index,
            generation: 0,
        }
    }

    /// Append `child` as the last child of `parent`, detaching it first.
    ///
    /// # Errors
    ///
    /// Fails for unknown ids, text parents, the root as child, or cycles.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        if child == self.root {
            return Err(DomError::RootImmutable);
        }
        if !self.contains(child) {
            return Err(DomError::UnknownNode(child));
        }
        self.element_mut(parent)?;
        if self.is_inclusive_ancestor(child, parent) {
            return Err(DomError::Cycle { parent, child });
        }

        if let Some(old_parent) = self.detach(child) {
            self.notify(old_parent, MutationKind::ChildList);
        }
        if let Some(node) = self.node_mut(child) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.node_mut(parent) {
            node.children.push(child);
        }
        self.notify(parent, MutationKind::ChildList);
        Ok(())
    }

    /// Remove `id` and its subtree from the document.
    ///
    /// The removed ids stop resolving.
    ///
    /// # Errors
    ///
    /// Fails for unknown ids or the root.
    pub fn remove(&mut self, id: NodeId) -> Result<(), DomError> {
        if id == self.root {
            return Err(DomError::RootImmutable);
        }
        if !self.contains(id) {
            return Err(DomError::UnknownNode(id));
        }
        let parent = self.detach(id);
        self.free_subtree(id);
        if let Some(parent) = parent {
            self.notify(parent, MutationKind::ChildList);
        }
        Ok(())
    }

    /// Set an attribute. Unchanged values produce no mutation record.
    ///
    /// # Errors
    ///
    /// Fails for unknown ids and text nodes.
    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) -> Result<(), DomError> {
        if self.element_mut(id)?.set_attribute(name, value) {
            self.notify(id, MutationKind::Attributes {
                name: name.to_owned(),
            });
        }
        Ok(())
    }

    /// Remove an attribute, returning whether it was present.
    ///
    /// # Errors
    ///
    /// Fails for unknown ids and text nodes.
    pub fn remove_attribute(&mut self, id: NodeId, name: &str) -> Result<bool, DomError> {
        let removed = self.element_mut(id)?.remove_attribute(name);
        if removed {
            self.notify(id, MutationKind::Attributes {
                name: name.to_owned(),
            });
        }
        Ok(removed)
    }

    /// Add a class to the `class` attribute.
    ///
    /// # Errors
    ///
    /// Fails for unknown ids and text nodes.
    pub fn add_class(&mut self, id: NodeId, class: &str) -> Result<(), DomError> {
        let element = self.element_mut(id)?;
        if element.has_class(class) {
            return Ok(());
        }
        let mut classes: Vec<&str> = element.classes().collect();
        classes.push(class);
        let value = classes.join(" ");
        self.set_attribute(id, "class", &value)
    }

    /// Remove a class from the `class` attribute.
    ///
    /// # Errors
    ///
    /// Fails for unknown ids and text nodes.
    pub fn remove_class(&mut self, id: NodeId, class: &str) -> Result<(), DomError> {
        let element = self.element_mut(id)?;
        if !element.has_class(class) {
            return Ok(());
        }
        let value = element
            .classes()
            .filter(|c| *c != class)
            .collect::<Vec<_>>()
            .join(" ");
        self.set_attribute(id, "class", &value)
    }

    /// Replace all children of `id` with a single text node.
    ///
    /// # Errors
    ///
    /// Fails for unknown ids and text nodes.
    pub fn set_text_content(&mut self, id: NodeId, text: &str) -> Result<(), DomError> {
        self.element_mut(id)?;
        self.clear_children(id);
        if !text.is_empty() {
            let text_node = self.create_text(text);
            self.attach(id, text_node);
        }
        self.notify(id, MutationKind::ChildList);
        Ok(())
    }

    /// Replace all children of `id` with the parsed HTML fragment.
    ///
    /// On a parse error the element is left untouched.
    ///
    /// # Errors
    ///
    /// Fails for unknown ids, text nodes, and fragments that cannot be
    /// tokenized.
    pub fn set_inner_html(&mut self, id: NodeId, html: &str) -> Result<(), DomError> {
        self.element_mut(id)?;
        let fragment = html::parse_fragment(html)?;
        self.clear_children(id);
        for node in fragment {
            self.build_fragment(id, node);
        }
        self.notify(id, MutationKind::ChildList);
        Ok(())
    }

    /// Parse `html` and append the resulting nodes to `id`.
    ///
    /// # Errors
    ///
    /// Fails for unknown ids, text nodes, and fragments that cannot be
    /// tokenized.
    pub fn append_html(&mut self, id: NodeId, html: &str) -> Result<(), DomError> {
        self.element_mut(id)?;
        let fragment = html::parse_fragment(html)?;
        for node in fragment {
            self.build_fragment(id, node);
        }
        self.notify(id, MutationKind::ChildList);
        Ok(())
    }

    fn build_fragment(&mut self, parent: NodeId, node: FragmentNode) {
        match node {
            FragmentNode::Text(text) => {
                let id = self.insert_node(NodeData::Text(text));
                self.attach(parent, id);
            }
            FragmentNode::Element {
                tag,
                attrs,
                children,
            } => {
                let id = self.insert_node(NodeData::Element(ElementData::new(&tag, attrs)));
                self.attach(parent, id);
                for child in children {
                    self.build_fragment(id, child);
                }
            }
        }
    }

    /// Link a detached node under `parent` without emitting records.
    fn attach(&mut self, parent: NodeId, child: NodeId) {
        if let Some(node) = self.node_mut(child) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.node_mut(parent) {
            node.children.push(child);
        }
    }

    /// Unlink `id` from its parent, returning the former parent.
    fn detach(&mut self, id: NodeId) -> Option<NodeId> {
        let parent = self.node_mut(id)?.parent.take()?;
        if let Some(node) = self.node_mut(parent) {
            node.children.retain(|&child| child != id);
        }
        Some(parent)
    }

    fn clear_children(&mut self, id: NodeId) {
        let children = self
            .node_mut(id)
            .map(|node| std::mem::take(&mut node.children))
            .unwrap_or_default();
        for child in children {
            self.free_subtree(child);
        }
    }

    fn free_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(slot) = self
                .nodes
                .get_mut(current.index)
                .filter(|slot| slot.generation == current.generation)
            else {
                continue;
            };
            if let Some(node) = slot.node.take() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(current.index);
                stack.extend(node.children);
            }
        }
    }

    /// Register an observer on `target`.
    pub fn observe(
        &mut self,
        target: NodeId,
        options: ObserveOptions,
        callback: MutationCallback,
    ) -> ObserverId {
        let id = ObserverId(self.next_observer_id);
        self.next_observer_id += 1;
        self.observers.push(Observer {
            id,
            target,
            options,
            callback,
        });
        tracing::debug!(observer = id.0, %target, "Mutation observer registered");
        id
    }

    /// Unregister an observer. Returns `false` if it was not registered.
    pub fn disconnect(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|observer| observer.id != id);
        self.observers.len() != before
    }

    /// Run `f` with every mutation attributed to `origin`.
    ///
    /// The previous origin is restored even if `f` panics.
    pub fn with_origin<R>(
        &mut self,
        origin: MutationOrigin,
        f: impl FnOnce(&mut Self) -> R,
    ) -> R {
        let previous = std::mem::replace(&mut self.origin, origin);
        let mut guard = OriginGuard {
            doc: self,
            previous,
        };
        f(&mut guard)
    }

    fn notify(&self, target: NodeId, kind: MutationKind) {
        if self.observers.is_empty() || !self.is_connected(target) {
            return;
        }
        let record = MutationRecord {
            target,
            kind,
            origin: self.origin,
        };
        for observer in &self.observers {
            let in_scope = if observer.options.subtree {
                self.is_inclusive_ancestor(observer.target, target)
            } else {
                observer.target == target
            };
            if in_scope && observer.options.wants(&record) {
                (observer.callback)(std::slice::from_ref(&record));
            }
        }
    }
}

/// Restores the mutation origin when dropped.
struct OriginGuard<'a> {
    doc: &'a mut Document,
    previous: MutationOrigin,
}

impl std::ops::Deref for OriginGuard<'_> {
    type Target = Document;

    fn deref(&self) -> &Document {
        self.doc
    }
}

impl std::ops::DerefMut for OriginGuard<'_> {
    fn deref_mut(&mut self) -> &mut Document {
        self.doc
    }
}

impl Drop for OriginGuard<'_> {
    fn drop(&mut self) {
        self.doc.origin = self.previous;
    }
}

/// Pre-order iterator returned by [`Document::descendants`].
pub struct Descendants<'a> {
    doc: &'a Document,
    stack: Vec<NodeId>,
}

impl Iterator for Descendants<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        self.stack
            .extend(self.doc.children(id).iter().rev().copied());
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex as StdMutex;

    fn recording_observer() -> (MutationCallback, Arc<StdMutex<Vec<MutationRecord>>>) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: MutationCallback = Arc::new(move |records: &[MutationRecord]| {
            sink.lock().unwrap().extend_from_slice(records);
        });
        (callback, seen)
    }

    #[test]
    fn test_parse_and_serialize_round_trip() {
        let html = r#"<div class="markdown-body"><p>Hi <code>x</code></p><hr /></div>"#;
        let doc = Document::parse(html).unwrap();
        assert_eq!(doc.inner_html(doc.root()), html);
    }

    #[test]
    fn test_find_first_in_document_order() {
        let doc = Document::parse(
            r#"<div class="a"><span class="t" id="1"></span></div><span class="t" id="2"></span>"#,
        )
        .unwrap();
        let found = doc.find_first(doc.root(), |_, el| el.has_class("t")).unwrap();
        assert_eq!(doc.element(found).unwrap().attribute("id"), Some("1"));
        assert_eq!(doc.find_all(doc.root(), |_, el| el.has_class("t")).len(), 2);
    }

    #[test]
    fn test_text_content_concatenates_descendants() {
        let doc = Document::parse("<p>a<b>b</b>c</p>").unwrap();
        let p = doc.child_elements(doc.root()).next().unwrap();
        assert_eq!(doc.text_content(p), "abc");
    }

    #[test]
    fn test_set_inner_html_replaces_children_and_invalidates_old_ids() {
        let mut doc = Document::parse("<div><p>old</p></div>").unwrap();
        let div = doc.child_elements(doc.root()).next().unwrap();
        let old_p = doc.child_elements(div).next().unwrap();

        doc.set_inner_html(div, "<span>new</span>").unwrap();

        assert!(!doc.contains(old_p));
        assert_eq!(doc.inner_html(div), "<span>new</span>");
    }

    #[test]
    fn test_set_inner_html_parse_error_leaves_element_untouched() {
        let mut doc = Document::parse("<div><p>keep</p></div>").unwrap();
        let div = doc.child_elements(doc.root()).next().unwrap();

        let result = doc.set_inner_html(div, "<p attr=\"unterminated></p>");

        assert!(result.is_err());
        assert_eq!(doc.inner_html(div), "<p>keep</p>");
    }

    #[test]
    fn test_append_child_rejects_cycles() {
        let mut doc = Document::new();
        let outer = doc.create_element("div");
        let inner = doc.create_element("div");
        doc.append_child(doc.root(), outer).unwrap();
        doc.append_child(outer, inner).unwrap();

        let err = doc.append_child(inner, outer).unwrap_err();
        assert!(matches!(err, DomError::Cycle { .. }));
    }

    #[test]
    fn test_remove_root_rejected() {
        let mut doc = Document::new();
        let root = doc.root();
        assert!(matches!(doc.remove(root), Err(DomError::RootImmutable)));
    }

    #[test]
    fn test_class_helpers() {
        let mut doc = Document::parse(r#"<button class="copy-button"></button>"#).unwrap();
        let button = doc.child_elements(doc.root()).next().unwrap();

        doc.add_class(button, "copied").unwrap();
        assert!(doc.element(button).unwrap().has_class("copied"));
        doc.remove_class(button, "copied").unwrap();
        assert_eq!(
            doc.element(button).unwrap().attribute("class"),
            Some("copy-button")
        );
    }

    #[test]
    fn test_observer_receives_subtree_records() {
        let mut doc = Document::parse(r#"<div class="viewer"><div class="body"></div></div>"#)
            .unwrap();
        let viewer = doc.child_elements(doc.root()).next().unwrap();
        let body = doc.child_elements(viewer).next().unwrap();
        let (callback, seen) = recording_observer();
        doc.observe(viewer, ObserveOptions::subtree(), callback);

        doc.set_inner_html(body, "<p>x</p>").unwrap();
        doc.set_attribute(body, "data-x", "1").unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].is_child_list());
        assert_eq!(seen[0].target, body);
        assert_eq!(
            seen[1].kind,
            MutationKind::Attributes {
                name: "data-x".to_owned()
            }
        );
    }

    #[test]
    fn test_observer_ignores_nodes_outside_target() {
        let mut doc = Document::parse("<div></div><aside></aside>").unwrap();
        let (div, aside) = {
            let mut elements = doc.child_elements(doc.root());
            (elements.next().unwrap(), elements.next().unwrap())
        };
        let (callback, seen) = recording_observer();
        doc.observe(div, ObserveOptions::subtree(), callback);

        doc.set_text_content(aside, "elsewhere").unwrap();

        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unchanged_attribute_produces_no_record() {
        let mut doc = Document::parse(r#"<div data-x="1"></div>"#).unwrap();
        let div = doc.child_elements(doc.root()).next().unwrap();
        let (callback, seen) = recording_observer();
        doc.observe(doc.root(), ObserveOptions::subtree(), callback);

        doc.set_attribute(div, "data-x", "1").unwrap();

        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_with_origin_tags_records_and_restores() {
        let mut doc = Document::parse("<div></div>").unwrap();
        let div = doc.child_elements(doc.root()).next().unwrap();
        let (callback, seen) = recording_observer();
        doc.observe(doc.root(), ObserveOptions::subtree(), callback);

        doc.with_origin(MutationOrigin::Pipeline, |doc| {
            doc.set_attribute(div, "data-a", "1").unwrap();
        });
        doc.set_attribute(div, "data-b", "1").unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].origin, MutationOrigin::Pipeline);
        assert_eq!(seen[1].origin, MutationOrigin::External);
    }

    #[test]
    fn test_disconnect_stops_delivery() {
        let mut doc = Document::parse("<div></div>").unwrap();
        let div = doc.child_elements(doc.root()).next().unwrap();
        let (callback, seen) = recording_observer();
        let id = doc.observe(doc.root(), ObserveOptions::subtree(), callback);

        assert!(doc.disconnect(id));
        doc.set_attribute(div, "data-a", "1").unwrap();

        assert!(seen.lock().unwrap().is_empty());
        assert!(!doc.disconnect(id));
    }

    #[test]
    fn test_with_origin_restored_after_panic() {
        let mut doc = Document::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            doc.with_origin(MutationOrigin::Pipeline, |_| panic!("renderer crashed"));
        }));
        assert!(result.is_err());

        let (callback, seen) = recording_observer();
        doc.observe(doc.root(), ObserveOptions::subtree(), callback);
        let root = doc.root();
        doc.set_attribute(root, "data-a", "1").unwrap();

        assert_eq!(seen.lock().unwrap()[0].origin, MutationOrigin::External);
    }

    #[test]
    fn test_removed_slots_are_reused() {
        let mut doc = Document::parse("<div></div>").unwrap();
        let div = doc.child_elements(doc.root()).next().unwrap();

        for _ in 0..50 {
            doc.set_inner_html(div, "<p><b>a</b></p><p>c</p>").unwrap();
        }

        // html, div and one fragment of five nodes
        assert_eq!(doc.nodes.len(), 7);
        assert_eq!(
            format!("{doc:?}"),
            "Document { nodes: 7, observers: 0, origin: External }"
        );
    }

    #[test]
    fn test_stale_id_does_not_resolve_after_reuse() {
        let mut doc = Document::parse("<div><span>old</span></div>").unwrap();
        let div = doc.child_elements(doc.root()).next().unwrap();
        let old = doc.child_elements(div).next().unwrap();

        doc.remove(old).unwrap();
        let fresh = doc.create_element("em");

        assert_eq!(fresh.index, old.index);
        assert_ne!(fresh, old);
        assert!(!doc.contains(old));
        assert_eq!(doc.element(fresh).unwrap().tag(), "em");
        assert!(matches!(
            doc.set_attribute(old, "class", "x"),
            Err(DomError::UnknownNode(_))
        ));
    }

    #[test]
    fn test_detached_mutations_not_reported() {
        let mut doc = Document::new();
        let (callback, seen) = recording_observer();
        doc.observe(doc.root(), ObserveOptions::subtree(), callback);

        let detached = doc.create_element("div");
        doc.set_attribute(detached, "class", "x").unwrap();

        assert!(seen.lock().unwrap().is_empty());
    }
}
