//! Copy-to-clipboard affordance for `pre` blocks.
//!
//! The executor attaches a button to every `pre` in the content root as the
//! last stage of a pass. The host forwards clicks to
//! [`CopyAffordance::activate`], which copies the block's source and shows
//! transient feedback on the button.

use std::sync::Arc;
use std::time::Duration;

use mdv_dom::{Document, DomError, MutationOrigin, NodeId, SharedDocument, lock_document};

use crate::adapter::Clipboard;
use crate::error::CoordinatorError;
use crate::unit::ORIGINAL_CONTENT_ATTR;

/// Marker set on a `pre` once its button is attached.
pub const BUTTON_ADDED_ATTR: &str = "data-copy-button-added";

/// Class of the copy button.
pub const BUTTON_CLASS: &str = "copy-button";

/// Accessible label of the copy button.
pub const BUTTON_LABEL: &str = "Copy code to clipboard";

/// Tabler `copy` icon.
pub const COPY_ICON: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" width="24" height="24" viewBox="0 0 24 24" fill="none" stroke="currentColor" stroke-width="2" stroke-linecap="round" stroke-linejoin="round" class="icon icon-tabler icons-tabler-outline icon-tabler-copy"><path stroke="none" d="M0 0h24v24H0z" fill="none"/><path d="M7 7m0 2.667a2.667 2.667 0 0 1 2.667 -2.667h8.666a2.667 2.667 0 0 1 2.667 2.667v8.666a2.667 2.667 0 0 1 -2.667 2.667h-8.666a2.667 2.667 0 0 1 -2.667 -2.667z"/><path d="M4.012 16.737a2.005 2.005 0 0 1 -1.012 -1.737v-10c0 -1.1 .9 -2 2 -2h10c.75 0 1.158 .385 1.5 1"/></svg>"#;

/// Tabler `check` icon.
pub const CHECK_ICON: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" width="24" height="24" viewBox="0 0 24 24" fill="none" stroke="currentColor" stroke-width="2" stroke-linecap="round" stroke-linejoin="round" class="icon icon-tabler icons-tabler-outline icon-tabler-check"><path stroke="none" d="M0 0h24v24H0z" fill="none"/><path d="M5 12l5 5l10 -10"/></svg>"#;

/// Tabler `x` icon.
pub const ERROR_ICON: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" width="24" height="24" viewBox="0 0 24 24" fill="none" stroke="currentColor" stroke-width="2" stroke-linecap="round" stroke-linejoin="round" class="icon icon-tabler icons-tabler-outline icon-tabler-x"><path stroke="none" d="M0 0h24v24H0z" fill="none"/><path d="M18 6l-12 12"/><path d="M6 6l12 12"/></svg>"#;

/// Result of a copy activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    /// Text reached the clipboard.
    Copied,
    /// Clipboard write failed.
    Failed,
}

impl CopyOutcome {
    fn icon(self) -> &'static str {
        match self {
            Self::Copied => CHECK_ICON,
            Self::Failed => ERROR_ICON,
        }
    }

    /// Class shown on the button while feedback is visible.
    #[must_use]
    pub fn feedback_class(self) -> &'static str {
        match self {
            Self::Copied => "copied",
            Self::Failed => "error",
        }
    }
}

/// Attach a copy button to every `pre` below `content_root` that lacks one.
///
/// Returns the number of buttons attached.
pub(crate) fn attach_all(doc: &mut Document, content_root: NodeId) -> Result<usize, DomError> {
    let targets = doc.find_all(content_root, |_, el| {
        el.tag() == "pre" && !el.has_attribute(BUTTON_ADDED_ATTR)
    });
    for &pre in &targets {
        attach(doc, pre)?;
    }
    if !targets.is_empty() {
        tracing::debug!(count = targets.len(), "Attached copy buttons");
    }
    Ok(targets.len())
}

fn attach(doc: &mut Document, pre: NodeId) -> Result<(), DomError> {
    doc.set_attribute(pre, BUTTON_ADDED_ATTR, "yes")?;
    let style = match doc.element(pre).and_then(|el| el.attribute("style")) {
        None | Some("") => "position: relative".to_owned(),
        Some(existing) if existing.contains("position:") => existing.to_owned(),
        Some(existing) => format!("{}; position: relative", existing.trim_end_matches(';')),
    };
    doc.set_attribute(pre, "style", &style)?;

    let button = doc.create_element("button");
    doc.set_attribute(button, "type", "button")?;
    doc.set_attribute(button, "class", BUTTON_CLASS)?;
    doc.set_attribute(button, "aria-label", BUTTON_LABEL)?;
    doc.set_inner_html(button, COPY_ICON)?;
    doc.append_child(pre, button)
}

/// Remove the button and marker from `pre` so a later pass re-attaches them.
pub(crate) fn clear_wiring(doc: &mut Document, pre: NodeId) -> Result<(), DomError> {
    let buttons: Vec<NodeId> = doc
        .child_elements(pre)
        .filter(|&child| is_copy_button(doc, child))
        .collect();
    for button in buttons {
        doc.remove(button)?;
    }
    doc.remove_attribute(pre, BUTTON_ADDED_ATTR)?;
    Ok(())
}

fn is_copy_button(doc: &Document, id: NodeId) -> bool {
    doc.element(id)
        .is_some_and(|el| el.tag() == "button" && el.has_class(BUTTON_CLASS))
}

/// The `pre` a copy button belongs to.
fn copy_target(doc: &Document, button: NodeId) -> Option<NodeId> {
    if !is_copy_button(doc, button) {
        return None;
    }
    doc.parent(button)
        .filter(|&pre| doc.element(pre).is_some_and(|el| el.tag() == "pre"))
}

/// Text a copy of `pre` should place on the clipboard.
///
/// Preserved source wins over rendered output, so copying a rendered formula
/// or diagram yields its source rather than markup.
fn content_to_copy(doc: &Document, pre: NodeId) -> String {
    let outside_buttons = |id: NodeId| {
        !doc.children(pre)
            .iter()
            .any(|&child| is_copy_button(doc, child) && doc.is_inclusive_ancestor(child, id))
    };

    if let Some(original) = doc.element(pre).and_then(|el| el.attribute(ORIGINAL_CONTENT_ATTR)) {
        return original.to_owned();
    }
    if let Some(original) = doc
        .find_first(pre, |id, el| {
            el.has_attribute(ORIGINAL_CONTENT_ATTR) && outside_buttons(id)
        })
        .and_then(|id| doc.element(id))
        .and_then(|el| el.attribute(ORIGINAL_CONTENT_ATTR))
    {
        return original.to_owned();
    }
    if let Some(code) = doc.find_first(pre, |id, el| el.tag() == "code" && outside_buttons(id)) {
        return doc.text_content(code);
    }
    doc.children(pre)
        .iter()
        .filter(|&&child| !is_copy_button(doc, child))
        .map(|&child| doc.text_content(child))
        .collect()
}

/// Handles clicks on copy buttons.
#[derive(Clone)]
pub struct CopyAffordance {
    document: SharedDocument,
    clipboard: Arc<dyn Clipboard>,
    feedback_delay: Duration,
}

impl std::fmt::Debug for CopyAffordance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyAffordance")
            .field("feedback_delay", &self.feedback_delay)
            .finish_non_exhaustive()
    }
}

impl CopyAffordance {
    /// Create an affordance writing to `clipboard`.
    #[must_use]
    pub fn new(
        document: SharedDocument,
        clipboard: Arc<dyn Clipboard>,
        feedback_delay: Duration,
    ) -> Self {
        Self {
            document,
            clipboard,
            feedback_delay,
        }
    }

    /// Copy the block owning `button` and show feedback on the button.
    ///
    /// A clipboard failure is not an error: it is reported as
    /// [`CopyOutcome::Failed`] and shown on the button. The feedback reverts
    /// after the configured delay.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::NotACopyButton`] if `button` is not a copy
    /// button inside a `pre`.
    pub async fn activate(&self, button: NodeId) -> Result<CopyOutcome, CoordinatorError> {
        let content = {
            let doc = lock_document(&self.document);
            let pre = copy_target(&doc, button).ok_or(CoordinatorError::NotACopyButton(button))?;
            content_to_copy(&doc, pre)
        };

        let outcome = match self.clipboard.write_text(&content).await {
            Ok(()) => {
                tracing::debug!(chars = content.chars().count(), "Copied block to clipboard");
                CopyOutcome::Copied
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to copy block");
                CopyOutcome::Failed
            }
        };

        self.show_feedback(button, outcome)?;

        let affordance = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(affordance.feedback_delay).await;
            if let Err(e) = affordance.reset_feedback(button, outcome) {
                tracing::warn!(error = %e, "Failed to reset copy button");
            }
        });

        Ok(outcome)
    }

    fn show_feedback(&self, button: NodeId, outcome: CopyOutcome) -> Result<(), DomError> {
        let mut doc = lock_document(&self.document);
        if !doc.contains(button) {
            return Ok(());
        }
        doc.with_origin(MutationOrigin::Pipeline, |doc| {
            doc.set_inner_html(button, outcome.icon())?;
            doc.add_class(button, outcome.feedback_class())
        })
    }

    fn reset_feedback(&self, button: NodeId, outcome: CopyOutcome) -> Result<(), DomError> {
        let mut doc = lock_document(&self.document);
        if !doc.contains(button) {
            return Ok(());
        }
        doc.with_origin(MutationOrigin::Pipeline, |doc| {
            doc.set_inner_html(button, COPY_ICON)?;
            doc.remove_class(button, outcome.feedback_class())
        })
    }
}
