//! Mutation observation types.
//!
//! Observers registered with [`Document::observe`](crate::Document::observe)
//! receive [`MutationRecord`]s synchronously at the end of every mutating call
//! that touches their target.

use std::sync::Arc;

use crate::document::NodeId;

/// Kind of change captured by a [`MutationRecord`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MutationKind {
    /// Children of the target were added, removed or replaced.
    ChildList,
    /// An attribute of the target changed.
    Attributes {
        /// Attribute name.
        name: String,
    },
}

/// Who performed a mutation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MutationOrigin {
    /// Any writer other than the render pipeline (content injection, host UI).
    #[default]
    External,
    /// The render pipeline itself.
    Pipeline,
}

/// A single observed change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MutationRecord {
    /// Node whose children or attributes changed.
    pub target: NodeId,
    /// Kind of change.
    pub kind: MutationKind,
    /// Writer that caused the change.
    pub origin: MutationOrigin,
}

impl MutationRecord {
    /// Whether this record is a child-list change.
    #[must_use]
    pub fn is_child_list(&self) -> bool {
        matches!(self.kind, MutationKind::ChildList)
    }

    /// Whether this record is an attribute change.
    #[must_use]
    pub fn is_attributes(&self) -> bool {
        matches!(self.kind, MutationKind::Attributes { .. })
    }
}

/// Which records an observer wants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObserveOptions {
    /// Report child-list changes.
    pub child_list: bool,
    /// Report attribute changes.
    pub attributes: bool,
    /// Report changes anywhere below the target, not only on the target.
    pub subtree: bool,
}

impl ObserveOptions {
    /// Child-list and attribute changes in the whole subtree.
    #[must_use]
    pub fn subtree() -> Self {
        Self {
            child_list: true,
            attributes: true,
            subtree: true,
        }
    }

    pub(crate) fn wants(&self, record: &MutationRecord) -> bool {
        match record.kind {
            MutationKind::ChildList => self.child_list,
            MutationKind::Attributes { .. } => self.attributes,
        }
    }
}

impl Default for ObserveOptions {
    fn default() -> Self {
        Self::subtree()
    }
}

/// Handle identifying a registered observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(pub(crate) u64);

/// Callback invoked with the records matching an observer.
///
/// Runs synchronously inside the mutating call, while the caller still holds
/// the document. It must not try to lock the owning
/// [`SharedDocument`](crate::SharedDocument).
pub type MutationCallback = Arc<dyn Fn(&[MutationRecord]) + Send + Sync>;

pub(crate) struct Observer {
    pub(crate) id: ObserverId,
    pub(crate) target: NodeId,
    pub(crate) options: ObserveOptions,
    pub(crate) callback: MutationCallback,
}
