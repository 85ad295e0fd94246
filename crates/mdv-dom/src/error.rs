//! Error types for document operations.

use crate::document::NodeId;

/// Error from a document mutation or fragment parse.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DomError {
    /// The node id does not resolve (never existed or was removed).
    #[error("node {0} does not exist")]
    UnknownNode(NodeId),

    /// The operation requires an element but the node is a text node.
    #[error("node {0} is not an element")]
    NotAnElement(NodeId),

    /// Appending would make a node its own ancestor.
    #[error("cannot append node {child} under its own descendant {parent}")]
    Cycle {
        /// Intended parent.
        parent: NodeId,
        /// Node being appended.
        child: NodeId,
    },

    /// The document root cannot be removed or re-parented.
    #[error("the document root cannot be moved or removed")]
    RootImmutable,

    /// HTML fragment could not be tokenized.
    #[error("HTML parse error")]
    HtmlParse(#[from] quick_xml::Error),

    /// Encoding error while decoding fragment text.
    #[error("encoding error")]
    Encoding(#[from] quick_xml::encoding::EncodingError),
}
