//! Error types for rendering and coordination.

use mdv_dom::{DomError, NodeId};

/// Failure of a single adapter invocation.
///
/// Adapter errors are contained at the unit they were raised for: the
/// executor turns them into inline error markup and never propagates them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    /// Math expression could not be typeset.
    #[error("Math rendering failed: {0}")]
    Math(String),

    /// Highlighter failed on a registered language.
    #[error("Highlighting failed for {language}: {message}")]
    Highlight {
        /// Language token from the `language-*` class.
        language: String,
        /// Error message.
        message: String,
    },

    /// Diagram source was rejected or the backend failed.
    #[error("Diagram rendering failed: {0}")]
    Diagram(String),

    /// Clipboard write was refused.
    #[error("Clipboard write failed: {0}")]
    Clipboard(String),

    /// The task running the adapter panicked or was cancelled.
    #[error("Render task failed: {0}")]
    Task(String),
}

/// Error from the coordinator API itself.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// `init` was called outside a tokio runtime.
    #[error("Render coordinator requires a tokio runtime: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    /// Document operation failed.
    #[error(transparent)]
    Dom(#[from] DomError),

    /// The node is not a copy button attached by the pipeline.
    #[error("node {0} is not a copy button")]
    NotACopyButton(NodeId),

    /// Copy was requested but no clipboard was configured.
    #[error("no clipboard configured")]
    NoClipboard,
}
