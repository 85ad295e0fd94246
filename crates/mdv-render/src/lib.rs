//! Render coordination for the mdv markdown viewer.
//!
//! Upstream producers write pre-rendered HTML into the viewer's content root.
//! This crate finds the units that still need client-side work (math, code
//! blocks, diagrams), renders them through pluggable adapters and keeps doing
//! so as the content changes.
//!
//! # Architecture
//!
//! - [`scan`] finds unprocessed units of one [`UnitKind`].
//! - [`BatchExecutor`] runs one pass: math, code, diagrams (concurrently),
//!   then copy buttons.
//! - [`RenderCoordinator`] observes the container and coalesces changes into
//!   single passes, one at a time.
//! - [`ThemeSignal`] resolves the user's theme preference and re-renders only
//!   diagrams when it changes.
//!
//! # Example
//!
//! ```no_run
//! use mdv_dom::Document;
//! use mdv_render::RenderCoordinator;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let document = Document::parse(
//!     r#"<div class="markdown-viewer"><article class="markdown-body"></article></div>"#,
//! )?
//! .into_shared();
//!
//! let coordinator = RenderCoordinator::builder(document).init()?;
//! coordinator.settled().await;
//! assert_eq!(coordinator.stats().passes, 1);
//! # Ok(())
//! # }
//! ```

mod adapter;
mod coordinator;
mod copy;
mod error;
mod executor;
mod scanner;
mod theme;
mod unit;

#[cfg(test)]
mod testing;

pub use adapter::{
    Adapters, Clipboard, CodeHighlighter, DiagramRenderer, DiagramRequest, MathMode, MathRenderer,
};
pub use coordinator::{
    CoordinatorBuilder, CoordinatorConfig, CoordinatorState, CoordinatorStats, RenderCoordinator,
    STYLESHEET_ID,
};
pub use copy::{BUTTON_ADDED_ATTR, BUTTON_CLASS, CopyAffordance, CopyOutcome};
pub use error::{AdapterError, CoordinatorError};
pub use executor::{BatchExecutor, PassReport, PassScope, StageReport};
pub use mdv_config::BusyMutationPolicy;
pub use scanner::{ViewerSelectors, find_container, find_content_root, scan};
pub use theme::{
    MemoryThemeStore, THEME_ATTR, Theme, ThemePreference, ThemeSignal, ThemeStore, resolve,
};
pub use unit::{
    ERROR_CLASS, ORIGINAL_CONTENT_ATTR, RenderableUnit, STATUS_ATTR, UnitKind, UnitStatus,
    code_language,
};
