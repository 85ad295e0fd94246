//! Rendering backends for the mdv render pipeline.
//!
//! Each type implements one capability trait from `mdv-render`:
//!
//! - [`KatexMath`]: [`MathRenderer`](mdv_render::MathRenderer) on the `katex` crate.
//! - [`SyntectHighlighter`]: [`CodeHighlighter`](mdv_render::CodeHighlighter)
//!   producing class-based markup, with a per-theme stylesheet.
//! - [`KrokiDiagrams`]: [`DiagramRenderer`](mdv_render::DiagramRenderer)
//!   backed by a Kroki server.

mod highlight;
mod kroki;
mod math;

pub use highlight::{CLASS_PREFIX, SyntectHighlighter};
pub use kroki::{DEFAULT_CACHE_ENTRIES, KrokiDiagrams, KrokiError};
pub use math::KatexMath;
