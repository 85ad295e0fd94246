//! DOM-equivalent element tree for the mdv viewer.
//!
//! The render pipeline never talks to a browser. Instead it works against a
//! [`Document`]: an arena of element and text nodes that upstream producers
//! fill with pre-rendered HTML and that the pipeline rewrites in place.
//!
//! # Features
//!
//! - Arena nodes addressed by copyable [`NodeId`]s. Slots of removed nodes
//!   are recycled under a new generation, so a stale id simply stops
//!   resolving.
//! - HTML fragment parsing ([`Document::set_inner_html`]) via `quick-xml`,
//!   tolerant of void elements, named entities and mismatched end tags.
//! - Mutation observation ([`Document::observe`]) with child-list and
//!   attribute records, mirroring the browser `MutationObserver`.
//! - Mutation origin tagging ([`Document::with_origin`]) so the pipeline can
//!   tell its own writes apart from external ones.
//!
//! # Example
//!
//! ```
//! use mdv_dom::Document;
//!
//! let mut doc = Document::new();
//! let body = doc.create_element("div");
//! doc.append_child(doc.root(), body).unwrap();
//! doc.set_inner_html(body, r#"<p class="lead">Hello <b>world</b></p>"#).unwrap();
//!
//! assert_eq!(doc.text_content(body), "Hello world");
//! ```

mod document;
mod entities;
mod error;
mod html;
mod observer;

pub use document::{Descendants, Document, ElementData, NodeData, NodeId, SharedDocument, lock_document};
pub use error::DomError;
pub use observer::{
    MutationCallback, MutationKind, MutationOrigin, MutationRecord, ObserveOptions, ObserverId,
};
