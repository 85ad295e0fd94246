//! Batch render executor.
//!
//! One pass processes the content root in a fixed order: math, code
//! highlighting, diagrams, copy buttons. Math and code run synchronously under
//! the document lock. Diagram sources are collected under the lock, rendered
//! concurrently with the lock released, and applied once every render has
//! settled. Every write is tagged [`MutationOrigin::Pipeline`].

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mdv_dom::{Document, DomError, MutationOrigin, NodeId, SharedDocument, lock_document};
use tokio::task::JoinSet;

use crate::adapter::{Adapters, DiagramRequest, MathMode};
use crate::copy;
use crate::error::AdapterError;
use crate::scanner::{ViewerSelectors, find_content_root, scan};
use crate::theme::Theme;
use crate::unit::{
    ERROR_CLASS, ORIGINAL_CONTENT_ATTR, RenderableUnit, STATUS_ATTR, UnitKind, UnitStatus,
};

/// Which stages a pass runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassScope {
    /// Math, code, diagrams, copy buttons.
    Full,
    /// Diagrams and copy buttons only.
    DiagramsOnly,
}

impl PassScope {
    /// Smallest scope covering both.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        if self == Self::Full || other == Self::Full {
            Self::Full
        } else {
            Self::DiagramsOnly
        }
    }

    fn includes_math_and_code(self) -> bool {
        self == Self::Full
    }
}

/// Outcome counts for one stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageReport {
    /// Units rendered successfully.
    pub rendered: usize,
    /// Units that now show an error.
    pub errored: usize,
    /// Units left as they were (empty source, unregistered language, or
    /// changed while rendering).
    pub skipped: usize,
}

/// Summary of one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    /// Stages that ran.
    pub scope: PassScope,
    /// Theme diagrams were rendered with.
    pub theme: Theme,
    /// Math stage.
    pub math: StageReport,
    /// Code highlighting stage.
    pub code: StageReport,
    /// Diagram stage.
    pub diagrams: StageReport,
    /// Copy buttons attached.
    pub copy_buttons: usize,
    /// Adapter invocations across all stages.
    pub adapter_calls: usize,
    /// The content root was missing or vanished mid-pass.
    pub abandoned: bool,
    /// Wall time of the pass.
    pub elapsed: Duration,
}

impl PassReport {
    fn new(scope: PassScope, theme: Theme) -> Self {
        Self {
            scope,
            theme,
            math: StageReport::default(),
            code: StageReport::default(),
            diagrams: StageReport::default(),
            copy_buttons: 0,
            adapter_calls: 0,
            abandoned: false,
            elapsed: Duration::ZERO,
        }
    }

    /// Units that ended in an error across all stages.
    #[must_use]
    pub fn errors(&self) -> usize {
        self.math.errored + self.code.errored + self.diagrams.errored
    }
}

/// Runs render passes over a document.
#[derive(Debug, Clone)]
pub struct BatchExecutor {
    document: SharedDocument,
    selectors: ViewerSelectors,
    adapters: Adapters,
}

impl BatchExecutor {
    /// Create an executor for `document`.
    #[must_use]
    pub fn new(document: SharedDocument, selectors: ViewerSelectors, adapters: Adapters) -> Self {
        Self {
            document,
            selectors,
            adapters,
        }
    }

    /// Backends used by this executor.
    #[must_use]
    pub fn adapters(&self) -> &Adapters {
        &self.adapters
    }

    /// Run one pass.
    ///
    /// Per-unit failures are rendered inline and counted in the report. The
    /// pass is abandoned, not failed, when the content root is missing.
    pub async fn run(&self, scope: PassScope, theme: Theme) -> PassReport {
        let start = Instant::now();
        let mut report = PassReport::new(scope, theme);

        let Some((content_root, diagram_units)) = self.prepare(scope, &mut report) else {
            tracing::debug!(?scope, "Content root not found, skipping pass");
            report.abandoned = true;
            report.elapsed = start.elapsed();
            return report;
        };

        let results = self.render_diagrams(diagram_units, theme, &mut report).await;

        if !self.finish(content_root, results, &mut report) {
            tracing::warn!(?scope, "Content root vanished during pass, abandoning it");
            report.abandoned = true;
        }

        report.elapsed = start.elapsed();
        tracing::info!(
            ?scope,
            %theme,
            math = report.math.rendered,
            code = report.code.rendered,
            diagrams = report.diagrams.rendered,
            errors = report.errors(),
            elapsed_ms = report.elapsed.as_millis(),
            "Render pass completed"
        );
        report
    }

    /// Run the synchronous stages and collect diagram work.
    fn prepare(
        &self,
        scope: PassScope,
        report: &mut PassReport,
    ) -> Option<(NodeId, Vec<RenderableUnit>)> {
        let mut doc = lock_document(&self.document);
        let content_root = find_content_root(&doc, &self.selectors)?;

        doc.with_origin(MutationOrigin::Pipeline, |doc| {
            if scope.includes_math_and_code() {
                self.render_math(doc, content_root, report);
                self.highlight_code(doc, content_root, report);
            }
        });

        if self.adapters.diagrams.is_none() {
            return Some((content_root, Vec::new()));
        }
        let (units, empty): (Vec<_>, Vec<_>) = scan(&doc, content_root, UnitKind::Diagram)
            .into_iter()
            .partition(|unit| !unit.source.is_empty());
        report.diagrams.skipped += empty.len();
        Some((content_root, units))
    }

    fn render_math(&self, doc: &mut Document, content_root: NodeId, report: &mut PassReport) {
        let Some(math) = &self.adapters.math else {
            return;
        };
        for kind in UnitKind::MATH {
            let mode = if kind == UnitKind::InlineMath {
                MathMode::Inline
            } else {
                MathMode::Display
            };
            for unit in scan(doc, content_root, kind) {
                if unit.source.is_empty() {
                    report.math.skipped += 1;
                    continue;
                }
                report.adapter_calls += 1;
                let outcome = contain_panic(|| math.render(&unit.source, mode))
                    .and_then(|html| {
                        doc.set_inner_html(unit.id, &html)
                            .map_err(|e| AdapterError::Math(format!("unusable output: {e}")))
                    });
                settle_unit(doc, &unit, outcome, &mut report.math);
            }
        }
    }

    fn highlight_code(&self, doc: &mut Document, content_root: NodeId, report: &mut PassReport) {
        let Some(highlighter) = &self.adapters.highlighter else {
            return;
        };
        for unit in scan(doc, content_root, UnitKind::CodeBlock) {
            let language = unit.language.as_deref().unwrap_or_default();
            report.adapter_calls += 1;
            let status = match contain_panic(|| highlighter.highlight(&unit.source, language)) {
                Ok(Some(html)) => match doc.set_inner_html(unit.id, &html) {
                    Ok(()) => {
                        report.code.rendered += 1;
                        UnitStatus::Processed
                    }
                    Err(e) => {
                        tracing::warn!(
                            language,
                            error = %e,
                            "Highlighter output unusable, keeping plain code"
                        );
                        report.code.errored += 1;
                        UnitStatus::Errored
                    }
                },
                Ok(None) => {
                    tracing::debug!(language, "Language not registered, leaving block as is");
                    report.code.skipped += 1;
                    UnitStatus::Processed
                }
                Err(e) => {
                    tracing::warn!(
                        language,
                        error = %e,
                        "Highlighting failed, keeping plain code"
                    );
                    report.code.errored += 1;
                    UnitStatus::Errored
                }
            };
            if let Err(e) = set_status(doc, unit.id, status) {
                tracing::warn!(node = %unit.id, error = %e, "Failed to record unit status");
            }
        }
    }

    /// Render diagrams concurrently, one task per unit.
    async fn render_diagrams(
        &self,
        units: Vec<RenderableUnit>,
        theme: Theme,
        report: &mut PassReport,
    ) -> Vec<(RenderableUnit, Result<String, AdapterError>)> {
        let Some(renderer) = &self.adapters.diagrams else {
            return Vec::new();
        };
        if units.is_empty() {
            return Vec::new();
        }

        let mut tasks = JoinSet::new();
        let mut pending = HashMap::with_capacity(units.len());
        for unit in units {
            let renderer = Arc::clone(renderer);
            let request = DiagramRequest::new(unit.source.clone(), theme);
            let handle = tasks.spawn(async move { renderer.render(request).await });
            pending.insert(handle.id(), unit);
        }
        report.adapter_calls += pending.len();
        tracing::debug!(count = pending.len(), %theme, "Rendering diagrams");

        let mut results = Vec::with_capacity(pending.len());
        while let Some(joined) = tasks.join_next_with_id().await {
            let (task_id, result) = match joined {
                Ok((task_id, result)) => (task_id, result),
                Err(e) => (e.id(), Err(AdapterError::Task(e.to_string()))),
            };
            if let Some(unit) = pending.remove(&task_id) {
                results.push((unit, result));
            }
        }
        results
    }

    /// Apply diagram results and attach copy buttons.
    ///
    /// Returns `false` if the content root is gone.
    fn finish(
        &self,
        content_root: NodeId,
        results: Vec<(RenderableUnit, Result<String, AdapterError>)>,
        report: &mut PassReport,
    ) -> bool {
        let mut doc = lock_document(&self.document);
        if !doc.is_connected(content_root) {
            return false;
        }

        doc.with_origin(MutationOrigin::Pipeline, |doc| {
            for (unit, result) in results {
                if !still_pending(doc, &unit) {
                    tracing::debug!(node = %unit.id, "Diagram changed while rendering, skipping");
                    report.diagrams.skipped += 1;
                    continue;
                }
                let outcome = result.and_then(|svg| {
                    doc.set_inner_html(unit.id, &svg)
                        .map_err(|e| AdapterError::Diagram(format!("unusable output: {e}")))
                });
                settle_unit(doc, &unit, outcome, &mut report.diagrams);
            }

            match copy::attach_all(doc, content_root) {
                Ok(count) => report.copy_buttons = count,
                Err(e) => tracing::warn!(error = %e, "Failed to attach copy buttons"),
            }
        });
        true
    }
}

/// Whether a unit is still connected, unprocessed and holds the same source.
fn still_pending(doc: &Document, unit: &RenderableUnit) -> bool {
    if !doc.is_connected(unit.id) {
        return false;
    }
    doc.element(unit.id).is_some_and(|element| {
        UnitStatus::of(element) == UnitStatus::Unprocessed
            && RenderableUnit::from_element(doc, unit.id, element, unit.kind).source == unit.source
    })
}

/// Run a synchronous adapter call, turning a panic into an adapter error.
fn contain_panic<T>(call: impl FnOnce() -> Result<T, AdapterError>) -> Result<T, AdapterError> {
    catch_unwind(AssertUnwindSafe(call)).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "adapter panicked".to_owned());
        Err(AdapterError::Task(message))
    })
}

/// Record the outcome of a math or diagram unit.
fn settle_unit(
    doc: &mut Document,
    unit: &RenderableUnit,
    outcome: Result<(), AdapterError>,
    stage: &mut StageReport,
) {
    let recorded = match outcome {
        Ok(()) => {
            stage.rendered += 1;
            preserve_source(doc, unit)
                .and_then(|()| set_status(doc, unit.id, UnitStatus::Processed))
        }
        Err(e) => {
            stage.errored += 1;
            tracing::warn!(kind = ?unit.kind, node = %unit.id, error = %e, "Unit failed to render");
            let markup = write_error(doc, unit, &e);
            let marked = preserve_source(doc, unit)
                .and_then(|()| set_status(doc, unit.id, UnitStatus::Errored));
            markup.and(marked)
        }
    };
    if let Err(e) = recorded {
        tracing::warn!(node = %unit.id, error = %e, "Failed to record unit status");
    }
}

fn preserve_source(doc: &mut Document, unit: &RenderableUnit) -> Result<(), DomError> {
    doc.set_attribute(unit.id, ORIGINAL_CONTENT_ATTR, &unit.source)
}

fn set_status(doc: &mut Document, id: NodeId, status: UnitStatus) -> Result<(), DomError> {
    match status.as_attr() {
        Some(value) => doc.set_attribute(id, STATUS_ATTR, value),
        None => doc.remove_attribute(id, STATUS_ATTR).map(|_| ()),
    }
}

/// Replace the unit's content with a visible error annotation.
fn write_error(
    doc: &mut Document,
    unit: &RenderableUnit,
    error: &AdapterError,
) -> Result<(), DomError> {
    let wrapper = doc.create_element(if unit.kind.is_inline() { "span" } else { "div" });
    doc.set_attribute(wrapper, "class", ERROR_CLASS)?;
    doc.set_attribute(wrapper, "role", "alert")?;

    let title = doc.create_element("strong");
    doc.set_text_content(title, &format!("{} error:", unit.kind.label()))?;
    doc.append_child(wrapper, title)?;
    let gap = doc.create_text(" ");
    doc.append_child(wrapper, gap)?;
    let detail = doc.create_element("code");
    doc.set_text_content(detail, &error.to_string())?;
    doc.append_child(wrapper, detail)?;

    doc.set_text_content(unit.id, "")?;
    doc.append_child(unit.id, wrapper)
}
