//! Render coordinator.
//!
//! Owns the mutation observer on the viewer container and turns bursts of
//! external changes into single render passes.
//!
//! # States
//!
//! ```text
//! Idle --schedule--> Scheduled --frame--> Rendering --pass done--> Idle
//! ```
//!
//! At most one schedule token exists; further requests only widen its
//! [`PassScope`]. The token is taken when the frame fires, so a request made
//! during a pass queues the next one. A frame that fires while a pass is
//! still running is deferred to the end of that pass, keeping at most one
//! pass in flight.
//!
//! Pipeline writes carry [`MutationOrigin::Pipeline`] and never schedule
//! anything. External mutations seen mid-pass are handled according to
//! [`BusyMutationPolicy`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use mdv_config::{BusyMutationPolicy, Config};
use mdv_dom::{
    MutationCallback, MutationOrigin, MutationRecord, NodeId, ObserveOptions, ObserverId,
    SharedDocument, lock_document,
};
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::adapter::{Adapters, Clipboard, CodeHighlighter, DiagramRenderer, MathRenderer};
use crate::copy::{self, CopyAffordance, CopyOutcome};
use crate::error::CoordinatorError;
use crate::executor::{BatchExecutor, PassReport, PassScope};
use crate::scanner::{ViewerSelectors, find_container, find_content_root, scan_marked};
use crate::theme::{Theme, ThemePreference, resolve};
use crate::unit::{ORIGINAL_CONTENT_ATTR, STATUS_ATTR, UnitKind};

/// Id of the `<style>` element carrying the highlighter palette.
pub const STYLESHEET_ID: &str = "mdv-highlight-theme";

/// Coordinator lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Nothing scheduled or running.
    Idle,
    /// A pass is queued for the next frame.
    Scheduled,
    /// A pass is running.
    Rendering,
}

/// Coordinator settings.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How the container and content root are located.
    pub selectors: ViewerSelectors,
    /// Delay between scheduling and running a pass.
    pub frame_interval: Duration,
    /// Handling of external mutations that arrive mid-pass.
    pub busy_mutation: BusyMutationPolicy,
    /// How long copy feedback stays visible.
    pub copy_feedback: Duration,
    /// Configured preference, resolved against `system_theme` at init.
    pub theme_preference: ThemePreference,
    /// System appearance known at init. A [`ThemeSignal`](crate::ThemeSignal)
    /// takes over once attached.
    pub system_theme: Theme,
}

impl CoordinatorConfig {
    /// Settings from `config` with the host's current system appearance.
    #[must_use]
    pub fn with_system_theme(config: &Config, system_theme: Theme) -> Self {
        Self {
            selectors: ViewerSelectors::from(&config.viewer),
            frame_interval: config.render.frame_interval(),
            busy_mutation: config.render.busy_mutation,
            copy_feedback: config.copy.feedback_delay(),
            theme_preference: config.theme.default,
            system_theme,
        }
    }

    /// Theme used until one is applied.
    #[must_use]
    pub fn initial_theme(&self) -> Theme {
        resolve(self.theme_preference, self.system_theme)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// Assumes a light system appearance. Use
/// [`CoordinatorConfig::with_system_theme`] when the host knows better.
impl From<&Config> for CoordinatorConfig {
    fn from(config: &Config) -> Self {
        Self::with_system_theme(config, Theme::default())
    }
}

/// Pass and scheduling counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Passes completed.
    pub passes: u64,
    /// Schedule tokens created.
    pub scheduled: u64,
    /// Schedule requests folded into an existing token.
    pub coalesced: u64,
    /// External mutation batches ignored because a pass was running.
    pub dropped_mutations: u64,
    /// Extra passes queued by [`BusyMutationPolicy::Rerun`].
    pub reruns: u64,
    /// Report of the most recent pass.
    pub last_report: Option<PassReport>,
}

struct Inner {
    pending: Option<PassScope>,
    frame_armed: bool,
    rendering: bool,
    rerun_requested: bool,
    reset_diagrams: bool,
    theme: Theme,
    observer: Option<ObserverId>,
    stats: CoordinatorStats,
}

struct Shared {
    document: SharedDocument,
    executor: BatchExecutor,
    copy: Option<CopyAffordance>,
    config: CoordinatorConfig,
    runtime: Handle,
    inner: Mutex<Inner>,
    state: watch::Sender<CoordinatorState>,
}

impl Shared {
    // Lock order: the document may be held while taking `inner` (observer
    // callbacks), never the other way round.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, inner: &Inner) {
        let next = if inner.rendering {
            CoordinatorState::Rendering
        } else if inner.pending.is_some() {
            CoordinatorState::Scheduled
        } else {
            CoordinatorState::Idle
        };
        self.state.send_if_modified(|state| {
            let changed = *state != next;
            *state = next;
            changed
        });
    }
}

/// Builder for [`RenderCoordinator`].
///
/// Theme operations only exist on the coordinator returned by
/// [`init`](Self::init), so a theme can never be applied before the observer
/// is in place.
pub struct CoordinatorBuilder {
    document: SharedDocument,
    adapters: Adapters,
    clipboard: Option<Arc<dyn Clipboard>>,
    config: CoordinatorConfig,
}

impl CoordinatorBuilder {
    /// Math backend.
    #[must_use]
    pub fn math(mut self, renderer: Arc<dyn MathRenderer>) -> Self {
        self.adapters.math = Some(renderer);
        self
    }

    /// Code highlighting backend.
    #[must_use]
    pub fn highlighter(mut self, highlighter: Arc<dyn CodeHighlighter>) -> Self {
        self.adapters.highlighter = Some(highlighter);
        self
    }

    /// Diagram backend.
    #[must_use]
    pub fn diagrams(mut self, renderer: Arc<dyn DiagramRenderer>) -> Self {
        self.adapters.diagrams = Some(renderer);
        self
    }

    /// Clipboard used by copy buttons.
    #[must_use]
    pub fn clipboard(mut self, clipboard: Arc<dyn Clipboard>) -> Self {
        self.clipboard = Some(clipboard);
        self
    }

    /// Coordinator settings.
    #[must_use]
    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach the observer and schedule the initial pass.
    ///
    /// A missing container is tolerated: the coordinator still runs passes
    /// when asked, it just cannot react to content changes.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::NoRuntime`] outside a tokio runtime.
    pub fn init(self) -> Result<RenderCoordinator, CoordinatorError> {
        let runtime = Handle::try_current()?;
        let Self {
            document,
            adapters,
            clipboard,
            config,
        } = self;

        let executor =
            BatchExecutor::new(Arc::clone(&document), config.selectors.clone(), adapters);
        let copy = clipboard.map(|clipboard| {
            CopyAffordance::new(Arc::clone(&document), clipboard, config.copy_feedback)
        });
        let (state, _) = watch::channel(CoordinatorState::Idle);
        let inner = Inner {
            pending: None,
            frame_armed: false,
            rendering: false,
            rerun_requested: false,
            reset_diagrams: false,
            theme: config.initial_theme(),
            observer: None,
            stats: CoordinatorStats::default(),
        };
        let shared = Arc::new(Shared {
            document,
            executor,
            copy,
            config,
            runtime,
            inner: Mutex::new(inner),
            state,
        });

        let weak = Arc::downgrade(&shared);
        let callback: MutationCallback = Arc::new(move |records: &[MutationRecord]| {
            if let Some(shared) = weak.upgrade() {
                on_mutations(&shared, records);
            }
        });

        let observer = {
            let mut doc = lock_document(&shared.document);
            if let Some(container) = find_container(&doc, &shared.config.selectors) {
                tracing::debug!(%container, "Observing viewer container");
                Some(doc.observe(container, ObserveOptions::subtree(), callback))
            } else {
                tracing::warn!(
                    class = %shared.config.selectors.container_class,
                    "Viewer container not found, content changes will not be observed"
                );
                None
            }
        };
        shared.lock().observer = observer;

        if let Some(highlighter) = &shared.executor.adapters().highlighter {
            highlighter.set_theme(shared.config.initial_theme());
        }
        install_stylesheet(&shared);
        schedule(&shared, PassScope::Full);
        Ok(RenderCoordinator { shared })
    }
}

/// Schedules and runs render passes for one viewer.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct RenderCoordinator {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for RenderCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderCoordinator")
            .field("state", &self.state())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl RenderCoordinator {
    /// Start building a coordinator for `document`.
    #[must_use]
    pub fn builder(document: SharedDocument) -> CoordinatorBuilder {
        CoordinatorBuilder {
            document,
            adapters: Adapters::default(),
            clipboard: None,
            config: CoordinatorConfig::default(),
        }
    }

    /// Request a full pass on the next frame.
    pub fn schedule_render(&self) {
        schedule(&self.shared, PassScope::Full);
    }

    /// Re-render diagrams only.
    ///
    /// Every rendered diagram gets its preserved source back and loses its
    /// status and copy button, then a diagrams-only pass is scheduled. Math
    /// and code units are not touched. If a pass is running, the reset
    /// happens right before the next pass instead.
    pub fn force_render_diagrams(&self) {
        let in_flight = {
            let mut inner = self.shared.lock();
            if inner.rendering {
                inner.reset_diagrams = true;
            }
            inner.rendering
        };
        if in_flight {
            tracing::debug!("Pass in flight, deferring diagram reset");
        } else {
            reset_diagrams(&self.shared);
        }
        schedule(&self.shared, PassScope::DiagramsOnly);
    }

    /// Switch to `theme`: swap the highlighter palette and its stylesheet,
    /// then re-render diagrams with it.
    pub fn apply_theme(&self, theme: Theme) {
        self.shared.lock().theme = theme;
        if let Some(highlighter) = &self.shared.executor.adapters().highlighter {
            highlighter.set_theme(theme);
        }
        tracing::info!(%theme, "Applying theme");
        install_stylesheet(&self.shared);
        self.force_render_diagrams();
    }

    /// Theme used for diagram renders.
    #[must_use]
    pub fn theme(&self) -> Theme {
        self.shared.lock().theme
    }

    /// Handle a click on a copy button.
    ///
    /// # Errors
    ///
    /// Fails if no clipboard was configured or `button` is not a copy button.
    pub async fn activate_copy(&self, button: NodeId) -> Result<CopyOutcome, CoordinatorError> {
        match &self.shared.copy {
            Some(affordance) => affordance.activate(button).await,
            None => Err(CoordinatorError::NoClipboard),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> CoordinatorState {
        *self.shared.state.borrow()
    }

    /// Receiver of state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<CoordinatorState> {
        self.shared.state.subscribe()
    }

    /// Wait until nothing is scheduled or running.
    pub async fn settled(&self) {
        let mut state = self.shared.state.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = state
            .wait_for(|state| *state == CoordinatorState::Idle)
            .await;
    }

    /// Counters and the last pass report.
    #[must_use]
    pub fn stats(&self) -> CoordinatorStats {
        self.shared.lock().stats.clone()
    }

    /// Stop observing the container. Returns `false` if not observing.
    pub fn detach(&self) -> bool {
        let observer = self.shared.lock().observer.take();
        let Some(observer) = observer else {
            return false;
        };
        tracing::debug!("Detaching from viewer container");
        lock_document(&self.shared.document).disconnect(observer)
    }

    /// The document being rendered.
    #[must_use]
    pub fn document(&self) -> &SharedDocument {
        &self.shared.document
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.shared.runtime
    }
}

fn on_mutations(shared: &Arc<Shared>, records: &[MutationRecord]) {
    let external = records
        .iter()
        .filter(|record| record.origin == MutationOrigin::External)
        .filter(|record| record.is_child_list() || record.is_attributes())
        .count();
    if external == 0 {
        return;
    }

    {
        let mut inner = shared.lock();
        if inner.rendering {
            match shared.config.busy_mutation {
                BusyMutationPolicy::Drop => {
                    inner.stats.dropped_mutations += 1;
                    tracing::trace!("Mutation during pass ignored");
                }
                BusyMutationPolicy::Rerun => {
                    inner.rerun_requested = true;
                    tracing::debug!("Mutation during pass, rerun requested");
                }
            }
            return;
        }
    }

    tracing::debug!(records = external, "Content change detected, scheduling render");
    schedule(shared, PassScope::Full);
}

fn schedule(shared: &Arc<Shared>, scope: PassScope) {
    let arm = {
        let mut inner = shared.lock();
        if let Some(pending) = inner.pending {
            inner.pending = Some(pending.merge(scope));
            inner.stats.coalesced += 1;
            tracing::trace!(?scope, "Render already scheduled");
            return;
        }
        inner.pending = Some(scope);
        inner.stats.scheduled += 1;
        let arm = !inner.rendering && !inner.frame_armed;
        if arm {
            inner.frame_armed = true;
        }
        shared.publish(&inner);
        arm
    };
    tracing::debug!(?scope, "Render scheduled");
    if arm {
        arm_frame(shared);
    }
}

fn arm_frame(shared: &Arc<Shared>) {
    let weak = Arc::downgrade(shared);
    let delay = shared.config.frame_interval;
    shared.runtime.spawn(async move {
        tokio::time::sleep(delay).await;
        if let Some(shared) = weak.upgrade() {
            run_frame(shared).await;
        }
    });
}

async fn run_frame(shared: Arc<Shared>) {
    let (scope, reset, theme) = {
        let mut inner = shared.lock();
        inner.frame_armed = false;
        if inner.rendering {
            tracing::debug!("Pass in flight, deferring frame");
            return;
        }
        let Some(scope) = inner.pending.take() else {
            return;
        };
        inner.rendering = true;
        shared.publish(&inner);
        (scope, std::mem::take(&mut inner.reset_diagrams), inner.theme)
    };

    let guard = PassGuard {
        shared: Arc::clone(&shared),
        report: None,
    };
    if reset {
        reset_diagrams(&shared);
    }
    let report = shared.executor.run(scope, theme).await;
    guard.complete(report);
}

/// Clears the rendering flag when a pass ends, however it ends.
struct PassGuard {
    shared: Arc<Shared>,
    report: Option<PassReport>,
}

impl PassGuard {
    fn complete(mut self, report: PassReport) {
        self.report = Some(report);
    }
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        let arm = {
            let mut inner = self.shared.lock();
            inner.rendering = false;
            inner.stats.passes += 1;
            match self.report.take() {
                Some(report) => inner.stats.last_report = Some(report),
                None => tracing::warn!("Render pass did not complete"),
            }

            if std::mem::take(&mut inner.rerun_requested) {
                inner.pending = Some(
                    inner
                        .pending
                        .map_or(PassScope::Full, |pending| pending.merge(PassScope::Full)),
                );
                inner.stats.reruns += 1;
                tracing::debug!("Queueing rerun for mutations seen during pass");
            }

            let arm = inner.pending.is_some() && !inner.frame_armed;
            if arm {
                inner.frame_armed = true;
            }
            self.shared.publish(&inner);
            arm
        };
        if arm {
            arm_frame(&self.shared);
        }
    }
}

/// Restore every marked diagram to its source. Returns how many were reset.
fn reset_diagrams(shared: &Shared) -> usize {
    let mut doc = lock_document(&shared.document);
    let Some(content_root) = find_content_root(&doc, &shared.config.selectors) else {
        return 0;
    };

    let restored = doc.with_origin(MutationOrigin::Pipeline, |doc| {
        let mut restored = 0;
        for id in scan_marked(doc, content_root, UnitKind::Diagram) {
            let Some(source) = doc
                .element(id)
                .and_then(|el| el.attribute(ORIGINAL_CONTENT_ATTR))
                .map(str::to_owned)
            else {
                tracing::warn!(node = %id, "Diagram has no preserved source, skipping re-render");
                continue;
            };
            let result = copy::clear_wiring(doc, id)
                .and_then(|()| doc.set_text_content(id, &source))
                .and_then(|()| doc.remove_attribute(id, STATUS_ATTR).map(|_| ()));
            match result {
                Ok(()) => restored += 1,
                Err(e) => tracing::warn!(node = %id, error = %e, "Failed to reset diagram"),
            }
        }
        restored
    });
    tracing::debug!(restored, "Diagrams reset for re-render");
    restored
}

/// Write the highlighter's stylesheet into a `<style>` under the document
/// root, creating it on first use.
fn install_stylesheet(shared: &Shared) {
    let Some(css) = shared
        .executor
        .adapters()
        .highlighter
        .as_ref()
        .and_then(|highlighter| highlighter.stylesheet())
    else {
        return;
    };

    let mut doc = lock_document(&shared.document);
    let root = doc.root();
    let installed = doc.with_origin(MutationOrigin::Pipeline, |doc| {
        let existing = doc.find_first(root, |_, el| {
            el.tag() == "style" && el.attribute("id") == Some(STYLESHEET_ID)
        });
        let style = match existing {
            Some(style) => style,
            None => {
                let style = doc.create_element("style");
                doc.set_attribute(style, "id", STYLESHEET_ID)?;
                doc.append_child(root, style)?;
                style
            }
        };
        doc.set_text_content(style, &css)
    });
    match installed {
        Ok(()) => tracing::debug!(bytes = css.len(), "Highlighter stylesheet installed"),
        Err(e) => tracing::warn!(error = %e, "Failed to install highlighter stylesheet"),
    }
}
