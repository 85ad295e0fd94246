//! Theme resolution and propagation.
//!
//! A [`ThemePreference`] (light, dark or auto) plus the system appearance
//! resolves to a concrete [`Theme`]. [`ThemeSignal`] keeps the resolved theme
//! current and cascades every change into the coordinator, which re-renders
//! only the theme-sensitive diagrams.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

pub use mdv_config::ThemePreference;
use mdv_dom::{MutationOrigin, lock_document};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::coordinator::RenderCoordinator;

/// Attribute on the document root reflecting the resolved theme.
pub const THEME_ATTR: &str = "data-theme";

/// Concrete palette.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    /// Light palette.
    #[default]
    Light,
    /// Dark palette.
    Dark,
}

impl Theme {
    /// Lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve a preference against the system appearance.
#[must_use]
pub fn resolve(preference: ThemePreference, system: Theme) -> Theme {
    match preference {
        ThemePreference::Light => Theme::Light,
        ThemePreference::Dark => Theme::Dark,
        ThemePreference::Auto => system,
    }
}

/// Persistence for the user's preference.
pub trait ThemeStore: Send + Sync {
    /// Stored preference, if any.
    fn load(&self) -> Option<ThemePreference>;
    /// Persist `preference`.
    fn save(&self, preference: ThemePreference);
}

/// In-memory [`ThemeStore`].
#[derive(Debug, Default)]
pub struct MemoryThemeStore {
    preference: Mutex<Option<ThemePreference>>,
}

impl MemoryThemeStore {
    /// Store pre-seeded with `preference`.
    #[must_use]
    pub fn with_preference(preference: ThemePreference) -> Self {
        Self {
            preference: Mutex::new(Some(preference)),
        }
    }
}

impl ThemeStore for MemoryThemeStore {
    fn load(&self) -> Option<ThemePreference> {
        *self
            .preference
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn save(&self, preference: ThemePreference) {
        *self
            .preference
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(preference);
    }
}

#[derive(Debug, Clone, Copy)]
struct SignalState {
    preference: ThemePreference,
    system: Theme,
    resolved: Theme,
}

/// Keeps the coordinator's theme in sync with preference and system.
///
/// Dropping the signal stops following system changes.
pub struct ThemeSignal {
    coordinator: RenderCoordinator,
    store: Arc<dyn ThemeStore>,
    state: Arc<Mutex<SignalState>>,
    listener: JoinHandle<()>,
}

impl fmt::Debug for ThemeSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThemeSignal")
            .field("state", &*lock_state(&self.state))
            .finish_non_exhaustive()
    }
}

fn lock_state(state: &Mutex<SignalState>) -> std::sync::MutexGuard<'_, SignalState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ThemeSignal {
    /// Attach to an initialized coordinator.
    ///
    /// Loads the stored preference (or `default`), applies the resolved theme
    /// and starts following `system` for as long as the signal lives.
    pub fn attach(
        coordinator: &RenderCoordinator,
        store: Arc<dyn ThemeStore>,
        default: ThemePreference,
        mut system: watch::Receiver<Theme>,
    ) -> Self {
        let preference = store.load().unwrap_or(default);
        let system_theme = *system.borrow_and_update();
        let resolved = resolve(preference, system_theme);
        let state = Arc::new(Mutex::new(SignalState {
            preference,
            system: system_theme,
            resolved,
        }));

        tracing::debug!(%preference, system = %system_theme, %resolved, "Theme signal attached");
        cascade(coordinator, resolved);

        let listener = {
            let coordinator = coordinator.clone();
            let state = Arc::clone(&state);
            coordinator.runtime().clone().spawn(async move {
                while system.changed().await.is_ok() {
                    let system_theme = *system.borrow_and_update();
                    let (resolved, changed) = update(&state, &coordinator, |state| {
                        state.system = system_theme;
                    });
                    tracing::debug!(
                        system = %system_theme,
                        %resolved,
                        changed,
                        "System appearance changed"
                    );
                }
            })
        };

        Self {
            coordinator: coordinator.clone(),
            store,
            state,
            listener,
        }
    }

    /// Current preference.
    #[must_use]
    pub fn preference(&self) -> ThemePreference {
        lock_state(&self.state).preference
    }

    /// Currently applied theme.
    #[must_use]
    pub fn resolved(&self) -> Theme {
        lock_state(&self.state).resolved
    }

    /// Persist a new preference and apply it.
    ///
    /// Diagrams re-render only if the resolved theme actually changed.
    pub fn set_preference(&self, preference: ThemePreference) -> Theme {
        self.store.save(preference);
        let (resolved, changed) = update(&self.state, &self.coordinator, |state| {
            state.preference = preference;
        });
        tracing::debug!(%preference, %resolved, changed, "Theme preference set");
        resolved
    }
}

impl Drop for ThemeSignal {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// Apply `change`, re-resolve, and cascade if the resolved theme moved.
///
/// The state lock is held through the cascade, so the coordinator sees
/// themes in the same order the state resolved them.
// Lock order: signal state, then document, then coordinator.
fn update(
    state: &Mutex<SignalState>,
    coordinator: &RenderCoordinator,
    change: impl FnOnce(&mut SignalState),
) -> (Theme, bool) {
    let mut state = lock_state(state);
    change(&mut state);
    let resolved = resolve(state.preference, state.system);
    let changed = resolved != state.resolved;
    state.resolved = resolved;
    if changed {
        cascade(coordinator, resolved);
    }
    (resolved, changed)
}

/// Publish `theme` on the document root and hand it to the coordinator.
fn cascade(coordinator: &RenderCoordinator, theme: Theme) {
    {
        let mut doc = lock_document(coordinator.document());
        let root = doc.root();
        if let Err(e) = doc.with_origin(MutationOrigin::Pipeline, |doc| {
            doc.set_attribute(root, THEME_ATTR, theme.as_str())
        }) {
            tracing::warn!(error = %e, "Failed to set theme attribute");
        }
    }
    coordinator.apply_theme(theme);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_resolve() {
        assert_eq!(resolve(ThemePreference::Light, Theme::Dark), Theme::Light);
        assert_eq!(resolve(ThemePreference::Dark, Theme::Light), Theme::Dark);
        assert_eq!(resolve(ThemePreference::Auto, Theme::Dark), Theme::Dark);
        assert_eq!(resolve(ThemePreference::Auto, Theme::Light), Theme::Light);
    }

    #[test]
    fn test_display_matches_serde() {
        assert_eq!(ThemePreference::Auto.to_string(), "auto");
        assert_eq!(Theme::Dark.to_string(), "dark");
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryThemeStore::default();
        assert_eq!(store.load(), None);
        store.save(ThemePreference::Dark);
        assert_eq!(store.load(), Some(ThemePreference::Dark));
        assert_eq!(
            MemoryThemeStore::with_preference(ThemePreference::Light).load(),
            Some(ThemePreference::Light)
        );
    }
}
