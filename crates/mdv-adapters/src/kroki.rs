//! Diagram rendering through a Kroki server.
//!
//! Requests are blocking `ureq` calls moved onto tokio's blocking pool, so
//! the executor's fan-out still renders diagrams concurrently. Rendered SVG
//! is kept in a bounded LRU cache keyed by a hash of endpoint, theme and
//! source.

use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use mdv_config::DiagramsConfig;
use mdv_render::{AdapterError, DiagramRenderer, DiagramRequest, Theme};
use sha2::{Digest, Sha256};
use ureq::Agent;

const ENDPOINT: &str = "mermaid";

/// Cache capacity used by [`KrokiDiagrams::new`].
pub const DEFAULT_CACHE_ENTRIES: usize = 256;

/// Kroki request failure.
#[derive(Debug, thiserror::Error)]
pub enum KrokiError {
    /// Transport failure or error status.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Response body could not be read.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<KrokiError> for AdapterError {
    fn from(e: KrokiError) -> Self {
        Self::Diagram(e.to_string())
    }
}

fn create_agent(timeout: Duration) -> Agent {
    Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .build()
        .into()
}

fn cache_key(theme: Theme, source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{ENDPOINT}:svg:{theme}:{source}").as_bytes());
    hex::encode(hasher.finalize())
}

/// Prefix `source` with a mermaid init directive for `theme`.
///
/// Sources that already carry a directive are left alone.
fn themed_source(source: &str, theme: Theme) -> String {
    if source.trim_start().starts_with("%%{") {
        return source.to_owned();
    }
    let name = match theme {
        Theme::Light => "default",
        Theme::Dark => "dark",
    };
    format!("%%{{init: {{\"theme\": \"{name}\"}}}}%%\n{source}")
}

/// Drop the XML declaration and doctype Kroki puts before `<svg`.
fn strip_prolog(svg: &str) -> &str {
    svg.find("<svg").map_or(svg, |start| &svg[start..])
}

fn render_svg(agent: &Agent, server_url: &str, source: &str) -> Result<String, KrokiError> {
    let url = format!("{server_url}/{ENDPOINT}/svg");

    let response = agent
        .post(&url)
        .header("Content-Type", "text/plain")
        .send(source.as_bytes())
        .map_err(|e| KrokiError::Http(e.to_string()))?;

    let status = response.status().as_u16();
    let mut body = response.into_body();

    if status >= 400 {
        let error_body = body
            .read_to_string()
            .unwrap_or_else(|_| String::from("(unable to read error body)"));
        return Err(KrokiError::Http(format!("HTTP {status}: {error_body}")));
    }

    let svg = body
        .read_to_string()
        .map_err(|e| KrokiError::Io(e.to_string()))?;
    Ok(strip_prolog(&svg).to_owned())
}

/// Mermaid rendering via Kroki.
pub struct KrokiDiagrams {
    agent: Agent,
    server_url: String,
    cache: Mutex<LruCache<String, String>>,
}

impl std::fmt::Debug for KrokiDiagrams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KrokiDiagrams")
            .field("server_url", &self.server_url)
            .finish_non_exhaustive()
    }
}

impl KrokiDiagrams {
    /// Create a renderer for the Kroki server at `server_url`.
    #[must_use]
    pub fn new(server_url: &str, timeout: Duration) -> Self {
        let capacity = NonZeroUsize::new(DEFAULT_CACHE_ENTRIES).unwrap_or(NonZeroUsize::MIN);
        Self::with_cache_capacity(server_url, timeout, capacity)
    }

    /// Like [`new`](Self::new), keeping at most `capacity` rendered SVGs.
    #[must_use]
    pub fn with_cache_capacity(
        server_url: &str,
        timeout: Duration,
        capacity: NonZeroUsize,
    ) -> Self {
        Self {
            agent: create_agent(timeout),
            server_url: server_url.trim_end_matches('/').to_owned(),
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, LruCache<String, String>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cached(&self, key: &str) -> Option<String> {
        self.lock_cache().get(key).cloned()
    }

    fn store(&self, key: String, svg: String) {
        if let Some((evicted, _)) = self.lock_cache().push(key.clone(), svg)
            && evicted != key
        {
            tracing::trace!(key = %evicted, "Diagram evicted from cache");
        }
    }
}

impl From<&DiagramsConfig> for KrokiDiagrams {
    fn from(config: &DiagramsConfig) -> Self {
        Self::with_cache_capacity(&config.kroki_url, config.timeout(), config.cache_capacity())
    }
}

#[async_trait]
impl DiagramRenderer for KrokiDiagrams {
    async fn render(&self, request: DiagramRequest) -> Result<String, AdapterError> {
        let key = cache_key(request.theme, &request.source);
        if let Some(svg) = self.cached(&key) {
            tracing::debug!(id = %request.id, "Diagram served from cache");
            return Ok(svg);
        }

        let agent = self.agent.clone();
        let server_url = self.server_url.clone();
        let source = themed_source(&request.source, request.theme);
        let svg = tokio::task::spawn_blocking(move || render_svg(&agent, &server_url, &source))
            .await
            .map_err(|e| AdapterError::Task(e.to_string()))??;

        tracing::debug!(id = %request.id, theme = %request.theme, "Diagram rendered by Kroki");
        self.store(key, svg.clone());
        Ok(svg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_themed_source_injects_directive() {
        assert_eq!(
            themed_source("graph TD", Theme::Dark),
            "%%{init: {\"theme\": \"dark\"}}%%\ngraph TD"
        );
        assert_eq!(
            themed_source("graph TD", Theme::Light),
            "%%{init: {\"theme\": \"default\"}}%%\ngraph TD"
        );
    }

    #[test]
    fn test_themed_source_keeps_existing_directive() {
        let source = "%%{init: {\"theme\": \"forest\"}}%%\ngraph TD";
        assert_eq!(themed_source(source, Theme::Dark), source);
    }

    #[test]
    fn test_strip_prolog() {
        assert_eq!(
            strip_prolog(r#"<?xml version="1.0"?><!DOCTYPE svg><svg id="a"></svg>"#),
            r#"<svg id="a"></svg>"#
        );
        assert_eq!(strip_prolog("<svg></svg>"), "<svg></svg>");
    }

    #[test]
    fn test_cache_key_depends_on_theme() {
        assert_ne!(
            cache_key(Theme::Light, "graph TD"),
            cache_key(Theme::Dark, "graph TD")
        );
        assert_eq!(cache_key(Theme::Light, "graph TD").len(), 64);
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let diagrams = KrokiDiagrams::new("https://kroki.io/", Duration::from_secs(1));
        assert_eq!(diagrams.server_url, "https://kroki.io");
    }

    #[test]
    fn test_cache_evicts_least_recently_used() {
        let diagrams = KrokiDiagrams::with_cache_capacity(
            "https://kroki.io",
            Duration::from_secs(1),
            NonZeroUsize::new(2).unwrap(),
        );
        let keys: Vec<String> = ["a", "b", "c"]
            .iter()
            .map(|source| cache_key(Theme::Light, source))
            .collect();

        diagrams.store(keys[0].clone(), "<svg>a</svg>".to_owned());
        diagrams.store(keys[1].clone(), "<svg>b</svg>".to_owned());
        assert_eq!(diagrams.cached(&keys[0]).as_deref(), Some("<svg>a</svg>"));
        diagrams.store(keys[2].clone(), "<svg>c</svg>".to_owned());

        assert_eq!(diagrams.cached(&keys[1]), None);
        assert_eq!(diagrams.cached(&keys[0]).as_deref(), Some("<svg>a</svg>"));
        assert_eq!(diagrams.cached(&keys[2]).as_deref(), Some("<svg>c</svg>"));
        assert_eq!(diagrams.lock_cache().len(), 2);
    }

    #[test]
    fn test_cache_capacity_from_config() {
        let config = DiagramsConfig {
            kroki_url: "https://kroki.io/".to_owned(),
            timeout_secs: 5,
            cache_entries: 3,
        };
        let diagrams = KrokiDiagrams::from(&config);
        assert_eq!(diagrams.lock_cache().cap().get(), 3);
        assert_eq!(diagrams.server_url, "https://kroki.io");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_diagram_error() {
        let diagrams = KrokiDiagrams::new("http://127.0.0.1:9", Duration::from_secs(2));

        let err = diagrams
            .render(DiagramRequest::new("graph TD; A-->B", Theme::Light))
            .await
            .unwrap_err();

        assert!(matches!(err, AdapterError::Diagram(_)));
    }
}
