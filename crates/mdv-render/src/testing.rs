//! Recording fakes for the adapter traits.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mdv_dom::{Document, SharedDocument};

use crate::adapter::{
    Clipboard, CodeHighlighter, DiagramRenderer, DiagramRequest, MathMode, MathRenderer,
};
use crate::error::AdapterError;
use crate::theme::Theme;

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Page with the standard viewer wrapper around `body`.
pub(crate) fn page(body: &str) -> SharedDocument {
    Document::parse(&format!(
        r#"<div class="markdown-viewer"><article class="markdown-body">{body}</article></div>"#
    ))
    .unwrap()
    .into_shared()
}

/// Fails on sources containing `\invalid`, panics on `\crash`.
#[derive(Default)]
pub(crate) struct FakeMath {
    calls: AtomicUsize,
}

impl FakeMath {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MathRenderer for FakeMath {
    fn render(&self, source: &str, mode: MathMode) -> Result<String, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if source.contains("\\crash") {
            panic!("typesetter crashed on {source}");
        }
        if source.contains("\\invalid") {
            return Err(AdapterError::Math(format!("Undefined control sequence in {source}")));
        }
        let class = match mode {
            MathMode::Inline => "katex",
            MathMode::Display => "katex katex-display",
        };
        Ok(format!(r#"<span class="{class}">{}</span>"#, escape(source)))
    }
}

/// Knows `rust`, fails on `broken`, panics on `crash`.
#[derive(Default)]
pub(crate) struct FakeHighlighter {
    calls: AtomicUsize,
    theme: Mutex<Option<Theme>>,
}

impl FakeHighlighter {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn theme(&self) -> Option<Theme> {
        *self.theme.lock().unwrap()
    }
}

impl CodeHighlighter for FakeHighlighter {
    fn highlight(&self, source: &str, language: &str) -> Result<Option<String>, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match language {
            "rust" => Ok(Some(format!(r#"<span class="hl-source">{}</span>"#, escape(source)))),
            "broken" => Err(AdapterError::Highlight {
                language: language.to_owned(),
                message: "grammar failed to load".to_owned(),
            }),
            "crash" => panic!("grammar blew up"),
            _ => Ok(None),
        }
    }

    fn set_theme(&self, theme: Theme) {
        *self.theme.lock().unwrap() = Some(theme);
    }

    fn stylesheet(&self) -> Option<String> {
        self.theme().map(|theme| format!(".hl-source {{ color: {theme}; }}"))
    }
}

/// Fails on sources containing `invalid`, panics on `panic`.
#[derive(Default)]
pub(crate) struct FakeDiagrams {
    delay: Option<Duration>,
    calls: AtomicUsize,
    themes: Mutex<Vec<Theme>>,
}

impl FakeDiagrams {
    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn themes(&self) -> Vec<Theme> {
        self.themes.lock().unwrap().clone()
    }
}

#[async_trait]
impl DiagramRenderer for FakeDiagrams {
    async fn render(&self, request: DiagramRequest) -> Result<String, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.themes.lock().unwrap().push(request.theme);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if request.source == "panic" {
            panic!("diagram backend crashed");
        }
        if request.source.contains("invalid") {
            return Err(AdapterError::Diagram("Parse error on line 1".to_owned()));
        }
        Ok(format!(
            r#"<svg id="{}" data-theme="{}"><text>{}</text></svg>"#,
            request.id,
            request.theme,
            escape(&request.source)
        ))
    }
}

#[derive(Default)]
pub(crate) struct FakeClipboard {
    fail: bool,
    written: Mutex<Vec<String>>,
}

impl FakeClipboard {
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(crate) fn written(&self) -> Vec<String> {
        self.written.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clipboard for FakeClipboard {
    async fn write_text(&self, text: &str) -> Result<(), AdapterError> {
        if self.fail {
            return Err(AdapterError::Clipboard("permission denied".to_owned()));
        }
        self.written.lock().unwrap().push(text.to_owned());
        Ok(())
    }
}
