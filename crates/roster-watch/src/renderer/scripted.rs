//! In-memory session driven by canned HTML.
//!
//! Used to replay a saved roster page offline and to exercise the navigator
//! and extractors without a browser. Clicks either swap in the HTML
//! registered for that selector or, if the selector merely matches something
//! on the current page, leave the page as it is.

use super::{NavigationResult, Renderer, Session};
use anyhow::{bail, Result};
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// What a registered click does.
#[derive(Debug, Clone)]
pub enum ClickOutcome {
    /// Replace the current page with this HTML.
    Show(String),
    /// Fail the click, as an unresponsive element would.
    Fail,
}

/// Canned pages and click responses shared by every session of a renderer.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pages: HashMap<String, String>,
    clicks: HashMap<String, ClickOutcome>,
    /// Number of upcoming navigations that fail before loads succeed.
    failing_loads: u32,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: impl Into<String>, html: impl Into<String>) -> Self {
        self.pages.insert(url.into(), html.into());
        self
    }

    pub fn on_click(mut self, selector: impl Into<String>, html: impl Into<String>) -> Self {
        self.clicks
            .insert(selector.into(), ClickOutcome::Show(html.into()));
        self
    }

    pub fn failing_click(mut self, selector: impl Into<String>) -> Self {
        self.clicks.insert(selector.into(), ClickOutcome::Fail);
        self
    }

    pub fn failing_loads(mut self, count: u32) -> Self {
        self.failing_loads = count;
        self
    }
}

/// Record of what a scripted session was asked to do.
#[derive(Debug, Clone, Default)]
pub struct ScriptLog {
    pub navigations: Vec<String>,
    pub clicks: Vec<String>,
    pub closed: bool,
}

/// Renderer handing out `ScriptedSession`s.
pub struct ScriptedRenderer {
    script: Script,
    log: Arc<Mutex<ScriptLog>>,
}

impl ScriptedRenderer {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            log: Arc::new(Mutex::new(ScriptLog::default())),
        }
    }

    /// Snapshot of everything every session has done so far.
    pub fn log(&self) -> ScriptLog {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Renderer for ScriptedRenderer {
    async fn new_session(&self) -> Result<Box<dyn Session>> {
        Ok(Box::new(ScriptedSession {
            script: self.script.clone(),
            current: String::new(),
            log: Arc::clone(&self.log),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// A session whose pages come from a `Script`.
pub struct ScriptedSession {
    script: Script,
    current: String,
    log: Arc<Mutex<ScriptLog>>,
}

impl ScriptedSession {
    /// A session already showing `html`, with no navigation targets.
    pub fn showing(html: impl Into<String>) -> Self {
        Self {
            script: Script::default(),
            current: html.into(),
            log: Arc::new(Mutex::new(ScriptLog::default())),
        }
    }

    fn record(&self, f: impl FnOnce(&mut ScriptLog)) {
        if let Ok(mut log) = self.log.lock() {
            f(&mut log);
        }
    }
}

/// Whether `selector` matches anything in `html`.
fn matches_any(html: &str, selector: &str) -> Result<bool> {
    let sel = Selector::parse(selector)
        .map_err(|e| anyhow::anyhow!("invalid selector '{selector}': {e}"))?;
    let doc = Html::parse_document(html);
    let found = doc.select(&sel).next().is_some();
    Ok(found)
}

#[async_trait]
impl Session for ScriptedSession {
    async fn navigate(&mut self, url: &str, _timeout_ms: u64) -> Result<NavigationResult> {
        self.record(|l| l.navigations.push(url.to_string()));
        if self.script.failing_loads > 0 {
            self.script.failing_loads -= 1;
            bail!("navigation timed out (scripted)");
        }
        match self.script.pages.get(url) {
            Some(html) => {
                self.current = html.clone();
                Ok(NavigationResult {
                    final_url: url.to_string(),
                    load_time_ms: 0,
                })
            }
            None => bail!("no scripted page for {url}"),
        }
    }

    async fn html(&self) -> Result<String> {
        Ok(self.current.clone())
    }

    async fn click(&mut self, selector: &str) -> Result<()> {
        self.record(|l| l.clicks.push(selector.to_string()));
        match self.script.clicks.get(selector) {
            Some(ClickOutcome::Show(html)) => {
                self.current = html.clone();
                Ok(())
            }
            Some(ClickOutcome::Fail) => bail!("element '{selector}' did not respond"),
            None if matches_any(&self.current, selector)? => Ok(()),
            None => bail!("no element for '{selector}'"),
        }
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        bail!("scripted sessions do not render")
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.record(|l| l.closed = true);
        Ok(())
    }
}
