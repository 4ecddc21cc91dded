//! Renderer abstraction for the stateful roster session.
//!
//! Defines the `Renderer` and `Session` traits that abstract over the browser
//! engine (Chromium via chromiumoxide) so the navigator and extractors can be
//! driven by canned HTML in replay mode and tests.

pub mod chromium;
pub mod scripted;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use chromium::ChromiumRenderer;
pub use scripted::{ScriptedRenderer, ScriptedSession};

/// Result of navigating to a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationResult {
    /// The final URL after any redirects.
    pub final_url: String,
    /// Time taken to load the page in milliseconds.
    pub load_time_ms: u64,
}

/// A browser engine that can open sessions.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Open a new session (tab).
    async fn new_session(&self) -> Result<Box<dyn Session>>;
    /// Shut down the engine. Safe to call more than once.
    async fn shutdown(&self) -> Result<()>;
}

/// A single stateful page: one list view plus whatever detail views its
/// clicks open.
#[async_trait]
pub trait Session: Send + Sync {
    /// Navigate to a URL, failing if the load exceeds `timeout_ms`.
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult>;
    /// Current rendered HTML.
    async fn html(&self) -> Result<String>;
    /// Click the first element matching `selector`.
    async fn click(&mut self, selector: &str) -> Result<()>;
    /// PNG capture of the current viewport.
    async fn screenshot(&self) -> Result<Vec<u8>>;
    /// Close the session.
    async fn close(self: Box<Self>) -> Result<()>;
}
