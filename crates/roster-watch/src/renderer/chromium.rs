//! Chromium-based renderer using chromiumoxide.

use super::{NavigationResult, Renderer, Session};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    // 1. ROSTER_WATCH_CHROMIUM_PATH env
    if let Ok(p) = std::env::var("ROSTER_WATCH_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. ~/.roster-watch/chromium/
    if let Some(home) = dirs::home_dir() {
        let candidates = [
            home.join(".roster-watch/chromium/chrome-linux64/chrome"),
            home.join(".roster-watch/chromium/chrome"),
        ];
        for c in candidates {
            if c.exists() {
                return Some(c);
            }
        }
    }

    // 3. System PATH
    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 4. Common macOS location
    if cfg!(target_os = "macos") {
        let common =
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Chromium-based renderer.
pub struct ChromiumRenderer {
    browser: Mutex<Option<Browser>>,
    handler: JoinHandle<()>,
}

impl ChromiumRenderer {
    /// Launch a Chromium instance, headless unless `headless` is false.
    pub async fn launch(headless: bool, request_timeout: Duration) -> Result<Self> {
        let chrome_path = find_chromium()
            .context("Chromium not found. Set ROSTER_WATCH_CHROMIUM_PATH or install Chrome.")?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .request_timeout(request_timeout)
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions");
        builder = if headless {
            builder.arg("--headless=new")
        } else {
            builder.with_head()
        };
        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        tracing::info!(headless, "Chromium launched");

        Ok(Self {
            browser: Mutex::new(Some(browser)),
            handler,
        })
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_session(&self) -> Result<Box<dyn Session>> {
        let guard = self.browser.lock().await;
        let browser = guard.as_ref().context("browser already shut down")?;
        let page = browser
            .new_page("about:blank")
            .await
            .context("failed to create new page")?;
        Ok(Box::new(ChromiumSession { page }))
    }

    async fn shutdown(&self) -> Result<()> {
        let mut guard = self.browser.lock().await;
        if let Some(mut browser) = guard.take() {
            if let Err(e) = browser.close().await {
                tracing::warn!("browser close failed: {e}");
            }
            let _ = browser.wait().await;
        }
        self.handler.abort();
        Ok(())
    }
}

/// A single Chromium page.
pub struct ChromiumSession {
    page: Page,
}

#[async_trait]
impl Session for ChromiumSession {
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult> {
        let start = Instant::now();

        let result = tokio::time::timeout(Duration::from_millis(timeout_ms), async {
            self.page.goto(url).await?;
            self.page.wait_for_navigation().await?;
            Ok::<_, chromiumoxide::error::CdpError>(())
        })
        .await;

        let load_time_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(())) => {
                let final_url = self
                    .page
                    .url()
                    .await
                    .unwrap_or_default()
                    .unwrap_or_else(|| url.to_string());
                Ok(NavigationResult {
                    final_url,
                    load_time_ms,
                })
            }
            Ok(Err(e)) => bail!("navigation failed: {e}"),
            Err(_) => bail!("navigation timed out after {timeout_ms}ms"),
        }
    }

    async fn html(&self) -> Result<String> {
        self.page.content().await.context("failed to get HTML")
    }

    async fn click(&mut self, selector: &str) -> Result<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .with_context(|| format!("no element for '{selector}'"))?;
        element
            .click()
            .await
            .with_context(|| format!("click on '{selector}' failed"))?;
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.page
            .screenshot(ScreenshotParams::builder().full_page(true).build())
            .await
            .context("screenshot failed")
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let _ = self.page.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_chromium_navigate_click_and_capture() {
        let renderer = ChromiumRenderer::launch(true, Duration::from_secs(10))
            .await
            .expect("failed to launch renderer");
        let mut session = renderer
            .new_session()
            .await
            .expect("failed to create session");

        session
            .navigate(
                "data:text/html,<table id='inmateTable'><tbody><tr><td><a href='#x'>A1</a></td></tr></tbody></table>",
                10000,
            )
            .await
            .expect("navigation failed");

        let html = session.html().await.expect("html failed");
        assert!(html.contains("inmateTable"));

        session
            .click("table#inmateTable tbody tr:nth-of-type(1) a")
            .await
            .expect("click failed");

        let png = session.screenshot().await.expect("screenshot failed");
        assert!(png.starts_with(&[0x89, b'P', b'N', b'G']));

        session.close().await.expect("close failed");
        renderer.shutdown().await.expect("shutdown failed");
    }
}
