//! Drives one session against the roster source.
//!
//! Page loads and row clicks go through a fixed-delay `RetryPolicy`; every
//! failed attempt leaves a diagnostic snapshot behind. Selector waits poll the
//! rendered HTML until a match or the per-selector timeout.

use std::time::{Duration, Instant};

use scraper::{Html, Selector};

use crate::config::CrawlConfig;
use crate::diagnostics::{Diagnostics, Snapshot};
use crate::renderer::{NavigationResult, Session};
use crate::retry::RetryPolicy;
use crate::types::{CrawlError, CrawlResult};

/// How the detail view was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interaction {
    /// Clicking the identifier's row.
    Row,
    /// Clicking a link or button nested in the row.
    NestedLink,
}

/// Handle to an opened detail view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailView {
    pub identifier: String,
    pub interaction: Interaction,
}

/// A selector from an ordered candidate list that resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub index: usize,
    pub selector: String,
}

/// Sequential driver around a single session.
pub struct Navigator {
    session: Box<dyn Session>,
    diagnostics: Diagnostics,
    navigation_retry: RetryPolicy,
    click_retry: RetryPolicy,
    navigation_timeout: Duration,
    poll_interval: Duration,
}

impl Navigator {
    pub fn new(session: Box<dyn Session>, config: &CrawlConfig, diagnostics: Diagnostics) -> Self {
        Self {
            session,
            diagnostics,
            navigation_retry: config.navigation_retry,
            click_retry: config.click_retry,
            navigation_timeout: config.navigation_timeout(),
            poll_interval: config.poll_interval(),
        }
    }

    pub fn session(&self) -> &dyn Session {
        self.session.as_ref()
    }

    /// Load `url`, retrying per the navigation policy.
    pub async fn load(&mut self, url: &str) -> CrawlResult<NavigationResult> {
        let timeout_ms = self.navigation_timeout.as_millis() as u64;
        let mut last_error = String::new();

        for attempt in self.navigation_retry.attempts() {
            tracing::info!("navigating to {url} (attempt {attempt})");
            match self.session.navigate(url, timeout_ms).await {
                Ok(result) => {
                    tracing::debug!(load_time_ms = result.load_time_ms, "page loaded");
                    return Ok(result);
                }
                Err(e) => {
                    tracing::warn!("page load failed (attempt {attempt}): {e:#}");
                    last_error = format!("{e:#}");
                    let label = if attempt.is_last() {
                        "final_failed_load"
                    } else {
                        "page_load_timeout"
                    };
                    self.capture(label).await;
                }
            }
            self.navigation_retry.pause_after(attempt).await;
        }

        tracing::error!(
            "failed to navigate to {url} after {} attempts",
            self.navigation_retry.max_attempts.max(1)
        );
        Err(CrawlError::NavigationTimeout {
            url: url.to_string(),
            attempts: self.navigation_retry.max_attempts.max(1),
            reason: last_error,
        })
    }

    /// Current rendered HTML.
    pub async fn html(&self) -> CrawlResult<String> {
        self.session
            .html()
            .await
            .map_err(|e| CrawlError::Browser(format!("{e:#}")))
    }

    /// Poll until `selector` matches or `timeout` passes.
    pub async fn wait_for(&self, selector: &str, timeout: Duration) -> bool {
        self.poll(timeout, |html| selector_present(html, selector))
            .await
    }

    /// Try each selector in order, each with its own `timeout`.
    pub async fn wait_for_any(&self, selectors: &[String], timeout: Duration) -> Option<Resolved> {
        for (index, selector) in selectors.iter().enumerate() {
            tracing::debug!("waiting for '{selector}'");
            if self.wait_for(selector, timeout).await {
                return Some(Resolved {
                    index,
                    selector: selector.clone(),
                });
            }
            tracing::warn!("selector '{selector}' not found within {timeout:?}");
        }
        None
    }

    /// Like `wait_for_any`, but a container only counts once its markup
    /// differs from what it was in `before`.
    ///
    /// A panel left over from the previous detail pass is therefore never
    /// taken for the one just opened.
    pub async fn wait_for_fresh(
        &self,
        selectors: &[String],
        timeout: Duration,
        before: &str,
    ) -> Option<Resolved> {
        for (index, selector) in selectors.iter().enumerate() {
            let stale = container_html(before, selector);
            let fresh = self
                .poll(timeout, |html| match container_html(html, selector) {
                    Some(now) => stale.as_deref() != Some(now.as_str()),
                    None => false,
                })
                .await;
            if fresh {
                return Some(Resolved {
                    index,
                    selector: selector.clone(),
                });
            }
            if stale.is_some() {
                tracing::warn!("'{selector}' still shows the previous view after {timeout:?}");
            } else {
                tracing::warn!("selector '{selector}' not found within {timeout:?}");
            }
        }
        None
    }

    async fn poll(&self, timeout: Duration, ready: impl Fn(&str) -> bool) -> bool {
        let start = Instant::now();
        loop {
            match self.session.html().await {
                Ok(html) => {
                    if ready(&html) {
                        return true;
                    }
                }
                Err(e) => tracing::debug!("html read failed while waiting: {e:#}"),
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return false;
            }
            tokio::time::sleep(self.poll_interval.min(timeout - elapsed)).await;
        }
    }

    /// Open the detail view behind `row_selector`.
    ///
    /// The row itself is clicked under the click policy; if it never responds,
    /// the first nested element matching `link_selector` is clicked once.
    /// Returns `None` when both interactions fail.
    pub async fn open_detail(
        &mut self,
        identifier: &str,
        row_selector: &str,
        link_selector: &str,
    ) -> Option<DetailView> {
        for attempt in self.click_retry.attempts() {
            match self.session.click(row_selector).await {
                Ok(()) => {
                    return Some(DetailView {
                        identifier: identifier.to_string(),
                        interaction: Interaction::Row,
                    })
                }
                Err(e) => tracing::warn!("row click failed for {identifier} (attempt {attempt}): {e:#}"),
            }
            self.click_retry.pause_after(attempt).await;
        }

        let nested = scoped_selector(row_selector, link_selector);
        tracing::info!("trying nested element '{nested}' for {identifier}");
        match self.session.click(&nested).await {
            Ok(()) => Some(DetailView {
                identifier: identifier.to_string(),
                interaction: Interaction::NestedLink,
            }),
            Err(e) => {
                tracing::error!("could not open detail view for {identifier}: {e:#}");
                self.capture(&format!("click_failed_{identifier}")).await;
                None
            }
        }
    }

    /// Get back to the listing after a detail pass.
    ///
    /// Clicks the first dismiss control present; reloads `roster_url` when no
    /// listing selector matches afterwards.
    pub async fn return_to_roster(
        &mut self,
        roster_url: &str,
        list_selectors: &[String],
        dismiss_selectors: &[String],
    ) -> CrawlResult<()> {
        let html = self.html().await?;
        if let Some(dismiss) = dismiss_selectors
            .iter()
            .find(|sel| selector_present(&html, sel))
        {
            if let Err(e) = self.session.click(dismiss).await {
                tracing::debug!("dismiss '{dismiss}' failed: {e:#}");
            }
        }

        let html = self.html().await?;
        if list_selectors.iter().any(|sel| selector_present(&html, sel)) {
            return Ok(());
        }
        tracing::info!("listing gone after detail pass, reloading roster");
        self.load(roster_url).await.map(|_| ())
    }

    /// Best-effort diagnostic snapshot of the current state.
    pub async fn capture(&self, label: &str) -> Snapshot {
        self.diagnostics.capture(self.session.as_ref(), label).await
    }

    /// Release the session.
    pub async fn close(self) {
        if let Err(e) = self.session.close().await {
            tracing::warn!("session close failed: {e:#}");
        }
    }
}

/// Whether `selector` matches anything in `html`. Invalid selectors never match.
pub fn selector_present(html: &str, selector: &str) -> bool {
    let Ok(sel) = Selector::parse(selector) else {
        return false;
    };
    let doc = Html::parse_document(html);
    let found = doc.select(&sel).next().is_some();
    found
}

/// Outer HTML of the first element matching `selector`.
pub fn container_html(html: &str, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    let doc = Html::parse_document(html);
    let found = doc.select(&sel).next().map(|el| el.html());
    found
}

/// Prefix every alternative of `inner` with `scope`.
///
/// `scoped_selector("tr:nth-of-type(2)", "a, button")` gives
/// `"tr:nth-of-type(2) a, tr:nth-of-type(2) button"`.
pub fn scoped_selector(scope: &str, inner: &str) -> String {
    inner
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| format!("{scope} {part}"))
        .collect::<Vec<_>>()
        .join(", ")
}
