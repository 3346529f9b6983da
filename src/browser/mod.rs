//! Browser abstraction over the remote debugging protocol.
//!
//! [`BrowserEngine`] allocates one [`PageSession`] per pipeline run;
//! the session owns everything the steps need: navigation, selector
//! waits, DOM extraction, input simulation, and iframe capture. The
//! Chromium implementation lives in [`chromium`]; [`mock`] provides a
//! scripted session for driving the pipeline in tests.

pub mod chromium;
pub mod mock;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// A browser that can allocate page sessions.
///
/// The executors create exactly one session at a time: allocate,
/// drive the pipeline to completion or failure, tear down, move on.
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    /// Allocate a fresh session requesting as `user_agent`.
    async fn new_session(&self, user_agent: &str) -> Result<Box<dyn PageSession>>;
    /// Shut down the underlying browser.
    async fn shutdown(&self) -> Result<()>;
}

/// One allocated browser page, used for a single pipeline execution.
#[async_trait]
pub trait PageSession: Send + Sync {
    /// Drive the page to `url`.
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()>;
    /// The page's current location.
    async fn current_url(&self) -> Result<String>;
    /// The page title.
    async fn title(&self) -> Result<String>;
    /// Block until `selector` (CSS, or XPath when it starts with `/`)
    /// is visible, or the timeout elapses.
    async fn wait_for_visible(&self, selector: &str, timeout: Duration) -> Result<()>;
    /// Pointer-click the first node matching `selector`.
    async fn click(&self, selector: &str) -> Result<()>;
    /// Send a keyboard Enter to the first node matching `selector`.
    async fn press_enter(&self, selector: &str) -> Result<()>;
    /// Text content of the first node matching `selector`.
    async fn text(&self, selector: &str) -> Result<String>;
    /// Text content of the element with DOM id `id`.
    async fn text_by_id(&self, id: &str) -> Result<String>;
    /// `href` attribute of the first matching node; zero matches is an error.
    async fn href(&self, selector: &str) -> Result<String>;
    /// Outer HTML of `<head>` and `<body>` concatenated.
    async fn page_dump(&self) -> Result<String>;
    /// Wait for `challenge_selector` inside the iframe whose URI
    /// contains `uri_fragment`, then capture the iframe's HTML.
    async fn iframe_dump(
        &self,
        uri_fragment: &str,
        challenge_selector: &str,
        timeout: Duration,
    ) -> Result<String>;
    /// Release the page.
    async fn close(self: Box<Self>) -> Result<()>;
}
