//! Scripted browser stand-ins for exercising pipelines without Chromium.
//!
//! [`MockEngine`] hands out pre-scripted [`MockSession`]s in order,
//! one per run, and records which user agent each run requested.
//! Sessions record every operation so tests can assert on exactly
//! which branches a pipeline took.

use super::{BrowserEngine, PageSession};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct MockState {
    location: String,
    navigated_to: Option<String>,
    calls: Vec<String>,
    iframe_dumps: usize,
    closed: bool,
}

/// A scripted page session.
pub struct MockSession {
    title: String,
    visible: HashSet<String>,
    texts: HashMap<String, String>,
    id_texts: HashMap<String, String>,
    hrefs: HashMap<String, String>,
    dump: String,
    redirect: Option<String>,
    fail_navigation: bool,
    fail_click: bool,
    unblock_on_click: bool,
    unblock_on_enter: bool,
    iframe_html: Option<String>,
    state: Mutex<MockState>,
}

impl Default for MockSession {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSession {
    pub fn new() -> Self {
        Self {
            title: String::new(),
            visible: HashSet::new(),
            texts: HashMap::new(),
            id_texts: HashMap::new(),
            hrefs: HashMap::new(),
            dump: "<head></head><body></body>".to_string(),
            redirect: None,
            fail_navigation: false,
            fail_click: false,
            unblock_on_click: false,
            unblock_on_enter: false,
            iframe_html: None,
            state: Mutex::new(MockState {
                location: "about:blank".to_string(),
                ..Default::default()
            }),
        }
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    /// Mark a selector as visible; waits on anything else fail.
    pub fn with_visible(mut self, selector: &str) -> Self {
        self.visible.insert(selector.to_string());
        self
    }

    pub fn with_text(mut self, selector: &str, text: &str) -> Self {
        self.texts.insert(selector.to_string(), text.to_string());
        self
    }

    pub fn with_id_text(mut self, id: &str, text: &str) -> Self {
        self.id_texts.insert(id.to_string(), text.to_string());
        self
    }

    pub fn with_href(mut self, selector: &str, href: &str) -> Self {
        self.hrefs.insert(selector.to_string(), href.to_string());
        self
    }

    pub fn with_dump(mut self, html: &str) -> Self {
        self.dump = html.to_string();
        self
    }

    /// Navigation lands on `url` instead of the requested target
    /// (simulates a redirect to a block page).
    pub fn with_redirect(mut self, url: &str) -> Self {
        self.redirect = Some(url.to_string());
        self
    }

    pub fn failing_navigation(mut self) -> Self {
        self.fail_navigation = true;
        self
    }

    /// Pointer clicks error, forcing the keyboard fallback.
    pub fn failing_click(mut self) -> Self {
        self.fail_click = true;
        self
    }

    /// A successful click restores the location to the navigated target.
    pub fn unblock_on_click(mut self) -> Self {
        self.unblock_on_click = true;
        self
    }

    /// A keyboard Enter restores the location to the navigated target.
    pub fn unblock_on_enter(mut self) -> Self {
        self.unblock_on_enter = true;
        self
    }

    pub fn with_iframe_html(mut self, html: &str) -> Self {
        self.iframe_html = Some(html.to_string());
        self
    }

    /// Every operation performed, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// How many times the challenge iframe was captured.
    pub fn iframe_dump_count(&self) -> usize {
        self.state.lock().unwrap().iframe_dumps
    }

    pub fn was_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

/// Delegating handle so one scripted session can be inspected after
/// the engine boxed it away.
struct MockHandle(Arc<MockSession>);

#[async_trait]
impl PageSession for MockHandle {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<()> {
        self.0.record(format!("navigate:{url}"));
        if self.0.fail_navigation {
            bail!("navigation failed: net::ERR_CONNECTION_RESET");
        }
        let mut state = self.0.state.lock().unwrap();
        state.navigated_to = Some(url.to_string());
        state.location = self
            .0
            .redirect
            .clone()
            .unwrap_or_else(|| url.to_string());
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.0.state.lock().unwrap().location.clone())
    }

    async fn title(&self) -> Result<String> {
        Ok(self.0.title.clone())
    }

    async fn wait_for_visible(&self, selector: &str, _timeout: Duration) -> Result<()> {
        self.0.record(format!("wait:{selector}"));
        if self.0.visible.contains(selector) {
            Ok(())
        } else {
            bail!("selector [{selector}] did not become visible");
        }
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.0.record(format!("click:{selector}"));
        if self.0.fail_click {
            bail!("click failed: node is not clickable");
        }
        if self.0.unblock_on_click {
            let mut state = self.0.state.lock().unwrap();
            if let Some(target) = state.navigated_to.clone() {
                state.location = target;
            }
        }
        Ok(())
    }

    async fn press_enter(&self, selector: &str) -> Result<()> {
        self.0.record(format!("enter:{selector}"));
        if self.0.unblock_on_enter {
            let mut state = self.0.state.lock().unwrap();
            if let Some(target) = state.navigated_to.clone() {
                state.location = target;
            }
        }
        Ok(())
    }

    async fn text(&self, selector: &str) -> Result<String> {
        self.0.record(format!("text:{selector}"));
        match self.0.texts.get(selector) {
            Some(t) => Ok(t.clone()),
            None => bail!("no nodes matched selector [{selector}]"),
        }
    }

    async fn text_by_id(&self, id: &str) -> Result<String> {
        self.0.record(format!("id:{id}"));
        match self.0.id_texts.get(id) {
            Some(t) => Ok(t.clone()),
            None => bail!("no element with id [{id}]"),
        }
    }

    async fn href(&self, selector: &str) -> Result<String> {
        self.0.record(format!("href:{selector}"));
        match self.0.hrefs.get(selector) {
            Some(h) => Ok(h.clone()),
            None => bail!("no nodes returned for selector [{selector}]"),
        }
    }

    async fn page_dump(&self) -> Result<String> {
        self.0.record("dump".to_string());
        Ok(self.0.dump.clone())
    }

    async fn iframe_dump(
        &self,
        uri_fragment: &str,
        _challenge_selector: &str,
        _timeout: Duration,
    ) -> Result<String> {
        self.0.record(format!("iframe:{uri_fragment}"));
        self.0.state.lock().unwrap().iframe_dumps += 1;
        match &self.0.iframe_html {
            Some(html) => Ok(html.clone()),
            None => bail!("CAPTCHA iframe matching [{uri_fragment}] did not load"),
        }
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.0.state.lock().unwrap().closed = true;
        Ok(())
    }
}

/// Hands out scripted sessions in order, one per run.
pub struct MockEngine {
    sessions: Mutex<VecDeque<Arc<MockSession>>>,
    agents_used: Mutex<Vec<String>>,
}

impl MockEngine {
    pub fn new(sessions: Vec<Arc<MockSession>>) -> Self {
        Self {
            sessions: Mutex::new(sessions.into()),
            agents_used: Mutex::new(Vec::new()),
        }
    }

    /// User agents requested so far, in allocation order.
    pub fn agents_used(&self) -> Vec<String> {
        self.agents_used.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrowserEngine for MockEngine {
    async fn new_session(&self, user_agent: &str) -> Result<Box<dyn PageSession>> {
        self.agents_used
            .lock()
            .unwrap()
            .push(user_agent.to_string());
        let session = self
            .sessions
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("no scripted session left"))?;
        Ok(Box::new(MockHandle(session)))
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_scripts_and_records() {
        let session = Arc::new(
            MockSession::new()
                .with_visible("#ready")
                .with_text("#status", "OPEN")
                .with_redirect("http://block/page"),
        );
        let engine = MockEngine::new(vec![Arc::clone(&session)]);

        let page = engine.new_session("agent-1").await.unwrap();
        page.navigate("http://x", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(page.current_url().await.unwrap(), "http://block/page");
        page.wait_for_visible("#ready", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(page
            .wait_for_visible("#missing", Duration::from_secs(1))
            .await
            .is_err());
        assert_eq!(page.text("#status").await.unwrap(), "OPEN");
        page.close().await.unwrap();

        assert_eq!(engine.agents_used(), vec!["agent-1".to_string()]);
        assert!(session.was_closed());
        assert_eq!(
            session.calls(),
            vec!["navigate:http://x", "wait:#ready", "wait:#missing", "text:#status"]
        );
    }
}
