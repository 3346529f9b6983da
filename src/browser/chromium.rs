//! Chromium-backed sessions using chromiumoxide.

use super::{BrowserEngine, PageSession};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// How often selector-wait polls re-check the page.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    // 1. VIGIL_CHROMIUM_PATH env
    if let Ok(p) = std::env::var("VIGIL_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. ~/.vigil/chromium/
    if let Some(home) = dirs::home_dir() {
        let candidates = if cfg!(target_os = "macos") {
            vec![
                home.join(".vigil/chromium/chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".vigil/chromium/chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".vigil/chromium/chrome"),
            ]
        } else {
            vec![
                home.join(".vigil/chromium/chrome-linux64/chrome"),
                home.join(".vigil/chromium/chrome"),
            ]
        };
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

    // 4. Common macOS locations
    if cfg!(target_os = "macos") {
        let common =
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Headless Chromium engine. One launched browser, one page per run.
pub struct ChromiumEngine {
    browser: Browser,
}

impl ChromiumEngine {
    /// Launch a headless Chromium instance.
    pub async fn launch() -> Result<Self> {
        let chrome_path = find_chromium()
            .context("Chromium not found. Set VIGIL_CHROMIUM_PATH or install Chrome.")?;

        let config = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--hide-scrollbars")
            .arg("--mute-audio")
            .arg("--allow-insecure-localhost")
            .arg("--ignore-certificate-errors")
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        // Drain protocol events for the lifetime of the browser
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        Ok(Self { browser })
    }
}

#[async_trait]
impl BrowserEngine for ChromiumEngine {
    async fn new_session(&self, user_agent: &str) -> Result<Box<dyn PageSession>> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("failed to create new page")?;

        let params = SetUserAgentOverrideParams::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build user-agent override: {e}"))?;
        page.set_user_agent(params)
            .await
            .context("failed to set user agent")?;

        Ok(Box::new(ChromiumSession { page }))
    }

    async fn shutdown(&self) -> Result<()> {
        // Browser process exits when the engine is dropped
        Ok(())
    }
}

/// A single Chromium page driven over CDP.
pub struct ChromiumSession {
    page: Page,
}

impl ChromiumSession {
    async fn eval<T: serde::de::DeserializeOwned>(&self, script: &str) -> Result<T> {
        let result = self
            .page
            .evaluate(script)
            .await
            .context("JS evaluation failed")?;
        result
            .into_value()
            .map_err(|e| anyhow::anyhow!("failed to convert JS result: {e:?}"))
    }
}

#[async_trait]
impl PageSession for ChromiumSession {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()> {
        let result = tokio::time::timeout(timeout, self.page.goto(url)).await;
        match result {
            Ok(Ok(_response)) => {
                let _ = self.page.wait_for_navigation().await;
                Ok(())
            }
            Ok(Err(e)) => bail!("navigation failed: {e}"),
            Err(_) => bail!("navigation timed out after {}ms", timeout.as_millis()),
        }
    }

    async fn current_url(&self) -> Result<String> {
        let url = self
            .page
            .url()
            .await
            .context("failed to get URL")?
            .map(|u| u.to_string())
            .unwrap_or_default();
        Ok(url)
    }

    async fn title(&self) -> Result<String> {
        self.eval("document.title || ''").await
    }

    async fn wait_for_visible(&self, selector: &str, timeout: Duration) -> Result<()> {
        let script = visibility_script(selector);
        let deadline = Instant::now() + timeout;
        loop {
            let visible: bool = self.eval(&script).await.unwrap_or(false);
            if visible {
                return Ok(());
            }
            if Instant::now() >= deadline {
                bail!(
                    "selector [{selector}] did not become visible within {}ms",
                    timeout.as_millis()
                );
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    async fn click(&self, selector: &str) -> Result<()> {
        if selector.starts_with('/') {
            // XPath targets are clicked in-page
            let script = format!(
                r#"(() => {{
                    const el = document.evaluate('{}', document, null,
                        XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue;
                    if (el) {{ el.click(); return true; }}
                    return false;
                }})()"#,
                sanitize_js_string(selector)
            );
            let clicked: bool = self.eval(&script).await?;
            if !clicked {
                bail!("no nodes matched selector [{selector}] to click");
            }
            return Ok(());
        }
        let element = self
            .page
            .find_element(selector)
            .await
            .with_context(|| format!("no nodes matched selector [{selector}] to click"))?;
        element.click().await.context("click failed")?;
        Ok(())
    }

    async fn press_enter(&self, selector: &str) -> Result<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .with_context(|| format!("no nodes matched selector [{selector}] for key press"))?;
        element
            .press_key("Enter")
            .await
            .context("key press failed")?;
        Ok(())
    }

    async fn text(&self, selector: &str) -> Result<String> {
        let script = format!(
            r#"(() => {{
                const el = document.querySelector('{}');
                return el ? el.textContent : null;
            }})()"#,
            sanitize_js_string(selector)
        );
        let text: Option<String> = self.eval(&script).await?;
        text.with_context(|| format!("no nodes matched selector [{selector}]"))
    }

    async fn text_by_id(&self, id: &str) -> Result<String> {
        let script = format!(
            r#"(() => {{
                const el = document.getElementById('{}');
                return el ? el.textContent : null;
            }})()"#,
            sanitize_js_string(id)
        );
        let text: Option<String> = self.eval(&script).await?;
        text.with_context(|| format!("no element with id [{id}]"))
    }

    async fn href(&self, selector: &str) -> Result<String> {
        let script = format!(
            r#"(() => {{
                const el = document.querySelector('{}');
                return el ? el.getAttribute('href') : null;
            }})()"#,
            sanitize_js_string(selector)
        );
        let href: Option<String> = self.eval(&script).await?;
        href.with_context(|| format!("no nodes returned for selector [{selector}]"))
    }

    async fn page_dump(&self) -> Result<String> {
        let script = r#"(() => {
            const head = document.head ? document.head.outerHTML : '';
            const body = document.body ? document.body.outerHTML : '';
            return head + body;
        })()"#;
        self.eval(script).await
    }

    async fn iframe_dump(
        &self,
        uri_fragment: &str,
        challenge_selector: &str,
        timeout: Duration,
    ) -> Result<String> {
        // Same-origin frames expose their document; cross-origin ones
        // only their element, which is still captured.
        let script = format!(
            r#"(() => {{
                const frames = Array.from(document.querySelectorAll('iframe'));
                const frame = frames.find(f => (f.src || '').includes('{}'));
                if (!frame) return null;
                try {{
                    const doc = frame.contentDocument;
                    if (doc) {{
                        return {{
                            ready: !!doc.querySelector('{}'),
                            html: doc.documentElement ? doc.documentElement.outerHTML : ''
                        }};
                    }}
                }} catch (e) {{}}
                return {{ ready: true, html: frame.outerHTML }};
            }})()"#,
            sanitize_js_string(uri_fragment),
            sanitize_js_string(challenge_selector)
        );

        #[derive(serde::Deserialize)]
        struct FrameCapture {
            ready: bool,
            html: String,
        }

        let deadline = Instant::now() + timeout;
        loop {
            let capture: Option<FrameCapture> = self.eval(&script).await?;
            match capture {
                Some(c) if c.ready => return Ok(c.html),
                _ => {}
            }
            if Instant::now() >= deadline {
                bail!(
                    "CAPTCHA iframe matching [{uri_fragment}] did not load within {}ms",
                    timeout.as_millis()
                );
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let _ = self.page.close().await;
        Ok(())
    }
}

/// Build a JS expression testing whether `selector` resolves to a
/// visible element. XPath selectors (leading `/`) use `document.evaluate`.
fn visibility_script(selector: &str) -> String {
    let lookup = if selector.starts_with('/') {
        format!(
            "document.evaluate('{}', document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue",
            sanitize_js_string(selector)
        )
    } else {
        format!("document.querySelector('{}')", sanitize_js_string(selector))
    };
    format!(
        r#"(() => {{
            const el = {lookup};
            if (!el) return false;
            const style = window.getComputedStyle(el);
            if (style.display === 'none' || style.visibility === 'hidden') return false;
            const rect = el.getBoundingClientRect();
            return rect.width > 0 && rect.height > 0;
        }})()"#
    )
}

/// Escape a string for safe injection into a JS string literal.
fn sanitize_js_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 8);
    for ch in s.chars() {
        match ch {
            '\\' => result.push_str("\\\\"),
            '\'' => result.push_str("\\'"),
            '"' => result.push_str("\\\""),
            '`' => result.push_str("\\`"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            '\0' => {}
            '<' => result.push_str("\\x3c"),
            '>' => result.push_str("\\x3e"),
            _ => result.push(ch),
        }
    }
    result
}
