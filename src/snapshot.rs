//! Scoped page capture around risky steps.
//!
//! A [`PageSnapshot`] is taken *before* a wait or detection runs and
//! handed the step's outcome afterwards; captured content is routed
//! to the diagnostic sink only when the step failed, and discarded
//! otherwise. Every detection and wait step shares this one
//! report-on-failure rule.

use crate::browser::PageSession;
use crate::dump::{DumpCategory, DumpRecord, DumpRouter};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// What a snapshot captures, per call site.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotSpec {
    /// Record the current location.
    pub check_location: bool,
    /// Capture a full page dump.
    pub dump_page: bool,
}

/// Page state captured before a risky operation.
#[derive(Debug, Clone)]
pub struct PageSnapshot {
    target_url: String,
    current_location: Option<String>,
    page_dump: Option<String>,
    captured_at: DateTime<Utc>,
}

impl PageSnapshot {
    /// Capture location and/or page content per `spec`.
    pub async fn capture(
        page: &dyn PageSession,
        spec: SnapshotSpec,
        target_url: &str,
    ) -> Result<Self> {
        let current_location = if spec.check_location {
            Some(page.current_url().await?)
        } else {
            None
        };
        let page_dump = if spec.dump_page {
            Some(page.page_dump().await?)
        } else {
            None
        };
        Ok(Self {
            target_url: target_url.to_string(),
            current_location,
            page_dump,
            captured_at: Utc::now(),
        })
    }

    /// Capture the CAPTCHA challenge iframe's content instead of the page.
    pub async fn capture_challenge(
        page: &dyn PageSession,
        target_url: &str,
        iframe_uri: &str,
        challenge_selector: &str,
        timeout: Duration,
    ) -> Result<Self> {
        tracing::info!(
            "finding iframe for captcha using URI [{iframe_uri}] for URL [{target_url}]"
        );
        let html = page
            .iframe_dump(iframe_uri, challenge_selector, timeout)
            .await?;
        tracing::info!("successfully loaded captcha for URL [{target_url}]");
        Ok(Self {
            target_url: target_url.to_string(),
            current_location: None,
            page_dump: Some(html),
            captured_at: Utc::now(),
        })
    }

    /// Location at capture time, when one was recorded.
    pub fn location(&self) -> Option<&str> {
        self.current_location.as_deref()
    }

    /// Hand the bracketed operation's outcome to the snapshot: on
    /// failure the captured dump is routed to `category` and the
    /// captured location is logged; on success everything is
    /// discarded. The outcome passes through either way.
    pub fn report<T, E: std::fmt::Display>(
        &self,
        result: Result<T, E>,
        category: DumpCategory,
        router: &DumpRouter,
    ) -> Result<T, E> {
        if let Err(err) = &result {
            if let Some(dump) = &self.page_dump {
                router.route(DumpRecord {
                    category,
                    timestamp: self.captured_at,
                    target_url: self.target_url.clone(),
                    content: dump.clone(),
                });
            }
            if let Some(location) = &self.current_location {
                tracing::error!(
                    "current URL location is [{location}] for our original target [{}]: {err}",
                    self.target_url
                );
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::mock::{MockEngine, MockSession};
    use crate::browser::BrowserEngine;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    async fn scripted_page(session: MockSession) -> Box<dyn PageSession> {
        let engine = MockEngine::new(vec![Arc::new(session)]);
        engine.new_session("agent").await.unwrap()
    }

    #[tokio::test]
    async fn test_capture_respects_spec() {
        let page = scripted_page(MockSession::new().with_dump("<body>blocked</body>")).await;
        page.navigate("http://x", Duration::from_secs(1))
            .await
            .unwrap();

        let snap = PageSnapshot::capture(
            page.as_ref(),
            SnapshotSpec {
                check_location: true,
                dump_page: false,
            },
            "http://x",
        )
        .await
        .unwrap();
        assert_eq!(snap.location(), Some("http://x"));
        assert!(snap.page_dump.is_none());
    }

    #[tokio::test]
    async fn test_report_routes_dump_only_on_failure() {
        let page = scripted_page(MockSession::new().with_dump("<body>blocked</body>")).await;
        let snap = PageSnapshot::capture(
            page.as_ref(),
            SnapshotSpec {
                check_location: false,
                dump_page: true,
            },
            "http://x",
        )
        .await
        .unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let router = DumpRouter::Store(tx);

        // Success discards the capture
        let ok: Result<(), anyhow::Error> = Ok(());
        assert!(snap.report(ok, DumpCategory::WaitError, &router).is_ok());

        // Failure routes it
        let err: Result<(), anyhow::Error> = Err(anyhow::anyhow!("wait timed out"));
        assert!(snap.report(err, DumpCategory::WaitError, &router).is_err());

        drop(router);
        let record = rx.recv().await.expect("failure should route one record");
        assert_eq!(record.category, DumpCategory::WaitError);
        assert_eq!(record.target_url, "http://x");
        assert_eq!(record.content, "<body>blocked</body>");
        assert!(rx.recv().await.is_none(), "success must not route a record");
    }
}
