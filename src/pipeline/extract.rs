//! Content extraction and the change check behind notifications.

use super::{CycleError, ExtractSpec, StepContext};
use crate::browser::PageSession;
use crate::config::CheckKind;
use crate::notify::NotificationEvent;
use anyhow::Result;

/// Pull content out of the page per the configured check kind.
pub async fn extract(page: &dyn PageSession, selector: &str, kind: CheckKind) -> Result<String> {
    match kind {
        CheckKind::Text => page.text(selector).await,
        CheckKind::Href => page.href(selector).await,
        CheckKind::Id => page.text_by_id(selector).await,
        CheckKind::Dump => page.page_dump().await,
    }
}

/// The final pipeline step: extract (when configured) and decide
/// whether to notify. A check notifies only when the extracted
/// content no longer contains the expected text; without a check,
/// reaching this step at all means the wait condition held and that
/// is the signal.
pub(super) async fn run(
    cx: &mut StepContext<'_>,
    url: &str,
    spec: &ExtractSpec,
) -> Result<(), CycleError> {
    match spec {
        ExtractSpec::Check(check) => {
            let content = extract(cx.page, &check.selector, check.kind)
                .await
                .map_err(|source| CycleError::ExtractionFailed {
                    url: url.to_string(),
                    source,
                })?;
            if content.contains(&check.expected_text) {
                tracing::info!(
                    "extracted content for URL [{url}] still contains [{}], no action needed",
                    check.expected_text
                );
                return Ok(());
            }
            tracing::info!(
                "extracted content for URL [{url}] no longer contains [{}], notifying",
                check.expected_text
            );
            cx.notify
                .dispatch(NotificationEvent::new(url, Some(content)));
            Ok(())
        }
        ExtractSpec::Capture { selector, kind } => {
            let content = extract(cx.page, selector, *kind).await.map_err(|source| {
                CycleError::ExtractionFailed {
                    url: url.to_string(),
                    source,
                }
            })?;
            cx.notify
                .dispatch(NotificationEvent::new(url, Some(content)));
            Ok(())
        }
        ExtractSpec::WaitOnly => {
            tracing::info!("wait condition for URL [{url}] was met, notifying");
            cx.notify.dispatch(NotificationEvent::new(url, None));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentPool, SessionStore};
    use crate::browser::mock::{MockEngine, MockSession};
    use crate::browser::BrowserEngine;
    use crate::config::ContentCheck;
    use crate::dump::DumpRouter;
    use crate::notify::NotifyHandle;
    use std::sync::Arc;

    const URL: &str = "http://watch.example/item";

    async fn page_for(session: Arc<MockSession>) -> Box<dyn PageSession> {
        MockEngine::new(vec![session])
            .new_session("agent-0")
            .await
            .unwrap()
    }

    fn check(kind: CheckKind, selector: &str, expected: &str) -> ExtractSpec {
        ExtractSpec::Check(ContentCheck {
            selector: selector.to_string(),
            kind,
            expected_text: expected.to_string(),
        })
    }

    #[tokio::test]
    async fn test_expected_text_present_means_no_event() {
        let session = Arc::new(MockSession::new().with_text("#status", "Currently OPEN"));
        let page = page_for(session).await;
        let mut agents = SessionStore::new(AgentPool::default());
        let (notify, mut rx) = NotifyHandle::collector();
        let dumps = DumpRouter::Stdout;
        let mut cx = StepContext {
            page: page.as_ref(),
            agents: &mut agents,
            notify: &notify,
            dumps: &dumps,
        };

        run(&mut cx, URL, &check(CheckKind::Text, "#status", "OPEN"))
            .await
            .unwrap();
        drop(cx);
        drop(notify);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_expected_text_gone_dispatches_content() {
        let session = Arc::new(MockSession::new().with_text("#status", "CLOSED"));
        let page = page_for(session).await;
        let mut agents = SessionStore::new(AgentPool::default());
        let (notify, mut rx) = NotifyHandle::collector();
        let dumps = DumpRouter::Stdout;
        let mut cx = StepContext {
            page: page.as_ref(),
            agents: &mut agents,
            notify: &notify,
            dumps: &dumps,
        };

        run(&mut cx, URL, &check(CheckKind::Text, "#status", "OPEN"))
            .await
            .unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.target_url, URL);
        assert_eq!(event.text.as_deref(), Some("CLOSED"));
    }

    #[tokio::test]
    async fn test_extraction_failure_is_a_cycle_error() {
        let session = Arc::new(MockSession::new());
        let page = page_for(session).await;
        let mut agents = SessionStore::new(AgentPool::default());
        let (notify, _rx) = NotifyHandle::collector();
        let dumps = DumpRouter::Stdout;
        let mut cx = StepContext {
            page: page.as_ref(),
            agents: &mut agents,
            notify: &notify,
            dumps: &dumps,
        };

        let err = run(&mut cx, URL, &check(CheckKind::Href, "a.buy", "in stock"))
            .await
            .unwrap_err();
        assert!(matches!(err, CycleError::ExtractionFailed { .. }));
    }

    #[tokio::test]
    async fn test_wait_only_dispatches_without_text() {
        let session = Arc::new(MockSession::new());
        let page = page_for(session).await;
        let mut agents = SessionStore::new(AgentPool::default());
        let (notify, mut rx) = NotifyHandle::collector();
        let dumps = DumpRouter::Stdout;
        let mut cx = StepContext {
            page: page.as_ref(),
            agents: &mut agents,
            notify: &notify,
            dumps: &dumps,
        };

        run(&mut cx, URL, &ExtractSpec::WaitOnly).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert!(event.text.is_none());
    }

    #[tokio::test]
    async fn test_capture_dispatches_unconditionally() {
        let session = Arc::new(MockSession::new().with_dump("<head></head><body>hi</body>"));
        let page = page_for(session).await;
        let mut agents = SessionStore::new(AgentPool::default());
        let (notify, mut rx) = NotifyHandle::collector();
        let dumps = DumpRouter::Stdout;
        let mut cx = StepContext {
            page: page.as_ref(),
            agents: &mut agents,
            notify: &notify,
            dumps: &dumps,
        };

        run(
            &mut cx,
            URL,
            &ExtractSpec::Capture {
                selector: String::new(),
                kind: CheckKind::Dump,
            },
        )
        .await
        .unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.text.as_deref(), Some("<head></head><body>hi</body>"));
    }
}
