//! Run orchestration: one-shot fetches and the polling watch loop.
//!
//! [`Engine`] owns everything one run needs around a pipeline: the
//! browser engine, the per-target agent store, the notification
//! handle and the dump router. Executors layer scheduling on top of
//! it; within a cycle targets always run sequentially, so one
//! misbehaving page cannot starve the rest of the browser.

use crate::agent::{AgentPool, SessionStore};
use crate::browser::BrowserEngine;
use crate::config::{CheckKind, Target, WatchConfig};
use crate::dump::DumpRouter;
use crate::notify::NotifyHandle;
use crate::pipeline::{CycleError, ExtractSpec, Pipeline, PipelineSettings, StepContext};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Everything shared by every run against every target.
pub struct Engine {
    browser: Arc<dyn BrowserEngine>,
    agents: SessionStore,
    notify: NotifyHandle,
    dumps: DumpRouter,
    settings: PipelineSettings,
    /// Overall bound on a single target run. None runs unbounded.
    run_timeout: Option<Duration>,
}

impl Engine {
    pub fn new(
        browser: Arc<dyn BrowserEngine>,
        pool: AgentPool,
        notify: NotifyHandle,
        dumps: DumpRouter,
        settings: PipelineSettings,
        run_timeout: Option<Duration>,
    ) -> Self {
        Self {
            browser,
            agents: SessionStore::new(pool),
            notify,
            dumps,
            settings,
            run_timeout,
        }
    }

    pub fn from_config(
        browser: Arc<dyn BrowserEngine>,
        cfg: &WatchConfig,
        notify: NotifyHandle,
        dumps: DumpRouter,
    ) -> Self {
        Self::new(
            browser,
            AgentPool::new(cfg.agents.clone()),
            notify,
            dumps,
            PipelineSettings::from_config(cfg),
            cfg.timeout_secs.map(Duration::from_secs),
        )
    }

    /// One full run against one target: pick an agent, open a fresh
    /// session, execute the pipeline, close the session. The session
    /// is closed on every path, including timeout.
    pub async fn run_target(
        &mut self,
        target: &Target,
        extract: ExtractSpec,
    ) -> Result<(), CycleError> {
        let agent = self.agents.select(&target.url);
        let page = self
            .browser
            .new_session(&agent)
            .await
            .map_err(|e| CycleError::session(&target.url, e))?;
        let pipeline = Pipeline::build(target, &self.settings, extract);

        let limit = self.run_timeout;
        let mut cx = StepContext {
            page: page.as_ref(),
            agents: &mut self.agents,
            notify: &self.notify,
            dumps: &self.dumps,
        };
        let run = pipeline.run(&mut cx);
        let outcome = match limit {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(outcome) => outcome,
                Err(_) => Err(CycleError::Timeout {
                    url: target.url.clone(),
                    secs: limit.as_secs(),
                }),
            },
            None => run.await,
        };

        if let Err(err) = page.close().await {
            tracing::warn!("failed to close the session for URL [{}]: {err}", target.url);
        }
        outcome
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.browser.shutdown().await
    }
}

/// One-shot content retrieval: run every target once and dispatch
/// whatever the configured extraction produces.
pub struct FetchExecutor {
    engine: Engine,
    targets: Vec<Target>,
}

impl FetchExecutor {
    pub fn new(engine: Engine, targets: Vec<Target>) -> Self {
        Self { engine, targets }
    }

    /// Extraction spec for a fetch: the configured check's selector
    /// and kind with no change comparison, or a full page dump when
    /// no check was given.
    fn extract_spec(target: &Target) -> ExtractSpec {
        match &target.check {
            Some(check) => ExtractSpec::Capture {
                selector: check.selector.clone(),
                kind: check.kind,
            },
            None => ExtractSpec::Capture {
                selector: String::new(),
                kind: CheckKind::Dump,
            },
        }
    }

    /// Run each target once. The first failure aborts the remaining
    /// targets; a fetch is an interactive command and partial silence
    /// is worse than a loud error.
    pub async fn run(mut self) -> Result<(), CycleError> {
        for target in &self.targets {
            tracing::info!("fetching URL [{}]", target.url);
            self.engine
                .run_target(target, Self::extract_spec(target))
                .await?;
        }
        Ok(())
    }
}

/// The polling watch loop: run a full cycle over every target, sleep
/// out the interval, repeat forever.
pub struct WatchExecutor {
    engine: Engine,
    targets: Vec<Target>,
    interval: Duration,
}

impl WatchExecutor {
    pub fn new(engine: Engine, targets: Vec<Target>, interval: Duration) -> Self {
        Self {
            engine,
            targets,
            interval,
        }
    }

    /// One pass over every target. A failed target never stops the
    /// cycle; its error is logged and the next target runs.
    pub async fn cycle(&mut self) {
        for target in &self.targets {
            let extract = ExtractSpec::from_target(target);
            match self.engine.run_target(target, extract).await {
                Ok(()) => {}
                Err(err) if err.is_expected_recovery() => {
                    tracing::info!("cycle for URL [{}] ended early: {err}", target.url);
                }
                Err(err) => {
                    tracing::error!("cycle for URL [{}] failed: {err}", target.url);
                }
            }
        }
    }

    /// Run cycles forever. The first cycle starts immediately; later
    /// cycles wait out the interval, and a cycle that overruns it is
    /// followed by a full interval of quiet rather than a burst of
    /// catch-up runs.
    pub async fn run(mut self) -> ! {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.cycle().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::mock::{MockEngine, MockSession};
    use crate::config::{ContentCheck, Detections};
    use crate::snapshot::SnapshotSpec;

    fn settings() -> PipelineSettings {
        PipelineSettings {
            detect: Detections::default(),
            snapshot: SnapshotSpec::default(),
            step_timeout: Duration::from_secs(1),
            captcha_click_sleep: Duration::ZERO,
        }
    }

    fn target(url: &str) -> Target {
        Target {
            url: url.to_string(),
            wait_selector: Some("#ready".to_string()),
            check: Some(ContentCheck {
                selector: "#status".to_string(),
                kind: CheckKind::Text,
                expected_text: "OPEN".to_string(),
            }),
            notify_path: None,
            captcha: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_run_target_closes_session_on_success() {
        let session = Arc::new(
            MockSession::new()
                .with_visible("#ready")
                .with_text("#status", "OPEN"),
        );
        let browser = Arc::new(MockEngine::new(vec![Arc::clone(&session)]));
        let (notify, _rx) = NotifyHandle::collector();
        let mut engine = Engine::new(
            browser,
            AgentPool::new(vec!["agent-0".to_string()]),
            notify,
            DumpRouter::Stdout,
            settings(),
            None,
        );

        engine
            .run_target(&target("http://x"), ExtractSpec::from_target(&target("http://x")))
            .await
            .unwrap();
        assert!(session.was_closed());
    }

    #[tokio::test]
    async fn test_run_target_closes_session_on_failure() {
        let session = Arc::new(MockSession::new()); // #ready never visible
        let browser = Arc::new(MockEngine::new(vec![Arc::clone(&session)]));
        let (notify, _rx) = NotifyHandle::collector();
        let mut engine = Engine::new(
            browser,
            AgentPool::new(vec!["agent-0".to_string()]),
            notify,
            DumpRouter::Stdout,
            settings(),
            None,
        );

        let t = target("http://x");
        let err = engine
            .run_target(&t, ExtractSpec::from_target(&t))
            .await
            .unwrap_err();
        assert!(matches!(err, CycleError::WaitFailed { .. }));
        assert!(session.was_closed());
    }

    #[tokio::test]
    async fn test_cycle_isolates_target_failures() {
        let broken = Arc::new(MockSession::new().failing_navigation());
        let healthy = Arc::new(
            MockSession::new()
                .with_visible("#ready")
                .with_text("#status", "CLOSED"),
        );
        let browser = Arc::new(MockEngine::new(vec![broken, Arc::clone(&healthy)]));
        let (notify, mut rx) = NotifyHandle::collector();
        let engine = Engine::new(
            browser,
            AgentPool::new(vec!["agent-0".to_string()]),
            notify,
            DumpRouter::Stdout,
            settings(),
            None,
        );

        let mut executor = WatchExecutor::new(
            engine,
            vec![target("http://broken"), target("http://healthy")],
            Duration::from_secs(30),
        );
        executor.cycle().await;

        // The second target still ran and produced its event.
        let event = rx.recv().await.unwrap();
        assert_eq!(event.target_url, "http://healthy");
        assert!(healthy.was_closed());
    }

    #[tokio::test]
    async fn test_fetch_dispatches_without_change_check() {
        let session = Arc::new(
            MockSession::new()
                .with_visible("#ready")
                .with_text("#status", "OPEN"),
        );
        let browser = Arc::new(MockEngine::new(vec![session]));
        let (notify, mut rx) = NotifyHandle::collector();
        let engine = Engine::new(
            browser,
            AgentPool::new(vec!["agent-0".to_string()]),
            notify,
            DumpRouter::Stdout,
            settings(),
            None,
        );

        // Expected text matches, which suppresses a watch event; a
        // fetch dispatches the content regardless.
        FetchExecutor::new(engine, vec![target("http://x")])
            .run()
            .await
            .unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.text.as_deref(), Some("OPEN"));
    }
}
