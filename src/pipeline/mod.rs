//! Per-target action pipelines.
//!
//! A pipeline is built once per process start by folding an ordered
//! list of [`StepSpec`]s into executable [`Step`]s; only execution
//! repeats across watch cycles. Step order per target is fixed:
//! navigate → notify-path? → access-denied? → captcha? → wait? →
//! extract-and-dispatch, with the optional steps present only when
//! their detection is enabled for the run.

pub mod detect;
pub mod extract;

use crate::agent::SessionStore;
use crate::browser::PageSession;
use crate::config::{CaptchaSelectors, ContentCheck, Detections, Target, WatchConfig};
use crate::dump::DumpRouter;
use crate::notify::NotifyHandle;
use crate::snapshot::SnapshotSpec;
use std::time::Duration;
use thiserror::Error;

/// Per-step bound when no overall run timeout is configured.
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 30;

/// Everything that can end one target's cycle early.
///
/// None of these are fatal to the process: the executor logs the
/// error and moves to the next target. The detection variants are
/// "successful failures" — they report that the expected recovery
/// action was taken this cycle.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("navigation to [{url}] failed: {source}")]
    Navigation {
        url: String,
        source: anyhow::Error,
    },
    #[error("notify path [{fragment}] matched at [{location}]")]
    NotifyPathMatched { fragment: String, location: String },
    #[error("encountered the access-denied marker for URL [{url}]")]
    AccessDenied { url: String },
    #[error("captcha challenge for URL [{url}] loaded but unsolved")]
    CaptchaUnsolved { url: String },
    #[error("detection step failed for URL [{url}]: {source}")]
    Detection {
        url: String,
        source: anyhow::Error,
    },
    #[error("wait on selector [{selector}] failed for URL [{url}]: {source}")]
    WaitFailed {
        url: String,
        selector: String,
        source: anyhow::Error,
    },
    #[error("extraction failed for URL [{url}]: {source}")]
    ExtractionFailed {
        url: String,
        source: anyhow::Error,
    },
    #[error("session error for URL [{url}]: {source}")]
    Session {
        url: String,
        source: anyhow::Error,
    },
    #[error("run for URL [{url}] timed out after {secs}s")]
    Timeout { url: String, secs: u64 },
}

impl CycleError {
    pub(crate) fn session(url: &str, source: anyhow::Error) -> Self {
        Self::Session {
            url: url.to_string(),
            source,
        }
    }

    /// True when the error signals a detection state machine doing
    /// its job rather than something going wrong.
    pub fn is_expected_recovery(&self) -> bool {
        matches!(
            self,
            Self::NotifyPathMatched { .. } | Self::AccessDenied { .. } | Self::CaptchaUnsolved { .. }
        )
    }
}

/// Shared state a step runs against.
pub struct StepContext<'a> {
    pub page: &'a dyn PageSession,
    pub agents: &'a mut SessionStore,
    pub notify: &'a NotifyHandle,
    pub dumps: &'a DumpRouter,
}

/// Run-level knobs every pipeline is built with.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub detect: Detections,
    /// What snapshots capture around risky steps.
    pub snapshot: SnapshotSpec,
    pub step_timeout: Duration,
    pub captcha_click_sleep: Duration,
}

impl PipelineSettings {
    pub fn from_config(cfg: &WatchConfig) -> Self {
        Self {
            detect: cfg.detect,
            snapshot: SnapshotSpec {
                check_location: cfg.diagnostics.location_on_error,
                dump_page: cfg.diagnostics.dump_on_error,
            },
            step_timeout: Duration::from_secs(
                cfg.timeout_secs.unwrap_or(DEFAULT_STEP_TIMEOUT_SECS),
            ),
            captcha_click_sleep: Duration::from_secs(cfg.captcha_click_sleep_secs),
        }
    }
}

/// What the final pipeline step does with page content.
#[derive(Debug, Clone)]
pub enum ExtractSpec {
    /// Extract by the check's kind; notify when the result no longer
    /// contains the expected text.
    Check(ContentCheck),
    /// Extract and dispatch unconditionally (the fetch path).
    Capture {
        selector: String,
        kind: crate::config::CheckKind,
    },
    /// No check configured: reaching this step is the signal.
    WaitOnly,
}

impl ExtractSpec {
    pub fn from_target(target: &Target) -> Self {
        match &target.check {
            Some(check) => Self::Check(check.clone()),
            None => Self::WaitOnly,
        }
    }
}

/// Construction-time step description. Each spec appends its unit(s)
/// of work to the run sequence; disabled detections append nothing.
#[derive(Debug, Clone)]
pub enum StepSpec {
    Navigate {
        url: String,
        timeout: Duration,
    },
    Detect {
        url: String,
        detect: Detections,
        notify_path: Option<String>,
        captcha: CaptchaSelectors,
        snapshot: SnapshotSpec,
        click_sleep: Duration,
        timeout: Duration,
    },
    Wait {
        url: String,
        selector: Option<String>,
        snapshot: SnapshotSpec,
        timeout: Duration,
    },
    ExtractAndDispatch {
        url: String,
        extract: ExtractSpec,
    },
}

impl StepSpec {
    /// Append this spec's step(s) to the sequence.
    pub fn extend(&self, steps: &mut Vec<Step>) {
        match self {
            Self::Navigate { url, timeout } => steps.push(Step::Navigate {
                url: url.clone(),
                timeout: *timeout,
            }),
            Self::Detect {
                url,
                detect,
                notify_path,
                captcha,
                snapshot,
                click_sleep,
                timeout,
            } => {
                if detect.notify_path {
                    if let Some(fragment) = notify_path {
                        steps.push(Step::DetectNotifyPath {
                            url: url.clone(),
                            fragment: fragment.clone(),
                        });
                    }
                }
                if detect.access_denied {
                    steps.push(Step::DetectAccessDenied {
                        url: url.clone(),
                        snapshot: *snapshot,
                    });
                }
                if detect.captcha {
                    steps.push(Step::DetectCaptcha {
                        url: url.clone(),
                        selectors: captcha.clone(),
                        snapshot: *snapshot,
                        click_sleep: *click_sleep,
                        timeout: *timeout,
                    });
                }
            }
            Self::Wait {
                url,
                selector,
                snapshot,
                timeout,
            } => {
                if let Some(selector) = selector {
                    steps.push(Step::Wait {
                        url: url.clone(),
                        selector: selector.clone(),
                        snapshot: *snapshot,
                        timeout: *timeout,
                    });
                }
            }
            Self::ExtractAndDispatch { url, extract } => steps.push(Step::Extract {
                url: url.clone(),
                extract: extract.clone(),
            }),
        }
    }
}

/// An executable unit of work against one page session.
#[derive(Debug, Clone)]
pub enum Step {
    Navigate {
        url: String,
        timeout: Duration,
    },
    DetectNotifyPath {
        url: String,
        fragment: String,
    },
    DetectAccessDenied {
        url: String,
        snapshot: SnapshotSpec,
    },
    DetectCaptcha {
        url: String,
        selectors: CaptchaSelectors,
        snapshot: SnapshotSpec,
        click_sleep: Duration,
        timeout: Duration,
    },
    Wait {
        url: String,
        selector: String,
        snapshot: SnapshotSpec,
        timeout: Duration,
    },
    Extract {
        url: String,
        extract: ExtractSpec,
    },
}

impl Step {
    pub async fn run(&self, cx: &mut StepContext<'_>) -> Result<(), CycleError> {
        match self {
            Self::Navigate { url, timeout } => run_navigate(cx, url, *timeout).await,
            Self::DetectNotifyPath { url, fragment } => {
                detect::run_notify_path(cx, url, fragment).await
            }
            Self::DetectAccessDenied { url, snapshot } => {
                detect::run_access_denied(cx, url, *snapshot).await
            }
            Self::DetectCaptcha {
                url,
                selectors,
                snapshot,
                click_sleep,
                timeout,
            } => detect::run_captcha(cx, url, selectors, *snapshot, *click_sleep, *timeout).await,
            Self::Wait {
                url,
                selector,
                snapshot,
                timeout,
            } => run_wait(cx, url, selector, *snapshot, *timeout).await,
            Self::Extract { url, extract } => extract::run(cx, url, extract).await,
        }
    }
}

/// The ordered, immutable step sequence for one target.
pub struct Pipeline {
    steps: Vec<Step>,
}

impl Pipeline {
    /// Fold the per-target specs into a runnable sequence.
    pub fn build(target: &Target, settings: &PipelineSettings, extract: ExtractSpec) -> Self {
        let specs = [
            StepSpec::Navigate {
                url: target.url.clone(),
                timeout: settings.step_timeout,
            },
            StepSpec::Detect {
                url: target.url.clone(),
                detect: settings.detect,
                notify_path: target.notify_path.clone(),
                captcha: target.captcha.clone(),
                snapshot: settings.snapshot,
                click_sleep: settings.captcha_click_sleep,
                timeout: settings.step_timeout,
            },
            StepSpec::Wait {
                url: target.url.clone(),
                selector: target.wait_selector.clone(),
                snapshot: settings.snapshot,
                timeout: settings.step_timeout,
            },
            StepSpec::ExtractAndDispatch {
                url: target.url.clone(),
                extract,
            },
        ];

        let mut steps = Vec::new();
        for spec in &specs {
            spec.extend(&mut steps);
        }
        Self { steps }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Execute every step in order. Any error ends the run; steps
    /// after the failing one never execute this cycle.
    pub async fn run(&self, cx: &mut StepContext<'_>) -> Result<(), CycleError> {
        for step in &self.steps {
            step.run(cx).await?;
        }
        Ok(())
    }
}

async fn run_navigate(
    cx: &mut StepContext<'_>,
    url: &str,
    timeout: Duration,
) -> Result<(), CycleError> {
    match cx.page.navigate(url, timeout).await {
        Ok(()) => {
            cx.agents.confirm(url);
            Ok(())
        }
        Err(source) => {
            // Suspecting a user-agent issue; rotate on the next attempt
            cx.agents.invalidate(url);
            Err(CycleError::Navigation {
                url: url.to_string(),
                source,
            })
        }
    }
}

async fn run_wait(
    cx: &mut StepContext<'_>,
    url: &str,
    selector: &str,
    snapshot: SnapshotSpec,
    timeout: Duration,
) -> Result<(), CycleError> {
    let snap = crate::snapshot::PageSnapshot::capture(cx.page, snapshot, url)
        .await
        .map_err(|e| CycleError::session(url, e))?;

    let result = cx.page.wait_for_visible(selector, timeout).await;
    snap.report(result, crate::dump::DumpCategory::WaitError, cx.dumps)
        .map_err(|source| CycleError::WaitFailed {
            url: url.to_string(),
            selector: selector.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentPool, SessionStore};
    use crate::browser::mock::{MockEngine, MockSession};
    use crate::browser::BrowserEngine;
    use crate::config::CheckKind;
    use std::sync::Arc;

    fn target(url: &str) -> Target {
        Target {
            url: url.to_string(),
            wait_selector: Some("#ready".to_string()),
            check: None,
            notify_path: Some("/blocked".to_string()),
            captcha: CaptchaSelectors::default(),
        }
    }

    fn settings(detect: Detections) -> PipelineSettings {
        PipelineSettings {
            detect,
            snapshot: SnapshotSpec {
                check_location: true,
                dump_page: true,
            },
            step_timeout: Duration::from_secs(1),
            captcha_click_sleep: Duration::ZERO,
        }
    }

    #[test]
    fn test_build_orders_steps() {
        let pipeline = Pipeline::build(
            &target("http://x"),
            &settings(Detections {
                notify_path: true,
                access_denied: true,
                captcha: true,
            }),
            ExtractSpec::WaitOnly,
        );
        let kinds: Vec<&'static str> = pipeline
            .steps()
            .iter()
            .map(|s| match s {
                Step::Navigate { .. } => "navigate",
                Step::DetectNotifyPath { .. } => "notify-path",
                Step::DetectAccessDenied { .. } => "access-denied",
                Step::DetectCaptcha { .. } => "captcha",
                Step::Wait { .. } => "wait",
                Step::Extract { .. } => "extract",
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                "navigate",
                "notify-path",
                "access-denied",
                "captcha",
                "wait",
                "extract"
            ]
        );
    }

    #[test]
    fn test_build_skips_disabled_detections() {
        let pipeline = Pipeline::build(
            &target("http://x"),
            &settings(Detections::default()),
            ExtractSpec::Capture {
                selector: String::new(),
                kind: CheckKind::Dump,
            },
        );
        assert_eq!(pipeline.steps().len(), 3); // navigate, wait, extract
    }

    #[test]
    fn test_notify_path_step_needs_fragment() {
        let mut t = target("http://x");
        t.notify_path = None;
        let pipeline = Pipeline::build(
            &t,
            &settings(Detections {
                notify_path: true,
                ..Default::default()
            }),
            ExtractSpec::WaitOnly,
        );
        assert!(!pipeline
            .steps()
            .iter()
            .any(|s| matches!(s, Step::DetectNotifyPath { .. })));
    }

    #[tokio::test]
    async fn test_navigate_failure_invalidates_agent() {
        let session = Arc::new(MockSession::new().failing_navigation());
        let engine = MockEngine::new(vec![session]);
        let page = engine.new_session("agent-0").await.unwrap();

        let mut agents = SessionStore::new(AgentPool::new(vec!["agent-0".to_string()]));
        agents.select("http://x");
        agents.confirm("http://x");
        assert!(agents.working("http://x").is_some());

        let (notify, _rx) = NotifyHandle::collector();
        let dumps = DumpRouter::Stdout;
        let mut cx = StepContext {
            page: page.as_ref(),
            agents: &mut agents,
            notify: &notify,
            dumps: &dumps,
        };
        let err = run_navigate(&mut cx, "http://x", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CycleError::Navigation { .. }));
        assert!(agents.working("http://x").is_none());
    }

    #[tokio::test]
    async fn test_navigate_success_promotes_agent() {
        let session = Arc::new(MockSession::new());
        let engine = MockEngine::new(vec![session]);
        let page = engine.new_session("agent-0").await.unwrap();

        let mut agents = SessionStore::new(AgentPool::new(vec!["agent-0".to_string()]));
        let selected = agents.select("http://x");

        let (notify, _rx) = NotifyHandle::collector();
        let dumps = DumpRouter::Stdout;
        let mut cx = StepContext {
            page: page.as_ref(),
            agents: &mut agents,
            notify: &notify,
            dumps: &dumps,
        };
        run_navigate(&mut cx, "http://x", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(agents.working("http://x"), Some(selected.as_str()));
    }
}
