//! Run configuration — targets, detection flags, selector defaults.
//!
//! Configuration is an immutable snapshot read once at startup. All
//! validation happens here, before any browser session or pipeline is
//! built; a [`ConfigError`] is fatal to the process.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Seconds between watch cycles when none is configured.
pub const DEFAULT_INTERVAL_SECS: u64 = 30;

/// Seconds to sleep after clicking the CAPTCHA checkbox, letting the
/// challenge iframe load before the location is re-checked.
pub const DEFAULT_CAPTCHA_CLICK_SLEEP_SECS: u64 = 5;

/// Selector to wait for so the CAPTCHA box can load.
pub const DEFAULT_CAPTCHA_WAIT_SELECTOR: &str = "div.re-captcha";

/// Selector to click once the CAPTCHA box appears.
pub const DEFAULT_CAPTCHA_CLICK_SELECTOR: &str = "div.g-recaptcha";

/// Selector for the CAPTCHA challenge iframe (XPath).
pub const DEFAULT_CAPTCHA_IFRAME_WAIT_SELECTOR: &str = "/html/body/div[6]/div[4]/iframe";

/// URI fragment identifying the CAPTCHA challenge iframe.
pub const DEFAULT_CAPTCHA_IFRAME_URI: &str = "recaptcha/api2/bframe";

/// Selector for the challenge content inside the iframe.
pub const DEFAULT_CAPTCHA_CHALLENGE_WAIT_SELECTOR: &str = "div.rc-imageselect-payload";

/// Page-title marker for a blocked request.
pub const ACCESS_DENIED_MARKER: &str = "Access Denied";

/// Subject line used when the email notifier has none configured.
pub const DEFAULT_EMAIL_SUBJECT: &str = "Vigil Watcher";

/// The user agent used when no pool is configured.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 11_1_0) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/87.0.4280.88 Safari/537.36";

/// Configuration errors. All of these abort before any session exists.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("at least one URL is required")]
    NoUrls,
    #[error("number of URLs and {name} must have the same length (expected {expected}, found {found})")]
    MismatchedSlices {
        name: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("unsupported check type: {0:?} (expected text, href, id or dump)")]
    InvalidCheckKind(String),
    #[error("invalid URL [{url}]: {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("CAPTCHA detection requires location-on-error so the current location can be compared to the target")]
    CaptchaRequiresLocation,
    #[error("CAPTCHA detection requires a non-empty {0}")]
    EmptyCaptchaSelector(&'static str),
    #[error("persisting dumps requires a dump store path")]
    DumpStoreRequiresPath,
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// How content is pulled out of the page for a change check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    /// Text content of the first node matching a CSS selector.
    Text,
    /// `href` attribute of the first matching node; zero matches is an error.
    Href,
    /// Text content of the element with the given id.
    Id,
    /// Outer HTML of `<head>` and `<body>` concatenated.
    #[default]
    Dump,
}

impl CheckKind {
    /// Parse a check type string. Empty means the default (full dump).
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s {
            "" | "dump" => Ok(Self::Dump),
            "text" => Ok(Self::Text),
            "href" => Ok(Self::Href),
            "id" => Ok(Self::Id),
            other => Err(ConfigError::InvalidCheckKind(other.to_string())),
        }
    }
}

/// A configured content check: extract by `kind` at `selector` and
/// notify when the result no longer contains `expected_text`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentCheck {
    pub selector: String,
    #[serde(default)]
    pub kind: CheckKind,
    pub expected_text: String,
}

/// Selector set driving the CAPTCHA state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptchaSelectors {
    /// Waited on so the checkbox can load.
    pub wait: String,
    /// Clicked once the checkbox appears.
    pub click: String,
    /// Waited on if the challenge iframe loads (XPath or CSS).
    pub iframe_wait: String,
    /// URI fragment locating the challenge iframe.
    pub iframe_uri: String,
    /// Waited on inside the iframe before its content is captured.
    pub challenge_wait: String,
}

impl Default for CaptchaSelectors {
    fn default() -> Self {
        Self {
            wait: DEFAULT_CAPTCHA_WAIT_SELECTOR.to_string(),
            click: DEFAULT_CAPTCHA_CLICK_SELECTOR.to_string(),
            iframe_wait: DEFAULT_CAPTCHA_IFRAME_WAIT_SELECTOR.to_string(),
            iframe_uri: DEFAULT_CAPTCHA_IFRAME_URI.to_string(),
            challenge_wait: DEFAULT_CAPTCHA_CHALLENGE_WAIT_SELECTOR.to_string(),
        }
    }
}

/// One watched URL plus everything needed to drive its pipeline.
/// Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub url: String,
    /// Selector to wait for before the content check runs.
    #[serde(default)]
    pub wait_selector: Option<String>,
    /// Change check; absent means the wait condition alone triggers a notification.
    #[serde(default)]
    pub check: Option<ContentCheck>,
    /// Path fragment that, when present in the current location, notifies immediately.
    #[serde(default)]
    pub notify_path: Option<String>,
    /// CAPTCHA selectors with any per-target overrides already applied.
    #[serde(default)]
    pub captcha: CaptchaSelectors,
}

/// Which detection steps are layered into the pipeline.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Detections {
    #[serde(default)]
    pub notify_path: bool,
    #[serde(default)]
    pub access_denied: bool,
    #[serde(default)]
    pub captcha: bool,
}

/// Failure-diagnostics switches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Record the current location before risky steps and log it on failure.
    #[serde(default)]
    pub location_on_error: bool,
    /// Capture a full page dump before risky steps and surface it on failure.
    #[serde(default)]
    pub dump_on_error: bool,
    /// Write surfaced dumps to the expiring store instead of stdout.
    #[serde(default)]
    pub store_path: Option<String>,
    /// Seconds persisted dumps live in the store. Zero keeps them indefinitely.
    #[serde(default)]
    pub store_ttl_secs: u64,
}

impl Diagnostics {
    pub fn persist_dumps(&self) -> bool {
        self.store_path.is_some()
    }
}

/// Immutable snapshot of one run's configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    pub targets: Vec<Target>,
    #[serde(default)]
    pub detect: Detections,
    #[serde(default)]
    pub diagnostics: Diagnostics,
    /// Seconds between watch cycles.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// Overall bound on one session run. None runs unbounded.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Seconds slept between the CAPTCHA click and the location re-check.
    #[serde(default = "default_click_sleep")]
    pub captcha_click_sleep_secs: u64,
    /// User agents to request as.
    #[serde(default = "default_agents")]
    pub agents: Vec<String>,
}

fn default_interval() -> u64 {
    DEFAULT_INTERVAL_SECS
}

fn default_click_sleep() -> u64 {
    DEFAULT_CAPTCHA_CLICK_SLEEP_SECS
}

fn default_agents() -> Vec<String> {
    vec![DEFAULT_USER_AGENT.to_string()]
}

impl WatchConfig {
    /// Load a full configuration from a JSON file and validate it.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Cross-field checks that individual setters cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.targets.is_empty() {
            return Err(ConfigError::NoUrls);
        }
        for t in &self.targets {
            url::Url::parse(&t.url).map_err(|source| ConfigError::InvalidUrl {
                url: t.url.clone(),
                source,
            })?;
        }
        if self.detect.captcha {
            if !self.diagnostics.location_on_error {
                return Err(ConfigError::CaptchaRequiresLocation);
            }
            for t in &self.targets {
                if t.captcha.wait.is_empty() {
                    return Err(ConfigError::EmptyCaptchaSelector("captcha wait selector"));
                }
                if t.captcha.click.is_empty() {
                    return Err(ConfigError::EmptyCaptchaSelector("captcha click selector"));
                }
                if t.captcha.iframe_wait.is_empty() {
                    return Err(ConfigError::EmptyCaptchaSelector(
                        "captcha iframe wait selector",
                    ));
                }
                if t.captcha.iframe_uri.is_empty() {
                    return Err(ConfigError::EmptyCaptchaSelector("captcha iframe URI"));
                }
                if t.captcha.challenge_wait.is_empty() {
                    return Err(ConfigError::EmptyCaptchaSelector(
                        "captcha challenge wait selector",
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Parallel per-target option slices, as they arrive from the command
/// line. `build_targets` zips them into [`Target`]s after length
/// validation; optional slices may be empty (feature unused) but when
/// present must match the URL count, with empty strings falling back
/// to the run-level default for that slot.
#[derive(Debug, Clone, Default)]
pub struct TargetSlices {
    pub urls: Vec<String>,
    pub wait_selectors: Vec<String>,
    pub check_selectors: Vec<String>,
    pub check_types: Vec<String>,
    pub expected_texts: Vec<String>,
    pub notify_paths: Vec<String>,
    pub captcha_wait_overrides: Vec<String>,
    pub captcha_click_overrides: Vec<String>,
}

impl TargetSlices {
    fn check_len(&self, name: &'static str, len: usize) -> Result<(), ConfigError> {
        if len != 0 && len != self.urls.len() {
            return Err(ConfigError::MismatchedSlices {
                name,
                expected: self.urls.len(),
                found: len,
            });
        }
        Ok(())
    }

    /// Zip the slices into targets, applying the default CAPTCHA
    /// selectors wherever no per-target override is given.
    pub fn build_targets(
        &self,
        captcha_defaults: &CaptchaSelectors,
    ) -> Result<Vec<Target>, ConfigError> {
        if self.urls.is_empty() {
            return Err(ConfigError::NoUrls);
        }
        self.check_len("wait_selectors", self.wait_selectors.len())?;
        self.check_len("check_selectors", self.check_selectors.len())?;
        self.check_len("check_types", self.check_types.len())?;
        self.check_len("expected_texts", self.expected_texts.len())?;
        self.check_len("notify_paths", self.notify_paths.len())?;
        self.check_len("captcha_wait_selectors", self.captcha_wait_overrides.len())?;
        self.check_len("captcha_click_selectors", self.captcha_click_overrides.len())?;

        let slot = |v: &[String], i: usize| -> Option<String> {
            v.get(i).filter(|s| !s.is_empty()).cloned()
        };

        let mut targets = Vec::with_capacity(self.urls.len());
        for (i, url) in self.urls.iter().enumerate() {
            let check = match (
                slot(&self.check_selectors, i),
                slot(&self.expected_texts, i),
            ) {
                (Some(selector), Some(expected_text)) => Some(ContentCheck {
                    selector,
                    kind: CheckKind::parse(
                        self.check_types.get(i).map(String::as_str).unwrap_or(""),
                    )?,
                    expected_text,
                }),
                _ => None,
            };

            let mut captcha = captcha_defaults.clone();
            if let Some(wait) = slot(&self.captcha_wait_overrides, i) {
                tracing::info!("using override captcha wait selector [{wait}] for URL [{url}]");
                captcha.wait = wait;
            }
            if let Some(click) = slot(&self.captcha_click_overrides, i) {
                tracing::info!("using override captcha click selector [{click}] for URL [{url}]");
                captcha.click = click;
            }

            targets.push(Target {
                url: url.clone(),
                wait_selector: slot(&self.wait_selectors, i),
                check,
                notify_path: slot(&self.notify_paths, i),
                captcha,
            });
        }
        Ok(targets)
    }
}
