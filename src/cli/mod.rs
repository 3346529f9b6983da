//! CLI subcommand implementations for the vigil binary.

pub mod doctor;
pub mod fetch_cmd;
pub mod watch_cmd;

use crate::config::{
    CaptchaSelectors, ConfigError, ContentCheck, Detections, Diagnostics, Target, TargetSlices,
    WatchConfig, DEFAULT_CAPTCHA_CHALLENGE_WAIT_SELECTOR, DEFAULT_CAPTCHA_CLICK_SELECTOR,
    DEFAULT_CAPTCHA_CLICK_SLEEP_SECS, DEFAULT_CAPTCHA_IFRAME_URI,
    DEFAULT_CAPTCHA_IFRAME_WAIT_SELECTOR, DEFAULT_CAPTCHA_WAIT_SELECTOR, DEFAULT_INTERVAL_SECS,
    DEFAULT_USER_AGENT,
};
use crate::dump::{spawn_store_worker, DumpRouter, DumpStore};
use anyhow::Result;
use clap::Args;
use std::path::Path;
use std::time::Duration;

/// Flags shared by every command that drives a browser.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// JSON config file. When set, the other flags are ignored.
    #[arg(long)]
    pub config: Option<String>,

    /// User agent(s) to request as
    #[arg(long, short = 'a', value_delimiter = ',')]
    pub agents: Vec<String>,

    /// Overall timeout (seconds) for one run against one URL
    #[arg(long, short = 't')]
    pub timeout: Option<u64>,

    /// Dump current page contents on error
    #[arg(long)]
    pub error_dump: bool,

    /// Log the URL we have arrived at on error
    #[arg(long)]
    pub error_location: bool,

    #[command(flatten)]
    pub detect: DetectArgs,

    #[command(flatten)]
    pub dump_store: DumpStoreArgs,
}

/// Detection switches and the run-level CAPTCHA selector defaults.
#[derive(Args, Debug, Clone)]
pub struct DetectArgs {
    /// Notify when a configured notify path is reached for a URL
    #[arg(long)]
    pub detect_notify_path: bool,

    /// Rotate the user agent when access is denied
    #[arg(long)]
    pub detect_access_denied: bool,

    /// Attempt to click through a CAPTCHA checkbox interstitial
    #[arg(long)]
    pub detect_captcha_box: bool,

    /// Selector to wait for so the CAPTCHA box can load
    #[arg(long, default_value = DEFAULT_CAPTCHA_WAIT_SELECTOR)]
    pub captcha_wait_selector: String,

    /// Selector to click for the CAPTCHA box
    #[arg(long, default_value = DEFAULT_CAPTCHA_CLICK_SELECTOR)]
    pub captcha_click_selector: String,

    /// Selector to wait for the CAPTCHA challenge iframe
    #[arg(long, default_value = DEFAULT_CAPTCHA_IFRAME_WAIT_SELECTOR)]
    pub captcha_iframe_wait_selector: String,

    /// URI fragment that identifies the CAPTCHA challenge iframe
    #[arg(long, default_value = DEFAULT_CAPTCHA_IFRAME_URI)]
    pub captcha_iframe_uri: String,

    /// Selector to wait for inside the iframe before capturing it
    #[arg(long, default_value = DEFAULT_CAPTCHA_CHALLENGE_WAIT_SELECTOR)]
    pub captcha_challenge_wait_selector: String,

    /// Seconds to sleep after a CAPTCHA click, so the challenge can load
    #[arg(long, default_value_t = DEFAULT_CAPTCHA_CLICK_SLEEP_SECS)]
    pub captcha_click_sleep: u64,
}

/// Where surfaced error dumps go.
#[derive(Args, Debug, Clone)]
pub struct DumpStoreArgs {
    /// Persist error dumps to the expiring store at this path instead of stdout
    #[arg(long)]
    pub dump_store: Option<String>,

    /// Seconds persisted dumps live in the store. Zero keeps them forever
    #[arg(long, default_value_t = 0)]
    pub dump_expiration: u64,
}

/// Per-URL option slices for the watch command. Optional slices may
/// be omitted entirely, but when given must match the URL count, with
/// empty slots falling back to the run-level default.
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// All URLs to watch
    #[arg(long, short = 'u', value_delimiter = ',')]
    pub urls: Vec<String>,

    /// Selectors, in order of the URLs, to wait for
    #[arg(long, value_delimiter = ',')]
    pub wait_selectors: Vec<String>,

    /// Selectors to extract content from for the change check
    #[arg(long, value_delimiter = ',')]
    pub check_selectors: Vec<String>,

    /// Extraction kind per check selector: text, href, id or dump
    #[arg(long, value_delimiter = ',')]
    pub check_types: Vec<String>,

    /// Text whose disappearance from the extracted content notifies
    #[arg(long, value_delimiter = ',')]
    pub expected_texts: Vec<String>,

    /// Path fragments that notify immediately when navigation lands on them
    #[arg(long, value_delimiter = ',')]
    pub notify_paths: Vec<String>,

    /// Per-URL overrides for the CAPTCHA wait selector
    #[arg(long, value_delimiter = ',')]
    pub captcha_wait_selectors: Vec<String>,

    /// Per-URL overrides for the CAPTCHA click selector
    #[arg(long, value_delimiter = ',')]
    pub captcha_click_selectors: Vec<String>,

    /// Seconds to wait in between watch cycles
    #[arg(long, short = 'i', default_value_t = DEFAULT_INTERVAL_SECS)]
    pub interval: u64,
}

/// Flags for the one-shot fetch command. At most one extraction
/// selector may be given; none at all dumps the full page.
#[derive(Args, Debug, Clone)]
pub struct FetchArgs {
    /// URL to fetch content from
    #[arg(long, short = 'u')]
    pub url: String,

    /// Selector to wait for; without it only static content is retrieved
    #[arg(long)]
    pub wait_selector: Option<String>,

    /// Print the text of this selector instead of the full page
    #[arg(long)]
    pub text_selector: Option<String>,

    /// Print the href of this selector instead of the full page
    #[arg(long, conflicts_with = "text_selector")]
    pub href_selector: Option<String>,

    /// Print the text of the element with this id instead of the full page
    #[arg(long, conflicts_with_all = ["text_selector", "href_selector"])]
    pub id_selector: Option<String>,
}

impl CommonArgs {
    fn detections(&self) -> Detections {
        Detections {
            notify_path: self.detect.detect_notify_path,
            access_denied: self.detect.detect_access_denied,
            captcha: self.detect.detect_captcha_box,
        }
    }

    fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            location_on_error: self.error_location,
            dump_on_error: self.error_dump,
            store_path: self.dump_store.dump_store.clone(),
            store_ttl_secs: self.dump_store.dump_expiration,
        }
    }

    fn captcha_defaults(&self) -> CaptchaSelectors {
        CaptchaSelectors {
            wait: self.detect.captcha_wait_selector.clone(),
            click: self.detect.captcha_click_selector.clone(),
            iframe_wait: self.detect.captcha_iframe_wait_selector.clone(),
            iframe_uri: self.detect.captcha_iframe_uri.clone(),
            challenge_wait: self.detect.captcha_challenge_wait_selector.clone(),
        }
    }

    fn agents(&self) -> Vec<String> {
        if self.agents.is_empty() {
            vec![DEFAULT_USER_AGENT.to_string()]
        } else {
            self.agents.clone()
        }
    }
}

impl FetchArgs {
    fn check(&self) -> Option<ContentCheck> {
        let (selector, kind) = if let Some(s) = &self.text_selector {
            (s.clone(), crate::config::CheckKind::Text)
        } else if let Some(s) = &self.href_selector {
            (s.clone(), crate::config::CheckKind::Href)
        } else if let Some(s) = &self.id_selector {
            (s.clone(), crate::config::CheckKind::Id)
        } else {
            return None;
        };
        Some(ContentCheck {
            selector,
            kind,
            expected_text: String::new(),
        })
    }
}

/// Assemble the watch configuration from flags, or load it whole from
/// the config file when one was given.
pub fn watch_config(common: &CommonArgs, targets: &TargetArgs) -> Result<WatchConfig, ConfigError> {
    if let Some(path) = &common.config {
        return WatchConfig::from_file(path);
    }
    let slices = TargetSlices {
        urls: targets.urls.clone(),
        wait_selectors: targets.wait_selectors.clone(),
        check_selectors: targets.check_selectors.clone(),
        check_types: targets.check_types.clone(),
        expected_texts: targets.expected_texts.clone(),
        notify_paths: targets.notify_paths.clone(),
        captcha_wait_overrides: targets.captcha_wait_selectors.clone(),
        captcha_click_overrides: targets.captcha_click_selectors.clone(),
    };
    let built = slices.build_targets(&common.captcha_defaults())?;
    let cfg = WatchConfig {
        targets: built,
        detect: common.detections(),
        diagnostics: common.diagnostics(),
        interval_secs: targets.interval,
        timeout_secs: common.timeout,
        captcha_click_sleep_secs: common.detect.captcha_click_sleep,
        agents: common.agents(),
    };
    cfg.validate()?;
    Ok(cfg)
}

/// Single-target configuration for a fetch run.
pub fn fetch_config(common: &CommonArgs, fetch: &FetchArgs) -> Result<WatchConfig, ConfigError> {
    if let Some(path) = &common.config {
        return WatchConfig::from_file(path);
    }
    let target = Target {
        url: fetch.url.clone(),
        wait_selector: fetch.wait_selector.clone(),
        check: fetch.check(),
        notify_path: None,
        captcha: common.captcha_defaults(),
    };
    let cfg = WatchConfig {
        targets: vec![target],
        detect: common.detections(),
        diagnostics: common.diagnostics(),
        interval_secs: DEFAULT_INTERVAL_SECS,
        timeout_secs: common.timeout,
        captcha_click_sleep_secs: common.detect.captcha_click_sleep,
        agents: common.agents(),
    };
    cfg.validate()?;
    Ok(cfg)
}

/// Build the dump router the diagnostics settings ask for, plus the
/// store worker's handle when one was spawned.
pub fn dump_router(
    diagnostics: &crate::config::Diagnostics,
) -> Result<(DumpRouter, Option<tokio::task::JoinHandle<()>>)> {
    match &diagnostics.store_path {
        Some(path) => {
            let store = DumpStore::open(Path::new(path))?;
            let (router, worker) =
                spawn_store_worker(store, Duration::from_secs(diagnostics.store_ttl_secs));
            Ok((router, Some(worker)))
        }
        None => Ok((DumpRouter::Stdout, None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CheckKind;

    fn common() -> CommonArgs {
        CommonArgs {
            config: None,
            agents: vec![],
            timeout: None,
            error_dump: false,
            error_location: false,
            detect: DetectArgs {
                detect_notify_path: false,
                detect_access_denied: false,
                detect_captcha_box: false,
                captcha_wait_selector: DEFAULT_CAPTCHA_WAIT_SELECTOR.to_string(),
                captcha_click_selector: DEFAULT_CAPTCHA_CLICK_SELECTOR.to_string(),
                captcha_iframe_wait_selector: DEFAULT_CAPTCHA_IFRAME_WAIT_SELECTOR.to_string(),
                captcha_iframe_uri: DEFAULT_CAPTCHA_IFRAME_URI.to_string(),
                captcha_challenge_wait_selector: DEFAULT_CAPTCHA_CHALLENGE_WAIT_SELECTOR
                    .to_string(),
                captcha_click_sleep: DEFAULT_CAPTCHA_CLICK_SLEEP_SECS,
            },
            dump_store: DumpStoreArgs {
                dump_store: None,
                dump_expiration: 0,
            },
        }
    }

    #[test]
    fn test_watch_config_from_slices() {
        let targets = TargetArgs {
            urls: vec!["http://a".to_string(), "http://b".to_string()],
            wait_selectors: vec!["#ready".to_string(), "#go".to_string()],
            check_selectors: vec!["#status".to_string(), String::new()],
            check_types: vec!["text".to_string(), String::new()],
            expected_texts: vec!["OPEN".to_string(), String::new()],
            notify_paths: vec![],
            captcha_wait_selectors: vec![],
            captcha_click_selectors: vec![],
            interval: 10,
        };
        let cfg = watch_config(&common(), &targets).unwrap();
        assert_eq!(cfg.targets.len(), 2);
        assert_eq!(cfg.interval_secs, 10);
        assert_eq!(cfg.agents, vec![DEFAULT_USER_AGENT.to_string()]);
        assert_eq!(
            cfg.targets[0].check.as_ref().unwrap().kind,
            CheckKind::Text
        );
        assert!(cfg.targets[1].check.is_none());
    }

    #[test]
    fn test_watch_config_requires_urls() {
        let targets = TargetArgs {
            urls: vec![],
            wait_selectors: vec![],
            check_selectors: vec![],
            check_types: vec![],
            expected_texts: vec![],
            notify_paths: vec![],
            captcha_wait_selectors: vec![],
            captcha_click_selectors: vec![],
            interval: DEFAULT_INTERVAL_SECS,
        };
        assert!(matches!(
            watch_config(&common(), &targets),
            Err(ConfigError::NoUrls)
        ));
    }

    #[test]
    fn test_fetch_config_builds_capture_check() {
        let fetch = FetchArgs {
            url: "http://x".to_string(),
            wait_selector: Some("#ready".to_string()),
            text_selector: Some("#price".to_string()),
            href_selector: None,
            id_selector: None,
        };
        let cfg = fetch_config(&common(), &fetch).unwrap();
        let check = cfg.targets[0].check.as_ref().unwrap();
        assert_eq!(check.kind, CheckKind::Text);
        assert_eq!(check.selector, "#price");
    }

    #[test]
    fn test_fetch_config_defaults_to_full_dump() {
        let fetch = FetchArgs {
            url: "http://x".to_string(),
            wait_selector: None,
            text_selector: None,
            href_selector: None,
            id_selector: None,
        };
        let cfg = fetch_config(&common(), &fetch).unwrap();
        assert!(cfg.targets[0].check.is_none());
    }

    #[test]
    fn test_captcha_detection_needs_error_location() {
        let mut c = common();
        c.detect.detect_captcha_box = true;
        let fetch = FetchArgs {
            url: "http://x".to_string(),
            wait_selector: None,
            text_selector: None,
            href_selector: None,
            id_selector: None,
        };
        assert!(matches!(
            fetch_config(&c, &fetch),
            Err(ConfigError::CaptchaRequiresLocation)
        ));
    }
}
