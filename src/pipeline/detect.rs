//! Obstruction detection steps.
//!
//! All three detections run right after navigation, in a fixed order:
//! notify-path first (a redirect to a known path is itself the signal
//! being watched for), then the access-denied title check, then the
//! CAPTCHA interstitial state machine. Each ends the target's cycle
//! when it fires; the remaining steps run only on a clean page.

use super::{CycleError, StepContext};
use crate::config::{CaptchaSelectors, ACCESS_DENIED_MARKER};
use crate::dump::DumpCategory;
use crate::notify::NotificationEvent;
use crate::snapshot::{PageSnapshot, SnapshotSpec};
use std::time::Duration;

/// Notify-path check: if the current location contains the configured
/// fragment, dispatch an event carrying that location and end the
/// cycle. The watched condition *is* the redirect.
pub(super) async fn run_notify_path(
    cx: &mut StepContext<'_>,
    url: &str,
    fragment: &str,
) -> Result<(), CycleError> {
    let location = cx
        .page
        .current_url()
        .await
        .map_err(|e| CycleError::session(url, e))?;
    if !location.contains(fragment) {
        return Ok(());
    }
    tracing::info!("notify path [{fragment}] matched at [{location}] for URL [{url}]");
    cx.notify
        .dispatch(NotificationEvent::new(url, Some(location.clone())));
    Err(CycleError::NotifyPathMatched {
        fragment: fragment.to_string(),
        location,
    })
}

/// Access-denied check: a page title containing the denial marker
/// means the current user-agent is burned. Clear it so the next
/// attempt rotates, and fail the cycle.
pub(super) async fn run_access_denied(
    cx: &mut StepContext<'_>,
    url: &str,
    spec: SnapshotSpec,
) -> Result<(), CycleError> {
    let snap = PageSnapshot::capture(cx.page, spec, url)
        .await
        .map_err(|e| CycleError::session(url, e))?;

    let title = snap
        .report(cx.page.title().await, DumpCategory::DetectError, cx.dumps)
        .map_err(|source| CycleError::Detection {
            url: url.to_string(),
            source,
        })?;

    if title.contains(ACCESS_DENIED_MARKER) {
        tracing::warn!("encountered [{ACCESS_DENIED_MARKER}] in the page title for URL [{url}]");
        cx.agents.invalidate(url);
        return snap.report(
            Err(CycleError::AccessDenied {
                url: url.to_string(),
            }),
            DumpCategory::DetectError,
            cx.dumps,
        );
    }
    tracing::info!("did not detect [{ACCESS_DENIED_MARKER}] for URL [{url}], proceeding");
    Ok(())
}

/// CAPTCHA interstitial state machine.
///
/// A location still equal to the target means no interstitial and the
/// step is a no-op. Otherwise: wait for the checkbox, click it (with
/// a keyboard fallback when the pointer click fails), sleep, and
/// re-read the location. Restored means cleared; still redirected
/// means a challenge loaded, so its iframe content is captured once
/// for diagnosis and the cycle fails as unsolved.
pub(super) async fn run_captcha(
    cx: &mut StepContext<'_>,
    url: &str,
    selectors: &CaptchaSelectors,
    spec: SnapshotSpec,
    click_sleep: Duration,
    timeout: Duration,
) -> Result<(), CycleError> {
    let snap = PageSnapshot::capture(cx.page, spec, url)
        .await
        .map_err(|e| CycleError::session(url, e))?;

    // Validation guarantees location capture is on when this step runs.
    let Some(location) = snap.location() else {
        return Err(CycleError::session(
            url,
            anyhow::anyhow!("captcha detection needs the current location"),
        ));
    };
    if location == url {
        tracing::info!("no location change for URL [{url}], so no captcha detected");
        return Ok(());
    }
    tracing::info!(
        "detected a location change to [{location}] for URL [{url}], so checking for a captcha"
    );

    let detection = |source: anyhow::Error| CycleError::Detection {
        url: url.to_string(),
        source,
    };

    snap.report(
        cx.page.wait_for_visible(&selectors.wait, timeout).await,
        DumpCategory::DetectError,
        cx.dumps,
    )
    .map_err(detection)?;

    let clicked = match cx.page.click(&selectors.click).await {
        Ok(()) => Ok(()),
        Err(err) => {
            tracing::warn!(
                "pointer click on [{}] failed ({err}), falling back to a keyboard press",
                selectors.click
            );
            cx.page.press_enter(&selectors.click).await
        }
    };
    snap.report(clicked, DumpCategory::DetectError, cx.dumps)
        .map_err(detection)?;
    tracing::info!("clicked captcha checkbox [{}] for URL [{url}]", selectors.click);

    tokio::time::sleep(click_sleep).await;

    let now = cx
        .page
        .current_url()
        .await
        .map_err(|e| CycleError::session(url, e))?;
    if now == url {
        tracing::info!("location restored to [{url}] after the captcha click");
        return Ok(());
    }
    tracing::info!("still at [{now}] for URL [{url}], so waiting on the challenge iframe");

    snap.report(
        cx.page
            .wait_for_visible(&selectors.iframe_wait, timeout)
            .await,
        DumpCategory::DetectError,
        cx.dumps,
    )
    .map_err(detection)?;

    match PageSnapshot::capture_challenge(
        cx.page,
        url,
        &selectors.iframe_uri,
        &selectors.challenge_wait,
        timeout,
    )
    .await
    {
        Ok(challenge) => challenge.report(
            Err(CycleError::CaptchaUnsolved {
                url: url.to_string(),
            }),
            DumpCategory::CaptchaDump,
            cx.dumps,
        ),
        Err(source) => snap.report(Err(detection(source)), DumpCategory::DetectError, cx.dumps),
    }
}
