//! `vigil watch` — poll URL(s) and notify when the criteria is met.

use super::{dump_router, watch_config, CommonArgs, TargetArgs};
use crate::browser::chromium::ChromiumEngine;
use crate::browser::BrowserEngine;
use crate::config::DEFAULT_EMAIL_SUBJECT;
use crate::executor::{Engine, WatchExecutor};
use crate::notify::email::{EmailNotifier, SmtpConfig};
use crate::notify::webhook::WebhookNotifier;
use crate::notify::{spawn_notifiers, Notifier};
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::sync::Arc;
use std::time::Duration;

/// What to do when a watched condition fires.
#[derive(Subcommand, Debug)]
pub enum WatchAction {
    /// Post to a Discord-compatible webhook
    Webhook {
        #[command(flatten)]
        common: CommonArgs,
        #[command(flatten)]
        targets: TargetArgs,
        #[command(flatten)]
        webhook: WebhookArgs,
    },
    /// Send an email
    Email {
        #[command(flatten)]
        common: CommonArgs,
        #[command(flatten)]
        targets: TargetArgs,
        #[command(flatten)]
        email: EmailArgs,
    },
}

#[derive(Args, Debug, Clone)]
pub struct WebhookArgs {
    /// Webhook URL to send notifications to
    #[arg(long)]
    pub webhook_url: String,

    /// Username to display in notifications
    #[arg(long)]
    pub username: String,
}

#[derive(Args, Debug, Clone)]
pub struct EmailArgs {
    /// Subject line for notification emails
    #[arg(long, default_value = DEFAULT_EMAIL_SUBJECT)]
    pub subject: String,

    /// Email address to send the message from
    #[arg(long)]
    pub from: String,

    /// Email address to send the message to
    #[arg(long)]
    pub to: String,

    /// SMTP relay host to submit through
    #[arg(long, default_value = "smtp.gmail.com")]
    pub smtp_host: String,

    /// SMTP submission port
    #[arg(long, default_value_t = 587)]
    pub smtp_port: u16,

    /// Password for the from address; prefer the VIGIL_EMAIL_PASSWORD
    /// environment variable over passing this on the command line
    #[arg(long)]
    pub sender_password: Option<String>,
}

pub async fn run(action: &WatchAction) -> Result<()> {
    let (common, targets, notifier): (&CommonArgs, &TargetArgs, Arc<dyn Notifier>) = match action {
        WatchAction::Webhook {
            common,
            targets,
            webhook,
        } => (
            common,
            targets,
            Arc::new(WebhookNotifier::new(&webhook.webhook_url, &webhook.username)?),
        ),
        WatchAction::Email {
            common,
            targets,
            email,
        } => {
            let password = match &email.sender_password {
                Some(p) => p.clone(),
                None => std::env::var("VIGIL_EMAIL_PASSWORD").context(
                    "a sender password is required (--sender-password or VIGIL_EMAIL_PASSWORD)",
                )?,
            };
            let smtp = SmtpConfig {
                host: email.smtp_host.clone(),
                port: email.smtp_port,
                password,
            };
            (
                common,
                targets,
                Arc::new(EmailNotifier::new(
                    &email.from,
                    &email.to,
                    &email.subject,
                    &smtp,
                )?),
            )
        }
    };

    let cfg = watch_config(common, targets)?;
    let (dumps, _dump_worker) = dump_router(&cfg.diagnostics)?;
    let (notify, _notifier_workers) = spawn_notifiers(vec![notifier]);

    let browser: Arc<dyn BrowserEngine> = Arc::new(ChromiumEngine::launch().await?);
    let engine = Engine::from_config(browser, &cfg, notify, dumps);

    tracing::info!(
        "watching {} URL(s) every {}s",
        cfg.targets.len(),
        cfg.interval_secs
    );
    WatchExecutor::new(
        engine,
        cfg.targets.clone(),
        Duration::from_secs(cfg.interval_secs),
    )
    .run()
    .await
}
