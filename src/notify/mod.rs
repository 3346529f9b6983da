//! Change-event dispatch to external notifiers.
//!
//! Each notifier gets one long-lived consumer task reading a bounded
//! queue; the pipeline hands events off through ephemeral producer
//! tasks, so a slow webhook or SMTP session never stalls the scrape
//! loop. Delivery is at-least-attempted, fire-and-forget.

pub mod email;
pub mod webhook;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Queue depth between the pipeline and each notifier consumer.
const NOTIFY_QUEUE_CAPACITY: usize = 64;

/// A detected change for one target. Consumed once per notifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub target_url: String,
    /// Extracted content, when a check produced one.
    pub text: Option<String>,
}

impl NotificationEvent {
    pub fn new(target_url: &str, text: Option<String>) -> Self {
        Self {
            target_url: target_url.to_string(),
            text,
        }
    }
}

/// Delivers one event to an external channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;
    async fn deliver(&self, event: &NotificationEvent) -> Result<()>;
}

/// Fan-out handle the pipeline dispatches through.
#[derive(Clone)]
pub struct NotifyHandle {
    queues: Vec<mpsc::Sender<NotificationEvent>>,
}

impl NotifyHandle {
    /// Hand an event to every notifier queue. Each handoff is an
    /// ephemeral spawned task, decoupling "event ready" from "queue
    /// has room".
    pub fn dispatch(&self, event: NotificationEvent) {
        for tx in &self.queues {
            let tx = tx.clone();
            let event = event.clone();
            tokio::spawn(async move {
                if tx.send(event).await.is_err() {
                    tracing::warn!("notifier consumer is gone, event lost");
                }
            });
        }
    }

    /// A handle whose single consumer is the returned receiver. Used
    /// by the fetch executor (and tests) to collect events in-process.
    pub fn collector() -> (Self, mpsc::Receiver<NotificationEvent>) {
        let (tx, rx) = mpsc::channel(NOTIFY_QUEUE_CAPACITY);
        (Self { queues: vec![tx] }, rx)
    }
}

/// Spawn one consumer task per notifier and return the fan-out handle.
///
/// Consumers run until every handle clone is dropped; delivery errors
/// are logged, never escalated.
pub fn spawn_notifiers(
    notifiers: Vec<Arc<dyn Notifier>>,
) -> (NotifyHandle, Vec<tokio::task::JoinHandle<()>>) {
    let mut queues = Vec::with_capacity(notifiers.len());
    let mut handles = Vec::with_capacity(notifiers.len());
    for notifier in notifiers {
        let (tx, mut rx) = mpsc::channel::<NotificationEvent>(NOTIFY_QUEUE_CAPACITY);
        queues.push(tx);
        handles.push(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match notifier.deliver(&event).await {
                    Ok(()) => tracing::info!(
                        "{} notification sent for URL [{}]",
                        notifier.name(),
                        event.target_url
                    ),
                    Err(e) => tracing::error!(
                        "{} notification failed for URL [{}]: {e:#}",
                        notifier.name(),
                        event.target_url
                    ),
                }
            }
        }));
    }
    (NotifyHandle { queues }, handles)
}
