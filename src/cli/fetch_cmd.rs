//! `vigil fetch` — retrieve a page once and print the content.

use super::{dump_router, fetch_config, CommonArgs, FetchArgs};
use crate::browser::chromium::ChromiumEngine;
use crate::browser::BrowserEngine;
use crate::executor::{Engine, FetchExecutor};
use crate::notify::NotifyHandle;
use anyhow::Result;
use std::sync::Arc;

pub async fn run(common: &CommonArgs, fetch: &FetchArgs) -> Result<()> {
    let cfg = fetch_config(common, fetch)?;
    let (dumps, dump_worker) = dump_router(&cfg.diagnostics)?;

    // A fetch has no notifiers; the collector surfaces the extracted
    // payload so it can be printed here.
    let (notify, mut rx) = NotifyHandle::collector();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Some(text) = event.text {
                println!("{text}");
            }
        }
    });

    let browser: Arc<dyn BrowserEngine> = Arc::new(ChromiumEngine::launch().await?);
    let engine = Engine::from_config(Arc::clone(&browser), &cfg, notify, dumps);
    let targets = cfg.targets.clone();

    let outcome = FetchExecutor::new(engine, targets).run().await;
    browser.shutdown().await?;

    // Engine dropped above, so both queues have closed and the
    // workers drain out.
    printer.await.ok();
    if let Some(worker) = dump_worker {
        worker.await.ok();
    }
    outcome?;
    Ok(())
}
