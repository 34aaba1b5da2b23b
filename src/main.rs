use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use digimail_workflow::commands::CommandDriver;
use digimail_workflow::config::EngineConfig;
use digimail_workflow::notify::{
    EventBus, FanoutSink, LogSink, NotificationRouter, NotificationSink, RouterOptions,
    WebhookSink,
};
use digimail_workflow::store::{
    AttachmentStore, LibSqlBackend, LocalAttachmentStore, RecordedAttachments,
};
use digimail_workflow::workflow::{WorkflowEngine, WorkflowOptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = EngineConfig::from_env().context("invalid configuration")?;
    let _log_guard = init_tracing(config.log_dir.as_deref());

    eprintln!("📬 Digimail workflow v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path.display());

    // ── Database ─────────────────────────────────────────────────────────
    let backend = Arc::new(
        LibSqlBackend::new_local(&config.db_path, config.lock_timeout)
            .await
            .with_context(|| format!("opening database at {}", config.db_path.display()))?,
    );

    // ── Attachments ──────────────────────────────────────────────────────
    let attachments: Arc<dyn AttachmentStore> = match config.attachment_root {
        Some(ref root) => {
            eprintln!("   Attachments: {}", root.display());
            Arc::new(LocalAttachmentStore::new(root.clone()))
        }
        None => {
            eprintln!("   Attachments: recorded paths only");
            Arc::new(RecordedAttachments)
        }
    };

    // ── Notifications ────────────────────────────────────────────────────
    let sink: Arc<dyn NotificationSink> = match config.push.clone() {
        Some(push) => {
            eprintln!("   Push: {}", push.url);
            Arc::new(FanoutSink::new(vec![
                Arc::new(LogSink),
                Arc::new(WebhookSink::new(push.url, push.token)),
            ]))
        }
        None => {
            eprintln!("   Push: disabled (log only)");
            Arc::new(LogSink)
        }
    };

    let (bus, events) = EventBus::channel(config.event_queue_capacity);
    let router = NotificationRouter::start(
        events,
        sink,
        backend.clone(),
        RouterOptions {
            send_timeout: config.notify_timeout,
        },
    );

    // ── Engine ───────────────────────────────────────────────────────────
    let engine = Arc::new(WorkflowEngine::new(
        backend.clone(),
        backend.clone(),
        attachments,
        bus,
        WorkflowOptions {
            archive_on_approval: config.archive_on_approval,
        },
    ));
    let driver = CommandDriver::new(engine, backend.clone(), config.max_retries);

    eprintln!("   Reading JSON commands from stdin, one per line.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let out = driver.handle_line(&line).await;
                stdout.write_all(out.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                break;
            }
        }
    }

    // Dropping the engine closes the event queue so the router can drain.
    drop(driver);
    router.shutdown().await;
    tracing::info!("Notification router stopped");

    Ok(())
}

/// Console logging filtered by `RUST_LOG`, plus daily files when `log_dir` is set.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let (file, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "digimail.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();
    guard
}
