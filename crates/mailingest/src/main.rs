//! `mailingest`: polls a mailbox and ingests mail addressed to a target
//! domain.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, bail};
use chrono::Utc;
use clap::Parser;
use mailingest_core::{
    ArtifactStore, Connector, ImapConnector, IngestHandler, IngestOutcome, IngestionState, Monitor,
    PipelineStats, SeenLedger, Settings, SqliteEmailStore, WorkerPool, probe, work_queue,
};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

use cli::{Cli, Command};

const DEFAULT_FILTER: &str = "mailingest=info,mailingest_core=info,mailingest_imap=warn";
const VERBOSE_FILTER: &str = "mailingest=debug,mailingest_core=debug,mailingest_imap=debug";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        VERBOSE_FILTER
    } else {
        DEFAULT_FILTER
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match &cli.command {
        Some(Command::Parse { file, output }) => parse_file(file, output.as_deref()).await,
        Some(Command::Reingest { files }) => reingest(&load_settings(&cli)?, files).await,
        Some(Command::Once) => run(load_settings(&cli)?, true).await,
        Some(Command::Run) | None => run(load_settings(&cli)?, false).await,
    }
}

fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let (mut settings, path) =
        Settings::load(cli.config.as_deref()).context("loading configuration")?;
    match path {
        Some(path) => info!(path = %path.display(), "configuration loaded"),
        None => info!("no configuration file, using defaults"),
    }
    cli.apply(&mut settings);
    Ok(settings)
}

async fn open_store(settings: &Settings) -> anyhow::Result<SqliteEmailStore> {
    let url = &settings.storage.database_url;
    settings
        .monitor
        .retry
        .policy()
        .run("storage connect", |_| SqliteEmailStore::connect(url))
        .await
        .with_context(|| format!("opening email store {url}"))
}

async fn ingest_handler(settings: &Settings) -> anyhow::Result<IngestHandler<SqliteEmailStore>> {
    let artifacts = ArtifactStore::new(&settings.storage);
    artifacts
        .ensure_dirs()
        .await
        .context("creating artifact directories")?;
    let store = open_store(settings).await?;
    let connector = Connector::new(store, artifacts.clone(), settings.connector);
    Ok(IngestHandler::new(artifacts, Arc::new(connector)))
}

async fn run(settings: Settings, once: bool) -> anyhow::Result<()> {
    let watermark = Utc::now();
    let started = Instant::now();
    settings.validate().context("invalid configuration")?;

    let handler = Arc::new(ingest_handler(&settings).await?);
    let stats = PipelineStats::shared();
    let (tx, rx) = work_queue(settings.workers.queue_capacity, Arc::clone(&stats));
    let pool = WorkerPool::spawn(
        settings.workers.count,
        &rx,
        handler,
        &stats,
        settings.workers.pop_timeout(),
    );
    drop(rx);

    let imap = ImapConnector::new(&settings.imap);
    if let Err(e) = probe(&imap).await {
        warn!(error = %e, host = %settings.imap.host, "startup probe failed, polling anyway");
    }

    let state = IngestionState::new(
        watermark,
        SeenLedger::new(
            settings.monitor.seen_retention(),
            settings.monitor.seen_capacity,
        ),
    );
    let mut monitor = Monitor::new(imap, state, &settings.monitor, tx, Arc::clone(&stats));

    let seen = if once {
        let report = monitor.run_cycle().await;
        info!(?report, "single cycle finished");
        let seen = monitor.state().seen().len();
        // Closes the queue so the workers can drain.
        drop(monitor);
        seen
    } else {
        let (stop, shutdown) = watch::channel(false);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("shutdown requested, finishing current cycle");
                    let _ = stop.send(true);
                }
                Err(e) => {
                    warn!(error = %e, "cannot listen for ctrl-c");
                    std::future::pending::<()>().await;
                }
            }
        });
        monitor
            .run(settings.monitor.poll_interval(), shutdown)
            .await
            .seen()
            .len()
    };

    let drained = pool.drain(settings.workers.drain_timeout()).await;
    let snapshot = stats.snapshot();
    info!(
        enqueued = snapshot.enqueued,
        processed = snapshot.processed,
        failed = snapshot.failed,
        seen,
        drained,
        uptime_secs = started.elapsed().as_secs(),
        "pipeline stopped"
    );
    Ok(())
}

async fn parse_file(path: &Path, output: Option<&Path>) -> anyhow::Result<()> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let parsed = mailingest_mime::parse(&raw);
    let html = mailingest_mime::reconstruct(&parsed.content);

    let Some(output) = output else {
        println!("{html}");
        return Ok(());
    };

    tokio::fs::write(output, &html)
        .await
        .with_context(|| format!("writing {}", output.display()))?;

    let attachments: Vec<_> = parsed
        .content
        .attachments
        .iter()
        .map(|a| {
            serde_json::json!({
                "filename": a.filename,
                "content_type": a.content_type,
                "size": a.size_bytes,
            })
        })
        .collect();
    let summary = serde_json::json!({
        "info": parsed.info,
        "text_chars": parsed.content.text.chars().count(),
        "html_chars": parsed.content.html.chars().count(),
        "embedded_images": parsed.content.embedded_images.len(),
        "attachments": attachments,
        "output": output,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn reingest(settings: &Settings, files: &[PathBuf]) -> anyhow::Result<()> {
    let handler = ingest_handler(settings).await?;

    let mut failures = 0usize;
    for file in files {
        match handler.reingest_file(file).await {
            Ok(IngestOutcome::Inserted {
                record_id,
                attachments_saved,
                attachments_failed,
                ..
            }) => info!(
                file = %file.display(),
                record_id,
                attachments_saved,
                attachments_failed,
                "stored"
            ),
            Ok(IngestOutcome::Duplicate { record_id }) => {
                info!(file = %file.display(), record_id, "already stored");
            }
            Ok(IngestOutcome::Failed { reason }) => {
                warn!(file = %file.display(), %reason, "ingest failed");
                failures += 1;
            }
            Err(e) => {
                warn!(file = %file.display(), error = %e, "cannot read file");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{failures} of {} files failed", files.len());
    }
    Ok(())
}
