//! # mailingest-core
//!
//! The ingestion pipeline behind `mailingest`.
//!
//! This crate provides:
//! - **Poll monitor** ([`Monitor`]): watermark and target-domain filtering
//!   on header data, newest-first enqueueing
//! - **Ingestion state** ([`IngestionState`]): scan cursor, bounded seen
//!   ledger, deferred candidates, `UIDVALIDITY` tracking
//! - **Work queue and worker pool** ([`work_queue`], [`WorkerPool`]):
//!   bounded hand-off with per-item failure isolation
//! - **Ingestion connector** ([`Connector`]): natural-key deduplication,
//!   content selection, fault-tolerant attachment persistence
//! - **Storage** ([`SqliteEmailStore`]) and file artifacts
//!   ([`ArtifactStore`])
//!
//! ## Wiring
//!
//! ```no_run
//! # async fn wire() -> mailingest_core::Result<()> {
//! use std::sync::Arc;
//!
//! use mailingest_core::{
//!     ArtifactStore, Connector, ImapConnector, IngestHandler, IngestionState, Monitor,
//!     PipelineStats, SeenLedger, Settings, SqliteEmailStore, WorkerPool, work_queue,
//! };
//!
//! let (settings, _) = Settings::load(None)?;
//! let stats = PipelineStats::shared();
//! let (tx, rx) = work_queue(settings.workers.queue_capacity, Arc::clone(&stats));
//!
//! let artifacts = ArtifactStore::new(&settings.storage);
//! let store = SqliteEmailStore::connect(&settings.storage.database_url).await?;
//! let connector = Connector::new(store, artifacts.clone(), settings.connector);
//! let handler = Arc::new(IngestHandler::new(artifacts, Arc::new(connector)));
//! let pool = WorkerPool::spawn(2, &rx, handler, &stats, settings.workers.pop_timeout());
//!
//! let state = IngestionState::new(
//!     chrono::Utc::now(),
//!     SeenLedger::new(settings.monitor.seen_retention(), settings.monitor.seen_capacity),
//! );
//! let mut monitor = Monitor::new(
//!     ImapConnector::new(&settings.imap),
//!     state,
//!     &settings.monitor,
//!     tx,
//!     stats,
//! );
//! monitor.run_cycle().await;
//! drop(monitor);
//! pool.drain(settings.workers.drain_timeout()).await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod artifacts;
pub mod config;
pub mod connector;
mod error;
pub mod monitor;
pub mod pipeline;
pub mod queue;
pub mod retry;
pub mod source;
pub mod state;
pub mod store;
pub mod worker;

pub use artifacts::{ArtifactStore, MessageArtifacts, Summary, SummaryContent};
pub use config::Settings;
pub use connector::{Connector, ContentSource, IngestOutcome, IngestRequest, select_content};
pub use error::{Error, ErrorKind, Result};
pub use monitor::{CycleOutcome, CycleReport, Monitor};
pub use pipeline::{IngestHandler, raw_message};
pub use queue::{
    PipelineStats, Pop, QueueItem, QueueReceiver, QueueSender, RawMessage, StatsSnapshot,
    work_queue,
};
pub use retry::{Backoff, RetryPolicy};
pub use source::{ImapConnector, ImapSession, MailConnector, MailSession, probe};
pub use state::{IngestionState, SeenLedger};
pub use store::{EmailStore, NaturalKey, SqliteEmailStore, StoredAttachment};
pub use worker::{MessageHandler, WorkerPool};
