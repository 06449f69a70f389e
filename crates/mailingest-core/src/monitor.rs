//! The poll monitor.
//!
//! Each cycle opens a fresh mail session, picks candidates with
//! [`IngestionState::plan_scan`], filters them on header data alone and
//! enqueues the survivors newest first. The session is always logged out
//! before the cycle returns.
//!
//! ```text
//! Idle → Connecting → Listing → Filtering → Enqueuing → Idle
//!            │                      │
//!            │                      └─ fetch failed → Retrying → Connecting
//!            └─ failed → Retrying → (Connecting | Abandoned) → Idle
//! ```
//!
//! A transient fetch failure defers the affected candidates, then the
//! monitor reconnects and rescans them under the same [`RetryPolicy`] that
//! guards the connection. Whatever is still deferred once the attempts run
//! out waits for the next cycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mailingest_imap::Uid;
use mailingest_mime::{EmailInfo, Headers, contains_domain};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::Error;
use crate::config::MonitorSettings;
use crate::pipeline::raw_message;
use crate::queue::{PipelineStats, QueueSender};
use crate::retry::RetryPolicy;
use crate::source::{MailConnector, MailSession};
use crate::state::IngestionState;

/// Consecutive empty cycles after which idle logging drops to `trace`.
const DAMP_AFTER: u32 = 3;

/// Shortest poll period; `tokio::time::interval` rejects zero.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// How a cycle ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Every candidate was evaluated.
    #[default]
    Completed,
    /// No usable session; nothing was evaluated.
    Abandoned,
    /// Fetches kept failing; the remaining candidates were deferred.
    Interrupted,
    /// The work queue is closed; the monitor should stop.
    QueueClosed,
}

/// Counters for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// UIDs in the mailbox.
    pub listed: usize,
    /// Candidates evaluated after the seen check, summed over rescans.
    pub scanned: usize,
    /// Messages enqueued.
    pub enqueued: usize,
    /// Candidates skipped as already seen.
    pub skipped_seen: usize,
    /// Messages dated at or before the watermark, or undated.
    pub rejected_watermark: usize,
    /// Messages not addressed to the target domain.
    pub rejected_domain: usize,
    /// Candidates left for the next cycle.
    pub deferred: usize,
    /// How the cycle ended.
    pub outcome: CycleOutcome,
}

/// How a single scan pass ended.
enum ScanEnd {
    Finished(CycleOutcome),
    FetchFailed(Error),
}

/// Polls one mailbox and feeds the work queue.
#[derive(Debug)]
pub struct Monitor<C> {
    connector: C,
    state: IngestionState,
    target_domain: String,
    window: usize,
    retry: RetryPolicy,
    queue: QueueSender,
    stats: Arc<PipelineStats>,
    empty_cycles: u32,
}

impl<C: MailConnector> Monitor<C> {
    /// Creates a monitor. `state` is owned by the monitor from here on.
    #[must_use]
    pub fn new(
        connector: C,
        state: IngestionState,
        settings: &MonitorSettings,
        queue: QueueSender,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            connector,
            state,
            target_domain: settings.target_domain.clone(),
            window: settings.first_scan_window,
            retry: settings.retry.policy(),
            queue,
            stats,
            empty_cycles: 0,
        }
    }

    /// Returns the ingestion state.
    #[must_use]
    pub const fn state(&self) -> &IngestionState {
        &self.state
    }

    /// Runs one poll cycle. Never fails; problems are logged and reflected
    /// in the report.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();
        let attempts = self.retry.max_attempts.max(1);
        let mut pass = 1;

        report.outcome = loop {
            let Some(mut session) = self.connect().await else {
                break if pass == 1 {
                    CycleOutcome::Abandoned
                } else {
                    CycleOutcome::Interrupted
                };
            };
            report.deferred = 0;
            let end = self.scan(&mut session, &mut report).await;
            session.logout().await;

            match end {
                ScanEnd::Finished(outcome) => break outcome,
                ScanEnd::FetchFailed(e) if pass < attempts && e.is_transient() => {
                    let delay = self.retry.delay_after(pass);
                    warn!(
                        attempt = pass,
                        max_attempts = attempts,
                        deferred = report.deferred,
                        error = %e,
                        ?delay,
                        "fetch failed, rescanning deferred candidates"
                    );
                    tokio::time::sleep(delay).await;
                    pass += 1;
                }
                ScanEnd::FetchFailed(e) => {
                    warn!(
                        deferred = report.deferred,
                        error = %e,
                        "fetch failed, deferring to next cycle"
                    );
                    break CycleOutcome::Interrupted;
                }
            }
        };

        let pruned = self.state.prune(Utc::now());
        if pruned > 0 {
            debug!(pruned, "seen ledger pruned");
        }

        self.log_cycle(&report);
        report
    }

    /// Opens a session under the retry policy.
    async fn connect(&self) -> Option<C::Session> {
        let connector = &self.connector;
        let session = self
            .retry
            .run("mail connect", |attempt| {
                trace!(attempt, "connecting to mail server");
                connector.connect()
            })
            .await;

        match session {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(error = %e, "mail server unreachable, cycle abandoned");
                None
            }
        }
    }

    async fn scan(&mut self, session: &mut C::Session, report: &mut CycleReport) -> ScanEnd {
        self.state.observe_uid_validity(session.uid_validity());

        let uids = match session.list_uids().await {
            Ok(uids) => uids,
            Err(e) => {
                warn!(error = %e, "listing mailbox failed");
                return ScanEnd::Finished(CycleOutcome::Abandoned);
            }
        };
        report.listed = uids.len();

        let plan = self.state.plan_scan(&uids, self.window);
        let state = &self.state;
        let candidates: Vec<Uid> = plan
            .into_iter()
            .filter(|&uid| {
                let seen = state.is_seen(uid);
                if seen {
                    report.skipped_seen += 1;
                }
                !seen
            })
            .collect();
        report.scanned += candidates.len();
        if candidates.is_empty() {
            return ScanEnd::Finished(CycleOutcome::Completed);
        }

        let headers: HashMap<Uid, Vec<u8>> = match session.fetch_headers(&candidates).await {
            Ok(headers) => headers.into_iter().collect(),
            Err(e) => {
                debug!(error = %e, candidates = candidates.len(), "header fetch failed");
                self.defer_all(&candidates, report);
                return ScanEnd::FetchFailed(e);
            }
        };

        let now = Utc::now();
        for (index, &uid) in candidates.iter().enumerate() {
            let Some(header) = headers.get(&uid) else {
                trace!(uid = %uid, "message vanished before header fetch");
                self.state.mark_seen(uid, now);
                continue;
            };

            let info = EmailInfo::from_headers(&Headers::parse(header));
            let sent_at = info.sent_at();
            if !self.state.is_after_watermark(sent_at) {
                trace!(uid = %uid, date = %info.date, "not after watermark");
                report.rejected_watermark += 1;
                self.state.mark_seen(uid, now);
                continue;
            }
            if !contains_domain([info.to.as_str(), info.cc.as_str()], &self.target_domain) {
                trace!(uid = %uid, to = %info.to, "not addressed to target domain");
                report.rejected_domain += 1;
                self.state.mark_seen(uid, now);
                continue;
            }

            let bytes = match session.fetch_message(uid).await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => {
                    trace!(uid = %uid, "message vanished before body fetch");
                    self.state.mark_seen(uid, now);
                    continue;
                }
                Err(e) => {
                    debug!(uid = %uid, error = %e, "message fetch failed");
                    self.defer_all(&candidates[index..], report);
                    return ScanEnd::FetchFailed(e);
                }
            };

            let received_at = sent_at.unwrap_or(now);
            if self.queue.send(raw_message(uid, bytes, received_at)).await.is_err() {
                warn!(uid = %uid, "work queue closed");
                self.defer_all(&candidates[index..], report);
                return ScanEnd::Finished(CycleOutcome::QueueClosed);
            }
            self.state.mark_seen(uid, now);
            report.enqueued += 1;
            info!(uid = %uid, from = %info.from, subject = %info.subject, "target mail enqueued");
        }

        ScanEnd::Finished(CycleOutcome::Completed)
    }

    fn defer_all(&mut self, uids: &[Uid], report: &mut CycleReport) {
        for &uid in uids {
            self.state.defer(uid);
        }
        report.deferred += uids.len();
    }

    fn log_cycle(&mut self, report: &CycleReport) {
        if report.enqueued > 0 {
            if self.empty_cycles >= DAMP_AFTER {
                info!(idle_cycles = self.empty_cycles, "target mail resumed");
            }
            self.empty_cycles = 0;
            let stats = self.stats.snapshot();
            info!(
                enqueued = report.enqueued,
                total_enqueued = stats.enqueued,
                processed = stats.processed,
                failed = stats.failed,
                queue_depth = stats.queue_depth,
                active_workers = stats.active_workers,
                "poll cycle finished"
            );
            return;
        }

        self.empty_cycles = self.empty_cycles.saturating_add(1);
        match self.empty_cycles.cmp(&DAMP_AFTER) {
            std::cmp::Ordering::Less => debug!(?report, "no new target mail"),
            std::cmp::Ordering::Equal => info!(
                cycles = DAMP_AFTER,
                "no new target mail, further idle cycles logged at trace level"
            ),
            std::cmp::Ordering::Greater => trace!(?report, "no new target mail"),
        }
    }

    /// Polls every `interval` until `shutdown` turns true or its sender is
    /// dropped. A cycle in progress always finishes first. A zero interval
    /// is raised to one millisecond.
    ///
    /// Returns the final state. Dropping the monitor closes its queue
    /// sender.
    pub async fn run(mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) -> IngestionState {
        let mut ticker = tokio::time::interval(interval.max(MIN_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            domain = %self.target_domain,
            ?interval,
            watermark = %self.state.startup_watermark(),
            "monitor started"
        );

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            if self.run_cycle().await.outcome == CycleOutcome::QueueClosed {
                break;
            }
            if *shutdown.borrow() {
                break;
            }
        }

        info!(seen = self.state.seen().len(), "monitor stopped");
        self.state
    }
}
