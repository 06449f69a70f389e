//! Poll monitor behaviour against a scripted mailbox.

#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use mailingest_core::{
    CycleOutcome, IngestionState, Monitor, PipelineStats, Pop, QueueReceiver, SeenLedger,
    work_queue,
};

use common::{ScriptedMailbox, message, message_with_date, monitor_settings};

const DOMAIN: &str = "target.example";

fn watermark() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0) - chrono::Duration::hours(1)
}

fn fresh() -> DateTime<Utc> {
    watermark() + chrono::Duration::minutes(5)
}

fn monitor(
    mailbox: &ScriptedMailbox,
    watermark: DateTime<Utc>,
) -> (Monitor<ScriptedMailbox>, QueueReceiver) {
    let stats = PipelineStats::shared();
    let (tx, rx) = work_queue(64, Arc::clone(&stats));
    let state = IngestionState::new(
        watermark,
        SeenLedger::new(Duration::from_secs(3600), 1000),
    );
    let monitor = Monitor::new(mailbox.clone(), state, &monitor_settings(DOMAIN), tx, stats);
    (monitor, rx)
}

async fn drain(rx: &QueueReceiver) -> Vec<u32> {
    let mut uids = Vec::new();
    while let Pop::Item(item) = rx.pop(Duration::from_millis(5)).await {
        uids.push(item.message.uid.get());
    }
    uids
}

fn deliver_target(mailbox: &ScriptedMailbox, uids: impl IntoIterator<Item = u32>) {
    for uid in uids {
        mailbox.deliver(uid, message("User <user@target.example>", &format!("m{uid}"), fresh()));
    }
}

#[tokio::test]
async fn test_enqueues_target_mail_newest_first() {
    let mailbox = ScriptedMailbox::new();
    deliver_target(&mailbox, 1..=3);
    let (mut monitor, rx) = monitor(&mailbox, watermark());

    let report = monitor.run_cycle().await;
    assert_eq!(report.outcome, CycleOutcome::Completed);
    assert_eq!(report.listed, 3);
    assert_eq!(report.enqueued, 3);
    assert_eq!(drain(&rx).await, vec![3, 2, 1]);
    assert_eq!(mailbox.connects(), 1);
    assert_eq!(mailbox.logouts(), 1);
}

#[tokio::test]
async fn test_other_domain_is_never_enqueued() {
    let mailbox = ScriptedMailbox::new();
    mailbox.deliver(1, message("user@other.com", "elsewhere", fresh()));
    let (mut monitor, rx) = monitor(&mailbox, watermark());

    let report = monitor.run_cycle().await;
    assert_eq!(report.rejected_domain, 1);
    assert_eq!(report.enqueued, 0);
    assert!(drain(&rx).await.is_empty());
    assert!(mailbox.body_fetches().is_empty());
    assert!(monitor.state().is_seen(mailingest_imap::Uid::new(1).unwrap()));
}

#[tokio::test]
async fn test_cc_to_target_domain_is_accepted() {
    let mailbox = ScriptedMailbox::new();
    let raw = String::from_utf8(message("user@other.com", "cc", fresh()))
        .unwrap()
        .replacen("Subject:", "Cc: Ops <ops@TARGET.example>\r\nSubject:", 1);
    mailbox.deliver(1, raw.into_bytes());
    let (mut monitor, rx) = monitor(&mailbox, watermark());

    assert_eq!(monitor.run_cycle().await.enqueued, 1);
    assert_eq!(drain(&rx).await, vec![1]);
}

#[tokio::test]
async fn test_mail_before_watermark_is_never_enqueued() {
    let mailbox = ScriptedMailbox::new();
    let mark = watermark();
    mailbox.deliver(1, message("user@target.example", "early", mark - chrono::Duration::seconds(1)));
    mailbox.deliver(2, message("user@target.example", "exact", mark));
    let (mut monitor, rx) = monitor(&mailbox, mark);

    let report = monitor.run_cycle().await;
    assert_eq!(report.rejected_watermark, 2);
    assert_eq!(report.enqueued, 0);
    assert!(drain(&rx).await.is_empty());
}

#[tokio::test]
async fn test_unparseable_date_is_skipped() {
    let mailbox = ScriptedMailbox::new();
    mailbox.deliver(1, message_with_date("user@target.example", "undated", "sometime last week"));
    let (mut monitor, rx) = monitor(&mailbox, watermark());

    let report = monitor.run_cycle().await;
    assert_eq!(report.outcome, CycleOutcome::Completed);
    assert_eq!(report.rejected_watermark, 1);
    assert!(drain(&rx).await.is_empty());
}

#[tokio::test]
async fn test_seen_messages_are_not_enqueued_twice() {
    let mailbox = ScriptedMailbox::new();
    deliver_target(&mailbox, 1..=3);
    let (mut monitor, rx) = monitor(&mailbox, watermark());

    assert_eq!(monitor.run_cycle().await.enqueued, 3);
    let second = monitor.run_cycle().await;
    assert_eq!(second.scanned, 0);
    assert_eq!(second.enqueued, 0);

    // The cursor UID disappears, so the recent window is rescanned.
    mailbox.expunge(3);
    deliver_target(&mailbox, [4]);
    let third = monitor.run_cycle().await;
    assert_eq!(third.skipped_seen, 2);
    assert_eq!(third.enqueued, 1);

    assert_eq!(drain(&rx).await, vec![3, 2, 1, 4]);
}

#[tokio::test]
async fn test_first_scan_is_bounded_by_window() {
    let mailbox = ScriptedMailbox::new();
    deliver_target(&mailbox, 1..=15);
    let (mut monitor, rx) = monitor(&mailbox, watermark());

    let report = monitor.run_cycle().await;
    assert_eq!(report.scanned, 10);
    assert_eq!(drain(&rx).await, (6..=15).rev().collect::<Vec<_>>());

    // Older mail stays behind the cursor.
    assert_eq!(monitor.run_cycle().await.scanned, 0);
}

#[tokio::test(start_paused = true)]
async fn test_fetch_failure_is_retried_within_cycle() {
    let mailbox = ScriptedMailbox::new();
    deliver_target(&mailbox, 1..=3);
    mailbox.fail_fetch_once(2);
    let (mut monitor, rx) = monitor(&mailbox, watermark());

    let report = monitor.run_cycle().await;
    assert_eq!(report.outcome, CycleOutcome::Completed);
    assert_eq!(report.enqueued, 3);
    assert_eq!(report.deferred, 0);
    assert!(monitor.state().deferred().is_empty());
    assert_eq!(mailbox.connects(), 2);
    assert_eq!(mailbox.logouts(), 2);

    assert_eq!(drain(&rx).await, vec![3, 2, 1]);
}

#[tokio::test(start_paused = true)]
async fn test_fetch_failure_defers_once_attempts_run_out() {
    let mailbox = ScriptedMailbox::new();
    deliver_target(&mailbox, 1..=3);
    mailbox.fail_fetches(2, 3);
    let (mut monitor, rx) = monitor(&mailbox, watermark());

    let first = monitor.run_cycle().await;
    assert_eq!(first.outcome, CycleOutcome::Interrupted);
    assert_eq!(first.enqueued, 1);
    assert_eq!(first.deferred, 2);
    assert_eq!(mailbox.logouts(), 3);

    let second = monitor.run_cycle().await;
    assert_eq!(second.outcome, CycleOutcome::Completed);
    assert_eq!(second.enqueued, 2);
    assert!(monitor.state().deferred().is_empty());

    assert_eq!(drain(&rx).await, vec![3, 2, 1]);
}

#[tokio::test(start_paused = true)]
async fn test_header_fetch_failure_is_retried_within_cycle() {
    let mailbox = ScriptedMailbox::new();
    deliver_target(&mailbox, 1..=2);
    mailbox.fail_header_fetches(1);
    let (mut monitor, rx) = monitor(&mailbox, watermark());

    let report = monitor.run_cycle().await;
    assert_eq!(report.outcome, CycleOutcome::Completed);
    assert_eq!(report.enqueued, 2);
    assert_eq!(drain(&rx).await, vec![2, 1]);
}

#[tokio::test(start_paused = true)]
async fn test_header_fetch_failure_defers_everything() {
    let mailbox = ScriptedMailbox::new();
    deliver_target(&mailbox, 1..=2);
    mailbox.fail_header_fetches(3);
    let (mut monitor, rx) = monitor(&mailbox, watermark());

    let first = monitor.run_cycle().await;
    assert_eq!(first.outcome, CycleOutcome::Interrupted);
    assert_eq!(first.deferred, 2);

    assert_eq!(monitor.run_cycle().await.enqueued, 2);
    assert_eq!(drain(&rx).await, vec![2, 1]);
}

#[tokio::test(start_paused = true)]
async fn test_connect_retries_then_abandons() {
    let mailbox = ScriptedMailbox::new();
    deliver_target(&mailbox, [1]);
    mailbox.fail_connects(5);
    let (mut monitor, rx) = monitor(&mailbox, watermark());

    let first = monitor.run_cycle().await;
    assert_eq!(first.outcome, CycleOutcome::Abandoned);
    assert_eq!(mailbox.connects(), 0);

    // Two failures remain; the third attempt of this cycle succeeds.
    let second = monitor.run_cycle().await;
    assert_eq!(second.outcome, CycleOutcome::Completed);
    assert_eq!(second.enqueued, 1);
    assert_eq!(mailbox.connects(), 1);
    assert_eq!(mailbox.logouts(), 1);
    assert_eq!(drain(&rx).await, vec![1]);
}

#[tokio::test]
async fn test_uid_validity_change_resets_state() {
    let mailbox = ScriptedMailbox::new();
    deliver_target(&mailbox, 1..=2);
    let (mut monitor, rx) = monitor(&mailbox, watermark());
    assert_eq!(monitor.run_cycle().await.enqueued, 2);

    mailbox.set_uid_validity(99);
    let report = monitor.run_cycle().await;
    assert_eq!(report.skipped_seen, 0);
    assert_eq!(report.enqueued, 2);
    assert_eq!(drain(&rx).await, vec![2, 1, 2, 1]);
}

#[tokio::test]
async fn test_closed_queue_stops_cycle() {
    let mailbox = ScriptedMailbox::new();
    deliver_target(&mailbox, 1..=2);
    let (mut monitor, rx) = monitor(&mailbox, watermark());
    drop(rx);

    let report = monitor.run_cycle().await;
    assert_eq!(report.outcome, CycleOutcome::QueueClosed);
    assert_eq!(report.enqueued, 0);
    assert_eq!(monitor.state().deferred().len(), 2);
    assert_eq!(mailbox.logouts(), 1);
}

#[tokio::test]
async fn test_run_stops_on_shutdown_signal() {
    let mailbox = ScriptedMailbox::new();
    deliver_target(&mailbox, [7]);
    let (monitor, rx) = monitor(&mailbox, watermark());
    let (stop, shutdown) = tokio::sync::watch::channel(false);

    let handle = tokio::spawn(monitor.run(Duration::from_millis(10), shutdown));

    let Pop::Item(item) = rx.pop(Duration::from_secs(5)).await else {
        panic!("monitor never enqueued");
    };
    assert_eq!(item.message.uid.get(), 7);

    stop.send(true).unwrap();
    let state = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.seen().len(), 1);
    assert_eq!(mailbox.connects(), mailbox.logouts());

    // The monitor's sender is gone with it.
    assert!(matches!(rx.pop(Duration::from_millis(50)).await, Pop::Closed));
}
