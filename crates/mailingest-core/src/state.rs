//! Monitor-owned ingestion state: watermark, seen ledger, cursor.
//!
//! Only the poll monitor reads or writes this state, so none of it is
//! synchronized.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use mailingest_imap::{Uid, UidValidity};
use tracing::{debug, info};

/// Set of evaluated UIDs with time- and size-bounded eviction.
///
/// Eviction is safe because the cursor keeps old UIDs out of the scan
/// range; the ledger only has to cover the cursor-fallback window.
#[derive(Debug, Clone)]
pub struct SeenLedger {
    ids: HashSet<Uid>,
    order: VecDeque<(Uid, DateTime<Utc>)>,
    retention: Duration,
    capacity: usize,
}

impl SeenLedger {
    /// Creates an empty ledger. A zero capacity is treated as one.
    #[must_use]
    pub fn new(retention: Duration, capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            retention,
            capacity: capacity.max(1),
        }
    }

    /// Returns true if `uid` was recorded and not yet evicted.
    #[must_use]
    pub fn contains(&self, uid: Uid) -> bool {
        self.ids.contains(&uid)
    }

    /// Records `uid` as evaluated at `now`. Returns false if already present.
    pub fn insert(&mut self, uid: Uid, now: DateTime<Utc>) -> bool {
        if !self.ids.insert(uid) {
            return false;
        }
        self.order.push_back((uid, now));
        while self.order.len() > self.capacity {
            if let Some((old, _)) = self.order.pop_front() {
                self.ids.remove(&old);
            }
        }
        true
    }

    /// Evicts entries older than the retention period. Returns how many.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let Ok(retention) = chrono::Duration::from_std(self.retention) else {
            return 0;
        };
        let cutoff = now - retention;

        let mut evicted = 0;
        while let Some(&(uid, at)) = self.order.front() {
            if at >= cutoff {
                break;
            }
            self.order.pop_front();
            self.ids.remove(&uid);
            evicted += 1;
        }
        evicted
    }

    /// Number of UIDs held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if nothing is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Forgets everything.
    pub fn clear(&mut self) {
        self.ids.clear();
        self.order.clear();
    }
}

/// Process-wide ingestion state.
#[derive(Debug, Clone)]
pub struct IngestionState {
    startup_watermark: DateTime<Utc>,
    seen: SeenLedger,
    last_seen: Option<Uid>,
    uid_validity: Option<UidValidity>,
    deferred: BTreeSet<Uid>,
}

impl IngestionState {
    /// Creates state whose watermark is `startup_watermark`.
    #[must_use]
    pub const fn new(startup_watermark: DateTime<Utc>, seen: SeenLedger) -> Self {
        Self {
            startup_watermark,
            seen,
            last_seen: None,
            uid_validity: None,
            deferred: BTreeSet::new(),
        }
    }

    /// Messages dated at or before this instant are never ingested.
    #[must_use]
    pub const fn startup_watermark(&self) -> DateTime<Utc> {
        self.startup_watermark
    }

    /// Returns true if `date` is strictly after the watermark.
    ///
    /// A missing date is never after the watermark.
    #[must_use]
    pub fn is_after_watermark(&self, date: Option<DateTime<Utc>>) -> bool {
        date.is_some_and(|d| d > self.startup_watermark)
    }

    /// Returns the scan cursor.
    #[must_use]
    pub const fn last_seen(&self) -> Option<Uid> {
        self.last_seen
    }

    /// Returns the seen ledger.
    #[must_use]
    pub const fn seen(&self) -> &SeenLedger {
        &self.seen
    }

    /// Returns true if `uid` was already evaluated.
    #[must_use]
    pub fn is_seen(&self, uid: Uid) -> bool {
        self.seen.contains(uid)
    }

    /// Marks `uid` evaluated and clears any deferral.
    pub fn mark_seen(&mut self, uid: Uid, now: DateTime<Utc>) {
        self.seen.insert(uid, now);
        self.deferred.remove(&uid);
    }

    /// Queues `uid` for another attempt next cycle.
    pub fn defer(&mut self, uid: Uid) {
        self.deferred.insert(uid);
    }

    /// Returns the deferred UIDs.
    #[must_use]
    pub const fn deferred(&self) -> &BTreeSet<Uid> {
        &self.deferred
    }

    /// Reconciles the mailbox's `UIDVALIDITY`.
    ///
    /// When it differs from the recorded value every UID-keyed piece of
    /// state is meaningless, so the cursor, ledger and deferrals are reset.
    /// Returns true if a reset happened.
    pub fn observe_uid_validity(&mut self, validity: Option<UidValidity>) -> bool {
        let reset = matches!(
            (self.uid_validity, validity),
            (Some(old), Some(new)) if old != new
        );
        if reset {
            info!(
                old = ?self.uid_validity.map(UidValidity::get),
                new = ?validity.map(UidValidity::get),
                "UIDVALIDITY changed, resetting cursor and seen ledger"
            );
            self.last_seen = None;
            self.seen.clear();
            self.deferred.clear();
        }
        if validity.is_some() {
            self.uid_validity = validity;
        }
        reset
    }

    /// Picks the UIDs to evaluate this cycle and advances the cursor.
    ///
    /// `uids` must be ascending. Without a cursor the newest `window` UIDs
    /// are scanned. With a cursor, UIDs after it are scanned; if the cursor
    /// UID has vanished the newest `window` are scanned as well. Deferred
    /// UIDs still in the mailbox are always included. The cursor moves to
    /// the newest UID before any filtering. The result is newest first.
    pub fn plan_scan(&mut self, uids: &[Uid], window: usize) -> Vec<Uid> {
        let recent = &uids[uids.len().saturating_sub(window)..];

        let mut plan: BTreeSet<Uid> = match self.last_seen {
            None => recent.iter().copied().collect(),
            Some(cursor) => {
                let after = uids.partition_point(|&u| u <= cursor);
                let mut set: BTreeSet<Uid> = uids[after..].iter().copied().collect();
                if uids.binary_search(&cursor).is_err() {
                    debug!(cursor = %cursor, "cursor UID gone, widening to recent window");
                    set.extend(recent.iter().copied());
                }
                set
            }
        };

        self.deferred.retain(|uid| uids.binary_search(uid).is_ok());
        plan.extend(self.deferred.iter().copied());

        if let Some(&newest) = uids.last() {
            self.last_seen = Some(newest);
        }

        plan.into_iter().rev().collect()
    }

    /// Applies retention to the seen ledger.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        self.seen.prune(now)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use chrono::TimeZone;
    use proptest::prelude::*;

    use super::*;

    fn uid(n: u32) -> Uid {
        Uid::new(n).unwrap()
    }

    fn uids(values: &[u32]) -> Vec<Uid> {
        values.iter().map(|&v| uid(v)).collect()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn state() -> IngestionState {
        IngestionState::new(t0(), SeenLedger::new(Duration::from_secs(3600), 100))
    }

    #[test]
    fn test_ledger_capacity_evicts_oldest() {
        let mut ledger = SeenLedger::new(Duration::from_secs(3600), 2);
        assert!(ledger.insert(uid(1), t0()));
        assert!(ledger.insert(uid(2), t0()));
        assert!(!ledger.insert(uid(2), t0()));
        assert!(ledger.insert(uid(3), t0()));
        assert!(!ledger.contains(uid(1)));
        assert!(ledger.contains(uid(3)));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_ledger_prune_by_age() {
        let mut ledger = SeenLedger::new(Duration::from_secs(60), 10);
        ledger.insert(uid(1), t0());
        ledger.insert(uid(2), t0() + chrono::Duration::seconds(90));

        let evicted = ledger.prune(t0() + chrono::Duration::seconds(120));
        assert_eq!(evicted, 1);
        assert!(!ledger.contains(uid(1)));
        assert!(ledger.contains(uid(2)));
    }

    #[test]
    fn test_watermark_is_strict() {
        let state = state();
        assert!(!state.is_after_watermark(Some(t0())));
        assert!(!state.is_after_watermark(Some(t0() - chrono::Duration::seconds(1))));
        assert!(state.is_after_watermark(Some(t0() + chrono::Duration::seconds(1))));
        assert!(!state.is_after_watermark(None));
    }

    #[test]
    fn test_first_scan_uses_recent_window() {
        let mut state = state();
        let plan = state.plan_scan(&uids(&[1, 2, 3, 4, 5]), 2);
        assert_eq!(plan, uids(&[5, 4]));
        assert_eq!(state.last_seen(), Some(uid(5)));
    }

    #[test]
    fn test_cursor_scans_only_newer() {
        let mut state = state();
        state.plan_scan(&uids(&[1, 2, 3]), 10);
        let plan = state.plan_scan(&uids(&[1, 2, 3, 7, 9]), 10);
        assert_eq!(plan, uids(&[9, 7]));
        assert_eq!(state.last_seen(), Some(uid(9)));
    }

    #[test]
    fn test_cursor_advances_with_nothing_new() {
        let mut state = state();
        state.plan_scan(&uids(&[4]), 10);
        assert!(state.plan_scan(&uids(&[4]), 10).is_empty());
        assert_eq!(state.last_seen(), Some(uid(4)));
    }

    #[test]
    fn test_vanished_cursor_widens_to_window() {
        let mut state = state();
        state.plan_scan(&uids(&[1, 2, 3, 4, 5]), 10);
        let plan = state.plan_scan(&uids(&[1, 2, 3, 6]), 2);
        assert_eq!(plan, uids(&[6, 3]));
    }

    #[test]
    fn test_deferred_rescanned_until_seen() {
        let mut state = state();
        state.plan_scan(&uids(&[1, 2, 3]), 10);
        state.defer(uid(2));

        assert_eq!(state.plan_scan(&uids(&[1, 2, 3]), 10), uids(&[2]));
        state.mark_seen(uid(2), t0());
        assert!(state.plan_scan(&uids(&[1, 2, 3]), 10).is_empty());
    }

    #[test]
    fn test_deferred_dropped_when_expunged() {
        let mut state = state();
        state.plan_scan(&uids(&[1, 2, 3]), 10);
        state.defer(uid(2));
        state.plan_scan(&uids(&[1, 3]), 10);
        assert!(state.deferred().is_empty());
    }

    #[test]
    fn test_uid_validity_change_resets() {
        let mut state = state();
        assert!(!state.observe_uid_validity(UidValidity::new(10)));
        state.plan_scan(&uids(&[1, 2]), 10);
        state.mark_seen(uid(2), t0());

        assert!(!state.observe_uid_validity(UidValidity::new(10)));
        assert!(state.observe_uid_validity(UidValidity::new(11)));
        assert_eq!(state.last_seen(), None);
        assert!(!state.is_seen(uid(2)));
    }

    proptest! {
        #[test]
        fn prop_plan_is_newest_first_and_bounded(
            values in proptest::collection::btree_set(1u32..10_000, 0..64),
            window in 1usize..16,
        ) {
            let all: Vec<Uid> = values.into_iter().map(uid).collect();
            let mut state = state();
            let plan = state.plan_scan(&all, window);

            prop_assert!(plan.len() <= window);
            prop_assert!(plan.windows(2).all(|w| w[0] > w[1]));
            prop_assert_eq!(state.last_seen(), all.last().copied());
        }
    }
}
