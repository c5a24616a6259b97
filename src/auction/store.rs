use crate::auction::types::{AuctionPatch, AuctionSession, AuctionSnapshot, AuctionStatus};
use crate::error::AppError;
use std::collections::VecDeque;

const UNSTAMPED: i64 = i64::MIN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldStamps {
    seller_id: i64,
    current_price: i64,
    bid_increment: i64,
    bid_count: i64,
    buy_now_price: i64,
    end_time: i64,
    status: i64,
    last_bidder_id: i64,
}

impl Default for FieldStamps {
    fn default() -> Self {
        Self::uniform(UNSTAMPED)
    }
}

impl FieldStamps {
    fn uniform(server_ts: i64) -> Self {
        Self {
            seller_id: server_ts,
            current_price: server_ts,
            bid_increment: server_ts,
            bid_count: server_ts,
            buy_now_price: server_ts,
            end_time: server_ts,
            status: server_ts,
            last_bidder_id: server_ts,
        }
    }

    fn newest(&self) -> i64 {
        [
            self.seller_id,
            self.current_price,
            self.bid_increment,
            self.bid_count,
            self.buy_now_price,
            self.end_time,
            self.status,
            self.last_bidder_id,
        ]
        .into_iter()
        .max()
        .unwrap_or(UNSTAMPED)
    }

    fn has_older_field(&self, patch: &AuctionPatch) -> bool {
        let ts = patch.server_ts;
        (patch.seller_id.is_some() && self.seller_id < ts)
            || (patch.current_price.is_some() && self.current_price < ts)
            || (patch.bid_increment.is_some() && self.bid_increment < ts)
            || (patch.bid_count.is_some() && self.bid_count < ts)
            || (patch.buy_now_price.is_some() && self.buy_now_price < ts)
            || (patch.end_time_ms.is_some() && self.end_time < ts)
            || (patch.status.is_some() && self.status < ts)
            || (patch.last_bidder_id.is_some() && self.last_bidder_id < ts)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    Applied { changed: bool },
    Republished { end_time_ms: i64 },
    Buffered { pending: usize },
    Stale { server_ts: i64, last_applied: i64 },
    ForeignAuction { auction_id: String },
}

/// Fields an authority reported back for an accepted bid or purchase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorityFold {
    pub current_price: Option<i64>,
    pub bid_count: Option<u64>,
    pub status: Option<AuctionStatus>,
    pub bidder_id: Option<String>,
    pub server_ts: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotMerge {
    pub seeded: bool,
    pub replayed: usize,
    pub applied: usize,
}

/// View-model of one auction. `apply_patch` and `merge_snapshot` are the only writers.
#[derive(Debug)]
pub struct SessionStore {
    auction_id: String,
    session: Option<AuctionSession>,
    stamps: FieldStamps,
    pending: VecDeque<AuctionPatch>,
    max_pending: usize,
    dropped_pending: u64,
    pending_update: bool,
}

impl SessionStore {
    pub fn new(auction_id: impl Into<String>, max_pending: usize) -> Self {
        Self {
            auction_id: auction_id.into(),
            session: None,
            stamps: FieldStamps::default(),
            pending: VecDeque::new(),
            max_pending: max_pending.max(1),
            dropped_pending: 0,
            pending_update: false,
        }
    }

    pub fn auction_id(&self) -> &str {
        &self.auction_id
    }

    pub fn session(&self) -> Option<&AuctionSession> {
        self.session.as_ref()
    }

    pub fn snapshot(&self) -> Option<AuctionSession> {
        self.session.clone()
    }

    pub fn is_seeded(&self) -> bool {
        self.session.is_some()
    }

    pub fn buffered_len(&self) -> usize {
        self.pending.len()
    }

    pub fn dropped_pending(&self) -> u64 {
        self.dropped_pending
    }

    pub fn last_applied_server_ts(&self) -> Option<i64> {
        self.session
            .as_ref()
            .map(|session| session.last_applied_server_ts)
    }

    /// Folds an authority decision. The bidder is only written together with the price it set.
    pub fn fold_authority(&mut self, fold: AuthorityFold) -> PatchOutcome {
        let Some(server_ts) = fold.server_ts else {
            return self.fold_unstamped(fold);
        };

        let bidder_owns_price = match (self.session.as_ref(), fold.current_price) {
            (Some(session), Some(price)) => {
                server_ts > self.stamps.current_price && price >= session.current_price
            }
            _ => false,
        };
        self.apply_patch(AuctionPatch {
            current_price: fold.current_price,
            bid_count: fold.bid_count,
            status: fold.status,
            last_bidder_id: fold.bidder_id.filter(|_| bidder_owns_price),
            ..AuctionPatch::new(self.auction_id.clone(), server_ts)
        })
    }

    /// Without a server clock reading the fold is stamped at the current high-water mark, so it
    /// never advances `last_applied_server_ts` and any newer server row overrides it.
    fn fold_unstamped(&mut self, fold: AuthorityFold) -> PatchOutcome {
        let Some(session) = self.session.as_mut() else {
            return PatchOutcome::Applied { changed: false };
        };
        let ts = session.last_applied_server_ts;
        let stamps = &mut self.stamps;
        let mut changed = false;

        if let Some(price) = fold.current_price.filter(|price| *price > session.current_price) {
            session.current_price = price;
            stamps.current_price = ts;
            if let Some(bidder_id) = fold.bidder_id {
                session.last_bidder_id = Some(bidder_id);
                stamps.last_bidder_id = ts;
            }
            changed = true;
        }
        if let Some(bid_count) = fold.bid_count.filter(|count| *count > session.bid_count) {
            session.bid_count = bid_count;
            stamps.bid_count = ts;
            changed = true;
        }
        if let Some(status) = fold.status.filter(|status| *status > session.status) {
            session.status = status;
            stamps.status = ts;
            changed = true;
        }

        self.pending_update |= changed;
        PatchOutcome::Applied { changed }
    }

    pub fn apply_patch(&mut self, patch: AuctionPatch) -> PatchOutcome {
        if patch.auction_id != self.auction_id {
            return PatchOutcome::ForeignAuction {
                auction_id: patch.auction_id,
            };
        }

        if self.session.is_none() {
            self.pending.push_back(patch);
            if self.pending.len() > self.max_pending {
                self.pending.pop_front();
                self.dropped_pending = self.dropped_pending.saturating_add(1);
                tracing::warn!(
                    auction_id = %self.auction_id,
                    max_pending = self.max_pending,
                    "pre-snapshot patch buffer full; dropped oldest patch"
                );
            }
            return PatchOutcome::Buffered {
                pending: self.pending.len(),
            };
        }

        self.apply_to_session(patch)
    }

    pub fn merge_snapshot(&mut self, snapshot: AuctionSnapshot) -> Result<SnapshotMerge, AppError> {
        if snapshot.auction_id != self.auction_id {
            return Err(AppError::InvalidArgument(format!(
                "snapshot for '{}' cannot seed session '{}'",
                snapshot.auction_id, self.auction_id
            )));
        }

        if self.session.is_some() {
            let applied = match self.apply_to_session(snapshot.into_patch()) {
                PatchOutcome::Applied { changed: true } | PatchOutcome::Republished { .. } => 1,
                _ => 0,
            };
            return Ok(SnapshotMerge {
                seeded: false,
                replayed: 0,
                applied,
            });
        }

        self.stamps = FieldStamps::uniform(snapshot.server_ts);
        if snapshot.buy_now_price.is_none() {
            self.stamps.buy_now_price = UNSTAMPED;
        }
        if snapshot.last_bidder_id.is_none() {
            self.stamps.last_bidder_id = UNSTAMPED;
        }
        self.session = Some(AuctionSession {
            auction_id: snapshot.auction_id,
            seller_id: snapshot.seller_id,
            current_price: snapshot.current_price,
            bid_increment: snapshot.bid_increment,
            bid_count: snapshot.bid_count,
            buy_now_price: snapshot.buy_now_price,
            end_time_ms: snapshot.end_time_ms,
            status: snapshot.status,
            last_bidder_id: snapshot.last_bidder_id,
            last_applied_server_ts: snapshot.server_ts,
        });
        self.pending_update = true;

        let mut replayed = 0;
        let mut applied = 0;
        while let Some(patch) = self.pending.pop_front() {
            replayed += 1;
            if matches!(
                self.apply_to_session(patch),
                PatchOutcome::Applied { changed: true } | PatchOutcome::Republished { .. }
            ) {
                applied += 1;
            }
        }

        Ok(SnapshotMerge {
            seeded: true,
            replayed,
            applied,
        })
    }

    /// Returns the session if anything changed since the previous drain.
    pub fn drain_session_update(&mut self) -> Option<AuctionSession> {
        if !std::mem::take(&mut self.pending_update) {
            return None;
        }
        self.session.clone()
    }

    fn apply_to_session(&mut self, patch: AuctionPatch) -> PatchOutcome {
        let Some(session) = self.session.as_mut() else {
            return PatchOutcome::Buffered {
                pending: self.pending.len(),
            };
        };

        let ts = patch.server_ts;
        let last_applied = session.last_applied_server_ts;
        if patch.is_empty() || (ts <= last_applied && !self.stamps.has_older_field(&patch)) {
            tracing::debug!(
                auction_id = %self.auction_id,
                server_ts = ts,
                last_applied,
                "discarding stale patch"
            );
            return PatchOutcome::Stale {
                server_ts: ts,
                last_applied,
            };
        }

        if is_republish(session, &self.stamps, &patch) {
            let end_time_ms = patch.end_time_ms.unwrap_or(session.end_time_ms);
            replace_session(session, &mut self.stamps, patch);
            self.pending_update = true;
            tracing::info!(auction_id = %self.auction_id, end_time_ms, "auction republished");
            return PatchOutcome::Republished { end_time_ms };
        }

        let mut changed = false;
        let stamps = &mut self.stamps;

        if let Some(seller_id) = patch.seller_id {
            if ts > stamps.seller_id {
                changed |= session.seller_id != seller_id;
                session.seller_id = seller_id;
                stamps.seller_id = ts;
            }
        }
        if let Some(price) = patch.current_price {
            if ts > stamps.current_price {
                if price >= session.current_price {
                    changed |= session.current_price != price;
                    session.current_price = price;
                    stamps.current_price = ts;
                } else {
                    tracing::warn!(
                        auction_id = %self.auction_id,
                        price,
                        current = session.current_price,
                        "ignoring price decrease outside republish"
                    );
                }
            }
        }
        if let Some(increment) = patch.bid_increment {
            if ts > stamps.bid_increment {
                changed |= session.bid_increment != increment;
                session.bid_increment = increment;
                stamps.bid_increment = ts;
            }
        }
        if let Some(bid_count) = patch.bid_count {
            if ts > stamps.bid_count && bid_count >= session.bid_count {
                changed |= session.bid_count != bid_count;
                session.bid_count = bid_count;
                stamps.bid_count = ts;
            }
        }
        if let Some(buy_now_price) = patch.buy_now_price {
            if ts > stamps.buy_now_price {
                changed |= session.buy_now_price != Some(buy_now_price);
                session.buy_now_price = Some(buy_now_price);
                stamps.buy_now_price = ts;
            }
        }
        if let Some(end_time_ms) = patch.end_time_ms {
            if ts > stamps.end_time {
                changed |= session.end_time_ms != end_time_ms;
                session.end_time_ms = end_time_ms;
                stamps.end_time = ts;
            }
        }
        if let Some(status) = patch.status {
            if ts > stamps.status && status >= session.status {
                changed |= session.status != status;
                session.status = status;
                stamps.status = ts;
            }
        }
        if let Some(last_bidder_id) = patch.last_bidder_id {
            if ts > stamps.last_bidder_id {
                changed |= session.last_bidder_id.as_deref() != Some(last_bidder_id.as_str());
                session.last_bidder_id = Some(last_bidder_id);
                stamps.last_bidder_id = ts;
            }
        }

        session.last_applied_server_ts = session.last_applied_server_ts.max(stamps.newest());
        self.pending_update |= changed;
        PatchOutcome::Applied { changed }
    }
}

fn is_republish(session: &AuctionSession, stamps: &FieldStamps, patch: &AuctionPatch) -> bool {
    patch.server_ts > stamps.newest()
        && patch.status == Some(AuctionStatus::Active)
        && session.status != AuctionStatus::Active
        && patch
            .end_time_ms
            .is_some_and(|end_time_ms| end_time_ms != session.end_time_ms)
}

fn replace_session(session: &mut AuctionSession, stamps: &mut FieldStamps, patch: AuctionPatch) {
    let ts = patch.server_ts;
    if let Some(seller_id) = patch.seller_id {
        session.seller_id = seller_id;
        stamps.seller_id = ts;
    }
    if let Some(price) = patch.current_price {
        session.current_price = price;
        stamps.current_price = ts;
    }
    if let Some(increment) = patch.bid_increment {
        session.bid_increment = increment;
        stamps.bid_increment = ts;
    }
    if let Some(bid_count) = patch.bid_count {
        session.bid_count = bid_count;
        stamps.bid_count = ts;
    }
    if let Some(buy_now_price) = patch.buy_now_price {
        session.buy_now_price = Some(buy_now_price);
        stamps.buy_now_price = ts;
    }
    session.last_bidder_id = patch.last_bidder_id;
    stamps.last_bidder_id = ts;
    if let Some(end_time_ms) = patch.end_time_ms {
        session.end_time_ms = end_time_ms;
        stamps.end_time = ts;
    }
    session.status = AuctionStatus::Active;
    stamps.status = ts;
    session.last_applied_server_ts = ts;
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const AUCTION: &str = "a-1";

    fn snapshot(server_ts: i64) -> AuctionSnapshot {
        AuctionSnapshot {
            auction_id: AUCTION.to_string(),
            seller_id: "seller".to_string(),
            current_price: 1_000,
            bid_increment: 50,
            bid_count: 3,
            buy_now_price: Some(5_000),
            end_time_ms: 100_000,
            status: AuctionStatus::Active,
            last_bidder_id: Some("u-0".to_string()),
            server_ts,
        }
    }

    fn seeded_store() -> SessionStore {
        let mut store = SessionStore::new(AUCTION, 64);
        store
            .merge_snapshot(snapshot(10))
            .expect("snapshot should seed");
        store
    }

    fn price_patch(server_ts: i64, price: i64, bid_count: u64) -> AuctionPatch {
        AuctionPatch {
            current_price: Some(price),
            bid_count: Some(bid_count),
            ..AuctionPatch::new(AUCTION, server_ts)
        }
    }

    #[test]
    fn buffers_patches_until_snapshot_lands() {
        let mut store = SessionStore::new(AUCTION, 64);

        let outcome = store.apply_patch(price_patch(20, 1_050, 4));
        assert_eq!(outcome, PatchOutcome::Buffered { pending: 1 });
        assert!(store.snapshot().is_none());

        let merge = store
            .merge_snapshot(snapshot(10))
            .expect("snapshot should seed");
        assert_eq!(
            merge,
            SnapshotMerge {
                seeded: true,
                replayed: 1,
                applied: 1
            }
        );

        let session = store.snapshot().expect("session should exist");
        assert_eq!(session.current_price, 1_050);
        assert_eq!(session.bid_count, 4);
        assert_eq!(session.last_applied_server_ts, 20);
    }

    #[test]
    fn stale_snapshot_never_clobbers_newer_replayed_patch() {
        let mut store = SessionStore::new(AUCTION, 64);
        let _ = store.apply_patch(price_patch(30, 1_200, 6));
        let _ = store.apply_patch(price_patch(5, 900, 1));

        let merge = store
            .merge_snapshot(snapshot(10))
            .expect("snapshot should seed");
        assert_eq!(merge.replayed, 2);
        assert_eq!(merge.applied, 1);
        let session = store.snapshot().expect("session should exist");
        assert_eq!(session.current_price, 1_200);
        assert_eq!(session.bid_count, 6);
    }

    #[test]
    fn drops_oldest_buffered_patch_when_full() {
        let mut store = SessionStore::new(AUCTION, 2);
        let _ = store.apply_patch(price_patch(11, 1_050, 4));
        let _ = store.apply_patch(price_patch(12, 1_100, 5));
        let outcome = store.apply_patch(price_patch(13, 1_150, 6));

        assert_eq!(outcome, PatchOutcome::Buffered { pending: 2 });
        assert_eq!(store.dropped_pending(), 1);
    }

    #[test]
    fn discards_patch_at_or_before_last_applied() {
        let mut store = seeded_store();
        let _ = store.apply_patch(price_patch(20, 1_050, 4));

        let outcome = store.apply_patch(price_patch(20, 1_100, 5));
        assert_eq!(
            outcome,
            PatchOutcome::Stale {
                server_ts: 20,
                last_applied: 20
            }
        );
        let outcome = store.apply_patch(price_patch(15, 1_020, 4));
        assert!(matches!(outcome, PatchOutcome::Stale { .. }));
        assert_eq!(store.session().map(|s| s.current_price), Some(1_050));
    }

    #[test]
    fn identical_patch_twice_is_a_no_op() {
        let mut store = seeded_store();
        let patch = price_patch(20, 1_050, 4);

        let _ = store.apply_patch(patch.clone());
        let after_first = store.snapshot();
        let _ = store.drain_session_update();

        let outcome = store.apply_patch(patch);
        assert!(matches!(outcome, PatchOutcome::Stale { .. }));
        assert_eq!(store.snapshot(), after_first);
        assert!(store.drain_session_update().is_none());
    }

    #[test]
    fn unstamped_fold_keeps_newer_feed_bidder() {
        let mut store = seeded_store();
        let _ = store.apply_patch(AuctionPatch {
            last_bidder_id: Some("u-other".to_string()),
            ..price_patch(30, 1_100, 5)
        });

        let outcome = store.fold_authority(AuthorityFold {
            current_price: Some(1_050),
            bid_count: Some(4),
            bidder_id: Some("u-1".to_string()),
            ..AuthorityFold::default()
        });

        assert_eq!(outcome, PatchOutcome::Applied { changed: false });
        let session = store.snapshot().expect("session should exist");
        assert_eq!(session.current_price, 1_100);
        assert_eq!(session.bid_count, 5);
        assert_eq!(session.last_bidder_id.as_deref(), Some("u-other"));
        assert_eq!(session.last_applied_server_ts, 30);
    }

    #[test]
    fn unstamped_fold_yields_to_next_server_row() {
        let mut store = seeded_store();

        let outcome = store.fold_authority(AuthorityFold {
            current_price: Some(1_050),
            bid_count: Some(4),
            bidder_id: Some("u-1".to_string()),
            ..AuthorityFold::default()
        });
        assert_eq!(outcome, PatchOutcome::Applied { changed: true });
        let folded = store.snapshot().expect("session should exist");
        assert_eq!(folded.current_price, 1_050);
        assert_eq!(folded.last_bidder_id.as_deref(), Some("u-1"));
        assert_eq!(folded.last_applied_server_ts, 10);

        let outcome = store.apply_patch(AuctionPatch {
            last_bidder_id: Some("u-2".to_string()),
            ..price_patch(11, 1_100, 5)
        });
        assert_eq!(outcome, PatchOutcome::Applied { changed: true });
        let session = store.snapshot().expect("session should exist");
        assert_eq!(session.current_price, 1_100);
        assert_eq!(session.bid_count, 5);
        assert_eq!(session.last_bidder_id.as_deref(), Some("u-2"));
        assert_eq!(session.last_applied_server_ts, 11);
    }

    #[test]
    fn stamped_fold_drops_bidder_when_price_is_not_written() {
        let mut store = seeded_store();
        let _ = store.apply_patch(AuctionPatch {
            last_bidder_id: Some("u-other".to_string()),
            ..price_patch(30, 1_100, 5)
        });

        let _ = store.fold_authority(AuthorityFold {
            current_price: Some(1_050),
            bid_count: Some(4),
            bidder_id: Some("u-1".to_string()),
            server_ts: Some(35),
            ..AuthorityFold::default()
        });

        let session = store.snapshot().expect("session should exist");
        assert_eq!(session.current_price, 1_100);
        assert_eq!(session.last_bidder_id.as_deref(), Some("u-other"));
    }

    #[test]
    fn older_partial_patch_still_fills_fields_it_owns() {
        let mut store = seeded_store();
        let _ = store.apply_patch(price_patch(30, 1_100, 5));
        let late = AuctionPatch {
            bid_increment: Some(100),
            ..AuctionPatch::new(AUCTION, 20)
        };

        let outcome = store.apply_patch(late);
        assert_eq!(outcome, PatchOutcome::Applied { changed: true });
        let session = store.snapshot().expect("session should exist");
        assert_eq!(session.bid_increment, 100);
        assert_eq!(session.current_price, 1_100);
        assert_eq!(session.last_applied_server_ts, 30);
    }

    #[test]
    fn never_moves_status_backwards() {
        let mut store = seeded_store();
        let ended = AuctionPatch {
            status: Some(AuctionStatus::Ended),
            ..AuctionPatch::new(AUCTION, 20)
        };
        let draft = AuctionPatch {
            status: Some(AuctionStatus::Draft),
            ..AuctionPatch::new(AUCTION, 30)
        };

        let _ = store.apply_patch(ended);
        let _ = store.apply_patch(draft);
        assert_eq!(
            store.session().map(|s| s.status),
            Some(AuctionStatus::Ended)
        );
    }

    #[test]
    fn ignores_price_decrease_outside_republish() {
        let mut store = seeded_store();
        let outcome = store.apply_patch(price_patch(20, 900, 4));

        assert_eq!(outcome, PatchOutcome::Applied { changed: true });
        let session = store.snapshot().expect("session should exist");
        assert_eq!(session.current_price, 1_000);
        assert_eq!(session.bid_count, 4);
    }

    #[test]
    fn republish_replaces_ended_session() {
        let mut store = seeded_store();
        let _ = store.apply_patch(AuctionPatch {
            status: Some(AuctionStatus::Ended),
            ..AuctionPatch::new(AUCTION, 20)
        });
        let republish = AuctionPatch {
            current_price: Some(700),
            bid_count: Some(0),
            end_time_ms: Some(500_000),
            status: Some(AuctionStatus::Active),
            ..AuctionPatch::new(AUCTION, 40)
        };

        let outcome = store.apply_patch(republish);
        assert_eq!(
            outcome,
            PatchOutcome::Republished {
                end_time_ms: 500_000
            }
        );
        let session = store.snapshot().expect("session should exist");
        assert_eq!(session.status, AuctionStatus::Active);
        assert_eq!(session.current_price, 700);
        assert_eq!(session.bid_count, 0);
        assert_eq!(session.end_time_ms, 500_000);
        assert!(session.last_bidder_id.is_none());
    }

    #[test]
    fn ignores_patches_for_other_auctions() {
        let mut store = seeded_store();
        let outcome = store.apply_patch(AuctionPatch {
            current_price: Some(9_999),
            ..AuctionPatch::new("a-2", 99)
        });

        assert_eq!(
            outcome,
            PatchOutcome::ForeignAuction {
                auction_id: "a-2".to_string()
            }
        );
        assert_eq!(store.session().map(|s| s.current_price), Some(1_000));
    }

    #[test]
    fn resync_snapshot_merges_through_apply_rule() {
        let mut store = seeded_store();
        let _ = store.apply_patch(price_patch(50, 1_300, 8));

        let mut older = snapshot(40);
        older.current_price = 1_250;
        let merge = store.merge_snapshot(older).expect("merge should succeed");
        assert_eq!(merge.applied, 0);

        let mut newer = snapshot(60);
        newer.current_price = 1_350;
        newer.bid_count = 9;
        let merge = store.merge_snapshot(newer).expect("merge should succeed");
        assert_eq!(merge.applied, 1);
        assert_eq!(store.session().map(|s| s.current_price), Some(1_350));
    }

    #[test]
    fn rejects_snapshot_for_another_auction() {
        let mut store = SessionStore::new(AUCTION, 8);
        let mut foreign = snapshot(10);
        foreign.auction_id = "a-2".to_string();

        assert!(store.merge_snapshot(foreign).is_err());
        assert!(!store.is_seeded());
    }

    #[derive(Debug, Clone)]
    struct GeneratedPatch {
        patch: AuctionPatch,
    }

    fn generated_patches() -> impl Strategy<Value = Vec<GeneratedPatch>> {
        prop::collection::vec(
            (any::<bool>(), any::<bool>(), any::<bool>(), any::<bool>()),
            1..16,
        )
        .prop_map(|flags| {
            flags
                .into_iter()
                .enumerate()
                .map(|(index, (price, increment, bidder, end_time))| {
                    let server_ts = 100 + index as i64 * 10;
                    let step = index as i64 + 1;
                    GeneratedPatch {
                        patch: AuctionPatch {
                            current_price: price.then_some(1_000 + step * 50),
                            bid_count: price.then_some(3 + step as u64),
                            bid_increment: increment.then_some(50 + step),
                            last_bidder_id: bidder.then(|| format!("u-{step}")),
                            end_time_ms: end_time.then_some(100_000 + step * 1_000),
                            ..AuctionPatch::new(AUCTION, server_ts)
                        },
                    }
                })
                .collect()
        })
    }

    fn expected_after(patches: &[GeneratedPatch]) -> AuctionSession {
        let mut expected = AuctionSession {
            auction_id: AUCTION.to_string(),
            seller_id: "seller".to_string(),
            current_price: 1_000,
            bid_increment: 50,
            bid_count: 3,
            buy_now_price: Some(5_000),
            end_time_ms: 100_000,
            status: AuctionStatus::Active,
            last_bidder_id: Some("u-0".to_string()),
            last_applied_server_ts: 10,
        };
        let mut by_ts: Vec<&AuctionPatch> = patches.iter().map(|entry| &entry.patch).collect();
        by_ts.sort_by_key(|patch| patch.server_ts);
        for patch in by_ts {
            if let Some(price) = patch.current_price {
                expected.current_price = price;
            }
            if let Some(count) = patch.bid_count {
                expected.bid_count = count;
            }
            if let Some(increment) = patch.bid_increment {
                expected.bid_increment = increment;
            }
            if let Some(bidder) = &patch.last_bidder_id {
                expected.last_bidder_id = Some(bidder.clone());
            }
            if let Some(end_time_ms) = patch.end_time_ms {
                expected.end_time_ms = end_time_ms;
            }
            if !patch.is_empty() {
                expected.last_applied_server_ts = patch.server_ts;
            }
        }
        expected
    }

    proptest! {
        #[test]
        fn final_state_is_independent_of_delivery_order(
            (patches, shuffled) in generated_patches()
                .prop_flat_map(|patches| (Just(patches.clone()), Just(patches).prop_shuffle()))
        ) {
            let mut store = seeded_store();
            for entry in &shuffled {
                let _ = store.apply_patch(entry.patch.clone());
            }

            prop_assert_eq!(store.snapshot(), Some(expected_after(&patches)));
        }

        #[test]
        fn replaying_every_patch_twice_changes_nothing(
            patches in generated_patches().prop_shuffle()
        ) {
            let mut store = seeded_store();
            for entry in &patches {
                let _ = store.apply_patch(entry.patch.clone());
            }
            let once = store.snapshot();
            for entry in &patches {
                let _ = store.apply_patch(entry.patch.clone());
            }

            prop_assert_eq!(store.snapshot(), once);
        }
    }
}
