use crate::auction::backend::{
    AuctionReader, BalanceProvider, BidDecision, BidIntent, LedgerAuthority, PurchaseDecision,
    PurchaseRequest,
};
use crate::auction::clock::WallClock;
use crate::auction::events::{SessionEvent, SessionEvents};
use crate::auction::store::{AuthorityFold, SessionStore};
use crate::auction::types::{AuctionSession, AuctionStatus, WalletBalanceSnapshot};
use crate::error::{AppError, ValidationFailure};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SubmissionState {
    Idle,
    Pending,
    /// The last call went unanswered; only a refresh unlocks the control.
    RefreshRequired,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BalanceWarning {
    pub balance: i64,
    pub required: i64,
    pub as_of_ms: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BidReceipt {
    pub auction_id: String,
    pub amount: i64,
    pub new_price: Option<i64>,
    pub new_bid_count: Option<u64>,
    pub balance_warning: Option<BalanceWarning>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseReceipt {
    pub auction_id: String,
    pub price: i64,
    pub balance_warning: Option<BalanceWarning>,
}

pub fn validate_bid(
    session: Option<&AuctionSession>,
    bidder_id: &str,
    amount: i64,
    now_ms: i64,
) -> Result<(), ValidationFailure> {
    let session = session.ok_or(ValidationFailure::SessionNotLoaded)?;
    if amount <= 0 {
        return Err(ValidationFailure::InvalidAmount);
    }
    if session.status != AuctionStatus::Active {
        return Err(ValidationFailure::not_active(session.status));
    }
    if now_ms >= session.end_time_ms {
        return Err(ValidationFailure::AuctionEnded);
    }
    if bidder_id == session.seller_id {
        return Err(ValidationFailure::SellerCannotBid);
    }
    let minimum = session.minimum_bid();
    if amount < minimum {
        return Err(ValidationFailure::BelowMinimum { minimum });
    }
    Ok(())
}

pub fn validate_purchase(
    session: Option<&AuctionSession>,
    buyer_id: &str,
    now_ms: i64,
) -> Result<i64, ValidationFailure> {
    let session = session.ok_or(ValidationFailure::SessionNotLoaded)?;
    if session.status != AuctionStatus::Active {
        return Err(ValidationFailure::not_active(session.status));
    }
    if now_ms >= session.end_time_ms {
        return Err(ValidationFailure::AuctionEnded);
    }
    if buyer_id == session.seller_id {
        return Err(ValidationFailure::SellerCannotBid);
    }
    session
        .buy_now_price
        .ok_or(ValidationFailure::BuyNowUnavailable)
}

fn balance_warning(
    cached: Option<&WalletBalanceSnapshot>,
    user_id: &str,
    required: i64,
) -> Option<BalanceWarning> {
    let cached = cached.filter(|balance| balance.user_id == user_id)?;
    (cached.amount < required).then(|| BalanceWarning {
        balance: cached.amount,
        required,
        as_of_ms: cached.as_of_ms,
    })
}

fn new_client_nonce() -> String {
    format!("{:032x}", rand::random::<u128>())
}

/// Holds the single-flight slot for one submission. Dropping it without `settle` marks the outcome unknown.
struct SubmissionSlot<'a> {
    coordinator: &'a BidCoordinator,
    settled: bool,
}

impl SubmissionSlot<'_> {
    fn settle(mut self, next: SubmissionState) {
        self.settled = true;
        self.coordinator.set_submission_state(next);
    }
}

impl Drop for SubmissionSlot<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.coordinator
                .set_submission_state(SubmissionState::RefreshRequired);
        }
    }
}

/// Serializes bid and buy-now intents for one auction and folds authority results into the session.
pub struct BidCoordinator {
    auction_id: String,
    store: Arc<Mutex<SessionStore>>,
    ledger: Arc<dyn LedgerAuthority>,
    reader: Arc<dyn AuctionReader>,
    balances: Arc<dyn BalanceProvider>,
    clock: Arc<dyn WallClock>,
    authority_timeout: Duration,
    submission: Mutex<SubmissionState>,
    balance_cache: Mutex<Option<WalletBalanceSnapshot>>,
    events: SessionEvents,
    cancel: CancellationToken,
}

pub struct BidCoordinatorParts {
    pub auction_id: String,
    pub store: Arc<Mutex<SessionStore>>,
    pub ledger: Arc<dyn LedgerAuthority>,
    pub reader: Arc<dyn AuctionReader>,
    pub balances: Arc<dyn BalanceProvider>,
    pub clock: Arc<dyn WallClock>,
    pub authority_timeout: Duration,
    pub events: SessionEvents,
    pub cancel: CancellationToken,
}

impl BidCoordinator {
    pub fn new(parts: BidCoordinatorParts) -> Self {
        Self {
            auction_id: parts.auction_id,
            store: parts.store,
            ledger: parts.ledger,
            reader: parts.reader,
            balances: parts.balances,
            clock: parts.clock,
            authority_timeout: parts.authority_timeout,
            submission: Mutex::new(SubmissionState::Idle),
            balance_cache: Mutex::new(None),
            events: parts.events,
            cancel: parts.cancel,
        }
    }

    pub fn submission_state(&self) -> SubmissionState {
        *self.submission.lock()
    }

    pub fn can_submit(&self) -> bool {
        let session_active = self
            .store
            .lock()
            .session()
            .map(|session| {
                session.status == AuctionStatus::Active
                    && self.clock.now_ms() < session.end_time_ms
            })
            .unwrap_or(false);
        session_active && self.submission_state() == SubmissionState::Idle
    }

    pub fn cached_balance(&self) -> Option<WalletBalanceSnapshot> {
        self.balance_cache.lock().clone()
    }

    pub async fn refresh_balance(&self, user_id: &str) -> Result<WalletBalanceSnapshot, AppError> {
        let amount = self
            .until_closed(self.balances.get_balance(user_id))
            .await??;
        let snapshot = WalletBalanceSnapshot {
            user_id: user_id.to_string(),
            amount,
            as_of_ms: self.clock.now_ms(),
        };
        *self.balance_cache.lock() = Some(snapshot.clone());
        Ok(snapshot)
    }

    pub async fn submit_bid(&self, bidder_id: &str, amount: i64) -> Result<BidReceipt, AppError> {
        {
            let store = self.store.lock();
            validate_bid(store.session(), bidder_id, amount, self.clock.now_ms())?;
        }
        let slot = self.begin_submission()?;
        let balance_warning = balance_warning(self.balance_cache.lock().as_ref(), bidder_id, amount);

        let intent = BidIntent {
            auction_id: self.auction_id.clone(),
            bidder_id: bidder_id.to_string(),
            amount,
            client_nonce: new_client_nonce(),
        };
        tracing::debug!(
            auction_id = %self.auction_id,
            amount,
            client_nonce = %intent.client_nonce,
            "submitting bid"
        );

        let decision = match self.call_authority(self.ledger.place_bid(&intent)).await {
            Ok(decision) => decision,
            Err(error) => return Err(self.fail_submission(slot, error)),
        };
        slot.settle(SubmissionState::Idle);

        if !decision.accepted {
            let reason = decision
                .reason
                .unwrap_or_else(|| "bid rejected".to_string());
            tracing::info!(auction_id = %self.auction_id, amount, %reason, "bid rejected");
            return Err(AppError::Conflict(reason));
        }

        self.fold_bid(bidder_id, &decision);
        Ok(BidReceipt {
            auction_id: self.auction_id.clone(),
            amount,
            new_price: decision.new_price,
            new_bid_count: decision.new_bid_count,
            balance_warning,
        })
    }

    pub async fn buy_now(&self, buyer_id: &str) -> Result<PurchaseReceipt, AppError> {
        let price = {
            let store = self.store.lock();
            validate_purchase(store.session(), buyer_id, self.clock.now_ms())?
        };
        let slot = self.begin_submission()?;
        let balance_warning = balance_warning(self.balance_cache.lock().as_ref(), buyer_id, price);

        let request = PurchaseRequest {
            auction_id: self.auction_id.clone(),
            buyer_id: buyer_id.to_string(),
        };
        let decision = match self.call_authority(self.ledger.buy_now(&request)).await {
            Ok(decision) => decision,
            Err(error) => return Err(self.fail_submission(slot, error)),
        };
        slot.settle(SubmissionState::Idle);

        if !decision.accepted {
            let reason = decision
                .reason
                .unwrap_or_else(|| "purchase rejected".to_string());
            tracing::info!(auction_id = %self.auction_id, %reason, "buy-now rejected");
            return Err(AppError::Conflict(reason));
        }

        self.fold_purchase(price, &decision);
        Ok(PurchaseReceipt {
            auction_id: self.auction_id.clone(),
            price,
            balance_warning,
        })
    }

    /// Point read merged through the normal apply rule. Clears `RefreshRequired`.
    pub async fn refresh(&self) -> Result<AuctionSession, AppError> {
        let snapshot = self
            .until_closed(self.reader.fetch_auction(&self.auction_id))
            .await??;
        let session = {
            let mut store = self.store.lock();
            store.merge_snapshot(snapshot)?;
            store.snapshot()
        };
        self.events.publish_session(&self.store);

        let cleared = {
            let mut submission = self.submission.lock();
            let cleared = *submission == SubmissionState::RefreshRequired;
            if cleared {
                *submission = SubmissionState::Idle;
            }
            cleared
        };
        if cleared {
            self.emit_submission_state(SubmissionState::Idle);
        }

        session.ok_or(AppError::Validation(ValidationFailure::SessionNotLoaded))
    }

    fn begin_submission(&self) -> Result<SubmissionSlot<'_>, ValidationFailure> {
        {
            let mut submission = self.submission.lock();
            match *submission {
                SubmissionState::Pending => return Err(ValidationFailure::SubmissionPending),
                SubmissionState::RefreshRequired => {
                    return Err(ValidationFailure::RefreshRequired)
                }
                SubmissionState::Idle => *submission = SubmissionState::Pending,
            }
        }
        self.emit_submission_state(SubmissionState::Pending);
        Ok(SubmissionSlot {
            coordinator: self,
            settled: false,
        })
    }

    fn fail_submission(&self, slot: SubmissionSlot<'_>, error: AppError) -> AppError {
        match error {
            AppError::NetworkUnavailable(_) => {
                slot.settle(SubmissionState::Idle);
                error
            }
            error => {
                tracing::warn!(
                    auction_id = %self.auction_id,
                    %error,
                    "authority outcome unknown; refresh required"
                );
                slot.settle(SubmissionState::RefreshRequired);
                if error.is_outcome_unknown() {
                    error
                } else {
                    AppError::AuthorityUnreachable
                }
            }
        }
    }

    async fn call_authority<T>(
        &self,
        call: impl Future<Output = Result<T, AppError>>,
    ) -> Result<T, AppError> {
        match self
            .until_closed(tokio::time::timeout(self.authority_timeout, call))
            .await?
        {
            Ok(result) => result,
            Err(_) => Err(AppError::AuthorityUnreachable),
        }
    }

    async fn until_closed<T>(&self, work: impl Future<Output = T>) -> Result<T, AppError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(AppError::SessionClosed),
            output = work => Ok(output),
        }
    }

    /// Folds only what the authority reported back; nothing is guessed ahead of it.
    fn fold_bid(&self, bidder_id: &str, decision: &BidDecision) {
        let outcome = self.store.lock().fold_authority(AuthorityFold {
            current_price: decision.new_price,
            bid_count: decision.new_bid_count,
            bidder_id: Some(bidder_id.to_string()),
            server_ts: decision.server_timestamp,
            ..AuthorityFold::default()
        });
        tracing::debug!(auction_id = %self.auction_id, ?outcome, "bid result folded");
        self.events.publish_session(&self.store);
    }

    fn fold_purchase(&self, price: i64, decision: &PurchaseDecision) {
        let outcome = self.store.lock().fold_authority(AuthorityFold {
            current_price: Some(price),
            status: Some(AuctionStatus::Ended),
            server_ts: decision.server_timestamp,
            ..AuthorityFold::default()
        });
        tracing::debug!(auction_id = %self.auction_id, ?outcome, "purchase result folded");
        self.events.publish_session(&self.store);
    }

    fn set_submission_state(&self, next: SubmissionState) {
        let changed = {
            let mut submission = self.submission.lock();
            let changed = *submission != next;
            *submission = next;
            changed
        };
        if changed {
            self.emit_submission_state(next);
        }
    }

    fn emit_submission_state(&self, state: SubmissionState) {
        self.events.emit(SessionEvent::Submission {
            auction_id: self.auction_id.clone(),
            state,
        });
    }
}
