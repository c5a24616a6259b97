use crate::auction::backend::{
    AuctionReader, BalanceProvider, BidDecision, BidIntent, ChatDraft, ChatStore, FavoriteStore,
    FavoriteUpdate, FeedConnector, FeedItemStream, LedgerAuthority, PurchaseDecision,
    PurchaseRequest,
};
use crate::auction::clock::ManualClock;
use crate::auction::context::EngineContext;
use crate::auction::types::{
    AuctionPatch, AuctionSnapshot, AuctionStatus, ChatMessage, DeliveryState, EngineConfig,
    Viewer,
};
use crate::error::AppError;
use futures_util::future::BoxFuture;
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

pub const NOW: i64 = 1_700_000_000_000;
pub const SELLER: &str = "seller-1";
pub const START_PRICE: i64 = 1_000;
pub const START_BID_COUNT: u64 = 3;
pub const BUY_NOW_PRICE: i64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerMode {
    Settle,
    Hang,
    Refuse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatMode {
    Echo,
    Silent,
    Fail,
}

type PatchSender = mpsc::UnboundedSender<Result<AuctionPatch, AppError>>;
type ChatSender = mpsc::UnboundedSender<Result<ChatMessage, AppError>>;

struct FakeInner {
    book: AuctionSnapshot,
    bid_calls: Vec<BidIntent>,
    buy_calls: Vec<PurchaseRequest>,
    ledger_mode: LedgerMode,
    reads: usize,
    failing_reads: u32,
    balance: i64,
    balance_calls: usize,
    favorite: bool,
    favorite_calls: Vec<FavoriteUpdate>,
    fail_favorites: bool,
    hang_profile_reads: bool,
    chat_history: Vec<ChatMessage>,
    chat_posts: Vec<ChatDraft>,
    chat_mode: ChatMode,
    next_message_id: u64,
    patch_feeds: Vec<PatchSender>,
    chat_feeds: Vec<ChatSender>,
    patch_connects: usize,
    failing_patch_connects: u32,
}

/// In-memory ledger, reader and push hub shared by every engine a test opens.
pub struct FakeBackend {
    inner: Mutex<FakeInner>,
}

pub fn snapshot(auction_id: &str) -> AuctionSnapshot {
    AuctionSnapshot {
        auction_id: auction_id.to_string(),
        seller_id: SELLER.to_string(),
        current_price: START_PRICE,
        bid_increment: 50,
        bid_count: START_BID_COUNT,
        buy_now_price: Some(BUY_NOW_PRICE),
        end_time_ms: NOW + 3_600_000,
        status: AuctionStatus::Active,
        last_bidder_id: None,
        server_ts: 10,
    }
}

pub fn viewer(user_id: &str) -> Viewer {
    Viewer {
        user_id: user_id.to_string(),
        label: user_id.to_string(),
    }
}

fn receiver_stream<T: Send + 'static>(
    receiver: mpsc::UnboundedReceiver<Result<T, AppError>>,
) -> FeedItemStream<T> {
    stream::unfold(receiver, |mut receiver| async move {
        receiver.recv().await.map(|item| (item, receiver))
    })
    .boxed()
}

impl FakeBackend {
    pub fn seeded(auction_id: &str) -> Arc<Self> {
        Self::with_snapshot(snapshot(auction_id))
    }

    pub fn with_snapshot(book: AuctionSnapshot) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(FakeInner {
                book,
                bid_calls: Vec::new(),
                buy_calls: Vec::new(),
                ledger_mode: LedgerMode::Settle,
                reads: 0,
                failing_reads: 0,
                balance: 10_000,
                balance_calls: 0,
                favorite: false,
                favorite_calls: Vec::new(),
                fail_favorites: false,
                hang_profile_reads: false,
                chat_history: Vec::new(),
                chat_posts: Vec::new(),
                chat_mode: ChatMode::Echo,
                next_message_id: 0,
                patch_feeds: Vec::new(),
                chat_feeds: Vec::new(),
                patch_connects: 0,
                failing_patch_connects: 0,
            }),
        })
    }

    pub fn context(self: &Arc<Self>, viewer: Option<Viewer>) -> Arc<EngineContext> {
        self.context_with(viewer, EngineConfig::default(), Arc::new(ManualClock::new(NOW)))
    }

    pub fn context_with(
        self: &Arc<Self>,
        viewer: Option<Viewer>,
        config: EngineConfig,
        clock: Arc<ManualClock>,
    ) -> Arc<EngineContext> {
        Arc::new(EngineContext {
            config,
            viewer,
            clock,
            ledger: self.clone(),
            reader: self.clone(),
            balances: self.clone(),
            favorites: self.clone(),
            chat_store: self.clone(),
            patch_feed: self.clone(),
            chat_feed: self.clone(),
        })
    }

    pub fn book(&self) -> AuctionSnapshot {
        self.inner.lock().book.clone()
    }

    pub fn bid_calls(&self) -> Vec<BidIntent> {
        self.inner.lock().bid_calls.clone()
    }

    pub fn buy_calls(&self) -> Vec<PurchaseRequest> {
        self.inner.lock().buy_calls.clone()
    }

    pub fn reads(&self) -> usize {
        self.inner.lock().reads
    }

    pub fn balance_calls(&self) -> usize {
        self.inner.lock().balance_calls
    }

    pub fn favorite_calls(&self) -> Vec<FavoriteUpdate> {
        self.inner.lock().favorite_calls.clone()
    }

    pub fn chat_posts(&self) -> Vec<ChatDraft> {
        self.inner.lock().chat_posts.clone()
    }

    pub fn patch_connects(&self) -> usize {
        self.inner.lock().patch_connects
    }

    pub fn set_ledger_mode(&self, mode: LedgerMode) {
        self.inner.lock().ledger_mode = mode;
    }

    pub fn set_chat_mode(&self, mode: ChatMode) {
        self.inner.lock().chat_mode = mode;
    }

    pub fn set_balance(&self, balance: i64) {
        self.inner.lock().balance = balance;
    }

    pub fn set_favorite(&self, favorite: bool) {
        self.inner.lock().favorite = favorite;
    }

    pub fn fail_favorites(&self) {
        self.inner.lock().fail_favorites = true;
    }

    pub fn hang_profile_reads(&self) {
        self.inner.lock().hang_profile_reads = true;
    }

    pub fn fail_next_reads(&self, count: u32) {
        self.inner.lock().failing_reads = count;
    }

    pub fn fail_next_patch_connects(&self, count: u32) {
        self.inner.lock().failing_patch_connects = count;
    }

    pub fn set_chat_history(&self, history: Vec<ChatMessage>) {
        self.inner.lock().chat_history = history;
    }

    /// Mutates the authoritative row without telling anyone, as if a push was lost.
    pub fn settle_silently(&self, price: i64, bid_count: u64) {
        let mut inner = self.inner.lock();
        inner.book.current_price = price;
        inner.book.bid_count = bid_count;
        inner.book.server_ts += 1;
    }

    pub fn push_patch(&self, patch: AuctionPatch) {
        self.inner
            .lock()
            .patch_feeds
            .retain(|sender| sender.send(Ok(patch.clone())).is_ok());
    }

    pub fn push_patch_error(&self, error: AppError) {
        let mut inner = self.inner.lock();
        if let Some(sender) = inner.patch_feeds.first() {
            let _ = sender.send(Err(error));
        }
        inner.patch_feeds.retain(|sender| !sender.is_closed());
    }

    pub fn push_chat(&self, message: ChatMessage) {
        self.inner
            .lock()
            .chat_feeds
            .retain(|sender| sender.send(Ok(message.clone())).is_ok());
    }

    pub fn drop_patch_feeds(&self) {
        self.inner.lock().patch_feeds.clear();
    }

    fn broadcast_book(&self) {
        let patch = self.inner.lock().book.clone().into_patch();
        self.push_patch(patch);
    }
}

impl FakeInner {
    fn settle_bid(&mut self, intent: &BidIntent) -> BidDecision {
        if self.book.status != AuctionStatus::Active {
            return BidDecision::rejected("Auction is not active");
        }
        if intent.bidder_id == self.book.seller_id {
            return BidDecision::rejected("Sellers cannot bid on their own auction");
        }
        if intent.amount < self.book.current_price + self.book.bid_increment {
            return BidDecision::rejected("Outbid");
        }

        self.book.current_price = intent.amount;
        self.book.bid_count += 1;
        self.book.last_bidder_id = Some(intent.bidder_id.clone());
        self.book.server_ts += 1;
        BidDecision {
            accepted: true,
            new_price: Some(self.book.current_price),
            new_bid_count: Some(self.book.bid_count),
            reason: None,
            server_timestamp: Some(self.book.server_ts),
        }
    }

    fn settle_purchase(&mut self, request: &PurchaseRequest) -> PurchaseDecision {
        if self.book.status != AuctionStatus::Active {
            return PurchaseDecision::rejected("Auction is not active");
        }
        if request.buyer_id == self.book.seller_id {
            return PurchaseDecision::rejected("You cannot buy your own product");
        }
        let Some(price) = self.book.buy_now_price else {
            return PurchaseDecision::rejected("No buy-now price");
        };
        if self.balance < price {
            return PurchaseDecision::rejected("Insufficient balance");
        }

        self.balance -= price;
        self.book.current_price = price;
        self.book.status = AuctionStatus::Ended;
        self.book.server_ts += 1;
        PurchaseDecision {
            accepted: true,
            reason: None,
            server_timestamp: Some(self.book.server_ts),
        }
    }
}

impl LedgerAuthority for FakeBackend {
    fn place_bid<'a>(&'a self, intent: &'a BidIntent) -> BoxFuture<'a, Result<BidDecision, AppError>> {
        Box::pin(async move {
            let mode = {
                let mut inner = self.inner.lock();
                inner.bid_calls.push(intent.clone());
                inner.ledger_mode
            };
            match mode {
                LedgerMode::Hang => std::future::pending::<()>().await,
                LedgerMode::Refuse => {
                    return Err(AppError::NetworkUnavailable("connection refused".to_string()))
                }
                LedgerMode::Settle => {}
            }

            tokio::task::yield_now().await;
            let decision = self.inner.lock().settle_bid(intent);
            if decision.accepted {
                self.broadcast_book();
            }
            Ok(decision)
        })
    }

    fn buy_now<'a>(
        &'a self,
        request: &'a PurchaseRequest,
    ) -> BoxFuture<'a, Result<PurchaseDecision, AppError>> {
        Box::pin(async move {
            let mode = {
                let mut inner = self.inner.lock();
                inner.buy_calls.push(request.clone());
                inner.ledger_mode
            };
            match mode {
                LedgerMode::Hang => std::future::pending::<()>().await,
                LedgerMode::Refuse => {
                    return Err(AppError::NetworkUnavailable("connection refused".to_string()))
                }
                LedgerMode::Settle => {}
            }

            let decision = self.inner.lock().settle_purchase(request);
            if decision.accepted {
                self.broadcast_book();
            }
            Ok(decision)
        })
    }
}

impl AuctionReader for FakeBackend {
    fn fetch_auction<'a>(
        &'a self,
        _auction_id: &'a str,
    ) -> BoxFuture<'a, Result<AuctionSnapshot, AppError>> {
        Box::pin(async move {
            let mut inner = self.inner.lock();
            inner.reads += 1;
            if inner.failing_reads > 0 {
                inner.failing_reads -= 1;
                return Err(AppError::NetworkUnavailable("read refused".to_string()));
            }
            Ok(inner.book.clone())
        })
    }

    fn fetch_messages<'a>(
        &'a self,
        _auction_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ChatMessage>, AppError>> {
        Box::pin(async move { Ok(self.inner.lock().chat_history.clone()) })
    }
}

impl BalanceProvider for FakeBackend {
    fn get_balance<'a>(&'a self, _user_id: &'a str) -> BoxFuture<'a, Result<i64, AppError>> {
        Box::pin(async move {
            let (balance, hang) = {
                let mut inner = self.inner.lock();
                inner.balance_calls += 1;
                (inner.balance, inner.hang_profile_reads)
            };
            if hang {
                std::future::pending::<()>().await;
            }
            Ok(balance)
        })
    }
}

impl FavoriteStore for FakeBackend {
    fn is_favorite<'a>(
        &'a self,
        _user_id: &'a str,
        _auction_id: &'a str,
    ) -> BoxFuture<'a, Result<bool, AppError>> {
        Box::pin(async move {
            let (favorite, hang) = {
                let inner = self.inner.lock();
                (inner.favorite, inner.hang_profile_reads)
            };
            if hang {
                std::future::pending::<()>().await;
            }
            Ok(favorite)
        })
    }

    fn set_favorite<'a>(&'a self, update: &'a FavoriteUpdate) -> BoxFuture<'a, Result<(), AppError>> {
        Box::pin(async move {
            let fail = {
                let mut inner = self.inner.lock();
                inner.favorite_calls.push(update.clone());
                inner.fail_favorites
            };
            tokio::task::yield_now().await;
            if fail {
                return Err(AppError::NetworkUnavailable("favorites offline".to_string()));
            }
            self.inner.lock().favorite = update.is_favorite;
            Ok(())
        })
    }
}

impl ChatStore for FakeBackend {
    fn post_message<'a>(&'a self, draft: &'a ChatDraft) -> BoxFuture<'a, Result<(), AppError>> {
        Box::pin(async move {
            let echo = {
                let mut inner = self.inner.lock();
                inner.chat_posts.push(draft.clone());
                match inner.chat_mode {
                    ChatMode::Fail => {
                        return Err(AppError::NetworkUnavailable("chat offline".to_string()))
                    }
                    ChatMode::Silent => None,
                    ChatMode::Echo => {
                        inner.next_message_id += 1;
                        let message = ChatMessage {
                            id: Some(format!("m-{}", inner.next_message_id)),
                            auction_id: draft.auction_id.clone(),
                            sender_id: draft.sender_id.clone(),
                            sender_label: draft.sender_label.clone(),
                            body: draft.body.clone(),
                            server_ts: Some(100 + inner.next_message_id as i64),
                            client_nonce: Some(draft.client_nonce.clone()),
                            delivery_state: DeliveryState::Confirmed,
                        };
                        inner.chat_history.push(message.clone());
                        Some(message)
                    }
                }
            };
            if let Some(message) = echo {
                self.push_chat(message);
            }
            Ok(())
        })
    }
}

impl FeedConnector<AuctionPatch> for FakeBackend {
    fn connect<'a>(
        &'a self,
        _auction_id: &'a str,
    ) -> BoxFuture<'a, Result<FeedItemStream<AuctionPatch>, AppError>> {
        Box::pin(async move {
            let mut inner = self.inner.lock();
            inner.patch_connects += 1;
            if inner.failing_patch_connects > 0 {
                inner.failing_patch_connects -= 1;
                return Err(AppError::NetworkUnavailable("feed refused".to_string()));
            }
            let (sender, receiver) = mpsc::unbounded_channel();
            inner.patch_feeds.push(sender);
            Ok(receiver_stream(receiver))
        })
    }
}

impl FeedConnector<ChatMessage> for FakeBackend {
    fn connect<'a>(
        &'a self,
        _auction_id: &'a str,
    ) -> BoxFuture<'a, Result<FeedItemStream<ChatMessage>, AppError>> {
        Box::pin(async move {
            let (sender, receiver) = mpsc::unbounded_channel();
            self.inner.lock().chat_feeds.push(sender);
            Ok(receiver_stream(receiver))
        })
    }
}
