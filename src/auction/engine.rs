use crate::auction::backend::{AuctionReader, FavoriteStore, FeedConnector};
use crate::auction::bidding::{
    BidCoordinator, BidCoordinatorParts, BidReceipt, PurchaseReceipt, SubmissionState,
};
use crate::auction::chat::{ChatAppender, ChatAppenderParts};
use crate::auction::clock::{CountdownClock, WallClock};
use crate::auction::context::EngineContext;
use crate::auction::events::{SessionEvent, SessionEvents};
use crate::auction::favorite::FavoriteToggle;
use crate::auction::feed::{self, reconnect_delay, FeedEvent, FeedTransition, StatusPublishThrottle};
use crate::auction::remote::validate_id;
use crate::auction::store::{PatchOutcome, SessionStore};
use crate::auction::types::{
    AuctionPatch, AuctionSession, ChatMessage, FavoriteState, FeedConnectionState,
    FeedStatusSnapshot, Viewer,
};
use crate::error::{AppError, ValidationFailure};
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// One open auction view: live feed, resync, countdown, chat, bidding and favorite state.
pub struct AuctionSessionEngine {
    auction_id: String,
    viewer: Option<Viewer>,
    store: Arc<Mutex<SessionStore>>,
    status: Arc<RwLock<FeedStatusSnapshot>>,
    events: SessionEvents,
    bids: Arc<BidCoordinator>,
    chat: Arc<ChatAppender>,
    favorite: Option<Arc<FavoriteToggle>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AuctionSessionEngine {
    pub async fn open(context: Arc<EngineContext>, auction_id: &str) -> Result<Self, AppError> {
        let auction_id = validate_id("auctionId", auction_id)?;
        let config = &context.config;
        let cancel = CancellationToken::new();
        let events = SessionEvents::new();
        let store = Arc::new(Mutex::new(SessionStore::new(
            auction_id.clone(),
            config.max_buffered_patches,
        )));
        let status = Arc::new(RwLock::new(FeedStatusSnapshot {
            state: FeedConnectionState::Connecting,
            auction_id: auction_id.clone(),
            consecutive_failures: 0,
            last_applied_server_ts: None,
            reason: None,
        }));

        let bids = Arc::new(BidCoordinator::new(BidCoordinatorParts {
            auction_id: auction_id.clone(),
            store: store.clone(),
            ledger: context.ledger.clone(),
            reader: context.reader.clone(),
            balances: context.balances.clone(),
            clock: context.clock.clone(),
            authority_timeout: context.authority_timeout(),
            events: events.clone(),
            cancel: cancel.child_token(),
        }));
        let chat = Arc::new(ChatAppender::new(ChatAppenderParts {
            auction_id: auction_id.clone(),
            viewer: context.viewer.clone(),
            store: context.chat_store.clone(),
            reader: context.reader.clone(),
            clock: context.clock.clone(),
            max_body_chars: config.max_chat_body_chars,
            confirm_timeout_ms: config.chat_confirm_timeout_ms,
            events: events.clone(),
            cancel: cancel.child_token(),
        }));

        let favorite = context.viewer.as_ref().map(|viewer| {
            Arc::new(FavoriteToggle::spawn(
                auction_id.clone(),
                viewer.user_id.clone(),
                false,
                context.favorites.clone(),
                context.favorite_debounce(),
                events.clone(),
                cancel.child_token(),
            ))
        });

        let resync = Arc::new(Notify::new());
        let mut tasks = vec![
            tokio::spawn(run_patch_feed(PatchFeedTask {
                auction_id: auction_id.clone(),
                connector: context.patch_feed.clone(),
                degraded_after_failures: config.degraded_after_failures,
                store: store.clone(),
                status: status.clone(),
                events: events.clone(),
                resync: resync.clone(),
                cancel: cancel.child_token(),
            })),
            tokio::spawn(run_snapshot_loader(
                auction_id.clone(),
                context.reader.clone(),
                store.clone(),
                events.clone(),
                resync,
                cancel.child_token(),
            )),
            tokio::spawn(run_countdown(CountdownTask {
                auction_id: auction_id.clone(),
                clock: context.clock.clone(),
                ending_soon_threshold_ms: config.ending_soon_threshold_ms,
                tick_interval: context.tick_interval(),
                store: store.clone(),
                events: events.clone(),
                cancel: cancel.child_token(),
            })),
            tokio::spawn(run_chat_feed(
                chat.clone(),
                context.chat_feed.clone(),
                auction_id.clone(),
                config.degraded_after_failures,
                context.tick_interval(),
                cancel.child_token(),
            )),
        ];
        if let (Some(viewer), Some(favorite)) = (context.viewer.as_ref(), favorite.as_ref()) {
            tasks.push(tokio::spawn(run_profile_reads(ProfileReadTask {
                auction_id: auction_id.clone(),
                user_id: viewer.user_id.clone(),
                favorites: context.favorites.clone(),
                favorite: favorite.clone(),
                bids: bids.clone(),
                cancel: cancel.child_token(),
            })));
        }

        tracing::info!(%auction_id, signed_in = context.viewer.is_some(), "auction session opened");
        Ok(Self {
            auction_id,
            viewer: context.viewer.clone(),
            store,
            status,
            events,
            bids,
            chat,
            favorite,
            cancel,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn auction_id(&self) -> &str {
        &self.auction_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn session(&self) -> Option<AuctionSession> {
        self.store.lock().snapshot()
    }

    pub async fn feed_status(&self) -> FeedStatusSnapshot {
        self.status.read().await.clone()
    }

    pub fn bids(&self) -> &BidCoordinator {
        &self.bids
    }

    pub fn chat(&self) -> &ChatAppender {
        &self.chat
    }

    pub fn submission_state(&self) -> SubmissionState {
        self.bids.submission_state()
    }

    pub fn can_submit(&self) -> bool {
        self.viewer.is_some() && self.bids.can_submit()
    }

    pub fn favorite_state(&self) -> Option<FavoriteState> {
        self.favorite.as_ref().map(|favorite| favorite.state())
    }

    pub fn chat_messages(&self) -> Vec<ChatMessage> {
        self.chat.messages()
    }

    pub async fn submit_bid(&self, amount: i64) -> Result<BidReceipt, AppError> {
        let viewer = self.signed_in()?;
        self.bids.submit_bid(&viewer.user_id, amount).await
    }

    pub async fn buy_now(&self) -> Result<PurchaseReceipt, AppError> {
        let viewer = self.signed_in()?;
        self.bids.buy_now(&viewer.user_id).await
    }

    pub async fn refresh(&self) -> Result<AuctionSession, AppError> {
        self.bids.refresh().await
    }

    pub async fn send_chat_message(&self, body: &str) -> Result<ChatMessage, AppError> {
        self.chat.send(body).await
    }

    pub async fn resend_chat_message(&self, client_nonce: &str) -> Result<ChatMessage, AppError> {
        self.chat.resend(client_nonce).await
    }

    pub fn toggle_favorite(&self) -> Result<FavoriteState, AppError> {
        self.favorite
            .as_ref()
            .map(|favorite| favorite.toggle())
            .ok_or(AppError::Validation(ValidationFailure::SignInRequired))
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancels every task, waits for them and publishes `Stopped`. In-flight submissions end as `SessionClosed`.
    pub async fn close(&self) {
        self.cancel.cancel();
        if let Some(favorite) = &self.favorite {
            favorite.shutdown().await;
        }
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(error) = task.await {
                tracing::warn!(auction_id = %self.auction_id, %error, "session task ended abnormally");
            }
        }

        let stopped =
            FeedStatusSnapshot::stopped(self.auction_id.clone(), Some("session closed".to_string()));
        *self.status.write().await = stopped.clone();
        self.events.emit(SessionEvent::FeedStatus(stopped));
        tracing::info!(auction_id = %self.auction_id, "auction session closed");
    }

    fn signed_in(&self) -> Result<&Viewer, AppError> {
        self.viewer
            .as_ref()
            .ok_or(AppError::Validation(ValidationFailure::SignInRequired))
    }
}

impl Drop for AuctionSessionEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct ProfileReadTask {
    auction_id: String,
    user_id: String,
    favorites: Arc<dyn FavoriteStore>,
    favorite: Arc<FavoriteToggle>,
    bids: Arc<BidCoordinator>,
    cancel: CancellationToken,
}

/// Favorite flag and wallet balance are advisory; they load beside the feed, never ahead of it.
async fn run_profile_reads(task: ProfileReadTask) {
    let lookup = async {
        match task
            .favorites
            .is_favorite(&task.user_id, &task.auction_id)
            .await
        {
            Ok(is_favorite) => task.favorite.seed(is_favorite),
            Err(error) => {
                tracing::warn!(auction_id = %task.auction_id, %error, "favorite lookup failed; assuming not favorite")
            }
        }
    };
    let balance = async {
        if let Err(error) = task.bids.refresh_balance(&task.user_id).await {
            tracing::warn!(auction_id = %task.auction_id, %error, "balance lookup failed");
        }
    };

    tokio::select! {
        _ = task.cancel.cancelled() => {}
        _ = futures_util::future::join(lookup, balance) => {}
    }
}

struct PatchFeedTask {
    auction_id: String,
    connector: Arc<dyn FeedConnector<AuctionPatch>>,
    degraded_after_failures: u32,
    store: Arc<Mutex<SessionStore>>,
    status: Arc<RwLock<FeedStatusSnapshot>>,
    events: SessionEvents,
    resync: Arc<Notify>,
    cancel: CancellationToken,
}

async fn run_patch_feed(task: PatchFeedTask) {
    let mut feed = feed::subscribe(
        task.connector.clone(),
        task.auction_id.clone(),
        task.degraded_after_failures,
        task.cancel.clone(),
    );
    let mut throttle = StatusPublishThrottle::default();

    while let Some(event) = feed.next().await {
        match event {
            FeedEvent::Item(patch) => {
                let outcome = task.store.lock().apply_patch(patch);
                if let PatchOutcome::ForeignAuction { auction_id } = &outcome {
                    tracing::debug!(
                        session = %task.auction_id,
                        %auction_id,
                        "dropping patch for another auction"
                    );
                }
                task.events.publish_session(&task.store);
            }
            FeedEvent::Status(transition) => {
                let seeded = task.store.lock().is_seeded();
                // Live means patches are flowing; read now so nothing between read and push is lost.
                if transition.state == FeedConnectionState::Live
                    || (!seeded && transition.state != FeedConnectionState::Connecting)
                {
                    task.resync.notify_one();
                }
                if throttle.allow(transition.state, &transition.reason) {
                    publish_status(&task, transition).await;
                }
            }
        }
    }
}

async fn publish_status(task: &PatchFeedTask, transition: FeedTransition) {
    let last_applied_server_ts = task.store.lock().last_applied_server_ts();
    let snapshot = FeedStatusSnapshot {
        state: transition.state,
        auction_id: task.auction_id.clone(),
        consecutive_failures: transition.consecutive_failures,
        last_applied_server_ts,
        reason: transition.reason,
    };

    {
        let mut writable = task.status.write().await;
        *writable = snapshot.clone();
    }
    task.events.emit(SessionEvent::FeedStatus(snapshot));
}

async fn run_snapshot_loader(
    auction_id: String,
    reader: Arc<dyn AuctionReader>,
    store: Arc<Mutex<SessionStore>>,
    events: SessionEvents,
    resync: Arc<Notify>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = resync.notified() => {}
        }

        let mut attempt = 0_u32;
        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = reader.fetch_auction(&auction_id) => result,
            };
            match result {
                Ok(snapshot) => {
                    let merged = store.lock().merge_snapshot(snapshot);
                    match merged {
                        Ok(merge) => {
                            tracing::debug!(
                                %auction_id,
                                seeded = merge.seeded,
                                replayed = merge.replayed,
                                applied = merge.applied,
                                "auction snapshot merged"
                            );
                            events.publish_session(&store);
                        }
                        Err(error) => {
                            tracing::warn!(%auction_id, %error, "auction snapshot rejected");
                        }
                    }
                    break;
                }
                Err(error) => {
                    attempt = attempt.saturating_add(1);
                    tracing::warn!(%auction_id, %error, attempt, "auction snapshot read failed");
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(reconnect_delay(attempt)) => {}
                    }
                }
            }
        }
    }
}

struct CountdownTask {
    auction_id: String,
    clock: Arc<dyn WallClock>,
    ending_soon_threshold_ms: i64,
    tick_interval: Duration,
    store: Arc<Mutex<SessionStore>>,
    events: SessionEvents,
    cancel: CancellationToken,
}

async fn run_countdown(task: CountdownTask) {
    let mut countdown = CountdownClock::new(task.ending_soon_threshold_ms);
    let mut ticker = tokio::time::interval(task.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = task.cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let restarted = task
            .store
            .lock()
            .session()
            .map(|session| countdown.observe_session(session))
            .unwrap_or(false);
        if restarted {
            tracing::debug!(
                auction_id = %task.auction_id,
                end_time_ms = ?countdown.end_time_ms(),
                "countdown restarted"
            );
        }

        let Some(tick) = countdown.tick(task.clock.now_ms()) else {
            continue;
        };
        let disable_bidding = tick.disable_bidding;
        task.events.emit(SessionEvent::Countdown(tick));
        if disable_bidding {
            tracing::info!(auction_id = %task.auction_id, "auction ended; bidding disabled");
            task.events.emit(SessionEvent::BiddingDisabled {
                auction_id: task.auction_id.clone(),
            });
        }
    }
}

async fn run_chat_feed(
    chat: Arc<ChatAppender>,
    connector: Arc<dyn FeedConnector<ChatMessage>>,
    auction_id: String,
    degraded_after_failures: u32,
    tick_interval: Duration,
    cancel: CancellationToken,
) {
    let mut feed = feed::subscribe(
        connector,
        auction_id.clone(),
        degraded_after_failures,
        cancel.clone(),
    );
    let mut expiry = tokio::time::interval(tick_interval);
    expiry.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut history_loaded = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = expiry.tick() => {
                chat.expire_pending();
            }
            event = feed.next() => match event {
                None => return,
                Some(FeedEvent::Item(message)) => {
                    chat.receive(message);
                }
                Some(FeedEvent::Status(transition)) => {
                    let load = transition.state == FeedConnectionState::Live
                        || (!history_loaded && transition.state == FeedConnectionState::Degraded);
                    if load {
                        match chat.load_history().await {
                            Ok(inserted) => {
                                history_loaded = true;
                                tracing::debug!(%auction_id, inserted, "chat history merged");
                            }
                            Err(error) => {
                                tracing::warn!(%auction_id, %error, "chat history read failed");
                            }
                        }
                    }
                }
            }
        }
    }
}
