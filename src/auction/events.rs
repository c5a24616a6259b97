use crate::auction::bidding::SubmissionState;
use crate::auction::clock::CountdownTick;
use crate::auction::store::SessionStore;
use crate::auction::types::{AuctionSession, ChatMessage, FavoriteState, FeedStatusSnapshot};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;

pub const SESSION_UPDATE_EVENT: &str = "auction_session_update";
pub const FEED_STATUS_EVENT: &str = "auction_feed_status";
pub const COUNTDOWN_EVENT: &str = "auction_countdown";
pub const BIDDING_DISABLED_EVENT: &str = "auction_bidding_disabled";
pub const SUBMISSION_EVENT: &str = "auction_submission";
pub const CHAT_UPDATE_EVENT: &str = "auction_chat_update";
pub const FAVORITE_UPDATE_EVENT: &str = "auction_favorite_update";
pub const FAVORITE_REVERTED_EVENT: &str = "auction_favorite_reverted";

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", content = "payload")]
pub enum SessionEvent {
    #[serde(rename = "auction_session_update")]
    SessionUpdate(AuctionSession),
    #[serde(rename = "auction_feed_status")]
    FeedStatus(FeedStatusSnapshot),
    #[serde(rename = "auction_countdown")]
    Countdown(CountdownTick),
    #[serde(rename = "auction_bidding_disabled", rename_all = "camelCase")]
    BiddingDisabled { auction_id: String },
    #[serde(rename = "auction_submission", rename_all = "camelCase")]
    Submission {
        auction_id: String,
        state: SubmissionState,
    },
    #[serde(rename = "auction_chat_update")]
    ChatUpdate(Vec<ChatMessage>),
    #[serde(rename = "auction_favorite_update")]
    FavoriteUpdate(FavoriteState),
    #[serde(rename = "auction_favorite_reverted", rename_all = "camelCase")]
    FavoriteReverted { auction_id: String, reason: String },
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionUpdate(_) => SESSION_UPDATE_EVENT,
            Self::FeedStatus(_) => FEED_STATUS_EVENT,
            Self::Countdown(_) => COUNTDOWN_EVENT,
            Self::BiddingDisabled { .. } => BIDDING_DISABLED_EVENT,
            Self::Submission { .. } => SUBMISSION_EVENT,
            Self::ChatUpdate(_) => CHAT_UPDATE_EVENT,
            Self::FavoriteUpdate(_) => FAVORITE_UPDATE_EVENT,
            Self::FavoriteReverted { .. } => FAVORITE_REVERTED_EVENT,
        }
    }
}

/// Fan-out of one session's events to however many listeners the host attached.
#[derive(Debug, Clone)]
pub struct SessionEvents {
    sender: broadcast::Sender<SessionEvent>,
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionEvents {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: SessionEvent) {
        let name = event.name();
        if self.sender.send(event).is_err() {
            tracing::trace!(event = name, "no listeners for session event");
        }
    }

    pub fn publish_session(&self, store: &Mutex<SessionStore>) {
        let update = store.lock().drain_session_update();
        if let Some(session) = update {
            self.emit(SessionEvent::SessionUpdate(session));
        }
    }
}
