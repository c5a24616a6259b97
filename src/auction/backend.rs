use crate::auction::types::{AuctionSnapshot, ChatMessage};
use crate::error::AppError;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BidIntent {
    pub auction_id: String,
    pub bidder_id: String,
    pub amount: i64,
    pub client_nonce: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BidDecision {
    pub accepted: bool,
    pub new_price: Option<i64>,
    pub new_bid_count: Option<u64>,
    pub reason: Option<String>,
    pub server_timestamp: Option<i64>,
}

impl BidDecision {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: Some(reason.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    pub auction_id: String,
    pub buyer_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseDecision {
    pub accepted: bool,
    pub reason: Option<String>,
    pub server_timestamp: Option<i64>,
}

impl PurchaseDecision {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: Some(reason.into()),
            server_timestamp: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatDraft {
    pub auction_id: String,
    pub sender_id: String,
    pub sender_label: String,
    pub body: String,
    pub client_nonce: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteUpdate {
    pub user_id: String,
    pub auction_id: String,
    pub is_favorite: bool,
}

pub type FeedItemStream<T> = BoxStream<'static, Result<T, AppError>>;

/// The only component allowed to change price, bid count and status.
pub trait LedgerAuthority: Send + Sync {
    fn place_bid<'a>(&'a self, intent: &'a BidIntent) -> BoxFuture<'a, Result<BidDecision, AppError>>;

    fn buy_now<'a>(
        &'a self,
        request: &'a PurchaseRequest,
    ) -> BoxFuture<'a, Result<PurchaseDecision, AppError>>;
}

pub trait AuctionReader: Send + Sync {
    fn fetch_auction<'a>(&'a self, auction_id: &'a str)
        -> BoxFuture<'a, Result<AuctionSnapshot, AppError>>;

    fn fetch_messages<'a>(
        &'a self,
        auction_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ChatMessage>, AppError>>;
}

/// Advisory only; never used to accept or reject a bid.
pub trait BalanceProvider: Send + Sync {
    fn get_balance<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<i64, AppError>>;
}

pub trait FavoriteStore: Send + Sync {
    fn is_favorite<'a>(
        &'a self,
        user_id: &'a str,
        auction_id: &'a str,
    ) -> BoxFuture<'a, Result<bool, AppError>>;

    fn set_favorite<'a>(&'a self, update: &'a FavoriteUpdate) -> BoxFuture<'a, Result<(), AppError>>;
}

pub trait ChatStore: Send + Sync {
    fn post_message<'a>(&'a self, draft: &'a ChatDraft) -> BoxFuture<'a, Result<(), AppError>>;
}

/// Opens one push connection for an auction; the returned stream ends when the transport drops.
pub trait FeedConnector<T>: Send + Sync {
    fn connect<'a>(&'a self, auction_id: &'a str) -> BoxFuture<'a, Result<FeedItemStream<T>, AppError>>;
}
