use crate::error::AppError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BID_INCREMENT: i64 = 50;
pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:54321";
pub const DEFAULT_REALTIME_BASE_URL: &str = "ws://127.0.0.1:54321/realtime";
pub const DEFAULT_ENDING_SOON_THRESHOLD_MS: i64 = 60_000;
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_AUTHORITY_TIMEOUT_MS: u64 = 8_000;
pub const DEFAULT_DEGRADED_AFTER_FAILURES: u32 = 3;
pub const DEFAULT_MAX_BUFFERED_PATCHES: usize = 1_024;
pub const DEFAULT_CHAT_CONFIRM_TIMEOUT_MS: i64 = 10_000;
pub const DEFAULT_MAX_CHAT_BODY_CHARS: usize = 1_000;
pub const DEFAULT_FAVORITE_DEBOUNCE_MS: u64 = 400;
pub const MIN_ENDING_SOON_THRESHOLD_MS: i64 = 1_000;
pub const MAX_ENDING_SOON_THRESHOLD_MS: i64 = 3_600_000;
pub const MIN_TICK_INTERVAL_MS: u64 = 100;
pub const MAX_TICK_INTERVAL_MS: u64 = 10_000;
pub const MIN_AUTHORITY_TIMEOUT_MS: u64 = 1_000;
pub const MAX_AUTHORITY_TIMEOUT_MS: u64 = 60_000;
pub const MIN_DEGRADED_AFTER_FAILURES: u32 = 1;
pub const MAX_DEGRADED_AFTER_FAILURES: u32 = 50;
pub const MIN_BUFFERED_PATCHES: usize = 16;
pub const MAX_BUFFERED_PATCHES: usize = 65_536;
pub const MIN_CHAT_CONFIRM_TIMEOUT_MS: i64 = 1_000;
pub const MAX_CHAT_CONFIRM_TIMEOUT_MS: i64 = 120_000;
pub const MIN_CHAT_BODY_CHARS: usize = 1;
pub const MAX_CHAT_BODY_CHARS: usize = 10_000;
pub const MIN_FAVORITE_DEBOUNCE_MS: u64 = 50;
pub const MAX_FAVORITE_DEBOUNCE_MS: u64 = 5_000;

const API_BASE_URL_ENV: &str = "AUCTION_API_BASE_URL";
const REALTIME_BASE_URL_ENV: &str = "AUCTION_REALTIME_URL";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AuctionStatus {
    Draft,
    Active,
    Ended,
}

impl AuctionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Ended => "ended",
        }
    }

    pub fn parse_str(value: &str) -> Result<Self, AppError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "active" => Ok(Self::Active),
            // Storage keeps the sale outcome; for the live view they are all terminal.
            "ended" | "purchased" | "sold" => Ok(Self::Ended),
            other => Err(AppError::InvalidArgument(format!(
                "unknown auction status '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuctionSession {
    pub auction_id: String,
    pub seller_id: String,
    pub current_price: i64,
    pub bid_increment: i64,
    pub bid_count: u64,
    pub buy_now_price: Option<i64>,
    pub end_time_ms: i64,
    pub status: AuctionStatus,
    pub last_bidder_id: Option<String>,
    pub last_applied_server_ts: i64,
}

impl AuctionSession {
    pub fn minimum_bid(&self) -> i64 {
        self.current_price.saturating_add(self.bid_increment)
    }
}

/// Partial, timestamped update to one auction. `None` means "field unchanged".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuctionPatch {
    pub auction_id: String,
    pub server_ts: i64,
    pub seller_id: Option<String>,
    pub current_price: Option<i64>,
    pub bid_increment: Option<i64>,
    pub bid_count: Option<u64>,
    pub buy_now_price: Option<i64>,
    pub end_time_ms: Option<i64>,
    pub status: Option<AuctionStatus>,
    pub last_bidder_id: Option<String>,
}

impl AuctionPatch {
    pub fn new(auction_id: impl Into<String>, server_ts: i64) -> Self {
        Self {
            auction_id: auction_id.into(),
            server_ts,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.seller_id.is_none()
            && self.current_price.is_none()
            && self.bid_increment.is_none()
            && self.bid_count.is_none()
            && self.buy_now_price.is_none()
            && self.end_time_ms.is_none()
            && self.status.is_none()
            && self.last_bidder_id.is_none()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionPatchWire {
    pub auction_id: String,
    pub server_timestamp: i64,
    pub seller_id: Option<String>,
    pub current_price: Option<i64>,
    pub bid_increment: Option<i64>,
    pub bid_count: Option<u64>,
    pub buy_now_price: Option<i64>,
    pub end_time: Option<i64>,
    pub status: Option<String>,
    pub last_bidder_id: Option<String>,
}

impl TryFrom<AuctionPatchWire> for AuctionPatch {
    type Error = AppError;

    fn try_from(value: AuctionPatchWire) -> Result<Self, Self::Error> {
        if value.auction_id.trim().is_empty() {
            return Err(AppError::InvalidArgument(
                "patch auctionId must be non-empty".to_string(),
            ));
        }
        if value.current_price.is_some_and(|price| price < 0)
            || value.bid_increment.is_some_and(|increment| increment <= 0)
            || value.buy_now_price.is_some_and(|price| price < 0)
        {
            return Err(AppError::InvalidArgument(
                "patch amounts must be non-negative and bidIncrement positive".to_string(),
            ));
        }

        let status = value
            .status
            .as_deref()
            .map(AuctionStatus::parse_str)
            .transpose()?;

        Ok(Self {
            auction_id: value.auction_id,
            server_ts: value.server_timestamp,
            seller_id: value.seller_id,
            current_price: value.current_price,
            bid_increment: value.bid_increment,
            bid_count: value.bid_count,
            buy_now_price: value.buy_now_price,
            end_time_ms: value.end_time,
            status,
            last_bidder_id: value.last_bidder_id,
        })
    }
}

pub fn parse_patch_payload(payload: &mut [u8]) -> Result<AuctionPatch, AppError> {
    let wire: AuctionPatchWire = simd_json::serde::from_slice(payload)?;
    wire.try_into()
}

/// Point-read result used to seed or resync a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuctionSnapshot {
    pub auction_id: String,
    pub seller_id: String,
    pub current_price: i64,
    pub bid_increment: i64,
    pub bid_count: u64,
    pub buy_now_price: Option<i64>,
    pub end_time_ms: i64,
    pub status: AuctionStatus,
    pub last_bidder_id: Option<String>,
    pub server_ts: i64,
}

impl AuctionSnapshot {
    pub fn into_patch(self) -> AuctionPatch {
        AuctionPatch {
            auction_id: self.auction_id,
            server_ts: self.server_ts,
            seller_id: Some(self.seller_id),
            current_price: Some(self.current_price),
            bid_increment: Some(self.bid_increment),
            bid_count: Some(self.bid_count),
            buy_now_price: self.buy_now_price,
            end_time_ms: Some(self.end_time_ms),
            status: Some(self.status),
            last_bidder_id: self.last_bidder_id,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionSnapshotWire {
    pub auction_id: String,
    pub seller_id: String,
    pub current_price: i64,
    pub bid_increment: Option<i64>,
    pub bid_count: Option<u64>,
    pub buy_now_price: Option<i64>,
    pub end_time: i64,
    pub status: String,
    pub last_bidder_id: Option<String>,
    pub server_timestamp: i64,
}

impl TryFrom<AuctionSnapshotWire> for AuctionSnapshot {
    type Error = AppError;

    fn try_from(value: AuctionSnapshotWire) -> Result<Self, Self::Error> {
        if value.current_price < 0 {
            return Err(AppError::InvalidArgument(
                "snapshot currentPrice must be non-negative".to_string(),
            ));
        }
        let bid_increment = value.bid_increment.unwrap_or(DEFAULT_BID_INCREMENT);
        if bid_increment <= 0 {
            return Err(AppError::InvalidArgument(
                "snapshot bidIncrement must be positive".to_string(),
            ));
        }

        Ok(Self {
            auction_id: value.auction_id,
            seller_id: value.seller_id,
            current_price: value.current_price,
            bid_increment,
            bid_count: value.bid_count.unwrap_or_default(),
            buy_now_price: value.buy_now_price,
            end_time_ms: value.end_time,
            status: AuctionStatus::parse_str(&value.status)?,
            last_bidder_id: value.last_bidder_id,
            server_ts: value.server_timestamp,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FeedConnectionState {
    Connecting,
    Live,
    Reconnecting,
    Degraded,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FeedStatusSnapshot {
    pub state: FeedConnectionState,
    pub auction_id: String,
    pub consecutive_failures: u32,
    pub last_applied_server_ts: Option<i64>,
    pub reason: Option<String>,
}

impl FeedStatusSnapshot {
    pub fn stopped(auction_id: String, reason: Option<String>) -> Self {
        Self {
            state: FeedConnectionState::Stopped,
            auction_id,
            consecutive_failures: 0,
            last_applied_server_ts: None,
            reason,
        }
    }

    /// The UI shows the stale-data banner for these states.
    pub fn is_stale(&self) -> bool {
        matches!(
            self.state,
            FeedConnectionState::Degraded | FeedConnectionState::Reconnecting
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryState {
    Pending,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Option<String>,
    pub auction_id: String,
    pub sender_id: String,
    pub sender_label: String,
    pub body: String,
    pub server_ts: Option<i64>,
    pub client_nonce: Option<String>,
    pub delivery_state: DeliveryState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageWire {
    pub id: String,
    pub auction_id: String,
    pub sender_id: String,
    pub sender_label: String,
    pub body: String,
    pub server_timestamp: i64,
    pub client_nonce: Option<String>,
}

impl TryFrom<ChatMessageWire> for ChatMessage {
    type Error = AppError;

    fn try_from(value: ChatMessageWire) -> Result<Self, Self::Error> {
        if value.id.trim().is_empty() {
            return Err(AppError::InvalidArgument(
                "chat message id must be non-empty".to_string(),
            ));
        }

        Ok(Self {
            id: Some(value.id),
            auction_id: value.auction_id,
            sender_id: value.sender_id,
            sender_label: value.sender_label,
            body: value.body,
            server_ts: Some(value.server_timestamp),
            client_nonce: value.client_nonce.filter(|nonce| !nonce.is_empty()),
            delivery_state: DeliveryState::Confirmed,
        })
    }
}

pub fn parse_chat_payload(payload: &mut [u8]) -> Result<ChatMessage, AppError> {
    let wire: ChatMessageWire = simd_json::serde::from_slice(payload)?;
    wire.try_into()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FavoriteDelivery {
    Confirmed,
    Pending,
    Reverting,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteState {
    pub auction_id: String,
    pub user_id: String,
    pub is_favorite: bool,
    pub delivery_state: FavoriteDelivery,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WalletBalanceSnapshot {
    pub user_id: String,
    pub amount: i64,
    pub as_of_ms: i64,
}

/// Signed-in identity the host passes in; the engine never authenticates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Viewer {
    pub user_id: String,
    pub label: String,
}

impl Viewer {
    /// Mirrors how accounts are labelled in chat: the local part of the email.
    pub fn from_email(user_id: impl Into<String>, email: &str) -> Self {
        let label = email
            .split('@')
            .next()
            .map(str::trim)
            .filter(|local| !local.is_empty())
            .unwrap_or("anonymous")
            .to_string();
        Self {
            user_id: user_id.into(),
            label,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EngineArgs {
    pub api_base_url: Option<String>,
    pub realtime_base_url: Option<String>,
    pub ending_soon_threshold_ms: Option<i64>,
    pub tick_interval_ms: Option<u64>,
    pub authority_timeout_ms: Option<u64>,
    pub degraded_after_failures: Option<u32>,
    pub max_buffered_patches: Option<usize>,
    pub chat_confirm_timeout_ms: Option<i64>,
    pub max_chat_body_chars: Option<usize>,
    pub favorite_debounce_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub api_base_url: String,
    pub realtime_base_url: String,
    pub ending_soon_threshold_ms: i64,
    pub tick_interval_ms: u64,
    pub authority_timeout_ms: u64,
    pub degraded_after_failures: u32,
    pub max_buffered_patches: usize,
    pub chat_confirm_timeout_ms: i64,
    pub max_chat_body_chars: usize,
    pub favorite_debounce_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            realtime_base_url: DEFAULT_REALTIME_BASE_URL.to_string(),
            ending_soon_threshold_ms: DEFAULT_ENDING_SOON_THRESHOLD_MS,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            authority_timeout_ms: DEFAULT_AUTHORITY_TIMEOUT_MS,
            degraded_after_failures: DEFAULT_DEGRADED_AFTER_FAILURES,
            max_buffered_patches: DEFAULT_MAX_BUFFERED_PATCHES,
            chat_confirm_timeout_ms: DEFAULT_CHAT_CONFIRM_TIMEOUT_MS,
            max_chat_body_chars: DEFAULT_MAX_CHAT_BODY_CHARS,
            favorite_debounce_ms: DEFAULT_FAVORITE_DEBOUNCE_MS,
        }
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn normalize_base_url(
    value: Option<String>,
    default: &str,
    key: &str,
    schemes: &[&str],
) -> Result<String, AppError> {
    let url = value
        .unwrap_or_else(|| default.to_string())
        .trim()
        .trim_end_matches('/')
        .to_string();

    if !schemes
        .iter()
        .any(|scheme| url.starts_with(&format!("{scheme}://")) && url.len() > scheme.len() + 3)
    {
        return Err(AppError::InvalidArgument(format!(
            "{key} must be an absolute {} url",
            schemes.join("/")
        )));
    }
    Ok(url)
}

impl EngineArgs {
    pub fn from_env() -> Self {
        Self {
            api_base_url: env_value(API_BASE_URL_ENV),
            realtime_base_url: env_value(REALTIME_BASE_URL_ENV),
            ..Self::default()
        }
    }

    pub fn normalize(self) -> Result<EngineConfig, AppError> {
        let api_base_url = normalize_base_url(
            self.api_base_url,
            DEFAULT_API_BASE_URL,
            "apiBaseUrl",
            &["http", "https"],
        )?;
        let realtime_base_url = normalize_base_url(
            self.realtime_base_url,
            DEFAULT_REALTIME_BASE_URL,
            "realtimeBaseUrl",
            &["ws", "wss"],
        )?;

        let ending_soon_threshold_ms = self
            .ending_soon_threshold_ms
            .unwrap_or(DEFAULT_ENDING_SOON_THRESHOLD_MS);
        if !(MIN_ENDING_SOON_THRESHOLD_MS..=MAX_ENDING_SOON_THRESHOLD_MS)
            .contains(&ending_soon_threshold_ms)
        {
            return Err(AppError::InvalidArgument(format!(
                "endingSoonThresholdMs must be between {MIN_ENDING_SOON_THRESHOLD_MS} and {MAX_ENDING_SOON_THRESHOLD_MS}"
            )));
        }

        let tick_interval_ms = self.tick_interval_ms.unwrap_or(DEFAULT_TICK_INTERVAL_MS);
        if !(MIN_TICK_INTERVAL_MS..=MAX_TICK_INTERVAL_MS).contains(&tick_interval_ms) {
            return Err(AppError::InvalidArgument(format!(
                "tickIntervalMs must be between {MIN_TICK_INTERVAL_MS} and {MAX_TICK_INTERVAL_MS}"
            )));
        }

        let authority_timeout_ms = self
            .authority_timeout_ms
            .unwrap_or(DEFAULT_AUTHORITY_TIMEOUT_MS);
        if !(MIN_AUTHORITY_TIMEOUT_MS..=MAX_AUTHORITY_TIMEOUT_MS).contains(&authority_timeout_ms)
        {
            return Err(AppError::InvalidArgument(format!(
                "authorityTimeoutMs must be between {MIN_AUTHORITY_TIMEOUT_MS} and {MAX_AUTHORITY_TIMEOUT_MS}"
            )));
        }

        let degraded_after_failures = self
            .degraded_after_failures
            .unwrap_or(DEFAULT_DEGRADED_AFTER_FAILURES);
        if !(MIN_DEGRADED_AFTER_FAILURES..=MAX_DEGRADED_AFTER_FAILURES)
            .contains(&degraded_after_failures)
        {
            return Err(AppError::InvalidArgument(format!(
                "degradedAfterFailures must be between {MIN_DEGRADED_AFTER_FAILURES} and {MAX_DEGRADED_AFTER_FAILURES}"
            )));
        }

        let max_buffered_patches = self
            .max_buffered_patches
            .unwrap_or(DEFAULT_MAX_BUFFERED_PATCHES);
        if !(MIN_BUFFERED_PATCHES..=MAX_BUFFERED_PATCHES).contains(&max_buffered_patches) {
            return Err(AppError::InvalidArgument(format!(
                "maxBufferedPatches must be between {MIN_BUFFERED_PATCHES} and {MAX_BUFFERED_PATCHES}"
            )));
        }

        let chat_confirm_timeout_ms = self
            .chat_confirm_timeout_ms
            .unwrap_or(DEFAULT_CHAT_CONFIRM_TIMEOUT_MS);
        if !(MIN_CHAT_CONFIRM_TIMEOUT_MS..=MAX_CHAT_CONFIRM_TIMEOUT_MS)
            .contains(&chat_confirm_timeout_ms)
        {
            return Err(AppError::InvalidArgument(format!(
                "chatConfirmTimeoutMs must be between {MIN_CHAT_CONFIRM_TIMEOUT_MS} and {MAX_CHAT_CONFIRM_TIMEOUT_MS}"
            )));
        }

        let max_chat_body_chars = self
            .max_chat_body_chars
            .unwrap_or(DEFAULT_MAX_CHAT_BODY_CHARS);
        if !(MIN_CHAT_BODY_CHARS..=MAX_CHAT_BODY_CHARS).contains(&max_chat_body_chars) {
            return Err(AppError::InvalidArgument(format!(
                "maxChatBodyChars must be between {MIN_CHAT_BODY_CHARS} and {MAX_CHAT_BODY_CHARS}"
            )));
        }

        let favorite_debounce_ms = self
            .favorite_debounce_ms
            .unwrap_or(DEFAULT_FAVORITE_DEBOUNCE_MS);
        if !(MIN_FAVORITE_DEBOUNCE_MS..=MAX_FAVORITE_DEBOUNCE_MS).contains(&favorite_debounce_ms)
        {
            return Err(AppError::InvalidArgument(format!(
                "favoriteDebounceMs must be between {MIN_FAVORITE_DEBOUNCE_MS} and {MAX_FAVORITE_DEBOUNCE_MS}"
            )));
        }

        Ok(EngineConfig {
            api_base_url,
            realtime_base_url,
            ending_soon_threshold_ms,
            tick_interval_ms,
            authority_timeout_ms,
            degraded_after_failures,
            max_buffered_patches,
            chat_confirm_timeout_ms,
            max_chat_body_chars,
            favorite_debounce_ms,
        })
    }
}
