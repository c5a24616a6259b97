use crate::auction::backend::{
    AuctionReader, BalanceProvider, BidDecision, BidIntent, ChatDraft, ChatStore, FavoriteStore,
    FavoriteUpdate, FeedConnector, FeedItemStream, LedgerAuthority, PurchaseDecision,
    PurchaseRequest,
};
use crate::auction::types::{
    parse_chat_payload, parse_patch_payload, AuctionPatch, AuctionSnapshot, AuctionSnapshotWire,
    ChatMessage, ChatMessageWire, EngineConfig,
};
use crate::error::AppError;
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};

const CONNECT_TIMEOUT_MS: u64 = 5_000;
const READ_TIMEOUT_MS: u64 = 10_000;

pub type AuctionWsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Ids are spliced into paths; anything outside this set is refused up front.
pub fn validate_id(key: &str, value: &str) -> Result<String, AppError> {
    let value = value.trim();
    if value.is_empty()
        || value.len() > 128
        || !value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
    {
        return Err(AppError::InvalidArgument(format!(
            "{key} must be 1-128 characters of [A-Za-z0-9_-]"
        )));
    }
    Ok(value.to_string())
}

fn auction_endpoint(api_base_url: &str, auction_id: &str) -> String {
    format!("{api_base_url}/auctions/{auction_id}")
}

fn messages_endpoint(api_base_url: &str, auction_id: &str) -> String {
    format!("{api_base_url}/auctions/{auction_id}/messages")
}

fn place_bid_endpoint(api_base_url: &str) -> String {
    format!("{api_base_url}/rpc/place_bid")
}

fn buy_now_endpoint(api_base_url: &str) -> String {
    format!("{api_base_url}/rpc/buy_now")
}

fn balance_endpoint(api_base_url: &str, user_id: &str) -> String {
    format!("{api_base_url}/profiles/{user_id}/balance")
}

fn favorites_endpoint(api_base_url: &str) -> String {
    format!("{api_base_url}/favorites")
}

fn favorite_lookup_endpoint(api_base_url: &str, user_id: &str, auction_id: &str) -> String {
    format!("{api_base_url}/favorites/{user_id}/{auction_id}")
}

fn patch_feed_endpoint(realtime_base_url: &str, auction_id: &str) -> String {
    format!("{realtime_base_url}/auctions/{auction_id}")
}

fn chat_feed_endpoint(realtime_base_url: &str, auction_id: &str) -> String {
    format!("{realtime_base_url}/auctions/{auction_id}/messages")
}

/// Failure before the request left the host; safe to retry without a refresh.
fn read_error(error: reqwest::Error) -> AppError {
    if error.is_connect() || error.is_timeout() {
        AppError::NetworkUnavailable(error.to_string())
    } else {
        AppError::Reqwest(error)
    }
}

/// Anything past connect may have reached the ledger, so the outcome is unknown.
fn ledger_error(error: reqwest::Error) -> AppError {
    if error.is_connect() {
        AppError::NetworkUnavailable(error.to_string())
    } else {
        tracing::warn!(%error, "ledger call failed after dispatch");
        AppError::AuthorityUnreachable
    }
}

#[derive(Debug, Deserialize)]
struct RejectionWire {
    reason: Option<String>,
    message: Option<String>,
}

impl RejectionWire {
    fn into_reason(self, status: StatusCode) -> String {
        self.reason
            .or(self.message)
            .filter(|reason| !reason.trim().is_empty())
            .unwrap_or_else(|| format!("rejected with status {status}"))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceWire {
    balance: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FavoriteLookupWire {
    is_favorite: bool,
}

/// A 4xx from the ledger is a decision; a 5xx is not.
async fn read_ledger_response<T: DeserializeOwned>(
    response: Response,
    rejected: impl FnOnce(String) -> T,
) -> Result<T, AppError> {
    let status = response.status();
    if status.is_client_error() {
        let reason = match response.json::<RejectionWire>().await {
            Ok(wire) => wire.into_reason(status),
            Err(_) => format!("rejected with status {status}"),
        };
        return Ok(rejected(reason));
    }
    if !status.is_success() {
        tracing::warn!(%status, "ledger answered without a decision");
        return Err(AppError::AuthorityUnreachable);
    }
    response.json::<T>().await.map_err(ledger_error)
}

pub struct HttpBackend {
    client: Client,
    api_base_url: String,
}

impl HttpBackend {
    pub fn new(config: &EngineConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(CONNECT_TIMEOUT_MS))
            .build()?;
        Ok(Self {
            client,
            api_base_url: config.api_base_url.clone(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, endpoint: String) -> Result<T, AppError> {
        let response = self
            .client
            .get(endpoint)
            .timeout(Duration::from_millis(READ_TIMEOUT_MS))
            .send()
            .await
            .map_err(read_error)?
            .error_for_status()?;
        response.json::<T>().await.map_err(read_error)
    }
}

impl LedgerAuthority for HttpBackend {
    fn place_bid<'a>(&'a self, intent: &'a BidIntent) -> BoxFuture<'a, Result<BidDecision, AppError>> {
        Box::pin(async move {
            let response = self
                .client
                .post(place_bid_endpoint(&self.api_base_url))
                .json(intent)
                .send()
                .await
                .map_err(ledger_error)?;
            read_ledger_response(response, |reason| BidDecision::rejected(reason)).await
        })
    }

    fn buy_now<'a>(
        &'a self,
        request: &'a PurchaseRequest,
    ) -> BoxFuture<'a, Result<PurchaseDecision, AppError>> {
        Box::pin(async move {
            let response = self
                .client
                .post(buy_now_endpoint(&self.api_base_url))
                .json(request)
                .send()
                .await
                .map_err(ledger_error)?;
            read_ledger_response(response, |reason| PurchaseDecision::rejected(reason)).await
        })
    }
}

impl AuctionReader for HttpBackend {
    fn fetch_auction<'a>(
        &'a self,
        auction_id: &'a str,
    ) -> BoxFuture<'a, Result<AuctionSnapshot, AppError>> {
        Box::pin(async move {
            let wire: AuctionSnapshotWire = self
                .get_json(auction_endpoint(&self.api_base_url, auction_id))
                .await?;
            wire.try_into()
        })
    }

    fn fetch_messages<'a>(
        &'a self,
        auction_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ChatMessage>, AppError>> {
        Box::pin(async move {
            let payload: Vec<ChatMessageWire> = self
                .get_json(messages_endpoint(&self.api_base_url, auction_id))
                .await?;

            let mut messages = Vec::with_capacity(payload.len());
            for wire in payload {
                messages.push(wire.try_into()?);
            }
            Ok(messages)
        })
    }
}

impl BalanceProvider for HttpBackend {
    fn get_balance<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<i64, AppError>> {
        Box::pin(async move {
            let wire: BalanceWire = self
                .get_json(balance_endpoint(&self.api_base_url, user_id))
                .await?;
            Ok(wire.balance)
        })
    }
}

impl FavoriteStore for HttpBackend {
    fn is_favorite<'a>(
        &'a self,
        user_id: &'a str,
        auction_id: &'a str,
    ) -> BoxFuture<'a, Result<bool, AppError>> {
        Box::pin(async move {
            let endpoint = favorite_lookup_endpoint(&self.api_base_url, user_id, auction_id);
            let response = self
                .client
                .get(endpoint)
                .timeout(Duration::from_millis(READ_TIMEOUT_MS))
                .send()
                .await
                .map_err(read_error)?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(false);
            }
            let wire = response
                .error_for_status()?
                .json::<FavoriteLookupWire>()
                .await
                .map_err(read_error)?;
            Ok(wire.is_favorite)
        })
    }

    fn set_favorite<'a>(&'a self, update: &'a FavoriteUpdate) -> BoxFuture<'a, Result<(), AppError>> {
        Box::pin(async move {
            self.client
                .put(favorites_endpoint(&self.api_base_url))
                .timeout(Duration::from_millis(READ_TIMEOUT_MS))
                .json(update)
                .send()
                .await
                .map_err(read_error)?
                .error_for_status()?;
            Ok(())
        })
    }
}

impl ChatStore for HttpBackend {
    fn post_message<'a>(&'a self, draft: &'a ChatDraft) -> BoxFuture<'a, Result<(), AppError>> {
        Box::pin(async move {
            self.client
                .post(messages_endpoint(&self.api_base_url, &draft.auction_id))
                .timeout(Duration::from_millis(READ_TIMEOUT_MS))
                .json(draft)
                .send()
                .await
                .map_err(read_error)?
                .error_for_status()?;
            Ok(())
        })
    }
}

pub struct WebSocketFeed {
    realtime_base_url: String,
}

impl WebSocketFeed {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            realtime_base_url: config.realtime_base_url.clone(),
        }
    }
}

async fn connect_feed(endpoint: String) -> Result<AuctionWsStream, AppError> {
    let ws_config = WebSocketConfig {
        max_message_size: Some(4 << 20),
        max_frame_size: Some(1 << 20),
        ..Default::default()
    };

    let (stream, _) = connect_async_with_config(endpoint, Some(ws_config), true).await?;
    Ok(stream)
}

/// Close frames end the stream so the subscriber reconnects; control frames are skipped.
fn decode_frames<T: Send + 'static>(
    stream: AuctionWsStream,
    parse: fn(&mut [u8]) -> Result<T, AppError>,
) -> FeedItemStream<T> {
    stream
        .take_while(|frame| std::future::ready(!matches!(frame, Ok(Message::Close(_)))))
        .filter_map(move |frame| {
            let decoded = match frame {
                Ok(Message::Text(text_payload)) => {
                    let mut owned_payload = text_payload.into_bytes();
                    Some(parse(owned_payload.as_mut_slice()))
                }
                Ok(Message::Binary(mut binary_payload)) => {
                    Some(parse(binary_payload.as_mut_slice()))
                }
                Ok(_) => None,
                Err(error) => Some(Err(AppError::from(error))),
            };
            std::future::ready(decoded)
        })
        .boxed()
}

impl FeedConnector<AuctionPatch> for WebSocketFeed {
    fn connect<'a>(
        &'a self,
        auction_id: &'a str,
    ) -> BoxFuture<'a, Result<FeedItemStream<AuctionPatch>, AppError>> {
        Box::pin(async move {
            let stream =
                connect_feed(patch_feed_endpoint(&self.realtime_base_url, auction_id)).await?;
            Ok(decode_frames(stream, parse_patch_payload))
        })
    }
}

impl FeedConnector<ChatMessage> for WebSocketFeed {
    fn connect<'a>(
        &'a self,
        auction_id: &'a str,
    ) -> BoxFuture<'a, Result<FeedItemStream<ChatMessage>, AppError>> {
        Box::pin(async move {
            let stream =
                connect_feed(chat_feed_endpoint(&self.realtime_base_url, auction_id)).await?;
            Ok(decode_frames(stream, parse_chat_payload))
        })
    }
}
