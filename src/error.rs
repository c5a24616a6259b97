use crate::auction::types::AuctionStatus;
use serde::ser::Serializer;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationFailure {
    #[error("auction snapshot has not loaded yet")]
    SessionNotLoaded,
    #[error("amount must be a positive number")]
    InvalidAmount,
    #[error("bid must be at least {minimum}")]
    BelowMinimum { minimum: i64 },
    #[error("auction is not active ({status})")]
    AuctionNotActive { status: &'static str },
    #[error("auction has ended")]
    AuctionEnded,
    #[error("sellers cannot bid on or buy their own auction")]
    SellerCannotBid,
    #[error("auction has no buy-now price")]
    BuyNowUnavailable,
    #[error("another submission is still pending")]
    SubmissionPending,
    #[error("previous submission outcome is unknown; refresh before retrying")]
    RefreshRequired,
    #[error("sign in required")]
    SignInRequired,
    #[error("message body is empty")]
    EmptyMessage,
    #[error("message body exceeds {max} characters")]
    MessageTooLong { max: usize },
    #[error("no failed message with nonce {0}")]
    UnknownMessage(String),
}

impl ValidationFailure {
    pub fn not_active(status: AuctionStatus) -> Self {
        match status {
            AuctionStatus::Ended => Self::AuctionEnded,
            other => Self::AuctionNotActive {
                status: other.as_str(),
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationFailure),
    #[error("{0}")]
    Conflict(String),
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),
    #[error("authority unreachable; outcome unknown")]
    AuthorityUnreachable,
    #[error("session closed")]
    SessionClosed,
    #[error("unknown auction session: {0}")]
    UnknownSession(String),
    #[error("request error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("websocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("json decode error: {0}")]
    SimdJson(#[from] simd_json::Error),
}

impl AppError {
    /// True when the call may have reached the authority but no verdict came back.
    pub fn is_outcome_unknown(&self) -> bool {
        matches!(self, Self::AuthorityUnreachable | Self::SessionClosed)
    }

    /// A single bad frame; the connection that carried it is still usable.
    pub fn is_decode_error(&self) -> bool {
        matches!(self, Self::SimdJson(_) | Self::InvalidArgument(_))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(value))
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
