use crate::auction::backend::{FeedConnector, FeedItemStream};
use crate::auction::types::FeedConnectionState;
use futures_util::stream::{self, BoxStream};
use futures_util::{Stream, StreamExt};
use rand::Rng;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const RECONNECT_BASE_DELAY_MS: u64 = 200;
const RECONNECT_MAX_DELAY_MS: u64 = 5_000;
const RECONNECT_JITTER_MS: u64 = 250;
const STATUS_ERROR_THROTTLE_MS: u64 = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedTransition {
    pub state: FeedConnectionState,
    pub consecutive_failures: u32,
    pub reason: Option<String>,
    /// Set on the first `Live` after a failure; missed patches must be recovered by a point read.
    pub resumed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent<T> {
    Item(T),
    Status(FeedTransition),
}

/// Lazily connected push stream for one auction. Nothing is opened until it is first polled.
pub struct FeedSubscription<T> {
    inner: BoxStream<'static, FeedEvent<T>>,
    cancel: CancellationToken,
}

impl<T> FeedSubscription<T> {
    pub fn unsubscribe(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl<T> Stream for FeedSubscription<T> {
    type Item = FeedEvent<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl<T> Drop for FeedSubscription<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub fn subscribe<T: Send + 'static>(
    connector: Arc<dyn FeedConnector<T>>,
    auction_id: String,
    degraded_after_failures: u32,
    cancel: CancellationToken,
) -> FeedSubscription<T> {
    let cursor = FeedCursor {
        connector,
        auction_id,
        degraded_after_failures: degraded_after_failures.max(1),
        cancel: cancel.clone(),
        live: None,
        consecutive_failures: 0,
        had_failure: false,
        started: false,
    };

    let inner = stream::unfold(cursor, |mut cursor| async move {
        let event = cursor.next_event().await?;
        Some((event, cursor))
    })
    .boxed();

    FeedSubscription { inner, cancel }
}

struct FeedCursor<T> {
    connector: Arc<dyn FeedConnector<T>>,
    auction_id: String,
    degraded_after_failures: u32,
    cancel: CancellationToken,
    live: Option<FeedItemStream<T>>,
    consecutive_failures: u32,
    had_failure: bool,
    started: bool,
}

impl<T: Send + 'static> FeedCursor<T> {
    async fn next_event(&mut self) -> Option<FeedEvent<T>> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }

            if let Some(live) = self.live.as_mut() {
                let next = tokio::select! {
                    _ = self.cancel.cancelled() => return None,
                    next = live.next() => next,
                };
                match next {
                    Some(Ok(item)) => return Some(FeedEvent::Item(item)),
                    Some(Err(error)) if error.is_decode_error() => {
                        tracing::warn!(
                            auction_id = %self.auction_id,
                            %error,
                            "skipping undecodable feed frame"
                        );
                        continue;
                    }
                    Some(Err(error)) => {
                        self.live = None;
                        return Some(self.record_failure(format!("feed error: {error}")));
                    }
                    None => {
                        self.live = None;
                        return Some(self.record_failure("feed closed".to_string()));
                    }
                }
            }

            if !self.started {
                self.started = true;
                return Some(FeedEvent::Status(FeedTransition {
                    state: FeedConnectionState::Connecting,
                    consecutive_failures: 0,
                    reason: Some("opening feed".to_string()),
                    resumed: false,
                }));
            }

            if self.consecutive_failures > 0 {
                let delay = reconnect_delay(self.consecutive_failures);
                tokio::select! {
                    _ = self.cancel.cancelled() => return None,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let connected = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                connected = self.connector.connect(&self.auction_id) => connected,
            };
            match connected {
                Ok(live) => {
                    let resumed = std::mem::take(&mut self.had_failure);
                    self.live = Some(live);
                    self.consecutive_failures = 0;
                    let reason = if resumed {
                        "feed reconnected"
                    } else {
                        "feed connected"
                    };
                    return Some(FeedEvent::Status(FeedTransition {
                        state: FeedConnectionState::Live,
                        consecutive_failures: 0,
                        reason: Some(reason.to_string()),
                        resumed,
                    }));
                }
                Err(error) => {
                    return Some(self.record_failure(format!("feed connect error: {error}")));
                }
            }
        }
    }

    fn record_failure(&mut self, reason: String) -> FeedEvent<T> {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.had_failure = true;
        let state = if self.consecutive_failures >= self.degraded_after_failures {
            FeedConnectionState::Degraded
        } else {
            FeedConnectionState::Reconnecting
        };
        tracing::warn!(
            auction_id = %self.auction_id,
            consecutive_failures = self.consecutive_failures,
            %reason,
            "auction feed interrupted"
        );
        FeedEvent::Status(FeedTransition {
            state,
            consecutive_failures: self.consecutive_failures,
            reason: Some(reason),
            resumed: false,
        })
    }
}

pub fn reconnect_delay(attempt: u32) -> Duration {
    let exponent = attempt.min(6);
    let base_ms = RECONNECT_BASE_DELAY_MS.saturating_mul(1_u64 << exponent);
    let jitter_ms = rand::thread_rng().gen_range(0..RECONNECT_JITTER_MS);
    Duration::from_millis((base_ms + jitter_ms).min(RECONNECT_MAX_DELAY_MS))
}

/// Collapses repeated failure statuses so a flapping feed does not flood listeners.
#[derive(Debug, Default)]
pub struct StatusPublishThrottle {
    last_state: Option<FeedConnectionState>,
    last_reason: Option<String>,
    last_emit: Option<Instant>,
}

impl StatusPublishThrottle {
    pub fn allow(&mut self, state: FeedConnectionState, reason: &Option<String>) -> bool {
        let now = Instant::now();
        let should_throttle = matches!(
            state,
            FeedConnectionState::Reconnecting | FeedConnectionState::Degraded
        );

        if should_throttle
            && self.last_state == Some(state)
            && self.last_reason == *reason
            && self
                .last_emit
                .map(|instant| {
                    now.duration_since(instant) < Duration::from_millis(STATUS_ERROR_THROTTLE_MS)
                })
                .unwrap_or(false)
        {
            return false;
        }

        self.last_state = Some(state);
        self.last_reason = reason.clone();
        self.last_emit = Some(now);
        true
    }
}
