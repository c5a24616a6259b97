use crate::auction::backend::{AuctionReader, ChatDraft, ChatStore};
use crate::auction::clock::WallClock;
use crate::auction::events::{SessionEvent, SessionEvents};
use crate::auction::types::{ChatMessage, DeliveryState, Viewer};
use crate::error::{AppError, ValidationFailure};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatInsert {
    Inserted { index: usize },
    Confirmed { client_nonce: String },
    Duplicate,
    ForeignAuction,
    MissingId,
}

#[derive(Debug, Clone)]
struct OutboxEntry {
    message: ChatMessage,
    sent_at_ms: i64,
}

/// Append-only chat log ordered by `(server_ts, id)`, followed by the viewer's unconfirmed echoes.
#[derive(Debug)]
pub struct ChatLog {
    auction_id: String,
    confirmed: Vec<ChatMessage>,
    seen_ids: HashSet<String>,
    outbox: Vec<OutboxEntry>,
}

fn order_key(message: &ChatMessage) -> (i64, &str) {
    (
        message.server_ts.unwrap_or(i64::MAX),
        message.id.as_deref().unwrap_or_default(),
    )
}

impl ChatLog {
    pub fn new(auction_id: impl Into<String>) -> Self {
        Self {
            auction_id: auction_id.into(),
            confirmed: Vec::new(),
            seen_ids: HashSet::new(),
            outbox: Vec::new(),
        }
    }

    pub fn insert(&mut self, mut message: ChatMessage) -> ChatInsert {
        if message.auction_id != self.auction_id {
            return ChatInsert::ForeignAuction;
        }
        let Some(id) = message.id.clone() else {
            return ChatInsert::MissingId;
        };
        if !self.seen_ids.insert(id) {
            return ChatInsert::Duplicate;
        }

        let echoed_nonce = message.client_nonce.as_ref().and_then(|nonce| {
            self.outbox
                .iter()
                .position(|entry| entry.message.client_nonce.as_ref() == Some(nonce))
                .map(|position| (position, nonce.clone()))
        });
        if let Some((position, _)) = echoed_nonce {
            self.outbox.remove(position);
        }

        message.delivery_state = DeliveryState::Confirmed;
        let index = self
            .confirmed
            .partition_point(|existing| order_key(existing) <= order_key(&message));
        self.confirmed.insert(index, message);

        match echoed_nonce {
            Some((_, client_nonce)) => ChatInsert::Confirmed { client_nonce },
            None => ChatInsert::Inserted { index },
        }
    }

    pub fn push_pending(&mut self, message: ChatMessage, now_ms: i64) {
        self.outbox.push(OutboxEntry {
            message,
            sent_at_ms: now_ms,
        });
    }

    pub fn mark_failed(&mut self, client_nonce: &str) -> bool {
        match self.outbox_entry(client_nonce) {
            Some(entry) => {
                entry.message.delivery_state = DeliveryState::Failed;
                true
            }
            None => false,
        }
    }

    /// Moves a failed echo back to pending with a fresh confirmation window.
    pub fn retry(&mut self, client_nonce: &str, now_ms: i64) -> Option<ChatMessage> {
        let entry = self.outbox_entry(client_nonce)?;
        if entry.message.delivery_state != DeliveryState::Failed {
            return None;
        }
        entry.message.delivery_state = DeliveryState::Pending;
        entry.sent_at_ms = now_ms;
        Some(entry.message.clone())
    }

    /// Fails pending echoes the feed has not confirmed within `timeout_ms`. Returns their nonces.
    pub fn expire_pending(&mut self, now_ms: i64, timeout_ms: i64) -> Vec<String> {
        self.outbox
            .iter_mut()
            .filter(|entry| {
                entry.message.delivery_state == DeliveryState::Pending
                    && now_ms.saturating_sub(entry.sent_at_ms) >= timeout_ms
            })
            .filter_map(|entry| {
                entry.message.delivery_state = DeliveryState::Failed;
                entry.message.client_nonce.clone()
            })
            .collect()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.confirmed
            .iter()
            .cloned()
            .chain(self.outbox.iter().map(|entry| entry.message.clone()))
            .collect()
    }

    pub fn confirmed_len(&self) -> usize {
        self.confirmed.len()
    }

    fn outbox_entry(&mut self, client_nonce: &str) -> Option<&mut OutboxEntry> {
        self.outbox
            .iter_mut()
            .find(|entry| entry.message.client_nonce.as_deref() == Some(client_nonce))
    }
}

pub struct ChatAppenderParts {
    pub auction_id: String,
    pub viewer: Option<Viewer>,
    pub store: Arc<dyn ChatStore>,
    pub reader: Arc<dyn AuctionReader>,
    pub clock: Arc<dyn WallClock>,
    pub max_body_chars: usize,
    pub confirm_timeout_ms: i64,
    pub events: SessionEvents,
    pub cancel: CancellationToken,
}

/// Sends the viewer's messages with an optimistic echo and merges the confirmed feed.
pub struct ChatAppender {
    auction_id: String,
    viewer: Option<Viewer>,
    log: Mutex<ChatLog>,
    store: Arc<dyn ChatStore>,
    reader: Arc<dyn AuctionReader>,
    clock: Arc<dyn WallClock>,
    max_body_chars: usize,
    confirm_timeout_ms: i64,
    events: SessionEvents,
    cancel: CancellationToken,
}

impl ChatAppender {
    pub fn new(parts: ChatAppenderParts) -> Self {
        Self {
            log: Mutex::new(ChatLog::new(parts.auction_id.clone())),
            auction_id: parts.auction_id,
            viewer: parts.viewer,
            store: parts.store,
            reader: parts.reader,
            clock: parts.clock,
            max_body_chars: parts.max_body_chars,
            confirm_timeout_ms: parts.confirm_timeout_ms,
            events: parts.events,
            cancel: parts.cancel,
        }
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.log.lock().messages()
    }

    pub async fn load_history(&self) -> Result<usize, AppError> {
        let history = tokio::select! {
            _ = self.cancel.cancelled() => return Err(AppError::SessionClosed),
            history = self.reader.fetch_messages(&self.auction_id) => history?,
        };
        let inserted = {
            let mut log = self.log.lock();
            history
                .into_iter()
                .map(|message| log.insert(message))
                .filter(|outcome| {
                    matches!(
                        outcome,
                        ChatInsert::Inserted { .. } | ChatInsert::Confirmed { .. }
                    )
                })
                .count()
        };
        if inserted > 0 {
            self.publish();
        }
        Ok(inserted)
    }

    pub fn receive(&self, message: ChatMessage) -> ChatInsert {
        let outcome = self.log.lock().insert(message);
        match &outcome {
            ChatInsert::Inserted { .. } | ChatInsert::Confirmed { .. } => self.publish(),
            ChatInsert::Duplicate => {}
            ChatInsert::ForeignAuction | ChatInsert::MissingId => {
                tracing::debug!(auction_id = %self.auction_id, ?outcome, "ignoring chat message");
            }
        }
        outcome
    }

    pub fn expire_pending(&self) -> Vec<String> {
        let expired = self
            .log
            .lock()
            .expire_pending(self.clock.now_ms(), self.confirm_timeout_ms);
        if !expired.is_empty() {
            tracing::warn!(
                auction_id = %self.auction_id,
                count = expired.len(),
                "chat messages were not confirmed in time"
            );
            self.publish();
        }
        expired
    }

    pub async fn send(&self, body: &str) -> Result<ChatMessage, AppError> {
        let viewer = self
            .viewer
            .as_ref()
            .ok_or(ValidationFailure::SignInRequired)?;
        let body = body.trim();
        if body.is_empty() {
            return Err(ValidationFailure::EmptyMessage.into());
        }
        if body.chars().count() > self.max_body_chars {
            return Err(ValidationFailure::MessageTooLong {
                max: self.max_body_chars,
            }
            .into());
        }

        let draft = ChatDraft {
            auction_id: self.auction_id.clone(),
            sender_id: viewer.user_id.clone(),
            sender_label: viewer.label.clone(),
            body: body.to_string(),
            client_nonce: format!("{:032x}", rand::random::<u128>()),
        };
        let message = ChatMessage {
            id: None,
            auction_id: draft.auction_id.clone(),
            sender_id: draft.sender_id.clone(),
            sender_label: draft.sender_label.clone(),
            body: draft.body.clone(),
            server_ts: None,
            client_nonce: Some(draft.client_nonce.clone()),
            delivery_state: DeliveryState::Pending,
        };
        self.log
            .lock()
            .push_pending(message.clone(), self.clock.now_ms());
        self.publish();

        self.post(&draft).await?;
        Ok(message)
    }

    pub async fn resend(&self, client_nonce: &str) -> Result<ChatMessage, AppError> {
        let now_ms = self.clock.now_ms();
        let message = self
            .log
            .lock()
            .retry(client_nonce, now_ms)
            .ok_or_else(|| ValidationFailure::UnknownMessage(client_nonce.to_string()))?;
        self.publish();

        let draft = ChatDraft {
            auction_id: message.auction_id.clone(),
            sender_id: message.sender_id.clone(),
            sender_label: message.sender_label.clone(),
            body: message.body.clone(),
            client_nonce: client_nonce.to_string(),
        };
        self.post(&draft).await?;
        Ok(message)
    }

    async fn post(&self, draft: &ChatDraft) -> Result<(), AppError> {
        let result = tokio::select! {
            _ = self.cancel.cancelled() => Err(AppError::SessionClosed),
            result = self.store.post_message(draft) => result,
        };
        if let Err(error) = &result {
            tracing::warn!(auction_id = %self.auction_id, %error, "chat message not delivered");
            let marked = self.log.lock().mark_failed(&draft.client_nonce);
            if marked {
                self.publish();
            }
        }
        result
    }

    fn publish(&self) {
        let messages = self.log.lock().messages();
        self.events.emit(SessionEvent::ChatUpdate(messages));
    }
}
