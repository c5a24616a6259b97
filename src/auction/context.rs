use crate::auction::backend::{
    AuctionReader, BalanceProvider, ChatStore, FavoriteStore, FeedConnector, LedgerAuthority,
};
use crate::auction::clock::{SystemClock, WallClock};
use crate::auction::remote::{HttpBackend, WebSocketFeed};
use crate::auction::types::{AuctionPatch, ChatMessage, EngineConfig, Viewer};
use crate::error::AppError;
use std::sync::Arc;
use std::time::Duration;

/// Everything a session needs from the outside world, passed in explicitly.
#[derive(Clone)]
pub struct EngineContext {
    pub config: EngineConfig,
    pub viewer: Option<Viewer>,
    pub clock: Arc<dyn WallClock>,
    pub ledger: Arc<dyn LedgerAuthority>,
    pub reader: Arc<dyn AuctionReader>,
    pub balances: Arc<dyn BalanceProvider>,
    pub favorites: Arc<dyn FavoriteStore>,
    pub chat_store: Arc<dyn ChatStore>,
    pub patch_feed: Arc<dyn FeedConnector<AuctionPatch>>,
    pub chat_feed: Arc<dyn FeedConnector<ChatMessage>>,
}

impl EngineContext {
    pub fn remote(config: EngineConfig, viewer: Option<Viewer>) -> Result<Self, AppError> {
        let http = Arc::new(HttpBackend::new(&config)?);
        let feeds = Arc::new(WebSocketFeed::new(&config));

        Ok(Self {
            viewer,
            clock: Arc::new(SystemClock),
            ledger: http.clone(),
            reader: http.clone(),
            balances: http.clone(),
            favorites: http.clone(),
            chat_store: http,
            patch_feed: feeds.clone(),
            chat_feed: feeds,
            config,
        })
    }

    pub fn with_viewer(&self, viewer: Option<Viewer>) -> Self {
        Self {
            viewer,
            ..self.clone()
        }
    }

    pub fn authority_timeout(&self) -> Duration {
        Duration::from_millis(self.config.authority_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.config.tick_interval_ms)
    }

    pub fn favorite_debounce(&self) -> Duration {
        Duration::from_millis(self.config.favorite_debounce_ms)
    }
}
