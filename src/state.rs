use crate::auction::context::EngineContext;
use crate::auction::engine::AuctionSessionEngine;
use crate::auction::remote::validate_id;
use crate::auction::types::{EngineArgs, Viewer};
use crate::error::AppError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};

pub struct EngineState {
    pub started_at: Instant,
    pub context: RwLock<Arc<EngineContext>>,
    pub sessions: Mutex<HashMap<String, Arc<AuctionSessionEngine>>>,
}

impl EngineState {
    pub fn new(context: Arc<EngineContext>) -> Self {
        Self {
            started_at: Instant::now(),
            context: RwLock::new(context),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_env(viewer: Option<Viewer>) -> Result<Self, AppError> {
        let config = EngineArgs::from_env().normalize()?;
        Ok(Self::new(Arc::new(EngineContext::remote(config, viewer)?)))
    }

    pub async fn current_context(&self) -> Arc<EngineContext> {
        self.context.read().await.clone()
    }

    pub async fn session(&self, auction_id: &str) -> Result<Arc<AuctionSessionEngine>, AppError> {
        let auction_id = validate_id("auctionId", auction_id)?;
        self.sessions
            .lock()
            .await
            .get(&auction_id)
            .cloned()
            .ok_or(AppError::UnknownSession(auction_id))
    }

    pub async fn take_session(&self, auction_id: &str) -> Option<Arc<AuctionSessionEngine>> {
        self.sessions.lock().await.remove(auction_id)
    }

    pub async fn take_all_sessions(&self) -> Vec<Arc<AuctionSessionEngine>> {
        self.sessions
            .lock()
            .await
            .drain()
            .map(|(_, engine)| engine)
            .collect()
    }
}
