use crate::auction::bidding::SubmissionState;
use crate::auction::engine::AuctionSessionEngine;
use crate::auction::events::SessionEvent;
use crate::auction::remote::validate_id;
use crate::auction::types::{AuctionSession, FavoriteState, FeedStatusSnapshot, Viewer};
use crate::commands::AuctionSessionArgs;
use crate::error::AppError;
use crate::state::EngineState;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionSessionView {
    pub auction_id: String,
    pub session: Option<AuctionSession>,
    pub feed: FeedStatusSnapshot,
    pub stale: bool,
    pub submission: SubmissionState,
    pub can_submit: bool,
    pub favorite: Option<FavoriteState>,
}

impl AuctionSessionView {
    pub async fn from_engine(engine: &AuctionSessionEngine) -> Self {
        let feed = engine.feed_status().await;
        Self {
            auction_id: engine.auction_id().to_string(),
            session: engine.session(),
            stale: feed.is_stale(),
            feed,
            submission: engine.submission_state(),
            can_submit: engine.can_submit(),
            favorite: engine.favorite_state(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCloseResult {
    pub auction_id: String,
    pub closed: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerChangeResult {
    pub signed_in: bool,
    pub closed_sessions: usize,
}

pub async fn open_auction_session(
    state: &EngineState,
    args: AuctionSessionArgs,
) -> Result<AuctionSessionView, AppError> {
    let auction_id = validate_id("auctionId", &args.auction_id)?;

    if let Some(existing) = state.take_session(&auction_id).await {
        existing.close().await;
    }

    let context = state.current_context().await;
    let engine = Arc::new(AuctionSessionEngine::open(context, &auction_id).await?);
    let view = AuctionSessionView::from_engine(&engine).await;

    let replaced = state.sessions.lock().await.insert(auction_id, engine);
    if let Some(raced) = replaced {
        raced.close().await;
    }
    Ok(view)
}

pub async fn close_auction_session(
    state: &EngineState,
    args: AuctionSessionArgs,
) -> Result<SessionCloseResult, AppError> {
    let auction_id = validate_id("auctionId", &args.auction_id)?;
    let closed = match state.take_session(&auction_id).await {
        Some(engine) => {
            engine.close().await;
            true
        }
        None => false,
    };
    Ok(SessionCloseResult { auction_id, closed })
}

pub async fn auction_session_status(
    state: &EngineState,
    args: AuctionSessionArgs,
) -> Result<AuctionSessionView, AppError> {
    let engine = state.session(&args.auction_id).await?;
    Ok(AuctionSessionView::from_engine(&engine).await)
}

pub async fn auction_session_events(
    state: &EngineState,
    args: AuctionSessionArgs,
) -> Result<broadcast::Receiver<SessionEvent>, AppError> {
    let engine = state.session(&args.auction_id).await?;
    Ok(engine.subscribe())
}

/// Sessions are bound to the viewer that opened them, so switching identity closes them all.
pub async fn set_viewer(
    state: &EngineState,
    viewer: Option<Viewer>,
) -> Result<ViewerChangeResult, AppError> {
    if let Some(viewer) = viewer.as_ref() {
        validate_id("userId", &viewer.user_id)?;
    }

    let signed_in = viewer.is_some();
    {
        let mut context = state.context.write().await;
        *context = Arc::new(context.with_viewer(viewer));
    }

    let sessions = state.take_all_sessions().await;
    let closed_sessions = sessions.len();
    for engine in sessions {
        engine.close().await;
    }
    Ok(ViewerChangeResult {
        signed_in,
        closed_sessions,
    })
}
