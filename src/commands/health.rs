use crate::auction::types::FeedConnectionState;
use crate::{error::AppError, state::EngineState};
use serde::Serialize;
use std::time::Instant;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_ms: u128,
    pub open_sessions: usize,
    pub live_feeds: usize,
}

pub fn build_health_response(
    started_at: Instant,
    feeds: &[FeedConnectionState],
) -> HealthResponse {
    let live_feeds = feeds
        .iter()
        .filter(|state| **state == FeedConnectionState::Live)
        .count();
    let status = if live_feeds == feeds.len() {
        "ok"
    } else {
        "degraded"
    };

    HealthResponse {
        status,
        uptime_ms: started_at.elapsed().as_millis(),
        open_sessions: feeds.len(),
        live_feeds,
    }
}

pub async fn health(state: &EngineState) -> Result<HealthResponse, AppError> {
    let engines: Vec<_> = state.sessions.lock().await.values().cloned().collect();
    let mut feeds = Vec::with_capacity(engines.len());
    for engine in engines {
        feeds.push(engine.feed_status().await.state);
    }
    Ok(build_health_response(state.started_at, &feeds))
}
