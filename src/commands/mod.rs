pub mod bidding;
pub mod chat;
pub mod favorites;
pub mod health;
pub mod session;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AuctionSessionArgs {
    pub auction_id: String,
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::commands::session::open_auction_session;
    use crate::commands::AuctionSessionArgs;
    use crate::state::EngineState;
    use crate::testing::{viewer, FakeBackend};
    use std::sync::Arc;
    use std::time::Duration;

    pub fn args(auction_id: &str) -> AuctionSessionArgs {
        AuctionSessionArgs {
            auction_id: auction_id.to_string(),
        }
    }

    pub async fn opened_state(backend: &Arc<FakeBackend>, user_id: Option<&str>) -> EngineState {
        let state = EngineState::new(backend.context(user_id.map(viewer)));
        open_auction_session(&state, args("a-1"))
            .await
            .expect("session opens");

        for _ in 0..500 {
            let seeded = state
                .session("a-1")
                .await
                .map(|engine| engine.session().is_some())
                .unwrap_or(false);
            if seeded {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session never seeded");
    }
}
