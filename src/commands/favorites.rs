use crate::auction::types::FavoriteState;
use crate::commands::AuctionSessionArgs;
use crate::error::AppError;
use crate::state::EngineState;

pub async fn toggle_favorite(
    state: &EngineState,
    args: AuctionSessionArgs,
) -> Result<FavoriteState, AppError> {
    let engine = state.session(&args.auction_id).await?;
    engine.toggle_favorite()
}

pub async fn favorite_status(
    state: &EngineState,
    args: AuctionSessionArgs,
) -> Result<Option<FavoriteState>, AppError> {
    let engine = state.session(&args.auction_id).await?;
    Ok(engine.favorite_state())
}
