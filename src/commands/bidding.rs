use crate::auction::bidding::{BidReceipt, PurchaseReceipt};
use crate::auction::types::AuctionSession;
use crate::commands::AuctionSessionArgs;
use crate::error::AppError;
use crate::state::EngineState;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBidArgs {
    pub auction_id: String,
    pub amount: i64,
}

pub async fn submit_bid(state: &EngineState, args: SubmitBidArgs) -> Result<BidReceipt, AppError> {
    let engine = state.session(&args.auction_id).await?;
    engine.submit_bid(args.amount).await
}

pub async fn buy_now(
    state: &EngineState,
    args: AuctionSessionArgs,
) -> Result<PurchaseReceipt, AppError> {
    let engine = state.session(&args.auction_id).await?;
    engine.buy_now().await
}

pub async fn refresh_auction(
    state: &EngineState,
    args: AuctionSessionArgs,
) -> Result<AuctionSession, AppError> {
    let engine = state.session(&args.auction_id).await?;
    engine.refresh().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction::bidding::SubmissionState;
    use crate::auction::types::AuctionStatus;
    use crate::commands::test_support::{args, opened_state};
    use crate::error::ValidationFailure;
    use crate::testing::{FakeBackend, BUY_NOW_PRICE, START_PRICE};

    fn bid(amount: i64) -> SubmitBidArgs {
        SubmitBidArgs {
            auction_id: "a-1".to_string(),
            amount,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn accepted_bid_returns_authority_price() {
        let backend = FakeBackend::seeded("a-1");
        let state = opened_state(&backend, Some("u-1")).await;

        let receipt = submit_bid(&state, bid(START_PRICE + 50))
            .await
            .expect("bid accepted");

        assert_eq!(receipt.new_price, Some(START_PRICE + 50));
        assert_eq!(backend.bid_calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn low_bid_never_reaches_authority() {
        let backend = FakeBackend::seeded("a-1");
        let state = opened_state(&backend, Some("u-1")).await;

        let result = submit_bid(&state, bid(START_PRICE)).await;

        assert!(matches!(
            result,
            Err(AppError::Validation(ValidationFailure::BelowMinimum { .. }))
        ));
        assert!(backend.bid_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn anonymous_viewer_must_sign_in() {
        let backend = FakeBackend::seeded("a-1");
        let state = opened_state(&backend, None).await;

        let result = buy_now(&state, args("a-1")).await;

        assert!(matches!(
            result,
            Err(AppError::Validation(ValidationFailure::SignInRequired))
        ));
        assert!(backend.buy_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn buy_now_ends_auction() {
        let backend = FakeBackend::seeded("a-1");
        let state = opened_state(&backend, Some("u-1")).await;

        let receipt = buy_now(&state, args("a-1")).await.expect("purchase accepted");
        assert_eq!(receipt.price, BUY_NOW_PRICE);

        let session = refresh_auction(&state, args("a-1"))
            .await
            .expect("refresh succeeds");
        assert_eq!(session.status, AuctionStatus::Ended);
        let engine = state.session("a-1").await.expect("open session");
        assert_eq!(engine.submission_state(), SubmissionState::Idle);
    }

    #[tokio::test]
    async fn unknown_session_is_reported() {
        let backend = FakeBackend::seeded("a-1");
        let state = EngineState::new(backend.context(None));

        let result = submit_bid(&state, bid(2_000)).await;
        assert!(matches!(result, Err(AppError::UnknownSession(_))));
    }
}
