use crate::auction::types::ChatMessage;
use crate::commands::AuctionSessionArgs;
use crate::error::AppError;
use crate::state::EngineState;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SendChatArgs {
    pub auction_id: String,
    pub body: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResendChatArgs {
    pub auction_id: String,
    pub client_nonce: String,
}

pub async fn send_chat_message(
    state: &EngineState,
    args: SendChatArgs,
) -> Result<ChatMessage, AppError> {
    let engine = state.session(&args.auction_id).await?;
    engine.send_chat_message(&args.body).await
}

pub async fn resend_chat_message(
    state: &EngineState,
    args: ResendChatArgs,
) -> Result<ChatMessage, AppError> {
    let engine = state.session(&args.auction_id).await?;
    engine.resend_chat_message(&args.client_nonce).await
}

pub async fn chat_messages(
    state: &EngineState,
    args: AuctionSessionArgs,
) -> Result<Vec<ChatMessage>, AppError> {
    let engine = state.session(&args.auction_id).await?;
    Ok(engine.chat_messages())
}
