pub mod auction;
pub mod commands;
pub mod error;
pub mod state;

#[cfg(test)]
mod testing;

pub use auction::context::EngineContext;
pub use auction::engine::AuctionSessionEngine;
pub use auction::events::SessionEvent;
pub use auction::types::{EngineArgs, EngineConfig, Viewer};
pub use error::AppError;
pub use state::EngineState;
