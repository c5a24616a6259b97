pub mod backend;
pub mod bidding;
pub mod chat;
pub mod clock;
pub mod context;
pub mod engine;
pub mod events;
pub mod favorite;
pub mod feed;
pub mod remote;
pub mod store;
pub mod types;
