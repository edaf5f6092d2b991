//! bantrat: Telegram bot for deploying tokens through the Bankr API.

pub mod channels;
pub mod config;
pub mod conversation;
pub mod credentials;
pub mod dispatcher;
pub mod error;
pub mod gateway;
