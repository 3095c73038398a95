//! # Chanwarden Channels
//! Messaging transports for the scheduling engine.

pub mod telegram;

pub use telegram::TelegramTransport;
