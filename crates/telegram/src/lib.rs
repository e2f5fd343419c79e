//! Telegram channel: a teloxide bot that long-polls updates, reports chat
//! membership and private messages as channel events, and broadcasts
//! through the Bot API.

pub mod channel;
mod handlers;
pub mod outbound;

pub use {channel::TelegramChannel, outbound::TelegramOutbound};
