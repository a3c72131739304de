//! Channel abstraction for chat transports.

pub mod channel;
pub mod cli;
pub mod keyboard;
pub mod telegram;

pub use channel::*;
pub use cli::CliChannel;
pub use telegram::TelegramChannel;
