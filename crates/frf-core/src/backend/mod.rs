//! Backend session abstractions (Telegram today; anything MTProto-shaped later).

pub mod port;
pub mod types;
