//! Request handlers.

pub mod active_number;
pub mod documents;
pub mod users;
pub mod websocket;
