//! WebSocket support for realtime pushes.
//!
//! Clients connect per tenant, subscribe to collections or to the active
//! number, and receive a fresh snapshot after every write.

mod manager;

pub use manager::{Connection, ConnectionManager, MessageSender};
pub use tandem_engine::remote::protocol::{ClientMessage, ServerMessage};
