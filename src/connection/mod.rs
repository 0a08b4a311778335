//! Persistent connection to the assistant backend.

pub mod manager;
pub mod protocol;

pub use manager::{ConnectionManager, ConnectionStatus, Delivery};
pub use protocol::{Inbound, Outbound};
