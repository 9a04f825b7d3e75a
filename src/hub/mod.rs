//! Hub lifetime management.
//!
//! - `connection` - Connection abstraction and the process-local index
//! - `groups` - Local group membership
//! - `manager` - The abstract contract both variants implement
//! - `local` - Single-process fan-out
//! - `distributed` - Bus-backed fan-out with the group-mutation ack protocol

pub mod connection;
pub mod distributed;
pub mod groups;
pub mod local;
pub mod manager;

pub use connection::*;
pub use distributed::*;
pub use groups::*;
pub use local::*;
pub use manager::*;
