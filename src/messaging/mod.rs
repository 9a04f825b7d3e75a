//! Inter-server message infrastructure.
//!
//! This module provides the wire-level pieces of the distributed manager:
//! - `protocol` - Invocation and control message shapes
//! - `codec` - Type-tagged argument values and envelope encoding
//! - `acks` - Correlation ids and pending-acknowledgement tracking
//! - `topics` - Topic naming scheme for one hub's bus traffic

pub mod acks;
pub mod codec;
pub mod protocol;
pub mod topics;

pub use acks::*;
pub use codec::*;
pub use protocol::*;
pub use topics::*;
