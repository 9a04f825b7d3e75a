#![forbid(unsafe_code)]
// Module naming: common pattern in domain-driven code
#![allow(clippy::module_name_repetitions)]
// Documentation style: many terms don't need backticks
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
// API ergonomics: prefer simplicity over must_use annotations
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
// Format strings: allow non-inlined for readability
#![allow(clippy::uninlined_format_args)]
// Passing style
#![allow(clippy::needless_pass_by_value)]

//! Photon - Distributed hub lifetime manager.
//!
//! Routes real-time invocations from server-side application code to sets of
//! currently connected clients across a fleet of cooperating servers: one
//! connection, all connections, a named group, all connections of a user, or
//! any of these with exclusions. Connections are sticky to one server; the
//! fleet coordinates over a pub/sub bus.
//!
//! # Module Organization
//!
//! ## Core
//! - `core::config` - Configuration parsing and validation
//! - `core::error` - Error surfaces of the public operations
//!
//! ## Hub
//! - `hub::manager` - The abstract lifetime-manager contract
//! - `hub::connection` - Connection abstraction and the local index
//! - `hub::groups` - Local group membership
//! - `hub::local` - Single-process manager
//! - `hub::distributed` - Bus-backed manager with the group-mutation
//!   ack protocol
//!
//! ## Messaging
//! - `messaging::protocol` - Invocation and control message shapes
//! - `messaging::codec` - Type-tagged argument values and envelopes
//! - `messaging::acks` - Correlation ids and pending-ack tracking
//! - `messaging::topics` - Topic naming scheme
//!
//! ## Bus
//! - `bus` - Broker abstraction
//! - `bus::memory` - In-process broker for embedding and tests
//!
//! ## Operations
//! - `ops::metrics` - Fan-out activity counters
//! - `ops::telemetry` - Structured logging setup

// Core infrastructure
pub mod core;

// Hub lifetime management
pub mod hub;

// Inter-server messaging
pub mod messaging;

// Broker abstraction
pub mod bus;

// Operations
pub mod ops;

// Re-exports for convenience
pub use self::core::{config, error};
pub use self::core::{HubConfig, HubError};
pub use bus::{Bus, BusError, InProcessBroker, InProcessBus, MessageHandler};
pub use hub::{
    ConnectionRegistry, DistributedHubManager, GroupRegistry, HubConnection, HubLifetimeManager,
    LocalHubManager, WriteError,
};
pub use messaging::{
    AckOutcome, AckTracker, ArgValue, CodecError, ControlMessage, ExcludingInvocationMessage,
    GroupAction, HubTopics, InvocationIdSource, InvocationMessage, WireCodec,
};
pub use ops::{HubMetrics, MetricsSnapshot};
