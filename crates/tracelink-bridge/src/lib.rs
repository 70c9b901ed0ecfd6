// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 tracelink.dev

//! Instance bridges for the tracelink control plane.
//!
//! A bridge terminates one class of remote peer (IDE-side markers or
//! backend processors) on a TCP listener, authenticates each connection,
//! and relays length-prefixed JSON frames between the peer's socket and
//! the internal event bus, enforcing per-class address allow-lists in
//! both directions.

pub mod bus;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod engine;
pub mod marker;
pub mod presence;
pub mod processor;
pub mod protocol;
pub mod status;

pub use bus::{BusMessage, EventBus};
pub use config::{BridgeConfig, ConfigError};
pub use connection::ConnectionError;
pub use discovery::{DiscoveryService, ServiceRecord, ServiceRegistry};
pub use engine::{AddressPattern, BridgeError, BridgeSpec, InstanceBridge, InstanceHooks};
pub use marker::{marker_bridge_spec, MarkerBridge, MarkerHooks};
pub use presence::PresenceTable;
pub use processor::{processor_bridge_spec, ProcessorBridge, ProcessorHooks};
pub use protocol::{addresses, BridgeFrame, FrameType};
pub use status::StatusService;
