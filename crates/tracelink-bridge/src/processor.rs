// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 tracelink.dev

//! Processor bridge: the backend-worker-facing TCP endpoint.
//!
//! Processors carry live-instrument commands down to probes and stream
//! hit events back up, so their allow-lists are wider than the marker
//! side. Every inbound frame that carries headers is stamped with the
//! sending processor's identity so downstream consumers can attribute
//! events without trusting the payload.

use crate::engine::{AddressPattern, BridgeSpec, InstanceBridge, InstanceHooks, SocketId};
use crate::presence::PresenceTable;
use crate::protocol::{addresses, BridgeFrame, PROCESSOR_ID_HEADER};
use crate::{BridgeError, BusMessage, EventBus};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracelink_auth::{
    ActiveInstance, DeveloperAuth, InstanceConnection, StorageBackend, TokenAuthenticator,
};
use tracing::debug;

/// Allow-lists for the processor side of the platform.
pub fn processor_bridge_spec() -> BridgeSpec {
    BridgeSpec {
        name: "processor",
        connect_address: addresses::PROCESSOR_CONNECTED,
        disconnect_address: addresses::PROCESSOR_DISCONNECTED,
        inbound: vec![
            AddressPattern::exact(addresses::PROCESSOR_CONNECTED),
            AddressPattern::exact(addresses::DISCOVERY_ANNOUNCE),
            AddressPattern::exact(addresses::DISCOVERY_USAGE),
            AddressPattern::exact(addresses::BREAKPOINT_HIT),
            AddressPattern::exact(addresses::LOG_HIT),
            AddressPattern::exact(addresses::LIVE_SERVICE),
            AddressPattern::exact(addresses::LIVE_INSTRUMENT_SUBSCRIBER),
            AddressPattern::suffixed(addresses::LIVE_INSTRUMENT_SUBSCRIBER),
            AddressPattern::suffixed(addresses::LIVE_VIEW_SUBSCRIBER),
            AddressPattern::suffixed(addresses::LIVE_BREAKPOINT_REMOTE),
            AddressPattern::suffixed(addresses::LIVE_LOG_REMOTE),
            AddressPattern::suffixed(addresses::LIVE_METER_REMOTE),
            AddressPattern::suffixed(addresses::LIVE_SPAN_REMOTE),
        ],
        outbound: vec![
            AddressPattern::exact(addresses::LIVE_INSTRUMENT),
            AddressPattern::exact(addresses::LIVE_VIEW),
            AddressPattern::exact(addresses::MARKER_DISCONNECTED),
            AddressPattern::exact(addresses::LOG_COUNT_INDICATOR),
            AddressPattern::exact(addresses::SET_LOG_PUBLISH_RATE_LIMIT),
            AddressPattern::exact(addresses::REMOTE_REGISTERED),
            AddressPattern::exact(addresses::LIVE_BREAKPOINT_APPLIED),
            AddressPattern::exact(addresses::LIVE_BREAKPOINT_REMOVED),
            AddressPattern::exact(addresses::LIVE_LOG_APPLIED),
            AddressPattern::exact(addresses::LIVE_LOG_REMOVED),
            AddressPattern::exact(addresses::LIVE_METER_APPLIED),
            AddressPattern::exact(addresses::LIVE_METER_REMOVED),
            AddressPattern::exact(addresses::LIVE_SPAN_APPLIED),
            AddressPattern::exact(addresses::LIVE_SPAN_REMOVED),
        ],
    }
}

/// Processor-side presence bookkeeping and identity stamping.
pub struct ProcessorHooks {
    presence: PresenceTable,
    /// Socket handle to processor instance id, for header stamping.
    socket_owners: RwLock<HashMap<SocketId, String>>,
}

impl InstanceHooks for ProcessorHooks {
    fn handle_connect(&self, socket_id: SocketId, auth: &DeveloperAuth, conn: &InstanceConnection) {
        self.socket_owners
            .write()
            .insert(socket_id, conn.instance_id.clone());
        let mut meta = conn.meta.clone();
        meta.insert("selfId".to_string(), auth.self_id.clone());
        let inserted = self.presence.insert(ActiveInstance {
            instance_id: conn.instance_id.clone(),
            connected_at: conn.connection_time,
            meta,
        });
        if !inserted {
            debug!(instance = %conn.instance_id, "processor already present");
        }
    }

    fn handle_disconnect(
        &self,
        socket_id: SocketId,
        _auth: &DeveloperAuth,
        conn: &InstanceConnection,
    ) -> Vec<BusMessage> {
        self.socket_owners.write().remove(&socket_id);
        self.presence.remove(&conn.instance_id);
        Vec::new()
    }

    fn decorate_inbound(&self, socket_id: SocketId, frame: &mut BridgeFrame) {
        // Only frames that already carry headers get the identity stamp.
        let Some(headers) = frame.headers.as_mut() else {
            return;
        };
        if let Some(processor_id) = self.socket_owners.read().get(&socket_id) {
            headers.insert(
                PROCESSOR_ID_HEADER.to_string(),
                serde_json::Value::String(processor_id.clone()),
            );
        }
    }
}

/// The processor-facing bridge plus its presence table.
pub struct ProcessorBridge<B: StorageBackend> {
    bridge: Arc<InstanceBridge<B, ProcessorHooks>>,
    presence: PresenceTable,
}

impl<B: StorageBackend> ProcessorBridge<B> {
    pub fn new(
        bus: EventBus,
        authenticator: Arc<TokenAuthenticator<B>>,
        max_message_size: usize,
        handshake_timeout: Option<Duration>,
        tcp_keepalive: Option<Duration>,
    ) -> Self {
        let presence = PresenceTable::new();
        let hooks = Arc::new(ProcessorHooks {
            presence: presence.clone(),
            socket_owners: RwLock::new(HashMap::new()),
        });
        let bridge = InstanceBridge::new(
            processor_bridge_spec(),
            bus,
            authenticator,
            hooks,
            max_message_size,
            handshake_timeout,
            tcp_keepalive,
        );
        Self { bridge, presence }
    }

    pub fn inner(&self) -> &Arc<InstanceBridge<B, ProcessorHooks>> {
        &self.bridge
    }

    pub fn presence(&self) -> &PresenceTable {
        &self.presence
    }

    pub fn connected_count(&self) -> i64 {
        self.presence.connected_count()
    }

    pub fn active_processors(&self) -> Vec<ActiveInstance> {
        self.presence.active_instances()
    }

    pub async fn listen(&self, addr: SocketAddr, shutdown: Arc<Notify>) -> Result<(), BridgeError> {
        self.bridge.listen(addr, shutdown).await
    }
}
