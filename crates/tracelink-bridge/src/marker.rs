// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 tracelink.dev

//! Marker bridge: the IDE-facing TCP endpoint.
//!
//! Markers may only reach the handful of platform service addresses in
//! the inbound allow-list, and may only subscribe to their own
//! per-subscriber fan-out addresses. Instrument-install requests are
//! additionally checked against the developer's source-location access
//! permissions before they reach the bus.

use crate::engine::{AddressPattern, BridgeSpec, InstanceBridge, InstanceHooks, SocketId};
use crate::presence::PresenceTable;
use crate::protocol::{addresses, BridgeFrame};
use crate::{BridgeError, BusMessage, EventBus};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracelink_auth::{
    ActiveInstance, AuthorizationEngine, DeveloperAuth, InstanceConnection, StorageBackend,
    TokenAuthenticator,
};
use tracing::{debug, warn};

/// Allow-lists for the marker side of the platform.
pub fn marker_bridge_spec() -> BridgeSpec {
    BridgeSpec {
        name: "marker",
        connect_address: addresses::MARKER_CONNECTED,
        disconnect_address: addresses::MARKER_DISCONNECTED,
        inbound: vec![
            AddressPattern::exact(addresses::MARKER_CONNECTED),
            AddressPattern::exact(addresses::GET_RECORDS),
            AddressPattern::exact(addresses::LIVE_SERVICE),
            AddressPattern::exact(addresses::LIVE_INSTRUMENT),
            AddressPattern::exact(addresses::LIVE_VIEW),
        ],
        outbound: vec![
            AddressPattern::suffixed(addresses::LIVE_INSTRUMENT_SUBSCRIBER),
            AddressPattern::suffixed(addresses::LIVE_VIEW_SUBSCRIBER),
        ],
    }
}

/// Marker-side presence bookkeeping and instrument-location checks.
pub struct MarkerHooks<B: StorageBackend> {
    presence: PresenceTable,
    authorization: AuthorizationEngine<B>,
}

impl<B: StorageBackend> MarkerHooks<B> {
    /// Pull the source location out of an instrument-service request
    /// body, if it carries one.
    fn instrument_location(frame: &BridgeFrame) -> Option<&str> {
        frame
            .body
            .as_ref()?
            .get("instrument")?
            .get("location")?
            .get("source")?
            .as_str()
    }
}

impl<B: StorageBackend> InstanceHooks for MarkerHooks<B> {
    fn handle_connect(&self, _socket_id: SocketId, auth: &DeveloperAuth, conn: &InstanceConnection) {
        let mut meta = conn.meta.clone();
        meta.insert("selfId".to_string(), auth.self_id.clone());
        let inserted = self.presence.insert(ActiveInstance {
            instance_id: conn.instance_id.clone(),
            connected_at: conn.connection_time,
            meta,
        });
        if !inserted {
            debug!(instance = %conn.instance_id, "marker already present");
        }
    }

    fn handle_disconnect(
        &self,
        _socket_id: SocketId,
        _auth: &DeveloperAuth,
        conn: &InstanceConnection,
    ) -> Vec<BusMessage> {
        self.presence.remove(&conn.instance_id);
        Vec::new()
    }

    async fn authorize_inbound(
        &self,
        auth: &DeveloperAuth,
        frame: &BridgeFrame,
    ) -> Result<(), String> {
        if frame.address.as_deref() != Some(addresses::LIVE_INSTRUMENT) {
            return Ok(());
        }
        let Some(location) = Self::instrument_location(frame) else {
            return Ok(());
        };
        match self
            .authorization
            .has_instrument_access(&auth.self_id, location)
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(developer = %auth.self_id, location, "instrument access denied");
                Err(format!("access denied: {location}"))
            }
            Err(e) => Err(format!("storage unavailable: {e}")),
        }
    }
}

/// The marker-facing bridge plus its presence table.
pub struct MarkerBridge<B: StorageBackend> {
    bridge: Arc<InstanceBridge<B, MarkerHooks<B>>>,
    presence: PresenceTable,
}

impl<B: StorageBackend> MarkerBridge<B> {
    pub fn new(
        bus: EventBus,
        authenticator: Arc<TokenAuthenticator<B>>,
        authorization: AuthorizationEngine<B>,
        max_message_size: usize,
        handshake_timeout: Option<Duration>,
        tcp_keepalive: Option<Duration>,
    ) -> Self {
        let presence = PresenceTable::new();
        let hooks = Arc::new(MarkerHooks {
            presence: presence.clone(),
            authorization,
        });
        let bridge = InstanceBridge::new(
            marker_bridge_spec(),
            bus,
            authenticator,
            hooks,
            max_message_size,
            handshake_timeout,
            tcp_keepalive,
        );
        Self { bridge, presence }
    }

    pub fn inner(&self) -> &Arc<InstanceBridge<B, MarkerHooks<B>>> {
        &self.bridge
    }

    pub fn presence(&self) -> &PresenceTable {
        &self.presence
    }

    pub fn connected_count(&self) -> i64 {
        self.presence.connected_count()
    }

    pub fn active_markers(&self) -> Vec<ActiveInstance> {
        self.presence.active_instances()
    }

    pub async fn listen(&self, addr: SocketAddr, shutdown: Arc<Notify>) -> Result<(), BridgeError> {
        self.bridge.listen(addr, shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tracelink_auth::{AccessType, DeveloperRole, MemoryBackend, PermissionStorage};

    async fn hooks_with_blacklist(pattern: &str) -> MarkerHooks<MemoryBackend> {
        let storage = Arc::new(PermissionStorage::new(MemoryBackend::new()));
        storage.install_defaults().await.unwrap();
        storage.add_developer("alice", None).await.unwrap();
        storage
            .add_access_permission("deny-secret", vec![pattern.to_string()], AccessType::BlackList)
            .await
            .unwrap();
        storage
            .add_access_permission_to_role("deny-secret", &DeveloperRole::user())
            .await
            .unwrap();
        MarkerHooks {
            presence: PresenceTable::new(),
            authorization: AuthorizationEngine::new(storage),
        }
    }

    fn instrument_frame(location: &str) -> BridgeFrame {
        BridgeFrame::send(
            addresses::LIVE_INSTRUMENT,
            json!({ "command": "add", "instrument": { "location": { "source": location, "line": 42 } } }),
        )
    }

    #[test]
    fn test_marker_allow_lists() {
        let spec = marker_bridge_spec();
        assert!(spec.inbound_allows(addresses::LIVE_INSTRUMENT));
        assert!(!spec.inbound_allows(addresses::BREAKPOINT_HIT));
        assert!(spec.outbound_allows(&format!("{}:sub-1", addresses::LIVE_VIEW_SUBSCRIBER)));
        assert!(!spec.outbound_allows(addresses::LIVE_VIEW_SUBSCRIBER));
    }

    #[tokio::test]
    async fn test_instrument_request_denied_by_blacklist() {
        let hooks = hooks_with_blacklist("com.secret.*").await;
        let auth = DeveloperAuth::new("alice");

        let frame = instrument_frame("com.secret.Vault");
        assert!(hooks.authorize_inbound(&auth, &frame).await.is_err());

        let frame = instrument_frame("com.public.Api");
        assert!(hooks.authorize_inbound(&auth, &frame).await.is_ok());
    }

    #[tokio::test]
    async fn test_non_instrument_frames_skip_location_check() {
        let hooks = hooks_with_blacklist("com.secret.*").await;
        let auth = DeveloperAuth::new("alice");

        // Frames for other services carry no location and pass through.
        let frame = BridgeFrame::send(addresses::LIVE_VIEW, json!({ "view": "logs" }));
        assert!(hooks.authorize_inbound(&auth, &frame).await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_stamps_developer_into_meta() {
        let hooks = hooks_with_blacklist("com.secret.*").await;
        let auth = DeveloperAuth::new("alice");
        let conn = InstanceConnection {
            instance_id: "marker-1".to_string(),
            connection_time: 1_700_000_000_000,
            meta: Default::default(),
        };
        hooks.handle_connect(1, &auth, &conn);
        let active = hooks.presence.active_instances();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].meta.get("selfId").map(String::as_str), Some("alice"));
    }
}
