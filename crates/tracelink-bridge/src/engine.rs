// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 tracelink.dev

//! Generic instance-bridge engine.
//!
//! Both concrete bridges share one engine; they differ only in
//! configuration data (a [`BridgeSpec`] carrying their allow-lists and
//! reserved addresses) plus a small [`InstanceHooks`] implementation for
//! presence bookkeeping and frame decoration.
//!
//! Connection state machine:
//!
//! ```text
//! UNAUTHENTICATED --connect frame, credential valid--> CONNECTED
//!        |  \--credential invalid: err frame, stays open for retry
//!        \--handshake timeout / socket close--> CLOSED
//! CONNECTED --socket close--> CLOSED (presence removed, disconnect
//!                                     event broadcast)
//! ```

use crate::bus::{BusMessage, EndpointId, EventBus};
use crate::connection::{ConnectionError, FrameConnection};
use crate::protocol::{BridgeFrame, FrameType, AUTH_TOKEN_HEADER};
use serde_json::{json, Value};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Notify};
use tracelink_auth::{DeveloperAuth, InstanceConnection, StorageBackend, TokenAuthenticator};
use tracing::{debug, info, trace, warn};

/// Per-connection outbound queue depth.
const OUTBOUND_QUEUE_DEPTH: usize = 128;

/// Bridge error types.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bind error: {0}")]
    Bind(String),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Engine-generated socket handle, unique per bridge instance.
pub type SocketId = u64;

/// One allow-list entry: an exact address, or a fan-out prefix matching
/// `prefix:<non-empty suffix>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressPattern {
    Exact(String),
    Suffixed(String),
}

impl AddressPattern {
    pub fn exact(address: &str) -> Self {
        Self::Exact(address.to_string())
    }

    pub fn suffixed(prefix: &str) -> Self {
        Self::Suffixed(prefix.to_string())
    }

    pub fn matches(&self, address: &str) -> bool {
        match self {
            Self::Exact(exact) => exact == address,
            Self::Suffixed(prefix) => address
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.len() > 1 && rest.starts_with(':')),
        }
    }
}

/// Configuration data distinguishing one bridge variant from another.
#[derive(Debug, Clone)]
pub struct BridgeSpec {
    pub name: &'static str,
    /// Reserved connect address; the first frame on a socket must be a
    /// send to this address carrying the bearer credential.
    pub connect_address: &'static str,
    /// Address the disconnect event is broadcast on.
    pub disconnect_address: &'static str,
    pub inbound: Vec<AddressPattern>,
    pub outbound: Vec<AddressPattern>,
}

impl BridgeSpec {
    pub fn inbound_allows(&self, address: &str) -> bool {
        self.inbound.iter().any(|p| p.matches(address))
    }

    pub fn outbound_allows(&self, address: &str) -> bool {
        self.outbound.iter().any(|p| p.matches(address))
    }
}

/// Variant-specific behavior plugged into the engine.
pub trait InstanceHooks: Send + Sync + 'static {
    /// Called once a connect frame has authenticated and decoded.
    /// Must be idempotent per instance id.
    fn handle_connect(&self, socket_id: SocketId, auth: &DeveloperAuth, conn: &InstanceConnection);

    /// Called when the socket closes. Returns extra bus messages to
    /// broadcast after the standard disconnect event. Must tolerate
    /// already-removed instances.
    fn handle_disconnect(
        &self,
        socket_id: SocketId,
        auth: &DeveloperAuth,
        conn: &InstanceConnection,
    ) -> Vec<BusMessage>;

    /// Re-authorization of an allow-listed inbound frame against the
    /// permission model. `Err` carries the message failed back to the
    /// sender.
    fn authorize_inbound(
        &self,
        _auth: &DeveloperAuth,
        _frame: &BridgeFrame,
    ) -> impl Future<Output = Result<(), String>> + Send {
        async { Ok(()) }
    }

    /// Mutate an inbound frame before it is placed on the bus
    /// (identity-header stamping).
    fn decorate_inbound(&self, _socket_id: SocketId, _frame: &mut BridgeFrame) {}
}

struct Session {
    socket_id: SocketId,
    auth: Option<DeveloperAuth>,
    connection: Option<InstanceConnection>,
    registrations: Vec<(String, EndpointId)>,
}

/// The bridge engine: one TCP listener multiplexing many peer sockets
/// onto the shared event bus.
pub struct InstanceBridge<B: StorageBackend, H: InstanceHooks> {
    spec: BridgeSpec,
    bus: EventBus,
    authenticator: Arc<TokenAuthenticator<B>>,
    hooks: Arc<H>,
    max_message_size: usize,
    handshake_timeout: Option<Duration>,
    tcp_keepalive: Option<Duration>,
    next_socket_id: AtomicU64,
}

impl<B: StorageBackend, H: InstanceHooks> InstanceBridge<B, H> {
    pub fn new(
        spec: BridgeSpec,
        bus: EventBus,
        authenticator: Arc<TokenAuthenticator<B>>,
        hooks: Arc<H>,
        max_message_size: usize,
        handshake_timeout: Option<Duration>,
        tcp_keepalive: Option<Duration>,
    ) -> Arc<Self> {
        Arc::new(Self {
            spec,
            bus,
            authenticator,
            hooks,
            max_message_size,
            handshake_timeout,
            tcp_keepalive,
            next_socket_id: AtomicU64::new(1),
        })
    }

    pub fn spec(&self) -> &BridgeSpec {
        &self.spec
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    /// Accept loop. Runs until `shutdown` is notified.
    pub async fn listen(
        self: &Arc<Self>,
        addr: SocketAddr,
        shutdown: Arc<Notify>,
    ) -> Result<(), BridgeError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BridgeError::Bind(format!("{addr}: {e}")))?;
        info!(bridge = self.spec.name, %addr, "bridge listening");

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            debug!(bridge = self.spec.name, %peer_addr, "connection accepted");
                            if let Some(interval) = self.tcp_keepalive {
                                let params = socket2::TcpKeepalive::new()
                                    .with_time(interval)
                                    .with_interval(interval);
                                if let Err(e) =
                                    socket2::SockRef::from(&stream).set_tcp_keepalive(&params)
                                {
                                    warn!(bridge = self.spec.name, %peer_addr, error = %e,
                                        "failed to enable keepalive");
                                }
                            }
                            let bridge = Arc::clone(self);
                            tokio::spawn(async move {
                                if let Err(e) = bridge.handle_socket(stream).await {
                                    warn!(bridge = bridge.spec.name, %peer_addr, error = %e,
                                        "connection error");
                                }
                            });
                        }
                        Err(e) => {
                            warn!(bridge = self.spec.name, error = %e, "accept error");
                        }
                    }
                }
                _ = shutdown.notified() => {
                    info!(bridge = self.spec.name, "bridge shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Drive one peer socket through the connection state machine.
    /// Generic over the stream so tests can drive it with duplex pipes.
    pub async fn handle_socket<S>(&self, stream: S) -> Result<(), BridgeError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let socket_id = self.next_socket_id.fetch_add(1, Ordering::Relaxed);
        let (mut reader, mut writer) =
            FrameConnection::new(stream, self.max_message_size).into_split();
        // Bus deliveries and engine replies funnel through one writer
        // task; reads never race writes.
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<BusMessage>(OUTBOUND_QUEUE_DEPTH);
        let (reply_tx, mut reply_rx) = mpsc::channel::<BridgeFrame>(OUTBOUND_QUEUE_DEPTH);
        let writer_task = tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    reply = reply_rx.recv() => match reply {
                        Some(frame) => frame,
                        None => break,
                    },
                    msg = outbound_rx.recv() => match msg {
                        Some(msg) => BridgeFrame {
                            frame_type: FrameType::Send,
                            address: Some(msg.address),
                            headers: msg.headers,
                            body: msg.body,
                            reply_address: msg.reply_address,
                            message: None,
                        },
                        None => break,
                    },
                };
                if writer.write_frame(&frame).await.is_err() {
                    break;
                }
            }
            let _ = writer.shutdown().await;
        });

        let mut session = Session {
            socket_id,
            auth: None,
            connection: None,
            registrations: Vec::new(),
        };
        let auth_deadline = self
            .handshake_timeout
            .map(|t| tokio::time::Instant::now() + t);

        let result = loop {
            let read = match auth_deadline {
                Some(deadline) if session.auth.is_none() => {
                    match tokio::time::timeout_at(deadline, reader.read_frame()).await {
                        Ok(read) => read,
                        Err(_) => {
                            warn!(
                                bridge = self.spec.name,
                                socket_id, "handshake timeout, closing socket"
                            );
                            break Ok(());
                        }
                    }
                }
                _ => reader.read_frame().await,
            };

            match read {
                Ok(Some(frame)) => {
                    let replies = self.process_frame(&mut session, frame, &outbound_tx).await;
                    let mut writer_gone = false;
                    for reply in replies {
                        if reply_tx.send(reply).await.is_err() {
                            writer_gone = true;
                            break;
                        }
                    }
                    if writer_gone {
                        break Ok(());
                    }
                }
                Ok(None) => break Ok(()),
                Err(ConnectionError::Malformed(reason)) => {
                    // Frame rejected; connection survives.
                    let err = BridgeFrame::err(format!("malformed payload: {reason}"));
                    if reply_tx.send(err).await.is_err() {
                        break Ok(());
                    }
                }
                Err(e) => break Err(e),
            }
        };

        // Unregistering drops the bus-held sender clones; closing both
        // channels lets the writer drain and shut the stream down.
        self.close_session(&mut session).await;
        drop(outbound_tx);
        drop(reply_tx);
        let _ = writer_task.await;
        result.map_err(BridgeError::from)
    }

    async fn close_session(&self, session: &mut Session) {
        for (address, id) in session.registrations.drain(..) {
            self.bus.unregister(&address, id).await;
        }
        if let (Some(auth), Some(connection)) = (&session.auth, &session.connection) {
            let extra = self
                .hooks
                .handle_disconnect(session.socket_id, auth, connection);
            // Broadcast with the original connection payload so
            // downstream consumers can clean up subscriptions.
            self.bus
                .publish(BusMessage {
                    address: self.spec.disconnect_address.to_string(),
                    headers: None,
                    body: serde_json::to_value(connection).ok(),
                    reply_address: None,
                })
                .await;
            for msg in extra {
                self.bus.publish(msg).await;
            }
            info!(
                bridge = self.spec.name,
                instance = %connection.instance_id,
                developer = %auth.self_id,
                "instance disconnected"
            );
        }
    }

    async fn process_frame(
        &self,
        session: &mut Session,
        frame: BridgeFrame,
        outbound_tx: &mpsc::Sender<BusMessage>,
    ) -> Vec<BridgeFrame> {
        if frame.frame_type == FrameType::Ping {
            return vec![BridgeFrame::pong()];
        }
        match session.auth.clone() {
            None => self.process_handshake(session, frame).await,
            Some(auth) => self.process_connected(session, &auth, frame, outbound_tx).await,
        }
    }

    /// UNAUTHENTICATED -> (AUTHENTICATING) -> CONNECTED.
    async fn process_handshake(&self, session: &mut Session, frame: BridgeFrame) -> Vec<BridgeFrame> {
        let is_connect = matches!(frame.frame_type, FrameType::Send | FrameType::Publish)
            && frame.address.as_deref() == Some(self.spec.connect_address);
        if !is_connect {
            return vec![BridgeFrame::err("not authenticated")];
        }
        let Some(credential) = frame.header(AUTH_TOKEN_HEADER) else {
            return vec![BridgeFrame::err(format!(
                "missing {AUTH_TOKEN_HEADER} header"
            ))];
        };

        let auth = match self.authenticator.authenticate(credential).await {
            Ok(auth) => auth,
            Err(e) => {
                // Authentication failed back to the caller; the socket
                // stays open so the peer may retry.
                warn!(bridge = self.spec.name, error = %e, "authentication failed");
                return vec![BridgeFrame::err(e.to_string())];
            }
        };

        let body = frame.body.clone().unwrap_or(Value::Null);
        let connection: InstanceConnection = match serde_json::from_value(body.clone()) {
            Ok(connection) => connection,
            Err(e) => {
                return vec![BridgeFrame::err(format!(
                    "malformed connection payload: {e}"
                ))];
            }
        };

        self.hooks
            .handle_connect(session.socket_id, &auth, &connection);
        self.bus
            .publish(BusMessage {
                address: self.spec.connect_address.to_string(),
                headers: frame.headers.clone(),
                body: Some(body),
                reply_address: None,
            })
            .await;
        info!(
            bridge = self.spec.name,
            instance = %connection.instance_id,
            developer = %auth.self_id,
            "instance connected"
        );

        // The handshake reply carries the resolved identity; it becomes
        // the request-scoped context for every later frame.
        let reply_address = frame
            .reply_address
            .clone()
            .unwrap_or_else(|| self.spec.connect_address.to_string());
        let reply = BridgeFrame::send(
            reply_address,
            json!({ "status": "connected", "selfId": auth.self_id }),
        );
        session.connection = Some(connection);
        session.auth = Some(auth);
        vec![reply]
    }

    async fn process_connected(
        &self,
        session: &mut Session,
        auth: &DeveloperAuth,
        mut frame: BridgeFrame,
        outbound_tx: &mpsc::Sender<BusMessage>,
    ) -> Vec<BridgeFrame> {
        match frame.frame_type {
            FrameType::Send | FrameType::Publish => {
                let Some(address) = frame.address.clone() else {
                    return vec![BridgeFrame::err("missing address")];
                };
                if !self.spec.inbound_allows(&address) {
                    warn!(
                        bridge = self.spec.name,
                        %address,
                        developer = %auth.self_id,
                        "inbound address rejected"
                    );
                    return vec![BridgeFrame::err(format!("rejected address: {address}"))];
                }
                if let Err(reason) = self.hooks.authorize_inbound(auth, &frame).await {
                    warn!(
                        bridge = self.spec.name,
                        %address,
                        developer = %auth.self_id,
                        reason,
                        "inbound frame denied"
                    );
                    return vec![BridgeFrame::err(reason)];
                }
                self.hooks.decorate_inbound(session.socket_id, &mut frame);

                // A repeated connect frame refreshes the session's
                // connection payload; presence handling is idempotent.
                if address == self.spec.connect_address {
                    if let Some(body) = frame.body.clone() {
                        if let Ok(connection) = serde_json::from_value::<InstanceConnection>(body) {
                            self.hooks
                                .handle_connect(session.socket_id, auth, &connection);
                            session.connection = Some(connection);
                        }
                    }
                }

                // Replies flow back through this socket without an
                // explicit register frame.
                if let Some(reply_address) = frame.reply_address.clone() {
                    if !session.registrations.iter().any(|(a, _)| *a == reply_address) {
                        let id = self.bus.register(&reply_address, outbound_tx.clone()).await;
                        session.registrations.push((reply_address, id));
                    }
                }

                let msg = BusMessage {
                    address,
                    headers: frame.headers,
                    body: frame.body,
                    reply_address: frame.reply_address,
                };
                match frame.frame_type {
                    FrameType::Publish => {
                        self.bus.publish(msg).await;
                    }
                    _ => {
                        if !self.bus.send(msg).await {
                            trace!(bridge = self.spec.name, "send with no bus endpoint");
                        }
                    }
                }
                Vec::new()
            }
            FrameType::Register => {
                let Some(address) = frame.address.clone() else {
                    return vec![BridgeFrame::err("missing address")];
                };
                if !self.spec.outbound_allows(&address) {
                    warn!(
                        bridge = self.spec.name,
                        %address,
                        developer = %auth.self_id,
                        "outbound registration rejected"
                    );
                    return vec![BridgeFrame::err(format!("rejected address: {address}"))];
                }
                let id = self.bus.register(&address, outbound_tx.clone()).await;
                session.registrations.push((address, id));
                Vec::new()
            }
            FrameType::Unregister => {
                let Some(address) = frame.address.clone() else {
                    return vec![BridgeFrame::err("missing address")];
                };
                if let Some(pos) = session
                    .registrations
                    .iter()
                    .position(|(a, _)| *a == address)
                {
                    let (address, id) = session.registrations.remove(pos);
                    self.bus.unregister(&address, id).await;
                }
                Vec::new()
            }
            FrameType::Ping | FrameType::Pong | FrameType::Err => {
                debug!(bridge = self.spec.name, frame_type = ?frame.frame_type,
                    "ignoring control frame from peer");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::PresenceTable;
    use tracelink_auth::{ActiveInstance, MemoryBackend, PermissionStorage};

    struct TestHooks {
        presence: PresenceTable,
    }

    impl InstanceHooks for TestHooks {
        fn handle_connect(
            &self,
            _socket_id: SocketId,
            _auth: &DeveloperAuth,
            conn: &InstanceConnection,
        ) {
            self.presence.insert(ActiveInstance {
                instance_id: conn.instance_id.clone(),
                connected_at: conn.connection_time,
                meta: conn.meta.clone(),
            });
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
    }

    type TestBridge = Arc<InstanceBridge<MemoryBackend, TestHooks>>;

    async fn test_bridge(handshake_timeout: Option<Duration>) -> (TestBridge, EventBus, String) {
        let storage = Arc::new(PermissionStorage::new(MemoryBackend::new()));
        storage.install_defaults().await.unwrap();
        let developer = storage.add_developer("alice", None).await.unwrap();
        let token = developer.access_token.unwrap();
        let authenticator = Arc::new(TokenAuthenticator::new(Arc::clone(&storage), None));
        let bus = EventBus::new();
        let spec = BridgeSpec {
            name: "test",
            connect_address: "test.connected",
            disconnect_address: "test.disconnected",
            inbound: vec![
                AddressPattern::exact("test.connected"),
                AddressPattern::exact("test.inbound"),
            ],
            outbound: vec![AddressPattern::exact("test.outbound")],
        };
        let hooks = Arc::new(TestHooks {
            presence: PresenceTable::new(),
        });
        let bridge = InstanceBridge::new(
            spec,
            bus.clone(),
            authenticator,
            hooks,
            64 * 1024,
            handshake_timeout,
            None,
        );
        (bridge, bus, token)
    }

    fn connect_frame(token: &str) -> BridgeFrame {
        BridgeFrame::send(
            "test.connected",
            json!({ "instanceId": "m1", "connectionTime": 1_700_000_000_000_i64 }),
        )
        .with_header(AUTH_TOKEN_HEADER, token)
    }

    /// Spawn the bridge over one end of a duplex pipe; return the
    /// client side wrapped in a frame codec.
    fn spawn_bridge(bridge: TestBridge) -> FrameConnection<tokio::io::DuplexStream> {
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            let _ = bridge.handle_socket(server).await;
        });
        FrameConnection::new(client, 64 * 1024)
    }

    async fn read_frame(
        conn: &mut FrameConnection<tokio::io::DuplexStream>,
    ) -> BridgeFrame {
        conn.read_frame().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_handshake_success() {
        let (bridge, bus, token) = test_bridge(None).await;
        let mut connect_events = bus.subscribe("test.connected").await;
        let mut client = spawn_bridge(bridge);

        client.write_frame(&connect_frame(&token)).await.unwrap();
        let reply = read_frame(&mut client).await;
        assert_eq!(reply.frame_type, FrameType::Send);
        assert_eq!(reply.body.unwrap()["selfId"], json!("alice"));

        let event = connect_events.rx.recv().await.unwrap();
        assert_eq!(event.body.unwrap()["instanceId"], json!("m1"));
    }

    #[tokio::test]
    async fn test_frame_before_handshake_is_rejected() {
        let (bridge, _bus, token) = test_bridge(None).await;
        let mut client = spawn_bridge(bridge);

        client
            .write_frame(&BridgeFrame::send("test.inbound", json!({})))
            .await
            .unwrap();
        let reply = read_frame(&mut client).await;
        assert_eq!(reply.frame_type, FrameType::Err);
        assert_eq!(reply.message.as_deref(), Some("not authenticated"));

        // The socket survives; a proper handshake still works.
        client.write_frame(&connect_frame(&token)).await.unwrap();
        let reply = read_frame(&mut client).await;
        assert_eq!(reply.frame_type, FrameType::Send);
    }

    #[tokio::test]
    async fn test_bad_credential_allows_retry() {
        let (bridge, _bus, token) = test_bridge(None).await;
        let mut client = spawn_bridge(bridge);

        client
            .write_frame(&connect_frame("wrong-token"))
            .await
            .unwrap();
        let reply = read_frame(&mut client).await;
        assert_eq!(reply.frame_type, FrameType::Err);

        client.write_frame(&connect_frame(&token)).await.unwrap();
        let reply = read_frame(&mut client).await;
        assert_eq!(reply.frame_type, FrameType::Send);
        assert_eq!(reply.body.unwrap()["status"], json!("connected"));
    }

    #[tokio::test]
    async fn test_malformed_connect_payload_allows_retry() {
        let (bridge, _bus, token) = test_bridge(None).await;
        let mut client = spawn_bridge(bridge);

        let bad = BridgeFrame::send("test.connected", json!({ "nope": true }))
            .with_header(AUTH_TOKEN_HEADER, &token);
        client.write_frame(&bad).await.unwrap();
        let reply = read_frame(&mut client).await;
        assert_eq!(reply.frame_type, FrameType::Err);

        client.write_frame(&connect_frame(&token)).await.unwrap();
        let reply = read_frame(&mut client).await;
        assert_eq!(reply.frame_type, FrameType::Send);
    }

    #[tokio::test]
    async fn test_inbound_allow_list_enforced() {
        let (bridge, bus, token) = test_bridge(None).await;
        let mut forbidden = bus.subscribe("test.forbidden").await;
        let mut allowed = bus.subscribe("test.inbound").await;
        let mut client = spawn_bridge(bridge);

        client.write_frame(&connect_frame(&token)).await.unwrap();
        read_frame(&mut client).await;

        client
            .write_frame(&BridgeFrame::publish("test.forbidden", json!(1)))
            .await
            .unwrap();
        let reply = read_frame(&mut client).await;
        assert_eq!(reply.frame_type, FrameType::Err);

        // A later allowed frame arrives; the rejected one never did.
        client
            .write_frame(&BridgeFrame::publish("test.inbound", json!(2)))
            .await
            .unwrap();
        let msg = allowed.rx.recv().await.unwrap();
        assert_eq!(msg.body, Some(json!(2)));
        assert!(forbidden.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_register_delivers_outbound() {
        let (bridge, bus, token) = test_bridge(None).await;
        let mut client = spawn_bridge(bridge);

        client.write_frame(&connect_frame(&token)).await.unwrap();
        read_frame(&mut client).await;

        client
            .write_frame(&BridgeFrame::register("test.outbound"))
            .await
            .unwrap();
        // Wait for the registration to land before publishing.
        while bus.endpoint_count("test.outbound").await == 0 {
            tokio::task::yield_now().await;
        }
        bus.publish(BusMessage::new("test.outbound", json!({ "n": 7 })))
            .await;

        let frame = read_frame(&mut client).await;
        assert_eq!(frame.frame_type, FrameType::Send);
        assert_eq!(frame.address.as_deref(), Some("test.outbound"));
        assert_eq!(frame.body.unwrap()["n"], json!(7));
    }

    #[tokio::test]
    async fn test_register_rejected_outside_allow_list() {
        let (bridge, bus, token) = test_bridge(None).await;
        let mut client = spawn_bridge(bridge);

        client.write_frame(&connect_frame(&token)).await.unwrap();
        read_frame(&mut client).await;

        client
            .write_frame(&BridgeFrame::register("test.inbound"))
            .await
            .unwrap();
        let reply = read_frame(&mut client).await;
        assert_eq!(reply.frame_type, FrameType::Err);
        assert_eq!(bus.endpoint_count("test.inbound").await, 0);
    }

    #[tokio::test]
    async fn test_disconnect_event_on_close() {
        let (bridge, bus, token) = test_bridge(None).await;
        let mut disconnects = bus.subscribe("test.disconnected").await;
        let mut client = spawn_bridge(bridge);

        client.write_frame(&connect_frame(&token)).await.unwrap();
        read_frame(&mut client).await;

        drop(client);
        let event = disconnects.rx.recv().await.unwrap();
        assert_eq!(event.body.unwrap()["instanceId"], json!("m1"));
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let (bridge, _bus, _token) = test_bridge(None).await;
        let mut client = spawn_bridge(bridge);

        client
            .write_frame(&BridgeFrame {
                frame_type: FrameType::Ping,
                address: None,
                headers: None,
                body: None,
                reply_address: None,
                message: None,
            })
            .await
            .unwrap();
        let reply = read_frame(&mut client).await;
        assert_eq!(reply.frame_type, FrameType::Pong);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout_closes_socket() {
        let (bridge, _bus, _token) = test_bridge(Some(Duration::from_secs(5))).await;
        let mut client = spawn_bridge(bridge);

        // No frame sent; the paused clock fast-forwards past the
        // deadline and the engine drops its end of the pipe.
        assert!(client.read_frame().await.unwrap().is_none());
    }

    #[test]
    fn test_exact_pattern() {
        let pattern = AddressPattern::exact("service.live-view");
        assert!(pattern.matches("service.live-view"));
        assert!(!pattern.matches("service.live-view:sub"));
        assert!(!pattern.matches("service.live"));
    }

    #[test]
    fn test_suffixed_pattern_requires_nonempty_suffix() {
        let pattern = AddressPattern::suffixed("provide.live-view-subscriber");
        assert!(pattern.matches("provide.live-view-subscriber:sub-1"));
        assert!(!pattern.matches("provide.live-view-subscriber"));
        assert!(!pattern.matches("provide.live-view-subscriber:"));
        assert!(!pattern.matches("provide.live-view-subscriberXsub"));
    }

    #[test]
    fn test_spec_allow_lists() {
        let spec = BridgeSpec {
            name: "test",
            connect_address: "connect",
            disconnect_address: "disconnect",
            inbound: vec![AddressPattern::exact("a"), AddressPattern::suffixed("fan")],
            outbound: vec![AddressPattern::exact("b")],
        };
        assert!(spec.inbound_allows("a"));
        assert!(spec.inbound_allows("fan:x"));
        assert!(!spec.inbound_allows("b"));
        assert!(spec.outbound_allows("b"));
        assert!(!spec.outbound_allows("a"));
    }
}
