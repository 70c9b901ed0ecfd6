// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 tracelink.dev

//! In-process event bus.
//!
//! Addresses are plain strings; endpoints register an mpsc sender per
//! address. `publish` delivers to every endpoint on the address, `send`
//! to one. The bus is an explicit dependency injected into the bridges
//! and the status service, which also makes it a natural test double:
//! subscribe in a test and assert what crossed.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::trace;

/// Per-endpoint delivery queue depth.
const ENDPOINT_QUEUE_DEPTH: usize = 128;

/// A message crossing the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub address: String,
    pub headers: Option<Map<String, Value>>,
    pub body: Option<Value>,
    pub reply_address: Option<String>,
}

impl BusMessage {
    pub fn new(address: impl Into<String>, body: Value) -> Self {
        Self {
            address: address.into(),
            headers: None,
            body: Some(body),
            reply_address: None,
        }
    }

    pub fn with_reply_address(mut self, reply_address: impl Into<String>) -> Self {
        self.reply_address = Some(reply_address.into());
        self
    }
}

/// Opaque endpoint handle used for unregistration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointId(u64);

struct Endpoint {
    id: EndpointId,
    tx: mpsc::Sender<BusMessage>,
}

/// Handle to the bus; clones share state.
#[derive(Clone, Default)]
pub struct EventBus {
    endpoints: Arc<RwLock<HashMap<String, Vec<Endpoint>>>>,
    next_id: Arc<AtomicU64>,
}

/// A registered endpoint together with its receive side.
pub struct BusSubscription {
    pub id: EndpointId,
    pub address: String,
    pub rx: mpsc::Receiver<BusMessage>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an externally-owned sender on an address.
    pub async fn register(&self, address: &str, tx: mpsc::Sender<BusMessage>) -> EndpointId {
        let id = EndpointId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.endpoints
            .write()
            .await
            .entry(address.to_string())
            .or_default()
            .push(Endpoint { id, tx });
        trace!(address, ?id, "bus endpoint registered");
        id
    }

    /// Register and keep the receive side; convenience for consumers
    /// and tests.
    pub async fn subscribe(&self, address: &str) -> BusSubscription {
        let (tx, rx) = mpsc::channel(ENDPOINT_QUEUE_DEPTH);
        let id = self.register(address, tx).await;
        BusSubscription {
            id,
            address: address.to_string(),
            rx,
        }
    }

    /// Drop a registration. Unknown ids are a no-op.
    pub async fn unregister(&self, address: &str, id: EndpointId) {
        let mut endpoints = self.endpoints.write().await;
        if let Some(list) = endpoints.get_mut(address) {
            list.retain(|ep| ep.id != id);
            if list.is_empty() {
                endpoints.remove(address);
            }
        }
    }

    /// Deliver to every endpoint registered on the message's address.
    /// Returns how many endpoints accepted the message.
    pub async fn publish(&self, msg: BusMessage) -> usize {
        let endpoints = self.endpoints.read().await;
        let Some(list) = endpoints.get(&msg.address) else {
            trace!(address = %msg.address, "publish with no endpoints");
            return 0;
        };
        let mut delivered = 0;
        for endpoint in list {
            if endpoint.tx.send(msg.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Deliver to a single endpoint on the address (the first one that
    /// accepts). Returns false when nothing is registered.
    pub async fn send(&self, msg: BusMessage) -> bool {
        let endpoints = self.endpoints.read().await;
        let Some(list) = endpoints.get(&msg.address) else {
            trace!(address = %msg.address, "send with no endpoints");
            return false;
        };
        for endpoint in list {
            if endpoint.tx.send(msg.clone()).await.is_ok() {
                return true;
            }
        }
        false
    }

    /// Number of endpoints currently registered on an address.
    pub async fn endpoint_count(&self, address: &str) -> usize {
        self.endpoints
            .read()
            .await
            .get(address)
            .map_or(0, Vec::len)
    }
}
