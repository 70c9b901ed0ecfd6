// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 tracelink.dev

//! Service discovery over the event bus.
//!
//! Processors announce the live services they host; markers fetch the
//! record list before issuing service requests. Records live only in
//! memory and disappear with the platform process.

use crate::bus::{BusMessage, EventBus};
use crate::protocol::addresses;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// One published service endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRecord {
    pub name: String,
    /// Bus address the service answers on.
    pub address: String,
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

/// In-memory record store, keyed by service name.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    records: Arc<RwLock<HashMap<String, ServiceRecord>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish or refresh a record. Returns false when an identical
    /// record was already present.
    pub fn publish(&self, record: ServiceRecord) -> bool {
        let mut records = self.records.write();
        match records.get(&record.name) {
            Some(existing) if *existing == record => false,
            _ => {
                records.insert(record.name.clone(), record);
                true
            }
        }
    }

    pub fn unpublish(&self, name: &str) -> Option<ServiceRecord> {
        self.records.write().remove(name)
    }

    pub fn records(&self) -> Vec<ServiceRecord> {
        let mut records: Vec<ServiceRecord> = self.records.read().values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    pub fn lookup(&self, name: &str) -> Option<ServiceRecord> {
        self.records.read().get(name).cloned()
    }
}

/// Bus-facing discovery endpoint: consumes announcements and answers
/// record queries.
pub struct DiscoveryService {
    bus: EventBus,
    registry: ServiceRegistry,
}

impl DiscoveryService {
    pub fn new(bus: EventBus, registry: ServiceRegistry) -> Self {
        Self { bus, registry }
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub async fn run(&self, shutdown: Arc<Notify>) {
        let mut announcements = self.bus.subscribe(addresses::DISCOVERY_ANNOUNCE).await;
        let mut queries = self.bus.subscribe(addresses::GET_RECORDS).await;
        let mut usage = self.bus.subscribe(addresses::DISCOVERY_USAGE).await;

        loop {
            tokio::select! {
                Some(msg) = announcements.rx.recv() => self.handle_announce(msg),
                Some(msg) = queries.rx.recv() => self.handle_query(msg).await,
                Some(msg) = usage.rx.recv() => {
                    debug!(body = ?msg.body, "service usage report");
                }
                _ = shutdown.notified() => break,
            }
        }
    }

    fn handle_announce(&self, msg: BusMessage) {
        let Some(body) = msg.body else {
            warn!("discovery announcement without body");
            return;
        };
        match serde_json::from_value::<ServiceRecord>(body) {
            Ok(record) => {
                if self.registry.publish(record.clone()) {
                    info!(service = %record.name, address = %record.address, "service published");
                }
            }
            Err(e) => warn!(error = %e, "malformed discovery announcement"),
        }
    }

    async fn handle_query(&self, msg: BusMessage) {
        let Some(reply_address) = msg.reply_address else {
            debug!("record query without reply address");
            return;
        };
        let body = serde_json::to_value(self.registry.records()).unwrap_or(Value::Null);
        self.bus.publish(BusMessage::new(reply_address, body)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(name: &str, address: &str) -> ServiceRecord {
        ServiceRecord {
            name: name.to_string(),
            address: address.to_string(),
            meta: HashMap::new(),
        }
    }

    #[test]
    fn test_publish_is_idempotent_per_record() {
        let registry = ServiceRegistry::new();
        assert!(registry.publish(record("live-service", "service.live-service")));
        assert!(!registry.publish(record("live-service", "service.live-service")));
        assert_eq!(registry.records().len(), 1);
    }

    #[test]
    fn test_republish_replaces_record() {
        let registry = ServiceRegistry::new();
        registry.publish(record("live-service", "old.address"));
        assert!(registry.publish(record("live-service", "new.address")));
        assert_eq!(registry.lookup("live-service").unwrap().address, "new.address");
    }

    #[test]
    fn test_platform_record_lifecycle() {
        let registry = ServiceRegistry::new();
        registry.publish(record("tracelink-platform", addresses::LIVE_SERVICE));
        assert!(registry.lookup("tracelink-platform").is_some());
        assert!(registry.unpublish("tracelink-platform").is_some());
        assert!(registry.records().is_empty());
        assert!(registry.unpublish("tracelink-platform").is_none());
    }

    #[tokio::test]
    async fn test_announce_then_query_roundtrip() {
        let bus = EventBus::new();
        let service = Arc::new(DiscoveryService::new(bus.clone(), ServiceRegistry::new()));
        let shutdown = Arc::new(Notify::new());
        let runner = Arc::clone(&service);
        let stop = Arc::clone(&shutdown);
        tokio::spawn(async move { runner.run(stop).await });
        while bus.endpoint_count(addresses::GET_RECORDS).await == 0 {
            tokio::task::yield_now().await;
        }

        bus.publish(BusMessage::new(
            addresses::DISCOVERY_ANNOUNCE,
            json!({ "name": "live-service", "address": "service.live-service" }),
        ))
        .await;

        let mut reply_sub = bus.subscribe("reply.records").await;
        // Announcement handling races the query; retry until the record
        // shows up.
        loop {
            bus.publish(
                BusMessage::new(addresses::GET_RECORDS, Value::Null)
                    .with_reply_address("reply.records"),
            )
            .await;
            let reply = reply_sub.rx.recv().await.unwrap();
            let records: Vec<ServiceRecord> = serde_json::from_value(reply.body.unwrap()).unwrap();
            if !records.is_empty() {
                assert_eq!(records[0].name, "live-service");
                break;
            }
            tokio::task::yield_now().await;
        }
        shutdown.notify_one();
    }
}
