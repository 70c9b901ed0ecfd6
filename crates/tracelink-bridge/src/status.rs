// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 tracelink.dev

//! Presence query service.
//!
//! Answers the reserved `bridge.get-*` bus addresses from the two
//! presence tables, replying on the caller's reply address. Also
//! exposes the same numbers as a direct in-process read API.

use crate::bus::{BusMessage, EventBus};
use crate::presence::PresenceTable;
use crate::protocol::addresses;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Notify;
use tracelink_auth::ActiveInstance;
use tracing::debug;

pub struct StatusService {
    bus: EventBus,
    markers: PresenceTable,
    processors: PresenceTable,
}

impl StatusService {
    pub fn new(bus: EventBus, markers: PresenceTable, processors: PresenceTable) -> Self {
        Self {
            bus,
            markers,
            processors,
        }
    }

    pub fn connected_markers(&self) -> i64 {
        self.markers.connected_count()
    }

    pub fn connected_processors(&self) -> i64 {
        self.processors.connected_count()
    }

    pub fn active_markers(&self) -> Vec<ActiveInstance> {
        self.markers.active_instances()
    }

    pub fn active_processors(&self) -> Vec<ActiveInstance> {
        self.processors.active_instances()
    }

    /// Serve presence queries until `shutdown` is notified.
    pub async fn run(&self, shutdown: Arc<Notify>) {
        let mut connected_markers = self.bus.subscribe(addresses::GET_CONNECTED_MARKERS).await;
        let mut active_markers = self.bus.subscribe(addresses::GET_ACTIVE_MARKERS).await;
        let mut connected_processors = self
            .bus
            .subscribe(addresses::GET_CONNECTED_PROCESSORS)
            .await;
        let mut active_processors = self.bus.subscribe(addresses::GET_ACTIVE_PROCESSORS).await;

        loop {
            tokio::select! {
                Some(msg) = connected_markers.rx.recv() => {
                    self.reply(msg, json!(self.markers.connected_count())).await;
                }
                Some(msg) = active_markers.rx.recv() => {
                    let body = serde_json::to_value(self.markers.active_instances())
                        .unwrap_or(Value::Null);
                    self.reply(msg, body).await;
                }
                Some(msg) = connected_processors.rx.recv() => {
                    self.reply(msg, json!(self.processors.connected_count())).await;
                }
                Some(msg) = active_processors.rx.recv() => {
                    let body = serde_json::to_value(self.processors.active_instances())
                        .unwrap_or(Value::Null);
                    self.reply(msg, body).await;
                }
                _ = shutdown.notified() => break,
            }
        }
    }

    async fn reply(&self, msg: BusMessage, body: Value) {
        let Some(reply_address) = msg.reply_address else {
            debug!(address = %msg.address, "presence query without reply address");
            return;
        };
        self.bus.publish(BusMessage::new(reply_address, body)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(id: &str) -> ActiveInstance {
        ActiveInstance {
            instance_id: id.to_string(),
            connected_at: 1_700_000_000_000,
            meta: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_connected_marker_query() {
        let bus = EventBus::new();
        let markers = PresenceTable::new();
        let processors = PresenceTable::new();
        markers.insert(instance("m1"));
        markers.insert(instance("m2"));
        let service = Arc::new(StatusService::new(bus.clone(), markers, processors));

        let shutdown = Arc::new(Notify::new());
        let runner = Arc::clone(&service);
        let stop = Arc::clone(&shutdown);
        let handle = tokio::spawn(async move { runner.run(stop).await });

        // Wait for the subscriptions to land.
        while bus.endpoint_count(addresses::GET_CONNECTED_MARKERS).await == 0 {
            tokio::task::yield_now().await;
        }

        let mut reply_sub = bus.subscribe("reply.1").await;
        bus.publish(
            BusMessage::new(addresses::GET_CONNECTED_MARKERS, Value::Null)
                .with_reply_address("reply.1"),
        )
        .await;
        let reply = reply_sub.rx.recv().await.unwrap();
        assert_eq!(reply.body, Some(json!(2)));

        shutdown.notify_one();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_active_processor_query() {
        let bus = EventBus::new();
        let markers = PresenceTable::new();
        let processors = PresenceTable::new();
        processors.insert(instance("p1"));
        let service = Arc::new(StatusService::new(bus.clone(), markers, processors));

        let shutdown = Arc::new(Notify::new());
        let runner = Arc::clone(&service);
        let stop = Arc::clone(&shutdown);
        tokio::spawn(async move { runner.run(stop).await });
        while bus.endpoint_count(addresses::GET_ACTIVE_PROCESSORS).await == 0 {
            tokio::task::yield_now().await;
        }

        let mut reply_sub = bus.subscribe("reply.2").await;
        bus.publish(
            BusMessage::new(addresses::GET_ACTIVE_PROCESSORS, Value::Null)
                .with_reply_address("reply.2"),
        )
        .await;
        let reply = reply_sub.rx.recv().await.unwrap();
        let list: Vec<ActiveInstance> = serde_json::from_value(reply.body.unwrap()).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].instance_id, "p1");
    }
}
