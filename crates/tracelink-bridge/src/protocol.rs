// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 tracelink.dev

//! Bridge wire protocol.
//!
//! Length-prefixed JSON envelopes over TCP:
//!
//! ```text
//! +----------------+-------------------+
//! | Length (4B BE) | JSON payload      |
//! +----------------+-------------------+
//! ```
//!
//! The payload is a [`BridgeFrame`]: `{type, address?, headers?, body?,
//! replyAddress?}` where `type` distinguishes send/publish/register/
//! unregister/ping and `address` is the logical bus address.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Frame discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameType {
    /// Point-to-point delivery to one bus endpoint.
    Send,
    /// Fan-out delivery to every bus endpoint on the address.
    Publish,
    /// Subscribe this socket to an outbound address.
    Register,
    /// Drop a previous registration.
    Unregister,
    /// Keepalive; answered with `pong`.
    Ping,
    /// Keepalive answer.
    Pong,
    /// Failure report from the bridge to the peer.
    Err,
}

/// A single wire frame in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeFrame {
    #[serde(rename = "type")]
    pub frame_type: FrameType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Map<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,

    #[serde(
        default,
        rename = "replyAddress",
        skip_serializing_if = "Option::is_none"
    )]
    pub reply_address: Option<String>,

    /// Error detail; only populated on `err` frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl BridgeFrame {
    pub fn send(address: impl Into<String>, body: Value) -> Self {
        Self {
            frame_type: FrameType::Send,
            address: Some(address.into()),
            headers: None,
            body: Some(body),
            reply_address: None,
            message: None,
        }
    }

    pub fn publish(address: impl Into<String>, body: Value) -> Self {
        Self {
            frame_type: FrameType::Publish,
            address: Some(address.into()),
            headers: None,
            body: Some(body),
            reply_address: None,
            message: None,
        }
    }

    pub fn register(address: impl Into<String>) -> Self {
        Self {
            frame_type: FrameType::Register,
            address: Some(address.into()),
            headers: None,
            body: None,
            reply_address: None,
            message: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            frame_type: FrameType::Err,
            address: None,
            headers: None,
            body: None,
            reply_address: None,
            message: Some(message.into()),
        }
    }

    pub fn pong() -> Self {
        Self {
            frame_type: FrameType::Pong,
            address: None,
            headers: None,
            body: None,
            reply_address: None,
            message: None,
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(Map::new)
            .insert(key.into(), Value::String(value.into()));
        self
    }

    pub fn with_reply_address(mut self, reply_address: impl Into<String>) -> Self {
        self.reply_address = Some(reply_address.into());
        self
    }

    /// String-valued header lookup.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .as_ref()
            .and_then(|headers| headers.get(key))
            .and_then(Value::as_str)
    }
}

/// Reserved bus addresses, grouped by which peers may touch them.
pub mod addresses {
    /// Marker handshake; also republished on the bus as the connect event.
    pub const MARKER_CONNECTED: &str = "platform.status.marker-connected";
    /// Broadcast when a marker's socket closes.
    pub const MARKER_DISCONNECTED: &str = "platform.status.marker-disconnected";
    /// Processor handshake.
    pub const PROCESSOR_CONNECTED: &str = "platform.status.processor-connected";
    /// Broadcast when a processor's socket closes.
    pub const PROCESSOR_DISCONNECTED: &str = "platform.status.processor-disconnected";

    /// Service-record query (discovery records held by the platform).
    pub const GET_RECORDS: &str = "platform.get-records";

    // Utility services markers call into and processors implement.
    pub const LIVE_SERVICE: &str = "service.live-service";
    pub const LIVE_INSTRUMENT: &str = "service.live-instrument";
    pub const LIVE_VIEW: &str = "service.live-view";
    pub const LOG_COUNT_INDICATOR: &str = "service.log-count-indicator";

    // Per-subscriber fan-out prefixes; concrete addresses are
    // `<prefix>:<subscriber id>`.
    pub const LIVE_INSTRUMENT_SUBSCRIBER: &str = "provide.live-instrument-subscriber";
    pub const LIVE_VIEW_SUBSCRIBER: &str = "provide.live-view-subscriber";

    // Service-discovery announce/usage traffic from processors.
    pub const DISCOVERY_ANNOUNCE: &str = "platform.discovery.announce";
    pub const DISCOVERY_USAGE: &str = "platform.discovery.usage";

    // Instrumentation events flowing up from processors.
    pub const BREAKPOINT_HIT: &str = "platform.processor.breakpoint-hit";
    pub const LOG_HIT: &str = "platform.processor.log-hit";

    // Remote probe command prefixes (`<prefix>:<probe id>`).
    pub const LIVE_BREAKPOINT_REMOTE: &str = "probe.command.live-breakpoint-remote";
    pub const LIVE_LOG_REMOTE: &str = "probe.command.live-log-remote";
    pub const LIVE_METER_REMOTE: &str = "probe.command.live-meter-remote";
    pub const LIVE_SPAN_REMOTE: &str = "probe.command.live-span-remote";

    // Platform -> processor notifications.
    pub const REMOTE_REGISTERED: &str = "platform.probe.remote-registered";
    pub const LIVE_BREAKPOINT_APPLIED: &str = "platform.status.live-breakpoint-applied";
    pub const LIVE_BREAKPOINT_REMOVED: &str = "platform.status.live-breakpoint-removed";
    pub const LIVE_LOG_APPLIED: &str = "platform.status.live-log-applied";
    pub const LIVE_LOG_REMOVED: &str = "platform.status.live-log-removed";
    pub const LIVE_METER_APPLIED: &str = "platform.status.live-meter-applied";
    pub const LIVE_METER_REMOVED: &str = "platform.status.live-meter-removed";
    pub const LIVE_SPAN_APPLIED: &str = "platform.status.live-span-applied";
    pub const LIVE_SPAN_REMOVED: &str = "platform.status.live-span-removed";
    pub const SET_LOG_PUBLISH_RATE_LIMIT: &str = "platform.processor.set-log-publish-rate-limit";

    // Presence queries answered by the status service.
    pub const GET_CONNECTED_MARKERS: &str = "bridge.get-connected-markers";
    pub const GET_ACTIVE_MARKERS: &str = "bridge.get-active-markers";
    pub const GET_CONNECTED_PROCESSORS: &str = "bridge.get-connected-processors";
    pub const GET_ACTIVE_PROCESSORS: &str = "bridge.get-active-processors";
}

/// Header carrying the bearer credential on connect frames.
pub const AUTH_TOKEN_HEADER: &str = "auth-token";

/// Header stamped onto processor frames once identity is known.
pub const PROCESSOR_ID_HEADER: &str = "processor_id";

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_send_frame_serialize() {
        let frame = BridgeFrame::send(addresses::LIVE_INSTRUMENT, json!({"command": "add"}))
            .with_header(AUTH_TOKEN_HEADER, "tok")
            .with_reply_address("reply.1");

        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"send\""));
        assert!(json.contains("replyAddress"));
        assert!(!json.contains("message"));

        let parsed: BridgeFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, frame);
        assert_eq!(parsed.header(AUTH_TOKEN_HEADER), Some("tok"));
    }

    #[test]
    fn test_ping_frame_minimal() {
        let parsed: BridgeFrame = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(parsed.frame_type, FrameType::Ping);
        assert!(parsed.address.is_none());
        assert!(parsed.headers.is_none());
    }

    #[test]
    fn test_err_frame_carries_message() {
        let frame = BridgeFrame::err("rejected address");
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"err\""));
        assert!(json.contains("rejected address"));
    }

    #[test]
    fn test_register_frame() {
        let frame = BridgeFrame::register(format!(
            "{}:sub-1",
            addresses::LIVE_INSTRUMENT_SUBSCRIBER
        ));
        let json = serde_json::to_string(&frame).unwrap();
        let parsed: BridgeFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.frame_type, FrameType::Register);
        assert_eq!(
            parsed.address.as_deref(),
            Some("provide.live-instrument-subscriber:sub-1")
        );
    }

    #[test]
    fn test_unknown_frame_type_rejected() {
        let result = serde_json::from_str::<BridgeFrame>(r#"{"type":"exec","address":"x"}"#);
        assert!(result.is_err());
    }
}
