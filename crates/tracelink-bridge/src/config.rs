// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 tracelink.dev

//! Bridge platform configuration.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

/// Bridge platform configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Address to bind to (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// TCP port the marker bridge listens on (default: 5455)
    #[serde(default = "default_marker_port")]
    pub marker_port: u16,

    /// TCP port the processor bridge listens on (default: 5460)
    #[serde(default = "default_processor_port")]
    pub processor_port: u16,

    /// Platform instance id, stamped into presence records
    #[serde(default = "default_instance_id")]
    pub instance_id: String,

    /// HS256 key for verifying developer JWTs; unset falls back to raw
    /// access-token authentication
    #[serde(default)]
    pub jwt_signing_key: Option<String>,

    /// Maximum frame size (bytes)
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Seconds an unauthenticated socket may stay open (0 = unbounded)
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    /// Enable TCP keepalive on peer connections
    #[serde(default = "default_true")]
    pub tcp_keepalive: bool,

    /// TCP keepalive interval in seconds
    #[serde(default = "default_keepalive_interval")]
    pub tcp_keepalive_interval_secs: u64,
}

fn default_bind_address() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_marker_port() -> u16 {
    5455
}

fn default_processor_port() -> u16 {
    5460
}

fn default_instance_id() -> String {
    "tracelink-platform".to_string()
}

fn default_max_message_size() -> usize {
    2 * 1024 * 1024 // 2 MB
}

fn default_handshake_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_keepalive_interval() -> u64 {
    15
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            marker_port: default_marker_port(),
            processor_port: default_processor_port(),
            instance_id: default_instance_id(),
            jwt_signing_key: None,
            max_message_size: default_max_message_size(),
            handshake_timeout_secs: default_handshake_timeout(),
            tcp_keepalive: true,
            tcp_keepalive_interval_secs: default_keepalive_interval(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a JSON file.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))
    }

    /// Handshake timeout as Duration; `None` when disabled.
    pub fn handshake_timeout(&self) -> Option<Duration> {
        (self.handshake_timeout_secs > 0).then(|| Duration::from_secs(self.handshake_timeout_secs))
    }

    /// Keepalive probe interval as Duration; `None` when disabled.
    pub fn tcp_keepalive(&self) -> Option<Duration> {
        self.tcp_keepalive
            .then(|| Duration::from_secs(self.tcp_keepalive_interval_secs))
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.marker_port == 0 {
            return Err(ConfigError::InvalidValue("marker_port cannot be 0".into()));
        }
        if self.processor_port == 0 {
            return Err(ConfigError::InvalidValue(
                "processor_port cannot be 0".into(),
            ));
        }
        if self.marker_port == self.processor_port {
            return Err(ConfigError::InvalidValue(
                "marker_port and processor_port must differ".into(),
            ));
        }
        if self.instance_id.is_empty() {
            return Err(ConfigError::InvalidValue(
                "instance_id cannot be empty".into(),
            ));
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::InvalidValue(
                "max_message_size cannot be 0".into(),
            ));
        }
        if self.tcp_keepalive && self.tcp_keepalive_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "tcp_keepalive_interval_secs cannot be 0 when keepalive is enabled".into(),
            ));
        }
        if let Some(key) = &self.jwt_signing_key {
            if key.is_empty() {
                return Err(ConfigError::InvalidValue(
                    "jwt_signing_key cannot be empty when set".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, Clone)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IoError(s) => write!(f, "I/O error: {}", s),
            Self::ParseError(s) => write!(f, "Parse error: {}", s),
            Self::SerializeError(s) => write!(f, "Serialize error: {}", s),
            Self::InvalidValue(s) => write!(f, "Invalid value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}
