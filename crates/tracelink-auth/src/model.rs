// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 tracelink.dev

//! Core platform data model: developers, roles, capabilities, access
//! permissions, data redactions, and connected-instance records.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A registered developer. The access token is only populated on the
/// paths that issue or look up tokens; listing developers returns bare ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Developer {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl Developer {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            access_token: None,
        }
    }

    pub fn with_token(id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            access_token: Some(token.into()),
        }
    }
}

/// A named role. Role names are interned lowercase: two roles with the
/// same name (in any case) are the same role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeveloperRole {
    role_name: String,
}

impl DeveloperRole {
    pub const MANAGER_NAME: &'static str = "manager";
    pub const USER_NAME: &'static str = "user";

    pub fn manager() -> Self {
        Self {
            role_name: Self::MANAGER_NAME.to_string(),
        }
    }

    pub fn user() -> Self {
        Self {
            role_name: Self::USER_NAME.to_string(),
        }
    }

    pub fn from_name(name: &str) -> Self {
        Self {
            role_name: name.trim().to_lowercase(),
        }
    }

    pub fn role_name(&self) -> &str {
        &self.role_name
    }
}

impl fmt::Display for DeveloperRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.role_name)
    }
}

/// Enumerated capability flags grantable to a role.
///
/// Manager-only capabilities are installed on the built-in `manager`
/// role but withheld from `user` during default setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RolePermission {
    Reset,
    AddDeveloper,
    RemoveDeveloper,
    GetDevelopers,
    RefreshDeveloperToken,
    AddRole,
    RemoveRole,
    GetRoles,
    AddDeveloperRole,
    RemoveDeveloperRole,
    AddRolePermission,
    RemoveRolePermission,
    GetAccessPermissions,
    AddAccessPermission,
    RemoveAccessPermission,
    GetDataRedactions,
    AddDataRedaction,
    RemoveDataRedaction,
    AddLiveBreakpoint,
    AddLiveLog,
    AddLiveMeter,
    AddLiveSpan,
    GetLiveInstruments,
    RemoveLiveInstrument,
    ClearAllLiveInstruments,
    AddLiveViewSubscription,
    GetLiveViewSubscriptions,
    RemoveLiveViewSubscription,
}

impl RolePermission {
    /// Every capability, in declaration order.
    pub const ALL: [RolePermission; 28] = [
        RolePermission::Reset,
        RolePermission::AddDeveloper,
        RolePermission::RemoveDeveloper,
        RolePermission::GetDevelopers,
        RolePermission::RefreshDeveloperToken,
        RolePermission::AddRole,
        RolePermission::RemoveRole,
        RolePermission::GetRoles,
        RolePermission::AddDeveloperRole,
        RolePermission::RemoveDeveloperRole,
        RolePermission::AddRolePermission,
        RolePermission::RemoveRolePermission,
        RolePermission::GetAccessPermissions,
        RolePermission::AddAccessPermission,
        RolePermission::RemoveAccessPermission,
        RolePermission::GetDataRedactions,
        RolePermission::AddDataRedaction,
        RolePermission::RemoveDataRedaction,
        RolePermission::AddLiveBreakpoint,
        RolePermission::AddLiveLog,
        RolePermission::AddLiveMeter,
        RolePermission::AddLiveSpan,
        RolePermission::GetLiveInstruments,
        RolePermission::RemoveLiveInstrument,
        RolePermission::ClearAllLiveInstruments,
        RolePermission::AddLiveViewSubscription,
        RolePermission::GetLiveViewSubscriptions,
        RolePermission::RemoveLiveViewSubscription,
    ];

    /// Whether this capability is reserved to manager roles during
    /// default installation.
    pub fn manager_only(&self) -> bool {
        !matches!(
            self,
            RolePermission::AddLiveBreakpoint
                | RolePermission::AddLiveLog
                | RolePermission::AddLiveMeter
                | RolePermission::AddLiveSpan
                | RolePermission::GetLiveInstruments
                | RolePermission::RemoveLiveInstrument
                | RolePermission::AddLiveViewSubscription
                | RolePermission::GetLiveViewSubscriptions
                | RolePermission::RemoveLiveViewSubscription
        )
    }

    /// Stable storage name (SCREAMING_SNAKE_CASE).
    pub fn as_str(&self) -> &'static str {
        match self {
            RolePermission::Reset => "RESET",
            RolePermission::AddDeveloper => "ADD_DEVELOPER",
            RolePermission::RemoveDeveloper => "REMOVE_DEVELOPER",
            RolePermission::GetDevelopers => "GET_DEVELOPERS",
            RolePermission::RefreshDeveloperToken => "REFRESH_DEVELOPER_TOKEN",
            RolePermission::AddRole => "ADD_ROLE",
            RolePermission::RemoveRole => "REMOVE_ROLE",
            RolePermission::GetRoles => "GET_ROLES",
            RolePermission::AddDeveloperRole => "ADD_DEVELOPER_ROLE",
            RolePermission::RemoveDeveloperRole => "REMOVE_DEVELOPER_ROLE",
            RolePermission::AddRolePermission => "ADD_ROLE_PERMISSION",
            RolePermission::RemoveRolePermission => "REMOVE_ROLE_PERMISSION",
            RolePermission::GetAccessPermissions => "GET_ACCESS_PERMISSIONS",
            RolePermission::AddAccessPermission => "ADD_ACCESS_PERMISSION",
            RolePermission::RemoveAccessPermission => "REMOVE_ACCESS_PERMISSION",
            RolePermission::GetDataRedactions => "GET_DATA_REDACTIONS",
            RolePermission::AddDataRedaction => "ADD_DATA_REDACTION",
            RolePermission::RemoveDataRedaction => "REMOVE_DATA_REDACTION",
            RolePermission::AddLiveBreakpoint => "ADD_LIVE_BREAKPOINT",
            RolePermission::AddLiveLog => "ADD_LIVE_LOG",
            RolePermission::AddLiveMeter => "ADD_LIVE_METER",
            RolePermission::AddLiveSpan => "ADD_LIVE_SPAN",
            RolePermission::GetLiveInstruments => "GET_LIVE_INSTRUMENTS",
            RolePermission::RemoveLiveInstrument => "REMOVE_LIVE_INSTRUMENT",
            RolePermission::ClearAllLiveInstruments => "CLEAR_ALL_LIVE_INSTRUMENTS",
            RolePermission::AddLiveViewSubscription => "ADD_LIVE_VIEW_SUBSCRIPTION",
            RolePermission::GetLiveViewSubscriptions => "GET_LIVE_VIEW_SUBSCRIPTIONS",
            RolePermission::RemoveLiveViewSubscription => "REMOVE_LIVE_VIEW_SUBSCRIPTION",
        }
    }

    /// Parse a stable storage name back to a capability.
    pub fn from_name(name: &str) -> Option<Self> {
        RolePermission::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == name)
    }
}

impl fmt::Display for RolePermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an access permission's patterns form a white-list (explicit
/// grant) or a black-list (explicit denial).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessType {
    WhiteList,
    BlackList,
}

/// A set of glob-style location patterns restricting where a developer
/// may install instruments. `*` matches one or more characters;
/// comparison is case-sensitive against the full location string
/// (e.g. `package.Class.method`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessPermission {
    pub id: String,
    pub location_patterns: Vec<String>,
    #[serde(rename = "type")]
    pub access_type: AccessType,
}

/// A pattern identifying sensitive data to scrub from instrumentation
/// results before they are returned to a developer. Pattern semantics
/// are opaque to this crate; the redaction is applied downstream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataRedaction {
    pub id: String,
    pub redaction_pattern: String,
}

/// Handshake payload sent by a connecting peer (marker or processor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceConnection {
    pub instance_id: String,
    /// Epoch milliseconds at the peer when it initiated the connection.
    pub connection_time: i64,
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

/// Ephemeral presence record for a connected peer. Exists only while
/// the peer's socket is open; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveInstance {
    pub instance_id: String,
    /// Epoch milliseconds at which the handshake completed.
    pub connected_at: i64,
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_names_are_interned_lowercase() {
        assert_eq!(DeveloperRole::from_name("Manager"), DeveloperRole::manager());
        assert_eq!(DeveloperRole::from_name("  USER "), DeveloperRole::user());
        assert_eq!(DeveloperRole::from_name("tester").role_name(), "tester");
    }

    #[test]
    fn permission_names_roundtrip() {
        for p in RolePermission::ALL {
            assert_eq!(RolePermission::from_name(p.as_str()), Some(p));
        }
        assert_eq!(RolePermission::from_name("NOT_A_PERMISSION"), None);
    }

    #[test]
    fn live_capabilities_are_not_manager_only() {
        assert!(!RolePermission::AddLiveBreakpoint.manager_only());
        assert!(!RolePermission::GetLiveViewSubscriptions.manager_only());
        assert!(RolePermission::Reset.manager_only());
        assert!(RolePermission::RemoveDeveloper.manager_only());
    }

    #[test]
    fn access_permission_serializes_with_type_tag() {
        let perm = AccessPermission {
            id: "p1".into(),
            location_patterns: vec!["com.example.*".into()],
            access_type: AccessType::WhiteList,
        };
        let json = serde_json::to_string(&perm).unwrap();
        assert!(json.contains("\"type\":\"WHITE_LIST\""));
        assert!(json.contains("locationPatterns"));

        let back: AccessPermission = serde_json::from_str(&json).unwrap();
        assert_eq!(back, perm);
    }

    #[test]
    fn instance_connection_defaults_empty_meta() {
        let conn: InstanceConnection =
            serde_json::from_str(r#"{"instanceId":"m1","connectionTime":1700000000000}"#).unwrap();
        assert_eq!(conn.instance_id, "m1");
        assert!(conn.meta.is_empty());
    }
}
