// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 tracelink.dev

//! Permission store: developers, access tokens, roles, and the
//! role -> permission / access-pattern / redaction associations.
//!
//! The store speaks a narrow Redis-style command set through
//! [`StorageBackend`] (string get/set/del plus set add/remove/members).
//! Every higher-level operation is a direct sequence of backend commands
//! with single-writer semantics assumed; there are no distributed locks
//! and no cross-command transactions.
//!
//! Key layout:
//!
//! ```text
//! developers:ids                         set of developer ids
//! developers:ids:{id}:access_token       current token for id
//! developers:access_tokens               set of live tokens
//! developers:access_tokens:{token}       reverse mapping token -> id
//! developers:{id}:roles                  set of role names
//! roles                                  set of role names
//! roles:{role}:permissions               set of capability names
//! roles:{role}:access_permissions        set of access permission ids
//! roles:{role}:data_redactions           set of redaction ids
//! access_permissions                     set of ids
//! access_permissions:{id}                JSON {locationPatterns, type}
//! data_redactions                        set of ids
//! data_redactions:{id}                   redaction pattern
//! ```

use crate::model::{
    AccessPermission, AccessType, DataRedaction, Developer, DeveloperRole, RolePermission,
};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::trace;

/// Length of generated access tokens.
const ACCESS_TOKEN_LEN: usize = 50;

/// Storage error types.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("backing store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt record at {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Redis-style command surface the permission store is built on.
///
/// A production deployment would back this with an external store; the
/// in-process [`MemoryBackend`] is used for single-node deployments and
/// tests. All commands are idempotent from the caller's perspective.
pub trait StorageBackend: Send + Sync + 'static {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, StorageError>> + Send;

    fn set(&self, key: &str, value: &str) -> impl Future<Output = Result<(), StorageError>> + Send;

    fn del(&self, key: &str) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Add a member to a set; returns true if it was not already present.
    fn sadd(&self, key: &str, member: &str)
        -> impl Future<Output = Result<bool, StorageError>> + Send;

    /// Remove a member from a set; returns true if it was present.
    fn srem(&self, key: &str, member: &str)
        -> impl Future<Output = Result<bool, StorageError>> + Send;

    fn sismember(
        &self,
        key: &str,
        member: &str,
    ) -> impl Future<Output = Result<bool, StorageError>> + Send;

    fn smembers(&self, key: &str) -> impl Future<Output = Result<Vec<String>, StorageError>> + Send;
}

/// In-memory backend. Sets are ordered for deterministic listings.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    strings: RwLock<HashMap<String, String>>,
    sets: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.strings.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.strings
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StorageError> {
        self.strings.write().await.remove(key);
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StorageError> {
        Ok(self
            .sets
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, StorageError> {
        let mut sets = self.sets.write().await;
        match sets.get_mut(key) {
            Some(set) => {
                let removed = set.remove(member);
                if set.is_empty() {
                    sets.remove(key);
                }
                Ok(removed)
            }
            None => Ok(false),
        }
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, StorageError> {
        Ok(self
            .sets
            .read()
            .await
            .get(key)
            .map_or(false, |set| set.contains(member)))
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .sets
            .read()
            .await
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }
}

/// The permission store proper. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct PermissionStorage<B: StorageBackend> {
    backend: B,
}

impl<B: StorageBackend> PermissionStorage<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Install built-in roles and their default capability grants.
    /// Idempotent: re-running never duplicates entries.
    pub async fn install_defaults(&self) -> Result<(), StorageError> {
        self.add_role(DeveloperRole::MANAGER_NAME).await?;
        self.add_role(DeveloperRole::USER_NAME).await?;
        if !self.has_developer("system").await? {
            self.add_developer("system", None).await?;
        }
        self.add_role_to_developer("system", &DeveloperRole::manager())
            .await?;
        for permission in RolePermission::ALL {
            self.add_permission_to_role(&DeveloperRole::manager(), permission)
                .await?;
        }
        for permission in RolePermission::ALL {
            if !permission.manager_only() {
                self.add_permission_to_role(&DeveloperRole::user(), permission)
                    .await?;
            }
        }
        Ok(())
    }

    /// Clear all redactions, roles, and developers (in that dependency
    /// order) and reinstall the defaults.
    pub async fn reset(&self) -> Result<bool, StorageError> {
        for redaction in self.get_data_redactions().await? {
            self.remove_data_redaction(&redaction.id).await?;
        }
        for role in self.get_roles().await? {
            self.remove_role(&role).await?;
        }
        for developer in self.get_developers().await? {
            self.remove_developer(&developer.id).await?;
        }
        self.install_defaults().await?;
        Ok(true)
    }

    // --- developers ---

    pub async fn get_developers(&self) -> Result<Vec<Developer>, StorageError> {
        let ids = self.backend.smembers("developers:ids").await?;
        Ok(ids.into_iter().map(Developer::new).collect())
    }

    pub async fn has_developer(&self, id: &str) -> Result<bool, StorageError> {
        self.backend.sismember("developers:ids", id).await
    }

    /// Register a developer and grant the built-in `user` role. If no
    /// token is supplied a random alphanumeric one is generated.
    pub async fn add_developer(
        &self,
        id: &str,
        token: Option<String>,
    ) -> Result<Developer, StorageError> {
        let token = token.unwrap_or_else(generate_access_token);
        self.backend.sadd("developers:ids", id).await?;
        self.backend
            .set(&format!("developers:access_tokens:{token}"), id)
            .await?;
        self.backend.sadd("developers:access_tokens", &token).await?;
        self.backend
            .set(&format!("developers:ids:{id}:access_token"), &token)
            .await?;
        self.add_role_to_developer(id, &DeveloperRole::user()).await?;
        Ok(Developer::with_token(id, token))
    }

    /// Remove a developer, its token mapping (both directions), and its
    /// role memberships. Idempotent: unknown ids are a no-op.
    pub async fn remove_developer(&self, id: &str) -> Result<(), StorageError> {
        if let Some(token) = self.get_access_token(id).await? {
            self.backend
                .del(&format!("developers:access_tokens:{token}"))
                .await?;
            self.backend
                .srem("developers:access_tokens", &token)
                .await?;
        }
        self.backend.srem("developers:ids", id).await?;
        self.backend
            .del(&format!("developers:ids:{id}:access_token"))
            .await?;
        for role in self.get_developer_roles(id).await? {
            self.remove_role_from_developer(id, &role).await?;
        }
        Ok(())
    }

    pub async fn get_access_token(&self, id: &str) -> Result<Option<String>, StorageError> {
        self.backend
            .get(&format!("developers:ids:{id}:access_token"))
            .await
    }

    /// Replace a developer's access token. A byte-identical token is a
    /// no-op; otherwise the old token is revoked before the new one is
    /// installed. Auto-registers the developer id if unknown.
    pub async fn set_access_token(&self, id: &str, token: &str) -> Result<(), StorageError> {
        match self.get_access_token(id).await? {
            Some(existing) if existing == token => return Ok(()),
            Some(existing) => {
                self.backend
                    .srem("developers:access_tokens", &existing)
                    .await?;
                self.backend
                    .del(&format!("developers:access_tokens:{existing}"))
                    .await?;
            }
            None => {
                self.backend.sadd("developers:ids", id).await?;
            }
        }
        self.backend
            .set(&format!("developers:access_tokens:{token}"), id)
            .await?;
        self.backend.sadd("developers:access_tokens", token).await?;
        self.backend
            .set(&format!("developers:ids:{id}:access_token"), token)
            .await?;
        Ok(())
    }

    pub async fn get_developer_by_access_token(
        &self,
        token: &str,
    ) -> Result<Option<Developer>, StorageError> {
        let id = self
            .backend
            .get(&format!("developers:access_tokens:{token}"))
            .await?;
        Ok(id.map(|id| Developer::with_token(id, token)))
    }

    pub async fn has_access_token(&self, token: &str) -> Result<bool, StorageError> {
        self.backend
            .sismember("developers:access_tokens", token)
            .await
    }

    // --- roles ---

    pub async fn has_role(&self, role_name: &str) -> Result<bool, StorageError> {
        let role = DeveloperRole::from_name(role_name);
        self.backend.sismember("roles", role.role_name()).await
    }

    pub async fn add_role(&self, role_name: &str) -> Result<bool, StorageError> {
        let role = DeveloperRole::from_name(role_name);
        self.backend.sadd("roles", role.role_name()).await
    }

    /// Remove a role, cascading its permission, access-permission, and
    /// redaction associations first.
    pub async fn remove_role(&self, role: &DeveloperRole) -> Result<bool, StorageError> {
        for permission in self.get_role_permissions(role).await? {
            self.remove_permission_from_role(role, permission).await?;
        }
        for access in self.get_role_access_permissions(role).await? {
            self.remove_access_permission_from_role(&access.id, role)
                .await?;
        }
        for redaction in self.get_role_data_redactions(role).await? {
            self.remove_data_redaction_from_role(&redaction.id, role)
                .await?;
        }
        self.backend.srem("roles", role.role_name()).await
    }

    pub async fn get_roles(&self) -> Result<Vec<DeveloperRole>, StorageError> {
        let names = self.backend.smembers("roles").await?;
        Ok(names
            .into_iter()
            .map(|name| DeveloperRole::from_name(&name))
            .collect())
    }

    pub async fn add_role_to_developer(
        &self,
        id: &str,
        role: &DeveloperRole,
    ) -> Result<(), StorageError> {
        self.backend
            .sadd(&format!("developers:{id}:roles"), role.role_name())
            .await?;
        Ok(())
    }

    pub async fn remove_role_from_developer(
        &self,
        id: &str,
        role: &DeveloperRole,
    ) -> Result<(), StorageError> {
        self.backend
            .srem(&format!("developers:{id}:roles"), role.role_name())
            .await?;
        Ok(())
    }

    pub async fn get_developer_roles(
        &self,
        developer_id: &str,
    ) -> Result<Vec<DeveloperRole>, StorageError> {
        let names = self
            .backend
            .smembers(&format!("developers:{developer_id}:roles"))
            .await?;
        Ok(names
            .into_iter()
            .map(|name| DeveloperRole::from_name(&name))
            .collect())
    }

    // --- role capabilities ---

    pub async fn add_permission_to_role(
        &self,
        role: &DeveloperRole,
        permission: RolePermission,
    ) -> Result<(), StorageError> {
        self.backend.sadd("roles", role.role_name()).await?;
        self.backend
            .sadd(
                &format!("roles:{}:permissions", role.role_name()),
                permission.as_str(),
            )
            .await?;
        Ok(())
    }

    pub async fn remove_permission_from_role(
        &self,
        role: &DeveloperRole,
        permission: RolePermission,
    ) -> Result<(), StorageError> {
        self.backend
            .srem(
                &format!("roles:{}:permissions", role.role_name()),
                permission.as_str(),
            )
            .await?;
        Ok(())
    }

    pub async fn get_role_permissions(
        &self,
        role: &DeveloperRole,
    ) -> Result<Vec<RolePermission>, StorageError> {
        let key = format!("roles:{}:permissions", role.role_name());
        let names = self.backend.smembers(&key).await?;
        names
            .into_iter()
            .map(|name| {
                RolePermission::from_name(&name).ok_or_else(|| StorageError::Corrupt {
                    key: key.clone(),
                    reason: format!("unknown permission {name:?}"),
                })
            })
            .collect()
    }

    pub async fn get_developer_permissions(
        &self,
        developer_id: &str,
    ) -> Result<BTreeSet<String>, StorageError> {
        let mut permissions = BTreeSet::new();
        for role in self.get_developer_roles(developer_id).await? {
            for permission in self.get_role_permissions(&role).await? {
                permissions.insert(permission.as_str().to_string());
            }
        }
        Ok(permissions)
    }

    // --- access permissions ---

    pub async fn get_access_permissions(&self) -> Result<Vec<AccessPermission>, StorageError> {
        let ids = self.backend.smembers("access_permissions").await?;
        let mut permissions = Vec::with_capacity(ids.len());
        for id in ids {
            permissions.push(self.get_access_permission(&id).await?);
        }
        Ok(permissions)
    }

    pub async fn has_access_permission(&self, id: &str) -> Result<bool, StorageError> {
        self.backend.sismember("access_permissions", id).await
    }

    pub async fn get_access_permission(&self, id: &str) -> Result<AccessPermission, StorageError> {
        let key = format!("access_permissions:{id}");
        let raw = self
            .backend
            .get(&key)
            .await?
            .ok_or_else(|| StorageError::Corrupt {
                key: key.clone(),
                reason: "listed in access_permissions but record missing".into(),
            })?;
        let value: serde_json::Value =
            serde_json::from_str(&raw).map_err(|e| StorageError::Corrupt {
                key: key.clone(),
                reason: e.to_string(),
            })?;
        let location_patterns = value["locationPatterns"]
            .as_array()
            .map(|patterns| {
                patterns
                    .iter()
                    .filter_map(|p| p.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let access_type = match value["type"].as_str() {
            Some("WHITE_LIST") => AccessType::WhiteList,
            Some("BLACK_LIST") => AccessType::BlackList,
            other => {
                return Err(StorageError::Corrupt {
                    key,
                    reason: format!("unknown access type {other:?}"),
                })
            }
        };
        Ok(AccessPermission {
            id: id.to_string(),
            location_patterns,
            access_type,
        })
    }

    pub async fn add_access_permission(
        &self,
        id: &str,
        location_patterns: Vec<String>,
        access_type: AccessType,
    ) -> Result<(), StorageError> {
        self.backend.sadd("access_permissions", id).await?;
        let type_name = match access_type {
            AccessType::WhiteList => "WHITE_LIST",
            AccessType::BlackList => "BLACK_LIST",
        };
        let record = json!({
            "locationPatterns": location_patterns,
            "type": type_name,
        });
        self.backend
            .set(&format!("access_permissions:{id}"), &record.to_string())
            .await?;
        Ok(())
    }

    /// Remove an access permission, detaching it from every role first.
    pub async fn remove_access_permission(&self, id: &str) -> Result<(), StorageError> {
        for role in self.get_roles().await? {
            self.remove_access_permission_from_role(id, &role).await?;
        }
        self.backend.srem("access_permissions", id).await?;
        self.backend.del(&format!("access_permissions:{id}")).await?;
        Ok(())
    }

    pub async fn add_access_permission_to_role(
        &self,
        id: &str,
        role: &DeveloperRole,
    ) -> Result<(), StorageError> {
        self.backend
            .sadd(&format!("roles:{}:access_permissions", role.role_name()), id)
            .await?;
        Ok(())
    }

    pub async fn remove_access_permission_from_role(
        &self,
        id: &str,
        role: &DeveloperRole,
    ) -> Result<(), StorageError> {
        self.backend
            .srem(&format!("roles:{}:access_permissions", role.role_name()), id)
            .await?;
        Ok(())
    }

    pub async fn get_role_access_permissions(
        &self,
        role: &DeveloperRole,
    ) -> Result<Vec<AccessPermission>, StorageError> {
        let ids = self
            .backend
            .smembers(&format!("roles:{}:access_permissions", role.role_name()))
            .await?;
        let mut permissions = Vec::with_capacity(ids.len());
        for id in ids {
            permissions.push(self.get_access_permission(&id).await?);
        }
        Ok(permissions)
    }

    /// Union of access permissions across all of a developer's roles.
    pub async fn get_developer_access_permissions(
        &self,
        developer_id: &str,
    ) -> Result<Vec<AccessPermission>, StorageError> {
        trace!(developer_id, "gathering access permissions");
        let mut permissions = Vec::new();
        for role in self.get_developer_roles(developer_id).await? {
            permissions.extend(self.get_role_access_permissions(&role).await?);
        }
        Ok(permissions)
    }

    // --- data redactions ---

    pub async fn get_data_redactions(&self) -> Result<Vec<DataRedaction>, StorageError> {
        let ids = self.backend.smembers("data_redactions").await?;
        let mut redactions = Vec::with_capacity(ids.len());
        for id in ids {
            redactions.push(self.get_data_redaction(&id).await?);
        }
        Ok(redactions)
    }

    pub async fn has_data_redaction(&self, id: &str) -> Result<bool, StorageError> {
        self.backend.sismember("data_redactions", id).await
    }

    pub async fn get_data_redaction(&self, id: &str) -> Result<DataRedaction, StorageError> {
        let key = format!("data_redactions:{id}");
        let pattern = self
            .backend
            .get(&key)
            .await?
            .ok_or_else(|| StorageError::Corrupt {
                key,
                reason: "listed in data_redactions but record missing".into(),
            })?;
        Ok(DataRedaction {
            id: id.to_string(),
            redaction_pattern: pattern,
        })
    }

    pub async fn add_data_redaction(&self, id: &str, pattern: &str) -> Result<(), StorageError> {
        self.backend.sadd("data_redactions", id).await?;
        self.backend
            .set(&format!("data_redactions:{id}"), pattern)
            .await?;
        Ok(())
    }

    /// Remove a redaction, detaching it from every role first.
    pub async fn remove_data_redaction(&self, id: &str) -> Result<(), StorageError> {
        for role in self.get_roles().await? {
            self.remove_data_redaction_from_role(id, &role).await?;
        }
        self.backend.srem("data_redactions", id).await?;
        self.backend.del(&format!("data_redactions:{id}")).await?;
        Ok(())
    }

    pub async fn add_data_redaction_to_role(
        &self,
        id: &str,
        role: &DeveloperRole,
    ) -> Result<(), StorageError> {
        self.backend
            .sadd(&format!("roles:{}:data_redactions", role.role_name()), id)
            .await?;
        Ok(())
    }

    pub async fn remove_data_redaction_from_role(
        &self,
        id: &str,
        role: &DeveloperRole,
    ) -> Result<(), StorageError> {
        self.backend
            .srem(&format!("roles:{}:data_redactions", role.role_name()), id)
            .await?;
        Ok(())
    }

    pub async fn get_role_data_redactions(
        &self,
        role: &DeveloperRole,
    ) -> Result<Vec<DataRedaction>, StorageError> {
        let ids = self
            .backend
            .smembers(&format!("roles:{}:data_redactions", role.role_name()))
            .await?;
        let mut redactions = Vec::with_capacity(ids.len());
        for id in ids {
            redactions.push(self.get_data_redaction(&id).await?);
        }
        Ok(redactions)
    }

    #[cfg(test)]
    pub(crate) async fn access_token_count(&self) -> Result<usize, StorageError> {
        Ok(self.backend.smembers("developers:access_tokens").await?.len())
    }
}

/// Cryptographically-random 50-character alphanumeric token.
fn generate_access_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ACCESS_TOKEN_LEN)
        .map(char::from)
        .collect()
}
