// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 tracelink.dev

//! Authorization engine: answers "may developer D instrument location
//! L?", "which redactions apply to D?", and "does D hold capability C?".
//!
//! NOTE: when a developer's roles carry no access permissions at all the
//! engine grants access. Deployments wanting default-deny attach a
//! black-list permission to the `user` role.

use crate::model::{AccessType, DataRedaction, RolePermission};
use crate::storage::{PermissionStorage, StorageBackend, StorageError};
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{trace, warn};

/// Policy layer over [`PermissionStorage`]. Cheap to clone.
#[derive(Debug)]
pub struct AuthorizationEngine<B: StorageBackend> {
    storage: Arc<PermissionStorage<B>>,
}

impl<B: StorageBackend> Clone for AuthorizationEngine<B> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
        }
    }
}

impl<B: StorageBackend> AuthorizationEngine<B> {
    pub fn new(storage: Arc<PermissionStorage<B>>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &PermissionStorage<B> {
        &self.storage
    }

    /// Whether the developer may install or observe instruments at the
    /// given location (e.g. `com.example.Service.handle`).
    ///
    /// Black-list patterns deny, white-list patterns grant, and an
    /// explicit white-list hit overrides a black-list hit. With no
    /// permissions configured access is granted.
    pub async fn has_instrument_access(
        &self,
        developer_id: &str,
        location: &str,
    ) -> Result<bool, StorageError> {
        let permissions = self
            .storage
            .get_developer_access_permissions(developer_id)
            .await?;
        if permissions.is_empty() {
            trace!(developer_id, "no access permissions configured, full access");
            return Ok(true);
        }

        let mut has_white_list = false;
        let mut has_black_list = false;
        let mut white_hit = false;
        let mut black_hit = false;
        for permission in &permissions {
            let hit = permission
                .location_patterns
                .iter()
                .any(|pattern| location_pattern_matches(pattern, location));
            match permission.access_type {
                AccessType::WhiteList => {
                    has_white_list = true;
                    white_hit |= hit;
                }
                AccessType::BlackList => {
                    has_black_list = true;
                    black_hit |= hit;
                }
            }
        }

        let allowed = if !has_white_list {
            !black_hit
        } else if !has_black_list {
            white_hit
        } else {
            !black_hit || white_hit
        };
        trace!(developer_id, location, allowed, "instrument access check");
        Ok(allowed)
    }

    /// Union of data redactions across the developer's roles,
    /// de-duplicated by redaction id.
    pub async fn get_developer_data_redactions(
        &self,
        developer_id: &str,
    ) -> Result<Vec<DataRedaction>, StorageError> {
        let mut seen = HashSet::new();
        let mut redactions = Vec::new();
        for role in self.storage.get_developer_roles(developer_id).await? {
            for redaction in self.storage.get_role_data_redactions(&role).await? {
                if seen.insert(redaction.id.clone()) {
                    redactions.push(redaction);
                }
            }
        }
        Ok(redactions)
    }

    /// True if any of the developer's roles grants the capability.
    pub async fn has_permission(
        &self,
        developer_id: &str,
        permission: RolePermission,
    ) -> Result<bool, StorageError> {
        trace!(developer_id, permission = %permission, "checking permission");
        for role in self.storage.get_developer_roles(developer_id).await? {
            if self
                .storage
                .get_role_permissions(&role)
                .await?
                .contains(&permission)
            {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Glob comparison: `.` is literal, `*` matches one or more characters,
/// and the whole location must match.
fn location_pattern_matches(pattern: &str, location: &str) -> bool {
    let regex = pattern.replace('.', "\\.").replace('*', ".+");
    match Regex::new(&format!("^{regex}$")) {
        Ok(regex) => regex.is_match(location),
        Err(e) => {
            warn!(pattern, error = %e, "unusable location pattern");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeveloperRole;
    use crate::storage::MemoryBackend;

    async fn engine_with_developer(developer_id: &str) -> AuthorizationEngine<MemoryBackend> {
        let storage = Arc::new(PermissionStorage::new(MemoryBackend::new()));
        storage.install_defaults().await.unwrap();
        storage.add_developer(developer_id, None).await.unwrap();
        AuthorizationEngine::new(storage)
    }

    async fn attach_permission(
        engine: &AuthorizationEngine<MemoryBackend>,
        id: &str,
        patterns: Vec<&str>,
        access_type: AccessType,
    ) {
        engine
            .storage()
            .add_access_permission(
                id,
                patterns.into_iter().map(String::from).collect(),
                access_type,
            )
            .await
            .unwrap();
        engine
            .storage()
            .add_access_permission_to_role(id, &DeveloperRole::user())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_no_permissions_grants_full_access() {
        let engine = engine_with_developer("alice").await;
        assert!(engine
            .has_instrument_access("alice", "com.anything.At.all")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_black_list_denies_matching_location() {
        let engine = engine_with_developer("alice").await;
        attach_permission(&engine, "p1", vec!["com.foo.*"], AccessType::BlackList).await;

        assert!(!engine
            .has_instrument_access("alice", "com.foo.Bar")
            .await
            .unwrap());
        assert!(engine
            .has_instrument_access("alice", "com.baz.Bar")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_white_list_only_grants_matching_location() {
        let engine = engine_with_developer("alice").await;
        attach_permission(&engine, "p1", vec!["com.foo.*"], AccessType::WhiteList).await;

        assert!(engine
            .has_instrument_access("alice", "com.foo.Bar")
            .await
            .unwrap());
        assert!(!engine
            .has_instrument_access("alice", "org.other.Bar")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_white_list_overrides_black_list() {
        let engine = engine_with_developer("alice").await;
        attach_permission(&engine, "deny", vec!["com.foo.*"], AccessType::BlackList).await;
        attach_permission(&engine, "allow", vec!["com.foo.Bar"], AccessType::WhiteList).await;

        assert!(engine
            .has_instrument_access("alice", "com.foo.Bar")
            .await
            .unwrap());
        assert!(!engine
            .has_instrument_access("alice", "com.foo.Baz")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_dot_is_literal_in_patterns() {
        let engine = engine_with_developer("alice").await;
        attach_permission(&engine, "p1", vec!["com.foo.*"], AccessType::WhiteList).await;

        // 'comXfoo' must not match even though '.' would as a regex.
        assert!(!engine
            .has_instrument_access("alice", "comXfooXBar")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_star_requires_at_least_one_character() {
        let engine = engine_with_developer("alice").await;
        attach_permission(&engine, "p1", vec!["com.foo.*"], AccessType::BlackList).await;

        // "com.foo." alone has nothing for '*' to consume.
        assert!(engine
            .has_instrument_access("alice", "com.foo.")
            .await
            .unwrap());
        assert!(!engine
            .has_instrument_access("alice", "com.foo.X")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_redactions_union_dedupes_by_id() {
        let engine = engine_with_developer("alice").await;
        let storage = engine.storage();
        storage.add_role("extra").await.unwrap();
        let extra = DeveloperRole::from_name("extra");
        storage.add_role_to_developer("alice", &extra).await.unwrap();

        storage.add_data_redaction("r1", "password").await.unwrap();
        storage.add_data_redaction("r2", "ssn").await.unwrap();
        storage
            .add_data_redaction_to_role("r1", &DeveloperRole::user())
            .await
            .unwrap();
        storage.add_data_redaction_to_role("r1", &extra).await.unwrap();
        storage.add_data_redaction_to_role("r2", &extra).await.unwrap();

        let redactions = engine.get_developer_data_redactions("alice").await.unwrap();
        assert_eq!(redactions.len(), 2);
    }

    #[tokio::test]
    async fn test_has_permission_through_any_role() {
        let engine = engine_with_developer("alice").await;

        // Default user role carries live capabilities but not admin ones.
        assert!(engine
            .has_permission("alice", RolePermission::AddLiveBreakpoint)
            .await
            .unwrap());
        assert!(!engine
            .has_permission("alice", RolePermission::Reset)
            .await
            .unwrap());

        engine
            .storage()
            .add_role_to_developer("alice", &DeveloperRole::manager())
            .await
            .unwrap();
        assert!(engine
            .has_permission("alice", RolePermission::Reset)
            .await
            .unwrap());
    }
}
