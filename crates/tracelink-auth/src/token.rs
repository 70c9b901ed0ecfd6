// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 tracelink.dev

//! Bearer-credential authentication for connecting peers.
//!
//! Two modes, selected by configuration:
//!
//! - **JWT mode** (signing key configured): the credential is an HS256
//!   token whose `sub` claim names the developer.
//! - **Access-token mode** (no signing key): the credential is a raw
//!   platform access token looked up directly in the permission store.

use crate::storage::{PermissionStorage, StorageBackend, StorageError};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::debug;

/// Authentication error types.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    #[error("unknown developer: {0}")]
    UnknownDeveloper(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Resolved identity attached to a connection after a successful
/// handshake; request-scoped context for every later frame on the socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeveloperAuth {
    pub self_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl DeveloperAuth {
    pub fn new(self_id: impl Into<String>) -> Self {
        Self {
            self_id: self_id.into(),
            access_token: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
}

/// Verifies connect-frame credentials against the permission store.
pub struct TokenAuthenticator<B: StorageBackend> {
    storage: Arc<PermissionStorage<B>>,
    decoding_key: Option<DecodingKey>,
}

impl<B: StorageBackend> TokenAuthenticator<B> {
    /// JWT mode when `signing_key` is set, access-token mode otherwise.
    pub fn new(storage: Arc<PermissionStorage<B>>, signing_key: Option<&str>) -> Self {
        Self {
            storage,
            decoding_key: signing_key.map(|key| DecodingKey::from_secret(key.as_bytes())),
        }
    }

    pub async fn authenticate(&self, credential: &str) -> Result<DeveloperAuth, AuthError> {
        match &self.decoding_key {
            Some(key) => self.authenticate_jwt(credential, key).await,
            None => self.authenticate_access_token(credential).await,
        }
    }

    async fn authenticate_jwt(
        &self,
        credential: &str,
        key: &DecodingKey,
    ) -> Result<DeveloperAuth, AuthError> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<Claims>(credential, key, &validation)
            .map_err(|e| AuthError::InvalidCredential(e.to_string()))?;
        let claims = data.claims;
        if !self.storage.has_developer(&claims.sub).await? {
            return Err(AuthError::UnknownDeveloper(claims.sub));
        }
        debug!(developer = %claims.sub, "authenticated via JWT");
        Ok(DeveloperAuth {
            self_id: claims.sub,
            access_token: claims.access_token,
        })
    }

    async fn authenticate_access_token(&self, credential: &str) -> Result<DeveloperAuth, AuthError> {
        let developer = self
            .storage
            .get_developer_by_access_token(credential)
            .await?
            .ok_or_else(|| AuthError::InvalidCredential("unrecognized access token".into()))?;
        debug!(developer = %developer.id, "authenticated via access token");
        Ok(DeveloperAuth {
            self_id: developer.id,
            access_token: developer.access_token,
        })
    }
}

/// Sign a short-lived HS256 token for a developer. Used by the platform
/// CLI and by tests; the bridge itself only verifies.
pub fn sign_developer_token(
    signing_key: &str,
    developer_id: &str,
    ttl_secs: u64,
) -> Result<String, AuthError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| AuthError::InvalidCredential(e.to_string()))?
        .as_secs();
    let claims = Claims {
        sub: developer_id.to_string(),
        exp: now + ttl_secs,
        access_token: None,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(signing_key.as_bytes()),
    )
    .map_err(|e| AuthError::InvalidCredential(e.to_string()))
}
