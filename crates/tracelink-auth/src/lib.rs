// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 tracelink.dev

//! Developer identity, role, and permission storage for the tracelink
//! platform, plus the authorization engine the instance bridges consult
//! before letting traffic cross.
//!
//! The storage layer is a Redis-shaped key/value-set command surface
//! (`StorageBackend`) with an in-memory backend. All higher-level
//! operations (`PermissionStorage`) are independent idempotent command
//! sequences; there is no cross-call transaction.

pub mod access;
pub mod model;
pub mod storage;
pub mod token;

pub use access::AuthorizationEngine;
pub use model::{
    AccessPermission, AccessType, ActiveInstance, DataRedaction, Developer, DeveloperRole,
    InstanceConnection, RolePermission,
};
pub use storage::{MemoryBackend, PermissionStorage, StorageBackend, StorageError};
pub use token::{AuthError, DeveloperAuth, TokenAuthenticator};
