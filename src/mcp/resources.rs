// ABOUTME: Services container injected into the middleware chain at registration
// ABOUTME: Holds the identity resolver, access cache, feature flags and audit sink
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

//! # Services
//!
//! Shared collaborators built once at startup and cloned into every composed
//! tool. Tests build one from in-memory fakes.

use std::sync::Arc;

use crate::audit::AuditSink;
use crate::authz::AccessControl;
use crate::database::FeatureFlagStore;
use crate::identity::PrincipalResolver;

/// Collaborators of the middleware chain
#[derive(Clone)]
pub struct Services {
    /// Credential to principal
    pub identity: Arc<dyn PrincipalResolver>,
    /// Membership and permission snapshots
    pub access: Arc<dyn AccessControl>,
    /// Per-organization feature flags
    pub features: Arc<dyn FeatureFlagStore>,
    /// Audit sink
    pub audit: AuditSink,
}

impl Services {
    /// Bundle the collaborators
    #[must_use]
    pub fn new(
        identity: Arc<dyn PrincipalResolver>,
        access: Arc<dyn AccessControl>,
        features: Arc<dyn FeatureFlagStore>,
        audit: AuditSink,
    ) -> Self {
        Self {
            identity,
            access,
            features,
            audit,
        }
    }
}
