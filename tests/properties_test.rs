// ABOUTME: Property tests for audit completeness, cache coherence and tool round-trips
// ABOUTME: Drives randomized call mixes, invalidation sequences and JSON payloads through the real chain
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus
#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use std::fmt::Display;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use common::{
    authed, call_params, local_cache, FakeAccess, Harness, MirrorTool, ScriptedRunner,
    VALID_SESSION,
};
use futures_util::future::join_all;
use nixopus_core::models::{Action, AuditStatus, PermissionSet};
use nixopus_mcp_server::authz::{AccessCache, AccessControl};
use nixopus_mcp_server::mcp::schema::{CallToolParams, CallToolResult};
use nixopus_mcp_server::mcp::{DispatchConfig, ToolDispatcher};
use proptest::prelude::*;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("test runtime")
}

fn fail(error: impl Display) -> TestCaseError {
    TestCaseError::fail(error.to_string())
}

/// One kind of `tools/call` made by the seeded user
#[derive(Debug, Clone)]
enum Call {
    Echo(String),
    NoToken,
    OtherOrganization,
    MissingPermission,
    BadArguments,
}

impl Call {
    /// Calls that get past identity leave exactly one audit row
    const fn audited(&self) -> bool {
        !matches!(self, Self::NoToken)
    }

    const fn succeeds(&self) -> bool {
        matches!(self, Self::Echo(_))
    }

    fn params(&self, h: &Harness) -> CallToolParams {
        match self {
            Self::Echo(message) => authed("echo", json!({ "message": message })),
            Self::NoToken => call_params("echo", json!({"message": "x"}), Value::Null),
            Self::OtherOrganization => call_params(
                "echo",
                json!({"message": "x"}),
                json!({"auth_token": VALID_SESSION, "organization_id": h.org2.to_string()}),
            ),
            Self::MissingPermission => authed("run_command", json!({"command": "ls"})),
            Self::BadArguments => authed("echo", json!({"message": 7})),
        }
    }
}

fn call_strategy() -> impl Strategy<Value = Call> {
    prop_oneof![
        3 => "[a-zA-Z0-9 ]{0,24}".prop_map(Call::Echo),
        1 => Just(Call::NoToken),
        1 => Just(Call::OtherOrganization),
        1 => Just(Call::MissingPermission),
        1 => Just(Call::BadArguments),
    ]
}

fn request_id_of(result: &CallToolResult) -> anyhow::Result<Uuid> {
    if let Some(envelope) = result.error_envelope() {
        return Ok(envelope.request_id);
    }
    let id = result
        .structured_content
        .as_ref()
        .and_then(|payload| payload["requestId"].as_str())
        .ok_or_else(|| anyhow!("no request id in {result:?}"))?;
    Ok(id.parse()?)
}

fn json_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-zA-Z0-9 _-]{0,16}".prop_map(Value::from),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|fields| Value::Object(fields.into_iter().collect())),
        ]
    })
}

/// Top-level names never collide with `organization_id`
fn arguments() -> impl Strategy<Value = Value> {
    prop::collection::btree_map("arg_[a-z]{1,6}", json_value(), 0..6)
        .prop_map(|fields| Value::Object(fields.into_iter().collect()))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn every_call_past_identity_leaves_exactly_one_row(
        calls in prop::collection::vec(call_strategy(), 1..10)
    ) {
        runtime().block_on(async {
            let h = Harness::new();
            let dispatcher = h
                .dispatcher(Arc::new(ScriptedRunner::new("", 0)))
                .map_err(fail)?;

            let mut outcomes = Vec::with_capacity(calls.len());
            for call in &calls {
                let result = dispatcher
                    .dispatch(call.params(&h), CancellationToken::new())
                    .await;
                prop_assert_eq!(result.is_error, !call.succeeds());
                outcomes.push((call, request_id_of(&result).map_err(fail)?));
            }

            let rows = h.audit_rows().await;
            prop_assert_eq!(rows.len(), calls.iter().filter(|c| c.audited()).count());
            for (call, request_id) in outcomes {
                let matching: Vec<_> = rows.iter().filter(|r| r.request_id == request_id).collect();
                if !call.audited() {
                    prop_assert!(matching.is_empty());
                    continue;
                }
                prop_assert_eq!(matching.len(), 1);
                let status = matching[0].status;
                if call.succeeds() {
                    prop_assert!(matches!(status, AuditStatus::Success | AuditStatus::Partial));
                    // Allowed calls only ever target an organization the caller belongs to
                    prop_assert_eq!(matching[0].organization_id, Some(h.org1));
                } else {
                    prop_assert!(matches!(
                        status,
                        AuditStatus::Denied | AuditStatus::Error | AuditStatus::Cancelled
                    ));
                }
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn concurrent_misses_read_the_backend_once(callers in 2usize..48, member in any::<bool>()) {
        runtime().block_on(async {
            let directory = Arc::new(FakeAccess::default());
            let (user, org) = (Uuid::new_v4(), Uuid::new_v4());
            if member {
                directory.grant(user, org, PermissionSet::new().with("dashboard", Action::Read));
            }
            directory.set_latency(Duration::from_millis(20));
            let access = Arc::new(AccessCache::new(directory.clone(), local_cache()));

            let memberships = (0..callers).map(|_| {
                let access = Arc::clone(&access);
                async move { access.is_member(user, org).await }
            });
            for answer in join_all(memberships).await {
                prop_assert_eq!(answer.map_err(fail)?, member);
            }

            let snapshots = (0..callers).map(|_| {
                let access = Arc::clone(&access);
                async move { access.permissions_of(user, org).await }
            });
            for snapshot in join_all(snapshots).await {
                prop_assert_eq!(snapshot.map_err(fail)?.allows("dashboard", Action::Read), member);
            }

            prop_assert_eq!(directory.membership_reads.load(Ordering::SeqCst), 1);
            prop_assert_eq!(directory.permission_reads.load(Ordering::SeqCst), 1);
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn reads_after_invalidate_see_the_backend(
        steps in prop::collection::vec((any::<bool>(), any::<bool>()), 1..16)
    ) {
        runtime().block_on(async {
            let directory = Arc::new(FakeAccess::default());
            let (user, org) = (Uuid::new_v4(), Uuid::new_v4());
            let access = AccessCache::new(directory.clone(), local_cache());
            prop_assert!(!access.is_member(user, org).await.map_err(fail)?);

            for (member, whole_user) in steps {
                if member {
                    directory.grant(user, org, PermissionSet::new().with("ssh", Action::Execute));
                } else {
                    directory.revoke(user, org);
                }
                if whole_user {
                    access.invalidate_user(user).await;
                } else {
                    access.invalidate_membership(user, org).await;
                }

                prop_assert_eq!(access.is_member(user, org).await.map_err(fail)?, member);
                let permissions = access.permissions_of(user, org).await.map_err(fail)?;
                prop_assert_eq!(permissions.allows("ssh", Action::Execute), member);
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn mirror_result_equals_its_arguments(args in arguments()) {
        runtime().block_on(async {
            let h = Harness::new();
            let mut registry = h
                .registry(Arc::new(ScriptedRunner::new("", 0)))
                .map_err(fail)?;
            registry.register(Arc::new(MirrorTool)).map_err(fail)?;
            let dispatcher = ToolDispatcher::new(Arc::new(registry), DispatchConfig::default());

            let result = dispatcher
                .dispatch(authed("mirror", args.clone()), CancellationToken::new())
                .await;
            prop_assert!(!result.is_error);
            prop_assert_eq!(result.structured_content, Some(args));
            Ok::<(), TestCaseError>(())
        })?;
    }
}
