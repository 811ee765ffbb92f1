// ABOUTME: Shared fakes and fixtures for integration tests
// ABOUTME: In-memory stores, scripted tool backends and a seeded user/organization harness
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus
#![allow(
    dead_code,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::module_name_repetitions,
    clippy::unwrap_used,
    clippy::expect_used
)]
//! Shared test utilities for `nixopus_mcp_server`
//!
//! Every backend the server talks to has an in-memory stand-in here so the
//! full middleware chain can run without Postgres, Redis, Docker or SSH.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use nixopus_core::errors::AuthError;
use nixopus_core::models::{Action, AuditRecord, Membership, PermissionSet, Principal};
use nixopus_mcp_server::audit::{AuditConfig, AuditSink};
use nixopus_mcp_server::authz::AccessCache;
use nixopus_mcp_server::cache::memory::InMemoryCache;
use nixopus_mcp_server::cache::{CacheConfig, CacheKey, CacheProvider, TieredCache};
use nixopus_mcp_server::database::{
    AccessDirectory, AuditWriter, FeatureFlagStore, UserDirectory,
};
use nixopus_mcp_server::errors::{AppError, AppResult};
use nixopus_mcp_server::identity::{IdentityResolver, SessionInfo, SessionStore};
use nixopus_mcp_server::mcp::schema::CallToolParams;
use nixopus_mcp_server::mcp::{
    CallEnvelope, CallScope, DispatchConfig, RequestContext, Services, ToolDispatcher,
};
use nixopus_mcp_server::tools::command::{CommandRunner, RunCommandTool};
use nixopus_mcp_server::tools::containers::{ContainerLogsTool, ContainerRuntime, LogQuery};
use nixopus_mcp_server::tools::process::ProcessOutput;
use nixopus_mcp_server::tools::registry::ToolRegistry;
use nixopus_mcp_server::tools::system_stats::{
    LoadAverage, MemoryStats, SystemStats, SystemStatsSource, SystemStatsTool,
};
use nixopus_mcp_server::tools::{ToolDescriptor, ToolHandler, ToolOutput};

static INIT_LOGGER: Once = Once::new();

/// Credential the fake session store accepts for the seeded user
pub const VALID_SESSION: &str = "valid-session-A";
/// Seeded user's email
pub const USER_EMAIL: &str = "u1@x.test";

/// Initialize quiet logging for tests (call once per test process)
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        let log_level = match std::env::var("TEST_LOG").as_deref() {
            Ok("TRACE") => tracing::Level::TRACE,
            Ok("DEBUG") => tracing::Level::DEBUG,
            Ok("INFO") => tracing::Level::INFO,
            _ => tracing::Level::WARN,
        };

        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_test_writer()
            .init();
    });
}

// ============================================================================
// Stores
// ============================================================================

/// Session store that knows a fixed set of credentials
#[derive(Default)]
pub struct FakeSessionStore {
    sessions: Mutex<HashMap<String, SessionInfo>>,
    pub verifications: AtomicUsize,
}

impl FakeSessionStore {
    pub fn with_session(self, credential: &str, subject: Uuid, email: &str) -> Self {
        self.sessions.lock().unwrap().insert(
            credential.to_owned(),
            SessionInfo {
                subject: subject.to_string(),
                email: email.to_owned(),
            },
        );
        self
    }
}

#[async_trait]
impl SessionStore for FakeSessionStore {
    async fn verify(&self, credential: &str) -> AppResult<SessionInfo> {
        self.verifications.fetch_add(1, Ordering::SeqCst);
        self.sessions
            .lock()
            .unwrap()
            .get(credential)
            .cloned()
            .ok_or_else(|| AuthError::invalid("unknown session").into())
    }
}

/// User table keyed by lowercase email
#[derive(Default)]
pub struct FakeUsers {
    users: Mutex<HashMap<String, Principal>>,
    pub lookups: AtomicUsize,
}

impl FakeUsers {
    pub fn insert(&self, principal: Principal) {
        self.users
            .lock()
            .unwrap()
            .insert(principal.email.to_lowercase(), principal);
    }

    pub fn remove(&self, email: &str) {
        self.users.lock().unwrap().remove(&email.to_lowercase());
    }
}

#[async_trait]
impl UserDirectory for FakeUsers {
    async fn find_by_email(&self, email: &str) -> AppResult<Option<Principal>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.users.lock().unwrap().get(&email.to_lowercase()).cloned())
    }
}

/// Memberships with their role permissions
#[derive(Default)]
pub struct FakeAccess {
    grants: Mutex<HashMap<(Uuid, Uuid), PermissionSet>>,
    pub membership_reads: AtomicUsize,
    pub permission_reads: AtomicUsize,
    /// Artificial latency of every read
    pub latency: Mutex<Duration>,
    pub failing: AtomicBool,
}

impl FakeAccess {
    pub fn grant(&self, user_id: Uuid, organization_id: Uuid, permissions: PermissionSet) {
        self.grants
            .lock()
            .unwrap()
            .insert((user_id, organization_id), permissions);
    }

    pub fn revoke(&self, user_id: Uuid, organization_id: Uuid) {
        self.grants
            .lock()
            .unwrap()
            .remove(&(user_id, organization_id));
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    async fn pause(&self) -> AppResult<()> {
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::database("connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl AccessDirectory for FakeAccess {
    async fn membership(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
    ) -> AppResult<Option<Membership>> {
        self.membership_reads.fetch_add(1, Ordering::SeqCst);
        self.pause().await?;
        let member = self
            .grants
            .lock()
            .unwrap()
            .contains_key(&(user_id, organization_id));
        Ok(member.then(|| Membership {
            user_id,
            organization_id,
            role_id: Uuid::nil(),
            joined_at: Utc::now(),
        }))
    }

    async fn permissions(&self, user_id: Uuid, organization_id: Uuid) -> AppResult<PermissionSet> {
        self.permission_reads.fetch_add(1, Ordering::SeqCst);
        self.pause().await?;
        Ok(self
            .grants
            .lock()
            .unwrap()
            .get(&(user_id, organization_id))
            .cloned()
            .unwrap_or_default())
    }
}

/// Feature flags; missing rows are enabled
#[derive(Default)]
pub struct FakeFlags {
    flags: Mutex<HashMap<(Uuid, String), bool>>,
    pub failing: AtomicBool,
}

impl FakeFlags {
    pub fn set(&self, organization_id: Uuid, feature: &str, enabled: bool) {
        self.flags
            .lock()
            .unwrap()
            .insert((organization_id, feature.to_owned()), enabled);
    }
}

#[async_trait]
impl FeatureFlagStore for FakeFlags {
    async fn is_enabled(&self, organization_id: Uuid, feature: &str) -> AppResult<bool> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::database("feature flag query failed"));
        }
        Ok(self
            .flags
            .lock()
            .unwrap()
            .get(&(organization_id, feature.to_owned()))
            .copied()
            .unwrap_or(true))
    }
}

/// Audit writer that keeps every persisted row
#[derive(Default)]
pub struct RecordingAuditWriter {
    rows: Mutex<Vec<AuditRecord>>,
    pub batches: AtomicUsize,
    /// While set, `write_batch` blocks
    pub paused: AtomicBool,
    /// Number of upcoming batches that fail
    pub failures_left: AtomicUsize,
}

impl RecordingAuditWriter {
    pub fn rows(&self) -> Vec<AuditRecord> {
        self.rows.lock().unwrap().clone()
    }

    pub fn rows_for(&self, request_id: Uuid) -> Vec<AuditRecord> {
        self.rows()
            .into_iter()
            .filter(|r| r.request_id == request_id)
            .collect()
    }
}

#[async_trait]
impl AuditWriter for RecordingAuditWriter {
    async fn write_batch(&self, records: &[AuditRecord]) -> AppResult<()> {
        while self.paused.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(AppError::database("insert failed"));
        }
        self.batches.fetch_add(1, Ordering::SeqCst);
        self.rows.lock().unwrap().extend_from_slice(records);
        Ok(())
    }
}

/// Remote cache tier whose every call fails
#[derive(Clone, Default)]
pub struct UnreachableCache {
    pub calls: Arc<AtomicUsize>,
}

impl UnreachableCache {
    fn fail<T>(&self) -> AppResult<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(AppError::cache("connection refused"))
    }
}

#[async_trait]
impl CacheProvider for UnreachableCache {
    async fn new(_config: CacheConfig) -> AppResult<Self> {
        Ok(Self::default())
    }

    async fn set<T: Serialize + Send + Sync>(
        &self,
        _key: &CacheKey,
        _value: &T,
        _ttl: Duration,
    ) -> AppResult<()> {
        self.fail()
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, _key: &CacheKey) -> AppResult<Option<T>> {
        self.fail()
    }

    async fn get_with_ttl<T: for<'de> Deserialize<'de>>(
        &self,
        _key: &CacheKey,
    ) -> AppResult<Option<(T, Duration)>> {
        self.fail()
    }

    async fn invalidate(&self, _key: &CacheKey) -> AppResult<()> {
        self.fail()
    }

    async fn invalidate_pattern(&self, _pattern: &str) -> AppResult<u64> {
        self.fail()
    }

    async fn health_check(&self) -> AppResult<()> {
        self.fail()
    }

    async fn clear_all(&self) -> AppResult<()> {
        self.fail()
    }
}

/// Cache configuration without the background cleanup task
pub fn test_cache_config() -> CacheConfig {
    CacheConfig {
        enable_background_cleanup: false,
        ..Default::default()
    }
}

/// Local-only two-tier cache
pub fn local_cache() -> TieredCache<InMemoryCache> {
    let config = test_cache_config();
    TieredCache::new(InMemoryCache::new_with_config(&config), None, config.ttl)
}

/// Audit configuration that flushes quickly
pub fn fast_audit_config() -> AuditConfig {
    AuditConfig {
        flush_interval: Duration::from_millis(10),
        ..AuditConfig::default()
    }
}

// ============================================================================
// Tool backends
// ============================================================================

/// Command runner with a fixed result and optional run time
pub struct ScriptedRunner {
    output: ProcessOutput,
    run_time: Duration,
    pub commands: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new(stdout: &str, exit_code: i32) -> Self {
        Self {
            output: ProcessOutput {
                exit_code: Some(exit_code),
                stdout: stdout.to_owned(),
                ..ProcessOutput::default()
            },
            run_time: Duration::ZERO,
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn taking(mut self, run_time: Duration) -> Self {
        self.run_time = run_time;
        self
    }

    pub fn truncated(mut self) -> Self {
        self.output.truncated = true;
        self
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    fn target(&self) -> String {
        "scripted".to_owned()
    }

    async fn run(&self, command: &str, cancellation: &CancellationToken) -> AppResult<ProcessOutput> {
        self.commands.lock().unwrap().push(command.to_owned());
        tokio::select! {
            () = cancellation.cancelled() => Err(AppError::cancelled("command cancelled")),
            () = tokio::time::sleep(self.run_time) => Ok(self.output.clone()),
        }
    }
}

/// Container runtime returning canned log lines
pub struct ScriptedRuntime {
    pub queries: Mutex<Vec<LogQuery>>,
    lines: String,
}

impl ScriptedRuntime {
    pub fn new(lines: &str) -> Self {
        Self {
            queries: Mutex::new(Vec::new()),
            lines: lines.to_owned(),
        }
    }
}

#[async_trait]
impl ContainerRuntime for ScriptedRuntime {
    async fn logs(
        &self,
        query: &LogQuery,
        _cancellation: &CancellationToken,
    ) -> AppResult<ProcessOutput> {
        self.queries.lock().unwrap().push(query.clone());
        Ok(ProcessOutput {
            exit_code: Some(0),
            stdout: self.lines.clone(),
            ..ProcessOutput::default()
        })
    }
}

/// Stats source with a fixed snapshot
pub struct StaticStats;

#[async_trait]
impl SystemStatsSource for StaticStats {
    async fn collect(&self, _cancellation: &CancellationToken) -> AppResult<SystemStats> {
        Ok(SystemStats {
            hostname: "node-1".to_owned(),
            uptime_secs: 3600.0,
            cpu_count: 4,
            load_average: LoadAverage {
                one: 0.5,
                five: 0.4,
                fifteen: 0.3,
            },
            memory: MemoryStats {
                total_bytes: 8 << 30,
                available_bytes: 6 << 30,
                used_bytes: 2 << 30,
                used_percent: 25.0,
            },
            disk: None,
        })
    }
}

/// Read tool that returns its `message` with the call's request id and organization
pub struct EchoTool;

#[async_trait]
impl ToolHandler for EchoTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("echo", "Echo the message back", "dashboard")
            .with_action(Action::Read)
            .with_input_schema(json!({
                "type": "object",
                "properties": {
                    "message": {"type": "string"},
                    "organization_id": {"type": "string"}
                },
                "required": ["message"]
            }))
    }

    async fn call(&self, ctx: &RequestContext, arguments: Value) -> AppResult<ToolOutput> {
        Ok(ToolOutput::structured(json!({
            "message": arguments["message"],
            "requestId": ctx.request_id,
            "organizationId": ctx.organization_id,
        })))
    }
}

/// Read tool whose structured result is exactly its arguments
pub struct MirrorTool;

#[async_trait]
impl ToolHandler for MirrorTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("mirror", "Return the arguments unchanged", "dashboard")
            .with_action(Action::Read)
            .with_input_schema(json!({"type": "object"}))
    }

    async fn call(&self, _ctx: &RequestContext, arguments: Value) -> AppResult<ToolOutput> {
        Ok(ToolOutput::structured(arguments))
    }
}

// ============================================================================
// Harness
// ============================================================================

/// One user who is a member of `org1` with `dashboard: [read]`, plus a second
/// organization they do not belong to
pub struct Harness {
    pub user: Principal,
    pub org1: Uuid,
    pub org2: Uuid,
    pub sessions: Arc<FakeSessionStore>,
    pub users: Arc<FakeUsers>,
    pub access: Arc<FakeAccess>,
    pub flags: Arc<FakeFlags>,
    pub audit_writer: Arc<RecordingAuditWriter>,
    pub audit: AuditSink,
    pub services: Services,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_audit_config(fast_audit_config())
    }

    pub fn with_audit_config(audit_config: AuditConfig) -> Self {
        init_test_logging();
        let org1 = Uuid::new_v4();
        let org2 = Uuid::new_v4();
        let user = Principal {
            user_id: Uuid::new_v4(),
            email: USER_EMAIL.to_owned(),
            display_name: "User One".to_owned(),
            primary_org_id: Some(org1),
        };

        let sessions = Arc::new(FakeSessionStore::default().with_session(
            VALID_SESSION,
            user.user_id,
            USER_EMAIL,
        ));
        let users = Arc::new(FakeUsers::default());
        users.insert(user.clone());
        let access = Arc::new(FakeAccess::default());
        access.grant(
            user.user_id,
            org1,
            PermissionSet::new().with("dashboard", Action::Read),
        );
        let flags = Arc::new(FakeFlags::default());
        let audit_writer = Arc::new(RecordingAuditWriter::default());
        let audit = AuditSink::start(audit_writer.clone(), audit_config);

        let identity = IdentityResolver::new(sessions.clone(), users.clone(), local_cache());
        let access_cache = AccessCache::new(access.clone(), local_cache());
        let services = Services::new(
            Arc::new(identity),
            Arc::new(access_cache),
            flags.clone(),
            audit.clone(),
        );

        Self {
            user,
            org1,
            org2,
            sessions,
            users,
            access,
            flags,
            audit_writer,
            audit,
            services,
        }
    }

    /// Replace the seeded user's permissions in `org1`
    pub fn grant(&self, permissions: PermissionSet) {
        self.access.grant(self.user.user_id, self.org1, permissions);
    }

    /// Registry with the built-in tools over scripted backends, plus `echo`
    pub fn registry(&self, runner: Arc<dyn CommandRunner>) -> AppResult<ToolRegistry> {
        let mut registry = ToolRegistry::new(self.services.clone());
        registry.register(Arc::new(SystemStatsTool::new(Arc::new(StaticStats))))?;
        registry.register(Arc::new(ContainerLogsTool::new(Arc::new(
            ScriptedRuntime::new("line one\nline two\n"),
        ))))?;
        registry.register(Arc::new(RunCommandTool::new(runner)))?;
        registry.register(Arc::new(EchoTool))?;
        Ok(registry)
    }

    pub fn dispatcher(&self, runner: Arc<dyn CommandRunner>) -> AppResult<ToolDispatcher> {
        Ok(ToolDispatcher::new(
            Arc::new(self.registry(runner)?),
            DispatchConfig::default(),
        ))
    }

    /// Context of a call by the seeded user in `org1`
    pub fn request_context(&self, tool_name: &str, action: Action) -> AppResult<RequestContext> {
        let envelope = CallEnvelope::from_params(authed(tool_name, json!({})))?;
        let scope = CallScope::new(
            Uuid::new_v4(),
            &envelope,
            Duration::from_secs(30),
            CancellationToken::new(),
        );
        Ok(RequestContext::new(
            &scope,
            self.user.clone(),
            self.org1,
            "dashboard",
            action,
        ))
    }

    /// Flush the sink and return every persisted row
    pub async fn audit_rows(&self) -> Vec<AuditRecord> {
        self.audit.flush().await;
        self.audit_writer.rows()
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// `tools/call` params carrying the given meta
pub fn call_params(name: &str, arguments: Value, meta: Value) -> CallToolParams {
    serde_json::from_value(json!({
        "name": name,
        "arguments": arguments,
        "_meta": meta,
    }))
    .expect("valid call params")
}

/// `tools/call` params authenticated as the seeded user
pub fn authed(name: &str, arguments: Value) -> CallToolParams {
    call_params(name, arguments, json!({ "auth_token": VALID_SESSION }))
}
