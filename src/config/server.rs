// ABOUTME: Top-level server configuration assembled from the environment by the binary
// ABOUTME: Each section is a typed struct injected into the component it configures
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

use std::path::PathBuf;
use std::time::Duration;

use nixopus_core::constants::{audit, limits};

use super::{env_opt, env_parse};
use crate::audit::AuditConfig;
use crate::cache::CacheConfig;
use crate::errors::{AppError, AppResult};
use crate::identity::supertokens::SessionStoreConfig;
use crate::logging::LoggingConfig;
use crate::mcp::dispatch::DispatchConfig;
use crate::tools::command::SshTarget;

/// Complete server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Postgres connection string
    pub database_url: String,
    /// Cache tiers
    pub cache: CacheConfig,
    /// Session store (`SuperTokens` core)
    pub session: SessionStoreConfig,
    /// Audit queue and batching
    pub audit: AuditConfig,
    /// Deadlines and concurrency of tool calls
    pub dispatch: DispatchConfig,
    /// Remote host for `run_command`; commands run locally when absent
    pub ssh: Option<SshTarget>,
    /// Docker CLI used by container tools
    pub docker_binary: String,
    /// Logging
    pub logging: LoggingConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or malformed
    pub fn from_env() -> AppResult<Self> {
        let database_url = env_opt("DATABASE_URL")
            .ok_or_else(|| AppError::config("DATABASE_URL must be set"))?;

        let connection_uri = env_opt("SUPERTOKENS_CONNECTION_URI")
            .or_else(|| env_opt("SUPERTOKENS_URI"))
            .ok_or_else(|| AppError::config("SUPERTOKENS_CONNECTION_URI must be set"))?;

        let session = SessionStoreConfig {
            connection_uri,
            api_key: env_opt("SUPERTOKENS_API_KEY"),
            timeout: Duration::from_secs(env_parse(
                "SUPERTOKENS_TIMEOUT_SECS",
                limits::SESSION_VERIFY_TIMEOUT_SECS,
            )),
        };

        let audit = AuditConfig {
            queue_capacity: env_parse("AUDIT_QUEUE_CAPACITY", audit::DEFAULT_QUEUE_CAPACITY),
            batch_size: env_parse("AUDIT_BATCH_SIZE", audit::DEFAULT_BATCH_SIZE),
            flush_interval: Duration::from_millis(env_parse(
                "AUDIT_FLUSH_INTERVAL_MS",
                audit::DEFAULT_FLUSH_INTERVAL_MS,
            )),
            backpressure_timeout: Duration::from_millis(env_parse(
                "AUDIT_BACKPRESSURE_TIMEOUT_MS",
                audit::DEFAULT_BACKPRESSURE_TIMEOUT_MS,
            )),
        };
        if audit.queue_capacity == 0 || audit.batch_size == 0 {
            return Err(AppError::config(
                "AUDIT_QUEUE_CAPACITY and AUDIT_BATCH_SIZE must be positive",
            ));
        }

        let dispatch = DispatchConfig {
            default_timeout: Duration::from_secs(env_parse(
                "MCP_TOOL_TIMEOUT_SECS",
                limits::DEFAULT_TOOL_TIMEOUT_SECS,
            )),
            max_concurrent_calls: env_parse(
                "MCP_MAX_CONCURRENT_CALLS",
                limits::DEFAULT_MAX_CONCURRENT_CALLS,
            )
            .max(1),
            shutdown_grace: Duration::from_secs(env_parse(
                "MCP_SHUTDOWN_GRACE_SECS",
                limits::SHUTDOWN_GRACE_SECS,
            )),
        };

        Ok(Self {
            database_url,
            cache: CacheConfig::from_env(),
            session,
            audit,
            dispatch,
            ssh: Self::ssh_from_env()?,
            docker_binary: env_opt("DOCKER_BINARY").unwrap_or_else(|| "docker".to_owned()),
            logging: LoggingConfig::from_env(),
        })
    }

    fn ssh_from_env() -> AppResult<Option<SshTarget>> {
        let Some(host) = env_opt("SSH_HOST") else {
            return Ok(None);
        };
        let private_key_path = env_opt("SSH_PRIVATE_KEY_PATH")
            .map(PathBuf::from)
            .ok_or_else(|| AppError::config("SSH_PRIVATE_KEY_PATH must be set with SSH_HOST"))?;

        Ok(Some(SshTarget {
            host,
            user: env_opt("SSH_USER").unwrap_or_else(|| "root".to_owned()),
            port: env_parse("SSH_PORT", 22),
            private_key_path,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    // Edition 2021: set_var/remove_var are safe functions
    fn set_required() {
        env::set_var("DATABASE_URL", "postgres://nixopus@localhost/nixopus");
        env::set_var("SUPERTOKENS_CONNECTION_URI", "http://localhost:3567");
    }

    fn clear_all() {
        for key in [
            "DATABASE_URL",
            "SUPERTOKENS_CONNECTION_URI",
            "MCP_TOOL_TIMEOUT_SECS",
            "SSH_HOST",
            "SSH_PRIVATE_KEY_PATH",
            "SSH_PORT",
            "AUDIT_BATCH_SIZE",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() -> AppResult<()> {
        clear_all();
        set_required();

        let config = ServerConfig::from_env()?;
        assert_eq!(config.dispatch.default_timeout, Duration::from_secs(30));
        assert_eq!(config.dispatch.max_concurrent_calls, 128);
        assert_eq!(config.audit.batch_size, 64);
        assert_eq!(config.audit.flush_interval, Duration::from_millis(200));
        assert!(config.ssh.is_none());

        clear_all();
        Ok(())
    }

    #[test]
    #[serial]
    fn test_missing_database_url_is_rejected() {
        clear_all();
        env::set_var("SUPERTOKENS_CONNECTION_URI", "http://localhost:3567");

        assert!(ServerConfig::from_env().is_err());
        clear_all();
    }

    #[test]
    #[serial]
    fn test_ssh_target_requires_key() -> AppResult<()> {
        clear_all();
        set_required();
        env::set_var("SSH_HOST", "10.0.0.5");
        assert!(ServerConfig::from_env().is_err());

        env::set_var("SSH_PRIVATE_KEY_PATH", "/etc/nixopus/ssh/id_ed25519");
        env::set_var("SSH_PORT", "2222");
        let config = ServerConfig::from_env()?;
        let ssh = config
            .ssh
            .ok_or_else(|| AppError::config("expected ssh target"))?;
        assert_eq!(ssh.port, 2222);
        assert_eq!(ssh.user, "root");

        clear_all();
        Ok(())
    }
}
