// ABOUTME: Secret redaction for audit metadata and error messages
// ABOUTME: Masks credential-named fields and bearer, JWT and private key material inside text
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

//! Redaction applied before anything reaches the audit table.
//!
//! ```rust
//! use nixopus_mcp_server::audit::redaction::{redact_value, RedactionConfig};
//! use serde_json::json;
//!
//! let config = RedactionConfig::default();
//! let safe = redact_value(&json!({"command": "ls", "password": "hunter2"}), &config);
//! assert_eq!(safe["password"], "[REDACTED]");
//! assert_eq!(safe["command"], "ls");
//! ```

use bitflags::bitflags;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

use nixopus_core::constants::audit::REDACTED_PLACEHOLDER;

bitflags! {
    /// Redaction feature flags to control which kinds of data are masked
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RedactionFeatures: u8 {
        /// Replace values of credential-named object keys
        const FIELDS = 0b0001;
        /// Mask bearer tokens and JWTs inside strings
        const TOKENS = 0b0010;
        /// Mask PEM private key blocks inside strings
        const KEY_MATERIAL = 0b0100;
        /// Enable all redaction features
        const ALL = Self::FIELDS.bits() | Self::TOKENS.bits() | Self::KEY_MATERIAL.bits();
    }
}

/// Configuration for secret redaction
#[derive(Debug, Clone)]
pub struct RedactionConfig {
    /// Which redaction features to enable
    pub features: RedactionFeatures,
    /// Replacement string for redacted data
    pub placeholder: String,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            features: RedactionFeatures::ALL,
            placeholder: REDACTED_PLACEHOLDER.to_owned(),
        }
    }
}

/// Key fragments whose values are always replaced (matched case-insensitively)
const SENSITIVE_KEY_FRAGMENTS: &[&str] = &[
    "auth_token",
    "authtoken",
    "authorization",
    "password",
    "passphrase",
    "secret",
    "token",
    "private_key",
    "privatekey",
    "api_key",
    "apikey",
    "api-key",
    "cookie",
    "credential",
];

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_KEY_FRAGMENTS
        .iter()
        .any(|fragment| lower.contains(fragment))
}

/// Redact a JSON value recursively
#[must_use]
pub fn redact_value(value: &Value, config: &RedactionConfig) -> Value {
    match value {
        Value::Object(map) => {
            let redacted: Map<String, Value> = map
                .iter()
                .map(|(key, inner)| {
                    let replaced = if config.features.contains(RedactionFeatures::FIELDS)
                        && is_sensitive_key(key)
                        && !inner.is_null()
                    {
                        Value::String(config.placeholder.clone())
                    } else {
                        redact_value(inner, config)
                    };
                    (key.clone(), replaced)
                })
                .collect();
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| redact_value(v, config)).collect()),
        Value::String(text) => Value::String(redact_text(text, config)),
        other => other.clone(),
    }
}

/// Mask token-like and key material patterns in free text
#[must_use]
pub fn redact_text(text: &str, config: &RedactionConfig) -> String {
    let mut result = text.to_owned();

    if config.features.contains(RedactionFeatures::KEY_MATERIAL) {
        if let Some(re) = private_key_regex() {
            result = re.replace_all(&result, config.placeholder.as_str()).into_owned();
        }
    }

    if config.features.contains(RedactionFeatures::TOKENS) {
        if let Some(re) = bearer_regex() {
            result = re
                .replace_all(&result, format!("Bearer {}", config.placeholder))
                .into_owned();
        }
        if let Some(re) = jwt_regex() {
            result = re.replace_all(&result, config.placeholder.as_str()).into_owned();
        }
    }

    result
}

fn bearer_regex() -> Option<&'static Regex> {
    static BEARER_REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    BEARER_REGEX
        .get_or_init(|| Regex::new(r"(?i)Bearer\s+[A-Za-z0-9\-._~+/]+=*").ok())
        .as_ref()
}

fn jwt_regex() -> Option<&'static Regex> {
    static JWT_REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    JWT_REGEX
        .get_or_init(|| Regex::new(r"eyJ[A-Za-z0-9\-_]+\.[A-Za-z0-9\-_]+\.[A-Za-z0-9\-_]+").ok())
        .as_ref()
}

fn private_key_regex() -> Option<&'static Regex> {
    static KEY_REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    KEY_REGEX
        .get_or_init(|| {
            Regex::new(r"(?s)-----BEGIN [A-Z ]*PRIVATE KEY-----.*?-----END [A-Z ]*PRIVATE KEY-----")
                .ok()
        })
        .as_ref()
}
