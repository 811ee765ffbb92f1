// ABOUTME: SuperTokens core client implementing the session store used by the identity resolver
// ABOUTME: Maps the core's verification statuses onto expired, invalid and revoked credentials
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{SessionInfo, SessionStore};
use crate::errors::{AppError, AppResult};
use nixopus_core::errors::AuthError;

/// Core driver interface version spoken by this client
const CDI_VERSION: &str = "2.21";

/// Connection settings for the `SuperTokens` core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStoreConfig {
    /// Base URI of the core (e.g. `http://supertokens:3567`)
    pub connection_uri: String,
    /// API key, when the core requires one
    pub api_key: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

/// Session store backed by the `SuperTokens` core HTTP API
#[derive(Clone)]
pub struct SuperTokensSessionStore {
    client: Client,
    config: SessionStoreConfig,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    session: Option<VerifiedSession>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifiedSession {
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    status: String,
    #[serde(default)]
    user: Option<CoreUser>,
}

#[derive(Debug, Deserialize)]
struct CoreUser {
    email: Option<String>,
    #[serde(default)]
    emails: Vec<String>,
}

impl SuperTokensSessionStore {
    /// Create a client for the configured core
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built
    pub fn new(config: SessionStoreConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.connection_uri.trim_end_matches('/'))
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder.header("cdi-version", CDI_VERSION);
        match &self.config.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    async fn email_of(&self, user_id: &str) -> AppResult<String> {
        let response: UserResponse = self
            .request(self.client.get(self.url("/recipe/user")))
            .query(&[("userId", user_id)])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| AppError::external_service("supertokens", e.to_string()))?
            .json()
            .await
            .map_err(|e| AppError::external_service("supertokens", e.to_string()))?;

        if response.status != "OK" {
            return Err(AuthError::revoked(format!(
                "session user lookup returned {}",
                response.status
            ))
            .into());
        }

        response
            .user
            .and_then(|user| user.email.or_else(|| user.emails.into_iter().next()))
            .ok_or_else(|| AuthError::invalid("session user has no email").into())
    }
}

/// Classify a non-OK verification status
fn classify_failure(status: &str, message: Option<&str>) -> AuthError {
    let message = message.unwrap_or_default();
    match status {
        "TRY_REFRESH_TOKEN" => AuthError::expired(message.to_owned()),
        "UNAUTHORISED" => {
            let lower = message.to_ascii_lowercase();
            if lower.contains("revoked") || lower.contains("does not exist") {
                AuthError::revoked(message.to_owned())
            } else {
                AuthError::invalid(message.to_owned())
            }
        }
        other => AuthError::invalid(format!("unexpected session status {other}")),
    }
}

#[async_trait]
impl SessionStore for SuperTokensSessionStore {
    async fn verify(&self, credential: &str) -> AppResult<SessionInfo> {
        let body = json!({
            "accessToken": credential,
            "doAntiCsrfCheck": false,
            "enableAntiCsrf": false,
            "checkDatabase": true,
        });

        let response: VerifyResponse = self
            .request(self.client.post(self.url("/recipe/session/verify")))
            .json(&body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| AppError::external_service("supertokens", e.to_string()))?
            .json()
            .await
            .map_err(|e| AppError::external_service("supertokens", e.to_string()))?;

        if response.status != "OK" {
            debug!(status = %response.status, "Session rejected by session store");
            return Err(classify_failure(&response.status, response.message.as_deref()).into());
        }

        let subject = response
            .session
            .map(|session| session.user_id)
            .ok_or_else(|| AppError::from(AuthError::invalid("verification response without session")))?;
        let email = self.email_of(&subject).await?;

        Ok(SessionInfo { subject, email })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nixopus_core::errors::AuthErrorKind;

    #[test]
    fn test_status_classification() {
        assert_eq!(
            classify_failure("TRY_REFRESH_TOKEN", Some("expired")).kind,
            AuthErrorKind::Expired
        );
        assert_eq!(
            classify_failure("UNAUTHORISED", Some("Session does not exist")).kind,
            AuthErrorKind::Revoked
        );
        assert_eq!(
            classify_failure("UNAUTHORISED", Some("Invalid signature")).kind,
            AuthErrorKind::Invalid
        );
        assert_eq!(classify_failure("WEIRD", None).kind, AuthErrorKind::Invalid);
    }
}
