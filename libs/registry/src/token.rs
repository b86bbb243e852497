//! Bearer tokens issued by the registry auth endpoint.

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;

use crate::error::RegistryError;

/// Token endpoint response body.
///
/// Docker Hub sends both `token` and `access_token`; other v2 auth servers
/// send only one of them.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    issued_at: Option<String>,
}

/// Short-lived credential for the manifest endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken {
    token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl BearerToken {
    pub fn new(token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Parse a token endpoint body, computing the expiry relative to `now`
    /// when the server omits `issued_at`.
    pub(crate) fn from_json(body: &[u8], now: DateTime<Utc>) -> Result<Self, RegistryError> {
        let response: TokenResponse = serde_json::from_slice(body)
            .map_err(|e| RegistryError::AuthFailure(format!("invalid token response: {e}")))?;

        let token = response
            .token
            .filter(|t| !t.is_empty())
            .or(response.access_token.filter(|t| !t.is_empty()))
            .ok_or_else(|| RegistryError::AuthFailure("response has no token".to_string()))?;

        let issued_at = response
            .issued_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(now);

        let expires_at = response
            .expires_in
            .and_then(TimeDelta::try_seconds)
            .and_then(|ttl| issued_at.checked_add_signed(ttl));

        Ok(Self { token, expires_at })
    }

    /// The raw token, as sent in `Authorization: Bearer <token>`.
    pub fn secret(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Tokens without a known expiry never report as expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_parse_docker_hub_response() {
        let body = br#"{
            "token": "T1",
            "access_token": "T1",
            "expires_in": 300,
            "issued_at": "2018-07-11T05:43:10.518662256Z"
        }"#;

        let token = BearerToken::from_json(body, now()).unwrap();
        assert_eq!(token.secret(), "T1");

        let expected = DateTime::parse_from_rfc3339("2018-07-11T05:48:10.518662256Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(token.expires_at(), Some(expected));
        assert!(token.is_expired(now()));
    }

    #[test]
    fn test_parse_minimal_response() {
        let token = BearerToken::from_json(br#"{"token":"T1"}"#, now()).unwrap();
        assert_eq!(token.secret(), "T1");
        assert_eq!(token.expires_at(), None);
        assert!(!token.is_expired(now()));
    }

    #[test]
    fn test_access_token_fallback() {
        let body = br#"{"access_token":"A1","expires_in":60}"#;
        let token = BearerToken::from_json(body, now()).unwrap();
        assert_eq!(token.secret(), "A1");
        assert_eq!(token.expires_at(), Some(now() + TimeDelta::seconds(60)));
    }

    #[test]
    fn test_missing_token_is_auth_failure() {
        let err = BearerToken::from_json(br#"{"expires_in":300}"#, now()).unwrap_err();
        assert!(err.is_auth_failure());

        let err = BearerToken::from_json(br#"{"token":""}"#, now()).unwrap_err();
        assert!(err.is_auth_failure());
    }

    #[test]
    fn test_malformed_body_is_auth_failure() {
        let err = BearerToken::from_json(b"<html>nope</html>", now()).unwrap_err();
        assert!(err.is_auth_failure());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let token = BearerToken::new("super-secret", None);
        let rendered = format!("{token:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
