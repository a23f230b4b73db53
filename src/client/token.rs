//! Bearer-token acquisition for coordinator and catalog clients.
//!
//! Production workers hold OIDC client credentials and exchange them at
//! the issuer's token endpoint, refreshing ahead of expiry. Test
//! deployments self-sign HS256 tokens from a shared secret, matching the
//! coordinator's shared-secret validator.

use std::time::{Duration, Instant};

use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{ClientError, Result};
use crate::config::AuthCredentials;

/// Refresh this long before the token actually expires.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Lifetime of self-signed test tokens.
const SELF_SIGNED_TTL_SECS: u64 = 3600;

#[derive(Serialize)]
struct MintedClaims<'a> {
    aud: &'a str,
    exp: u64,
    resource_access: serde_json::Value,
}

/// Sign an HS256 token carrying the given roles (test deployments only).
pub fn mint_token(secret: &str, audience: &str, roles: &[&str]) -> String {
    let exp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
        + SELF_SIGNED_TTL_SECS;
    let resource = crate::server::auth::ROLES_RESOURCE;
    let claims = MintedClaims {
        aud: audience,
        exp,
        resource_access: serde_json::json!({ resource: { "roles": roles } }),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("HS256 signing cannot fail")
}

struct CachedToken {
    token: String,
    refresh_after: Instant,
}

/// Source of bearer tokens for outgoing requests.
pub struct TokenSource {
    credentials: AuthCredentials,
    http: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

impl TokenSource {
    pub fn from_credentials(credentials: &AuthCredentials, http: reqwest::Client) -> Self {
        Self {
            credentials: credentials.clone(),
            http,
            cached: Mutex::new(None),
        }
    }

    /// Return a valid token, fetching or re-signing as needed.
    pub async fn token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(entry) = cached.as_ref() {
            if Instant::now() < entry.refresh_after {
                return Ok(entry.token.clone());
            }
        }

        let (token, ttl) = match &self.credentials {
            AuthCredentials::SharedSecret { secret } => (
                mint_token(
                    secret,
                    crate::config::DEFAULT_AUDIENCE,
                    &["admin", "system"],
                ),
                Duration::from_secs(SELF_SIGNED_TTL_SECS),
            ),
            AuthCredentials::ClientCredentials {
                openid_url,
                client_id,
                client_secret,
            } => {
                let token_url = format!(
                    "{}/protocol/openid-connect/token",
                    openid_url.trim_end_matches('/')
                );
                let response = self
                    .http
                    .post(&token_url)
                    .form(&[
                        ("grant_type", "client_credentials"),
                        ("client_id", client_id.as_str()),
                        ("client_secret", client_secret.as_str()),
                    ])
                    .send()
                    .await?;
                if !response.status().is_success() {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    return Err(ClientError::Auth(format!(
                        "token endpoint returned {status}: {body}"
                    )));
                }
                let token: TokenResponse = response
                    .json()
                    .await
                    .map_err(|e| ClientError::Auth(e.to_string()))?;
                let ttl = Duration::from_secs(token.expires_in.unwrap_or(300));
                (token.access_token, ttl)
            }
        };

        let refresh_after = Instant::now() + ttl.saturating_sub(EXPIRY_MARGIN);
        *cached = Some(CachedToken {
            token: token.clone(),
            refresh_after,
        });
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_self_signed_token_is_cached() {
        let source = TokenSource::from_credentials(
            &AuthCredentials::SharedSecret {
                secret: "hunter2".to_string(),
            },
            reqwest::Client::new(),
        );
        let first = source.token().await.unwrap();
        let second = source.token().await.unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_minted_token_has_three_segments() {
        let token = mint_token("hunter2", "long-term-archive", &["system"]);
        assert_eq!(token.split('.').count(), 3);
    }
}
