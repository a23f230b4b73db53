//! Bearer-token authentication and role-based authorisation.
//!
//! Every route requires a token with the service audience. Production
//! deployments validate RS256 tokens against the issuer's JWKS; test
//! deployments use an HS256 shared secret. Roles are read from the
//! `resource_access.long-term-archive.roles` claim.

use std::collections::HashMap;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;

use super::AppState;

/// Claim path prefix for this service's roles.
pub const ROLES_RESOURCE: &str = "long-term-archive";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    System,
    ReadOnly,
}

impl Role {
    fn from_claim(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "system" => Some(Self::System),
            "read-only" => Some(Self::ReadOnly),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("token header missing kid")]
    MissingKid,
    #[error("no signing key for kid {0}")]
    UnknownKid(String),
    #[error("token carries no recognised role")]
    NoRole,
}

#[derive(Debug, Deserialize)]
struct ResourceRoles {
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    resource_access: HashMap<String, ResourceRoles>,
}

/// Token validator configured at service start.
pub enum AuthState {
    /// HS256 shared secret (test deployments).
    SharedSecret { audience: String, key: DecodingKey },
    /// RS256 keys discovered from the issuer's JWKS at startup.
    Jwks {
        audience: String,
        keys: HashMap<String, DecodingKey>,
    },
}

impl AuthState {
    pub fn shared_secret(audience: &str, secret: &str) -> Self {
        Self::SharedSecret {
            audience: audience.to_string(),
            key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Discover the issuer's JWKS and build an RS256 validator.
    pub async fn from_openid(audience: &str, openid_url: &str) -> anyhow::Result<Self> {
        #[derive(Deserialize)]
        struct Discovery {
            jwks_uri: String,
        }

        let http = reqwest::Client::new();
        let discovery_url = format!(
            "{}/.well-known/openid-configuration",
            openid_url.trim_end_matches('/')
        );
        let discovery: Discovery = http.get(&discovery_url).send().await?.json().await?;
        let jwks: jsonwebtoken::jwk::JwkSet =
            http.get(&discovery.jwks_uri).send().await?.json().await?;

        let mut keys = HashMap::new();
        for jwk in &jwks.keys {
            if let Some(kid) = &jwk.common.key_id {
                if let Ok(key) = DecodingKey::from_jwk(jwk) {
                    keys.insert(kid.clone(), key);
                }
            }
        }
        if keys.is_empty() {
            anyhow::bail!("JWKS at {} contained no usable keys", discovery.jwks_uri);
        }
        tracing::info!("Loaded {} signing keys from {}", keys.len(), discovery.jwks_uri);
        Ok(Self::Jwks {
            audience: audience.to_string(),
            keys,
        })
    }

    /// Validate a bearer token and return the strongest role it carries.
    pub fn validate(&self, token: &str) -> Result<Role, AuthError> {
        let claims = match self {
            Self::SharedSecret { audience, key } => {
                let mut validation = Validation::new(Algorithm::HS256);
                validation.set_audience(&[audience]);
                decode::<Claims>(token, key, &validation)?.claims
            }
            Self::Jwks { audience, keys } => {
                let header = decode_header(token)?;
                let kid = header.kid.ok_or(AuthError::MissingKid)?;
                let key = keys.get(&kid).ok_or(AuthError::UnknownKid(kid))?;
                let mut validation = Validation::new(header.alg);
                validation.set_audience(&[audience]);
                decode::<Claims>(token, key, &validation)?.claims
            }
        };

        let roles = claims
            .resource_access
            .get(ROLES_RESOURCE)
            .map(|r| r.roles.as_slice())
            .unwrap_or_default();
        // strongest first
        for candidate in [Role::Admin, Role::System, Role::ReadOnly] {
            if roles.iter().any(|r| Role::from_claim(r) == Some(candidate)) {
                return Ok(candidate);
            }
        }
        Err(AuthError::NoRole)
    }
}

/// Whether `role` may perform `method`.
fn authorised(role: Role, method: &Method) -> bool {
    match *method {
        Method::GET => true,
        Method::DELETE => role == Role::Admin,
        _ => matches!(role, Role::Admin | Role::System),
    }
}

/// Middleware enforcing bearer-token auth on every route.
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    let Some(token) = token else {
        return (StatusCode::UNAUTHORIZED, "Missing or invalid Authorization header")
            .into_response();
    };

    let role = match state.auth.validate(token) {
        Ok(role) => role,
        Err(e) => {
            tracing::debug!("rejected token: {e}");
            return (StatusCode::UNAUTHORIZED, "Invalid authentication token")
                .into_response();
        }
    };

    if !authorised(role, request.method()) {
        return (StatusCode::FORBIDDEN, "insufficient role").into_response();
    }

    next.run(request).await
}
