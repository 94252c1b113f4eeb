//! Staff credential validation and request extractors.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, Uri, header::AUTHORIZATION, header::COOKIE, request::Parts},
};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use log::{debug, warn};
use std::sync::Arc;

use super::{AuthConfig, AuthError, Claims, StaffAccount};

/// Issuer stamped into tokens minted by this server.
const TOKEN_ISSUER: &str = "trackmyorder";

/// Cookie carrying the staff token for browser clients.
const AUTH_COOKIE: &str = "auth_token";

/// Extract a Bearer token from an Authorization header value.
fn bearer_token_from_header(header_value: &str) -> Result<&str, AuthError> {
    let mut parts = header_value.split_whitespace();
    let scheme = parts.next().ok_or(AuthError::InvalidAuthHeader)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::InvalidAuthHeader);
    }

    let token = parts.next().ok_or(AuthError::InvalidAuthHeader)?;
    if parts.next().is_some() {
        return Err(AuthError::InvalidAuthHeader);
    }

    Ok(token)
}

fn token_from_cookie_header<'a>(cookie_header: &'a str, cookie_name: &str) -> Option<&'a str> {
    cookie_header.split(';').map(str::trim).find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        if name.trim() == cookie_name {
            Some(value.trim())
        } else {
            None
        }
    })
}

fn token_from_query(query: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key == "token" {
            urlencoding::decode(value).ok().map(|s| s.into_owned())
        } else {
            None
        }
    })
}

/// Authentication state shared across handlers and the realtime hub.
#[derive(Clone)]
pub struct AuthState {
    config: Arc<AuthConfig>,
    secret: Option<String>,
    decoding_key: Option<DecodingKey>,
}

impl AuthState {
    /// Create auth state from config, resolving `env:VAR_NAME` secrets.
    pub fn new(config: AuthConfig) -> Self {
        let secret = config.resolve_jwt_secret().ok().flatten();
        let decoding_key = secret
            .as_ref()
            .map(|s| DecodingKey::from_secret(s.as_bytes()));

        Self {
            config: Arc::new(config),
            secret,
            decoding_key,
        }
    }

    pub fn allowed_origins(&self) -> &[String] {
        &self.config.allowed_origins
    }

    /// Validate a staff token.
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        if self.config.dev_mode
            && let Some(staff_id) = token.strip_prefix("dev:")
        {
            return self.dev_staff_claims(staff_id);
        }

        let decoding_key = self
            .decoding_key
            .as_ref()
            .ok_or_else(|| AuthError::Internal("no JWT secret configured".to_string()))?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.required_spec_claims.clear();

        let token_data = decode::<Claims>(token, decoding_key, &validation).map_err(|e| {
            warn!("JWT validation failed: {:?}", e);
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(e.to_string()),
            }
        })?;

        Ok(token_data.claims)
    }

    fn dev_staff_claims(&self, staff_id: &str) -> Result<Claims, AuthError> {
        let staff = self
            .config
            .dev_staff
            .iter()
            .find(|s| s.id == staff_id)
            .ok_or(AuthError::StaffNotFound)?;

        Ok(self.claims_for(staff, Some("dev")))
    }

    fn claims_for(&self, staff: &StaffAccount, issuer: Option<&str>) -> Claims {
        let now = Utc::now().timestamp();
        Claims {
            sub: staff.id.clone(),
            iss: issuer.map(str::to_string),
            exp: now + self.config.token_ttl_secs,
            iat: Some(now),
            email: Some(staff.email.clone()),
            name: Some(staff.name.clone()),
            roles: vec![staff.role.to_string()],
            role: Some(staff.role.to_string()),
            permissions: staff.permissions.clone(),
        }
    }

    /// Mint a signed, short-lived token for a staff member.
    pub fn issue_token(&self, staff: &StaffAccount) -> Result<String, AuthError> {
        let secret = self
            .secret
            .as_ref()
            .ok_or_else(|| AuthError::Internal("no JWT secret configured".to_string()))?;

        let claims = self.claims_for(staff, Some(TOKEN_ISSUER));
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .map_err(|e| AuthError::Internal(e.to_string()))
    }

    /// Validate whatever credential the request carries.
    ///
    /// Looks in priority order at:
    /// 1. Authorization: Bearer <token> header
    /// 2. auth_token cookie
    /// 3. token query parameter (browsers cannot set headers on WebSocket upgrades)
    /// 4. X-Dev-User header (dev mode only)
    ///
    /// Returns `Ok(None)` when no credential is present at all.
    pub fn claims_from_request(
        &self,
        headers: &HeaderMap,
        uri: &Uri,
    ) -> Result<Option<Claims>, AuthError> {
        if let Some(header) = headers.get(AUTHORIZATION).and_then(|h| h.to_str().ok()) {
            let token = bearer_token_from_header(header)?;
            return self.validate_token(token).map(Some);
        }

        let cookie_token = headers
            .get(COOKIE)
            .and_then(|h| h.to_str().ok())
            .and_then(|cookie_header| token_from_cookie_header(cookie_header, AUTH_COOKIE));
        if let Some(token) = cookie_token {
            return self.validate_token(token).map(Some);
        }

        if let Some(token) = uri.query().and_then(token_from_query) {
            return self.validate_token(&token).map(Some);
        }

        if self.config.dev_mode
            && let Some(staff_id) = headers.get("X-Dev-User").and_then(|h| h.to_str().ok())
        {
            debug!("Using dev staff: {}", staff_id);
            return self.dev_staff_claims(staff_id).map(Some);
        }

        Ok(None)
    }
}

/// Authenticated staff member extracted from a request.
#[derive(Debug, Clone)]
pub struct CurrentStaff {
    pub claims: Claims,
}

impl CurrentStaff {
    pub fn id(&self) -> &str {
        &self.claims.sub
    }

    pub fn display_name(&self) -> &str {
        self.claims.display_name()
    }
}

impl<S> FromRequestParts<S> for CurrentStaff
where
    AuthState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(staff) = parts.extensions.get::<CurrentStaff>() {
            return Ok(staff.clone());
        }

        let auth = AuthState::from_ref(state);
        let claims = auth
            .claims_from_request(&parts.headers, &parts.uri)?
            .ok_or(AuthError::MissingAuthHeader)?;

        let staff = CurrentStaff { claims };
        parts.extensions.insert(staff.clone());
        Ok(staff)
    }
}

/// Require the `chats` permission (or an admin role).
///
/// Use as an extractor in handlers that manage conversations.
#[derive(Debug, Clone)]
pub struct RequireChatAccess(pub CurrentStaff);

impl<S> FromRequestParts<S> for RequireChatAccess
where
    AuthState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let staff = CurrentStaff::from_request_parts(parts, state).await?;

        if !staff.claims.can_manage_chats() {
            return Err(AuthError::InsufficientPermissions(
                "chats permission required".to_string(),
            ));
        }

        Ok(RequireChatAccess(staff))
    }
}
