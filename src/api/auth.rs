use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, HeaderMap, StatusCode},
    Json,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use super::analytics::track_event;
use super::{conflict_as, ApiJson};
use super::error::{ApiError, RuleCode};
use super::validation::{validate_email, validate_name, validate_password, validate_user_role, ValidationCode, ValidationError};
use crate::config::AuthConfig;
use crate::db::{events, AuthResponse, LoginRequest, RegisterRequest, Role, User, UserResponse};
use crate::retry::with_retry;
use crate::AppState;

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Access token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub exp: usize,
}

/// Issue a signed access token for `user`
pub fn create_token(config: &AuthConfig, user: &User) -> Result<String, jsonwebtoken::errors::Error> {
    let expires_at = chrono::Utc::now() + chrono::Duration::days(config.token_ttl_days);
    let claims = Claims {
        sub: user.id.clone(),
        email: user.email.clone(),
        name: user.name.clone(),
        role: user.role_enum(),
        exp: expires_at.timestamp().max(0) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
}

/// Verify signature and expiry of an access token
pub fn decode_token(config: &AuthConfig, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
}

/// Bearer token from the Authorization header
fn extract_token(headers: &HeaderMap) -> Option<String> {
    let header = headers.get("Authorization")?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ").unwrap_or(header).trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Authenticated caller, resolved from the access token
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
}

impl AuthUser {
    /// Reject callers whose role is not exactly `role`
    pub fn require(&self, role: Role) -> Result<(), ApiError> {
        if self.role == role {
            Ok(())
        } else {
            Err(ApiError::forbidden("Access denied"))
        }
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let token = extract_token(&parts.headers)
            .ok_or_else(|| ApiError::unauthorized("Access token required"))?;

        let claims = decode_token(&state.config.auth, &token).map_err(|e| {
            tracing::debug!(error = %e, "Rejected access token");
            ApiError::forbidden("Invalid or expired token")
        })?;

        // Tokens of deactivated accounts stop working immediately
        let user = with_retry(&state.retry, || User::find_by_id(&state.db, &claims.sub)).await?;
        let user = match user {
            Some(u) if u.is_active => u,
            _ => return Err(ApiError::forbidden("Invalid or expired token")),
        };

        if state.config.analytics.track_requests {
            let state = state.clone();
            let user_id = user.id.clone();
            let data = json!({ "method": parts.method.as_str(), "path": parts.uri.path() });
            tokio::spawn(async move {
                track_event(&state, Some(&user_id), events::API_REQUEST, data).await;
            });
        }

        Ok(AuthUser {
            role: user.role_enum(),
            id: user.id,
            email: user.email,
            name: user.name,
        })
    }
}

fn issue_token(state: &AppState, user: &User) -> Result<String, ApiError> {
    create_token(&state.config.auth, user).map_err(|e| ApiError::internal(format!("Failed to sign token: {}", e)))
}

/// Register a new account
///
/// Admin accounts can only be created by an authenticated admin.
pub async fn register(
    State(state): State<Arc<AppState>>,
    caller: Option<AuthUser>,
    ApiJson(request): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let email = validate_email(request.email.as_deref())?;
    let password = validate_password(request.password.as_deref())?;
    let name = validate_name(request.name.as_deref())?;
    let role = validate_user_role(request.role.as_deref())?;

    if role == Role::Admin && !caller.as_ref().is_some_and(|c| c.role == Role::Admin) {
        return Err(ApiError::forbidden("Only administrators can create admin accounts"));
    }

    let existing = with_retry(&state.retry, || User::find_by_email(&state.db, &email)).await?;
    if existing.is_some() {
        return Err(ApiError::rule(RuleCode::EmailExists, "An account with this email already exists"));
    }

    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| ApiError::internal(format!("Password hashing task failed: {}", e)))?
        .map_err(|e| ApiError::internal(format!("Failed to hash password: {}", e)))?;

    let user = with_retry(&state.retry, || {
        User::create(&state.db, &email, &password_hash, &name, role)
    })
    .await
    .map_err(conflict_as(RuleCode::EmailExists, "An account with this email already exists"))?;

    let token = issue_token(&state, &user)?;

    tracing::info!(user_id = %user.id, role = %role, "User registered");
    track_event(
        &state,
        Some(&user.id),
        events::USER_REGISTERED,
        json!({ "role": role, "email": user.email }),
    )
    .await;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            user: UserResponse::from(user),
            message: "User registered successfully".to_string(),
        }),
    ))
}

/// Exchange credentials for an access token
pub async fn login(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let email = match request.email.as_deref().map(str::trim) {
        Some(e) if !e.is_empty() => e.to_lowercase(),
        _ => return Err(ValidationError::new("email", ValidationCode::Required, "Email is required").into()),
    };
    let password = match request.password.as_deref() {
        Some(p) if !p.is_empty() => p.to_string(),
        _ => {
            return Err(ValidationError::new("password", ValidationCode::Required, "Password is required").into())
        }
    };

    let user = with_retry(&state.retry, || User::find_by_email(&state.db, &email))
        .await?
        .ok_or_else(|| ApiError::rule(RuleCode::InvalidCredentials, "Invalid email or password"))?;

    let hash = user.password_hash.clone();
    let valid = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| ApiError::internal(format!("Password verification task failed: {}", e)))?;
    if !valid {
        tracing::info!(user_id = %user.id, "Failed login attempt");
        return Err(ApiError::rule(RuleCode::InvalidCredentials, "Invalid email or password"));
    }

    if !user.is_active {
        return Err(ApiError::rule(RuleCode::AccountDisabled, "This account has been deactivated"));
    }

    with_retry(&state.retry, || User::touch_last_login(&state.db, &user.id)).await?;
    let user = with_retry(&state.retry, || User::find_by_id(&state.db, &user.id))
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    let token = issue_token(&state, &user)?;
    track_event(&state, Some(&user.id), events::USER_LOGIN, json!({ "role": user.role })).await;

    Ok(Json(AuthResponse {
        token,
        user: UserResponse::from(user),
        message: "Login successful".to_string(),
    }))
}

/// Soft-deactivate an account (admin only)
pub async fn deactivate_user(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    auth.require(Role::Admin)?;

    if id == auth.id {
        return Err(ValidationError::new("id", ValidationCode::InvalidContent, "You cannot deactivate your own account").into());
    }

    let deactivated = with_retry(&state.retry, || User::deactivate(&state.db, &id)).await?;
    if !deactivated {
        return Err(ApiError::not_found("User not found"));
    }

    tracing::info!(user_id = %id, admin_id = %auth.id, "User deactivated");
    track_event(&state, Some(&auth.id), events::USER_DEACTIVATED, json!({ "userId": id })).await;

    Ok(Json(json!({ "id": id, "message": "User deactivated" })))
}
