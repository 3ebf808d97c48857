//! API Middleware
//!
//! Session authentication, request logging and error localization.

use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use uuid::Uuid;

use super::AppState;
use crate::domain::{AuthContext, RoleType, SessionableType};
use crate::error::{AppError, ErrorBody, LocalizeMessages};

// =========================================================================
// Session authentication
// =========================================================================

/// Resolve `Authorization: Bearer <jwt>` into an [`AuthContext`].
///
/// Requests without the header pass through unauthenticated; actions that
/// need a caller reject them when extracting the context. A header that is
/// present but does not resolve to a live session is rejected here.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = match bearer_token(request.headers())? {
        Some(token) => token,
        None => return Ok(next.run(request).await),
    };

    let claims = state
        .signer
        .verify(&token)
        .map_err(|e| AppError::Unauthorized(e.to_string()))?;

    // The token must still match a live session row
    let session: Option<(Uuid, String)> = sqlx::query_as(
        r#"
        SELECT sessionable_id, sessionable_type
        FROM sessions
        WHERE id = $1 AND jwt = $2 AND expiration_at > NOW()
        "#,
    )
    .bind(claims.sid)
    .bind(&token)
    .fetch_optional(&state.pool)
    .await?;

    let (principal_id, sessionable_type) =
        session.ok_or_else(|| AppError::Unauthorized("session expired or revoked".to_string()))?;

    let sessionable_type = sessionable_type
        .parse::<SessionableType>()
        .map_err(|e| AppError::Internal(e.to_string()))?;

    let mut context = AuthContext::new(claims.sid, sessionable_type, principal_id);

    match sessionable_type {
        SessionableType::User => {
            let user: Option<(Uuid, String)> = sqlx::query_as(
                "SELECT organization_id, role_type::text FROM users WHERE id = $1",
            )
            .bind(principal_id)
            .fetch_optional(&state.pool)
            .await?;

            let (organization_id, role_type) =
                user.ok_or_else(|| AppError::Unauthorized("session owner no longer exists".to_string()))?;
            let role_type = role_type
                .parse::<RoleType>()
                .map_err(|e| AppError::Internal(e.to_string()))?;

            context = context
                .with_organization(organization_id)
                .with_role(role_type);
        }
        SessionableType::Agent => {
            let organization_id: Option<Uuid> = sqlx::query_scalar(
                "SELECT organization_id FROM agents WHERE id = $1 AND deleted_at IS NULL",
            )
            .bind(principal_id)
            .fetch_optional(&state.pool)
            .await?;

            let organization_id = organization_id
                .ok_or_else(|| AppError::Unauthorized("session owner no longer exists".to_string()))?;
            context = context.with_organization(organization_id);
        }
    }

    // Extract correlation ID or generate new one
    let correlation_id = request
        .headers()
        .get("X-Correlation-Id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);

    request
        .extensions_mut()
        .insert(context.with_correlation_id(correlation_id));

    Ok(next.run(request).await)
}

/// The bearer token, if an Authorization header is present
fn bearer_token(headers: &HeaderMap) -> Result<Option<String>, AppError> {
    let value = match headers.get(AUTHORIZATION) {
        Some(value) => value,
        None => return Ok(None),
    };

    value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| Some(token.trim().to_string()))
        .ok_or_else(|| AppError::Unauthorized("malformed Authorization header".to_string()))
}

// =========================================================================
// Error localization
// =========================================================================

/// Replace the language keys of a coded error with the registry's strings
pub async fn localize_errors(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let response = next.run(request).await;

    match response.extensions().get::<LocalizeMessages>().copied() {
        Some(LocalizeMessages(code)) => {
            let body = ErrorBody {
                status: code.status.as_u16(),
                error: code.key.to_string(),
                messages: state.registry.localize(&code),
            };
            (code.status, Json(body)).into_response()
        }
        None => response,
    }
}

// =========================================================================
// Request logging
// =========================================================================

/// Headers that should be masked in logs
const SENSITIVE_HEADERS: &[&str] = &["authorization", "cookie", "set-cookie"];

/// Mask sensitive headers for logging
pub fn mask_headers_for_logging(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let name_lower = name.as_str().to_lowercase();
            let masked_value = if SENSITIVE_HEADERS.contains(&name_lower.as_str()) {
                "[REDACTED]".to_string()
            } else {
                value.to_str().unwrap_or("[invalid utf8]").to_string()
            };
            (name.to_string(), masked_value)
        })
        .collect()
}

/// Request logging middleware
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let version = request.version();

    let headers = mask_headers_for_logging(request.headers());

    let start = std::time::Instant::now();

    tracing::info!(
        method = %method,
        uri = %uri,
        version = ?version,
        headers = ?headers,
        "Incoming request"
    );

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %status,
        duration_ms = %duration.as_millis(),
        "Request completed"
    );

    response
}
