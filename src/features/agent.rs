//! Agents
//!
//! Staff accounts that act on behalf of an organization. Agents sign in
//! through `sessions/create` with `type: "Agent"`.

use async_trait::async_trait;
use axum::{extract::State, routing::any, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::Feature;
use crate::api::{AppState, Args, Success};
use crate::auth::hash_password;
use crate::domain::{AuthContext, RoleType};
use crate::error::{AppError, AppResult, ErrorCode};

pub const AGENT_ALREADY_EXISTS: ErrorCode = ErrorCode::bad_request(
    "AGENT.BAD_REQUEST_AGENT_ALREADY_EXISTS",
    &["AGENT_ALREADY_EXISTS"],
);

const ERRORS: &[ErrorCode] = &[AGENT_ALREADY_EXISTS];

const STRINGS: &[(&str, &str)] = &[(
    "AGENT_ALREADY_EXISTS",
    "An agent with that email address already exists.",
)];

pub struct Agents;

#[async_trait]
impl Feature for Agents {
    fn name(&self) -> &'static str {
        "Agent"
    }

    fn path(&self) -> &'static str {
        "agents"
    }

    fn error_prefix(&self) -> &'static str {
        "AGENT"
    }

    fn routes(&self) -> Router<AppState> {
        Router::new()
            .route("/create", any(create))
            .route("/query", any(query))
    }

    fn errors(&self) -> &'static [ErrorCode] {
        ERRORS
    }

    fn strings(&self) -> &'static [(&'static str, &'static str)] {
        STRINGS
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateAgentArgs {
    #[validate(length(min = 1, max = 100, message = "is required"))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100, message = "is required"))]
    pub last_name: String,
    #[validate(email(message = "must be a valid email"))]
    pub email: String,
    #[validate(length(max = 32, message = "must be at most 32 characters"))]
    pub phone: Option<String>,
    #[validate(length(min = 8, message = "must be at least 8 characters"))]
    pub password: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct QueryAgentArgs {
    /// Case-insensitive match on name or email
    #[validate(length(min = 1, max = 100, message = "must be between 1 and 100 characters"))]
    pub search: Option<String>,
}

/// ILIKE pattern matching `search` literally anywhere in the column
fn contains_pattern(search: &str) -> String {
    let mut pattern = String::with_capacity(search.len() + 2);
    pattern.push('%');
    for c in search.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Create an agent in the caller's organization (employers only)
async fn create(
    State(state): State<AppState>,
    ctx: AuthContext,
    Args(args): Args<CreateAgentArgs>,
) -> AppResult<Success<Agent>> {
    ctx.require_role(RoleType::Employer)?;
    let organization_id = ctx.organization()?;

    let password =
        hash_password(&args.password).map_err(|e| AppError::Internal(e.to_string()))?;

    let agent: Option<Agent> = sqlx::query_as(
        r#"
        INSERT INTO agents (organization_id, first_name, last_name, email, phone, salt, password)
        VALUES ($1, $2, $3, lower($4), $5, $6, $7)
        ON CONFLICT (email) DO NOTHING
        RETURNING id, organization_id, first_name, last_name, email, phone, created_at, updated_at
        "#,
    )
    .bind(organization_id)
    .bind(&args.first_name)
    .bind(&args.last_name)
    .bind(&args.email)
    .bind(&args.phone)
    .bind(&password.salt)
    .bind(&password.hash)
    .fetch_optional(&state.pool)
    .await?;

    let agent = agent.ok_or(AGENT_ALREADY_EXISTS)?;

    tracing::info!(agent_id = %agent.id, organization_id = %organization_id, "Agent created");
    Ok(Success::new("agent", agent))
}

async fn query(
    State(state): State<AppState>,
    ctx: AuthContext,
    Args(args): Args<QueryAgentArgs>,
) -> AppResult<Success<Vec<Agent>>> {
    let organization_id = ctx.organization()?;
    let pattern = args.search.as_deref().map(contains_pattern);

    let agents: Vec<Agent> = sqlx::query_as(
        r#"
        SELECT id, organization_id, first_name, last_name, email, phone, created_at, updated_at
        FROM agents
        WHERE organization_id = $1
          AND deleted_at IS NULL
          AND ($2::text IS NULL
               OR email ILIKE $2
               OR first_name ILIKE $2
               OR last_name ILIKE $2)
        ORDER BY last_name, first_name
        "#,
    )
    .bind(organization_id)
    .bind(&pattern)
    .fetch_all(&state.pool)
    .await?;

    Ok(Success::new("agents", agents))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_pattern_escapes_wildcards() {
        assert_eq!(contains_pattern("smith"), "%smith%");
        assert_eq!(contains_pattern("50%"), r"%50\%%");
        assert_eq!(contains_pattern("j_doe"), r"%j\_doe%");
        assert_eq!(contains_pattern(r"a\b"), r"%a\\b%");
    }

    #[test]
    fn test_create_args_collect_all_violations() {
        let args: CreateAgentArgs = serde_json::from_str(
            r#"{"firstName":"","lastName":"Doe","email":"nope","password":"short"}"#,
        )
        .unwrap();
        let errors = args.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("first_name"));
        assert!(fields.contains_key("email"));
        assert!(fields.contains_key("password"));
        assert!(!fields.contains_key("last_name"));
    }

    #[test]
    fn test_agent_never_serializes_credentials() {
        let agent = Agent {
            id: Uuid::nil(),
            organization_id: Uuid::nil(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            phone: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let value = serde_json::to_value(agent).unwrap();
        assert!(value.get("password").is_none());
        assert!(value.get("salt").is_none());
    }
}
