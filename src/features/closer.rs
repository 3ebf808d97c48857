//! Closers
//!
//! Loan closers, optionally attached to one of the organization's lenders.

use async_trait::async_trait;
use axum::{extract::State, routing::any, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::Feature;
use crate::api::{AppState, Args, Success};
use crate::domain::{AuthContext, RoleType};
use crate::error::{AppResult, ErrorCode};

pub const CLOSER_ALREADY_EXISTS: ErrorCode = ErrorCode::bad_request(
    "CLOSER.BAD_REQUEST_CLOSER_ALREADY_EXISTS",
    &["CLOSER_ALREADY_EXISTS"],
);

pub const LENDER_DOES_NOT_EXIST: ErrorCode = ErrorCode::bad_request(
    "CLOSER.BAD_REQUEST_LENDER_DOES_NOT_EXIST",
    &["CLOSER_LENDER_DOES_NOT_EXIST"],
);

const ERRORS: &[ErrorCode] = &[CLOSER_ALREADY_EXISTS, LENDER_DOES_NOT_EXIST];

const STRINGS: &[(&str, &str)] = &[
    (
        "CLOSER_ALREADY_EXISTS",
        "A closer with that email address already exists in your organization.",
    ),
    ("CLOSER_LENDER_DOES_NOT_EXIST", "That lender could not be found."),
];

pub struct Closers;

#[async_trait]
impl Feature for Closers {
    fn name(&self) -> &'static str {
        "Closer"
    }

    fn path(&self) -> &'static str {
        "closers"
    }

    fn error_prefix(&self) -> &'static str {
        "CLOSER"
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
pub struct Closer {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub lender_id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateCloserArgs {
    #[validate(length(min = 1, max = 100, message = "is required"))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100, message = "is required"))]
    pub last_name: String,
    #[validate(email(message = "must be a valid email"))]
    pub email: String,
    #[validate(length(max = 32, message = "must be at most 32 characters"))]
    pub phone: Option<String>,
    pub lender_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct QueryCloserArgs {
    pub lender_id: Option<Uuid>,
}

async fn create(
    State(state): State<AppState>,
    ctx: AuthContext,
    Args(args): Args<CreateCloserArgs>,
) -> AppResult<Success<Closer>> {
    ctx.require_role(RoleType::Employer)?;
    let organization_id = ctx.organization()?;

    if let Some(lender_id) = args.lender_id {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM lenders
                WHERE id = $1 AND organization_id = $2 AND deleted_at IS NULL
            )
            "#,
        )
        .bind(lender_id)
        .bind(organization_id)
        .fetch_one(&state.pool)
        .await?;

        if !exists {
            return Err(LENDER_DOES_NOT_EXIST.into());
        }
    }

    let closer: Option<Closer> = sqlx::query_as(
        r#"
        INSERT INTO closers (organization_id, lender_id, first_name, last_name, email, phone)
        VALUES ($1, $2, $3, $4, lower($5), $6)
        ON CONFLICT (organization_id, email) DO NOTHING
        RETURNING id, organization_id, lender_id, first_name, last_name, email, phone,
                  created_at, updated_at
        "#,
    )
    .bind(organization_id)
    .bind(args.lender_id)
    .bind(&args.first_name)
    .bind(&args.last_name)
    .bind(&args.email)
    .bind(&args.phone)
    .fetch_optional(&state.pool)
    .await?;

    let closer = closer.ok_or(CLOSER_ALREADY_EXISTS)?;
    Ok(Success::new("closer", closer))
}

async fn query(
    State(state): State<AppState>,
    ctx: AuthContext,
    Args(args): Args<QueryCloserArgs>,
) -> AppResult<Success<Vec<Closer>>> {
    let organization_id = ctx.organization()?;

    let closers: Vec<Closer> = sqlx::query_as(
        r#"
        SELECT id, organization_id, lender_id, first_name, last_name, email, phone,
               created_at, updated_at
        FROM closers
        WHERE organization_id = $1
          AND deleted_at IS NULL
          AND ($2::uuid IS NULL OR lender_id = $2)
        ORDER BY last_name, first_name
        "#,
    )
    .bind(organization_id)
    .bind(args.lender_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Success::new("closers", closers))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_args_accept_empty_body() {
        let args: QueryCloserArgs = serde_json::from_str("{}").unwrap();
        assert!(args.lender_id.is_none());
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_query_args_reject_bad_uuid() {
        let parsed: Result<QueryCloserArgs, _> = serde_json::from_str(r#"{"lenderId":"abc"}"#);
        assert!(parsed.is_err());
    }
}
