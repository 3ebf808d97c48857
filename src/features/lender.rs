//! Lenders

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

pub const LENDER_ALREADY_EXISTS: ErrorCode = ErrorCode::bad_request(
    "LENDER.BAD_REQUEST_LENDER_ALREADY_EXISTS",
    &["LENDER_ALREADY_EXISTS"],
);

const ERRORS: &[ErrorCode] = &[LENDER_ALREADY_EXISTS];

const STRINGS: &[(&str, &str)] = &[(
    "LENDER_ALREADY_EXISTS",
    "A lender with that name already exists in your organization.",
)];

pub struct Lenders;

#[async_trait]
impl Feature for Lenders {
    fn name(&self) -> &'static str {
        "Lender"
    }

    fn path(&self) -> &'static str {
        "lenders"
    }

    fn error_prefix(&self) -> &'static str {
        "LENDER"
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
pub struct Lender {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateLenderArgs {
    #[validate(length(min = 1, max = 255, message = "must be between 1 and 255 characters"))]
    pub name: String,
    #[validate(email(message = "must be a valid email"))]
    pub email: Option<String>,
    #[validate(length(max = 32, message = "must be at most 32 characters"))]
    pub phone: Option<String>,
    #[validate(url(message = "must be a valid URL"))]
    pub url: Option<String>,
}

async fn create(
    State(state): State<AppState>,
    ctx: AuthContext,
    Args(args): Args<CreateLenderArgs>,
) -> AppResult<Success<Lender>> {
    ctx.require_role(RoleType::Employer)?;
    let organization_id = ctx.organization()?;

    let lender: Option<Lender> = sqlx::query_as(
        r#"
        INSERT INTO lenders (organization_id, name, email, phone, url)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (organization_id, name) DO NOTHING
        RETURNING id, organization_id, name, email, phone, url, created_at, updated_at
        "#,
    )
    .bind(organization_id)
    .bind(&args.name)
    .bind(&args.email)
    .bind(&args.phone)
    .bind(&args.url)
    .fetch_optional(&state.pool)
    .await?;

    let lender = lender.ok_or(LENDER_ALREADY_EXISTS)?;
    Ok(Success::new("lender", lender))
}

async fn query(
    State(state): State<AppState>,
    ctx: AuthContext,
) -> AppResult<Success<Vec<Lender>>> {
    let organization_id = ctx.organization()?;

    let lenders: Vec<Lender> = sqlx::query_as(
        r#"
        SELECT id, organization_id, name, email, phone, url, created_at, updated_at
        FROM lenders
        WHERE organization_id = $1 AND deleted_at IS NULL
        ORDER BY name
        "#,
    )
    .bind(organization_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Success::new("lenders", lenders))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_fields_validated_when_present() {
        let args: CreateLenderArgs =
            serde_json::from_str(r#"{"name":"First Home Bank","url":"not a url"}"#).unwrap();
        let errors = args.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("url"));

        let args: CreateLenderArgs = serde_json::from_str(r#"{"name":"First Home Bank"}"#).unwrap();
        assert!(args.validate().is_ok());
    }
}
