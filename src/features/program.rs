//! Programs
//!
//! Each organization runs at most one benefits program, which sets the
//! monthly allowance credited to its employees' wallets.

use async_trait::async_trait;
use axum::{extract::State, routing::any, Router};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::Feature;
use crate::api::{AppState, Args, Success};
use crate::domain::{AuthContext, Dollars, RoleType};
use crate::error::{AppResult, ErrorCode};

pub const PROGRAM_DOES_NOT_EXIST: ErrorCode = ErrorCode::bad_request(
    "PROGRAM.BAD_REQUEST_PROGRAM_DOES_NOT_EXIST",
    &["PROGRAM_DOES_NOT_EXIST"],
);

pub const PROGRAM_ALREADY_EXISTS: ErrorCode = ErrorCode::bad_request(
    "PROGRAM.BAD_REQUEST_PROGRAM_ALREADY_EXISTS",
    &["PROGRAM_ALREADY_EXISTS"],
);

pub const INVALID_MONTHLY_ALLOWANCE: ErrorCode = ErrorCode::bad_request(
    "PROGRAM.BAD_REQUEST_INVALID_MONTHLY_ALLOWANCE",
    &["PROGRAM_INVALID_MONTHLY_ALLOWANCE"],
);

const ERRORS: &[ErrorCode] = &[
    PROGRAM_DOES_NOT_EXIST,
    PROGRAM_ALREADY_EXISTS,
    INVALID_MONTHLY_ALLOWANCE,
];

const STRINGS: &[(&str, &str)] = &[
    ("PROGRAM_DOES_NOT_EXIST", "Your organization does not have a program yet."),
    ("PROGRAM_ALREADY_EXISTS", "Your organization already has a program."),
    (
        "PROGRAM_INVALID_MONTHLY_ALLOWANCE",
        "The monthly allowance must be a positive dollar amount.",
    ),
];

pub struct Programs;

#[async_trait]
impl Feature for Programs {
    fn name(&self) -> &'static str {
        "Program"
    }

    fn path(&self) -> &'static str {
        "programs"
    }

    fn error_prefix(&self) -> &'static str {
        "PROGRAM"
    }

    fn routes(&self) -> Router<AppState> {
        Router::new()
            .route("/read", any(read))
            .route("/create", any(create))
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
pub struct Program {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub monthly_allowance: Dollars,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateProgramArgs {
    #[validate(length(min = 1, max = 255, message = "must be between 1 and 255 characters"))]
    pub name: String,
    #[validate(length(max = 2000, message = "must be at most 2000 characters"))]
    pub description: Option<String>,
    pub monthly_allowance: Decimal,
}

/// The caller's organization program
async fn read(State(state): State<AppState>, ctx: AuthContext) -> AppResult<Success<Program>> {
    let organization_id = ctx.organization()?;

    let program: Option<Program> = sqlx::query_as(
        r#"
        SELECT id, organization_id, name, description, monthly_allowance, created_at, updated_at
        FROM programs
        WHERE organization_id = $1
        "#,
    )
    .bind(organization_id)
    .fetch_optional(&state.pool)
    .await?;

    let program = program.ok_or(PROGRAM_DOES_NOT_EXIST)?;
    Ok(Success::new("program", program))
}

/// Create the organization's program (employers only)
async fn create(
    State(state): State<AppState>,
    ctx: AuthContext,
    Args(args): Args<CreateProgramArgs>,
) -> AppResult<Success<Program>> {
    ctx.require_role(RoleType::Employer)?;
    let organization_id = ctx.organization()?;

    let allowance = Dollars::new(args.monthly_allowance).map_err(|_| INVALID_MONTHLY_ALLOWANCE)?;
    if allowance <= Dollars::ZERO {
        return Err(INVALID_MONTHLY_ALLOWANCE.into());
    }

    let program: Option<Program> = sqlx::query_as(
        r#"
        INSERT INTO programs (organization_id, name, description, monthly_allowance)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (organization_id) DO NOTHING
        RETURNING id, organization_id, name, description, monthly_allowance, created_at, updated_at
        "#,
    )
    .bind(organization_id)
    .bind(&args.name)
    .bind(&args.description)
    .bind(allowance)
    .fetch_optional(&state.pool)
    .await?;

    let program = program.ok_or(PROGRAM_ALREADY_EXISTS)?;

    tracing::info!(program_id = %program.id, organization_id = %organization_id, "Program created");
    Ok(Success::new("program", program))
}
