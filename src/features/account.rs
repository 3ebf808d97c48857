//! Accounts
//!
//! The signed-in user's own record, plus status changes an employer can make
//! for users in its organization.

use async_trait::async_trait;
use axum::{extract::State, routing::any, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::Feature;
use crate::api::{AppState, Args, Success};
use crate::domain::{AuthContext, RoleType, UserStatus};
use crate::error::{AppResult, ErrorCode};

pub const ACCOUNT_DOES_NOT_EXIST: ErrorCode = ErrorCode::bad_request(
    "ACCOUNT.BAD_REQUEST_ACCOUNT_DOES_NOT_EXIST",
    &["ACCOUNT_DOES_NOT_EXIST"],
);

pub const STATUS_UNCHANGED: ErrorCode = ErrorCode::bad_request(
    "ACCOUNT.BAD_REQUEST_STATUS_UNCHANGED",
    &["ACCOUNT_STATUS_UNCHANGED"],
);

const ERRORS: &[ErrorCode] = &[ACCOUNT_DOES_NOT_EXIST, STATUS_UNCHANGED];

const STRINGS: &[(&str, &str)] = &[
    ("ACCOUNT_DOES_NOT_EXIST", "That account could not be found."),
    ("ACCOUNT_STATUS_UNCHANGED", "The account already has that status."),
];

const SELECT_ACCOUNT: &str = r#"
    SELECT id, organization_id, status::text AS status,
           previous_status::text AS previous_status, role_type::text AS role_type,
           first_name, last_name, email, phone, timezone, locale, address_line2,
           is_intro_viewed, email_confirmed, primary_goal, goal_timeline,
           employment_type, employment_subtype, source, created_at, updated_at
    FROM users
"#;

const RETURNING_ACCOUNT: &str = r#"
    RETURNING id, organization_id, status::text AS status,
              previous_status::text AS previous_status, role_type::text AS role_type,
              first_name, last_name, email, phone, timezone, locale, address_line2,
              is_intro_viewed, email_confirmed, primary_goal, goal_timeline,
              employment_type, employment_subtype, source, created_at, updated_at
"#;

pub struct Accounts;

#[async_trait]
impl Feature for Accounts {
    fn name(&self) -> &'static str {
        "Account"
    }

    fn path(&self) -> &'static str {
        "accounts"
    }

    fn error_prefix(&self) -> &'static str {
        "ACCOUNT"
    }

    fn routes(&self) -> Router<AppState> {
        Router::new()
            .route("/read", any(read))
            .route("/update", any(update))
            .route("/status", any(status))
            .route("/intro", any(intro))
    }

    fn errors(&self) -> &'static [ErrorCode] {
        ERRORS
    }

    fn strings(&self) -> &'static [(&'static str, &'static str)] {
        STRINGS
    }
}

/// A user as seen by the API; credentials never leave the database
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: Uuid,
    pub organization_id: Uuid,
    #[sqlx(try_from = "String")]
    pub status: UserStatus,
    pub previous_status: Option<String>,
    #[sqlx(try_from = "String")]
    pub role_type: RoleType,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub timezone: String,
    pub locale: String,
    pub address_line2: String,
    pub is_intro_viewed: bool,
    pub email_confirmed: bool,
    pub primary_goal: Option<String>,
    pub goal_timeline: Option<String>,
    pub employment_type: Option<String>,
    pub employment_subtype: Option<String>,
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAccountArgs {
    #[validate(length(min = 1, max = 100, message = "must be between 1 and 100 characters"))]
    pub first_name: Option<String>,
    #[validate(length(min = 1, max = 100, message = "must be between 1 and 100 characters"))]
    pub last_name: Option<String>,
    #[validate(length(max = 32, message = "must be at most 32 characters"))]
    pub phone: Option<String>,
    #[validate(length(min = 1, max = 64, message = "must be between 1 and 64 characters"))]
    pub timezone: Option<String>,
    #[validate(length(min = 2, max = 16, message = "must be between 2 and 16 characters"))]
    pub locale: Option<String>,
    #[validate(length(max = 255, message = "must be at most 255 characters"))]
    pub address_line2: Option<String>,
    pub primary_goal: Option<String>,
    pub goal_timeline: Option<String>,
    pub employment_type: Option<String>,
    pub employment_subtype: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StatusArgs {
    pub status: UserStatus,
    /// Another user in the caller's organization; employers only
    pub user_id: Option<Uuid>,
}

async fn read(State(state): State<AppState>, ctx: AuthContext) -> AppResult<Success<Account>> {
    let user_id = ctx.user()?;
    let organization_id = ctx.organization()?;

    let account: Option<Account> =
        sqlx::query_as(&format!("{SELECT_ACCOUNT} WHERE id = $1 AND organization_id = $2"))
            .bind(user_id)
            .bind(organization_id)
            .fetch_optional(&state.pool)
            .await?;

    let account = account.ok_or(ACCOUNT_DOES_NOT_EXIST)?;
    Ok(Success::new("account", account))
}

/// Update profile fields; absent fields keep their value
async fn update(
    State(state): State<AppState>,
    ctx: AuthContext,
    Args(args): Args<UpdateAccountArgs>,
) -> AppResult<Success<Account>> {
    let user_id = ctx.user()?;
    let organization_id = ctx.organization()?;

    let account: Option<Account> = sqlx::query_as(&format!(
        r#"
        UPDATE users SET
            first_name = COALESCE($3, first_name),
            last_name = COALESCE($4, last_name),
            phone = COALESCE($5, phone),
            timezone = COALESCE($6, timezone),
            locale = COALESCE($7, locale),
            address_line2 = COALESCE($8, address_line2),
            primary_goal = COALESCE($9, primary_goal),
            goal_timeline = COALESCE($10, goal_timeline),
            employment_type = COALESCE($11, employment_type),
            employment_subtype = COALESCE($12, employment_subtype),
            updated_at = NOW()
        WHERE id = $1 AND organization_id = $2
        {RETURNING_ACCOUNT}
        "#
    ))
    .bind(user_id)
    .bind(organization_id)
    .bind(&args.first_name)
    .bind(&args.last_name)
    .bind(&args.phone)
    .bind(&args.timezone)
    .bind(&args.locale)
    .bind(&args.address_line2)
    .bind(&args.primary_goal)
    .bind(&args.goal_timeline)
    .bind(&args.employment_type)
    .bind(&args.employment_subtype)
    .fetch_optional(&state.pool)
    .await?;

    let account = account.ok_or(ACCOUNT_DOES_NOT_EXIST)?;
    Ok(Success::new("account", account))
}

/// Change a user's status, keeping the status it had before
async fn status(
    State(state): State<AppState>,
    ctx: AuthContext,
    Args(args): Args<StatusArgs>,
) -> AppResult<Success<Account>> {
    let organization_id = ctx.organization()?;
    let target = match args.user_id {
        Some(user_id) if user_id != ctx.principal_id => {
            ctx.require_role(RoleType::Employer)?;
            user_id
        }
        _ => ctx.user()?,
    };

    let mut tx = state.pool.begin().await?;

    let current: Option<String> = sqlx::query_scalar(
        "SELECT status::text FROM users WHERE id = $1 AND organization_id = $2 FOR UPDATE",
    )
    .bind(target)
    .bind(organization_id)
    .fetch_optional(&mut *tx)
    .await?;

    let current = current.ok_or(ACCOUNT_DOES_NOT_EXIST)?;
    if current == args.status.as_str() {
        return Err(STATUS_UNCHANGED.into());
    }

    // previous_status takes the value status had before this statement
    let account: Account = sqlx::query_as(&format!(
        r#"
        UPDATE users SET
            previous_status = status::text::user_previous_status,
            status = $2::user_status,
            updated_at = NOW()
        WHERE id = $1
        {RETURNING_ACCOUNT}
        "#
    ))
    .bind(target)
    .bind(args.status.as_str())
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        user_id = %target,
        from = %current,
        to = %args.status,
        "Account status changed"
    );
    Ok(Success::new("account", account))
}

/// Mark the intro as seen
async fn intro(State(state): State<AppState>, ctx: AuthContext) -> AppResult<Success<Account>> {
    let user_id = ctx.user()?;
    let organization_id = ctx.organization()?;

    let account: Option<Account> = sqlx::query_as(&format!(
        r#"
        UPDATE users SET is_intro_viewed = TRUE, updated_at = NOW()
        WHERE id = $1 AND organization_id = $2
        {RETURNING_ACCOUNT}
        "#
    ))
    .bind(user_id)
    .bind(organization_id)
    .fetch_optional(&state.pool)
    .await?;

    let account = account.ok_or(ACCOUNT_DOES_NOT_EXIST)?;
    Ok(Success::new("account", account))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_args_reject_unknown_status() {
        let parsed: Result<StatusArgs, _> = serde_json::from_str(r#"{"status":"DELETED"}"#);
        assert!(parsed.is_err());

        let parsed: StatusArgs = serde_json::from_str(r#"{"status":"PAUSE"}"#).unwrap();
        assert_eq!(parsed.status, UserStatus::Pause);
        assert!(parsed.user_id.is_none());
    }

    #[test]
    fn test_update_args_validation() {
        let args = UpdateAccountArgs {
            first_name: Some(String::new()),
            locale: Some("e".to_string()),
            ..Default::default()
        };
        let errors = args.validate().unwrap_err();
        assert_eq!(errors.field_errors().len(), 2);

        assert!(UpdateAccountArgs::default().validate().is_ok());
    }
}
