//! Sessions
//!
//! Login and logout. A session row backs every bearer token; expired rows
//! are purged by `SessionQueue` jobs queued at each login.

use async_trait::async_trait;
use axum::{extract::State, routing::any, Router};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use super::Feature;
use crate::api::{AppState, Args, Success};
use crate::auth::{verify_password, Claims};
use crate::domain::{AuthContext, SessionableType, UserStatus};
use crate::error::{AppError, AppResult, ErrorCode};
use crate::queue::{Job, JobError, JobProcessor, Queue, QueueError};
use crate::workers::WorkerContext;

pub const QUEUE_NAME: &str = "SessionQueue";
pub const PURGE_EXPIRED: &str = "purgeExpired";

pub const INVALID_CREDENTIALS: ErrorCode = ErrorCode::bad_request(
    "SESSION.BAD_REQUEST_INVALID_CREDENTIALS",
    &["SESSION_INVALID_CREDENTIALS"],
);

pub const ACCOUNT_INACTIVE: ErrorCode = ErrorCode::bad_request(
    "SESSION.BAD_REQUEST_ACCOUNT_INACTIVE",
    &["SESSION_ACCOUNT_INACTIVE"],
);

const ERRORS: &[ErrorCode] = &[INVALID_CREDENTIALS, ACCOUNT_INACTIVE];

const STRINGS: &[(&str, &str)] = &[
    ("SESSION_INVALID_CREDENTIALS", "The email or password is incorrect."),
    ("SESSION_ACCOUNT_INACTIVE", "This account has been deactivated."),
];

pub struct Sessions;

#[async_trait]
impl Feature for Sessions {
    fn name(&self) -> &'static str {
        "Session"
    }

    fn path(&self) -> &'static str {
        "sessions"
    }

    fn error_prefix(&self) -> &'static str {
        "SESSION"
    }

    fn routes(&self) -> Router<AppState> {
        Router::new()
            .route("/create", any(create))
            .route("/delete", any(delete))
    }

    fn errors(&self) -> &'static [ErrorCode] {
        ERRORS
    }

    fn strings(&self) -> &'static [(&'static str, &'static str)] {
        STRINGS
    }

    async fn register_background_work(
        &self,
        ctx: &WorkerContext,
    ) -> Result<Vec<Queue>, QueueError> {
        let queue = ctx.open_queue(QUEUE_NAME).await?;
        queue
            .process(SessionPurger {
                pool: ctx.pool.clone(),
            })
            .await?;
        Ok(vec![queue])
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: Uuid,
    pub jwt: String,
    pub sessionable_id: Uuid,
    pub sessionable_type: SessionableType,
    pub expiration_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndedSession {
    pub id: Uuid,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionArgs {
    #[validate(email(message = "must be a valid email"))]
    pub email: String,
    #[validate(length(min = 1, message = "is required"))]
    pub password: String,
    #[serde(rename = "type", default = "default_sessionable_type")]
    pub sessionable_type: SessionableType,
}

fn default_sessionable_type() -> SessionableType {
    SessionableType::User
}

/// Payload of a purge job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeJob {
    pub sessionable_id: Uuid,
    pub sessionable_type: SessionableType,
}

/// Log in. Needs no bearer token.
async fn create(
    State(state): State<AppState>,
    Args(args): Args<CreateSessionArgs>,
) -> AppResult<Success<SessionView>> {
    let email = args.email.trim().to_lowercase();

    let credentials: Option<(Uuid, String, Option<String>)> = match args.sessionable_type {
        SessionableType::User => {
            sqlx::query_as("SELECT id, password, status::text FROM users WHERE email = $1")
                .bind(&email)
                .fetch_optional(&state.pool)
                .await?
        }
        SessionableType::Agent => {
            sqlx::query_as(
                "SELECT id, password, NULL::text FROM agents WHERE email = $1 AND deleted_at IS NULL",
            )
            .bind(&email)
            .fetch_optional(&state.pool)
            .await?
        }
    };

    let (principal_id, hash, status) = credentials.ok_or(INVALID_CREDENTIALS)?;
    if !verify_password(&args.password, &hash) {
        return Err(INVALID_CREDENTIALS.into());
    }
    if status.as_deref() == Some(UserStatus::Inactive.as_str()) {
        return Err(ACCOUNT_INACTIVE.into());
    }

    let session_id = Uuid::new_v4();
    let expiration_at = Utc::now() + Duration::hours(state.config.session_ttl_hours);
    let claims = Claims::new(session_id, args.sessionable_type, principal_id, expiration_at);
    let jwt = state
        .signer
        .issue(&claims)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    sqlx::query(
        r#"
        INSERT INTO sessions (id, sessionable_id, sessionable_type, jwt, expiration_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(session_id)
    .bind(principal_id)
    .bind(args.sessionable_type.as_str())
    .bind(&jwt)
    .bind(expiration_at)
    .execute(&state.pool)
    .await?;

    // Housekeeping only; the login never waits on the broker
    let purge = PurgeJob {
        sessionable_id: principal_id,
        sessionable_type: args.sessionable_type,
    };
    let producer = state.broker.producer(QUEUE_NAME);
    tokio::spawn(async move {
        if let Err(e) = producer.add(PURGE_EXPIRED, &purge).await {
            tracing::warn!(error = %e, "Could not queue expired session purge");
        }
    });

    tracing::info!(
        session_id = %session_id,
        sessionable_type = %args.sessionable_type,
        "Session created"
    );

    Ok(Success::new(
        "session",
        SessionView {
            id: session_id,
            jwt,
            sessionable_id: principal_id,
            sessionable_type: args.sessionable_type,
            expiration_at,
        },
    ))
}

/// Log out of the current session
async fn delete(State(state): State<AppState>, ctx: AuthContext) -> AppResult<Success<EndedSession>> {
    sqlx::query("DELETE FROM sessions WHERE id = $1")
        .bind(ctx.session_id)
        .execute(&state.pool)
        .await?;

    Ok(Success::new("session", EndedSession { id: ctx.session_id }))
}

/// Deletes a principal's expired sessions
pub struct SessionPurger {
    pub pool: PgPool,
}

#[async_trait]
impl JobProcessor for SessionPurger {
    async fn process(&self, job: &Job) -> Result<(), JobError> {
        if job.name != PURGE_EXPIRED {
            return Err(JobError::UnknownJob(job.name.clone()));
        }
        let payload: PurgeJob = job.payload()?;

        let purged = sqlx::query(
            r#"
            DELETE FROM sessions
            WHERE sessionable_id = $1 AND sessionable_type = $2 AND expiration_at <= NOW()
            "#,
        )
        .bind(payload.sessionable_id)
        .bind(payload.sessionable_type.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        tracing::debug!(
            sessionable_id = %payload.sessionable_id,
            purged,
            "Expired sessions purged"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_args_default_to_user() {
        let args: CreateSessionArgs =
            serde_json::from_str(r#"{"email":"jo@example.com","password":"secret"}"#).unwrap();
        assert_eq!(args.sessionable_type, SessionableType::User);

        let args: CreateSessionArgs = serde_json::from_str(
            r#"{"email":"jo@example.com","password":"secret","type":"Agent"}"#,
        )
        .unwrap();
        assert_eq!(args.sessionable_type, SessionableType::Agent);
    }

    #[test]
    fn test_purge_job_payload() {
        let id = Uuid::new_v4();
        let job = Job::new(
            QUEUE_NAME,
            PURGE_EXPIRED,
            &PurgeJob {
                sessionable_id: id,
                sessionable_type: SessionableType::User,
            },
        )
        .unwrap();
        assert_eq!(
            job.data,
            serde_json::json!({"sessionableId": id, "sessionableType": "User"})
        );
        let payload: PurgeJob = job.payload().unwrap();
        assert_eq!(payload.sessionable_id, id);
    }
}
