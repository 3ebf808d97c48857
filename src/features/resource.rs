//! Resources
//!
//! Homebuying resources shown to every organization, either national or
//! local to the user's state.

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

pub const RESOURCE_ALREADY_EXISTS: ErrorCode = ErrorCode::bad_request(
    "RESOURCE.BAD_REQUEST_RESOURCE_ALREADY_EXISTS",
    &["RESOURCE_ALREADY_EXISTS"],
);

const ERRORS: &[ErrorCode] = &[RESOURCE_ALREADY_EXISTS];

const STRINGS: &[(&str, &str)] = &[(
    "RESOURCE_ALREADY_EXISTS",
    "A resource with that name already exists.",
)];

pub struct Resources;

#[async_trait]
impl Feature for Resources {
    fn name(&self) -> &'static str {
        "Resource"
    }

    fn path(&self) -> &'static str {
        "resources"
    }

    fn error_prefix(&self) -> &'static str {
        "RESOURCE"
    }

    fn routes(&self) -> Router<AppState> {
        Router::new()
            .route("/query", any(query))
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
pub struct Resource {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub info_url: Option<String>,
    pub is_national: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct QueryResourceArgs {
    pub is_national: Option<bool>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateResourceArgs {
    #[validate(length(min = 1, max = 255, message = "must be between 1 and 255 characters"))]
    pub name: String,
    #[validate(length(max = 2000, message = "must be at most 2000 characters"))]
    pub description: Option<String>,
    #[validate(url(message = "must be a valid URL"))]
    pub image_url: Option<String>,
    #[validate(url(message = "must be a valid URL"))]
    pub info_url: Option<String>,
    #[serde(default)]
    pub is_national: bool,
}

async fn query(
    State(state): State<AppState>,
    _ctx: AuthContext,
    Args(args): Args<QueryResourceArgs>,
) -> AppResult<Success<Vec<Resource>>> {
    let resources: Vec<Resource> = sqlx::query_as(
        r#"
        SELECT id, name, description, image_url, info_url, is_national, created_at, updated_at
        FROM resources
        WHERE deleted_at IS NULL
          AND ($1::boolean IS NULL OR is_national = $1)
        ORDER BY name
        "#,
    )
    .bind(args.is_national)
    .fetch_all(&state.pool)
    .await?;

    Ok(Success::new("resources", resources))
}

/// Publish a resource (employers only)
async fn create(
    State(state): State<AppState>,
    ctx: AuthContext,
    Args(args): Args<CreateResourceArgs>,
) -> AppResult<Success<Resource>> {
    ctx.require_role(RoleType::Employer)?;

    let mut tx = state.pool.begin().await?;

    let taken: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM resources WHERE lower(name) = lower($1) AND deleted_at IS NULL)",
    )
    .bind(&args.name)
    .fetch_one(&mut *tx)
    .await?;

    if taken {
        return Err(RESOURCE_ALREADY_EXISTS.into());
    }

    let resource: Resource = sqlx::query_as(
        r#"
        INSERT INTO resources (name, description, image_url, info_url, is_national)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, name, description, image_url, info_url, is_national, created_at, updated_at
        "#,
    )
    .bind(&args.name)
    .bind(&args.description)
    .bind(&args.image_url)
    .bind(&args.info_url)
    .bind(args.is_national)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(Success::new("resource", resource))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_national_defaults_to_false() {
        let args: CreateResourceArgs = serde_json::from_str(r#"{"name":"HUD counselors"}"#).unwrap();
        assert!(!args.is_national);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_bad_urls_are_all_reported() {
        let args: CreateResourceArgs = serde_json::from_str(
            r#"{"name":"HUD counselors","imageUrl":"nope","infoUrl":"also nope"}"#,
        )
        .unwrap();
        let errors = args.validate().unwrap_err();
        assert_eq!(errors.field_errors().len(), 2);
    }
}
