//! Common test utilities
//!
//! Database-backed tests run only when `DATABASE_URL` is set. Each test gets
//! its own schema so tests can migrate up and down in parallel.

#![allow(dead_code)]

use std::str::FromStr;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use tower::util::ServiceExt;
use uuid::Uuid;

use ownerific_api::api::{build_router, AppState};
use ownerific_api::auth::{hash_password, Claims, TokenSigner};
use ownerific_api::domain::SessionableType;
use ownerific_api::features::all_features;
use ownerific_api::migration::Migrator;
use ownerific_api::queue::Broker;
use ownerific_api::registry::Registry;
use ownerific_api::Config;

pub const JWT_SECRET: &str = "integration-test-secret";

/// A throwaway schema and a pool whose search_path points at it
pub struct TestDb {
    pub pool: PgPool,
    pub schema: String,
    admin: PgPool,
}

impl TestDb {
    /// Fresh empty schema, or None when no database is configured
    pub async fn create() -> Option<Self> {
        dotenvy::dotenv().ok();
        let database_url = match std::env::var("DATABASE_URL") {
            Ok(url) => url,
            Err(_) => {
                eprintln!("DATABASE_URL not set; skipping database test");
                return None;
            }
        };

        let admin = PgPoolOptions::new()
            .max_connections(1)
            .connect(&database_url)
            .await
            .expect("Failed to connect to DB");

        let schema = format!("test_{}", Uuid::new_v4().simple());
        sqlx::query(&format!("CREATE SCHEMA {schema}"))
            .execute(&admin)
            .await
            .expect("Failed to create test schema");

        let options = PgConnectOptions::from_str(&database_url)
            .expect("Invalid DATABASE_URL")
            .options([("search_path", schema.as_str())]);

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .expect("Failed to connect to test schema");

        Some(Self {
            pool,
            schema,
            admin,
        })
    }

    /// Fresh schema with every migration applied
    pub async fn migrated() -> Option<Self> {
        let db = Self::create().await?;
        Migrator::catalogue()
            .unwrap()
            .up(&db.pool, None)
            .await
            .expect("Failed to migrate test schema");
        Some(db)
    }

    pub async fn drop(self) {
        self.pool.close().await;
        sqlx::query(&format!("DROP SCHEMA {} CASCADE", self.schema))
            .execute(&self.admin)
            .await
            .expect("Failed to drop test schema");
        self.admin.close().await;
    }
}

pub fn test_config() -> Config {
    test_config_with(&[])
}

/// Test configuration with some variables replaced
pub fn test_config_with(overrides: &[(&str, &str)]) -> Config {
    let database_url = std::env::var("DATABASE_URL").unwrap_or_default();
    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

    Config::from_lookup(|key| {
        if let Some((_, value)) = overrides.iter().find(|(k, _)| *k == key) {
            return Some(value.to_string());
        }
        match key {
            "DATABASE_URL" => Some(database_url.clone()),
            "REDIS_URL" => Some(redis_url.clone()),
            "JWT_SECRET" => Some(JWT_SECRET.to_string()),
            _ => None,
        }
    })
    .unwrap()
}

/// The full application router over the given pool
pub fn app(pool: &PgPool) -> Router {
    app_with_config(pool, test_config())
}

pub fn app_with_config(pool: &PgPool, config: Config) -> Router {
    let features = all_features();
    let registry = Registry::build(&features).unwrap();
    let broker = Broker::open(&config.redis_url).unwrap();
    let state = AppState::new(pool.clone(), registry, broker, config);
    build_router(state, &features)
}

pub async fn create_organization(pool: &PgPool, name: &str) -> Uuid {
    sqlx::query_scalar("INSERT INTO organizations (name) VALUES ($1) RETURNING id")
        .bind(name)
        .fetch_one(pool)
        .await
        .unwrap()
}

/// Insert an ACTIVE user with a wallet; `role_type` is EMPLOYER or EMPLOYEE
pub async fn create_user(
    pool: &PgPool,
    organization_id: Uuid,
    role_type: &str,
    email: &str,
    password: &str,
) -> Uuid {
    let stored = hash_password(password).unwrap();
    let user_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO users (organization_id, status, role_type, first_name, last_name, email, salt, password)
        VALUES ($1, 'ACTIVE', $2::user_role_type, 'Test', 'User', $3, $4, $5)
        RETURNING id
        "#,
    )
    .bind(organization_id)
    .bind(role_type)
    .bind(email)
    .bind(&stored.salt)
    .bind(&stored.hash)
    .fetch_one(pool)
    .await
    .unwrap();

    sqlx::query("INSERT INTO credit_wallets (user_id) VALUES ($1)")
        .bind(user_id)
        .execute(pool)
        .await
        .unwrap();

    user_id
}

/// A live session token for the user, bypassing the login action
pub async fn session_token(pool: &PgPool, user_id: Uuid) -> String {
    let session_id = Uuid::new_v4();
    let expiration_at = Utc::now() + Duration::hours(1);
    let claims = Claims::new(session_id, SessionableType::User, user_id, expiration_at);
    let jwt = TokenSigner::new(JWT_SECRET).issue(&claims).unwrap();

    sqlx::query(
        r#"
        INSERT INTO sessions (id, sessionable_id, sessionable_type, jwt, expiration_at)
        VALUES ($1, $2, 'User', $3, $4)
        "#,
    )
    .bind(session_id)
    .bind(user_id)
    .bind(&jwt)
    .bind(expiration_at)
    .execute(pool)
    .await
    .unwrap();

    jwt
}

/// Send a request and decode the JSON body (Null when the body is not JSON)
pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}
