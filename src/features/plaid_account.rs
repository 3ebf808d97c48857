//! Plaid accounts
//!
//! Bank accounts linked through Plaid. When the user already has a Dwolla
//! customer on the configured Dwolla API, a job on `PlaidAccountQueue` turns
//! the Plaid processor token into a Dwolla funding source and stores its URL.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{extract::State, routing::any, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use super::Feature;
use crate::api::{AppState, Args, Success};
use crate::config::DwollaConfig;
use crate::domain::AuthContext;
use crate::error::{AppResult, ErrorCode};
use crate::integrations::dwolla::{DwollaClient, FundingSourceLinker, Unconfigured};
use crate::queue::{Job, JobError, JobProcessor, Queue, QueueError};
use crate::workers::WorkerContext;

pub const QUEUE_NAME: &str = "PlaidAccountQueue";
pub const CREATE_FUNDING_SOURCE: &str = "createFundingSource";

pub const PLAID_ACCOUNT_ALREADY_EXISTS: ErrorCode = ErrorCode::bad_request(
    "PLAID_ACCOUNT.BAD_REQUEST_PLAID_ACCOUNT_ALREADY_EXISTS",
    &["PLAID_ACCOUNT_ALREADY_EXISTS"],
);

pub const INVALID_DWOLLA_CUSTOMER: ErrorCode = ErrorCode::bad_request(
    "PLAID_ACCOUNT.BAD_REQUEST_INVALID_DWOLLA_CUSTOMER",
    &["PLAID_ACCOUNT_INVALID_DWOLLA_CUSTOMER"],
);

const ERRORS: &[ErrorCode] = &[PLAID_ACCOUNT_ALREADY_EXISTS, INVALID_DWOLLA_CUSTOMER];

const STRINGS: &[(&str, &str)] = &[
    (
        "PLAID_ACCOUNT_ALREADY_EXISTS",
        "That bank account is already linked.",
    ),
    (
        "PLAID_ACCOUNT_INVALID_DWOLLA_CUSTOMER",
        "That Dwolla customer cannot be used for this account.",
    ),
];

pub struct PlaidAccounts;

#[async_trait]
impl Feature for PlaidAccounts {
    fn name(&self) -> &'static str {
        "PlaidAccount"
    }

    fn path(&self) -> &'static str {
        "plaidAccounts"
    }

    fn error_prefix(&self) -> &'static str {
        "PLAID_ACCOUNT"
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

    async fn register_background_work(
        &self,
        ctx: &WorkerContext,
    ) -> Result<Vec<Queue>, QueueError> {
        let linker: Arc<dyn FundingSourceLinker> = match ctx.config.dwolla.clone() {
            Some(config) => match DwollaClient::new(config) {
                Ok(client) => Arc::new(client),
                Err(e) => {
                    tracing::error!(error = %e, "Could not build Dwolla client");
                    Arc::new(Unconfigured)
                }
            },
            None => {
                tracing::warn!("Dwolla is not configured; funding source jobs will fail");
                Arc::new(Unconfigured)
            }
        };

        let queue = ctx.open_queue(QUEUE_NAME).await?;
        queue
            .process(FundingSourceProcessor {
                pool: ctx.pool.clone(),
                linker,
            })
            .await?;
        Ok(vec![queue])
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PlaidAccount {
    pub id: Uuid,
    pub user_id: Uuid,
    pub item_id: String,
    #[serde(skip_serializing)]
    pub processor_token: String,
    pub account_name: String,
    pub mask: Option<String>,
    pub institution_name: Option<String>,
    pub dwolla_customer_url: Option<String>,
    pub dwolla_funding_source_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreatePlaidAccountArgs {
    #[validate(length(min = 1, max = 255, message = "is required"))]
    pub item_id: String,
    #[validate(length(min = 1, max = 512, message = "is required"))]
    pub processor_token: String,
    #[validate(length(min = 1, max = 255, message = "is required"))]
    pub account_name: String,
    #[validate(length(max = 8, message = "must be at most 8 characters"))]
    pub mask: Option<String>,
    #[validate(length(max = 255, message = "must be at most 255 characters"))]
    pub institution_name: Option<String>,
    #[validate(url(message = "must be a valid URL"))]
    pub dwolla_customer_url: Option<String>,
}

/// Payload of a funding source job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingSourceJob {
    pub plaid_account_id: Uuid,
}

const PLAID_ACCOUNT_COLUMNS: &str = "id, user_id, item_id, processor_token, account_name, mask, \
     institution_name, dwolla_customer_url, dwolla_funding_source_url, created_at, updated_at";

/// A customer URL is only accepted when it points at the configured Dwolla API
fn check_customer_url(dwolla: Option<&DwollaConfig>, url: Option<&str>) -> Result<(), ErrorCode> {
    match (url, dwolla) {
        (None, _) => Ok(()),
        (Some(url), Some(dwolla)) if dwolla.environment.is_customer_url(url) => Ok(()),
        (Some(_), _) => Err(INVALID_DWOLLA_CUSTOMER),
    }
}

/// Store the account, then enqueue Dwolla linking. The row is removed again
/// when the job cannot be queued.
async fn create(
    State(state): State<AppState>,
    ctx: AuthContext,
    Args(args): Args<CreatePlaidAccountArgs>,
) -> AppResult<Success<PlaidAccount>> {
    let user_id = ctx.user()?;
    check_customer_url(state.config.dwolla.as_ref(), args.dwolla_customer_url.as_deref())?;

    let mut tx = state.pool.begin().await?;

    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM plaid_accounts WHERE user_id = $1 AND item_id = $2 AND account_name = $3)",
    )
    .bind(user_id)
    .bind(&args.item_id)
    .bind(&args.account_name)
    .fetch_one(&mut *tx)
    .await?;

    if exists {
        return Err(PLAID_ACCOUNT_ALREADY_EXISTS.into());
    }

    let account: PlaidAccount = sqlx::query_as(&format!(
        r#"
        INSERT INTO plaid_accounts
            (user_id, item_id, processor_token, account_name, mask, institution_name, dwolla_customer_url)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {PLAID_ACCOUNT_COLUMNS}
        "#
    ))
    .bind(user_id)
    .bind(&args.item_id)
    .bind(&args.processor_token)
    .bind(&args.account_name)
    .bind(&args.mask)
    .bind(&args.institution_name)
    .bind(&args.dwolla_customer_url)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    // Enqueue only once the row is visible to workers
    if account.dwolla_customer_url.is_some() {
        let queued = state
            .broker
            .producer(QUEUE_NAME)
            .add(
                CREATE_FUNDING_SOURCE,
                &FundingSourceJob {
                    plaid_account_id: account.id,
                },
            )
            .await;

        if let Err(e) = queued {
            sqlx::query("DELETE FROM plaid_accounts WHERE id = $1")
                .bind(account.id)
                .execute(&state.pool)
                .await?;
            return Err(e.into());
        }
    }

    tracing::info!(plaid_account_id = %account.id, user_id = %user_id, "Plaid account linked");
    Ok(Success::new("plaidAccount", account))
}

async fn query(
    State(state): State<AppState>,
    ctx: AuthContext,
) -> AppResult<Success<Vec<PlaidAccount>>> {
    let user_id = ctx.user()?;

    let accounts: Vec<PlaidAccount> = sqlx::query_as(&format!(
        "SELECT {PLAID_ACCOUNT_COLUMNS} FROM plaid_accounts WHERE user_id = $1 ORDER BY created_at"
    ))
    .bind(user_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Success::new("plaidAccounts", accounts))
}

/// Creates the Dwolla funding source for a stored Plaid account
pub struct FundingSourceProcessor {
    pub pool: PgPool,
    pub linker: Arc<dyn FundingSourceLinker>,
}

#[async_trait]
impl JobProcessor for FundingSourceProcessor {
    async fn process(&self, job: &Job) -> Result<(), JobError> {
        if job.name != CREATE_FUNDING_SOURCE {
            return Err(JobError::UnknownJob(job.name.clone()));
        }
        let payload: FundingSourceJob = job.payload()?;

        let row: Option<(String, String, Option<String>, Option<String>)> = sqlx::query_as(
            r#"
            SELECT processor_token, account_name, dwolla_customer_url, dwolla_funding_source_url
            FROM plaid_accounts
            WHERE id = $1
            "#,
        )
        .bind(payload.plaid_account_id)
        .fetch_optional(&self.pool)
        .await?;

        let (processor_token, account_name, customer_url, funding_source_url) = row.ok_or_else(|| {
            JobError::Failed(format!("plaid account {} not found", payload.plaid_account_id))
        })?;

        // Already linked by an earlier attempt
        if funding_source_url.is_some() {
            return Ok(());
        }

        let customer_url = customer_url.ok_or_else(|| {
            JobError::Failed(format!(
                "plaid account {} has no Dwolla customer",
                payload.plaid_account_id
            ))
        })?;

        let location = self
            .linker
            .create_funding_source(&customer_url, &processor_token, &account_name)
            .await
            .map_err(|e| JobError::Failed(e.to_string()))?;

        sqlx::query(
            r#"
            UPDATE plaid_accounts SET dwolla_funding_source_url = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(payload.plaid_account_id)
        .bind(&location)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            plaid_account_id = %payload.plaid_account_id,
            funding_source = %location,
            "Funding source stored"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    #[test]
    fn test_processor_token_is_not_serialized() {
        let account = PlaidAccount {
            id: Uuid::nil(),
            user_id: Uuid::nil(),
            item_id: "item-1".to_string(),
            processor_token: "processor-sandbox-secret".to_string(),
            account_name: "Checking".to_string(),
            mask: Some("0000".to_string()),
            institution_name: None,
            dwolla_customer_url: None,
            dwolla_funding_source_url: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let value = serde_json::to_value(account).unwrap();
        assert!(value.get("processorToken").is_none());
        assert_eq!(value["accountName"], "Checking");
    }

    #[tokio::test]
    async fn test_processor_rejects_unknown_job() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        let processor = FundingSourceProcessor {
            pool,
            linker: Arc::new(Unconfigured),
        };
        let job = Job::new(QUEUE_NAME, "somethingElse", &serde_json::json!({})).unwrap();
        assert!(matches!(
            processor.process(&job).await,
            Err(JobError::UnknownJob(_))
        ));
    }

    #[test]
    fn test_customer_url_checked_against_configured_environment() {
        let dwolla = DwollaConfig {
            app_key: "key".to_string(),
            app_secret: "secret".to_string(),
            environment: crate::config::DwollaEnvironment::Sandbox,
        };
        let customer = "https://api-sandbox.dwolla.com/customers/ad5f2162-404a-4c4c-994e-6ab6c3a13254";

        assert!(check_customer_url(Some(&dwolla), None).is_ok());
        assert!(check_customer_url(None, None).is_ok());
        assert!(check_customer_url(Some(&dwolla), Some(customer)).is_ok());

        let args: CreatePlaidAccountArgs = serde_json::from_value(serde_json::json!({
            "itemId": "item-1",
            "processorToken": "processor-sandbox-1",
            "accountName": "Checking",
            "dwollaCustomerUrl": "https://attacker.example/steal"
        }))
        .unwrap();
        assert!(args.validate().is_ok());
        assert_eq!(
            check_customer_url(Some(&dwolla), args.dwolla_customer_url.as_deref())
                .unwrap_err()
                .key,
            INVALID_DWOLLA_CUSTOMER.key
        );

        // Without credentials nothing could link the account
        assert!(check_customer_url(None, Some(customer)).is_err());
    }

    #[test]
    fn test_job_payload_shape() {
        let id = Uuid::new_v4();
        let value = serde_json::to_value(FundingSourceJob { plaid_account_id: id }).unwrap();
        assert_eq!(value, serde_json::json!({"plaidAccountId": id}));
    }
}
