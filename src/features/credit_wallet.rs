//! Credit wallets
//!
//! One wallet per user holding Ownerific dollars. Every balance change is
//! recorded in the append-only wallet log within the same transaction.

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
use crate::error::{AppError, AppResult, ErrorCode};

pub const CREDIT_WALLET_DOES_NOT_EXIST: ErrorCode = ErrorCode::bad_request(
    "CREDIT_WALLET.BAD_REQUEST_CREDIT_WALLET_DOES_NOT_EXIST",
    &["CREDIT_WALLET_DOES_NOT_EXIST"],
);

pub const INVALID_AMOUNT: ErrorCode = ErrorCode::bad_request(
    "CREDIT_WALLET.BAD_REQUEST_INVALID_AMOUNT",
    &["CREDIT_WALLET_INVALID_AMOUNT"],
);

pub const INSUFFICIENT_FUNDS: ErrorCode = ErrorCode::bad_request(
    "CREDIT_WALLET.BAD_REQUEST_INSUFFICIENT_FUNDS",
    &["CREDIT_WALLET_INSUFFICIENT_FUNDS"],
);

const ERRORS: &[ErrorCode] = &[CREDIT_WALLET_DOES_NOT_EXIST, INVALID_AMOUNT, INSUFFICIENT_FUNDS];

const STRINGS: &[(&str, &str)] = &[
    ("CREDIT_WALLET_DOES_NOT_EXIST", "That credit wallet could not be found."),
    (
        "CREDIT_WALLET_INVALID_AMOUNT",
        "The amount must be a non-zero dollar value with at most two decimals.",
    ),
    (
        "CREDIT_WALLET_INSUFFICIENT_FUNDS",
        "The wallet does not hold enough Ownerific dollars for that adjustment.",
    ),
];

pub struct CreditWallets;

#[async_trait]
impl Feature for CreditWallets {
    fn name(&self) -> &'static str {
        "CreditWallet"
    }

    fn path(&self) -> &'static str {
        "creditWallets"
    }

    fn error_prefix(&self) -> &'static str {
        "CREDIT_WALLET"
    }

    fn routes(&self) -> Router<AppState> {
        Router::new()
            .route("/read", any(read))
            .route("/logs", any(logs))
            .route("/adjust", any(adjust))
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
pub struct CreditWallet {
    pub id: Uuid,
    pub user_id: Uuid,
    pub ownerific_dollars: Dollars,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CreditWalletLog {
    pub id: Uuid,
    pub credit_wallet_id: Uuid,
    pub dollars: Dollars,
    pub description: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct WalletArgs {
    /// Another user in the caller's organization; employers only
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AdjustArgs {
    pub user_id: Uuid,
    pub amount: Decimal,
    pub description: Option<serde_json::Value>,
}

/// Whose wallet the caller is asking about
fn wallet_owner(ctx: &AuthContext, user_id: Option<Uuid>) -> Result<Uuid, AppError> {
    match user_id {
        Some(user_id) if user_id != ctx.principal_id => {
            ctx.require_role(RoleType::Employer)?;
            Ok(user_id)
        }
        _ => ctx.user(),
    }
}

async fn find_wallet(
    state: &AppState,
    user_id: Uuid,
    organization_id: Uuid,
) -> Result<CreditWallet, AppError> {
    let wallet: Option<CreditWallet> = sqlx::query_as(
        r#"
        SELECT w.id, w.user_id, w.ownerific_dollars, w.created_at, w.updated_at
        FROM credit_wallets w
        JOIN users u ON u.id = w.user_id
        WHERE w.user_id = $1 AND u.organization_id = $2 AND w.deleted_at IS NULL
        "#,
    )
    .bind(user_id)
    .bind(organization_id)
    .fetch_optional(&state.pool)
    .await?;

    wallet.ok_or_else(|| CREDIT_WALLET_DOES_NOT_EXIST.into())
}

async fn read(
    State(state): State<AppState>,
    ctx: AuthContext,
    Args(args): Args<WalletArgs>,
) -> AppResult<Success<CreditWallet>> {
    let owner = wallet_owner(&ctx, args.user_id)?;
    let wallet = find_wallet(&state, owner, ctx.organization()?).await?;
    Ok(Success::new("creditWallet", wallet))
}

/// Wallet history, newest first
async fn logs(
    State(state): State<AppState>,
    ctx: AuthContext,
    Args(args): Args<WalletArgs>,
) -> AppResult<Success<Vec<CreditWalletLog>>> {
    let owner = wallet_owner(&ctx, args.user_id)?;
    let wallet = find_wallet(&state, owner, ctx.organization()?).await?;

    let logs: Vec<CreditWalletLog> = sqlx::query_as(
        r#"
        SELECT id, credit_wallet_id, dollars, description, created_at
        FROM credit_wallet_logs
        WHERE credit_wallet_id = $1
        ORDER BY created_at DESC
        "#,
    )
    .bind(wallet.id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Success::new("creditWalletLogs", logs))
}

/// Credit or debit a wallet (employers only)
async fn adjust(
    State(state): State<AppState>,
    ctx: AuthContext,
    Args(args): Args<AdjustArgs>,
) -> AppResult<Success<CreditWallet>> {
    ctx.require_role(RoleType::Employer)?;
    let organization_id = ctx.organization()?;
    let amount = Dollars::adjustment(args.amount).map_err(|_| INVALID_AMOUNT)?;

    let mut tx = state.pool.begin().await?;

    let wallet: Option<(Uuid, Dollars)> = sqlx::query_as(
        r#"
        SELECT w.id, w.ownerific_dollars
        FROM credit_wallets w
        JOIN users u ON u.id = w.user_id
        WHERE w.user_id = $1 AND u.organization_id = $2 AND w.deleted_at IS NULL
        FOR UPDATE OF w
        "#,
    )
    .bind(args.user_id)
    .bind(organization_id)
    .fetch_optional(&mut *tx)
    .await?;

    let (wallet_id, balance) = wallet.ok_or(CREDIT_WALLET_DOES_NOT_EXIST)?;
    let next = balance.checked_add(amount).map_err(|_| INVALID_AMOUNT)?;
    if next < Dollars::ZERO {
        return Err(INSUFFICIENT_FUNDS.into());
    }

    let wallet: CreditWallet = sqlx::query_as(
        r#"
        UPDATE credit_wallets SET ownerific_dollars = $2, updated_at = NOW()
        WHERE id = $1
        RETURNING id, user_id, ownerific_dollars, created_at, updated_at
        "#,
    )
    .bind(wallet_id)
    .bind(next)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO credit_wallet_logs (credit_wallet_id, dollars, description)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(wallet_id)
    .bind(amount)
    .bind(&args.description)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        wallet_id = %wallet_id,
        amount = %amount,
        balance = %next,
        "Credit wallet adjusted"
    );
    Ok(Success::new("creditWallet", wallet))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SessionableType;
    use rust_decimal_macros::dec;
    use std::str::FromStr;

    fn wallet_with(balance: Decimal) -> CreditWallet {
        CreditWallet {
            id: Uuid::nil(),
            user_id: Uuid::nil(),
            ownerific_dollars: Dollars::new(balance).unwrap(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_balance_reads_as_parsed_float() {
        for raw in ["0.00", "1234567890123456.78", "-15.25"] {
            let wallet = wallet_with(Decimal::from_str(raw).unwrap());
            let value = serde_json::to_value(&wallet).unwrap();
            assert_eq!(
                value["ownerificDollars"].as_f64().unwrap(),
                raw.parse::<f64>().unwrap(),
                "balance {raw}"
            );
        }
    }

    #[test]
    fn test_log_serializes_dollars_as_number() {
        let log = CreditWalletLog {
            id: Uuid::nil(),
            credit_wallet_id: Uuid::nil(),
            dollars: Dollars::new(dec!(-20.00)).unwrap(),
            description: Some(serde_json::json!({"reason": "monthly allowance"})),
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(&log).unwrap();
        assert_eq!(value["dollars"], serde_json::json!(-20.0));
        assert_eq!(value["description"]["reason"], "monthly allowance");
    }

    #[test]
    fn test_wallet_owner_scoping() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let employee = AuthContext::new(Uuid::new_v4(), SessionableType::User, me)
            .with_role(RoleType::Employee);
        assert_eq!(wallet_owner(&employee, None).unwrap(), me);
        assert_eq!(wallet_owner(&employee, Some(me)).unwrap(), me);
        assert!(matches!(
            wallet_owner(&employee, Some(other)),
            Err(AppError::Forbidden(_))
        ));

        let employer = AuthContext::new(Uuid::new_v4(), SessionableType::User, me)
            .with_role(RoleType::Employer);
        assert_eq!(wallet_owner(&employer, Some(other)).unwrap(), other);
    }

    #[test]
    fn test_adjust_args_accept_string_and_number_amounts() {
        let args: AdjustArgs =
            serde_json::from_str(&format!(r#"{{"userId":"{}","amount":"12.50"}}"#, Uuid::nil()))
                .unwrap();
        assert_eq!(args.amount, dec!(12.50));

        let args: AdjustArgs =
            serde_json::from_str(&format!(r#"{{"userId":"{}","amount":-3}}"#, Uuid::nil()))
                .unwrap();
        assert_eq!(args.amount, dec!(-3));
    }
}
