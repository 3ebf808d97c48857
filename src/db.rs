//! Database module
//!
//! Connectivity and schema checks run at startup, plus the development seed.

use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::{hash_password, AuthError};
use crate::migration::{MigrationError, Migrator};

/// Seeded organization
pub const SEED_ORGANIZATION_ID: Uuid = Uuid::from_u128(0x0000_0000_0000_4000_8000_0000_0000_0001);
/// Seeded employer user
pub const SEED_EMPLOYER_ID: Uuid = Uuid::from_u128(0x0000_0000_0000_4000_8000_0000_0000_0002);
/// Seeded employee user
pub const SEED_EMPLOYEE_ID: Uuid = Uuid::from_u128(0x0000_0000_0000_4000_8000_0000_0000_0003);

pub const SEED_EMPLOYER_EMAIL: &str = "employer@ownerific.test";
pub const SEED_EMPLOYEE_EMAIL: &str = "employee@ownerific.test";

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Could not hash seed password: {0}")]
    Password(#[from] AuthError),
}

pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Check that every catalogue unit has been applied
pub async fn check_schema(pool: &PgPool) -> Result<bool, MigrationError> {
    let pending: Vec<&str> = Migrator::catalogue()?
        .status(pool)
        .await?
        .into_iter()
        .filter(|unit| !unit.applied)
        .map(|unit| unit.id)
        .collect();

    if !pending.is_empty() {
        tracing::error!(
            pending = ?pending,
            "Database schema is behind the migration catalogue. Please run migrations."
        );
        return Ok(false);
    }

    Ok(true)
}

/// Insert a development organization with one employer and one employee.
///
/// Safe to run repeatedly; existing rows are left untouched.
pub async fn seed(pool: &PgPool, password: &str) -> Result<(), SeedError> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO organizations (id, name, email, status)
        VALUES ($1, 'Ownerific Demo Co', 'hello@ownerific.test', 'PAYING')
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(SEED_ORGANIZATION_ID)
    .execute(&mut *tx)
    .await?;

    let users = [
        (SEED_EMPLOYER_ID, SEED_EMPLOYER_EMAIL, "EMPLOYER", "Erin"),
        (SEED_EMPLOYEE_ID, SEED_EMPLOYEE_EMAIL, "EMPLOYEE", "Evan"),
    ];

    for (id, email, role_type, first_name) in users {
        let stored = hash_password(password)?;
        sqlx::query(
            r#"
            INSERT INTO users
                (id, organization_id, status, role_type, first_name, last_name, email, salt, password)
            VALUES ($1, $2, 'ACTIVE', $3::user_role_type, $4, 'Demo', $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(SEED_ORGANIZATION_ID)
        .bind(role_type)
        .bind(first_name)
        .bind(email)
        .bind(&stored.salt)
        .bind(&stored.hash)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO credit_wallets (user_id)
            VALUES ($1)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query(
        r#"
        INSERT INTO programs (organization_id, name, description, monthly_allowance)
        VALUES ($1, 'Homeownership Benefit', 'Monthly Ownerific dollars toward a down payment', 100)
        ON CONFLICT (organization_id) DO NOTHING
        "#,
    )
    .bind(SEED_ORGANIZATION_ID)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        organization_id = %SEED_ORGANIZATION_ID,
        "Seed data verified: organization, employer, employee, program"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_ids_are_distinct_v4_uuids() {
        let ids = [SEED_ORGANIZATION_ID, SEED_EMPLOYER_ID, SEED_EMPLOYEE_ID];
        for id in ids {
            assert_eq!(id.get_version_num(), 4);
        }
        assert_ne!(ids[0], ids[1]);
        assert_ne!(ids[1], ids[2]);
    }
}
