//! Development seed
//!
//! Run with: cargo run --bin seed -- [password]
//!
//! Requires a fully migrated database.

use sqlx::postgres::PgPoolOptions;

use ownerific_api::db;

const DEFAULT_PASSWORD: &str = "ownerific-dev";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ownerific_api=info".into()),
        )
        .init();

    let password = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_PASSWORD.to_string());

    let database_url = std::env::var("DATABASE_URL")?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await?;

    if !db::check_schema(&pool).await? {
        return Err(anyhow::anyhow!("Database schema incomplete; run `migrate up` first"));
    }

    db::seed(&pool, &password).await?;

    println!("Seeded organization {}", db::SEED_ORGANIZATION_ID);
    println!("  employer: {}", db::SEED_EMPLOYER_EMAIL);
    println!("  employee: {}", db::SEED_EMPLOYEE_EMAIL);

    pool.close().await;
    Ok(())
}
