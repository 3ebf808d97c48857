//! Migration runner integration tests
//!
//! Each test migrates its own schema up and down against a real database.

use ownerific_api::migration::{DownTarget, MigrationError, Migrator, SchemaSnapshot, MIGRATIONS};

mod common;

use common::TestDb;

async fn seed_user(db: &TestDb, status: &str) -> uuid::Uuid {
    let org: uuid::Uuid =
        sqlx::query_scalar("INSERT INTO organizations (name) VALUES ('Migrations Inc') RETURNING id")
            .fetch_one(&db.pool)
            .await
            .unwrap();

    sqlx::query_scalar(
        r#"
        INSERT INTO users (organization_id, status, email, salt, password)
        VALUES ($1, $2::user_status, $3, 'salt', 'digest')
        RETURNING id
        "#,
    )
    .bind(org)
    .bind(status)
    .bind(format!("{}@example.com", uuid::Uuid::new_v4()))
    .fetch_one(&db.pool)
    .await
    .unwrap()
}

#[tokio::test]
async fn test_up_then_down_restores_schema() {
    let Some(db) = TestDb::create().await else { return };
    let migrator = Migrator::catalogue().unwrap();

    migrator.up(&db.pool, Some("20230301094500")).await.unwrap();
    let before = SchemaSnapshot::capture(&db.pool).await.unwrap();
    assert!(before.column("users", "address_line2").is_none());

    let applied = migrator.up(&db.pool, None).await.unwrap();
    assert_eq!(applied.first(), Some(&"20230308160000"));
    let after_up = SchemaSnapshot::capture(&db.pool).await.unwrap();
    assert!(after_up.column("users", "is_intro_viewed").is_some());
    assert!(after_up.column("credit_wallet_logs", "dollars").is_some());

    let reverted = migrator
        .down(&db.pool, &DownTarget::Through("20230308160000".to_string()))
        .await
        .unwrap();
    assert_eq!(reverted.last(), Some(&"20230308160000"));
    assert_eq!(
        reverted.len(),
        MIGRATIONS.iter().filter(|m| m.id >= "20230308160000").count()
    );

    let after_down = SchemaSnapshot::capture(&db.pool).await.unwrap();
    assert_eq!(before, after_down);

    // Running up again is a no-op once nothing is pending
    migrator.up(&db.pool, None).await.unwrap();
    assert!(migrator.up(&db.pool, None).await.unwrap().is_empty());

    db.drop().await;
}

#[tokio::test]
async fn test_rename_keeps_wallet_log_amounts() {
    let Some(db) = TestDb::create().await else { return };
    let migrator = Migrator::catalogue().unwrap();

    migrator.up(&db.pool, Some("20230327133000")).await.unwrap();

    let user = seed_user(&db, "ACTIVE").await;
    let wallet: uuid::Uuid =
        sqlx::query_scalar("INSERT INTO credit_wallets (user_id) VALUES ($1) RETURNING id")
            .bind(user)
            .fetch_one(&db.pool)
            .await
            .unwrap();
    sqlx::query("INSERT INTO credit_wallet_logs (credit_wallet_id, ownerific_dollars) VALUES ($1, 12.34)")
        .bind(wallet)
        .execute(&db.pool)
        .await
        .unwrap();

    migrator.up(&db.pool, Some("20230331173243")).await.unwrap();
    let renamed: String = sqlx::query_scalar("SELECT dollars::text FROM credit_wallet_logs")
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(renamed, "12.34");

    migrator.down(&db.pool, &DownTarget::Last).await.unwrap();
    let restored: String = sqlx::query_scalar("SELECT ownerific_dollars::text FROM credit_wallet_logs")
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(restored, "12.34");

    db.drop().await;
}

#[tokio::test]
async fn test_enum_shrink_remaps_to_fallback() {
    let Some(db) = TestDb::create().await else { return };
    let migrator = Migrator::catalogue().unwrap();

    migrator.up(&db.pool, Some("20230207110500")).await.unwrap();

    let paused = seed_user(&db, "PAUSE").await;
    let active = seed_user(&db, "ACTIVE").await;
    sqlx::query("UPDATE users SET previous_status = 'NEW' WHERE id = $1")
        .bind(paused)
        .execute(&db.pool)
        .await
        .unwrap();

    migrator.down(&db.pool, &DownTarget::Last).await.unwrap();

    let (status, previous): (String, Option<String>) =
        sqlx::query_as("SELECT status::text, previous_status::text FROM users WHERE id = $1")
            .bind(paused)
            .fetch_one(&db.pool)
            .await
            .unwrap();
    assert_eq!(status, "PENDING");
    assert_eq!(previous.as_deref(), Some("PENDING"));

    let status: String = sqlx::query_scalar("SELECT status::text FROM users WHERE id = $1")
        .bind(active)
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(status, "ACTIVE");

    let snapshot = SchemaSnapshot::capture(&db.pool).await.unwrap();
    assert_eq!(
        snapshot.enums.get("user_status").unwrap(),
        &vec!["PENDING".to_string(), "ACTIVE".to_string(), "INACTIVE".to_string()]
    );

    db.drop().await;
}

#[tokio::test]
async fn test_irreversible_unit_blocks_revert() {
    let Some(db) = TestDb::migrated().await else { return };
    let migrator = Migrator::catalogue().unwrap();
    let applied_before = Migrator::applied(&db.pool).await.unwrap();

    let err = migrator
        .down(&db.pool, &DownTarget::Through("20230301094500".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, MigrationError::Irreversible { id: "20230301094500", .. }));
    assert_eq!(err.failing_unit(), Some("20230301094500"));

    let err = migrator.down(&db.pool, &DownTarget::All).await.unwrap_err();
    assert!(matches!(err, MigrationError::Irreversible { .. }));

    // Nothing was reverted by either refusal
    assert_eq!(Migrator::applied(&db.pool).await.unwrap(), applied_before);

    db.drop().await;
}

#[tokio::test]
async fn test_unknown_target_is_rejected() {
    let Some(db) = TestDb::create().await else { return };
    let migrator = Migrator::catalogue().unwrap();

    let err = migrator.up(&db.pool, Some("20991231000000")).await.unwrap_err();
    assert!(matches!(err, MigrationError::UnknownTarget(_)));
    assert!(Migrator::applied(&db.pool).await.unwrap().is_empty());

    db.drop().await;
}
