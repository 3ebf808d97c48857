//! Schema migration tool
//!
//! Run with:
//!   cargo run --bin migrate -- up [--to ID]
//!   cargo run --bin migrate -- down [--to ID | --all]
//!   cargo run --bin migrate -- status

use sqlx::postgres::PgPoolOptions;

use ownerific_api::migration::{DownTarget, Migrator};

const USAGE: &str = "usage: migrate <up [--to ID] | down [--to ID | --all] | status>";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Up(Option<String>),
    Down(DownTarget),
    Status,
}

fn parse(args: &[String]) -> anyhow::Result<Command> {
    let flag_value = |flag: &str| -> anyhow::Result<Option<String>> {
        match args.iter().position(|a| a == flag) {
            Some(i) => args
                .get(i + 1)
                .cloned()
                .map(Some)
                .ok_or_else(|| anyhow::anyhow!("{flag} needs a migration id\n{USAGE}")),
            None => Ok(None),
        }
    };

    match args.first().map(String::as_str) {
        Some("up") => Ok(Command::Up(flag_value("--to")?)),
        Some("down") => {
            let all = args.iter().any(|a| a == "--all");
            match (flag_value("--to")?, all) {
                (Some(_), true) => Err(anyhow::anyhow!("--to and --all conflict\n{USAGE}")),
                (Some(id), false) => Ok(Command::Down(DownTarget::Through(id))),
                (None, true) => Ok(Command::Down(DownTarget::All)),
                (None, false) => Ok(Command::Down(DownTarget::Last)),
            }
        }
        Some("status") => Ok(Command::Status),
        _ => Err(anyhow::anyhow!(USAGE)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ownerific_api=info".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse(&args)?;

    let database_url = std::env::var("DATABASE_URL")?;
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await?;

    let migrator = Migrator::catalogue()?;

    match command {
        Command::Up(target) => {
            let applied = migrator.up(&pool, target.as_deref()).await?;
            for id in &applied {
                println!("applied  {id}");
            }
            println!("{} migration(s) applied", applied.len());
        }
        Command::Down(target) => {
            let reverted = migrator.down(&pool, &target).await?;
            for id in &reverted {
                println!("reverted {id}");
            }
            println!("{} migration(s) reverted", reverted.len());
        }
        Command::Status => {
            for unit in migrator.status(&pool).await? {
                println!(
                    "{} {} {}{}",
                    if unit.applied { "[x]" } else { "[ ]" },
                    unit.id,
                    unit.name,
                    if unit.reversible { "" } else { " (irreversible)" }
                );
            }
        }
    }

    pool.close().await;
    Ok(())
}
