//! Schema migrations
//!
//! Applies and reverts the ordered migration catalogue. Every unit runs in
//! its own transaction: a failing step rolls the whole unit back and halts
//! the batch, so the schema is never left half-changed.

pub mod snapshot;
pub mod step;
pub mod units;

use std::collections::BTreeSet;

use sqlx::PgPool;

pub use snapshot::SchemaSnapshot;
pub use step::{EnumReplacement, Step};
pub use units::MIGRATIONS;

/// Advisory lock taken by every unit transaction
const MIGRATION_LOCK_KEY: i64 = 0x6f77_6e65_726d_6967;

/// A forward/backward schema change identified by its timestamp id.
#[derive(Debug)]
pub struct Migration {
    pub id: &'static str,
    pub name: &'static str,
    pub up: &'static [Step],
    pub down: Down,
}

/// How a unit is reverted.
#[derive(Debug)]
pub enum Down {
    Steps(&'static [Step]),
    /// One-way change; reverting through it is refused
    Irreversible { reason: &'static str },
}

impl Migration {
    pub fn is_reversible(&self) -> bool {
        matches!(self.down, Down::Steps(_))
    }

    fn steps(&self) -> impl Iterator<Item = &'static Step> {
        let down: &'static [Step] = match self.down {
            Down::Steps(steps) => steps,
            Down::Irreversible { .. } => &[],
        };
        self.up.iter().chain(down.iter())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// How far a revert goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownTarget {
    /// Only the most recently applied unit
    Last,
    /// Every applied unit with an id at or after the given one
    Through(String),
    All,
}

/// Applied/pending state of one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitStatus {
    pub id: &'static str,
    pub name: &'static str,
    pub applied: bool,
    pub reversible: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("Migration id {0} is not a 14-digit timestamp")]
    InvalidId(&'static str),

    #[error("Migration {id} is out of order (follows {previous})")]
    OutOfOrder {
        previous: &'static str,
        id: &'static str,
    },

    #[error("Migration {id} has an invalid enum replacement: {reason}")]
    InvalidEnum { id: &'static str, reason: String },

    #[error("Unknown migration target: {0}")]
    UnknownTarget(String),

    #[error("Migration {id} is irreversible: {reason}")]
    Irreversible {
        id: &'static str,
        reason: &'static str,
    },

    #[error("Migration {id} ({name}) failed: {source}")]
    UnitFailed {
        id: &'static str,
        name: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl MigrationError {
    /// Id of the unit that failed, when the failure belongs to one
    pub fn failing_unit(&self) -> Option<&'static str> {
        match self {
            MigrationError::UnitFailed { id, .. }
            | MigrationError::Irreversible { id, .. }
            | MigrationError::InvalidEnum { id, .. } => Some(*id),
            _ => None,
        }
    }
}

/// Runs the migration catalogue against a database.
#[derive(Debug, Clone)]
pub struct Migrator {
    units: &'static [Migration],
}

impl Migrator {
    /// Validate a catalogue: ids are 14-digit timestamps in strictly
    /// ascending order and every enum replacement is well formed.
    pub fn new(units: &'static [Migration]) -> Result<Self, MigrationError> {
        let mut previous: Option<&'static str> = None;

        for unit in units {
            if unit.id.len() != 14 || !unit.id.bytes().all(|b| b.is_ascii_digit()) {
                return Err(MigrationError::InvalidId(unit.id));
            }
            if let Some(previous) = previous {
                if unit.id <= previous {
                    return Err(MigrationError::OutOfOrder {
                        previous,
                        id: unit.id,
                    });
                }
            }
            for step in unit.steps() {
                if let Step::ReplaceEnum(replacement) = step {
                    replacement
                        .check()
                        .map_err(|reason| MigrationError::InvalidEnum { id: unit.id, reason })?;
                }
            }
            previous = Some(unit.id);
        }

        Ok(Self { units })
    }

    /// The crate's own catalogue
    pub fn catalogue() -> Result<Self, MigrationError> {
        Self::new(MIGRATIONS)
    }

    pub fn units(&self) -> &'static [Migration] {
        self.units
    }

    fn find(&self, id: &str) -> Result<&'static Migration, MigrationError> {
        self.units
            .iter()
            .find(|unit| unit.id == id)
            .ok_or_else(|| MigrationError::UnknownTarget(id.to_string()))
    }

    /// Pending units in ascending order, stopping after `target` when given
    pub fn plan_up(
        &self,
        applied: &BTreeSet<String>,
        target: Option<&str>,
    ) -> Result<Vec<&'static Migration>, MigrationError> {
        let limit = match target {
            Some(id) => Some(self.find(id)?.id),
            None => None,
        };

        Ok(self
            .units
            .iter()
            .filter(|unit| !applied.contains(unit.id))
            .filter(|unit| limit.map_or(true, |limit| unit.id <= limit))
            .collect())
    }

    /// Applied units to revert, newest first.
    ///
    /// Refuses the whole plan when it reaches an irreversible unit.
    pub fn plan_down(
        &self,
        applied: &BTreeSet<String>,
        target: &DownTarget,
    ) -> Result<Vec<&'static Migration>, MigrationError> {
        let mut candidates: Vec<&'static Migration> = self
            .units
            .iter()
            .rev()
            .filter(|unit| applied.contains(unit.id))
            .collect();

        match target {
            DownTarget::Last => candidates.truncate(1),
            DownTarget::Through(id) => {
                let limit = self.find(id)?.id;
                candidates.retain(|unit| unit.id >= limit);
            }
            DownTarget::All => {}
        }

        for unit in &candidates {
            if let Down::Irreversible { reason } = unit.down {
                return Err(MigrationError::Irreversible {
                    id: unit.id,
                    reason,
                });
            }
        }

        Ok(candidates)
    }

    /// Create the tracking table if missing
    pub async fn ensure_table(pool: &PgPool) -> Result<(), MigrationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Ids recorded as applied
    pub async fn applied(pool: &PgPool) -> Result<BTreeSet<String>, MigrationError> {
        Self::ensure_table(pool).await?;
        let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM schema_migrations")
            .fetch_all(pool)
            .await?;
        Ok(ids.into_iter().collect())
    }

    pub async fn status(&self, pool: &PgPool) -> Result<Vec<UnitStatus>, MigrationError> {
        let applied = Self::applied(pool).await?;

        for id in &applied {
            if !self.units.iter().any(|unit| unit.id == id.as_str()) {
                tracing::warn!(id = %id, "Applied migration is not in the catalogue");
            }
        }

        Ok(self
            .units
            .iter()
            .map(|unit| UnitStatus {
                id: unit.id,
                name: unit.name,
                applied: applied.contains(unit.id),
                reversible: unit.is_reversible(),
            })
            .collect())
    }

    /// Apply pending units in ascending order. Returns the ids applied.
    pub async fn up(
        &self,
        pool: &PgPool,
        target: Option<&str>,
    ) -> Result<Vec<&'static str>, MigrationError> {
        let applied = Self::applied(pool).await?;
        let plan = self.plan_up(&applied, target)?;

        let mut done = Vec::with_capacity(plan.len());
        for unit in plan {
            if self.run_unit(pool, unit, Direction::Up).await? {
                done.push(unit.id);
            }
        }

        tracing::info!(count = done.len(), "Migrations applied");
        Ok(done)
    }

    /// Revert applied units newest first. Returns the ids reverted.
    pub async fn down(
        &self,
        pool: &PgPool,
        target: &DownTarget,
    ) -> Result<Vec<&'static str>, MigrationError> {
        let applied = Self::applied(pool).await?;
        let plan = self.plan_down(&applied, target)?;

        let mut done = Vec::with_capacity(plan.len());
        for unit in plan {
            if self.run_unit(pool, unit, Direction::Down).await? {
                done.push(unit.id);
            }
        }

        tracing::info!(count = done.len(), "Migrations reverted");
        Ok(done)
    }

    /// Run one unit inside a transaction. Returns false when another runner
    /// already moved it in this direction.
    async fn run_unit(
        &self,
        pool: &PgPool,
        unit: &'static Migration,
        direction: Direction,
    ) -> Result<bool, MigrationError> {
        let steps = match (direction, &unit.down) {
            (Direction::Up, _) => unit.up,
            (Direction::Down, Down::Steps(steps)) => *steps,
            (Direction::Down, Down::Irreversible { reason }) => {
                return Err(MigrationError::Irreversible {
                    id: unit.id,
                    reason: *reason,
                });
            }
        };

        let mut tx = pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let recorded: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM schema_migrations WHERE id = $1)")
                .bind(unit.id)
                .fetch_one(&mut *tx)
                .await?;

        if recorded == (direction == Direction::Up) {
            tx.rollback().await?;
            tracing::info!(id = unit.id, ?direction, "Migration already handled elsewhere");
            return Ok(false);
        }

        tracing::info!(id = unit.id, name = unit.name, ?direction, "Running migration");

        for (index, step) in steps.iter().enumerate() {
            if let Err(source) = step.apply(&mut tx).await {
                tracing::error!(
                    id = unit.id,
                    name = unit.name,
                    step = index,
                    error = %source,
                    "Migration step failed, rolling back"
                );
                if let Err(e) = tx.rollback().await {
                    tracing::error!(id = unit.id, error = %e, "Rollback failed");
                }
                return Err(MigrationError::UnitFailed {
                    id: unit.id,
                    name: unit.name,
                    source,
                });
            }
        }

        let record = match direction {
            Direction::Up => sqlx::query("INSERT INTO schema_migrations (id, name) VALUES ($1, $2)")
                .bind(unit.id)
                .bind(unit.name),
            Direction::Down => sqlx::query("DELETE FROM schema_migrations WHERE id = $1").bind(unit.id),
        };
        record.execute(&mut *tx).await?;

        tx.commit().await?;
        Ok(true)
    }
}
