//! Migration steps
//!
//! A unit is a list of steps executed on the unit's transaction. Column and
//! enum steps check the catalog first, so a retried unit skips work that
//! already exists instead of failing on it.

use sqlx::{Executor, PgConnection};

/// One schema change inside a migration unit.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    /// Raw SQL, may hold several statements
    Sql(&'static str),

    CreateEnum {
        name: &'static str,
        values: &'static [&'static str],
    },

    DropEnum {
        name: &'static str,
    },

    /// `definition` is everything after the column name (`TEXT NOT NULL DEFAULT ''`)
    AddColumn {
        table: &'static str,
        column: &'static str,
        definition: &'static str,
    },

    DropColumn {
        table: &'static str,
        column: &'static str,
    },

    RenameColumn {
        table: &'static str,
        from: &'static str,
        to: &'static str,
    },

    ReplaceEnum(EnumReplacement),
}

/// Swap the enum type behind a column for one with a different value set.
///
/// PostgreSQL cannot drop enum labels, and older versions cannot add them
/// inside a transaction, so the column moves to a freshly created type.
/// Existing values outside `values` are rewritten to `fallback`; NULL stays NULL.
#[derive(Debug, Clone, Copy)]
pub struct EnumReplacement {
    pub table: &'static str,
    pub column: &'static str,
    pub type_name: &'static str,
    pub values: &'static [&'static str],
    pub fallback: &'static str,
    pub default: Option<&'static str>,
}

impl EnumReplacement {
    fn staging_type(&self) -> String {
        format!("{}__replacement", self.type_name)
    }

    /// Ordered statements that perform the replacement
    pub fn statements(&self) -> Vec<String> {
        let staging = self.staging_type();
        let list = quote_literals(self.values);
        let Self {
            table,
            column,
            type_name,
            fallback,
            ..
        } = self;

        let mut statements = vec![
            format!(r#"CREATE TYPE "{staging}" AS ENUM ({list})"#),
            format!(r#"ALTER TABLE "{table}" ALTER COLUMN "{column}" DROP DEFAULT"#),
            format!(
                r#"ALTER TABLE "{table}" ALTER COLUMN "{column}" TYPE "{staging}" USING (CASE WHEN "{column}" IS NULL THEN NULL WHEN "{column}"::text IN ({list}) THEN "{column}"::text ELSE '{fallback}' END)::"{staging}""#
            ),
            format!(r#"DROP TYPE "{type_name}""#),
            format!(r#"ALTER TYPE "{staging}" RENAME TO "{type_name}""#),
        ];

        if let Some(default) = self.default {
            statements.push(format!(
                r#"ALTER TABLE "{table}" ALTER COLUMN "{column}" SET DEFAULT '{default}'::"{type_name}""#
            ));
        }

        statements
    }

    /// Checks the replacement is well formed
    pub fn check(&self) -> Result<(), String> {
        if self.values.is_empty() {
            return Err(format!("enum {} has no values", self.type_name));
        }
        if !self.values.contains(&self.fallback) {
            return Err(format!(
                "fallback {} is not a member of {}",
                self.fallback, self.type_name
            ));
        }
        if let Some(default) = self.default {
            if !self.values.contains(&default) {
                return Err(format!(
                    "default {} is not a member of {}",
                    default, self.type_name
                ));
            }
        }
        Ok(())
    }
}

fn quote_literals(values: &[&str]) -> String {
    values
        .iter()
        .map(|v| format!("'{}'", v.replace('\'', "''")))
        .collect::<Vec<_>>()
        .join(", ")
}

impl Step {
    pub async fn apply(&self, conn: &mut PgConnection) -> Result<(), sqlx::Error> {
        match *self {
            Step::Sql(sql) => {
                (&mut *conn).execute(sql).await?;
            }
            Step::CreateEnum { name, values } => {
                if !enum_exists(conn, name).await? {
                    let sql = format!(r#"CREATE TYPE "{name}" AS ENUM ({})"#, quote_literals(values));
                    (&mut *conn).execute(sql.as_str()).await?;
                }
            }
            Step::DropEnum { name } => {
                let sql = format!(r#"DROP TYPE IF EXISTS "{name}""#);
                (&mut *conn).execute(sql.as_str()).await?;
            }
            Step::AddColumn {
                table,
                column,
                definition,
            } => {
                if column_exists(conn, table, column).await? {
                    tracing::info!(table, column, "Column already present, skipping");
                } else {
                    let sql = format!(r#"ALTER TABLE "{table}" ADD COLUMN "{column}" {definition}"#);
                    (&mut *conn).execute(sql.as_str()).await?;
                }
            }
            Step::DropColumn { table, column } => {
                let sql = format!(r#"ALTER TABLE "{table}" DROP COLUMN IF EXISTS "{column}""#);
                (&mut *conn).execute(sql.as_str()).await?;
            }
            Step::RenameColumn { table, from, to } => {
                let from_present = column_exists(conn, table, from).await?;
                let to_present = column_exists(conn, table, to).await?;
                if !from_present && to_present {
                    tracing::info!(table, from, to, "Column already renamed, skipping");
                } else {
                    let sql = format!(r#"ALTER TABLE "{table}" RENAME COLUMN "{from}" TO "{to}""#);
                    (&mut *conn).execute(sql.as_str()).await?;
                }
            }
            Step::ReplaceEnum(replacement) => {
                for statement in replacement.statements() {
                    (&mut *conn).execute(statement.as_str()).await?;
                }
            }
        }
        Ok(())
    }
}

pub(crate) async fn column_exists(
    conn: &mut PgConnection,
    table: &str,
    column: &str,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM information_schema.columns
            WHERE table_schema = current_schema() AND table_name = $1 AND column_name = $2
        )
        "#,
    )
    .bind(table)
    .bind(column)
    .fetch_one(&mut *conn)
    .await
}

pub(crate) async fn enum_exists(conn: &mut PgConnection, name: &str) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM pg_type t
            JOIN pg_namespace n ON n.oid = t.typnamespace
            WHERE t.typname = $1 AND n.nspname = current_schema()
        )
        "#,
    )
    .bind(name)
    .fetch_one(&mut *conn)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: EnumReplacement = EnumReplacement {
        table: "users",
        column: "status",
        type_name: "user_status",
        values: &["PENDING", "ACTIVE"],
        fallback: "PENDING",
        default: Some("PENDING"),
    };

    #[test]
    fn test_replacement_statement_order() {
        let statements = STATUS.statements();
        assert_eq!(statements.len(), 6);
        assert!(statements[0].starts_with(r#"CREATE TYPE "user_status__replacement""#));
        assert!(statements[1].ends_with("DROP DEFAULT"));
        assert!(statements[2].contains(r#"ELSE 'PENDING' END)::"user_status__replacement""#));
        assert!(statements[2].contains(r#"WHEN "status" IS NULL THEN NULL"#));
        assert_eq!(statements[3], r#"DROP TYPE "user_status""#);
        assert_eq!(
            statements[4],
            r#"ALTER TYPE "user_status__replacement" RENAME TO "user_status""#
        );
        assert!(statements[5].ends_with(r#"SET DEFAULT 'PENDING'::"user_status""#));
    }

    #[test]
    fn test_replacement_without_default() {
        let replacement = EnumReplacement {
            default: None,
            ..STATUS
        };
        let statements = replacement.statements();
        assert_eq!(statements.len(), 5);
        assert!(statements.iter().all(|s| !s.contains("SET DEFAULT")));
    }

    #[test]
    fn test_check_rejects_foreign_fallback() {
        let replacement = EnumReplacement {
            fallback: "ARCHIVED",
            ..STATUS
        };
        assert!(replacement.check().unwrap_err().contains("fallback ARCHIVED"));
    }

    #[test]
    fn test_check_rejects_foreign_default() {
        let replacement = EnumReplacement {
            default: Some("NEW"),
            ..STATUS
        };
        assert!(replacement.check().unwrap_err().contains("default NEW"));
        assert!(STATUS.check().is_ok());
    }

    #[test]
    fn test_quote_literals_escapes() {
        assert_eq!(quote_literals(&["A", "B'C"]), "'A', 'B''C'");
    }
}
