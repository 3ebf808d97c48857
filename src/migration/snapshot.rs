//! Schema snapshots
//!
//! Captures the shape of the current schema (columns and enum labels) so a
//! migration round trip can be compared against the state it started from.

use std::collections::BTreeMap;

use sqlx::PgPool;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnShape {
    pub data_type: String,
    pub udt_name: String,
    pub nullable: bool,
    pub default: Option<String>,
    pub numeric_precision: Option<i32>,
    pub numeric_scale: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaSnapshot {
    /// (table, column) → shape
    pub columns: BTreeMap<(String, String), ColumnShape>,
    /// enum type → labels in sort order
    pub enums: BTreeMap<String, Vec<String>>,
}

type ColumnRow = (
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<i32>,
    Option<i32>,
);

impl SchemaSnapshot {
    /// Snapshot the current schema, ignoring the migration tracking table
    pub async fn capture(pool: &PgPool) -> Result<Self, sqlx::Error> {
        let rows: Vec<ColumnRow> = sqlx::query_as(
            r#"
            SELECT
                table_name::text,
                column_name::text,
                data_type::text,
                udt_name::text,
                is_nullable::text,
                column_default::text,
                numeric_precision::int4,
                numeric_scale::int4
            FROM information_schema.columns
            WHERE table_schema = current_schema() AND table_name <> 'schema_migrations'
            "#,
        )
        .fetch_all(pool)
        .await?;

        let columns = rows
            .into_iter()
            .map(
                |(table, column, data_type, udt_name, nullable, default, precision, scale)| {
                    (
                        (table, column),
                        ColumnShape {
                            data_type,
                            udt_name,
                            nullable: nullable == "YES",
                            default,
                            numeric_precision: precision,
                            numeric_scale: scale,
                        },
                    )
                },
            )
            .collect();

        let labels: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT t.typname::text, e.enumlabel::text
            FROM pg_type t
            JOIN pg_enum e ON e.enumtypid = t.oid
            JOIN pg_namespace n ON n.oid = t.typnamespace
            WHERE n.nspname = current_schema()
            ORDER BY t.typname, e.enumsortorder
            "#,
        )
        .fetch_all(pool)
        .await?;

        let mut enums: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (type_name, label) in labels {
            enums.entry(type_name).or_default().push(label);
        }

        Ok(Self { columns, enums })
    }

    pub fn column(&self, table: &str, column: &str) -> Option<&ColumnShape> {
        self.columns.get(&(table.to_string(), column.to_string()))
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.columns.keys().any(|(t, _)| t == table)
    }
}
