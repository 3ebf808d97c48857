//! Migration catalogue
//!
//! One unit per schema change, ordered by timestamp id. Ids are never
//! reused or reordered once a unit has shipped.

use super::step::{EnumReplacement, Step};
use super::{Down, Migration};

const USER_STATUS_V1: &[&str] = &["PENDING", "ACTIVE", "INACTIVE"];
const USER_STATUS_V2: &[&str] = &["PENDING", "ACTIVE", "INACTIVE", "ONBOARDING", "NEW", "PAUSE"];

pub static MIGRATIONS: &[Migration] = &[
    Migration {
        id: "20221101090000",
        name: "create_organizations",
        up: &[
            Step::CreateEnum {
                name: "organization_status",
                values: &["PAYING", "GUEST"],
            },
            Step::Sql(
                r#"
                CREATE TABLE organizations (
                    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                    timezone TEXT NOT NULL DEFAULT 'America/New_York',
                    locale TEXT NOT NULL DEFAULT 'en',
                    is_active BOOLEAN NOT NULL DEFAULT TRUE,
                    name TEXT NOT NULL,
                    email TEXT UNIQUE,
                    phone TEXT,
                    url TEXT,
                    status organization_status NOT NULL DEFAULT 'GUEST',
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )
                "#,
            ),
        ],
        down: Down::Steps(&[
            Step::Sql("DROP TABLE organizations"),
            Step::DropEnum {
                name: "organization_status",
            },
        ]),
    },
    Migration {
        id: "20221101090100",
        name: "create_users",
        up: &[
            Step::CreateEnum {
                name: "user_status",
                values: USER_STATUS_V1,
            },
            Step::CreateEnum {
                name: "user_role_type",
                values: &["EMPLOYER", "EMPLOYEE"],
            },
            Step::Sql(
                r#"
                CREATE TABLE users (
                    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                    organization_id UUID NOT NULL REFERENCES organizations(id),
                    timezone TEXT NOT NULL DEFAULT 'America/New_York',
                    locale TEXT NOT NULL DEFAULT 'en',
                    status user_status NOT NULL DEFAULT 'PENDING',
                    role_type user_role_type NOT NULL DEFAULT 'EMPLOYEE',
                    first_name TEXT NOT NULL DEFAULT '',
                    last_name TEXT NOT NULL DEFAULT '',
                    email TEXT NOT NULL UNIQUE,
                    phone TEXT,
                    salt TEXT NOT NULL,
                    password TEXT NOT NULL,
                    email_confirmed BOOLEAN NOT NULL DEFAULT FALSE,
                    email_confirmation_token TEXT,
                    primary_goal TEXT,
                    goal_timeline TEXT,
                    employment_type TEXT,
                    employment_subtype TEXT,
                    source TEXT,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                );
                CREATE INDEX users_organization_id_idx ON users (organization_id);
                "#,
            ),
        ],
        down: Down::Steps(&[
            Step::Sql("DROP TABLE users"),
            Step::DropEnum {
                name: "user_role_type",
            },
            Step::DropEnum { name: "user_status" },
        ]),
    },
    Migration {
        id: "20221101090200",
        name: "create_sessions",
        up: &[Step::Sql(
            r#"
            CREATE TABLE sessions (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                sessionable_id UUID NOT NULL,
                sessionable_type TEXT NOT NULL,
                jwt TEXT NOT NULL,
                expiration_at TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            CREATE INDEX sessions_sessionable_idx ON sessions (sessionable_type, sessionable_id);
            CREATE UNIQUE INDEX sessions_jwt_idx ON sessions (jwt);
            "#,
        )],
        down: Down::Steps(&[Step::Sql("DROP TABLE sessions")]),
    },
    Migration {
        id: "20221101090300",
        name: "create_credit_wallets",
        up: &[Step::Sql(
            r#"
            CREATE TABLE credit_wallets (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                user_id UUID NOT NULL UNIQUE REFERENCES users(id),
                ownerific_dollars NUMERIC(20, 2) NOT NULL DEFAULT 0,
                deleted_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )],
        down: Down::Steps(&[Step::Sql("DROP TABLE credit_wallets")]),
    },
    Migration {
        id: "20221101090400",
        name: "create_credit_wallet_logs",
        up: &[Step::Sql(
            r#"
            CREATE TABLE credit_wallet_logs (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                credit_wallet_id UUID NOT NULL REFERENCES credit_wallets(id),
                ownerific_dollars NUMERIC(20, 2) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            CREATE INDEX credit_wallet_logs_wallet_idx ON credit_wallet_logs (credit_wallet_id);
            "#,
        )],
        down: Down::Steps(&[Step::Sql("DROP TABLE credit_wallet_logs")]),
    },
    Migration {
        id: "20221115100000",
        name: "create_resources",
        up: &[Step::Sql(
            r#"
            CREATE TABLE resources (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                name TEXT NOT NULL,
                description TEXT,
                image_url TEXT,
                info_url TEXT,
                deleted_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )],
        down: Down::Steps(&[Step::Sql("DROP TABLE resources")]),
    },
    Migration {
        id: "20221115100100",
        name: "create_questionaires",
        up: &[Step::Sql(
            r#"
            CREATE TABLE questionaires (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                user_id UUID NOT NULL REFERENCES users(id),
                answers JSONB NOT NULL DEFAULT '{}'::jsonb,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )],
        down: Down::Steps(&[Step::Sql("DROP TABLE questionaires")]),
    },
    Migration {
        id: "20221115100200",
        name: "create_transactions",
        up: &[Step::Sql(
            r#"
            CREATE TABLE transactions (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                user_id UUID NOT NULL REFERENCES users(id),
                amount NUMERIC(20, 2) NOT NULL,
                description TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )],
        down: Down::Steps(&[Step::Sql("DROP TABLE transactions")]),
    },
    Migration {
        id: "20221201120000",
        name: "create_plaid_accounts",
        up: &[Step::Sql(
            r#"
            CREATE TABLE plaid_accounts (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                user_id UUID NOT NULL REFERENCES users(id),
                item_id TEXT NOT NULL,
                processor_token TEXT NOT NULL,
                account_name TEXT NOT NULL,
                mask TEXT,
                dwolla_customer_url TEXT,
                dwolla_funding_source_url TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            CREATE INDEX plaid_accounts_user_idx ON plaid_accounts (user_id);
            "#,
        )],
        down: Down::Steps(&[Step::Sql("DROP TABLE plaid_accounts")]),
    },
    Migration {
        id: "20221210140000",
        name: "create_programs",
        up: &[Step::Sql(
            r#"
            CREATE TABLE programs (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                organization_id UUID NOT NULL UNIQUE REFERENCES organizations(id),
                name TEXT NOT NULL,
                description TEXT,
                monthly_allowance NUMERIC(20, 2) NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )],
        down: Down::Steps(&[Step::Sql("DROP TABLE programs")]),
    },
    Migration {
        id: "20221210140100",
        name: "create_lenders",
        up: &[Step::Sql(
            r#"
            CREATE TABLE lenders (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                organization_id UUID NOT NULL REFERENCES organizations(id),
                name TEXT NOT NULL,
                email TEXT,
                phone TEXT,
                url TEXT,
                deleted_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (organization_id, name)
            )
            "#,
        )],
        down: Down::Steps(&[Step::Sql("DROP TABLE lenders")]),
    },
    Migration {
        id: "20221210140200",
        name: "create_closers",
        up: &[Step::Sql(
            r#"
            CREATE TABLE closers (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                organization_id UUID NOT NULL REFERENCES organizations(id),
                lender_id UUID REFERENCES lenders(id),
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                email TEXT NOT NULL,
                phone TEXT,
                deleted_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (organization_id, email)
            )
            "#,
        )],
        down: Down::Steps(&[Step::Sql("DROP TABLE closers")]),
    },
    Migration {
        id: "20221210140300",
        name: "create_agents",
        up: &[Step::Sql(
            r#"
            CREATE TABLE agents (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                organization_id UUID NOT NULL REFERENCES organizations(id),
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                phone TEXT,
                salt TEXT NOT NULL,
                password TEXT NOT NULL,
                deleted_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )],
        down: Down::Steps(&[Step::Sql("DROP TABLE agents")]),
    },
    Migration {
        id: "20230112153000",
        name: "add_users_previous_status",
        up: &[
            Step::CreateEnum {
                name: "user_previous_status",
                values: USER_STATUS_V1,
            },
            Step::AddColumn {
                table: "users",
                column: "previous_status",
                definition: "user_previous_status",
            },
        ],
        down: Down::Steps(&[
            Step::DropColumn {
                table: "users",
                column: "previous_status",
            },
            Step::DropEnum {
                name: "user_previous_status",
            },
        ]),
    },
    Migration {
        id: "20230207110500",
        name: "extend_user_status_values",
        up: &[
            Step::ReplaceEnum(EnumReplacement {
                table: "users",
                column: "status",
                type_name: "user_status",
                values: USER_STATUS_V2,
                fallback: "PENDING",
                default: Some("PENDING"),
            }),
            Step::ReplaceEnum(EnumReplacement {
                table: "users",
                column: "previous_status",
                type_name: "user_previous_status",
                values: USER_STATUS_V2,
                fallback: "PENDING",
                default: None,
            }),
        ],
        down: Down::Steps(&[
            Step::ReplaceEnum(EnumReplacement {
                table: "users",
                column: "previous_status",
                type_name: "user_previous_status",
                values: USER_STATUS_V1,
                fallback: "PENDING",
                default: None,
            }),
            Step::ReplaceEnum(EnumReplacement {
                table: "users",
                column: "status",
                type_name: "user_status",
                values: USER_STATUS_V1,
                fallback: "PENDING",
                default: Some("PENDING"),
            }),
        ]),
    },
    Migration {
        id: "20230301094500",
        name: "activate_onboarding_users",
        up: &[Step::Sql(
            "UPDATE users SET status = 'ACTIVE', updated_at = NOW() WHERE status = 'ONBOARDING'",
        )],
        down: Down::Irreversible {
            reason: "bulk status backfill; the set of users that were ONBOARDING is not recorded",
        },
    },
    Migration {
        id: "20230308160000",
        name: "add_users_address_line2_and_intro",
        up: &[
            Step::AddColumn {
                table: "users",
                column: "address_line2",
                definition: "TEXT NOT NULL DEFAULT ''",
            },
            Step::AddColumn {
                table: "users",
                column: "is_intro_viewed",
                definition: "BOOLEAN NOT NULL DEFAULT FALSE",
            },
        ],
        down: Down::Steps(&[
            Step::DropColumn {
                table: "users",
                column: "is_intro_viewed",
            },
            Step::DropColumn {
                table: "users",
                column: "address_line2",
            },
        ]),
    },
    Migration {
        id: "20230314120000",
        name: "add_plaid_accounts_institution_name",
        up: &[Step::AddColumn {
            table: "plaid_accounts",
            column: "institution_name",
            definition: "TEXT",
        }],
        down: Down::Steps(&[Step::DropColumn {
            table: "plaid_accounts",
            column: "institution_name",
        }]),
    },
    Migration {
        id: "20230320101500",
        name: "add_questionaires_nearest_state",
        up: &[Step::AddColumn {
            table: "questionaires",
            column: "nearest_state",
            definition: "TEXT NOT NULL DEFAULT ''",
        }],
        down: Down::Steps(&[Step::DropColumn {
            table: "questionaires",
            column: "nearest_state",
        }]),
    },
    Migration {
        id: "20230322090000",
        name: "add_transactions_status",
        up: &[Step::AddColumn {
            table: "transactions",
            column: "status",
            definition: "TEXT",
        }],
        down: Down::Steps(&[Step::DropColumn {
            table: "transactions",
            column: "status",
        }]),
    },
    Migration {
        id: "20230327133000",
        name: "add_resources_is_national",
        up: &[Step::AddColumn {
            table: "resources",
            column: "is_national",
            definition: "BOOLEAN NOT NULL DEFAULT FALSE",
        }],
        down: Down::Steps(&[Step::DropColumn {
            table: "resources",
            column: "is_national",
        }]),
    },
    Migration {
        id: "20230331173243",
        name: "rename_credit_wallet_logs_dollars",
        up: &[Step::RenameColumn {
            table: "credit_wallet_logs",
            from: "ownerific_dollars",
            to: "dollars",
        }],
        down: Down::Steps(&[Step::RenameColumn {
            table: "credit_wallet_logs",
            from: "dollars",
            to: "ownerific_dollars",
        }]),
    },
    Migration {
        id: "20230404110000",
        name: "add_credit_wallet_logs_description",
        up: &[Step::AddColumn {
            table: "credit_wallet_logs",
            column: "description",
            definition: "JSONB",
        }],
        down: Down::Steps(&[Step::DropColumn {
            table: "credit_wallet_logs",
            column: "description",
        }]),
    },
    Migration {
        id: "20230418150000",
        name: "add_organizations_hris_access_token",
        up: &[Step::AddColumn {
            table: "organizations",
            column: "hris_access_token",
            definition: "TEXT",
        }],
        down: Down::Steps(&[Step::DropColumn {
            table: "organizations",
            column: "hris_access_token",
        }]),
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalogue_is_valid() {
        assert!(super::super::Migrator::new(MIGRATIONS).is_ok());
    }

    #[test]
    fn test_only_the_backfill_is_irreversible() {
        let irreversible: Vec<&str> = MIGRATIONS
            .iter()
            .filter(|m| !m.is_reversible())
            .map(|m| m.id)
            .collect();
        assert_eq!(irreversible, vec!["20230301094500"]);
    }

    #[test]
    fn test_dollars_rename_unit() {
        let unit = MIGRATIONS
            .iter()
            .find(|m| m.id == "20230331173243")
            .unwrap();
        assert!(matches!(
            unit.up,
            [Step::RenameColumn {
                table: "credit_wallet_logs",
                from: "ownerific_dollars",
                to: "dollars"
            }]
        ));
        assert!(matches!(
            unit.down,
            Down::Steps([Step::RenameColumn {
                from: "dollars",
                to: "ownerific_dollars",
                ..
            }])
        ));
    }
}
