//! Enumerated column values
//!
//! These mirror the PostgreSQL enum types created by the migrations. Values
//! travel to and from SQL as text and are cast at the query site.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind} value: {value}")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownValue;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownValue {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = UnknownValue;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                s.parse()
            }
        }
    };
}

text_enum!(UserStatus, "user status", {
    Pending => "PENDING",
    Active => "ACTIVE",
    Inactive => "INACTIVE",
    Onboarding => "ONBOARDING",
    New => "NEW",
    Pause => "PAUSE",
});

text_enum!(RoleType, "role type", {
    Employer => "EMPLOYER",
    Employee => "EMPLOYEE",
});

text_enum!(OrganizationStatus, "organization status", {
    Paying => "PAYING",
    Guest => "GUEST",
});

text_enum!(SessionableType, "session owner type", {
    User => "User",
    Agent => "Agent",
});
