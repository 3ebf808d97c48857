//! Domain module
//!
//! Core domain types shared by feature modules.

pub mod context;
pub mod money;
pub mod status;

pub use context::AuthContext;
pub use money::{Dollars, MoneyError};
pub use status::{OrganizationStatus, RoleType, SessionableType, UserStatus};
