//! Ownerific API Library
//!
//! Re-exports modules for the server binary, the operator tools and
//! integration testing.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod features;
pub mod integrations;
pub mod migration;
pub mod queue;
pub mod registry;
pub mod workers;

pub use config::Config;
pub use domain::{AuthContext, Dollars, MoneyError};
pub use error::{AppError, AppResult};
