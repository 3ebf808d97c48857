//! Outbound integrations

pub mod dwolla;
