//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// Queue broker URL
    pub redis_url: String,

    /// Secret used to sign session tokens
    pub jwt_secret: String,

    /// Lifetime of a login session
    pub session_ttl_hours: i64,

    /// Dwolla credentials, present only when all three variables are set
    pub dwolla: Option<DwollaConfig>,
}

/// Dwolla application credentials
#[derive(Debug, Clone)]
pub struct DwollaConfig {
    pub app_key: String,
    pub app_secret: String,
    pub environment: DwollaEnvironment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DwollaEnvironment {
    Sandbox,
    Production,
}

impl DwollaEnvironment {
    pub fn api_base(&self) -> &'static str {
        match self {
            DwollaEnvironment::Sandbox => "https://api-sandbox.dwolla.com",
            DwollaEnvironment::Production => "https://api.dwolla.com",
        }
    }

    /// Whether `url` names a single customer resource on this environment's API
    pub fn is_customer_url(&self, url: &str) -> bool {
        let Some(rest) = url.strip_prefix(self.api_base()) else {
            return false;
        };
        let Some(id) = rest.strip_prefix("/customers/") else {
            return false;
        };
        !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    }
}

impl std::str::FromStr for DwollaEnvironment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sandbox" => Ok(DwollaEnvironment::Sandbox),
            "production" => Ok(DwollaEnvironment::Production),
            _ => Err(ConfigError::InvalidValue("DWOLLA_APP_ENVIRONMENT")),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary lookup function
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections = lookup("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|| "10".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("DATABASE_MAX_CONNECTIONS"))?;

        let host = lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string());

        let port = lookup("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("PORT"))?;

        let environment = lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string());

        let redis_url = lookup("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".to_string());

        let jwt_secret = lookup("JWT_SECRET").ok_or(ConfigError::MissingEnv("JWT_SECRET"))?;

        let session_ttl_hours = lookup("SESSION_TTL_HOURS")
            .unwrap_or_else(|| "24".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("SESSION_TTL_HOURS"))?;

        let dwolla = match (
            lookup("DWOLLA_APP_KEY"),
            lookup("DWOLLA_APP_SECRET"),
            lookup("DWOLLA_APP_ENVIRONMENT"),
        ) {
            (Some(app_key), Some(app_secret), Some(environment)) => Some(DwollaConfig {
                app_key,
                app_secret,
                environment: environment.parse()?,
            }),
            _ => None,
        };

        Ok(Self {
            database_url,
            database_max_connections,
            host,
            port,
            environment,
            redis_url,
            jwt_secret,
            session_ttl_hours,
            dwolla,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
