//! Runtime configuration, read from the process environment.
//!
//! `.env` is loaded first and `.env.<ENVIRONMENT>` overrides it, so the same
//! files used by the rest of the SIPI tooling keep working here.

use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_ENVIRONMENT: &str = "development";
pub const DEFAULT_SCHEMA: &str = "sipi";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_ADMIN_FLUSH_EVERY: usize = 100;
pub const DEFAULT_TITULAR_FLUSH_EVERY: usize = 50;
/// A bulk administration insert binds 14 parameters per row and PostgreSQL
/// accepts at most 65535 per statement.
pub const MAX_ADMIN_FLUSH_EVERY: usize = 4_000;

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: String,
    pub database_url: String,
    pub database_schema: String,
    pub http_timeout: Duration,
    pub admin_flush_every: usize,
    pub titular_flush_every: usize,
}

impl Config {
    /// Loads the dotenv files and reads the configuration from the process
    /// environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        load_dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let database_url = match lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()) {
            Some(url) => normalize_database_url(&url)?,
            None => format!(
                "postgres://{}:{}@{}:{}/{}",
                var("POSTGRES_USER", "sipi"),
                var("POSTGRES_PASSWORD", "sipi"),
                var("POSTGRES_SERVICE_NAME", "localhost"),
                var("POSTGRES_PORT", "5432"),
                var("POSTGRES_DB", "sipi"),
            ),
        };

        let database_schema = var("DATABASE_SCHEMA", DEFAULT_SCHEMA);
        if !is_identifier(&database_schema) {
            return Err(ConfigError::InvalidSchema(database_schema));
        }

        Ok(Self {
            environment: var("ENVIRONMENT", DEFAULT_ENVIRONMENT),
            database_url,
            database_schema,
            http_timeout: Duration::from_secs(
                var("ETL_HTTP_TIMEOUT_SECS", "")
                    .parse()
                    .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            ),
            admin_flush_every: var("ETL_ADMIN_FLUSH_EVERY", "")
                .parse()
                .ok()
                .filter(|n| *n > 0)
                .map(|n: usize| n.min(MAX_ADMIN_FLUSH_EVERY))
                .unwrap_or(DEFAULT_ADMIN_FLUSH_EVERY),
            titular_flush_every: var("ETL_TITULAR_FLUSH_EVERY", "")
                .parse()
                .ok()
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_TITULAR_FLUSH_EVERY),
        })
    }

    /// Connection URL with the password masked, for log lines.
    pub fn redacted_database_url(&self) -> String {
        match (self.database_url.find("://"), self.database_url.rfind('@')) {
            (Some(scheme_end), Some(at)) if at > scheme_end => {
                let credentials = &self.database_url[scheme_end + 3..at];
                let user = credentials.split(':').next().unwrap_or_default();
                format!(
                    "{}{}:***{}",
                    &self.database_url[..scheme_end + 3],
                    user,
                    &self.database_url[at..]
                )
            }
            _ => self.database_url.clone(),
        }
    }
}

/// Loads `.env` and then `.env.<ENVIRONMENT>` with override semantics.
/// Returns the environment name that was selected.
pub fn load_dotenv() -> String {
    dotenvy::dotenv().ok();
    let environment =
        std::env::var("ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENVIRONMENT.to_string());
    let overlay = format!(".env.{}", environment);
    if dotenvy::from_filename_override(&overlay).is_err() {
        tracing::debug!(file = %overlay, "environment overlay not loaded");
    }
    environment
}

/// SQLAlchemy URLs carry a driver suffix (`postgresql+asyncpg://`) that
/// libpq-style parsers reject.
fn normalize_database_url(url: &str) -> Result<String, ConfigError> {
    let url = url.trim();
    let Some((scheme, rest)) = url.split_once("://") else {
        return Err(ConfigError::InvalidDatabaseUrl(url.to_string()));
    };
    let base = scheme.split('+').next().unwrap_or(scheme);
    match base {
        "postgres" | "postgresql" => Ok(format!("{}://{}", base, rest)),
        _ => Err(ConfigError::InvalidDatabaseUrl(url.to_string())),
    }
}

pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
