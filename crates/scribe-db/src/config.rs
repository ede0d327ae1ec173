use std::env;

/// Database configuration.
///
/// Reads from the `SCRIBE_DATABASE_URL` environment variable, falling back to
/// `postgresql://localhost:5432/scribe` when unset.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Full PostgreSQL connection URL.
    pub database_url: String,
}

impl DbConfig {
    /// Environment variable consulted by [`DbConfig::from_env`].
    pub const ENV_VAR: &str = "SCRIBE_DATABASE_URL";

    /// The default connection URL used when no environment variable is set.
    pub const DEFAULT_URL: &str = "postgresql://localhost:5432/scribe";

    /// Build a config from the environment.
    ///
    /// Priority: `SCRIBE_DATABASE_URL` env var, then the compile-time default.
    pub fn from_env() -> Self {
        let database_url =
            env::var(Self::ENV_VAR).unwrap_or_else(|_| Self::DEFAULT_URL.to_owned());
        Self { database_url }
    }

    /// Build a config from an explicit URL (CLI flags, config files, tests).
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }

    /// Extract the database name from the URL.
    ///
    /// Query parameters (`?sslmode=...`) are ignored. Returns `None` when the
    /// URL has no path component.
    pub fn database_name(&self) -> Option<&str> {
        let without_query = self
            .database_url
            .split('?')
            .next()
            .unwrap_or(&self.database_url);
        let (head, name) = without_query.rsplit_once('/')?;
        // "postgresql://host" has no database segment; the last slash belongs
        // to the scheme separator.
        if head.ends_with('/') || name.is_empty() {
            return None;
        }
        Some(name)
    }

    /// Return a URL pointing at the `postgres` maintenance database on the
    /// same host. Used to issue `CREATE DATABASE` when the target DB does not
    /// yet exist.
    pub fn maintenance_url(&self) -> String {
        match self.database_url.rfind('/') {
            Some(pos) if !self.database_url[..pos].ends_with('/') => {
                let mut url = self.database_url[..pos].to_owned();
                url.push_str("/postgres");
                url
            }
            _ => format!("{}/postgres", self.database_url.trim_end_matches('/')),
        }
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
