//! Connection parameters and pool configuration
//!
//! `ConnectOptions` holds the parameters exactly as the caller supplied them;
//! that value is the registry key, so `ConnectOptions::default()` and an
//! explicit `host("localhost")` are different keys even though both resolve to
//! the same server. `ResolvedOptions` fills the gaps with defaults.

use std::time::Duration;
use tidal_common::{Result, TidalError};
use url::Url;

/// Host used when none is given
pub const DEFAULT_HOST: &str = "localhost";
/// Port used when none is given
pub const DEFAULT_PORT: u16 = 28015;
/// Database used when none is given
pub const DEFAULT_DB: &str = "test";
/// User used when none is given
pub const DEFAULT_USER: &str = "admin";
/// Connection timeout used when none is given
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
/// URL scheme accepted by `ConnectOptions::from_url`
pub const URL_SCHEME: &str = "tidal";

/// Connection parameters as supplied by the caller
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ConnectOptions {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub db: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub timeout: Option<Duration>,
}

impl ConnectOptions {
    /// Empty options; every parameter falls back to its default
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn db(mut self, db: impl Into<String>) -> Self {
        self.db = Some(db.into());
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Parse `tidal://[user[:password]@]host[:port][/db][?timeout=secs]`
    ///
    /// Components missing from the URL stay unset.
    pub fn from_url(url: &str) -> Result<Self> {
        let parsed = Url::parse(url)
            .map_err(|e| TidalError::Validation(format!("Invalid connection URL: {}", e)))?;

        if parsed.scheme() != URL_SCHEME {
            return Err(TidalError::Validation(format!(
                "Unsupported URL scheme '{}', expected '{}'",
                parsed.scheme(),
                URL_SCHEME
            )));
        }

        let mut options = Self::new();
        if let Some(host) = parsed.host_str().filter(|h| !h.is_empty()) {
            options.host = Some(host.to_string());
        }
        options.port = parsed.port();
        if !parsed.username().is_empty() {
            options.user = Some(parsed.username().to_string());
        }
        options.password = parsed.password().map(str::to_string);

        let db = parsed.path().trim_start_matches('/');
        if !db.is_empty() {
            options.db = Some(db.to_string());
        }

        for (key, value) in parsed.query_pairs() {
            match &*key {
                "timeout" => options.timeout = Some(parse_timeout(&value)?),
                other => {
                    return Err(TidalError::Validation(format!(
                        "Unknown connection URL parameter '{}'",
                        other
                    )))
                }
            }
        }

        Ok(options)
    }

    /// Load options from the process environment
    ///
    /// `TIDAL_URL` wins when set; otherwise `TIDAL_HOST`, `TIDAL_PORT`,
    /// `TIDAL_DB`, `TIDAL_USER`, `TIDAL_PASSWORD` and `TIDAL_TIMEOUT_SECS`
    /// are read individually.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load options through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("TIDAL_URL") {
            return Self::from_url(&url);
        }

        let port = lookup("TIDAL_PORT")
            .map(|raw| {
                raw.parse::<u16>().map_err(|_| {
                    TidalError::Validation(format!("TIDAL_PORT is not a valid port: '{}'", raw))
                })
            })
            .transpose()?;
        let timeout = lookup("TIDAL_TIMEOUT_SECS")
            .map(|raw| parse_timeout(&raw))
            .transpose()?;

        Ok(Self {
            host: lookup("TIDAL_HOST"),
            port,
            db: lookup("TIDAL_DB"),
            user: lookup("TIDAL_USER"),
            password: lookup("TIDAL_PASSWORD"),
            timeout,
        })
    }

    /// Fill unset parameters with defaults
    pub fn resolve(&self) -> ResolvedOptions {
        ResolvedOptions {
            host: self.host.clone().unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: self.port.unwrap_or(DEFAULT_PORT),
            db: self.db.clone().unwrap_or_else(|| DEFAULT_DB.to_string()),
            user: self.user.clone().unwrap_or_else(|| DEFAULT_USER.to_string()),
            password: self.password.clone().unwrap_or_default(),
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
        }
    }
}

impl std::fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db", &self.db)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Connection parameters with defaults applied
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedOptions {
    pub host: String,
    pub port: u16,
    pub db: String,
    pub user: String,
    pub password: String,
    pub timeout: Duration,
}

impl ResolvedOptions {
    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Debug for ResolvedOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db", &self.db)
            .field("user", &self.user)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Connection pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of operations in flight per connection (default: 20)
    pub max_in_flight: usize,
    /// Documents fetched per cursor batch (default: 100)
    pub batch_size: usize,
    /// Application name for server logs
    pub app_name: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 20,
            batch_size: 100,
            app_name: Some("tidal".to_string()),
        }
    }
}

fn parse_timeout(raw: &str) -> Result<Duration> {
    raw.parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| TidalError::Validation(format!("Invalid timeout in seconds: '{}'", raw)))
}
