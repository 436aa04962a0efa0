//! Datasource configuration types.
//!
//! Three configuration methods are supported:
//! 1. `database_url_env` - reference an environment variable
//! 2. `database_url` - provide the URL directly
//! 3. Individual fields (host, port, database, username, password)

use crate::DatasourceMetadata;
use serde::{Deserialize, Serialize};
use url::Url;

/// Configuration for the database the application talks to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasourceConfig {
    /// Database vendor, used for Hub registration (`postgres`, `mysql`, ...).
    #[serde(default = "default_vendor")]
    pub vendor: String,

    /// Environment variable name containing the connection URL.
    /// Highest precedence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url_env: Option<String>,

    /// Full connection URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_database")]
    pub database: String,

    /// Schema whose tables are collected and encrypted.
    #[serde(default = "default_schema")]
    pub schema: String,

    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Environment variable containing the password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<ConnectionPoolConfig>,
}

impl Default for DatasourceConfig {
    fn default() -> Self {
        Self {
            vendor: default_vendor(),
            database_url_env: None,
            database_url: None,
            host: default_host(),
            port: default_port(),
            database: default_database(),
            schema: default_schema(),
            username: default_username(),
            password: None,
            password_env: None,
            pool: None,
        }
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionPoolConfig {
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Timeout in seconds when acquiring a connection.
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_seconds: u32,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            min_connections: default_min_connections(),
            max_connections: default_max_connections(),
            acquire_timeout_seconds: default_acquire_timeout(),
        }
    }
}

impl DatasourceConfig {
    /// Build a connection string from this configuration.
    ///
    /// Precedence:
    /// 1. database_url_env (environment variable)
    /// 2. database_url (direct URL)
    /// 3. Individual fields
    pub fn connection_string(&self) -> String {
        if let Some(env_var) = &self.database_url_env
            && let Ok(url) = std::env::var(env_var)
        {
            return url;
        }

        if let Some(url) = &self.database_url {
            return url.clone();
        }

        let scheme = match self.vendor.to_lowercase().as_str() {
            "mysql" | "mariadb" => "mysql",
            _ => "postgresql",
        };
        match self.get_password() {
            Some(password) => format!(
                "{}://{}:{}@{}:{}/{}",
                scheme, self.username, password, self.host, self.port, self.database
            ),
            None => format!(
                "{}://{}@{}:{}/{}",
                scheme, self.username, self.host, self.port, self.database
            ),
        }
    }

    fn get_password(&self) -> Option<String> {
        if let Some(env_var) = &self.password_env
            && let Ok(password) = std::env::var(env_var)
        {
            return Some(password);
        }
        self.password.clone()
    }

    /// Derive the metadata used for Hub registration.
    ///
    /// Host, port and database come from the connection URL when one is
    /// configured, otherwise from the individual fields.
    pub fn metadata(&self) -> DatasourceMetadata {
        let url = self.connection_string();
        let (host, port, database) =
            parse_url_parts(&url).unwrap_or((self.host.clone(), self.port, self.database.clone()));

        DatasourceMetadata {
            vendor: self.vendor.to_lowercase(),
            host,
            port,
            database,
            schema: self.schema.clone(),
        }
    }

    /// Get the pool configuration or its defaults.
    pub fn pool_config(&self) -> ConnectionPoolConfig {
        self.pool.clone().unwrap_or_default()
    }
}

/// Split a connection URL into host, port and database name.
///
/// IPv6 hosts lose their brackets and percent-encoded database names are
/// decoded. A URL without a port falls back to the vendor default.
fn parse_url_parts(raw: &str) -> Option<(String, u16, String)> {
    let url = Url::parse(raw).ok()?;
    let host = url.host_str()?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
        .to_string();
    if host.is_empty() {
        return None;
    }
    let port = url.port().unwrap_or_else(|| match url.scheme() {
        "mysql" | "mariadb" => 3306,
        _ => default_port(),
    });
    let database = url
        .path_segments()
        .and_then(|mut segments| segments.next())
        .map(|segment| {
            urlencoding::decode(segment)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| segment.to_string())
        })
        .unwrap_or_default();
    Some((host, port, database))
}

fn default_vendor() -> String {
    "postgres".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_database() -> String {
    "postgres".to_string()
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_username() -> String {
    "postgres".to_string()
}

fn default_min_connections() -> u32 {
    1
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout() -> u32 {
    30
}
