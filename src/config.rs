use sqlx::postgres::{PgConnectOptions, PgSslMode};
use std::{env, fmt, path::PathBuf, str::FromStr, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    MissingVar(&'static str),
    #[error("unknown deployment '{0}' (expected one of: des_export, site_explorer)")]
    UnknownDeployment(String),
}

/// Which dashboard this process serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentKind {
    DesExport,
    SiteExplorer,
}

impl DeploymentKind {
    pub fn name(self) -> &'static str {
        match self {
            DeploymentKind::DesExport => "des_export",
            DeploymentKind::SiteExplorer => "site_explorer",
        }
    }

    /// Environment variables holding host, user and password.
    pub fn credential_vars(self) -> CredentialVars {
        match self {
            DeploymentKind::DesExport | DeploymentKind::SiteExplorer => CredentialVars {
                host: "QP_SERVER",
                user: "QP_VIEWER_USER",
                password: "QP_VIEWER_PASSWORD",
            },
        }
    }
}

impl FromStr for DeploymentKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "des_export" => Ok(DeploymentKind::DesExport),
            "site_explorer" => Ok(DeploymentKind::SiteExplorer),
            other => Err(ConfigError::UnknownDeployment(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CredentialVars {
    pub host: &'static str,
    pub user: &'static str,
    pub password: &'static str,
}

#[derive(Clone)]
pub struct Credentials {
    pub host: String,
    pub user: String,
    password: String,
}

impl Credentials {
    pub fn new(host: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn profile(&self, database: &str) -> ConnectionProfile {
        ConnectionProfile {
            host: self.host.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            database: database.to_string(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Everything needed to open a pool against one database. The password is
/// never part of any formatted output.
#[derive(Clone)]
pub struct ConnectionProfile {
    pub host: String,
    pub user: String,
    password: String,
    pub database: String,
}

impl ConnectionProfile {
    pub fn redacted_url(&self) -> String {
        format!(
            "postgresql://{}:***@{}/{}?sslmode=require",
            self.user, self.host, self.database
        )
    }

    pub fn connect_options(&self) -> PgConnectOptions {
        let (host, port) = split_host_port(&self.host);
        let mut options = PgConnectOptions::new()
            .host(host)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
            .ssl_mode(PgSslMode::Require);
        if let Some(port) = port {
            options = options.port(port);
        }
        options
    }
}

impl fmt::Debug for ConnectionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted_url())
    }
}

impl fmt::Display for ConnectionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted_url())
    }
}

fn split_host_port(host: &str) -> (&str, Option<u16>) {
    match host.rsplit_once(':') {
        Some((name, port)) => match port.parse::<u16>() {
            Ok(port) => (name, Some(port)),
            Err(_) => (host, None),
        },
        None => (host, None),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub deployment: DeploymentKind,
    pub port: u16,
    pub query_dir: PathBuf,
    pub credentials: Credentials,
    pub pool: PoolSettings,
}

impl Config {
    /// Loads `.env` (if present) and reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is normal in deployed environments.
        let _ = dotenv::dotenv();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let deployment = match lookup("DASHBOARD_DEPLOYMENT") {
            Some(value) if !value.trim().is_empty() => value.parse()?,
            _ => DeploymentKind::DesExport,
        };

        let vars = deployment.credential_vars();
        let required = |name: &'static str| {
            lookup(name)
                .filter(|value| !value.is_empty())
                .ok_or(ConfigError::MissingVar(name))
        };
        let credentials = Credentials::new(
            required(vars.host)?,
            required(vars.user)?,
            required(vars.password)?,
        );

        let port = lookup("PORT")
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(8080);
        let query_dir = lookup("SQL_QUERY_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("sql_queries"));

        let defaults = PoolSettings::default();
        let pool = PoolSettings {
            max_connections: lookup("DB_MAX_CONNECTIONS")
                .and_then(|value| value.parse().ok())
                .unwrap_or(defaults.max_connections),
            acquire_timeout: lookup("DB_ACQUIRE_TIMEOUT_SECS")
                .and_then(|value| value.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.acquire_timeout),
        };

        Ok(Self {
            deployment,
            port,
            query_dir,
            credentials,
            pool,
        })
    }
}
