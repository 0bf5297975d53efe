//! Process configuration read from the environment (and `.env` in development).

use std::env;
use std::net::{IpAddr, SocketAddr};

use thiserror::Error;

use crewbook_approvals::ApprovalPolicy;

const DEV_JWT_SECRET: &str = "dev-secret";

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub log_level: String,
    pub jwt_secret: String,
    /// Postgres when set, in-memory stores otherwise.
    pub database_url: Option<String>,
    pub approvals: ApprovalPolicy,
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("APP_PORT must be a valid u16")]
    InvalidPort,

    #[error("APP_HOST must parse to an IPv4 or IPv6 address")]
    InvalidHost(#[source] std::net::AddrParseError),

    #[error("JWT_SECRET is required in production")]
    MissingJwtSecret,

    #[error("APPROVALS_MIN_APPROVERS must be an integer >= 1")]
    InvalidMinApprovers,

    #[error("APPROVALS_ALLOW_SELF_APPROVAL must be true or false")]
    InvalidSelfApproval,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `load` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let environment = AppEnvironment::parse(&var("APP_ENV").unwrap_or_else(|| "development".to_string()));

        let host = var("APP_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = match var("APP_PORT") {
            Some(p) => p.parse::<u16>().map_err(|_| ConfigError::InvalidPort)?,
            None => 8080,
        };

        let log_level = var("APP_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let jwt_secret = match var("JWT_SECRET") {
            Some(secret) => secret,
            None if environment == AppEnvironment::Production => return Err(ConfigError::MissingJwtSecret),
            None => {
                tracing::warn!("JWT_SECRET not set; using insecure dev default");
                DEV_JWT_SECRET.to_string()
            }
        };

        let min_approvers = match var("APPROVALS_MIN_APPROVERS") {
            Some(v) => v.parse::<u32>().map_err(|_| ConfigError::InvalidMinApprovers)?,
            None => 1,
        };
        let allow_self_approval = match var("APPROVALS_ALLOW_SELF_APPROVAL").as_deref() {
            None | Some("false") | Some("0") => false,
            Some("true") | Some("1") => true,
            Some(_) => return Err(ConfigError::InvalidSelfApproval),
        };
        let approvals = ApprovalPolicy::new(min_approvers, allow_self_approval)
            .map_err(|_| ConfigError::InvalidMinApprovers)?;

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            log_level,
            jwt_secret,
            database_url: var("DATABASE_URL"),
            approvals,
        })
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self.host.parse().map_err(ConfigError::InvalidHost)?;
        Ok(SocketAddr::new(ip, self.port))
    }
}
