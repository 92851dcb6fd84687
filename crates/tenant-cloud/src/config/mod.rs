use std::env;
use std::fmt;
use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Credential value that must never appear in logs or persisted records.
///
/// `Debug` and `Display` render a mask; the wrapped value is only reachable
/// through [`Secret::expose`] at the point an external call needs it.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(******)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("******")
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub provisioning: ProvisioningConfig,
    pub dns: DnsConfig,
    pub ssl: SslConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let server_address: IpAddr = env::var("SERVER_IP")
            .unwrap_or_else(|_| "127.0.0.1".to_string())
            .parse()
            .map_err(|source| ConfigError::InvalidServerAddress { source })?;

        let provisioning = ProvisioningConfig {
            bench_path: PathBuf::from(
                env::var("BENCH_PATH").unwrap_or_else(|_| "/home/frappe/frappe-bench".to_string()),
            ),
            site_suffix: env::var("SITE_SUFFIX").unwrap_or_else(|_| "tenant.cloud".to_string()),
            server_address,
            admin_password: Secret::new(
                env::var("SITE_ADMIN_PASSWORD").unwrap_or_else(|_| "admin".to_string()),
            ),
            db_root_password: Secret::new(env::var("DB_ROOT_PASSWORD").unwrap_or_default()),
            command_timeout: Duration::from_secs(env_u64("COMMAND_TIMEOUT_SECS", 3600)?),
            trial_days: env_u64("TRIAL_DAYS", 14)? as i64,
        };

        let dns = DnsConfig {
            enabled: env_bool("ENABLE_DNS", true),
            api_token: Secret::new(env::var("CLOUDFLARE_API_TOKEN").unwrap_or_default()),
            zone_id: env::var("CLOUDFLARE_ZONE_ID").unwrap_or_default(),
            record_ttl: env_u64("DNS_RECORD_TTL", 120)? as u32,
        };

        let ssl = SslConfig {
            enabled: env_bool("ENABLE_SSL", true),
            email: env::var("SSL_EMAIL").ok().filter(|value| !value.is_empty()),
            live_dir: PathBuf::from(
                env::var("LETSENCRYPT_LIVE_DIR")
                    .unwrap_or_else(|_| "/etc/letsencrypt/live".to_string()),
            ),
            issue_timeout: Duration::from_secs(env_u64("SSL_ISSUE_TIMEOUT_SECS", 900)?),
            sweep_interval: Duration::from_secs(env_u64("SSL_SWEEP_INTERVAL_SECS", 3600)?),
            propagation_timeout: Duration::from_secs(env_u64("DNS_PROPAGATION_TIMEOUT_SECS", 120)?),
            propagation_interval: Duration::from_secs(env_u64("DNS_PROPAGATION_INTERVAL_SECS", 5)?),
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            provisioning,
            dns,
            ssl,
        })
    }
}

fn env_u64(key: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidNumber { key }),
        Err(_) => Ok(default),
    }
}

fn env_bool(key: &'static str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Knobs for the site provisioning pipeline itself.
#[derive(Debug, Clone)]
pub struct ProvisioningConfig {
    /// Root of the bench installation that hosts tenant sites.
    pub bench_path: PathBuf,
    /// Suffix appended to an instance name to form its site hostname.
    pub site_suffix: String,
    /// Public address new DNS records point at.
    pub server_address: IpAddr,
    pub admin_password: Secret,
    pub db_root_password: Secret,
    /// Upper bound for a single bench invocation; site creation can take minutes.
    pub command_timeout: Duration,
    pub trial_days: i64,
}

/// DNS provider credentials and record settings.
#[derive(Debug, Clone)]
pub struct DnsConfig {
    pub enabled: bool,
    pub api_token: Secret,
    pub zone_id: String,
    pub record_ttl: u32,
}

/// Certificate issuance settings.
#[derive(Debug, Clone)]
pub struct SslConfig {
    pub enabled: bool,
    /// Contact address registered with the certificate authority; defaults to
    /// `admin@<site_suffix>` when unset.
    pub email: Option<String>,
    pub live_dir: PathBuf,
    pub issue_timeout: Duration,
    pub sweep_interval: Duration,
    pub propagation_timeout: Duration,
    pub propagation_interval: Duration,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: AddrParseError },
    InvalidServerAddress { source: AddrParseError },
    InvalidNumber { key: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidServerAddress { .. } => {
                write!(f, "SERVER_IP must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { key } => {
                write!(f, "{key} must be a non-negative integer")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidNumber { .. } => None,
            ConfigError::InvalidHost { source }
            | ConfigError::InvalidServerAddress { source } => Some(source),
        }
    }
}
