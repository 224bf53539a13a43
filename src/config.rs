use std::net::IpAddr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub encryption_key: String,
    pub host: IpAddr,
    pub port: u16,
    pub log_level: String,
    pub max_body_size: usize,
    pub transport: TransportMode,
    pub smtp_pool_size: u32,
    pub smtp_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransportMode {
    /// Pooled SMTP connections, one pool per mail configuration.
    Smtp,
    /// Log messages instead of delivering them.
    Log,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url = env_required("DATABASE_URL")?;
        let jwt_secret = env_required("JWT_SECRET")?;
        let encryption_key = env_required("MAILROOM_ENCRYPTION_KEY")?;

        let host: IpAddr = env_or("MAILROOM_HOST", "0.0.0.0")
            .parse()
            .map_err(|e| format!("Invalid MAILROOM_HOST: {e}"))?;

        let port: u16 = env_or("MAILROOM_PORT", "3000")
            .parse()
            .map_err(|e| format!("Invalid MAILROOM_PORT: {e}"))?;

        let log_level = env_or("MAILROOM_LOG_LEVEL", "info");

        let max_body_size: usize = env_or("MAILROOM_MAX_BODY_SIZE", "1048576")
            .parse()
            .map_err(|e| format!("Invalid MAILROOM_MAX_BODY_SIZE: {e}"))?;

        let transport = match env_or("MAILROOM_TRANSPORT", "smtp").as_str() {
            "smtp" => TransportMode::Smtp,
            "log" => TransportMode::Log,
            other => return Err(format!("Invalid MAILROOM_TRANSPORT: {other} (expected smtp or log)")),
        };

        let smtp_pool_size: u32 = env_or("MAILROOM_SMTP_POOL_SIZE", "10")
            .parse()
            .map_err(|e| format!("Invalid MAILROOM_SMTP_POOL_SIZE: {e}"))?;

        let smtp_timeout_secs: u64 = env_or("MAILROOM_SMTP_TIMEOUT_SECS", "30")
            .parse()
            .map_err(|e| format!("Invalid MAILROOM_SMTP_TIMEOUT_SECS: {e}"))?;

        Ok(Config {
            database_url,
            jwt_secret,
            encryption_key,
            host,
            port,
            log_level,
            max_body_size,
            transport,
            smtp_pool_size,
            smtp_timeout: Duration::from_secs(smtp_timeout_secs),
        })
    }
}

fn env_required(key: &str) -> Result<String, String> {
    std::env::var(key).map_err(|_| format!("Missing required environment variable: {key}"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
