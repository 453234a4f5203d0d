use dotenvy::dotenv;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub statement_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    pub heartbeat_interval: Duration,
    pub auth_timeout: Duration,
    pub outbound_queue: usize,
}

#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub enabled: bool,
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub auth_secret: String,
    pub port: u16,
    pub cors_origin: Option<String>,
    pub profile_directory_url: Option<String>,
    pub websocket: WebSocketConfig,
    pub retention: RetentionConfig,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, crate::error::AppError> {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| crate::error::AppError::Config("DATABASE_URL missing".into()))?;
        let auth_secret = env::var("AUTH_SECRET")
            .map_err(|_| crate::error::AppError::Config("AUTH_SECRET missing".into()))?;
        if auth_secret.trim().is_empty() {
            return Err(crate::error::AppError::Config("AUTH_SECRET empty".into()));
        }

        let profile_directory_url = env::var("PROFILE_DIRECTORY_URL")
            .ok()
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty());

        Ok(Self {
            database: DatabaseConfig {
                url: database_url,
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10),
                acquire_timeout: Duration::from_secs(env_parse("DATABASE_ACQUIRE_TIMEOUT_SECS", 5)),
                statement_timeout: Duration::from_secs(env_parse(
                    "DATABASE_STATEMENT_TIMEOUT_SECS",
                    5,
                )),
            },
            auth_secret,
            port: env_parse("PORT", 3000),
            cors_origin: env::var("CORS_ORIGIN").ok().filter(|s| !s.is_empty()),
            profile_directory_url,
            websocket: WebSocketConfig {
                heartbeat_interval: Duration::from_secs(env_parse("WS_HEARTBEAT_SECS", 30)),
                auth_timeout: Duration::from_secs(env_parse("WS_AUTH_TIMEOUT_SECS", 10)),
                outbound_queue: env_parse("WS_OUTBOUND_QUEUE", 256),
            },
            retention: RetentionConfig {
                enabled: env_parse("RETENTION_ENABLED", false),
                sweep_interval: Duration::from_secs(env_parse("RETENTION_SWEEP_SECS", 3600)),
            },
        })
    }

    #[cfg(test)]
    pub fn test_defaults() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgres://localhost/test".into(),
                max_connections: 5,
                acquire_timeout: Duration::from_secs(5),
                statement_timeout: Duration::from_secs(5),
            },
            auth_secret: "test-secret".into(),
            port: 3000,
            cors_origin: None,
            profile_directory_url: None,
            websocket: WebSocketConfig {
                heartbeat_interval: Duration::from_secs(30),
                auth_timeout: Duration::from_secs(10),
                outbound_queue: 256,
            },
            retention: RetentionConfig {
                enabled: false,
                sweep_interval: Duration::from_secs(3600),
            },
        }
    }
}
