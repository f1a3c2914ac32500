use std::net::IpAddr;
use std::time::Duration;

use ipnet::IpNet;

use crate::queue::dedup::DedupRules;

pub const DEFAULT_DEDUP_RULES: &str = "signup=email;post-create=$owner,threadId@300;post-like=$owner,postId";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub log_level: String,
    pub max_body_size: usize,
    pub trusted_proxies: Vec<IpNet>,
    pub cors_origins: Vec<String>,
    pub queue: QueueConfig,
    pub gc: GcConfig,
    pub dispatch: DispatchConfig,
    pub admission_rate_limit: u32,
    pub admission_rate_window_secs: u64,
    pub dedup_rules: DedupRules,
}

/// Limits applied by the in-memory action queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub capacity: usize,
    pub evict_batch: usize,
    pub max_attempts: u32,
    pub status_limit: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            evict_batch: 10,
            max_attempts: 3,
            status_limit: 50,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GcConfig {
    pub retention: Duration,
    pub interval: Duration,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(24 * 60 * 60),
            interval: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub base_url: String,
    /// Hard ceiling for a single replayed call. Kept below the request
    /// duration limit of the hosting platform.
    pub timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let host: IpAddr = env_or("RELAY_HOST", "0.0.0.0")
            .parse()
            .map_err(|e| format!("Invalid RELAY_HOST: {e}"))?;

        let port: u16 = env_or("RELAY_PORT", "3000")
            .parse()
            .map_err(|e| format!("Invalid RELAY_PORT: {e}"))?;

        let log_level = env_or("RELAY_LOG_LEVEL", "info");

        let max_body_size: usize = env_parse("RELAY_MAX_BODY_SIZE", "262144")?;

        let trusted_proxies: Vec<IpNet> = env_or("RELAY_TRUSTED_PROXIES", "")
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| {
                s.trim()
                    .parse()
                    .map_err(|e| format!("Invalid RELAY_TRUSTED_PROXIES entry '{s}': {e}"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let cors_origins: Vec<String> = env_or("RELAY_CORS_ORIGINS", "")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let queue = QueueConfig {
            capacity: env_parse("RELAY_QUEUE_CAPACITY", "1000")?,
            evict_batch: env_parse("RELAY_QUEUE_EVICT_BATCH", "10")?,
            max_attempts: env_parse("RELAY_MAX_ATTEMPTS", "3")?,
            status_limit: env_parse("RELAY_STATUS_LIMIT", "50")?,
        };
        if queue.capacity == 0 {
            return Err("RELAY_QUEUE_CAPACITY must be at least 1".to_string());
        }
        if queue.evict_batch == 0 {
            return Err("RELAY_QUEUE_EVICT_BATCH must be at least 1".to_string());
        }
        if queue.max_attempts == 0 {
            return Err("RELAY_MAX_ATTEMPTS must be at least 1".to_string());
        }

        let gc = GcConfig {
            retention: Duration::from_secs(env_parse("RELAY_RETENTION_SECS", "86400")?),
            interval: Duration::from_secs(env_parse("RELAY_GC_INTERVAL_SECS", "3600")?),
        };
        if gc.interval.is_zero() {
            return Err("RELAY_GC_INTERVAL_SECS must be at least 1".to_string());
        }

        let dispatch = DispatchConfig {
            base_url: env_or("RELAY_DISPATCH_BASE_URL", &format!("http://127.0.0.1:{port}"))
                .trim_end_matches('/')
                .to_string(),
            timeout: Duration::from_millis(env_parse("RELAY_DISPATCH_TIMEOUT_MS", "8000")?),
        };

        let admission_rate_limit: u32 = env_parse("RELAY_ADMISSION_RATE_LIMIT", "30")?;
        let admission_rate_window_secs: u64 = env_parse("RELAY_ADMISSION_RATE_WINDOW_SECS", "60")?;

        let dedup_rules = DedupRules::parse(&env_or("RELAY_DEDUP_RULES", DEFAULT_DEDUP_RULES))
            .map_err(|e| format!("Invalid RELAY_DEDUP_RULES: {e}"))?;

        Ok(Config {
            host,
            port,
            log_level,
            max_body_size,
            trusted_proxies,
            cors_origins,
            queue,
            gc,
            dispatch,
            admission_rate_limit,
            admission_rate_window_secs,
            dedup_rules,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: &str) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    env_or(key, default)
        .parse()
        .map_err(|e| format!("Invalid {key}: {e}"))
}
