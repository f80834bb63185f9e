use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub enum Protocol {
    Http(u16), // port
    Tcp(u16),  // port
}

impl Protocol {
    pub fn port(&self) -> u16 {
        match self {
            Protocol::Http(port) | Protocol::Tcp(port) => *port,
        }
    }

    pub fn scheme(&self) -> &str {
        match self {
            Protocol::Http(..) => "http",
            Protocol::Tcp(..) => "tcp",
        }
    }
}

pub struct CacheSettings {
    pub ttl: Duration,
    pub max_entries: u64,
}

pub struct PublisherSettings {
    pub queue_capacity: usize,
    pub workers: usize,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub overflow_timeout: Duration,
    pub flush_deadline: Duration,
}

pub struct ConsumerSettings {
    pub group_id: String,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub stall_threshold: Duration,
}

pub struct Config {
    pub host: String,
    pub http: Protocol,
    pub rpc: Protocol,
    pub metrics: Protocol,
    pub data_dir: String,
    pub allowed_origins: Vec<String>,
    pub call_timeout: Duration,
    pub bus_partitions: u32,
    pub drain_deadline: Duration,
    pub cache: CacheSettings,
    pub publisher: PublisherSettings,
    pub consumer: ConsumerSettings,
}

impl Config {
    const DEFAULT_HOST: &str = "127.0.0.1";
    const DEFAULT_DATA_DIR: &str = "./data";
    const DEFAULT_GROUP_ID: &str = "products_group";

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup. Missing or
    /// unparseable values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let secs = |key: &str, default: u64| Duration::from_secs(parse_or(&lookup, key, default));
        let millis =
            |key: &str, default: u64| Duration::from_millis(parse_or(&lookup, key, default));

        Self {
            host: lookup("CATALOG_HOST").unwrap_or_else(|| Self::DEFAULT_HOST.to_string()),
            http: Protocol::Http(parse_or(&lookup, "CATALOG_HTTP_PORT", 8080)),
            rpc: Protocol::Tcp(parse_or(&lookup, "CATALOG_RPC_PORT", 5500)),
            metrics: Protocol::Http(parse_or(&lookup, "CATALOG_METRICS_PORT", 9100)),
            data_dir: lookup("CATALOG_DATA_DIR")
                .unwrap_or_else(|| Self::DEFAULT_DATA_DIR.to_string()),
            allowed_origins: lookup("CATALOG_ALLOWED_ORIGINS")
                .unwrap_or_else(|| "*".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            call_timeout: millis("CATALOG_CALL_TIMEOUT_MS", 2000),
            bus_partitions: parse_or(&lookup, "CATALOG_BUS_PARTITIONS", 8u32).max(1),
            drain_deadline: secs("CATALOG_DRAIN_DEADLINE_SECS", 15),
            cache: CacheSettings {
                ttl: secs("CATALOG_CACHE_TTL_SECS", 300),
                max_entries: parse_or(&lookup, "CATALOG_CACHE_CAPACITY", 100_000),
            },
            publisher: PublisherSettings {
                queue_capacity: parse_or(&lookup, "CATALOG_PUBLISHER_QUEUE", 1024usize).max(1),
                workers: parse_or(&lookup, "CATALOG_PUBLISHER_WORKERS", 4usize).max(1),
                max_attempts: parse_or(&lookup, "CATALOG_PUBLISH_MAX_ATTEMPTS", 5u32).max(1),
                initial_backoff: millis("CATALOG_PUBLISH_BACKOFF_MS", 50),
                max_backoff: millis("CATALOG_PUBLISH_MAX_BACKOFF_MS", 2000),
                overflow_timeout: millis("CATALOG_PUBLISH_OVERFLOW_TIMEOUT_MS", 500),
                flush_deadline: secs("CATALOG_PUBLISH_FLUSH_SECS", 5),
            },
            consumer: ConsumerSettings {
                group_id: lookup("CATALOG_CONSUMER_GROUP")
                    .unwrap_or_else(|| Self::DEFAULT_GROUP_ID.to_string()),
                max_attempts: parse_or(&lookup, "CATALOG_HANDLER_MAX_ATTEMPTS", 3u32).max(1),
                initial_backoff: millis("CATALOG_HANDLER_BACKOFF_MS", 100),
                max_backoff: millis("CATALOG_HANDLER_MAX_BACKOFF_MS", 2000),
                stall_threshold: secs("CATALOG_STALL_THRESHOLD_SECS", 60),
            },
        }
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.host, self.http.port())
    }

    pub fn rpc_addr(&self) -> String {
        format!("{}:{}", self.host, self.rpc.port())
    }

    pub fn metrics_addr(&self) -> String {
        format!("{}:{}", self.host, self.metrics.port())
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Copy,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse::<T>().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default", key, raw);
            default
        }),
        None => default,
    }
}
