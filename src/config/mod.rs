use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::hub::HubSettings;
use crate::privacy::PrivacySettings;
use crate::proximity::EngineSettings;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub jwt_expiration_secs: u64,
    pub server_host: String,
    pub server_port: u16,
    pub api_base_uri: String,
    pub max_search_radius: f64,
    pub default_search_radius: f64,
    pub max_nearby_results: usize,
    pub privacy_offset_meters: f64,
    pub privacy_window_secs: i64,
    pub privacy_salt: String,
    pub metadata_ttl_secs: u64,
    pub nearby_cache_ttl_secs: u64,
    pub fanout_width: usize,
    pub stale_threshold_secs: i64,
    pub cleanup_interval_secs: u64,
    pub push_interval_secs: u64,
    pub outbound_queue_capacity: usize,
    pub background_queue_capacity: usize,
    pub location_history: bool,
}

// 可选配置项，缺省或解析失败时使用默认值
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenv::dotenv().ok();

        let jwt_expiration = env::var("JWT_EXPIRATION")
            .unwrap_or_else(|_| "24h".into())
            .trim_end_matches('h')
            .parse::<u64>()
            .unwrap_or(24);

        Ok(Config {
            database_url: env::var("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL")?,
            server_host: env::var("SERVER_HOST")?,
            server_port: env::var("SERVER_PORT")?.parse().unwrap_or(3000),
            jwt_secret: env::var("JWT_SECRET")?,
            jwt_expiration_secs: jwt_expiration * 3600,
            api_base_uri: env::var("API_BASE_URI").unwrap_or_else(|_| "/api".into()),
            max_search_radius: env_or("MAX_SEARCH_RADIUS", 5000.0),
            default_search_radius: env_or("DEFAULT_SEARCH_RADIUS", 1000.0),
            max_nearby_results: env_or("MAX_NEARBY_RESULTS", 100),
            privacy_offset_meters: env_or("PRIVACY_OFFSET_METERS", 75.0),
            privacy_window_secs: env_or("PRIVACY_WINDOW_SECS", 300),
            privacy_salt: env::var("PRIVACY_SALT").unwrap_or_else(|_| "presence".into()),
            metadata_ttl_secs: env_or("METADATA_TTL_SECS", 60),
            nearby_cache_ttl_secs: env_or("NEARBY_CACHE_TTL_SECS", 10),
            fanout_width: env_or("FANOUT_WIDTH", 50),
            stale_threshold_secs: env_or("STALE_THRESHOLD_SECS", 300),
            cleanup_interval_secs: env_or("CLEANUP_INTERVAL_SECS", 30),
            push_interval_secs: env_or("PUSH_INTERVAL_SECS", 5),
            outbound_queue_capacity: env_or("OUTBOUND_QUEUE_CAPACITY", 64),
            background_queue_capacity: env_or("BACKGROUND_QUEUE_CAPACITY", 1024),
            location_history: env_or("LOCATION_HISTORY", true),
        })
    }

    pub fn privacy_settings(&self) -> PrivacySettings {
        PrivacySettings {
            max_offset_meters: self.privacy_offset_meters,
            window_secs: self.privacy_window_secs,
            salt: self.privacy_salt.clone(),
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            max_search_radius: self.max_search_radius,
            default_search_radius: self.default_search_radius,
            max_nearby_results: self.max_nearby_results,
            metadata_ttl_secs: self.metadata_ttl_secs,
            nearby_cache_ttl_secs: self.nearby_cache_ttl_secs,
            fanout_width: self.fanout_width,
            stale_threshold_secs: self.stale_threshold_secs,
            background_queue_capacity: self.background_queue_capacity,
        }
    }

    pub fn hub_settings(&self) -> HubSettings {
        HubSettings {
            max_search_radius: self.max_search_radius,
            default_search_radius: self.default_search_radius,
            outbound_queue_capacity: self.outbound_queue_capacity,
        }
    }

    // tokio::time::interval 不接受零周期
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    pub fn push_interval(&self) -> Duration {
        Duration::from_secs(self.push_interval_secs.max(1))
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Config {
            database_url: "postgres://localhost/presence_test".into(),
            redis_url: "redis://127.0.0.1/".into(),
            jwt_secret: "test-secret".into(),
            jwt_expiration_secs: 3600,
            server_host: "127.0.0.1".into(),
            server_port: 3000,
            api_base_uri: "/api".into(),
            max_search_radius: 5000.0,
            default_search_radius: 1000.0,
            max_nearby_results: 100,
            privacy_offset_meters: 75.0,
            privacy_window_secs: 300,
            privacy_salt: "test-salt".into(),
            metadata_ttl_secs: 60,
            nearby_cache_ttl_secs: 10,
            fanout_width: 50,
            stale_threshold_secs: 300,
            cleanup_interval_secs: 30,
            push_interval_secs: 5,
            outbound_queue_capacity: 64,
            background_queue_capacity: 1024,
            location_history: false,
        }
    }
}
