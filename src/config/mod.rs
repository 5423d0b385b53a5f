//! Configuration module for the keymeter service

use serde::Deserialize;
use config::{Config, ConfigError, Environment, File};
use std::path::PathBuf;
use std::time::Duration;

/// Main application settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub redis: RedisSettings,
    pub auth: AuthSettings,
    pub metering: MeteringSettings,
    pub billing: BillingSettings,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
    /// Seconds to wait for in-flight requests and log streams on shutdown
    pub shutdown_timeout_secs: u64,
}

/// Database configuration for PostgreSQL
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: Option<u32>,
    /// Upper bound for a single billing-path write
    pub write_timeout_ms: u64,
}

/// Window counter store. An empty url selects the in-process store.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    pub url: String,
    pub key_prefix: String,
}

/// Credential hashing and decision-path limits
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub salt: String,
    pub iterations: u32,
    pub store_timeout_ms: u64,
}

/// Batch buffer triggers
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MeteringSettings {
    pub batch_size: usize,
    pub flush_interval_secs: u64,
}

/// Billing aggregation and the external payment provider
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BillingSettings {
    pub cadence_secs: u64,
    pub unit_price_cents: i64,
    pub provider_base_url: String,
    pub provider_api_key: Option<String>,
    pub provider_event_name: String,
    pub provider_timeout_secs: u64,
    pub provider_rate_limit_per_minute: u32,
}

impl Settings {
    /// Load configuration from files and environment variables
    ///
    /// Configuration priority (highest to lowest):
    /// 1. `DATABASE_URL`, `REDIS_URL`, `STRIPE_API_KEY`
    /// 2. Environment variables (prefixed with KEYMETER_)
    /// 3. config/local.toml (gitignored)
    /// 4. config/default.toml
    pub fn load() -> Result<Self, ConfigError> {
        let config_dir = std::env::var("CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"));

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            // KEYMETER_SERVER__PORT, KEYMETER_METERING__BATCH_SIZE, etc.
            .add_source(
                Environment::with_prefix("KEYMETER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
            )
            .set_override_option("database.url", std::env::var("DATABASE_URL").ok())?
            .set_override_option("redis.url", std::env::var("REDIS_URL").ok())?
            .set_override_option("billing.provider_api_key", std::env::var("STRIPE_API_KEY").ok())?;

        builder.build()?.try_deserialize()
    }
}

impl AuthSettings {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

impl DatabaseSettings {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms.max(1))
    }
}

impl MeteringSettings {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs.max(1))
    }
}

impl BillingSettings {
    pub fn cadence(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cadence_secs.max(1) as i64)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs.max(1))
    }

    /// Provider key, or `None` when reporting is switched off
    pub fn provider_key(&self) -> Option<&str> {
        self.provider_api_key.as_deref().filter(|k| !k.is_empty())
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            host: "0.0.0.0".to_string(),
            port: 8080,
            workers: None,
            shutdown_timeout_secs: 30,
        }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            url: String::new(),
            max_connections: Some(10),
            write_timeout_ms: 5_000,
        }
    }
}

impl Default for RedisSettings {
    fn default() -> Self {
        RedisSettings {
            url: String::new(),
            key_prefix: String::new(),
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        AuthSettings {
            salt: "api-key-salt".to_string(),
            iterations: 4096,
            store_timeout_ms: 250,
        }
    }
}

impl Default for MeteringSettings {
    fn default() -> Self {
        MeteringSettings {
            batch_size: 100,
            flush_interval_secs: 30,
        }
    }
}

impl Default for BillingSettings {
    fn default() -> Self {
        BillingSettings {
            cadence_secs: 3600,
            unit_price_cents: 1,
            provider_base_url: "https://api.stripe.com".to_string(),
            provider_api_key: None,
            provider_event_name: "api_requests".to_string(),
            provider_timeout_secs: 10,
            provider_rate_limit_per_minute: 600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.auth.salt, "api-key-salt");
        assert_eq!(settings.auth.iterations, 4096);
        assert_eq!(settings.metering.batch_size, 100);
        assert_eq!(settings.metering.flush_interval(), Duration::from_secs(30));
        assert_eq!(settings.billing.cadence(), chrono::Duration::hours(1));
        assert!(settings.billing.provider_key().is_none());
    }

    #[test]
    fn test_empty_provider_key_is_disabled() {
        let billing = BillingSettings {
            provider_api_key: Some(String::new()),
            ..Default::default()
        };
        assert!(billing.provider_key().is_none());

        let billing = BillingSettings {
            provider_api_key: Some("sk_test_123".to_string()),
            ..Default::default()
        };
        assert_eq!(billing.provider_key(), Some("sk_test_123"));
    }

    #[test]
    fn test_zero_timeouts_are_clamped() {
        let database = DatabaseSettings {
            write_timeout_ms: 0,
            ..Default::default()
        };
        assert_eq!(database.write_timeout(), Duration::from_millis(1));

        let billing = BillingSettings {
            provider_timeout_secs: 0,
            ..Default::default()
        };
        assert_eq!(billing.provider_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_prefixed_env_overrides_file_values() {
        // Only this test touches KEYMETER_* variables
        std::env::set_var("KEYMETER_METERING__BATCH_SIZE", "250");
        std::env::set_var("KEYMETER_SERVER__PORT", "9292");
        let settings = Settings::load();
        std::env::remove_var("KEYMETER_METERING__BATCH_SIZE");
        std::env::remove_var("KEYMETER_SERVER__PORT");

        let settings = settings.unwrap();
        assert_eq!(settings.metering.batch_size, 250);
        assert_eq!(settings.server.port, 9292);
    }
}
