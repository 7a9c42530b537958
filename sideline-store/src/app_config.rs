use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    pub auth: AuthConfig,
    pub payments: PaymentsConfig,
    #[serde(default)]
    pub webhooks: WebhooksConfig,
    pub urls: UrlsConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentsConfig {
    /// Empty secret runs the in-process mock processor
    #[serde(default)]
    pub secret_key: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_fee_percent")]
    pub platform_fee_percent: f64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_api_base() -> String { "https://api.stripe.com".into() }
fn default_fee_percent() -> f64 { 10.0 }
fn default_timeout_ms() -> u64 { 10_000 }

#[derive(Debug, Deserialize, Clone)]
pub struct WebhooksConfig {
    pub processor_secret: Option<String>,
    pub video_secret: Option<String>,
    /// Development escape hatch; unsigned deliveries are rejected otherwise
    #[serde(default)]
    pub allow_unsigned: bool,
    #[serde(default = "default_tolerance")]
    pub tolerance_secs: i64,
}

fn default_tolerance() -> i64 { 300 }

impl Default for WebhooksConfig {
    fn default() -> Self {
        Self {
            processor_secret: None,
            video_secret: None,
            allow_unsigned: false,
            tolerance_secs: default_tolerance(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct UrlsConfig {
    pub app_base_url: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct EmailConfig {
    /// Unset: emails are logged instead of sent
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_from")]
    pub from: String,
}

fn default_from() -> String { "Sideline <bookings@sideline.app>".into() }

#[derive(Debug, Deserialize, Clone)]
pub struct WorkersConfig {
    pub outbox_interval_ms: u64,
    pub outbox_batch_size: i64,
    pub sweep_interval_secs: u64,
    pub abandoned_checkout_hours: i64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            outbox_interval_ms: 1_000,
            outbox_batch_size: 50,
            sweep_interval_secs: 300,
            abandoned_checkout_hours: 24,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // optional per-environment overrides
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `SIDELINE_PAYMENTS__SECRET_KEY=sk_live_...`
            .add_source(config::Environment::with_prefix("SIDELINE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
