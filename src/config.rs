//! Configuration loading for the correlation layer.
//!
//! Layered configuration using figment. Sources, in order of priority:
//! 1. Default values (compiled in)
//! 2. Config file: `/var/task/lambda-correlation.toml` (optional)
//! 3. The standard `OTEL_PAYLOAD_SIZE_LIMIT` environment variable
//! 4. `LAMBDA_CORRELATION_*` environment variables

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "/var/task/lambda-correlation.toml";
const ENV_PREFIX: &str = "LAMBDA_CORRELATION_";

/// Default byte limit for payload and body attributes (50 KiB).
pub const DEFAULT_PAYLOAD_SIZE_LIMIT: usize = 50 * 1024;

/// Trigger kinds the registry can be built from.
///
/// The order in [`CorrelationConfig::triggers`] is the registry's match
/// precedence.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerKind {
    /// API Gateway REST API (payload format v1).
    ApiGatewayRest,
    /// API Gateway HTTP API (payload format v2).
    ApiGatewayHttp,
    /// S3 bucket notifications.
    S3,
    /// SQS message batches.
    Sqs,
    /// Kinesis stream batches.
    Kinesis,
}

/// Configuration for the correlation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Byte limit applied to payload and body attributes.
    pub payload_size_limit: usize,
    /// Upper bound for each telemetry flush (early and final), in
    /// milliseconds.
    #[serde(with = "duration_ms")]
    pub flush_timeout: Duration,
    /// Trigger kinds in match-precedence order.
    pub triggers: Vec<TriggerKind>,
    /// Whether batch triggers open one span per record.
    pub message_spans: bool,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            payload_size_limit: DEFAULT_PAYLOAD_SIZE_LIMIT,
            flush_timeout: Duration::from_secs(1),
            triggers: vec![
                TriggerKind::ApiGatewayRest,
                TriggerKind::ApiGatewayHttp,
                TriggerKind::S3,
                TriggerKind::Sqs,
                TriggerKind::Kinesis,
            ],
            message_spans: true,
        }
    }
}

impl CorrelationConfig {
    /// Loads configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration parsing fails.
    #[allow(clippy::result_large_err)]
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    /// Loads configuration from a custom config file path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration parsing fails.
    #[allow(clippy::result_large_err)]
    pub fn load_from_path<P: AsRef<Path>>(config_path: P) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(CorrelationConfig::default()));

        if config_path.as_ref().exists() {
            figment = figment.merge(Toml::file(config_path));
        }

        figment = figment.merge(standard_otel_env());
        figment = figment.merge(Env::prefixed(ENV_PREFIX));

        figment.extract()
    }
}

/// Partial config for the standard OTel payload-limit override.
#[derive(Debug, Default, Serialize)]
struct PartialConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    payload_size_limit: Option<usize>,
}

fn standard_otel_env() -> Serialized<PartialConfig> {
    let mut config = PartialConfig::default();

    if let Ok(limit) = std::env::var("OTEL_PAYLOAD_SIZE_LIMIT") {
        config.payload_size_limit = limit.trim().parse().ok();
    }

    Serialized::defaults(config)
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
