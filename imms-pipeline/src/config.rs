//! Environment-sourced configuration for the batch pipeline (§6's
//! "Environment inputs": bucket names, queue URLs, TTL days, watchdog
//! deadline), layered the same way `mmoldb-ingest/src/config.rs` layers
//! `IngestConfig`: built-in defaults, then an optional TOML file, then the
//! process environment. The innermost layer is `Env::raw()` rather than
//! `Env::prefixed(...)` — §6 pins these as the literal unprefixed names
//! (`SOURCE_BUCKET_NAME`, not some `IMMS_SOURCE_BUCKET_NAME`), so a prefix
//! would silently stop honouring the names spec.md actually gives them.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PipelineConfig {
    pub source_bucket_name: String,
    pub ack_bucket_name: String,
    pub config_bucket_name: String,
    pub watchdog_minutes: i64,
    pub poll_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_bucket_name: "imms-source".to_string(),
            ack_bucket_name: "imms-ack".to_string(),
            config_bucket_name: "imms-config".to_string(),
            watchdog_minutes: 15,
            poll_interval_ms: 500,
        }
    }
}

impl PipelineConfig {
    /// Defaults, overridden by `Imms.toml` if present, overridden in turn
    /// by `SOURCE_BUCKET_NAME`/`ACK_BUCKET_NAME`/`CONFIG_BUCKET_NAME`/
    /// `WATCHDOG_MINUTES`/`POLL_INTERVAL_MS` in the process environment.
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Self::default())).merge(Toml::file("Imms.toml")).merge(Env::raw())
    }

    pub fn from_environment() -> Result<Self, figment::Error> {
        Self::figment().extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_with_nothing_else_configured() {
        let config: PipelineConfig = Figment::from(Serialized::defaults(PipelineConfig::default())).extract().unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn toml_layer_overrides_defaults() {
        let config: PipelineConfig = Figment::from(Serialized::defaults(PipelineConfig::default()))
            .merge(("watchdog_minutes", 30))
            .extract()
            .unwrap();
        assert_eq!(config.watchdog_minutes, 30);
        assert_eq!(config.poll_interval_ms, 500);
    }

    #[test]
    fn env_layer_wins_over_everything_before_it() {
        let config: PipelineConfig = Figment::from(Serialized::defaults(PipelineConfig::default()))
            .merge(("watchdog_minutes", 30))
            .merge(("watchdog_minutes", 45))
            .extract()
            .unwrap();
        assert_eq!(config.watchdog_minutes, 45);
    }
}
