//! Tracing subscriber setup.
//!
//! Library code only emits `tracing` events. Binaries embedding the cache
//! call [`init_tracing`] once at start-up to decide where they go.

use spreadwatch_core::ConfigError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "spreadwatch_cache=info,warn";

/// Output encoding of log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl LogFormat {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            _ => Err(ConfigError::InvalidValue {
                field: "SPREADWATCH_LOG_FORMAT".to_string(),
                value: value.to_string(),
                reason: "expected 'json' or 'pretty'".to_string(),
            }),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    pub format: LogFormat,
    /// `EnvFilter` directives, e.g. `spreadwatch_cache=debug`.
    pub filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            filter: DEFAULT_FILTER.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Read configuration from the environment.
    ///
    /// # Environment Variables
    /// - `SPREADWATCH_LOG_FORMAT`: `json` (default) or `pretty`
    /// - `SPREADWATCH_LOG`: filter directives, falling back to `RUST_LOG`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`TelemetryConfig::from_env`] with an injected lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let format = match lookup("SPREADWATCH_LOG_FORMAT") {
            Some(value) => LogFormat::parse(&value)?,
            None => LogFormat::default(),
        };
        let filter = lookup("SPREADWATCH_LOG")
            .or_else(|| lookup("RUST_LOG"))
            .filter(|f| !f.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());

        Ok(Self { format, filter })
    }
}

/// Install the global tracing subscriber.
///
/// Fails if the filter does not parse or a global subscriber is already set.
pub fn init_tracing(config: &TelemetryConfig) -> Result<(), ConfigError> {
    let env_filter = EnvFilter::try_new(&config.filter).map_err(|e| ConfigError::InvalidValue {
        field: "filter".to_string(),
        value: config.filter.clone(),
        reason: e.to_string(),
    })?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = match config.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer().pretty()).try_init(),
    };
    installed.map_err(|e| ConfigError::InvalidValue {
        field: "subscriber".to_string(),
        value: format!("{:?}", config.format),
        reason: format!("Failed to init subscriber: {}", e),
    })?;

    tracing::info!(format = ?config.format, filter = %config.filter, "Telemetry initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = TelemetryConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, TelemetryConfig::default());
    }

    #[test]
    fn test_spreadwatch_log_wins_over_rust_log() {
        let config = TelemetryConfig::from_lookup(lookup(&[
            ("SPREADWATCH_LOG", "spreadwatch_cache=debug"),
            ("RUST_LOG", "trace"),
            ("SPREADWATCH_LOG_FORMAT", "Pretty"),
        ]))
        .unwrap();
        assert_eq!(config.filter, "spreadwatch_cache=debug");
        assert_eq!(config.format, LogFormat::Pretty);

        let config = TelemetryConfig::from_lookup(lookup(&[("RUST_LOG", "trace")])).unwrap();
        assert_eq!(config.filter, "trace");
    }

    #[test]
    fn test_unknown_format_rejected() {
        let err = TelemetryConfig::from_lookup(lookup(&[("SPREADWATCH_LOG_FORMAT", "xml")]))
            .unwrap_err();
        assert!(err.to_string().contains("SPREADWATCH_LOG_FORMAT"));
    }

    #[test]
    fn test_second_init_fails() {
        let config = TelemetryConfig::default();
        // Another test in this binary may have installed one first.
        let _ = init_tracing(&config);
        assert!(init_tracing(&config).is_err());
    }
}
