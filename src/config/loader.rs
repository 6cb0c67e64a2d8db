//! Configuration Loader
//!
//! Layers defaults, an optional TOML file and environment overrides, then validates
//! the result.

use super::error::{ConfigResult, ConfigurationError};
use super::TransferConfig;
use std::path::PathBuf;
use tracing::{debug, info};

/// Environment variables look like `RECON_TRANSFER__POLLER__INTERVAL_SECS`
pub const ENV_PREFIX: &str = "RECON_TRANSFER";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    env_prefix: String,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            file: None,
            env_prefix: ENV_PREFIX.to_string(),
        }
    }

    /// Read this TOML file; it must exist
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn load(&self) -> ConfigResult<TransferConfig> {
        let mut builder = config::Config::builder();

        if let Some(path) = &self.file {
            if !path.is_file() {
                return Err(ConfigurationError::ConfigFileNotFound { path: path.clone() });
            }
            debug!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                config::File::from(path.as_path())
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        );

        let config: TransferConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        debug!(
            "Configuration loaded: {}",
            serde_json::to_string_pretty(&sanitize_config_for_logging(&config))
                .unwrap_or_else(|_| "[serialization error]".to_string())
        );
        info!(
            outbound = %config.roots.outbound.display(),
            phi = %config.roots.phi.display(),
            interval_secs = config.poller.interval_secs,
            "🔧 CONFIG: Configuration loaded"
        );

        Ok(config)
    }
}

/// Configuration as JSON with sensitive values masked
pub fn sanitize_config_for_logging(config: &TransferConfig) -> serde_json::Value {
    let mut value = serde_json::to_value(config).unwrap_or(serde_json::Value::Null);
    sanitize_json_recursive(&mut value, &["password", "secret", "key", "token", "credential"]);
    value
}

fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                let key_lower = key.to_lowercase();
                let is_sensitive = sensitive_patterns
                    .iter()
                    .any(|pattern| key_lower.contains(pattern));

                if is_sensitive {
                    if let serde_json::Value::String(s) = val {
                        *val = serde_json::Value::String(mask(s));
                    }
                } else {
                    sanitize_json_recursive(val, sensitive_patterns);
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                sanitize_json_recursive(item, sensitive_patterns);
            }
        }
        _ => {}
    }
}

fn mask(value: &str) -> String {
    if value.is_empty() {
        return "[EMPTY]".to_string();
    }
    let chars: Vec<char> = value.chars().collect();
    if chars.len() > 4 {
        let head: String = chars[..2].iter().collect();
        let tail: String = chars[chars.len() - 2..].iter().collect();
        format!("[MASKED: {head}***{tail}]")
    } else {
        "[MASKED: ***]".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("transfer.toml");
        fs::write(
            &path,
            r#"
[poller]
interval_secs = 15

[retry]
upload_limit = 5

[event_log]
endpoint = "logs.clinic.org:9000"
source_type = "server"
"#,
        )
        .unwrap();

        let config = ConfigLoader::new()
            .with_env_prefix("RECON_TRANSFER_LOADER_FILE_TEST")
            .with_file(&path)
            .load()
            .unwrap();

        assert_eq!(config.poller.interval_secs, 15);
        assert_eq!(config.poller.max_tasks_per_cycle, 10);
        assert_eq!(config.retry.upload_limit, Some(5));
        assert_eq!(config.retry.storage_limit, None);
        assert_eq!(config.event_log.endpoint, "logs.clinic.org:9000");
        assert_eq!(config.event_log.source_type, crate::audit::SourceType::Server);
    }

    #[test]
    fn test_missing_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let result = ConfigLoader::new()
            .with_env_prefix("RECON_TRANSFER_LOADER_MISSING_TEST")
            .with_file(dir.path().join("absent.toml"))
            .load();
        assert!(matches!(result, Err(ConfigurationError::ConfigFileNotFound { .. })));
    }

    #[test]
    fn test_invalid_file_fails_validation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("transfer.toml");
        fs::write(&path, "[poller]\nmax_tasks_per_cycle = 0\n").unwrap();

        let result = ConfigLoader::new()
            .with_env_prefix("RECON_TRANSFER_LOADER_INVALID_TEST")
            .with_file(&path)
            .load();
        assert!(matches!(result, Err(ConfigurationError::InvalidValue { .. })));
    }

    #[test]
    fn test_sensitive_values_are_masked() {
        let mut value = json!({
            "event_log": { "endpoint": "logs", "api_token": "abcdef123" },
            "nested": [{ "secret_key": "xy" }]
        });
        sanitize_json_recursive(&mut value, &["secret", "key", "token"]);

        assert_eq!(value["event_log"]["endpoint"], "logs");
        assert_eq!(value["event_log"]["api_token"], "[MASKED: ab***23]");
        assert_eq!(value["nested"][0]["secret_key"], "[MASKED: ***]");
    }

    #[test]
    fn test_sanitized_config_keeps_paths() {
        let value = sanitize_config_for_logging(&TransferConfig::default());
        assert!(value["roots"]["phi"].is_string());
        assert_eq!(value["poller"]["interval_secs"], 60);
    }
}
