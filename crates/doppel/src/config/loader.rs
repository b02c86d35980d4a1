use std::path::{Path, PathBuf};

use crate::config::schema::{CollectorKind, Config};
use crate::error::ConfigError;
use crate::secrets;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

/// Default config location, `~/.config/doppel/config.json` on Linux.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("doppel").join("config.json"))
}

/// Picks the config file path: the CLI override when given, the
/// platform default otherwise.
pub fn resolve_config_path(cli_path: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    cli_path
        .or_else(default_config_path)
        .ok_or_else(|| ConfigError::Validation {
            message: "No config path given and no platform config directory exists".to_string(),
        })
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| format!("{} at {}", e, e.instance_path()))
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_endpoint(field: &str, value: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidEndpoint {
        field: field.to_string(),
        reason: reason.to_string(),
    };

    let (host, port) = value
        .rsplit_once(':')
        .ok_or_else(|| invalid("expected host:port"))?;
    if host.is_empty() {
        return Err(invalid("empty host"));
    }
    match port.parse::<u16>() {
        Ok(port) if port > 0 => Ok(()),
        _ => Err(invalid("invalid port")),
    }
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Validate version
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    // Validate endpoints
    validate_endpoint("transport.job_endpoint", &config.transport.job_endpoint)?;
    validate_endpoint(
        "transport.ingress_endpoint",
        &config.transport.ingress_endpoint,
    )?;
    validate_endpoint("transport.state_endpoint", &config.transport.state_endpoint)?;

    if config.worker.concurrency_multiplier < 1 {
        return Err(ConfigError::Validation {
            message: "worker.concurrency_multiplier must be at least 1".to_string(),
        });
    }

    // Validate the index section
    if let Some(index) = &config.index {
        if let Err(e) = url::Url::parse(&index.base_url) {
            return Err(ConfigError::InvalidUrl {
                field: "index.base_url".to_string(),
                reason: e.to_string(),
            });
        }
        if index.username.is_some()
            && !secrets::has_secret_source(
                index.password.as_deref(),
                index.password_file.as_deref(),
                index.password_env_var.as_deref(),
            )
        {
            return Err(ConfigError::Validation {
                message: "index.username is set but no password source is configured".to_string(),
            });
        }
    }

    // Validate the collector section
    if let Some(collector) = &config.collector {
        if collector.rate_limit_per_sec < 1 {
            return Err(ConfigError::Validation {
                message: "collector.rate_limit_per_sec must be at least 1".to_string(),
            });
        }

        match collector.kind {
            CollectorKind::Booru => {
                let Some(booru) = &collector.booru else {
                    return Err(ConfigError::Validation {
                        message: "collector.kind is \"booru\" but no booru section is configured"
                            .to_string(),
                    });
                };
                if let Err(e) = url::Url::parse(&booru.base_url) {
                    return Err(ConfigError::InvalidUrl {
                        field: "collector.booru.base_url".to_string(),
                        reason: e.to_string(),
                    });
                }
                if booru.login.is_some()
                    && !secrets::has_secret_source(
                        booru.api_key.as_deref(),
                        booru.api_key_file.as_deref(),
                        booru.api_key_env_var.as_deref(),
                    )
                {
                    return Err(ConfigError::Validation {
                        message:
                            "collector.booru.login is set but no api_key source is configured"
                                .to_string(),
                    });
                }
            }
            CollectorKind::Directory => {
                if collector.directory.is_none() {
                    return Err(ConfigError::Validation {
                        message:
                            "collector.kind is \"directory\" but no directory section is configured"
                                .to_string(),
                    });
                }
            }
        }
    }

    Ok(())
}
