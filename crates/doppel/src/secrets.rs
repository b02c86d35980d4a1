//! Secret resolution for config credentials.
//!
//! Every credential in the config (index password, booru api key) can
//! be given three ways: inline, as a file path (`*_file`, the Docker
//! secrets pattern), or as an environment variable name (`*_env_var`).
//! Sources are tried in that order and the first non-empty one wins.

use std::fs;

use secrecy::SecretString;
use thiserror::Error;

/// Errors from resolving a configured secret.
#[derive(Error, Debug)]
pub enum SecretError {
    /// None of the three sources was configured.
    #[error("No secret source configured (need an inline value, file path, or env var name)")]
    NoSource,

    #[error("Failed to read secret file '{path}': {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' is not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' is not valid UTF-8")]
    EnvVarNotUnicode { name: String },
}

/// Resolves a secret from the first non-empty source: inline value,
/// then file contents, then environment variable. File and env values
/// are trimmed so trailing newlines never end up in credentials.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString, SecretError> {
    if let Some(value) = direct {
        if !value.is_empty() {
            return Ok(SecretString::from(value.to_string()));
        }
    }

    if let Some(path) = file_path {
        if !path.is_empty() {
            let expanded = expand_home(path);
            let content = fs::read_to_string(&expanded).map_err(|e| SecretError::ReadFile {
                path: expanded,
                source: e,
            })?;
            return Ok(SecretString::from(content.trim().to_string()));
        }
    }

    if let Some(name) = env_var {
        if !name.is_empty() {
            return match std::env::var(name) {
                Ok(value) => Ok(SecretString::from(value.trim().to_string())),
                Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                    name: name.to_string(),
                }),
                Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                    name: name.to_string(),
                }),
            };
        }
    }

    Err(SecretError::NoSource)
}

/// Like [`resolve_secret`], but an entirely absent secret is `None`
/// rather than an error. Broken sources still fail.
pub fn resolve_secret_optional(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<Option<SecretString>, SecretError> {
    match resolve_secret(direct, file_path, env_var) {
        Ok(secret) => Ok(Some(secret)),
        Err(SecretError::NoSource) => Ok(None),
        Err(e) => Err(e),
    }
}

/// True when at least one source is configured non-empty. Config
/// validation uses this to reject a username with no way to get the
/// matching password.
pub fn has_secret_source(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> bool {
    direct.is_some_and(|s| !s.is_empty())
        || file_path.is_some_and(|s| !s.is_empty())
        || env_var.is_some_and(|s| !s.is_empty())
}

/// Expands a leading `~` to the home directory (HOME, then USERPROFILE).
/// `~user/path` is not supported.
fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
            if path == "~" {
                return home.to_string_lossy().into_owned();
            }
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}
