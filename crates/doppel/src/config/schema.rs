use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::secrets;

/// One configuration file shared by the coordinator, worker, and
/// collector binaries. Each binary reads the sections it needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub transport: TransportConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub index: Option<IndexConfig>,
    #[serde(default)]
    pub collector: Option<CollectorConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

fn default_database_path() -> PathBuf {
    crate::db::default_database_path().unwrap_or_else(|| PathBuf::from("doppel.db"))
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// The three coordinator endpoints, as `host:port` strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Where the coordinator hands jobs to workers.
    pub job_endpoint: String,
    /// Where collectors and workers push messages to the coordinator.
    pub ingress_endpoint: String,
    /// Where the resume-point state service answers.
    pub state_endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// In-flight job limit is CPU cores times this.
    #[serde(default = "default_concurrency_multiplier")]
    pub concurrency_multiplier: usize,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_concurrency_multiplier() -> usize {
    2
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency_multiplier: default_concurrency_multiplier(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl WorkerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub base_url: String,
    pub index_name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub password_file: Option<String>,
    #[serde(default)]
    pub password_env_var: Option<String>,
}

impl IndexConfig {
    /// Resolves basic-auth credentials from the configured password
    /// source. `None` when no username is set.
    pub fn credentials(&self) -> Result<Option<(String, SecretString)>, ConfigError> {
        let Some(username) = &self.username else {
            return Ok(None);
        };
        let password = secrets::resolve_secret(
            self.password.as_deref(),
            self.password_file.as_deref(),
            self.password_env_var.as_deref(),
        )?;
        Ok(Some((username.clone(), password)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    pub kind: CollectorKind,
    /// Name this collector reports in messages and resume state.
    pub service_name: String,
    #[serde(default = "default_rate_limit_per_sec")]
    pub rate_limit_per_sec: u32,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub booru: Option<BooruConfig>,
    #[serde(default)]
    pub directory: Option<DirectoryConfig>,
}

fn default_rate_limit_per_sec() -> u32 {
    2
}

fn default_poll_interval_secs() -> u64 {
    60
}

impl CollectorConfig {
    /// Poll interval for collectors that tail a remote source. The
    /// directory collector is one-shot and never polls.
    pub fn poll(&self) -> Option<Duration> {
        match self.kind {
            CollectorKind::Booru => Some(Duration::from_secs(self.poll_interval_secs)),
            CollectorKind::Directory => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectorKind {
    Booru,
    Directory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BooruConfig {
    pub base_url: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_file: Option<String>,
    #[serde(default)]
    pub api_key_env_var: Option<String>,
}

fn default_page_size() -> u32 {
    100
}

impl BooruConfig {
    /// Resolves the ticket-auth credentials from the configured api-key
    /// source. `None` when no login is set.
    pub fn credentials(&self) -> Result<Option<(String, SecretString)>, ConfigError> {
        let Some(login) = &self.login else {
            return Ok(None);
        };
        let api_key = secrets::resolve_secret(
            self.api_key.as_deref(),
            self.api_key_file.as_deref(),
            self.api_key_env_var.as_deref(),
        )?;
        Ok(Some((login.clone(), api_key)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    pub root: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_worker_config_default() {
        let worker = WorkerConfig::default();
        assert_eq!(worker.concurrency_multiplier, 2);
        assert_eq!(worker.shutdown_grace_secs, 10);
        assert_eq!(worker.shutdown_grace(), Duration::from_secs(10));
    }

    #[test]
    fn test_database_config_default() {
        let database = DatabaseConfig::default();
        assert!(database.path.to_string_lossy().ends_with("doppel.db"));
    }

    #[test]
    fn test_collector_kind_deserializes_lowercase() {
        let kind: CollectorKind = serde_json::from_str(r#""booru""#).unwrap();
        assert_eq!(kind, CollectorKind::Booru);
        let kind: CollectorKind = serde_json::from_str(r#""directory""#).unwrap();
        assert_eq!(kind, CollectorKind::Directory);
        assert!(serde_json::from_str::<CollectorKind>(r#""rss""#).is_err());
    }

    #[test]
    fn test_poll_interval_by_kind() {
        let collector = CollectorConfig {
            kind: CollectorKind::Booru,
            service_name: "booru".to_string(),
            rate_limit_per_sec: 2,
            poll_interval_secs: 30,
            booru: None,
            directory: None,
        };
        assert_eq!(collector.poll(), Some(Duration::from_secs(30)));

        let collector = CollectorConfig {
            kind: CollectorKind::Directory,
            ..collector
        };
        assert_eq!(collector.poll(), None);
    }

    #[test]
    fn test_index_credentials_direct_password() {
        let index = IndexConfig {
            base_url: "http://localhost:9200".to_string(),
            index_name: "images".to_string(),
            username: Some("doppel".to_string()),
            password: Some("hunter2".to_string()),
            password_file: None,
            password_env_var: None,
        };
        let (username, password) = index.credentials().unwrap().unwrap();
        assert_eq!(username, "doppel");
        assert_eq!(password.expose_secret(), "hunter2");
    }

    #[test]
    fn test_index_credentials_absent_without_username() {
        let index = IndexConfig {
            base_url: "http://localhost:9200".to_string(),
            index_name: "images".to_string(),
            username: None,
            password: Some("unused".to_string()),
            password_file: None,
            password_env_var: None,
        };
        assert!(index.credentials().unwrap().is_none());
    }

    #[test]
    fn test_index_credentials_username_without_source_fails() {
        let index = IndexConfig {
            base_url: "http://localhost:9200".to_string(),
            index_name: "images".to_string(),
            username: Some("doppel".to_string()),
            password: None,
            password_file: None,
            password_env_var: None,
        };
        assert!(index.credentials().is_err());
    }

    #[test]
    fn test_booru_credentials_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "k3y-value").unwrap();

        let booru = BooruConfig {
            base_url: "https://booru.example".to_string(),
            page_size: 100,
            login: Some("crawler".to_string()),
            api_key: None,
            api_key_file: Some(file.path().to_string_lossy().to_string()),
            api_key_env_var: None,
        };
        let (login, api_key) = booru.credentials().unwrap().unwrap();
        assert_eq!(login, "crawler");
        assert_eq!(api_key.expose_secret(), "k3y-value");
    }
}
