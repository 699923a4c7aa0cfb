//! Configuration types for a stack.
//!
//! This module defines the structs that map to `halldyll.stack.yaml`. The
//! file carries project identity, provider and state settings, named stack
//! values (some of them secret), and the application parameters the
//! blackcandy stack is built from.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// The root configuration of a stack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackConfig {
    /// Project-level configuration.
    pub project: ProjectConfig,
    /// Provider backend configuration.
    #[serde(default)]
    pub provider: ProviderConfig,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Named stack values, read through [`super::ConfigSource`].
    #[serde(default)]
    pub values: BTreeMap<String, ConfigValue>,
    /// Application parameters.
    #[serde(default)]
    pub app: AppConfig,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Project name.
    pub name: String,
    /// Stack name (e.g. "dev", "staging"). Also names the namespace.
    #[serde(default = "default_stack")]
    pub stack: String,
    /// Cloud region.
    #[serde(default = "default_region")]
    pub region: String,
    /// Cloud zone.
    #[serde(default = "default_zone")]
    pub zone: String,
}

/// Provider backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Backend kind.
    #[serde(default)]
    pub kind: ProviderKind,
    /// Base URL of the HTTP provider API.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Environment variable holding the provider API token.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Deadline for a single provider call.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Attempts for transient HTTP failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// Provider backend kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// In-memory simulation.
    #[default]
    Local,
    /// Remote JSON API.
    Http,
}

/// State backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StateConfig {
    /// Backend type.
    #[serde(default)]
    pub backend: StateBackend,
    /// State file path; defaults to `.halldyll/<stack>.state.json`.
    #[serde(default)]
    pub path: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based state storage.
    #[default]
    Local,
}

/// A named stack value, either a plain string or `{ value, secret }`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ConfigValue {
    /// Plain, non-secret value.
    Plain(String),
    /// Value with an explicit secret flag.
    Detailed {
        /// The value.
        value: String,
        /// Whether the value must be masked.
        #[serde(default)]
        secret: bool,
    },
}

/// Application parameters for the blackcandy stack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    /// Application name; names the deployment, service and ingress.
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Application image.
    #[serde(default = "default_image")]
    pub image: String,
    /// Number of replicas.
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    /// Port the application listens on.
    #[serde(default = "default_container_port")]
    pub container_port: u16,
    /// HTTP path used by readiness and liveness probes.
    #[serde(default = "default_health_path")]
    pub health_path: String,
    /// Kubernetes service account.
    #[serde(default = "default_service_account")]
    pub service_account: String,
    /// CPU request of the application container.
    #[serde(default = "default_cpu")]
    pub cpu: String,
    /// Memory request of the application container.
    #[serde(default = "default_memory")]
    pub memory: String,
    /// Cloud SQL proxy sidecar image.
    #[serde(default = "default_proxy_image")]
    pub proxy_image: String,
    /// DNS suffix; the host is `<namespace>.<domain_suffix>`.
    #[serde(default = "default_domain_suffix")]
    pub domain_suffix: String,
    /// Cloud DNS managed zone.
    #[serde(default = "default_managed_zone")]
    pub managed_zone: String,
    /// Database parameters.
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Database parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Database user and component name.
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Engine version.
    #[serde(default = "default_database_version")]
    pub version: String,
    /// Machine tier.
    #[serde(default = "default_tier")]
    pub tier: String,
    /// Disk size in GB.
    #[serde(default = "default_disk_size_gb")]
    pub disk_size_gb: u32,
    /// Upper bound for automatic disk growth in GB.
    #[serde(default = "default_disk_autoresize_limit")]
    pub disk_autoresize_limit: u32,
    /// Generated password length.
    #[serde(default = "default_password_length")]
    pub password_length: u32,
}

impl StackConfig {
    /// Path of the state file.
    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.state.path.as_ref().map_or_else(
            || PathBuf::from(crate::state::STATE_DIR).join(format!("{}.state.json", self.project.stack)),
            PathBuf::from,
        )
    }

    /// Kubernetes namespace of the stack.
    #[must_use]
    pub fn namespace(&self) -> String {
        format!("{}-test", self.project.stack)
    }
}

impl ConfigValue {
    /// The raw value.
    #[must_use]
    pub fn value(&self) -> &str {
        match self {
            Self::Plain(value) | Self::Detailed { value, .. } => value,
        }
    }

    /// Whether the value must be masked.
    #[must_use]
    pub const fn is_secret(&self) -> bool {
        matches!(self, Self::Detailed { secret: true, .. })
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            endpoint: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            image: default_image(),
            replicas: default_replicas(),
            container_port: default_container_port(),
            health_path: default_health_path(),
            service_account: default_service_account(),
            cpu: default_cpu(),
            memory: default_memory(),
            proxy_image: default_proxy_image(),
            domain_suffix: default_domain_suffix(),
            managed_zone: default_managed_zone(),
            database: DatabaseConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            version: default_database_version(),
            tier: default_tier(),
            disk_size_gb: default_disk_size_gb(),
            disk_autoresize_limit: default_disk_autoresize_limit(),
            password_length: default_password_length(),
        }
    }
}

fn default_stack() -> String {
    String::from("dev")
}

fn default_region() -> String {
    String::from("us-west1")
}

fn default_zone() -> String {
    String::from("us-west1-c")
}

fn default_api_key_env() -> String {
    String::from("HALLDYLL_PROVIDER_TOKEN")
}

const fn default_timeout_secs() -> u64 {
    600
}

const fn default_max_retries() -> u32 {
    3
}

fn default_app_name() -> String {
    String::from("blackcandy")
}

fn default_image() -> String {
    String::from("blackcandy/blackcandy:2.0.1")
}

const fn default_replicas() -> u32 {
    2
}

const fn default_container_port() -> u16 {
    3000
}

fn default_health_path() -> String {
    String::from("/session/new")
}

fn default_service_account() -> String {
    String::from("blackcandy-ksa")
}

fn default_cpu() -> String {
    String::from("2")
}

fn default_memory() -> String {
    String::from("4Gi")
}

fn default_proxy_image() -> String {
    String::from("gcr.io/cloudsql-docker/gce-proxy:1.28.1")
}

fn default_domain_suffix() -> String {
    String::from("interviews.binti.engineering")
}

fn default_managed_zone() -> String {
    String::from("interviews-binti-engineering")
}

fn default_database_version() -> String {
    String::from("POSTGRES_14")
}

fn default_tier() -> String {
    String::from("db-custom-1-3840")
}

const fn default_disk_size_gb() -> u32 {
    10
}

const fn default_disk_autoresize_limit() -> u32 {
    50
}

const fn default_password_length() -> u32 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_yaml() {
        let config: StackConfig = serde_yaml::from_str("project:\n  name: blackcandy\n")
            .expect("minimal config parses");

        assert_eq!(config.project.stack, "dev");
        assert_eq!(config.provider.kind, ProviderKind::Local);
        assert_eq!(config.app.replicas, 2);
        assert_eq!(config.app.database.tier, "db-custom-1-3840");
        assert_eq!(config.namespace(), "dev-test");
        assert_eq!(config.state_path(), PathBuf::from(".halldyll/dev.state.json"));
    }

    #[test]
    fn test_value_forms() {
        let yaml = r"
project:
  name: blackcandy
values:
  gke-cluster-id: main
  gcp-project:
    value: gcp-123
    secret: true
";
        let config: StackConfig = serde_yaml::from_str(yaml).expect("parses");
        let plain = &config.values["gke-cluster-id"];
        let secret = &config.values["gcp-project"];

        assert_eq!(plain.value(), "main");
        assert!(!plain.is_secret());
        assert_eq!(secret.value(), "gcp-123");
        assert!(secret.is_secret());
    }
}
