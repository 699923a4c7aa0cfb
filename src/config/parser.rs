//! Configuration loading.
//!
//! Loads the stack file, applies environment overrides and reads `.env`.

use crate::error::{ConfigError, HalldyllError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::{ConfigValue, StackConfig};

/// Prefix of environment variables that override stack values.
const VALUE_ENV_PREFIX: &str = "HALLDYLL_VALUE_";

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["halldyll.stack.yaml", "halldyll.stack.yml"];

/// Loader for stack configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Directory holding `.env`.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the directory that holds `.env`.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<StackConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(HalldyllError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
            message: format!("Failed to read file: {e}"),
            location: Some(path.display().to_string()),
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<StackConfig> {
        let config: StackConfig = serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError {
            message: format!("YAML parse error: {e}"),
            location: source.map(|p| p.display().to_string()),
        })?;

        debug!(
            "Parsed configuration for {}/{}",
            config.project.name, config.project.stack
        );
        Ok(config)
    }

    /// Loads configuration and applies overrides from the process
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<StackConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config, std::env::vars());
        Ok(config)
    }

    /// Applies overrides from `vars`:
    ///
    /// - `HALLDYLL_PROJECT_NAME` and `HALLDYLL_STACK`
    /// - `HALLDYLL_VALUE_<KEY>` sets value `<key>`, lower-cased with `_`
    ///   turned into `-`; an existing secret flag is kept.
    pub fn apply_env_overrides(
        config: &mut StackConfig,
        vars: impl IntoIterator<Item = (String, String)>,
    ) {
        for (name, value) in vars {
            match name.as_str() {
                "HALLDYLL_PROJECT_NAME" => {
                    debug!("Overriding project.name from environment");
                    config.project.name = value;
                }
                "HALLDYLL_STACK" => {
                    debug!("Overriding project.stack from environment");
                    config.project.stack = value;
                }
                _ => {
                    let Some(key) = name.strip_prefix(VALUE_ENV_PREFIX) else {
                        continue;
                    };
                    let key = key.to_ascii_lowercase().replace('_', "-");
                    debug!("Overriding values.{key} from environment");

                    let secret = config.values.get(&key).is_some_and(ConfigValue::is_secret);
                    config.values.insert(key, ConfigValue::Detailed { value, secret });
                }
            }
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| ConfigError::ParseError {
                message: format!("Failed to load .env file: {e}"),
                location: Some(env_path.display().to_string()),
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Reads the provider API token from the variable named in the config.
    ///
    /// # Errors
    ///
    /// Returns an error if the variable is not set.
    pub fn provider_api_key(config: &StackConfig) -> Result<String> {
        let name = &config.provider.api_key_env;
        std::env::var(name).map_err(|_| {
            HalldyllError::Config(ConfigError::MissingEnvVar { name: name.clone() })
        })
    }
}

/// Finds the configuration file in `start_dir` or one of its parents.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(HalldyllError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const YAML: &str = r"
project:
  name: blackcandy
  stack: staging
provider:
  kind: http
  endpoint: https://provider.internal
values:
  gke-cluster-id: main
  vpc-id:
    value: from-file
    secret: true
app:
  replicas: 3
";

    #[test]
    fn test_parse_full_config() {
        let config = ConfigParser::new().parse_yaml(YAML, None).expect("parses");
        assert_eq!(config.project.stack, "staging");
        assert_eq!(config.app.replicas, 3);
        assert_eq!(config.provider.endpoint.as_deref(), Some("https://provider.internal"));
    }

    #[test]
    fn test_parse_error_carries_location() {
        let err = ConfigParser::new()
            .parse_yaml("project: [", Some(Path::new("stack.yaml")))
            .expect_err("invalid yaml");
        assert!(matches!(
            err,
            HalldyllError::Config(ConfigError::ParseError { location: Some(ref l), .. }) if l == "stack.yaml"
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ConfigParser::new().parse_yaml(YAML, None).expect("parses");
        ConfigParser::apply_env_overrides(
            &mut config,
            [
                (String::from("HALLDYLL_STACK"), String::from("prod")),
                (String::from("HALLDYLL_VALUE_VPC_ID"), String::from("from-env")),
                (String::from("HALLDYLL_VALUE_HUB_PROJECT"), String::from("hub")),
                (String::from("UNRELATED"), String::from("x")),
            ],
        );

        assert_eq!(config.project.stack, "prod");
        assert_eq!(config.values["vpc-id"].value(), "from-env");
        assert!(config.values["vpc-id"].is_secret());
        assert_eq!(config.values["hub-project"].value(), "hub");
        assert!(!config.values["hub-project"].is_secret());
    }

    #[test]
    fn test_find_config_file_searches_parents() {
        let temp = TempDir::new().expect("temp dir");
        std::fs::write(temp.path().join("halldyll.stack.yaml"), YAML).expect("write");
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).expect("mkdir");

        let found = find_config_file(&nested).expect("found in parent");
        assert_eq!(found, temp.path().join("halldyll.stack.yaml"));
    }

    #[test]
    fn test_load_missing_file() {
        let temp = TempDir::new().expect("temp dir");
        let err = ConfigParser::new()
            .load_file(temp.path().join("nope.yaml"))
            .expect_err("missing");
        assert!(matches!(err, HalldyllError::Config(ConfigError::FileNotFound { .. })));
    }
}
