//! Configuration module.
//!
//! This module handles everything a stack needs before declaration starts:
//! - Parsing `halldyll.stack.yaml` with environment overrides
//! - Validating the configuration
//! - Exposing named values through [`ConfigSource`]
//! - Hashing configurations and property bags for change detection

mod hash;
mod parser;
mod source;
mod spec;
mod validator;

pub use hash::ConfigHasher;
pub use parser::{find_config_file, ConfigParser, DEFAULT_CONFIG_FILES};
pub use source::ConfigSource;
pub use spec::{
    AppConfig, ConfigValue, DatabaseConfig, ProjectConfig, ProviderConfig, ProviderKind,
    StackConfig, StateBackend, StateConfig,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
