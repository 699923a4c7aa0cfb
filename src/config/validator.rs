//! Configuration validation.
//!
//! Checks a stack configuration before anything is declared. Every problem
//! is collected; the first error fails validation and warnings are
//! returned to the caller for display.

use crate::error::{ConfigError, HalldyllError, Result};
use tracing::debug;

use super::spec::{AppConfig, ProjectConfig, ProviderConfig, ProviderKind, StackConfig};

/// Maximum length of a DNS label.
const MAX_LABEL_LEN: usize = 63;

/// Validation result containing everything found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Validation errors.
    pub errors: Vec<ValidationError>,
    /// Non-fatal issues.
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ValidationResult {
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }
}

/// Validator for stack configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

impl ConfigValidator {
    /// Creates a validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a stack configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation error found.
    pub fn validate(&self, config: &StackConfig) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_project(&config.project, &mut result);
        Self::validate_provider(&config.provider, &mut result);
        Self::validate_values(config, &mut result);
        Self::validate_app(&config.app, &config.namespace(), &mut result);

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(HalldyllError::Config(ConfigError::validation(
                first_error.message.clone(),
                first_error.field.clone(),
            )))
        }
    }

    fn validate_project(project: &ProjectConfig, result: &mut ValidationResult) {
        if project.name.is_empty() {
            result.error("project.name", "Project name cannot be empty");
        } else if !is_valid_name(&project.name) {
            result.error(
                "project.name",
                format!(
                    "Project name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    project.name
                ),
            );
        }

        if !is_valid_name(&project.stack) {
            result.error(
                "project.stack",
                format!(
                    "Stack name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    project.stack
                ),
            );
        }

        if project.region.is_empty() {
            result.error("project.region", "Region cannot be empty");
        } else if !project.zone.starts_with(&project.region) {
            result.warnings.push(format!(
                "Zone '{}' is not in region '{}'",
                project.zone, project.region
            ));
        }
    }

    fn validate_provider(provider: &ProviderConfig, result: &mut ValidationResult) {
        if provider.timeout_secs == 0 {
            result.error("provider.timeout_secs", "Provider timeout must be greater than zero");
        }

        match (provider.kind, provider.endpoint.as_deref()) {
            (ProviderKind::Http, None | Some("")) => {
                result.error("provider.endpoint", "HTTP provider requires an endpoint");
            }
            (ProviderKind::Http, Some(endpoint))
                if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") =>
            {
                result.error(
                    "provider.endpoint",
                    format!("Endpoint '{endpoint}' must start with http:// or https://"),
                );
            }
            (ProviderKind::Http, Some(endpoint)) if endpoint.starts_with("http://") => {
                result
                    .warnings
                    .push(format!("Provider endpoint '{endpoint}' is not using TLS"));
            }
            (ProviderKind::Local, Some(_)) => {
                result
                    .warnings
                    .push(String::from("provider.endpoint is ignored by the local provider"));
            }
            _ => {}
        }
    }

    fn validate_values(config: &StackConfig, result: &mut ValidationResult) {
        for (key, value) in &config.values {
            let field = format!("values.{key}");
            if !is_valid_key(key) {
                result.error(
                    &field,
                    format!("Value key '{key}' is invalid. Use lowercase letters, digits and hyphens."),
                );
            }
            if value.is_secret() && !value.value().is_empty() {
                result.warnings.push(format!(
                    "Secret '{key}' is stored in the stack file; prefer HALLDYLL_VALUE_{}",
                    key.to_ascii_uppercase().replace('-', "_")
                ));
            }
        }
    }

    fn validate_app(app: &AppConfig, namespace: &str, result: &mut ValidationResult) {
        if !is_valid_name(&app.name) {
            result.error("app.name", format!("App name '{}' is not a valid DNS label", app.name));
        }
        if app.image.trim().is_empty() {
            result.error("app.image", "Image cannot be empty");
        } else if !app.image.contains(':') && !app.image.contains('@') {
            result.warnings.push(format!(
                "Image '{}' has no tag; the registry default will be used",
                app.image
            ));
        }
        if app.replicas == 0 {
            result.error("app.replicas", "Replicas must be at least 1");
        }
        if app.container_port == 0 {
            result.error("app.container_port", "Container port must be greater than zero");
        }
        if !app.health_path.starts_with('/') {
            result.error("app.health_path", "Health path must start with '/'");
        }
        if app.domain_suffix.is_empty() {
            result.error("app.domain_suffix", "Domain suffix cannot be empty");
        }
        if namespace.len() > MAX_LABEL_LEN {
            result.error(
                "project.stack",
                format!("Namespace '{namespace}' is longer than {MAX_LABEL_LEN} characters"),
            );
        }
        if !is_valid_name(&app.database.name) {
            result.error(
                "app.database.name",
                format!("Database name '{}' is invalid", app.database.name),
            );
        }
        if app.database.disk_autoresize_limit < app.database.disk_size_gb {
            result.error(
                "app.database.disk_autoresize_limit",
                "Autoresize limit cannot be smaller than the disk size",
            );
        }
        if app.database.password_length < 16 {
            result
                .warnings
                .push(String::from("Database passwords shorter than 16 characters are weak"));
        }
    }
}

/// Checks a DNS-1123 label: lowercase letter first, then lowercase
/// alphanumerics or single hyphens, not ending with a hyphen.
fn is_valid_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_LABEL_LEN {
        return false;
    }

    let mut chars = name.chars();
    if let Some(first) = chars.next()
        && !first.is_ascii_lowercase()
    {
        return false;
    }

    if chars.any(|c| !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-') {
        return false;
    }

    !name.ends_with('-') && !name.contains("--")
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}
