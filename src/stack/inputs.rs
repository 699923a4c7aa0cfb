//! Named inputs of the blackcandy stack.

use tracing::debug;

use crate::config::ConfigSource;
use crate::error::ConfigError;
use crate::graph::Deferred;

/// GCP project hosting the cluster and database.
pub const GCP_PROJECT: &str = "gcp-project";
/// Identifier of the existing GKE cluster.
pub const GKE_CLUSTER_ID: &str = "gke-cluster-id";
/// VPC network the database is peered with.
pub const VPC_ID: &str = "vpc-id";
/// Project owning the DNS managed zone.
pub const HUB_PROJECT: &str = "hub-project";

/// Every value the stack reads from configuration, gathered before any
/// declaration is made. All of them are treated as secret.
#[derive(Debug, Clone)]
pub struct StackInputs {
    /// GCP project id.
    pub gcp_project: Deferred<String>,
    /// GKE cluster id.
    pub gke_cluster_id: Deferred<String>,
    /// VPC network id.
    pub vpc_id: Deferred<String>,
    /// DNS hub project id.
    pub hub_project: Deferred<String>,
}

impl StackInputs {
    /// Reads every required value from `source`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingValue`] for the first absent value.
    pub fn load(source: &ConfigSource) -> Result<Self, ConfigError> {
        let inputs = Self {
            gcp_project: source.require_secret(GCP_PROJECT)?,
            gke_cluster_id: source.require_secret(GKE_CLUSTER_ID)?,
            vpc_id: source.require_secret(VPC_ID)?,
            hub_project: source.require_secret(HUB_PROJECT)?,
        };
        debug!("Loaded stack inputs");
        Ok(inputs)
    }

    /// Keys of every required value.
    #[must_use]
    pub const fn required_keys() -> [&'static str; 4] {
        [GCP_PROJECT, GKE_CLUSTER_ID, VPC_ID, HUB_PROJECT]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> ConfigSource {
        ConfigSource::new()
            .with(GCP_PROJECT, "gcp-123")
            .with(GKE_CLUSTER_ID, "main")
            .with(VPC_ID, "vpc")
            .with(HUB_PROJECT, "hub")
    }

    #[test]
    fn test_load_marks_everything_secret() {
        let inputs = StackInputs::load(&complete()).expect("complete");
        assert!(inputs.gcp_project.is_secret());
        assert!(inputs.hub_project.is_secret());
        assert_eq!(
            tokio_test::block_on(inputs.vpc_id.resolve()),
            Ok(String::from("vpc"))
        );
    }

    #[test]
    fn test_missing_value_is_reported() {
        let source = ConfigSource::new().with(GCP_PROJECT, "gcp-123").with(VPC_ID, "vpc");
        let err = StackInputs::load(&source).expect_err("missing cluster id");
        assert!(matches!(err, ConfigError::MissingValue { ref key } if key == GKE_CLUSTER_ID));
    }
}
