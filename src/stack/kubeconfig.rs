//! Kubeconfig rendering for a GKE cluster.

use crate::graph::{Deferred, ResourceDeclaration};

/// Renders a kubeconfig that authenticates through the `gcloud` helper.
///
/// Pure function of its inputs; `endpoint` is a bare host or IP.
#[must_use]
pub fn render_kubeconfig(cluster_name: &str, endpoint: &str, ca_cert: &str) -> String {
    format!(
        r"apiVersion: v1
clusters:
- cluster:
    certificate-authority-data: {ca_cert}
    server: https://{endpoint}
  name: {cluster_name}
contexts:
- context:
    cluster: {cluster_name}
    user: {cluster_name}
  name: {cluster_name}
current-context: {cluster_name}
kind: Config
preferences: {{}}
users:
- name: {cluster_name}
  user:
    auth-provider:
      config:
        cmd-args: config config-helper --format=json
        cmd-path: gcloud
        expiry-key: '{{.credential.token_expiry}}'
        token-key: '{{.credential.access_token}}'
      name: gcp
"
    )
}

/// The kubeconfig of a looked-up cluster, once its outputs are known.
/// Always secret.
#[must_use]
pub fn cluster_kubeconfig(cluster: &ResourceDeclaration) -> Deferred<String> {
    Deferred::combine([
        cluster.output_string("name"),
        cluster.output_string("endpoint"),
        cluster.output_string("masterAuth.clusterCaCertificate"),
    ])
    .map(|parts| render_kubeconfig(&parts[0], &parts[1], &parts[2]))
    .into_secret()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_is_valid_yaml() {
        let rendered = render_kubeconfig("main", "35.1.2.3", "Q0E=");
        let doc: serde_yaml::Value = serde_yaml::from_str(&rendered).expect("valid yaml");

        assert_eq!(doc["current-context"], serde_yaml::Value::from("main"));
        assert_eq!(
            doc["clusters"][0]["cluster"]["server"],
            serde_yaml::Value::from("https://35.1.2.3")
        );
        assert_eq!(
            doc["clusters"][0]["cluster"]["certificate-authority-data"],
            serde_yaml::Value::from("Q0E=")
        );
        assert_eq!(
            doc["users"][0]["user"]["auth-provider"]["config"]["expiry-key"],
            serde_yaml::Value::from("{.credential.token_expiry}")
        );
        assert_eq!(
            doc["users"][0]["user"]["auth-provider"]["name"],
            serde_yaml::Value::from("gcp")
        );
    }

    #[test]
    fn test_render_is_deterministic() {
        assert_eq!(
            render_kubeconfig("a", "b", "c"),
            render_kubeconfig("a", "b", "c")
        );
    }
}
