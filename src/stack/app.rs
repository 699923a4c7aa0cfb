//! The blackcandy application stack.
//!
//! Declares everything needed to serve blackcandy from an existing GKE
//! cluster: a private Cloud SQL database, the application secrets, the
//! deployment with its Cloud SQL proxy sidecar, the service and ingress
//! with a managed certificate, and the public DNS record.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::{json, Value};
use tracing::info;

use crate::config::{ConfigSource, StackConfig};
use crate::error::{DeferredError, GraphError, Result};
use crate::graph::{Deferred, DeclarationOptions, GraphBuilder, Properties, ResourceDeclaration};

use super::database::{CloudSqlArgs, CloudSqlDatabase};
use super::inputs::StackInputs;
use super::kinds;
use super::kubeconfig::cluster_kubeconfig;
use super::set_path;

/// Port the service exposes inside the cluster.
const SERVICE_PORT: u16 = 80;

/// Port the Cloud SQL proxy listens on for health checks.
const PROXY_HEALTH_PORT: u16 = 8090;

/// Name of the Kubernetes provider declaration.
pub const K8S_PROVIDER_NAME: &str = "gke-provider";

/// Handles to every declaration of the stack.
#[derive(Debug, Clone)]
pub struct BlackcandyStack {
    /// The looked-up GKE cluster.
    pub cluster: ResourceDeclaration,
    /// Kubernetes provider configured from the cluster's kubeconfig.
    pub k8s_provider: ResourceDeclaration,
    /// Database component.
    pub database: CloudSqlDatabase,
    /// Rails `SECRET_KEY_BASE` generator.
    pub rails_secret: ResourceDeclaration,
    /// Kubernetes secret holding the application environment.
    pub secret: ResourceDeclaration,
    /// Application deployment.
    pub deployment: ResourceDeclaration,
    /// Cluster-internal service.
    pub service: ResourceDeclaration,
    /// Managed TLS certificate.
    pub certificate: ResourceDeclaration,
    /// HTTP to HTTPS redirect.
    pub frontend_config: ResourceDeclaration,
    /// Public ingress.
    pub ingress: ResourceDeclaration,
    /// `A` record pointing the domain at the ingress.
    pub dns_record: ResourceDeclaration,
    domain: String,
}

impl BlackcandyStack {
    /// Reads the stack inputs and declares the whole stack.
    ///
    /// Missing inputs are reported before anything is declared.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a missing input, or a graph error
    /// if a declaration conflicts.
    pub fn define(config: &StackConfig, source: &ConfigSource) -> Result<(GraphBuilder, Self)> {
        let inputs = StackInputs::load(source)?;
        let mut builder = GraphBuilder::new();
        let stack = Self::declare(&mut builder, config, &inputs)?;
        info!(
            "Declared {} resources for {}/{}",
            builder.len(),
            config.project.name,
            config.project.stack
        );
        Ok((builder, stack))
    }

    /// Declares the stack into `builder`.
    ///
    /// # Errors
    ///
    /// Returns a graph error if a declaration conflicts or a property path
    /// is invalid.
    pub fn declare(
        builder: &mut GraphBuilder,
        config: &StackConfig,
        inputs: &StackInputs,
    ) -> std::result::Result<Self, GraphError> {
        let app = &config.app;
        let namespace = config.namespace();
        let domain = format!("{namespace}.{}", app.domain_suffix);

        let cluster = builder.declare(
            kinds::CONTAINER_CLUSTER,
            "gke-cluster",
            Properties::new()
                .with("clusterId", inputs.gke_cluster_id.clone())
                .with("location", config.project.region.as_str())
                .with("project", inputs.gcp_project.clone()),
            DeclarationOptions::new().lookup(),
        )?;

        let k8s_provider = builder.declare(
            kinds::KUBERNETES_PROVIDER,
            K8S_PROVIDER_NAME,
            Properties::new().with("kubeconfig", cluster_kubeconfig(&cluster)),
            DeclarationOptions::new().secret_output("kubeconfig"),
        )?;
        let on_cluster = || DeclarationOptions::new().provider(k8s_provider.id().clone());

        let database = CloudSqlDatabase::declare(
            builder,
            CloudSqlArgs {
                project: inputs.gcp_project.clone(),
                vpc_id: inputs.vpc_id.clone(),
                region: &config.project.region,
                database: &app.database,
            },
        )?;

        let rails_secret = builder.declare(
            kinds::RANDOM_PASSWORD,
            "rails-secret",
            Properties::new().with("length", i64::from(app.database.password_length)),
            DeclarationOptions::new().secret_output("result"),
        )?;

        let secret = builder.declare(
            kinds::K8S_SECRET,
            "db-secrets",
            Properties::from_json(json!({
                "metadata": {
                    "name": format!("{}-db-secrets", app.name),
                    "namespace": namespace,
                },
            }))
            .with(
                "data",
                Properties::new()
                    .with("SECRET_KEY_BASE", base64_of(&rails_secret.output_string("result")))
                    .with("DB_PASSWORD", base64_of(&database.password()))
                    .with("DB_HOST", BASE64.encode("localhost"))
                    .with("DB_USER", base64_of(&database.user_name())),
            ),
            on_cluster().secret_output("data"),
        )?;

        let deployment_name = app.name.clone();
        let labels = json!({ "app": app.name });
        let mut properties = Properties::from_json(json!({
            "metadata": {
                "namespace": namespace,
                "name": app.name,
                "labels": labels,
            },
            "spec": {
                "replicas": app.replicas,
                "selector": { "matchLabels": labels },
                "template": {
                    "metadata": { "labels": labels },
                    "spec": {
                        "serviceAccount": app.service_account,
                        "containers": [
                            {
                                "image": app.image,
                                "name": app.name,
                                "envFrom": [ { "secretRef": { "name": null } } ],
                                "ports": [
                                    { "containerPort": app.container_port, "name": "http", "protocol": "TCP" }
                                ],
                                "readinessProbe": {
                                    "initialDelaySeconds": 30,
                                    "httpGet": { "path": app.health_path, "port": app.container_port, "scheme": "HTTP" },
                                },
                                "livenessProbe": {
                                    "httpGet": { "path": app.health_path, "port": app.container_port, "scheme": "HTTP" },
                                },
                                "resources": { "requests": { "cpu": app.cpu, "memory": app.memory } },
                            },
                            {
                                "name": "cloud-sql-proxy",
                                "image": app.proxy_image,
                                "command": [ "/cloud_sql_proxy", null, "-use_http_health_check" ],
                                "securityContext": { "runAsNonRoot": true },
                                "readinessProbe": {
                                    "initialDelaySeconds": 10,
                                    "httpGet": { "path": "/readiness", "port": PROXY_HEALTH_PORT, "scheme": "HTTP" },
                                },
                                "livenessProbe": {
                                    "httpGet": { "path": "/readiness", "port": PROXY_HEALTH_PORT, "scheme": "HTTP" },
                                },
                                "resources": { "requests": { "memory": "2Gi", "cpu": "1" } },
                            },
                        ],
                    },
                },
            },
        }));
        set_path(
            &mut properties,
            kinds::K8S_DEPLOYMENT,
            &deployment_name,
            "spec.template.spec.containers.0.envFrom.0.secretRef.name",
            secret.output_string("metadata.name"),
        )?;
        set_path(
            &mut properties,
            kinds::K8S_DEPLOYMENT,
            &deployment_name,
            "spec.template.spec.containers.1.command.1",
            database
                .connection_name()
                .map(|name| format!("-instances={name}=tcp:5432")),
        )?;
        let deployment = builder.declare(kinds::K8S_DEPLOYMENT, deployment_name, properties, on_cluster())?;

        let service_name = format!("{}-svc", app.name);
        let service = builder.declare(
            kinds::K8S_SERVICE,
            service_name.as_str(),
            Properties::from_json(json!({
                "metadata": {
                    "name": service_name,
                    "namespace": namespace,
                    "annotations": {
                        "cloud.google.com/neg": json!({ "ingress": true }).to_string(),
                    },
                },
            }))
            .with(
                "spec",
                Properties::from_json(json!({
                    "sessionAffinity": "None",
                    "type": "ClusterIP",
                    "ports": [ { "port": SERVICE_PORT, "protocol": "TCP", "targetPort": app.container_port } ],
                }))
                .with("selector", deployment.output("spec.template.metadata.labels")),
            ),
            on_cluster(),
        )?;

        let certificate = builder.declare(
            kinds::K8S_CUSTOM_RESOURCE,
            "managed-tls-cert",
            Properties::from_json(json!({
                "apiVersion": "networking.gke.io/v1",
                "kind": "ManagedCertificate",
                "metadata": { "name": format!("{}-cert", app.name), "namespace": namespace },
                "spec": { "domains": [ domain ] },
            })),
            on_cluster(),
        )?;

        let frontend_config = builder.declare(
            kinds::K8S_CUSTOM_RESOURCE,
            "front-end-config",
            Properties::from_json(json!({
                "apiVersion": "networking.gke.io/v1beta1",
                "kind": "FrontendConfig",
                "metadata": { "name": "http-redirect-to-https", "namespace": namespace },
                "spec": {
                    "redirectToHttps": { "enabled": true, "responseCodeName": "MOVED_PERMANENTLY_DEFAULT" },
                },
            })),
            on_cluster(),
        )?;

        let ingress_name = app.name.clone();
        // Annotation keys contain dots, so the metadata is built as a bag.
        let metadata = Properties::new()
            .with("namespace", namespace.as_str())
            .with("name", app.name.as_str())
            .with(
                "annotations",
                Properties::new()
                    .with("kubernetes.io/ingress.class", "gce")
                    .with(
                        "networking.gke.io/managed-certificates",
                        certificate.output_string("metadata.name"),
                    )
                    .with(
                        "networking.gke.io/v1beta1.FrontendConfig",
                        frontend_config.output_string("metadata.name"),
                    ),
            );
        let mut properties = Properties::from_json(json!({
            "spec": {
                "rules": [ {
                    "host": domain,
                    "http": {
                        "paths": [ {
                            "path": "/*",
                            "pathType": "ImplementationSpecific",
                            "backend": {
                                "service": { "name": null, "port": { "number": SERVICE_PORT } },
                            },
                        } ],
                    },
                } ],
            },
        }))
        .with("metadata", metadata);
        set_path(
            &mut properties,
            kinds::K8S_INGRESS,
            &ingress_name,
            "spec.rules.0.http.paths.0.backend.service.name",
            service.output_string("metadata.name"),
        )?;
        let ingress = builder.declare(kinds::K8S_INGRESS, ingress_name, properties, on_cluster())?;

        let ips = ingress
            .output("status.loadBalancer.ingress")
            .try_map(|entries| load_balancer_ips(&entries));
        let dns_record = builder.declare(
            kinds::DNS_RECORD_SET,
            domain.as_str(),
            Properties::new()
                .with("managedZone", app.managed_zone.as_str())
                .with("name", format!("{domain}."))
                .with("type", "A")
                .with("rrdatas", ips)
                .with("project", inputs.hub_project.clone()),
            DeclarationOptions::new(),
        )?;

        Ok(Self {
            cluster,
            k8s_provider,
            database,
            rails_secret,
            secret,
            deployment,
            service,
            certificate,
            frontend_config,
            ingress,
            dns_record,
            domain,
        })
    }

    /// Public host name of the application.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Rendered kubeconfig of the cluster. Secret.
    #[must_use]
    pub fn kubeconfig(&self) -> Deferred<String> {
        self.k8s_provider.output_string("kubeconfig")
    }

    /// Public IPs of the ingress.
    #[must_use]
    pub fn ingress_ips(&self) -> Deferred<Vec<String>> {
        self.ingress
            .output("status.loadBalancer.ingress")
            .try_map(|entries| load_balancer_ips(&entries))
    }
}

/// Base64 of a deferred string, as stored in Kubernetes secrets.
fn base64_of(value: &Deferred<String>) -> Deferred<String> {
    value.map(|v| BASE64.encode(v))
}

/// Extracts `ip` from every load-balancer ingress entry.
fn load_balancer_ips(entries: &Value) -> std::result::Result<Vec<String>, DeferredError> {
    let items = entries.as_array().ok_or_else(|| DeferredError::Transform {
        message: String::from("load balancer ingress is not a list"),
    })?;
    items
        .iter()
        .map(|entry| {
            entry
                .get("ip")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| DeferredError::Transform {
                    message: format!("load balancer entry without an ip: {entry}"),
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, HalldyllError};
    use crate::graph::ResourceId;

    fn config() -> StackConfig {
        serde_yaml::from_str("project:\n  name: blackcandy\n").expect("parses")
    }

    fn source() -> ConfigSource {
        ConfigSource::new()
            .with("gcp-project", "gcp-123")
            .with("gke-cluster-id", "main")
            .with("vpc-id", "vpc")
            .with("hub-project", "hub")
    }

    #[test]
    fn test_define_declares_an_acyclic_stack() {
        let (builder, stack) = BlackcandyStack::define(&config(), &source()).expect("defines");
        assert_eq!(builder.len(), 13);
        assert_eq!(stack.domain(), "dev-test.interviews.binti.engineering");

        let graph = builder.build().expect("acyclic");
        let order: Vec<&ResourceId> = graph.topological_order().into_iter().map(|d| d.id()).collect();
        let position = |id: &ResourceId| order.iter().position(|o| *o == id).expect("declared");

        assert!(position(stack.cluster.id()) < position(stack.k8s_provider.id()));
        assert!(position(stack.database.instance().id()) < position(stack.deployment.id()));
        assert!(position(stack.secret.id()) < position(stack.deployment.id()));
        assert!(position(stack.service.id()) < position(stack.ingress.id()));
        assert!(position(stack.ingress.id()) < position(stack.dns_record.id()));
    }

    #[test]
    fn test_kubernetes_resources_use_the_cluster_provider() {
        let (_, stack) = BlackcandyStack::define(&config(), &source()).expect("defines");
        for declaration in [&stack.secret, &stack.deployment, &stack.service, &stack.ingress] {
            assert_eq!(declaration.options().provider.as_ref(), Some(stack.k8s_provider.id()));
        }
        assert!(stack.dns_record.options().provider.is_none());
    }

    #[test]
    fn test_missing_input_declares_nothing() {
        let source = ConfigSource::new().with("gcp-project", "gcp-123");
        let err = BlackcandyStack::define(&config(), &source).expect_err("missing inputs");
        assert!(matches!(
            err,
            HalldyllError::Config(ConfigError::MissingValue { .. })
        ));
    }

    #[test]
    fn test_load_balancer_ips() {
        let entries = json!([{ "ip": "34.1.1.1" }, { "ip": "34.2.2.2" }]);
        assert_eq!(
            load_balancer_ips(&entries),
            Ok(vec![String::from("34.1.1.1"), String::from("34.2.2.2")])
        );
        assert!(load_balancer_ips(&json!([{ "hostname": "x" }])).is_err());
        assert!(load_balancer_ips(&json!({})).is_err());
    }

    #[test]
    fn test_secret_data_is_masked_in_preview() {
        let (_, stack) = BlackcandyStack::define(&config(), &source()).expect("defines");
        let preview = stack.secret.properties().preview();
        assert_eq!(preview["data"]["DB_PASSWORD"], json!("[secret]"));
        assert_eq!(preview["data"]["DB_HOST"], json!("bG9jYWxob3N0"));
    }
}
