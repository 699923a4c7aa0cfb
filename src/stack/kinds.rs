//! Resource type names used by the stack.

/// GKE cluster, only ever looked up.
pub const CONTAINER_CLUSTER: &str = "google-native:container/v1:Cluster";

/// Kubernetes provider configured from a kubeconfig.
pub const KUBERNETES_PROVIDER: &str = "kubernetes:providers:Provider";

/// Random password generator.
pub const RANDOM_PASSWORD: &str = "random:index:RandomPassword";

/// Cloud SQL instance.
pub const SQL_INSTANCE: &str = "gcp:sql:DatabaseInstance";

/// Cloud SQL user.
pub const SQL_USER: &str = "gcp:sql:User";

/// Kubernetes secret.
pub const K8S_SECRET: &str = "kubernetes:core/v1:Secret";

/// Kubernetes deployment.
pub const K8S_DEPLOYMENT: &str = "kubernetes:apps/v1:Deployment";

/// Kubernetes service.
pub const K8S_SERVICE: &str = "kubernetes:core/v1:Service";

/// Kubernetes custom resource (managed certificate, frontend config).
pub const K8S_CUSTOM_RESOURCE: &str = "kubernetes:apiextensions.k8s.io:CustomResource";

/// Kubernetes ingress.
pub const K8S_INGRESS: &str = "kubernetes:networking.k8s.io/v1:Ingress";

/// Cloud DNS record set.
pub const DNS_RECORD_SET: &str = "google-native:dns/v1:ResourceRecordSet";

/// Reusable Cloud SQL database component.
pub const CLOUD_SQL_COMPONENT: &str = "halldyll:components:CloudSqlDatabase";
