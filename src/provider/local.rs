//! In-memory provider.
//!
//! Simulates the cloud side of a stack so that it can be previewed,
//! applied and torn down without credentials. Most resource types echo
//! their inputs as outputs; a few synthesize the outputs a real provider
//! would compute.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::error::ProviderError;
use crate::graph::ResourceId;
use crate::stack::kinds;

use super::{DeleteRequest, Provider, ProviderRequest, ProviderResponse, ProviderResult};

/// Default length of generated passwords.
const DEFAULT_PASSWORD_LENGTH: usize = 16;

/// Punctuation used when a password allows special characters.
const SPECIAL_CHARACTERS: &[u8] = b"!#$%&*()-_=+[]{}<>:?";

/// A resource held by the local provider.
#[derive(Debug, Clone)]
struct LocalRecord {
    provider_id: String,
    response: ProviderResponse,
}

/// Provider that keeps every resource in memory.
#[derive(Debug)]
pub struct LocalProvider {
    project: String,
    region: String,
    latency: Option<Duration>,
    resources: Mutex<HashMap<ResourceId, LocalRecord>>,
}

impl LocalProvider {
    /// Creates a local provider for the given project and region.
    #[must_use]
    pub fn new(project: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            region: region.into(),
            latency: None,
            resources: Mutex::new(HashMap::new()),
        }
    }

    /// Delays every call by `latency`.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of resources currently held.
    pub async fn len(&self) -> usize {
        self.resources.lock().await.len()
    }

    /// Returns true if no resource is held.
    pub async fn is_empty(&self) -> bool {
        self.resources.lock().await.is_empty()
    }

    /// Outputs of a held resource.
    pub async fn outputs(&self, id: &ResourceId) -> Option<Value> {
        self.resources
            .lock()
            .await
            .get(id)
            .map(|r| r.response.outputs.clone())
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Computes the outputs a real provider would report.
    fn synthesize(&self, request: &ProviderRequest, provider_id: &str) -> ProviderResult<ProviderResponse> {
        let id = &request.id;
        let mut outputs = match &request.properties {
            Value::Object(map) => map.clone(),
            Value::Null => serde_json::Map::new(),
            _ => {
                return Err(ProviderError::Rejected {
                    id: id.clone(),
                    message: String::from("properties must be an object"),
                });
            }
        };

        let response = match id.kind.as_str() {
            kinds::RANDOM_PASSWORD => {
                let length = outputs
                    .get("length")
                    .and_then(Value::as_u64)
                    .and_then(|l| usize::try_from(l).ok())
                    .unwrap_or(DEFAULT_PASSWORD_LENGTH);
                let special = outputs.get("special").and_then(Value::as_bool).unwrap_or(true);
                outputs.insert(String::from("result"), Value::String(generate_password(length, special)));
                ProviderResponse::new(provider_id, Value::Object(outputs)).with_secret("result")
            }
            kinds::SQL_INSTANCE => {
                let name = string_or(&outputs, "name", &id.name);
                let project = string_or(&outputs, "project", &self.project);
                let region = string_or(&outputs, "region", &self.region);
                outputs.insert(String::from("name"), Value::String(name.clone()));
                outputs.insert(
                    String::from("connectionName"),
                    Value::String(format!("{project}:{region}:{name}")),
                );
                outputs.insert(
                    String::from("privateIpAddress"),
                    Value::String(synthetic_ip("10", id)),
                );
                ProviderResponse::new(provider_id, Value::Object(outputs))
            }
            kinds::K8S_INGRESS => {
                outputs.insert(
                    String::from("status"),
                    json!({ "loadBalancer": { "ingress": [ { "ip": synthetic_ip("34", id) } ] } }),
                );
                ProviderResponse::new(provider_id, Value::Object(outputs))
            }
            _ => ProviderResponse::new(provider_id, Value::Object(outputs)),
        };

        Ok(response)
    }

    /// Outputs of a resource that exists outside the stack.
    fn existing(&self, request: &ProviderRequest) -> ProviderResult<ProviderResponse> {
        let id = &request.id;
        match id.kind.as_str() {
            kinds::CONTAINER_CLUSTER => {
                let cluster = request
                    .properties
                    .get("clusterId")
                    .and_then(Value::as_str)
                    .unwrap_or(&id.name);
                let location = request
                    .properties
                    .get("location")
                    .and_then(Value::as_str)
                    .unwrap_or(&self.region);
                let outputs = json!({
                    "name": cluster,
                    "location": location,
                    "endpoint": synthetic_ip("35", id),
                    "masterAuth": {
                        "clusterCaCertificate": BASE64.encode(format!("local-ca:{cluster}")),
                    },
                });
                Ok(ProviderResponse::new(format!("projects/{}/clusters/{cluster}", self.project), outputs))
            }
            _ => Err(ProviderError::NotFound { id: id.clone() }),
        }
    }
}

#[async_trait]
impl Provider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn create(&self, request: &ProviderRequest) -> ProviderResult<ProviderResponse> {
        self.simulate_latency().await;
        let provider_id = uuid::Uuid::new_v4().to_string();
        let response = self.synthesize(request, &provider_id)?;

        debug!("Local create {} -> {provider_id}", request.id);
        self.resources.lock().await.insert(
            request.id.clone(),
            LocalRecord {
                provider_id,
                response: response.clone(),
            },
        );
        Ok(response)
    }

    async fn read(&self, request: &ProviderRequest) -> ProviderResult<ProviderResponse> {
        self.simulate_latency().await;
        if let Some(record) = self.resources.lock().await.get(&request.id) {
            trace!("Local read {} from memory", request.id);
            return Ok(record.response.clone());
        }
        self.existing(request)
    }

    async fn update(
        &self,
        provider_id: &str,
        request: &ProviderRequest,
    ) -> ProviderResult<ProviderResponse> {
        self.simulate_latency().await;
        let mut resources = self.resources.lock().await;

        // Generated secrets survive updates that do not change their inputs.
        let previous = resources.get(&request.id).map(|r| r.response.clone());
        let mut response = self.synthesize(request, provider_id)?;
        if let Some(previous) = previous {
            if request.id.kind == kinds::RANDOM_PASSWORD
                && previous.outputs.get("length") == response.outputs.get("length")
                && previous.outputs.get("special") == response.outputs.get("special")
            {
                response = previous;
            }
        }

        debug!("Local update {} ({provider_id})", request.id);
        resources.insert(
            request.id.clone(),
            LocalRecord {
                provider_id: provider_id.to_string(),
                response: response.clone(),
            },
        );
        Ok(response)
    }

    async fn delete(&self, request: &DeleteRequest) -> ProviderResult<()> {
        self.simulate_latency().await;
        let mut resources = self.resources.lock().await;
        match resources.get(&request.id) {
            Some(record) if record.provider_id != request.provider_id => {
                Err(ProviderError::Rejected {
                    id: request.id.clone(),
                    message: format!(
                        "provider id mismatch: held {}, asked to delete {}",
                        record.provider_id, request.provider_id
                    ),
                })
            }
            Some(_) => {
                resources.remove(&request.id);
                debug!("Local delete {}", request.id);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

fn string_or(map: &serde_json::Map<String, Value>, key: &str, default: &str) -> String {
    map.get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

fn generate_password(length: usize, special: bool) -> String {
    let mut rng = rand::thread_rng();
    if !special {
        return rng
            .sample_iter(&Alphanumeric)
            .take(length)
            .map(char::from)
            .collect();
    }

    (0..length)
        .map(|_| {
            if rng.gen_ratio(1, 5) {
                char::from(SPECIAL_CHARACTERS[rng.gen_range(0..SPECIAL_CHARACTERS.len())])
            } else {
                char::from(rng.sample(Alphanumeric))
            }
        })
        .collect()
}

/// Stable fake address derived from the resource identity.
fn synthetic_ip(first_octet: &str, id: &ResourceId) -> String {
    let digest = Sha256::digest(id.to_string().as_bytes());
    format!("{first_octet}.{}.{}.{}", digest[0], digest[1], digest[2].max(1))
}
