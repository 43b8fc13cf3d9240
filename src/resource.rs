use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::utils::snake_case;

/// The origin of log entries: a resource type plus identifying labels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredResource {
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl MonitoredResource {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            labels: BTreeMap::new(),
        }
    }

    pub fn new_global() -> Self {
        Self::new("global")
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Rewrites label keys to the snake_case the service expects.
    pub fn normalize_labels(mut self) -> Self {
        self.labels = std::mem::take(&mut self.labels)
            .into_iter()
            .map(|(key, value)| (snake_case(&key), value))
            .collect();
        self
    }
}

/// Detects the resource the current process runs on.
#[async_trait]
pub trait ResourceDetector: Send + Sync {
    async fn detect(&self) -> MonitoredResource;
}

/// Recognizes the common Google Cloud runtimes from the environment variables
/// they set, falling back to `global`.
#[derive(Debug, Clone, Default)]
pub struct EnvResourceDetector;

impl EnvResourceDetector {
    fn detect_with(lookup: impl Fn(&str) -> Option<String>) -> MonitoredResource {
        let var = |name: &str| lookup(name).unwrap_or_default();

        if lookup("K_CONFIGURATION").is_some() && lookup("K_SERVICE").is_some() {
            return MonitoredResource::new("cloud_run_revision")
                .with_label("service_name", var("K_SERVICE"))
                .with_label("revision_name", var("K_REVISION"))
                .with_label("configuration_name", var("K_CONFIGURATION"));
        }

        if let Some(target) = lookup("FUNCTION_TARGET") {
            let name = lookup("K_SERVICE")
                .or_else(|| lookup("FUNCTION_NAME"))
                .unwrap_or(target);
            return MonitoredResource::new("cloud_function")
                .with_label("function_name", name)
                .with_label("region", var("FUNCTION_REGION"));
        }

        if lookup("GAE_SERVICE").is_some() {
            return MonitoredResource::new("gae_app")
                .with_label("module_id", var("GAE_SERVICE"))
                .with_label("version_id", var("GAE_VERSION"));
        }

        if lookup("KUBERNETES_SERVICE_HOST").is_some() {
            return MonitoredResource::new("k8s_container")
                .with_label("cluster_name", var("CLUSTER_NAME"))
                .with_label("namespace_name", var("NAMESPACE"))
                .with_label("pod_name", var("HOSTNAME"))
                .with_label("container_name", var("CONTAINER_NAME"));
        }

        MonitoredResource::new_global()
    }
}

#[async_trait]
impl ResourceDetector for EnvResourceDetector {
    async fn detect(&self) -> MonitoredResource {
        Self::detect_with(|name| std::env::var(name).ok())
    }
}
