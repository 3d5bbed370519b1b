//! Orchestrator access through `kubectl`.

use async_trait::async_trait;
use serde::Deserialize;

use super::{run_checked, CollabError, OrchestratorClient, PodState};

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[derive(Debug, Deserialize)]
struct Pod {
    metadata: PodMetadata,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Debug, Deserialize)]
struct PodMetadata {
    name: String,
    #[serde(default)]
    namespace: String,
}

#[derive(Debug, Default, Deserialize)]
struct PodStatus {
    #[serde(default)]
    phase: Option<String>,
}

/// Parse `kubectl get pods -o json`.
pub fn parse_pod_list(json: &str) -> Result<Vec<PodState>, serde_json::Error> {
    let list: PodList = serde_json::from_str(json)?;
    Ok(list
        .items
        .into_iter()
        .map(|pod| {
            let phase = pod.status.phase.unwrap_or_else(|| "Unknown".to_string());
            PodState::new(pod.metadata.namespace, pod.metadata.name, phase)
        })
        .collect())
}

/// Uses the ambient kubeconfig.
pub struct Kubectl;

#[async_trait]
impl OrchestratorClient for Kubectl {
    async fn get_pod_states(&self, namespace: Option<&str>) -> Result<Vec<PodState>, CollabError> {
        let mut args = vec!["get", "pods", "-o", "json"];
        match namespace {
            Some(ns) => args.extend(["-n", ns]),
            None => args.push("--all-namespaces"),
        }
        let output = run_checked("kubectl", &args).await?;
        parse_pod_list(&output.stdout).map_err(|e| CollabError::Parse {
            command: "kubectl get pods".to_string(),
            detail: e.to_string(),
        })
    }

    async fn scale_resource(&self, pool_id: &str, replicas: u32) -> Result<(), CollabError> {
        let replicas = format!("--replicas={}", replicas);
        run_checked("kubectl", &["scale", pool_id, &replicas]).await?;
        Ok(())
    }
}
