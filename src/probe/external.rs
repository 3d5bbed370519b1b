//! External-state probes.
//!
//! The state itself comes from a collaborator (cloud inventory,
//! orchestrator, service manager); the probe only compares what it gets
//! against the accepted set.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{metric, Measurement, Probe, ProbeError, Target};
use crate::collab::{CloudInventory, CollabError, Credentials, OrchestratorClient, RemoteExec};

/// A named thing and the state it reported.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedState {
    pub name: String,
    pub state: String,
}

/// Read-only source of states for a target.
#[async_trait]
pub trait StateSource: Send + Sync {
    async fn states(&self, target: &Target) -> Result<Vec<ObservedState>, CollabError>;
}

/// Instance states in the region named by the target.
pub struct InstanceStates {
    pub inventory: Arc<dyn CloudInventory>,
    /// Restrict to these instances; all instances when empty.
    pub instance_ids: Vec<String>,
}

#[async_trait]
impl StateSource for InstanceStates {
    async fn states(&self, target: &Target) -> Result<Vec<ObservedState>, CollabError> {
        let instances = self.inventory.list_instances(target.as_str()).await?;
        Ok(instances
            .into_iter()
            .filter(|i| self.instance_ids.is_empty() || self.instance_ids.contains(&i.id))
            .map(|i| ObservedState {
                name: i.id,
                state: i.state,
            })
            .collect())
    }
}

/// Pod phases in the namespace named by the target (`*` for all).
pub struct PodPhases {
    pub orchestrator: Arc<dyn OrchestratorClient>,
}

#[async_trait]
impl StateSource for PodPhases {
    async fn states(&self, target: &Target) -> Result<Vec<ObservedState>, CollabError> {
        let namespace = match target.as_str() {
            "" | "*" => None,
            ns => Some(ns),
        };
        let pods = self.orchestrator.get_pod_states(namespace).await?;
        Ok(pods
            .into_iter()
            .map(|p| ObservedState {
                name: format!("{}/{}", p.namespace, p.name),
                state: p.phase,
            })
            .collect())
    }
}

/// `systemctl is-active` for the service named by the target.
pub struct ServiceStates {
    pub exec: Arc<dyn RemoteExec>,
    pub host: String,
    pub credentials: Credentials,
}

#[async_trait]
impl StateSource for ServiceStates {
    async fn states(&self, target: &Target) -> Result<Vec<ObservedState>, CollabError> {
        let command = format!("systemctl is-active {}", target);
        // is-active exits non-zero for inactive units; stdout still names the state
        let output = self.exec.run(&self.host, &self.credentials, &command).await?;
        let state = output.stdout.trim();
        if state.is_empty() {
            return Err(CollabError::Parse {
                command,
                detail: output.stderr.trim().to_string(),
            });
        }
        Ok(vec![ObservedState {
            name: target.to_string(),
            state: state.to_string(),
        }])
    }
}

/// Succeeds iff every reported state is in the accepted set
/// (case-insensitive).
pub struct ExternalStateProbe {
    source: Box<dyn StateSource>,
    accepted: Vec<String>,
}

impl ExternalStateProbe {
    pub fn new(source: Box<dyn StateSource>, accepted: Vec<String>) -> Self {
        Self { source, accepted }
    }

    fn is_accepted(&self, state: &str) -> bool {
        self.accepted.iter().any(|a| a.eq_ignore_ascii_case(state))
    }
}

#[async_trait]
impl Probe for ExternalStateProbe {
    async fn measure(&self, target: &Target, _timeout: Duration) -> Result<Measurement, ProbeError> {
        let states = self.source.states(target).await?;
        let rejected: Vec<&ObservedState> =
            states.iter().filter(|s| !self.is_accepted(&s.state)).collect();

        let measurement = if states.is_empty() {
            Measurement::failed(format!("no state reported for {}", target))
        } else if rejected.is_empty() {
            Measurement::ok()
        } else {
            let listed: Vec<String> = rejected
                .iter()
                .take(5)
                .map(|s| format!("{}={}", s.name, s.state))
                .collect();
            Measurement::failed(format!(
                "{} of {} not in accepted states: {}",
                rejected.len(),
                states.len(),
                listed.join(", ")
            ))
        };

        Ok(measurement
            .with(metric::TOTAL, states.len() as f64)
            .with(metric::UNACCEPTED, rejected.len() as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::testing::{FakeExec, FakeInventory, FakeOrchestrator};
    use crate::collab::{Instance, PodState};

    fn accepted(states: &[&str]) -> Vec<String> {
        states.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_instances_all_running() {
        let inventory = Arc::new(FakeInventory::new(vec![
            Instance::new("i-1", "running"),
            Instance::new("i-2", "running"),
        ]));
        let probe = ExternalStateProbe::new(
            Box::new(InstanceStates {
                inventory,
                instance_ids: vec![],
            }),
            accepted(&["running"]),
        );
        let m = probe.measure(&Target::new("eu-west-1"), Duration::from_secs(1)).await.unwrap();
        assert!(m.failure.is_none());
        assert_eq!(m.metrics[metric::TOTAL], 2.0);
    }

    #[tokio::test]
    async fn test_instance_filter_and_rejection() {
        let inventory = Arc::new(FakeInventory::new(vec![
            Instance::new("i-1", "running"),
            Instance::new("i-2", "stopped"),
            Instance::new("i-3", "stopped"),
        ]));
        let probe = ExternalStateProbe::new(
            Box::new(InstanceStates {
                inventory,
                instance_ids: vec!["i-1".to_string(), "i-2".to_string()],
            }),
            accepted(&["running"]),
        );
        let m = probe.measure(&Target::new("eu-west-1"), Duration::from_secs(1)).await.unwrap();
        assert_eq!(m.failure.as_deref(), Some("1 of 2 not in accepted states: i-2=stopped"));
        assert_eq!(m.metrics[metric::UNACCEPTED], 1.0);
    }

    #[tokio::test]
    async fn test_pod_phases_case_insensitive() {
        let orchestrator = Arc::new(FakeOrchestrator::new(vec![
            PodState::new("web", "api-0", "Running"),
            PodState::new("web", "api-1", "running"),
        ]));
        let probe = ExternalStateProbe::new(
            Box::new(PodPhases { orchestrator }),
            accepted(&["Running", "Succeeded"]),
        );
        let m = probe.measure(&Target::new("web"), Duration::from_secs(1)).await.unwrap();
        assert!(m.failure.is_none());
    }

    #[tokio::test]
    async fn test_empty_report_fails() {
        let orchestrator = Arc::new(FakeOrchestrator::new(vec![]));
        let probe = ExternalStateProbe::new(Box::new(PodPhases { orchestrator }), accepted(&["Running"]));
        let m = probe.measure(&Target::new("*"), Duration::from_secs(1)).await.unwrap();
        assert!(m.failure.is_some());
    }

    #[tokio::test]
    async fn test_service_state_from_systemctl() {
        let exec = Arc::new(FakeExec::new());
        exec.respond("systemctl is-active nginx", 3, "inactive\n");
        let probe = ExternalStateProbe::new(
            Box::new(ServiceStates {
                exec: exec.clone(),
                host: "localhost".to_string(),
                credentials: Credentials::default(),
            }),
            accepted(&["active"]),
        );
        let m = probe.measure(&Target::new("nginx"), Duration::from_secs(1)).await.unwrap();
        assert_eq!(m.failure.as_deref(), Some("1 of 1 not in accepted states: nginx=inactive"));
    }
}
