//! In-memory collaborators for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::*;

/// Scripted command runner. Unscripted commands succeed with no output.
#[derive(Default)]
pub struct FakeExec {
    responses: Mutex<HashMap<String, ExecOutput>>,
    pub calls: Mutex<Vec<(String, String)>>,
}

impl FakeExec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, command: &str, exit_code: i32, stdout: &str) {
        self.responses.lock().unwrap().insert(
            command.to_string(),
            ExecOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
                exit_code,
            },
        );
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(_, c)| c.clone()).collect()
    }
}

#[async_trait]
impl RemoteExec for FakeExec {
    async fn run(
        &self,
        host: &str,
        _credentials: &Credentials,
        command: &str,
    ) -> Result<ExecOutput, CollabError> {
        self.calls
            .lock()
            .unwrap()
            .push((host.to_string(), command.to_string()));
        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(command)
            .cloned()
            .unwrap_or_default())
    }
}

pub struct FakeInventory {
    instances: Vec<Instance>,
}

impl FakeInventory {
    pub fn new(instances: Vec<Instance>) -> Self {
        Self { instances }
    }
}

#[async_trait]
impl CloudInventory for FakeInventory {
    async fn list_instances(&self, _region: &str) -> Result<Vec<Instance>, CollabError> {
        Ok(self.instances.clone())
    }
}

pub struct FakeOrchestrator {
    pods: Vec<PodState>,
    pub scaled: Mutex<Vec<(String, u32)>>,
}

impl FakeOrchestrator {
    pub fn new(pods: Vec<PodState>) -> Self {
        Self {
            pods,
            scaled: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl OrchestratorClient for FakeOrchestrator {
    async fn get_pod_states(&self, namespace: Option<&str>) -> Result<Vec<PodState>, CollabError> {
        Ok(self
            .pods
            .iter()
            .filter(|p| namespace.map_or(true, |ns| p.namespace == ns))
            .cloned()
            .collect())
    }

    async fn scale_resource(&self, pool_id: &str, replicas: u32) -> Result<(), CollabError> {
        self.scaled.lock().unwrap().push((pool_id.to_string(), replicas));
        Ok(())
    }
}

/// Object store that forgets deleted keys. Keys listed in `undeletable`
/// fail to delete.
#[derive(Default)]
pub struct FakeObjectStore {
    pub objects: Mutex<Vec<StoredObject>>,
    pub undeletable: Vec<String>,
}

impl FakeObjectStore {
    pub fn new(objects: Vec<StoredObject>) -> Self {
        Self {
            objects: Mutex::new(objects),
            undeletable: Vec::new(),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().iter().map(|o| o.key.clone()).collect()
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn list_objects(&self, _bucket: &str) -> Result<Vec<StoredObject>, CollabError> {
        Ok(self.objects.lock().unwrap().clone())
    }

    async fn delete_object(&self, _bucket: &str, key: &str) -> Result<(), CollabError> {
        if self.undeletable.iter().any(|k| k == key) {
            return Err(CollabError::Exit {
                command: format!("delete {}", key),
                code: 1,
                stderr: "AccessDenied".to_string(),
            });
        }
        self.objects.lock().unwrap().retain(|o| o.key != key);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, Severity)>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<(String, Severity)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: &str, severity: Severity) -> Result<(), CollabError> {
        self.sent.lock().unwrap().push((message.to_string(), severity));
        Ok(())
    }
}

/// A full set of fakes, kept typed so tests can inspect them.
pub struct Fakes {
    pub exec: Arc<FakeExec>,
    pub inventory: Arc<FakeInventory>,
    pub orchestrator: Arc<FakeOrchestrator>,
    pub objects: Arc<FakeObjectStore>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Fakes {
    pub fn new() -> Self {
        Self {
            exec: Arc::new(FakeExec::new()),
            inventory: Arc::new(FakeInventory::new(Vec::new())),
            orchestrator: Arc::new(FakeOrchestrator::new(Vec::new())),
            objects: Arc::new(FakeObjectStore::default()),
            notifier: Arc::new(RecordingNotifier::default()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            inventory: self.inventory.clone(),
            objects: self.objects.clone(),
            orchestrator: self.orchestrator.clone(),
            exec: self.exec.clone(),
            notifier: self.notifier.clone(),
        }
    }
}
