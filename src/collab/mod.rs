//! Collaborator interfaces.
//!
//! Cloud inventory, object storage, the orchestrator, remote command
//! execution and notifications are reached through these narrow traits.
//! The adapters shipped here shell out to `sh`/`ssh`, `kubectl` and `aws`.

mod aws;
mod command;
mod kubectl;
mod notify;

#[cfg(test)]
pub mod testing;

pub use aws::*;
pub use command::*;
pub use kubectl::*;
pub use notify::*;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ServerConfig;

/// Collaborator error types.
#[derive(Error, Debug)]
pub enum CollabError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("`{command}` exited with code {code}: {stderr}")]
    Exit {
        command: String,
        code: i32,
        stderr: String,
    },
    #[error("unexpected output from `{command}`: {detail}")]
    Parse { command: String, detail: String },
    #[error("notification failed: {0}")]
    Notify(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub id: String,
    pub state: String,
}

impl Instance {
    pub fn new(id: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: state.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub key: String,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PodState {
    pub namespace: String,
    pub name: String,
    pub phase: String,
}

impl PodState {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, phase: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            phase: phase.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Login details for remote execution. Secrets stay with the SSH agent or
/// the identity file; nothing sensitive is held here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        })
    }
}

#[async_trait]
pub trait CloudInventory: Send + Sync {
    async fn list_instances(&self, region: &str) -> Result<Vec<Instance>, CollabError>;
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list_objects(&self, bucket: &str) -> Result<Vec<StoredObject>, CollabError>;
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), CollabError>;
}

#[async_trait]
pub trait OrchestratorClient: Send + Sync {
    /// Pods in `namespace`, or in every namespace when `None`.
    async fn get_pod_states(&self, namespace: Option<&str>) -> Result<Vec<PodState>, CollabError>;
    async fn scale_resource(&self, pool_id: &str, replicas: u32) -> Result<(), CollabError>;
}

#[async_trait]
pub trait RemoteExec: Send + Sync {
    /// Run `command` on `host`. A non-zero exit is reported in the output,
    /// not as an error.
    async fn run(
        &self,
        host: &str,
        credentials: &Credentials,
        command: &str,
    ) -> Result<ExecOutput, CollabError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &str, severity: Severity) -> Result<(), CollabError>;
}

/// The collaborators probes and remediations are built against.
#[derive(Clone)]
pub struct Collaborators {
    pub inventory: Arc<dyn CloudInventory>,
    pub objects: Arc<dyn ObjectStore>,
    pub orchestrator: Arc<dyn OrchestratorClient>,
    pub exec: Arc<dyn RemoteExec>,
    pub notifier: Arc<dyn Notifier>,
}

impl Collaborators {
    /// Wire the command-line adapters and the configured notifier.
    pub fn from_config(cfg: &ServerConfig) -> Result<Self, CollabError> {
        let notifier: Arc<dyn Notifier> = match &cfg.webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(url)?),
            None => Arc::new(LogNotifier),
        };
        let aws = Arc::new(AwsCli);

        Ok(Self {
            inventory: aws.clone(),
            objects: aws,
            orchestrator: Arc::new(Kubectl),
            exec: Arc::new(CommandExec),
            notifier,
        })
    }
}
