//! Remediation actions triggered by CRITICAL verdicts.
//!
//! Actions are idempotent: applying one twice in a row must leave the
//! target in the same state as applying it once. They never re-probe;
//! whether the fix worked shows up in the next scheduled probe.

mod evict;
mod failover;
mod notify;
mod restart;
mod scale;

pub use evict::*;
pub use failover::*;
pub use notify::*;
pub use restart::*;
pub use scale::*;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::collab::{CollabError, Collaborators, Credentials};
use crate::config::{ConfigError, RemediationSpec};
use crate::policy::Verdict;
use crate::probe::Target;
use crate::task::{run_bounded, Bounded};

/// Remediation error types.
#[derive(Error, Debug)]
pub enum RemediationError {
    #[error("command failed: {0}")]
    Command(String),
    #[error("deleted {deleted} object(s), {failed} failed: {detail}")]
    Partial {
        deleted: usize,
        failed: usize,
        detail: String,
    },
    #[error(transparent)]
    Collab(#[from] CollabError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    Applied(String),
    Skipped(String),
    Failed(String),
}

/// What triggered the remediation.
#[derive(Debug, Clone)]
pub struct VerdictContext {
    pub check: String,
    pub verdict: Verdict,
    pub consecutive_failures: u32,
    pub reasons: Vec<String>,
}

#[async_trait]
pub trait Remediation: Send + Sync {
    /// Short action name for events and logs.
    fn name(&self) -> &'static str;

    async fn apply(&self, target: &Target, ctx: &VerdictContext) -> Result<Outcome, RemediationError>;
}

/// Run an action bounded by `timeout`; faults become `Outcome::Failed`.
pub async fn run_remediation(
    action: Arc<dyn Remediation>,
    target: &Target,
    ctx: VerdictContext,
    timeout: Duration,
) -> Outcome {
    let target = target.clone();
    let outcome = run_bounded(timeout, async move { action.apply(&target, &ctx).await }).await;

    match outcome {
        Bounded::Done(Ok(outcome)) => outcome,
        Bounded::Done(Err(e)) => Outcome::Failed(e.to_string()),
        Bounded::TimedOut => Outcome::Failed(format!("timed out after {:?}", timeout)),
        Bounded::Faulted(detail) => Outcome::Failed(format!("remediation error: {}", detail)),
    }
}

/// Build the action described by `spec`.
pub fn build_remediation(
    spec: &RemediationSpec,
    target: &Target,
    collab: &Collaborators,
) -> Result<Arc<dyn Remediation>, ConfigError> {
    let action: Arc<dyn Remediation> = match spec {
        RemediationSpec::RestartService {
            service,
            host,
            user,
            identity_file,
        } => Arc::new(RestartService {
            exec: collab.exec.clone(),
            service: service.clone(),
            host: host.clone().unwrap_or_else(|| "localhost".to_string()),
            credentials: Credentials {
                user: user.clone(),
                identity_file: identity_file.clone(),
            },
        }),
        RemediationSpec::Scale { pool, replicas } => Arc::new(ScaleResource {
            orchestrator: collab.orchestrator.clone(),
            pool: pool.clone(),
            replicas: *replicas,
        }),
        RemediationSpec::FailoverVip {
            vip,
            prefix,
            interface,
            host,
            user,
            identity_file,
        } => {
            if vip.parse::<IpAddr>().is_err() {
                return Err(ConfigError::Invalid {
                    target: target.to_string(),
                    reason: format!("{} is not an IP address", vip),
                });
            }
            Arc::new(FailoverVip {
                exec: collab.exec.clone(),
                vip: vip.clone(),
                prefix: *prefix,
                interface: interface.clone(),
                host: host.clone().unwrap_or_else(|| "localhost".to_string()),
                credentials: Credentials {
                    user: user.clone(),
                    identity_file: identity_file.clone(),
                },
            })
        }
        RemediationSpec::EvictStale {
            bucket,
            retention_days,
        } => Arc::new(EvictStale {
            objects: collab.objects.clone(),
            bucket: bucket.clone(),
            retention_days: *retention_days,
        }),
        RemediationSpec::Notify { severity, message } => Arc::new(NotifyOnly {
            notifier: collab.notifier.clone(),
            severity: *severity,
            message: message.clone(),
        }),
    };

    Ok(action)
}

#[cfg(test)]
pub(crate) fn test_context() -> VerdictContext {
    VerdictContext {
        check: "web".to_string(),
        verdict: Verdict::Critical,
        consecutive_failures: 3,
        reasons: vec!["HTTP 503".to_string()],
    }
}
