//! Probe module for health measurements.
//!
//! Probes are read-only: they measure a target and report raw metrics.
//! Whether a measurement is healthy is decided by the policy evaluator,
//! except for the plain pass/fail criteria each probe owns (accepted HTTP
//! statuses, accepted external states, connect success).

mod external;
mod file;
mod http;
mod ping;
mod resource;
mod tcp;
mod tls;

pub use external::*;
pub use file::*;
pub use http::*;
pub use ping::*;
pub use resource::*;
pub use tcp::*;
pub use tls::*;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::collab::{CollabError, Collaborators, Credentials};
use crate::config::{ConfigError, ProbeSpec};
use crate::task::{run_bounded, Bounded};

/// Well-known metric names reported by the built-in probes.
pub mod metric {
    pub const LATENCY_MS: &str = "latency_ms";
    pub const STATUS_CODE: &str = "status_code";
    pub const DAYS_LEFT: &str = "days_left";
    pub const PERCENT_USED: &str = "percent_used";
    pub const TOTAL: &str = "total";
    pub const UNACCEPTED: &str = "unaccepted";
    pub const MATCHES: &str = "matches";
    pub const CHANGED: &str = "changed";
}

/// Named numeric measurements.
pub type Metrics = BTreeMap<String, f64>;

/// Identity of the thing being checked: a URL, `host:port`, domain,
/// service name, bucket, region, namespace or file path depending on the
/// probe kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Target(String);

impl Target {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("command failed: {0}")]
    Command(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Collab(#[from] CollabError),
}

/// Outcome status of a single probe run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ProbeStatus {
    Success,
    Failure(String),
    Timeout,
}

/// An immutable probe result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    pub timestamp: DateTime<Utc>,
    pub status: ProbeStatus,
    pub metrics: Metrics,
}

impl ProbeResult {
    pub fn success(metrics: Metrics) -> Self {
        Self {
            timestamp: Utc::now(),
            status: ProbeStatus::Success,
            metrics,
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            status: ProbeStatus::Failure(reason.into()),
            metrics: Metrics::new(),
        }
    }

    pub fn timeout() -> Self {
        Self {
            timestamp: Utc::now(),
            status: ProbeStatus::Timeout,
            metrics: Metrics::new(),
        }
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

/// What a probe measured. `failure` is set when the probe's own pass
/// criterion was not met; metrics are kept either way.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Measurement {
    pub metrics: Metrics,
    pub failure: Option<String>,
}

impl Measurement {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            metrics: Metrics::new(),
            failure: Some(reason.into()),
        }
    }

    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.metrics.insert(name.to_string(), value);
        self
    }
}

/// A read-only measurement capability.
///
/// Implementations must not keep mutable state between calls.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn measure(&self, target: &Target, timeout: Duration) -> Result<Measurement, ProbeError>;
}

/// Run a probe, bounding it by `timeout` and converting every fault into a
/// typed result. Never panics and never blocks past the timeout.
pub async fn run_probe(probe: Arc<dyn Probe>, target: &Target, timeout: Duration) -> ProbeResult {
    let target = target.clone();
    let outcome = run_bounded(timeout, async move { probe.measure(&target, timeout).await }).await;

    match outcome {
        Bounded::Done(Ok(measurement)) => {
            let mut result = match measurement.failure {
                Some(reason) => ProbeResult::failure(reason),
                None => ProbeResult::success(Metrics::new()),
            };
            result.metrics = measurement.metrics;
            result
        }
        Bounded::Done(Err(ProbeError::Timeout(_))) | Bounded::TimedOut => ProbeResult::timeout(),
        Bounded::Done(Err(e)) => ProbeResult::failure(format!("probe error: {}", e)),
        Bounded::Faulted(detail) => ProbeResult::failure(format!("probe error: {}", detail)),
    }
}

/// Build the probe described by `spec` for `target`.
pub fn build_probe(
    spec: &ProbeSpec,
    target: &Target,
    collab: &Collaborators,
) -> Result<Arc<dyn Probe>, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        target: target.to_string(),
        reason,
    };

    let probe: Arc<dyn Probe> = match spec {
        ProbeSpec::Http { accept } => {
            Arc::new(HttpProbe::new(accept.clone()).map_err(|e| invalid(e.to_string()))?)
        }
        ProbeSpec::Tcp => {
            if !target.as_str().contains(':') {
                return Err(invalid("tcp target must be host:port".to_string()));
            }
            Arc::new(TcpProbe)
        }
        ProbeSpec::Tls { port, verify } => {
            Arc::new(TlsExpiryProbe::new(*port, *verify).map_err(|e| invalid(e.to_string()))?)
        }
        ProbeSpec::Resource { resource } => Arc::new(ResourceProbe::new(*resource)),
        ProbeSpec::Ping => Arc::new(PingProbe),
        ProbeSpec::ServiceState {
            host,
            user,
            identity_file,
            accepted,
        } => {
            let source = ServiceStates {
                exec: collab.exec.clone(),
                host: host.clone().unwrap_or_else(|| "localhost".to_string()),
                credentials: Credentials {
                    user: user.clone(),
                    identity_file: identity_file.clone(),
                },
            };
            Arc::new(ExternalStateProbe::new(
                Box::new(source),
                accepted.clone().unwrap_or_else(|| vec!["active".to_string()]),
            ))
        }
        ProbeSpec::PodPhase { accepted } => Arc::new(ExternalStateProbe::new(
            Box::new(PodPhases {
                orchestrator: collab.orchestrator.clone(),
            }),
            accepted
                .clone()
                .unwrap_or_else(|| vec!["Running".to_string(), "Succeeded".to_string()]),
        )),
        ProbeSpec::InstanceState {
            instance_ids,
            accepted,
        } => Arc::new(ExternalStateProbe::new(
            Box::new(InstanceStates {
                inventory: collab.inventory.clone(),
                instance_ids: instance_ids.clone(),
            }),
            accepted.clone().unwrap_or_else(|| vec!["running".to_string()]),
        )),
        ProbeSpec::FileIntegrity { sha256 } => {
            let baseline = match sha256 {
                Some(digest) => digest.to_ascii_lowercase(),
                None => sha256_file(target.as_str())
                    .map_err(|e| invalid(format!("cannot read baseline: {}", e)))?,
            };
            Arc::new(FileIntegrityProbe::new(baseline))
        }
        ProbeSpec::LogPattern { pattern } => {
            Arc::new(LogPatternProbe::new(pattern).map_err(|e| invalid(e.to_string()))?)
        }
    };

    Ok(probe)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Result<Measurement, &'static str>);

    #[async_trait]
    impl Probe for Fixed {
        async fn measure(&self, _: &Target, _: Duration) -> Result<Measurement, ProbeError> {
            self.0.clone().map_err(|e| ProbeError::Network(e.to_string()))
        }
    }

    struct Hangs;

    #[async_trait]
    impl Probe for Hangs {
        async fn measure(&self, _: &Target, _: Duration) -> Result<Measurement, ProbeError> {
            std::future::pending().await
        }
    }

    struct Panics;

    #[async_trait]
    impl Probe for Panics {
        async fn measure(&self, _: &Target, _: Duration) -> Result<Measurement, ProbeError> {
            panic!("sensor exploded")
        }
    }

    fn target() -> Target {
        Target::new("example")
    }

    #[tokio::test]
    async fn test_failed_measurement_keeps_metrics() {
        let probe = Arc::new(Fixed(Ok(Measurement::failed("HTTP 503").with(metric::STATUS_CODE, 503.0))));
        let result = run_probe(probe, &target(), Duration::from_secs(1)).await;
        assert_eq!(result.status, ProbeStatus::Failure("HTTP 503".to_string()));
        assert_eq!(result.metric(metric::STATUS_CODE), Some(503.0));
    }

    #[tokio::test]
    async fn test_probe_error_becomes_failure() {
        let probe = Arc::new(Fixed(Err("connection refused")));
        let result = run_probe(probe, &target(), Duration::from_secs(1)).await;
        match result.status {
            ProbeStatus::Failure(reason) => assert!(reason.starts_with("probe error:")),
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_probe_times_out() {
        let result = run_probe(Arc::new(Hangs), &target(), Duration::from_secs(2)).await;
        assert_eq!(result.status, ProbeStatus::Timeout);
    }

    #[tokio::test]
    async fn test_panicking_probe_is_contained() {
        let result = run_probe(Arc::new(Panics), &target(), Duration::from_secs(1)).await;
        match result.status {
            ProbeStatus::Failure(reason) => assert!(reason.starts_with("probe error:")),
            other => panic!("unexpected status {:?}", other),
        }
    }
}
