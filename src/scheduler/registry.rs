//! Check registry, built once at load time and read-only afterwards.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::collab::Collaborators;
use crate::config::{CheckConfig, ConfigError};
use crate::policy::Policy;
use crate::probe::{build_probe, Probe, Target};
use crate::remediation::{build_remediation, NotifyOnly, Remediation};

/// Stable index of a check in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CheckId(pub usize);

impl fmt::Display for CheckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A target bound to its probe, policy and optional remediation.
pub struct Check {
    pub id: CheckId,
    pub name: String,
    pub target: Target,
    pub probe_kind: &'static str,
    pub probe: Arc<dyn Probe>,
    pub policy: Policy,
    pub remediation: Option<Arc<dyn Remediation>>,
    pub interval: Duration,
    pub cooldown: Duration,
    pub timeout: Duration,
}

impl fmt::Debug for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Check")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("target", &self.target)
            .field("probe", &self.probe_kind)
            .field("remediation", &self.remediation.as_ref().map(|r| r.name()))
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    checks: Vec<Check>,
}

impl Registry {
    /// Build probes and remediations for every check. Rejects duplicate
    /// (target, probe kind) pairs.
    pub fn build(configs: &[CheckConfig], collab: &Collaborators) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        let mut registry = Self::default();

        for cfg in configs {
            let kind = cfg.probe.kind();
            if !seen.insert((cfg.target.clone(), kind)) {
                return Err(ConfigError::Duplicate {
                    target: cfg.target.to_string(),
                    kind: kind.to_string(),
                });
            }
            let check = Check {
                id: CheckId(registry.len()),
                name: cfg.display_name(),
                target: cfg.target.clone(),
                probe_kind: kind,
                probe: build_probe(&cfg.probe, &cfg.target, collab)?,
                policy: cfg.policy.clone(),
                remediation: cfg
                    .remediation
                    .as_ref()
                    .map(|spec| build_remediation(spec, &cfg.target, collab))
                    .transpose()?,
                interval: cfg.interval(),
                cooldown: cfg.cooldown(),
                timeout: cfg.timeout(),
            };
            tracing::debug!(
                check = %check.name,
                probe = kind,
                remediation = ?cfg.remediation.as_ref().map(|r| r.kind()),
                "Registered check"
            );
            registry.push(check);
        }

        Ok(registry)
    }

    /// Add a prepared check; its id is replaced with the next free one.
    pub fn push(&mut self, mut check: Check) -> CheckId {
        let id = CheckId(self.checks.len());
        check.id = id;
        self.checks.push(check);
        id
    }

    /// Checks whose remediation is a notification.
    pub fn notifying(&self) -> impl Iterator<Item = CheckId> + '_ {
        self.checks
            .iter()
            .filter(|c| c.remediation.as_ref().is_some_and(|r| r.name() == NotifyOnly::NAME))
            .map(|c| c.id)
    }

    pub fn get(&self, id: CheckId) -> Option<&Check> {
        self.checks.get(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Check> {
        self.checks.iter()
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}
