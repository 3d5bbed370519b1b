//! Move a virtual IP onto this node.

use std::sync::Arc;

use async_trait::async_trait;

use super::{Outcome, Remediation, RemediationError, VerdictContext};
use crate::collab::{Credentials, RemoteExec};
use crate::probe::Target;

pub struct FailoverVip {
    pub exec: Arc<dyn RemoteExec>,
    pub vip: String,
    pub prefix: u8,
    pub interface: String,
    /// Node that takes over the address.
    pub host: String,
    pub credentials: Credentials,
}

impl FailoverVip {
    fn is_bound(&self, addr_output: &str) -> bool {
        let needle = format!("inet {}/", self.vip);
        let needle6 = format!("inet6 {}/", self.vip);
        addr_output.contains(&needle) || addr_output.contains(&needle6)
    }
}

#[async_trait]
impl Remediation for FailoverVip {
    fn name(&self) -> &'static str {
        "failover_vip"
    }

    async fn apply(&self, _target: &Target, _ctx: &VerdictContext) -> Result<Outcome, RemediationError> {
        let show = self
            .exec
            .run(&self.host, &self.credentials, &format!("ip -o addr show dev {}", self.interface))
            .await?;
        if !show.success() {
            return Err(RemediationError::Command(format!(
                "cannot inspect {}: {}",
                self.interface,
                show.stderr.trim()
            )));
        }
        if self.is_bound(&show.stdout) {
            return Ok(Outcome::Skipped(format!(
                "{} already bound to {} on {}",
                self.vip, self.interface, self.host
            )));
        }

        let add = format!("ip addr add {}/{} dev {}", self.vip, self.prefix, self.interface);
        let output = self.exec.run(&self.host, &self.credentials, &add).await?;
        if !output.success() {
            return Err(RemediationError::Command(format!("{}: {}", add, output.stderr.trim())));
        }

        tracing::warn!(vip = %self.vip, host = %self.host, "virtual IP failed over");
        Ok(Outcome::Applied(format!(
            "bound {}/{} to {} on {}",
            self.vip, self.prefix, self.interface, self.host
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::testing::FakeExec;
    use crate::remediation::test_context;

    fn action(exec: Arc<FakeExec>) -> FailoverVip {
        FailoverVip {
            exec,
            vip: "10.0.0.50".to_string(),
            prefix: 24,
            interface: "eth0".to_string(),
            host: "standby".to_string(),
            credentials: Credentials::default(),
        }
    }

    #[tokio::test]
    async fn test_binds_missing_vip() {
        let exec = Arc::new(FakeExec::new());
        exec.respond(
            "ip -o addr show dev eth0",
            0,
            "2: eth0    inet 10.0.0.12/24 brd 10.0.0.255 scope global eth0",
        );
        let outcome = action(exec.clone()).apply(&Target::new("10.0.0.50:443"), &test_context()).await.unwrap();
        assert!(matches!(outcome, Outcome::Applied(_)));
        assert_eq!(exec.commands().last().unwrap(), "ip addr add 10.0.0.50/24 dev eth0");
    }

    #[tokio::test]
    async fn test_already_bound_is_skipped() {
        let exec = Arc::new(FakeExec::new());
        exec.respond(
            "ip -o addr show dev eth0",
            0,
            "2: eth0    inet 10.0.0.12/24 scope global eth0\n2: eth0    inet 10.0.0.50/24 scope global secondary eth0",
        );
        let outcome = action(exec.clone()).apply(&Target::new("10.0.0.50:443"), &test_context()).await.unwrap();
        assert!(matches!(outcome, Outcome::Skipped(_)));
        assert_eq!(exec.commands().len(), 1);
    }
}
