//! Restart a systemd service.

use std::sync::Arc;

use async_trait::async_trait;

use super::{Outcome, Remediation, RemediationError, VerdictContext};
use crate::collab::{Credentials, RemoteExec};
use crate::probe::Target;

/// Restarts the service unless it is already active.
pub struct RestartService {
    pub exec: Arc<dyn RemoteExec>,
    /// Defaults to the check target.
    pub service: Option<String>,
    pub host: String,
    pub credentials: Credentials,
}

#[async_trait]
impl Remediation for RestartService {
    fn name(&self) -> &'static str {
        "restart_service"
    }

    async fn apply(&self, target: &Target, _ctx: &VerdictContext) -> Result<Outcome, RemediationError> {
        let service = self.service.as_deref().unwrap_or(target.as_str());

        let status = self
            .exec
            .run(&self.host, &self.credentials, &format!("systemctl is-active --quiet {}", service))
            .await?;
        if status.success() {
            return Ok(Outcome::Skipped(format!("{} already active on {}", service, self.host)));
        }

        let restart = self
            .exec
            .run(&self.host, &self.credentials, &format!("systemctl restart {}", service))
            .await?;
        if !restart.success() {
            return Err(RemediationError::Command(format!(
                "systemctl restart {} exited with {}: {}",
                service,
                restart.exit_code,
                restart.stderr.trim()
            )));
        }

        tracing::info!(%service, host = %self.host, "service restarted");
        Ok(Outcome::Applied(format!("restarted {} on {}", service, self.host)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::testing::FakeExec;
    use crate::remediation::test_context;
    use tokio_test::{assert_err, assert_ok};

    fn action(exec: Arc<FakeExec>) -> RestartService {
        RestartService {
            exec,
            service: None,
            host: "localhost".to_string(),
            credentials: Credentials::default(),
        }
    }

    #[tokio::test]
    async fn test_restarts_inactive_service() {
        let exec = Arc::new(FakeExec::new());
        exec.respond("systemctl is-active --quiet nginx", 3, "");
        let outcome = action(exec.clone()).apply(&Target::new("nginx"), &test_context()).await.unwrap();
        assert_eq!(outcome, Outcome::Applied("restarted nginx on localhost".to_string()));
        assert_eq!(exec.commands().last().unwrap(), "systemctl restart nginx");
    }

    #[tokio::test]
    async fn test_running_service_is_noop_twice() {
        let exec = Arc::new(FakeExec::new());
        exec.respond("systemctl is-active --quiet nginx", 0, "");
        let restart = action(exec.clone());
        let target = Target::new("nginx");

        for _ in 0..2 {
            let outcome = assert_ok!(restart.apply(&target, &test_context()).await);
            assert!(matches!(outcome, Outcome::Skipped(_)));
        }
        assert!(!exec.commands().iter().any(|c| c.starts_with("systemctl restart")));
    }

    #[tokio::test]
    async fn test_failed_restart_is_error() {
        let exec = Arc::new(FakeExec::new());
        exec.respond("systemctl is-active --quiet nginx", 3, "");
        exec.respond("systemctl restart nginx", 1, "");
        let err = assert_err!(action(exec).apply(&Target::new("nginx"), &test_context()).await);
        assert!(matches!(err, RemediationError::Command(_)));
    }
}
