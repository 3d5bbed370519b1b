//! Scale an orchestrator resource to a fixed replica count.

use std::sync::Arc;

use async_trait::async_trait;

use super::{Outcome, Remediation, RemediationError, VerdictContext};
use crate::collab::OrchestratorClient;
use crate::probe::Target;

/// Sets an absolute replica count, so repeating it changes nothing.
pub struct ScaleResource {
    pub orchestrator: Arc<dyn OrchestratorClient>,
    pub pool: String,
    pub replicas: u32,
}

#[async_trait]
impl Remediation for ScaleResource {
    fn name(&self) -> &'static str {
        "scale"
    }

    async fn apply(&self, _target: &Target, _ctx: &VerdictContext) -> Result<Outcome, RemediationError> {
        self.orchestrator.scale_resource(&self.pool, self.replicas).await?;
        tracing::info!(pool = %self.pool, replicas = self.replicas, "scaled resource");
        Ok(Outcome::Applied(format!("scaled {} to {} replicas", self.pool, self.replicas)))
    }
}
