//! Delete stored objects older than a retention period.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};

use super::{Outcome, Remediation, RemediationError, VerdictContext};
use crate::collab::ObjectStore;
use crate::probe::Target;

pub struct EvictStale {
    pub objects: Arc<dyn ObjectStore>,
    /// Defaults to the check target.
    pub bucket: Option<String>,
    pub retention_days: u32,
}

#[async_trait]
impl Remediation for EvictStale {
    fn name(&self) -> &'static str {
        "evict_stale"
    }

    async fn apply(&self, target: &Target, _ctx: &VerdictContext) -> Result<Outcome, RemediationError> {
        let bucket = self.bucket.as_deref().unwrap_or(target.as_str());
        let cutoff = Utc::now() - ChronoDuration::days(self.retention_days as i64);

        let stale: Vec<String> = self
            .objects
            .list_objects(bucket)
            .await?
            .into_iter()
            .filter(|o| o.last_modified < cutoff)
            .map(|o| o.key)
            .collect();

        if stale.is_empty() {
            return Ok(Outcome::Skipped(format!(
                "no objects older than {} days in {}",
                self.retention_days, bucket
            )));
        }

        let mut deleted = 0;
        let mut errors = Vec::new();
        for key in &stale {
            match self.objects.delete_object(bucket, key).await {
                Ok(()) => {
                    tracing::debug!(%bucket, %key, "deleted stale object");
                    deleted += 1;
                }
                Err(e) => errors.push(format!("{}: {}", key, e)),
            }
        }

        if !errors.is_empty() {
            return Err(RemediationError::Partial {
                deleted,
                failed: errors.len(),
                detail: errors.join("; "),
            });
        }

        tracing::info!(%bucket, deleted, "evicted stale objects");
        Ok(Outcome::Applied(format!("deleted {} stale object(s) from {}", deleted, bucket)))
    }
}
