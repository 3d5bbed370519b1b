//! Notify-only remediation.

use std::sync::Arc;

use async_trait::async_trait;

use super::{Outcome, Remediation, RemediationError, VerdictContext};
use crate::collab::{Notifier, Severity};
use crate::probe::Target;

pub struct NotifyOnly {
    pub notifier: Arc<dyn Notifier>,
    pub severity: Severity,
    /// Replaces the generated message when set.
    pub message: Option<String>,
}

impl NotifyOnly {
    pub const NAME: &'static str = "notify";
}

fn describe(target: &Target, ctx: &VerdictContext) -> String {
    format!(
        "[{:?}] {} ({}) failing {} time(s) in a row: {}",
        ctx.verdict,
        ctx.check,
        target,
        ctx.consecutive_failures,
        ctx.reasons.join("; ")
    )
}

#[async_trait]
impl Remediation for NotifyOnly {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn apply(&self, target: &Target, ctx: &VerdictContext) -> Result<Outcome, RemediationError> {
        let message = self.message.clone().unwrap_or_else(|| describe(target, ctx));
        self.notifier.send(&message, self.severity).await?;
        Ok(Outcome::Applied(format!("{} notification sent", self.severity)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::testing::RecordingNotifier;
    use crate::remediation::test_context;

    #[tokio::test]
    async fn test_sends_generated_message() {
        let notifier = Arc::new(RecordingNotifier::default());
        let action = NotifyOnly {
            notifier: notifier.clone(),
            severity: Severity::Critical,
            message: None,
        };
        let outcome = action.apply(&Target::new("https://shop"), &test_context()).await.unwrap();
        assert_eq!(outcome, Outcome::Applied("critical notification sent".to_string()));

        let sent = notifier.messages();
        assert_eq!(
            sent[0],
            (
                "[Critical] web (https://shop) failing 3 time(s) in a row: HTTP 503".to_string(),
                Severity::Critical
            )
        );
    }
}
