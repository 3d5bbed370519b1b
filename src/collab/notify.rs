//! Notifiers.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::time::Duration;

use super::{CollabError, Notifier, Severity};

/// Writes notifications to the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: &str, severity: Severity) -> Result<(), CollabError> {
        match severity {
            Severity::Info => tracing::info!(%severity, "{}", message),
            Severity::Warning => tracing::warn!(%severity, "{}", message),
            Severity::Critical => tracing::error!(%severity, "{}", message),
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    message: &'a str,
    severity: Severity,
    timestamp: String,
}

/// POSTs a JSON payload to a webhook endpoint.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Result<Self, CollabError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CollabError::Notify(e.to_string()))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, message: &str, severity: Severity) -> Result<(), CollabError> {
        let payload = WebhookPayload {
            message,
            severity,
            timestamp: Utc::now().to_rfc3339(),
        };
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| CollabError::Notify(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CollabError::Notify(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_webhook_posts_json() {
        let received: Arc<Mutex<Vec<serde_json::Value>>> = Arc::default();
        let app = Router::new()
            .route(
                "/hook",
                post(
                    |State(store): State<Arc<Mutex<Vec<serde_json::Value>>>>,
                     Json(body): Json<serde_json::Value>| async move {
                        store.lock().unwrap().push(body);
                        StatusCode::NO_CONTENT
                    },
                ),
            )
            .with_state(received.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let notifier = WebhookNotifier::new(&format!("http://{}/hook", addr)).unwrap();
        notifier.send("disk almost full", Severity::Warning).await.unwrap();

        let bodies = received.lock().unwrap();
        assert_eq!(bodies[0]["message"], "disk almost full");
        assert_eq!(bodies[0]["severity"], "warning");
    }

    #[tokio::test]
    async fn test_webhook_rejection_is_error() {
        let app = Router::new().route("/hook", post(|| async { StatusCode::INTERNAL_SERVER_ERROR }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let notifier = WebhookNotifier::new(&format!("http://{}/hook", addr)).unwrap();
        assert!(notifier.send("x", Severity::Info).await.is_err());
    }
}
