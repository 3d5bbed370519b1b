//! HTTP status probe.

use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{metric, Measurement, Probe, ProbeError, Target};

/// Succeeds iff the response status is in the accepted set.
pub struct HttpProbe {
    client: reqwest::Client,
    accept: Vec<u16>,
}

impl HttpProbe {
    pub fn new(accept: Vec<u16>) -> Result<Self, ProbeError> {
        let accept = if accept.is_empty() { vec![200] } else { accept };
        let client = reqwest::Client::builder()
            .user_agent(concat!("vigil/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProbeError::Config(e.to_string()))?;
        Ok(Self { client, accept })
    }
}

/// Prefix bare hosts with `http://`.
fn normalize_url(address: &str) -> String {
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn measure(&self, target: &Target, timeout: Duration) -> Result<Measurement, ProbeError> {
        let url = normalize_url(target.as_str());
        let start = Instant::now();

        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProbeError::Timeout(timeout)
                } else {
                    ProbeError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();

        // Read the full body so latency covers the complete transfer
        response
            .bytes()
            .await
            .map_err(|e| ProbeError::Network(e.to_string()))?;

        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        let measurement = if self.accept.contains(&status) {
            Measurement::ok()
        } else {
            Measurement::failed(format!("HTTP {}", status))
        };

        Ok(measurement
            .with(metric::STATUS_CODE, status as f64)
            .with(metric::LATENCY_MS, latency_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Router};

    async fn serve(status: StatusCode) -> String {
        let app = Router::new().route("/", get(move || async move { (status, "body") }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/", addr)
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("example.com"), "http://example.com");
        assert_eq!(normalize_url("https://example.com/x"), "https://example.com/x");
    }

    #[tokio::test]
    async fn test_accepted_status() {
        let url = serve(StatusCode::OK).await;
        let probe = HttpProbe::new(vec![]).unwrap();
        let m = probe.measure(&Target::new(url), Duration::from_secs(5)).await.unwrap();
        assert!(m.failure.is_none());
        assert_eq!(m.metrics.get(metric::STATUS_CODE), Some(&200.0));
        assert!(m.metrics.contains_key(metric::LATENCY_MS));
    }

    #[tokio::test]
    async fn test_rejected_status() {
        let url = serve(StatusCode::SERVICE_UNAVAILABLE).await;
        let probe = HttpProbe::new(vec![200, 204]).unwrap();
        let m = probe.measure(&Target::new(url), Duration::from_secs(5)).await.unwrap();
        assert_eq!(m.failure.as_deref(), Some("HTTP 503"));
    }

    #[tokio::test]
    async fn test_unreachable_is_error() {
        let probe = HttpProbe::new(vec![]).unwrap();
        let result = probe
            .measure(&Target::new("http://256.256.256.256"), Duration::from_millis(100))
            .await;
        assert!(result.is_err());
    }
}
