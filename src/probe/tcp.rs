//! TCP connect probe.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::TcpStream;

use super::{metric, Measurement, Probe, ProbeError, Target};

/// Succeeds iff a TCP connection to `host:port` completes in time.
pub struct TcpProbe;

#[async_trait]
impl Probe for TcpProbe {
    async fn measure(&self, target: &Target, timeout: Duration) -> Result<Measurement, ProbeError> {
        let start = Instant::now();
        let stream = tokio::time::timeout(timeout, TcpStream::connect(target.as_str()))
            .await
            .map_err(|_| ProbeError::Timeout(timeout))?
            .map_err(|e| ProbeError::Network(format!("connect to {} failed: {}", target, e)))?;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        drop(stream);

        Ok(Measurement::ok().with(metric::LATENCY_MS, latency_ms))
    }
}
