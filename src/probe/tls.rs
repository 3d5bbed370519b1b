//! TLS certificate expiry probe.
//!
//! Performs a handshake, reads the leaf certificate's `notAfter` and
//! reports `days_left`. The probe never decides whether that is enough;
//! thresholds live in the policy.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use super::{metric, Measurement, Probe, ProbeError, Target};

pub struct TlsExpiryProbe {
    port: u16,
    connector: TlsConnector,
}

impl TlsExpiryProbe {
    /// With `verify` unset the chain is not validated, so expired or
    /// self-signed certificates are still measured.
    pub fn new(port: u16, verify: bool) -> Result<Self, ProbeError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| ProbeError::Config(format!("tls protocol version error: {}", e)))?;

        let config = if verify {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            builder.with_root_certificates(roots).with_no_client_auth()
        } else {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(unverified::AcceptAny))
                .with_no_client_auth()
        };

        Ok(Self {
            port,
            connector: TlsConnector::from(Arc::new(config)),
        })
    }
}

/// Split `host[:port]`, stripping any URL scheme and path.
fn split_host_port(target: &str, default_port: u16) -> (String, u16) {
    let trimmed = target
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let authority = trimmed.split('/').next().unwrap_or(trimmed);

    match authority.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (authority.to_string(), default_port),
        },
        None => (authority.to_string(), default_port),
    }
}

/// Whole days between `now` and the certificate's `notAfter`, rounded
/// down. Negative once expired.
pub fn days_until_expiry(cert_der: &[u8], now: DateTime<Utc>) -> Result<f64, ProbeError> {
    let (_, cert) = x509_parser::parse_x509_certificate(cert_der)
        .map_err(|e| ProbeError::Network(format!("unparseable certificate: {}", e)))?;
    let not_after = cert.validity().not_after.timestamp();
    let seconds = not_after - now.timestamp();
    Ok(seconds.div_euclid(86_400) as f64)
}

#[async_trait]
impl Probe for TlsExpiryProbe {
    async fn measure(&self, target: &Target, timeout: Duration) -> Result<Measurement, ProbeError> {
        let (host, port) = split_host_port(target.as_str(), self.port);
        let server_name = ServerName::try_from(host.clone())
            .map_err(|e| ProbeError::Config(format!("invalid server name {}: {}", host, e)))?;

        let start = Instant::now();
        let handshake = async {
            let tcp = TcpStream::connect((host.as_str(), port))
                .await
                .map_err(|e| ProbeError::Network(format!("connect failed: {}", e)))?;
            self.connector
                .connect(server_name, tcp)
                .await
                .map_err(|e| ProbeError::Network(format!("tls handshake failed: {}", e)))
        };
        let stream = tokio::time::timeout(timeout, handshake)
            .await
            .map_err(|_| ProbeError::Timeout(timeout))??;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        let (_, session) = stream.get_ref();
        let leaf = session
            .peer_certificates()
            .and_then(|chain| chain.first())
            .ok_or_else(|| ProbeError::Network("server presented no certificate".to_string()))?;
        let days_left = days_until_expiry(leaf.as_ref(), Utc::now())?;

        Ok(Measurement::ok()
            .with(metric::DAYS_LEFT, days_left)
            .with(metric::LATENCY_MS, latency_ms))
    }
}

mod unverified {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error, SignatureScheme};

    /// Accepts any certificate. Only used to read expiry dates.
    #[derive(Debug)]
    pub struct AcceptAny;

    impl ServerCertVerifier for AcceptAny {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            rustls::crypto::ring::default_provider()
                .signature_verification_algorithms
                .supported_schemes()
        }
    }
}
