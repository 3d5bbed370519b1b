//! ICMP echo probe with `ping` command fallback.
//!
//! Native sockets run inside spawn_blocking; when the process may not open
//! ICMP sockets the system `ping` binary is used instead.

use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::process::Command;

use super::{metric, Measurement, Probe, ProbeError, Target};

const ECHO_REQUEST_V4: u8 = 8;
const ECHO_REPLY_V4: u8 = 0;
const ECHO_REQUEST_V6: u8 = 128;
const ECHO_REPLY_V6: u8 = 129;

static NATIVE_ICMP: OnceLock<bool> = OnceLock::new();
static SEQUENCE: AtomicU16 = AtomicU16::new(0);

/// Succeeds iff an echo reply arrives before the timeout.
pub struct PingProbe;

#[async_trait]
impl Probe for PingProbe {
    async fn measure(&self, target: &Target, timeout: Duration) -> Result<Measurement, ProbeError> {
        let latency = ping(target.as_str(), timeout).await?;
        Ok(Measurement::ok().with(metric::LATENCY_MS, latency.as_secs_f64() * 1000.0))
    }
}

/// Open an ICMP socket, returning whether it is RAW.
fn icmp_socket(domain: Domain, protocol: Protocol) -> std::io::Result<(Socket, bool)> {
    // RAW needs CAP_NET_RAW; DGRAM works unprivileged where ping_group_range allows
    match Socket::new(domain, Type::RAW, Some(protocol)) {
        Ok(socket) => Ok((socket, true)),
        Err(_) => Socket::new(domain, Type::DGRAM, Some(protocol)).map(|s| (s, false)),
    }
}

fn native_icmp_available() -> bool {
    *NATIVE_ICMP.get_or_init(|| {
        let available = icmp_socket(Domain::IPV4, Protocol::ICMPV4).is_ok();
        if available {
            tracing::info!("ping probe: using native ICMP sockets");
        } else {
            tracing::info!("ping probe: native ICMP unavailable, using ping command");
        }
        available
    })
}

async fn ping(address: &str, timeout: Duration) -> Result<Duration, ProbeError> {
    if !native_icmp_available() {
        return ping_command(address, timeout).await;
    }

    let ip = resolve(address).await?;
    let result = tokio::task::spawn_blocking(move || echo(ip, timeout))
        .await
        .map_err(|e| ProbeError::Network(format!("spawn_blocking failed: {}", e)))?;

    match result {
        Err(ProbeError::Network(msg)) if msg.contains("denied") || msg.contains("not permitted") => {
            tracing::warn!(%address, "native ping not permitted, falling back to command");
            ping_command(address, timeout).await
        }
        other => other,
    }
}

async fn resolve(address: &str) -> Result<IpAddr, ProbeError> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(ip);
    }

    tokio::net::lookup_host(format!("{}:0", address))
        .await
        .map_err(|e| ProbeError::Network(format!("DNS resolution failed: {}", e)))?
        .next()
        .map(|sa| sa.ip())
        .ok_or_else(|| ProbeError::Network(format!("no addresses found for {}", address)))
}

/// Blocking echo request/reply exchange.
fn echo(ip: IpAddr, timeout: Duration) -> Result<Duration, ProbeError> {
    let (domain, protocol, request, reply) = match ip {
        IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4, ECHO_REQUEST_V4, ECHO_REPLY_V4),
        IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6, ECHO_REQUEST_V6, ECHO_REPLY_V6),
    };
    let net_err = |what: &str, e: std::io::Error| ProbeError::Network(format!("{}: {}", what, e));

    let (socket, raw) = icmp_socket(domain, protocol).map_err(|e| net_err("icmp socket", e))?;
    socket
        .set_read_timeout(Some(timeout))
        .map_err(|e| net_err("set timeout", e))?;
    socket
        .connect(&SocketAddr::new(ip, 0).into())
        .map_err(|e| net_err("connect", e))?;

    let identifier: u16 = rand::random();
    let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let packet = echo_request(request, identifier, sequence);
    // DGRAM sockets get their identifier rewritten by the kernel
    let expected_id = raw.then_some(identifier);

    let start = Instant::now();
    socket.send(&packet).map_err(|e| net_err("send", e))?;

    loop {
        let mut buf = [MaybeUninit::<u8>::uninit(); 1500];
        let len = socket.recv(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
                ProbeError::Timeout(timeout)
            }
            _ => net_err("recv", e),
        })?;
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(ProbeError::Timeout(timeout));
        }

        // SAFETY: recv initialized the first `len` bytes
        let data: &[u8] = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) };
        if is_our_reply(data, reply, expected_id, sequence) {
            return Ok(elapsed);
        }
    }
}

/// Echo request: 8-byte header plus 56-byte zero payload.
fn echo_request(kind: u8, identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 64];
    packet[0] = kind;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());

    // The kernel fills in ICMPv6 checksums
    if kind == ECHO_REQUEST_V4 {
        let checksum = checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    }
    packet
}

fn is_our_reply(data: &[u8], reply: u8, identifier: Option<u16>, sequence: u16) -> bool {
    // RAW IPv4 sockets include the IP header
    let offset = if reply == ECHO_REPLY_V4 && data.first().map(|b| b >> 4) == Some(4) {
        ((data[0] & 0x0f) as usize) * 4
    } else {
        0
    };
    let Some(icmp) = data.get(offset..offset + 8) else {
        return false;
    };
    icmp[0] == reply
        && identifier.map_or(true, |id| u16::from_be_bytes([icmp[4], icmp[5]]) == id)
        && u16::from_be_bytes([icmp[6], icmp[7]]) == sequence
}

/// Internet checksum (RFC 1071).
fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]) as u32,
            [hi] => (*hi as u32) << 8,
            _ => 0,
        })
        .sum();
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

async fn ping_command(address: &str, timeout: Duration) -> Result<Duration, ProbeError> {
    let wait = timeout.as_secs().max(1).to_string();
    let output = Command::new("ping")
        .args(["-c", "1", "-W", &wait, address])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ProbeError::Command(format!("failed to execute ping: {}", e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
        if stdout.contains("100% packet loss") || stdout.contains("100.0% packet loss") {
            return Err(ProbeError::Timeout(timeout));
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProbeError::Command(format!("ping failed: {}{}", stdout, stderr)));
    }

    parse_ping_output(&stdout)
}

/// Extract round-trip time from `ping` output (Linux and macOS formats).
fn parse_ping_output(output: &str) -> Result<Duration, ProbeError> {
    static PATTERNS: OnceLock<[Regex; 2]> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            Regex::new(r"time[=<](?P<ms>[0-9.]+)\s*ms").expect("static regex"),
            Regex::new(r"(?:rtt|round-trip) min/avg/max/(?:mdev|stddev) = [0-9.]+/(?P<ms>[0-9.]+)/")
                .expect("static regex"),
        ]
    });

    patterns
        .iter()
        .find_map(|re| re.captures(output)?.name("ms")?.as_str().parse::<f64>().ok())
        .map(|ms| Duration::from_secs_f64(ms / 1000.0))
        .ok_or_else(|| ProbeError::Command(format!("failed to parse ping output: {}", output)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_verifies() {
        let packet = echo_request(ECHO_REQUEST_V4, 0x1234, 1);
        // A packet with its checksum filled in sums to zero
        assert_eq!(checksum(&packet), 0);
    }

    #[test]
    fn test_echo_request_layout() {
        let packet = echo_request(ECHO_REQUEST_V4, 0x1234, 0x0001);
        assert_eq!(packet.len(), 64);
        assert_eq!(packet[0], 8);
        assert_eq!(packet[4..6], [0x12, 0x34]);
        assert_eq!(packet[6..8], [0x00, 0x01]);
    }

    #[test]
    fn test_reply_matching_skips_ip_header() {
        let mut reply = vec![0u8; 28];
        reply[0] = 0x45;
        reply[20] = ECHO_REPLY_V4;
        reply[24..26].copy_from_slice(&7u16.to_be_bytes());
        reply[26..28].copy_from_slice(&9u16.to_be_bytes());
        assert!(is_our_reply(&reply, ECHO_REPLY_V4, Some(7), 9));
        assert!(!is_our_reply(&reply, ECHO_REPLY_V4, Some(7), 10));
        assert!(!is_our_reply(&reply, ECHO_REPLY_V4, Some(8), 9));
        assert!(is_our_reply(&reply[20..], ECHO_REPLY_V4, Some(7), 9));
        // DGRAM replies carry a kernel-chosen identifier
        assert!(is_our_reply(&reply[20..], ECHO_REPLY_V4, None, 9));
    }

    #[test]
    fn test_parse_linux_reply() {
        let output = "64 bytes from 8.8.8.8: icmp_seq=1 ttl=117 time=12.345 ms";
        let latency = parse_ping_output(output).unwrap();
        assert!((latency.as_secs_f64() * 1000.0 - 12.345).abs() < 1e-6);
    }

    #[test]
    fn test_parse_macos_summary() {
        let output = "1 packets transmitted, 1 packets received, 0.0% packet loss\n\
                      round-trip min/avg/max/stddev = 17.906/17.906/17.906/0.000 ms";
        let latency = parse_ping_output(output).unwrap();
        assert!((latency.as_secs_f64() * 1000.0 - 17.906).abs() < 1e-6);
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_ping_output("no reply").is_err());
    }
}
