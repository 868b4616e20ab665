//! Single reachability probes: native ICMP echo first, the system `ping`
//! command when raw/datagram ICMP sockets are unavailable.

use std::io::{self, Read};
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU16, Ordering};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Local};
use regex::Regex;
use socket2::{Domain, Protocol, Socket, Type};

/// Latency reported when `ping` exits cleanly but prints no parsable time.
pub const NOMINAL_LATENCY_MS: f64 = 1.0;

/// Grace period past the probe timeout before a `ping` child is killed.
const COMMAND_GRACE: Duration = Duration::from_secs(2);
const CHILD_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub success: bool,
    pub latency_ms: Option<f64>,
    pub timestamp: DateTime<Local>,
}

impl ProbeResult {
    pub fn reachable(latency_ms: f64, timestamp: DateTime<Local>) -> Self {
        Self {
            success: true,
            latency_ms: Some(latency_ms),
            timestamp,
        }
    }

    pub fn unreachable(timestamp: DateTime<Local>) -> Self {
        Self {
            success: false,
            latency_ms: None,
            timestamp,
        }
    }
}

/// Performs one reachability measurement. Never fails: every failure mode
/// becomes an unreachable [`ProbeResult`].
pub trait HostProber: Send + Sync {
    fn probe(&self, host: &str, timeout: Duration) -> ProbeResult;
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum IcmpCapability {
    Raw,
    Datagram,
    CommandOnly,
}

static ICMP_CAPABILITY: OnceLock<IcmpCapability> = OnceLock::new();
static PING_SEQUENCE: AtomicU16 = AtomicU16::new(0);

fn detect_icmp_capability() -> IcmpCapability {
    if Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("ping probe: using native ICMP (raw socket)");
        return IcmpCapability::Raw;
    }
    if Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("ping probe: using native ICMP (datagram socket)");
        return IcmpCapability::Datagram;
    }
    tracing::info!("ping probe: native ICMP unavailable, using ping command");
    IcmpCapability::CommandOnly
}

#[derive(Debug)]
enum NativeError {
    /// The host did not answer in time or could not be resolved.
    Unreachable(String),
    /// The ICMP mechanism itself failed; the command may still work.
    Unavailable(io::Error),
}

/// The production prober.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProber;

impl SystemProber {
    pub fn new() -> Self {
        Self
    }
}

impl HostProber for SystemProber {
    fn probe(&self, host: &str, timeout: Duration) -> ProbeResult {
        let timestamp = Local::now();
        let capability = *ICMP_CAPABILITY.get_or_init(detect_icmp_capability);

        let latency = if capability == IcmpCapability::CommandOnly {
            run_ping_command(host, timeout)
        } else {
            match run_native_ping(host, timeout, capability) {
                Ok(latency) => Some(latency),
                Err(NativeError::Unreachable(reason)) => {
                    tracing::debug!(host, %reason, "native ping failed");
                    None
                }
                Err(NativeError::Unavailable(err)) => {
                    tracing::warn!(host, "native ping unavailable, falling back to command: {err}");
                    run_ping_command(host, timeout)
                }
            }
        };

        match latency {
            Some(latency_ms) => ProbeResult::reachable(latency_ms, timestamp),
            None => ProbeResult::unreachable(timestamp),
        }
    }
}

fn resolve_address(host: &str) -> Result<IpAddr, NativeError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    (host, 0)
        .to_socket_addrs()
        .map_err(|err| NativeError::Unreachable(format!("DNS resolution failed: {err}")))?
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| NativeError::Unreachable(format!("no addresses found for {host}")))
}

fn run_native_ping(
    host: &str,
    timeout: Duration,
    capability: IcmpCapability,
) -> Result<f64, NativeError> {
    let ip = resolve_address(host)?;
    let (domain, protocol, request_type, reply_type) = match ip {
        IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4, 8_u8, 0_u8),
        IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6, 128_u8, 129_u8),
    };
    let socket_type = match capability {
        IcmpCapability::Raw => Type::RAW,
        _ => Type::DGRAM,
    };
    let socket =
        Socket::new(domain, socket_type, Some(protocol)).map_err(NativeError::Unavailable)?;
    socket
        .set_write_timeout(Some(timeout))
        .map_err(NativeError::Unavailable)?;
    socket
        .connect(&SocketAddr::new(ip, 0).into())
        .map_err(NativeError::Unavailable)?;

    let identifier: u16 = rand::random();
    let sequence = PING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let packet = build_echo_request(request_type, identifier, sequence, ip.is_ipv4());

    let start = Instant::now();
    socket.send(&packet).map_err(NativeError::Unavailable)?;

    let mut buffer = [0_u8; 1500];
    loop {
        let Some(remaining) = remaining_wait(timeout, start.elapsed()) else {
            return Err(no_reply(timeout));
        };
        socket
            .set_read_timeout(Some(remaining))
            .map_err(NativeError::Unavailable)?;
        let len = match (&socket).read(&mut buffer) {
            Ok(len) => len,
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::TimedOut =>
            {
                return Err(no_reply(timeout));
            }
            Err(err) => return Err(NativeError::Unavailable(err)),
        };
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(no_reply(timeout));
        }

        // Datagram sockets let the kernel rewrite the identifier and
        // already filter replies to this socket.
        let expected_id = (capability == IcmpCapability::Raw).then_some(identifier);
        if is_echo_reply(&buffer[..len], reply_type, expected_id, sequence) {
            return Ok(elapsed.as_secs_f64() * 1_000.0);
        }
    }
}

fn no_reply(timeout: Duration) -> NativeError {
    NativeError::Unreachable(format!("no reply within {timeout:?}"))
}

/// Time left to wait for a reply, or `None` once the probe budget is spent.
/// Unrelated packets must not restart the wait.
fn remaining_wait(timeout: Duration, elapsed: Duration) -> Option<Duration> {
    Some(timeout.saturating_sub(elapsed)).filter(|left| !left.is_zero())
}

fn build_echo_request(kind: u8, identifier: u16, sequence: u16, with_checksum: bool) -> Vec<u8> {
    let mut packet = vec![0_u8; 64];
    packet[0] = kind;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());

    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|since| since.as_nanos() as u64)
        .unwrap_or_default();
    packet[8..16].copy_from_slice(&stamp.to_be_bytes());

    // The kernel fills in the ICMPv6 checksum.
    if with_checksum {
        let checksum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    }
    packet
}

fn is_echo_reply(buf: &[u8], reply_type: u8, expected_id: Option<u16>, sequence: u16) -> bool {
    // Raw IPv4 sockets deliver the IP header too.
    let offset = if !buf.is_empty() && buf[0] >> 4 == 4 {
        usize::from(buf[0] & 0x0f) * 4
    } else {
        0
    };
    let Some(icmp) = buf.get(offset..offset + 8) else {
        return false;
    };
    let reply_id = u16::from_be_bytes([icmp[4], icmp[5]]);
    let reply_seq = u16::from_be_bytes([icmp[6], icmp[7]]);
    icmp[0] == reply_type
        && reply_seq == sequence
        && expected_id.is_none_or(|id| id == reply_id)
}

/// RFC 1071 internet checksum.
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|pair| match pair {
            [high, low] => u32::from(u16::from_be_bytes([*high, *low])),
            [high] => u32::from(*high) << 8,
            _ => 0,
        })
        .sum();
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

fn ping_command_args(host: &str, timeout: Duration) -> Vec<String> {
    if cfg!(windows) {
        let millis = timeout.as_millis().max(1);
        vec![
            "-n".to_string(),
            "1".to_string(),
            "-w".to_string(),
            millis.to_string(),
            host.to_string(),
        ]
    } else {
        let secs = timeout.as_secs().max(1);
        vec![
            "-c".to_string(),
            "1".to_string(),
            "-W".to_string(),
            secs.to_string(),
            host.to_string(),
        ]
    }
}

/// Runs the platform `ping` once, killing it if it outlives the timeout.
fn run_ping_command(host: &str, timeout: Duration) -> Option<f64> {
    let mut child = match Command::new("ping")
        .args(ping_command_args(host, timeout))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            tracing::warn!(host, "failed to execute ping: {err}");
            return None;
        }
    };

    let deadline = Instant::now() + timeout + COMMAND_GRACE;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => break,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                tracing::debug!(host, "ping command timed out");
                return None;
            }
            Ok(None) => thread::sleep(CHILD_POLL),
            Err(err) => {
                tracing::warn!(host, "failed to wait for ping: {err}");
                let _ = child.kill();
                return None;
            }
        }
    }

    let output = child.wait_with_output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Some(parse_ping_output(&stdout).unwrap_or(NOMINAL_LATENCY_MS))
}

/// Extracts a round-trip time in milliseconds from `ping` output.
pub fn parse_ping_output(output: &str) -> Option<f64> {
    static PER_PACKET: OnceLock<Regex> = OnceLock::new();
    static SUMMARY: OnceLock<Regex> = OnceLock::new();

    let per_packet = PER_PACKET.get_or_init(|| {
        Regex::new(r"time\s*[=<]\s*(?P<val>[0-9]+(?:\.[0-9]+)?)\s*ms").expect("valid regex")
    });
    if let Some(value) = per_packet
        .captures(output)
        .and_then(|caps| caps.name("val"))
        .and_then(|val| val.as_str().parse::<f64>().ok())
    {
        return Some(value);
    }

    // "rtt min/avg/max/mdev = a/b/c/d ms" or "round-trip min/avg/max/stddev = ..."
    let summary = SUMMARY.get_or_init(|| {
        Regex::new(
            r"(?:rtt|round-trip)\s+min/avg/max/(?:mdev|stddev)\s*=\s*[0-9.]+/(?P<avg>[0-9.]+)/",
        )
        .expect("valid regex")
    });
    summary
        .captures(output)
        .and_then(|caps| caps.name("avg"))
        .and_then(|avg| avg.as_str().parse::<f64>().ok())
}
