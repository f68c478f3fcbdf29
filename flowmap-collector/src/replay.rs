//! Replays captured NetFlow payloads against a collector.
//!
//! Payload files hold one hex-encoded UDP payload per line, which is what
//! `tshark -r capture.pcap -T fields -e udp.payload` prints.

use crate::error::{CollectorError, Result};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Parse hex payloads, one per line. Blank lines and `#` comments are ignored.
pub fn parse_payloads(content: &str) -> Result<Vec<Vec<u8>>> {
    let mut payloads = Vec::new();

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let payload = hex::decode(line).map_err(|source| CollectorError::InvalidPayload {
            line: index + 1,
            source,
        })?;
        payloads.push(payload);
    }

    Ok(payloads)
}

pub fn load_payloads(path: &Path) -> Result<Vec<Vec<u8>>> {
    let content = std::fs::read_to_string(path)?;
    parse_payloads(&content)
}

#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub target: SocketAddr,
    pub interval: Duration,
    /// Passes over the payload list; `None` repeats until cancelled.
    pub rounds: Option<usize>,
}

impl ReplayOptions {
    pub fn new(target: SocketAddr) -> Self {
        Self {
            target,
            interval: Duration::from_secs(1),
            rounds: Some(1),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_rounds(mut self, rounds: Option<usize>) -> Self {
        self.rounds = rounds;
        self
    }
}

/// Datagrams to send for `rounds` passes; `None` when unbounded or too many to count.
fn send_limit(rounds: Option<usize>, payloads: usize) -> Option<usize> {
    rounds.and_then(|rounds| rounds.checked_mul(payloads))
}

/// Send `payloads` round-robin to `options.target`, pausing `options.interval`
/// between datagrams. Returns the number of datagrams sent.
pub async fn replay(
    payloads: &[Vec<u8>],
    options: &ReplayOptions,
    cancel: CancellationToken,
) -> Result<u64> {
    if payloads.is_empty() {
        return Ok(0);
    }

    let socket = bind_for(options.target).await?;
    let total = send_limit(options.rounds, payloads.len());
    let mut sent: u64 = 0;

    info!("Replaying {} payload(s) to {}", payloads.len(), options.target);

    for payload in payloads.iter().cycle() {
        if total.is_some_and(|total| sent as usize >= total) {
            break;
        }

        socket.send_to(payload, options.target).await?;
        sent += 1;
        debug!(sent, len = payload.len(), "sent payload");

        if total.is_some_and(|total| sent as usize >= total) {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(options.interval) => {}
        }
    }

    info!("Replay finished after {} datagram(s)", sent);
    Ok(sent)
}

/// Send a single datagram to `target`.
pub async fn send_datagram(payload: &[u8], target: SocketAddr) -> Result<()> {
    let socket = bind_for(target).await?;
    socket.send_to(payload, target).await?;
    Ok(())
}

async fn bind_for(target: SocketAddr) -> Result<UdpSocket> {
    let local: SocketAddr = if target.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        ([0u16; 8], 0).into()
    };
    Ok(UdpSocket::bind(local).await?)
}
