//! Host port allocation
//!
//! The allocator snapshots the host's listening TCP sockets once, then hands
//! out ports in ascending order. A port is handed out only if it is neither in
//! the snapshot nor already handed out, and a bind attempt on it succeeds.

use crate::error::{Error, Result};
use std::collections::BTreeSet;
use std::net::{Ipv4Addr, TcpListener};
use std::ops::RangeInclusive;
use tracing::{debug, info};

/// TCP state code for LISTEN in `/proc/net/tcp`
const TCP_LISTEN: &str = "0A";

type PortProbe = Box<dyn Fn(u16) -> bool + Send + Sync>;

/// Hands out free host ports from an inclusive range
pub struct PortAllocator {
    start: u16,
    end: u16,
    claimed: BTreeSet<u16>,
    probe: PortProbe,
}

impl std::fmt::Debug for PortAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortAllocator")
            .field("start", &self.start)
            .field("end", &self.end)
            .field("claimed", &self.claimed.len())
            .finish()
    }
}

impl PortAllocator {
    /// Create an allocator, seeding the claimed set from the host's listeners
    pub fn new(start: u16, end: u16) -> Result<Self> {
        let listening = scan_listening_ports();
        info!(
            "Found {} listening ports on the host, allocating from {}-{}",
            listening.len(),
            start,
            end
        );
        Self::with_claimed(start, end, listening)
    }

    /// Create an allocator with an explicit claimed set and no host scan
    pub fn with_claimed(start: u16, end: u16, claimed: impl IntoIterator<Item = u16>) -> Result<Self> {
        if start == 0 || start >= end {
            return Err(Error::InvalidPortRange { start, end });
        }

        Ok(Self {
            start,
            end,
            claimed: claimed.into_iter().collect(),
            probe: Box::new(can_bind),
        })
    }

    /// Replace the bind check used to confirm a port is free
    pub fn with_probe(mut self, probe: impl Fn(u16) -> bool + Send + Sync + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    /// Range the allocator hands out from
    pub fn range(&self) -> RangeInclusive<u16> {
        self.start..=self.end
    }

    /// Whether a port is unclaimed and currently bindable
    pub fn is_port_free(&self, port: u16) -> bool {
        !self.claimed.contains(&port) && (self.probe)(port)
    }

    /// Claim the lowest free port of the range
    pub fn get_free_port(&mut self) -> Result<u16> {
        for port in self.range() {
            if self.claimed.contains(&port) {
                continue;
            }
            if (self.probe)(port) {
                self.claimed.insert(port);
                debug!("Allocated port {}", port);
                return Ok(port);
            }
            debug!("Port {} failed the bind check", port);
        }

        Err(Error::NoPortsAvailable {
            start: self.start,
            end: self.end,
        })
    }

    /// Return a port to the pool
    pub fn release_port(&mut self, port: u16) {
        if self.claimed.remove(&port) {
            debug!("Released port {}", port);
        }
    }

    /// Ports currently claimed, listeners included
    pub fn claimed(&self) -> impl Iterator<Item = u16> + '_ {
        self.claimed.iter().copied()
    }
}

/// A port is free if the wildcard address can be bound on it.
///
/// The listener is dropped immediately, so another process may still take the
/// port before the service does.
fn can_bind(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).is_ok()
}

/// Listening TCP ports on this host, IPv4 and IPv6
pub fn scan_listening_ports() -> BTreeSet<u16> {
    let mut ports = BTreeSet::new();
    for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
        match std::fs::read_to_string(table) {
            Ok(content) => ports.extend(parse_proc_net_tcp(&content)),
            Err(e) => debug!("Cannot read {}: {}", table, e),
        }
    }
    ports
}

/// Extract LISTEN ports from the text of `/proc/net/tcp` or `/proc/net/tcp6`
fn parse_proc_net_tcp(content: &str) -> impl Iterator<Item = u16> + '_ {
    content.lines().skip(1).filter_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 || fields[3] != TCP_LISTEN {
            return None;
        }
        // local_address is ADDR:PORT with the port in hex
        let (_, port) = fields[1].rsplit_once(':')?;
        u16::from_str_radix(port, 16).ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROC_NET_TCP: &str = "\
  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 00000000:1F40 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 12345 1 0000000000000000 100 0 0 10 0
   1: 0100007F:0CEA 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 12346 1 0000000000000000 100 0 0 10 0
   2: 0100007F:A1B2 0100007F:1F40 01 00000000:00000000 00:00000000 00000000  1000        0 12347 1 0000000000000000 20 4 30 10 -1
";

    #[test]
    fn test_parse_only_listeners() {
        let ports: Vec<u16> = parse_proc_net_tcp(PROC_NET_TCP).collect();
        assert_eq!(ports, vec![8000, 3306]);
    }

    #[test]
    fn test_parse_ipv6_table() {
        let content = "header\n   0: 00000000000000000000000000000000:22B8 00000000000000000000000000000000:0000 0A 0 0 0 0 0 0\n";
        assert_eq!(parse_proc_net_tcp(content).collect::<Vec<_>>(), vec![8888]);
    }

    #[test]
    fn test_invalid_range() {
        assert!(matches!(
            PortAllocator::with_claimed(9000, 8000, []),
            Err(Error::InvalidPortRange { .. })
        ));
        assert!(matches!(
            PortAllocator::with_claimed(0, 10, []),
            Err(Error::InvalidPortRange { .. })
        ));
        assert!(matches!(
            PortAllocator::with_claimed(8000, 8000, []),
            Err(Error::InvalidPortRange { .. })
        ));
    }

    #[test]
    fn test_skips_claimed_ports_until_exhausted() {
        let mut allocator = PortAllocator::with_claimed(8000, 8002, [8000, 8001])
            .unwrap()
            .with_probe(|_| true);

        assert_eq!(allocator.get_free_port().unwrap(), 8002);
        assert!(matches!(
            allocator.get_free_port(),
            Err(Error::NoPortsAvailable { start: 8000, end: 8002 })
        ));
    }

    #[test]
    fn test_ports_are_distinct_and_ascending() {
        let mut allocator = PortAllocator::with_claimed(8000, 8010, [8003])
            .unwrap()
            .with_probe(|port| port != 8001);

        let ports: Vec<u16> = (0..4).map(|_| allocator.get_free_port().unwrap()).collect();
        assert_eq!(ports, vec![8000, 8002, 8004, 8005]);
    }

    #[test]
    fn test_release_returns_port() {
        let mut allocator = PortAllocator::with_claimed(8000, 8001, [])
            .unwrap()
            .with_probe(|_| true);

        let first = allocator.get_free_port().unwrap();
        let second = allocator.get_free_port().unwrap();
        assert!(allocator.get_free_port().is_err());

        allocator.release_port(first);
        assert!(allocator.is_port_free(first));
        assert!(!allocator.is_port_free(second));
        assert_eq!(allocator.get_free_port().unwrap(), first);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_scan_sees_real_listener() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();

        assert!(scan_listening_ports().contains(&port));

        let mut allocator = PortAllocator::new(port - 1, port).unwrap();
        assert!(!allocator.is_port_free(port));
        if let Ok(allocated) = allocator.get_free_port() {
            assert_ne!(allocated, port);
        }
    }
}
