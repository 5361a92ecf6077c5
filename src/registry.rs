//! Shared registry of live connections and their traffic counters.
//!
//! One registry exists per server process, created at startup and handed to
//! every component that touches connections (dispatch loop, response jobs,
//! shutdown reporter) behind an `Arc`. A single mutex guards all internal
//! state; critical sections are counter updates only, never I/O.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Mutex;

/// Per-connection traffic counters, keyed by the id handed out on
/// [`register`](ConnectionRegistry::register).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRecord {
    pub addr: SocketAddr,
    pub requests_received: u64,
    pub bytes_sent: u64,
}

#[derive(Default)]
struct RegistryInner {
    clients: HashMap<u64, ClientRecord>,
    next_id: u64,
    current: usize,
    peak: usize,
}

/// Point-in-time view of the registry, taken under its lock.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    pub current: usize,
    pub peak: usize,
    pub clients: Vec<ClientRecord>,
}

/// Mutex-protected table of live connections.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly accepted connection and return its id.
    ///
    /// Ids are never reused within a process, so a stale id from a closed
    /// connection can never alias a live one.
    pub fn register(&self, addr: SocketAddr) -> u64 {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let id = inner.next_id;
        inner.next_id += 1;
        inner.clients.insert(
            id,
            ClientRecord {
                addr,
                requests_received: 0,
                bytes_sent: 0,
            },
        );
        inner.current += 1;
        if inner.current > inner.peak {
            inner.peak = inner.current;
        }
        id
    }

    /// Drop a connection from the registry on disconnect or close.
    pub fn deregister(&self, id: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.clients.remove(&id).is_some() {
            inner.current -= 1;
        }
    }

    /// Bump the counters for one completed request.
    pub fn record_request(&self, id: u64, bytes_sent: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = inner.clients.get_mut(&id) {
            record.requests_received += 1;
            record.bytes_sent += bytes_sent;
        }
    }

    /// Number of currently connected clients.
    pub fn current(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).current
    }

    /// Highest number of simultaneously connected clients observed.
    pub fn peak(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).peak
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut clients: Vec<ClientRecord> = inner.clients.values().cloned().collect();
        clients.sort_by_key(|c| (c.addr.ip(), c.addr.port()));
        RegistrySnapshot {
            current: inner.current,
            peak: inner.peak,
            clients,
        }
    }

    /// End-of-run report printed on shutdown: the peak concurrent-connection
    /// count followed by per-client traffic for everything still connected.
    pub fn render_report(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = String::new();
        let _ = writeln!(
            out,
            "\nHighest number of simultaneous connections: {}\n",
            snapshot.peak
        );
        let _ = writeln!(out, "Clients still connected:\n");
        for client in &snapshot.clients {
            let _ = writeln!(out, "\tHost:\t\t\t{}", client.addr.ip());
            let _ = writeln!(out, "\tPort:\t\t\t{}", client.addr.port());
            let _ = writeln!(out, "\tRequests received:\t{}", client.requests_received);
            let _ = writeln!(out, "\tData sent:\t\t{}\n", client.bytes_sent);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn test_register_and_counters() {
        let registry = ConnectionRegistry::new();
        let id = registry.register(addr(40001));

        registry.record_request(id, 128);
        registry.record_request(id, 128);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.current, 1);
        assert_eq!(snapshot.clients[0].requests_received, 2);
        assert_eq!(snapshot.clients[0].bytes_sent, 256);

        registry.deregister(id);
        assert_eq!(registry.current(), 0);
        assert_eq!(registry.peak(), 1);
    }

    #[test]
    fn test_counters_for_stale_id_are_dropped() {
        let registry = ConnectionRegistry::new();
        let id = registry.register(addr(40002));
        registry.deregister(id);

        // A response job may finish after its connection went away.
        registry.record_request(id, 64);
        registry.deregister(id);
        assert_eq!(registry.current(), 0);
    }

    #[test]
    fn test_ids_are_never_reused() {
        let registry = ConnectionRegistry::new();
        let first = registry.register(addr(40003));
        registry.deregister(first);
        let second = registry.register(addr(40003));
        assert_ne!(first, second);
    }

    #[test]
    fn test_concurrent_storm_keeps_exact_counts() {
        let registry = Arc::new(ConnectionRegistry::new());
        let threads: u16 = 16;
        let requests: u64 = 50;

        let handles: Vec<_> = (0..threads)
            .map(|i| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let id = registry.register(addr(41000 + i));
                    for _ in 0..requests {
                        registry.record_request(id, 128);
                    }
                    id
                })
            })
            .collect();

        let ids: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.current, threads as usize);
        assert_eq!(snapshot.peak, threads as usize);
        for client in &snapshot.clients {
            assert_eq!(client.requests_received, requests);
            assert_eq!(client.bytes_sent, requests * 128);
        }

        for id in ids {
            registry.deregister(id);
        }
        assert_eq!(registry.current(), 0);
        assert_eq!(registry.peak(), threads as usize);
    }

    #[test]
    fn test_peak_tracks_true_maximum() {
        let registry = ConnectionRegistry::new();
        let a = registry.register(addr(40010));
        let b = registry.register(addr(40011));
        registry.deregister(a);
        let c = registry.register(addr(40012));
        registry.deregister(b);
        registry.deregister(c);

        assert_eq!(registry.peak(), 2);
        assert_eq!(registry.current(), 0);
    }

    #[test]
    fn test_report_lists_still_connected_clients() {
        let registry = ConnectionRegistry::new();
        let id = registry.register(addr(40020));
        registry.record_request(id, 512);

        let report = registry.render_report();
        assert!(report.contains("Highest number of simultaneous connections: 1"));
        assert!(report.contains("40020"));
        assert!(report.contains("Requests received:\t1"));
        assert!(report.contains("Data sent:\t\t512"));
    }
}
