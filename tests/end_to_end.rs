//! End-to-end runs of the full stack: event server + worker pool on one
//! side, the multi-threaded load driver on the other.

use evbench::client::{self, SampleSink};
use evbench::config::{ClientConfig, ServerConfig, ServerMode};
use evbench::registry::ConnectionRegistry;
use evbench::runtime::Mechanism;
use evbench::server::{EventServer, ThreadedServer};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

fn server_config() -> ServerConfig {
    ServerConfig {
        listen: "127.0.0.1:0".to_string(),
        mode: ServerMode::Poll, // informational here; the poller is passed explicitly
        workers: 4,
        max_queue: 16,
        log_level: "info".to_string(),
    }
}

fn client_config(port: u16, clients: usize, count: u64, size: u32) -> ClientConfig {
    ClientConfig {
        host: "127.0.0.1".to_string(),
        port,
        message_size: size,
        message_count: count,
        clients,
        timeout: 10.0,
        messages_per_record: 1,
        output: PathBuf::from("unused.csv"),
        log_level: "info".to_string(),
    }
}

/// The §8 scenario: 8 connections x 10 requests x 128 bytes against a
/// 4-worker server with a 16-slot queue, on the first available mechanism.
#[test]
fn full_run_against_event_server() {
    let mechanism = *Mechanism::available().first().expect("no mechanism");
    let registry = Arc::new(ConnectionRegistry::new());
    let server = EventServer::bind(
        &server_config(),
        mechanism.poller().unwrap(),
        Arc::clone(&registry),
    )
    .unwrap();
    let port = server.local_addr().unwrap().port();
    let handle = server.shutdown_handle();
    let server_thread = thread::spawn(move || server.run());

    let config = client_config(port, 8, 10, 128);
    let sink = SampleSink::new(Vec::new()).unwrap();
    let summary = client::run_with_sink(&config, &sink).unwrap();

    assert_eq!(summary.completed, 8, "every connection must finish");
    assert_eq!(summary.failed, 0);
    assert_eq!(sink.recorded(), 80, "one sample per round trip");

    // Every sample covers one 128-byte message and a positive round trip.
    let out = String::from_utf8(sink.into_inner().unwrap()).unwrap();
    let rows: Vec<&str> = out.lines().skip(1).collect();
    assert_eq!(rows.len(), 80);
    for row in rows {
        let fields: Vec<&str> = row.split(',').collect();
        assert_eq!(fields[2], "128");
        assert!(fields[3].parse::<f64>().unwrap() >= 0.0);
    }

    // Connections may or may not all overlap, but the peak can never exceed
    // the client count, and the server eventually sees every disconnect.
    assert!(registry.peak() >= 1 && registry.peak() <= 8);
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while registry.current() > 0 && std::time::Instant::now() < deadline {
        thread::sleep(std::time::Duration::from_millis(10));
    }
    assert_eq!(registry.current(), 0, "clients disconnected cleanly");

    handle.request();
    server_thread.join().unwrap().unwrap();
}

/// Every mechanism the host offers serves the same protocol correctly.
#[test]
fn every_available_mechanism_round_trips() {
    for mechanism in Mechanism::available() {
        let registry = Arc::new(ConnectionRegistry::new());
        let server = EventServer::bind(
            &server_config(),
            mechanism.poller().unwrap(),
            Arc::clone(&registry),
        )
        .unwrap();
        let port = server.local_addr().unwrap().port();
        let handle = server.shutdown_handle();
        let server_thread = thread::spawn(move || server.run());

        let config = client_config(port, 2, 5, 64);
        let sink = SampleSink::new(Vec::new()).unwrap();
        let summary = client::run_with_sink(&config, &sink)
            .unwrap_or_else(|e| panic!("{}: {e}", mechanism.name()));

        assert_eq!(summary.completed, 2, "{}", mechanism.name());
        assert_eq!(sink.recorded(), 10, "{}", mechanism.name());

        handle.request();
        server_thread.join().unwrap().unwrap();
    }
}

/// The same load run against the thread-per-connection architecture: the
/// accept loop, pool-backed serve jobs, and registry all behave as in
/// event-driven mode.
#[test]
fn full_run_against_threaded_server() {
    let registry = Arc::new(ConnectionRegistry::new());
    let server = Arc::new(ThreadedServer::bind(&server_config(), Arc::clone(&registry)).unwrap());
    let port = server.local_addr().unwrap().port();
    let server_thread = {
        let server = Arc::clone(&server);
        thread::spawn(move || server.run())
    };

    let config = client_config(port, 4, 10, 64);
    let sink = SampleSink::new(Vec::new()).unwrap();
    let summary = client::run_with_sink(&config, &sink).unwrap();

    assert_eq!(summary.completed, 4);
    assert_eq!(summary.failed, 0);
    assert_eq!(sink.recorded(), 40);

    // Serve jobs deregister once they observe their peer's close.
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while registry.current() > 0 && std::time::Instant::now() < deadline {
        thread::sleep(std::time::Duration::from_millis(10));
    }
    assert_eq!(registry.current(), 0);
    assert!(registry.peak() >= 1 && registry.peak() <= 4);

    // Close the pool, then poke the blocked accept loop so it notices.
    server.shutdown();
    drop(std::net::TcpStream::connect(("127.0.0.1", port)).unwrap());
    server_thread.join().unwrap().unwrap();
}

/// Requests served while connections stay open are visible in the registry
/// counters and the shutdown report.
#[test]
fn registry_tracks_live_connections() {
    let mechanism = *Mechanism::available().first().expect("no mechanism");
    let registry = Arc::new(ConnectionRegistry::new());
    let server = EventServer::bind(
        &server_config(),
        mechanism.poller().unwrap(),
        Arc::clone(&registry),
    )
    .unwrap();
    let port = server.local_addr().unwrap().port();
    let handle = server.shutdown_handle();
    let server_thread = thread::spawn(move || server.run());

    // Drive one connection by hand and keep it open.
    let mut stream = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
    use std::io::Write;
    for _ in 0..3 {
        stream
            .write_all(&evbench::protocol::encode_request(32))
            .unwrap();
        let mut response = [0u8; 32];
        stream.read_exact(&mut response).unwrap();
    }

    let snapshot = registry.snapshot();
    assert_eq!(snapshot.current, 1);
    assert_eq!(snapshot.clients.len(), 1);
    assert_eq!(snapshot.clients[0].requests_received, 3);
    assert_eq!(snapshot.clients[0].bytes_sent, 96);

    drop(stream);
    handle.request();
    server_thread.join().unwrap().unwrap();
}
