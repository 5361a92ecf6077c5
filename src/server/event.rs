//! Event-driven server: single-threaded readiness dispatch, pooled request
//! handling.
//!
//! The dispatch loop owns the listening socket, every connection, and the
//! chosen readiness mechanism. Each complete request frame becomes a job on
//! the worker pool; the worker builds the payload and updates the registry,
//! then hands the bytes back over a channel and wakes the loop through a
//! self-pipe registered with the poller. All socket I/O stays on the
//! dispatch thread, so workers never touch a descriptor.

use crate::config::ServerConfig;
use crate::pool::{SubmitError, WorkerPool};
use crate::protocol::{self, REQUEST_FRAME_LEN};
use crate::registry::ConnectionRegistry;
use crate::runtime::{Event, Interest, Poller};
use crate::server::{bind_listener, wake_pipe, ShutdownHandle};
use bytes::{Buf, BytesMut};
use slab::Slab;
use std::fs::File;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{mpsc, Arc};
use tracing::{debug, error, info, warn};

const LISTENER_TOKEN: usize = usize::MAX;
const WAKE_TOKEN: usize = usize::MAX - 1;

const READ_CHUNK: usize = 4096;

/// A finished response job, addressed by slab token plus registry id so a
/// recycled slot never receives a stale payload.
struct Completion {
    token: usize,
    client_id: u64,
    payload: Vec<u8>,
}

struct EventConnection {
    stream: TcpStream,
    client_id: u64,
    read_buf: BytesMut,
    write_buf: BytesMut,
    interest: Interest,
}

/// Why a connection event handler gave up on its connection, or on the
/// whole server.
enum DispatchError {
    /// Tear down this one connection; everything else continues.
    Close(io::Error),
    /// The server cannot continue (pool rejected work outside shutdown).
    Fatal(io::Error),
}

/// Readiness-dispatching benchmark server.
pub struct EventServer {
    listener: TcpListener,
    poller: Box<dyn Poller>,
    pool: WorkerPool,
    registry: Arc<ConnectionRegistry>,
    connections: Slab<EventConnection>,
    completions_tx: Sender<Completion>,
    completions_rx: Receiver<Completion>,
    wake_rx: File,
    wake_tx: Arc<File>,
    shutdown: Arc<AtomicBool>,
}

impl EventServer {
    /// Bind the listening socket, spawn the worker pool, and register the
    /// listener and wake pipe with the poller. Dispatch starts on
    /// [`run`](Self::run).
    pub fn bind(
        config: &ServerConfig,
        mut poller: Box<dyn Poller>,
        registry: Arc<ConnectionRegistry>,
    ) -> io::Result<EventServer> {
        let addr: SocketAddr = config
            .listen
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let listener = bind_listener(addr)?;
        listener.set_nonblocking(true)?;

        // Blocking back-pressure: the dispatch thread stalls rather than
        // drops requests when every queue slot is taken.
        let pool = WorkerPool::new(config.workers, config.max_queue, true)?;

        let (wake_rx, wake_tx) = wake_pipe()?;
        let (completions_tx, completions_rx) = mpsc::channel();

        poller.register(listener.as_raw_fd(), LISTENER_TOKEN, Interest::Readable)?;
        poller.register(wake_rx.as_raw_fd(), WAKE_TOKEN, Interest::Readable)?;

        Ok(EventServer {
            listener,
            poller,
            pool,
            registry,
            connections: Slab::new(),
            completions_tx,
            completions_rx,
            wake_rx,
            wake_tx: Arc::new(wake_tx),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(Arc::clone(&self.shutdown), Arc::clone(&self.wake_tx))
    }

    /// Dispatch until shutdown is requested, then print the registry report
    /// and tear the pool down.
    pub fn run(mut self) -> io::Result<()> {
        info!(
            mechanism = self.poller.name(),
            addr = %self.local_addr()?,
            "Server dispatching"
        );

        let mut events: Vec<Event> = Vec::with_capacity(1024);
        loop {
            events.clear();
            self.poller.poll(&mut events, None)?;

            for i in 0..events.len() {
                let event = events[i];
                match event.token {
                    LISTENER_TOKEN => self.accept_ready()?,
                    WAKE_TOKEN => self.drain_wake(),
                    token => {
                        if let Err(e) = self.connection_ready(token, &event) {
                            match e {
                                DispatchError::Close(reason) => {
                                    debug!(token, reason = %reason, "Closing connection");
                                    self.close_connection(token);
                                }
                                DispatchError::Fatal(err) => return Err(err),
                            }
                        }
                    }
                }
            }

            if let Err(err) = self.apply_completions() {
                return Err(err);
            }

            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
        }

        self.poller.deregister(self.listener.as_raw_fd())?;
        print!("{}", self.registry.render_report());
        self.pool.shutdown(false);
        info!("Server stopped");
        Ok(())
    }

    fn accept_ready(&mut self) -> io::Result<()> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(true)?;
                    let client_id = self.registry.register(peer);
                    let token = self.connections.insert(EventConnection {
                        stream,
                        client_id,
                        read_buf: BytesMut::with_capacity(READ_CHUNK),
                        write_buf: BytesMut::new(),
                        interest: Interest::Readable,
                    });

                    let fd = self.connections[token].stream.as_raw_fd();
                    if let Err(e) = self.poller.register(fd, token, Interest::Readable) {
                        error!(error = %e, "Failed to register accepted connection");
                        let conn = self.connections.remove(token);
                        self.registry.deregister(conn.client_id);
                        continue;
                    }

                    debug!(token, peer = %peer, "Accepted connection");
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // A listening-socket error means the server can no longer
                // take load; dispatching on without it would be a lie.
                Err(e) => {
                    error!(error = %e, "Accept failed, stopping server");
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn drain_wake(&mut self) {
        let mut buf = [0u8; 64];
        loop {
            match (&self.wake_rx).read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "Wake pipe read failed");
                    break;
                }
            }
        }
    }

    fn connection_ready(&mut self, token: usize, event: &Event) -> Result<(), DispatchError> {
        if !self.connections.contains(token) {
            // Already closed earlier in this batch.
            return Ok(());
        }

        if event.readable {
            self.fill_read_buffer(token)?;
            self.dispatch_frames(token)?;
        } else if event.closed {
            return Err(DispatchError::Close(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "peer hung up",
            )));
        }

        if event.writable && self.connections.contains(token) {
            self.flush_write_buffer(token)?;
        }

        Ok(())
    }

    /// Drain the socket into the connection's read buffer.
    fn fill_read_buffer(&mut self, token: usize) -> Result<(), DispatchError> {
        let conn = &mut self.connections[token];
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match conn.stream.read(&mut chunk) {
                Ok(0) => {
                    return Err(DispatchError::Close(io::Error::new(
                        io::ErrorKind::ConnectionReset,
                        "peer closed",
                    )));
                }
                Ok(n) => conn.read_buf.extend_from_slice(&chunk[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(DispatchError::Close(e)),
            }
        }
        Ok(())
    }

    /// Submit one response job per complete frame in the read buffer.
    fn dispatch_frames(&mut self, token: usize) -> Result<(), DispatchError> {
        loop {
            let (client_id, size) = {
                let conn = &mut self.connections[token];
                if conn.read_buf.len() < REQUEST_FRAME_LEN {
                    return Ok(());
                }
                let size = protocol::decode_request(&conn.read_buf[..REQUEST_FRAME_LEN])
                    .map_err(|e| {
                        warn!(token, error = %e, "Protocol violation");
                        DispatchError::Close(io::Error::new(io::ErrorKind::InvalidData, e))
                    })?;
                conn.read_buf.advance(REQUEST_FRAME_LEN);
                (conn.client_id, size)
            };

            let registry = Arc::clone(&self.registry);
            let completions = self.completions_tx.clone();
            let wake = Arc::clone(&self.wake_tx);
            let job = Box::new(move || {
                let payload = protocol::printable_payload(size as usize);
                registry.record_request(client_id, payload.len() as u64);
                let sent = completions.send(Completion {
                    token,
                    client_id,
                    payload,
                });
                if sent.is_ok() {
                    let _ = (&*wake).write(&[1]);
                }
            });

            match self.pool.submit(job) {
                Ok(()) => {}
                Err(SubmitError::ShuttingDown) if self.shutdown.load(Ordering::Acquire) => {
                    // Expected race while tearing down; the response is moot.
                    return Ok(());
                }
                Err(e) => {
                    error!(error = %e, "Worker pool rejected a request job");
                    return Err(DispatchError::Fatal(io::Error::new(
                        io::ErrorKind::Other,
                        format!("worker pool cannot keep up: {e}"),
                    )));
                }
            }
        }
    }

    /// Move completed payloads into their connections' write buffers.
    fn apply_completions(&mut self) -> io::Result<()> {
        let mut flushable = Vec::new();
        while let Ok(completion) = self.completions_rx.try_recv() {
            match self.connections.get_mut(completion.token) {
                // Slab slots are recycled; the registry id proves the slot
                // still belongs to the requesting connection.
                Some(conn) if conn.client_id == completion.client_id => {
                    conn.write_buf.extend_from_slice(&completion.payload);
                    flushable.push(completion.token);
                }
                _ => debug!(token = completion.token, "Dropping stale completion"),
            }
        }

        for token in flushable {
            if !self.connections.contains(token) {
                continue;
            }
            if let Err(e) = self.flush_write_buffer(token) {
                match e {
                    DispatchError::Close(reason) => {
                        debug!(token, reason = %reason, "Closing connection");
                        self.close_connection(token);
                    }
                    DispatchError::Fatal(err) => return Err(err),
                }
            }
        }
        Ok(())
    }

    /// Write as much buffered output as the socket accepts, then adjust
    /// write interest to match what is left.
    fn flush_write_buffer(&mut self, token: usize) -> Result<(), DispatchError> {
        let conn = &mut self.connections[token];
        while !conn.write_buf.is_empty() {
            match conn.stream.write(&conn.write_buf) {
                Ok(0) => {
                    return Err(DispatchError::Close(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "write returned 0",
                    )));
                }
                Ok(n) => conn.write_buf.advance(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(DispatchError::Close(e)),
            }
        }

        let desired = if conn.write_buf.is_empty() {
            Interest::Readable
        } else {
            Interest::Both
        };
        if conn.interest != desired {
            let fd = conn.stream.as_raw_fd();
            self.poller
                .reregister(fd, token, desired)
                .map_err(DispatchError::Fatal)?;
            self.connections[token].interest = desired;
        }
        Ok(())
    }

    fn close_connection(&mut self, token: usize) {
        if !self.connections.contains(token) {
            return;
        }
        let conn = self.connections.remove(token);
        if let Err(e) = self.poller.deregister(conn.stream.as_raw_fd()) {
            warn!(token, error = %e, "Failed to deregister connection");
        }
        self.registry.deregister(conn.client_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServerConfig, ServerMode};
    use crate::runtime::Mechanism;

    fn config() -> ServerConfig {
        ServerConfig {
            listen: "127.0.0.1:0".to_string(),
            mode: ServerMode::Poll,
            workers: 1,
            max_queue: 4,
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn test_listener_failure_is_fatal() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut server = EventServer::bind(
            &config(),
            Mechanism::Poll.poller().unwrap(),
            registry,
        )
        .unwrap();

        // Break the listening socket out from under the server; the next
        // accept fails with a non-transient error.
        unsafe { libc::shutdown(server.listener.as_raw_fd(), libc::SHUT_RDWR) };
        assert!(server.accept_ready().is_err());
    }
}
