//! Thread-per-connection server.
//!
//! The simpler architecture sharing the wire protocol and registry with the
//! event-driven server: a blocking accept loop hands each connection to the
//! worker pool as one long-running "serve this connection" job. Pool
//! back-pressure throttles the accept loop when every worker is occupied.
//! Handler jobs are disposable, stateless loops; shutdown just reports and
//! exits without cancelling them.

use crate::config::ServerConfig;
use crate::pool::{SubmitError, WorkerPool};
use crate::protocol::{self, decode_request, read_frame};
use crate::registry::ConnectionRegistry;
use crate::server::bind_listener;
use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct ThreadedServer {
    listener: std::net::TcpListener,
    pool: WorkerPool,
    registry: Arc<ConnectionRegistry>,
}

impl ThreadedServer {
    pub fn bind(
        config: &ServerConfig,
        registry: Arc<ConnectionRegistry>,
    ) -> io::Result<ThreadedServer> {
        let addr: SocketAddr = config
            .listen
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let listener = bind_listener(addr)?;
        let pool = WorkerPool::new(config.workers, config.max_queue, true)?;

        Ok(ThreadedServer {
            listener,
            pool,
            registry,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Close the pool so the accept loop stops on its next connection.
    ///
    /// The loop is blocked in `accept`, so the stop takes effect when a
    /// further connection arrives, not instantly. In-flight serve jobs run
    /// until their peers close.
    pub fn shutdown(&self) {
        self.pool.shutdown(false);
    }

    /// Accept connections until the process exits or a fatal error occurs.
    pub fn run(&self) -> io::Result<()> {
        info!(addr = %self.local_addr()?, "Server accepting (thread-per-connection)");

        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "Accept failed");
                    return Err(e);
                }
            };

            let client_id = self.registry.register(peer);
            debug!(client_id, peer = %peer, "Accepted connection");

            let registry = Arc::clone(&self.registry);
            let job = Box::new(move || serve_connection(stream, client_id, registry));

            match self.pool.submit(job) {
                Ok(()) => {}
                Err(SubmitError::ShuttingDown) => {
                    self.registry.deregister(client_id);
                    info!("Pool shutting down, no longer accepting");
                    return Ok(());
                }
                Err(e) => {
                    // Unreachable under the blocking policy, but a rejection
                    // here means the server cannot serve its load.
                    self.registry.deregister(client_id);
                    error!(error = %e, "Worker pool rejected a connection job");
                    return Err(io::Error::new(io::ErrorKind::Other, e));
                }
            }
        }
    }
}

/// Per-connection serve loop: one request frame in, one payload out, until
/// the peer closes.
fn serve_connection(mut stream: TcpStream, client_id: u64, registry: Arc<ConnectionRegistry>) {
    loop {
        let frame = match read_frame(&mut stream) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!(client_id, "Peer closed");
                break;
            }
            Err(e) => {
                debug!(client_id, error = %e, "Read failed");
                break;
            }
        };

        let size = match decode_request(&frame) {
            Ok(size) => size,
            Err(e) => {
                warn!(client_id, error = %e, "Protocol violation");
                break;
            }
        };

        let payload = protocol::printable_payload(size as usize);
        if let Err(e) = stream.write_all(&payload) {
            debug!(client_id, error = %e, "Write failed");
            break;
        }

        registry.record_request(client_id, payload.len() as u64);
    }

    registry.deregister(client_id);
}
