//! Benchmark server architectures.
//!
//! Two interchangeable designs answer the same wire protocol:
//! - [`event::EventServer`]: single-threaded readiness dispatch over a
//!   selectable OS mechanism, fanning request handling out to the worker pool.
//! - [`threaded::ThreadedServer`]: a blocking accept loop that gives every
//!   connection its own long-running serve job on the worker pool.
//!
//! Both share the connection registry and the shutdown report. Shutdown
//! arrives asynchronously (a signal in the binaries); the dedicated listener
//! thread triggers it through a [`ShutdownHandle`].

pub mod event;
pub mod threaded;

pub use event::EventServer;
pub use threaded::ThreadedServer;

use std::fs::File;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::os::unix::io::FromRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Backlog sized for connection storms from the load driver.
const LISTEN_BACKLOG: i32 = 65535;

/// Bind a listening socket with address reuse so a restarted benchmark can
/// take the port back immediately.
pub(crate) fn bind_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}

/// Non-blocking pipe used to wake a blocked poll wait: `(read end, write end)`.
pub(crate) fn wake_pipe() -> io::Result<(File, File)> {
    let mut fds = [0 as libc::c_int; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } == -1 {
        return Err(io::Error::last_os_error());
    }
    for &fd in &fds {
        if unsafe { libc::fcntl(fd, libc::F_SETFL, libc::O_NONBLOCK) } == -1 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(fds[0]);
                libc::close(fds[1]);
            }
            return Err(err);
        }
    }
    // Safety: both fds come fresh from pipe(2) and are owned here.
    Ok(unsafe { (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])) })
}

/// Asynchronous stop trigger for a running [`EventServer`].
///
/// Cloneable and `Send`; the binaries hand it to a signal-listener thread,
/// tests call it directly.
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    wake: Arc<File>,
}

impl ShutdownHandle {
    pub(crate) fn new(flag: Arc<AtomicBool>, wake: Arc<File>) -> Self {
        Self { flag, wake }
    }

    /// Request shutdown and wake the dispatch loop.
    pub fn request(&self) {
        self.flag.store(true, Ordering::Release);
        let _ = (&*self.wake).write(&[1]);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
