//! Readiness-notification backends for the event-driven server.
//!
//! The dispatch loop is written against the [`Poller`] trait; each OS
//! mechanism gets its own implementation:
//! - `epoll` / `kqueue`: via `mio::Poll` (epoll on Linux, kqueue on macOS)
//! - `poll`: `poll(2)` through libc
//! - `select`: `select(2)` through libc, bounded by `FD_SETSIZE`
//!
//! The operator picks exactly one mechanism by name. Asking for a mechanism
//! the host does not provide is an error that lists the alternatives; it is
//! never silently substituted.

mod mio_backend;
mod poll;
mod select;

pub use mio_backend::MioPoller;
pub use poll::PollPoller;
pub use select::SelectPoller;

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Which readiness transitions a registration cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Readable,
    Writable,
    Both,
}

impl Interest {
    pub fn readable(self) -> bool {
        matches!(self, Interest::Readable | Interest::Both)
    }

    pub fn writable(self) -> bool {
        matches!(self, Interest::Writable | Interest::Both)
    }
}

/// One readiness event delivered by a poller.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub token: usize,
    pub readable: bool,
    pub writable: bool,
    /// Hang-up or error on the descriptor; the owner should tear it down.
    pub closed: bool,
}

/// A readiness-notification mechanism the dispatch loop can wait on.
///
/// Registrations are keyed by caller-chosen tokens; a descriptor is
/// registered at most once and its interest changed with `reregister`.
pub trait Poller: Send {
    fn register(&mut self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()>;
    fn reregister(&mut self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()>;
    fn deregister(&mut self, fd: RawFd) -> io::Result<()>;

    /// Block until at least one registered descriptor is ready (or the
    /// timeout elapses), appending events to `events`.
    fn poll(&mut self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()>;

    /// Mechanism name as reported to the operator.
    fn name(&self) -> &'static str;
}

/// The readiness mechanisms this crate knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    Epoll,
    Kqueue,
    Poll,
    Select,
}

impl Mechanism {
    pub const ALL: [Mechanism; 4] = [
        Mechanism::Epoll,
        Mechanism::Kqueue,
        Mechanism::Poll,
        Mechanism::Select,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Mechanism::Epoll => "epoll",
            Mechanism::Kqueue => "kqueue",
            Mechanism::Poll => "poll",
            Mechanism::Select => "select",
        }
    }

    /// Mechanisms the current host can provide.
    pub fn available() -> Vec<Mechanism> {
        Self::ALL
            .iter()
            .copied()
            .filter(|m| m.is_available())
            .collect()
    }

    pub fn is_available(self) -> bool {
        match self {
            Mechanism::Epoll => cfg!(target_os = "linux"),
            Mechanism::Kqueue => cfg!(any(
                target_os = "macos",
                target_os = "freebsd",
                target_os = "netbsd",
                target_os = "openbsd"
            )),
            Mechanism::Poll | Mechanism::Select => cfg!(unix),
        }
    }

    /// Construct the poller for this mechanism.
    ///
    /// Asking for a mechanism the host lacks yields an `Unsupported` error
    /// wrapping a [`MechanismError`] that lists the alternatives.
    pub fn poller(self) -> io::Result<Box<dyn Poller>> {
        if !self.is_available() {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                MechanismError {
                    requested: self,
                    available: Mechanism::available(),
                },
            ));
        }

        match self {
            Mechanism::Epoll | Mechanism::Kqueue => {
                Ok(Box::new(MioPoller::new(self.name())?))
            }
            Mechanism::Poll => Ok(Box::new(PollPoller::new())),
            Mechanism::Select => Ok(Box::new(SelectPoller::new())),
        }
    }
}

impl std::str::FromStr for Mechanism {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "epoll" => Ok(Mechanism::Epoll),
            "kqueue" => Ok(Mechanism::Kqueue),
            "poll" => Ok(Mechanism::Poll),
            "select" => Ok(Mechanism::Select),
            other => Err(format!("unknown mechanism `{other}`")),
        }
    }
}

/// The requested mechanism cannot be used on this host.
#[derive(Debug)]
pub struct MechanismError {
    pub requested: Mechanism,
    pub available: Vec<Mechanism>,
}

impl std::fmt::Display for MechanismError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.available.iter().map(|m| m.name()).collect();
        write!(
            f,
            "event mechanism `{}` is not available on this host (available: {})",
            self.requested.name(),
            names.join(", ")
        )
    }
}

impl std::error::Error for MechanismError {}
