//! Readiness via `mio::Poll`: epoll on Linux, kqueue on macOS and the BSDs.
//!
//! The dispatch loop owns plain non-blocking sockets, so descriptors are
//! registered through `SourceFd` rather than mio's own net types.

use super::{Event, Interest, Poller};
use mio::unix::SourceFd;
use mio::Token;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

pub struct MioPoller {
    poll: mio::Poll,
    events: mio::Events,
    name: &'static str,
}

impl MioPoller {
    pub fn new(name: &'static str) -> io::Result<Self> {
        Ok(Self {
            poll: mio::Poll::new()?,
            events: mio::Events::with_capacity(1024),
            name,
        })
    }
}

fn mio_interest(interest: Interest) -> mio::Interest {
    match interest {
        Interest::Readable => mio::Interest::READABLE,
        Interest::Writable => mio::Interest::WRITABLE,
        Interest::Both => mio::Interest::READABLE | mio::Interest::WRITABLE,
    }
}

impl Poller for MioPoller {
    fn register(&mut self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), Token(token), mio_interest(interest))
    }

    fn reregister(&mut self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        self.poll
            .registry()
            .reregister(&mut SourceFd(&fd), Token(token), mio_interest(interest))
    }

    fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        self.poll.registry().deregister(&mut SourceFd(&fd))
    }

    fn poll(&mut self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()> {
        loop {
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        for event in self.events.iter() {
            events.push(Event {
                token: event.token().0,
                readable: event.is_readable(),
                writable: event.is_writable(),
                closed: event.is_error() || event.is_read_closed(),
            });
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        self.name
    }
}
