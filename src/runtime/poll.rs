//! Readiness via `poll(2)`.
//!
//! Registrations live in an ordered map; every wait rebuilds the `pollfd`
//! array from it. O(n) per wait, which is the point of benchmarking this
//! mechanism against epoll/kqueue.

use super::{Event, Interest, Poller};
use std::collections::BTreeMap;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

pub struct PollPoller {
    registrations: BTreeMap<RawFd, (usize, Interest)>,
}

impl PollPoller {
    pub fn new() -> Self {
        Self {
            registrations: BTreeMap::new(),
        }
    }
}

impl Default for PollPoller {
    fn default() -> Self {
        Self::new()
    }
}

fn poll_events(interest: Interest) -> libc::c_short {
    let mut events = 0;
    if interest.readable() {
        events |= libc::POLLIN;
    }
    if interest.writable() {
        events |= libc::POLLOUT;
    }
    events
}

impl Poller for PollPoller {
    fn register(&mut self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        if self.registrations.insert(fd, (token, interest)).is_some() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("fd {fd} is already registered"),
            ));
        }
        Ok(())
    }

    fn reregister(&mut self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        match self.registrations.get_mut(&fd) {
            Some(entry) => {
                *entry = (token, interest);
                Ok(())
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("fd {fd} is not registered"),
            )),
        }
    }

    fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        match self.registrations.remove(&fd) {
            Some(_) => Ok(()),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("fd {fd} is not registered"),
            )),
        }
    }

    fn poll(&mut self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()> {
        let mut pollfds: Vec<libc::pollfd> = self
            .registrations
            .iter()
            .map(|(&fd, &(_, interest))| libc::pollfd {
                fd,
                events: poll_events(interest),
                revents: 0,
            })
            .collect();

        // poll(2) only has millisecond resolution; a non-zero wait must not
        // truncate down to a busy spin.
        let timeout_ms = match timeout {
            Some(t) if t.is_zero() => 0,
            Some(t) => t.as_millis().clamp(1, libc::c_int::MAX as u128) as libc::c_int,
            None => -1,
        };

        let ready = loop {
            let rc = unsafe {
                libc::poll(
                    pollfds.as_mut_ptr(),
                    pollfds.len() as libc::nfds_t,
                    timeout_ms,
                )
            };
            if rc >= 0 {
                break rc;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        };

        if ready == 0 {
            return Ok(());
        }

        for pollfd in &pollfds {
            if pollfd.revents == 0 {
                continue;
            }
            let (token, _) = self.registrations[&pollfd.fd];
            let closed =
                pollfd.revents & (libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0;
            events.push(Event {
                token,
                // A hang-up still has to be drained: readiness for read
                // includes HUP so the owner observes EOF via read().
                readable: pollfd.revents & (libc::POLLIN | libc::POLLHUP) != 0,
                writable: pollfd.revents & libc::POLLOUT != 0,
                closed,
            });
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "poll"
    }
}
