//! Readiness via `select(2)`.
//!
//! The oldest mechanism in the set, kept for comparison runs. Descriptors
//! must fit below `FD_SETSIZE`; registrations beyond that limit are refused
//! up front rather than corrupting the fd sets.

use super::{Event, Interest, Poller};
use std::collections::BTreeMap;
use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::ptr;
use std::time::Duration;

pub struct SelectPoller {
    registrations: BTreeMap<RawFd, (usize, Interest)>,
}

impl SelectPoller {
    pub fn new() -> Self {
        Self {
            registrations: BTreeMap::new(),
        }
    }
}

impl Default for SelectPoller {
    fn default() -> Self {
        Self::new()
    }
}

fn check_fd(fd: RawFd) -> io::Result<()> {
    if fd < 0 || fd >= libc::FD_SETSIZE as RawFd {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("fd {fd} is outside the select() FD_SETSIZE limit"),
        ));
    }
    Ok(())
}

impl Poller for SelectPoller {
    fn register(&mut self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        check_fd(fd)?;
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
        let mut read_set: libc::fd_set = unsafe { mem::zeroed() };
        let mut write_set: libc::fd_set = unsafe { mem::zeroed() };
        let mut error_set: libc::fd_set = unsafe { mem::zeroed() };

        let ready = loop {
            // select() mutates the sets and (on Linux) the timeout, so both
            // are rebuilt on every attempt.
            unsafe {
                libc::FD_ZERO(&mut read_set);
                libc::FD_ZERO(&mut write_set);
                libc::FD_ZERO(&mut error_set);
            }
            let mut max_fd: RawFd = -1;
            for (&fd, &(_, interest)) in &self.registrations {
                unsafe {
                    if interest.readable() {
                        libc::FD_SET(fd, &mut read_set);
                    }
                    if interest.writable() {
                        libc::FD_SET(fd, &mut write_set);
                    }
                    libc::FD_SET(fd, &mut error_set);
                }
                max_fd = max_fd.max(fd);
            }

            let mut timeval = timeout.map(|t| libc::timeval {
                tv_sec: t.as_secs() as libc::time_t,
                tv_usec: t.subsec_micros() as libc::suseconds_t,
            });
            let timeval_ptr = timeval
                .as_mut()
                .map_or(ptr::null_mut(), |t| t as *mut libc::timeval);

            let rc = unsafe {
                libc::select(
                    max_fd + 1,
                    &mut read_set,
                    &mut write_set,
                    &mut error_set,
                    timeval_ptr,
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

        for (&fd, &(token, _)) in &self.registrations {
            let readable = unsafe { libc::FD_ISSET(fd, &read_set) };
            let writable = unsafe { libc::FD_ISSET(fd, &write_set) };
            let closed = unsafe { libc::FD_ISSET(fd, &error_set) };
            if readable || writable || closed {
                events.push(Event {
                    token,
                    readable,
                    writable,
                    closed,
                });
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "select"
    }
}
