//! X11 Readiness Wait
//!
//! Blocking readiness wait on the display socket using mio, following
//! LeftWM's approach of registering the raw X11 file descriptor. The tick
//! loop is single threaded, so the poll runs inline instead of on a helper
//! thread.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use anyhow::{Context, Result};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

const X11_TOKEN: Token = Token(0);

/// Outcome of one wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The socket has data to read.
    Readable,
    /// The timeout elapsed, or a signal interrupted the wait.
    Idle,
    /// The server hung up or the socket failed.
    Closed,
}

pub struct XPoller {
    poll: Poll,
    events: Events,
}

impl XPoller {
    /// Register the display connection's file descriptor.
    pub fn new(fd: RawFd) -> Result<Self> {
        let poll = Poll::new().context("Failed to create mio Poll")?;
        poll.registry()
            .register(&mut SourceFd(&fd), X11_TOKEN, Interest::READABLE)
            .context("Failed to register X11 FD with mio")?;
        Ok(Self { poll, events: Events::with_capacity(4) })
    }

    /// Block until the socket is readable or `timeout` passes. `None`
    /// waits indefinitely.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<Readiness> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            // A signal handler ran; the caller re-checks its flags.
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Readiness::Idle),
            Err(e) => return Err(e).context("X11 socket poll failed"),
        }

        let mut readiness = Readiness::Idle;
        for event in self.events.iter().filter(|event| event.token() == X11_TOKEN) {
            if event.is_error() || (event.is_read_closed() && !event.is_readable()) {
                return Ok(Readiness::Closed);
            }
            if event.is_readable() {
                readiness = Readiness::Readable;
            }
        }
        Ok(readiness)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn times_out_without_data() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut poller = XPoller::new(a.as_raw_fd()).unwrap();
        let readiness = poller.wait(Some(Duration::from_millis(10))).unwrap();
        assert_eq!(readiness, Readiness::Idle);
    }

    #[test]
    fn reports_readable_data() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let mut poller = XPoller::new(a.as_raw_fd()).unwrap();
        b.write_all(b"x").unwrap();
        let readiness = poller.wait(Some(Duration::from_secs(1))).unwrap();
        assert_eq!(readiness, Readiness::Readable);
    }
}
