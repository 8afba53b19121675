//! Signal bridge
//!
//! Signal handlers only store into atomic flags; the tick loop reads them at
//! the top of every iteration. Handlers are installed without `SA_RESTART`
//! so a blocking readiness wait returns `EINTR` and the loop notices the
//! flag promptly.

use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use tracing::debug;

/// Requests raised asynchronously, by signals or by key bindings.
#[derive(Debug)]
pub struct SignalFlags {
    shutdown: AtomicBool,
    restart: AtomicBool,
    reload: AtomicBool,
    dump_stats: AtomicBool,
}

impl SignalFlags {
    pub const fn new() -> Self {
        Self {
            shutdown: AtomicBool::new(false),
            restart: AtomicBool::new(false),
            reload: AtomicBool::new(false),
            dump_stats: AtomicBool::new(false),
        }
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn request_restart(&self) {
        self.restart.store(true, Ordering::SeqCst);
    }

    pub fn request_reload(&self) {
        self.reload.store(true, Ordering::SeqCst);
    }

    pub fn request_dump_stats(&self) {
        self.dump_stats.store(true, Ordering::SeqCst);
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn restart_requested(&self) -> bool {
        self.restart.load(Ordering::SeqCst)
    }

    /// Consume a pending reload request.
    pub fn take_reload(&self) -> bool {
        self.reload.swap(false, Ordering::SeqCst)
    }

    /// Consume a pending counter dump request.
    pub fn take_dump_stats(&self) -> bool {
        self.dump_stats.swap(false, Ordering::SeqCst)
    }

    /// Any flag the tick loop reacts to without X input.
    pub fn any_pending(&self) -> bool {
        self.shutdown_requested()
            || self.restart_requested()
            || self.reload.load(Ordering::SeqCst)
            || self.dump_stats.load(Ordering::SeqCst)
    }
}

impl Default for SignalFlags {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide flags the installed handlers write to.
pub static FLAGS: SignalFlags = SignalFlags::new();

extern "C" fn on_signal(signum: nix::libc::c_int) {
    match Signal::try_from(signum) {
        Ok(Signal::SIGINT) | Ok(Signal::SIGTERM) => FLAGS.request_shutdown(),
        Ok(Signal::SIGHUP) => FLAGS.request_reload(),
        Ok(Signal::SIGUSR1) => FLAGS.request_dump_stats(),
        Ok(Signal::SIGUSR2) => FLAGS.request_restart(),
        _ => {}
    }
}

/// Install handlers for INT/TERM (shutdown), HUP (reload), USR1 (dump
/// counters) and USR2 (restart). Children are reaped by the spawn helper, so
/// SIGCHLD keeps its default disposition.
pub fn install() -> nix::Result<()> {
    let action = SigAction::new(SigHandler::Handler(on_signal), SaFlags::empty(), SigSet::empty());
    for signal in [Signal::SIGINT, Signal::SIGTERM, Signal::SIGHUP, Signal::SIGUSR1, Signal::SIGUSR2] {
        // SAFETY: the handler only performs atomic stores.
        unsafe { sigaction(signal, &action) }?;
    }
    debug!("Signal handlers installed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_consumes_the_request() {
        let flags = SignalFlags::new();
        assert!(!flags.any_pending());
        flags.request_reload();
        assert!(flags.any_pending());
        assert!(flags.take_reload());
        assert!(!flags.take_reload());
        assert!(!flags.any_pending());
    }

    #[test]
    fn shutdown_stays_set() {
        let flags = SignalFlags::new();
        flags.request_shutdown();
        assert!(flags.shutdown_requested());
        assert!(flags.shutdown_requested());
    }
}
