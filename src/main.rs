//! hxm
//!
//! A small reparenting X11 window manager built around a single-threaded
//! tick loop: read events, coalesce them, apply them to the client model,
//! then flush the accumulated changes in one batch.

mod config;
mod shared;
mod signals;
mod wm;
mod x11_async;

use std::ffi::CString;

use anyhow::{Context, Result, bail};
use nix::sys::signal::{Signal, kill};
use nix::unistd::{Pid, execv};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::wm::WindowManager;
use crate::wm::tick::RunExit;
use crate::wm::x11rb_conn::X11rbConn;
use crate::wm::xconn::{NONE, Window, XConn, predefined};
use crate::x11_async::XPoller;

const USAGE: &str = "\
Usage: hxm [OPTION]

Without an option, run the window manager on $DISPLAY.

Options for a running instance:
  --dump-stats    log runtime counters (SIGUSR1)
  --exit          shut down (SIGTERM)
  --restart       restart in place (SIGUSR2)
  --reconfigure   reload the configuration file (SIGHUP)
  --help          show this help
";

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| "hxm=info".into())))
        .with(fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None => run(),
        Some("--help") | Some("-h") => {
            print!("{}", USAGE);
            Ok(())
        }
        Some("--dump-stats") => signal_running(Signal::SIGUSR1),
        Some("--exit") => signal_running(Signal::SIGTERM),
        Some("--restart") => signal_running(Signal::SIGUSR2),
        Some("--reconfigure") => signal_running(Signal::SIGHUP),
        Some(other) => {
            eprint!("{}", USAGE);
            bail!("unknown option {:?}", other)
        }
    }
}

fn run() -> Result<()> {
    info!("Starting hxm {}", env!("CARGO_PKG_VERSION"));
    signals::install().context("Failed to install signal handlers")?;

    let config = config::Config::load().context("Failed to load configuration")?;
    let conn = X11rbConn::connect(None)?;
    let mut poller = XPoller::new(conn.raw_fd())?;

    let mut wm = WindowManager::new(conn, config, &signals::FLAGS)?;
    wm.start()?;
    info!("hxm is running");

    let exit = wm.run(&mut poller);
    wm.stats().dump();
    wm.cleanup();
    drop(wm);

    if exit == RunExit::Restart {
        restart()?;
    }
    info!("Goodbye");
    Ok(())
}

/// Replace this process with a fresh copy of the same binary.
fn restart() -> Result<()> {
    info!("Restarting");
    let exe = CString::new("/proc/self/exe")?;
    let args = std::env::args().map(CString::new).collect::<Result<Vec<_>, _>>()?;
    match execv(&exe, &args) {
        Ok(never) => match never {},
        Err(e) => {
            error!("Failed to re-exec: {}", e);
            Err(e).context("Failed to restart")
        }
    }
}

/// Deliver `signal` to the window manager running on the display.
fn signal_running(signal: Signal) -> Result<()> {
    let conn = X11rbConn::connect(None)?;
    let pid = find_running_pid(&conn)?;
    kill(Pid::from_raw(pid as i32), signal).with_context(|| format!("Failed to signal process {}", pid))?;
    info!("Sent {} to hxm (pid {})", signal, pid);
    Ok(())
}

fn find_running_pid<C: XConn>(conn: &C) -> Result<u32> {
    let atoms = conn.intern_atoms(&["_NET_SUPPORTING_WM_CHECK", "WM_S0", "_NET_WM_PID"])?;
    let [check_atom, selection, pid_atom] = atoms[..] else {
        bail!("Failed to intern lookup atoms");
    };

    let read_window = |window: Window, atom| -> Option<u32> {
        conn.get_property_sync(window, atom, predefined::ANY, 1)
            .ok()
            .flatten()
            .and_then(|reply| reply.value32().first().copied())
    };

    let mut candidates = Vec::new();
    if let Some(check) = read_window(conn.root(), check_atom).filter(|w| *w != NONE) {
        candidates.push(check);
    }
    match conn.get_selection_owner(selection) {
        Ok(owner) if owner != NONE => candidates.push(owner),
        Ok(_) => {}
        Err(e) => warn!("Failed to query WM_S0 owner: {}", e),
    }

    candidates
        .into_iter()
        .find_map(|window| read_window(window, pid_atom))
        .context("No running hxm instance found on this display")
}
