//! Keyboard Module
//!
//! Key bindings parsed from configuration, passive key grabs on the root
//! window, and dispatch of matched bindings to window manager actions.

use std::ffi::CString;
use std::os::unix::io::RawFd;
use std::str::FromStr;

use anyhow::Result;
use nix::sys::wait::waitpid;
use nix::libc::_exit;
use nix::unistd::{ForkResult, close, execv, fork, setsid};
use tracing::{debug, info, warn};

use crate::config::ConfigError;
use crate::wm::moveresize::{InteractionMode, ResizeDir};
use crate::wm::slotmap::Handle;
use crate::wm::xconn::{PointerEvent, XConn, modmask};
use crate::wm::WindowManager;

/// Modifiers ignored when matching bindings: Lock, NumLock (Mod2) and Mod5.
pub const IGNORED_MODS: u16 = modmask::LOCK | modmask::MOD2 | modmask::MOD5;

/// Lock combinations every binding is grabbed under.
const LOCK_VARIANTS: [u16; 4] = [0, modmask::LOCK, modmask::MOD2, modmask::LOCK | modmask::MOD2];

pub mod keysym {
    pub const TAB: u32 = 0xff09;
    pub const RETURN: u32 = 0xff0d;
    pub const ESCAPE: u32 = 0xff1b;
    pub const HOME: u32 = 0xff50;
    pub const LEFT: u32 = 0xff51;
    pub const UP: u32 = 0xff52;
    pub const RIGHT: u32 = 0xff53;
    pub const DOWN: u32 = 0xff54;
    pub const END: u32 = 0xff57;
    pub const KP_ENTER: u32 = 0xff8d;
    pub const F1: u32 = 0xffbe;
}

/// What a key binding (or a root menu entry) does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Close,
    FocusNext,
    FocusPrev,
    Terminal,
    Exec(String),
    Reload,
    Restart,
    Exit,
    Workspace(u32),
    WorkspaceNext,
    WorkspacePrev,
    MoveToWorkspace(u32),
    MoveToWorkspaceFollow(u32),
    ToggleSticky,
    Move,
    Resize,
}

fn parse_index(action: &str, arg: Option<&str>) -> Result<u32, ConfigError> {
    let arg = arg.ok_or_else(|| ConfigError::MissingArgument(action.to_string()))?;
    arg.parse::<u32>().map_err(|_| ConfigError::InvalidNumber(arg.to_string()))
}

impl FromStr for Action {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (name, arg) = match s.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, Some(rest.trim()).filter(|r| !r.is_empty())),
            None => (s, None),
        };

        let action = match name.to_ascii_lowercase().as_str() {
            "close" => Action::Close,
            "focus_next" => Action::FocusNext,
            "focus_prev" => Action::FocusPrev,
            "terminal" => Action::Terminal,
            "exec" => Action::Exec(arg.ok_or_else(|| ConfigError::MissingArgument(name.to_string()))?.to_string()),
            "reload" => Action::Reload,
            "restart" => Action::Restart,
            "exit" => Action::Exit,
            "workspace" => Action::Workspace(parse_index(name, arg)?),
            "workspace_next" => Action::WorkspaceNext,
            "workspace_prev" => Action::WorkspacePrev,
            "move_to_workspace" => Action::MoveToWorkspace(parse_index(name, arg)?),
            "move_to_workspace_follow" => Action::MoveToWorkspaceFollow(parse_index(name, arg)?),
            "toggle_sticky" => Action::ToggleSticky,
            "move" => Action::Move,
            "resize" => Action::Resize,
            _ => return Err(ConfigError::UnknownAction(s.to_string())),
        };
        Ok(action)
    }
}

/// Key binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBinding {
    /// Modifier mask, lock modifiers excluded
    pub modifiers: u16,
    pub keysym: u32,
    pub action: Action,
}

impl FromStr for KeyBinding {
    type Err = ConfigError;

    /// `Mod4+Shift+Return: exec xterm`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (keys, action) = s.split_once(':').ok_or_else(|| ConfigError::MissingColon(s.to_string()))?;

        let mut parts: Vec<&str> = keys.split('+').map(str::trim).collect();
        let key = parts.pop().unwrap_or_default();

        let mut modifiers = 0u16;
        for name in parts {
            modifiers |= modifier_from_name(name).ok_or_else(|| ConfigError::UnknownModifier(name.to_string()))?;
        }

        let keysym = keysym_from_name(key).ok_or_else(|| ConfigError::UnknownKeysym(key.to_string()))?;

        Ok(Self { modifiers, keysym, action: action.parse()? })
    }
}

pub fn modifier_from_name(name: &str) -> Option<u16> {
    let mask = match name.to_ascii_lowercase().as_str() {
        "mod1" | "alt" => modmask::MOD1,
        "mod2" => modmask::MOD2,
        "mod3" => modmask::MOD3,
        "mod4" | "super" => modmask::MOD4,
        "mod5" => modmask::MOD5,
        "control" | "ctrl" => modmask::CONTROL,
        "shift" => modmask::SHIFT,
        "lock" => modmask::LOCK,
        _ => return None,
    };
    Some(mask)
}

/// Keysym for a key name as written in X keysym tables. Single letters map
/// to their lowercase keysym, which is what the first keymap column holds.
pub fn keysym_from_name(name: &str) -> Option<u32> {
    if let [c] = name.as_bytes() {
        if c.is_ascii_alphanumeric() {
            return Some(c.to_ascii_lowercase() as u32);
        }
    }

    if let Some(n) = name.strip_prefix('F').and_then(|n| n.parse::<u32>().ok()) {
        if (1..=35).contains(&n) {
            return Some(keysym::F1 + n - 1);
        }
    }

    let sym = match name {
        "Return" => keysym::RETURN,
        "Tab" => keysym::TAB,
        "Escape" => keysym::ESCAPE,
        "BackSpace" => 0xff08,
        "Delete" => 0xffff,
        "Insert" => 0xff63,
        "Home" => keysym::HOME,
        "End" => keysym::END,
        "Prior" | "Page_Up" => 0xff55,
        "Next" | "Page_Down" => 0xff56,
        "Left" => keysym::LEFT,
        "Up" => keysym::UP,
        "Right" => keysym::RIGHT,
        "Down" => keysym::DOWN,
        "Print" => 0xff61,
        "Pause" => 0xff13,
        "Menu" => 0xff67,
        "KP_Enter" => keysym::KP_ENTER,
        "space" => 0x0020,
        "minus" => 0x002d,
        "equal" => 0x003d,
        "comma" => 0x002c,
        "period" => 0x002e,
        "slash" => 0x002f,
        "backslash" => 0x005c,
        "semicolon" => 0x003b,
        "apostrophe" => 0x0027,
        "grave" => 0x0060,
        "bracketleft" => 0x005b,
        "bracketright" => 0x005d,
        "XF86AudioMute" => 0x1008ff12,
        "XF86AudioLowerVolume" => 0x1008ff11,
        "XF86AudioRaiseVolume" => 0x1008ff13,
        "XF86AudioPlay" => 0x1008ff14,
        "XF86AudioPrev" => 0x1008ff16,
        "XF86AudioNext" => 0x1008ff17,
        "XF86MonBrightnessUp" => 0x1008ff02,
        "XF86MonBrightnessDown" => 0x1008ff03,
        _ => return None,
    };
    Some(sym)
}

pub fn clean_mods(state: u16) -> u16 {
    state & !IGNORED_MODS & 0xff
}

/// Run `command` through `/bin/sh -c`, detached from the window manager by a
/// double fork so no zombie is left behind.
pub fn spawn(command: &str, x_fd: RawFd) {
    let (Ok(sh), Ok(flag), Ok(cmd)) = (CString::new("/bin/sh"), CString::new("-c"), CString::new(command)) else {
        warn!("Refusing to spawn command with an embedded NUL: {:?}", command);
        return;
    };
    let argv = [sh.clone(), flag, cmd];

    // SAFETY: the child only calls async-signal-safe functions before exec.
    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => {
            if let Err(e) = waitpid(child, None) {
                debug!("waitpid for spawn helper failed: {}", e);
            }
        }
        Ok(ForkResult::Child) => {
            let _ = setsid();
            // SAFETY: as above.
            if let Ok(ForkResult::Child) = unsafe { fork() } {
                if x_fd >= 0 {
                    let _ = close(x_fd);
                }
                let _ = execv(&sh, &argv);
                unsafe { _exit(127) };
            }
            unsafe { _exit(0) };
        }
        Err(e) => warn!("fork failed while spawning {:?}: {}", command, e),
    }
}

impl<C: XConn> WindowManager<C> {
    /// Ungrab everything on the root window and grab every bound key under
    /// each lock combination.
    pub(crate) fn setup_keys(&mut self) {
        match self.conn.keyboard_mapping() {
            Ok(mapping) => self.keymap = mapping,
            Err(e) => warn!("Failed to refresh keyboard mapping: {}", e),
        }

        if let Err(e) = self.conn.ungrab_all_keys(self.root) {
            warn!("Failed to ungrab keys: {}", e);
        }

        let mut grabbed = 0usize;
        for binding in &self.bindings {
            let keycodes = self.keymap.keycodes_for(binding.keysym);
            if keycodes.is_empty() {
                debug!("No keycode for keysym {:#x}, binding inactive", binding.keysym);
                continue;
            }
            for keycode in keycodes {
                for extra in LOCK_VARIANTS {
                    if let Err(e) = self.conn.grab_key(self.root, binding.modifiers | extra, keycode) {
                        warn!("Failed to grab key {}: {}", keycode, e);
                    }
                }
                grabbed += 1;
            }
        }
        info!("Grabbed {} keys for {} bindings", grabbed, self.bindings.len());
    }

    pub(crate) fn handle_key_press(&mut self, ev: &PointerEvent) -> Result<()> {
        let sym = self.keymap.keysym_for(ev.detail);

        if self.menu.is_visible() {
            return self.menu_handle_key(sym);
        }

        let mods = clean_mods(ev.state);
        debug!("Key press: detail={} state={:#x} clean={:#x} sym={:#x}", ev.detail, ev.state, mods, sym);

        let Some(action) = self
            .bindings
            .iter()
            .find(|b| b.keysym == sym && b.modifiers == mods)
            .map(|b| b.action.clone())
        else {
            return Ok(());
        };

        debug!("Matched key binding {:?}", action);
        self.pointer = (ev.root_x as i32, ev.root_y as i32);
        self.run_action(&action, ev.time)
    }

    pub(crate) fn run_action(&mut self, action: &Action, time: u32) -> Result<()> {
        let focused = self.focused;
        match action {
            Action::Close => {
                if focused.is_valid() {
                    self.close_client(focused)?;
                }
            }
            Action::FocusNext => self.cycle_focus(true)?,
            Action::FocusPrev => self.cycle_focus(false)?,
            Action::Terminal => spawn(&self.config.terminal, self.conn.raw_fd()),
            Action::Exec(command) => spawn(command, self.conn.raw_fd()),
            Action::Reload => {
                info!("Reload requested");
                self.flags.request_reload();
            }
            Action::Restart => {
                info!("Restart requested");
                self.flags.request_restart();
            }
            Action::Exit => {
                info!("Exit requested");
                self.flags.request_shutdown();
            }
            Action::Workspace(n) => self.switch_workspace(*n)?,
            Action::WorkspaceNext => self.switch_workspace_relative(1)?,
            Action::WorkspacePrev => self.switch_workspace_relative(-1)?,
            Action::MoveToWorkspace(n) => {
                if focused.is_valid() {
                    self.move_client_to_workspace(focused, *n, false)?;
                }
            }
            Action::MoveToWorkspaceFollow(n) => {
                if focused.is_valid() {
                    self.move_client_to_workspace(focused, *n, true)?;
                }
            }
            Action::ToggleSticky => {
                if focused.is_valid() {
                    self.toggle_sticky(focused)?;
                }
            }
            Action::Move => self.keyboard_interaction(focused, InteractionMode::Move, time)?,
            Action::Resize => self.keyboard_interaction(focused, InteractionMode::Resize, time)?,
        }
        Ok(())
    }

    /// Move or resize started from a key binding: the pointer drives it from
    /// where it currently is, resizing pulls the bottom-right corner.
    fn keyboard_interaction(&mut self, handle: Handle, mode: InteractionMode, time: u32) -> Result<()> {
        if !handle.is_valid() {
            return Ok(());
        }
        let dir = match mode {
            InteractionMode::Resize => ResizeDir::BOTTOM | ResizeDir::RIGHT,
            _ => ResizeDir::empty(),
        };
        let anchor = self.pointer;
        self.start_interaction(handle, mode, dir, anchor, time)
    }
}
