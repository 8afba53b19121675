//! Window Manager Module
//!
//! The reparenting window manager core: client lifecycle, stacking, focus,
//! workspaces, interactive move/resize and the EWMH/ICCCM surface, driven by
//! a single-threaded tick loop over an [`XConn`].

pub mod client;
pub mod client_flags;
pub mod cookie_jar;
pub mod decorations;
pub mod dirty;
pub mod events;
pub mod ewmh;
pub mod focus;
pub mod hints;
pub mod keyboard;
pub mod manage;
pub mod menu;
pub mod moveresize;
pub mod netwm;
pub mod placement;
pub mod reply;
pub mod rules;
pub mod slotmap;
pub mod stacking;
pub mod stats;
pub mod tick;
pub mod workspace;
pub mod x11rb_conn;
pub mod xconn;

#[cfg(test)]
pub mod fake;

use std::collections::{HashMap, VecDeque};

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::shared::Geometry;
use crate::signals::SignalFlags;
use crate::wm::client::{Client, ClientInfo};
use crate::wm::client_flags::{Layer, RootDirty};
use crate::wm::cookie_jar::{CookieJar, CookieTag};
use crate::wm::decorations::{CoreRenderer, Renderer};
use crate::wm::events::EventBuckets;
use crate::wm::keyboard::KeyBinding;
use crate::wm::menu::Menu;
use crate::wm::moveresize::{Cursors, Interaction};
use crate::wm::rules::Rule;
use crate::wm::slotmap::{Handle, SlotMap};
use crate::wm::stats::Stats;
use crate::wm::xconn::{
    Atom, CURRENT_TIME, CreateWindow, KeyboardMapping, MapState, NONE, Window, WindowAttributes, WindowClass,
    XConn, XEvent, event_mask, predefined,
};

pub use ewmh::Atoms;

/// Events selected on the root window.
pub const ROOT_EVENT_MASK: u32 = event_mask::SUBSTRUCTURE_REDIRECT
    | event_mask::SUBSTRUCTURE_NOTIFY
    | event_mask::PROPERTY_CHANGE
    | event_mask::BUTTON_PRESS;

/// Events selected on every managed client window.
pub const CLIENT_EVENT_MASK: u32 = event_mask::PROPERTY_CHANGE
    | event_mask::ENTER_WINDOW
    | event_mask::FOCUS_CHANGE
    | event_mask::STRUCTURE_NOTIFY;

/// Events selected on every frame window.
pub const FRAME_EVENT_MASK: u32 = event_mask::SUBSTRUCTURE_NOTIFY
    | event_mask::EXPOSURE
    | event_mask::BUTTON_PRESS
    | event_mask::POINTER_MOTION
    | event_mask::ENTER_WINDOW
    | event_mask::LEAVE_WINDOW;

/// Initial client arena size; it doubles on demand.
const INITIAL_CLIENTS: usize = 64;

/// Upper bound on windows with `_NET_WM_STATE` requests queued before they
/// were ever mapped.
const MAX_PENDING_STATE_WINDOWS: usize = 64;

/// Startup failures.
#[derive(Debug, Error)]
pub enum WmError {
    #[error("another window manager owns the WM_S0 selection (window {0:#x})")]
    SelectionContested(Window),
    #[error("the display has no usable screen")]
    NoScreen,
}

pub struct WindowManager<C: XConn> {
    pub(crate) conn: C,
    pub(crate) root: Window,
    pub(crate) root_visual: u32,
    pub(crate) root_depth: u8,
    pub(crate) screen: Geometry,
    pub atoms: Atoms,
    pub(crate) wm_selection: Atom,
    /// Owner of the WM selection and target of `_NET_SUPPORTING_WM_CHECK`.
    pub(crate) check_window: Window,

    pub(crate) clients: SlotMap<Client, ClientInfo>,
    pub(crate) window_to_client: HashMap<Window, Handle>,
    pub(crate) frame_to_client: HashMap<Window, Handle>,
    /// One ordered sequence per layer, bottom first.
    pub(crate) layers: [Vec<Handle>; Layer::COUNT],
    /// Most recently focused first.
    pub(crate) focus_history: VecDeque<Handle>,
    pub(crate) focused: Handle,

    pub(crate) buckets: EventBuckets,
    pub(crate) prefetched: Option<XEvent>,
    pub(crate) cookies: CookieJar,
    pub(crate) stats: Stats,
    pub(crate) flags: &'static SignalFlags,

    pub(crate) config: Config,
    pub(crate) bindings: Vec<KeyBinding>,
    pub(crate) rules: Vec<Rule>,
    pub(crate) keymap: KeyboardMapping,
    /// Last pointer position seen in root coordinates.
    pub(crate) pointer: (i32, i32),

    pub(crate) interaction: Interaction,
    pub(crate) cursors: Cursors,
    pub(crate) renderer: Box<dyn Renderer>,
    pub(crate) menu: Menu,

    pub(crate) current_desktop: u32,
    pub(crate) desktop_count: u32,
    pub(crate) workarea: Geometry,
    pub(crate) root_dirty: RootDirty,
    pub(crate) showing_desktop: bool,
    /// `_NET_ACTIVE_WINDOW` left on the root by a previous instance.
    pub(crate) initial_focus: Window,
    /// `_NET_WM_STATE` requests for windows that have not been mapped yet.
    pub(crate) pending_state: HashMap<Window, Vec<[u32; 5]>>,
    pub(crate) restarting: bool,
}

impl<C: XConn> WindowManager<C> {
    /// Build the manager state. Nothing is visible to other clients until
    /// [`WindowManager::start`].
    pub fn new(conn: C, config: Config, flags: &'static SignalFlags) -> Result<Self> {
        let root = conn.root();
        let (width, height) = conn.screen_size();
        if root == NONE || width == 0 || height == 0 {
            return Err(WmError::NoScreen.into());
        }
        let screen = Geometry::new(0, 0, width as u32, height as u32);

        debug!("WM: Interning atoms...");
        let atoms = Atoms::intern(&conn).context("Failed to intern EWMH atoms")?;
        let wm_selection = conn
            .intern_atoms(&["WM_S0"])
            .context("Failed to intern WM selection atom")?
            .first()
            .copied()
            .unwrap_or(NONE);

        let keymap = conn.keyboard_mapping().context("Failed to read keyboard mapping")?;
        let bindings = config.key_bindings();
        let rules = config.app_rules();
        let desktop_count = config.desktop_count.max(1);

        Ok(Self {
            root_visual: conn.root_visual(),
            root_depth: conn.root_depth(),
            conn,
            root,
            screen,
            atoms,
            wm_selection,
            check_window: NONE,
            clients: SlotMap::with_capacity(INITIAL_CLIENTS),
            window_to_client: HashMap::new(),
            frame_to_client: HashMap::new(),
            layers: Default::default(),
            focus_history: VecDeque::new(),
            focused: Handle::INVALID,
            buckets: EventBuckets::default(),
            prefetched: None,
            cookies: CookieJar::default(),
            stats: Stats::default(),
            flags,
            config,
            bindings,
            rules,
            keymap,
            pointer: (width as i32 / 2, height as i32 / 2),
            interaction: Interaction::default(),
            cursors: Cursors::default(),
            renderer: Box::new(CoreRenderer::default()),
            menu: Menu::default(),
            current_desktop: 0,
            desktop_count,
            workarea: screen,
            root_dirty: RootDirty::empty(),
            showing_desktop: false,
            initial_focus: NONE,
            pending_state: HashMap::new(),
            restarting: false,
        })
    }

    /// Take over the display: acquire the selection, publish the EWMH
    /// surface, grab keys, create decoration resources and adopt windows
    /// that already exist.
    pub fn start(&mut self) -> Result<()> {
        self.become_wm()?;
        self.setup_keys();
        self.renderer
            .init(&self.conn, self.root, &self.config.theme)
            .context("Failed to create decoration resources")?;
        self.menu_create().context("Failed to create menu window")?;
        self.adopt_children().context("Failed to adopt existing windows")?;
        self.flush_dirty();
        self.conn.flush().context("Failed to flush startup requests")?;
        Ok(())
    }

    fn become_wm(&mut self) -> Result<()> {
        let owner = self.conn.get_selection_owner(self.wm_selection).context("Failed to query WM_S0 owner")?;
        if owner != NONE {
            return Err(WmError::SelectionContested(owner).into());
        }

        debug!("WM: Selecting events on root window (SubstructureRedirect)...");
        self.conn
            .select_input_checked(self.root, ROOT_EVENT_MASK)
            .context("Another window manager is already running")?;

        self.cursors = Cursors::create(&self.conn).context("Failed to create cursors")?;
        self.conn.change_window_attributes(
            self.root,
            &WindowAttributes { cursor: Some(self.cursors.normal), ..Default::default() },
        )?;

        let supported = self.atoms.supported();
        self.conn.change_property32(self.root, self.atoms.net_supported, predefined::ATOM, &supported)?;

        let check = self.conn.generate_id()?;
        self.conn.create_window(&CreateWindow {
            wid: check,
            parent: self.root,
            geometry: Geometry::new(0, 0, 1, 1),
            border_width: 0,
            class: WindowClass::InputOutput,
            depth: 0,
            visual: 0,
            attributes: WindowAttributes {
                override_redirect: Some(true),
                event_mask: Some(event_mask::PROPERTY_CHANGE),
                ..Default::default()
            },
        })?;
        self.check_window = check;

        self.conn.set_selection_owner(check, self.wm_selection, CURRENT_TIME)?;
        let owner = self.conn.get_selection_owner(self.wm_selection).context("Failed to verify WM_S0 owner")?;
        if owner != check {
            return Err(WmError::SelectionContested(owner).into());
        }
        debug!("WM: Acquired WM_S0 with check window {:#x}", check);

        let atoms = &self.atoms;
        for window in [self.root, check] {
            self.conn.change_property32(window, atoms.net_supporting_wm_check, predefined::WINDOW, &[check])?;
            self.conn.change_property8(window, atoms.net_wm_name, atoms.utf8_string, b"hxm")?;
            self.conn.change_property32(window, atoms.net_wm_pid, predefined::CARDINAL, &[std::process::id()])?;
        }

        self.conn.change_property32(
            self.root,
            atoms.net_desktop_geometry,
            predefined::CARDINAL,
            &[self.screen.width, self.screen.height],
        )?;
        self.workarea = self.screen;
        self.publish_desktop_props()?;
        self.publish_workarea()?;

        self.conn.change_property32(self.root, self.atoms.net_client_list, predefined::WINDOW, &[])?;
        self.conn.change_property32(self.root, self.atoms.net_client_list_stacking, predefined::WINDOW, &[])?;

        // A restarting predecessor leaves the active window behind.
        if let Ok(Some(reply)) =
            self.conn.get_property_sync(self.root, self.atoms.net_active_window, predefined::WINDOW, 1)
        {
            self.initial_focus = reply.value32().first().copied().unwrap_or(NONE);
        }
        self.conn.delete_property(self.root, self.atoms.net_active_window)?;

        let roots = vec![self.root; self.desktop_count as usize];
        self.conn.change_property32(self.root, self.atoms.net_virtual_roots, predefined::WINDOW, &roots)?;
        self.conn.change_property32(self.root, self.atoms.net_showing_desktop, predefined::CARDINAL, &[0])?;

        self.conn.flush()?;
        info!("Successfully became window manager on a {}x{} screen", self.screen.width, self.screen.height);
        Ok(())
    }

    /// Probe every existing top-level window. The attribute replies come
    /// back through the cookie jar with no client attached; viewable,
    /// non-override-redirect windows are then managed.
    fn adopt_children(&mut self) -> Result<()> {
        let children = self.conn.query_tree(self.root)?;
        let now = std::time::Instant::now();
        let mut probed = 0;
        for window in children {
            if window == self.check_window || window == self.menu.window {
                continue;
            }
            let seq = self.conn.get_window_attributes(window)?;
            self.cookies.push(seq, CookieTag::attributes(), Handle::INVALID, window as u64, now);
            probed += 1;
        }
        debug!("WM: Probing {} existing windows", probed);
        Ok(())
    }

    /// Adoption probe answered: manage the window if a client mapped it.
    pub(crate) fn adopt_if_viewable(&mut self, window: Window, override_redirect: bool, map_state: MapState) -> Result<()> {
        if override_redirect || map_state == MapState::Unmapped {
            return Ok(());
        }
        self.manage_start(window)
    }

    /// Release every client and every server resource the manager created.
    pub fn cleanup(&mut self) {
        self.restarting = self.flags.restart_requested();
        info!("Releasing {} clients (restarting: {})", self.clients.len(), self.restarting);

        for handle in self.clients.handles() {
            if let Err(e) = self.unmanage(handle) {
                warn!("Failed to release client {:?}: {}", handle, e);
            }
        }

        self.renderer.release(&self.conn);
        if let Err(e) = self.menu_destroy() {
            warn!("Failed to destroy menu: {}", e);
        }
        self.cursors.free(&self.conn);
        if self.check_window != NONE {
            if let Err(e) = self.conn.destroy_window(self.check_window) {
                warn!("Failed to destroy check window: {}", e);
            }
            self.check_window = NONE;
        }
        if let Err(e) = self.conn.flush() {
            warn!("Final flush failed: {}", e);
        }
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub(crate) fn client_by_window(&self, window: Window) -> Option<Handle> {
        self.window_to_client.get(&window).copied().filter(|h| self.clients.live(*h))
    }

    pub(crate) fn client_by_frame(&self, window: Window) -> Option<Handle> {
        self.frame_to_client.get(&window).copied().filter(|h| self.clients.live(*h))
    }

    /// Client owning `window` either as its client window or as its frame.
    pub(crate) fn client_by_any(&self, window: Window) -> Option<Handle> {
        self.client_by_window(window).or_else(|| self.client_by_frame(window))
    }

    /// Border width and title height in effect for `handle`.
    pub(crate) fn decoration(&self, handle: Handle) -> (u32, u32) {
        let theme = &self.config.theme;
        self.clients
            .get(handle)
            .map(|c| c.decoration(theme.border_width, theme.title_height))
            .unwrap_or((0, 0))
    }

    /// ICCCM WM_STATE
    pub(crate) fn set_wm_state(&self, window: Window, state: u32) -> Result<()> {
        self.conn.change_property32(window, self.atoms.wm_state, self.atoms.wm_state, &[state, NONE])?;
        Ok(())
    }

    /// Remember a `_NET_WM_STATE` request for a window that is not managed yet.
    pub(crate) fn queue_pending_state(&mut self, window: Window, data: [u32; 5]) {
        if !self.pending_state.contains_key(&window) && self.pending_state.len() >= MAX_PENDING_STATE_WINDOWS {
            debug!("Dropping early state request for {:#x}, side table full", window);
            return;
        }
        self.pending_state.entry(window).or_default().push(data);
    }
}
