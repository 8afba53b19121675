//! Client Module
//!
//! The per-window record. Data touched on every tick (geometry, flags, dirty
//! bits, links) lives in [`Client`]; strings and rarely read metadata live in
//! [`ClientInfo`]. Both are stored side by side in the client arena.

use std::time::Instant;

use crate::shared::{DirtyRegion, Geometry};
use crate::wm::client_flags::{
    ClientFlags, ClientState, Dirty, InitialState, Layer, ManagePhase, Placement, Protocols, WindowType,
};
use crate::wm::hints::{FrameExtents, Icon, SizeHints, Strut};
use crate::wm::moveresize::ResizeDir;
use crate::wm::slotmap::Handle;
use crate::wm::xconn::{NONE, Window};

/// Geometry and state stashed when entering fullscreen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FullscreenStash {
    pub geometry: Geometry,
    pub layer: Layer,
    pub undecorated: bool,
    pub maximized_horz: bool,
    pub maximized_vert: bool,
}

/// Hot client data
#[derive(Debug, Default)]
pub struct Client {
    pub handle: Handle,
    pub xid: Window,
    pub frame: Window,
    pub state: ClientState,
    pub phase: ManagePhase,
    pub pending_replies: u32,
    pub manage_aborted: bool,
    /// Past this point a client still gathering is finished with what it has.
    pub manage_deadline: Option<Instant>,

    pub window_type: WindowType,
    pub layer: Layer,
    pub base_layer: Layer,
    pub flags: ClientFlags,
    pub dirty: Dirty,

    /// Last geometry sent to the server: frame position, content size.
    pub server: Geometry,
    /// Geometry the flusher should converge on.
    pub desired: Geometry,
    pub fullscreen_stash: Option<FullscreenStash>,
    pub hints: SizeHints,
    pub maximized_horz: bool,
    pub maximized_vert: bool,
    pub saved_maximize: Option<Geometry>,

    /// -1 when sticky
    pub desktop: i32,
    pub sticky: bool,
    pub override_redirect: bool,
    pub initial_state: InitialState,
    pub placement: Placement,
    pub focus_override: Option<bool>,

    pub transient_for: Handle,
    pub transients: Vec<Handle>,
    pub ignore_unmap: u32,
    /// The window was viewable when first seen, so reparenting it unmaps it.
    pub was_viewable: bool,
    /// The frame is mapped; hiding an unmapped frame would never produce
    /// the UnmapNotify that balances `ignore_unmap`.
    pub frame_visible: bool,
    /// Resize direction the frame cursor currently shows.
    pub last_cursor_dir: Option<ResizeDir>,

    pub strut: Strut,
    pub strut_full: Option<Strut>,
    pub strut_partial: Option<Strut>,
    pub gtk_extents: Option<FrameExtents>,

    pub user_time: u32,
    pub user_time_window: Window,
    pub sync_counter: u32,
    pub opacity: Option<u32>,
    pub visual: u32,
    pub depth: u8,
    pub colormap: u32,
    pub original_border: u16,
    pub damage: u32,
    pub damage_region: DirtyRegion,
    pub frame_damage: DirtyRegion,
}

impl Client {
    pub fn is_focused(&self) -> bool {
        self.flags.contains(ClientFlags::FOCUSED)
    }

    pub fn is_undecorated(&self) -> bool {
        self.flags.contains(ClientFlags::UNDECORATED)
    }

    pub fn is_fullscreen(&self) -> bool {
        self.layer == Layer::Fullscreen
    }

    /// Present in the model and not on its way out.
    pub fn is_active(&self) -> bool {
        matches!(self.state, ClientState::Mapped | ClientState::Unmapped)
    }

    pub fn is_visible_on(&self, desktop: u32) -> bool {
        self.sticky || self.desktop == desktop as i32
    }

    /// Layer implied by the type and the above/below state.
    pub fn layer_from_state(&self) -> Layer {
        if self.flags.contains(ClientFlags::ABOVE) {
            Layer::Above
        } else if self.flags.contains(ClientFlags::BELOW) {
            Layer::Below
        } else {
            self.base_layer
        }
    }

    /// Recompute the effective strut from the partial and full properties.
    pub fn update_effective_strut(&mut self) {
        self.strut = self.strut_partial.or(self.strut_full).unwrap_or_default();
    }

    /// Border width and title height for this client under `theme`.
    pub fn decoration(&self, border_width: u32, title_height: u32) -> (u32, u32) {
        if self.is_undecorated() || self.flags.contains(ClientFlags::GTK_EXTENTS) {
            (0, 0)
        } else {
            (border_width, title_height)
        }
    }

    /// Outer frame rectangle for the current server geometry.
    pub fn frame_geometry(&self, border_width: u32, title_height: u32) -> Geometry {
        let (bw, th) = self.decoration(border_width, title_height);
        Geometry::new(self.server.x, self.server.y, self.server.width + 2 * bw, self.server.height + th + bw)
    }
}

/// Cold client data
#[derive(Debug, Default)]
pub struct ClientInfo {
    pub wm_class: String,
    pub wm_instance: String,
    /// `_NET_WM_NAME` when valid, else `base_title`.
    pub title: String,
    /// WM_NAME
    pub base_title: String,
    pub has_net_wm_name: bool,
    pub icon_name: String,
    pub client_machine: String,
    pub command: Vec<String>,
    pub protocols: Protocols,
    pub can_focus: bool,
    pub pid: u32,
    pub transient_for_xid: Window,
    pub icon: Option<Icon>,
    pub icon_geometry: Option<Geometry>,
    pub colormap_windows: Vec<Window>,
    /// `_NET_WM_STATE` requests that arrived while the client was gathering.
    pub queued_state: Vec<[u32; 5]>,
}

impl ClientInfo {
    pub fn new() -> Self {
        Self { can_focus: true, transient_for_xid: NONE, ..Default::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn above_wins_over_below() {
        let mut c = Client { base_layer: Layer::Normal, ..Default::default() };
        assert_eq!(c.layer_from_state(), Layer::Normal);
        c.flags |= ClientFlags::BELOW;
        assert_eq!(c.layer_from_state(), Layer::Below);
        c.flags |= ClientFlags::ABOVE;
        assert_eq!(c.layer_from_state(), Layer::Above);
    }

    #[test]
    fn partial_strut_takes_precedence() {
        let mut c = Client::default();
        c.strut_full = Some(Strut { top: 10, ..Default::default() });
        c.update_effective_strut();
        assert_eq!(c.strut.top, 10);
        c.strut_partial = Some(Strut { top: 25, ..Default::default() });
        c.update_effective_strut();
        assert_eq!(c.strut.top, 25);
        c.strut_partial = None;
        c.strut_full = None;
        c.update_effective_strut();
        assert!(c.strut.is_empty());
    }

    #[test]
    fn frame_adds_decorations_unless_undecorated() {
        let mut c = Client { server: Geometry::new(10, 20, 300, 200), ..Default::default() };
        assert_eq!(c.frame_geometry(2, 20), Geometry::new(10, 20, 304, 222));
        c.flags |= ClientFlags::UNDECORATED;
        assert_eq!(c.frame_geometry(2, 20), Geometry::new(10, 20, 300, 200));
    }
}
