//! NetWM Module
//!
//! EWMH client message handlers, `_NET_WM_STATE` transitions (maximize,
//! fullscreen, above/below, hidden, ...) and the per-client properties the
//! manager publishes.

use anyhow::Result;
use tracing::{debug, trace};

use crate::wm::client::FullscreenStash;
use crate::wm::client_flags::{ClientFlags, ClientState, Dirty, Layer, ManagePhase};
use crate::wm::ewmh::{Atoms, moveresize_dir, state_action, wm_state};
use crate::wm::events::ClientMessage;
use crate::wm::moveresize::{InteractionMode, ResizeDir};
use crate::wm::slotmap::Handle;
use crate::wm::xconn::{Atom, CURRENT_TIME, Window, XConn, predefined};
use crate::wm::WindowManager;

/// `_NET_MOVERESIZE_WINDOW` flag bits selecting which fields are present.
const MOVERESIZE_X: u32 = 1 << 8;
const MOVERESIZE_Y: u32 = 1 << 9;
const MOVERESIZE_WIDTH: u32 = 1 << 10;
const MOVERESIZE_HEIGHT: u32 = 1 << 11;

/// `_NET_WM_STATE` values the manager understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NetState {
    Fullscreen,
    Above,
    Below,
    Sticky,
    DemandsAttention,
    MaximizedHorz,
    MaximizedVert,
    Hidden,
    Focused,
    Modal,
    Shaded,
    SkipTaskbar,
    SkipPager,
}

impl NetState {
    fn from_atom(atom: Atom, atoms: &Atoms) -> Option<Self> {
        if atom == 0 {
            return None;
        }
        let table = [
            (atoms.net_wm_state_fullscreen, NetState::Fullscreen),
            (atoms.net_wm_state_above, NetState::Above),
            (atoms.net_wm_state_below, NetState::Below),
            (atoms.net_wm_state_sticky, NetState::Sticky),
            (atoms.net_wm_state_demands_attention, NetState::DemandsAttention),
            (atoms.net_wm_state_maximized_horz, NetState::MaximizedHorz),
            (atoms.net_wm_state_maximized_vert, NetState::MaximizedVert),
            (atoms.net_wm_state_hidden, NetState::Hidden),
            (atoms.net_wm_state_focused, NetState::Focused),
            (atoms.net_wm_state_modal, NetState::Modal),
            (atoms.net_wm_state_shaded, NetState::Shaded),
            (atoms.net_wm_state_skip_taskbar, NetState::SkipTaskbar),
            (atoms.net_wm_state_skip_pager, NetState::SkipPager),
        ];
        table.iter().find(|(a, _)| *a == atom).map(|(_, s)| *s)
    }
}

/// Target value of a boolean state under a Remove/Add/Toggle action.
fn wants(action: u32, current: bool) -> bool {
    match action {
        state_action::REMOVE => false,
        state_action::ADD => true,
        state_action::TOGGLE => !current,
        _ => current,
    }
}

impl<C: XConn> WindowManager<C> {
    /// Apply one `_NET_WM_STATE` message body: action in `data[0]`, up to two
    /// properties in `data[1]` and `data[2]`.
    pub(crate) fn apply_net_wm_state(&mut self, handle: Handle, data: [u32; 5]) -> Result<()> {
        let action = data[0];
        for atom in [data[1], data[2]] {
            if atom != 0 {
                self.update_state(handle, action, atom)?;
            }
        }
        Ok(())
    }

    fn update_state(&mut self, handle: Handle, action: u32, atom: Atom) -> Result<()> {
        let Some(state) = NetState::from_atom(atom, &self.atoms) else {
            trace!("Ignoring unknown state atom {}", atom);
            return Ok(());
        };
        let Some(client) = self.clients.get(handle) else {
            return Ok(());
        };
        debug!("WM: State {:?} action {} on {:#x}", state, action, client.xid);

        match state {
            NetState::Fullscreen => {
                let current = client.is_fullscreen();
                if wants(action, current) != current {
                    self.set_fullscreen(handle, !current)?;
                }
            }
            NetState::Above => self.set_layer_flag(handle, ClientFlags::ABOVE, ClientFlags::BELOW, action),
            NetState::Below => self.set_layer_flag(handle, ClientFlags::BELOW, ClientFlags::ABOVE, action),
            NetState::Sticky => {
                if wants(action, client.sticky) != client.sticky {
                    self.toggle_sticky(handle)?;
                }
            }
            NetState::DemandsAttention => self.set_plain_flag(handle, ClientFlags::URGENT, action, Dirty::FRAME_STYLE),
            NetState::MaximizedHorz => {
                let (horz, vert) = (client.maximized_horz, client.maximized_vert);
                let want = wants(action, horz);
                if want != horz {
                    self.set_maximize(handle, want, vert)?;
                }
            }
            NetState::MaximizedVert => {
                let (horz, vert) = (client.maximized_horz, client.maximized_vert);
                let want = wants(action, vert);
                if want != vert {
                    self.set_maximize(handle, horz, want)?;
                }
            }
            NetState::Hidden => {
                let hidden = client.state == ClientState::Unmapped;
                match (wants(action, hidden), hidden) {
                    (true, false) => self.iconify(handle)?,
                    (false, true) => self.restore(handle)?,
                    _ => {}
                }
            }
            // Owned by the manager; clients cannot set it.
            NetState::Focused => {}
            NetState::Modal => self.set_plain_flag(handle, ClientFlags::MODAL, action, Dirty::empty()),
            NetState::Shaded => self.set_plain_flag(handle, ClientFlags::SHADED, action, Dirty::empty()),
            NetState::SkipTaskbar => self.set_plain_flag(handle, ClientFlags::SKIP_TASKBAR, action, Dirty::empty()),
            NetState::SkipPager => self.set_plain_flag(handle, ClientFlags::SKIP_PAGER, action, Dirty::empty()),
        }
        Ok(())
    }

    fn set_plain_flag(&mut self, handle: Handle, flag: ClientFlags, action: u32, extra: Dirty) {
        if let Some(client) = self.clients.get_mut(handle) {
            let on = wants(action, client.flags.contains(flag));
            client.flags.set(flag, on);
            client.dirty |= Dirty::STATE | extra;
        }
    }

    /// Above and below are exclusive; setting one clears the other.
    fn set_layer_flag(&mut self, handle: Handle, flag: ClientFlags, other: ClientFlags, action: u32) {
        let Some(client) = self.clients.get_mut(handle) else {
            return;
        };
        let on = wants(action, client.flags.contains(flag));
        client.flags.set(flag, on);
        if on {
            client.flags.remove(other);
        }
        let layer = client.layer_from_state();
        if client.is_fullscreen() {
            if let Some(stash) = client.fullscreen_stash.as_mut() {
                stash.layer = layer;
            }
        } else if layer != client.layer {
            client.layer = layer;
            client.dirty |= Dirty::STACK;
        }
        client.dirty |= Dirty::STATE;
    }

    /// Enter or leave fullscreen. Entering stashes everything leaving must
    /// put back.
    pub(crate) fn set_fullscreen(&mut self, handle: Handle, on: bool) -> Result<()> {
        let target = if self.config.fullscreen_use_workarea { self.workarea } else { self.screen };
        let Some(client) = self.clients.get_mut(handle) else {
            return Ok(());
        };
        if on == client.is_fullscreen() {
            return Ok(());
        }

        if on {
            client.fullscreen_stash = Some(FullscreenStash {
                geometry: client.desired,
                layer: client.layer,
                undecorated: client.is_undecorated(),
                maximized_horz: client.maximized_horz,
                maximized_vert: client.maximized_vert,
            });
            client.maximized_horz = false;
            client.maximized_vert = false;
            client.layer = Layer::Fullscreen;
            client.flags.insert(ClientFlags::UNDECORATED);
            client.desired = target;
        } else {
            match client.fullscreen_stash.take() {
                Some(stash) => {
                    client.desired = stash.geometry;
                    client.layer = stash.layer;
                    client.flags.set(ClientFlags::UNDECORATED, stash.undecorated);
                    client.maximized_horz = stash.maximized_horz;
                    client.maximized_vert = stash.maximized_vert;
                }
                None => client.layer = client.layer_from_state(),
            }
        }
        client.dirty |= Dirty::GEOM | Dirty::STATE | Dirty::STACK | Dirty::FRAME_ALL;
        debug!("WM: Fullscreen {} for {:#x}", on, client.xid);

        // The workarea may have moved while fullscreen.
        if !on && (client.maximized_horz || client.maximized_vert) {
            self.apply_maximize_geometry(handle)?;
        }
        Ok(())
    }

    /// Set both maximize axes. The first axis maximized stashes the
    /// geometry; each axis released takes its extent back from the stash.
    pub(crate) fn set_maximize(&mut self, handle: Handle, horz: bool, vert: bool) -> Result<()> {
        let (bw, th) = self.decoration(handle);
        let wa = self.workarea;
        let Some(client) = self.clients.get_mut(handle) else {
            return Ok(());
        };
        if client.is_fullscreen() {
            return Ok(());
        }

        if (horz || vert) && client.saved_maximize.is_none() {
            client.saved_maximize = Some(client.desired);
        }
        let saved = client.saved_maximize.unwrap_or(client.desired);

        if horz {
            client.desired.x = wa.x;
            client.desired.width = wa.width.saturating_sub(2 * bw).max(1);
        } else if client.maximized_horz {
            client.desired.x = saved.x;
            client.desired.width = saved.width;
        }
        if vert {
            client.desired.y = wa.y;
            client.desired.height = wa.height.saturating_sub(th + bw).max(1);
        } else if client.maximized_vert {
            client.desired.y = saved.y;
            client.desired.height = saved.height;
        }

        client.maximized_horz = horz;
        client.maximized_vert = vert;
        if !horz && !vert {
            client.saved_maximize = None;
        }
        client.dirty |= Dirty::GEOM | Dirty::STATE;
        Ok(())
    }

    pub(crate) fn toggle_maximize(&mut self, handle: Handle) -> Result<()> {
        let Some(client) = self.clients.get(handle) else {
            return Ok(());
        };
        let want = !(client.maximized_horz && client.maximized_vert);
        self.set_maximize(handle, want, want)
    }

    /// Re-fit a maximized or workarea-fullscreen client after the workarea
    /// changed.
    pub(crate) fn apply_maximize_geometry(&mut self, handle: Handle) -> Result<()> {
        let use_workarea = self.config.fullscreen_use_workarea;
        let workarea = self.workarea;
        let Some(client) = self.clients.get_mut(handle) else {
            return Ok(());
        };
        if client.is_fullscreen() {
            if use_workarea && client.desired != workarea {
                client.desired = workarea;
                client.dirty |= Dirty::GEOM;
            }
            return Ok(());
        }
        let (horz, vert) = (client.maximized_horz, client.maximized_vert);
        if horz || vert {
            self.set_maximize(handle, horz, vert)?;
        }
        Ok(())
    }

    pub(crate) fn publish_net_wm_state(&self, handle: Handle) -> Result<()> {
        let Some(client) = self.clients.get(handle) else {
            return Ok(());
        };
        let a = &self.atoms;
        let mut states = Vec::with_capacity(8);
        let mut push = |on: bool, atom: Atom| {
            if on {
                states.push(atom);
            }
        };
        push(client.is_fullscreen(), a.net_wm_state_fullscreen);
        push(client.flags.contains(ClientFlags::ABOVE), a.net_wm_state_above);
        push(client.flags.contains(ClientFlags::BELOW), a.net_wm_state_below);
        push(client.sticky, a.net_wm_state_sticky);
        push(client.flags.contains(ClientFlags::URGENT), a.net_wm_state_demands_attention);
        push(client.maximized_horz, a.net_wm_state_maximized_horz);
        push(client.maximized_vert, a.net_wm_state_maximized_vert);
        push(client.state == ClientState::Unmapped, a.net_wm_state_hidden);
        push(client.is_focused(), a.net_wm_state_focused);
        push(client.flags.contains(ClientFlags::MODAL), a.net_wm_state_modal);
        push(client.flags.contains(ClientFlags::SHADED), a.net_wm_state_shaded);
        push(client.flags.contains(ClientFlags::SKIP_TASKBAR), a.net_wm_state_skip_taskbar);
        push(client.flags.contains(ClientFlags::SKIP_PAGER), a.net_wm_state_skip_pager);
        self.conn.change_property32(client.xid, a.net_wm_state, predefined::ATOM, &states)?;
        Ok(())
    }

    /// Resizing actions are withheld from clients with a fixed size.
    pub(crate) fn publish_allowed_actions(&self, handle: Handle) -> Result<()> {
        let Some(client) = self.clients.get(handle) else {
            return Ok(());
        };
        let a = &self.atoms;
        let mut actions = vec![
            a.net_wm_action_move,
            a.net_wm_action_minimize,
            a.net_wm_action_stick,
            a.net_wm_action_change_desktop,
            a.net_wm_action_close,
            a.net_wm_action_above,
            a.net_wm_action_below,
        ];
        if !client.hints.is_fixed() {
            actions.extend([
                a.net_wm_action_resize,
                a.net_wm_action_maximize_horz,
                a.net_wm_action_maximize_vert,
                a.net_wm_action_fullscreen,
            ]);
        }
        self.conn.change_property32(client.xid, a.net_wm_allowed_actions, predefined::ATOM, &actions)?;
        Ok(())
    }

    /// `_NET_FRAME_EXTENTS`: left, right, top, bottom.
    pub(crate) fn publish_frame_extents(&self, handle: Handle) -> Result<()> {
        let Some(xid) = self.clients.get(handle).map(|c| c.xid) else {
            return Ok(());
        };
        let (bw, th) = self.decoration(handle);
        self.conn.change_property32(xid, self.atoms.net_frame_extents, predefined::CARDINAL, &[bw, bw, th + bw, bw])?;
        Ok(())
    }

    pub(crate) fn handle_client_message(&mut self, msg: &ClientMessage) -> Result<()> {
        let t = msg.message_type;
        let data = msg.data;

        if t == self.atoms.net_current_desktop {
            return self.switch_workspace(data[0]);
        }
        if t == self.atoms.net_number_of_desktops {
            return self.set_number_of_desktops(data[0]);
        }
        if t == self.atoms.net_showing_desktop {
            return self.set_showing_desktop(data[0] != 0);
        }
        if t == self.atoms.net_request_frame_extents {
            return self.handle_request_frame_extents(msg.window);
        }

        let handle = self.client_by_window(msg.window);
        if t == self.atoms.net_wm_state {
            match handle {
                Some(h) if self.clients.get(h).is_some_and(|c| c.phase == ManagePhase::Done) => {
                    return self.apply_net_wm_state(h, data);
                }
                Some(h) => {
                    if let Some(info) = self.clients.cold_mut(h) {
                        info.queued_state.push(data);
                    }
                }
                None => self.queue_pending_state(msg.window, data),
            }
            return Ok(());
        }

        let Some(handle) = handle.filter(|h| self.clients.get(*h).is_some_and(|c| c.phase == ManagePhase::Done))
        else {
            trace!("Client message {} for unmanaged {:#x}", t, msg.window);
            return Ok(());
        };

        if t == self.atoms.net_wm_desktop {
            self.handle_desktop_request(handle, data[0])
        } else if t == self.atoms.net_active_window {
            self.activate(handle)
        } else if t == self.atoms.net_close_window {
            self.close_client(handle)
        } else if t == self.atoms.net_moveresize_window {
            self.handle_moveresize_window(handle, data)
        } else if t == self.atoms.net_wm_moveresize {
            self.handle_wm_moveresize(handle, data)
        } else if t == self.atoms.wm_change_state {
            if data[0] == wm_state::ICONIC {
                self.iconify(handle)?;
            }
            Ok(())
        } else {
            trace!("Unhandled client message {} for {:#x}", t, msg.window);
            Ok(())
        }
    }

    fn handle_desktop_request(&mut self, handle: Handle, desktop: u32) -> Result<()> {
        let Some(sticky) = self.clients.get(handle).map(|c| c.sticky) else {
            return Ok(());
        };
        if desktop == 0xFFFF_FFFF {
            if !sticky {
                self.toggle_sticky(handle)?;
            }
            return Ok(());
        }
        if desktop >= self.desktop_count {
            return Ok(());
        }
        if sticky {
            self.toggle_sticky(handle)?;
        }
        self.move_client_to_workspace(handle, desktop, false)
    }

    /// `_NET_ACTIVE_WINDOW`: bring the client to the user, whatever it takes.
    pub(crate) fn activate(&mut self, handle: Handle) -> Result<()> {
        if self.showing_desktop {
            self.set_showing_desktop(false)?;
        }
        let Some(client) = self.clients.get(handle) else {
            return Ok(());
        };
        if !client.is_visible_on(self.current_desktop) && client.desktop >= 0 {
            self.switch_workspace(client.desktop as u32)?;
        }
        if self.clients.get(handle).is_some_and(|c| c.state == ClientState::Unmapped) {
            self.restore(handle)?;
        }
        self.set_focus(handle)?;
        self.stack_raise(handle)
    }

    fn handle_moveresize_window(&mut self, handle: Handle, data: [u32; 5]) -> Result<()> {
        let flags = data[0];
        let Some(client) = self.clients.get_mut(handle) else {
            return Ok(());
        };
        if client.is_fullscreen() {
            return Ok(());
        }
        if flags & MOVERESIZE_X != 0 {
            client.desired.x = data[1] as i32;
        }
        if flags & MOVERESIZE_Y != 0 {
            client.desired.y = data[2] as i32;
        }
        if flags & MOVERESIZE_WIDTH != 0 {
            client.desired.width = data[3].max(1);
        }
        if flags & MOVERESIZE_HEIGHT != 0 {
            client.desired.height = data[4].max(1);
        }
        let hints = client.hints;
        hints.constrain(&mut client.desired.width, &mut client.desired.height);
        client.dirty |= Dirty::GEOM;
        Ok(())
    }

    fn handle_wm_moveresize(&mut self, handle: Handle, data: [u32; 5]) -> Result<()> {
        let anchor = (data[0] as i32, data[1] as i32);
        match data[2] {
            moveresize_dir::CANCEL => {
                if self.interaction.handle == handle {
                    self.cancel_interaction()?;
                }
                Ok(())
            }
            moveresize_dir::MOVE => self.start_interaction(handle, InteractionMode::Move, ResizeDir::empty(), anchor, CURRENT_TIME),
            moveresize_dir::MOVE_KEYBOARD => {
                let pointer = self.pointer;
                self.start_interaction(handle, InteractionMode::Move, ResizeDir::empty(), pointer, CURRENT_TIME)
            }
            moveresize_dir::SIZE_KEYBOARD => {
                let pointer = self.pointer;
                let dir = ResizeDir::BOTTOM | ResizeDir::RIGHT;
                self.start_interaction(handle, InteractionMode::Resize, dir, pointer, CURRENT_TIME)
            }
            direction => match ResizeDir::from_ewmh(direction) {
                Some(dir) => self.start_interaction(handle, InteractionMode::Resize, dir, anchor, CURRENT_TIME),
                None => Ok(()),
            },
        }
    }

    /// Answer before the window is mapped with the extents it would get.
    fn handle_request_frame_extents(&mut self, window: Window) -> Result<()> {
        if let Some(handle) = self.client_by_window(window) {
            return self.publish_frame_extents(handle);
        }
        let theme = &self.config.theme;
        let (bw, th) = (theme.border_width, theme.title_height);
        self.conn.change_property32(window, self.atoms.net_frame_extents, predefined::CARDINAL, &[bw, bw, th + bw, bw])?;
        Ok(())
    }

    /// A client changed a property we track: refresh the cached copy.
    pub(crate) fn handle_property_notify(&mut self, window: Window, atom: Atom, deleted: bool) -> Result<()> {
        if self.buckets.is_destroyed(window) {
            return Ok(());
        }
        let Some(handle) = self.client_by_window(window) else {
            return Ok(());
        };
        if self.clients.get(handle).is_none_or(|c| c.phase != ManagePhase::Done) {
            return Ok(());
        }
        trace!("Property {} on {:#x} changed (deleted: {})", atom, window, deleted);

        let a = &self.atoms;
        let dirty = match atom {
            predefined::WM_NAME => Dirty::TITLE,
            predefined::WM_HINTS | predefined::WM_NORMAL_HINTS => Dirty::HINTS | Dirty::STATE,
            x if x == a.net_wm_name => Dirty::TITLE,
            x if x == a.motif_wm_hints => Dirty::HINTS | Dirty::FRAME_STYLE,
            x if x == a.net_wm_strut || x == a.net_wm_strut_partial => Dirty::STRUT,
            x if [
                predefined::WM_TRANSIENT_FOR,
                predefined::WM_CLASS,
                predefined::WM_ICON_NAME,
                a.net_wm_icon_name,
                a.wm_protocols,
                a.wm_colormap_windows,
                a.net_wm_window_type,
                a.net_wm_icon,
                a.net_wm_icon_geometry,
                a.net_wm_user_time,
                a.net_wm_user_time_window,
                a.net_wm_sync_request_counter,
                a.net_wm_window_opacity,
                a.gtk_frame_extents,
            ]
            .contains(&x) =>
            {
                return self.refresh_property(handle, atom);
            }
            _ => return Ok(()),
        };
        if let Some(client) = self.clients.get_mut(handle) {
            client.dirty |= dirty;
        }
        Ok(())
    }
}
