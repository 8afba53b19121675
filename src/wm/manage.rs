//! Manage Module
//!
//! Client lifecycle: discovery, the asynchronous property gathering phase,
//! reparenting into a frame, and teardown.
//!
//! `manage_start` only issues requests. The client then waits in `New`
//! until every Phase-1 reply has been dispatched (see `reply.rs`), after
//! which `finish_manage` builds the frame and shows the window.

use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, info, trace, warn};

use crate::shared::Geometry;
use crate::wm::client::ClientInfo;
use crate::wm::client_flags::{
    ClientState, Dirty, InitialState, Layer, ManagePhase, Protocols, RootDirty, WindowType,
};
use crate::wm::cookie_jar::CookieTag;
use crate::wm::ewmh::wm_state;
use crate::wm::slotmap::Handle;
use crate::wm::xconn::{
    Atom, CURRENT_TIME, CreateWindow, NONE, Window, WindowAttributes, WindowChanges, WindowClass, XConn,
    event_mask, modmask, predefined,
};
use crate::wm::{CLIENT_EVENT_MASK, FRAME_EVENT_MASK, WindowManager};

/// A client still gathering after this long is finished with what arrived.
pub const MANAGE_DEADLINE: Duration = Duration::from_secs(5);

/// Long length for ordinary property reads.
const PROPERTY_LONGS: u32 = 1024;
/// `_NET_WM_ICON` can carry several large images.
const ICON_LONGS: u32 = 1 << 20;

/// Transient chains are not walked further than this when checking cycles.
const MAX_TRANSIENT_CHAIN: usize = 32;

/// Cookie payload for a property read: the window and the atom, so a reply
/// can be matched back even after the handle was recycled.
pub(crate) fn property_cookie(window: Window, atom: Atom) -> u64 {
    ((window as u64) << 32) | atom as u64
}

impl<C: XConn> WindowManager<C> {
    /// Properties read before a client is shown, with the length to read.
    pub(crate) fn phase1_properties(&self) -> [(Atom, u32); 26] {
        let a = &self.atoms;
        [
            (predefined::WM_CLASS, PROPERTY_LONGS),
            (predefined::WM_CLIENT_MACHINE, PROPERTY_LONGS),
            (predefined::WM_COMMAND, PROPERTY_LONGS),
            (predefined::WM_HINTS, PROPERTY_LONGS),
            (predefined::WM_NORMAL_HINTS, PROPERTY_LONGS),
            (predefined::WM_TRANSIENT_FOR, PROPERTY_LONGS),
            (a.wm_colormap_windows, PROPERTY_LONGS),
            (a.wm_protocols, PROPERTY_LONGS),
            (predefined::WM_NAME, PROPERTY_LONGS),
            (a.net_wm_name, PROPERTY_LONGS),
            (predefined::WM_ICON_NAME, PROPERTY_LONGS),
            (a.net_wm_icon_name, PROPERTY_LONGS),
            (a.net_wm_window_type, PROPERTY_LONGS),
            (a.net_wm_state, PROPERTY_LONGS),
            (a.net_wm_desktop, PROPERTY_LONGS),
            (a.net_wm_strut, PROPERTY_LONGS),
            (a.net_wm_strut_partial, PROPERTY_LONGS),
            (a.net_wm_icon, ICON_LONGS),
            (a.net_wm_pid, PROPERTY_LONGS),
            (a.net_wm_user_time, PROPERTY_LONGS),
            (a.net_wm_user_time_window, PROPERTY_LONGS),
            (a.net_wm_sync_request_counter, PROPERTY_LONGS),
            (a.net_wm_icon_geometry, PROPERTY_LONGS),
            (a.motif_wm_hints, PROPERTY_LONGS),
            (a.gtk_frame_extents, PROPERTY_LONGS),
            (a.net_wm_window_opacity, PROPERTY_LONGS),
        ]
    }

    /// First sight of a top-level window: allocate its record and ask the
    /// server for everything needed to manage it.
    pub(crate) fn manage_start(&mut self, window: Window) -> Result<()> {
        if window == NONE
            || window == self.root
            || window == self.check_window
            || window == self.menu.window
            || self.window_to_client.contains_key(&window)
        {
            return Ok(());
        }

        let Some(handle) = self.clients.alloc_or_grow() else {
            warn!("Client arena exhausted, not managing {:#x}", window);
            return Ok(());
        };
        let now = Instant::now();
        let desktop = self.current_desktop as i32;
        if let Some((client, info)) = self.clients.get_both_mut(handle) {
            client.handle = handle;
            client.xid = window;
            client.state = ClientState::New;
            client.phase = ManagePhase::Gathering;
            client.manage_deadline = Some(now + MANAGE_DEADLINE);
            client.desktop = desktop;
            client.layer = Layer::Normal;
            client.base_layer = Layer::Normal;
            *info = ClientInfo::new();
        }
        self.window_to_client.insert(window, handle);
        debug!("WM: Managing {:#x} as {:?}", window, handle);

        // Subscribe before reading so no change slips between read and notify.
        self.conn.change_window_attributes(
            window,
            &WindowAttributes { event_mask: Some(event_mask::PROPERTY_CHANGE), ..Default::default() },
        )?;

        let mut issued = 0;
        let seq = self.conn.get_window_attributes(window)?;
        if self.cookies.push(seq, CookieTag::attributes(), handle, window as u64, now) {
            issued += 1;
        }
        let seq = self.conn.get_geometry(window)?;
        if self.cookies.push(seq, CookieTag::geometry(), handle, window as u64, now) {
            issued += 1;
        }
        for (atom, length) in self.phase1_properties() {
            let seq = self.conn.get_property(window, atom, predefined::ANY, length)?;
            if self.cookies.push(seq, CookieTag::property(atom), handle, property_cookie(window, atom), now) {
                issued += 1;
            }
        }
        if let Some(client) = self.clients.get_mut(handle) {
            client.pending_replies = issued;
        }
        Ok(())
    }

    /// Every Phase-1 reply is in (or the deadline passed): frame, reparent
    /// and show the client.
    pub(crate) fn finish_manage(&mut self, handle: Handle) -> Result<()> {
        let Some(client) = self.clients.get(handle) else {
            return Ok(());
        };
        if client.state != ClientState::New || client.phase == ManagePhase::Done {
            return Ok(());
        }
        let xid = client.xid;

        let parent_xid = self.clients.cold(handle).map(|info| info.transient_for_xid).unwrap_or(NONE);
        if parent_xid != NONE {
            self.link_transient(handle, parent_xid);
        }
        self.apply_rules(handle);

        let screen = self.screen;
        let desktop_count = self.desktop_count;
        let current = self.current_desktop as i32;
        if let Some(client) = self.clients.get_mut(handle) {
            if client.desired.is_empty() {
                client.desired = screen.centered(800, 600);
            }
            if !client.sticky && (client.desktop < 0 || client.desktop >= desktop_count as i32) {
                client.desktop = current;
            }
            if !client.is_fullscreen() {
                client.layer = client.layer_from_state();
            }
            let hints = client.hints;
            hints.constrain(&mut client.desired.width, &mut client.desired.height);
        }
        self.place_window(handle);

        self.create_frame(handle)?;
        let (bw, th) = self.decoration(handle);
        let Some(client) = self.clients.get_mut(handle) else {
            return Ok(());
        };
        let frame = client.frame;
        let desired = client.desired;
        if client.was_viewable {
            client.ignore_unmap += 1;
        }

        self.conn.change_save_set(xid, true)?;
        self.conn.reparent_window(xid, frame, bw as i16, th as i16)?;
        self.conn.configure_window(
            xid,
            &WindowChanges {
                x: Some(bw as i32),
                y: Some(th as i32),
                width: Some(desired.width),
                height: Some(desired.height),
                border_width: Some(0),
                ..Default::default()
            },
        )?;
        if let Some(client) = self.clients.get_mut(handle) {
            client.server = desired;
        }
        self.publish_frame_extents(handle)?;
        self.publish_allowed_actions(handle)?;
        self.conn.change_window_attributes(
            xid,
            &WindowAttributes { event_mask: Some(CLIENT_EVENT_MASK), ..Default::default() },
        )?;

        if self.conn.has_damage() {
            let damage = self.conn.generate_id()?;
            self.conn.damage_create(damage, xid)?;
            if let Some(client) = self.clients.get_mut(handle) {
                client.damage = damage;
            }
        }

        let showing_desktop = self.showing_desktop;
        let current = self.current_desktop;
        let Some(client) = self.clients.get_mut(handle) else {
            return Ok(());
        };
        if let Some(opacity) = client.opacity {
            self.conn.change_property32(frame, self.atoms.net_wm_window_opacity, predefined::CARDINAL, &[opacity])?;
        }
        let hidden_by_desktop = showing_desktop
            && !matches!(client.window_type, WindowType::Dock | WindowType::Desktop);
        if hidden_by_desktop {
            client.flags |= crate::wm::client_flags::ClientFlags::SHOW_DESKTOP_HIDDEN;
        }
        let iconic = client.initial_state == InitialState::Iconic || hidden_by_desktop;
        let visible = !iconic && client.is_visible_on(current);
        client.state = if iconic { ClientState::Unmapped } else { ClientState::Mapped };
        client.phase = ManagePhase::Done;
        client.manage_deadline = None;
        client.frame_visible = visible;
        let window_type = client.window_type;
        let has_strut = !client.strut.is_empty();

        self.conn.map_window(xid)?;
        if visible {
            self.conn.map_window(frame)?;
        }
        self.set_wm_state(xid, if visible { wm_state::NORMAL } else { wm_state::ICONIC })?;

        for button in 1..=3 {
            self.conn.grab_button(xid, button, modmask::ANY)?;
        }

        if !iconic {
            if window_type == WindowType::Desktop {
                self.stack_lower(handle)?;
            } else {
                self.stack_raise(handle)?;
            }
        }
        self.focus_history.push_front(handle);

        let restore_focus = self.initial_focus != NONE && self.initial_focus == xid;
        if restore_focus {
            self.initial_focus = NONE;
        }
        if (restore_focus || self.should_focus_on_map(handle)) && self.is_focusable(handle) {
            self.set_focus(handle)?;
        }

        if let Some(client) = self.clients.get_mut(handle) {
            client.dirty |= Dirty::FRAME_ALL | Dirty::STATE | Dirty::DESKTOP;
        }
        self.root_dirty |= RootDirty::CLIENT_LIST | RootDirty::CLIENT_LIST_STACKING;
        if has_strut {
            self.root_dirty |= RootDirty::WORKAREA;
        }

        let mut queued = self.clients.cold_mut(handle).map(|info| std::mem::take(&mut info.queued_state)).unwrap_or_default();
        queued.extend(self.pending_state.remove(&xid).unwrap_or_default());
        for data in queued {
            self.apply_net_wm_state(handle, data)?;
        }

        self.stats.clients_managed += 1;
        if let (Some(client), Some(info)) = (self.clients.get(handle), self.clients.cold(handle)) {
            info!(
                "Managed {:#x} ({:?}, class {:?}) in frame {:#x} on desktop {}",
                xid, client.window_type, info.wm_class, frame, client.desktop
            );
        }
        Ok(())
    }

    fn apply_rules(&mut self, handle: Handle) {
        let rules = &self.rules;
        if let Some((client, info)) = self.clients.get_both_mut(handle) {
            for rule in rules.iter() {
                if rule.matches(client, info) {
                    trace!("Rule {:?} matched {:#x}", rule, client.xid);
                    rule.apply(client);
                }
            }
        }
    }

    /// Create the frame window. Clients with a foreign visual get a frame of
    /// their own depth and a colormap to go with it.
    fn create_frame(&mut self, handle: Handle) -> Result<()> {
        let (bw, th) = self.decoration(handle);
        let background = self.config.theme.inactive_bg;
        let Some(client) = self.clients.get(handle) else {
            return Ok(());
        };
        let desired = client.desired;
        let foreign = client.visual != 0 && client.visual != self.root_visual;
        let (visual, depth) = (client.visual, client.depth);

        let mut attributes = WindowAttributes {
            background_pixel: Some(background),
            event_mask: Some(FRAME_EVENT_MASK),
            ..Default::default()
        };
        let mut colormap = NONE;
        if foreign {
            colormap = self.conn.generate_id()?;
            self.conn.create_colormap(colormap, self.root, visual)?;
            attributes.colormap = Some(colormap);
            attributes.border_pixel = Some(0);
            attributes.background_pixel = Some(0);
        }

        let frame = self.conn.generate_id()?;
        self.conn.create_window(&CreateWindow {
            wid: frame,
            parent: self.root,
            geometry: Geometry::new(desired.x, desired.y, desired.width + 2 * bw, desired.height + th + bw),
            border_width: 0,
            class: WindowClass::InputOutput,
            depth: if foreign { depth } else { 0 },
            visual: if foreign { visual } else { 0 },
            attributes,
        })?;

        if let Some(client) = self.clients.get_mut(handle) {
            client.frame = frame;
            client.colormap = colormap;
        }
        self.frame_to_client.insert(frame, handle);
        trace!("Created frame {:#x} for {:?}", frame, handle);
        Ok(())
    }

    /// Make `handle` a transient of the client owning `parent_xid`. Self
    /// links and cycles are refused.
    pub(crate) fn link_transient(&mut self, handle: Handle, parent_xid: Window) {
        let Some(parent) = self.client_by_window(parent_xid) else {
            trace!("Transient parent {:#x} is not managed", parent_xid);
            return;
        };
        if parent == handle {
            return;
        }

        let mut cursor = parent;
        for _ in 0..MAX_TRANSIENT_CHAIN {
            if cursor == handle {
                debug!("Refusing transient cycle through {:?}", handle);
                return;
            }
            match self.clients.get(cursor) {
                Some(c) if c.transient_for.is_valid() => cursor = c.transient_for,
                _ => break,
            }
        }

        let Some(old) = self.clients.get(handle).map(|c| c.transient_for) else {
            return;
        };
        if old == parent {
            return;
        }
        if let Some(old_parent) = self.clients.get_mut(old) {
            old_parent.transients.retain(|h| *h != handle);
        }
        if let Some(client) = self.clients.get_mut(handle) {
            client.transient_for = parent;
        }
        if let Some(parent_client) = self.clients.get_mut(parent) {
            if !parent_client.transients.contains(&handle) {
                parent_client.transients.push(handle);
            }
        }
    }

    /// Drop a client that never got a frame.
    pub(crate) fn abort_manage(&mut self, handle: Handle) {
        let Some(client) = self.clients.get(handle) else {
            return;
        };
        let (xid, frame) = (client.xid, client.frame);
        debug!("WM: Aborting manage of {:#x}", xid);

        self.cookies.forget_client(&self.conn, handle);
        if self.window_to_client.get(&xid) == Some(&handle) {
            self.window_to_client.remove(&xid);
        }
        if frame != NONE {
            self.frame_to_client.remove(&frame);
        }
        self.clients.free(handle);
    }

    /// Release a client: give the window back to the root (unless it is
    /// gone), destroy the frame and forget every reference to it.
    pub(crate) fn unmanage(&mut self, handle: Handle) -> Result<()> {
        let Some(client) = self.clients.get(handle) else {
            return Ok(());
        };
        if client.phase == ManagePhase::Gathering || client.frame == NONE {
            self.abort_manage(handle);
            return Ok(());
        }
        if matches!(client.state, ClientState::Unmanaging | ClientState::Unmanaged) {
            return Ok(());
        }

        let destroyed = client.state == ClientState::Destroyed;
        let (xid, frame) = (client.xid, client.frame);
        let (damage, colormap) = (client.damage, client.colormap);
        let (origin, original_border) = ((client.server.x, client.server.y), client.original_border);
        let had_strut = !client.strut.is_empty();
        let parent = client.transient_for;
        let children = client.transients.clone();
        debug!("WM: Unmanaging {:#x} (destroyed: {})", xid, destroyed);

        if let Some(client) = self.clients.get_mut(handle) {
            client.state = ClientState::Unmanaging;
        }
        if self.interaction.handle == handle {
            self.cancel_interaction()?;
        }

        self.stack_remove(handle);
        if let Some(p) = self.clients.get_mut(parent) {
            p.transients.retain(|h| *h != handle);
        }
        for child in children {
            if let Some(c) = self.clients.get_mut(child) {
                c.transient_for = Handle::INVALID;
            }
        }
        let was_focused = self.focused == handle;
        self.mru_remove(handle);
        self.cookies.forget_client(&self.conn, handle);

        if !destroyed {
            self.conn.change_window_attributes(xid, &WindowAttributes { event_mask: Some(0), ..Default::default() })?;
            self.conn.change_save_set(xid, false)?;
            self.conn.reparent_window(xid, self.root, origin.0 as i16, origin.1 as i16)?;
            self.conn.configure_window(
                xid,
                &WindowChanges { border_width: Some(original_border as u32), ..Default::default() },
            )?;
            self.conn.delete_property(xid, self.atoms.wm_state)?;
            if !self.restarting {
                self.conn.delete_property(xid, self.atoms.net_wm_desktop)?;
                self.conn.delete_property(xid, self.atoms.net_wm_state)?;
            }
        }
        if damage != NONE {
            self.conn.damage_destroy(damage)?;
        }
        self.conn.destroy_window(frame)?;
        if colormap != NONE {
            self.conn.free_colormap(colormap)?;
        }

        self.window_to_client.remove(&xid);
        self.frame_to_client.remove(&frame);
        if let Some(client) = self.clients.get_mut(handle) {
            client.state = ClientState::Unmanaged;
        }
        self.clients.free(handle);

        self.root_dirty |= RootDirty::CLIENT_LIST | RootDirty::CLIENT_LIST_STACKING;
        if had_strut {
            self.root_dirty |= RootDirty::WORKAREA;
        }
        if was_focused {
            self.focused = Handle::INVALID;
            let successor = if self.is_focusable(parent) { Some(parent) } else { self.focus_successor(handle) };
            match successor {
                Some(next) => self.set_focus(next)?,
                None => self.focus_none()?,
            }
        }
        self.stats.clients_unmanaged += 1;
        Ok(())
    }

    /// Ask the client to close: ping first when it answers pings, then
    /// `WM_DELETE_WINDOW`, falling back to killing its connection.
    pub(crate) fn close_client(&mut self, handle: Handle) -> Result<()> {
        let Some(client) = self.clients.get(handle) else {
            return Ok(());
        };
        let xid = client.xid;
        let protocols = self.clients.cold(handle).map(|info| info.protocols).unwrap_or_default();

        if protocols.contains(Protocols::PING) {
            self.conn.send_client_message(
                xid,
                self.atoms.wm_protocols,
                [self.atoms.net_wm_ping, CURRENT_TIME, xid, 0, 0],
            )?;
        }
        if protocols.contains(Protocols::DELETE_WINDOW) {
            debug!("WM: Sending WM_DELETE_WINDOW to {:#x}", xid);
            self.conn.send_client_message(
                xid,
                self.atoms.wm_protocols,
                [self.atoms.wm_delete_window, CURRENT_TIME, 0, 0, 0],
            )?;
        } else {
            debug!("WM: Killing {:#x}", xid);
            self.conn.kill_client(xid)?;
        }
        Ok(())
    }

    /// Focus-on-map policy: rules first, then the window type, then only if
    /// nothing holds focus yet.
    pub(crate) fn should_focus_on_map(&self, handle: Handle) -> bool {
        let Some(client) = self.clients.get(handle) else {
            return false;
        };
        if let Some(focus) = client.focus_override {
            return focus;
        }
        if client.window_type.refuses_focus() {
            return false;
        }
        if client.window_type == WindowType::Dialog || client.transient_for.is_valid() {
            return true;
        }
        !self.clients.live(self.focused)
    }

    pub(crate) fn handle_map_request(&mut self, window: Window) -> Result<()> {
        match self.client_by_window(window) {
            Some(handle) => {
                let Some(client) = self.clients.get(handle) else {
                    return Ok(());
                };
                if client.state == ClientState::Unmapped {
                    debug!("WM: Map request restores {:#x}", window);
                    if !client.is_visible_on(self.current_desktop) && client.desktop >= 0 {
                        self.switch_workspace(client.desktop as u32)?;
                    }
                    self.restore(handle)?;
                    if self.is_focusable(handle) {
                        self.set_focus(handle)?;
                    }
                }
                Ok(())
            }
            None => self.manage_start(window),
        }
    }

    pub(crate) fn handle_unmap_notify(&mut self, event: Window, window: Window) -> Result<()> {
        let Some(handle) = self.client_by_any(window) else {
            return Ok(());
        };
        let Some(client) = self.clients.get_mut(handle) else {
            return Ok(());
        };
        if client.ignore_unmap > 0 {
            client.ignore_unmap -= 1;
            trace!("Expected unmap of {:#x}, {} more pending", window, client.ignore_unmap);
            return Ok(());
        }
        if window == client.frame {
            return Ok(());
        }
        if event != client.xid && event != client.frame && event != self.root {
            return Ok(());
        }
        debug!("WM: {:#x} withdrew", window);
        self.unmanage(handle)
    }

    pub(crate) fn handle_destroy_notify(&mut self, window: Window) -> Result<()> {
        self.pending_state.remove(&window);
        let Some(handle) = self.client_by_window(window) else {
            return Ok(());
        };
        if let Some(client) = self.clients.get_mut(handle) {
            if client.phase == ManagePhase::Gathering {
                self.abort_manage(handle);
                return Ok(());
            }
            client.state = ClientState::Destroyed;
        }
        self.unmanage(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wm::client_flags::ClientFlags;
    use crate::wm::ewmh::state_action;
    use crate::wm::fake::{FakeConn, Request};
    use crate::wm::harness::*;
    use crate::wm::xconn::{ConfigureRequest, PropertyReply, StackMode, XEvent, config_mask};

    #[test]
    fn map_request_manages_and_frames_the_window() {
        let mut wm = test_wm();
        let window = wm.conn.add_window(Geometry::new(100, 100, 400, 300), false, false);
        wm.conn.set_property(window, predefined::WM_CLASS, PropertyReply::from_bytes(predefined::STRING, b"xterm\0XTerm\0"));
        wm.conn.set_property(window, predefined::WM_NAME, PropertyReply::from_bytes(predefined::STRING, b"shell"));
        let h = wm.request_map(window);

        let (bw, th) = wm.decoration(h);
        let c = wm.client(h);
        assert_eq!(c.state, ClientState::Mapped);
        assert_eq!(c.phase, ManagePhase::Done);
        assert_eq!(wm.conn.parent_of(window), Some(c.frame));
        assert!(wm.conn.is_mapped(c.frame) && wm.conn.is_mapped(window));
        assert_eq!(wm.conn.window_geometry(window).map(|g| (g.x, g.y)), Some((bw as i32, th as i32)));
        assert_eq!(wm.conn.property32(window, wm.atoms.wm_state), vec![wm_state::NORMAL, NONE]);
        assert_eq!(wm.conn.property32(window, wm.atoms.net_frame_extents), vec![bw, bw, th + bw, bw]);
        assert_eq!(wm.conn.property32(FakeConn::ROOT, wm.atoms.net_client_list), vec![window]);
        assert_eq!(wm.conn.property32(FakeConn::ROOT, wm.atoms.net_active_window), vec![window]);

        let info = wm.clients.cold(h).unwrap();
        assert_eq!((info.wm_instance.as_str(), info.wm_class.as_str()), ("xterm", "XTerm"));
        assert_eq!(info.title, "shell");
        assert_eq!(wm.focused, h);
        assert_eq!(wm.stats.clients_managed, 1);
    }

    #[test]
    fn repeated_map_requests_manage_once() {
        let mut wm = test_wm();
        let window = wm.conn.add_window(Geometry::new(0, 0, 100, 100), false, false);
        wm.conn.push_event(XEvent::MapRequest { window, parent: FakeConn::ROOT });
        wm.conn.push_event(XEvent::MapRequest { window, parent: FakeConn::ROOT });
        wm.settle();
        assert_eq!(wm.clients.len(), 1);
        let creates = wm.conn.requests().iter().filter(|r| matches!(r, Request::CreateWindow(_))).count();
        assert_eq!(creates, 1);
    }

    #[test]
    fn client_waits_for_every_reply() {
        let mut wm = test_wm();
        let window = wm.conn.add_window(Geometry::new(0, 0, 100, 100), false, false);
        wm.conn.set_hold_replies(true);
        wm.conn.push_event(XEvent::MapRequest { window, parent: FakeConn::ROOT });
        wm.tick_once(true);
        let h = wm.client_by_window(window).unwrap();
        assert_eq!(wm.client(h).state, ClientState::New);
        assert_eq!(wm.client(h).pending_replies, 28);

        wm.conn.set_hold_replies(false);
        wm.conn.release_replies();
        wm.settle();
        assert_eq!(wm.client(h).state, ClientState::Mapped);
        assert_eq!(wm.client(h).pending_replies, 0);
    }

    #[test]
    fn destroy_while_gathering_aborts() {
        let mut wm = test_wm();
        let window = wm.conn.add_window(Geometry::new(0, 0, 100, 100), false, false);
        wm.conn.set_hold_replies(true);
        wm.conn.push_event(XEvent::MapRequest { window, parent: FakeConn::ROOT });
        wm.tick_once(true);
        assert!(wm.client_by_window(window).is_some());

        wm.conn.remove_window(window);
        wm.conn.push_event(XEvent::DestroyNotify { event: FakeConn::ROOT, window });
        wm.tick_once(true);
        assert!(wm.client_by_window(window).is_none());
        assert!(wm.clients.is_empty());
        assert!(!wm.cookies.has_pending());
    }

    #[test]
    fn override_redirect_windows_are_not_managed() {
        let mut wm = test_wm();
        let popup = wm.conn.add_window(Geometry::new(0, 0, 100, 100), false, true);
        let h = wm.request_map(popup);
        assert!(!h.is_valid());
        assert!(wm.clients.is_empty());
        assert!(!wm.conn.requests().iter().any(|r| matches!(r, Request::CreateWindow(_))));
    }

    #[test]
    fn adoption_balances_ignore_unmap() {
        let conn = FakeConn::new();
        let window = conn.add_window(Geometry::new(10, 10, 300, 200), true, false);
        let flags: &'static crate::signals::SignalFlags = Box::leak(Box::new(crate::signals::SignalFlags::new()));
        let mut wm = WindowManager::new(conn, crate::config::Config::default(), flags).unwrap();
        wm.start().unwrap();
        wm.settle();

        let h = wm.client_by_window(window).unwrap();
        assert_eq!(wm.client(h).ignore_unmap, 0);
        assert_eq!(wm.client(h).state, ClientState::Mapped);
        assert!(wm.conn.is_mapped(wm.frame(h)));
    }

    #[test]
    fn withdrawing_client_is_unmanaged() {
        let mut wm = test_wm();
        let h = wm.map_new(Geometry::new(0, 0, 300, 200));
        let (xid, frame) = (wm.xid(h), wm.frame(h));
        wm.conn.unmap_window(xid).unwrap();
        wm.settle();

        assert!(wm.client_by_window(xid).is_none());
        assert!(!wm.conn.exists(frame));
        assert_eq!(wm.conn.parent_of(xid), Some(FakeConn::ROOT));
        assert!(wm.conn.property(xid, wm.atoms.wm_state).is_none());
        assert!(wm.conn.property32(FakeConn::ROOT, wm.atoms.net_client_list).is_empty());
        assert_eq!(wm.stats.clients_unmanaged, 1);
    }

    #[test]
    fn transient_close_returns_focus_to_parent() {
        let mut wm = test_wm();
        let parent = wm.map_new(Geometry::new(0, 0, 600, 400));
        let other = wm.map_new(Geometry::new(50, 50, 300, 200));
        wm.set_focus(other).unwrap();
        wm.set_focus(parent).unwrap();

        let dialog = wm.conn.add_window(Geometry::new(0, 0, 200, 100), false, false);
        wm.conn.set_property(dialog, predefined::WM_TRANSIENT_FOR, PropertyReply::from_u32(predefined::WINDOW, &[wm.xid(parent)]));
        let d = wm.request_map(dialog);
        assert_eq!(wm.focused, d);
        assert_eq!(wm.client(d).transient_for, parent);
        assert_eq!(wm.client(parent).transients, vec![d]);

        wm.conn.remove_window(dialog);
        wm.conn.push_event(XEvent::DestroyNotify { event: FakeConn::ROOT, window: dialog });
        wm.settle();
        assert_eq!(wm.focused, parent);
        assert!(wm.client(parent).transients.is_empty());
    }

    #[test]
    fn transient_cycles_are_refused() {
        let mut wm = test_wm();
        let a = wm.map_new(Geometry::new(0, 0, 100, 100));
        let b = wm.map_new(Geometry::new(0, 0, 100, 100));
        wm.link_transient(b, wm.xid(a));
        wm.link_transient(a, wm.xid(b));
        wm.link_transient(a, wm.xid(a));
        assert_eq!(wm.client(b).transient_for, a);
        assert!(!wm.client(a).transient_for.is_valid());
        assert_eq!(wm.client(a).transients, vec![b]);
    }

    #[test]
    fn destroy_supersedes_pending_configure() {
        let mut wm = test_wm();
        let h = wm.map_new(Geometry::new(0, 0, 300, 200));
        let xid = wm.xid(h);
        wm.conn.take_requests();

        wm.conn.push_event(XEvent::ConfigureRequest(ConfigureRequest {
            window: xid,
            parent: wm.frame(h),
            sibling: NONE,
            x: 5,
            y: 5,
            width: 10,
            height: 10,
            border_width: 0,
            stack_mode: StackMode::Above,
            value_mask: config_mask::X | config_mask::WIDTH,
        }));
        wm.conn.remove_window(xid);
        wm.conn.push_event(XEvent::DestroyNotify { event: FakeConn::ROOT, window: xid });
        wm.settle();

        assert!(wm.client_by_window(xid).is_none());
        let requests = wm.conn.take_requests();
        assert!(!requests.iter().any(|r| matches!(r, Request::Configure(w, _) if *w == xid)));
        assert!(!requests.iter().any(|r| matches!(r, Request::Reparent { window, .. } if *window == xid)));
    }

    #[test]
    fn close_prefers_delete_window() {
        let mut wm = test_wm();
        let h = wm.map_new(Geometry::new(0, 0, 100, 100));
        let xid = wm.xid(h);
        wm.conn.take_requests();
        wm.close_client(h).unwrap();
        assert_eq!(wm.conn.take_requests(), vec![Request::KillClient(xid)]);

        wm.clients.cold_mut(h).unwrap().protocols = Protocols::DELETE_WINDOW | Protocols::PING;
        wm.close_client(h).unwrap();
        let requests = wm.conn.take_requests();
        assert_eq!(requests.len(), 2);
        assert!(matches!(&requests[0], Request::ClientMessage { data, .. } if data[0] == wm.atoms.net_wm_ping));
        assert!(matches!(&requests[1], Request::ClientMessage { data, .. } if data[0] == wm.atoms.wm_delete_window));
    }

    #[test]
    fn early_state_requests_replay_after_manage() {
        let mut wm = test_wm();
        let window = wm.conn.add_window(Geometry::new(0, 0, 300, 200), false, false);
        wm.conn.push_event(XEvent::ClientMessage {
            window,
            message_type: wm.atoms.net_wm_state,
            format: 32,
            data: [state_action::ADD, wm.atoms.net_wm_state_above, 0, 1, 0],
        });
        wm.settle();
        assert!(wm.pending_state.contains_key(&window));

        let h = wm.request_map(window);
        assert!(wm.client(h).flags.contains(ClientFlags::ABOVE));
        assert_eq!(wm.client(h).layer, Layer::Above);
        assert!(wm.pending_state.is_empty());
    }

    #[test]
    fn initial_state_property_is_honoured() {
        let mut wm = test_wm();
        let window = wm.conn.add_window(Geometry::new(0, 0, 300, 200), false, false);
        wm.conn.set_property(
            window,
            wm.atoms.net_wm_state,
            PropertyReply::from_u32(predefined::ATOM, &[wm.atoms.net_wm_state_fullscreen]),
        );
        let h = wm.request_map(window);
        assert!(wm.client(h).is_fullscreen());
        assert_eq!(wm.client(h).server, Geometry::new(0, 0, 1920, 1080));
        assert!(wm.conn.property32(window, wm.atoms.net_wm_state).contains(&wm.atoms.net_wm_state_fullscreen));
    }

    #[test]
    fn iconic_initial_state_keeps_frame_hidden() {
        let mut wm = test_wm();
        let window = wm.conn.add_window(Geometry::new(0, 0, 300, 200), false, false);
        // flags = StateHint, initial_state = IconicState
        wm.conn.set_property(window, predefined::WM_HINTS, PropertyReply::from_u32(predefined::WM_HINTS, &[2, 0, 3]));
        let h = wm.request_map(window);
        assert_eq!(wm.client(h).state, ClientState::Unmapped);
        assert!(!wm.conn.is_mapped(wm.frame(h)));
        assert_eq!(wm.conn.property32(window, wm.atoms.wm_state), vec![wm_state::ICONIC, NONE]);
        assert!(wm.stack_position(h).is_none());
    }
}
