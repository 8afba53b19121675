//! Reply Module
//!
//! Dispatch of round-trip replies retired by the cookie jar. During manage
//! each reply fills in part of the client record and counts down its
//! outstanding budget; afterwards the same decoding refreshes single
//! properties when the client changes them.

use std::time::Instant;

use anyhow::Result;
use tracing::{debug, trace, warn};

use crate::shared::Geometry;
use crate::wm::client_flags::{
    ClientFlags, ClientState, Dirty, InitialState, ManagePhase, Protocols, RootDirty, WindowType,
};
use crate::wm::cookie_jar::{Completed, CookieTag, MAX_REPLIES_PER_TICK};
use crate::wm::ewmh::state_action;
use crate::wm::hints::{FrameExtents, SizeHints, Strut, WmHints, motif_wants_undecorated, pick_icon};
use crate::wm::manage::property_cookie;
use crate::wm::slotmap::Handle;
use crate::wm::xconn::{
    Atom, GeometryReply, MapState, NONE, PropertyReply, Reply, Window, WindowAttrs, XConn, predefined,
};
use crate::wm::WindowManager;

/// Work left after a property was decoded, once the client borrow ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FollowUp {
    Nothing,
    Transient(Window),
    Opacity(Option<u32>),
    Workarea,
}

/// Text property: Latin-1 when typed STRING, UTF-8 otherwise. Trailing NULs
/// are dropped.
fn decode_text(reply: &PropertyReply) -> String {
    let bytes = match reply.value.iter().rposition(|b| *b != 0) {
        Some(end) => &reply.value[..=end],
        None => return String::new(),
    };
    if reply.type_ == predefined::STRING {
        bytes.iter().map(|b| *b as char).collect()
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

/// NUL separated list, as in WM_CLASS and WM_COMMAND.
fn decode_list(reply: &PropertyReply) -> Vec<String> {
    let mut items: Vec<String> =
        reply.value.split(|b| *b == 0).map(|s| String::from_utf8_lossy(s).into_owned()).collect();
    if items.last().is_some_and(|s| s.is_empty()) {
        items.pop();
    }
    items
}

impl<C: XConn> WindowManager<C> {
    /// Retire ready (or expired) replies and route each to its handler.
    pub(crate) fn drain_replies(&mut self) {
        let now = Instant::now();
        let completed = self.cookies.drain(&self.conn, MAX_REPLIES_PER_TICK, now);
        for done in completed {
            if done.timed_out {
                self.stats.replies_timed_out += 1;
            } else {
                self.stats.replies_retired += 1;
            }
            if let Err(e) = self.dispatch_reply(done) {
                warn!("Failed to handle reply: {}", e);
            }
        }
    }

    fn dispatch_reply(&mut self, done: Completed) -> Result<()> {
        // Adoption probes carry no client.
        if !done.client.is_valid() {
            if let Some(Reply::Attributes(attrs)) = &done.reply {
                return self.adopt_if_viewable(done.data as Window, attrs.override_redirect, attrs.map_state);
            }
            return Ok(());
        }

        let handle = done.client;
        let Some(client) = self.clients.get(handle) else {
            trace!("Dropping reply {} for a released client", done.sequence);
            return Ok(());
        };
        let gathering = client.state == ClientState::New && client.phase == ManagePhase::Gathering;

        if let Some(error) = done.error {
            debug!("WM: Request {} for {:#x} failed: {}", done.sequence, client.xid, error);
            if gathering && done.tag.atom == NONE {
                // Without attributes or geometry the window cannot be framed.
                if let Some(client) = self.clients.get_mut(handle) {
                    client.manage_aborted = true;
                }
            }
        } else {
            match &done.reply {
                Some(Reply::Attributes(attrs)) => self.apply_attributes(handle, attrs, gathering),
                Some(Reply::Geometry(geometry)) => self.apply_geometry(handle, geometry, gathering),
                Some(Reply::Property(reply)) => self.apply_property(handle, done.tag.atom, reply, gathering)?,
                None if done.timed_out => debug!("WM: No reply for {:?} of {:?}", done.tag.kind, handle),
                None => {}
            }
        }

        if gathering && done.tag.counted {
            self.count_down(handle)?;
        }
        Ok(())
    }

    fn count_down(&mut self, handle: Handle) -> Result<()> {
        let Some(client) = self.clients.get_mut(handle) else {
            return Ok(());
        };
        client.pending_replies = client.pending_replies.saturating_sub(1);
        if client.pending_replies > 0 {
            return Ok(());
        }
        if client.manage_aborted {
            debug!("WM: Not managing {:#x}", client.xid);
            self.abort_manage(handle);
            Ok(())
        } else {
            self.finish_manage(handle)
        }
    }

    fn apply_attributes(&mut self, handle: Handle, attrs: &WindowAttrs, gathering: bool) {
        let Some(client) = self.clients.get_mut(handle) else {
            return;
        };
        if !gathering {
            return;
        }
        if attrs.override_redirect || attrs.input_only {
            client.manage_aborted = true;
        }
        client.override_redirect = attrs.override_redirect;
        client.was_viewable = attrs.map_state == MapState::Viewable;
        client.visual = attrs.visual;
    }

    fn apply_geometry(&mut self, handle: Handle, reply: &GeometryReply, gathering: bool) {
        let screen = self.screen;
        let Some(client) = self.clients.get_mut(handle) else {
            return;
        };
        if !gathering {
            return;
        }
        client.desired = if reply.width == 0 || reply.height == 0 {
            screen.centered(800, 600)
        } else {
            Geometry::new(reply.x as i32, reply.y as i32, reply.width as u32, reply.height as u32)
        };
        client.original_border = reply.border_width;
        client.depth = reply.depth;
    }

    /// Decode one property into the client record. Outside manage the
    /// matching dirty bits are raised so the flusher picks the change up.
    pub(crate) fn apply_property(
        &mut self,
        handle: Handle,
        atom: Atom,
        reply: &PropertyReply,
        gathering: bool,
    ) -> Result<()> {
        let atoms = &self.atoms;
        let Some((client, info)) = self.clients.get_both_mut(handle) else {
            return Ok(());
        };
        let values = reply.value32();
        let mut dirty = Dirty::empty();
        let mut follow = FollowUp::Nothing;

        match atom {
            predefined::WM_NAME => {
                info.base_title = decode_text(reply);
                if !info.has_net_wm_name {
                    info.title = info.base_title.clone();
                }
                dirty |= Dirty::FRAME_TITLE;
            }
            a if a == atoms.net_wm_name => {
                match std::str::from_utf8(&reply.value) {
                    Ok(name) if !name.trim_end_matches('\0').is_empty() => {
                        info.title = name.trim_end_matches('\0').to_string();
                        info.has_net_wm_name = true;
                    }
                    _ => {
                        info.has_net_wm_name = false;
                        info.title = info.base_title.clone();
                    }
                }
                dirty |= Dirty::FRAME_TITLE;
            }
            predefined::WM_ICON_NAME => {
                if info.icon_name.is_empty() {
                    info.icon_name = decode_text(reply);
                }
            }
            a if a == atoms.net_wm_icon_name => {
                if !reply.is_empty() {
                    info.icon_name = decode_text(reply);
                }
            }
            predefined::WM_CLASS => {
                let mut parts = decode_list(reply).into_iter();
                info.wm_instance = parts.next().unwrap_or_default();
                info.wm_class = parts.next().unwrap_or_default();
            }
            predefined::WM_CLIENT_MACHINE => info.client_machine = decode_text(reply),
            predefined::WM_COMMAND => info.command = decode_list(reply),
            a if a == atoms.wm_protocols => {
                let mut protocols = Protocols::empty();
                for value in &values {
                    match *value {
                        v if v == atoms.wm_delete_window => protocols |= Protocols::DELETE_WINDOW,
                        v if v == atoms.wm_take_focus => protocols |= Protocols::TAKE_FOCUS,
                        v if v == atoms.net_wm_ping => protocols |= Protocols::PING,
                        v if v == atoms.net_wm_sync_request => protocols |= Protocols::SYNC_REQUEST,
                        _ => {}
                    }
                }
                info.protocols = protocols;
            }
            predefined::WM_HINTS => {
                let hints = WmHints::from_values(&values);
                info.can_focus = hints.is_none_or(|h| h.input);
                let urgent = hints.is_some_and(|h| h.urgent);
                if urgent != client.flags.contains(ClientFlags::URGENT) {
                    client.flags.set(ClientFlags::URGENT, urgent);
                    dirty |= Dirty::STATE | Dirty::FRAME_STYLE;
                }
                if gathering && hints.is_some_and(|h| h.iconic) {
                    client.initial_state = InitialState::Iconic;
                }
            }
            predefined::WM_NORMAL_HINTS => {
                client.hints = SizeHints::from_values(&values).unwrap_or_default();
                if !gathering && !client.is_fullscreen() {
                    let hints = client.hints;
                    hints.constrain(&mut client.desired.width, &mut client.desired.height);
                    dirty |= Dirty::GEOM | Dirty::STATE;
                }
            }
            predefined::WM_TRANSIENT_FOR => {
                let parent = values.first().copied().unwrap_or(NONE);
                info.transient_for_xid = if parent == client.xid { NONE } else { parent };
                follow = FollowUp::Transient(info.transient_for_xid);
            }
            a if a == atoms.wm_colormap_windows => info.colormap_windows = values,
            a if a == atoms.net_wm_window_type => {
                let window_type =
                    values.iter().find_map(|atom| WindowType::from_atom(*atom, atoms)).unwrap_or_default();
                if window_type != client.window_type || gathering {
                    client.window_type = window_type;
                    client.base_layer = window_type.default_layer();
                    client.flags.set(ClientFlags::UNDECORATED, window_type.is_undecorated());
                    if !client.is_fullscreen() {
                        client.layer = client.layer_from_state();
                    }
                    dirty |= Dirty::STACK | Dirty::GEOM | Dirty::FRAME_ALL;
                }
            }
            a if a == atoms.net_wm_state => {
                if gathering {
                    for state in &values {
                        info.queued_state.push([state_action::ADD, *state, 0, 1, 0]);
                    }
                }
            }
            a if a == atoms.net_wm_desktop => {
                if gathering {
                    match values.first() {
                        Some(&0xFFFF_FFFF) => {
                            client.sticky = true;
                            client.desktop = -1;
                        }
                        Some(&desktop) => client.desktop = desktop as i32,
                        None => {}
                    }
                }
            }
            a if a == atoms.net_wm_strut => {
                client.strut_full = Strut::from_values(&values[..values.len().min(4)]);
                client.update_effective_strut();
                follow = FollowUp::Workarea;
            }
            a if a == atoms.net_wm_strut_partial => {
                client.strut_partial = if values.len() >= 12 { Strut::from_values(&values) } else { None };
                client.update_effective_strut();
                follow = FollowUp::Workarea;
            }
            a if a == atoms.net_wm_icon => {
                info.icon = pick_icon(&values);
                dirty |= Dirty::FRAME_TITLE;
            }
            a if a == atoms.net_wm_pid => info.pid = values.first().copied().unwrap_or(0),
            a if a == atoms.net_wm_user_time => client.user_time = values.first().copied().unwrap_or(0),
            a if a == atoms.net_wm_user_time_window => {
                client.user_time_window = values.first().copied().unwrap_or(NONE);
            }
            a if a == atoms.net_wm_sync_request_counter => {
                client.sync_counter = values.first().copied().unwrap_or(0);
            }
            a if a == atoms.net_wm_icon_geometry => {
                info.icon_geometry = (values.len() >= 4)
                    .then(|| Geometry::new(values[0] as i32, values[1] as i32, values[2], values[3]));
            }
            a if a == atoms.motif_wm_hints => {
                let typed = client.window_type.is_undecorated();
                match motif_wants_undecorated(&values) {
                    Some(undecorated) => client.flags.set(ClientFlags::UNDECORATED, undecorated || typed),
                    None => client.flags.set(ClientFlags::UNDECORATED, typed),
                }
                dirty |= Dirty::GEOM | Dirty::FRAME_ALL;
            }
            a if a == atoms.gtk_frame_extents => {
                client.gtk_extents = FrameExtents::from_values(&values);
                client.flags.set(ClientFlags::GTK_EXTENTS, client.gtk_extents.is_some());
                dirty |= Dirty::GEOM | Dirty::FRAME_ALL;
            }
            a if a == atoms.net_wm_window_opacity => {
                client.opacity = values.first().copied();
                follow = FollowUp::Opacity(client.opacity);
            }
            other => trace!("Ignoring reply for untracked property {}", other),
        }

        if gathering {
            return Ok(());
        }
        client.dirty |= dirty;
        let frame = client.frame;

        match follow {
            FollowUp::Nothing => {}
            FollowUp::Transient(NONE) => {
                let old = client.transient_for;
                client.transient_for = Handle::INVALID;
                if let Some(parent) = self.clients.get_mut(old) {
                    parent.transients.retain(|h| *h != handle);
                }
            }
            FollowUp::Transient(parent) => self.link_transient(handle, parent),
            FollowUp::Opacity(Some(opacity)) => {
                self.conn.change_property32(
                    frame,
                    self.atoms.net_wm_window_opacity,
                    predefined::CARDINAL,
                    &[opacity],
                )?;
            }
            FollowUp::Opacity(None) => self.conn.delete_property(frame, self.atoms.net_wm_window_opacity)?,
            FollowUp::Workarea => self.root_dirty |= RootDirty::WORKAREA,
        }
        Ok(())
    }

    /// Re-read one property of a managed client. The reply is not counted
    /// against the manage budget.
    pub(crate) fn refresh_property(&mut self, handle: Handle, atom: Atom) -> Result<()> {
        let Some(xid) = self.clients.get(handle).map(|c| c.xid) else {
            return Ok(());
        };
        let length = if atom == self.atoms.net_wm_icon { 1 << 20 } else { 1024 };
        let seq = self.conn.get_property(xid, atom, predefined::ANY, length)?;
        self.cookies.push(seq, CookieTag::refresh(atom), handle, property_cookie(xid, atom), Instant::now());
        Ok(())
    }
}
