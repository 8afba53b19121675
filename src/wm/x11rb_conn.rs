//! x11rb backend for [`XConn`].
//!
//! x11rb has no non-blocking reply poll, so readiness is tracked by
//! sequence number. Every event carries the sequence of the last request
//! the server processed; once an event with sequence `n` has been read, every
//! reply to a request at or below `n` is already buffered and fetching it
//! cannot block. When a reply is wanted beyond that point, a zero-length
//! property append on a private marker window forces a `PropertyNotify`
//! that advances the mark. Marker events never reach the manager.

use std::cell::Cell;
use std::os::unix::io::{AsRawFd, RawFd};

use anyhow::{Context, Result};
use tracing::{debug, warn};
use x11rb::connection::{Connection, DiscardMode, ReplyOrError, RequestConnection, RequestKind};
use x11rb::errors::{ConnectionError, ReplyError, ReplyOrIdError};
use x11rb::protocol::Event;
use x11rb::protocol::damage::{self, ConnectionExt as _};
use x11rb::protocol::xproto::{
    self, Allow, AtomEnum, ButtonIndex, ChangeGCAux, ChangeWindowAttributesAux, ClientMessageEvent, ClipOrdering,
    ColormapAlloc, ConfigureNotifyEvent, ConfigureWindowAux, ConnectionExt as _, CreateGCAux, CreateWindowAux,
    EventMask, GetGeometryReply, GetPropertyReply, GetWindowAttributesReply, Grab, GrabMode, InputFocus, ModMask,
    PropMode, Property, Rectangle, SetMode,
};
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;
use x11rb::x11_utils::{TryParse, X11Error};

use crate::shared::Geometry;
use crate::wm::xconn::{
    Atom, ConfigureRequest, ConnError, CreateWindow, GeometryReply, KeyboardMapping, MapState, PointerEvent,
    PropertyReply, Reply, ReplyKind, ReplyPoll, Seq, StackMode, Window, WindowAttributes, WindowAttrs, WindowChanges,
    WindowClass, XConn, XError, XEvent, XResult,
};

impl From<ConnectionError> for ConnError {
    fn from(e: ConnectionError) -> Self {
        ConnError::Connection(e.to_string())
    }
}

impl From<ReplyError> for ConnError {
    fn from(e: ReplyError) -> Self {
        match e {
            ReplyError::ConnectionError(e) => e.into(),
            ReplyError::X11Error(e) => ConnError::Protocol(x_error(&e)),
        }
    }
}

impl From<ReplyOrIdError> for ConnError {
    fn from(e: ReplyOrIdError) -> Self {
        match e {
            ReplyOrIdError::ConnectionError(e) => e.into(),
            ReplyOrIdError::X11Error(e) => ConnError::Protocol(x_error(&e)),
            ReplyOrIdError::IdsExhausted => ConnError::Request("X resource ids exhausted".into()),
        }
    }
}

fn x_error(e: &X11Error) -> XError {
    XError {
        error_code: e.error_code,
        major_opcode: e.major_opcode,
        minor_opcode: e.minor_opcode,
        bad_value: e.bad_value,
        sequence: e.sequence as Seq,
    }
}

pub struct X11rbConn {
    conn: RustConnection,
    root: Window,
    width: u16,
    height: u16,
    root_visual: u32,
    root_depth: u8,
    damage: bool,
    marker: Window,
    marker_atom: Atom,
    /// Highest request sequence the server is known to have answered.
    last_seen: Cell<Seq>,
    /// Sequence of the marker request in flight, if any.
    marker_seq: Cell<Option<Seq>>,
}

impl X11rbConn {
    /// Connect to `display` (or `$DISPLAY`) and prepare the marker window.
    pub fn connect(display: Option<&str>) -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(display).context("Failed to connect to X server")?;
        let screen = conn.setup().roots.get(screen_num).cloned().context("Display has no screen")?;
        debug!("Connected to X server (screen {})", screen_num);

        let damage = match conn.extension_information(damage::X11_EXTENSION_NAME)? {
            Some(_) => conn.damage_query_version(1, 1)?.reply().is_ok(),
            None => false,
        };
        debug!("DAMAGE extension available: {}", damage);

        let marker = conn.generate_id()?;
        conn.create_window(
            x11rb::COPY_DEPTH_FROM_PARENT,
            marker,
            screen.root,
            -1,
            -1,
            1,
            1,
            0,
            xproto::WindowClass::INPUT_ONLY,
            x11rb::COPY_FROM_PARENT,
            &CreateWindowAux::new().override_redirect(1).event_mask(EventMask::PROPERTY_CHANGE),
        )?;
        let marker_atom = conn.intern_atom(false, b"_HXM_SYNC")?.reply()?.atom;
        conn.flush()?;

        Ok(Self {
            root: screen.root,
            width: screen.width_in_pixels,
            height: screen.height_in_pixels,
            root_visual: screen.root_visual,
            root_depth: screen.root_depth,
            conn,
            damage,
            marker,
            marker_atom,
            last_seen: Cell::new(0),
            marker_seq: Cell::new(None),
        })
    }

    fn observe(&self, seq: Seq) {
        if seq > self.last_seen.get() {
            self.last_seen.set(seq);
        }
        if self.marker_seq.get().is_some_and(|m| m <= seq) {
            self.marker_seq.set(None);
        }
    }

    /// Make sure an event with a sequence of at least `seq` is on its way.
    fn request_marker(&self, seq: Seq) {
        if self.marker_seq.get().is_some_and(|m| m >= seq) {
            return;
        }
        match self.conn.change_property8(PropMode::APPEND, self.marker, self.marker_atom, AtomEnum::STRING, &[]) {
            Ok(cookie) => {
                self.marker_seq.set(Some(cookie.sequence_number()));
                cookie.ignore_error();
            }
            Err(e) => warn!("Failed to send sync marker: {}", e),
        }
    }

    fn next_event(&self) -> XResult<Option<XEvent>> {
        loop {
            let Some((event, seq)) = self.conn.poll_for_event_with_sequence()? else {
                return Ok(None);
            };
            self.observe(seq);
            if let Event::PropertyNotify(ev) = &event {
                if ev.window == self.marker {
                    continue;
                }
            }
            return Ok(Some(convert_event(event)));
        }
    }
}

fn pointer(
    root: Window,
    event: Window,
    child: Window,
    (root_x, root_y): (i16, i16),
    (event_x, event_y): (i16, i16),
    state: u16,
    detail: u8,
    time: u32,
) -> PointerEvent {
    PointerEvent { root, event, child, root_x, root_y, event_x, event_y, state, detail, time }
}

fn convert_event(event: Event) -> XEvent {
    match event {
        Event::MapRequest(e) => XEvent::MapRequest { window: e.window, parent: e.parent },
        Event::UnmapNotify(e) => XEvent::UnmapNotify { event: e.event, window: e.window },
        Event::DestroyNotify(e) => XEvent::DestroyNotify { event: e.event, window: e.window },
        Event::ConfigureRequest(e) => XEvent::ConfigureRequest(ConfigureRequest {
            window: e.window,
            parent: e.parent,
            sibling: e.sibling,
            x: e.x,
            y: e.y,
            width: e.width,
            height: e.height,
            border_width: e.border_width,
            stack_mode: if e.stack_mode == xproto::StackMode::BELOW { StackMode::Below } else { StackMode::Above },
            value_mask: u16::from(e.value_mask),
        }),
        Event::ConfigureNotify(e) => XEvent::ConfigureNotify {
            window: e.window,
            geometry: Geometry::new(e.x as i32, e.y as i32, e.width as u32, e.height as u32),
            border_width: e.border_width,
            override_redirect: e.override_redirect,
        },
        Event::PropertyNotify(e) => {
            XEvent::PropertyNotify { window: e.window, atom: e.atom, deleted: e.state == Property::DELETE }
        }
        Event::ClientMessage(e) => XEvent::ClientMessage {
            window: e.window,
            message_type: e.type_,
            format: e.format,
            data: e.data.as_data32(),
        },
        Event::KeyPress(e) => XEvent::KeyPress(pointer(
            e.root,
            e.event,
            e.child,
            (e.root_x, e.root_y),
            (e.event_x, e.event_y),
            u16::from(e.state),
            e.detail,
            e.time,
        )),
        Event::ButtonPress(e) => XEvent::ButtonPress(pointer(
            e.root,
            e.event,
            e.child,
            (e.root_x, e.root_y),
            (e.event_x, e.event_y),
            u16::from(e.state),
            e.detail,
            e.time,
        )),
        Event::ButtonRelease(e) => XEvent::ButtonRelease(pointer(
            e.root,
            e.event,
            e.child,
            (e.root_x, e.root_y),
            (e.event_x, e.event_y),
            u16::from(e.state),
            e.detail,
            e.time,
        )),
        Event::MotionNotify(e) => XEvent::MotionNotify(pointer(
            e.root,
            e.event,
            e.child,
            (e.root_x, e.root_y),
            (e.event_x, e.event_y),
            u16::from(e.state),
            0,
            e.time,
        )),
        Event::EnterNotify(e) => XEvent::EnterNotify(pointer(
            e.root,
            e.event,
            e.child,
            (e.root_x, e.root_y),
            (e.event_x, e.event_y),
            u16::from(e.state),
            0,
            e.time,
        )),
        Event::LeaveNotify(e) => XEvent::LeaveNotify(pointer(
            e.root,
            e.event,
            e.child,
            (e.root_x, e.root_y),
            (e.event_x, e.event_y),
            u16::from(e.state),
            0,
            e.time,
        )),
        Event::Expose(e) => XEvent::Expose {
            window: e.window,
            x: e.x,
            y: e.y,
            width: e.width,
            height: e.height,
            count: e.count,
        },
        Event::DamageNotify(e) => XEvent::DamageNotify {
            damage: e.damage,
            drawable: e.drawable,
            area: Geometry::new(e.area.x as i32, e.area.y as i32, e.area.width as u32, e.area.height as u32),
        },
        Event::Error(e) => XEvent::Error(x_error(&e)),
        Event::Unknown(bytes) => XEvent::Other(bytes.first().copied().unwrap_or(0)),
        _ => XEvent::Other(0),
    }
}

fn parse_reply(kind: ReplyKind, buf: &[u8]) -> Option<Reply> {
    match kind {
        ReplyKind::Attributes => {
            let (r, _) = GetWindowAttributesReply::try_parse(buf).ok()?;
            let map_state = match r.map_state {
                xproto::MapState::VIEWABLE => MapState::Viewable,
                xproto::MapState::UNVIEWABLE => MapState::Unviewable,
                _ => MapState::Unmapped,
            };
            Some(Reply::Attributes(WindowAttrs {
                override_redirect: r.override_redirect,
                map_state,
                visual: r.visual,
                input_only: r.class == xproto::WindowClass::INPUT_ONLY,
            }))
        }
        ReplyKind::Geometry => {
            let (r, _) = GetGeometryReply::try_parse(buf).ok()?;
            Some(Reply::Geometry(GeometryReply {
                x: r.x,
                y: r.y,
                width: r.width,
                height: r.height,
                border_width: r.border_width,
                depth: r.depth,
            }))
        }
        ReplyKind::Property => {
            let (r, _) = GetPropertyReply::try_parse(buf).ok()?;
            Some(Reply::Property(PropertyReply { type_: r.type_, format: r.format, value: r.value }))
        }
    }
}

fn create_aux(a: &WindowAttributes) -> CreateWindowAux {
    CreateWindowAux::new()
        .background_pixel(a.background_pixel)
        .border_pixel(a.border_pixel)
        .override_redirect(a.override_redirect.map(u32::from))
        .event_mask(a.event_mask.map(EventMask::from))
        .colormap(a.colormap)
        .cursor(a.cursor)
}

fn change_aux(a: &WindowAttributes) -> ChangeWindowAttributesAux {
    ChangeWindowAttributesAux::new()
        .background_pixel(a.background_pixel)
        .border_pixel(a.border_pixel)
        .override_redirect(a.override_redirect.map(u32::from))
        .event_mask(a.event_mask.map(EventMask::from))
        .colormap(a.colormap)
        .cursor(a.cursor)
}

fn rectangle(g: &Geometry) -> Rectangle {
    Rectangle { x: g.x as i16, y: g.y as i16, width: g.width as u16, height: g.height as u16 }
}

impl XConn for X11rbConn {
    fn root(&self) -> Window {
        self.root
    }

    fn screen_size(&self) -> (u16, u16) {
        (self.width, self.height)
    }

    fn root_visual(&self) -> u32 {
        self.root_visual
    }

    fn root_depth(&self) -> u8 {
        self.root_depth
    }

    fn raw_fd(&self) -> RawFd {
        self.conn.stream().as_raw_fd()
    }

    fn generate_id(&self) -> XResult<u32> {
        Ok(self.conn.generate_id()?)
    }

    fn flush(&self) -> XResult<()> {
        Ok(self.conn.flush()?)
    }

    fn has_damage(&self) -> bool {
        self.damage
    }

    fn poll_queued_event(&self) -> XResult<Option<XEvent>> {
        self.next_event()
    }

    fn poll_event(&self) -> XResult<Option<XEvent>> {
        self.next_event()
    }

    fn get_window_attributes(&self, window: Window) -> XResult<Seq> {
        Ok(into_sequence_number(self.conn.get_window_attributes(window)?))
    }

    fn get_geometry(&self, window: Window) -> XResult<Seq> {
        Ok(into_sequence_number(self.conn.get_geometry(window)?))
    }

    fn get_property(&self, window: Window, property: Atom, type_: Atom, long_length: u32) -> XResult<Seq> {
        Ok(into_sequence_number(self.conn.get_property(false, window, property, type_, 0, long_length)?))
    }

    fn poll_reply(&self, seq: Seq, kind: ReplyKind) -> ReplyPoll {
        if seq > self.last_seen.get() {
            self.request_marker(seq);
            return ReplyPoll::Pending;
        }
        match self.conn.wait_for_reply_or_raw_error(seq) {
            Ok(ReplyOrError::Reply(buf)) => ReplyPoll::Ready { reply: parse_reply(kind, &buf), error: None },
            Ok(ReplyOrError::Error(buf)) => {
                let error = self.conn.parse_error(&buf).ok().map(|e| x_error(&e));
                ReplyPoll::Ready { reply: None, error }
            }
            Err(e) => {
                warn!("Reply {} lost: {}", seq, e);
                ReplyPoll::Ready { reply: None, error: None }
            }
        }
    }

    fn discard_reply(&self, seq: Seq) {
        self.conn.discard_reply(seq, RequestKind::HasResponse, DiscardMode::DiscardReplyAndError);
    }

    fn intern_atoms(&self, names: &[&str]) -> XResult<Vec<Atom>> {
        let cookies = names
            .iter()
            .map(|name| self.conn.intern_atom(false, name.as_bytes()))
            .collect::<Result<Vec<_>, _>>()?;
        cookies.into_iter().map(|c| Ok(c.reply()?.atom)).collect()
    }

    fn get_selection_owner(&self, selection: Atom) -> XResult<Window> {
        Ok(self.conn.get_selection_owner(selection)?.reply()?.owner)
    }

    fn get_property_sync(
        &self,
        window: Window,
        property: Atom,
        type_: Atom,
        long_length: u32,
    ) -> XResult<Option<PropertyReply>> {
        let r = self.conn.get_property(false, window, property, type_, 0, long_length)?.reply()?;
        if r.type_ == x11rb::NONE {
            return Ok(None);
        }
        Ok(Some(PropertyReply { type_: r.type_, format: r.format, value: r.value }))
    }

    fn query_tree(&self, window: Window) -> XResult<Vec<Window>> {
        Ok(self.conn.query_tree(window)?.reply()?.children)
    }

    fn keyboard_mapping(&self) -> XResult<KeyboardMapping> {
        let setup = self.conn.setup();
        let (min, max) = (setup.min_keycode, setup.max_keycode);
        let r = self.conn.get_keyboard_mapping(min, max - min + 1)?.reply()?;
        Ok(KeyboardMapping { min_keycode: min, keysyms_per_keycode: r.keysyms_per_keycode, keysyms: r.keysyms })
    }

    fn select_input_checked(&self, window: Window, event_mask: u32) -> XResult<()> {
        let aux = ChangeWindowAttributesAux::new().event_mask(EventMask::from(event_mask));
        Ok(self.conn.change_window_attributes(window, &aux)?.check()?)
    }

    fn create_font_cursor(&self, shape: u16) -> XResult<u32> {
        let font = self.conn.generate_id()?;
        self.conn.open_font(font, b"cursor")?;
        let cursor = self.conn.generate_id()?;
        self.conn.create_glyph_cursor(cursor, font, font, shape, shape + 1, 0, 0, 0, 0xffff, 0xffff, 0xffff)?;
        self.conn.close_font(font)?;
        Ok(cursor)
    }

    fn get_input_focus(&self) -> XResult<Window> {
        Ok(self.conn.get_input_focus()?.reply()?.focus)
    }

    fn create_window(&self, req: &CreateWindow) -> XResult<()> {
        let class = match req.class {
            WindowClass::InputOutput => xproto::WindowClass::INPUT_OUTPUT,
            WindowClass::InputOnly => xproto::WindowClass::INPUT_ONLY,
        };
        self.conn.create_window(
            req.depth,
            req.wid,
            req.parent,
            req.geometry.x as i16,
            req.geometry.y as i16,
            req.geometry.width.max(1) as u16,
            req.geometry.height.max(1) as u16,
            req.border_width,
            class,
            req.visual,
            &create_aux(&req.attributes),
        )?;
        Ok(())
    }

    fn change_window_attributes(&self, window: Window, attrs: &WindowAttributes) -> XResult<()> {
        self.conn.change_window_attributes(window, &change_aux(attrs))?;
        Ok(())
    }

    fn destroy_window(&self, window: Window) -> XResult<()> {
        self.conn.destroy_window(window)?;
        Ok(())
    }

    fn map_window(&self, window: Window) -> XResult<()> {
        self.conn.map_window(window)?;
        Ok(())
    }

    fn unmap_window(&self, window: Window) -> XResult<()> {
        self.conn.unmap_window(window)?;
        Ok(())
    }

    fn reparent_window(&self, window: Window, parent: Window, x: i16, y: i16) -> XResult<()> {
        self.conn.reparent_window(window, parent, x, y)?;
        Ok(())
    }

    fn configure_window(&self, window: Window, changes: &WindowChanges) -> XResult<()> {
        let stack_mode = changes.stack_mode.map(|mode| match mode {
            StackMode::Above => xproto::StackMode::ABOVE,
            StackMode::Below => xproto::StackMode::BELOW,
        });
        let aux = ConfigureWindowAux::new()
            .x(changes.x)
            .y(changes.y)
            .width(changes.width.map(|w| w.max(1)))
            .height(changes.height.map(|h| h.max(1)))
            .border_width(changes.border_width)
            .sibling(changes.sibling)
            .stack_mode(stack_mode);
        self.conn.configure_window(window, &aux)?;
        Ok(())
    }

    fn change_save_set(&self, window: Window, insert: bool) -> XResult<()> {
        let mode = if insert { SetMode::INSERT } else { SetMode::DELETE };
        self.conn.change_save_set(mode, window)?;
        Ok(())
    }

    fn kill_client(&self, window: Window) -> XResult<()> {
        self.conn.kill_client(window)?;
        Ok(())
    }

    fn change_property32(&self, window: Window, property: Atom, type_: Atom, data: &[u32]) -> XResult<()> {
        self.conn.change_property32(PropMode::REPLACE, window, property, type_, data)?;
        Ok(())
    }

    fn change_property8(&self, window: Window, property: Atom, type_: Atom, data: &[u8]) -> XResult<()> {
        self.conn.change_property8(PropMode::REPLACE, window, property, type_, data)?;
        Ok(())
    }

    fn delete_property(&self, window: Window, property: Atom) -> XResult<()> {
        self.conn.delete_property(window, property)?;
        Ok(())
    }

    fn send_client_message(&self, window: Window, message_type: Atom, data: [u32; 5]) -> XResult<()> {
        let event = ClientMessageEvent::new(32, window, message_type, data);
        self.conn.send_event(false, window, EventMask::NO_EVENT, event)?;
        Ok(())
    }

    fn send_configure_notify(&self, window: Window, geometry: Geometry) -> XResult<()> {
        let event = ConfigureNotifyEvent {
            response_type: xproto::CONFIGURE_NOTIFY_EVENT,
            sequence: 0,
            event: window,
            window,
            above_sibling: x11rb::NONE,
            x: geometry.x as i16,
            y: geometry.y as i16,
            width: geometry.width as u16,
            height: geometry.height as u16,
            border_width: 0,
            override_redirect: false,
        };
        self.conn.send_event(false, window, EventMask::STRUCTURE_NOTIFY, event)?;
        Ok(())
    }

    fn set_selection_owner(&self, owner: Window, selection: Atom, time: u32) -> XResult<()> {
        self.conn.set_selection_owner(owner, selection, time)?;
        Ok(())
    }

    fn set_input_focus(&self, window: Window, time: u32) -> XResult<()> {
        self.conn.set_input_focus(InputFocus::POINTER_ROOT, window, time)?;
        Ok(())
    }

    fn grab_key(&self, window: Window, modifiers: u16, keycode: u8) -> XResult<()> {
        self.conn.grab_key(true, window, ModMask::from(modifiers), keycode, GrabMode::ASYNC, GrabMode::ASYNC)?;
        Ok(())
    }

    fn ungrab_all_keys(&self, window: Window) -> XResult<()> {
        self.conn.ungrab_key(Grab::ANY, window, ModMask::ANY)?;
        Ok(())
    }

    fn grab_button(&self, window: Window, button: u8, modifiers: u16) -> XResult<()> {
        self.conn.grab_button(
            false,
            window,
            EventMask::BUTTON_PRESS | EventMask::BUTTON_RELEASE,
            GrabMode::SYNC,
            GrabMode::ASYNC,
            x11rb::NONE,
            x11rb::NONE,
            ButtonIndex::from(button),
            ModMask::from(modifiers),
        )?;
        Ok(())
    }

    fn allow_events(&self, replay: bool, time: u32) -> XResult<()> {
        let mode = if replay { Allow::REPLAY_POINTER } else { Allow::ASYNC_POINTER };
        self.conn.allow_events(mode, time)?;
        Ok(())
    }

    fn grab_pointer(&self, window: Window, event_mask: u32, cursor: u32, time: u32) -> XResult<()> {
        self.conn.grab_pointer(
            false,
            window,
            EventMask::from(event_mask),
            GrabMode::ASYNC,
            GrabMode::ASYNC,
            x11rb::NONE,
            cursor,
            time,
        )?;
        Ok(())
    }

    fn ungrab_pointer(&self, time: u32) -> XResult<()> {
        self.conn.ungrab_pointer(time)?;
        Ok(())
    }

    fn grab_keyboard(&self, window: Window, time: u32) -> XResult<()> {
        self.conn.grab_keyboard(false, window, time, GrabMode::ASYNC, GrabMode::ASYNC)?;
        Ok(())
    }

    fn ungrab_keyboard(&self, time: u32) -> XResult<()> {
        self.conn.ungrab_keyboard(time)?;
        Ok(())
    }

    fn create_colormap(&self, id: u32, window: Window, visual: u32) -> XResult<()> {
        self.conn.create_colormap(ColormapAlloc::NONE, id, window, visual)?;
        Ok(())
    }

    fn free_colormap(&self, id: u32) -> XResult<()> {
        self.conn.free_colormap(id)?;
        Ok(())
    }

    fn free_cursor(&self, id: u32) -> XResult<()> {
        self.conn.free_cursor(id)?;
        Ok(())
    }

    fn damage_create(&self, id: u32, drawable: Window) -> XResult<()> {
        self.conn.damage_create(id, drawable, damage::ReportLevel::NON_EMPTY)?;
        Ok(())
    }

    fn damage_destroy(&self, id: u32) -> XResult<()> {
        self.conn.damage_destroy(id)?;
        Ok(())
    }

    fn damage_subtract(&self, id: u32) -> XResult<()> {
        self.conn.damage_subtract(id, x11rb::NONE, x11rb::NONE)?;
        Ok(())
    }

    fn open_font(&self, id: u32, name: &str) -> XResult<()> {
        self.conn.open_font(id, name.as_bytes())?;
        Ok(())
    }

    fn close_font(&self, id: u32) -> XResult<()> {
        self.conn.close_font(id)?;
        Ok(())
    }

    fn create_gc(&self, id: u32, drawable: Window, foreground: u32, font: Option<u32>) -> XResult<()> {
        let aux = CreateGCAux::new().foreground(foreground).graphics_exposures(0).font(font);
        self.conn.create_gc(id, drawable, &aux)?;
        Ok(())
    }

    fn free_gc(&self, id: u32) -> XResult<()> {
        self.conn.free_gc(id)?;
        Ok(())
    }

    fn set_foreground(&self, gc: u32, foreground: u32) -> XResult<()> {
        self.conn.change_gc(gc, &ChangeGCAux::new().foreground(foreground))?;
        Ok(())
    }

    fn set_clip(&self, gc: u32, clip: Option<Geometry>) -> XResult<()> {
        match clip {
            Some(g) => {
                self.conn.set_clip_rectangles(ClipOrdering::UNSORTED, gc, 0, 0, &[rectangle(&g)])?;
            }
            None => {
                self.conn.change_gc(gc, &ChangeGCAux::new().clip_mask(x11rb::NONE))?;
            }
        }
        Ok(())
    }

    fn fill_rectangles(&self, drawable: Window, gc: u32, rects: &[Geometry]) -> XResult<()> {
        let rects: Vec<Rectangle> = rects.iter().map(rectangle).collect();
        self.conn.poly_fill_rectangle(drawable, gc, &rects)?;
        Ok(())
    }

    fn draw_text(&self, drawable: Window, gc: u32, x: i16, y: i16, text: &[u8]) -> XResult<()> {
        let text = &text[..text.len().min(255)];
        self.conn.image_text8(drawable, gc, x, y, text)?;
        Ok(())
    }
}

/// Take the sequence number out of a cookie without discarding its reply
/// (equivalent to x11rb's crate-private `Cookie::into_sequence_number`).
fn into_sequence_number<C: RequestConnection + ?Sized, R: x11rb::x11_utils::TryParse>(cookie: x11rb::cookie::Cookie<'_, C, R>) -> Seq {
    let seq = cookie.sequence_number();
    std::mem::forget(cookie);
    seq
}
