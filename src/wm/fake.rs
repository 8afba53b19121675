//! In-memory X server stand-in for unit tests.
//!
//! Tracks a window tree, properties and selection owners, answers round trips
//! from that state, and records every request so tests can assert on what
//! the manager sent.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::os::unix::io::RawFd;

use crate::shared::Geometry;
use crate::wm::xconn::*;

const BAD_WINDOW: u8 = 3;

/// A request the manager issued, as recorded by [`FakeConn`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    CreateWindow(CreateWindow),
    ChangeAttributes(Window, WindowAttributes),
    SelectInput(Window, u32),
    Destroy(Window),
    Map(Window),
    Unmap(Window),
    Reparent { window: Window, parent: Window, x: i16, y: i16 },
    Configure(Window, WindowChanges),
    SaveSet(Window, bool),
    KillClient(Window),
    ChangeProperty { window: Window, property: Atom, type_: Atom, format: u8, data: Vec<u8> },
    DeleteProperty(Window, Atom),
    ClientMessage { window: Window, message_type: Atom, data: [u32; 5] },
    SyntheticConfigure(Window, Geometry),
    SetSelectionOwner(Window, Atom),
    SetInputFocus(Window),
    GrabKey { window: Window, modifiers: u16, keycode: u8 },
    UngrabAllKeys(Window),
    GrabButton { window: Window, button: u8, modifiers: u16 },
    AllowEvents { replay: bool },
    GrabPointer { window: Window, cursor: u32 },
    UngrabPointer,
    GrabKeyboard(Window),
    UngrabKeyboard,
    CreateColormap(u32, u32),
    FreeColormap(u32),
    FreeCursor(u32),
    DamageCreate(u32, Window),
    DamageDestroy(u32),
    DamageSubtract(u32),
    OpenFont(u32),
    CloseFont(u32),
    CreateGc(u32),
    FreeGc(u32),
    SetForeground(u32, u32),
    SetClip(u32, Option<Geometry>),
    FillRectangles(Window, Vec<Geometry>),
    DrawText(Window, Vec<u8>),
}

#[derive(Debug, Clone)]
struct FakeWindow {
    parent: Window,
    geometry: Geometry,
    border_width: u16,
    mapped: bool,
    override_redirect: bool,
    input_only: bool,
}

pub struct FakeConn {
    root: Window,
    next_id: Cell<u32>,
    next_seq: Cell<Seq>,
    hold: Cell<bool>,
    held: RefCell<HashSet<Seq>>,
    replies: RefCell<HashMap<Seq, (Option<Reply>, Option<XError>)>>,
    events: RefCell<VecDeque<XEvent>>,
    windows: RefCell<BTreeMap<Window, FakeWindow>>,
    properties: RefCell<HashMap<(Window, Atom), PropertyReply>>,
    atoms: RefCell<HashMap<String, Atom>>,
    owners: RefCell<HashMap<Atom, Window>>,
    requests: RefCell<Vec<Request>>,
    focus: Cell<Window>,
    failing_property: Cell<Atom>,
    keymap: KeyboardMapping,
}

/// Keysyms laid out from keycode 8: a-z, 0-9, then a few named keys.
pub fn fake_keymap() -> KeyboardMapping {
    let mut keysyms: Vec<u32> = (b'a'..=b'z').map(u32::from).collect();
    keysyms.extend((b'0'..=b'9').map(u32::from));
    keysyms.extend([
        0xff0d, // Return
        0xff09, // Tab
        0xffc1, // F4
        0xff1b, // Escape
        0xff51, // Left
        0xff52, // Up
        0xff53, // Right
        0xff54, // Down
        0xff50, // Home
        0x0020, // space
    ]);
    KeyboardMapping { min_keycode: 8, keysyms_per_keycode: 1, keysyms }
}

impl FakeConn {
    pub const ROOT: Window = 1;

    pub fn new() -> Self {
        let mut windows = BTreeMap::new();
        windows.insert(
            Self::ROOT,
            FakeWindow {
                parent: NONE,
                geometry: Geometry::new(0, 0, 1920, 1080),
                border_width: 0,
                mapped: true,
                override_redirect: false,
                input_only: false,
            },
        );
        Self {
            root: Self::ROOT,
            next_id: Cell::new(0x0020_0000),
            next_seq: Cell::new(1),
            hold: Cell::new(false),
            held: RefCell::new(HashSet::new()),
            replies: RefCell::new(HashMap::new()),
            events: RefCell::new(VecDeque::new()),
            windows: RefCell::new(windows),
            properties: RefCell::new(HashMap::new()),
            atoms: RefCell::new(HashMap::new()),
            owners: RefCell::new(HashMap::new()),
            requests: RefCell::new(Vec::new()),
            focus: Cell::new(NONE),
            failing_property: Cell::new(NONE),
            keymap: fake_keymap(),
        }
    }

    //* Test controls

    /// Create a top-level client window as another X client would.
    pub fn add_window(&self, geometry: Geometry, mapped: bool, override_redirect: bool) -> Window {
        let id = self.alloc_id();
        self.windows.borrow_mut().insert(
            id,
            FakeWindow { parent: self.root, geometry, border_width: 1, mapped, override_redirect, input_only: false },
        );
        id
    }

    /// Remove a window without telling the manager.
    pub fn remove_window(&self, window: Window) {
        self.windows.borrow_mut().remove(&window);
        self.properties.borrow_mut().retain(|(w, _), _| *w != window);
    }

    pub fn set_property(&self, window: Window, property: Atom, reply: PropertyReply) {
        self.properties.borrow_mut().insert((window, property), reply);
    }

    pub fn property(&self, window: Window, property: Atom) -> Option<PropertyReply> {
        self.properties.borrow().get(&(window, property)).cloned()
    }

    pub fn property32(&self, window: Window, property: Atom) -> Vec<u32> {
        self.property(window, property).map(|p| p.value32()).unwrap_or_default()
    }

    /// Make every later write of `property` fail.
    pub fn fail_property_writes(&self, property: Atom) {
        self.failing_property.set(property);
    }

    pub fn push_event(&self, event: XEvent) {
        self.events.borrow_mut().push_back(event);
    }

    pub fn pending_events(&self) -> usize {
        self.events.borrow().len()
    }

    /// While set, new round trips stay pending until released.
    pub fn set_hold_replies(&self, hold: bool) {
        self.hold.set(hold);
    }

    pub fn release_replies(&self) {
        self.held.borrow_mut().clear();
    }

    pub fn set_selection_owner_external(&self, selection: Atom, owner: Window) {
        self.owners.borrow_mut().insert(selection, owner);
    }

    pub fn atom(&self, name: &str) -> Atom {
        self.intern(name)
    }

    pub fn take_requests(&self) -> Vec<Request> {
        std::mem::take(&mut *self.requests.borrow_mut())
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.borrow().clone()
    }

    pub fn is_mapped(&self, window: Window) -> bool {
        self.windows.borrow().get(&window).is_some_and(|w| w.mapped)
    }

    pub fn parent_of(&self, window: Window) -> Option<Window> {
        self.windows.borrow().get(&window).map(|w| w.parent)
    }

    pub fn window_geometry(&self, window: Window) -> Option<Geometry> {
        self.windows.borrow().get(&window).map(|w| w.geometry)
    }

    pub fn exists(&self, window: Window) -> bool {
        self.windows.borrow().contains_key(&window)
    }

    pub fn focused(&self) -> Window {
        self.focus.get()
    }

    //* Internals

    fn alloc_id(&self) -> u32 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    fn intern(&self, name: &str) -> Atom {
        let mut atoms = self.atoms.borrow_mut();
        let next = 100 + atoms.len() as Atom;
        *atoms.entry(name.to_string()).or_insert(next)
    }

    fn record(&self, request: Request) {
        self.requests.borrow_mut().push(request);
    }

    fn bad_window(&self, window: Window, sequence: Seq) -> XError {
        XError { error_code: BAD_WINDOW, major_opcode: 0, minor_opcode: 0, bad_value: window, sequence }
    }

    fn round_trip(&self, answer: impl FnOnce(Seq) -> (Option<Reply>, Option<XError>)) -> Seq {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        let result = answer(seq);
        self.replies.borrow_mut().insert(seq, result);
        if self.hold.get() {
            self.held.borrow_mut().insert(seq);
        }
        seq
    }

    fn void_request(&self) {
        self.next_seq.set(self.next_seq.get() + 1);
    }
}

impl Default for FakeConn {
    fn default() -> Self {
        Self::new()
    }
}

impl XConn for FakeConn {
    fn root(&self) -> Window {
        self.root
    }

    fn screen_size(&self) -> (u16, u16) {
        (1920, 1080)
    }

    fn root_visual(&self) -> u32 {
        0x21
    }

    fn root_depth(&self) -> u8 {
        24
    }

    fn raw_fd(&self) -> RawFd {
        -1
    }

    fn generate_id(&self) -> XResult<u32> {
        Ok(self.alloc_id())
    }

    fn flush(&self) -> XResult<()> {
        Ok(())
    }

    fn has_damage(&self) -> bool {
        true
    }

    fn poll_queued_event(&self) -> XResult<Option<XEvent>> {
        Ok(self.events.borrow_mut().pop_front())
    }

    fn poll_event(&self) -> XResult<Option<XEvent>> {
        Ok(self.events.borrow_mut().pop_front())
    }

    fn get_window_attributes(&self, window: Window) -> XResult<Seq> {
        Ok(self.round_trip(|seq| match self.windows.borrow().get(&window) {
            Some(w) => (
                Some(Reply::Attributes(WindowAttrs {
                    override_redirect: w.override_redirect,
                    map_state: if w.mapped { MapState::Viewable } else { MapState::Unmapped },
                    visual: 0x21,
                    input_only: w.input_only,
                })),
                None,
            ),
            None => (None, Some(self.bad_window(window, seq))),
        }))
    }

    fn get_geometry(&self, window: Window) -> XResult<Seq> {
        Ok(self.round_trip(|seq| match self.windows.borrow().get(&window) {
            Some(w) => (
                Some(Reply::Geometry(GeometryReply {
                    x: w.geometry.x as i16,
                    y: w.geometry.y as i16,
                    width: w.geometry.width as u16,
                    height: w.geometry.height as u16,
                    border_width: w.border_width,
                    depth: 24,
                })),
                None,
            ),
            None => (None, Some(self.bad_window(window, seq))),
        }))
    }

    fn get_property(&self, window: Window, property: Atom, _type: Atom, long_length: u32) -> XResult<Seq> {
        Ok(self.round_trip(|seq| {
            if !self.windows.borrow().contains_key(&window) {
                return (None, Some(self.bad_window(window, seq)));
            }
            let mut reply = self.property(window, property).unwrap_or_default();
            let limit = long_length as usize * 4;
            reply.value.truncate(limit);
            (Some(Reply::Property(reply)), None)
        }))
    }

    fn poll_reply(&self, seq: Seq, _kind: ReplyKind) -> ReplyPoll {
        if self.held.borrow().contains(&seq) {
            return ReplyPoll::Pending;
        }
        match self.replies.borrow_mut().remove(&seq) {
            Some((reply, error)) => ReplyPoll::Ready { reply, error },
            None => ReplyPoll::Ready { reply: None, error: None },
        }
    }

    fn discard_reply(&self, seq: Seq) {
        self.held.borrow_mut().remove(&seq);
        self.replies.borrow_mut().remove(&seq);
    }

    fn intern_atoms(&self, names: &[&str]) -> XResult<Vec<Atom>> {
        Ok(names.iter().map(|name| self.intern(name)).collect())
    }

    fn get_selection_owner(&self, selection: Atom) -> XResult<Window> {
        Ok(self.owners.borrow().get(&selection).copied().unwrap_or(NONE))
    }

    fn get_property_sync(
        &self,
        window: Window,
        property: Atom,
        _type: Atom,
        _long_length: u32,
    ) -> XResult<Option<PropertyReply>> {
        Ok(self.property(window, property))
    }

    fn query_tree(&self, window: Window) -> XResult<Vec<Window>> {
        Ok(self.windows.borrow().iter().filter(|(_, w)| w.parent == window).map(|(id, _)| *id).collect())
    }

    fn keyboard_mapping(&self) -> XResult<KeyboardMapping> {
        Ok(self.keymap.clone())
    }

    fn select_input_checked(&self, window: Window, event_mask: u32) -> XResult<()> {
        self.record(Request::SelectInput(window, event_mask));
        Ok(())
    }

    fn create_font_cursor(&self, _shape: u16) -> XResult<u32> {
        Ok(self.alloc_id())
    }

    fn get_input_focus(&self) -> XResult<Window> {
        Ok(self.focus.get())
    }

    fn create_window(&self, req: &CreateWindow) -> XResult<()> {
        self.void_request();
        self.windows.borrow_mut().insert(
            req.wid,
            FakeWindow {
                parent: req.parent,
                geometry: req.geometry,
                border_width: req.border_width,
                mapped: false,
                override_redirect: req.attributes.override_redirect.unwrap_or(false),
                input_only: req.class == WindowClass::InputOnly,
            },
        );
        self.record(Request::CreateWindow(req.clone()));
        Ok(())
    }

    fn change_window_attributes(&self, window: Window, attrs: &WindowAttributes) -> XResult<()> {
        self.void_request();
        self.record(Request::ChangeAttributes(window, attrs.clone()));
        Ok(())
    }

    fn destroy_window(&self, window: Window) -> XResult<()> {
        self.void_request();
        let mut windows = self.windows.borrow_mut();
        windows.remove(&window);
        windows.retain(|_, w| w.parent != window);
        self.record(Request::Destroy(window));
        Ok(())
    }

    fn map_window(&self, window: Window) -> XResult<()> {
        self.void_request();
        if let Some(w) = self.windows.borrow_mut().get_mut(&window) {
            w.mapped = true;
        }
        self.record(Request::Map(window));
        Ok(())
    }

    fn unmap_window(&self, window: Window) -> XResult<()> {
        self.void_request();
        let parent = match self.windows.borrow_mut().get_mut(&window) {
            Some(w) if w.mapped => {
                w.mapped = false;
                Some(w.parent)
            }
            _ => None,
        };
        if let Some(parent) = parent {
            self.push_event(XEvent::UnmapNotify { event: parent, window });
        }
        self.record(Request::Unmap(window));
        Ok(())
    }

    fn reparent_window(&self, window: Window, parent: Window, x: i16, y: i16) -> XResult<()> {
        self.void_request();
        let old_parent = match self.windows.borrow_mut().get_mut(&window) {
            Some(w) => {
                let old = w.mapped.then_some(w.parent);
                w.parent = parent;
                w.geometry.x = x as i32;
                w.geometry.y = y as i32;
                old
            }
            None => None,
        };
        // Reparenting a mapped window unmaps it first.
        if let Some(old) = old_parent {
            self.push_event(XEvent::UnmapNotify { event: old, window });
        }
        self.record(Request::Reparent { window, parent, x, y });
        Ok(())
    }

    fn configure_window(&self, window: Window, changes: &WindowChanges) -> XResult<()> {
        self.void_request();
        if let Some(w) = self.windows.borrow_mut().get_mut(&window) {
            if let Some(x) = changes.x {
                w.geometry.x = x;
            }
            if let Some(y) = changes.y {
                w.geometry.y = y;
            }
            if let Some(width) = changes.width {
                w.geometry.width = width;
            }
            if let Some(height) = changes.height {
                w.geometry.height = height;
            }
            if let Some(bw) = changes.border_width {
                w.border_width = bw as u16;
            }
        }
        self.record(Request::Configure(window, *changes));
        Ok(())
    }

    fn change_save_set(&self, window: Window, insert: bool) -> XResult<()> {
        self.void_request();
        self.record(Request::SaveSet(window, insert));
        Ok(())
    }

    fn kill_client(&self, window: Window) -> XResult<()> {
        self.void_request();
        self.record(Request::KillClient(window));
        Ok(())
    }

    fn change_property32(&self, window: Window, property: Atom, type_: Atom, data: &[u32]) -> XResult<()> {
        self.void_request();
        if property != NONE && property == self.failing_property.get() {
            return Err(ConnError::Request(format!("ChangeProperty {} on {:#x}", property, window)));
        }
        let reply = PropertyReply::from_u32(type_, data);
        self.record(Request::ChangeProperty { window, property, type_, format: 32, data: reply.value.clone() });
        self.properties.borrow_mut().insert((window, property), reply);
        Ok(())
    }

    fn change_property8(&self, window: Window, property: Atom, type_: Atom, data: &[u8]) -> XResult<()> {
        self.void_request();
        self.record(Request::ChangeProperty { window, property, type_, format: 8, data: data.to_vec() });
        self.properties.borrow_mut().insert((window, property), PropertyReply::from_bytes(type_, data));
        Ok(())
    }

    fn delete_property(&self, window: Window, property: Atom) -> XResult<()> {
        self.void_request();
        self.properties.borrow_mut().remove(&(window, property));
        self.record(Request::DeleteProperty(window, property));
        Ok(())
    }

    fn send_client_message(&self, window: Window, message_type: Atom, data: [u32; 5]) -> XResult<()> {
        self.void_request();
        self.record(Request::ClientMessage { window, message_type, data });
        Ok(())
    }

    fn send_configure_notify(&self, window: Window, geometry: Geometry) -> XResult<()> {
        self.void_request();
        self.record(Request::SyntheticConfigure(window, geometry));
        Ok(())
    }

    fn set_selection_owner(&self, owner: Window, selection: Atom, _time: u32) -> XResult<()> {
        self.void_request();
        self.owners.borrow_mut().insert(selection, owner);
        self.record(Request::SetSelectionOwner(owner, selection));
        Ok(())
    }

    fn set_input_focus(&self, window: Window, _time: u32) -> XResult<()> {
        self.void_request();
        self.focus.set(window);
        self.record(Request::SetInputFocus(window));
        Ok(())
    }

    fn grab_key(&self, window: Window, modifiers: u16, keycode: u8) -> XResult<()> {
        self.void_request();
        self.record(Request::GrabKey { window, modifiers, keycode });
        Ok(())
    }

    fn ungrab_all_keys(&self, window: Window) -> XResult<()> {
        self.void_request();
        self.record(Request::UngrabAllKeys(window));
        Ok(())
    }

    fn grab_button(&self, window: Window, button: u8, modifiers: u16) -> XResult<()> {
        self.void_request();
        self.record(Request::GrabButton { window, button, modifiers });
        Ok(())
    }

    fn allow_events(&self, replay: bool, _time: u32) -> XResult<()> {
        self.void_request();
        self.record(Request::AllowEvents { replay });
        Ok(())
    }

    fn grab_pointer(&self, window: Window, _event_mask: u32, cursor: u32, _time: u32) -> XResult<()> {
        self.void_request();
        self.record(Request::GrabPointer { window, cursor });
        Ok(())
    }

    fn ungrab_pointer(&self, _time: u32) -> XResult<()> {
        self.void_request();
        self.record(Request::UngrabPointer);
        Ok(())
    }

    fn grab_keyboard(&self, window: Window, _time: u32) -> XResult<()> {
        self.void_request();
        self.record(Request::GrabKeyboard(window));
        Ok(())
    }

    fn ungrab_keyboard(&self, _time: u32) -> XResult<()> {
        self.void_request();
        self.record(Request::UngrabKeyboard);
        Ok(())
    }

    fn create_colormap(&self, id: u32, _window: Window, visual: u32) -> XResult<()> {
        self.void_request();
        self.record(Request::CreateColormap(id, visual));
        Ok(())
    }

    fn free_colormap(&self, id: u32) -> XResult<()> {
        self.void_request();
        self.record(Request::FreeColormap(id));
        Ok(())
    }

    fn free_cursor(&self, id: u32) -> XResult<()> {
        self.void_request();
        self.record(Request::FreeCursor(id));
        Ok(())
    }

    fn damage_create(&self, id: u32, drawable: Window) -> XResult<()> {
        self.void_request();
        self.record(Request::DamageCreate(id, drawable));
        Ok(())
    }

    fn damage_destroy(&self, id: u32) -> XResult<()> {
        self.void_request();
        self.record(Request::DamageDestroy(id));
        Ok(())
    }

    fn damage_subtract(&self, id: u32) -> XResult<()> {
        self.void_request();
        self.record(Request::DamageSubtract(id));
        Ok(())
    }

    fn open_font(&self, id: u32, _name: &str) -> XResult<()> {
        self.void_request();
        self.record(Request::OpenFont(id));
        Ok(())
    }

    fn close_font(&self, id: u32) -> XResult<()> {
        self.void_request();
        self.record(Request::CloseFont(id));
        Ok(())
    }

    fn create_gc(&self, id: u32, _drawable: Window, _foreground: u32, _font: Option<u32>) -> XResult<()> {
        self.void_request();
        self.record(Request::CreateGc(id));
        Ok(())
    }

    fn free_gc(&self, id: u32) -> XResult<()> {
        self.void_request();
        self.record(Request::FreeGc(id));
        Ok(())
    }

    fn set_foreground(&self, gc: u32, foreground: u32) -> XResult<()> {
        self.void_request();
        self.record(Request::SetForeground(gc, foreground));
        Ok(())
    }

    fn set_clip(&self, gc: u32, clip: Option<Geometry>) -> XResult<()> {
        self.void_request();
        self.record(Request::SetClip(gc, clip));
        Ok(())
    }

    fn fill_rectangles(&self, drawable: Window, _gc: u32, rects: &[Geometry]) -> XResult<()> {
        self.void_request();
        self.record(Request::FillRectangles(drawable, rects.to_vec()));
        Ok(())
    }

    fn draw_text(&self, drawable: Window, _gc: u32, _x: i16, _y: i16, text: &[u8]) -> XResult<()> {
        self.void_request();
        self.record(Request::DrawText(drawable, text.to_vec()));
        Ok(())
    }
}
