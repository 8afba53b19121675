//! The connection seam between the window manager and the X server.
//!
//! [`XConn`] is kept as thin as possible: each method maps onto one protocol
//! request and speaks in plain ids and crate-owned types, so the manager never
//! sees the backend library. Requests that produce a reply are issued
//! asynchronously and return the request sequence; the reply is later fetched
//! with [`XConn::poll_reply`], which never blocks.
//!
//! The production backend lives in [`crate::wm::x11rb_conn`]; unit tests use a
//! recording fake.

use std::os::unix::io::RawFd;

use thiserror::Error;

use crate::shared::Geometry;

pub type Window = u32;
pub type Atom = u32;
pub type Seq = u64;

pub const NONE: u32 = 0;
pub const CURRENT_TIME: u32 = 0;

/// Protocol error reported by the server for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("X error {error_code} (major {major_opcode}, minor {minor_opcode}) on value {bad_value:#x}, seq {sequence}")]
pub struct XError {
    pub error_code: u8,
    pub major_opcode: u8,
    pub minor_opcode: u16,
    pub bad_value: u32,
    pub sequence: Seq,
}

/// Connection-level failure.
#[derive(Debug, Error)]
pub enum ConnError {
    #[error("connection to the X server failed: {0}")]
    Connection(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error(transparent)]
    Protocol(#[from] XError),
}

pub type XResult<T> = Result<T, ConnError>;

// Event masks (core protocol values).
pub mod event_mask {
    pub const KEY_PRESS: u32 = 1 << 0;
    pub const BUTTON_PRESS: u32 = 1 << 2;
    pub const BUTTON_RELEASE: u32 = 1 << 3;
    pub const ENTER_WINDOW: u32 = 1 << 4;
    pub const LEAVE_WINDOW: u32 = 1 << 5;
    pub const POINTER_MOTION: u32 = 1 << 6;
    pub const EXPOSURE: u32 = 1 << 15;
    pub const STRUCTURE_NOTIFY: u32 = 1 << 17;
    pub const SUBSTRUCTURE_NOTIFY: u32 = 1 << 19;
    pub const SUBSTRUCTURE_REDIRECT: u32 = 1 << 20;
    pub const FOCUS_CHANGE: u32 = 1 << 21;
    pub const PROPERTY_CHANGE: u32 = 1 << 22;
}

// Modifier bits in key/button state.
pub mod modmask {
    pub const SHIFT: u16 = 1 << 0;
    pub const LOCK: u16 = 1 << 1;
    pub const CONTROL: u16 = 1 << 2;
    pub const MOD1: u16 = 1 << 3;
    pub const MOD2: u16 = 1 << 4;
    pub const MOD3: u16 = 1 << 5;
    pub const MOD4: u16 = 1 << 6;
    pub const MOD5: u16 = 1 << 7;
    pub const ANY: u16 = 1 << 15;
}

// Configure value-mask bits.
pub mod config_mask {
    pub const X: u16 = 1 << 0;
    pub const Y: u16 = 1 << 1;
    pub const WIDTH: u16 = 1 << 2;
    pub const HEIGHT: u16 = 1 << 3;
    pub const BORDER_WIDTH: u16 = 1 << 4;
    pub const SIBLING: u16 = 1 << 5;
    pub const STACK_MODE: u16 = 1 << 6;
}

/// Predefined atoms that never need interning.
pub mod predefined {
    use super::Atom;
    pub const ATOM: Atom = 4;
    pub const CARDINAL: Atom = 6;
    pub const STRING: Atom = 31;
    pub const WINDOW: Atom = 33;
    pub const WM_COMMAND: Atom = 34;
    pub const WM_HINTS: Atom = 35;
    pub const WM_CLIENT_MACHINE: Atom = 36;
    pub const WM_ICON_NAME: Atom = 37;
    pub const WM_NAME: Atom = 39;
    pub const WM_NORMAL_HINTS: Atom = 40;
    pub const WM_SIZE_HINTS: Atom = 41;
    pub const WM_CLASS: Atom = 67;
    pub const WM_TRANSIENT_FOR: Atom = 68;
    pub const ANY: Atom = 0;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackMode {
    Above,
    Below,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapState {
    Unmapped,
    Unviewable,
    Viewable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowClass {
    InputOutput,
    InputOnly,
}

/// Window attribute list for create/change requests. Unset fields are omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowAttributes {
    pub background_pixel: Option<u32>,
    pub border_pixel: Option<u32>,
    pub override_redirect: Option<bool>,
    pub event_mask: Option<u32>,
    pub colormap: Option<u32>,
    pub cursor: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateWindow {
    pub wid: Window,
    pub parent: Window,
    pub geometry: Geometry,
    pub border_width: u16,
    pub class: WindowClass,
    /// 0 copies the parent's depth/visual.
    pub depth: u8,
    pub visual: u32,
    pub attributes: WindowAttributes,
}

/// A ConfigureWindow request. Unset fields are omitted from the value mask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowChanges {
    pub x: Option<i32>,
    pub y: Option<i32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub border_width: Option<u32>,
    pub sibling: Option<Window>,
    pub stack_mode: Option<StackMode>,
}

impl WindowChanges {
    pub fn geometry(g: Geometry) -> Self {
        Self {
            x: Some(g.x),
            y: Some(g.y),
            width: Some(g.width),
            height: Some(g.height),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowAttrs {
    pub override_redirect: bool,
    pub map_state: MapState,
    pub visual: u32,
    pub input_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryReply {
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
    pub border_width: u16,
    pub depth: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PropertyReply {
    pub type_: Atom,
    pub format: u8,
    pub value: Vec<u8>,
}

impl PropertyReply {
    pub fn is_empty(&self) -> bool {
        self.type_ == NONE || self.value.is_empty()
    }

    /// The value read as native-endian 32-bit items; empty unless format is 32.
    pub fn value32(&self) -> Vec<u32> {
        if self.format != 32 {
            return Vec::new();
        }
        self.value
            .chunks_exact(4)
            .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    pub fn from_u32(type_: Atom, values: &[u32]) -> Self {
        Self {
            type_,
            format: 32,
            value: values.iter().flat_map(|v| v.to_ne_bytes()).collect(),
        }
    }

    pub fn from_bytes(type_: Atom, bytes: &[u8]) -> Self {
        Self { type_, format: 8, value: bytes.to_vec() }
    }
}

/// What the reply to a tracked request should be parsed as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Attributes,
    Geometry,
    Property,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Attributes(WindowAttrs),
    Geometry(GeometryReply),
    Property(PropertyReply),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyPoll {
    Pending,
    Ready { reply: Option<Reply>, error: Option<XError> },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyboardMapping {
    pub min_keycode: u8,
    pub keysyms_per_keycode: u8,
    pub keysyms: Vec<u32>,
}

impl KeyboardMapping {
    /// Every keycode whose first column produces `keysym`.
    pub fn keycodes_for(&self, keysym: u32) -> Vec<u8> {
        let per = self.keysyms_per_keycode.max(1) as usize;
        self.keysyms
            .chunks(per)
            .enumerate()
            .filter(|(_, syms)| syms.first() == Some(&keysym))
            .filter_map(|(i, _)| u8::try_from(self.min_keycode as usize + i).ok())
            .collect()
    }

    /// First-column keysym for `keycode`.
    pub fn keysym_for(&self, keycode: u8) -> u32 {
        let per = self.keysyms_per_keycode.max(1) as usize;
        if keycode < self.min_keycode {
            return 0;
        }
        let index = (keycode - self.min_keycode) as usize * per;
        self.keysyms.get(index).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigureRequest {
    pub window: Window,
    pub parent: Window,
    pub sibling: Window,
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
    pub border_width: u16,
    pub stack_mode: StackMode,
    pub value_mask: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerEvent {
    pub root: Window,
    pub event: Window,
    pub child: Window,
    pub root_x: i16,
    pub root_y: i16,
    pub event_x: i16,
    pub event_y: i16,
    pub state: u16,
    /// Button number for press/release, keycode for keys, 0 for motion.
    pub detail: u8,
    pub time: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XEvent {
    MapRequest { window: Window, parent: Window },
    UnmapNotify { event: Window, window: Window },
    DestroyNotify { event: Window, window: Window },
    ConfigureRequest(ConfigureRequest),
    ConfigureNotify { window: Window, geometry: Geometry, border_width: u16, override_redirect: bool },
    PropertyNotify { window: Window, atom: Atom, deleted: bool },
    ClientMessage { window: Window, message_type: Atom, format: u8, data: [u32; 5] },
    KeyPress(PointerEvent),
    ButtonPress(PointerEvent),
    ButtonRelease(PointerEvent),
    MotionNotify(PointerEvent),
    EnterNotify(PointerEvent),
    LeaveNotify(PointerEvent),
    Expose { window: Window, x: u16, y: u16, width: u16, height: u16, count: u16 },
    DamageNotify { damage: u32, drawable: Window, area: Geometry },
    Error(XError),
    Other(u8),
}

/// Event classes used to index ingest counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    MapRequest,
    UnmapNotify,
    DestroyNotify,
    ConfigureRequest,
    ConfigureNotify,
    PropertyNotify,
    ClientMessage,
    KeyPress,
    ButtonPress,
    ButtonRelease,
    MotionNotify,
    EnterNotify,
    LeaveNotify,
    Expose,
    Damage,
    Error,
    Other,
}

impl EventKind {
    pub const COUNT: usize = 17;

    pub const ALL: [EventKind; Self::COUNT] = [
        EventKind::MapRequest,
        EventKind::UnmapNotify,
        EventKind::DestroyNotify,
        EventKind::ConfigureRequest,
        EventKind::ConfigureNotify,
        EventKind::PropertyNotify,
        EventKind::ClientMessage,
        EventKind::KeyPress,
        EventKind::ButtonPress,
        EventKind::ButtonRelease,
        EventKind::MotionNotify,
        EventKind::EnterNotify,
        EventKind::LeaveNotify,
        EventKind::Expose,
        EventKind::Damage,
        EventKind::Error,
        EventKind::Other,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EventKind::MapRequest => "map_request",
            EventKind::UnmapNotify => "unmap_notify",
            EventKind::DestroyNotify => "destroy_notify",
            EventKind::ConfigureRequest => "configure_request",
            EventKind::ConfigureNotify => "configure_notify",
            EventKind::PropertyNotify => "property_notify",
            EventKind::ClientMessage => "client_message",
            EventKind::KeyPress => "key_press",
            EventKind::ButtonPress => "button_press",
            EventKind::ButtonRelease => "button_release",
            EventKind::MotionNotify => "motion_notify",
            EventKind::EnterNotify => "enter_notify",
            EventKind::LeaveNotify => "leave_notify",
            EventKind::Expose => "expose",
            EventKind::Damage => "damage",
            EventKind::Error => "error",
            EventKind::Other => "other",
        }
    }
}

impl XEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            XEvent::MapRequest { .. } => EventKind::MapRequest,
            XEvent::UnmapNotify { .. } => EventKind::UnmapNotify,
            XEvent::DestroyNotify { .. } => EventKind::DestroyNotify,
            XEvent::ConfigureRequest(_) => EventKind::ConfigureRequest,
            XEvent::ConfigureNotify { .. } => EventKind::ConfigureNotify,
            XEvent::PropertyNotify { .. } => EventKind::PropertyNotify,
            XEvent::ClientMessage { .. } => EventKind::ClientMessage,
            XEvent::KeyPress(_) => EventKind::KeyPress,
            XEvent::ButtonPress(_) => EventKind::ButtonPress,
            XEvent::ButtonRelease(_) => EventKind::ButtonRelease,
            XEvent::MotionNotify(_) => EventKind::MotionNotify,
            XEvent::EnterNotify(_) => EventKind::EnterNotify,
            XEvent::LeaveNotify(_) => EventKind::LeaveNotify,
            XEvent::Expose { .. } => EventKind::Expose,
            XEvent::DamageNotify { .. } => EventKind::Damage,
            XEvent::Error(_) => EventKind::Error,
            XEvent::Other(_) => EventKind::Other,
        }
    }
}

/// Requests the window manager issues against the X server.
///
/// Fire-and-forget requests are buffered by the implementation and written
/// out by [`XConn::flush`]; the tick driver flushes once per tick.
pub trait XConn {
    //* Connection and screen

    fn root(&self) -> Window;
    fn screen_size(&self) -> (u16, u16);
    fn root_visual(&self) -> u32;
    fn root_depth(&self) -> u8;
    fn raw_fd(&self) -> RawFd;
    fn generate_id(&self) -> XResult<u32>;
    fn flush(&self) -> XResult<()>;
    fn has_damage(&self) -> bool;

    //* Events

    /// Next event already read from the socket; never performs I/O.
    fn poll_queued_event(&self) -> XResult<Option<XEvent>>;
    /// Next event, reading from the socket if needed without blocking.
    fn poll_event(&self) -> XResult<Option<XEvent>>;

    //* Asynchronous round trips

    fn get_window_attributes(&self, window: Window) -> XResult<Seq>;
    fn get_geometry(&self, window: Window) -> XResult<Seq>;
    fn get_property(&self, window: Window, property: Atom, type_: Atom, long_length: u32) -> XResult<Seq>;
    /// Non-blocking check for the reply to `seq`.
    fn poll_reply(&self, seq: Seq, kind: ReplyKind) -> ReplyPoll;
    /// Forget a request whose reply is no longer wanted.
    fn discard_reply(&self, seq: Seq);

    //* Synchronous calls, used only during startup and by the CLI

    fn intern_atoms(&self, names: &[&str]) -> XResult<Vec<Atom>>;
    fn get_selection_owner(&self, selection: Atom) -> XResult<Window>;
    fn get_property_sync(&self, window: Window, property: Atom, type_: Atom, long_length: u32)
        -> XResult<Option<PropertyReply>>;
    fn query_tree(&self, window: Window) -> XResult<Vec<Window>>;
    fn keyboard_mapping(&self) -> XResult<KeyboardMapping>;
    /// Checked `ChangeWindowAttributes(event_mask)`; fails with BadAccess when
    /// another client holds substructure redirect on `window`.
    fn select_input_checked(&self, window: Window, event_mask: u32) -> XResult<()>;
    fn create_font_cursor(&self, shape: u16) -> XResult<u32>;
    fn get_input_focus(&self) -> XResult<Window>;

    //* Windows

    fn create_window(&self, req: &CreateWindow) -> XResult<()>;
    fn change_window_attributes(&self, window: Window, attrs: &WindowAttributes) -> XResult<()>;
    fn destroy_window(&self, window: Window) -> XResult<()>;
    fn map_window(&self, window: Window) -> XResult<()>;
    fn unmap_window(&self, window: Window) -> XResult<()>;
    fn reparent_window(&self, window: Window, parent: Window, x: i16, y: i16) -> XResult<()>;
    fn configure_window(&self, window: Window, changes: &WindowChanges) -> XResult<()>;
    fn change_save_set(&self, window: Window, insert: bool) -> XResult<()>;
    fn kill_client(&self, window: Window) -> XResult<()>;

    //* Properties and messages

    fn change_property32(&self, window: Window, property: Atom, type_: Atom, data: &[u32]) -> XResult<()>;
    fn change_property8(&self, window: Window, property: Atom, type_: Atom, data: &[u8]) -> XResult<()>;
    fn delete_property(&self, window: Window, property: Atom) -> XResult<()>;
    fn send_client_message(&self, window: Window, message_type: Atom, data: [u32; 5]) -> XResult<()>;
    fn send_configure_notify(&self, window: Window, geometry: Geometry) -> XResult<()>;
    fn set_selection_owner(&self, owner: Window, selection: Atom, time: u32) -> XResult<()>;

    //* Focus and grabs

    fn set_input_focus(&self, window: Window, time: u32) -> XResult<()>;
    fn grab_key(&self, window: Window, modifiers: u16, keycode: u8) -> XResult<()>;
    fn ungrab_all_keys(&self, window: Window) -> XResult<()>;
    /// Passive grab in synchronous pointer mode so the click can be replayed.
    fn grab_button(&self, window: Window, button: u8, modifiers: u16) -> XResult<()>;
    /// Release a frozen pointer: `replay` re-delivers the click to the client,
    /// otherwise the pointer is thawed asynchronously.
    fn allow_events(&self, replay: bool, time: u32) -> XResult<()>;
    fn grab_pointer(&self, window: Window, event_mask: u32, cursor: u32, time: u32) -> XResult<()>;
    fn ungrab_pointer(&self, time: u32) -> XResult<()>;
    fn grab_keyboard(&self, window: Window, time: u32) -> XResult<()>;
    fn ungrab_keyboard(&self, time: u32) -> XResult<()>;

    //* Server-side resources

    fn create_colormap(&self, id: u32, window: Window, visual: u32) -> XResult<()>;
    fn free_colormap(&self, id: u32) -> XResult<()>;
    fn free_cursor(&self, id: u32) -> XResult<()>;
    fn damage_create(&self, id: u32, drawable: Window) -> XResult<()>;
    fn damage_destroy(&self, id: u32) -> XResult<()>;
    fn damage_subtract(&self, id: u32) -> XResult<()>;

    //* Drawing

    fn open_font(&self, id: u32, name: &str) -> XResult<()>;
    fn close_font(&self, id: u32) -> XResult<()>;
    fn create_gc(&self, id: u32, drawable: Window, foreground: u32, font: Option<u32>) -> XResult<()>;
    fn free_gc(&self, id: u32) -> XResult<()>;
    fn set_foreground(&self, gc: u32, foreground: u32) -> XResult<()>;
    /// Restrict drawing through `gc` to `clip`, or lift the restriction.
    fn set_clip(&self, gc: u32, clip: Option<Geometry>) -> XResult<()>;
    fn fill_rectangles(&self, drawable: Window, gc: u32, rects: &[Geometry]) -> XResult<()>;
    fn draw_text(&self, drawable: Window, gc: u32, x: i16, y: i16, text: &[u8]) -> XResult<()>;
}
