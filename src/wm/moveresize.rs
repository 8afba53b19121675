//! MoveResize Module
//!
//! Interactive move and resize with the pointer, button routing for frames,
//! client windows and the root, and resize cursor hinting over frame edges.

use std::time::{Duration, Instant};

use anyhow::Result;
use bitflags::bitflags;
use tracing::{debug, trace};

use crate::shared::Geometry;
use crate::wm::client_flags::{ClientState, Dirty, ManagePhase};
use crate::wm::decorations::{FrameButton, FrameHit};
use crate::wm::slotmap::Handle;
use crate::wm::xconn::{CURRENT_TIME, NONE, PointerEvent, WindowAttributes, XConn, XResult, event_mask, modmask};
use crate::wm::WindowManager;

/// Smallest content size an interactive resize can produce.
pub const MIN_INTERACTIVE_SIZE: u32 = 50;
/// At most one geometry commit per interval while dragging.
pub const MOTION_INTERVAL: Duration = Duration::from_millis(16);

// Cursor font glyphs
const XC_LEFT_PTR: u16 = 68;
const XC_FLEUR: u16 = 52;
/// Resize glyphs in `_NET_WM_MOVERESIZE` direction order, top-left clockwise.
const XC_RESIZE: [u16; 8] = [134, 138, 136, 96, 14, 16, 12, 70];

bitflags! {
    /// Edges a resize drags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ResizeDir: u8 {
        const TOP    = 1 << 0;
        const BOTTOM = 1 << 1;
        const LEFT   = 1 << 2;
        const RIGHT  = 1 << 3;
    }
}

impl ResizeDir {
    const EWMH_ORDER: [ResizeDir; 8] = [
        ResizeDir::TOP.union(ResizeDir::LEFT),
        ResizeDir::TOP,
        ResizeDir::TOP.union(ResizeDir::RIGHT),
        ResizeDir::RIGHT,
        ResizeDir::BOTTOM.union(ResizeDir::RIGHT),
        ResizeDir::BOTTOM,
        ResizeDir::BOTTOM.union(ResizeDir::LEFT),
        ResizeDir::LEFT,
    ];

    /// `_NET_WM_MOVERESIZE` size directions 0-7.
    pub fn from_ewmh(direction: u32) -> Option<Self> {
        Self::EWMH_ORDER.get(direction as usize).copied()
    }

    fn cursor_index(self) -> Option<usize> {
        Self::EWMH_ORDER.iter().position(|d| *d == self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InteractionMode {
    #[default]
    None,
    Move,
    Resize,
}

/// State of the one interactive operation that can run at a time.
#[derive(Debug, Clone, Default)]
pub struct Interaction {
    pub mode: InteractionMode,
    pub handle: Handle,
    /// Client rectangle when the operation started.
    pub start: Geometry,
    /// Pointer position in root coordinates when the operation started.
    pub anchor: (i32, i32),
    pub dir: ResizeDir,
    last_commit: Option<Instant>,
    /// Latest pointer position not yet turned into geometry.
    pending: Option<(i32, i32)>,
}

impl Interaction {
    pub fn is_active(&self) -> bool {
        self.mode != InteractionMode::None
    }

    /// When the throttled motion has to be committed, if any is waiting.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending?;
        Some(self.last_commit.map_or_else(Instant::now, |t| t + MOTION_INTERVAL))
    }

    /// Geometry for the pointer at `(x, y)`.
    fn target(&self, x: i32, y: i32) -> Geometry {
        let (dx, dy) = (x - self.anchor.0, y - self.anchor.1);
        let s = self.start;
        match self.mode {
            InteractionMode::Move => Geometry::new(s.x + dx, s.y + dy, s.width, s.height),
            InteractionMode::Resize => {
                let mut w = s.width as i32;
                let mut h = s.height as i32;
                if self.dir.contains(ResizeDir::RIGHT) {
                    w += dx;
                } else if self.dir.contains(ResizeDir::LEFT) {
                    w -= dx;
                }
                if self.dir.contains(ResizeDir::BOTTOM) {
                    h += dy;
                } else if self.dir.contains(ResizeDir::TOP) {
                    h -= dy;
                }
                let w = w.max(MIN_INTERACTIVE_SIZE as i32) as u32;
                let h = h.max(MIN_INTERACTIVE_SIZE as i32) as u32;
                Geometry::new(s.x, s.y, w, h)
            }
            InteractionMode::None => s,
        }
    }
}

/// Glyph cursors for the root, moves and each resize direction.
#[derive(Debug, Default)]
pub struct Cursors {
    pub normal: u32,
    pub moving: u32,
    pub resize: [u32; 8],
}

impl Cursors {
    pub fn create(conn: &dyn XConn) -> XResult<Self> {
        let mut resize = [NONE; 8];
        for (cursor, glyph) in resize.iter_mut().zip(XC_RESIZE) {
            *cursor = conn.create_font_cursor(glyph)?;
        }
        Ok(Self { normal: conn.create_font_cursor(XC_LEFT_PTR)?, moving: conn.create_font_cursor(XC_FLEUR)?, resize })
    }

    pub fn free(&mut self, conn: &dyn XConn) {
        for cursor in std::iter::once(self.normal).chain([self.moving]).chain(self.resize) {
            if cursor != NONE {
                let _ = conn.free_cursor(cursor);
            }
        }
        *self = Self::default();
    }

    pub fn for_dir(&self, dir: Option<ResizeDir>) -> u32 {
        dir.and_then(ResizeDir::cursor_index).map_or(self.normal, |i| self.resize[i])
    }
}

impl<C: XConn> WindowManager<C> {
    /// Grab the pointer and begin moving or resizing `handle`, anchored at
    /// the root position `anchor`.
    pub(crate) fn start_interaction(
        &mut self,
        handle: Handle,
        mode: InteractionMode,
        dir: ResizeDir,
        anchor: (i32, i32),
        time: u32,
    ) -> Result<()> {
        if self.interaction.is_active() || mode == InteractionMode::None {
            return Ok(());
        }
        let Some(client) = self.clients.get_mut(handle) else {
            return Ok(());
        };
        if client.phase != ManagePhase::Done || client.state != ClientState::Mapped || client.is_fullscreen() {
            return Ok(());
        }
        if mode == InteractionMode::Resize && (dir.is_empty() || client.hints.is_fixed()) {
            return Ok(());
        }
        // Dragging takes a window out of the maximized state.
        if client.maximized_horz || client.maximized_vert {
            client.maximized_horz = false;
            client.maximized_vert = false;
            client.saved_maximize = None;
            client.dirty |= Dirty::STATE | Dirty::FRAME_BUTTONS;
        }
        let start = client.desired;

        let cursor = match mode {
            InteractionMode::Move => self.cursors.moving,
            _ => self.cursors.for_dir(Some(dir)),
        };
        self.conn.grab_pointer(self.root, event_mask::BUTTON_RELEASE | event_mask::POINTER_MOTION, cursor, time)?;
        self.interaction =
            Interaction { mode, handle, start, anchor, dir, last_commit: None, pending: None };
        debug!("WM: Start {:?} {:?} of {:?} at {:?}", mode, dir, handle, anchor);
        Ok(())
    }

    /// Drop the operation and the pointer grab. Geometry already committed
    /// stays.
    pub(crate) fn cancel_interaction(&mut self) -> Result<()> {
        if !self.interaction.is_active() {
            return Ok(());
        }
        debug!("WM: Cancel interaction on {:?}", self.interaction.handle);
        self.interaction = Interaction::default();
        self.conn.ungrab_pointer(CURRENT_TIME)?;
        Ok(())
    }

    fn end_interaction(&mut self, time: u32) -> Result<()> {
        self.commit_interaction();
        self.interaction = Interaction::default();
        self.conn.ungrab_pointer(time)?;
        Ok(())
    }

    /// Record a pointer position. Geometry is committed at most once per
    /// [`MOTION_INTERVAL`]; the tick driver commits the rest on time.
    pub(crate) fn interaction_motion(&mut self, x: i32, y: i32, now: Instant) {
        if !self.clients.live(self.interaction.handle) {
            let _ = self.cancel_interaction();
            return;
        }
        self.interaction.pending = Some((x, y));
        let due = self.interaction.last_commit.is_none_or(|t| now.duration_since(t) >= MOTION_INTERVAL);
        if due {
            self.commit_interaction();
            self.interaction.last_commit = Some(now);
        }
    }

    /// Commit throttled motion whose deadline has passed.
    pub(crate) fn interaction_timer(&mut self, now: Instant) {
        if self.interaction.deadline().is_some_and(|d| d <= now) {
            self.commit_interaction();
            self.interaction.last_commit = Some(now);
        }
    }

    fn commit_interaction(&mut self) {
        let Some((x, y)) = self.interaction.pending.take() else {
            return;
        };
        let interaction = &self.interaction;
        let Some(client) = self.clients.get_mut(interaction.handle) else {
            return;
        };
        let mut target = interaction.target(x, y);
        if interaction.mode == InteractionMode::Resize {
            client.hints.constrain(&mut target.width, &mut target.height);
            let start = interaction.start;
            if interaction.dir.contains(ResizeDir::LEFT) {
                target.x = start.x + start.width as i32 - target.width as i32;
            }
            if interaction.dir.contains(ResizeDir::TOP) {
                target.y = start.y + start.height as i32 - target.height as i32;
            }
        }
        if target != client.desired {
            trace!("Interaction {:?} -> {:?}", interaction.mode, target);
            client.desired = target;
            client.dirty |= Dirty::GEOM;
        }
    }

    pub(crate) fn handle_button_press(&mut self, ev: &PointerEvent) -> Result<()> {
        self.pointer = (ev.root_x as i32, ev.root_y as i32);
        if self.menu.is_visible() && self.menu_button_press(ev)? {
            return Ok(());
        }

        if ev.event == self.root && ev.child == NONE {
            return match ev.detail {
                2 => self.menu_show_client_list(self.pointer),
                3 => self.menu_show_root(self.pointer),
                4 => self.switch_workspace_relative(-1),
                5 => self.switch_workspace_relative(1),
                _ => Ok(()),
            };
        }

        let Some(handle) = self.client_by_any(ev.event) else {
            return Ok(());
        };
        let Some(client) = self.clients.get(handle) else {
            return Ok(());
        };
        let (xid, frame, window_type) = (client.xid, client.frame, client.window_type);
        let on_client = ev.event == xid;

        if !window_type.refuses_focus() && self.focused != handle && self.is_focusable(handle) {
            self.set_focus(handle)?;
        }
        if matches!(ev.detail, 1 | 3) {
            self.stack_raise(handle)?;
        }

        let anchor = self.pointer;
        let alt = ev.state & modmask::MOD1 != 0;
        let mut grabbed = false;
        if alt && ev.detail == 1 {
            self.start_interaction(handle, InteractionMode::Move, ResizeDir::empty(), anchor, ev.time)?;
            grabbed = true;
        } else if alt && ev.detail == 3 {
            let dir = ResizeDir::BOTTOM | ResizeDir::RIGHT;
            self.start_interaction(handle, InteractionMode::Resize, dir, anchor, ev.time)?;
            grabbed = true;
        } else if ev.event == frame && ev.detail == 1 {
            let Some(layout) = self.frame_layout(handle) else {
                return Ok(());
            };
            match layout.hit(ev.event_x as i32, ev.event_y as i32) {
                FrameHit::Button(FrameButton::Close) => self.close_client(handle)?,
                FrameHit::Button(FrameButton::Maximize) => self.toggle_maximize(handle)?,
                FrameHit::Button(FrameButton::Iconify) => self.iconify(handle)?,
                FrameHit::Edge(dir) => self.start_interaction(handle, InteractionMode::Resize, dir, anchor, ev.time)?,
                FrameHit::Title => {
                    self.start_interaction(handle, InteractionMode::Move, ResizeDir::empty(), anchor, ev.time)?
                }
                FrameHit::Client => {}
            }
        }

        // Presses on the client came through the passive grab with the
        // pointer frozen.
        if on_client {
            self.conn.allow_events(!grabbed, ev.time)?;
        }
        Ok(())
    }

    pub(crate) fn handle_button_release(&mut self, ev: &PointerEvent) -> Result<()> {
        self.pointer = (ev.root_x as i32, ev.root_y as i32);
        if self.interaction.is_active() {
            self.interaction.pending = Some(self.pointer);
            return self.end_interaction(ev.time);
        }
        if self.menu.is_visible() {
            self.menu_button_release(ev)?;
        }
        Ok(())
    }

    pub(crate) fn handle_motion(&mut self, ev: &PointerEvent, now: Instant) -> Result<()> {
        self.pointer = (ev.root_x as i32, ev.root_y as i32);
        if self.interaction.is_active() {
            self.interaction_motion(ev.root_x as i32, ev.root_y as i32, now);
            return Ok(());
        }
        if self.menu.is_visible() && ev.event == self.menu.window {
            return self.menu_motion(ev.event_y as i32);
        }
        if let Some(handle) = self.client_by_frame(ev.event) {
            self.update_frame_cursor(handle, ev.event_x as i32, ev.event_y as i32)?;
        }
        Ok(())
    }

    /// Show the resize cursor for the edge under the pointer.
    fn update_frame_cursor(&mut self, handle: Handle, x: i32, y: i32) -> Result<()> {
        let Some(layout) = self.frame_layout(handle) else {
            return Ok(());
        };
        let dir = match layout.hit(x, y) {
            FrameHit::Edge(dir) => Some(dir),
            _ => None,
        };
        let cursor = self.cursors.for_dir(dir);
        let Some(client) = self.clients.get_mut(handle) else {
            return Ok(());
        };
        if client.last_cursor_dir == dir {
            return Ok(());
        }
        client.last_cursor_dir = dir;
        let frame = client.frame;
        self.conn.change_window_attributes(frame, &WindowAttributes { cursor: Some(cursor), ..Default::default() })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wm::fake::{FakeConn, Request};
    use crate::wm::harness::*;
    use crate::wm::hints::size_flags;
    use crate::wm::xconn::XEvent;

    fn pointer(event: u32, detail: u8, state: u16, root: (i16, i16), local: (i16, i16)) -> PointerEvent {
        PointerEvent {
            root: FakeConn::ROOT,
            event,
            child: NONE,
            root_x: root.0,
            root_y: root.1,
            event_x: local.0,
            event_y: local.1,
            state,
            detail,
            time: 1,
        }
    }

    #[test]
    fn ewmh_directions_map_to_edges() {
        assert_eq!(ResizeDir::from_ewmh(0), Some(ResizeDir::TOP | ResizeDir::LEFT));
        assert_eq!(ResizeDir::from_ewmh(4), Some(ResizeDir::BOTTOM | ResizeDir::RIGHT));
        assert_eq!(ResizeDir::from_ewmh(7), Some(ResizeDir::LEFT));
        assert_eq!(ResizeDir::from_ewmh(8), None);
    }

    #[test]
    fn alt_drag_moves_the_window() {
        let mut wm = test_wm();
        let h = wm.map_new(Geometry::new(100, 100, 300, 200));
        let xid = wm.xid(h);
        let start = wm.client(h).server;
        wm.conn.take_requests();

        wm.conn.push_event(XEvent::ButtonPress(pointer(xid, 1, modmask::MOD1, (500, 500), (10, 10))));
        wm.settle();
        assert_eq!(wm.interaction.mode, InteractionMode::Move);
        let requests = wm.conn.take_requests();
        assert!(requests.contains(&Request::GrabPointer { window: FakeConn::ROOT, cursor: wm.cursors.moving }));
        assert!(requests.contains(&Request::AllowEvents { replay: false }));

        wm.conn.push_event(XEvent::MotionNotify(pointer(FakeConn::ROOT, 0, modmask::MOD1, (540, 470), (0, 0))));
        wm.settle();
        wm.conn.push_event(XEvent::ButtonRelease(pointer(FakeConn::ROOT, 1, modmask::MOD1, (560, 480), (0, 0))));
        wm.settle();

        assert_eq!(wm.interaction.mode, InteractionMode::None);
        assert!(wm.conn.requests().contains(&Request::UngrabPointer));
        assert_eq!(wm.client(h).server, Geometry::new(start.x + 60, start.y - 20, start.width, start.height));
    }

    #[test]
    fn plain_click_is_replayed_to_the_client() {
        let mut wm = test_wm();
        let a = wm.map_new(Geometry::new(0, 0, 300, 200));
        let b = wm.map_new(Geometry::new(0, 0, 300, 200));
        assert_eq!(wm.focused, a);
        wm.conn.take_requests();
        wm.conn.push_event(XEvent::ButtonPress(pointer(wm.xid(b), 1, 0, (10, 10), (10, 10))));
        wm.settle();
        assert_eq!(wm.focused, b);
        assert!(wm.conn.requests().contains(&Request::AllowEvents { replay: true }));
        assert!(!wm.interaction.is_active());
    }

    #[test]
    fn left_edge_resize_keeps_right_edge_fixed() {
        let mut wm = test_wm();
        let h = wm.map_new(Geometry::new(200, 100, 300, 200));
        let start = wm.client(h).server;
        let now = Instant::now();
        wm.start_interaction(h, InteractionMode::Resize, ResizeDir::LEFT, (200, 150), CURRENT_TIME).unwrap();
        wm.interaction_motion(150, 150, now);
        let d = wm.client(h).desired;
        assert_eq!(d.width, start.width + 50);
        assert_eq!(d.x + d.width as i32, start.x + start.width as i32);

        // Shrinking stops at the minimum size and the right edge holds.
        wm.interaction_motion(2000, 150, now + MOTION_INTERVAL);
        let d = wm.client(h).desired;
        assert_eq!(d.width, MIN_INTERACTIVE_SIZE);
        assert_eq!(d.x + d.width as i32, start.x + start.width as i32);
    }

    #[test]
    fn resize_honours_size_hints() {
        let mut wm = test_wm();
        let window = wm.conn.add_window(Geometry::new(0, 0, 300, 200), false, false);
        let mut hints = [0u32; 18];
        hints[0] = size_flags::P_MAX_SIZE;
        hints[7..9].copy_from_slice(&[400, 250]);
        wm.conn.set_property(
            window,
            crate::wm::xconn::predefined::WM_NORMAL_HINTS,
            crate::wm::xconn::PropertyReply::from_u32(crate::wm::xconn::predefined::WM_SIZE_HINTS, &hints),
        );
        let h = wm.request_map(window);
        let dir = ResizeDir::BOTTOM | ResizeDir::RIGHT;
        wm.start_interaction(h, InteractionMode::Resize, dir, (0, 0), CURRENT_TIME).unwrap();
        wm.interaction_motion(500, 500, Instant::now());
        let d = wm.client(h).desired;
        assert_eq!((d.width, d.height), (400, 250));
    }

    #[test]
    fn motion_is_throttled_until_the_deadline() {
        let mut wm = test_wm();
        let h = wm.map_new(Geometry::new(100, 100, 300, 200));
        let start = wm.client(h).desired;
        let t0 = Instant::now();
        wm.start_interaction(h, InteractionMode::Move, ResizeDir::empty(), (0, 0), CURRENT_TIME).unwrap();
        wm.interaction_motion(10, 0, t0);
        assert_eq!(wm.client(h).desired.x, start.x + 10);

        wm.interaction_motion(20, 0, t0 + Duration::from_millis(4));
        assert_eq!(wm.client(h).desired.x, start.x + 10);
        assert_eq!(wm.interaction.deadline(), Some(t0 + MOTION_INTERVAL));

        wm.interaction_timer(t0 + Duration::from_millis(8));
        assert_eq!(wm.client(h).desired.x, start.x + 10);
        wm.interaction_timer(t0 + MOTION_INTERVAL);
        assert_eq!(wm.client(h).desired.x, start.x + 20);
        assert_eq!(wm.interaction.deadline(), None);
    }

    #[test]
    fn destroying_the_target_cancels_the_grab() {
        let mut wm = test_wm();
        let h = wm.map_new(Geometry::new(100, 100, 300, 200));
        wm.start_interaction(h, InteractionMode::Move, ResizeDir::empty(), (0, 0), CURRENT_TIME).unwrap();
        let xid = wm.xid(h);
        wm.conn.remove_window(xid);
        wm.conn.push_event(XEvent::DestroyNotify { event: xid, window: xid });
        wm.settle();
        assert!(!wm.interaction.is_active());
        assert!(wm.conn.requests().contains(&Request::UngrabPointer));
    }

    #[test]
    fn frame_edge_hover_sets_resize_cursor_once() {
        let mut wm = test_wm();
        let h = wm.map_new(Geometry::new(100, 100, 300, 200));
        let frame = wm.frame(h);
        wm.conn.take_requests();
        for x in [0, 1, 0] {
            wm.conn.push_event(XEvent::MotionNotify(pointer(frame, 0, 0, (100, 200), (x, 100))));
            wm.settle();
        }
        let cursor = wm.cursors.for_dir(Some(ResizeDir::LEFT));
        let changes: Vec<_> = wm.conn.requests().into_iter().filter(|r| matches!(r, Request::ChangeAttributes(w, _) if *w == frame)).collect();
        assert_eq!(changes, vec![Request::ChangeAttributes(frame, WindowAttributes { cursor: Some(cursor), ..Default::default() })]);
        assert_eq!(wm.client(h).last_cursor_dir, Some(ResizeDir::LEFT));
    }

    #[test]
    fn titlebar_buttons_act_on_press() {
        let mut wm = test_wm();
        let h = wm.map_new(Geometry::new(100, 100, 300, 200));
        let frame = wm.frame(h);
        let layout = wm.frame_layout(h).unwrap();
        let max = layout.button(FrameButton::Maximize).unwrap();
        wm.conn.push_event(XEvent::ButtonPress(pointer(frame, 1, 0, (0, 0), (max.x as i16 + 1, max.y as i16 + 1))));
        wm.settle();
        assert!(wm.client(h).maximized_horz && wm.client(h).maximized_vert);

        let layout = wm.frame_layout(h).unwrap();
        let iconify = layout.button(FrameButton::Iconify).unwrap();
        wm.conn.push_event(XEvent::ButtonPress(pointer(frame, 1, 0, (0, 0), (iconify.x as i16 + 1, iconify.y as i16 + 1))));
        wm.settle();
        assert_eq!(wm.client(h).state, ClientState::Unmapped);
    }

    #[test]
    fn root_wheel_switches_desktops() {
        let mut wm = test_wm();
        wm.conn.push_event(XEvent::ButtonPress(pointer(FakeConn::ROOT, 5, 0, (0, 0), (0, 0))));
        wm.settle();
        assert_eq!(wm.current_desktop, 1);
        wm.conn.push_event(XEvent::ButtonPress(pointer(FakeConn::ROOT, 4, 0, (0, 0), (0, 0))));
        wm.settle();
        assert_eq!(wm.current_desktop, 0);
    }
}
