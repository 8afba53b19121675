//! Window decorations (titlebars, borders, buttons)
//!
//! Frames are single windows; the titlebar, the borders and the buttons are
//! painted regions of it rather than child windows. [`FrameLayout`] is the
//! one place that knows where each region sits, for both painting and
//! pointer hit-testing.

use anyhow::Result;
use tracing::{debug, warn};

use crate::config::ThemeConfig;
use crate::shared::Geometry;
use crate::wm::moveresize::ResizeDir;
use crate::wm::slotmap::Handle;
use crate::wm::xconn::{NONE, Window, XConn};
use crate::wm::WindowManager;

/// Gap between buttons and around the title text.
const BUTTON_PADDING: u32 = 3;
/// Width of one character in the default core font.
const CHAR_WIDTH: u32 = 6;
/// Corner zone, in pixels along each edge, that resizes on both axes.
const CORNER: i32 = 16;

/// Titlebar buttons, right to left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameButton {
    Close,
    Maximize,
    Iconify,
}

impl FrameButton {
    pub const ALL: [FrameButton; 3] = [FrameButton::Close, FrameButton::Maximize, FrameButton::Iconify];
}

/// What the pointer is over inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameHit {
    Button(FrameButton),
    Title,
    Edge(ResizeDir),
    Client,
}

/// Region geometry of one frame, in frame-relative coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub width: u32,
    pub height: u32,
    pub border: u32,
    pub title: u32,
}

impl FrameLayout {
    /// Layout for a client of content size `w`x`h`.
    pub fn new(w: u32, h: u32, border: u32, title: u32) -> Self {
        Self { width: w + 2 * border, height: h + title + border, border, title }
    }

    pub fn titlebar(&self) -> Geometry {
        Geometry::new(0, 0, self.width, self.title)
    }

    /// Left, right and bottom border strips.
    pub fn borders(&self) -> [Geometry; 3] {
        let (b, t) = (self.border, self.title);
        let side = self.height.saturating_sub(t);
        [
            Geometry::new(0, t as i32, b, side),
            Geometry::new((self.width - b) as i32, t as i32, b, side),
            Geometry::new(0, (self.height - b) as i32, self.width, b),
        ]
    }

    fn button_size(&self) -> u32 {
        self.title.saturating_sub(2 * BUTTON_PADDING)
    }

    pub fn button(&self, button: FrameButton) -> Option<Geometry> {
        let size = self.button_size();
        if size == 0 {
            return None;
        }
        let slot = FrameButton::ALL.iter().position(|b| *b == button)? as u32;
        let right = self.width.checked_sub(self.border + (slot + 1) * (size + BUTTON_PADDING))?;
        Some(Geometry::new(right as i32, BUTTON_PADDING as i32, size, size))
    }

    /// Horizontal room for the title text, ending where the buttons begin.
    pub fn text_width(&self) -> u32 {
        let buttons = FrameButton::ALL.len() as u32 * (self.button_size() + BUTTON_PADDING);
        self.width.saturating_sub(2 * self.border + buttons + BUTTON_PADDING)
    }

    pub fn hit(&self, x: i32, y: i32) -> FrameHit {
        for button in FrameButton::ALL {
            if self.button(button).is_some_and(|g| g.contains(x, y)) {
                return FrameHit::Button(button);
            }
        }

        let b = self.border as i32;
        let (w, h) = (self.width as i32, self.height as i32);
        let mut dir = ResizeDir::empty();
        if x < b || (x < CORNER && y >= h - b) {
            dir |= ResizeDir::LEFT;
        }
        if x >= w - b || (x >= w - CORNER && y >= h - b) {
            dir |= ResizeDir::RIGHT;
        }
        if y >= h - b || (y >= h - CORNER && (x < b || x >= w - b)) {
            dir |= ResizeDir::BOTTOM;
        }
        if y < b && self.title > 0 {
            dir |= ResizeDir::TOP;
        }
        if !dir.is_empty() {
            return FrameHit::Edge(dir);
        }
        if y < self.title as i32 {
            FrameHit::Title
        } else {
            FrameHit::Client
        }
    }
}

/// Everything needed to paint one frame.
#[derive(Debug, Clone)]
pub struct FrameLook {
    pub layout: FrameLayout,
    pub focused: bool,
    pub urgent: bool,
    pub maximized: bool,
    pub title: String,
}

/// One menu to paint: items top to bottom.
#[derive(Debug, Clone)]
pub struct MenuLook<'a> {
    pub width: u32,
    pub item_height: u32,
    pub padding: u32,
    pub items: &'a [String],
    pub selected: Option<usize>,
}

/// Paints frames and menus. Frame windows are created by the manager; the
/// renderer only owns its drawing resources.
pub trait Renderer {
    fn init(&mut self, conn: &dyn XConn, root: Window, theme: &ThemeConfig) -> Result<()>;
    fn release(&mut self, conn: &dyn XConn);
    fn draw_frame(&self, conn: &dyn XConn, frame: Window, theme: &ThemeConfig, look: &FrameLook, clip: Option<Geometry>) -> Result<()>;
    fn draw_menu(&self, conn: &dyn XConn, window: Window, theme: &ThemeConfig, look: &MenuLook<'_>) -> Result<()>;
}

/// Core-protocol renderer: one GC, one server-side font, solid fills.
#[derive(Debug, Default)]
pub struct CoreRenderer {
    gc: u32,
    font: u32,
}

/// Latin-1 bytes for a core font; anything outside becomes `?`.
fn core_text(text: &str, max_chars: usize) -> Vec<u8> {
    text.chars().take(max_chars).map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?')).collect()
}

impl Renderer for CoreRenderer {
    fn init(&mut self, conn: &dyn XConn, root: Window, theme: &ThemeConfig) -> Result<()> {
        let font = conn.generate_id()?;
        match conn.open_font(font, &theme.font_name) {
            Ok(()) => self.font = font,
            Err(e) => warn!("Failed to open font {:?}: {}", theme.font_name, e),
        }
        self.gc = conn.generate_id()?;
        let font = (self.font != NONE).then_some(self.font);
        conn.create_gc(self.gc, root, theme.active_fg, font)?;
        debug!("Renderer ready (gc {:#x}, font {:#x})", self.gc, self.font);
        Ok(())
    }

    fn release(&mut self, conn: &dyn XConn) {
        if self.gc != NONE {
            let _ = conn.free_gc(self.gc);
            self.gc = NONE;
        }
        if self.font != NONE {
            let _ = conn.close_font(self.font);
            self.font = NONE;
        }
    }

    fn draw_frame(&self, conn: &dyn XConn, frame: Window, theme: &ThemeConfig, look: &FrameLook, clip: Option<Geometry>) -> Result<()> {
        let layout = &look.layout;
        if self.gc == NONE || (layout.border == 0 && layout.title == 0) {
            return Ok(());
        }
        let (bg, fg, border) = if look.focused {
            (theme.active_bg, theme.active_fg, theme.active_border)
        } else if look.urgent {
            (theme.active_border, theme.inactive_fg, theme.active_border)
        } else {
            (theme.inactive_bg, theme.inactive_fg, theme.inactive_border)
        };

        conn.set_clip(self.gc, clip)?;
        conn.set_foreground(self.gc, border)?;
        conn.fill_rectangles(frame, self.gc, &layout.borders())?;

        if layout.title > 0 {
            conn.set_foreground(self.gc, bg)?;
            conn.fill_rectangles(frame, self.gc, &[layout.titlebar()])?;

            conn.set_foreground(self.gc, fg)?;
            let buttons: Vec<Geometry> = FrameButton::ALL
                .iter()
                .filter_map(|b| layout.button(*b))
                .map(|g| match (look.maximized, g.width > 4) {
                    // A maximized window shows its maximize button hollowed.
                    (true, true) => Geometry::new(g.x + 2, g.y + 2, g.width - 4, g.height - 4),
                    _ => g,
                })
                .collect();
            conn.fill_rectangles(frame, self.gc, &buttons)?;

            let text = core_text(&look.title, (layout.text_width() / CHAR_WIDTH) as usize);
            if !text.is_empty() {
                let baseline = (layout.title * 3 / 4) as i16;
                conn.draw_text(frame, self.gc, (layout.border + BUTTON_PADDING) as i16, baseline, &text)?;
            }
        }
        if clip.is_some() {
            conn.set_clip(self.gc, None)?;
        }
        Ok(())
    }

    fn draw_menu(&self, conn: &dyn XConn, window: Window, theme: &ThemeConfig, look: &MenuLook<'_>) -> Result<()> {
        if self.gc == NONE {
            return Ok(());
        }
        let height = look.items.len() as u32 * look.item_height + 2 * look.padding;
        conn.set_foreground(self.gc, theme.menu_bg)?;
        conn.fill_rectangles(window, self.gc, &[Geometry::new(0, 0, look.width, height)])?;

        let max_chars = (look.width.saturating_sub(2 * look.padding) / CHAR_WIDTH) as usize;
        for (i, item) in look.items.iter().enumerate() {
            let top = (look.padding + i as u32 * look.item_height) as i32;
            let fg = if look.selected == Some(i) {
                conn.set_foreground(self.gc, theme.menu_sel_bg)?;
                conn.fill_rectangles(window, self.gc, &[Geometry::new(0, top, look.width, look.item_height)])?;
                theme.menu_sel_fg
            } else {
                theme.menu_fg
            };
            conn.set_foreground(self.gc, fg)?;
            let baseline = (top as u32 + look.item_height * 3 / 4) as i16;
            conn.draw_text(window, self.gc, (2 * look.padding) as i16, baseline, &core_text(item, max_chars))?;
        }
        Ok(())
    }
}

impl<C: XConn> WindowManager<C> {
    pub(crate) fn frame_layout(&self, handle: Handle) -> Option<FrameLayout> {
        let (bw, th) = self.decoration(handle);
        let client = self.clients.get(handle)?;
        Some(FrameLayout::new(client.server.width, client.server.height, bw, th))
    }

    /// Repaint a frame, or only the part of it inside `clip`.
    pub(crate) fn redraw_frame(&mut self, handle: Handle, clip: Option<Geometry>) -> Result<()> {
        let Some(layout) = self.frame_layout(handle) else {
            return Ok(());
        };
        let Some(client) = self.clients.get(handle) else {
            return Ok(());
        };
        if !client.frame_visible {
            return Ok(());
        }
        let title = self.clients.cold(handle).map(|info| info.title.clone()).unwrap_or_default();
        let look = FrameLook {
            layout,
            focused: client.is_focused(),
            urgent: client.flags.contains(crate::wm::client_flags::ClientFlags::URGENT),
            maximized: client.maximized_horz && client.maximized_vert,
            title,
        };
        self.renderer.draw_frame(&self.conn, client.frame, &self.config.theme, &look, clip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wm::fake::Request;
    use crate::wm::harness::*;
    use crate::wm::xconn::XEvent;

    #[test]
    fn buttons_sit_right_to_left_in_the_titlebar() {
        let layout = FrameLayout::new(300, 200, 2, 20);
        let close = layout.button(FrameButton::Close).unwrap();
        let max = layout.button(FrameButton::Maximize).unwrap();
        let icon = layout.button(FrameButton::Iconify).unwrap();
        assert!(close.x > max.x && max.x > icon.x);
        assert_eq!(close.x + close.width as i32, 304 - 2 - 3);
        assert_eq!(close.height, 14);
        assert_eq!(layout.hit(close.x + 1, close.y + 1), FrameHit::Button(FrameButton::Close));
        assert_eq!(layout.hit(icon.x + 1, icon.y + 1), FrameHit::Button(FrameButton::Iconify));
    }

    #[test]
    fn edges_and_corners_resize() {
        let layout = FrameLayout::new(300, 200, 2, 20);
        assert_eq!(layout.hit(0, 100), FrameHit::Edge(ResizeDir::LEFT));
        assert_eq!(layout.hit(303, 100), FrameHit::Edge(ResizeDir::RIGHT));
        assert_eq!(layout.hit(150, 221), FrameHit::Edge(ResizeDir::BOTTOM));
        assert_eq!(layout.hit(303, 221), FrameHit::Edge(ResizeDir::BOTTOM | ResizeDir::RIGHT));
        assert_eq!(layout.hit(5, 221), FrameHit::Edge(ResizeDir::BOTTOM | ResizeDir::LEFT));
        assert_eq!(layout.hit(1, 0), FrameHit::Edge(ResizeDir::TOP | ResizeDir::LEFT));
        assert_eq!(layout.hit(100, 10), FrameHit::Title);
        assert_eq!(layout.hit(100, 100), FrameHit::Client);
    }

    #[test]
    fn long_titles_are_clipped_to_the_titlebar() {
        assert_eq!(core_text("héllo", 10), b"h\xe9llo");
        assert_eq!(core_text("日本", 10), b"??");
        assert_eq!(core_text("abcdef", 3), b"abc");
    }

    #[test]
    fn expose_repaints_only_the_exposed_area() {
        let mut wm = test_wm();
        let h = wm.map_new(Geometry::new(0, 0, 300, 200));
        let frame = wm.frame(h);
        wm.conn.take_requests();
        wm.conn.push_event(XEvent::Expose { window: frame, x: 0, y: 0, width: 40, height: 10, count: 1 });
        wm.conn.push_event(XEvent::Expose { window: frame, x: 30, y: 5, width: 20, height: 10, count: 0 });
        wm.settle();
        let requests = wm.conn.take_requests();
        assert!(requests.iter().any(|r| matches!(r, Request::SetClip(_, Some(g)) if *g == Geometry::new(0, 0, 50, 15))));
        assert!(requests.iter().any(|r| matches!(r, Request::FillRectangles(w, _) if *w == frame)));
    }

    #[test]
    fn undecorated_frames_are_not_painted() {
        let mut wm = test_wm();
        let h = wm.map_new(Geometry::new(0, 0, 300, 200));
        wm.set_fullscreen(h, true).unwrap();
        wm.settle();
        wm.conn.take_requests();
        wm.redraw_frame(h, None).unwrap();
        assert!(wm.conn.requests().is_empty());
    }
}
