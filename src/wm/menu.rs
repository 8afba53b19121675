//! Menu Module
//!
//! The root menu (configured entries) and the client-list menu share one
//! override-redirect window owned by the manager. While a menu is open it
//! holds the keyboard and pointer grabs.

use anyhow::Result;
use tracing::{debug, warn};

use crate::shared::Geometry;
use crate::wm::client_flags::{ClientState, ManagePhase};
use crate::wm::decorations::MenuLook;
use crate::wm::keyboard::{Action, keysym};
use crate::wm::slotmap::Handle;
use crate::wm::xconn::{
    CURRENT_TIME, CreateWindow, NONE, PointerEvent, StackMode, Window, WindowAttributes, WindowChanges, WindowClass,
    XConn, event_mask,
};
use crate::wm::WindowManager;

const MENU_PADDING: u32 = 4;
const ITEM_HEIGHT: u32 = 24;
const MENU_WIDTH: u32 = 240;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuAction {
    Run(Action),
    /// Restore, focus and raise a client.
    Activate(Handle),
}

#[derive(Debug, Default)]
pub struct Menu {
    pub window: Window,
    visible: bool,
    labels: Vec<String>,
    actions: Vec<MenuAction>,
    selected: Option<usize>,
    geometry: Geometry,
}

impl Menu {
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Item under the menu-relative point, if any.
    fn item_at(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || x >= self.geometry.width as i32 {
            return None;
        }
        let y = y - MENU_PADDING as i32;
        if y < 0 {
            return None;
        }
        let index = (y as u32 / ITEM_HEIGHT) as usize;
        (index < self.labels.len()).then_some(index)
    }

    fn step(&mut self, forward: bool) {
        let len = self.labels.len();
        if len == 0 {
            return;
        }
        self.selected = Some(match (self.selected, forward) {
            (None, true) => 0,
            (None, false) => len - 1,
            (Some(i), true) => (i + 1) % len,
            (Some(i), false) => (i + len - 1) % len,
        });
    }
}

impl<C: XConn> WindowManager<C> {
    pub(crate) fn menu_create(&mut self) -> Result<()> {
        let window = self.conn.generate_id()?;
        self.conn.create_window(&CreateWindow {
            wid: window,
            parent: self.root,
            geometry: Geometry::new(0, 0, MENU_WIDTH, ITEM_HEIGHT),
            border_width: 1,
            class: WindowClass::InputOutput,
            depth: 0,
            visual: 0,
            attributes: WindowAttributes {
                background_pixel: Some(self.config.theme.menu_bg),
                border_pixel: Some(self.config.theme.active_border),
                override_redirect: Some(true),
                event_mask: Some(
                    event_mask::EXPOSURE
                        | event_mask::BUTTON_PRESS
                        | event_mask::BUTTON_RELEASE
                        | event_mask::POINTER_MOTION,
                ),
                ..Default::default()
            },
        })?;
        self.menu.window = window;
        debug!("WM: Menu window {:#x}", window);
        Ok(())
    }

    pub(crate) fn menu_destroy(&mut self) -> Result<()> {
        if self.menu.visible {
            self.menu_hide()?;
        }
        if self.menu.window != NONE {
            self.conn.destroy_window(self.menu.window)?;
            self.menu.window = NONE;
        }
        Ok(())
    }

    /// Configured root menu entries.
    pub(crate) fn menu_show_root(&mut self, at: (i32, i32)) -> Result<()> {
        let mut labels = Vec::new();
        let mut actions = Vec::new();
        for entry in &self.config.root_menu {
            match entry.action.parse::<Action>() {
                Ok(action) => {
                    labels.push(entry.label.clone());
                    actions.push(MenuAction::Run(action));
                }
                Err(e) => warn!("Skipping menu entry {:?}: {}", entry.label, e),
            }
        }
        self.menu_show(labels, actions, at)
    }

    /// Every managed client; iconified ones are bracketed.
    pub(crate) fn menu_show_client_list(&mut self, at: (i32, i32)) -> Result<()> {
        let mut labels = Vec::new();
        let mut actions = Vec::new();
        for (handle, client, info) in self.clients.iter_live() {
            if client.phase != ManagePhase::Done || !client.is_active() {
                continue;
            }
            let title = if info.title.is_empty() { &info.wm_class } else { &info.title };
            labels.push(match client.state {
                ClientState::Unmapped => format!("[{}]", title),
                _ => title.clone(),
            });
            actions.push(MenuAction::Activate(handle));
        }
        self.menu_show(labels, actions, at)
    }

    fn menu_show(&mut self, labels: Vec<String>, actions: Vec<MenuAction>, at: (i32, i32)) -> Result<()> {
        if labels.is_empty() {
            return Ok(());
        }
        if self.menu.visible {
            self.menu_hide()?;
        }
        let height = labels.len() as u32 * ITEM_HEIGHT + 2 * MENU_PADDING;
        let geometry = Geometry::new(at.0, at.1, MENU_WIDTH, height).clamped_into(&self.screen);
        let window = self.menu.window;

        self.menu.labels = labels;
        self.menu.actions = actions;
        self.menu.selected = None;
        self.menu.geometry = geometry;
        self.menu.visible = true;

        self.conn.configure_window(
            window,
            &WindowChanges { stack_mode: Some(StackMode::Above), ..WindowChanges::geometry(geometry) },
        )?;
        self.conn.map_window(window)?;
        self.conn.grab_keyboard(window, CURRENT_TIME)?;
        let mask = event_mask::BUTTON_PRESS | event_mask::BUTTON_RELEASE | event_mask::POINTER_MOTION;
        self.conn.grab_pointer(window, mask, self.cursors.normal, CURRENT_TIME)?;
        self.menu_redraw()
    }

    pub(crate) fn menu_hide(&mut self) -> Result<()> {
        if !self.menu.visible {
            return Ok(());
        }
        self.menu.visible = false;
        self.menu.selected = None;
        self.conn.unmap_window(self.menu.window)?;
        self.conn.ungrab_keyboard(CURRENT_TIME)?;
        self.conn.ungrab_pointer(CURRENT_TIME)?;
        Ok(())
    }

    pub(crate) fn menu_redraw(&mut self) -> Result<()> {
        if !self.menu.visible {
            return Ok(());
        }
        let look = MenuLook {
            width: self.menu.geometry.width,
            item_height: ITEM_HEIGHT,
            padding: MENU_PADDING,
            items: &self.menu.labels,
            selected: self.menu.selected,
        };
        self.renderer.draw_menu(&self.conn, self.menu.window, &self.config.theme, &look)
    }

    pub(crate) fn menu_handle_key(&mut self, sym: u32) -> Result<()> {
        match sym {
            keysym::UP => self.menu.step(false),
            keysym::DOWN => self.menu.step(true),
            keysym::HOME => self.menu.selected = (!self.menu.labels.is_empty()).then_some(0),
            keysym::RETURN | keysym::KP_ENTER => {
                return match self.menu.selected {
                    Some(index) => self.menu_activate(index),
                    None => Ok(()),
                };
            }
            keysym::ESCAPE => return self.menu_hide(),
            _ => return Ok(()),
        }
        self.menu_redraw()
    }

    /// Presses while a menu is open: outside the menu closes it. Returns
    /// whether the press was consumed.
    pub(crate) fn menu_button_press(&mut self, ev: &PointerEvent) -> Result<bool> {
        if !self.menu.visible {
            return Ok(false);
        }
        let g = self.menu.geometry;
        if !g.contains(ev.root_x as i32, ev.root_y as i32) {
            self.menu_hide()?;
        }
        Ok(true)
    }

    pub(crate) fn menu_button_release(&mut self, ev: &PointerEvent) -> Result<()> {
        let g = self.menu.geometry;
        match self.menu.item_at(ev.root_x as i32 - g.x, ev.root_y as i32 - g.y) {
            Some(index) => self.menu_activate(index),
            None => Ok(()),
        }
    }

    pub(crate) fn menu_motion(&mut self, y: i32) -> Result<()> {
        let selected = self.menu.item_at(0, y);
        if selected == self.menu.selected {
            return Ok(());
        }
        self.menu.selected = selected;
        self.menu_redraw()
    }

    fn menu_activate(&mut self, index: usize) -> Result<()> {
        let Some(action) = self.menu.actions.get(index).cloned() else {
            return Ok(());
        };
        self.menu_hide()?;
        debug!("WM: Menu item {} -> {:?}", index, action);
        match action {
            MenuAction::Run(action) => self.run_action(&action, CURRENT_TIME),
            MenuAction::Activate(handle) => {
                if self.clients.live(handle) {
                    self.activate(handle)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wm::fake::{FakeConn, Request};
    use crate::wm::harness::*;
    use crate::wm::xconn::XEvent;

    fn press(detail: u8, event: Window, root: (i16, i16)) -> PointerEvent {
        PointerEvent {
            root: FakeConn::ROOT,
            event,
            child: NONE,
            root_x: root.0,
            root_y: root.1,
            event_x: root.0,
            event_y: root.1,
            state: 0,
            detail,
            time: 1,
        }
    }

    #[test]
    fn root_click_opens_root_menu() {
        let mut wm = test_wm();
        wm.conn.push_event(XEvent::ButtonPress(press(3, FakeConn::ROOT, (100, 100))));
        wm.settle();
        assert!(wm.menu.is_visible());
        assert!(wm.conn.is_mapped(wm.menu.window));
        assert_eq!(wm.menu.labels, vec!["Terminal", "Reload", "Restart", "Exit"]);
        let requests = wm.conn.requests();
        assert!(requests.iter().any(|r| matches!(r, Request::GrabKeyboard(w) if *w == wm.menu.window)));
        assert!(requests.iter().any(|r| matches!(r, Request::DrawText(w, text) if *w == wm.menu.window && text == b"Exit")));
    }

    #[test]
    fn keyboard_navigation_wraps_and_activates() {
        let mut wm = test_wm();
        wm.menu_show_root((0, 0)).unwrap();
        wm.menu_handle_key(keysym::UP).unwrap();
        assert_eq!(wm.menu.selected, Some(3));
        wm.menu_handle_key(keysym::DOWN).unwrap();
        assert_eq!(wm.menu.selected, Some(0));
        wm.menu_handle_key(keysym::HOME).unwrap();
        wm.menu_handle_key(keysym::DOWN).unwrap();
        assert_eq!(wm.menu.selected, Some(1));
        wm.menu_handle_key(keysym::RETURN).unwrap();
        assert!(!wm.menu.is_visible());
        assert!(wm.flags.take_reload());
        assert!(wm.conn.requests().contains(&Request::UngrabKeyboard));
    }

    #[test]
    fn escape_closes_without_acting() {
        let mut wm = test_wm();
        wm.menu_show_root((0, 0)).unwrap();
        wm.menu_handle_key(keysym::DOWN).unwrap();
        wm.menu_handle_key(keysym::ESCAPE).unwrap();
        assert!(!wm.menu.is_visible());
        assert!(!wm.conn.is_mapped(wm.menu.window));
        assert!(!wm.flags.shutdown_requested());
    }

    #[test]
    fn client_list_restores_the_chosen_client() {
        let mut wm = test_wm();
        let a = wm.map_new(Geometry::new(0, 0, 300, 200));
        let b = wm.map_new(Geometry::new(0, 0, 300, 200));
        wm.iconify(b).unwrap();
        wm.settle();

        wm.conn.push_event(XEvent::ButtonPress(press(2, FakeConn::ROOT, (10, 10))));
        wm.settle();
        assert_eq!(wm.menu.actions, vec![MenuAction::Activate(a), MenuAction::Activate(b)]);
        assert!(wm.menu.labels[1].starts_with('['));

        // Hover the second item, then release over it.
        let menu = wm.menu.window;
        let g = wm.menu.geometry;
        let y = (MENU_PADDING + ITEM_HEIGHT + ITEM_HEIGHT / 2) as i16;
        wm.conn.push_event(XEvent::MotionNotify(PointerEvent { event_y: y, ..press(0, menu, (g.x as i16 + 5, g.y as i16 + y)) }));
        wm.settle();
        assert_eq!(wm.menu.selected, Some(1));
        wm.conn.push_event(XEvent::ButtonRelease(press(2, menu, (g.x as i16 + 5, g.y as i16 + y))));
        wm.settle();

        assert!(!wm.menu.is_visible());
        assert_eq!(wm.client(b).state, ClientState::Mapped);
        assert_eq!(wm.focused, b);
    }

    #[test]
    fn click_outside_closes_menu() {
        let mut wm = test_wm();
        wm.menu_show_root((0, 0)).unwrap();
        let menu = wm.menu.window;
        wm.conn.push_event(XEvent::ButtonPress(press(1, menu, (1500, 900))));
        wm.settle();
        assert!(!wm.menu.is_visible());
        assert!(!wm.flags.shutdown_requested());
    }

    #[test]
    fn menu_stays_on_screen() {
        let mut wm = test_wm();
        wm.menu_show_root((1900, 1070)).unwrap();
        let g = wm.menu.geometry;
        assert!(g.right() <= 1920 && g.bottom() <= 1080);
    }
}
