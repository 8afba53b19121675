//! Placement Module
//!
//! Initial placement of new clients, and the geometry side of the protocol:
//! ConfigureRequest from clients and ConfigureNotify for frames and clients.

use anyhow::Result;
use tracing::{debug, trace};

use crate::shared::Geometry;
use crate::wm::client_flags::{ClientState, Dirty, Placement};
use crate::wm::events::ConfigureNotify;
use crate::wm::slotmap::Handle;
use crate::wm::xconn::{ConfigureRequest, StackMode, WindowChanges, XConn, config_mask};
use crate::wm::WindowManager;

/// Changes named by a request's value mask, for windows we do not manage.
fn forwarded_changes(req: &ConfigureRequest) -> WindowChanges {
    let has = |bit: u16| req.value_mask & bit != 0;
    WindowChanges {
        x: has(config_mask::X).then_some(req.x as i32),
        y: has(config_mask::Y).then_some(req.y as i32),
        width: has(config_mask::WIDTH).then_some(req.width as u32),
        height: has(config_mask::HEIGHT).then_some(req.height as u32),
        border_width: has(config_mask::BORDER_WIDTH).then_some(req.border_width as u32),
        sibling: has(config_mask::SIBLING).then_some(req.sibling),
        stack_mode: has(config_mask::STACK_MODE).then_some(req.stack_mode),
    }
}

impl<C: XConn> WindowManager<C> {
    /// Decide where a new client's frame goes. `desired` holds the frame
    /// position and the content size.
    pub(crate) fn place_window(&mut self, handle: Handle) {
        let (bw, th) = self.decoration(handle);
        let workarea = self.workarea;
        let (px, py) = self.pointer;
        let Some(client) = self.clients.get(handle) else {
            return;
        };
        if client.window_type.keeps_position() {
            return;
        }

        let g = client.desired;
        let (outer_w, outer_h) = (g.width + 2 * bw, g.height + th + bw);
        let parent = self.clients.get(client.transient_for).map(|p| p.server);

        let placed = match client.placement {
            Placement::Center => workarea.centered(outer_w, outer_h),
            Placement::Mouse => Geometry::centered_at(px, py, outer_w, outer_h),
            Placement::Default => {
                if let Some(parent) = parent {
                    let (pbw, pth) = self.decoration(client.transient_for);
                    let parent_outer = Geometry::new(parent.x, parent.y, parent.width + 2 * pbw, parent.height + pth + pbw);
                    let centered = parent_outer.centered(outer_w, outer_h);
                    self.set_desired_position(handle, centered.x, centered.y);
                    return;
                }
                if client.hints.has_position() {
                    trace!("Keeping client-requested position {},{}", g.x, g.y);
                    return;
                }
                Geometry::new(g.x, g.y, outer_w, outer_h)
            }
        };

        let clamped = placed.clamped_into(&workarea);
        self.set_desired_position(handle, clamped.x, clamped.y);
    }

    fn set_desired_position(&mut self, handle: Handle, x: i32, y: i32) {
        if let Some(client) = self.clients.get_mut(handle) {
            client.desired.x = x;
            client.desired.y = y;
        }
    }

    pub(crate) fn handle_configure_request(&mut self, req: &ConfigureRequest) -> Result<()> {
        let Some(handle) = self.client_by_window(req.window) else {
            trace!("Forwarding configure request for unmanaged {:#x}", req.window);
            self.conn.configure_window(req.window, &forwarded_changes(req))?;
            return Ok(());
        };

        let has = |bit: u16| req.value_mask & bit != 0;
        let Some(client) = self.clients.get_mut(handle) else {
            return Ok(());
        };

        // A fullscreen client keeps its geometry; it still gets a synthetic
        // notify so it learns the request was considered.
        if !client.is_fullscreen() {
            if has(config_mask::X) {
                client.desired.x = req.x as i32;
            }
            if has(config_mask::Y) {
                client.desired.y = req.y as i32;
            }
            if has(config_mask::WIDTH) {
                client.desired.width = (req.width as u32).max(1);
            }
            if has(config_mask::HEIGHT) {
                client.desired.height = (req.height as u32).max(1);
            }
            let hints = client.hints;
            hints.constrain(&mut client.desired.width, &mut client.desired.height);
        }
        client.dirty |= Dirty::GEOM;
        debug!("WM: Configure request {:#x} -> {:?}", req.window, client.desired);

        if has(config_mask::STACK_MODE) && client.state == ClientState::Mapped {
            let sibling = if has(config_mask::SIBLING) { self.client_by_any(req.sibling) } else { None };
            match (sibling, req.stack_mode) {
                (Some(sibling), StackMode::Above) => self.stack_place_above(handle, sibling)?,
                (Some(sibling), StackMode::Below) => self.stack_place_below(handle, sibling)?,
                (None, StackMode::Above) => self.stack_raise(handle)?,
                (None, StackMode::Below) => self.stack_lower(handle)?,
            }
        }
        Ok(())
    }

    /// Track what the server reports: frames carry the position, client
    /// windows the content size.
    pub(crate) fn handle_configure_notify(&mut self, ev: &ConfigureNotify) {
        if ev.override_redirect {
            return;
        }
        if let Some(handle) = self.client_by_frame(ev.window) {
            if let Some(client) = self.clients.get_mut(handle) {
                client.server.x = ev.geometry.x;
                client.server.y = ev.geometry.y;
            }
        } else if let Some(handle) = self.client_by_window(ev.window) {
            if let Some(client) = self.clients.get_mut(handle) {
                if client.phase == crate::wm::client_flags::ManagePhase::Done {
                    client.server.width = ev.geometry.width;
                    client.server.height = ev.geometry.height;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wm::client_flags::WindowType;
    use crate::wm::fake::{FakeConn, Request};
    use crate::wm::harness::*;
    use crate::wm::xconn::XEvent;

    fn request(window: u32, mask: u16, x: i16, y: i16, w: u16, h: u16) -> ConfigureRequest {
        ConfigureRequest {
            window,
            parent: FakeConn::ROOT,
            sibling: 0,
            x,
            y,
            width: w,
            height: h,
            border_width: 0,
            stack_mode: StackMode::Above,
            value_mask: mask,
        }
    }

    #[test]
    fn offscreen_window_is_clamped_into_workarea() {
        let mut wm = test_wm();
        let h = wm.map_new(Geometry::new(1800, 1000, 400, 300));
        let g = wm.client(h).server;
        let (bw, th) = wm.decoration(h);
        assert!(g.x + (g.width + 2 * bw) as i32 <= 1920);
        assert!(g.y + (g.height + th + bw) as i32 <= 1080);
        assert_eq!((g.width, g.height), (400, 300));
    }

    #[test]
    fn transient_is_centered_over_parent() {
        let mut wm = test_wm();
        let parent = wm.map_new(Geometry::new(100, 100, 600, 400));
        let dialog = wm.conn.add_window(Geometry::new(0, 0, 200, 100), false, false);
        wm.conn.set_property(
            dialog,
            crate::wm::xconn::predefined::WM_TRANSIENT_FOR,
            crate::wm::xconn::PropertyReply::from_u32(crate::wm::xconn::predefined::WINDOW, &[wm.xid(parent)]),
        );
        let d = wm.request_map(dialog);
        let p = wm.client(parent).server;
        let g = wm.client(d).server;
        let (bw, th) = wm.decoration(d);
        let parent_center = p.x + (p.width + 2 * bw) as i32 / 2;
        let dialog_center = g.x + (g.width + 2 * bw) as i32 / 2;
        assert!((parent_center - dialog_center).abs() <= 1);
        assert!(g.y > p.y && g.y + (g.height + th) as i32 <= p.y + (p.height + th) as i32);
    }

    #[test]
    fn docks_keep_their_position() {
        let mut wm = test_wm();
        let h = wm.map_new(Geometry::new(0, 0, 100, 100));
        let c = wm.clients.get_mut(h).unwrap();
        c.window_type = WindowType::Dock;
        c.desired = Geometry::new(-50, -50, 1920, 30);
        wm.place_window(h);
        assert_eq!(wm.client(h).desired, Geometry::new(-50, -50, 1920, 30));
    }

    #[test]
    fn center_rule_uses_workarea() {
        let mut wm = test_wm();
        let h = wm.map_new(Geometry::new(0, 0, 100, 100));
        let c = wm.clients.get_mut(h).unwrap();
        c.placement = Placement::Center;
        c.desired = Geometry::new(0, 0, 196, 78);
        wm.place_window(h);
        let (bw, th) = wm.decoration(h);
        let d = wm.client(h).desired;
        assert_eq!(d.x, (1920 - (196 + 2 * bw) as i32) / 2);
        assert_eq!(d.y, (1080 - (78 + th + bw) as i32) / 2);
    }

    #[test]
    fn unmanaged_requests_are_forwarded_verbatim() {
        let mut wm = test_wm();
        let w = wm.conn.add_window(Geometry::new(0, 0, 50, 50), false, false);
        wm.conn.push_event(XEvent::ConfigureRequest(request(w, config_mask::X | config_mask::WIDTH, 30, 99, 80, 99)));
        wm.settle();
        let expected = WindowChanges { x: Some(30), width: Some(80), ..Default::default() };
        assert!(wm.conn.requests().contains(&Request::Configure(w, expected)));
    }

    #[test]
    fn managed_request_moves_frame_and_notifies_client() {
        let mut wm = test_wm();
        let h = wm.map_new(Geometry::new(0, 0, 300, 200));
        wm.conn.take_requests();
        let xid = wm.xid(h);
        wm.conn.push_event(XEvent::ConfigureRequest(request(
            xid,
            config_mask::X | config_mask::Y | config_mask::WIDTH,
            40,
            50,
            500,
            0,
        )));
        wm.settle();
        let (bw, th) = wm.decoration(h);
        assert_eq!(wm.client(h).server, Geometry::new(40, 50, 500, 200));
        assert_eq!(wm.conn.window_geometry(wm.frame(h)), Some(Geometry::new(40, 50, 500 + 2 * bw, 200 + th + bw)));
        let synthetic = Geometry::new(40 + bw as i32, 50 + th as i32, 500, 200);
        assert!(wm.conn.requests().contains(&Request::SyntheticConfigure(xid, synthetic)));
    }
}
