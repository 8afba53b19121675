//! Workspace Module
//!
//! Virtual desktops, sticky windows, iconify/restore, "show desktop" and the
//! workarea left over once docks have reserved their struts.

use anyhow::Result;
use tracing::{debug, info};

use crate::shared::Geometry;
use crate::wm::client_flags::{ClientFlags, ClientState, Dirty, ManagePhase, RootDirty, WindowType};
use crate::wm::ewmh::wm_state;
use crate::wm::slotmap::Handle;
use crate::wm::xconn::{XConn, predefined};
use crate::wm::WindowManager;

/// `_NET_WM_DESKTOP` value for windows shown on every desktop.
pub const ALL_DESKTOPS: u32 = 0xFFFF_FFFF;

/// Hard ceiling on `_NET_NUMBER_OF_DESKTOPS` requests.
const MAX_DESKTOPS: u32 = 32;

impl<C: XConn> WindowManager<C> {
    pub(crate) fn show_frame(&mut self, handle: Handle) -> Result<()> {
        let Some(client) = self.clients.get_mut(handle) else {
            return Ok(());
        };
        if client.frame_visible {
            return Ok(());
        }
        client.frame_visible = true;
        let frame = client.frame;
        self.conn.map_window(frame)?;
        Ok(())
    }

    /// Unmap the frame. The server reports the unmap back to us, so one
    /// UnmapNotify is marked as expected.
    pub(crate) fn hide_frame(&mut self, handle: Handle) -> Result<()> {
        let Some(client) = self.clients.get_mut(handle) else {
            return Ok(());
        };
        if !client.frame_visible {
            return Ok(());
        }
        client.frame_visible = false;
        client.ignore_unmap += 1;
        let frame = client.frame;
        self.conn.unmap_window(frame)?;
        Ok(())
    }

    /// Show or hide a mapped client's frame according to the current
    /// desktop and the "show desktop" mode.
    pub(crate) fn apply_visibility(&mut self, handle: Handle) -> Result<()> {
        let current = self.current_desktop;
        let Some(client) = self.clients.get(handle) else {
            return Ok(());
        };
        if client.state != ClientState::Mapped || client.phase != ManagePhase::Done {
            return Ok(());
        }
        let visible = client.is_visible_on(current) && !client.flags.contains(ClientFlags::SHOW_DESKTOP_HIDDEN);
        let xid = client.xid;
        if visible {
            self.show_frame(handle)?;
        } else {
            self.hide_frame(handle)?;
        }
        self.set_wm_state(xid, if visible { wm_state::NORMAL } else { wm_state::ICONIC })?;
        if let Some(client) = self.clients.get_mut(handle) {
            client.dirty |= Dirty::STATE;
        }
        Ok(())
    }

    pub(crate) fn publish_desktop_props(&self) -> Result<()> {
        let a = &self.atoms;
        let count = self.desktop_count;
        self.conn.change_property32(self.root, a.net_number_of_desktops, predefined::CARDINAL, &[count])?;
        self.conn.change_property32(self.root, a.net_current_desktop, predefined::CARDINAL, &[self.current_desktop])?;

        let mut names = Vec::new();
        for i in 0..count as usize {
            match self.config.desktop_names.get(i) {
                Some(name) => names.extend_from_slice(name.as_bytes()),
                None => names.extend_from_slice(format!("{}", i + 1).as_bytes()),
            }
            names.push(0);
        }
        self.conn.change_property8(self.root, a.net_desktop_names, a.utf8_string, &names)?;

        let viewport = vec![0u32; 2 * count as usize];
        self.conn.change_property32(self.root, a.net_desktop_viewport, predefined::CARDINAL, &viewport)?;
        let (w, h) = (self.screen.width, self.screen.height);
        self.conn.change_property32(self.root, a.net_desktop_geometry, predefined::CARDINAL, &[w, h])?;
        Ok(())
    }

    /// Screen minus the largest strut on each edge over all live clients.
    pub(crate) fn compute_workarea(&self) -> Geometry {
        let (mut left, mut right, mut top, mut bottom) = (0u32, 0u32, 0u32, 0u32);
        for (_, client, _) in self.clients.iter_live() {
            if client.phase != ManagePhase::Done || !client.is_active() {
                continue;
            }
            let s = &client.strut;
            left = left.max(s.left);
            right = right.max(s.right);
            top = top.max(s.top);
            bottom = bottom.max(s.bottom);
        }

        let screen = self.screen;
        if left + right >= screen.width || top + bottom >= screen.height {
            return screen;
        }
        Geometry::new(
            screen.x + left as i32,
            screen.y + top as i32,
            screen.width - left - right,
            screen.height - top - bottom,
        )
    }

    /// Recompute and publish `_NET_WORKAREA`; maximized clients follow a
    /// changed workarea.
    pub(crate) fn publish_workarea(&mut self) -> Result<()> {
        let workarea = self.compute_workarea();
        let entry = [workarea.x as u32, workarea.y as u32, workarea.width, workarea.height];
        let values: Vec<u32> = (0..self.desktop_count).flat_map(|_| entry).collect();
        self.conn.change_property32(self.root, self.atoms.net_workarea, predefined::CARDINAL, &values)?;

        if workarea != self.workarea {
            debug!("WM: Workarea {:?} -> {:?}", self.workarea, workarea);
            self.workarea = workarea;
            let handles = self.clients.handles();
            for handle in handles {
                self.apply_maximize_geometry(handle)?;
            }
        }
        Ok(())
    }

    /// Switch to desktop `n`. New windows are shown before old ones are
    /// hidden so the root never shows through.
    pub(crate) fn switch_workspace(&mut self, n: u32) -> Result<()> {
        if n >= self.desktop_count || n == self.current_desktop {
            return Ok(());
        }
        debug!("WM: Switching desktop {} -> {}", self.current_desktop, n);
        self.current_desktop = n;

        let handles = self.clients.handles();
        let (show, hide): (Vec<Handle>, Vec<Handle>) = handles
            .into_iter()
            .partition(|h| self.clients.get(*h).is_some_and(|c| c.is_visible_on(n)));
        for handle in show.into_iter().chain(hide) {
            self.apply_visibility(handle)?;
        }

        let keep = self.is_focusable(self.focused);
        if !keep {
            match self.focus_successor(Handle::INVALID) {
                Some(next) => self.set_focus(next)?,
                None => self.focus_none()?,
            }
        }
        self.root_dirty |= RootDirty::DESKTOPS;
        Ok(())
    }

    /// Step through desktops, wrapping at either end.
    pub(crate) fn switch_workspace_relative(&mut self, step: i32) -> Result<()> {
        let count = self.desktop_count as i32;
        let target = (self.current_desktop as i32 + step).rem_euclid(count);
        self.switch_workspace(target as u32)
    }

    pub(crate) fn move_client_to_workspace(&mut self, handle: Handle, n: u32, follow: bool) -> Result<()> {
        if n >= self.desktop_count {
            return Ok(());
        }
        let Some(client) = self.clients.get_mut(handle) else {
            return Ok(());
        };
        if client.desktop == n as i32 && !client.sticky {
            return Ok(());
        }
        client.desktop = n as i32;
        client.sticky = false;
        client.dirty |= Dirty::DESKTOP | Dirty::STATE;
        debug!("WM: Moved {:#x} to desktop {}", client.xid, n);

        if follow {
            self.switch_workspace(n)?;
            return self.set_focus(handle);
        }
        self.apply_visibility(handle)?;
        if self.focused == handle && !self.is_focusable(handle) {
            match self.focus_successor(handle) {
                Some(next) => self.set_focus(next)?,
                None => self.focus_none()?,
            }
        }
        Ok(())
    }

    /// Sticky windows show on every desktop; unsticking pins them to the
    /// current one.
    pub(crate) fn toggle_sticky(&mut self, handle: Handle) -> Result<()> {
        let current = self.current_desktop;
        let Some(client) = self.clients.get_mut(handle) else {
            return Ok(());
        };
        client.sticky = !client.sticky;
        client.desktop = if client.sticky { -1 } else { current as i32 };
        client.dirty |= Dirty::DESKTOP | Dirty::STATE;
        self.apply_visibility(handle)
    }

    pub(crate) fn iconify(&mut self, handle: Handle) -> Result<()> {
        let Some(client) = self.clients.get_mut(handle) else {
            return Ok(());
        };
        if client.state != ClientState::Mapped {
            return Ok(());
        }
        client.state = ClientState::Unmapped;
        client.dirty |= Dirty::STATE;
        let xid = client.xid;
        debug!("WM: Iconify {:#x}", xid);

        self.hide_frame(handle)?;
        self.stack_remove(handle);
        self.set_wm_state(xid, wm_state::ICONIC)?;
        if self.focused == handle {
            match self.focus_successor(handle) {
                Some(next) => self.set_focus(next)?,
                None => self.focus_none()?,
            }
        }
        Ok(())
    }

    pub(crate) fn restore(&mut self, handle: Handle) -> Result<()> {
        let Some(client) = self.clients.get_mut(handle) else {
            return Ok(());
        };
        if client.state != ClientState::Unmapped {
            return Ok(());
        }
        client.state = ClientState::Mapped;
        client.flags.remove(ClientFlags::SHOW_DESKTOP_HIDDEN);
        client.dirty |= Dirty::STATE | Dirty::FRAME_ALL;
        let xid = client.xid;
        debug!("WM: Restore {:#x}", xid);

        self.conn.map_window(xid)?;
        self.stack_raise(handle)?;
        self.apply_visibility(handle)
    }

    /// Enter or leave "show desktop": every normal window is hidden, and
    /// leaving brings back exactly the windows that mode hid.
    pub(crate) fn set_showing_desktop(&mut self, show: bool) -> Result<()> {
        if show == self.showing_desktop {
            return Ok(());
        }
        self.showing_desktop = show;
        info!("Showing desktop: {}", show);

        let handles = self.clients.handles();
        for handle in handles {
            let Some(client) = self.clients.get_mut(handle) else {
                continue;
            };
            if matches!(client.window_type, WindowType::Dock | WindowType::Desktop) {
                continue;
            }
            if show && client.state == ClientState::Mapped {
                client.flags.insert(ClientFlags::SHOW_DESKTOP_HIDDEN);
                self.iconify(handle)?;
            } else if !show && client.flags.contains(ClientFlags::SHOW_DESKTOP_HIDDEN) {
                self.restore(handle)?;
            }
        }

        if !show && !self.clients.live(self.focused) {
            if let Some(next) = self.focus_successor(Handle::INVALID) {
                self.set_focus(next)?;
            }
        }
        self.root_dirty |= RootDirty::SHOWING_DESKTOP;
        Ok(())
    }

    /// Change the desktop count. Clients on removed desktops move to the
    /// last remaining one.
    pub(crate) fn set_number_of_desktops(&mut self, n: u32) -> Result<()> {
        let n = n.clamp(1, MAX_DESKTOPS);
        if n == self.desktop_count {
            return Ok(());
        }
        info!("Number of desktops: {} -> {}", self.desktop_count, n);
        if self.current_desktop >= n {
            self.switch_workspace(n - 1)?;
        }
        self.desktop_count = n;

        let last = (n - 1) as i32;
        let handles = self.clients.handles();
        for handle in handles {
            if let Some(client) = self.clients.get_mut(handle) {
                if !client.sticky && client.desktop > last {
                    client.desktop = last;
                    client.dirty |= Dirty::DESKTOP;
                }
            }
            self.apply_visibility(handle)?;
        }
        self.root_dirty |= RootDirty::DESKTOPS | RootDirty::WORKAREA;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wm::fake::FakeConn;
    use crate::wm::harness::*;
    use crate::wm::xconn::XEvent;

    #[test]
    fn switching_hides_and_shows_frames() {
        let mut wm = test_wm();
        let a = wm.map_new(Geometry::new(0, 0, 300, 200));
        wm.move_client_to_workspace(a, 1, false).unwrap();
        wm.settle();
        assert!(!wm.conn.is_mapped(wm.frame(a)));
        assert_eq!(wm.conn.property32(wm.xid(a), wm.atoms.net_wm_desktop), vec![1]);
        assert_eq!(wm.conn.property32(wm.xid(a), wm.atoms.wm_state)[0], wm_state::ICONIC);

        let b = wm.map_new(Geometry::new(0, 0, 300, 200));
        wm.switch_workspace(1).unwrap();
        wm.settle();
        assert!(wm.conn.is_mapped(wm.frame(a)));
        assert!(!wm.conn.is_mapped(wm.frame(b)));
        assert_eq!(wm.focused, a);
        assert_eq!(wm.conn.property32(FakeConn::ROOT, wm.atoms.net_current_desktop), vec![1]);
        // The frame unmaps were expected, so nobody got unmanaged.
        assert!(wm.clients.live(a) && wm.clients.live(b));
        assert_eq!(wm.client(b).ignore_unmap, 0);
    }

    #[test]
    fn switch_by_message_hides_desktop_and_keeps_sticky() {
        let config = crate::config::Config { desktop_count: 2, ..Default::default() };
        let mut wm = test_wm_with(config);
        let a = wm.map_new(Geometry::new(0, 0, 300, 200));
        let b = wm.map_new(Geometry::new(50, 50, 300, 200));
        wm.toggle_sticky(b).unwrap();
        wm.settle();
        assert_eq!(wm.focused, a);

        let message_type = wm.atoms.net_current_desktop;
        wm.conn.push_event(XEvent::ClientMessage { window: FakeConn::ROOT, message_type, format: 32, data: [1, 0, 0, 0, 0] });
        wm.settle();
        assert!(!wm.conn.is_mapped(wm.frame(a)));
        assert!(wm.conn.is_mapped(wm.frame(b)));
        assert_eq!(wm.conn.property32(FakeConn::ROOT, wm.atoms.net_current_desktop), vec![1]);
        assert_eq!(wm.focused, b);
        assert_eq!(wm.conn.focused(), wm.xid(b));
        assert!(wm.clients.live(a));
    }

    #[test]
    fn sticky_windows_follow_every_switch() {
        let mut wm = test_wm();
        let h = wm.map_new(Geometry::new(0, 0, 300, 200));
        wm.toggle_sticky(h).unwrap();
        wm.settle();
        assert_eq!(wm.conn.property32(wm.xid(h), wm.atoms.net_wm_desktop), vec![ALL_DESKTOPS]);
        for n in [1, 2, 0] {
            wm.switch_workspace(n).unwrap();
            wm.settle();
            assert!(wm.conn.is_mapped(wm.frame(h)));
        }
        wm.switch_workspace(2).unwrap();
        wm.toggle_sticky(h).unwrap();
        wm.settle();
        assert_eq!(wm.client(h).desktop, 2);
    }

    #[test]
    fn relative_switch_wraps() {
        let mut wm = test_wm();
        let count = wm.desktop_count;
        wm.switch_workspace_relative(-1).unwrap();
        assert_eq!(wm.current_desktop, count - 1);
        wm.switch_workspace_relative(1).unwrap();
        assert_eq!(wm.current_desktop, 0);
    }

    #[test]
    fn show_desktop_round_trip_restores_only_what_it_hid() {
        let mut wm = test_wm();
        let a = wm.map_new(Geometry::new(0, 0, 300, 200));
        let b = wm.map_new(Geometry::new(0, 0, 300, 200));
        wm.iconify(b).unwrap();
        wm.settle();

        wm.set_showing_desktop(true).unwrap();
        wm.settle();
        assert_eq!(wm.client(a).state, ClientState::Unmapped);
        assert_eq!(wm.conn.property32(FakeConn::ROOT, wm.atoms.net_showing_desktop), vec![1]);

        let message_type = wm.atoms.net_showing_desktop;
        wm.conn.push_event(XEvent::ClientMessage { window: FakeConn::ROOT, message_type, format: 32, data: [0; 5] });
        wm.settle();
        assert_eq!(wm.client(a).state, ClientState::Mapped);
        assert!(wm.conn.is_mapped(wm.frame(a)));
        assert_eq!(wm.client(b).state, ClientState::Unmapped);
        assert_eq!(wm.conn.property32(FakeConn::ROOT, wm.atoms.net_showing_desktop), vec![0]);
    }

    #[test]
    fn desktop_names_are_nul_separated() {
        let wm = test_wm();
        let names = wm.conn.property(FakeConn::ROOT, wm.atoms.net_desktop_names).unwrap();
        let count = names.value.iter().filter(|b| **b == 0).count();
        assert_eq!(count as u32, wm.desktop_count);
        assert_eq!(names.type_, wm.atoms.utf8_string);
    }

    #[test]
    fn shrinking_desktops_moves_clients() {
        let mut wm = test_wm();
        let h = wm.map_new(Geometry::new(0, 0, 300, 200));
        wm.move_client_to_workspace(h, 3, false).unwrap();
        let message_type = wm.atoms.net_number_of_desktops;
        wm.conn.push_event(XEvent::ClientMessage { window: FakeConn::ROOT, message_type, format: 32, data: [2, 0, 0, 0, 0] });
        wm.settle();
        assert_eq!(wm.desktop_count, 2);
        assert_eq!(wm.client(h).desktop, 1);
        assert_eq!(wm.conn.property32(FakeConn::ROOT, wm.atoms.net_number_of_desktops), vec![2]);
        assert_eq!(wm.conn.property32(FakeConn::ROOT, wm.atoms.net_workarea).len(), 8);
    }

    #[test]
    fn overlapping_struts_leave_screen_workarea() {
        let mut wm = test_wm();
        let h = wm.map_new(Geometry::new(0, 0, 300, 200));
        wm.clients.get_mut(h).unwrap().strut.top = 2000;
        assert_eq!(wm.compute_workarea(), wm.screen);
        wm.clients.get_mut(h).unwrap().strut.top = 40;
        wm.clients.get_mut(h).unwrap().strut.left = 64;
        assert_eq!(wm.compute_workarea(), Geometry::new(64, 40, 1920 - 64, 1040));
    }
}
