//! Dirty Flush Module
//!
//! Every change made while handling a tick only marks state dirty. This pass
//! runs once at the end of the tick and turns the accumulated bits into the
//! minimal set of requests.

use anyhow::Result;
use tracing::{trace, warn};

use crate::shared::Geometry;
use crate::wm::client_flags::{ClientState, Dirty, ManagePhase, RootDirty};
use crate::wm::slotmap::Handle;
use crate::wm::workspace::ALL_DESKTOPS;
use crate::wm::xconn::{WindowChanges, XConn, predefined};
use crate::wm::WindowManager;

impl<C: XConn> WindowManager<C> {
    /// Flush root properties and every dirty client. Failures are logged
    /// and the remaining work still runs.
    pub(crate) fn flush_dirty(&mut self) {
        // Workarea first: a new workarea can dirty maximized clients.
        let early = self.root_dirty & (RootDirty::WORKAREA | RootDirty::DESKTOPS);
        self.root_dirty.remove(early);
        if early.contains(RootDirty::WORKAREA) {
            if let Err(e) = self.publish_workarea() {
                warn!("Failed to publish workarea: {:#}", e);
            }
        }
        if early.contains(RootDirty::DESKTOPS) {
            if let Err(e) = self.publish_desktop_props() {
                warn!("Failed to publish desktop properties: {:#}", e);
            }
        }

        for handle in self.clients.handles() {
            if let Err(e) = self.flush_client(handle) {
                warn!("Failed to flush client {:?}: {:#}", handle, e);
            }
        }

        self.flush_root();
    }

    fn flush_client(&mut self, handle: Handle) -> Result<()> {
        let Some(client) = self.clients.get_mut(handle) else {
            return Ok(());
        };
        if client.phase != ManagePhase::Done || !client.is_active() {
            return Ok(());
        }
        let dirty = std::mem::take(&mut client.dirty);
        let expose = std::mem::take(&mut client.frame_damage);
        let (xid, state, sticky, desktop) = (client.xid, client.state, client.sticky, client.desktop);
        if dirty.is_empty() && !expose.valid {
            return Ok(());
        }
        trace!("Flushing {:#x}: {:?}", xid, dirty);

        if dirty.contains(Dirty::GEOM) {
            self.flush_geometry(handle)?;
        }
        if dirty.contains(Dirty::TITLE) {
            self.refresh_property(handle, predefined::WM_NAME)?;
            self.refresh_property(handle, self.atoms.net_wm_name)?;
        }
        if dirty.contains(Dirty::HINTS) {
            self.refresh_property(handle, predefined::WM_HINTS)?;
            self.refresh_property(handle, predefined::WM_NORMAL_HINTS)?;
            self.refresh_property(handle, self.atoms.motif_wm_hints)?;
        }
        if dirty.contains(Dirty::STRUT) {
            self.refresh_property(handle, self.atoms.net_wm_strut)?;
            self.refresh_property(handle, self.atoms.net_wm_strut_partial)?;
        }
        if dirty.contains(Dirty::STACK) && state == ClientState::Mapped {
            self.stack_move_to_layer(handle)?;
        }
        if dirty.contains(Dirty::STATE) {
            self.publish_net_wm_state(handle)?;
            self.publish_allowed_actions(handle)?;
        }
        if dirty.contains(Dirty::DESKTOP) {
            let value = if sticky { ALL_DESKTOPS } else { desktop.max(0) as u32 };
            self.conn.change_property32(xid, self.atoms.net_wm_desktop, predefined::CARDINAL, &[value])?;
        }

        if dirty.intersects(Dirty::FRAME_ANY | Dirty::GEOM) {
            self.redraw_frame(handle, None)?;
        } else if let Some(clip) = expose.to_geometry() {
            self.redraw_frame(handle, Some(clip))?;
        }
        Ok(())
    }

    /// Converge the server on `desired`: frame first, then the client
    /// inside it, then the synthetic notify ICCCM requires.
    fn flush_geometry(&mut self, handle: Handle) -> Result<()> {
        let (bw, th) = self.decoration(handle);
        let Some(client) = self.clients.get(handle) else {
            return Ok(());
        };
        let (xid, frame, g) = (client.xid, client.frame, client.desired);

        let outer = Geometry::new(g.x, g.y, g.width + 2 * bw, g.height + th + bw);
        self.conn.configure_window(frame, &WindowChanges::geometry(outer))?;
        let inner = Geometry::new(bw as i32, th as i32, g.width, g.height);
        self.conn.configure_window(xid, &WindowChanges { border_width: Some(0), ..WindowChanges::geometry(inner) })?;
        self.publish_frame_extents(handle)?;

        if let Some(client) = self.clients.get_mut(handle) {
            client.server = g;
        }
        let root_relative = Geometry::new(g.x + bw as i32, g.y + th as i32, g.width, g.height);
        self.conn.send_configure_notify(xid, root_relative)?;
        Ok(())
    }

    /// Each root property is written on its own; one failure does not
    /// drop the others.
    fn flush_root(&mut self) {
        let dirty = std::mem::take(&mut self.root_dirty);
        let writes: [(RootDirty, &str, fn(&Self) -> Result<()>); 4] = [
            (RootDirty::ACTIVE_WINDOW, "_NET_ACTIVE_WINDOW", Self::publish_active_window),
            (RootDirty::CLIENT_LIST, "_NET_CLIENT_LIST", Self::publish_client_list),
            (RootDirty::CLIENT_LIST_STACKING, "_NET_CLIENT_LIST_STACKING", Self::publish_client_list_stacking),
            (RootDirty::SHOWING_DESKTOP, "_NET_SHOWING_DESKTOP", Self::publish_showing_desktop),
        ];
        for (bit, name, write) in writes {
            if dirty.contains(bit) {
                if let Err(e) = write(self) {
                    warn!("Failed to update {}: {:#}", name, e);
                }
            }
        }
    }

    /// No focused client means no active window: the property is removed.
    fn publish_active_window(&self) -> Result<()> {
        let a = &self.atoms;
        match self.clients.get(self.focused) {
            Some(client) => self.conn.change_property32(self.root, a.net_active_window, predefined::WINDOW, &[client.xid])?,
            None => self.conn.delete_property(self.root, a.net_active_window)?,
        }
        Ok(())
    }

    fn publish_client_list(&self) -> Result<()> {
        let list: Vec<u32> = self
            .clients
            .iter_live()
            .filter(|(_, c, _)| c.phase == ManagePhase::Done && c.is_active())
            .map(|(_, c, _)| c.xid)
            .collect();
        self.conn.change_property32(self.root, self.atoms.net_client_list, predefined::WINDOW, &list)?;
        Ok(())
    }

    fn publish_client_list_stacking(&self) -> Result<()> {
        // Clients outside every layer (iconified) sit at the bottom.
        let stacked = self.stacking_order();
        let mut list: Vec<u32> = self
            .clients
            .iter_live()
            .filter(|(h, c, _)| c.phase == ManagePhase::Done && c.is_active() && !stacked.contains(h))
            .map(|(_, c, _)| c.xid)
            .collect();
        list.extend(stacked.iter().filter_map(|h| self.clients.get(*h)).map(|c| c.xid));
        self.conn.change_property32(self.root, self.atoms.net_client_list_stacking, predefined::WINDOW, &list)?;
        Ok(())
    }

    fn publish_showing_desktop(&self) -> Result<()> {
        let value = u32::from(self.showing_desktop);
        self.conn.change_property32(self.root, self.atoms.net_showing_desktop, predefined::CARDINAL, &[value])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::shared::Geometry;
    use crate::wm::client_flags::{Dirty, RootDirty};
    use crate::wm::fake::{FakeConn, Request};
    use crate::wm::harness::*;
    use crate::wm::xconn::{WindowChanges, XEvent};

    #[test]
    fn repeated_marks_flush_once() {
        let mut wm = test_wm();
        let h = wm.map_new(Geometry::new(0, 0, 300, 200));
        wm.conn.take_requests();
        for width in [310, 320, 330] {
            let c = wm.clients.get_mut(h).unwrap();
            c.desired.width = width;
            c.dirty |= Dirty::GEOM;
        }
        wm.flush_dirty();
        let frame = wm.frame(h);
        let configures = wm.conn.requests().iter().filter(|r| matches!(r, Request::Configure(w, _) if *w == frame)).count();
        assert_eq!(configures, 1);
        assert_eq!(wm.client(h).server.width, 330);
        assert!(wm.client(h).dirty.is_empty());
    }

    #[test]
    fn clean_tick_sends_nothing() {
        let mut wm = test_wm();
        wm.map_new(Geometry::new(0, 0, 300, 200));
        wm.conn.take_requests();
        wm.flush_dirty();
        assert!(wm.conn.requests().is_empty());
    }

    #[test]
    fn client_sits_inside_frame_decorations() {
        let mut wm = test_wm();
        let h = wm.map_new(Geometry::new(50, 60, 300, 200));
        wm.conn.take_requests();
        wm.clients.get_mut(h).unwrap().dirty |= Dirty::GEOM;
        wm.flush_dirty();
        let (bw, th) = wm.decoration(h);
        let g = wm.client(h).server;
        let inner = WindowChanges { border_width: Some(0), ..WindowChanges::geometry(Geometry::new(bw as i32, th as i32, g.width, g.height)) };
        assert!(wm.conn.requests().contains(&Request::Configure(wm.xid(h), inner)));
    }

    #[test]
    fn stacking_list_puts_iconified_first() {
        let mut wm = test_wm();
        let a = wm.map_new(Geometry::new(0, 0, 300, 200));
        let b = wm.map_new(Geometry::new(0, 0, 300, 200));
        wm.iconify(b).unwrap();
        wm.root_dirty |= RootDirty::CLIENT_LIST | RootDirty::CLIENT_LIST_STACKING;
        wm.flush_dirty();
        let stacking = wm.conn.property32(FakeConn::ROOT, wm.atoms.net_client_list_stacking);
        assert_eq!(stacking, vec![wm.xid(b), wm.xid(a)]);
        let list = wm.conn.property32(FakeConn::ROOT, wm.atoms.net_client_list);
        assert_eq!(list, vec![wm.xid(a), wm.xid(b)]);
    }

    #[test]
    fn losing_the_last_client_removes_active_window() {
        let mut wm = test_wm();
        let h = wm.map_new(Geometry::new(0, 0, 300, 200));
        let window = wm.xid(h);
        assert_eq!(wm.conn.property32(FakeConn::ROOT, wm.atoms.net_active_window), vec![window]);

        wm.conn.remove_window(window);
        wm.conn.push_event(XEvent::DestroyNotify { event: FakeConn::ROOT, window });
        wm.settle();
        assert!(wm.conn.property(FakeConn::ROOT, wm.atoms.net_active_window).is_none());
        assert!(wm.conn.requests().contains(&Request::DeleteProperty(FakeConn::ROOT, wm.atoms.net_active_window)));
    }

    #[test]
    fn failed_root_write_keeps_flushing_the_rest() {
        let mut wm = test_wm();
        let a = wm.map_new(Geometry::new(0, 0, 300, 200));
        let b = wm.map_new(Geometry::new(0, 0, 300, 200));
        wm.conn.fail_property_writes(wm.atoms.net_active_window);

        wm.root_dirty |= RootDirty::ACTIVE_WINDOW | RootDirty::CLIENT_LIST | RootDirty::CLIENT_LIST_STACKING;
        wm.flush_dirty();
        let list = wm.conn.property32(FakeConn::ROOT, wm.atoms.net_client_list);
        assert_eq!(list, vec![wm.xid(a), wm.xid(b)]);
        assert_eq!(wm.conn.property32(FakeConn::ROOT, wm.atoms.net_client_list_stacking).len(), 2);
        assert!(wm.root_dirty.is_empty());
    }
}
