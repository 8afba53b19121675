//! Tick Driver
//!
//! One iteration of the main loop: timers, reply draining, event ingestion,
//! the processing stages in a fixed order, and a single flush. Only
//! [`WindowManager::wait_for_events`] blocks.

use std::time::Instant;

use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::wm::client_flags::{ClientState, Dirty, RootDirty};
use crate::wm::events::ButtonEvent;
use crate::wm::slotmap::Handle;
use crate::wm::xconn::XConn;
use crate::wm::WindowManager;
use crate::x11_async::{Readiness, XPoller};

/// Why [`WindowManager::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    Shutdown,
    Restart,
}

impl<C: XConn> WindowManager<C> {
    /// Drive the manager until a shutdown or restart is requested.
    pub fn run(&mut self, poller: &mut XPoller) -> RunExit {
        loop {
            if self.flags.shutdown_requested() {
                info!("Shutdown requested");
                return RunExit::Shutdown;
            }
            if self.flags.restart_requested() {
                info!("Restart requested");
                return RunExit::Restart;
            }
            if self.flags.take_reload() {
                self.apply_reload();
                continue;
            }
            if self.flags.take_dump_stats() {
                self.stats.dump();
            }

            let x_ready = self.wait_for_events(poller);
            self.tick_once(x_ready);
        }
    }

    /// Block until there is something to do. Returns whether the display
    /// socket should be read.
    pub(crate) fn wait_for_events(&mut self, poller: &mut XPoller) -> bool {
        if self.prefetched.is_some() {
            return false;
        }
        match self.conn.poll_queued_event() {
            Ok(Some(event)) => {
                self.prefetched = Some(event);
                return false;
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Lost connection to the X server: {}", e);
                self.flags.request_shutdown();
                return false;
            }
        }

        if let Err(e) = self.conn.flush() {
            warn!("Failed to flush before waiting: {}", e);
            self.flags.request_shutdown();
            return false;
        }
        if self.cookies.has_pending() {
            return true;
        }

        let timeout = self.next_deadline().map(|d| d.saturating_duration_since(Instant::now()));
        match poller.wait(timeout) {
            Ok(Readiness::Readable) => true,
            Ok(Readiness::Idle) => false,
            Ok(Readiness::Closed) => {
                warn!("X server closed the connection");
                self.flags.request_shutdown();
                false
            }
            Err(e) => {
                warn!("Waiting on the display failed: {:#}", e);
                self.flags.request_shutdown();
                false
            }
        }
    }

    /// Earliest scheduled timer: the interaction throttle or a late probe.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        let probes = self.clients.iter_live().filter_map(|(_, c, _)| c.manage_deadline);
        probes.chain(self.interaction.deadline()).min()
    }

    /// Run one full tick. `x_ready` allows reading fresh events from the
    /// socket; already queued events are always consumed.
    pub fn tick_once(&mut self, x_ready: bool) {
        let started = Instant::now();

        self.run_timers(started);
        self.drain_replies();
        self.ingest(x_ready);
        self.process_events(started);
        self.flush_dirty();

        if let Err(e) = self.conn.flush() {
            warn!("Failed to flush requests: {}", e);
            self.flags.request_shutdown();
        }
        self.stats.x_flushes += 1;
        self.stats.record_tick(started.elapsed());
    }

    fn run_timers(&mut self, now: Instant) {
        self.interaction_timer(now);

        let late: Vec<Handle> = self
            .clients
            .iter_live()
            .filter(|(_, c, _)| c.state == ClientState::New && c.manage_deadline.is_some_and(|d| d <= now))
            .map(|(h, _, _)| h)
            .collect();
        for handle in late {
            self.stats.late_probes += 1;
            let Some(client) = self.clients.get_mut(handle) else {
                continue;
            };
            client.manage_deadline = None;
            let (xid, aborted, pending) = (client.xid, client.manage_aborted, client.pending_replies);
            if aborted {
                debug!("WM: Late probe drops {:#x}", xid);
                self.abort_manage(handle);
                continue;
            }
            warn!("Window {:#x} still has {} replies outstanding, managing with what arrived", xid, pending);
            if let Err(e) = self.finish_manage(handle) {
                warn!("Failed to finish managing {:#x}: {:#}", xid, e);
            }
        }
    }

    /// Run every processing stage over the current buckets. Each stage
    /// logs its own failures and never stops the ones after it.
    fn process_events(&mut self, now: Instant) {
        let b = &mut self.buckets;
        if b.ingested == 0 {
            return;
        }
        trace!("Tick: {} events, {} coalesced", b.ingested, b.coalesced);

        let destroys = std::mem::take(&mut b.destroy_notifies);
        let unmaps = std::mem::take(&mut b.unmap_notifies);
        let maps = std::mem::take(&mut b.map_requests);
        let keys = std::mem::take(&mut b.key_presses);
        let buttons = std::mem::take(&mut b.button_events);
        let exposes = std::mem::take(&mut b.exposes);
        let messages = std::mem::take(&mut b.client_messages);
        let motion = std::mem::take(&mut b.motion);
        let enter = b.enter.take();
        let configure_requests = std::mem::take(&mut b.configure_requests);
        let configure_notifies = std::mem::take(&mut b.configure_notifies);
        let properties = std::mem::take(&mut b.property_notifies);
        let damage = std::mem::take(&mut b.damage);

        // Lifecycle. A window destroyed this tick skips its map and unmap.
        for (window, _parent) in maps {
            if self.buckets.is_destroyed(window) {
                trace!("Map request for {:#x} superseded by its destroy", window);
                continue;
            }
            if let Err(e) = self.handle_map_request(window) {
                warn!("Failed to handle map request for {:#x}: {:#}", window, e);
            }
        }
        for (event, window) in unmaps {
            if self.buckets.is_destroyed(window) {
                continue;
            }
            if let Err(e) = self.handle_unmap_notify(event, window) {
                warn!("Failed to handle unmap of {:#x}: {:#}", window, e);
            }
        }
        for window in destroys {
            if let Err(e) = self.handle_destroy_notify(window) {
                warn!("Failed to handle destroy of {:#x}: {:#}", window, e);
            }
        }

        for ev in keys {
            if let Err(e) = self.handle_key_press(&ev) {
                warn!("Failed to handle key press: {:#}", e);
            }
        }

        for button in buttons {
            let result = match button {
                ButtonEvent::Press(ev) => self.handle_button_press(&ev),
                ButtonEvent::Release(ev) => self.handle_button_release(&ev),
            };
            if let Err(e) = result {
                warn!("Failed to handle button event: {:#}", e);
            }
        }

        for (window, region) in exposes {
            if self.menu.is_visible() && window == self.menu.window {
                if let Err(e) = self.menu_redraw() {
                    warn!("Failed to redraw menu: {:#}", e);
                }
                continue;
            }
            if let Some(handle) = self.client_by_frame(window) {
                if let Some(client) = self.clients.get_mut(handle) {
                    client.frame_damage.union(&region);
                }
            }
        }

        for msg in messages {
            if let Err(e) = self.handle_client_message(&msg) {
                warn!("Failed to handle client message for {:#x}: {:#}", msg.window, e);
            }
        }

        if let Some(ev) = enter {
            self.pointer = (ev.root_x as i32, ev.root_y as i32);
        }
        for ev in motion.values() {
            if let Err(e) = self.handle_motion(ev, now) {
                warn!("Failed to handle motion: {:#}", e);
            }
        }

        for req in configure_requests.values() {
            if let Err(e) = self.handle_configure_request(req) {
                warn!("Failed to handle configure request for {:#x}: {:#}", req.window, e);
            }
        }
        for ev in configure_notifies.values() {
            self.handle_configure_notify(ev);
        }

        for (&(window, atom), &deleted) in &properties {
            if let Err(e) = self.handle_property_notify(window, atom, deleted) {
                warn!("Failed to handle property {} on {:#x}: {:#}", atom, window, e);
            }
        }

        for (window, region) in damage {
            let Some(handle) = self.client_by_window(window) else {
                continue;
            };
            let Some(client) = self.clients.get_mut(handle) else {
                continue;
            };
            client.damage_region.union(&region);
            let id = client.damage;
            if let Err(e) = self.conn.damage_subtract(id) {
                warn!("Failed to acknowledge damage on {:#x}: {}", window, e);
            }
        }
    }

    /// Re-read the configuration file and apply it. A file that fails to
    /// load leaves the running configuration untouched.
    pub(crate) fn apply_reload(&mut self) {
        info!("Reloading configuration");
        match Config::load() {
            Ok(config) => self.apply_config(config),
            Err(e) => warn!("Keeping current configuration: {:#}", e),
        }
    }

    pub(crate) fn apply_config(&mut self, config: Config) {
        let desktops = config.desktop_count;
        self.bindings = config.key_bindings();
        self.rules = config.app_rules();
        self.config = config;

        if self.menu.is_visible() {
            if let Err(e) = self.menu_hide() {
                warn!("Failed to hide menu: {:#}", e);
            }
        }
        self.renderer.release(&self.conn);
        if let Err(e) = self.renderer.init(&self.conn, self.root, &self.config.theme) {
            warn!("Failed to rebuild decoration resources: {}", e);
        }
        self.setup_keys();

        for handle in self.clients.handles() {
            if let Some(client) = self.clients.get_mut(handle) {
                client.dirty |= Dirty::FRAME_STYLE | Dirty::GEOM;
            }
        }
        if let Err(e) = self.set_number_of_desktops(desktops) {
            warn!("Failed to apply desktop count: {:#}", e);
        }
        self.root_dirty |= RootDirty::DESKTOPS | RootDirty::WORKAREA;
        self.flush_dirty();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use crate::config::Config;
    use crate::shared::Geometry;
    use crate::wm::client_flags::ClientState;
    use crate::wm::fake::{FakeConn, Request};
    use crate::wm::harness::*;
    use crate::wm::xconn::{PointerEvent, XEvent};

    #[test]
    fn destroy_in_same_tick_supersedes_map_request() {
        let mut wm = test_wm();
        let window = wm.conn.add_window(Geometry::new(0, 0, 200, 100), false, false);
        wm.conn.push_event(XEvent::MapRequest { window, parent: FakeConn::ROOT });
        wm.conn.push_event(XEvent::DestroyNotify { event: FakeConn::ROOT, window });
        wm.settle();
        assert!(wm.client_by_window(window).is_none());
        assert!(wm.clients.is_empty());
        assert!(!wm.conn.requests().iter().any(|r| matches!(r, Request::Reparent { window: w, .. } if *w == window)));
    }

    #[test]
    fn withdraw_then_destroy_skips_the_unmap() {
        let mut wm = test_wm();
        let h = wm.map_new(Geometry::new(0, 0, 200, 100));
        let window = wm.xid(h);
        wm.conn.take_requests();

        wm.conn.remove_window(window);
        wm.conn.push_event(XEvent::UnmapNotify { event: FakeConn::ROOT, window });
        wm.conn.push_event(XEvent::DestroyNotify { event: FakeConn::ROOT, window });
        wm.tick_once(true);
        assert!(wm.clients.is_empty());
        // A destroyed window is never reparented back to the root.
        assert!(!wm.conn.requests().iter().any(|r| matches!(r, Request::Reparent { window: w, .. } if *w == window)));
    }

    #[test]
    fn late_probe_finishes_a_stalled_manage() {
        let mut wm = test_wm();
        wm.conn.set_hold_replies(true);
        let window = wm.conn.add_window(Geometry::new(0, 0, 200, 100), false, false);
        wm.conn.push_event(XEvent::MapRequest { window, parent: FakeConn::ROOT });
        wm.tick_once(true);
        let h = wm.client_by_window(window).unwrap();
        assert_eq!(wm.client(h).state, ClientState::New);
        assert!(wm.next_deadline().is_some());

        wm.clients.get_mut(h).unwrap().manage_deadline = Some(Instant::now());
        wm.tick_once(true);
        assert_eq!(wm.client(h).state, ClientState::Mapped);
        assert_eq!(wm.stats.late_probes, 1);
        assert!(wm.conn.is_mapped(wm.frame(h)));
    }

    #[test]
    fn expose_on_frame_repaints_once_per_tick() {
        let mut wm = test_wm();
        let h = wm.map_new(Geometry::new(0, 0, 300, 200));
        let frame = wm.frame(h);
        wm.conn.take_requests();
        for x in [0, 10, 20] {
            wm.conn.push_event(XEvent::Expose { window: frame, x, y: 0, width: 10, height: 10, count: 0 });
        }
        wm.tick_once(true);
        let clips = wm.conn.requests().iter().filter(|r| matches!(r, Request::SetClip(_, Some(_)))).count();
        assert_eq!(clips, 1);
        assert_eq!(wm.buckets.coalesced, 2);
    }

    #[test]
    fn each_tick_flushes_once() {
        let mut wm = test_wm();
        let before = wm.stats.x_flushes;
        wm.tick_once(false);
        wm.tick_once(false);
        assert_eq!(wm.stats.x_flushes, before + 2);
        assert!(wm.stats.ticks >= 2);
    }

    #[test]
    fn enter_updates_pointer_position() {
        let mut wm = test_wm();
        wm.conn.push_event(XEvent::EnterNotify(PointerEvent {
            root: FakeConn::ROOT,
            event: FakeConn::ROOT,
            child: 0,
            root_x: 123,
            root_y: 45,
            event_x: 123,
            event_y: 45,
            state: 0,
            detail: 0,
            time: 0,
        }));
        wm.tick_once(true);
        assert_eq!(wm.pointer, (123, 45));
    }

    #[test]
    fn reload_restyles_every_client() {
        let mut wm = test_wm();
        let h = wm.map_new(Geometry::new(0, 0, 300, 200));
        wm.conn.take_requests();
        let mut config = Config::default();
        config.theme.border_width = 5;
        config.desktop_count = 2;
        wm.apply_config(config);

        assert_eq!(wm.decoration(h).0, 5);
        assert_eq!(wm.desktop_count, 2);
        let frame = wm.frame(h);
        assert!(wm.conn.requests().iter().any(|r| matches!(r, Request::Configure(w, _) if *w == frame)));
        assert_eq!(wm.conn.property32(FakeConn::ROOT, wm.atoms.net_number_of_desktops), vec![2]);
    }
}
