//! Event ingestion and per-tick coalescing
//!
//! Every tick starts with empty buckets. Events read from the connection are
//! sorted into them: lifecycle and input events keep their arrival order,
//! while redraw, geometry and property traffic is merged per window so each
//! stage does the work once no matter how many events arrived.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, trace, warn};

use crate::shared::DirtyRegion;
use crate::wm::stats::Stats;
use crate::wm::xconn::{Atom, ConfigureRequest, PointerEvent, Window, XConn, XEvent, config_mask};
use crate::wm::WindowManager;

/// Upper bound on events read per tick; the rest wait for the next one.
pub const MAX_EVENTS_PER_TICK: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    Press(PointerEvent),
    Release(PointerEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigureNotify {
    pub window: Window,
    pub geometry: crate::shared::Geometry,
    pub border_width: u16,
    pub override_redirect: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientMessage {
    pub window: Window,
    pub message_type: Atom,
    pub format: u8,
    pub data: [u32; 5],
}

#[derive(Debug, Default)]
pub struct EventBuckets {
    /// `(window, parent)`
    pub map_requests: Vec<(Window, Window)>,
    /// `(event, window)`
    pub unmap_notifies: Vec<(Window, Window)>,
    pub destroy_notifies: Vec<Window>,
    pub key_presses: Vec<PointerEvent>,
    pub button_events: Vec<ButtonEvent>,
    pub client_messages: Vec<ClientMessage>,

    pub exposes: BTreeMap<Window, DirtyRegion>,
    pub configure_requests: BTreeMap<Window, ConfigureRequest>,
    pub configure_notifies: BTreeMap<Window, ConfigureNotify>,
    /// First notify per `(window, atom)`; the property is re-read anyway.
    pub property_notifies: BTreeMap<(Window, Atom), bool>,
    /// Last motion per event window
    pub motion: BTreeMap<Window, PointerEvent>,
    pub damage: BTreeMap<Window, DirtyRegion>,

    pub enter: Option<PointerEvent>,
    pub leave: Option<PointerEvent>,

    pub destroyed: HashSet<Window>,

    pub ingested: usize,
    pub coalesced: usize,
}

impl EventBuckets {
    pub fn reset(&mut self) {
        self.map_requests.clear();
        self.unmap_notifies.clear();
        self.destroy_notifies.clear();
        self.key_presses.clear();
        self.button_events.clear();
        self.client_messages.clear();
        self.exposes.clear();
        self.configure_requests.clear();
        self.configure_notifies.clear();
        self.property_notifies.clear();
        self.motion.clear();
        self.damage.clear();
        self.enter = None;
        self.leave = None;
        self.destroyed.clear();
        self.ingested = 0;
        self.coalesced = 0;
    }

    pub fn is_destroyed(&self, window: Window) -> bool {
        self.destroyed.contains(&window)
    }

    /// Sort one event into its bucket, counting it and any merge.
    pub fn ingest(&mut self, event: XEvent, stats: &mut Stats) {
        let kind = event.kind();
        stats.seen(kind);
        self.ingested += 1;

        let merged = match event {
            XEvent::MapRequest { window, parent } => {
                self.map_requests.push((window, parent));
                false
            }
            XEvent::UnmapNotify { event, window } => {
                self.unmap_notifies.push((event, window));
                false
            }
            XEvent::DestroyNotify { window, .. } => {
                self.destroyed.insert(window);
                // Anything the window asked for earlier this tick is moot.
                self.configure_requests.remove(&window);
                self.destroy_notifies.push(window);
                false
            }
            XEvent::KeyPress(ev) => {
                self.key_presses.push(ev);
                false
            }
            XEvent::ButtonPress(ev) => {
                self.button_events.push(ButtonEvent::Press(ev));
                false
            }
            XEvent::ButtonRelease(ev) => {
                self.button_events.push(ButtonEvent::Release(ev));
                false
            }
            XEvent::ClientMessage { window, message_type, format, data } => {
                self.client_messages.push(ClientMessage { window, message_type, format, data });
                false
            }
            XEvent::Expose { window, x, y, width, height, .. } => {
                let region = DirtyRegion::make(x as i16, y as i16, width, height);
                match self.exposes.get_mut(&window) {
                    Some(existing) => {
                        existing.union(&region);
                        true
                    }
                    None => {
                        self.exposes.insert(window, region);
                        false
                    }
                }
            }
            XEvent::DamageNotify { drawable, area, .. } => {
                let region =
                    DirtyRegion::make(area.x as i16, area.y as i16, area.width as u16, area.height as u16);
                match self.damage.get_mut(&drawable) {
                    Some(existing) => {
                        existing.union(&region);
                        true
                    }
                    None => {
                        self.damage.insert(drawable, region);
                        false
                    }
                }
            }
            XEvent::ConfigureRequest(req) => match self.configure_requests.get_mut(&req.window) {
                Some(existing) => {
                    merge_configure_request(existing, &req);
                    true
                }
                None => {
                    self.configure_requests.insert(req.window, req);
                    false
                }
            },
            XEvent::ConfigureNotify { window, geometry, border_width, override_redirect } => self
                .configure_notifies
                .insert(window, ConfigureNotify { window, geometry, border_width, override_redirect })
                .is_some(),
            XEvent::PropertyNotify { window, atom, deleted } => {
                if self.property_notifies.contains_key(&(window, atom)) {
                    true
                } else {
                    self.property_notifies.insert((window, atom), deleted);
                    false
                }
            }
            XEvent::MotionNotify(ev) => self.motion.insert(ev.event, ev).is_some(),
            XEvent::EnterNotify(ev) => self.enter.replace(ev).is_some(),
            XEvent::LeaveNotify(ev) => self.leave.replace(ev).is_some(),
            XEvent::Error(err) => {
                debug!("Async X error: {}", err);
                false
            }
            XEvent::Other(code) => {
                trace!("Ignoring event type {}", code);
                false
            }
        };

        if merged {
            stats.coalesced(kind);
            self.coalesced += 1;
        }
    }
}

/// Fold a later request into an earlier one: fields named by the later mask
/// overwrite, masks accumulate.
pub fn merge_configure_request(existing: &mut ConfigureRequest, later: &ConfigureRequest) {
    let mask = later.value_mask;
    if mask & config_mask::X != 0 {
        existing.x = later.x;
    }
    if mask & config_mask::Y != 0 {
        existing.y = later.y;
    }
    if mask & config_mask::WIDTH != 0 {
        existing.width = later.width;
    }
    if mask & config_mask::HEIGHT != 0 {
        existing.height = later.height;
    }
    if mask & config_mask::BORDER_WIDTH != 0 {
        existing.border_width = later.border_width;
    }
    if mask & config_mask::SIBLING != 0 {
        existing.sibling = later.sibling;
    }
    if mask & config_mask::STACK_MODE != 0 {
        existing.stack_mode = later.stack_mode;
    }
    existing.value_mask |= mask;
}

impl<C: XConn> WindowManager<C> {
    /// Refill the buckets: the prefetched event first, then events already
    /// queued in the connection, then (only when the socket was reported
    /// readable) fresh reads.
    pub(crate) fn ingest(&mut self, x_ready: bool) {
        self.buckets.reset();
        let mut count = 0;

        if let Some(event) = self.prefetched.take() {
            self.buckets.ingest(event, &mut self.stats);
            count += 1;
        }

        while count < MAX_EVENTS_PER_TICK {
            match self.conn.poll_queued_event() {
                Ok(Some(event)) => {
                    self.buckets.ingest(event, &mut self.stats);
                    count += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Lost connection while reading events: {}", e);
                    self.flags.request_shutdown();
                    return;
                }
            }
        }

        if !x_ready {
            return;
        }

        while count < MAX_EVENTS_PER_TICK {
            match self.conn.poll_event() {
                Ok(Some(event)) => {
                    self.buckets.ingest(event, &mut self.stats);
                    count += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Lost connection while reading events: {}", e);
                    self.flags.request_shutdown();
                    return;
                }
            }
        }

        if count == MAX_EVENTS_PER_TICK {
            trace!("Event budget exhausted, continuing next tick");
        }
    }
}
