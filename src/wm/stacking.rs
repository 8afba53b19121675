//! Stacking Module
//!
//! Manages window z-order within the seven layers. Each layer is an ordered
//! sequence of handles, bottom first; the global order is the layers
//! concatenated from `Desktop` to `Overlay`. Every change restacks only the
//! moved frame, relative to its nearest neighbour.

use anyhow::Result;
use tracing::{debug, trace};

use crate::wm::client_flags::{Layer, RootDirty};
use crate::wm::slotmap::Handle;
use crate::wm::xconn::{StackMode, WindowChanges, XConn};
use crate::wm::WindowManager;

/// Transient chains deeper than this are not followed when raising.
const MAX_TRANSIENT_DEPTH: usize = 16;

impl<C: XConn> WindowManager<C> {
    /// Layer sequence currently holding `handle`, and its position there.
    pub(crate) fn stack_position(&self, handle: Handle) -> Option<(Layer, usize)> {
        Layer::ALL
            .iter()
            .find_map(|layer| self.layers[layer.index()].iter().position(|h| *h == handle).map(|i| (*layer, i)))
    }

    /// Every stacked client, bottom to top.
    pub(crate) fn stacking_order(&self) -> Vec<Handle> {
        self.layers.iter().flatten().copied().collect()
    }

    /// Take `handle` out of its layer. No request is needed: the frame is
    /// about to be unmapped or destroyed.
    pub(crate) fn stack_remove(&mut self, handle: Handle) {
        if let Some((layer, index)) = self.stack_position(handle) {
            self.layers[layer.index()].remove(index);
            self.root_dirty |= RootDirty::CLIENT_LIST_STACKING;
        }
    }

    /// Top of its layer, with its transients above it.
    pub(crate) fn stack_raise(&mut self, handle: Handle) -> Result<()> {
        self.raise_with_transients(handle, 0)
    }

    fn raise_with_transients(&mut self, handle: Handle, depth: usize) -> Result<()> {
        let Some(client) = self.clients.get(handle) else {
            return Ok(());
        };
        let layer = client.layer;
        let transients = client.transients.clone();

        self.detach(handle);
        self.layers[layer.index()].push(handle);
        self.restack(handle)?;

        if depth >= MAX_TRANSIENT_DEPTH {
            debug!("Transient chain of {:?} too deep, not raising further", handle);
            return Ok(());
        }
        for child in transients {
            if self.stack_position(child).is_some() {
                self.raise_with_transients(child, depth + 1)?;
            }
        }
        Ok(())
    }

    /// Bottom of its layer. Transients in the same layer follow right above.
    pub(crate) fn stack_lower(&mut self, handle: Handle) -> Result<()> {
        let Some(client) = self.clients.get(handle) else {
            return Ok(());
        };
        let layer = client.layer;
        let transients = client.transients.clone();

        self.detach(handle);
        self.layers[layer.index()].insert(0, handle);
        self.restack(handle)?;

        let mut slot = 1;
        for child in transients {
            if self.stack_position(child).map(|(l, _)| l) != Some(layer) {
                continue;
            }
            self.detach(child);
            let seq = &mut self.layers[layer.index()];
            let at = slot.min(seq.len());
            seq.insert(at, child);
            self.restack(child)?;
            slot += 1;
        }
        Ok(())
    }

    /// Directly above `sibling` when both share a layer. A sibling in a
    /// higher layer can only be approached by raising.
    pub(crate) fn stack_place_above(&mut self, handle: Handle, sibling: Handle) -> Result<()> {
        self.place_relative(handle, sibling, true)
    }

    /// Directly below `sibling` when both share a layer.
    pub(crate) fn stack_place_below(&mut self, handle: Handle, sibling: Handle) -> Result<()> {
        self.place_relative(handle, sibling, false)
    }

    fn place_relative(&mut self, handle: Handle, sibling: Handle, above: bool) -> Result<()> {
        let (Some(client), Some(other)) = (self.clients.get(handle), self.clients.get(sibling)) else {
            return Ok(());
        };
        let (layer, sibling_layer) = (client.layer, other.layer);
        if handle == sibling {
            return Ok(());
        }
        if layer != sibling_layer {
            return if (sibling_layer > layer) == above { self.stack_raise(handle) } else { self.stack_lower(handle) };
        }

        self.detach(handle);
        let seq = &mut self.layers[layer.index()];
        let at = match seq.iter().position(|h| *h == sibling) {
            Some(i) if above => i + 1,
            Some(i) => i,
            None if above => seq.len(),
            None => 0,
        };
        seq.insert(at, handle);
        self.restack(handle)
    }

    /// Re-home `handle` after its layer changed, on top of the new layer.
    pub(crate) fn stack_move_to_layer(&mut self, handle: Handle) -> Result<()> {
        let Some(layer) = self.clients.get(handle).map(|c| c.layer) else {
            return Ok(());
        };
        if self.stack_position(handle).is_some_and(|(current, _)| current == layer) {
            return Ok(());
        }
        trace!("Moving {:?} to layer {:?}", handle, layer);
        self.stack_raise(handle)
    }

    fn detach(&mut self, handle: Handle) {
        for seq in &mut self.layers {
            seq.retain(|h| *h != handle);
        }
    }

    /// Issue one ConfigureWindow for the frame of `handle`: above the client
    /// right below it in the global order, else below the one right above.
    fn restack(&mut self, handle: Handle) -> Result<()> {
        let order = self.stacking_order();
        let Some(index) = order.iter().position(|h| *h == handle) else {
            return Ok(());
        };
        let Some(frame) = self.clients.get(handle).map(|c| c.frame) else {
            return Ok(());
        };
        let frame_of = |h: Handle| self.clients.get(h).map(|c| c.frame);

        let changes = if let Some(below) = index.checked_sub(1).and_then(|i| frame_of(order[i])) {
            WindowChanges { sibling: Some(below), stack_mode: Some(StackMode::Above), ..Default::default() }
        } else if let Some(above) = order.get(index + 1).and_then(|h| frame_of(*h)) {
            WindowChanges { sibling: Some(above), stack_mode: Some(StackMode::Below), ..Default::default() }
        } else {
            let layer = self.clients.get(handle).map(|c| c.layer).unwrap_or_default();
            let mode = if layer >= Layer::Normal { StackMode::Above } else { StackMode::Below };
            WindowChanges { stack_mode: Some(mode), ..Default::default() }
        };

        self.conn.configure_window(frame, &changes)?;
        self.stats.restacks += 1;
        self.root_dirty |= RootDirty::CLIENT_LIST_STACKING;
        Ok(())
    }
}
