//! Focus Module
//!
//! Click-to-focus with a most-recently-used history. The history holds every
//! managed client, most recent first; focus cycling and the choice of a
//! successor when the focused client goes away both walk it.

use anyhow::Result;
use tracing::debug;

use crate::wm::client_flags::{ClientFlags, ClientState, Dirty, Protocols, RootDirty};
use crate::wm::slotmap::Handle;
use crate::wm::xconn::{CURRENT_TIME, XConn};
use crate::wm::WindowManager;

impl<C: XConn> WindowManager<C> {
    /// Give input focus to `handle`, moving it to the front of the history.
    pub(crate) fn set_focus(&mut self, handle: Handle) -> Result<()> {
        let Some(client) = self.clients.get(handle) else {
            return self.focus_none();
        };
        if client.state != ClientState::Mapped {
            debug!("Not focusing {:?} in state {:?}", handle, client.state);
            return Ok(());
        }
        let xid = client.xid;

        self.unmark_focused();
        if let Some(client) = self.clients.get_mut(handle) {
            client.flags |= ClientFlags::FOCUSED;
            client.dirty |= Dirty::FRAME_ALL | Dirty::STATE;
        }
        self.focused = handle;
        self.mru_touch(handle);

        let (protocols, can_focus) =
            self.clients.cold(handle).map(|info| (info.protocols, info.can_focus)).unwrap_or_default();
        if protocols.contains(Protocols::TAKE_FOCUS) {
            self.conn.send_client_message(
                xid,
                self.atoms.wm_protocols,
                [self.atoms.wm_take_focus, CURRENT_TIME, 0, 0, 0],
            )?;
        }
        if can_focus {
            self.conn.set_input_focus(xid, CURRENT_TIME)?;
        }
        self.root_dirty |= RootDirty::ACTIVE_WINDOW;
        debug!("WM: Focused {:#x}", xid);

        if self.config.focus_raise {
            self.stack_raise(handle)?;
        }
        Ok(())
    }

    /// Drop focus to the root window.
    pub(crate) fn focus_none(&mut self) -> Result<()> {
        self.unmark_focused();
        self.focused = Handle::INVALID;
        self.conn.set_input_focus(self.root, CURRENT_TIME)?;
        self.root_dirty |= RootDirty::ACTIVE_WINDOW;
        Ok(())
    }

    fn unmark_focused(&mut self) {
        if let Some(old) = self.clients.get_mut(self.focused) {
            old.flags.remove(ClientFlags::FOCUSED);
            old.dirty |= Dirty::FRAME_ALL | Dirty::STATE;
        }
    }

    pub(crate) fn mru_touch(&mut self, handle: Handle) {
        self.mru_remove(handle);
        self.focus_history.push_front(handle);
    }

    pub(crate) fn mru_remove(&mut self, handle: Handle) {
        self.focus_history.retain(|h| *h != handle);
    }

    /// Mapped, shown on the current desktop, and of a type that takes focus.
    pub(crate) fn is_focusable(&self, handle: Handle) -> bool {
        self.clients.get(handle).is_some_and(|c| {
            c.state == ClientState::Mapped
                && c.is_visible_on(self.current_desktop)
                && !c.window_type.refuses_focus()
        })
    }

    /// Most recently used focusable client other than `exclude`.
    pub(crate) fn focus_successor(&self, exclude: Handle) -> Option<Handle> {
        self.focus_history.iter().copied().find(|h| *h != exclude && self.is_focusable(*h))
    }

    /// Focus the next (or previous) focusable client in history order,
    /// wrapping around, and raise it.
    pub(crate) fn cycle_focus(&mut self, forward: bool) -> Result<()> {
        let len = self.focus_history.len();
        if len == 0 {
            return Ok(());
        }
        let start = self.focus_history.iter().position(|h| *h == self.focused).unwrap_or(len - 1);
        let target = (1..=len)
            .map(|step| if forward { (start + step) % len } else { (start + len - step % len) % len })
            .map(|i| self.focus_history[i])
            .find(|h| *h != self.focused && self.is_focusable(*h));

        if let Some(target) = target {
            self.set_focus(target)?;
            self.stack_raise(target)?;
        }
        Ok(())
    }
}
