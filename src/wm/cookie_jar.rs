//! Outstanding reply tracker
//!
//! Every asynchronous round trip the window manager issues is recorded here,
//! keyed by its request sequence number. Once per tick [`CookieJar::drain`]
//! polls the recorded requests without blocking and hands back the ones that
//! completed (or gave up waiting) so the manager can dispatch them.
//!
//! The table is open-addressed with linear probing and backshift deletion;
//! the sequence number itself is the hash.

use std::time::{Duration, Instant};

use tracing::{trace, warn};

use crate::wm::slotmap::Handle;
use crate::wm::xconn::{Atom, NONE, Reply, ReplyKind, ReplyPoll, Seq, XConn, XError};

/// Replies not seen after this long are abandoned.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound on replies dispatched per tick.
pub const MAX_REPLIES_PER_TICK: usize = 64;

const INITIAL_CAPACITY: usize = 256;

/// What a tracked request was for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CookieTag {
    pub kind: ReplyKind,
    /// Property the request read, `NONE` for attribute and geometry queries.
    pub atom: Atom,
    /// Counts against the client's outstanding-reply budget during manage.
    pub counted: bool,
}

impl CookieTag {
    pub fn attributes() -> Self {
        Self { kind: ReplyKind::Attributes, atom: NONE, counted: true }
    }

    pub fn geometry() -> Self {
        Self { kind: ReplyKind::Geometry, atom: NONE, counted: true }
    }

    pub fn property(atom: Atom) -> Self {
        Self { kind: ReplyKind::Property, atom, counted: true }
    }

    /// A property re-read after manage completed.
    pub fn refresh(atom: Atom) -> Self {
        Self { kind: ReplyKind::Property, atom, counted: false }
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    sequence: Seq,
    tag: CookieTag,
    client: Handle,
    data: u64,
    enqueued: Instant,
}

/// A request retired by [`CookieJar::drain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completed {
    pub sequence: Seq,
    pub tag: CookieTag,
    pub client: Handle,
    pub data: u64,
    pub reply: Option<Reply>,
    pub error: Option<XError>,
    pub timed_out: bool,
}

#[derive(Debug)]
pub struct CookieJar {
    slots: Vec<Option<Slot>>,
    len: usize,
    cursor: usize,
}

impl Default for CookieJar {
    fn default() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }
}

impl CookieJar {
    /// `capacity` is rounded up to a power of two.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { slots: vec![None; capacity.max(8).next_power_of_two()], len: 0, cursor: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn has_pending(&self) -> bool {
        self.len > 0
    }

    fn mask(&self) -> usize {
        self.slots.len() - 1
    }

    fn home(&self, sequence: Seq) -> usize {
        sequence as usize & self.mask()
    }

    /// Record a request. Returns false, leaving the jar untouched, when the
    /// sequence is already tracked.
    pub fn push(&mut self, sequence: Seq, tag: CookieTag, client: Handle, data: u64, now: Instant) -> bool {
        if (self.len + 1) * 10 > self.capacity() * 7 {
            self.grow();
        }
        let mask = self.mask();
        let mut index = self.home(sequence);
        loop {
            match &self.slots[index] {
                Some(slot) if slot.sequence == sequence => {
                    warn!("Cookie {} already tracked, dropping duplicate", sequence);
                    return false;
                }
                Some(_) => index = (index + 1) & mask,
                None => break,
            }
        }
        self.slots[index] = Some(Slot { sequence, tag, client, data, enqueued: now });
        self.len += 1;
        true
    }

    fn grow(&mut self) {
        let capacity = self.capacity() * 2;
        let old = std::mem::replace(&mut self.slots, vec![None; capacity]);
        self.len = 0;
        self.cursor = 0;
        let mask = self.mask();
        for slot in old.into_iter().flatten() {
            let mut index = self.home(slot.sequence);
            while self.slots[index].is_some() {
                index = (index + 1) & mask;
            }
            self.slots[index] = Some(slot);
            self.len += 1;
        }
    }

    fn find(&self, sequence: Seq) -> Option<usize> {
        let mask = self.mask();
        let mut index = self.home(sequence);
        for _ in 0..self.capacity() {
            match &self.slots[index] {
                Some(slot) if slot.sequence == sequence => return Some(index),
                Some(_) => index = (index + 1) & mask,
                None => return None,
            }
        }
        None
    }

    pub fn contains(&self, sequence: Seq) -> bool {
        self.find(sequence).is_some()
    }

    /// Empty `index` and shift following entries of the same probe run back.
    fn remove_at(&mut self, index: usize) -> Option<Slot> {
        let removed = self.slots[index].take()?;
        self.len -= 1;
        let mask = self.mask();
        let mut hole = index;
        let mut next = (index + 1) & mask;
        while let Some(slot) = self.slots[next] {
            let home = self.home(slot.sequence);
            // Move back unless the entry's home lies cyclically in (hole, next].
            if (next.wrapping_sub(home) & mask) >= (next.wrapping_sub(hole) & mask) {
                self.slots[hole] = self.slots[next].take();
                hole = next;
            }
            next = (next + 1) & mask;
        }
        Some(removed)
    }

    pub fn remove(&mut self, sequence: Seq) -> bool {
        match self.find(sequence) {
            Some(index) => self.remove_at(index).is_some(),
            None => false,
        }
    }

    /// Forget every request made on behalf of `client`.
    pub fn forget_client<C: XConn + ?Sized>(&mut self, conn: &C, client: Handle) {
        let doomed: Vec<Seq> = self
            .slots
            .iter()
            .flatten()
            .filter(|slot| slot.client == client)
            .map(|slot| slot.sequence)
            .collect();
        for sequence in doomed {
            conn.discard_reply(sequence);
            self.remove(sequence);
        }
    }

    /// Retire at most `max` requests whose replies are ready or expired,
    /// scanning at most one full table from where the previous call stopped.
    pub fn drain<C: XConn + ?Sized>(&mut self, conn: &C, max: usize, now: Instant) -> Vec<Completed> {
        let mut done = Vec::new();
        if self.len == 0 {
            return done;
        }
        let capacity = self.capacity();
        let mut index = self.cursor & self.mask();
        let mut scanned = 0;
        while scanned < capacity && done.len() < max && self.len > 0 {
            scanned += 1;
            let Some(slot) = self.slots[index] else {
                index = (index + 1) & self.mask();
                continue;
            };
            match conn.poll_reply(slot.sequence, slot.tag.kind) {
                ReplyPoll::Ready { reply, error } => {
                    trace!("Cookie {} ready", slot.sequence);
                    self.remove_at(index);
                    done.push(Completed {
                        sequence: slot.sequence,
                        tag: slot.tag,
                        client: slot.client,
                        data: slot.data,
                        reply,
                        error,
                        timed_out: false,
                    });
                    // A backshifted entry may now occupy `index`.
                    continue;
                }
                ReplyPoll::Pending if now.duration_since(slot.enqueued) > REPLY_TIMEOUT => {
                    warn!("Cookie {} timed out after {:?}", slot.sequence, REPLY_TIMEOUT);
                    conn.discard_reply(slot.sequence);
                    self.remove_at(index);
                    done.push(Completed {
                        sequence: slot.sequence,
                        tag: slot.tag,
                        client: slot.client,
                        data: slot.data,
                        reply: None,
                        error: None,
                        timed_out: true,
                    });
                    continue;
                }
                ReplyPoll::Pending => {}
            }
            index = (index + 1) & self.mask();
        }
        self.cursor = index;
        done
    }
}
