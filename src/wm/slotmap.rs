//! Generational slot arena
//!
//! Clients are stored in parallel hot/cold arrays and addressed by a
//! [`Handle`] carrying the slot index plus the slot generation at allocation
//! time. Freeing a slot bumps its generation, so a stale handle never reaches
//! a record that was reused for a different window.

use std::fmt;

/// Stable identity of a slot. Index 0 / generation 0 is the invalid sentinel.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    pub const INVALID: Handle = Handle { index: 0, generation: 0 };

    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn is_valid(&self) -> bool {
        self.index != 0 && self.generation != 0
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Packed form, generation in the high half.
    pub fn to_bits(&self) -> u64 {
        (self.generation as u64) << 32 | self.index as u64
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "Handle({}v{})", self.index, self.generation)
        } else {
            write!(f, "Handle(invalid)")
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SlotHeader {
    generation: u32,
    next_free: u32,
    live: bool,
}

/// Arena of `(H, C)` records: `H` is touched every tick, `C` rarely.
#[derive(Debug)]
pub struct SlotMap<H, C> {
    headers: Vec<SlotHeader>,
    hot: Vec<H>,
    cold: Vec<C>,
    free_head: u32,
    len: usize,
}

impl<H: Default, C: Default> SlotMap<H, C> {
    /// Create an arena with `capacity` slots, one of which is the reserved index 0.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut map = Self {
            headers: Vec::new(),
            hot: Vec::new(),
            cold: Vec::new(),
            free_head: 0,
            len: 0,
        };
        map.headers.push(SlotHeader { generation: 0, next_free: 0, live: false });
        map.hot.push(H::default());
        map.cold.push(C::default());
        map.extend_to(capacity.max(2));
        map
    }

    fn extend_to(&mut self, capacity: usize) {
        let old = self.headers.len();
        if capacity <= old {
            return;
        }
        for _ in old..capacity {
            self.headers.push(SlotHeader { generation: 1, next_free: 0, live: false });
            self.hot.push(H::default());
            self.cold.push(C::default());
        }
        // Push in reverse so the lowest new index is handed out first.
        for index in (old..capacity).rev() {
            self.headers[index].next_free = self.free_head;
            self.free_head = index as u32;
        }
    }

    pub fn capacity(&self) -> usize {
        self.headers.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pop a free slot and reset its records. `None` when the arena is full.
    pub fn alloc(&mut self) -> Option<Handle> {
        if self.free_head == 0 {
            return None;
        }
        let index = self.free_head as usize;
        let header = &mut self.headers[index];
        self.free_head = header.next_free;
        header.next_free = 0;
        header.live = true;
        let handle = Handle::new(index as u32, header.generation);
        self.hot[index] = H::default();
        self.cold[index] = C::default();
        self.len += 1;
        Some(handle)
    }

    /// Allocate, doubling the arena when it is full. Existing indices are kept.
    pub fn alloc_or_grow(&mut self) -> Option<Handle> {
        if self.free_head == 0 {
            let capacity = self.capacity().checked_mul(2)?;
            if capacity > u32::MAX as usize {
                return None;
            }
            self.extend_to(capacity);
        }
        self.alloc()
    }

    /// Release a slot. Stale or dead handles are ignored.
    pub fn free(&mut self, handle: Handle) -> bool {
        if !self.live(handle) {
            return false;
        }
        let index = handle.index as usize;
        let header = &mut self.headers[index];
        header.live = false;
        header.generation = next_generation(header.generation);
        header.next_free = self.free_head;
        self.free_head = index as u32;
        self.hot[index] = H::default();
        self.cold[index] = C::default();
        self.len -= 1;
        true
    }

    pub fn live(&self, handle: Handle) -> bool {
        if !handle.is_valid() {
            return false;
        }
        match self.headers.get(handle.index as usize) {
            Some(header) => header.live && header.generation == handle.generation,
            None => false,
        }
    }

    pub fn get(&self, handle: Handle) -> Option<&H> {
        self.live(handle).then(|| &self.hot[handle.index as usize])
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut H> {
        if self.live(handle) { Some(&mut self.hot[handle.index as usize]) } else { None }
    }

    pub fn cold(&self, handle: Handle) -> Option<&C> {
        self.live(handle).then(|| &self.cold[handle.index as usize])
    }

    pub fn cold_mut(&mut self, handle: Handle) -> Option<&mut C> {
        if self.live(handle) { Some(&mut self.cold[handle.index as usize]) } else { None }
    }

    pub fn get_both_mut(&mut self, handle: Handle) -> Option<(&mut H, &mut C)> {
        if self.live(handle) {
            let index = handle.index as usize;
            Some((&mut self.hot[index], &mut self.cold[index]))
        } else {
            None
        }
    }

    /// Live records in ascending index order. The arena cannot be mutated
    /// while this iterator is alive.
    pub fn iter_live(&self) -> impl Iterator<Item = (Handle, &H, &C)> {
        self.headers
            .iter()
            .enumerate()
            .filter(|(_, header)| header.live)
            .map(|(index, header)| {
                (Handle::new(index as u32, header.generation), &self.hot[index], &self.cold[index])
            })
    }

    /// Snapshot of live handles, for loops that need to mutate the arena.
    pub fn handles(&self) -> Vec<Handle> {
        self.iter_live().map(|(handle, _, _)| handle).collect()
    }

    /// Run `dtor` on every live slot, then invalidate every outstanding handle.
    pub fn clear_with<F>(&mut self, mut dtor: F)
    where
        F: FnMut(Handle, &mut H, &mut C),
    {
        for index in 1..self.headers.len() {
            let header = self.headers[index];
            if header.live {
                dtor(Handle::new(index as u32, header.generation), &mut self.hot[index], &mut self.cold[index]);
            }
        }
        self.free_head = 0;
        for index in (1..self.headers.len()).rev() {
            let header = &mut self.headers[index];
            header.live = false;
            header.generation = next_generation(header.generation);
            header.next_free = self.free_head;
            self.free_head = index as u32;
            self.hot[index] = H::default();
            self.cold[index] = C::default();
        }
        self.len = 0;
    }

    /// Walk the free list, returning its length, or `None` on a cycle.
    #[cfg(test)]
    fn free_list_len(&self) -> Option<usize> {
        let mut count = 0;
        let mut cursor = self.free_head;
        while cursor != 0 {
            count += 1;
            if count > self.headers.len() {
                return None;
            }
            cursor = self.headers[cursor as usize].next_free;
        }
        Some(count)
    }
}

fn next_generation(generation: u32) -> u32 {
    match generation.wrapping_add(1) {
        0 => 1,
        g => g,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Arena = SlotMap<u32, String>;

    #[test]
    fn index_zero_is_never_handed_out() {
        let mut arena = Arena::with_capacity(4);
        let handles: Vec<_> = std::iter::from_fn(|| arena.alloc()).collect();
        assert_eq!(handles.len(), 3);
        assert!(handles.iter().all(|h| h.index() != 0 && h.generation() != 0));
        assert!(arena.alloc().is_none());
    }

    #[test]
    fn freed_handle_is_dead_until_reuse_with_new_generation() {
        let mut arena = Arena::with_capacity(4);
        let a = arena.alloc().unwrap();
        *arena.get_mut(a).unwrap() = 7;
        *arena.cold_mut(a).unwrap() = "seven".into();

        assert!(arena.free(a));
        assert!(arena.get(a).is_none());
        assert!(arena.cold(a).is_none());
        assert!(!arena.free(a));

        let b = arena.alloc().unwrap();
        assert_eq!(a.index(), b.index());
        assert_ne!(a, b);
        assert!(arena.get(a).is_none());
        assert_eq!(arena.get(b), Some(&0));
        assert_eq!(arena.cold(b).map(String::as_str), Some(""));
    }

    #[test]
    fn grow_preserves_indices_and_records() {
        let mut arena = Arena::with_capacity(2);
        let a = arena.alloc().unwrap();
        *arena.get_mut(a).unwrap() = 11;
        assert!(arena.alloc().is_none());

        let b = arena.alloc_or_grow().unwrap();
        assert_eq!(arena.capacity(), 4);
        assert_eq!(arena.get(a), Some(&11));
        assert_eq!(b.generation(), 1);
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.free_list_len(), Some(1));
    }

    #[test]
    fn iter_live_is_ascending() {
        let mut arena = Arena::with_capacity(8);
        let hs: Vec<_> = (0..5).map(|_| arena.alloc().unwrap()).collect();
        arena.free(hs[1]);
        arena.free(hs[3]);
        let seen: Vec<_> = arena.iter_live().map(|(h, _, _)| h).collect();
        assert_eq!(seen, vec![hs[0], hs[2], hs[4]]);
    }

    #[test]
    fn clear_with_runs_dtor_and_invalidates() {
        let mut arena = Arena::with_capacity(4);
        let a = arena.alloc().unwrap();
        let b = arena.alloc().unwrap();
        let mut seen = Vec::new();
        arena.clear_with(|h, _, _| seen.push(h));
        assert_eq!(seen, vec![a, b]);
        assert!(!arena.live(a));
        assert!(!arena.live(b));
        assert!(arena.is_empty());
        assert_eq!(arena.free_list_len(), Some(3));
    }

    #[test]
    fn generation_skips_zero_on_wrap() {
        assert_eq!(next_generation(u32::MAX), 1);
        assert_eq!(next_generation(4), 5);
    }

    #[test]
    fn random_alloc_free_never_aliases() {
        // Deterministic xorshift so the sequence is reproducible.
        let mut state = 0x2545_f491_u32;
        let mut rng = move || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state
        };
        let mut arena = Arena::with_capacity(4);
        let mut live: Vec<(Handle, u32)> = Vec::new();
        let mut dead: Vec<Handle> = Vec::new();
        for step in 0..2000u32 {
            if rng() % 3 != 0 || live.is_empty() {
                let h = arena.alloc_or_grow().unwrap();
                *arena.get_mut(h).unwrap() = step;
                live.push((h, step));
            } else {
                let idx = rng() as usize % live.len();
                let (h, _) = live.swap_remove(idx);
                assert!(arena.free(h));
                dead.push(h);
            }
            for h in &dead {
                assert!(arena.get(*h).is_none());
            }
        }
        for (h, value) in &live {
            assert_eq!(arena.get(*h), Some(value));
        }
        assert_eq!(arena.free_list_len(), Some(arena.capacity() - 1 - arena.len()));
    }
}
