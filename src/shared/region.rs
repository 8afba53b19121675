//! Dirty region accumulation for exposes, damage and partial frame redraws.
//!
//! A region is a single bounding rectangle. Unions only ever grow it, so
//! coalescing any number of exposes for a window is safe.

use super::geometry::Geometry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirtyRegion {
    pub valid: bool,
    pub x: i16,
    pub y: i16,
    pub w: u16,
    pub h: u16,
}

impl DirtyRegion {
    pub fn make(x: i16, y: i16, w: u16, h: u16) -> Self {
        Self { valid: w > 0 && h > 0, x, y, w, h }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn union(&mut self, other: &DirtyRegion) {
        if !other.valid {
            return;
        }
        if !self.valid {
            *self = *other;
            return;
        }
        let x1 = (self.x as i32).min(other.x as i32);
        let y1 = (self.y as i32).min(other.y as i32);
        let x2 = (self.x as i32 + self.w as i32).max(other.x as i32 + other.w as i32);
        let y2 = (self.y as i32 + self.h as i32).max(other.y as i32 + other.h as i32);
        self.x = x1 as i16;
        self.y = y1 as i16;
        self.w = (x2 - x1).min(u16::MAX as i32) as u16;
        self.h = (y2 - y1).min(u16::MAX as i32) as u16;
    }

    pub fn union_rect(&mut self, x: i16, y: i16, w: u16, h: u16) {
        self.union(&DirtyRegion::make(x, y, w, h));
    }

    /// Intersect with `bounds`; a region entirely outside becomes invalid.
    pub fn clamp(&mut self, bounds: &DirtyRegion) {
        if !self.valid {
            return;
        }
        if !bounds.valid {
            self.reset();
            return;
        }
        let x1 = (self.x as i32).max(bounds.x as i32);
        let y1 = (self.y as i32).max(bounds.y as i32);
        let x2 = (self.x as i32 + self.w as i32).min(bounds.x as i32 + bounds.w as i32);
        let y2 = (self.y as i32 + self.h as i32).min(bounds.y as i32 + bounds.h as i32);
        if x2 <= x1 || y2 <= y1 {
            self.reset();
            return;
        }
        self.x = x1 as i16;
        self.y = y1 as i16;
        self.w = (x2 - x1) as u16;
        self.h = (y2 - y1) as u16;
    }

    pub fn to_geometry(&self) -> Option<Geometry> {
        self.valid
            .then(|| Geometry::new(self.x as i32, self.y as i32, self.w as u32, self.h as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_with_invalid_keeps_valid_side() {
        let mut r = DirtyRegion::default();
        r.union_rect(10, 10, 5, 5);
        assert_eq!(r, DirtyRegion::make(10, 10, 5, 5));

        let before = r;
        r.union(&DirtyRegion::default());
        assert_eq!(r, before);
    }

    #[test]
    fn union_grows_to_bounding_box() {
        let mut r = DirtyRegion::make(0, 0, 10, 10);
        r.union_rect(20, 5, 10, 20);
        assert_eq!(r, DirtyRegion::make(0, 0, 30, 25));
    }

    #[test]
    fn clamp_outside_invalidates() {
        let mut r = DirtyRegion::make(200, 200, 10, 10);
        r.clamp(&DirtyRegion::make(0, 0, 100, 100));
        assert!(!r.valid);

        let mut r = DirtyRegion::make(-5, 90, 20, 20);
        r.clamp(&DirtyRegion::make(0, 0, 100, 100));
        assert_eq!(r, DirtyRegion::make(0, 90, 15, 10));
    }

    #[test]
    fn zero_sized_make_is_invalid() {
        assert!(!DirtyRegion::make(0, 0, 0, 4).valid);
    }
}
