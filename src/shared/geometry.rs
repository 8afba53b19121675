//! Rectangles shared by the window model, placement and the frame renderer.

/// Window geometry in root coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    pub const ZERO: Geometry = Geometry { x: 0, y: 0, width: 0, height: 0 };

    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn right(&self) -> i32 {
        self.x + self.width as i32
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height as i32
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && y >= self.y && x < self.right() && y < self.bottom()
    }

    /// Position a `width` x `height` rectangle centered inside `self`.
    pub fn centered(&self, width: u32, height: u32) -> Geometry {
        Geometry {
            x: self.x + (self.width as i32 - width as i32) / 2,
            y: self.y + (self.height as i32 - height as i32) / 2,
            width,
            height,
        }
    }

    /// Centered on a point, as used for pointer placement.
    pub fn centered_at(px: i32, py: i32, width: u32, height: u32) -> Geometry {
        Geometry {
            x: px - width as i32 / 2,
            y: py - height as i32 / 2,
            width,
            height,
        }
    }

    /// Move (never resize) so that as much of `self` as possible lies inside `bounds`.
    /// The top-left corner wins when the rectangle is larger than the bounds.
    pub fn clamped_into(&self, bounds: &Geometry) -> Geometry {
        let mut out = *self;
        if out.right() > bounds.right() {
            out.x = bounds.right() - out.width as i32;
        }
        if out.bottom() > bounds.bottom() {
            out.y = bounds.bottom() - out.height as i32;
        }
        if out.x < bounds.x {
            out.x = bounds.x;
        }
        if out.y < bounds.y {
            out.y = bounds.y;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centered_inside_bounds() {
        let wa = Geometry::new(0, 20, 1000, 700);
        assert_eq!(wa.centered(200, 100), Geometry::new(400, 320, 200, 100));
    }

    #[test]
    fn clamp_moves_back_on_screen() {
        let wa = Geometry::new(0, 0, 800, 600);
        let g = Geometry::new(700, -50, 200, 100).clamped_into(&wa);
        assert_eq!(g, Geometry::new(600, 0, 200, 100));

        let big = Geometry::new(50, 50, 1000, 1000).clamped_into(&wa);
        assert_eq!((big.x, big.y), (0, 0));
    }
}
