//! Plain geometry types shared across the window manager.

pub mod geometry;
pub mod region;

pub use geometry::Geometry;
pub use region::DirtyRegion;
