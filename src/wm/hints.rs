//! Hints Module
//!
//! Decoding of the ICCCM and vendor hint properties (WM_NORMAL_HINTS,
//! WM_HINTS, _MOTIF_WM_HINTS, struts, _NET_WM_ICON) and the size-hint
//! constraint applied before every geometry commit.

/// WM_SIZE_HINTS flag bits
pub mod size_flags {
    pub const US_POSITION: u32 = 1 << 0;
    pub const US_SIZE: u32 = 1 << 1;
    pub const P_POSITION: u32 = 1 << 2;
    pub const P_SIZE: u32 = 1 << 3;
    pub const P_MIN_SIZE: u32 = 1 << 4;
    pub const P_MAX_SIZE: u32 = 1 << 5;
    pub const P_RESIZE_INC: u32 = 1 << 6;
    pub const P_ASPECT: u32 = 1 << 7;
    pub const P_BASE_SIZE: u32 = 1 << 8;
    pub const P_WIN_GRAVITY: u32 = 1 << 9;
}

/// Size hints (XSizeHints equivalent)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeHints {
    pub flags: u32,
    pub min_width: i32,
    pub min_height: i32,
    pub max_width: i32,
    pub max_height: i32,
    pub width_inc: i32,
    pub height_inc: i32,
    pub min_aspect_num: i32,
    pub min_aspect_den: i32,
    pub max_aspect_num: i32,
    pub max_aspect_den: i32,
    pub base_width: i32,
    pub base_height: i32,
}

impl SizeHints {
    /// Decode a WM_SIZE_HINTS value. Pre-ICCCM clients send 15 words, without
    /// the base size and gravity.
    pub fn from_values(v: &[u32]) -> Option<Self> {
        if v.len() < 15 {
            return None;
        }
        let flags = v[0];
        let word = |i: usize| v.get(i).copied().unwrap_or(0) as i32;
        let mut hints = SizeHints { flags, ..Default::default() };
        if flags & size_flags::P_MIN_SIZE != 0 {
            hints.min_width = word(5);
            hints.min_height = word(6);
        }
        if flags & size_flags::P_MAX_SIZE != 0 {
            hints.max_width = word(7);
            hints.max_height = word(8);
        }
        if flags & size_flags::P_RESIZE_INC != 0 {
            hints.width_inc = word(9);
            hints.height_inc = word(10);
        }
        if flags & size_flags::P_ASPECT != 0 {
            hints.min_aspect_num = word(11);
            hints.min_aspect_den = word(12);
            hints.max_aspect_num = word(13);
            hints.max_aspect_den = word(14);
        }
        if flags & size_flags::P_BASE_SIZE != 0 {
            hints.base_width = word(15);
            hints.base_height = word(16);
        }
        Some(hints)
    }

    fn has(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    /// The client asked for its own position (user or program specified).
    pub fn has_position(&self) -> bool {
        self.has(size_flags::US_POSITION) || self.has(size_flags::P_POSITION)
    }

    /// Min and max size are set and equal on both axes.
    pub fn is_fixed(&self) -> bool {
        self.has(size_flags::P_MIN_SIZE)
            && self.has(size_flags::P_MAX_SIZE)
            && self.max_width > 0
            && self.max_height > 0
            && self.min_width == self.max_width
            && self.min_height == self.max_height
    }

    /// Clamp a content size to min/max, aspect ratio and resize increments.
    pub fn constrain(&self, width: &mut u32, height: &mut u32) {
        let mut w = *width as i64;
        let mut h = *height as i64;

        if self.has(size_flags::P_MIN_SIZE) {
            if self.min_width > 0 && w < self.min_width as i64 {
                w = self.min_width as i64;
            }
            if self.min_height > 0 && h < self.min_height as i64 {
                h = self.min_height as i64;
            }
        }

        if self.has(size_flags::P_MAX_SIZE) {
            if self.max_width > 0 && w > self.max_width as i64 {
                w = self.max_width as i64;
            }
            if self.max_height > 0 && h > self.max_height as i64 {
                h = self.max_height as i64;
            }
        }

        if self.has(size_flags::P_ASPECT) {
            let (min_num, min_den) = (self.min_aspect_num as i64, self.min_aspect_den as i64);
            let (max_num, max_den) = (self.max_aspect_num as i64, self.max_aspect_den as i64);
            if min_num > 0 && min_den > 0 && w * min_den < h * min_num {
                w = h * min_num / min_den;
            }
            if max_num > 0 && max_den > 0 && w * max_den > h * max_num {
                h = w * max_den / max_num;
            }
        }

        if self.has(size_flags::P_RESIZE_INC) {
            if self.width_inc > 1 {
                let base = self.increment_base(self.base_width, self.min_width);
                if w > base {
                    w = base + (w - base) / self.width_inc as i64 * self.width_inc as i64;
                }
            }
            if self.height_inc > 1 {
                let base = self.increment_base(self.base_height, self.min_height);
                if h > base {
                    h = base + (h - base) / self.height_inc as i64 * self.height_inc as i64;
                }
            }
        }

        *width = w.clamp(1, u16::MAX as i64) as u32;
        *height = h.clamp(1, u16::MAX as i64) as u32;
    }

    fn increment_base(&self, base: i32, min: i32) -> i64 {
        if self.has(size_flags::P_BASE_SIZE) {
            base as i64
        } else if min > 0 {
            min as i64
        } else {
            0
        }
    }
}

/// WM_HINTS flag bits
mod wm_hint_flags {
    pub const INPUT: u32 = 1 << 0;
    pub const STATE: u32 = 1 << 1;
    pub const URGENCY: u32 = 1 << 8;
}

/// WM hints (XWMHints equivalent)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WmHints {
    pub input: bool,
    pub iconic: bool,
    pub urgent: bool,
}

impl WmHints {
    pub fn from_values(v: &[u32]) -> Option<Self> {
        let flags = *v.first()?;
        let input = if flags & wm_hint_flags::INPUT != 0 { v.get(1).copied().unwrap_or(1) != 0 } else { true };
        let iconic = flags & wm_hint_flags::STATE != 0 && v.get(2).copied() == Some(3);
        Some(Self { input, iconic, urgent: flags & wm_hint_flags::URGENCY != 0 })
    }
}

/// `_MOTIF_WM_HINTS`: only the decoration bit is honoured.
pub fn motif_wants_undecorated(v: &[u32]) -> Option<bool> {
    const MWM_HINTS_DECORATIONS: u32 = 1 << 1;
    if v.len() < 3 {
        return None;
    }
    if v[0] & MWM_HINTS_DECORATIONS == 0 {
        return None;
    }
    Some(v[2] == 0)
}

/// Reserved screen edges, with the partial ranges when the client sent them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Strut {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
    /// left/right start/end y, top/bottom start/end x
    pub ranges: [u32; 8],
}

impl Strut {
    pub fn from_values(v: &[u32]) -> Option<Self> {
        if v.len() < 4 {
            return None;
        }
        let mut strut = Strut { left: v[0], right: v[1], top: v[2], bottom: v[3], ranges: [0; 8] };
        if v.len() >= 12 {
            strut.ranges.copy_from_slice(&v[4..12]);
        }
        Some(strut)
    }

    pub fn is_empty(&self) -> bool {
        self.left == 0 && self.right == 0 && self.top == 0 && self.bottom == 0
    }
}

/// `_GTK_FRAME_EXTENTS`: shadow margins drawn by the client itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameExtents {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

impl FrameExtents {
    pub fn from_values(v: &[u32]) -> Option<Self> {
        (v.len() >= 4).then(|| Self { left: v[0], right: v[1], top: v[2], bottom: v[3] })
    }
}

/// ARGB icon picked out of `_NET_WM_ICON`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Icon {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u32>,
}

const ICON_TARGET: i64 = 16;
const ICON_DIM_MAX: u32 = 4096;
const ICON_PIXELS_MAX: u64 = 1024 * 1024;
const ICON_COUNT_MAX: usize = 32;

/// Choose the icon closest to 16x16; ties go to the larger image.
/// Parsing stops at the first truncated or oversized entry.
pub fn pick_icon(v: &[u32]) -> Option<Icon> {
    let mut best: Option<(i64, u64, usize, u32, u32)> = None;
    let mut i = 0usize;
    let mut seen = 0usize;
    while i + 2 <= v.len() && seen < ICON_COUNT_MAX {
        let (w, h) = (v[i], v[i + 1]);
        if w == 0 || h == 0 {
            break;
        }
        let pixels = w as u64 * h as u64;
        if pixels > ICON_PIXELS_MAX || pixels > (v.len() - i - 2) as u64 {
            break;
        }
        if w <= ICON_DIM_MAX && h <= ICON_DIM_MAX {
            let diff = (w as i64 - ICON_TARGET).abs() + (h as i64 - ICON_TARGET).abs();
            let better = match best {
                None => true,
                Some((best_diff, best_area, ..)) => diff < best_diff || (diff == best_diff && pixels > best_area),
            };
            if better {
                best = Some((diff, pixels, i + 2, w, h));
            }
        }
        i += 2 + pixels as usize;
        seen += 1;
    }
    best.map(|(_, pixels, start, width, height)| Icon {
        width,
        height,
        pixels: v[start..start + pixels as usize].to_vec(),
    })
}
