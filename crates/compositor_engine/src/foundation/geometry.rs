//! Screen-space geometry shared by surfaces, damage tracking and draws

use serde::{Deserialize, Serialize};

/// Size of a surface or output in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Extent {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Extent {
    /// Create a new extent
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True if either dimension is zero
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Extent with both dimensions raised to at least one pixel
    ///
    /// GPU images cannot be zero-sized, but mapped windows briefly can.
    pub fn at_least_one(self) -> Self {
        Self::new(self.width.max(1), self.height.max(1))
    }

    /// Number of pixels
    pub const fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Size of a tightly packed 32-bit BGRA image of this extent
    pub const fn byte_size(&self) -> usize {
        self.pixel_count() * 4
    }

    /// Rectangle covering the whole extent at the origin
    pub const fn full_rect(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }
}

/// Axis-aligned rectangle in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge
    pub x: i32,
    /// Top edge
    pub y: i32,
    /// Width
    pub width: u32,
    /// Height
    pub height: u32,
}

impl Rect {
    /// Create a new rectangle
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// True if the rectangle has no area
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Exclusive right edge
    pub fn right(&self) -> i64 {
        i64::from(self.x) + i64::from(self.width)
    }

    /// Exclusive bottom edge
    pub fn bottom(&self) -> i64 {
        i64::from(self.y) + i64::from(self.height)
    }

    /// Size of the rectangle
    pub const fn extent(&self) -> Extent {
        Extent::new(self.width, self.height)
    }

    /// True if the rectangle lies entirely inside an image of `extent`
    pub fn fits_within(&self, extent: Extent) -> bool {
        self.x >= 0
            && self.y >= 0
            && self.right() <= i64::from(extent.width)
            && self.bottom() <= i64::from(extent.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_fits_within() {
        let extent = Extent::new(100, 50);
        assert!(Rect::new(0, 0, 100, 50).fits_within(extent));
        assert!(Rect::new(90, 40, 10, 10).fits_within(extent));
        assert!(!Rect::new(91, 40, 10, 10).fits_within(extent));
        assert!(!Rect::new(0, 41, 10, 10).fits_within(extent));
        assert!(!Rect::new(-1, 0, 10, 10).fits_within(extent));
    }

    #[test]
    fn test_extent_sizes() {
        let extent = Extent::new(3, 2);
        assert_eq!(extent.pixel_count(), 6);
        assert_eq!(extent.byte_size(), 24);
        assert_eq!(Extent::new(0, 7).at_least_one(), Extent::new(1, 7));
        assert!(Extent::default().is_empty());
    }
}
