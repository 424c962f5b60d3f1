//! Frame geometry: dimensions, crop rectangles, margins and window regions.

use serde::{Deserialize, Serialize};

/// Width/height pair in pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimension {
    pub width: u32,
    pub height: u32,
}

impl Dimension {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    #[inline]
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Returns whichever of the two covers more pixels, `self` on a tie
    #[inline]
    pub fn larger_area(self, other: Dimension) -> Dimension {
        if other.area() > self.area() {
            other
        } else {
            self
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Subtract a pixel margin, saturating at zero
    #[inline]
    pub fn shrink_by(&self, margin: StabilizationMargin) -> Dimension {
        Dimension {
            width: self.width.saturating_sub(margin.width),
            height: self.height.saturating_sub(margin.height),
        }
    }
}

/// Crop rectangle in pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, width: i32, height: i32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Rectangle covering the whole of `dim` from the origin
    pub fn full(dim: Dimension) -> Self {
        Self {
            left: 0,
            top: 0,
            width: dim.width as i32,
            height: dim.height as i32,
        }
    }
}

/// Stabilization margin in pixels, per axis
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StabilizationMargin {
    pub width: u32,
    pub height: u32,
}

impl StabilizationMargin {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_zero(&self) -> bool {
        self.width == 0 && self.height == 0
    }
}

/// Stabilization margin as a fraction of the output, per axis
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MarginRatio {
    pub width: f32,
    pub height: f32,
}

impl MarginRatio {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub const fn uniform(value: f32) -> Self {
        Self {
            width: value,
            height: value,
        }
    }
}

/// Per-axis ratio between stabilized output and engine input
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CropRatio {
    pub x: f32,
    pub y: f32,
}

/// Output path of the node's input port. Crop metadata carries one rectangle per path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathType {
    #[default]
    Full,
    Ds4,
    Ds16,
    Fd,
    DisplayFull,
    DisplayDs4,
    DisplayDs16,
}

/// Crop rectangles published by an upstream ISP node, one per output path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathCrops {
    pub full: Rect,
    pub ds4: Rect,
    pub ds16: Rect,
    pub fd: Rect,
    pub display_full: Rect,
    pub display_ds4: Rect,
    pub display_ds16: Rect,
}

impl PathCrops {
    /// Same rectangle on every path
    pub fn uniform(rect: Rect) -> Self {
        Self {
            full: rect,
            ds4: rect,
            ds16: rect,
            fd: rect,
            display_full: rect,
            display_ds4: rect,
            display_ds16: rect,
        }
    }

    pub fn for_path(&self, path: PathType) -> Rect {
        match path {
            PathType::Full => self.full,
            PathType::Ds4 => self.ds4,
            PathType::Ds16 => self.ds16,
            PathType::Fd => self.fd,
            PathType::DisplayFull => self.display_full,
            PathType::DisplayDs4 => self.display_ds4,
            PathType::DisplayDs16 => self.display_ds16,
        }
    }
}

/// A crop window together with the frame it was taken from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowRegion {
    pub full_width: u32,
    pub full_height: u32,
    pub window: Rect,
}

impl WindowRegion {
    pub fn new(full: Dimension, window: Rect) -> Self {
        Self {
            full_width: full.width,
            full_height: full.height,
            window,
        }
    }

    /// Window spanning the whole frame
    pub fn whole(full: Dimension) -> Self {
        Self::new(full, Rect::full(full))
    }
}

/// Normalized window, coordinates in `[0, 1]` of the full frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowRegionF {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

/// Engine-facing crop description derived from IFE crop and IPE zoom
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowRegions {
    pub input: WindowRegionF,
    pub output: WindowRegionF,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_larger_area_prefers_self_on_tie() {
        let a = Dimension::new(1920, 1080);
        let b = Dimension::new(1080, 1920);
        assert_eq!(a.larger_area(b), a);
        assert_eq!(a.larger_area(Dimension::new(3840, 2160)).width, 3840);
    }

    #[test]
    fn test_shrink_by_saturates() {
        let dim = Dimension::new(100, 50);
        let shrunk = dim.shrink_by(StabilizationMargin::new(120, 10));
        assert_eq!(shrunk, Dimension::new(0, 40));
    }

    #[test]
    fn test_path_crops_selection() {
        let mut crops = PathCrops::uniform(Rect::new(0, 0, 10, 10));
        crops.display_ds4 = Rect::new(1, 2, 3, 4);
        assert_eq!(crops.for_path(PathType::DisplayDs4), Rect::new(1, 2, 3, 4));
        assert_eq!(crops.for_path(PathType::Full), Rect::new(0, 0, 10, 10));
    }
}
