//! Plane layouts, work partitioning and field selection.

use serde::{Deserialize, Serialize};

/// Byte layout of one plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    /// Bytes per row, including padding.
    pub pitch: usize,
    pub rows: usize,
}

impl PlaneLayout {
    pub const fn new(pitch: usize, rows: usize) -> Self {
        Self { pitch, rows }
    }

    pub fn bytes(&self) -> usize {
        self.pitch * self.rows
    }
}

/// Which rows a write pass touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldMode {
    #[default]
    Progressive,
    /// Even rows only.
    Top,
    /// Odd rows only.
    Bottom,
}

impl FieldMode {
    /// Whether row `y` belongs to this pass.
    #[inline]
    pub fn covers(self, y: usize) -> bool {
        match self {
            Self::Progressive => true,
            Self::Top => y % 2 == 0,
            Self::Bottom => y % 2 == 1,
        }
    }

    /// Kernel argument encoding.
    pub fn as_uint(self) -> u32 {
        match self {
            Self::Progressive => 0,
            Self::Top => 1,
            Self::Bottom => 2,
        }
    }

    pub fn from_uint(v: u32) -> Self {
        match v {
            1 => Self::Top,
            2 => Self::Bottom,
            _ => Self::Progressive,
        }
    }
}

/// How one row is split into work items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkGeometry {
    pub group_pixels: u32,
    /// Work items covering whole groups of pixels.
    pub full_groups: u32,
    /// Pixels left over after the full groups, `0 <= remain < group_pixels`.
    pub remain: u32,
}

impl WorkGeometry {
    pub fn new(width: u32, group_pixels: u32) -> Self {
        let group_pixels = group_pixels.max(1);
        Self {
            group_pixels,
            full_groups: width / group_pixels,
            remain: width % group_pixels,
        }
    }

    /// Work items per row, counting a partial final group.
    pub fn items(&self) -> u32 {
        self.full_groups + u32::from(self.remain > 0)
    }
}
