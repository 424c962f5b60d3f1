//! Warp transforms handed to the image-correction hardware.
//!
//! A [`TransformBundle`] carries the three pieces every consumer may read:
//! the stabilization perspective matrices, the dense warp grid and the gyro
//! alignment matrix. [`TargetGeometry`] picks the grid layout and publish
//! routing once per node.

use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

use crate::Dimension;

/// ICA virtual coordinate domain before quantization
pub const ICA_VIRTUAL_DOMAIN: Dimension = Dimension::new(8192, 6144);
/// Sub-pixel quantization of ICA 1.0/2.0 grid coordinates
pub const ICA_V20_QUANTIZATION: u32 = 8;
/// Sub-pixel quantization of ICA 3.0 grid coordinates
pub const ICA_V30_QUANTIZATION: u32 = 16;

pub const ICA10_GRID: GridGeometry = GridGeometry::new(33, 25);
pub const ICA20_GRID: GridGeometry = GridGeometry::new(35, 27);
pub const ICA30_GRID: GridGeometry = GridGeometry::new(67, 51);

/// Grid lattice size
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridGeometry {
    pub columns: u32,
    pub rows: u32,
}

impl GridGeometry {
    pub const fn new(columns: u32, rows: u32) -> Self {
        Self { columns, rows }
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.columns as usize * self.rows as usize
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// How grid points outside the frame are described
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridExtrapolation {
    /// Lattice spans exactly the frame
    #[default]
    None,
    /// Lattice spans the frame, four extra corner points are carried alongside
    FourCorners,
    /// Lattice has one extra ring of points outside the frame
    ExtraPointAlongPerimeter,
}

/// Single grid vertex
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GridPoint {
    pub x: f32,
    pub y: f32,
}

impl GridPoint {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Perspective matrices, one per horizontal stripe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerspectiveTransform {
    pub enable: bool,
    pub bypass_alignment_adjustment: bool,
    pub confidence: u32,
    pub num_rows: u32,
    pub num_columns: u32,
    pub defined_on: Dimension,
    pub matrices: Vec<Matrix3<f32>>,
}

impl PerspectiveTransform {
    /// Disabled placeholder, the consumer ignores it
    pub fn disabled() -> Self {
        Self {
            enable: false,
            bypass_alignment_adjustment: false,
            confidence: 0,
            num_rows: 0,
            num_columns: 0,
            defined_on: Dimension::default(),
            matrices: Vec::new(),
        }
    }

    /// Single identity matrix defined on `defined_on`
    pub fn identity(defined_on: Dimension) -> Self {
        Self {
            enable: true,
            bypass_alignment_adjustment: true,
            confidence: 1,
            num_rows: 1,
            num_columns: 1,
            defined_on,
            matrices: vec![Matrix3::identity()],
        }
    }

    pub fn is_valid(&self) -> bool {
        self.num_rows >= 1
            && self.num_columns >= 1
            && self.matrices.len() == self.num_rows as usize
            && !self.defined_on.is_empty()
    }
}

/// Dense warp grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridTransform {
    pub enable: bool,
    pub defined_on: Dimension,
    pub geometry: GridGeometry,
    pub extrapolation: GridExtrapolation,
    /// Present only with [`GridExtrapolation::FourCorners`]
    pub corners: Option<[GridPoint; 4]>,
    pub points: Vec<GridPoint>,
}

impl GridTransform {
    pub fn disabled() -> Self {
        Self {
            enable: false,
            defined_on: Dimension::default(),
            geometry: GridGeometry::default(),
            extrapolation: GridExtrapolation::None,
            corners: None,
            points: Vec::new(),
        }
    }

    #[inline]
    pub fn point(&self, column: u32, row: u32) -> Option<GridPoint> {
        if column >= self.geometry.columns || row >= self.geometry.rows {
            return None;
        }
        self.points
            .get((row * self.geometry.columns + column) as usize)
            .copied()
    }

    pub fn is_valid(&self) -> bool {
        !self.geometry.is_empty()
            && self.points.len() == self.geometry.len()
            && !self.defined_on.is_empty()
            && (self.extrapolation != GridExtrapolation::FourCorners || self.corners.is_some())
    }
}

/// Everything published per frame for the warp consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformBundle {
    pub perspective: PerspectiveTransform,
    pub grid: GridTransform,
    /// Gyro alignment in the stabilized domain
    pub alignment: PerspectiveTransform,
}

impl TransformBundle {
    pub fn disabled() -> Self {
        Self {
            perspective: PerspectiveTransform::disabled(),
            grid: GridTransform::disabled(),
            alignment: PerspectiveTransform::disabled(),
        }
    }

    /// Every part enabled and well formed
    pub fn is_complete(&self) -> bool {
        self.perspective.enable
            && self.perspective.is_valid()
            && self.grid.enable
            && self.grid.is_valid()
            && self.alignment.enable
            && self.alignment.is_valid()
    }
}

/// Engine deployment flavour, derived from [`TargetGeometry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentType {
    IcaV20,
    IcaV30,
    GpuPre,
}

/// Which warp consumer the node feeds. Selected once at creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetGeometry {
    Ica10,
    #[default]
    Ica20,
    Ica30,
    GpuGrid,
}

impl TargetGeometry {
    /// Grid layout produced by the stabilization engine
    pub const fn engine_grid(&self) -> GridGeometry {
        match self {
            Self::Ica10 | Self::Ica20 => ICA20_GRID,
            Self::Ica30 | Self::GpuGrid => ICA30_GRID,
        }
    }

    /// Grid layout the consumer reads
    pub const fn published_grid(&self) -> GridGeometry {
        match self {
            Self::Ica10 => ICA10_GRID,
            other => other.engine_grid(),
        }
    }

    pub const fn quantization(&self) -> u32 {
        match self {
            Self::Ica10 | Self::Ica20 => ICA_V20_QUANTIZATION,
            Self::Ica30 | Self::GpuGrid => ICA_V30_QUANTIZATION,
        }
    }

    /// Coordinate domain the published grid is expressed in
    pub const fn grid_domain(&self) -> Dimension {
        let q = self.quantization();
        Dimension::new(ICA_VIRTUAL_DOMAIN.width * q, ICA_VIRTUAL_DOMAIN.height * q)
    }

    pub const fn identity_extrapolation(&self) -> GridExtrapolation {
        match self {
            Self::Ica10 => GridExtrapolation::None,
            _ => GridExtrapolation::ExtraPointAlongPerimeter,
        }
    }

    pub const fn deployment(&self) -> DeploymentType {
        match self {
            Self::Ica10 | Self::Ica20 => DeploymentType::IcaV20,
            Self::Ica30 => DeploymentType::IcaV30,
            Self::GpuGrid => DeploymentType::GpuPre,
        }
    }

    #[inline]
    pub const fn is_gpu(&self) -> bool {
        matches!(self, Self::GpuGrid)
    }

    /// Engine grid must be reshaped before publishing
    #[inline]
    pub const fn needs_grid_conversion(&self) -> bool {
        matches!(self, Self::Ica10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_geometry_tables() {
        assert_eq!(TargetGeometry::Ica10.engine_grid(), ICA20_GRID);
        assert_eq!(TargetGeometry::Ica10.published_grid(), ICA10_GRID);
        assert_eq!(TargetGeometry::Ica30.published_grid().len(), 67 * 51);
        assert_eq!(TargetGeometry::Ica20.grid_domain(), Dimension::new(65536, 49152));
        assert_eq!(TargetGeometry::Ica30.grid_domain(), Dimension::new(131072, 98304));
        assert_eq!(TargetGeometry::Ica10.deployment(), DeploymentType::IcaV20);
        assert_eq!(TargetGeometry::GpuGrid.deployment(), DeploymentType::GpuPre);
    }

    #[test]
    fn test_identity_perspective_is_valid() {
        let p = PerspectiveTransform::identity(Dimension::new(1920, 1080));
        assert!(p.is_valid());
        assert_eq!(p.matrices[0], Matrix3::identity());
        assert!(!PerspectiveTransform::disabled().is_valid());
    }

    #[test]
    fn test_grid_point_lookup() {
        let grid = GridTransform {
            enable: true,
            defined_on: Dimension::new(4, 4),
            geometry: GridGeometry::new(2, 2),
            extrapolation: GridExtrapolation::None,
            corners: None,
            points: vec![
                GridPoint::new(0.0, 0.0),
                GridPoint::new(1.0, 0.0),
                GridPoint::new(0.0, 1.0),
                GridPoint::new(1.0, 1.0),
            ],
        };
        assert!(grid.is_valid());
        assert_eq!(grid.point(1, 1), Some(GridPoint::new(1.0, 1.0)));
        assert_eq!(grid.point(2, 0), None);
    }
}
