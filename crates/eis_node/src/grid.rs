//! Identity transforms and grid geometry conversion.

use contracts::{
    Dimension, EisError, GridExtrapolation, GridPoint, GridTransform, LdcGrids,
    PerspectiveTransform, TargetGeometry, TransformBundle, ICA10_GRID, ICA20_GRID, ICA30_GRID,
};

/// Builds the identity bundle for one target geometry.
///
/// The lattice only depends on the target, so it is computed once at node
/// creation and cloned into every identity bundle afterwards.
#[derive(Debug, Clone)]
pub struct IdentityFactory {
    target: TargetGeometry,
    grid: GridTransform,
}

impl IdentityFactory {
    pub fn new(target: TargetGeometry) -> Self {
        let grid = GridTransform {
            enable: true,
            defined_on: target.grid_domain(),
            geometry: target.published_grid(),
            extrapolation: target.identity_extrapolation(),
            corners: None,
            points: identity_lattice(target),
        };
        Self { target, grid }
    }

    pub fn target(&self) -> TargetGeometry {
        self.target
    }

    /// Identity bundle with perspective/alignment defined on `input`
    pub fn bundle(&self, input: Dimension) -> TransformBundle {
        TransformBundle {
            perspective: PerspectiveTransform::identity(input),
            grid: self.grid.clone(),
            alignment: PerspectiveTransform::identity(input),
        }
    }

    pub fn grid(&self) -> &GridTransform {
        &self.grid
    }
}

/// Identity lattice in the target's quantized virtual domain
///
/// ICA10 spans the domain edge to edge. The other targets carry one extra
/// point around the perimeter, so the first point sits at `-spacing`.
pub fn identity_lattice(target: TargetGeometry) -> Vec<GridPoint> {
    let geometry = target.published_grid();
    let domain = target.grid_domain();
    let (cols, rows) = (geometry.columns, geometry.rows);

    let (step_x, step_y, origin_x, origin_y) = match target.identity_extrapolation() {
        GridExtrapolation::ExtraPointAlongPerimeter => {
            let step_x = domain.width as f32 / (cols - 3) as f32;
            let step_y = domain.height as f32 / (rows - 3) as f32;
            (step_x, step_y, -step_x, -step_y)
        }
        _ => (
            domain.width as f32 / (cols - 1) as f32,
            domain.height as f32 / (rows - 1) as f32,
            0.0,
            0.0,
        ),
    };

    let mut points = Vec::with_capacity(geometry.len());
    for row in 0..rows {
        for col in 0..cols {
            points.push(GridPoint::new(
                origin_x + col as f32 * step_x,
                origin_y + row as f32 * step_y,
            ));
        }
    }
    points
}

/// Down-convert a 35x27 perimeter-extrapolated grid to the 33x25 ICA10 layout
///
/// The four outermost points become explicit corners, the perimeter ring is
/// dropped. Disabled grids pass through untouched.
pub fn convert_ica20_to_ica10(grid: &GridTransform) -> Result<GridTransform, EisError> {
    if !grid.enable {
        return Ok(grid.clone());
    }
    if grid.geometry != ICA20_GRID
        || grid.extrapolation != GridExtrapolation::ExtraPointAlongPerimeter
        || grid.points.len() != ICA20_GRID.len()
    {
        return Err(EisError::grid_conversion(format!(
            "expected {}x{} perimeter grid, got {}x{} {:?} with {} points",
            ICA20_GRID.columns,
            ICA20_GRID.rows,
            grid.geometry.columns,
            grid.geometry.rows,
            grid.extrapolation,
            grid.points.len()
        )));
    }

    let src_cols = ICA20_GRID.columns as usize;
    let src_rows = ICA20_GRID.rows as usize;
    let p = &grid.points;
    let corners = [
        p[0],
        p[src_cols - 1],
        p[src_cols * (src_rows - 1)],
        p[src_cols * src_rows - 1],
    ];

    let dst_cols = ICA10_GRID.columns as usize;
    let mut points = Vec::with_capacity(ICA10_GRID.len());
    for row in 0..ICA10_GRID.rows as usize {
        let start = src_cols + 1 + row * src_cols;
        points.extend_from_slice(&p[start..start + dst_cols]);
    }

    Ok(GridTransform {
        enable: true,
        defined_on: grid.defined_on,
        geometry: ICA10_GRID,
        extrapolation: GridExtrapolation::FourCorners,
        corners: Some(corners),
        points,
    })
}

/// Keep tuning-provided distortion grids only when both match the ICA30 lattice
pub fn checked_ldc_grids(camera_id: u32, grids: Option<LdcGrids>) -> Option<LdcGrids> {
    let grids = grids?;
    let expected = ICA30_GRID.len();
    if grids.input_to_undistorted.len() != expected || grids.undistorted_to_input.len() != expected
    {
        tracing::warn!(
            camera_id,
            expected,
            in2out = grids.input_to_undistorted.len(),
            out2in = grids.undistorted_to_input.len(),
            "Discarding LDC grids with unexpected size"
        );
        return None;
    }
    Some(grids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ica10_lattice_spans_domain() {
        let points = identity_lattice(TargetGeometry::Ica10);
        assert_eq!(points.len(), 33 * 25);
        assert_eq!(points[0], GridPoint::new(0.0, 0.0));
        assert_eq!(points[32], GridPoint::new(65536.0, 0.0));
        assert_eq!(points[points.len() - 1], GridPoint::new(65536.0, 49152.0));
    }

    #[test]
    fn test_perimeter_lattice_starts_outside_domain() {
        let points = identity_lattice(TargetGeometry::Ica20);
        assert_eq!(points.len(), 35 * 27);
        assert_eq!(points[0], GridPoint::new(-2048.0, -2048.0));
        // (1, 1) is the domain origin
        assert_eq!(points[36], GridPoint::new(0.0, 0.0));

        let points = identity_lattice(TargetGeometry::Ica30);
        assert_eq!(points.len(), 67 * 51);
        assert_eq!(points[68], GridPoint::new(0.0, 0.0));
        assert_eq!(points[67 * 49 + 65], GridPoint::new(131072.0, 98304.0));
    }

    #[test]
    fn test_identity_bundle_is_complete() {
        let factory = IdentityFactory::new(TargetGeometry::Ica20);
        let bundle = factory.bundle(Dimension::new(1920, 1080));
        assert!(bundle.is_complete());
        assert_eq!(bundle.perspective.defined_on, Dimension::new(1920, 1080));
        assert_eq!(bundle.grid.defined_on, Dimension::new(65536, 49152));
        assert!(bundle.grid.corners.is_none());

        let gpu = IdentityFactory::new(TargetGeometry::GpuGrid).bundle(Dimension::new(4, 4));
        assert!(gpu.grid.enable);
        assert_eq!(gpu.grid.geometry, ICA30_GRID);
    }

    #[test]
    fn test_convert_identity_grid_matches_ica10_lattice() {
        let ica20 = IdentityFactory::new(TargetGeometry::Ica20).grid().clone();
        let converted = convert_ica20_to_ica10(&ica20).unwrap();

        assert_eq!(converted.geometry, ICA10_GRID);
        assert_eq!(converted.extrapolation, GridExtrapolation::FourCorners);
        assert_eq!(converted.points, identity_lattice(TargetGeometry::Ica10));
        assert_eq!(
            converted.corners,
            Some([
                GridPoint::new(-2048.0, -2048.0),
                GridPoint::new(67584.0, -2048.0),
                GridPoint::new(-2048.0, 51200.0),
                GridPoint::new(67584.0, 51200.0),
            ])
        );
        assert!(converted.is_valid());
    }

    #[test]
    fn test_convert_rejects_wrong_geometry() {
        let ica30 = IdentityFactory::new(TargetGeometry::Ica30).grid().clone();
        assert!(matches!(
            convert_ica20_to_ica10(&ica30),
            Err(EisError::GridConversion { .. })
        ));

        let disabled = GridTransform::disabled();
        assert_eq!(convert_ica20_to_ica10(&disabled).unwrap(), disabled);
    }

    #[test]
    fn test_ldc_grids_size_check() {
        let good = LdcGrids {
            input_to_undistorted: vec![GridPoint::default(); ICA30_GRID.len()],
            undistorted_to_input: vec![GridPoint::default(); ICA30_GRID.len()],
        };
        assert!(checked_ldc_grids(0, Some(good.clone())).is_some());

        let bad = LdcGrids {
            undistorted_to_input: vec![],
            ..good
        };
        assert!(checked_ldc_grids(0, Some(bad)).is_none());
        assert!(checked_ldc_grids(0, None).is_none());
    }
}
