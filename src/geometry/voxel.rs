// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Voxel occupancy fallback
//!
//! The shape's surface mesh is rasterised into a regular lattice of cubic
//! cells covering its bounding box padded by one cell on every side. Each
//! cell centre is classified independently, and the estimate counts every
//! occupied cell at full volume. Cells straddling the surface are therefore
//! all-or-nothing, which biases the estimate at coarse pitches.

use super::classification::{CellState, SurfaceClassifier};
use super::tessellate::MeshQuality;
use super::Shape;
use crate::error::{ConfigError, Error, Result};
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const DEFAULT_MAX_CELLS: usize = 50_000_000;
const WELD_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelOptions {
    /// Cell edge length in mm
    pub pitch: f64,
    /// Refuse grids with more cells than this
    pub max_cells: usize,
    /// Tessellation used for the surface the cells are tested against
    pub quality: MeshQuality,
}

impl VoxelOptions {
    pub fn new(pitch: f64) -> Self {
        Self {
            pitch,
            max_cells: DEFAULT_MAX_CELLS,
            quality: MeshQuality::default(),
        }
    }

    pub fn with_max_cells(mut self, max_cells: usize) -> Self {
        self.max_cells = max_cells;
        self
    }

    pub fn with_quality(mut self, quality: MeshQuality) -> Self {
        self.quality = quality;
        self
    }
}

/// Placement and resolution of a voxel lattice
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridExtents {
    pub origin: [f64; 3],
    pub dims: [usize; 3],
    pub pitch: f64,
}

impl GridExtents {
    pub fn cell_count(&self) -> usize {
        self.dims.iter().product()
    }

    /// Edge lengths of the whole lattice in mm
    pub fn size(&self) -> [f64; 3] {
        self.dims.map(|n| n as f64 * self.pitch)
    }

    pub fn cell_volume(&self) -> f64 {
        self.pitch.powi(3)
    }
}

#[derive(Debug, Clone)]
pub struct VoxelGrid {
    extents: GridExtents,
    cells: Vec<CellState>,
}

impl VoxelGrid {
    pub fn extents(&self) -> &GridExtents {
        &self.extents
    }

    pub fn dims(&self) -> [usize; 3] {
        self.extents.dims
    }

    pub fn index(&self, i: usize, j: usize, k: usize) -> usize {
        let [nx, ny, _] = self.extents.dims;
        i + nx * (j + ny * k)
    }

    pub fn center(&self, i: usize, j: usize, k: usize) -> Point3<f64> {
        cell_center(&self.extents, i, j, k)
    }

    pub fn get(&self, i: usize, j: usize, k: usize) -> Option<CellState> {
        let [nx, ny, nz] = self.extents.dims;
        if i >= nx || j >= ny || k >= nz {
            return None;
        }
        self.cells.get(self.index(i, j, k)).copied()
    }

    pub fn count(&self, state: CellState) -> usize {
        self.cells.iter().filter(|&&c| c == state).count()
    }

    pub fn occupied(&self) -> usize {
        self.cells.iter().filter(|c| c.is_occupied()).count()
    }

    /// Occupied cells × pitch³
    pub fn volume(&self) -> f64 {
        self.occupied() as f64 * self.extents.cell_volume()
    }

    pub fn estimate(&self) -> VoxelEstimate {
        VoxelEstimate {
            volume: self.volume(),
            extents: self.extents,
            inside_cells: self.count(CellState::Inside),
            boundary_cells: self.count(CellState::Boundary),
            outside_cells: self.count(CellState::Outside),
        }
    }
}

/// Summary of one voxel run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoxelEstimate {
    /// Estimated volume in mm³
    pub volume: f64,
    pub extents: GridExtents,
    pub inside_cells: usize,
    pub boundary_cells: usize,
    pub outside_cells: usize,
}

/// Approximate volume (mm³) of any shape at `pitch` mm, with the grid used
pub fn voxel_volume<S: Shape + ?Sized>(shape: &S, pitch: f64) -> Result<(f64, GridExtents)> {
    let grid = voxelize(shape, &VoxelOptions::new(pitch))?;
    Ok((grid.volume(), grid.extents))
}

pub fn voxelize<S: Shape + ?Sized>(shape: &S, options: &VoxelOptions) -> Result<VoxelGrid> {
    let pitch = options.pitch;
    if !(pitch.is_finite() && pitch > 0.0) {
        return Err(ConfigError::InvalidPitch {
            pitch,
            min_extent: None,
        }
        .into());
    }

    let mut mesh = shape.surface_mesh(&options.quality);
    if mesh.is_empty() {
        return Err(Error::EmptyShape);
    }
    // Faces are tessellated separately; share their seam vertices
    let welded = mesh.weld_vertices(WELD_EPSILON);
    debug!(welded, open_edges = mesh.boundary_edge_count(), "surface mesh prepared");

    let bbox = mesh.bounding_box();
    let min_extent = bbox.min_extent();
    if pitch > min_extent {
        return Err(ConfigError::InvalidPitch {
            pitch,
            min_extent: Some(min_extent),
        }
        .into());
    }

    let size = bbox.size();
    let dims = [size.x, size.y, size.z].map(|extent| ((extent + 2.0 * pitch) / pitch).ceil() as usize);
    let cells = dims.iter().map(|&n| n as u128).product::<u128>();
    if cells > options.max_cells as u128 {
        return Err(ConfigError::GridTooLarge {
            cells,
            limit: options.max_cells,
        }
        .into());
    }

    let origin = bbox.min - Vector3::repeat(pitch);
    let extents = GridExtents {
        origin: [origin.x, origin.y, origin.z],
        dims,
        pitch,
    };
    info!(
        pitch,
        nx = dims[0],
        ny = dims[1],
        nz = dims[2],
        triangles = mesh.triangle_count(),
        "voxelizing"
    );

    let classifier = SurfaceClassifier::new(&mesh);
    let [nx, ny, _] = dims;
    let states: Vec<CellState> = (0..extents.cell_count())
        .into_par_iter()
        .map(|n| {
            let (i, j, k) = (n % nx, (n / nx) % ny, n / (nx * ny));
            classifier.classify(&cell_center(&extents, i, j, k))
        })
        .collect();

    Ok(VoxelGrid {
        extents,
        cells: states,
    })
}

fn cell_center(extents: &GridExtents, i: usize, j: usize, k: usize) -> Point3<f64> {
    let [ox, oy, oz] = extents.origin;
    let p = extents.pitch;
    Point3::new(
        ox + (i as f64 + 0.5) * p,
        oy + (j as f64 + 0.5) * p,
        oz + (k as f64 + 0.5) * p,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Mesh, Primitive};
    use approx::assert_relative_eq;

    #[test]
    fn test_aligned_cube_is_exact() {
        let model = Primitive::cube(10.0).to_model();
        let (volume, extents) = voxel_volume(&model, 0.5).unwrap();
        assert_eq!(extents.dims, [22, 22, 22]);
        assert_relative_eq!(volume, 1000.0, epsilon = 1e-9);
    }

    #[test]
    fn test_grid_covers_padded_box() {
        let model = Primitive::cube(10.0).to_model();
        let grid = voxelize(&model, &VoxelOptions::new(1.0)).unwrap();
        assert_eq!(grid.dims(), [12, 12, 12]);
        assert_eq!(grid.center(0, 0, 0), Point3::new(-0.5, -0.5, -0.5));
        assert_eq!(grid.get(0, 0, 0), Some(CellState::Outside));
        assert_eq!(grid.get(5, 5, 5), Some(CellState::Inside));
        assert_eq!(grid.get(12, 0, 0), None);
        let estimate = grid.estimate();
        assert_eq!(estimate.inside_cells + estimate.boundary_cells, 1000);
        assert_eq!(estimate.extents.cell_count(), 12 * 12 * 12);
    }

    #[test]
    fn test_invalid_pitch() {
        let model = Primitive::cube(10.0).to_model();
        for pitch in [0.0, -0.5, f64::NAN] {
            let err = voxel_volume(&model, pitch).unwrap_err();
            assert!(matches!(err, Error::Config(ConfigError::InvalidPitch { min_extent: None, .. })));
        }
        let err = voxel_volume(&model, 10.5).unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::InvalidPitch {
                min_extent: Some(_),
                ..
            })
        ));
    }

    #[test]
    fn test_cell_budget() {
        let model = Primitive::cube(10.0).to_model();
        let options = VoxelOptions::new(0.5).with_max_cells(1000);
        let err = voxelize(&model, &options).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::GridTooLarge { .. })));
    }

    #[test]
    fn test_empty_shape() {
        let err = voxel_volume(&Mesh::new(), 1.0).unwrap_err();
        assert!(matches!(err, Error::EmptyShape));
    }
}
