// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Geometry module - B-rep arena, tessellation, sewing and volume

mod bbox;
pub mod brep;
mod classification;
mod faces;
mod mesh;
mod primitives;
mod sewing;
mod tessellate;
mod volume;
mod voxel;

pub use bbox::BoundingBox;
pub use brep::{
    Circle, EdgeCurve, EdgeData, EdgeId, FaceData, FaceId, Frame, Loop, Model, OrientedEdge, Surface, VertexData,
    VertexId,
};
pub use classification::{winding_number, CellState, SurfaceClassifier};
pub use faces::{enumerate_faces, Face};
pub use mesh::{Mesh, Triangle, Vertex};
pub use primitives::{Primitive, Topology};
pub use sewing::{repair, RepairFailure, RepairOutcome, SewingStats, Solid};
pub use tessellate::{triangulate_face, MeshQuality};
pub use volume::{exact_volume, exact_volume_with, net_volume, solid_properties, solid_properties_with, ShellProperties};
pub use voxel::{voxel_volume, voxelize, GridExtents, VoxelEstimate, VoxelGrid, VoxelOptions, DEFAULT_MAX_CELLS};

use tracing::debug;

/// Anything that can be measured: exposes a triangulated boundary
pub trait Shape {
    fn surface_mesh(&self, quality: &MeshQuality) -> Mesh;
}

impl Shape for Model {
    /// Union of all face tessellations; faces that fail to mesh are left out
    fn surface_mesh(&self, quality: &MeshQuality) -> Mesh {
        let mut mesh = Mesh::new();
        let Ok(faces) = enumerate_faces(self) else {
            return mesh;
        };
        for face in faces {
            match face.triangulate(quality) {
                Ok(part) => mesh.merge(&part),
                Err(err) => debug!(face = face.index(), "left out of surface mesh: {err}"),
            }
        }
        mesh
    }
}

impl Shape for Solid {
    fn surface_mesh(&self, quality: &MeshQuality) -> Mesh {
        self.model().surface_mesh(quality)
    }
}

impl Shape for Mesh {
    fn surface_mesh(&self, _quality: &MeshQuality) -> Mesh {
        self.clone()
    }
}
