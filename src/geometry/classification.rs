// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Point containment against a possibly open surface
//!
//! Rays are cast along three fixed skewed directions through a `parry3d`
//! triangle mesh and crossings are counted per ray. Unanimous parity decides
//! directly. When the rays disagree, which happens next to gaps and
//! non-manifold seams, the generalised winding number of the surface decides
//! instead.

use super::mesh::Mesh;
use crate::utils::math::solid_angle;
use nalgebra::{Point3, Vector3};
use parry3d::math::{Point as ParryPoint, Vector as ParryVector};
use parry3d::query::{Ray, RayCast};
use parry3d::shape::TriMesh;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Skewed so rays rarely graze edges or vertices of axis-aligned models
const RAY_DIRECTIONS: [[f64; 3]; 3] = [
    [1.0, 0.2718, 0.1414],
    [-0.2236, 1.0, 0.3162],
    [0.1732, -0.2449, 1.0],
];

/// Upper bound on crossings followed along one ray
const MAX_CROSSINGS: usize = 4096;

/// Occupancy of one sample point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellState {
    Outside,
    Inside,
    /// Ray votes disagreed and the winding number placed the point inside
    Boundary,
}

impl CellState {
    /// Whether the cell counts towards the volume
    pub fn is_occupied(self) -> bool {
        !matches!(self, Self::Outside)
    }
}

/// Containment oracle for one surface mesh
pub struct SurfaceClassifier {
    mesh: Mesh,
    trimesh: Option<TriMesh>,
    // parry3d works in f32; coordinates are shifted near the origin first
    offset: Vector3<f64>,
    reach: f32,
    step: f32,
    directions: [ParryVector<f32>; 3],
}

impl SurfaceClassifier {
    pub fn new(mesh: &Mesh) -> Self {
        let bbox = mesh.bounding_box();
        let offset = if bbox.is_empty() { Vector3::zeros() } else { bbox.center().coords };
        let diagonal = bbox.diagonal().max(1.0);

        let trimesh = (!mesh.triangles.is_empty()).then(|| {
            let points: Vec<ParryPoint<f32>> = mesh
                .vertices
                .iter()
                .map(|v| {
                    let p = v.position.coords - offset;
                    ParryPoint::new(p.x as f32, p.y as f32, p.z as f32)
                })
                .collect();
            let indices: Vec<[u32; 3]> = mesh
                .triangles
                .iter()
                .map(|t| t.indices.map(|i| i as u32))
                .collect();
            TriMesh::new(points, indices)
        });

        let directions = RAY_DIRECTIONS.map(|[x, y, z]| {
            let d = Vector3::new(x, y, z).normalize();
            ParryVector::new(d.x as f32, d.y as f32, d.z as f32)
        });

        Self {
            mesh: mesh.clone(),
            trimesh,
            offset,
            reach: (4.0 * diagonal) as f32,
            step: (diagonal * 1e-5).max(1e-6) as f32,
            directions,
        }
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    /// Number of surface crossings along ray `direction` from `point`.
    ///
    /// `direction` indexes the classifier's fixed ray set, modulo its length.
    /// Counting stops at `MAX_CROSSINGS`.
    pub fn crossings(&self, point: &Point3<f64>, direction: usize) -> usize {
        let Some(trimesh) = &self.trimesh else {
            return 0;
        };
        let local = point.coords - self.offset;
        let mut origin = ParryPoint::new(local.x as f32, local.y as f32, local.z as f32);
        let dir = self.directions[direction % self.directions.len()];
        let mut travelled = 0.0f32;
        let mut count = 0;

        while count < MAX_CROSSINGS && travelled < self.reach {
            let ray = Ray::new(origin, dir);
            let Some(toi) = trimesh.cast_local_ray(&ray, self.reach - travelled, false) else {
                break;
            };
            count += 1;
            origin = ray.point_at(toi + self.step);
            travelled += toi + self.step;
        }
        count
    }

    /// Generalised winding number of the surface around `point`
    pub fn winding_number(&self, point: &Point3<f64>) -> f64 {
        winding_number(&self.mesh, point)
    }

    pub fn classify(&self, point: &Point3<f64>) -> CellState {
        if self.trimesh.is_none() {
            return CellState::Outside;
        }
        let odd = (0..RAY_DIRECTIONS.len())
            .filter(|&d| self.crossings(point, d) % 2 == 1)
            .count();
        match odd {
            0 => CellState::Outside,
            n if n == RAY_DIRECTIONS.len() => CellState::Inside,
            _ if self.winding_number(point).abs() > 0.5 => CellState::Boundary,
            _ => CellState::Outside,
        }
    }
}

/// Sum of signed solid angles over 4π; about ±1 inside a closed surface
pub fn winding_number(mesh: &Mesh, point: &Point3<f64>) -> f64 {
    let total: f64 = mesh
        .triangle_iter()
        .map(|[a, b, c]| solid_angle(point, &a, &b, &c))
        .sum();
    total / (4.0 * PI)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{MeshQuality, Primitive, Shape};
    use approx::assert_relative_eq;

    fn cube_mesh() -> Mesh {
        Primitive::cube(10.0).to_model().surface_mesh(&MeshQuality::default())
    }

    #[test]
    fn test_winding_number_of_closed_cube() {
        let mesh = cube_mesh();
        assert_relative_eq!(winding_number(&mesh, &Point3::new(5.0, 5.0, 5.0)), 1.0, epsilon = 1e-9);
        assert_relative_eq!(winding_number(&mesh, &Point3::new(15.0, 5.0, 5.0)), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_classify_closed_cube() {
        let classifier = SurfaceClassifier::new(&cube_mesh());
        assert_eq!(classifier.classify(&Point3::new(2.5, 7.5, 5.0)), CellState::Inside);
        assert_eq!(classifier.classify(&Point3::new(-1.0, 5.0, 5.0)), CellState::Outside);
        assert_eq!(classifier.classify(&Point3::new(5.0, 5.0, 12.0)), CellState::Outside);
        assert_eq!(classifier.crossings(&Point3::new(5.0, 5.0, 5.0), 0), 1);
        assert_eq!(classifier.crossings(&Point3::new(-5.0, 4.0, 4.0), 0), 2);
    }

    #[test]
    fn test_crossings_count_every_nested_shell() {
        let quality = MeshQuality::default();
        let mut nested = cube_mesh();
        let inner = Primitive::cuboid(Point3::new(3.0, 3.0, 3.0), Point3::new(7.0, 7.0, 7.0));
        nested.merge(&inner.to_model().surface_mesh(&quality));

        let classifier = SurfaceClassifier::new(&nested);
        // In through the outer cube, through the inner one, out again
        assert_eq!(classifier.crossings(&Point3::new(-5.0, 3.5, 4.5), 0), 4);
        assert_eq!(classifier.crossings(&Point3::new(5.0, 5.0, 5.0), 0), 2);
    }

    #[test]
    fn test_open_box_falls_back_to_winding() {
        // Drop the +Z face: rays leaving upwards see no crossing
        let mut open = Mesh::new();
        let model = Primitive::cube(10.0).to_model();
        for (index, &id) in model.face_ids().iter().enumerate() {
            if index == 1 {
                continue;
            }
            let face = model.face(id).unwrap();
            let mesh = crate::geometry::triangulate_face(&model, face, index, &MeshQuality::default()).unwrap();
            open.merge(&mesh);
        }

        let classifier = SurfaceClassifier::new(&open);
        // Deep inside, the missing lid subtends a small solid angle
        let deep = Point3::new(5.0, 5.0, 1.0);
        assert!(classifier.winding_number(&deep) > 0.5);
        assert!(classifier.classify(&deep).is_occupied());
        // Near the open top most of the view is the hole
        let near_lid = Point3::new(5.0, 5.0, 9.9);
        assert!(classifier.winding_number(&near_lid) < 0.6);
    }

    #[test]
    fn test_empty_mesh_is_outside() {
        let classifier = SurfaceClassifier::new(&Mesh::new());
        assert_eq!(classifier.classify(&Point3::origin()), CellState::Outside);
    }
}
