// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Triangle mesh produced by face tessellation

use super::BoundingBox;
use crate::utils::math::{signed_tetrahedron_volume, triangle_area, triangle_normal};
use ahash::AHashMap;
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

/// Vertex with position and normal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub position: Point3<f64>,
    pub normal: Vector3<f64>,
}

impl Vertex {
    pub fn new(position: Point3<f64>, normal: Vector3<f64>) -> Self {
        Self { position, normal }
    }
}

/// Triangle defined by three vertex indices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Triangle {
    pub indices: [usize; 3],
}

impl Triangle {
    pub fn new(indices: [usize; 3]) -> Self {
        Self { indices }
    }

    pub fn flipped(self) -> Self {
        let [a, b, c] = self.indices;
        Self { indices: [a, c, b] }
    }
}

/// Triangular mesh
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub triangles: Vec<Triangle>,
}

impl Mesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(vertex_count: usize, triangle_count: usize) -> Self {
        Self {
            vertices: Vec::with_capacity(vertex_count),
            triangles: Vec::with_capacity(triangle_count),
        }
    }

    /// Add a vertex and return its index
    pub fn add_vertex(&mut self, vertex: Vertex) -> usize {
        let index = self.vertices.len();
        self.vertices.push(vertex);
        index
    }

    pub fn add_triangle(&mut self, triangle: Triangle) {
        self.triangles.push(triangle);
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::from_points(self.vertices.iter().map(|v| &v.position))
    }

    /// Corner positions of triangle `index`
    pub fn triangle_points(&self, index: usize) -> [Point3<f64>; 3] {
        let [a, b, c] = self.triangles[index].indices;
        [
            self.vertices[a].position,
            self.vertices[b].position,
            self.vertices[c].position,
        ]
    }

    pub fn triangle_iter(&self) -> impl Iterator<Item = [Point3<f64>; 3]> + '_ {
        (0..self.triangles.len()).map(move |i| self.triangle_points(i))
    }

    /// Append another mesh (no welding)
    pub fn merge(&mut self, other: &Mesh) {
        let offset = self.vertices.len();
        self.vertices.extend_from_slice(&other.vertices);

        for triangle in &other.triangles {
            self.triangles.push(Triangle::new([
                triangle.indices[0] + offset,
                triangle.indices[1] + offset,
                triangle.indices[2] + offset,
            ]));
        }
    }

    /// Reverse the winding of every triangle
    pub fn flip(&mut self) {
        for triangle in &mut self.triangles {
            *triangle = triangle.flipped();
        }
        for vertex in &mut self.vertices {
            vertex.normal = -vertex.normal;
        }
    }

    pub fn surface_area(&self) -> f64 {
        self.triangle_iter()
            .map(|[a, b, c]| triangle_area(&a, &b, &c))
            .sum()
    }

    /// Signed volume by the divergence theorem; positive for outward winding
    pub fn signed_volume(&self) -> f64 {
        self.triangle_iter()
            .map(|[a, b, c]| signed_tetrahedron_volume(&a, &b, &c))
            .sum()
    }

    /// Volume-weighted centroid of the enclosed region
    pub fn centroid(&self) -> Option<Point3<f64>> {
        let mut volume = 0.0;
        let mut moment = Vector3::zeros();
        for [a, b, c] in self.triangle_iter() {
            let v = signed_tetrahedron_volume(&a, &b, &c);
            volume += v;
            moment += (a.coords + b.coords + c.coords) * (v / 4.0);
        }
        if volume.abs() < f64::EPSILON {
            return None;
        }
        Some(Point3::from(moment / volume))
    }

    /// Set every vertex normal to the normal of the last triangle using it
    pub fn recompute_normals(&mut self) {
        for i in 0..self.triangles.len() {
            let [a, b, c] = self.triangle_points(i);
            let normal = triangle_normal(&a, &b, &c);
            for &index in &self.triangles[i].indices {
                self.vertices[index].normal = normal;
            }
        }
    }

    /// Weld vertices closer than `epsilon`; returns the number removed
    pub fn weld_vertices(&mut self, epsilon: f64) -> usize {
        if self.vertices.is_empty() {
            return 0;
        }

        let cell = epsilon.max(f64::EPSILON);
        let key = |p: &Point3<f64>| {
            (
                (p.x / cell).floor() as i64,
                (p.y / cell).floor() as i64,
                (p.z / cell).floor() as i64,
            )
        };

        let original_count = self.vertices.len();
        let mut grid: AHashMap<(i64, i64, i64), Vec<usize>> = AHashMap::new();
        let mut welded: Vec<Vertex> = Vec::new();
        let mut remap = vec![0usize; original_count];

        for (i, vertex) in self.vertices.iter().enumerate() {
            let (kx, ky, kz) = key(&vertex.position);
            let mut found = None;
            'search: for dx in -1..=1 {
                for dy in -1..=1 {
                    for dz in -1..=1 {
                        if let Some(bucket) = grid.get(&(kx + dx, ky + dy, kz + dz)) {
                            for &j in bucket {
                                if (welded[j].position - vertex.position).norm() < epsilon {
                                    found = Some(j);
                                    break 'search;
                                }
                            }
                        }
                    }
                }
            }

            remap[i] = match found {
                Some(j) => j,
                None => {
                    let j = welded.len();
                    welded.push(*vertex);
                    grid.entry((kx, ky, kz)).or_default().push(j);
                    j
                }
            };
        }

        for triangle in &mut self.triangles {
            for index in &mut triangle.indices {
                *index = remap[*index];
            }
        }
        self.triangles
            .retain(|t| t.indices[0] != t.indices[1] && t.indices[1] != t.indices[2] && t.indices[0] != t.indices[2]);
        self.vertices = welded;

        original_count - self.vertices.len()
    }

    /// Number of undirected edges not shared by exactly two triangles
    pub fn boundary_edge_count(&self) -> usize {
        let mut counts: AHashMap<(usize, usize), usize> = AHashMap::new();
        for triangle in &self.triangles {
            let [a, b, c] = triangle.indices;
            for (u, v) in [(a, b), (b, c), (c, a)] {
                *counts.entry((u.min(v), u.max(v))).or_insert(0) += 1;
            }
        }
        counts.values().filter(|&&count| count != 2).count()
    }
}
