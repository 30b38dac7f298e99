// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! B-rep primitive builders
//!
//! Used for self-checks, benches and tests. `Topology::Shared` reuses edges
//! between neighbouring faces as a well-formed STEP solid would;
//! `Topology::Detached` gives every face its own vertices and edges, the way
//! faceted exports and surface soups arrive.

use super::brep::{Circle, EdgeCurve, EdgeId, FaceData, Frame, Loop, Model, OrientedEdge, Surface, VertexId};
use ahash::AHashMap;
use nalgebra::{Point3, Vector3};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    Shared,
    Detached,
}

/// Geometric primitives
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Cuboid { min: Point3<f64>, max: Point3<f64> },
    Cylinder { base: Point3<f64>, radius: f64, height: f64 },
    /// Cuboid whose +Z face is lifted by `gap`, leaving a band of free edges
    GappedCuboid { min: Point3<f64>, max: Point3<f64>, gap: f64 },
    /// Cuboid whose +X face is split at mid-height, leaving T-junctions
    SplitCuboid { min: Point3<f64>, max: Point3<f64> },
}

/// Corner indices of each cuboid face, counter-clockwise seen from outside.
/// Corner `i` takes max x for bit 0, max y for bit 1, max z for bit 2.
const CUBOID_FACES: [[usize; 4]; 6] = [
    [0, 2, 3, 1], // -Z
    [4, 5, 7, 6], // +Z
    [0, 1, 5, 4], // -Y
    [2, 6, 7, 3], // +Y
    [0, 4, 6, 2], // -X
    [1, 3, 7, 5], // +X
];

impl Primitive {
    pub fn cuboid(min: Point3<f64>, max: Point3<f64>) -> Self {
        Self::Cuboid { min, max }
    }

    /// Cube with one corner at the origin
    pub fn cube(edge: f64) -> Self {
        Self::cuboid(Point3::origin(), Point3::new(edge, edge, edge))
    }

    pub fn cylinder(radius: f64, height: f64) -> Self {
        Self::Cylinder {
            base: Point3::origin(),
            radius,
            height,
        }
    }

    pub fn gapped_cuboid(min: Point3<f64>, max: Point3<f64>, gap: f64) -> Self {
        Self::GappedCuboid { min, max, gap }
    }

    pub fn split_cuboid(min: Point3<f64>, max: Point3<f64>) -> Self {
        Self::SplitCuboid { min, max }
    }

    /// Exact enclosed volume of the ideal shape
    pub fn nominal_volume(&self) -> f64 {
        match self {
            Self::Cuboid { min, max }
            | Self::SplitCuboid { min, max }
            | Self::GappedCuboid { min, max, .. } => {
                let d = max - min;
                d.x * d.y * d.z
            }
            Self::Cylinder { radius, height, .. } => std::f64::consts::PI * radius * radius * height,
        }
    }

    /// Build with the topology natural to the primitive
    pub fn to_model(&self) -> Model {
        let topology = match self {
            Self::Cuboid { .. } | Self::Cylinder { .. } => Topology::Shared,
            Self::GappedCuboid { .. } | Self::SplitCuboid { .. } => Topology::Detached,
        };
        self.to_model_with(topology)
    }

    pub fn to_model_with(&self, topology: Topology) -> Model {
        let mut model = Model::with_name(self.name());
        self.append_to(&mut model, topology);
        model
    }

    /// Add this primitive's faces to an existing model
    pub fn append_to(&self, model: &mut Model, topology: Topology) {
        match self {
            Self::Cuboid { min, max } => {
                let corners = cuboid_corners(min, max);
                match topology {
                    Topology::Shared => shared_cuboid(model, &corners),
                    Topology::Detached => {
                        for quad in CUBOID_FACES {
                            add_quad(model, quad.map(|i| corners[i]));
                        }
                    }
                }
            }
            Self::Cylinder { base, radius, height } => cylinder(model, *base, *radius, *height),
            Self::GappedCuboid { min, max, gap } => {
                let corners = cuboid_corners(min, max);
                for quad in CUBOID_FACES {
                    let mut points = quad.map(|i| corners[i]);
                    if quad.iter().all(|&i| i & 4 != 0) {
                        for p in &mut points {
                            p.z += *gap;
                        }
                    }
                    add_quad(model, points);
                }
            }
            Self::SplitCuboid { min, max } => {
                let corners = cuboid_corners(min, max);
                for quad in CUBOID_FACES.into_iter().take(5) {
                    add_quad(model, quad.map(|i| corners[i]));
                }
                let mid = 0.5 * (min.z + max.z);
                let at = |y: f64, z: f64| Point3::new(max.x, y, z);
                add_quad(model, [at(min.y, min.z), at(max.y, min.z), at(max.y, mid), at(min.y, mid)]);
                add_quad(model, [at(min.y, mid), at(max.y, mid), at(max.y, max.z), at(min.y, max.z)]);
            }
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Cuboid { .. } => "cuboid",
            Self::Cylinder { .. } => "cylinder",
            Self::GappedCuboid { .. } => "gapped-cuboid",
            Self::SplitCuboid { .. } => "split-cuboid",
        }
    }
}

fn cuboid_corners(min: &Point3<f64>, max: &Point3<f64>) -> [Point3<f64>; 8] {
    std::array::from_fn(|i| {
        Point3::new(
            if i & 1 != 0 { max.x } else { min.x },
            if i & 2 != 0 { max.y } else { min.y },
            if i & 4 != 0 { max.z } else { min.z },
        )
    })
}

fn quad_plane(points: &[Point3<f64>; 4]) -> Surface {
    let normal = (points[1] - points[0]).cross(&(points[2] - points[0]));
    Surface::Plane(Frame::new(points[0], normal, points[1] - points[0]))
}

fn add_quad(model: &mut Model, points: [Point3<f64>; 4]) {
    let surface = quad_plane(&points);
    model.add_polygon_face(&points, &[], surface);
}

fn shared_cuboid(model: &mut Model, corners: &[Point3<f64>; 8]) {
    let vertices: Vec<VertexId> = corners.iter().map(|p| model.add_vertex(*p)).collect();
    let mut edges: AHashMap<(usize, usize), (EdgeId, usize)> = AHashMap::new();

    for quad in CUBOID_FACES {
        let mut oriented = Vec::with_capacity(4);
        for k in 0..4 {
            let (a, b) = (quad[k], quad[(k + 1) % 4]);
            let (edge, start) = *edges
                .entry((a.min(b), a.max(b)))
                .or_insert_with(|| (model.add_line(vertices[a], vertices[b]), a));
            oriented.push(OrientedEdge::new(edge, start == a));
        }
        let surface = quad_plane(&quad.map(|i| corners[i]));
        model.add_face(FaceData::new(surface, Loop::new(oriented)));
    }
}

fn cylinder(model: &mut Model, base: Point3<f64>, radius: f64, height: f64) {
    let z = Vector3::z();
    let x = Vector3::x();
    let top = base + z * height;
    let bottom_frame = Frame::new(base, z, x);
    let top_frame = Frame::new(top, z, x);

    let s0 = model.add_vertex(base + x * radius);
    let s1 = model.add_vertex(top + x * radius);
    let bottom = model.add_edge(
        s0,
        s0,
        EdgeCurve::Circle(Circle {
            frame: bottom_frame,
            radius,
        }),
        true,
    );
    let upper = model.add_edge(
        s1,
        s1,
        EdgeCurve::Circle(Circle {
            frame: top_frame,
            radius,
        }),
        true,
    );
    let seam = model.add_line(s0, s1);

    model.add_face(FaceData::new(
        Surface::Plane(Frame::new(base, -z, x)),
        Loop::new(vec![OrientedEdge::new(bottom, false)]),
    ));
    model.add_face(FaceData::new(
        Surface::Plane(top_frame),
        Loop::new(vec![OrientedEdge::new(upper, true)]),
    ));
    model.add_face(FaceData::new(
        Surface::Cylinder {
            frame: bottom_frame,
            radius,
        },
        Loop::new(vec![
            OrientedEdge::new(bottom, true),
            OrientedEdge::new(seam, true),
            OrientedEdge::new(upper, false),
            OrientedEdge::new(seam, false),
        ]),
    ));
}
