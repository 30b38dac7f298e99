// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Boundary-representation arena
//!
//! Vertices, edges and faces live in `slotmap` arenas and refer to each
//! other through typed handles. Faces reference shared edges through loops
//! of oriented edges, so adjacent faces of a well-formed model share the
//! same `EdgeId`. A `Model` is not modified once built; repair produces a
//! new one.

use super::{BoundingBox, MeshQuality};
use crate::utils::math::any_perpendicular;
use nalgebra::{Point3, Vector3};
use slotmap::{new_key_type, SlotMap};
use std::f64::consts::TAU;

new_key_type! {
    /// Handle to a vertex in a [`Model`]
    pub struct VertexId;
    /// Handle to an edge in a [`Model`]
    pub struct EdgeId;
    /// Handle to a face in a [`Model`]
    pub struct FaceId;
}

/// Right-handed orthonormal placement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    pub origin: Point3<f64>,
    pub z: Vector3<f64>,
    pub x: Vector3<f64>,
}

impl Frame {
    /// Build a frame, orthonormalising `x` against `z`
    pub fn new(origin: Point3<f64>, z: Vector3<f64>, x: Vector3<f64>) -> Self {
        let z = z.try_normalize(f64::EPSILON).unwrap_or_else(Vector3::z);
        let x = (x - z * x.dot(&z))
            .try_normalize(1e-12)
            .unwrap_or_else(|| any_perpendicular(&z));
        Self { origin, z, x }
    }

    pub fn world() -> Self {
        Self::new(Point3::origin(), Vector3::z(), Vector3::x())
    }

    pub fn y(&self) -> Vector3<f64> {
        self.z.cross(&self.x)
    }

    /// Local (x, y, z) coordinates of a world point
    pub fn to_local(&self, point: &Point3<f64>) -> Vector3<f64> {
        let d = point - self.origin;
        Vector3::new(d.dot(&self.x), d.dot(&self.y()), d.dot(&self.z))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    pub frame: Frame,
    pub radius: f64,
}

impl Circle {
    pub fn point_at(&self, angle: f64) -> Point3<f64> {
        self.frame.origin
            + (self.frame.x * angle.cos() + self.frame.y() * angle.sin()) * self.radius
    }

    /// Polar angle of a point around the circle axis, in [0, 2π)
    pub fn angle_of(&self, point: &Point3<f64>) -> f64 {
        let local = self.frame.to_local(point);
        local.y.atan2(local.x).rem_euclid(TAU)
    }
}

/// Geometry carried by an edge
#[derive(Debug, Clone, PartialEq)]
pub enum EdgeCurve {
    Line,
    Circle(Circle),
    /// Interior points between the edge's start and end vertices
    Polyline(Vec<Point3<f64>>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VertexData {
    pub point: Point3<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EdgeData {
    pub start: VertexId,
    pub end: VertexId,
    pub curve: EdgeCurve,
    /// Whether start→end follows the curve's own direction
    pub same_sense: bool,
}

impl EdgeData {
    pub fn is_closed(&self) -> bool {
        self.start == self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OrientedEdge {
    pub edge: EdgeId,
    pub forward: bool,
}

impl OrientedEdge {
    pub fn new(edge: EdgeId, forward: bool) -> Self {
        Self { edge, forward }
    }

    pub fn reversed(self) -> Self {
        Self {
            edge: self.edge,
            forward: !self.forward,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Loop {
    pub edges: Vec<OrientedEdge>,
}

impl Loop {
    pub fn new(edges: Vec<OrientedEdge>) -> Self {
        Self { edges }
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Same boundary walked the other way
    pub fn reversed(&self) -> Self {
        Self {
            edges: self.edges.iter().rev().map(|e| e.reversed()).collect(),
        }
    }
}

/// Underlying surface of a face
#[derive(Debug, Clone, PartialEq)]
pub enum Surface {
    Plane(Frame),
    Cylinder { frame: Frame, radius: f64 },
    /// Any other surface type, approximated from its boundary
    Other(String),
}

impl Surface {
    pub fn kind(&self) -> &str {
        match self {
            Self::Plane(_) => "plane",
            Self::Cylinder { .. } => "cylinder",
            Self::Other(name) => name,
        }
    }

    /// Natural surface normal at (or near) a point, if the surface is analytic
    pub fn normal_at(&self, point: &Point3<f64>) -> Option<Vector3<f64>> {
        match self {
            Self::Plane(frame) => Some(frame.z),
            Self::Cylinder { frame, .. } => {
                let d = point - frame.origin;
                (d - frame.z * d.dot(&frame.z)).try_normalize(1e-12)
            }
            Self::Other(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FaceData {
    pub surface: Surface,
    /// Whether the face normal agrees with the surface normal
    pub same_sense: bool,
    pub outer: Loop,
    pub inner: Vec<Loop>,
    /// Entity id of the face in the source STEP file
    pub step_id: Option<u64>,
}

impl FaceData {
    pub fn new(surface: Surface, outer: Loop) -> Self {
        Self {
            surface,
            same_sense: true,
            outer,
            inner: Vec::new(),
            step_id: None,
        }
    }

    pub fn loops(&self) -> impl Iterator<Item = &Loop> {
        std::iter::once(&self.outer).chain(self.inner.iter())
    }

    /// Flip the face: loops are walked backwards and the normal inverts
    pub fn reverse(&mut self) {
        self.outer = self.outer.reversed();
        for hole in &mut self.inner {
            *hole = hole.reversed();
        }
        self.same_sense = !self.same_sense;
    }
}

/// One parsed or constructed B-rep document
#[derive(Debug, Clone, Default)]
pub struct Model {
    name: Option<String>,
    vertices: SlotMap<VertexId, VertexData>,
    edges: SlotMap<EdgeId, EdgeData>,
    faces: SlotMap<FaceId, FaceData>,
    face_order: Vec<FaceId>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn add_vertex(&mut self, point: Point3<f64>) -> VertexId {
        self.vertices.insert(VertexData { point })
    }

    pub fn add_edge(
        &mut self,
        start: VertexId,
        end: VertexId,
        curve: EdgeCurve,
        same_sense: bool,
    ) -> EdgeId {
        self.edges.insert(EdgeData {
            start,
            end,
            curve,
            same_sense,
        })
    }

    pub fn add_line(&mut self, start: VertexId, end: VertexId) -> EdgeId {
        self.add_edge(start, end, EdgeCurve::Line, true)
    }

    /// Add a face; faces are enumerated in insertion order
    pub fn add_face(&mut self, face: FaceData) -> FaceId {
        let id = self.faces.insert(face);
        self.face_order.push(id);
        id
    }

    /// Add a straight-edged face that owns its own vertices and edges
    pub fn add_polygon_face(
        &mut self,
        outer: &[Point3<f64>],
        holes: &[Vec<Point3<f64>>],
        surface: Surface,
    ) -> FaceId {
        let outer = self.polygon_loop(outer);
        let inner = holes.iter().map(|h| self.polygon_loop(h)).collect();
        self.add_face(FaceData {
            inner,
            ..FaceData::new(surface, outer)
        })
    }

    pub(crate) fn polygon_loop(&mut self, points: &[Point3<f64>]) -> Loop {
        let ids: Vec<VertexId> = points.iter().map(|p| self.add_vertex(*p)).collect();
        let edges = (0..ids.len())
            .map(|i| {
                let edge = self.add_line(ids[i], ids[(i + 1) % ids.len()]);
                OrientedEdge::new(edge, true)
            })
            .collect();
        Loop::new(edges)
    }

    pub fn vertex(&self, id: VertexId) -> Option<&VertexData> {
        self.vertices.get(id)
    }

    pub fn edge(&self, id: EdgeId) -> Option<&EdgeData> {
        self.edges.get(id)
    }

    pub fn face(&self, id: FaceId) -> Option<&FaceData> {
        self.faces.get(id)
    }

    pub(crate) fn face_mut(&mut self, id: FaceId) -> Option<&mut FaceData> {
        self.faces.get_mut(id)
    }

    pub(crate) fn edge_mut(&mut self, id: EdgeId) -> Option<&mut EdgeData> {
        self.edges.get_mut(id)
    }

    pub(crate) fn remove_edge(&mut self, id: EdgeId) -> Option<EdgeData> {
        self.edges.remove(id)
    }

    pub(crate) fn remove_face(&mut self, id: FaceId) -> Option<FaceData> {
        self.face_order.retain(|&f| f != id);
        self.faces.remove(id)
    }

    pub fn point(&self, id: VertexId) -> Option<Point3<f64>> {
        self.vertices.get(id).map(|v| v.point)
    }

    pub fn vertices(&self) -> impl Iterator<Item = (VertexId, &VertexData)> {
        self.vertices.iter()
    }

    pub fn edges(&self) -> impl Iterator<Item = (EdgeId, &EdgeData)> {
        self.edges.iter()
    }

    /// Face handles in enumeration order
    pub fn face_ids(&self) -> &[FaceId] {
        &self.face_order
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn face_count(&self) -> usize {
        self.face_order.len()
    }

    /// Polyline approximation of an edge from its start to its end vertex
    pub fn sample_edge(&self, id: EdgeId, quality: &MeshQuality) -> Option<Vec<Point3<f64>>> {
        let edge = self.edges.get(id)?;
        let start = self.point(edge.start)?;
        let end = self.point(edge.end)?;

        let points = match &edge.curve {
            EdgeCurve::Line => vec![start, end],
            EdgeCurve::Polyline(interior) => {
                let mut points = Vec::with_capacity(interior.len() + 2);
                points.push(start);
                points.extend_from_slice(interior);
                points.push(end);
                points
            }
            EdgeCurve::Circle(circle) => {
                let (a0, sweep) = self.arc_span(edge, circle)?;
                let segments = quality.arc_segments(sweep.abs(), circle.radius, edge.is_closed());
                let mut points: Vec<Point3<f64>> = (0..=segments)
                    .map(|k| circle.point_at(a0 + sweep * k as f64 / segments as f64))
                    .collect();
                points[0] = start;
                points[segments] = end;
                points
            }
        };
        Some(points)
    }

    /// Start angle and signed sweep of a circular edge, walked start to end
    pub fn arc_span(&self, edge: &EdgeData, circle: &Circle) -> Option<(f64, f64)> {
        let a0 = circle.angle_of(&self.point(edge.start)?);
        let a1 = circle.angle_of(&self.point(edge.end)?);
        let sweep = match (edge.is_closed(), edge.same_sense) {
            (true, true) => TAU,
            (true, false) => -TAU,
            (false, true) => (a1 - a0).rem_euclid(TAU),
            (false, false) => -(a0 - a1).rem_euclid(TAU),
        };
        Some((a0, sweep))
    }

    pub fn sample_oriented(
        &self,
        oriented: &OrientedEdge,
        quality: &MeshQuality,
    ) -> Option<Vec<Point3<f64>>> {
        let mut points = self.sample_edge(oriented.edge, quality)?;
        if !oriented.forward {
            points.reverse();
        }
        Some(points)
    }

    /// Closed polygon of a loop, without the repeated closing point
    pub fn loop_points(&self, lp: &Loop, quality: &MeshQuality) -> Option<Vec<Point3<f64>>> {
        let mut points: Vec<Point3<f64>> = Vec::new();
        for oriented in &lp.edges {
            let samples = self.sample_oriented(oriented, quality)?;
            points.extend_from_slice(&samples[..samples.len() - 1]);
        }
        points.dedup_by(|a, b| (*a - *b).norm() < 1e-9);
        while points.len() > 1 {
            match (points.first(), points.last()) {
                (Some(first), Some(last)) if (first - last).norm() < 1e-9 => {
                    points.pop();
                }
                _ => break,
            }
        }
        Some(points)
    }

    /// Bounds of all vertices and sampled edges
    pub fn bounding_box(&self, quality: &MeshQuality) -> BoundingBox {
        let mut bbox = BoundingBox::from_points(self.vertices.values().map(|v| &v.point));
        for id in self.edges.keys() {
            if let Some(points) = self.sample_edge(id, quality) {
                for p in &points {
                    bbox.expand_to_include(p);
                }
            }
        }
        bbox
    }
}
