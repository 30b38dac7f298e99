// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Face tessellation
//!
//! Each face boundary is sampled, mapped into the face's parameter plane and
//! triangulated with a constrained Delaunay triangulation. Inner loops become
//! holes through a flood fill over constraint edges. Triangles come out
//! counter-clockwise in parameter space, which is the surface normal side in
//! 3D; faces with `same_sense == false` are flipped afterwards.

use super::brep::{FaceData, Frame, Model, Surface};
use super::mesh::{Mesh, Triangle, Vertex};
use crate::error::{ConfigError, MeshingError};
use crate::utils::math::{newell_normal, polygon_area, triangle_area, wrap_angle};
use ahash::{AHashMap, AHashSet};
use nalgebra::{Point2, Point3, Vector3};
use serde::{Deserialize, Serialize};
use spade::handles::{FixedFaceHandle, InnerTag};
use spade::{ConstrainedDelaunayTriangulation, Point2 as SpadePoint2, Triangulation};
use std::collections::VecDeque;
use std::f64::consts::TAU;
use tracing::debug;

const MAX_ARC_SEGMENTS: usize = 4096;
const AREA_EPS: f64 = 1e-9;

/// Deflection limits used when sampling curved boundaries
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeshQuality {
    /// Maximum chord height in mm
    pub linear_deflection: f64,
    /// Maximum angle subtended by one segment, in radians
    pub angular_deflection: f64,
}

impl MeshQuality {
    pub fn new(linear_deflection: f64, angular_deflection: f64) -> Self {
        Self {
            linear_deflection,
            angular_deflection,
        }
    }

    pub fn coarse() -> Self {
        Self::new(0.9, 0.5)
    }

    pub fn fine() -> Self {
        Self::new(0.01, 0.1)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for value in [self.linear_deflection, self.angular_deflection] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::InvalidDeflection(value));
            }
        }
        Ok(())
    }

    /// Segment count for an arc of `sweep` radians on a circle of `radius`
    pub fn arc_segments(&self, sweep: f64, radius: f64, closed: bool) -> usize {
        let sweep = sweep.abs();
        let by_angle = (sweep / self.angular_deflection).ceil();
        let by_chord = if radius > self.linear_deflection {
            let step = 2.0 * (1.0 - self.linear_deflection / radius).acos();
            (sweep / step).ceil()
        } else {
            1.0
        };
        let minimum = if closed { 3 } else { 1 };
        (by_angle.max(by_chord) as usize).clamp(minimum, MAX_ARC_SEGMENTS)
    }
}

impl Default for MeshQuality {
    fn default() -> Self {
        Self::new(0.1, 0.5)
    }
}

/// Maps boundary points into a 2D parameter plane
enum Chart {
    Planar(Frame),
    Cylindrical { frame: Frame, radius: f64 },
}

impl Chart {
    fn project_loop(&self, points: &[Point3<f64>]) -> Vec<Point2<f64>> {
        match self {
            Self::Planar(frame) => points
                .iter()
                .map(|p| {
                    let local = frame.to_local(p);
                    Point2::new(local.x, local.y)
                })
                .collect(),
            Self::Cylindrical { frame, radius } => {
                // Unwrap the polar angle along the loop so seams stay continuous
                let mut out = Vec::with_capacity(points.len());
                let mut previous: Option<f64> = None;
                let mut theta = 0.0;
                for p in points {
                    let local = frame.to_local(p);
                    let raw = local.y.atan2(local.x);
                    theta = match previous {
                        None => raw.rem_euclid(TAU),
                        Some(prev) => theta + wrap_angle(raw - prev),
                    };
                    previous = Some(raw);
                    out.push(Point2::new(theta * radius, local.z));
                }
                out
            }
        }
    }

    fn period(&self) -> Option<f64> {
        match self {
            Self::Planar(_) => None,
            Self::Cylindrical { radius, .. } => Some(TAU * radius),
        }
    }
}

/// Triangulate one face into an open mesh oriented along the face normal
pub fn triangulate_face(
    model: &Model,
    face: &FaceData,
    index: usize,
    quality: &MeshQuality,
) -> Result<Mesh, MeshingError> {
    let dangling = || MeshingError::Triangulation {
        face: index,
        message: "boundary references a missing edge or vertex".to_string(),
    };

    let outer = model.loop_points(&face.outer, quality).ok_or_else(dangling)?;
    if outer.len() < 3 {
        return Err(MeshingError::Degenerate {
            face: index,
            reason: format!("{} distinct boundary points", outer.len()),
        });
    }

    let mut holes = Vec::with_capacity(face.inner.len());
    for lp in &face.inner {
        let points = model.loop_points(lp, quality).ok_or_else(dangling)?;
        if points.len() >= 3 {
            holes.push(points);
        } else {
            debug!(face = index, "ignoring inner loop with {} points", points.len());
        }
    }

    let (chart, flip) = match &face.surface {
        Surface::Plane(frame) => (Chart::Planar(*frame), !face.same_sense),
        Surface::Cylinder { frame, radius } => (
            Chart::Cylindrical {
                frame: *frame,
                radius: *radius,
            },
            !face.same_sense,
        ),
        Surface::Other(kind) => {
            debug!(face = index, surface = %kind, "approximating surface by its boundary plane");
            let normal = newell_normal(&outer);
            if normal.norm() <= f64::EPSILON {
                return Err(MeshingError::Degenerate {
                    face: index,
                    reason: "zero area".to_string(),
                });
            }
            // The loop already winds around the face normal
            (
                Chart::Planar(Frame::new(outer[0], normal, outer[1] - outer[0])),
                false,
            )
        }
    };

    let outer_2d = chart.project_loop(&outer);
    if is_degenerate(&outer_2d) {
        if let (Chart::Cylindrical { frame, .. }, [band]) = (&chart, holes.as_slice()) {
            if is_degenerate(&chart.project_loop(band)) {
                return finish(stitch_band(&outer, band, frame, face.same_sense), index);
            }
        }
        return Err(MeshingError::Degenerate {
            face: index,
            reason: "zero area".to_string(),
        });
    }

    let mut loops_2d = vec![outer_2d];
    let mut loops_3d = vec![outer];
    for hole in holes {
        let mut hole_2d = chart.project_loop(&hole);
        if let Some(period) = chart.period() {
            shift_into_range(&mut hole_2d, &loops_2d[0], period);
        }
        loops_2d.push(hole_2d);
        loops_3d.push(hole);
    }

    let mut mesh = triangulate_loops(&loops_2d, &loops_3d, index)?;
    if flip {
        mesh.flip();
    }
    if matches!(face.surface, Surface::Other(_)) {
        mesh.recompute_normals();
    } else {
        let sign = if face.same_sense { 1.0 } else { -1.0 };
        for vertex in &mut mesh.vertices {
            if let Some(n) = face.surface.normal_at(&vertex.position) {
                vertex.normal = n * sign;
            }
        }
    }
    finish(mesh, index)
}

fn finish(mut mesh: Mesh, index: usize) -> Result<Mesh, MeshingError> {
    let before = mesh.triangle_count();
    let vertices = mesh.vertices.clone();
    mesh.triangles.retain(|t| {
        let [a, b, c] = t.indices;
        triangle_area(&vertices[a].position, &vertices[b].position, &vertices[c].position) > 1e-14
    });
    if mesh.triangle_count() < before {
        debug!(face = index, dropped = before - mesh.triangle_count(), "dropped sliver triangles");
    }
    if mesh.is_empty() {
        return Err(MeshingError::NoTriangles { face: index });
    }
    Ok(mesh)
}

fn is_degenerate(points: &[Point2<f64>]) -> bool {
    let perimeter: f64 = (0..points.len())
        .map(|i| (points[(i + 1) % points.len()] - points[i]).norm())
        .sum();
    polygon_area(points).abs() <= AREA_EPS * perimeter * perimeter
}

/// Move a periodic hole loop so it overlaps the outer loop's u range
fn shift_into_range(hole: &mut [Point2<f64>], outer: &[Point2<f64>], period: f64) {
    let (u_min, u_max) = outer
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| (lo.min(p.x), hi.max(p.x)));
    let mean = hole.iter().map(|p| p.x).sum::<f64>() / hole.len() as f64;
    if !(period.is_finite() && period > 0.0 && mean.is_finite()) {
        return;
    }
    let mut shift = 0.0;
    while mean + shift < u_min {
        shift += period;
    }
    while mean + shift > u_max {
        shift -= period;
    }
    for p in hole.iter_mut() {
        p.x += shift;
    }
}

fn triangulate_loops(
    loops_2d: &[Vec<Point2<f64>>],
    loops_3d: &[Vec<Point3<f64>>],
    index: usize,
) -> Result<Mesh, MeshingError> {
    let failure = |message: String| MeshingError::Triangulation {
        face: index,
        message,
    };

    let mut cdt = ConstrainedDelaunayTriangulation::<SpadePoint2<f64>>::new();
    let mut lifted: AHashMap<usize, Point3<f64>> = AHashMap::new();

    for (points_2d, points_3d) in loops_2d.iter().zip(loops_3d) {
        let mut handles = Vec::with_capacity(points_2d.len());
        for (p2, p3) in points_2d.iter().zip(points_3d) {
            let handle = cdt
                .insert(SpadePoint2::new(p2.x, p2.y))
                .map_err(|e| failure(format!("CDT insert: {e:?}")))?;
            lifted.entry(handle.index()).or_insert(*p3);
            handles.push(handle);
        }

        for i in 0..handles.len() {
            let from = handles[i];
            let to = handles[(i + 1) % handles.len()];
            if from == to {
                continue;
            }
            if !cdt.can_add_constraint(from, to) {
                return Err(failure("self-intersecting boundary".to_string()));
            }
            cdt.add_constraint(from, to);
        }
    }

    let interior = classify_interior_faces(&cdt);
    let mut mesh = Mesh::with_capacity(lifted.len(), interior.len());
    let mut vertex_map: AHashMap<usize, usize> = AHashMap::new();

    for face_handle in cdt.inner_faces() {
        if !interior.contains(&face_handle.fix().index()) {
            continue;
        }

        let verts = face_handle.vertices();
        let p: Vec<SpadePoint2<f64>> = verts.iter().map(|v| v.position()).collect();
        let ccw = (p[1].x - p[0].x) * (p[2].y - p[0].y) - (p[1].y - p[0].y) * (p[2].x - p[0].x) >= 0.0;

        let mut indices = [0usize; 3];
        for (slot, vh) in verts.iter().enumerate() {
            let key = vh.fix().index();
            indices[slot] = match vertex_map.get(&key) {
                Some(&existing) => existing,
                None => {
                    let position = lifted
                        .get(&key)
                        .copied()
                        .ok_or_else(|| failure("triangulation introduced a vertex".to_string()))?;
                    let new_index = mesh.add_vertex(Vertex::new(position, Vector3::zeros()));
                    vertex_map.insert(key, new_index);
                    new_index
                }
            };
        }

        let triangle = Triangle::new(indices);
        mesh.add_triangle(if ccw { triangle } else { triangle.flipped() });
    }

    Ok(mesh)
}

/// Flood fill from the outer face; odd constraint-crossing depth is interior
fn classify_interior_faces(cdt: &ConstrainedDelaunayTriangulation<SpadePoint2<f64>>) -> AHashSet<usize> {
    let mut interior = AHashSet::new();
    let mut depth_map: AHashMap<usize, u32> = AHashMap::new();
    let mut queue: VecDeque<(FixedFaceHandle<InnerTag>, u32)> = VecDeque::new();

    let outer_fix = cdt.outer_face().fix();

    for edge in cdt.directed_edges() {
        if edge.face().fix() != outer_fix {
            continue;
        }
        if let Some(inner) = edge.rev().face().as_inner() {
            let idx = inner.fix().index();
            if depth_map.contains_key(&idx) {
                continue;
            }
            let depth = u32::from(cdt.is_constraint_edge(edge.as_undirected().fix()));
            depth_map.insert(idx, depth);
            if depth % 2 == 1 {
                interior.insert(idx);
            }
            queue.push_back((inner.fix(), depth));
        }
    }

    while let Some((face_fix, depth)) = queue.pop_front() {
        for edge in cdt.face(face_fix).adjacent_edges() {
            let Some(neighbor) = edge.rev().face().as_inner() else {
                continue;
            };
            let idx = neighbor.fix().index();
            if depth_map.contains_key(&idx) {
                continue;
            }
            let next = depth + u32::from(cdt.is_constraint_edge(edge.as_undirected().fix()));
            depth_map.insert(idx, next);
            if next % 2 == 1 {
                interior.insert(idx);
            }
            queue.push_back((neighbor.fix(), next));
        }
    }

    interior
}

/// Triangle strip between two full circles bounding a cylindrical band
fn stitch_band(a: &[Point3<f64>], b: &[Point3<f64>], frame: &Frame, same_sense: bool) -> Mesh {
    let angle = |p: &Point3<f64>| {
        let local = frame.to_local(p);
        local.y.atan2(local.x).rem_euclid(TAU)
    };
    let sorted = |points: &[Point3<f64>]| {
        let mut tagged: Vec<(f64, Point3<f64>)> = points.iter().map(|p| (angle(p), *p)).collect();
        tagged.sort_by(|x, y| x.0.total_cmp(&y.0));
        tagged
    };
    let a = sorted(a);
    let b = sorted(b);
    let (na, nb) = (a.len(), b.len());
    let unwrapped = |ring: &[(f64, Point3<f64>)], k: usize| ring[k % ring.len()].0 + TAU * (k / ring.len()) as f64;

    let mut mesh = Mesh::with_capacity(na + nb, na + nb);
    for (_, p) in a.iter().chain(b.iter()) {
        let radial = frame.to_local(p);
        let n = frame.x * radial.x + frame.y() * radial.y;
        let n = n.try_normalize(1e-12).unwrap_or_else(Vector3::zeros);
        mesh.add_vertex(Vertex::new(*p, if same_sense { n } else { -n }));
    }

    let (mut i, mut j) = (0usize, 0usize);
    while i < na || j < nb {
        let advance_a = if i == na {
            false
        } else if j == nb {
            true
        } else {
            unwrapped(&a, i + 1) <= unwrapped(&b, j + 1)
        };
        let triangle = if advance_a {
            let t = [i % na, (i + 1) % na, na + j % nb];
            i += 1;
            t
        } else {
            let t = [i % na, na + (j + 1) % nb, na + j % nb];
            j += 1;
            t
        };
        mesh.add_triangle(Triangle::new(triangle));
    }

    // Align every triangle with its vertex normals
    let vertices = mesh.vertices.clone();
    for triangle in &mut mesh.triangles {
        let [p, q, r] = triangle.indices.map(|k| vertices[k].position);
        let n = (q - p).cross(&(r - p));
        let reference = vertices[triangle.indices[0]].normal;
        if n.dot(&reference) < 0.0 {
            *triangle = triangle.flipped();
        }
    }

    mesh
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::brep::{Circle, EdgeCurve, Loop, OrientedEdge};
    use approx::assert_relative_eq;

    fn square(z: f64, size: f64) -> Vec<Point3<f64>> {
        vec![
            Point3::new(0.0, 0.0, z),
            Point3::new(size, 0.0, z),
            Point3::new(size, size, z),
            Point3::new(0.0, size, z),
        ]
    }

    #[test]
    fn test_square_face() {
        let mut model = Model::new();
        let id = model.add_polygon_face(&square(0.0, 10.0), &[], Surface::Plane(Frame::world()));
        let face = model.face(id).unwrap();

        let mesh = triangulate_face(&model, face, 0, &MeshQuality::default()).unwrap();
        assert_eq!(mesh.triangle_count(), 2);
        assert_relative_eq!(mesh.surface_area(), 100.0, epsilon = 1e-9);
        for [a, b, c] in mesh.triangle_iter() {
            assert!((b - a).cross(&(c - a)).z > 0.0);
        }
    }

    #[test]
    fn test_reversed_face_flips_winding() {
        let mut model = Model::new();
        let id = model.add_polygon_face(&square(0.0, 4.0), &[], Surface::Plane(Frame::world()));
        let mut face = model.face(id).unwrap().clone();
        face.reverse();

        let mesh = triangulate_face(&model, &face, 0, &MeshQuality::default()).unwrap();
        for [a, b, c] in mesh.triangle_iter() {
            assert!((b - a).cross(&(c - a)).z < 0.0);
        }
        assert!(mesh.vertices.iter().all(|v| v.normal.z < 0.0));
    }

    #[test]
    fn test_face_with_hole() {
        let mut model = Model::new();
        let hole: Vec<Point3<f64>> = vec![
            Point3::new(3.0, 3.0, 0.0),
            Point3::new(3.0, 7.0, 0.0),
            Point3::new(7.0, 7.0, 0.0),
            Point3::new(7.0, 3.0, 0.0),
        ];
        let id = model.add_polygon_face(&square(0.0, 10.0), &[hole], Surface::Plane(Frame::world()));
        let face = model.face(id).unwrap();

        let mesh = triangulate_face(&model, face, 3, &MeshQuality::default()).unwrap();
        assert_relative_eq!(mesh.surface_area(), 84.0, epsilon = 1e-9);
    }

    #[test]
    fn test_degenerate_face() {
        let mut model = Model::new();
        let collinear = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
        ];
        let id = model.add_polygon_face(&collinear, &[], Surface::Plane(Frame::world()));
        let face = model.face(id).unwrap();

        let err = triangulate_face(&model, face, 5, &MeshQuality::default()).unwrap_err();
        assert_eq!(err.face(), 5);
        assert!(matches!(err, MeshingError::Degenerate { .. }));
    }

    #[test]
    fn test_other_surface_uses_boundary_plane() {
        let mut model = Model::new();
        let tilted = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 2.0),
            Point3::new(2.0, 2.0, 2.0),
            Point3::new(0.0, 2.0, 0.0),
        ];
        let id = model.add_polygon_face(&tilted, &[], Surface::Other("B_SPLINE_SURFACE".into()));
        let face = model.face(id).unwrap();

        let mesh = triangulate_face(&model, face, 0, &MeshQuality::default()).unwrap();
        assert_relative_eq!(mesh.surface_area(), 2.0 * 8f64.sqrt(), epsilon = 1e-9);
    }

    #[test]
    fn test_cylinder_band_from_two_circles() {
        let mut model = Model::new();
        let radius = 5.0;
        let height = 10.0;
        let bottom = Frame::world();
        let top = Frame::new(Point3::new(0.0, 0.0, height), Vector3::z(), Vector3::x());
        let v0 = model.add_vertex(Point3::new(radius, 0.0, 0.0));
        let v1 = model.add_vertex(Point3::new(radius, 0.0, height));
        let c0 = model.add_edge(v0, v0, EdgeCurve::Circle(Circle { frame: bottom, radius }), true);
        let c1 = model.add_edge(v1, v1, EdgeCurve::Circle(Circle { frame: top, radius }), true);
        let face = FaceData {
            inner: vec![Loop::new(vec![OrientedEdge::new(c1, false)])],
            ..FaceData::new(
                Surface::Cylinder { frame: bottom, radius },
                Loop::new(vec![OrientedEdge::new(c0, true)]),
            )
        };

        let quality = MeshQuality::fine();
        let mesh = triangulate_face(&model, &face, 0, &quality).unwrap();
        let expected = TAU * radius * height;
        assert!((mesh.surface_area() - expected).abs() / expected < 0.01);
        // Outward facing
        for [a, b, c] in mesh.triangle_iter() {
            let n = (b - a).cross(&(c - a));
            let centroid = Point3::from((a.coords + b.coords + c.coords) / 3.0);
            assert!(n.dot(&Vector3::new(centroid.x, centroid.y, 0.0)) > 0.0);
        }
    }
}
