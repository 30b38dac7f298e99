// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Exact volume of closed solids
//!
//! Volumes come from the divergence theorem, `V = ⅓ Σ ∫_F x·n dA`, evaluated
//! on the B-rep geometry itself. Planar faces use `d·A` with the area taken
//! from exact line and arc boundary terms. Cylindrical faces integrate
//! `x·n` in the unrolled `(θ, h)` chart with Green's theorem, in closed form
//! for coaxial circles and rulings. Tessellation is only used for centroids
//! and to decide which shells are voids.

use super::brep::{EdgeCurve, EdgeData, FaceData, FaceId, Frame, Loop, Model, Surface};
use super::classification::winding_number;
use super::faces::enumerate_faces;
use super::mesh::Mesh;
use super::sewing::Solid;
use super::tessellate::MeshQuality;
use nalgebra::{Point3, Vector3};
use serde::Serialize;
use std::f64::consts::PI;
use tracing::warn;

/// Gauss-Legendre nodes and weights on [-1, 1]
const GAUSS: [(f64, f64); 5] = [
    (0.0, 0.568_888_888_888_888_9),
    (-0.538_469_310_105_683_1, 0.478_628_670_499_366_5),
    (0.538_469_310_105_683_1, 0.478_628_670_499_366_5),
    (-0.906_179_845_938_664, 0.236_926_885_056_189_1),
    (0.906_179_845_938_664, 0.236_926_885_056_189_1),
];
const GAUSS_SUBDIVISIONS: usize = 32;
const COAXIAL_EPS: f64 = 1e-9;

/// Volume breakdown of one closed shell
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShellProperties {
    pub index: usize,
    /// Enclosed volume in mm³, always non-negative
    pub volume: f64,
    pub centroid: Option<Point3<f64>>,
    pub faces: usize,
    /// Nested at odd depth inside another shell, so subtracted
    pub is_void: bool,
}

/// Enclosed volume in mm³
pub fn exact_volume(solid: &Solid) -> f64 {
    exact_volume_with(solid, &MeshQuality::default())
}

/// Same volume as [`exact_volume`]; `quality` only drives the void test
pub fn exact_volume_with(solid: &Solid, quality: &MeshQuality) -> f64 {
    net_volume(&solid_properties_with(solid, quality))
}

/// Outer shells minus voids, clamped at zero
pub fn net_volume(shells: &[ShellProperties]) -> f64 {
    let total: f64 = shells
        .iter()
        .map(|shell| if shell.is_void { -shell.volume } else { shell.volume })
        .sum();
    total.max(0.0)
}

pub fn solid_properties(solid: &Solid) -> Vec<ShellProperties> {
    solid_properties_with(solid, &MeshQuality::default())
}

/// Per-shell volumes; centroids and nesting use a tessellation at `quality`
pub fn solid_properties_with(solid: &Solid, quality: &MeshQuality) -> Vec<ShellProperties> {
    let meshes = shell_meshes(solid, quality);

    solid
        .shells()
        .iter()
        .zip(&meshes)
        .enumerate()
        .map(|(index, (faces, mesh))| {
            let depth = mesh
                .vertices
                .first()
                .map(|sample| {
                    meshes
                        .iter()
                        .enumerate()
                        .filter(|(other, _)| *other != index)
                        .filter(|(_, shell)| encloses(shell, &sample.position))
                        .count()
                })
                .unwrap_or(0);

            ShellProperties {
                index,
                volume: shell_volume(solid.model(), faces),
                centroid: mesh.centroid(),
                faces: faces.len(),
                is_void: depth % 2 == 1,
            }
        })
        .collect()
}

fn shell_volume(model: &Model, faces: &[FaceId]) -> f64 {
    let flux: f64 = faces
        .iter()
        .filter_map(|&id| {
            let flux = model.face(id).and_then(|face| face_flux(model, face));
            if flux.is_none() {
                warn!(face = ?id, "face references missing topology; left out of the volume");
            }
            flux
        })
        .sum();
    (flux / 3.0).abs()
}

fn encloses(shell: &Mesh, point: &Point3<f64>) -> bool {
    shell.bounding_box().contains(point, 0.0) && winding_number(shell, point).abs() > 0.5
}

/// Tessellate each shell separately; faces that fail to mesh are skipped
fn shell_meshes(solid: &Solid, quality: &MeshQuality) -> Vec<Mesh> {
    let model = solid.model();
    let faces = match enumerate_faces(model) {
        Ok(faces) => faces,
        Err(_) => return vec![Mesh::new(); solid.shells().len()],
    };

    solid
        .shells()
        .iter()
        .map(|shell| {
            let mut mesh = Mesh::new();
            for face in faces.iter().filter(|f| shell.contains(&f.id())) {
                match face.triangulate(quality) {
                    Ok(part) => mesh.merge(&part),
                    Err(err) => warn!(face = face.index(), "skipping face in centroid: {err}"),
                }
            }
            mesh
        })
        .collect()
}

/// `∫ x·n dA` over a face, with `n` the face normal
fn face_flux(model: &Model, face: &FaceData) -> Option<f64> {
    let sense = if face.same_sense { 1.0 } else { -1.0 };
    match &face.surface {
        Surface::Plane(frame) => planar_flux(model, face, &(frame.z * sense)),
        Surface::Cylinder { frame, radius } => {
            let chart = CylinderChart::new(*frame, *radius);
            Some(sense * chart.face_integral(model, face)?)
        }
        Surface::Other(_) => {
            // Best-fit plane of the boundary, wound like the outer loop
            match loop_vector_area(model, &face.outer)?.try_normalize(f64::EPSILON) {
                Some(normal) => planar_flux(model, face, &normal),
                None => Some(0.0),
            }
        }
    }
}

/// `d·A` for a face lying in the plane through its vertices with unit `normal`
fn planar_flux(model: &Model, face: &FaceData, normal: &Vector3<f64>) -> Option<f64> {
    let anchor = loop_anchor(model, &face.outer)?;
    let mut area = loop_vector_area(model, &face.outer)?.dot(normal).abs();
    for hole in &face.inner {
        area -= loop_vector_area(model, hole)?.dot(normal).abs();
    }
    Some(anchor.coords.dot(normal) * area)
}

/// Mean of the vertices a loop passes through
fn loop_anchor(model: &Model, lp: &Loop) -> Option<Point3<f64>> {
    let mut sum = Vector3::zeros();
    for oriented in &lp.edges {
        let edge = model.edge(oriented.edge)?;
        let vertex = if oriented.forward { edge.start } else { edge.end };
        sum += model.point(vertex)?.coords;
    }
    (!lp.edges.is_empty()).then(|| Point3::from(sum / lp.edges.len() as f64))
}

/// `½∮ x × dx` around a loop, exact for lines, polylines and arcs
fn loop_vector_area(model: &Model, lp: &Loop) -> Option<Vector3<f64>> {
    let mut area = Vector3::zeros();
    for oriented in &lp.edges {
        let edge = model.edge(oriented.edge)?;
        let term = edge_moment(model, edge)?;
        area += if oriented.forward { term } else { -term };
    }
    Some(area * 0.5)
}

/// `∫ x × dx` along an edge from its start to its end vertex
fn edge_moment(model: &Model, edge: &EdgeData) -> Option<Vector3<f64>> {
    let start = model.point(edge.start)?;
    let end = model.point(edge.end)?;
    Some(match &edge.curve {
        EdgeCurve::Line => start.coords.cross(&end.coords),
        EdgeCurve::Polyline(interior) => {
            let mut moment = Vector3::zeros();
            let mut previous = start;
            for point in interior.iter().chain(std::iter::once(&end)) {
                moment += previous.coords.cross(&point.coords);
                previous = *point;
            }
            moment
        }
        EdgeCurve::Circle(circle) => {
            // x(t) = c + r(cos t·u + sin t·v) gives c × Δx + r²·Δt·(u × v)
            let (_, sweep) = model.arc_span(edge, circle)?;
            circle.frame.origin.coords.cross(&(end - start))
                + circle.frame.z * (circle.radius * circle.radius * sweep)
        }
    })
}

/// Line integrals along a boundary curve in a cylinder's `(θ, h)` chart
#[derive(Debug, Clone, Copy, Default)]
struct ChartIntegrals {
    /// `∫ dθ`
    turn: f64,
    /// `∫ h dθ`
    height: f64,
    /// `∫ h·g(θ) dθ`
    flux: f64,
}

impl ChartIntegrals {
    fn accumulate(&mut self, other: ChartIntegrals, sign: f64) {
        self.turn += sign * other.turn;
        self.height += sign * other.height;
        self.flux += sign * other.flux;
    }
}

/// Unrolled cylinder, `x = o + r(cos θ·u + sin θ·v) + h·w`.
///
/// On the surface `x·n = r + o_u cos θ + o_v sin θ =: g(θ)` for the outward
/// radial normal, and `dA = r dθ dh`.
struct CylinderChart {
    frame: Frame,
    radius: f64,
    origin_u: f64,
    origin_v: f64,
}

impl CylinderChart {
    fn new(frame: Frame, radius: f64) -> Self {
        Self {
            origin_u: frame.origin.coords.dot(&frame.x),
            origin_v: frame.origin.coords.dot(&frame.y()),
            frame,
            radius,
        }
    }

    fn g(&self, theta: f64) -> f64 {
        self.radius + self.origin_u * theta.cos() + self.origin_v * theta.sin()
    }

    /// Antiderivative of `g`
    fn g_integral(&self, theta: f64) -> f64 {
        self.radius * theta + self.origin_u * theta.sin() - self.origin_v * theta.cos()
    }

    /// `∫ x·n dA` over the face region for the outward radial normal
    fn face_integral(&self, model: &Model, face: &FaceData) -> Option<f64> {
        let mut region = 0.0;
        let mut bands: Vec<(f64, f64)> = Vec::new();

        for (k, lp) in face.loops().enumerate() {
            let mut totals = ChartIntegrals::default();
            for oriented in &lp.edges {
                let edge = model.edge(oriented.edge)?;
                let sign = if oriented.forward { 1.0 } else { -1.0 };
                totals.accumulate(self.edge_integrals(model, edge)?, sign);
            }

            if totals.turn.abs() > PI {
                // Wraps around the axis: keep ∫ h·g dθ with θ increasing, keyed by mean height
                let sign = totals.turn.signum();
                bands.push((sign * totals.height / totals.turn.abs(), sign * totals.flux));
            } else {
                // Green's theorem: ∬ g dθ dh = -∮ h·g dθ counter-clockwise, and
                // ∮ h dθ is negative exactly when the loop is counter-clockwise
                let enclosed = totals.flux * totals.height.signum();
                if k == 0 {
                    region += enclosed;
                } else {
                    region -= enclosed;
                }
            }
        }

        bands.sort_by(|a, b| a.0.total_cmp(&b.0));
        for pair in bands.chunks(2) {
            if let [low, high] = pair {
                region += high.1 - low.1;
            }
        }
        Some(self.radius * region)
    }

    /// Integrals along an edge from its start to its end vertex
    fn edge_integrals(&self, model: &Model, edge: &EdgeData) -> Option<ChartIntegrals> {
        let start = model.point(edge.start)?;
        let end = model.point(edge.end)?;

        match &edge.curve {
            EdgeCurve::Line => Some(self.integrate(|t| (start + (end - start) * t, end - start))),
            EdgeCurve::Polyline(interior) => {
                let mut totals = ChartIntegrals::default();
                let mut previous = start;
                for &point in interior.iter().chain(std::iter::once(&end)) {
                    let from = previous;
                    totals.accumulate(self.integrate(|t| (from + (point - from) * t, point - from)), 1.0);
                    previous = point;
                }
                Some(totals)
            }
            EdgeCurve::Circle(circle) => {
                let (a0, sweep) = model.arc_span(edge, circle)?;
                let axial = circle.frame.z.dot(&self.frame.z);
                let centre = self.frame.to_local(&circle.frame.origin);
                if 1.0 - axial.abs() < COAXIAL_EPS && centre.x.hypot(centre.y) < COAXIAL_EPS * (1.0 + self.radius) {
                    // Cross-section circle: h is constant and θ advances with the arc
                    let turn = sweep * axial.signum();
                    let local = self.frame.to_local(&start);
                    let theta0 = local.y.atan2(local.x);
                    let h = centre.z;
                    return Some(ChartIntegrals {
                        turn,
                        height: h * turn,
                        flux: h * (self.g_integral(theta0 + turn) - self.g_integral(theta0)),
                    });
                }
                let (u, v, r) = (circle.frame.x, circle.frame.y(), circle.radius);
                Some(self.integrate(|t| {
                    let angle = a0 + sweep * t;
                    let tangent = (v * angle.cos() - u * angle.sin()) * (r * sweep);
                    (circle.point_at(angle), tangent)
                }))
            }
        }
    }

    /// Composite Gauss-Legendre over a curve `t ∈ [0, 1] ↦ (x(t), x'(t))`
    fn integrate(&self, curve: impl Fn(f64) -> (Point3<f64>, Vector3<f64>)) -> ChartIntegrals {
        let (u, v) = (self.frame.x, self.frame.y());
        let step = 1.0 / GAUSS_SUBDIVISIONS as f64;
        let mut totals = ChartIntegrals::default();

        for k in 0..GAUSS_SUBDIVISIONS {
            let mid = (k as f64 + 0.5) * step;
            for &(node, weight) in &GAUSS {
                let (point, tangent) = curve(mid + 0.5 * step * node);
                let local = self.frame.to_local(&point);
                let rho2 = local.x * local.x + local.y * local.y;
                if rho2 <= f64::EPSILON {
                    continue;
                }
                let dtheta = (local.x * tangent.dot(&v) - local.y * tangent.dot(&u)) / rho2;
                let w = 0.5 * step * weight * dtheta;
                let theta = local.y.atan2(local.x);
                totals.turn += w;
                totals.height += w * local.z;
                totals.flux += w * local.z * self.g(theta);
            }
        }
        totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{repair, Circle, OrientedEdge, Primitive, RepairOutcome, Topology};
    use approx::assert_relative_eq;

    fn close(model: &Model) -> Solid {
        match repair(model, 0.05).unwrap() {
            RepairOutcome::Closed(solid) => solid,
            RepairOutcome::NotClosed(failure) => panic!("not closed: {failure:?}"),
        }
    }

    #[test]
    fn test_cube_volume() {
        let solid = close(&Primitive::cube(10.0).to_model());
        assert_relative_eq!(exact_volume(&solid), 1000.0, epsilon = 1e-9);
    }

    #[test]
    fn test_volume_is_deterministic_and_quality_independent() {
        let solid = close(&Primitive::cube(10.0).to_model_with(Topology::Detached));
        let first = exact_volume(&solid);
        assert_eq!(first, exact_volume(&solid));
        assert_relative_eq!(first, exact_volume_with(&solid, &MeshQuality::coarse()), epsilon = 1e-9);
    }

    #[test]
    fn test_cylinder_volume_is_exact_at_every_quality() {
        let primitive = Primitive::cylinder(5.0, 10.0);
        let solid = close(&primitive.to_model());
        let expected = PI * 25.0 * 10.0;
        for quality in [MeshQuality::coarse(), MeshQuality::default(), MeshQuality::fine()] {
            let volume = exact_volume_with(&solid, &quality);
            println!("{quality:?}: {volume:.12} mm3");
            assert_relative_eq!(volume, expected, max_relative = 1e-9);
        }
        assert_relative_eq!(primitive.nominal_volume(), expected, max_relative = 1e-12);
    }

    #[test]
    fn test_cylinder_off_origin() {
        // Axis far from the origin exercises the o·ρ̂ terms of x·n
        let mut model = Model::new();
        Primitive::Cylinder {
            base: Point3::new(40.0, -25.0, 7.0),
            radius: 3.0,
            height: 4.5,
        }
        .append_to(&mut model, Topology::Shared);
        let solid = close(&model);
        assert_relative_eq!(exact_volume(&solid), PI * 9.0 * 4.5, max_relative = 1e-9);
    }

    #[test]
    fn test_disk_area_uses_exact_arc() {
        let mut model = Model::new();
        let circle = Circle {
            frame: Frame::world(),
            radius: 2.0,
        };
        let v = model.add_vertex(Point3::new(2.0, 0.0, 0.0));
        let edge = model.add_edge(v, v, EdgeCurve::Circle(circle), true);
        let disk = Loop::new(vec![OrientedEdge::new(edge, true)]);
        let area = loop_vector_area(&model, &disk).unwrap();
        assert_relative_eq!(area.z, 4.0 * PI, max_relative = 1e-12);
        assert_relative_eq!(area.x, 0.0);
        assert_relative_eq!(loop_vector_area(&model, &disk.reversed()).unwrap().z, -4.0 * PI);
    }

    #[test]
    fn test_inner_shell_is_void() {
        let mut model = Primitive::cube(10.0).to_model();
        Primitive::cuboid(Point3::new(3.0, 3.0, 3.0), Point3::new(7.0, 7.0, 7.0))
            .append_to(&mut model, Topology::Shared);
        let solid = close(&model);

        let shells = solid_properties(&solid);
        assert_eq!(shells.len(), 2);
        assert!(!shells[0].is_void);
        assert!(shells[1].is_void);
        assert_eq!(shells[1].faces, 6);
        assert_relative_eq!(exact_volume(&solid), 1000.0 - 64.0, epsilon = 1e-9);
    }

    #[test]
    fn test_centroid() {
        let solid = close(&Primitive::cuboid(Point3::new(2.0, 0.0, 0.0), Point3::new(4.0, 2.0, 2.0)).to_model());
        let shells = solid_properties(&solid);
        let centroid = shells[0].centroid.unwrap();
        assert_relative_eq!(centroid.x, 3.0, epsilon = 1e-9);
        assert_relative_eq!(centroid.z, 1.0, epsilon = 1e-9);
    }
}
