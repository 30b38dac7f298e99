// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! STEP entity table to B-rep model
//!
//! Coordinates and radii are scaled to millimetres using the file's length
//! unit. Curves and surfaces without an analytic counterpart here are
//! approximated: curves by the chord between their vertices, surfaces by the
//! plane of their boundary.

use super::step::{parse_step, Entity, Record, StepFile, Value};
use crate::error::ParseError;
use crate::geometry::{Circle, EdgeCurve, EdgeId, FaceData, Frame, Loop, Model, OrientedEdge, Surface, VertexId};
use crate::utils::math::any_perpendicular;
use ahash::{AHashMap, AHashSet};
use nalgebra::{Point3, Vector3};
use std::path::Path;
use tracing::{debug, info};

const FACE_TYPES: [&str; 3] = ["ADVANCED_FACE", "FACE_SURFACE", "FACE"];
const SHELL_TYPES: [&str; 3] = ["CLOSED_SHELL", "OPEN_SHELL", "ORIENTED_CLOSED_SHELL"];
const SOLID_TYPES: [&str; 4] = [
    "MANIFOLD_SOLID_BREP",
    "BREP_WITH_VOIDS",
    "FACETED_BREP",
    "SHELL_BASED_SURFACE_MODEL",
];

/// Read and convert a STEP file
pub fn read_step_file(path: impl AsRef<Path>) -> Result<Model, ParseError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ParseError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let step = parse_step(&text)?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .or_else(|| step.file_name().map(str::to_string))
        .unwrap_or_else(|| "model".to_string());
    model_from_step(&step, name)
}

/// Build a model from a parsed entity table
pub fn model_from_step(step: &StepFile, name: impl Into<String>) -> Result<Model, ParseError> {
    let scale = length_scale(step);
    let mut builder = Builder {
        step,
        scale,
        model: Model::with_name(name),
        vertices: AHashMap::new(),
        edges: AHashMap::new(),
        poly_edges: AHashMap::new(),
    };

    let solids = step
        .entities
        .values()
        .filter(|e| SOLID_TYPES.iter().any(|t| e.is(t)))
        .count();

    for id in face_order(step)? {
        builder.add_face(id)?;
    }

    let model = builder.model;
    if model.face_count() == 0 {
        return Err(ParseError::NoFaces);
    }
    info!(
        entities = step.len(),
        solids,
        faces = model.face_count(),
        edges = model.edge_count(),
        mm_per_unit = scale,
        "STEP model loaded"
    );
    Ok(model)
}

/// Positional parameters of one record, with errors naming the entity
struct Args<'a> {
    id: u64,
    record: &'a Record,
}

impl<'a> Args<'a> {
    fn get(&self, index: usize) -> Result<&'a Value, ParseError> {
        self.record
            .params
            .get(index)
            .ok_or_else(|| ParseError::malformed(self.id, format!("{} lacks parameter {index}", self.record.name)))
    }

    fn reference(&self, index: usize) -> Result<u64, ParseError> {
        self.get(index)?
            .as_ref_id()
            .ok_or_else(|| ParseError::malformed(self.id, format!("parameter {index} is not a reference")))
    }

    fn optional_reference(&self, index: usize) -> Option<u64> {
        self.record.params.get(index).and_then(Value::as_ref_id)
    }

    fn references(&self, index: usize) -> Result<Vec<u64>, ParseError> {
        let list = self
            .get(index)?
            .as_list()
            .ok_or_else(|| ParseError::malformed(self.id, format!("parameter {index} is not a list")))?;
        list.iter()
            .map(|v| {
                v.as_ref_id()
                    .ok_or_else(|| ParseError::malformed(self.id, format!("non-reference in list {index}")))
            })
            .collect()
    }

    fn real(&self, index: usize) -> Result<f64, ParseError> {
        self.get(index)?
            .as_f64()
            .ok_or_else(|| ParseError::malformed(self.id, format!("parameter {index} is not a number")))
    }

    /// Radius scaled to mm, rejecting zero, negative and non-finite values
    fn radius(&self, index: usize, scale: f64) -> Result<f64, ParseError> {
        let radius = self.real(index)? * scale;
        if radius.is_finite() && radius > 0.0 {
            Ok(radius)
        } else {
            Err(ParseError::malformed(self.id, format!("radius must be positive, got {radius}")))
        }
    }

    fn reals(&self, index: usize) -> Result<Vec<f64>, ParseError> {
        let list = self
            .get(index)?
            .as_list()
            .ok_or_else(|| ParseError::malformed(self.id, format!("parameter {index} is not a list")))?;
        list.iter()
            .map(|v| {
                v.as_f64()
                    .ok_or_else(|| ParseError::malformed(self.id, format!("non-number in list {index}")))
            })
            .collect()
    }

    /// Unset logical parameters default to true
    fn flag(&self, index: usize) -> Result<bool, ParseError> {
        let value = self.get(index)?;
        if value.is_unset() {
            return Ok(true);
        }
        value
            .as_bool()
            .ok_or_else(|| ParseError::malformed(self.id, format!("parameter {index} is not a logical")))
    }
}

fn entity(step: &StepFile, id: u64) -> Result<&Entity, ParseError> {
    step.get(id).ok_or(ParseError::MissingEntity(id))
}

fn simple<'a>(step: &'a StepFile, id: u64, expected: &'static str) -> Result<Args<'a>, ParseError> {
    match entity(step, id)? {
        Entity::Simple(record) => Ok(Args { id, record }),
        other => Err(ParseError::type_mismatch(id, expected, other.type_name())),
    }
}

fn expect<'a>(step: &'a StepFile, id: u64, names: &[&'static str]) -> Result<Args<'a>, ParseError> {
    let expected = names.first().copied().unwrap_or("entity");
    let args = simple(step, id, expected)?;
    if names.iter().any(|n| *n == args.record.name) {
        Ok(args)
    } else {
        Err(ParseError::type_mismatch(id, expected, args.record.name.clone()))
    }
}

/// Shell faces in ascending shell id, then unreferenced faces by id
fn face_order(step: &StepFile) -> Result<Vec<u64>, ParseError> {
    let mut seen = AHashSet::new();
    let mut order = Vec::new();

    for (&id, entity) in &step.entities {
        let Some(record) = entity.as_simple() else {
            continue;
        };
        if !SHELL_TYPES.iter().any(|t| *t == record.name) {
            continue;
        }
        let args = Args { id, record };
        let faces = if record.name == "ORIENTED_CLOSED_SHELL" {
            // Orientation is re-derived during sewing
            let shell = expect(step, args.reference(2)?, &["CLOSED_SHELL"])?;
            shell.references(1)?
        } else {
            args.references(1)?
        };
        for face in faces {
            if seen.insert(face) {
                order.push(face);
            }
        }
    }

    for (&id, entity) in &step.entities {
        let is_face = entity
            .as_simple()
            .map(|r| FACE_TYPES.iter().any(|t| *t == r.name))
            .unwrap_or(false);
        if is_face && seen.insert(id) {
            order.push(id);
        }
    }
    Ok(order)
}

/// Millimetres per file length unit
fn length_scale(step: &StepFile) -> f64 {
    let context_units = step
        .entities
        .values()
        .filter_map(|e| e.record("GLOBAL_UNIT_ASSIGNED_CONTEXT"))
        .filter_map(|r| r.params.first())
        .filter_map(Value::as_list)
        .flatten()
        .filter_map(Value::as_ref_id);
    let any_length_unit = step
        .entities
        .iter()
        .filter(|(_, e)| e.is("LENGTH_UNIT"))
        .map(|(id, _)| *id);

    context_units
        .chain(any_length_unit)
        .find_map(|id| unit_scale(step, id, 0))
        .unwrap_or(1.0)
}

fn unit_scale(step: &StepFile, id: u64, depth: usize) -> Option<f64> {
    let unit = step.get(id)?;
    if depth > 4 || !(unit.is("LENGTH_UNIT") || unit.is("SI_UNIT") || unit.is("CONVERSION_BASED_UNIT")) {
        return None;
    }

    if let Some(si) = unit.record("SI_UNIT") {
        let n = si.params.len();
        if n < 2 || si.params[n - 1].as_enum() != Some("METRE") {
            return None;
        }
        let prefix = match si.params[n - 2].as_enum() {
            None => 1000.0,
            Some("KILO") => 1e6,
            Some("DECI") => 100.0,
            Some("CENTI") => 10.0,
            Some("MILLI") => 1.0,
            Some("MICRO") => 1e-3,
            Some("NANO") => 1e-6,
            Some(other) => {
                debug!(prefix = other, "unsupported SI prefix, assuming millimetres");
                1.0
            }
        };
        return Some(prefix);
    }

    let conversion = unit.record("CONVERSION_BASED_UNIT")?;
    let from_measure = conversion
        .params
        .get(1)
        .and_then(Value::as_ref_id)
        .and_then(|measure_id| {
            let measure = step.get(measure_id)?.record("LENGTH_MEASURE_WITH_UNIT")?;
            let factor = measure.params.first()?.as_f64()?;
            let base = unit_scale(step, measure.params.get(1)?.as_ref_id()?, depth + 1)?;
            Some(factor * base)
        });
    from_measure.or_else(|| match conversion.params.first()?.as_str()?.to_ascii_uppercase().as_str() {
        "INCH" => Some(25.4),
        "FOOT" => Some(304.8),
        _ => None,
    })
}

struct Builder<'a> {
    step: &'a StepFile,
    scale: f64,
    model: Model,
    vertices: AHashMap<u64, VertexId>,
    edges: AHashMap<u64, EdgeId>,
    // POLY_LOOP segments keyed by their point entities
    poly_edges: AHashMap<(u64, u64), EdgeId>,
}

impl<'a> Builder<'a> {
    fn point(&self, id: u64) -> Result<Point3<f64>, ParseError> {
        let args = expect(self.step, id, &["CARTESIAN_POINT"])?;
        let coords = args.reals(1)?;
        let get = |i: usize| coords.get(i).copied().unwrap_or(0.0) * self.scale;
        if coords.is_empty() {
            return Err(ParseError::malformed(id, "point without coordinates"));
        }
        Ok(Point3::new(get(0), get(1), get(2)))
    }

    fn direction(&self, id: u64) -> Result<Vector3<f64>, ParseError> {
        let args = expect(self.step, id, &["DIRECTION"])?;
        let ratios = args.reals(1)?;
        let get = |i: usize| ratios.get(i).copied().unwrap_or(0.0);
        Vector3::new(get(0), get(1), get(2))
            .try_normalize(f64::EPSILON)
            .ok_or_else(|| ParseError::malformed(id, "zero direction"))
    }

    fn placement(&self, id: u64) -> Result<Frame, ParseError> {
        let args = expect(self.step, id, &["AXIS2_PLACEMENT_3D"])?;
        let origin = self.point(args.reference(1)?)?;
        let z = match args.optional_reference(2) {
            Some(axis) => self.direction(axis)?,
            None => Vector3::z(),
        };
        let x = match args.optional_reference(3) {
            Some(reference) => self.direction(reference)?,
            None => any_perpendicular(&z),
        };
        Ok(Frame::new(origin, z, x))
    }

    fn vertex(&mut self, id: u64) -> Result<VertexId, ParseError> {
        if let Some(&vertex) = self.vertices.get(&id) {
            return Ok(vertex);
        }
        let args = expect(self.step, id, &["VERTEX_POINT"])?;
        let point = self.point(args.reference(1)?)?;
        let vertex = self.model.add_vertex(point);
        self.vertices.insert(id, vertex);
        Ok(vertex)
    }

    /// Resolve curve wrappers down to the 3D basis curve
    fn curve(&self, mut id: u64, same_sense: bool) -> Result<EdgeCurve, ParseError> {
        for _ in 0..8 {
            let args = simple(self.step, id, "curve")?;
            match args.record.name.as_str() {
                "SURFACE_CURVE" | "SEAM_CURVE" | "TRIMMED_CURVE" | "BOUNDED_CURVE" => id = args.reference(1)?,
                "LINE" => return Ok(EdgeCurve::Line),
                "CIRCLE" => {
                    let frame = self.placement(args.reference(1)?)?;
                    let radius = args.radius(2, self.scale)?;
                    return Ok(EdgeCurve::Circle(Circle { frame, radius }));
                }
                "POLYLINE" => {
                    let mut points = args
                        .references(1)?
                        .into_iter()
                        .map(|p| self.point(p))
                        .collect::<Result<Vec<_>, _>>()?;
                    if !same_sense {
                        points.reverse();
                    }
                    // Endpoints come from the edge's vertices
                    let interior = if points.len() > 2 {
                        points[1..points.len() - 1].to_vec()
                    } else {
                        Vec::new()
                    };
                    return Ok(EdgeCurve::Polyline(interior));
                }
                other => {
                    debug!(entity = id, curve = other, "approximating curve by its chord");
                    return Ok(EdgeCurve::Line);
                }
            }
        }
        Err(ParseError::malformed(id, "curve wrappers nest too deeply"))
    }

    fn edge(&mut self, id: u64) -> Result<EdgeId, ParseError> {
        if let Some(&edge) = self.edges.get(&id) {
            return Ok(edge);
        }
        let args = expect(self.step, id, &["EDGE_CURVE"])?;
        let start = self.vertex(args.reference(1)?)?;
        let end = self.vertex(args.reference(2)?)?;
        let same_sense = args.flag(4)?;
        let curve = self.curve(args.reference(3)?, same_sense)?;
        let edge = self.model.add_edge(start, end, curve, same_sense);
        self.edges.insert(id, edge);
        Ok(edge)
    }

    fn poly_vertex(&mut self, point_id: u64) -> Result<VertexId, ParseError> {
        // Point entities share the vertex cache under their own ids
        if let Some(&vertex) = self.vertices.get(&point_id) {
            return Ok(vertex);
        }
        let point = self.point(point_id)?;
        let vertex = self.model.add_vertex(point);
        self.vertices.insert(point_id, vertex);
        Ok(vertex)
    }

    fn edge_loop(&mut self, id: u64) -> Result<Loop, ParseError> {
        let args = simple(self.step, id, "EDGE_LOOP")?;
        match args.record.name.as_str() {
            "EDGE_LOOP" => {
                let mut edges = Vec::new();
                for oriented_id in args.references(1)? {
                    let oriented = expect(self.step, oriented_id, &["ORIENTED_EDGE"])?;
                    let edge = self.edge(oriented.reference(3)?)?;
                    edges.push(OrientedEdge::new(edge, oriented.flag(4)?));
                }
                Ok(Loop::new(edges))
            }
            "POLY_LOOP" => {
                let points = args.references(1)?;
                let mut edges = Vec::with_capacity(points.len());
                for (i, &a) in points.iter().enumerate() {
                    let b = points[(i + 1) % points.len()];
                    if a == b {
                        continue;
                    }
                    let edge = match self.poly_edges.get(&(a.min(b), a.max(b))) {
                        Some(&edge) => edge,
                        None => {
                            let (lo, hi) = (a.min(b), a.max(b));
                            let (start, end) = (self.poly_vertex(lo)?, self.poly_vertex(hi)?);
                            let edge = self.model.add_line(start, end);
                            self.poly_edges.insert((lo, hi), edge);
                            edge
                        }
                    };
                    edges.push(OrientedEdge::new(edge, a < b));
                }
                Ok(Loop::new(edges))
            }
            "VERTEX_LOOP" => Ok(Loop::default()),
            other => Err(ParseError::type_mismatch(id, "EDGE_LOOP", other)),
        }
    }

    fn surface(&self, id: u64) -> Result<Surface, ParseError> {
        let args = simple(self.step, id, "surface")?;
        Ok(match args.record.name.as_str() {
            "PLANE" => Surface::Plane(self.placement(args.reference(1)?)?),
            "CYLINDRICAL_SURFACE" => Surface::Cylinder {
                frame: self.placement(args.reference(1)?)?,
                radius: args.radius(2, self.scale)?,
            },
            other => {
                debug!(entity = id, surface = other, "approximating surface by its boundary");
                Surface::Other(other.to_string())
            }
        })
    }

    fn add_face(&mut self, id: u64) -> Result<(), ParseError> {
        let args = expect(self.step, id, &FACE_TYPES)?;
        let mut outer = None;
        let mut bounds = Vec::new();

        for bound_id in args.references(1)? {
            let bound = expect(self.step, bound_id, &["FACE_BOUND", "FACE_OUTER_BOUND"])?;
            let mut lp = self.edge_loop(bound.reference(1)?)?;
            if !bound.flag(2)? {
                lp = lp.reversed();
            }
            if lp.is_empty() {
                continue;
            }
            if bound.record.name == "FACE_OUTER_BOUND" && outer.is_none() {
                outer = Some(lp);
            } else {
                bounds.push(lp);
            }
        }

        let outer = match outer {
            Some(lp) => lp,
            None if !bounds.is_empty() => bounds.remove(0),
            None => {
                debug!(entity = id, "face without a usable boundary");
                Loop::default()
            }
        };

        let (surface, same_sense) = if args.record.name == "FACE" {
            (Surface::Other("FACE".to_string()), true)
        } else {
            (self.surface(args.reference(2)?)?, args.flag(3)?)
        };

        self.model.add_face(FaceData {
            surface,
            same_sense,
            outer,
            inner: bounds,
            step_id: Some(id),
        });
        Ok(())
    }
}
