// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Tolerance-driven sewing
//!
//! Builds a fresh model in which vertices closer than the tolerance are
//! fused, duplicate edges between fused vertices are shared, and free
//! straight edges running through a foreign vertex are split there. The
//! result is then checked for closure: every edge used by exactly two face
//! sides, traversed in opposite directions once faces are reoriented.
//! Exactly one tolerance is tried per call.

use super::brep::{EdgeCurve, EdgeId, FaceData, FaceId, Loop, Model, OrientedEdge, VertexId};
use super::tessellate::MeshQuality;
use crate::error::ConfigError;
use ahash::AHashMap;
use nalgebra::{Point3, Vector3};
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, info};

const MIN_CELL: f64 = 1e-9;

/// A closed, consistently oriented shape produced by [`repair`]
#[derive(Debug, Clone)]
pub struct Solid {
    model: Model,
    shells: Vec<Vec<FaceId>>,
    stats: SewingStats,
}

impl Solid {
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Connected face sets, each a closed shell
    pub fn shells(&self) -> &[Vec<FaceId>] {
        &self.shells
    }

    pub fn face_count(&self) -> usize {
        self.model.face_count()
    }

    pub fn stats(&self) -> &SewingStats {
        &self.stats
    }
}

/// Why a sewn shape could not be closed
#[derive(Debug, Clone)]
pub struct RepairFailure {
    pub tolerance: f64,
    /// Edges bordering a single face side
    pub free_edges: usize,
    /// Edges bordering more than two face sides
    pub non_manifold_edges: usize,
    pub non_orientable_shells: usize,
    pub stats: SewingStats,
    /// Best-effort sewn shape, used by the voxel fallback
    pub sewn: Model,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SewingStats {
    pub merged_vertices: usize,
    pub merged_edges: usize,
    pub split_edges: usize,
    pub dropped_faces: usize,
    pub flipped_faces: usize,
}

#[derive(Debug, Clone)]
pub enum RepairOutcome {
    Closed(Solid),
    NotClosed(RepairFailure),
}

impl RepairOutcome {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }

    pub fn stats(&self) -> &SewingStats {
        match self {
            Self::Closed(solid) => &solid.stats,
            Self::NotClosed(failure) => &failure.stats,
        }
    }

    /// The sewn model whichever way the closure check went
    pub fn model(&self) -> &Model {
        match self {
            Self::Closed(solid) => &solid.model,
            Self::NotClosed(failure) => &failure.sewn,
        }
    }
}

/// Sew `model` at `tolerance` (mm) and check the result for closure.
///
/// The input model is never modified. A tolerance of zero only fuses
/// exactly coincident vertices.
pub fn repair(model: &Model, tolerance: f64) -> Result<RepairOutcome, ConfigError> {
    if !(tolerance.is_finite() && tolerance >= 0.0) {
        return Err(ConfigError::InvalidTolerance(tolerance));
    }

    let mut sewer = Sewer::new(tolerance);
    sewer.fuse_vertices(model);
    let edge_map = sewer.merge_edges(model);
    sewer.rebuild_faces(model, &edge_map);
    sewer.split_t_junctions();

    let closure = sewer.check_closure();
    let Sewer { sewn, stats, .. } = sewer;

    info!(
        tolerance,
        faces = sewn.face_count(),
        merged_vertices = stats.merged_vertices,
        merged_edges = stats.merged_edges,
        split_edges = stats.split_edges,
        free_edges = closure.free_edges,
        non_manifold_edges = closure.non_manifold_edges,
        "sewing finished"
    );

    let closed = closure.free_edges == 0
        && closure.non_manifold_edges == 0
        && closure.non_orientable == 0
        && sewn.face_count() > 0;

    Ok(if closed {
        RepairOutcome::Closed(Solid {
            model: sewn,
            shells: closure.shells,
            stats,
        })
    } else {
        RepairOutcome::NotClosed(RepairFailure {
            tolerance,
            free_edges: closure.free_edges,
            non_manifold_edges: closure.non_manifold_edges,
            non_orientable_shells: closure.non_orientable,
            stats,
            sewn,
        })
    })
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        let mut root = i;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        while self.parent[i] != root {
            let next = self.parent[i];
            self.parent[i] = root;
            i = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra.max(rb)] = ra.min(rb);
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SewnEdge {
    id: EdgeId,
    midpoint: Point3<f64>,
    straight: bool,
}

struct Closure {
    free_edges: usize,
    non_manifold_edges: usize,
    non_orientable: usize,
    shells: Vec<Vec<FaceId>>,
}

struct Sewer {
    tolerance: f64,
    quality: MeshQuality,
    sewn: Model,
    stats: SewingStats,
    vertex_map: AHashMap<VertexId, VertexId>,
    edge_index: AHashMap<(VertexId, VertexId), Vec<SewnEdge>>,
}

impl Sewer {
    fn new(tolerance: f64) -> Self {
        Self {
            tolerance,
            quality: MeshQuality::default(),
            sewn: Model::new(),
            stats: SewingStats::default(),
            vertex_map: AHashMap::new(),
            edge_index: AHashMap::new(),
        }
    }

    fn cell_of(&self, p: &Point3<f64>) -> (i64, i64, i64) {
        let cell = self.tolerance.max(MIN_CELL);
        (
            (p.x / cell).floor() as i64,
            (p.y / cell).floor() as i64,
            (p.z / cell).floor() as i64,
        )
    }

    /// Cluster vertices within tolerance and place each cluster at its mean
    fn fuse_vertices(&mut self, model: &Model) {
        let points: Vec<(VertexId, Point3<f64>)> = model.vertices().map(|(id, v)| (id, v.point)).collect();
        let mut clusters = UnionFind::new(points.len());
        let mut grid: AHashMap<(i64, i64, i64), Vec<usize>> = AHashMap::new();

        for (i, (_, p)) in points.iter().enumerate() {
            let (cx, cy, cz) = self.cell_of(p);
            for dx in -1..=1 {
                for dy in -1..=1 {
                    for dz in -1..=1 {
                        let Some(bucket) = grid.get(&(cx + dx, cy + dy, cz + dz)) else {
                            continue;
                        };
                        for &j in bucket {
                            if (points[j].1 - p).norm() <= self.tolerance {
                                clusters.union(i, j);
                            }
                        }
                    }
                }
            }
            grid.entry((cx, cy, cz)).or_default().push(i);
        }

        let mut sums: AHashMap<usize, (Vector3<f64>, usize)> = AHashMap::new();
        let mut order = Vec::new();
        let roots: Vec<usize> = (0..points.len()).map(|i| clusters.find(i)).collect();
        for (i, &root) in roots.iter().enumerate() {
            let entry = sums.entry(root).or_insert_with(|| {
                order.push(root);
                (Vector3::zeros(), 0)
            });
            entry.0 += points[i].1.coords;
            entry.1 += 1;
        }

        let mut fused: AHashMap<usize, VertexId> = AHashMap::with_capacity(order.len());
        for root in order {
            if let Some(&(sum, count)) = sums.get(&root) {
                let id = self.sewn.add_vertex(Point3::from(sum / count as f64));
                fused.insert(root, id);
            }
        }
        for (i, &root) in roots.iter().enumerate() {
            if let Some(&id) = fused.get(&root) {
                self.vertex_map.insert(points[i].0, id);
            }
        }
        self.stats.merged_vertices = points.len() - fused.len();
    }

    fn find_edge(&self, a: VertexId, b: VertexId, midpoint: &Point3<f64>, straight: bool) -> Option<EdgeId> {
        let key = if a <= b { (a, b) } else { (b, a) };
        self.edge_index.get(&key)?.iter().find_map(|candidate| {
            let same = if straight && candidate.straight {
                true
            } else {
                (candidate.midpoint - midpoint).norm() <= 2.0 * self.tolerance + MIN_CELL
            };
            same.then_some(candidate.id)
        })
    }

    fn register_edge(&mut self, a: VertexId, b: VertexId, edge: SewnEdge) {
        let key = if a <= b { (a, b) } else { (b, a) };
        self.edge_index.entry(key).or_default().push(edge);
    }

    /// Map every input edge onto a sewn edge, `None` when it collapsed.
    /// The flag says whether the sewn edge runs against the input edge.
    fn merge_edges(&mut self, model: &Model) -> AHashMap<EdgeId, Option<(EdgeId, bool)>> {
        let mut map = AHashMap::new();

        for (old, edge) in model.edges() {
            let (Some(&a), Some(&b)) = (self.vertex_map.get(&edge.start), self.vertex_map.get(&edge.end)) else {
                map.insert(old, None);
                continue;
            };
            let Some(samples) = model.sample_edge(old, &self.quality) else {
                map.insert(old, None);
                continue;
            };
            let straight = matches!(edge.curve, EdgeCurve::Line);

            if a == b && !edge.is_closed() && spread(&samples) <= self.tolerance {
                map.insert(old, None);
                continue;
            }

            let midpoint = arc_midpoint(&samples);
            if let Some(existing) = self.find_edge(a, b, &midpoint, straight) {
                let reversed = self.sewn.edge(existing).map(|e| e.start != a).unwrap_or(false);
                map.insert(old, Some((existing, reversed)));
                self.stats.merged_edges += 1;
                continue;
            }

            let id = self.sewn.add_edge(a, b, edge.curve.clone(), edge.same_sense);
            self.register_edge(a, b, SewnEdge { id, midpoint, straight });
            map.insert(old, Some((id, false)));
        }
        map
    }

    fn rebuild_faces(&mut self, model: &Model, edge_map: &AHashMap<EdgeId, Option<(EdgeId, bool)>>) {
        let remap = |lp: &Loop| -> Loop {
            let edges = lp
                .edges
                .iter()
                .filter_map(|oe| {
                    edge_map
                        .get(&oe.edge)
                        .copied()
                        .flatten()
                        .map(|(edge, reversed)| OrientedEdge::new(edge, oe.forward != reversed))
                })
                .collect();
            cancel_spikes(Loop::new(edges))
        };

        for &id in model.face_ids() {
            let Some(face) = model.face(id) else {
                continue;
            };
            let outer = remap(&face.outer);
            if outer.is_empty() {
                debug!(step_id = ?face.step_id, "face collapsed during sewing");
                self.stats.dropped_faces += 1;
                continue;
            }
            let inner = face.inner.iter().map(&remap).filter(|lp| !lp.is_empty()).collect();
            self.sewn.add_face(FaceData {
                surface: face.surface.clone(),
                same_sense: face.same_sense,
                outer,
                inner,
                step_id: face.step_id,
            });
        }
    }

    fn edge_uses(&self) -> AHashMap<EdgeId, Vec<(usize, bool)>> {
        let mut uses: AHashMap<EdgeId, Vec<(usize, bool)>> = AHashMap::new();
        for (index, &id) in self.sewn.face_ids().iter().enumerate() {
            if let Some(face) = self.sewn.face(id) {
                for lp in face.loops() {
                    for oe in &lp.edges {
                        uses.entry(oe.edge).or_default().push((index, oe.forward));
                    }
                }
            }
        }
        uses
    }

    /// Split free straight edges at foreign vertices lying on them
    fn split_t_junctions(&mut self) {
        if self.tolerance <= 0.0 {
            return;
        }
        let uses = self.edge_uses();
        let mut free: Vec<EdgeId> = uses
            .iter()
            .filter(|(id, u)| {
                u.len() == 1 && self.sewn.edge(**id).map(|e| matches!(e.curve, EdgeCurve::Line)).unwrap_or(false)
            })
            .map(|(id, _)| *id)
            .collect();
        free.sort();
        if free.is_empty() {
            return;
        }

        let points: Vec<(VertexId, Point3<f64>)> = self.sewn.vertices().map(|(id, v)| (id, v.point)).collect();
        let mut replacements: AHashMap<EdgeId, Vec<OrientedEdge>> = AHashMap::new();

        for id in free {
            let Some(edge) = self.sewn.edge(id).cloned() else {
                continue;
            };
            let (Some(a), Some(b)) = (self.sewn.point(edge.start), self.sewn.point(edge.end)) else {
                continue;
            };
            let axis = b - a;
            let length = axis.norm();
            if length <= 2.0 * self.tolerance {
                continue;
            }

            let mut hits: Vec<(f64, VertexId)> = points
                .iter()
                .filter(|(v, _)| *v != edge.start && *v != edge.end)
                .filter_map(|(v, p)| {
                    let t = (p - a).dot(&axis) / (length * length);
                    let along = t * length;
                    let off = (p - (a + axis * t)).norm();
                    (along > self.tolerance && along < length - self.tolerance && off <= self.tolerance)
                        .then_some((t, *v))
                })
                .collect();
            if hits.is_empty() {
                continue;
            }
            hits.sort_by(|x, y| x.0.total_cmp(&y.0));

            let mut chain = vec![edge.start];
            chain.extend(hits.iter().map(|(_, v)| *v));
            chain.push(edge.end);

            let mut pieces = Vec::with_capacity(chain.len() - 1);
            for pair in chain.windows(2) {
                let (p, q) = (pair[0], pair[1]);
                let midpoint = match (self.sewn.point(p), self.sewn.point(q)) {
                    (Some(x), Some(y)) => Point3::from((x.coords + y.coords) * 0.5),
                    _ => continue,
                };
                let piece = match self.find_edge(p, q, &midpoint, true) {
                    Some(existing) => {
                        self.stats.merged_edges += 1;
                        let forward = self.sewn.edge(existing).map(|e| e.start == p).unwrap_or(true);
                        OrientedEdge::new(existing, forward)
                    }
                    None => {
                        let new = self.sewn.add_line(p, q);
                        self.register_edge(p, q, SewnEdge { id: new, midpoint, straight: true });
                        OrientedEdge::new(new, true)
                    }
                };
                pieces.push(piece);
            }
            replacements.insert(id, pieces);
            self.stats.split_edges += 1;
        }

        if replacements.is_empty() {
            return;
        }

        let face_ids: Vec<FaceId> = self.sewn.face_ids().to_vec();
        for face_id in face_ids {
            let Some(face) = self.sewn.face_mut(face_id) else {
                continue;
            };
            let splice = |lp: &Loop| -> Loop {
                let mut edges = Vec::with_capacity(lp.edges.len());
                for oe in &lp.edges {
                    match replacements.get(&oe.edge) {
                        Some(pieces) if oe.forward => edges.extend(pieces.iter().copied()),
                        Some(pieces) => edges.extend(pieces.iter().rev().map(|p| p.reversed())),
                        None => edges.push(*oe),
                    }
                }
                cancel_spikes(Loop::new(edges))
            };
            face.outer = splice(&face.outer);
            face.inner = face.inner.iter().map(&splice).filter(|lp| !lp.is_empty()).collect();
            if face.outer.is_empty() {
                self.sewn.remove_face(face_id);
                self.stats.dropped_faces += 1;
            }
        }

        for id in replacements.keys() {
            let key = self.sewn.edge(*id).map(|e| (e.start.min(e.end), e.start.max(e.end)));
            if let Some(key) = key {
                if let Some(list) = self.edge_index.get_mut(&key) {
                    list.retain(|e| e.id != *id);
                }
            }
            self.sewn.remove_edge(*id);
        }
    }

    /// Count edge uses, group faces into shells and orient each shell
    fn check_closure(&mut self) -> Closure {
        let uses = self.edge_uses();
        let face_ids: Vec<FaceId> = self.sewn.face_ids().to_vec();
        let n = face_ids.len();

        let free_edges = uses.values().filter(|u| u.len() == 1).count();
        let non_manifold_edges = uses.values().filter(|u| u.len() > 2).count();

        // (neighbour, own direction, neighbour direction) per shared edge
        let mut adjacency: Vec<Vec<(usize, bool, bool)>> = vec![Vec::new(); n];
        let mut components = UnionFind::new(n);
        for u in uses.values() {
            for w in u.windows(2) {
                components.union(w[0].0, w[1].0);
            }
            if let [(f, fw), (g, gw)] = u.as_slice() {
                adjacency[*f].push((*g, *fw, *gw));
                if f != g {
                    adjacency[*g].push((*f, *gw, *fw));
                }
            }
        }

        let mut flip: Vec<Option<bool>> = vec![None; n];
        let mut non_orientable = 0;
        let mut shells: Vec<Vec<FaceId>> = Vec::new();
        let mut shell_of: AHashMap<usize, usize> = AHashMap::new();

        for start in 0..n {
            let root = components.find(start);
            let shell = *shell_of.entry(root).or_insert_with(|| {
                shells.push(Vec::new());
                shells.len() - 1
            });
            shells[shell].push(face_ids[start]);

            if flip[start].is_some() {
                continue;
            }
            flip[start] = Some(false);
            let mut consistent = true;
            let mut members = vec![start];
            let mut queue = VecDeque::from([start]);
            while let Some(f) = queue.pop_front() {
                let own_flip = flip[f].unwrap_or(false);
                for &(g, fw, gw) in &adjacency[f] {
                    if g == f {
                        consistent &= fw != gw;
                        continue;
                    }
                    // The neighbour must walk the shared edge the other way
                    let wanted = !(fw ^ own_flip) ^ gw;
                    match flip[g] {
                        None => {
                            flip[g] = Some(wanted);
                            members.push(g);
                            queue.push_back(g);
                        }
                        Some(existing) => consistent &= existing == wanted,
                    }
                }
            }
            if !consistent {
                non_orientable += 1;
            }
            // Keep the orientation most faces already agree on
            let flipped = members.iter().filter(|&&f| flip[f] == Some(true)).count();
            if 2 * flipped > members.len() {
                for &f in &members {
                    flip[f] = flip[f].map(|x| !x);
                }
            }
        }

        for (index, &id) in face_ids.iter().enumerate() {
            if flip[index] == Some(true) {
                if let Some(face) = self.sewn.face_mut(id) {
                    face.reverse();
                    self.stats.flipped_faces += 1;
                }
            }
        }

        Closure {
            free_edges,
            non_manifold_edges,
            non_orientable,
            shells,
        }
    }
}

/// Remove immediate back-and-forth traversals of the same edge
fn cancel_spikes(lp: Loop) -> Loop {
    let mut stack: Vec<OrientedEdge> = Vec::with_capacity(lp.edges.len());
    for oe in lp.edges {
        match stack.last() {
            Some(last) if *last == oe.reversed() => {
                stack.pop();
            }
            _ => stack.push(oe),
        }
    }
    while stack.len() >= 2 {
        match (stack.first(), stack.last()) {
            (Some(first), Some(last)) if *first == last.reversed() => {
                stack.pop();
                stack.remove(0);
            }
            _ => break,
        }
    }
    Loop::new(stack)
}

fn spread(samples: &[Point3<f64>]) -> f64 {
    samples
        .first()
        .map(|first| samples.iter().map(|p| (p - first).norm()).fold(0.0, f64::max))
        .unwrap_or(0.0)
}

/// Point halfway along a polyline by arc length
fn arc_midpoint(samples: &[Point3<f64>]) -> Point3<f64> {
    let total: f64 = samples.windows(2).map(|w| (w[1] - w[0]).norm()).sum();
    let mut remaining = total * 0.5;
    for w in samples.windows(2) {
        let step = (w[1] - w[0]).norm();
        if step >= remaining && step > 0.0 {
            return w[0] + (w[1] - w[0]) * (remaining / step);
        }
        remaining -= step;
    }
    samples.first().copied().unwrap_or_else(Point3::origin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Primitive, Topology};

    fn cube() -> Primitive {
        Primitive::cube(10.0)
    }

    #[test]
    fn test_shared_cube_is_closed() {
        let outcome = repair(&cube().to_model(), 0.05).unwrap();
        let RepairOutcome::Closed(solid) = outcome else {
            panic!("expected a closed solid");
        };
        assert_eq!(solid.face_count(), 6);
        assert_eq!(solid.shells().len(), 1);
        assert_eq!(solid.stats().merged_vertices, 0);
    }

    #[test]
    fn test_detached_cube_is_sewn_closed() {
        let model = cube().to_model_with(Topology::Detached);
        let outcome = repair(&model, 0.05).unwrap();
        assert!(outcome.is_closed());
        let stats = outcome.stats();
        assert_eq!(stats.merged_vertices, 24 - 8);
        assert_eq!(stats.merged_edges, 12);
        assert_eq!(outcome.model().edge_count(), 12);
    }

    #[test]
    fn test_gap_larger_than_tolerance_fails() {
        let model = Primitive::gapped_cuboid(Point3::origin(), Point3::new(10.0, 10.0, 10.0), 0.2).to_model();
        match repair(&model, 0.05).unwrap() {
            RepairOutcome::NotClosed(failure) => {
                assert_eq!(failure.free_edges, 8);
                assert_eq!(failure.non_manifold_edges, 0);
                assert_eq!(failure.sewn.face_count(), 6);
            }
            RepairOutcome::Closed(_) => panic!("gap of 0.2 must not close at 0.05"),
        }
    }

    #[test]
    fn test_gap_within_tolerance_closes() {
        let model = Primitive::gapped_cuboid(Point3::origin(), Point3::new(10.0, 10.0, 10.0), 0.2).to_model();
        assert!(repair(&model, 0.25).unwrap().is_closed());
    }

    #[test]
    fn test_t_junctions_are_split() {
        let model = Primitive::split_cuboid(Point3::origin(), Point3::new(10.0, 10.0, 10.0)).to_model();
        let outcome = repair(&model, 0.01).unwrap();
        assert!(outcome.stats().split_edges >= 2);
        assert!(outcome.is_closed());
    }

    #[test]
    fn test_inverted_face_is_reoriented() {
        let mut model = cube().to_model();
        let first = model.face_ids()[0];
        if let Some(face) = model.face_mut(first) {
            face.reverse();
        }
        let outcome = repair(&model, 0.05).unwrap();
        assert!(outcome.is_closed());
        assert_eq!(outcome.stats().flipped_faces, 1);
    }

    #[test]
    fn test_repair_leaves_input_untouched() {
        let model = cube().to_model_with(Topology::Detached);
        let _ = repair(&model, 0.05).unwrap();
        assert_eq!(model.vertex_count(), 24);
        assert_eq!(model.edge_count(), 24);
    }

    #[test]
    fn test_cylinder_is_closed() {
        assert!(repair(&Primitive::cylinder(5.0, 10.0).to_model(), 0.05).unwrap().is_closed());
    }

    #[test]
    fn test_invalid_tolerance() {
        let model = cube().to_model();
        assert_eq!(repair(&model, -1.0).unwrap_err(), ConfigError::InvalidTolerance(-1.0));
        assert!(repair(&model, f64::NAN).is_err());
    }

    #[test]
    fn test_cancel_spikes() {
        let mut model = Model::new();
        let a = model.add_vertex(Point3::origin());
        let b = model.add_vertex(Point3::new(1.0, 0.0, 0.0));
        let e = model.add_line(a, b);
        let lp = cancel_spikes(Loop::new(vec![OrientedEdge::new(e, true), OrientedEdge::new(e, false)]));
        assert!(lp.is_empty());
    }
}
