// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Volume report produced at the end of a run

use crate::geometry::{BoundingBox, RepairOutcome, SewingStats, ShellProperties, VoxelEstimate};
use crate::io::ExportSummary;
use crate::units::{convert, format_deviation, VolumeUnit};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Which computation produced the reported number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Exact,
    Voxel,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Exact => "exact",
            Self::Voxel => "voxel",
        })
    }
}

/// One call to the sewing stage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepairAttempt {
    pub tolerance: f64,
    pub closed: bool,
    pub free_edges: usize,
    pub non_manifold_edges: usize,
    pub non_orientable_shells: usize,
    pub stats: SewingStats,
}

impl RepairAttempt {
    pub fn from_outcome(tolerance: f64, outcome: &RepairOutcome) -> Self {
        match outcome {
            RepairOutcome::Closed(solid) => Self {
                tolerance,
                closed: true,
                free_edges: 0,
                non_manifold_edges: 0,
                non_orientable_shells: 0,
                stats: *solid.stats(),
            },
            RepairOutcome::NotClosed(failure) => Self {
                tolerance,
                closed: false,
                free_edges: failure.free_edges,
                non_manifold_edges: failure.non_manifold_edges,
                non_orientable_shells: failure.non_orientable_shells,
                stats: failure.stats,
            },
        }
    }
}

/// Axis-aligned box of the parsed model; `volume` is in the report unit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BboxReport {
    pub min: [f64; 3],
    pub max: [f64; 3],
    pub extents: [f64; 3],
    pub volume: f64,
}

impl BboxReport {
    pub fn new(bbox: &BoundingBox, unit: VolumeUnit) -> Self {
        let size = bbox.size();
        Self {
            min: [bbox.min.x, bbox.min.y, bbox.min.z],
            max: [bbox.max.x, bbox.max.y, bbox.max.z],
            extents: [size.x, size.y, size.z],
            volume: convert(bbox.volume(), unit),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeReport {
    pub source: Option<PathBuf>,
    pub label: Option<String>,
    pub generated_at: String,
    pub method: Method,
    pub unit: VolumeUnit,
    /// Volume in mm³ from the method that produced the result
    pub raw_volume_mm3: f64,
    /// `raw_volume_mm3` converted to `unit`
    pub volume: f64,
    /// Exact reference in mm³, present whenever the shape closed
    pub exact_volume_mm3: Option<f64>,
    pub voxel: Option<VoxelEstimate>,
    /// `None` when there is no exact reference or it is zero
    pub deviation_percent: Option<f64>,
    pub repair_attempts: Vec<RepairAttempt>,
    pub shells: Vec<ShellProperties>,
    pub bbox: Option<BboxReport>,
    pub face_count: usize,
    pub export: Option<ExportSummary>,
    pub hint: Option<String>,
    pub elapsed_ms: u128,
}

impl VolumeReport {
    /// Pitch of the voxel grid, when one was built
    pub fn pitch(&self) -> Option<f64> {
        self.voxel.as_ref().map(|v| v.extents.pitch)
    }

    /// Tolerance of the last repair attempt
    pub fn tolerance(&self) -> Option<f64> {
        self.repair_attempts.last().map(|a| a.tolerance)
    }

    pub fn is_closed(&self) -> bool {
        self.repair_attempts.last().is_some_and(|a| a.closed)
    }

    /// One-line summary: method tag, volume and unit, plus pitch and
    /// deviation whenever a voxel grid was involved.
    pub fn result_line(&self) -> String {
        let head = format!("{}: {} {}", self.method, format_volume(self.volume), self.unit);
        let deviation = format_deviation(self.deviation_percent);
        match (self.method, self.pitch()) {
            (Method::Voxel, Some(pitch)) => format!("{head} (pitch {pitch} mm, deviation {deviation})"),
            (Method::Exact, Some(pitch)) => format!("{head} (voxel check at pitch {pitch} mm, deviation {deviation})"),
            _ => head,
        }
    }
}

/// Fixed six decimals, switching to scientific notation for tiny values
pub fn format_volume(value: f64) -> String {
    if value != 0.0 && value.abs() < 1e-3 {
        format!("{value:.6e}")
    } else {
        format!("{value:.6}")
    }
}
