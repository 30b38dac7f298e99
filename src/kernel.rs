// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Measurement pipeline
//!
//! A run moves through
//! `Start → Parsed → RepairAttempted → {Closed → ExactComputed | NotClosed → VoxelComputed} → Reported → End`.
//! All per-run state lives in a [`RunContext`], so kernels can be shared
//! and runs repeated or executed side by side.

use crate::config::VolumeConfig;
use crate::error::{ConfigError, Error, Result};
use crate::geometry::{
    enumerate_faces, net_volume, repair, solid_properties, voxelize, Model, RepairOutcome, Shape, Solid,
    VoxelEstimate, VoxelOptions,
};
use crate::io::{export_faces, read_step_file, ExportOptions, ExportSummary, FaceManifest};
use crate::report::{BboxReport, Method, RepairAttempt, VolumeReport};
use crate::units::{convert, deviation_percent, VolumeUnit};
use chrono::Utc;
use serde::Serialize;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Stage {
    Start,
    Parsed,
    RepairAttempted,
    Closed,
    NotClosed,
    ExactComputed,
    VoxelComputed,
    Reported,
    End,
}

impl Stage {
    /// Forward transitions of a single pass
    pub fn can_advance_to(self, next: Stage) -> bool {
        use Stage::*;
        matches!(
            (self, next),
            (Start, Parsed)
                | (Parsed, RepairAttempted)
                | (RepairAttempted, Closed)
                | (RepairAttempted, NotClosed)
                | (Closed, ExactComputed)
                | (NotClosed, VoxelComputed)
                | (ExactComputed, Reported)
                | (VoxelComputed, Reported)
                | (Reported, End)
        )
    }
}

/// Per-run state: current stage, the path taken and a clock
#[derive(Debug, Clone)]
pub struct RunContext {
    stage: Stage,
    history: Vec<Stage>,
    retries: usize,
    started: Instant,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            stage: Stage::Start,
            history: vec![Stage::Start],
            retries: 0,
            started: Instant::now(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn history(&self) -> &[Stage] {
        &self.history
    }

    /// Number of repairs restarted after a failed closure check
    pub fn retries(&self) -> usize {
        self.retries
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn advance(&mut self, next: Stage) -> Result<()> {
        if !self.stage.can_advance_to(next) {
            return Err(Error::Pipeline {
                from: self.stage,
                to: next,
            });
        }
        info!(from = ?self.stage, to = ?next, "stage");
        self.enter(next);
        Ok(())
    }

    /// Restart from `RepairAttempted` after `NotClosed`, for tolerance escalation
    pub fn retry_repair(&mut self) -> Result<()> {
        if self.stage != Stage::NotClosed {
            return Err(Error::Pipeline {
                from: self.stage,
                to: Stage::RepairAttempted,
            });
        }
        self.retries += 1;
        info!(retry = self.retries, "restarting repair");
        self.enter(Stage::RepairAttempted);
        Ok(())
    }

    fn enter(&mut self, stage: Stage) {
        self.stage = stage;
        self.history.push(stage);
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a file run produces
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report: VolumeReport,
    pub manifest: Option<FaceManifest>,
    pub stages: Vec<Stage>,
}

/// Validated configuration plus the pipeline operations
#[derive(Debug, Clone)]
pub struct Kernel {
    config: VolumeConfig,
    unit: VolumeUnit,
}

impl Kernel {
    /// Validates the configuration before any file is touched
    pub fn new(config: VolumeConfig) -> Result<Self> {
        config.validate()?;
        let unit = config.unit()?;
        Ok(Self { config, unit })
    }

    pub fn config(&self) -> &VolumeConfig {
        &self.config
    }

    pub fn unit(&self) -> VolumeUnit {
        self.unit
    }

    pub fn export_options(&self) -> ExportOptions {
        ExportOptions {
            format: self.config.stl_format,
            quality: self.config.mesh,
        }
    }

    pub fn voxel_options(&self) -> VoxelOptions {
        VoxelOptions::new(self.config.pitch_mm)
            .with_max_cells(self.config.max_voxel_cells)
            .with_quality(self.config.mesh)
    }

    /// Configured tolerance followed by the escalation list
    pub fn tolerances(&self) -> Vec<f64> {
        std::iter::once(self.config.tolerance_mm)
            .chain(self.config.escalation.iter().copied())
            .collect()
    }

    /// Write every face to the output directory and record the manifest there
    pub fn export(&self, model: &Model, source: Option<&Path>) -> Result<(ExportSummary, FaceManifest)> {
        let faces = enumerate_faces(model)?;
        let directory = &self.config.output_dir;
        let summary = export_faces(&faces, directory, &self.export_options())?;
        let manifest = FaceManifest::build(&faces, &summary, source, self.config.stl_format)?;
        manifest.write(directory)?;
        Ok((summary, manifest))
    }

    /// Parse, export faces when enabled, measure and report one STEP file
    pub fn run(&self, source: impl AsRef<Path>) -> Result<RunOutcome> {
        let source = source.as_ref();
        let mut ctx = RunContext::new();

        let model = read_step_file(source)?;
        ctx.advance(Stage::Parsed)?;
        let cross_check = self.check_pitch(&model)?;

        let (summary, manifest) = if self.config.export_faces {
            let (summary, manifest) = self.export(&model, Some(source))?;
            (Some(summary), Some(manifest))
        } else {
            (None, None)
        };

        let mut report = self.measure_with(&mut ctx, &model, cross_check)?;
        report.source = Some(source.to_path_buf());
        report.label = model.name().map(str::to_string);
        report.export = summary;
        ctx.advance(Stage::End)?;

        Ok(RunOutcome {
            report,
            manifest,
            stages: ctx.history,
        })
    }

    /// Measure a model that is already in memory
    pub fn measure_model(&self, model: &Model, label: impl Into<String>) -> Result<VolumeReport> {
        let mut ctx = RunContext::new();
        ctx.advance(Stage::Parsed)?;
        let mut report = self.measure(&mut ctx, model)?;
        report.label = Some(label.into());
        ctx.advance(Stage::End)?;
        Ok(report)
    }

    /// Repair, compute the volume and build the report, ending at `Reported`
    pub fn measure(&self, ctx: &mut RunContext, model: &Model) -> Result<VolumeReport> {
        let cross_check = self.check_pitch(model)?;
        self.measure_with(ctx, model, cross_check)
    }

    /// Reject a pitch coarser than the model before repair or export starts.
    ///
    /// With `cross_check` enabled a coarse pitch only disables the comparison;
    /// returns whether the cross-check should still run.
    pub fn check_pitch(&self, model: &Model) -> Result<bool> {
        let bbox = model.bounding_box(&self.config.mesh);
        if bbox.is_empty() {
            return Ok(self.config.cross_check);
        }
        let pitch = self.config.pitch_mm;
        let min_extent = bbox.min_extent();
        if pitch <= min_extent {
            return Ok(self.config.cross_check);
        }
        if self.config.cross_check {
            warn!(pitch, min_extent, "pitch exceeds the smallest model extent; skipping the voxel cross-check");
            return Ok(false);
        }
        Err(ConfigError::InvalidPitch {
            pitch,
            min_extent: Some(min_extent),
        }
        .into())
    }

    fn measure_with(&self, ctx: &mut RunContext, model: &Model, cross_check: bool) -> Result<VolumeReport> {
        let face_count = enumerate_faces(model)?.len();

        let mut attempts = Vec::new();
        let mut solid = None;
        for tolerance in self.tolerances() {
            if attempts.is_empty() {
                ctx.advance(Stage::RepairAttempted)?;
            } else {
                ctx.retry_repair()?;
            }
            let outcome = repair(model, tolerance)?;
            attempts.push(RepairAttempt::from_outcome(tolerance, &outcome));
            match outcome {
                RepairOutcome::Closed(closed) => {
                    ctx.advance(Stage::Closed)?;
                    solid = Some(closed);
                    break;
                }
                RepairOutcome::NotClosed(failure) => {
                    warn!(
                        tolerance,
                        free_edges = failure.free_edges,
                        non_manifold_edges = failure.non_manifold_edges,
                        "shape did not close"
                    );
                    ctx.advance(Stage::NotClosed)?;
                }
            }
        }

        let mut report = match solid {
            Some(solid) => self.exact_report(ctx, &solid, cross_check)?,
            None => self.voxel_report(ctx, model)?,
        };
        report.face_count = face_count;
        report.repair_attempts = attempts;
        if report.method == Method::Voxel {
            report.hint = report.tolerance().map(retry_hint);
        }
        if self.config.include_bbox {
            let bbox = model.bounding_box(&self.config.mesh);
            report.bbox = (!bbox.is_empty()).then(|| BboxReport::new(&bbox, self.unit));
        }

        ctx.advance(Stage::Reported)?;
        report.elapsed_ms = ctx.elapsed().as_millis();
        info!(method = %report.method, volume_mm3 = report.raw_volume_mm3, "volume reported");
        Ok(report)
    }

    /// A failed cross-check leaves the exact result standing
    fn exact_report(&self, ctx: &mut RunContext, solid: &Solid, cross_check: bool) -> Result<VolumeReport> {
        let shells = solid_properties(solid);
        let exact = net_volume(&shells);
        ctx.advance(Stage::ExactComputed)?;

        let voxel = if cross_check {
            debug!(pitch = self.config.pitch_mm, "cross-checking exact volume");
            match self.voxel_estimate(solid) {
                Ok(estimate) => Some(estimate),
                Err(err) => {
                    warn!("voxel cross-check skipped: {err}");
                    None
                }
            }
        } else {
            None
        };
        let deviation = voxel.as_ref().and_then(|v| deviation_percent(v.volume, exact));

        let mut report = self.empty_report(Method::Exact, exact);
        report.exact_volume_mm3 = Some(exact);
        report.shells = shells;
        report.voxel = voxel;
        report.deviation_percent = deviation;
        Ok(report)
    }

    /// Voxelize the unrepaired model; there is no exact reference on this path
    fn voxel_report(&self, ctx: &mut RunContext, model: &Model) -> Result<VolumeReport> {
        let estimate = self.voxel_estimate(model)?;
        ctx.advance(Stage::VoxelComputed)?;

        let mut report = self.empty_report(Method::Voxel, estimate.volume);
        report.voxel = Some(estimate);
        Ok(report)
    }

    fn voxel_estimate<S: Shape + ?Sized>(&self, shape: &S) -> Result<VoxelEstimate> {
        Ok(voxelize(shape, &self.voxel_options())?.estimate())
    }

    fn empty_report(&self, method: Method, raw_volume_mm3: f64) -> VolumeReport {
        VolumeReport {
            source: None,
            label: None,
            generated_at: Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            method,
            unit: self.unit,
            raw_volume_mm3,
            volume: convert(raw_volume_mm3, self.unit),
            exact_volume_mm3: None,
            voxel: None,
            deviation_percent: None,
            repair_attempts: Vec::new(),
            shells: Vec::new(),
            bbox: None,
            face_count: 0,
            export: None,
            hint: None,
            elapsed_ms: 0,
        }
    }
}

/// Suggested next tolerance after a failed closure at `tolerance`
pub fn next_tolerance(tolerance: f64) -> f64 {
    if tolerance > 0.0 {
        tolerance * 2.0
    } else {
        VolumeConfig::default().tolerance_mm
    }
}

fn retry_hint(tolerance: f64) -> String {
    format!(
        "shape did not close at {tolerance} mm; retry with --tolerance {} for an exact volume",
        next_tolerance(tolerance)
    )
}
