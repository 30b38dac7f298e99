// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! End-to-end measurement runs on STEP fixtures

use anyhow::Result;
use approx::assert_relative_eq;
use std::path::PathBuf;
use stepvol::{ConfigError, Error, Kernel, Method, Stage, VolumeConfig};
use tempfile::TempDir;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn config_in(dir: &TempDir) -> VolumeConfig {
    VolumeConfig {
        output_dir: dir.path().join("faces_out"),
        ..VolumeConfig::default()
    }
}

#[test]
fn test_closed_cube_exact_volume() -> Result<()> {
    let dir = TempDir::new()?;
    let kernel = Kernel::new(config_in(&dir))?;
    let outcome = kernel.run(fixture("cube.step"))?;
    let report = &outcome.report;

    println!("{}", report.result_line());
    assert_eq!(report.method, Method::Exact);
    assert_relative_eq!(report.raw_volume_mm3, 1000.0, epsilon = 1e-6);
    assert_relative_eq!(report.volume, 1.0, epsilon = 1e-9);
    assert_eq!(report.result_line(), "exact: 1.000000 cm3");
    assert_eq!(report.face_count, 6);
    assert_eq!(report.label.as_deref(), Some("cube"));
    assert!(report.hint.is_none());

    assert_eq!(
        outcome.stages,
        vec![
            Stage::Start,
            Stage::Parsed,
            Stage::RepairAttempted,
            Stage::Closed,
            Stage::ExactComputed,
            Stage::Reported,
            Stage::End
        ]
    );

    let export = report.export.as_ref().expect("faces exported");
    assert_eq!(export.written.len(), 6);
    assert!(outcome.manifest.is_some());
    Ok(())
}

#[test]
fn test_open_cube_falls_back_to_voxels() -> Result<()> {
    let dir = TempDir::new()?;
    let kernel = Kernel::new(config_in(&dir))?;
    let outcome = kernel.run(fixture("cube_gap.step"))?;
    let report = &outcome.report;

    println!("{}", report.result_line());
    assert_eq!(report.method, Method::Voxel);
    assert_eq!(report.pitch(), Some(0.5));
    assert!(report.deviation_percent.is_none());
    assert!(report.result_line().ends_with("(pitch 0.5 mm, deviation N/A)"));

    let error = (report.raw_volume_mm3 - 1000.0).abs() / 1000.0 * 100.0;
    println!("voxel fallback error: {error:.2}%");
    assert!(error < 5.0, "voxel estimate off by {error:.2}%");

    let attempt = &report.repair_attempts[0];
    assert!(!attempt.closed);
    assert_eq!(attempt.free_edges, 8);
    assert!(report.hint.as_deref().is_some_and(|h| h.contains("--tolerance 0.1")));

    assert!(outcome.stages.contains(&Stage::NotClosed));
    assert!(outcome.stages.contains(&Stage::VoxelComputed));
    assert!(!outcome.stages.contains(&Stage::ExactComputed));
    Ok(())
}

#[test]
fn test_escalation_reaches_exact_volume() -> Result<()> {
    let dir = TempDir::new()?;
    let kernel = Kernel::new(VolumeConfig {
        escalation: vec![0.1, 0.25],
        export_faces: false,
        ..config_in(&dir)
    })?;
    let outcome = kernel.run(fixture("cube_gap.step"))?;
    let report = &outcome.report;

    assert_eq!(report.method, Method::Exact);
    assert_eq!(report.repair_attempts.len(), 3);
    // The lifted lid is fused halfway across the gap
    assert_relative_eq!(report.raw_volume_mm3, 1010.0, max_relative = 0.01);
    assert_eq!(
        outcome.stages.iter().filter(|s| **s == Stage::RepairAttempted).count(),
        3
    );
    assert!(report.export.is_none());
    assert!(outcome.manifest.is_none());
    Ok(())
}

#[test]
fn test_cylinder_exact_volume() -> Result<()> {
    let dir = TempDir::new()?;
    let kernel = Kernel::new(VolumeConfig {
        output_unit: "mm3".into(),
        ..config_in(&dir)
    })?;
    let report = kernel.run(fixture("cylinder.step"))?.report;

    let expected = std::f64::consts::PI * 25.0 * 10.0;
    println!("cylinder: {:.4} mm3, expected {expected:.4}", report.volume);
    assert_eq!(report.method, Method::Exact);
    assert_relative_eq!(report.volume, expected, max_relative = 1e-9);
    Ok(())
}

#[test]
fn test_units_and_bbox() -> Result<()> {
    let dir = TempDir::new()?;
    for (unit, expected) in [("mm3", 1000.0), ("cm3", 1.0), ("m3", 1e-6)] {
        let kernel = Kernel::new(VolumeConfig {
            output_unit: unit.into(),
            include_bbox: true,
            export_faces: false,
            ..config_in(&dir)
        })?;
        let report = kernel.run(fixture("cube.step"))?.report;
        assert_relative_eq!(report.volume, expected, max_relative = 1e-9);
        let bbox = report.bbox.expect("bbox requested");
        assert_relative_eq!(bbox.volume, expected, max_relative = 1e-9);
        assert_eq!(bbox.extents, [10.0, 10.0, 10.0]);
    }
    Ok(())
}

#[test]
fn test_cross_check_deviation() -> Result<()> {
    let dir = TempDir::new()?;
    let kernel = Kernel::new(VolumeConfig {
        cross_check: true,
        export_faces: false,
        ..config_in(&dir)
    })?;
    let report = kernel.run(fixture("cube.step"))?.report;
    assert_eq!(report.method, Method::Exact);
    let deviation = report.deviation_percent.expect("both methods ran");
    assert!(deviation < 1e-6);
    assert!(report.result_line().contains("voxel check at pitch 0.5 mm"));
    Ok(())
}

#[test]
fn test_config_errors_before_reading() {
    // The file does not exist; configuration is rejected first
    let missing = fixture("missing.step");

    let config = VolumeConfig {
        pitch_mm: 0.0,
        ..VolumeConfig::default()
    };
    let result = Kernel::new(config).and_then(|k| k.run(&missing));
    assert!(matches!(result, Err(Error::Config(ConfigError::InvalidPitch { .. }))));

    let config = VolumeConfig {
        output_unit: "ft3".into(),
        ..VolumeConfig::default()
    };
    let result = Kernel::new(config).and_then(|k| k.run(&missing));
    assert!(matches!(result, Err(Error::Config(ConfigError::UnknownUnit(_)))));
}

#[test]
fn test_repeated_runs_agree() -> Result<()> {
    let dir = TempDir::new()?;
    let kernel = Kernel::new(VolumeConfig {
        export_faces: false,
        ..config_in(&dir)
    })?;
    let first = kernel.run(fixture("cube_gap.step"))?.report;
    let second = kernel.run(fixture("cube_gap.step"))?.report;
    assert_eq!(first.raw_volume_mm3, second.raw_volume_mm3);
    assert_eq!(first.voxel, second.voxel);
    Ok(())
}

#[test]
fn test_report_serializes() -> Result<()> {
    let dir = TempDir::new()?;
    let kernel = Kernel::new(config_in(&dir))?;
    let report = kernel.run(fixture("cube_gap.step"))?.report;
    let json: serde_json::Value = serde_json::to_value(&report)?;
    assert_eq!(json["method"], "voxel");
    assert_eq!(json["voxel"]["extents"]["pitch"], 0.5);
    assert!(json["deviation_percent"].is_null());
    Ok(())
}

#[test]
fn test_coarse_pitch_fails_before_any_face_is_written() -> Result<()> {
    let dir = TempDir::new()?;
    let config = config_in(&dir);
    let output_dir = config.output_dir.clone();
    let kernel = Kernel::new(VolumeConfig {
        pitch_mm: 20.0,
        ..config
    })?;
    assert!(kernel.config().export_faces);

    let result = kernel.run(fixture("cube_gap.step"));
    assert!(matches!(
        result,
        Err(Error::Config(ConfigError::InvalidPitch {
            min_extent: Some(_),
            ..
        }))
    ));
    assert!(!output_dir.exists());
    Ok(())
}

#[test]
fn test_cross_check_with_coarse_pitch_keeps_exact_result() -> Result<()> {
    let dir = TempDir::new()?;
    let kernel = Kernel::new(VolumeConfig {
        cross_check: true,
        pitch_mm: 20.0,
        output_unit: "mm3".into(),
        ..config_in(&dir)
    })?;
    let report = kernel.run(fixture("cube.step"))?.report;
    println!("{}", report.result_line());
    assert_eq!(report.method, Method::Exact);
    assert_relative_eq!(report.volume, 1000.0, epsilon = 1e-6);
    assert!(report.voxel.is_none());
    assert!(report.deviation_percent.is_none());
    Ok(())
}
