// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! STEP reading on the fixture files

use anyhow::Result;
use approx::assert_relative_eq;
use std::path::PathBuf;
use stepvol::geometry::{enumerate_faces, repair, MeshQuality};
use stepvol::io::{model_from_step, parse_step, read_step_file};
use stepvol::{exact_volume, ParseError, RepairOutcome};

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

#[test]
fn test_cube_topology() -> Result<()> {
    let model = read_step_file(fixture("cube.step"))?;
    println!(
        "cube: {} vertices, {} edges, {} faces",
        model.vertex_count(),
        model.edge_count(),
        model.face_count()
    );
    assert_eq!(model.face_count(), 6);
    assert_eq!(model.vertex_count(), 8);
    assert_eq!(model.edge_count(), 12);
    assert_eq!(model.name(), Some("cube"));

    let faces = enumerate_faces(&model)?;
    assert!(faces.iter().all(|f| f.surface().kind() == "plane"));
    assert!(faces.windows(2).all(|w| w[0].step_id() < w[1].step_id()));

    let bbox = model.bounding_box(&MeshQuality::default());
    assert_relative_eq!(bbox.min.x, 0.0);
    assert_relative_eq!(bbox.max.z, 10.0);
    Ok(())
}

#[test]
fn test_header_fields() -> Result<()> {
    let text = std::fs::read_to_string(fixture("cube.step"))?;
    let step = parse_step(&text)?;
    assert_eq!(step.file_name(), Some("cube.step"));
    assert!(step.schema().is_some_and(|s| s.starts_with("AUTOMOTIVE_DESIGN")));
    assert_eq!(step.instances_of("ADVANCED_FACE").count(), 6);
    Ok(())
}

#[test]
fn test_gapped_cube_keeps_lid_separate() -> Result<()> {
    let model = read_step_file(fixture("cube_gap.step"))?;
    assert_eq!(model.face_count(), 6);
    assert_eq!(model.vertex_count(), 12);
    assert_eq!(model.edge_count(), 16);
    Ok(())
}

#[test]
fn test_cylinder_surfaces() -> Result<()> {
    let model = read_step_file(fixture("cylinder.step"))?;
    let kinds: Vec<String> = enumerate_faces(&model)?
        .iter()
        .map(|f| f.surface().kind().to_string())
        .collect();
    assert_eq!(kinds, vec!["plane", "plane", "cylinder"]);
    Ok(())
}

#[test]
fn test_length_unit_scales_geometry() -> Result<()> {
    let text = std::fs::read_to_string(fixture("cube.step"))?;
    let centimetres = text.replace("SI_UNIT(.MILLI.,.METRE.)", "SI_UNIT(.CENTI.,.METRE.)");
    assert_ne!(text, centimetres);

    let model = model_from_step(&parse_step(&centimetres)?, "cube_cm")?;
    let solid = match repair(&model, 0.05)? {
        RepairOutcome::Closed(solid) => solid,
        RepairOutcome::NotClosed(failure) => anyhow::bail!("cube did not close: {} free edges", failure.free_edges),
    };
    // 10 cm edge
    assert_relative_eq!(exact_volume(&solid), 1.0e6, max_relative = 1e-9);
    Ok(())
}

#[test]
fn test_truncated_file_is_a_parse_error() -> Result<()> {
    let text = std::fs::read_to_string(fixture("cube.step"))?;
    let cut = &text[..text.len() / 2];
    assert!(matches!(parse_step(cut), Err(ParseError::Syntax(_))));
    Ok(())
}

#[test]
fn test_dangling_reference_is_reported() -> Result<()> {
    let text = std::fs::read_to_string(fixture("cube.step"))?;
    // Drop the first vertex definition
    let broken: String = text
        .lines()
        .filter(|line| !line.starts_with("#6=VERTEX_POINT"))
        .collect::<Vec<_>>()
        .join("\n");
    let step = parse_step(&broken)?;
    assert!(matches!(model_from_step(&step, "broken"), Err(ParseError::MissingEntity(6))));
    Ok(())
}

#[test]
fn test_non_positive_radius_is_rejected() -> Result<()> {
    let text = std::fs::read_to_string(fixture("cylinder.step"))?;
    let flat = text.replace("#44=CYLINDRICAL_SURFACE('',#43,5.);", "#44=CYLINDRICAL_SURFACE('',#43,0.);");
    assert_ne!(text, flat);
    let step = parse_step(&flat)?;
    assert!(matches!(
        model_from_step(&step, "flat"),
        Err(ParseError::Malformed { id: 44, .. })
    ));

    let inverted = text.replace("#5=CIRCLE('',#4,5.);", "#5=CIRCLE('',#4,-5.);");
    assert_ne!(text, inverted);
    let step = parse_step(&inverted)?;
    assert!(matches!(
        model_from_step(&step, "inverted"),
        Err(ParseError::Malformed { id: 5, .. })
    ));
    Ok(())
}
