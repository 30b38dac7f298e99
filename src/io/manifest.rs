// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! `faces.json` manifest written next to exported faces
//!
//! The manifest records which file holds which face so a viewer can map a
//! picked actor back to a face index and its STEP entity.

use super::exporter::{face_index_from_path, ExportSummary, StlFormat};
use crate::error::{Error, Result};
use crate::geometry::Face;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "faces.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub index: usize,
    /// File name relative to the manifest, absent when the face was skipped
    pub file: Option<String>,
    pub skipped: Option<String>,
    pub step_id: Option<u64>,
    pub surface: String,
    pub triangles: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceManifest {
    pub source: Option<PathBuf>,
    pub source_sha256: Option<String>,
    pub generated_at: String,
    pub format: StlFormat,
    pub faces: Vec<ManifestEntry>,
}

impl FaceManifest {
    pub fn build(faces: &[Face<'_>], summary: &ExportSummary, source: Option<&Path>, format: StlFormat) -> Result<Self> {
        let source_sha256 = source.map(sha256_file).transpose()?;

        let entries = faces
            .iter()
            .map(|face| {
                let written = summary.written.iter().find(|w| w.index == face.index());
                let skipped = summary.skipped.iter().find(|s| s.index == face.index());
                ManifestEntry {
                    index: face.index(),
                    file: written.and_then(|w| w.path.file_name()).map(|n| n.to_string_lossy().into_owned()),
                    skipped: skipped.map(|s| s.reason.clone()),
                    step_id: face.step_id(),
                    surface: face.surface().kind().to_string(),
                    triangles: written.map(|w| w.triangles).unwrap_or(0),
                }
            })
            .collect();

        Ok(Self {
            source: source.map(Path::to_path_buf),
            source_sha256,
            generated_at: Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            format,
            faces: entries,
        })
    }

    /// Write into `directory`, returning the manifest path
    pub fn write(&self, directory: impl AsRef<Path>) -> Result<PathBuf> {
        let path = directory.as_ref().join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).map_err(|e| Error::io(&path, e))?;
        Ok(path)
    }

    /// Load from a manifest file or from the directory containing one
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path = if path.is_dir() {
            path.join(MANIFEST_FILE)
        } else {
            path.to_path_buf()
        };
        let text = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn entry(&self, index: usize) -> Option<&ManifestEntry> {
        self.faces.iter().find(|e| e.index == index)
    }

    /// Map a picked actor name, file name or path back to its face.
    ///
    /// Accepts `face_0007`, `face_0007.stl`, `out/face_0007.stl` or a bare
    /// index. Only faces that were actually written resolve.
    pub fn resolve_pick(&self, picked: &str) -> Option<&ManifestEntry> {
        let picked = picked.trim();
        let index = picked
            .parse::<usize>()
            .ok()
            .or_else(|| face_index_from_path(picked.rsplit(['/', '\\']).next().unwrap_or(picked)))?;
        self.entry(index).filter(|e| e.file.is_some())
    }

    pub fn written(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.faces.iter().filter(|e| e.file.is_some())
    }
}

/// Hex SHA-256 of a file's contents
pub fn sha256_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{enumerate_faces, Model, Primitive, Surface};
    use crate::io::{export_faces, ExportOptions};
    use nalgebra::Point3;
    use tempfile::TempDir;

    fn model_with_degenerate_face() -> Model {
        let mut model = Primitive::cube(10.0).to_model();
        let sliver = [
            Point3::new(0.0, 0.0, 20.0),
            Point3::new(1.0, 0.0, 20.0),
            Point3::new(2.0, 0.0, 20.0),
        ];
        model.add_polygon_face(&sliver, &[], Surface::Other("PLANE".into()));
        model
    }

    #[test]
    fn test_manifest_round_trip_and_pick() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let source = dir.path().join("part.step");
        fs::write(&source, "ISO-10303-21;")?;

        let model = model_with_degenerate_face();
        let faces = enumerate_faces(&model)?;
        let summary = export_faces(&faces, dir.path(), &ExportOptions::default())?;
        assert_eq!(summary.written.len(), 6);
        assert_eq!(summary.skipped.len(), 1);

        let manifest = FaceManifest::build(&faces, &summary, Some(&source), StlFormat::Binary)?;
        manifest.write(dir.path())?;
        let loaded = FaceManifest::load(dir.path())?;
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.source_sha256.as_deref().map(str::len), Some(64));

        assert_eq!(loaded.resolve_pick("face_0003").map(|e| e.index), Some(3));
        assert_eq!(loaded.resolve_pick("/tmp/out/face_0005.stl").map(|e| e.index), Some(5));
        assert_eq!(loaded.resolve_pick("4").map(|e| e.surface.as_str()), Some("plane"));
        // Skipped faces have no file to pick
        assert!(loaded.resolve_pick("face_0006.stl").is_none());
        assert!(loaded.entry(6).and_then(|e| e.skipped.as_ref()).is_some());
        assert_eq!(loaded.written().count(), 6);
        Ok(())
    }
}
