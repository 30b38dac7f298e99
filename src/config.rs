// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Run configuration
//!
//! Values come from defaults, then `stepvol.toml` when present, then
//! `STEPVOL_*` environment variables, then command-line flags.

use crate::error::ConfigError;
use crate::geometry::{MeshQuality, DEFAULT_MAX_CELLS};
use crate::io::StlFormat;
use crate::units::VolumeUnit;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "stepvol.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    /// STEP file to measure
    pub source_path: Option<PathBuf>,
    /// Directory receiving per-face STL files
    pub output_dir: PathBuf,
    /// Sewing tolerance in mm
    pub tolerance_mm: f64,
    /// Voxel edge length in mm
    pub pitch_mm: f64,
    /// One of mm3, cm3, m3
    pub output_unit: String,
    pub include_bbox: bool,
    pub show_visualization: bool,
    /// Write per-face STL files during a run
    pub export_faces: bool,
    pub stl_format: StlFormat,
    /// Tessellation used for exported faces
    pub mesh: MeshQuality,
    /// Extra tolerances tried in order after a failed repair
    pub escalation: Vec<f64>,
    /// Also voxelize closed solids and report the deviation
    pub cross_check: bool,
    pub max_voxel_cells: usize,
    /// External STL viewer; `{files}` expands to the exported files
    pub viewer_command: Option<String>,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            source_path: None,
            output_dir: PathBuf::from("faces_out"),
            tolerance_mm: 0.05,
            pitch_mm: 0.5,
            output_unit: VolumeUnit::Cm3.token().to_string(),
            include_bbox: false,
            show_visualization: false,
            export_faces: true,
            stl_format: StlFormat::Binary,
            mesh: MeshQuality::default(),
            escalation: Vec::new(),
            cross_check: false,
            max_voxel_cells: DEFAULT_MAX_CELLS,
            viewer_command: None,
        }
    }
}

impl VolumeConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file_error = |message: String| ConfigError::File {
            path: path.to_path_buf(),
            message,
        };
        let content = std::fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
        toml::from_str(&content).map_err(|e| file_error(e.to_string()))
    }

    /// Defaults, then `stepvol.toml` in the working directory, then environment
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = if Path::new(CONFIG_FILE).exists() {
            Self::from_file(CONFIG_FILE)?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `STEPVOL_*` overrides from a variable lookup.
    ///
    /// Unparsable numbers become NaN so that [`validate`](Self::validate)
    /// rejects them instead of silently keeping the old value.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let number = |value: String| value.trim().parse().unwrap_or(f64::NAN);
        let flag = |value: String| matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");

        if let Some(source) = lookup("STEPVOL_SOURCE") {
            self.source_path = Some(PathBuf::from(source));
        }
        if let Some(dir) = lookup("STEPVOL_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(tolerance) = lookup("STEPVOL_TOLERANCE") {
            self.tolerance_mm = number(tolerance);
        }
        if let Some(pitch) = lookup("STEPVOL_PITCH") {
            self.pitch_mm = number(pitch);
        }
        if let Some(unit) = lookup("STEPVOL_UNIT") {
            self.output_unit = unit;
        }
        if let Some(bbox) = lookup("STEPVOL_INCLUDE_BBOX") {
            self.include_bbox = flag(bbox);
        }
        if let Some(viewer) = lookup("STEPVOL_VIEWER") {
            self.viewer_command = Some(viewer);
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let file_error = |message: String| ConfigError::File {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| file_error(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| file_error(e.to_string()))
    }

    pub fn unit(&self) -> Result<VolumeUnit, ConfigError> {
        self.output_unit.parse()
    }

    /// Check every option that can be checked without touching geometry
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.pitch_mm.is_finite() && self.pitch_mm > 0.0) {
            return Err(ConfigError::InvalidPitch {
                pitch: self.pitch_mm,
                min_extent: None,
            });
        }
        for &tolerance in std::iter::once(&self.tolerance_mm).chain(&self.escalation) {
            if !(tolerance.is_finite() && tolerance >= 0.0) {
                return Err(ConfigError::InvalidTolerance(tolerance));
            }
        }
        self.mesh.validate()?;
        self.unit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = VolumeConfig::default();
        assert_eq!(config.output_dir, PathBuf::from("faces_out"));
        assert_eq!(config.tolerance_mm, 0.05);
        assert_eq!(config.pitch_mm, 0.5);
        assert_eq!(config.unit().unwrap(), VolumeUnit::Cm3);
        assert!(!config.include_bbox);
        assert!(!config.show_visualization);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "pitch_mm = 0.25\noutput_unit = \"mm3\"\nescalation = [0.1, 0.2]\n")?;

        let config = VolumeConfig::from_file(&path)?;
        assert_eq!(config.pitch_mm, 0.25);
        assert_eq!(config.unit()?, VolumeUnit::Mm3);
        assert_eq!(config.escalation, vec![0.1, 0.2]);
        assert_eq!(config.tolerance_mm, 0.05);
        Ok(())
    }

    #[test]
    fn test_save_and_reload() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("saved.toml");
        let config = VolumeConfig {
            include_bbox: true,
            viewer_command: Some("f3d {files}".to_string()),
            ..VolumeConfig::default()
        };
        config.save(&path)?;
        assert_eq!(VolumeConfig::from_file(&path)?, config);
        Ok(())
    }

    #[test]
    fn test_environment_overrides() {
        let vars: HashMap<&str, &str> = [
            ("STEPVOL_PITCH", "0.2"),
            ("STEPVOL_UNIT", "m3"),
            ("STEPVOL_INCLUDE_BBOX", "yes"),
        ]
        .into_iter()
        .collect();
        let mut config = VolumeConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.pitch_mm, 0.2);
        assert_eq!(config.unit().unwrap(), VolumeUnit::M3);
        assert!(config.include_bbox);
    }

    #[test]
    fn test_validation_errors() {
        let bad_pitch = VolumeConfig {
            pitch_mm: 0.0,
            ..VolumeConfig::default()
        };
        assert!(matches!(bad_pitch.validate(), Err(ConfigError::InvalidPitch { .. })));

        let bad_unit = VolumeConfig {
            output_unit: "litre".to_string(),
            ..VolumeConfig::default()
        };
        assert_eq!(bad_unit.validate(), Err(ConfigError::UnknownUnit("litre".to_string())));

        let mut bad_env = VolumeConfig::default();
        bad_env.apply_overrides(|key| (key == "STEPVOL_TOLERANCE").then(|| "wide".to_string()));
        assert!(matches!(bad_env.validate(), Err(ConfigError::InvalidTolerance(t)) if t.is_nan()));

        let bad_escalation = VolumeConfig {
            escalation: vec![0.1, -0.2],
            ..VolumeConfig::default()
        };
        assert_eq!(bad_escalation.validate(), Err(ConfigError::InvalidTolerance(-0.2)));
    }
}
