// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Error taxonomy for the measurement pipeline
//!
//! Parse and configuration errors are fatal for a run. Meshing errors are
//! scoped to a single face and callers are expected to skip that face.
//! A failed repair is not an error at all, see [`crate::geometry::RepairOutcome`].

use crate::kernel::Stage;
use std::path::PathBuf;
use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Meshing(#[from] MeshingError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("pipeline cannot move from {from:?} to {to:?}")]
    Pipeline { from: Stage, to: Stage },

    #[error("shape has no triangulated surface to measure")]
    EmptyShape,

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest error: {0}")]
    Manifest(#[from] serde_json::Error),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Malformed or unreadable source document
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("STEP syntax error: {0}")]
    Syntax(String),

    #[error("duplicate entity #{0}")]
    DuplicateEntity(u64),

    #[error("missing entity #{0}")]
    MissingEntity(u64),

    #[error("entity #{id}: expected {expected}, found {found}")]
    TypeMismatch {
        id: u64,
        expected: &'static str,
        found: String,
    },

    #[error("entity #{id}: {message}")]
    Malformed { id: u64, message: String },

    #[error("model contains no faces")]
    NoFaces,
}

impl ParseError {
    pub fn malformed(id: u64, message: impl Into<String>) -> Self {
        Self::Malformed {
            id,
            message: message.into(),
        }
    }

    pub fn type_mismatch(id: u64, expected: &'static str, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            id,
            expected,
            found: found.into(),
        }
    }
}

/// Triangulation failure for one face
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MeshingError {
    #[error("face {face}: degenerate boundary ({reason})")]
    Degenerate { face: usize, reason: String },

    #[error("face {face}: triangulation produced no triangles")]
    NoTriangles { face: usize },

    #[error("face {face}: {message}")]
    Triangulation { face: usize, message: String },
}

impl MeshingError {
    /// Index of the face that failed
    pub fn face(&self) -> usize {
        match self {
            Self::Degenerate { face, .. }
            | Self::NoTriangles { face }
            | Self::Triangulation { face, .. } => *face,
        }
    }
}

/// Bad configuration, reported before any geometric work
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid pitch {pitch} mm{}", extent_note(.min_extent))]
    InvalidPitch { pitch: f64, min_extent: Option<f64> },

    #[error("unknown volume unit '{0}' (expected mm3, cm3 or m3)")]
    UnknownUnit(String),

    #[error("invalid sewing tolerance {0} mm")]
    InvalidTolerance(f64),

    #[error("invalid mesh deflection {0}")]
    InvalidDeflection(f64),

    #[error("voxel grid of {cells} cells exceeds the budget of {limit}")]
    GridTooLarge { cells: u128, limit: usize },

    #[error("config file {path}: {message}")]
    File { path: PathBuf, message: String },
}

fn extent_note(min_extent: &Option<f64>) -> String {
    match min_extent {
        Some(extent) => format!(" (smallest bounding-box extent is {extent:.4} mm)"),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_pitch_message() {
        let err = ConfigError::InvalidPitch {
            pitch: 20.0,
            min_extent: Some(10.0),
        };
        assert_eq!(
            err.to_string(),
            "invalid pitch 20 mm (smallest bounding-box extent is 10.0000 mm)"
        );

        let err = ConfigError::InvalidPitch {
            pitch: -1.0,
            min_extent: None,
        };
        assert_eq!(err.to_string(), "invalid pitch -1 mm");
    }

    #[test]
    fn test_meshing_error_face() {
        let err = MeshingError::NoTriangles { face: 7 };
        assert_eq!(err.face(), 7);
        let wrapped: Error = err.into();
        assert!(matches!(wrapped, Error::Meshing(_)));
    }
}
