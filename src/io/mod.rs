// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! I/O module - STEP reading, per-face STL export and the face manifest

mod exporter;
mod manifest;
mod reader;
pub mod step;

pub use exporter::{
    export_face, export_face_with, export_faces, face_file_name, face_index_from_path, read_stl_mesh, write_stl,
    ExportOptions, ExportSummary, ExportedFace, SkippedFace, StlFormat,
};
pub use manifest::{sha256_file, FaceManifest, ManifestEntry, MANIFEST_FILE};
pub use reader::{model_from_step, read_step_file};
pub use step::{parse_step, StepFile};
