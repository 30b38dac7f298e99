// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! stepvol
//!
//! Reads STEP boundary-representation models, exports every face as its own
//! STL file and measures the enclosed volume. Shapes that sew into a closed
//! solid get an exact volume; anything else falls back to a voxel estimate.

pub mod cli;
pub mod config;
pub mod error;
pub mod geometry;
pub mod io;
pub mod kernel;
pub mod report;
pub mod units;
pub mod utils;

pub use config::VolumeConfig;
pub use error::{ConfigError, Error, MeshingError, ParseError, Result};
pub use geometry::{
    enumerate_faces, exact_volume, repair, voxel_volume, Face, GridExtents, Model, RepairFailure, RepairOutcome,
    Shape, Solid,
};
pub use io::{export_face, read_step_file, FaceManifest};
pub use kernel::{Kernel, RunContext, RunOutcome, Stage};
pub use report::{Method, VolumeReport};
pub use units::{convert, VolumeUnit};

use std::path::Path;

/// Measure one STEP file with `config`, returning the report
pub fn measure_file(path: impl AsRef<Path>, config: VolumeConfig) -> Result<VolumeReport> {
    let kernel = Kernel::new(config)?;
    Ok(kernel.run(path)?.report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_a_parse_error() {
        let config = VolumeConfig {
            export_faces: false,
            ..VolumeConfig::default()
        };
        let result = measure_file("does/not/exist.step", config);
        assert!(matches!(result, Err(Error::Parse(ParseError::Read { .. }))));
    }
}
