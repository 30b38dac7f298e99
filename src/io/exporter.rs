// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Per-face STL export
//!
//! Every face is written to its own file named by its enumeration index, so
//! `face_0007.stl` always holds face 7. Faces that fail to triangulate are
//! skipped and reported; I/O failures abort the export.

use crate::error::{ConfigError, Error, MeshingError, Result};
use crate::geometry::{Face, Mesh, MeshQuality, Triangle, Vertex};
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

const FILE_PREFIX: &str = "face_";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StlFormat {
    #[default]
    Binary,
    Ascii,
}

impl fmt::Display for StlFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Binary => "binary",
            Self::Ascii => "ascii",
        })
    }
}

impl FromStr for StlFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "binary" | "bin" => Ok(Self::Binary),
            "ascii" | "text" => Ok(Self::Ascii),
            other => Err(ConfigError::File {
                path: PathBuf::new(),
                message: format!("unknown STL format '{other}'"),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExportOptions {
    pub format: StlFormat,
    pub quality: MeshQuality,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            format: StlFormat::Binary,
            quality: MeshQuality::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportedFace {
    pub index: usize,
    pub path: PathBuf,
    pub triangles: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedFace {
    pub index: usize,
    pub reason: String,
}

/// Outcome of a batch export, in face index order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExportSummary {
    pub directory: PathBuf,
    pub written: Vec<ExportedFace>,
    pub skipped: Vec<SkippedFace>,
}

impl ExportSummary {
    pub fn total(&self) -> usize {
        self.written.len() + self.skipped.len()
    }
}

/// `face_0007.stl` for index 7
pub fn face_file_name(index: usize) -> String {
    format!("{FILE_PREFIX}{index:04}.stl")
}

/// Recover the face index from an exported file name or path
pub fn face_index_from_path(path: impl AsRef<Path>) -> Option<usize> {
    let stem = path.as_ref().file_stem()?.to_str()?;
    let digits = stem.strip_prefix(FILE_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Export one face as binary STL at the default quality
pub fn export_face(face: &Face<'_>, destination: impl AsRef<Path>) -> Result<PathBuf> {
    let destination = destination.as_ref();
    fs::create_dir_all(destination).map_err(|e| Error::io(destination, e))?;
    export_face_with(face, destination, &ExportOptions::default()).map(|exported| exported.path)
}

/// Export one face into an existing directory
pub fn export_face_with(face: &Face<'_>, destination: &Path, options: &ExportOptions) -> Result<ExportedFace> {
    let mesh = face.triangulate(&options.quality)?;
    let path = destination.join(face_file_name(face.index()));
    write_stl(&mesh, &path, options.format)?;
    Ok(ExportedFace {
        index: face.index(),
        path,
        triangles: mesh.triangle_count(),
    })
}

/// Export all faces in parallel; the directory is created once up front
pub fn export_faces(faces: &[Face<'_>], destination: impl AsRef<Path>, options: &ExportOptions) -> Result<ExportSummary> {
    let destination = destination.as_ref();
    fs::create_dir_all(destination).map_err(|e| Error::io(destination, e))?;
    remove_face_files(destination)?;

    let results: Vec<std::result::Result<ExportedFace, (usize, Error)>> = faces
        .par_iter()
        .map(|face| export_face_with(face, destination, options).map_err(|e| (face.index(), e)))
        .collect();

    let mut summary = ExportSummary {
        directory: destination.to_path_buf(),
        ..ExportSummary::default()
    };
    for result in results {
        match result {
            Ok(exported) => summary.written.push(exported),
            Err((index, Error::Meshing(err))) => {
                warn!(face = index, "skipping face: {err}");
                summary.skipped.push(SkippedFace::from(err));
            }
            Err((_, err)) => return Err(err),
        }
    }

    info!(
        directory = %destination.display(),
        written = summary.written.len(),
        skipped = summary.skipped.len(),
        "faces exported"
    );
    Ok(summary)
}

/// Delete face files left by an earlier export so skipped faces leave no file behind
fn remove_face_files(destination: &Path) -> Result<()> {
    let entries = fs::read_dir(destination).map_err(|e| Error::io(destination, e))?;
    let mut removed = 0usize;
    for entry in entries {
        let path = entry.map_err(|e| Error::io(destination, e))?.path();
        let is_stl = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("stl"));
        if !is_stl || face_index_from_path(&path).is_none() || !path.is_file() {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io(&path, e)),
        }
    }
    if removed > 0 {
        debug!(directory = %destination.display(), removed, "removed face files from an earlier export");
    }
    Ok(())
}

pub fn write_stl(mesh: &Mesh, path: &Path, format: StlFormat) -> Result<()> {
    let file = File::create(path).map_err(|e| Error::io(path, e))?;
    let mut writer = BufWriter::new(file);
    match format {
        StlFormat::Binary => write_binary(mesh, &mut writer),
        StlFormat::Ascii => write_ascii(mesh, &mut writer),
    }
    .and_then(|_| writer.flush())
    .map_err(|e| Error::io(path, e))
}

fn facet_normal(mesh: &Mesh, triangle: &Triangle) -> Vector3<f64> {
    let [a, b, c] = triangle.indices.map(|i| mesh.vertices[i].position);
    (b - a).cross(&(c - a)).try_normalize(f64::MIN_POSITIVE).unwrap_or_else(Vector3::zeros)
}

fn to_f32(v: &Vector3<f64>) -> [f32; 3] {
    [v.x as f32, v.y as f32, v.z as f32]
}

fn write_binary<W: Write>(mesh: &Mesh, writer: &mut W) -> std::io::Result<()> {
    use stl_io::{Normal, Triangle as StlTriangle, Vertex as StlVertex};

    let triangles: Vec<StlTriangle> = mesh
        .triangles
        .iter()
        .map(|tri| StlTriangle {
            normal: Normal::new(to_f32(&facet_normal(mesh, tri))),
            vertices: tri
                .indices
                .map(|i| StlVertex::new(to_f32(&mesh.vertices[i].position.coords))),
        })
        .collect();
    stl_io::write_stl(writer, triangles.iter())
}

fn write_ascii<W: Write>(mesh: &Mesh, writer: &mut W) -> std::io::Result<()> {
    writeln!(writer, "solid face")?;
    for tri in &mesh.triangles {
        let n = facet_normal(mesh, tri);
        writeln!(writer, "  facet normal {:e} {:e} {:e}", n.x, n.y, n.z)?;
        writeln!(writer, "    outer loop")?;
        for &i in &tri.indices {
            let p = mesh.vertices[i].position;
            writeln!(writer, "      vertex {:e} {:e} {:e}", p.x, p.y, p.z)?;
        }
        writeln!(writer, "    endloop")?;
        writeln!(writer, "  endfacet")?;
    }
    writeln!(writer, "endsolid face")
}

/// Load an STL file (binary or ASCII) back into a mesh
pub fn read_stl_mesh(path: impl AsRef<Path>) -> Result<Mesh> {
    let path = path.as_ref();
    let mut file = File::open(path).map_err(|e| Error::io(path, e))?;
    let stl = stl_io::read_stl(&mut file).map_err(|e| Error::io(path, e))?;

    let mut mesh = Mesh::with_capacity(stl.vertices.len(), stl.faces.len());
    for v in &stl.vertices {
        mesh.add_vertex(Vertex::new(
            Point3::new(v[0] as f64, v[1] as f64, v[2] as f64),
            Vector3::zeros(),
        ));
    }
    for face in &stl.faces {
        mesh.add_triangle(Triangle::new(face.vertices));
    }
    mesh.recompute_normals();
    Ok(mesh)
}

impl From<MeshingError> for SkippedFace {
    fn from(err: MeshingError) -> Self {
        Self {
            index: err.face(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{enumerate_faces, Primitive};
    use approx::assert_relative_eq;
    use tempfile::TempDir;

    #[test]
    fn test_file_name_round_trip() {
        assert_eq!(face_file_name(7), "face_0007.stl");
        assert_eq!(face_index_from_path("out/face_0007.stl"), Some(7));
        assert_eq!(face_index_from_path("face_12345.stl"), Some(12345));
        assert_eq!(face_index_from_path("face_.stl"), None);
        assert_eq!(face_index_from_path("other_0007.stl"), None);
    }

    #[test]
    fn test_export_creates_directory() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let model = Primitive::cube(10.0).to_model();
        let faces = enumerate_faces(&model)?;
        let target = dir.path().join("nested").join("faces");

        let path = export_face(&faces[2], &target)?;
        assert_eq!(path, target.join("face_0002.stl"));

        let mesh = read_stl_mesh(&path)?;
        assert_eq!(mesh.triangle_count(), 2);
        assert_relative_eq!(mesh.surface_area(), 100.0, epsilon = 1e-4);
        Ok(())
    }

    #[test]
    fn test_ascii_export() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let model = Primitive::cube(1.0).to_model();
        let faces = enumerate_faces(&model)?;
        let options = ExportOptions {
            format: StlFormat::Ascii,
            ..ExportOptions::default()
        };
        let exported = export_face_with(&faces[0], dir.path(), &options)?;
        let text = fs::read_to_string(&exported.path)?;
        assert!(text.starts_with("solid face"));
        assert_eq!(text.matches("facet normal").count(), exported.triangles);
        Ok(())
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("ASCII".parse::<StlFormat>().unwrap(), StlFormat::Ascii);
        assert_eq!("binary".parse::<StlFormat>().unwrap(), StlFormat::Binary);
        assert!("obj".parse::<StlFormat>().is_err());
    }
}
