// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Stable face enumeration

use super::brep::{FaceData, FaceId, Model, Surface};
use super::mesh::Mesh;
use super::tessellate::{triangulate_face, MeshQuality};
use crate::error::{MeshingError, ParseError};

/// Borrowed view of one face with its enumeration index
#[derive(Debug, Clone, Copy)]
pub struct Face<'m> {
    index: usize,
    id: FaceId,
    data: &'m FaceData,
    model: &'m Model,
}

impl<'m> Face<'m> {
    /// 0-based position in enumeration order
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn id(&self) -> FaceId {
        self.id
    }

    pub fn data(&self) -> &'m FaceData {
        self.data
    }

    pub fn model(&self) -> &'m Model {
        self.model
    }

    pub fn surface(&self) -> &'m Surface {
        &self.data.surface
    }

    pub fn step_id(&self) -> Option<u64> {
        self.data.step_id
    }

    /// File stem used for exported artifacts, e.g. `face_0007`
    pub fn file_stem(&self) -> String {
        format!("face_{:04}", self.index)
    }

    pub fn triangulate(&self, quality: &MeshQuality) -> Result<Mesh, MeshingError> {
        triangulate_face(self.model, self.data, self.index, quality)
    }
}

/// Enumerate faces in the model's stable order.
///
/// The order is fixed when the model is built, so index `n` refers to the
/// same patch on every call for the same model.
pub fn enumerate_faces(model: &Model) -> Result<Vec<Face<'_>>, ParseError> {
    let faces: Vec<Face<'_>> = model
        .face_ids()
        .iter()
        .filter_map(|&id| model.face(id).map(|data| (id, data)))
        .enumerate()
        .map(|(index, (id, data))| Face {
            index,
            id,
            data,
            model,
        })
        .collect();

    if faces.is_empty() {
        return Err(ParseError::NoFaces);
    }
    Ok(faces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Primitive;
    use nalgebra::Point3;

    #[test]
    fn test_enumeration_is_stable() {
        let model = Primitive::cuboid(Point3::origin(), Point3::new(10.0, 10.0, 10.0)).to_model();
        let first: Vec<(usize, FaceId)> = enumerate_faces(&model)
            .unwrap()
            .iter()
            .map(|f| (f.index(), f.id()))
            .collect();
        let second: Vec<(usize, FaceId)> = enumerate_faces(&model)
            .unwrap()
            .iter()
            .map(|f| (f.index(), f.id()))
            .collect();

        assert_eq!(first.len(), 6);
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_model_is_parse_error() {
        let model = Model::new();
        assert!(matches!(enumerate_faces(&model), Err(ParseError::NoFaces)));
    }

    #[test]
    fn test_file_stem() {
        let model = Primitive::cuboid(Point3::origin(), Point3::new(1.0, 1.0, 1.0)).to_model();
        let faces = enumerate_faces(&model).unwrap();
        assert_eq!(faces[3].file_stem(), "face_0003");
    }
}
