// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Bounding box utilities

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box in millimetres
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
}

impl BoundingBox {
    pub fn new(min: Point3<f64>, max: Point3<f64>) -> Self {
        Self { min, max }
    }

    pub fn empty() -> Self {
        Self {
            min: Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
            max: Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point3<f64>>) -> Self {
        let mut bbox = Self::empty();
        for point in points {
            bbox.expand_to_include(point);
        }
        bbox
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn expand_to_include(&mut self, point: &Point3<f64>) {
        self.min.x = self.min.x.min(point.x);
        self.min.y = self.min.y.min(point.y);
        self.min.z = self.min.z.min(point.z);

        self.max.x = self.max.x.max(point.x);
        self.max.y = self.max.y.max(point.y);
        self.max.z = self.max.z.max(point.z);
    }

    /// Grow by `margin` on every side
    pub fn padded(&self, margin: f64) -> BoundingBox {
        let pad = Vector3::new(margin, margin, margin);
        BoundingBox::new(self.min - pad, self.max + pad)
    }

    pub fn center(&self) -> Point3<f64> {
        nalgebra::center(&self.min, &self.max)
    }

    pub fn size(&self) -> Vector3<f64> {
        if self.is_empty() {
            return Vector3::zeros();
        }
        self.max - self.min
    }

    pub fn min_extent(&self) -> f64 {
        self.size().min()
    }

    pub fn diagonal(&self) -> f64 {
        self.size().norm()
    }

    pub fn volume(&self) -> f64 {
        let size = self.size();
        size.x * size.y * size.z
    }

    pub fn contains(&self, point: &Point3<f64>, margin: f64) -> bool {
        point.x >= self.min.x - margin
            && point.y >= self.min.y - margin
            && point.z >= self.min.z - margin
            && point.x <= self.max.x + margin
            && point.y <= self.max.y + margin
            && point.z <= self.max.z + margin
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounding_box() {
        let mut bbox = BoundingBox::empty();
        assert!(bbox.is_empty());
        assert_eq!(bbox.volume(), 0.0);

        bbox.expand_to_include(&Point3::new(1.0, 2.0, 3.0));
        bbox.expand_to_include(&Point3::new(-1.0, -2.0, -3.0));

        assert_eq!(bbox.min, Point3::new(-1.0, -2.0, -3.0));
        assert_eq!(bbox.max, Point3::new(1.0, 2.0, 3.0));
        assert_eq!(bbox.center(), Point3::new(0.0, 0.0, 0.0));
        assert_eq!(bbox.volume(), 48.0);
        assert_eq!(bbox.min_extent(), 2.0);
    }

    #[test]
    fn test_padded_and_contains() {
        let bbox = BoundingBox::new(Point3::origin(), Point3::new(10.0, 10.0, 4.0));
        let padded = bbox.padded(0.5);
        assert_eq!(padded.min, Point3::new(-0.5, -0.5, -0.5));
        assert_eq!(padded.max, Point3::new(10.5, 10.5, 4.5));
        assert!(bbox.contains(&Point3::new(10.01, 5.0, 2.0), 0.05));
        assert!(!bbox.contains(&Point3::new(10.1, 5.0, 2.0), 0.05));
    }
}
