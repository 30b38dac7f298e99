// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Volume units and deviation reporting

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Output unit for a volume. Native model volumes are always mm³.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeUnit {
    Mm3,
    Cm3,
    M3,
}

impl VolumeUnit {
    pub const ALL: [VolumeUnit; 3] = [VolumeUnit::Mm3, VolumeUnit::Cm3, VolumeUnit::M3];

    /// Multiplier applied to a mm³ value
    pub fn factor(self) -> f64 {
        match self {
            Self::Mm3 => 1.0,
            Self::Cm3 => 1e-3,
            Self::M3 => 1e-9,
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            Self::Mm3 => "mm3",
            Self::Cm3 => "cm3",
            Self::M3 => "m3",
        }
    }
}

impl Default for VolumeUnit {
    fn default() -> Self {
        Self::Cm3
    }
}

impl fmt::Display for VolumeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for VolumeUnit {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mm3" => Ok(Self::Mm3),
            "cm3" => Ok(Self::Cm3),
            "m3" => Ok(Self::M3),
            _ => Err(ConfigError::UnknownUnit(s.to_string())),
        }
    }
}

/// Convert a raw mm³ volume into `unit`
pub fn convert(raw_volume_mm3: f64, unit: VolumeUnit) -> f64 {
    raw_volume_mm3 * unit.factor()
}

/// Convert a volume expressed in `from` into `to`
pub fn convert_between(value: f64, from: VolumeUnit, to: VolumeUnit) -> f64 {
    value / from.factor() * to.factor()
}

/// Parse a unit token and convert in one step
pub fn convert_token(raw_volume_mm3: f64, unit: &str) -> Result<f64, ConfigError> {
    Ok(convert(raw_volume_mm3, unit.parse()?))
}

/// Percentage deviation of a voxel estimate from the exact volume.
///
/// `None` when the exact volume is zero, which reports render as `N/A`.
pub fn deviation_percent(voxel: f64, exact: f64) -> Option<f64> {
    if exact == 0.0 {
        return None;
    }
    Some((voxel - exact).abs() / exact.abs() * 100.0)
}

/// Format an optional deviation the way result lines print it
pub fn format_deviation(deviation: Option<f64>) -> String {
    match deviation {
        Some(value) => format!("{value:.2}%"),
        None => "N/A".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_convert_factors() {
        assert_eq!(convert(1000.0, VolumeUnit::Mm3), 1000.0);
        assert_relative_eq!(convert(1000.0, VolumeUnit::Cm3), 1.0);
        assert_relative_eq!(convert(1e9, VolumeUnit::M3), 1.0);
    }

    #[test]
    fn test_round_trip() {
        for value in [0.0, 1.0, 1234.5678, 9.87e7] {
            let cm3 = convert_between(value, VolumeUnit::Mm3, VolumeUnit::Cm3);
            let back = convert_between(cm3, VolumeUnit::Cm3, VolumeUnit::Mm3);
            assert_relative_eq!(back, value, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_unknown_unit() {
        let err = "in3".parse::<VolumeUnit>().unwrap_err();
        assert_eq!(err, ConfigError::UnknownUnit("in3".to_string()));
        assert!(convert_token(1.0, "litre").is_err());
        assert_eq!(" CM3 ".parse::<VolumeUnit>().unwrap(), VolumeUnit::Cm3);
    }

    #[test]
    fn test_deviation() {
        assert_relative_eq!(deviation_percent(1020.0, 1000.0).unwrap(), 2.0);
        assert_relative_eq!(deviation_percent(980.0, 1000.0).unwrap(), 2.0);
        assert_eq!(deviation_percent(5.0, 0.0), None);
        assert_eq!(format_deviation(None), "N/A");
        assert_eq!(format_deviation(Some(1.234)), "1.23%");
    }
}
