/// Geographic coordinate type for soil and weather pixels.
/// Pixel references arrive as text such as `"(-20.25, 30.75)"` and are parsed
/// once, at table load time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A pixel location in geographic coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    /// Latitude in degrees, -90 to +90.
    pub lat: f64,
    /// Longitude in degrees, -180 to +180.
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Fixed-width `LLLL.LL_LLLL.LL` stem shared by soil and weather file names.
    /// Zero padding is sign-aware, so `-20.25` renders as `-020.25`.
    pub fn file_stem(&self) -> String {
        format!("{:07.2}_{:07.2}", self.lat, self.lon)
    }
}

impl fmt::Display for LatLon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.lat, self.lon)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseLatLonError {
    #[error("expected two comma-separated numbers, got {0:?}")]
    Shape(String),
    #[error("invalid coordinate component {0:?}")]
    Component(String),
    #[error("coordinate out of range in {0:?}")]
    OutOfRange(String),
}

/// Accepts `(lat, lon)`, `[lat, lon]` or a bare `lat, lon` pair.
impl FromStr for LatLon {
    type Err = ParseLatLonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let inner = trimmed
            .strip_prefix('(')
            .and_then(|t| t.strip_suffix(')'))
            .or_else(|| trimmed.strip_prefix('[').and_then(|t| t.strip_suffix(']')))
            .unwrap_or(trimmed);

        let parts: Vec<&str> = inner.split(',').map(str::trim).collect();
        let [lat, lon] = parts.as_slice() else {
            return Err(ParseLatLonError::Shape(s.to_string()));
        };

        let parse = |part: &str| -> Result<f64, ParseLatLonError> {
            part.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| ParseLatLonError::Component(part.to_string()))
        };
        let (lat, lon) = (parse(*lat)?, parse(*lon)?);

        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(ParseLatLonError::OutOfRange(s.to_string()));
        }
        Ok(Self { lat, lon })
    }
}
