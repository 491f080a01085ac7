//! CIE 1931 chromaticity coordinates.

use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// A point in the CIE xy color space; both coordinates are in `0.0..=1.0`.
///
/// Serialized as the two-element array the bridge uses, `[x, y]`.
#[derive(Default, Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct CieXy {
    pub(crate) x: f64,
    pub(crate) y: f64,
}

impl CieXy {
    const MIN: f64 = 0.0;
    const MAX: f64 = 1.0;

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    /// Create a new coordinate pair.
    ///
    /// Returns `None` if either coordinate is outside `0.0..=1.0` or not a number.
    ///
    /// # Examples
    ///
    /// ```
    /// use hue_lights_rs::CieXy;
    ///
    /// assert!(CieXy::create(0.3, 0.3).is_some());
    /// assert!(CieXy::create(-0.1, 0.3).is_none());
    /// assert!(CieXy::create(0.3, 1.1).is_none());
    /// ```
    pub fn create(x: f64, y: f64) -> Option<Self> {
        if Self::is_valid(x) && Self::is_valid(y) {
            Some(CieXy { x, y })
        } else {
            None
        }
    }

    /// Like [`CieXy::create`], reporting which coordinate was rejected.
    pub fn try_new(x: f64, y: f64) -> Result<Self, Error> {
        if !Self::is_valid(x) {
            return Err(Error::validation("cie x", format!("{x} is outside 0.0..=1.0")));
        }
        if !Self::is_valid(y) {
            return Err(Error::validation("cie y", format!("{y} is outside 0.0..=1.0")));
        }
        Ok(CieXy { x, y })
    }

    fn is_valid(value: f64) -> bool {
        (Self::MIN..=Self::MAX).contains(&value)
    }
}

/// Coordinates outside `0.0..=1.0` are pulled to the nearest bound.
impl From<[f64; 2]> for CieXy {
    fn from([x, y]: [f64; 2]) -> Self {
        CieXy {
            x: x.clamp(Self::MIN, Self::MAX),
            y: y.clamp(Self::MIN, Self::MAX),
        }
    }
}

impl From<CieXy> for [f64; 2] {
    fn from(xy: CieXy) -> Self {
        [xy.x, xy.y]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reported_coordinates_are_clamped() {
        let xy: CieXy = serde_json::from_value(serde_json::json!([1.2, -0.1])).unwrap();
        assert_eq!(xy, CieXy { x: 1.0, y: 0.0 });
        assert_eq!(CieXy::from([0.4573, 0.41]), CieXy { x: 0.4573, y: 0.41 });
    }
}
