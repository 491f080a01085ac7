//! Color temperature control.

use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// Color temperature in mired, with valid values from 153 to 500.
///
/// Mired is the reciprocal of Kelvin scaled by one million, so lower values
/// are cooler. 153 mired is roughly 6500K and 500 mired roughly 2000K.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(transparent)]
pub struct ColorTemperature {
    pub(crate) mired: u16,
}

impl ColorTemperature {
    const MIN: i32 = 153;
    const MAX: i32 = 500;

    /// Get the mired value.
    pub fn mired(&self) -> u16 {
        self.mired
    }

    /// Approximate value in Kelvin.
    ///
    /// ```
    /// use hue_lights_rs::ColorTemperature;
    ///
    /// assert_eq!(ColorTemperature::create(500).unwrap().kelvin(), 2000);
    /// ```
    pub fn kelvin(&self) -> u32 {
        1_000_000 / u32::from(self.mired)
    }

    /// Create a new color temperature with the given mired value.
    ///
    /// Returns `None` if value is outside the valid range (153-500).
    ///
    /// # Examples
    ///
    /// ```
    /// use hue_lights_rs::ColorTemperature;
    ///
    /// assert!(ColorTemperature::create(152).is_none());
    /// assert!(ColorTemperature::create(153).is_some());
    /// assert!(ColorTemperature::create(500).is_some());
    /// assert!(ColorTemperature::create(501).is_none());
    /// ```
    pub fn create(mired: i32) -> Option<Self> {
        if (Self::MIN..=Self::MAX).contains(&mired) {
            Some(ColorTemperature {
                mired: mired as u16,
            })
        } else {
            None
        }
    }
}

impl ColorTemperature {
    /// Pull a reported value into the valid range.
    pub(crate) fn clamped(mired: u16) -> Self {
        ColorTemperature {
            mired: mired.clamp(Self::MIN as u16, Self::MAX as u16),
        }
    }
}

impl Default for ColorTemperature {
    fn default() -> Self {
        ColorTemperature {
            mired: Self::MIN as u16,
        }
    }
}

impl TryFrom<i32> for ColorTemperature {
    type Error = Error;

    fn try_from(mired: i32) -> Result<Self, Self::Error> {
        Self::create(mired).ok_or_else(|| {
            Error::validation(
                "color temperature",
                format!("{mired} is outside {}..={} mired", Self::MIN, Self::MAX),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamped() {
        assert_eq!(ColorTemperature::clamped(0).mired(), 153);
        assert_eq!(ColorTemperature::clamped(366).mired(), 366);
        assert_eq!(ColorTemperature::clamped(520).mired(), 500);
    }
}
