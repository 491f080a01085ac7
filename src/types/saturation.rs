//! Color saturation control.

use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// Saturation from 0 (white) to 255 (fully colored).
#[derive(Default, Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(transparent)]
pub struct Saturation {
    pub(crate) value: u8,
}

impl Saturation {
    const MIN: i32 = 0;
    const MAX: i32 = 255;

    pub fn value(&self) -> u8 {
        self.value
    }

    /// Returns None if value is outside the valid range (0-255).
    ///
    /// ```
    /// use hue_lights_rs::Saturation;
    ///
    /// assert!(Saturation::create(256).is_none());
    /// assert_eq!(Saturation::create(254).unwrap().value(), 254);
    /// ```
    pub fn create(value: i32) -> Option<Self> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Some(Saturation { value: value as u8 })
        } else {
            None
        }
    }
}

impl TryFrom<i32> for Saturation {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::create(value).ok_or_else(|| {
            Error::validation(
                "saturation",
                format!("{value} is outside {}..={}", Self::MIN, Self::MAX),
            )
        })
    }
}
