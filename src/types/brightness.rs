//! Brightness control for Hue lights.

use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// Brightness level from 0 to 255.
///
/// On a Hue bridge `0` is the dimmest level the lamp can produce, not "off".
#[derive(Default, Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(transparent)]
pub struct Brightness {
    pub(crate) value: u8,
}

impl Brightness {
    const MIN: i32 = 0;
    const MAX: i32 = 255;

    pub fn value(&self) -> u8 {
        self.value
    }

    /// Returns None if value is outside the valid range (0-255).
    ///
    /// # Examples
    ///
    /// ```
    /// use hue_lights_rs::Brightness;
    ///
    /// assert!(Brightness::create(-1).is_none());
    /// assert_eq!(Brightness::create(0).unwrap().value(), 0);
    /// assert_eq!(Brightness::create(255).unwrap().value(), 255);
    /// assert!(Brightness::create(256).is_none());
    /// ```
    pub fn create(value: i32) -> Option<Self> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Some(Brightness { value: value as u8 })
        } else {
            None
        }
    }
}

impl TryFrom<i32> for Brightness {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::create(value).ok_or_else(|| {
            Error::validation(
                "brightness",
                format!("{value} is outside {}..={}", Self::MIN, Self::MAX),
            )
        })
    }
}
