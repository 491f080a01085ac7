//! Hue angle control.

use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// Position on the color wheel, from 0 to 65535.
///
/// Both ends of the range are red; the wheel wraps around.
#[derive(Default, Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(transparent)]
pub struct Hue {
    pub(crate) value: u16,
}

impl Hue {
    const MIN: i32 = 0;
    const MAX: i32 = 65535;

    pub const RED: Hue = Hue { value: 0 };
    pub const RED_2: Hue = Hue { value: 65535 };
    pub const GREEN: Hue = Hue { value: 25500 };
    pub const BLUE: Hue = Hue { value: 46920 };

    pub fn value(&self) -> u16 {
        self.value
    }

    /// Create a new Hue with the given value.
    ///
    /// Returns `None` if value is outside the valid range (0-65535).
    ///
    /// # Examples
    ///
    /// ```
    /// use hue_lights_rs::Hue;
    ///
    /// assert!(Hue::create(-1).is_none());
    /// assert_eq!(Hue::create(46920), Some(Hue::BLUE));
    /// assert!(Hue::create(65536).is_none());
    /// ```
    pub fn create(value: i32) -> Option<Self> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Some(Hue {
                value: value as u16,
            })
        } else {
            None
        }
    }
}

impl TryFrom<i32> for Hue {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::create(value).ok_or_else(|| {
            Error::validation("hue", format!("{value} is outside {}..={}", Self::MIN, Self::MAX))
        })
    }
}
