//! Color modes, effects and alerts.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

/// Which color triplet of a light is authoritative.
///
/// Decoded case-insensitively from the bridge's `colormode` string.
///
/// ```
/// use std::str::FromStr;
/// use hue_lights_rs::ColorMode;
///
/// assert_eq!(ColorMode::from_str("CT").unwrap(), ColorMode::Ct);
/// assert!(ColorMode::from_str("rgb").is_err());
/// ```
#[derive(
    Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ColorMode {
    /// Hue and saturation
    Hs,
    /// Color temperature
    Ct,
    /// CIE xy coordinates
    Xy,
}

/// Dynamic effect running on a light.
#[derive(
    Default, Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, EnumString, EnumIter, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Effect {
    #[default]
    None,
    /// Cycle through all hues with the current brightness and saturation.
    ColorLoop,
}

/// One-shot alert. Write-only: the bridge never reports it back.
#[derive(
    Default, Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, EnumString, EnumIter, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Alert {
    #[default]
    None,
    /// A single breathe cycle.
    Select,
    /// Breathe cycles for 15 seconds.
    LSelect,
}
