//! State change payload for Hue lights and groups.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Error;
use crate::types::{Alert, Brightness, CieXy, ColorMode, ColorTemperature, Effect, Hue, Saturation};

/// A set of state changes to send to a light's `state` or a group's `action` endpoint.
///
/// Only the fields that were set are serialized, so a payload built from a
/// single attribute produces a single-field request body.
///
/// # Creating Payloads
///
/// 1. **From a single attribute** using the [`From`] trait:
///    ```
///    use hue_lights_rs::{Effect, StatePayload};
///    let payload = StatePayload::from(&Effect::ColorLoop);
///    assert!(payload.has_state());
///    ```
///
/// 2. **Builder pattern** for combining multiple attributes:
///    ```
///    use hue_lights_rs::{Brightness, Hue, StatePayload};
///    let mut payload = StatePayload::new();
///    payload.on(true);
///    payload.brightness(&Brightness::create(200).unwrap());
///    payload.hue(&Hue::BLUE);
///    assert_eq!(
///        payload.to_json().unwrap(),
///        serde_json::json!({"on": true, "bri": 200, "hue": 46920})
///    );
///    ```
#[serde_with::skip_serializing_none]
#[derive(Default, Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StatePayload {
    pub(crate) on: Option<bool>,
    #[serde(rename = "bri")]
    pub(crate) brightness: Option<u8>,
    pub(crate) hue: Option<u16>,
    #[serde(rename = "sat")]
    pub(crate) saturation: Option<u8>,
    pub(crate) xy: Option<CieXy>,
    #[serde(rename = "ct")]
    pub(crate) color_temperature: Option<u16>,
    pub(crate) effect: Option<Effect>,
    pub(crate) alert: Option<Alert>,
    #[serde(rename = "transitiontime")]
    pub(crate) transition_time: Option<u16>,
}

impl StatePayload {
    /// Create a new empty payload.
    ///
    /// ```
    /// use hue_lights_rs::StatePayload;
    ///
    /// assert!(!StatePayload::new().has_state());
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// True if at least one state attribute is set.
    ///
    /// A transition time on its own does not count.
    pub fn has_state(&self) -> bool {
        self.on.is_some()
            || self.brightness.is_some()
            || self.hue.is_some()
            || self.saturation.is_some()
            || self.xy.is_some()
            || self.color_temperature.is_some()
            || self.effect.is_some()
            || self.alert.is_some()
    }

    pub fn on(&mut self, on: bool) {
        self.on = Some(on);
    }

    pub fn brightness(&mut self, brightness: &Brightness) {
        self.brightness = Some(brightness.value);
    }

    pub fn hue(&mut self, hue: &Hue) {
        self.hue = Some(hue.value);
    }

    pub fn saturation(&mut self, saturation: &Saturation) {
        self.saturation = Some(saturation.value);
    }

    pub fn cie_xy(&mut self, xy: &CieXy) {
        self.xy = Some(*xy);
    }

    pub fn color_temperature(&mut self, ct: &ColorTemperature) {
        self.color_temperature = Some(ct.mired);
    }

    pub fn effect(&mut self, effect: &Effect) {
        self.effect = Some(*effect);
    }

    pub fn alert(&mut self, alert: &Alert) {
        self.alert = Some(*alert);
    }

    /// Set the transition time in multiples of 100ms.
    pub fn transition_time(&mut self, deciseconds: u16) {
        self.transition_time = Some(deciseconds);
    }

    /// Copy every attribute set on `other` into this payload, overriding existing values.
    pub fn merge(&mut self, other: &StatePayload) {
        self.on = other.on.or(self.on);
        self.brightness = other.brightness.or(self.brightness);
        self.hue = other.hue.or(self.hue);
        self.saturation = other.saturation.or(self.saturation);
        self.xy = other.xy.or(self.xy);
        self.color_temperature = other.color_temperature.or(self.color_temperature);
        self.effect = other.effect.or(self.effect);
        self.alert = other.alert.or(self.alert);
        self.transition_time = other.transition_time.or(self.transition_time);
    }

    /// The color mode the bridge switches to once this payload is applied.
    ///
    /// The bridge gives xy precedence over ct, and ct over hue/saturation.
    pub fn color_mode(&self) -> Option<ColorMode> {
        if self.xy.is_some() {
            Some(ColorMode::Xy)
        } else if self.color_temperature.is_some() {
            Some(ColorMode::Ct)
        } else if self.hue.is_some() || self.saturation.is_some() {
            Some(ColorMode::Hs)
        } else {
            None
        }
    }

    /// Serialize to the JSON body sent to the bridge.
    pub fn to_json(&self) -> Result<Value, Error> {
        serde_json::to_value(self).map_err(|e| Error::transport("failed to dump state payload", e))
    }
}

impl From<&Brightness> for StatePayload {
    fn from(value: &Brightness) -> Self {
        let mut payload = StatePayload::new();
        payload.brightness(value);
        payload
    }
}

impl From<&Hue> for StatePayload {
    fn from(value: &Hue) -> Self {
        let mut payload = StatePayload::new();
        payload.hue(value);
        payload
    }
}

impl From<&Saturation> for StatePayload {
    fn from(value: &Saturation) -> Self {
        let mut payload = StatePayload::new();
        payload.saturation(value);
        payload
    }
}

impl From<&CieXy> for StatePayload {
    fn from(value: &CieXy) -> Self {
        let mut payload = StatePayload::new();
        payload.cie_xy(value);
        payload
    }
}

impl From<&ColorTemperature> for StatePayload {
    fn from(value: &ColorTemperature) -> Self {
        let mut payload = StatePayload::new();
        payload.color_temperature(value);
        payload
    }
}

impl From<&Effect> for StatePayload {
    fn from(value: &Effect) -> Self {
        let mut payload = StatePayload::new();
        payload.effect(value);
        payload
    }
}

impl From<&Alert> for StatePayload {
    fn from(value: &Alert) -> Self {
        let mut payload = StatePayload::new();
        payload.alert(value);
        payload
    }
}
