//! Cached light state.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::LightStateRecord;
use crate::errors::Error;
use crate::payload::StatePayload;
use crate::types::{Brightness, CieXy, ColorMode, ColorTemperature, Effect, Hue, Saturation};

/// The last known state of a light.
///
/// Filled in from the bridge on every sync and patched locally after each
/// confirmed write. Alerts are never reported by the bridge so they are not
/// part of the snapshot.
#[serde_with::skip_serializing_none]
#[derive(Default, Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LightState {
    on: bool,
    brightness: Option<Brightness>,
    hue: Option<Hue>,
    saturation: Option<Saturation>,
    xy: Option<CieXy>,
    color_temperature: Option<ColorTemperature>,
    color_mode: Option<ColorMode>,
    effect: Option<Effect>,
    reachable: Option<bool>,
}

impl LightState {
    pub fn on(&self) -> bool {
        self.on
    }

    pub fn brightness(&self) -> Option<Brightness> {
        self.brightness
    }

    pub fn hue(&self) -> Option<Hue> {
        self.hue
    }

    pub fn saturation(&self) -> Option<Saturation> {
        self.saturation
    }

    pub fn cie_xy(&self) -> Option<CieXy> {
        self.xy
    }

    pub fn color_temperature(&self) -> Option<ColorTemperature> {
        self.color_temperature
    }

    /// Which of the color attributes is currently authoritative.
    pub fn color_mode(&self) -> Option<ColorMode> {
        self.color_mode
    }

    pub fn effect(&self) -> Option<Effect> {
        self.effect
    }

    pub fn reachable(&self) -> Option<bool> {
        self.reachable
    }

    /// Apply a payload the bridge has confirmed.
    pub(crate) fn apply(&mut self, payload: &StatePayload) {
        if let Some(on) = payload.on {
            self.on = on;
        }
        if let Some(value) = payload.brightness {
            self.brightness = Some(Brightness { value });
        }
        if let Some(value) = payload.hue {
            self.hue = Some(Hue { value });
        }
        if let Some(value) = payload.saturation {
            self.saturation = Some(Saturation { value });
        }
        if let Some(xy) = payload.xy {
            self.xy = Some(xy);
        }
        if let Some(mired) = payload.color_temperature {
            self.color_temperature = Some(ColorTemperature { mired });
        }
        if let Some(effect) = payload.effect {
            self.effect = Some(effect);
        }
        if let Some(mode) = payload.color_mode() {
            self.color_mode = Some(mode);
        }
    }
}

impl TryFrom<&LightStateRecord> for LightState {
    type Error = Error;

    fn try_from(record: &LightStateRecord) -> Result<Self, Self::Error> {
        let color_mode = record
            .color_mode
            .as_deref()
            .map(|mode| {
                ColorMode::from_str(mode)
                    .map_err(|e| Error::transport(format!("unknown color mode {mode:?}"), e))
            })
            .transpose()?;
        let effect = record
            .effect
            .as_deref()
            .map(|name| {
                Effect::from_str(name)
                    .map_err(|e| Error::transport(format!("unknown effect {name:?}"), e))
            })
            .transpose()?;

        Ok(LightState {
            on: record.on,
            brightness: record.bri.map(|value| Brightness { value }),
            hue: record.hue.map(|value| Hue { value }),
            saturation: record.sat.map(|value| Saturation { value }),
            xy: record.xy.map(CieXy::from),
            color_temperature: record.ct.map(ColorTemperature::clamped),
            color_mode,
            effect,
            reachable: record.reachable,
        })
    }
}
