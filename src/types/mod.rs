//! Value types for light control parameters.

mod brightness;
mod cie;
mod color_temperature;
mod hue;
mod mode;
mod saturation;

pub use brightness::Brightness;
pub use cie::CieXy;
pub use color_temperature::ColorTemperature;
pub use hue::Hue;
pub use mode::{Alert, ColorMode, Effect};
pub use saturation::Saturation;
