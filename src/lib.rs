//! # hue_lights_rs
//!
//! An async Rust library for discovering and controlling Philips Hue bridges
//! over the local network.
//!
//! The crate talks to the bridge's REST API through a narrow [`Transport`]
//! and keeps a cache of lights and groups that is filled by one full sync
//! after authentication and refreshed on demand.
//!
//! ## Quick Start
//!
//! ```ignore
//! use hue_lights_rs::{DiscoveryConfig, LightControl, discover_bridges};
//!
//! async fn control_lights() -> Result<(), hue_lights_rs::Error> {
//!     let report = discover_bridges(&DiscoveryConfig::default()).await?;
//!     let bridge = report.bridges.into_iter().next().expect("no bridge found");
//!
//!     // Press the link button on the bridge within 30 seconds.
//!     if bridge.authenticate(true).await? {
//!         println!("username: {:?}", bridge.username());
//!         let office = bridge.group(1).await?.expect("no group 1");
//!         office
//!             .transaction(Some(10), || async {
//!                 office.set_on(true).await?;
//!                 office.set_brightness(200).await?;
//!                 office.set_color_temperature(366).await
//!             })
//!             .await?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Discovery**: Find bridges with SSDP using [`discover_bridges`] or a [`BridgeLocator`]
//! - **Authentication**: Reuse a known username or wait for the link button with [`Bridge::authenticate`]
//! - **Lights and Groups**: Read cached state of a [`Light`], change it through [`LightControl`]
//! - **Transactions**: Batch several changes on one object into a single request
//! - **Virtual Groups**: Combine lights and groups from any bridge into a [`VirtualGroup`]
//! - **Auto Sync**: Refresh a light's state on read once it is older than an interval
//!
//! ## Errors
//!
//! Every fallible operation returns [`Error`]. Out-of-range values are
//! rejected before anything is sent; bridge and network failures share the
//! [`Error::Comm`] variant.

mod bridge;
mod config;
mod control;
mod discovery;
mod errors;
mod group;
mod light;
mod payload;
mod response;
pub mod runtime;
mod session;
pub mod ssdp;
mod status;
mod transaction;
mod transport;
mod types;
mod virtual_group;

#[cfg(test)]
mod testing;

// Re-export public API
pub use bridge::Bridge;
pub use config::ConfigRecord;
pub use control::{LightControl, LightHandle};
pub use discovery::{
    BridgeLocator, CandidateError, DescriptionSource, DiscoveryConfig, DiscoveryReport,
    HttpDescriptionSource, discover_bridges,
};
pub use errors::Error;
pub use group::Group;
pub use light::Light;
pub use payload::StatePayload;
pub use session::{AuthState, SessionConfig, validate_username};
pub use status::LightState;
pub use transaction::ContextId;
pub use transport::{HttpTransport, JsonObject, Method, Transport, TransportConfig};
pub use types::{Alert, Brightness, CieXy, ColorMode, ColorTemperature, Effect, Hue, Saturation};
pub use virtual_group::VirtualGroup;
