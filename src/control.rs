//! The setter surface shared by lights, groups and virtual groups.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::errors::Error;
use crate::group::Group;
use crate::light::Light;
use crate::payload::StatePayload;
use crate::runtime::BoxFuture;
use crate::types::{Alert, Brightness, CieXy, ColorTemperature, Effect, Hue, Saturation};
use crate::virtual_group::VirtualGroup;

type Result<T> = std::result::Result<T, Error>;

/// Anything whose light state can be changed.
///
/// Every setter validates its input before anything is sent. Inside a
/// transaction on the receiving object the change is staged instead of sent.
pub trait LightControl: fmt::Display + Send + Sync {
    fn id(&self) -> u32;

    /// Transition time in multiples of 100ms sent along with every change.
    fn transition_time(&self) -> Option<u16>;

    fn set_transition_time(&self, deciseconds: Option<u16>);

    /// Apply an already validated payload.
    fn set_state(&self, payload: StatePayload) -> BoxFuture<'_, Result<()>>;

    fn set_on(&self, on: bool) -> impl Future<Output = Result<()>> + Send {
        let mut payload = StatePayload::new();
        payload.on(on);
        self.set_state(payload)
    }

    fn set_brightness(&self, value: i32) -> impl Future<Output = Result<()>> + Send {
        let payload = Brightness::try_from(value).map(|v| StatePayload::from(&v));
        async move { self.set_state(payload?).await }
    }

    fn set_hue(&self, value: i32) -> impl Future<Output = Result<()>> + Send {
        let payload = Hue::try_from(value).map(|v| StatePayload::from(&v));
        async move { self.set_state(payload?).await }
    }

    fn set_saturation(&self, value: i32) -> impl Future<Output = Result<()>> + Send {
        let payload = Saturation::try_from(value).map(|v| StatePayload::from(&v));
        async move { self.set_state(payload?).await }
    }

    fn set_cie_xy(&self, x: f64, y: f64) -> impl Future<Output = Result<()>> + Send {
        let payload = CieXy::try_new(x, y).map(|v| StatePayload::from(&v));
        async move { self.set_state(payload?).await }
    }

    /// Color temperature in mired (153-500).
    fn set_color_temperature(&self, mired: i32) -> impl Future<Output = Result<()>> + Send {
        let payload = ColorTemperature::try_from(mired).map(|v| StatePayload::from(&v));
        async move { self.set_state(payload?).await }
    }

    fn set_effect(&self, effect: Effect) -> impl Future<Output = Result<()>> + Send {
        self.set_state(StatePayload::from(&effect))
    }

    fn set_alert(&self, alert: Alert) -> impl Future<Output = Result<()>> + Send {
        self.set_state(StatePayload::from(&alert))
    }
}

/// A shared reference to any light-capable object.
#[derive(Debug, Clone)]
pub enum LightHandle {
    Light(Arc<Light>),
    Group(Arc<Group>),
    Virtual(Arc<VirtualGroup>),
}

impl LightHandle {
    /// True if both handles point at the same object.
    pub fn ptr_eq(&self, other: &LightHandle) -> bool {
        self.address() == other.address()
    }

    /// Opaque identity of the referenced object.
    pub(crate) fn address(&self) -> usize {
        match self {
            LightHandle::Light(l) => Arc::as_ptr(l) as *const () as usize,
            LightHandle::Group(g) => Arc::as_ptr(g) as *const () as usize,
            LightHandle::Virtual(v) => Arc::as_ptr(v) as *const () as usize,
        }
    }

    /// Run `changes` as one transaction on the referenced object.
    pub async fn transaction<F, Fut>(&self, transition_time: Option<u16>, changes: F) -> Result<()>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<()>> + Send,
    {
        match self {
            LightHandle::Light(l) => l.transaction(transition_time, changes).await,
            LightHandle::Group(g) => g.transaction(transition_time, changes).await,
            LightHandle::Virtual(v) => v.transaction(transition_time, changes).await,
        }
    }

    fn as_control(&self) -> &dyn DynControl {
        match self {
            LightHandle::Light(l) => &**l,
            LightHandle::Group(g) => &**g,
            LightHandle::Virtual(v) => &**v,
        }
    }
}

/// Object-safe subset of [`LightControl`] used for dispatch.
trait DynControl: fmt::Display + Send + Sync {
    fn dyn_id(&self) -> u32;
    fn dyn_transition_time(&self) -> Option<u16>;
    fn dyn_set_transition_time(&self, deciseconds: Option<u16>);
    fn dyn_set_state(&self, payload: StatePayload) -> BoxFuture<'_, Result<()>>;
}

impl<T: LightControl> DynControl for T {
    fn dyn_id(&self) -> u32 {
        self.id()
    }

    fn dyn_transition_time(&self) -> Option<u16> {
        self.transition_time()
    }

    fn dyn_set_transition_time(&self, deciseconds: Option<u16>) {
        self.set_transition_time(deciseconds)
    }

    fn dyn_set_state(&self, payload: StatePayload) -> BoxFuture<'_, Result<()>> {
        self.set_state(payload)
    }
}

impl LightControl for LightHandle {
    fn id(&self) -> u32 {
        self.as_control().dyn_id()
    }

    fn transition_time(&self) -> Option<u16> {
        self.as_control().dyn_transition_time()
    }

    fn set_transition_time(&self, deciseconds: Option<u16>) {
        self.as_control().dyn_set_transition_time(deciseconds)
    }

    fn set_state(&self, payload: StatePayload) -> BoxFuture<'_, Result<()>> {
        self.as_control().dyn_set_state(payload)
    }
}

impl fmt::Display for LightHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.as_control(), f)
    }
}

impl From<Arc<Light>> for LightHandle {
    fn from(light: Arc<Light>) -> Self {
        LightHandle::Light(light)
    }
}

impl From<Arc<Group>> for LightHandle {
    fn from(group: Arc<Group>) -> Self {
        LightHandle::Group(group)
    }
}

impl From<Arc<VirtualGroup>> for LightHandle {
    fn from(group: Arc<VirtualGroup>) -> Self {
        LightHandle::Virtual(group)
    }
}

impl From<&Arc<Light>> for LightHandle {
    fn from(light: &Arc<Light>) -> Self {
        LightHandle::Light(light.clone())
    }
}

impl From<&Arc<Group>> for LightHandle {
    fn from(group: &Arc<Group>) -> Self {
        LightHandle::Group(group.clone())
    }
}

impl From<&Arc<VirtualGroup>> for LightHandle {
    fn from(group: &Arc<VirtualGroup>) -> Self {
        LightHandle::Virtual(group.clone())
    }
}
