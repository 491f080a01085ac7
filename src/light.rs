//! Individual light control.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use log::debug;
use serde_json::json;

use crate::bridge::{Bridge, BridgeInner};
use crate::config::{LightRecord, decode, reject_errors};
use crate::control::LightControl;
use crate::errors::Error;
use crate::payload::StatePayload;
use crate::response::{confirmed, ensure_success};
use crate::runtime::{BoxFuture, Instant};
use crate::status::LightState;
use crate::transaction::{self, PendingChanges, Transactional};
use crate::transport::Method;
use crate::types::{Brightness, CieXy, ColorMode, ColorTemperature, Effect, Hue, Saturation};

type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
struct LightCache {
    name: String,
    kind: Option<String>,
    model_id: Option<String>,
    state: LightState,
    last_sync: Option<Instant>,
    auto_sync_interval: Option<Duration>,
    transition_time: Option<u16>,
}

/// A light known to a bridge.
///
/// Lights are created by the bridge's sync and updated in place afterwards,
/// so an `Arc<Light>` stays valid across syncs. State getters are async: when
/// an auto-sync interval is set and the cached state is older than it, they
/// refresh the light from the bridge first.
#[derive(Debug)]
pub struct Light {
    id: u32,
    bridge: Weak<BridgeInner>,
    cache: Mutex<LightCache>,
    syncing: AtomicBool,
    pending: PendingChanges,
}

/// Clears the re-entrancy flag when a refresh ends, however it ends.
struct SyncGuard<'a>(&'a AtomicBool);

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Light {
    const MAX_NAME_LEN: usize = 32;

    pub(crate) fn new(id: u32, bridge: Weak<BridgeInner>, record: LightRecord, state: LightState) -> Self {
        Light {
            id,
            bridge,
            cache: Mutex::new(LightCache {
                name: record.name,
                kind: record.kind,
                model_id: record.model_id,
                state,
                last_sync: Some(Instant::now()),
                auto_sync_interval: None,
                transition_time: None,
            }),
            syncing: AtomicBool::new(false),
            pending: PendingChanges::default(),
        }
    }

    fn cache(&self) -> MutexGuard<'_, LightCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn bridge(&self) -> Result<Bridge> {
        Bridge::upgrade(&self.bridge)
    }

    pub(crate) fn same_bridge(&self, other: &Weak<BridgeInner>) -> bool {
        Weak::ptr_eq(&self.bridge, other)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// The cached name; names only change through [`Light::set_name`] or a sync.
    pub fn name(&self) -> String {
        self.cache().name.clone()
    }

    /// Product type reported by the bridge, e.g. `Extended color light`.
    pub fn kind(&self) -> Option<String> {
        self.cache().kind.clone()
    }

    pub fn model_id(&self) -> Option<String> {
        self.cache().model_id.clone()
    }

    /// The cached state, without any network access.
    pub fn cached_state(&self) -> LightState {
        self.cache().state.clone()
    }

    pub fn last_sync(&self) -> Option<Instant> {
        self.cache().last_sync
    }

    pub fn auto_sync_interval(&self) -> Option<Duration> {
        self.cache().auto_sync_interval
    }

    /// Refresh cached state on read once it is older than `interval`. `None` or zero disables it.
    pub fn set_auto_sync_interval(&self, interval: Option<Duration>) {
        self.cache().auto_sync_interval = interval;
    }

    /// The current state, refreshed first if it has gone stale.
    pub async fn state(&self) -> Result<LightState> {
        self.refresh_if_stale().await?;
        Ok(self.cached_state())
    }

    pub async fn is_on(&self) -> Result<bool> {
        Ok(self.state().await?.on())
    }

    pub async fn brightness(&self) -> Result<Option<Brightness>> {
        Ok(self.state().await?.brightness())
    }

    pub async fn hue(&self) -> Result<Option<Hue>> {
        Ok(self.state().await?.hue())
    }

    pub async fn saturation(&self) -> Result<Option<Saturation>> {
        Ok(self.state().await?.saturation())
    }

    pub async fn cie_xy(&self) -> Result<Option<CieXy>> {
        Ok(self.state().await?.cie_xy())
    }

    pub async fn color_temperature(&self) -> Result<Option<ColorTemperature>> {
        Ok(self.state().await?.color_temperature())
    }

    pub async fn color_mode(&self) -> Result<Option<ColorMode>> {
        Ok(self.state().await?.color_mode())
    }

    pub async fn effect(&self) -> Result<Option<Effect>> {
        Ok(self.state().await?.effect())
    }

    fn is_stale(&self) -> bool {
        let cache = self.cache();
        match (cache.auto_sync_interval, cache.last_sync) {
            (Some(interval), _) if interval.is_zero() => false,
            (Some(_), None) => true,
            (Some(interval), Some(last)) => last.elapsed() > interval,
            (None, _) => false,
        }
    }

    async fn refresh_if_stale(&self) -> Result<()> {
        if self.is_stale() {
            self.sync().await?;
        }
        Ok(())
    }

    /// Reload this light from the bridge.
    ///
    /// A refresh already running for this light is not duplicated.
    pub async fn sync(&self) -> Result<()> {
        if self.syncing.swap(true, Ordering::AcqRel) {
            debug!("light {} is already syncing", self.id);
            return Ok(());
        }
        let _guard = SyncGuard(&self.syncing);

        let bridge = self.bridge()?;
        let entries = bridge.send(Method::Get, &format!("lights/{}", self.id), None).await?;
        let Some(entry) = entries.into_iter().next() else {
            return Err(Error::protocol(format!("empty reply for light {}", self.id)));
        };
        let entry = serde_json::Value::Object(entry);
        reject_errors(&entry)?;
        let record: LightRecord = decode(entry, "light")?;
        let state = LightState::try_from(&record.state)?;
        self.update(record, state);
        Ok(())
    }

    /// Overwrite the cache with freshly parsed bridge data.
    pub(crate) fn update(&self, record: LightRecord, state: LightState) {
        let mut cache = self.cache();
        cache.name = record.name;
        cache.kind = record.kind;
        cache.model_id = record.model_id;
        cache.state = state;
        cache.last_sync = Some(Instant::now());
    }

    /// Patch the cache with changes the bridge has confirmed.
    pub(crate) fn apply_confirmed(&self, payload: &StatePayload) {
        self.cache().state.apply(payload);
    }

    /// Rename the light on the bridge (at most 32 characters).
    pub async fn set_name(&self, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > Self::MAX_NAME_LEN {
            return Err(Error::validation(
                "light name",
                format!("expected 1 to {} characters", Self::MAX_NAME_LEN),
            ));
        }

        let bridge = self.bridge()?;
        let path = format!("lights/{}", self.id);
        let entries = bridge
            .send(Method::Put, &path, Some(&json!({ "name": name })))
            .await?;
        ensure_success(&entries)?;

        let adopted = confirmed(&entries, &format!("/{path}/name"))
            .and_then(|v| v.as_str())
            .unwrap_or(name)
            .to_string();
        self.cache().name = adopted;
        Ok(())
    }

    /// Batch every change made by `changes` on this light into one request.
    ///
    /// ```ignore
    /// light
    ///     .transaction(Some(4), || async {
    ///         light.set_on(true).await?;
    ///         light.set_brightness(200).await?;
    ///         light.set_color_temperature(366).await
    ///     })
    ///     .await?;
    /// ```
    pub async fn transaction<F, Fut>(&self, transition_time: Option<u16>, changes: F) -> Result<()>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<()>> + Send,
    {
        transaction::run(self, transition_time, changes).await
    }

    async fn put_state(&self, payload: StatePayload) -> Result<()> {
        let bridge = self.bridge()?;
        let body = payload.to_json()?;
        let entries = bridge
            .send(Method::Put, &format!("lights/{}/state", self.id), Some(&body))
            .await?;
        ensure_success(&entries)?;
        self.apply_confirmed(&payload);
        Ok(())
    }
}

impl LightControl for Light {
    fn id(&self) -> u32 {
        self.id
    }

    fn transition_time(&self) -> Option<u16> {
        self.cache().transition_time
    }

    fn set_transition_time(&self, deciseconds: Option<u16>) {
        self.cache().transition_time = deciseconds;
    }

    fn set_state(&self, payload: StatePayload) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.pending.stage(&payload) {
                return Ok(());
            }
            let mut payload = payload;
            if payload.transition_time.is_none()
                && let Some(deciseconds) = LightControl::transition_time(self)
            {
                payload.transition_time(deciseconds);
            }
            self.put_state(payload).await
        })
    }
}

impl Transactional for Light {
    fn pending(&self) -> &PendingChanges {
        &self.pending
    }

    fn commit(&self, payload: StatePayload) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.put_state(payload))
    }

    fn resync(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.sync())
    }
}

impl fmt::Display for Light {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Light #{} \"{}\"", self.id, self.cache().name)
    }
}
