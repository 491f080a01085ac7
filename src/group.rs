//! Bridge-side light groups.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::json;

use crate::bridge::{Bridge, BridgeInner};
use crate::config::{GroupRecord, decode, reject_errors};
use crate::control::LightControl;
use crate::errors::Error;
use crate::light::Light;
use crate::payload::StatePayload;
use crate::response::{confirmed, ensure_success};
use crate::runtime::BoxFuture;
use crate::transaction::{self, PendingChanges, Transactional};
use crate::transport::Method;

type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
struct GroupCache {
    name: String,
    lights: BTreeMap<u32, Arc<Light>>,
    transition_time: Option<u16>,
}

/// A group of lights stored on the bridge.
///
/// Group `0` always exists and contains every light the bridge knows.
/// Membership is read-only: the modeled bridge API cannot edit it.
#[derive(Debug)]
pub struct Group {
    id: u32,
    bridge: Weak<BridgeInner>,
    cache: Mutex<GroupCache>,
    pending: PendingChanges,
}

impl Group {
    /// Id of the implicit all-lights group.
    pub const IMPLICIT_ID: u32 = 0;

    pub(crate) fn new(id: u32, bridge: Weak<BridgeInner>, name: String, lights: Vec<Arc<Light>>) -> Self {
        Group {
            id,
            bridge,
            cache: Mutex::new(GroupCache {
                name,
                lights: lights.into_iter().map(|l| (l.id(), l)).collect(),
                transition_time: None,
            }),
            pending: PendingChanges::default(),
        }
    }

    pub(crate) fn implicit(bridge: Weak<BridgeInner>) -> Self {
        Self::new(Self::IMPLICIT_ID, bridge, "Implicit".to_string(), Vec::new())
    }

    fn cache(&self) -> MutexGuard<'_, GroupCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bridge(&self) -> Result<Bridge> {
        Bridge::upgrade(&self.bridge)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_implicit(&self) -> bool {
        self.id == Self::IMPLICIT_ID
    }

    pub fn name(&self) -> String {
        self.cache().name.clone()
    }

    /// Member lights ordered by id.
    pub fn lights(&self) -> Vec<Arc<Light>> {
        self.cache().lights.values().cloned().collect()
    }

    pub fn light(&self, id: u32) -> Option<Arc<Light>> {
        self.cache().lights.get(&id).cloned()
    }

    pub fn light_ids(&self) -> Vec<u32> {
        self.cache().lights.keys().copied().collect()
    }

    pub(crate) fn update(&self, name: String, lights: Vec<Arc<Light>>) {
        let mut cache = self.cache();
        cache.name = name;
        cache.lights = lights.into_iter().map(|l| (l.id(), l)).collect();
    }

    pub(crate) fn set_members(&self, lights: Vec<Arc<Light>>) {
        self.cache().lights = lights.into_iter().map(|l| (l.id(), l)).collect();
    }

    fn check_same_bridge(&self, light: &Light) -> Result<()> {
        if light.same_bridge(&self.bridge) {
            Ok(())
        } else {
            Err(Error::validation(
                "light",
                format!("{light} belongs to a different bridge than group {}", self.id),
            ))
        }
    }

    /// Adding is a no-op on the implicit group, which already holds every light.
    pub fn add(&self, light: &Light) -> Result<bool> {
        self.check_same_bridge(light)?;
        if self.is_implicit() {
            return Ok(false);
        }
        Err(Error::Unsupported("adding lights to a bridge group"))
    }

    pub fn remove(&self, light: &Light) -> Result<bool> {
        self.check_same_bridge(light)?;
        if self.is_implicit() {
            return Err(Error::validation(
                "group",
                "lights cannot be removed from the implicit group",
            ));
        }
        Err(Error::Unsupported("removing lights from a bridge group"))
    }

    pub async fn set_name(&self, name: &str) -> Result<()> {
        if self.is_implicit() {
            return Err(Error::Unsupported("renaming the implicit group"));
        }
        let name = name.trim();
        if name.is_empty() || name.chars().count() > 32 {
            return Err(Error::validation("group name", "expected 1 to 32 characters"));
        }

        let bridge = self.bridge()?;
        let path = format!("groups/{}", self.id);
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

    /// Reload name and membership from the bridge, then every member light.
    pub async fn sync(&self) -> Result<()> {
        let bridge = self.bridge()?;
        if !self.is_implicit() {
            let entries = bridge.send(Method::Get, &format!("groups/{}", self.id), None).await?;
            let Some(entry) = entries.into_iter().next() else {
                return Err(Error::protocol(format!("empty reply for group {}", self.id)));
            };
            let entry = serde_json::Value::Object(entry);
            reject_errors(&entry)?;
            let record: GroupRecord = decode(entry, "group")?;
            let lights = bridge.resolve_lights(&record.lights)?;
            self.update(record.name, lights);
        }

        for light in self.lights() {
            light.sync().await?;
        }
        Ok(())
    }

    /// Batch every change made by `changes` on this group into one request.
    pub async fn transaction<F, Fut>(&self, transition_time: Option<u16>, changes: F) -> Result<()>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<()>> + Send,
    {
        transaction::run(self, transition_time, changes).await
    }

    async fn put_action(&self, payload: StatePayload) -> Result<()> {
        let bridge = self.bridge()?;
        let body = payload.to_json()?;
        let entries = bridge
            .send(Method::Put, &format!("groups/{}/action", self.id), Some(&body))
            .await?;
        ensure_success(&entries)?;

        for light in self.lights() {
            light.apply_confirmed(&payload);
        }
        Ok(())
    }
}

impl LightControl for Group {
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
            self.put_action(payload).await
        })
    }
}

impl Transactional for Group {
    fn pending(&self) -> &PendingChanges {
        &self.pending
    }

    fn commit(&self, payload: StatePayload) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.put_action(payload))
    }

    fn resync(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.sync())
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Group #{} \"{}\"", self.id, self.cache().name)
    }
}
