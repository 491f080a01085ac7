//! The bridge handle: authentication, full sync and the entity tables.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::{debug, info, warn};
use rand::Rng;
use serde_json::{Value, json};
use url::Url;

use crate::config::{ConfigRecord, FullStateRecord, GroupRecord, LightRecord, decode, parse_id, reject_errors};
use crate::errors::Error;
use crate::group::Group;
use crate::light::Light;
use crate::response::{CreateUserReply, confirmed, ensure_success};
use crate::runtime::{self, Instant};
use crate::session::{AuthState, Session, SessionConfig, equal_enough, validate_username};
use crate::status::LightState;
use crate::transport::{HttpTransport, JsonObject, Method, Transport, TransportConfig};
use crate::virtual_group::VirtualGroup;

type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Default)]
struct BridgeInfo {
    name: Option<String>,
    config: Option<ConfigRecord>,
    scan_active: bool,
}

pub(crate) struct BridgeInner {
    transport: Arc<dyn Transport>,
    udn: Option<String>,
    config: SessionConfig,
    session: Mutex<Session>,
    info: Mutex<BridgeInfo>,
    lights: DashMap<u32, Arc<Light>>,
    groups: DashMap<u32, Arc<Group>>,
    virtual_groups: DashMap<u32, Arc<VirtualGroup>>,
}

/// A handle to one Hue bridge.
///
/// Cloning is cheap and every clone shares the same session and entity
/// cache. Lights and groups are loaded by the first full sync after
/// authentication and keep their identity across later syncs.
///
/// ```no_run
/// # async fn run() -> Result<(), hue_lights_rs::Error> {
/// use hue_lights_rs::{Bridge, LightControl};
///
/// let bridge = Bridge::new("10.0.0.5".parse().unwrap(), Some("aaaaaaaaaaaaaaaaaaaaaa"))?;
/// if bridge.authenticate(true).await? {
///     for light in bridge.lights().await? {
///         light.set_on(true).await?;
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl Bridge {
    /// A bridge reached over plain HTTP on port 80 of `address`.
    pub fn new(address: IpAddr, username: Option<&str>) -> Result<Self> {
        let url = Url::parse(&format!("http://{}/", SocketAddr::new(address, 80)))
            .map_err(|e| Error::validation("address", e.to_string()))?;
        Self::from_url(url, username)
    }

    pub fn from_url(base_url: Url, username: Option<&str>) -> Result<Self> {
        let transport = HttpTransport::new(base_url, &TransportConfig::default())?;
        Self::with_transport(Arc::new(transport), username, SessionConfig::default())
    }

    /// Build a bridge on top of any [`Transport`].
    ///
    /// A supplied username is validated but not checked against the bridge
    /// until [`Bridge::authenticate`] runs.
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        username: Option<&str>,
        config: SessionConfig,
    ) -> Result<Self> {
        let session = Session::new(username)?;
        Ok(Self::build(transport, None, session, config))
    }

    /// A bridge found by discovery: known by its UDN, no credential yet.
    pub(crate) fn discovered(transport: Arc<dyn Transport>, udn: String) -> Self {
        Self::build(transport, Some(udn), Session::default(), SessionConfig::default())
    }

    fn build(transport: Arc<dyn Transport>, udn: Option<String>, session: Session, config: SessionConfig) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<BridgeInner>| {
            let groups = DashMap::new();
            groups.insert(Group::IMPLICIT_ID, Arc::new(Group::implicit(weak.clone())));
            BridgeInner {
                transport,
                udn,
                config,
                session: Mutex::new(session),
                info: Mutex::new(BridgeInfo::default()),
                lights: DashMap::new(),
                groups,
                virtual_groups: DashMap::new(),
            }
        });
        Bridge { inner }
    }

    pub(crate) fn upgrade(weak: &Weak<BridgeInner>) -> Result<Bridge> {
        weak.upgrade().map(|inner| Bridge { inner }).ok_or(Error::BridgeGone)
    }

    pub(crate) fn downgrade(&self) -> Weak<BridgeInner> {
        Arc::downgrade(&self.inner)
    }

    /// True if both handles refer to the same bridge.
    pub fn ptr_eq(&self, other: &Bridge) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.inner.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn info(&self) -> MutexGuard<'_, BridgeInfo> {
        self.inner.info.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The device UUID, as `uuid:<id>`, when the bridge was found by discovery.
    pub fn udn(&self) -> Option<&str> {
        self.inner.udn.as_deref()
    }

    pub fn base_url(&self) -> Option<Url> {
        self.inner.transport.base_url().cloned()
    }

    pub fn username(&self) -> Option<String> {
        self.session().username().map(str::to_string)
    }

    /// Replace the stored username.
    ///
    /// The handle stays authenticated only if the new username is equal
    /// enough to the old one.
    pub fn set_username(&self, username: &str) -> Result<()> {
        self.session().set_username(username)
    }

    pub fn is_authenticated(&self) -> bool {
        self.session().is_authenticated()
    }

    pub fn auth_state(&self) -> AuthState {
        self.session().state()
    }

    fn set_auth_state(&self, state: AuthState) {
        self.session().set_state(state);
    }

    #[cfg(test)]
    pub(crate) fn force_authenticated(&self, username: &str) {
        self.session().grant(username.to_string());
    }

    /// Send a request below `api/<username>`.
    ///
    /// Requires an authenticated handle and runs the initial full sync first if it is still missing.
    pub(crate) async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Vec<JsonObject>> {
        self.check_auth_and_sync().await?;
        let username = self.username().ok_or(Error::NotAuthenticated)?;
        self.send_as(&username, method, path, body).await
    }

    async fn send_as(&self, username: &str, method: Method, path: &str, body: Option<&Value>) -> Result<Vec<JsonObject>> {
        let path = if path.is_empty() {
            format!("api/{username}")
        } else {
            format!("api/{username}/{path}")
        };
        self.inner.transport.request(method, &path, body).await
    }

    /// Authenticate with the stored username, or ask for a new one if there is none.
    pub async fn authenticate(&self, wait_for_grant: bool) -> Result<bool> {
        let username = self.username();
        self.authenticate_with(username.as_deref(), wait_for_grant).await
    }

    /// Authenticate as `username`, asking the bridge to create it if it does not know it yet.
    ///
    /// With `wait_for_grant`, creation requests are repeated until the link
    /// button on the bridge is pressed or the grant timeout runs out.
    /// Returns whether the handle ended up authenticated. An authenticated
    /// handle keeps its username when a different one is rejected, and never
    /// asks the bridge for a new one. Failures of the initial sync after a
    /// successful authentication are returned as errors.
    pub async fn authenticate_with(&self, username: Option<&str>, wait_for_grant: bool) -> Result<bool> {
        let candidate = match username.map(str::trim).filter(|u| !u.is_empty()) {
            Some(username) => Some(validate_username(username)?),
            None => None,
        };

        let (previous, already) = {
            let session = self.session();
            (
                session.state(),
                session.is_authenticated() && equal_enough(session.username(), candidate.as_deref()),
            )
        };
        if already {
            self.ensure_initial_sync().await?;
            return Ok(true);
        }

        if let Some(candidate) = &candidate {
            self.set_auth_state(AuthState::Checking);
            match self.complete_sync_as(candidate).await {
                Ok(()) => {
                    self.session().grant(candidate.clone());
                    info!("{self}: existing username accepted");
                    return Ok(true);
                }
                Err(err) => {
                    debug!("{self}: stored username rejected: {err}");
                    self.set_auth_state(previous);
                }
            }
        }

        if previous == AuthState::Authenticated {
            debug!("{self}: keeping the current username");
            self.ensure_initial_sync().await?;
            return Ok(true);
        }

        if !self.request_grant(candidate.as_deref(), wait_for_grant).await {
            return Ok(false);
        }
        self.ensure_initial_sync().await?;
        Ok(true)
    }

    /// Poll the create-user endpoint. Returns true once a username was granted.
    async fn request_grant(&self, candidate: Option<&str>, wait_for_grant: bool) -> bool {
        let mut body = json!({ "devicetype": self.inner.config.device_type });
        if let Some(candidate) = candidate {
            body["username"] = json!(candidate);
        }

        self.set_auth_state(AuthState::AwaitingGrant);
        let started = Instant::now();
        loop {
            match self.inner.transport.request(Method::Post, "api", Some(&body)).await {
                Ok(entries) => match CreateUserReply::parse(&entries) {
                    CreateUserReply::Granted(username) => {
                        info!("{self}: username granted");
                        self.session().grant(username);
                        return true;
                    }
                    CreateUserReply::AwaitingGrant(err) => debug!("{self}: {err}"),
                    CreateUserReply::Rejected(err) => {
                        warn!("{self}: create user request rejected: {err}");
                        break;
                    }
                },
                Err(err) => warn!("{self}: create user request failed: {err}"),
            }

            if !wait_for_grant || started.elapsed() > self.inner.config.grant_timeout {
                break;
            }
            runtime::sleep(self.poll_delay()).await;
        }

        self.set_auth_state(AuthState::Failed);
        false
    }

    fn poll_delay(&self) -> Duration {
        let jitter = u64::try_from(self.inner.config.poll_jitter.as_millis()).unwrap_or(0);
        self.inner.config.poll_interval + Duration::from_millis(rand::rng().random_range(0..=jitter))
    }

    async fn ensure_initial_sync(&self) -> Result<()> {
        let synced = self.session().initial_sync_done();
        if !synced {
            self.complete_sync().await?;
        }
        Ok(())
    }

    async fn check_auth_and_sync(&self) -> Result<()> {
        if !self.is_authenticated() {
            return Err(Error::NotAuthenticated);
        }
        self.ensure_initial_sync().await
    }

    /// Reload configuration, lights and groups from the bridge.
    pub async fn sync(&self) -> Result<()> {
        if !self.is_authenticated() {
            return Err(Error::NotAuthenticated);
        }
        self.complete_sync().await
    }

    async fn complete_sync(&self) -> Result<()> {
        let username = self.username().ok_or(Error::NotAuthenticated)?;
        self.complete_sync_as(&username).await
    }

    /// Fetch the full state document as `username` and load it into the cache.
    async fn complete_sync_as(&self, username: &str) -> Result<()> {
        let entries = self.send_as(username, Method::Get, "", None).await?;
        let Some(document) = entries.into_iter().next() else {
            return Err(Error::protocol("empty reply to full state request"));
        };
        let document = Value::Object(document);
        reject_errors(&document)?;

        let record: FullStateRecord = decode(document, "full state")?;
        let (Some(config), Some(lights), Some(groups)) = (record.config, record.lights, record.groups) else {
            return Err(Error::protocol(
                "incomplete response, missing at least one of config/lights/groups",
            ));
        };

        let config: ConfigRecord = decode(config, "bridge config")?;
        let mut parsed = Vec::with_capacity(lights.len());
        for (key, value) in lights {
            let id = parse_id(&key, "light")?;
            let record: LightRecord = decode(value, "light")?;
            let state = LightState::try_from(&record.state)?;
            parsed.push((id, record, state));
        }
        for (id, record, state) in parsed {
            self.upsert_light(id, record, state);
        }
        self.parse_groups(groups)?;

        debug!("full sync of {} lights from {}", self.inner.lights.len(), config.name);
        {
            let mut info = self.info();
            info.name = Some(config.name.clone());
            info.config = Some(config);
        }
        let mut session = self.session();
        session.set_username(username)?;
        session.mark_synced();
        Ok(())
    }

    fn upsert_light(&self, id: u32, record: LightRecord, state: LightState) {
        match self.inner.lights.entry(id) {
            Entry::Occupied(existing) => existing.get().update(record, state),
            Entry::Vacant(slot) => {
                debug!("new light {id} \"{}\"", record.name);
                slot.insert(Arc::new(Light::new(id, self.downgrade(), record, state)));
            }
        }
    }

    fn parse_groups(&self, groups: indexmap::IndexMap<String, Value>) -> Result<()> {
        let mut parsed = Vec::with_capacity(groups.len());
        for (key, value) in groups {
            let id = parse_id(&key, "group")?;
            if id == Group::IMPLICIT_ID {
                continue;
            }
            let record: GroupRecord = decode(value, "group")?;
            let members = self.resolve_lights(&record.lights)?;
            parsed.push((id, record.name, members));
        }

        for (id, name, members) in parsed {
            match self.inner.groups.entry(id) {
                Entry::Occupied(existing) => existing.get().update(name, members),
                Entry::Vacant(slot) => {
                    slot.insert(Arc::new(Group::new(id, self.downgrade(), name, members)));
                }
            }
        }

        let everything: Vec<Arc<Light>> = self.inner.lights.iter().map(|l| l.value().clone()).collect();
        if let Some(implicit) = self.inner.groups.get(&Group::IMPLICIT_ID) {
            implicit.set_members(everything);
        }
        Ok(())
    }

    /// Look up cached lights by their bridge id keys. Every id must be known.
    pub(crate) fn resolve_lights(&self, ids: &[String]) -> Result<Vec<Arc<Light>>> {
        ids.iter()
            .map(|key| {
                let id = parse_id(key, "light")?;
                self.inner
                    .lights
                    .get(&id)
                    .map(|light| light.value().clone())
                    .ok_or_else(|| Error::protocol(format!("can not find light with id {id}")))
            })
            .collect()
    }

    /// The bridge's configured name.
    pub async fn name(&self) -> Result<String> {
        self.check_auth_and_sync().await?;
        Ok(self.info().name.clone().unwrap_or_default())
    }

    /// Rename the bridge (4 to 16 characters, surrounding whitespace ignored).
    pub async fn set_name(&self, name: &str) -> Result<()> {
        let name = name.trim();
        let len = name.chars().count();
        if !(4..=16).contains(&len) {
            return Err(Error::validation("bridge name", "expected 4 to 16 characters"));
        }

        let entries = self
            .send(Method::Put, "config", Some(&json!({ "name": name })))
            .await?;
        ensure_success(&entries)?;
        let adopted = confirmed(&entries, "/config/name")
            .and_then(Value::as_str)
            .unwrap_or(name)
            .to_string();
        self.info().name = Some(adopted);
        Ok(())
    }

    /// The `config` section seen by the last full sync.
    pub fn config(&self) -> Option<ConfigRecord> {
        self.info().config.clone()
    }

    /// All lights ordered by id.
    pub async fn lights(&self) -> Result<Vec<Arc<Light>>> {
        self.check_auth_and_sync().await?;
        let mut lights: Vec<Arc<Light>> = self.inner.lights.iter().map(|l| l.value().clone()).collect();
        lights.sort_by_key(|l| l.id());
        Ok(lights)
    }

    pub async fn light(&self, id: u32) -> Result<Option<Arc<Light>>> {
        self.check_auth_and_sync().await?;
        Ok(self.inner.lights.get(&id).map(|l| l.value().clone()))
    }

    pub async fn light_ids(&self) -> Result<Vec<u32>> {
        self.check_auth_and_sync().await?;
        let mut ids: Vec<u32> = self.inner.lights.iter().map(|l| *l.key()).collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// All groups ordered by id, the implicit group `0` first.
    pub async fn groups(&self) -> Result<Vec<Arc<Group>>> {
        self.check_auth_and_sync().await?;
        let mut groups: Vec<Arc<Group>> = self.inner.groups.iter().map(|g| g.value().clone()).collect();
        groups.sort_by_key(|g| g.id());
        Ok(groups)
    }

    pub async fn group(&self, id: u32) -> Result<Option<Arc<Group>>> {
        self.check_auth_and_sync().await?;
        Ok(self.inner.groups.get(&id).map(|g| g.value().clone()))
    }

    pub async fn group_ids(&self) -> Result<Vec<u32>> {
        self.check_auth_and_sync().await?;
        let mut ids: Vec<u32> = self.inner.groups.iter().map(|g| *g.key()).collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// Register a new virtual group under `id`, which must not be taken yet.
    pub fn create_virtual_group(&self, id: u32, name: &str) -> Result<Arc<VirtualGroup>> {
        match self.inner.virtual_groups.entry(id) {
            Entry::Occupied(_) => Err(Error::validation(
                "virtual group id",
                format!("a virtual group with id {id} already exists"),
            )),
            Entry::Vacant(slot) => {
                let group = Arc::new(VirtualGroup::new(id, name));
                slot.insert(group.clone());
                Ok(group)
            }
        }
    }

    pub fn virtual_groups(&self) -> Vec<Arc<VirtualGroup>> {
        let mut groups: Vec<Arc<VirtualGroup>> = self.inner.virtual_groups.iter().map(|g| g.value().clone()).collect();
        groups.sort_by_key(|g| g.id());
        groups
    }

    pub fn virtual_group(&self, id: u32) -> Option<Arc<VirtualGroup>> {
        self.inner.virtual_groups.get(&id).map(|g| g.value().clone())
    }

    pub fn virtual_group_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.inner.virtual_groups.iter().map(|g| *g.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Ask the bridge to scan for new lights. Results show up in [`Bridge::new_lights`].
    pub async fn search_for_new_lights(&self) -> Result<()> {
        let entries = self.send(Method::Post, "lights", None).await?;
        ensure_success(&entries)
    }

    /// Ids of the lights found by the last scan, ordered.
    ///
    /// An empty list can also mean a scan is still running; see
    /// [`Bridge::is_scan_active`]. Lights not cached yet are loaded with a full sync.
    pub async fn new_lights(&self) -> Result<Vec<u32>> {
        let entries = self.send(Method::Get, "lights/new", None).await?;
        let Some(mut found) = entries.into_iter().next() else {
            return Err(Error::protocol("empty reply to new lights request"));
        };
        reject_errors(&Value::Object(found.clone()))?;

        let last_scan = found.remove("lastscan");
        self.info().scan_active = last_scan.as_ref().and_then(Value::as_str) == Some("active");

        let mut ids = found
            .keys()
            .map(|key| parse_id(key, "light"))
            .collect::<Result<Vec<u32>>>()?;
        ids.sort_unstable();

        if ids.iter().any(|id| !self.inner.lights.contains_key(id)) {
            self.complete_sync().await?;
        }
        Ok(ids)
    }

    /// Whether a scan was running at the last call to [`Bridge::new_lights`].
    pub fn is_scan_active(&self) -> bool {
        self.info().scan_active
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("base_url", &self.inner.transport.base_url())
            .field("udn", &self.inner.udn)
            .field("auth_state", &self.auth_state())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let synced = self.session().initial_sync_done();
        let name = self.info().name.clone();
        match name {
            Some(name) if synced => write!(f, "{name}@")?,
            _ => write!(f, "<Unsynced Hue Bridge>@")?,
        }
        match self.inner.transport.base_url() {
            Some(url) => write!(f, "{url}")?,
            None => write!(f, "<no address>")?,
        }
        if let Some(udn) = &self.inner.udn {
            write!(f, "#{udn}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use crate::control::LightControl;

    use crate::testing::{MockTransport, USERNAME, bridge, bridge_responder, full_state, synced_bridge};

    fn unauthorized() -> Value {
        json!([{"error": {"type": 1, "address": "/", "description": "unauthorized user"}}])
    }

    fn link_button() -> Value {
        json!([{"error": {"type": 101, "address": "", "description": "link button not pressed"}}])
    }

    fn unauthenticated(transport: Arc<MockTransport>) -> Bridge {
        Bridge::with_transport(transport, None, SessionConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_full_sync_loads_everything() {
        let (bridge, transport) = synced_bridge().await;

        assert_eq!(bridge.light_ids().await.unwrap(), vec![1, 2, 5]);
        assert_eq!(bridge.name().await.unwrap(), "Living room bridge");
        assert_eq!(
            bridge.config().unwrap().bridge_id.as_deref(),
            Some("001788FFFE000000")
        );
        let names: Vec<String> = bridge.lights().await.unwrap().iter().map(|l| l.name()).collect();
        assert_eq!(names, vec!["Desk", "Shelf", "Hall"]);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_resync_updates_in_place() {
        let (bridge, transport) = synced_bridge().await;
        let hall = bridge.light(5).await.unwrap().unwrap();

        transport.respond_with(|method, path, body| {
            let mut state = full_state();
            state["lights"]["5"]["name"] = json!("Hallway");
            match method {
                Method::Get if path == format!("api/{USERNAME}") => Ok(state),
                _ => bridge_responder(method, path, body),
            }
        });
        bridge.sync().await.unwrap();

        assert_eq!(hall.name(), "Hallway");
        assert!(Arc::ptr_eq(&hall, &bridge.light(5).await.unwrap().unwrap()));
    }

    #[tokio::test]
    async fn test_accessors_require_authentication() {
        let transport = MockTransport::new(bridge_responder);
        let bridge = unauthenticated(transport.clone());

        assert_eq!(bridge.lights().await.unwrap_err(), Error::NotAuthenticated);
        assert_eq!(bridge.group(0).await.unwrap_err(), Error::NotAuthenticated);
        assert_eq!(bridge.sync().await.unwrap_err(), Error::NotAuthenticated);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_first_access_syncs_once() {
        let transport = MockTransport::new(bridge_responder);
        let bridge = bridge(transport.clone());

        assert_eq!(bridge.group_ids().await.unwrap(), vec![0, 1]);
        assert_eq!(bridge.light_ids().await.unwrap(), vec![1, 2, 5]);
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(transport.requests()[0].path, format!("api/{USERNAME}"));
    }

    #[tokio::test]
    async fn test_incomplete_document_fails() {
        let transport = MockTransport::new(|_, _, _| {
            let mut state = full_state();
            state.as_object_mut().unwrap().remove("groups");
            Ok(state)
        });
        let bridge = bridge(transport);

        let err = bridge.sync().await.unwrap_err();
        assert!(err.to_string().contains("incomplete response"));
    }

    #[tokio::test]
    async fn test_error_in_document_fails() {
        let bridge = bridge(MockTransport::new(|_, _, _| Ok(unauthorized())));
        assert_eq!(bridge.sync().await.unwrap_err().error_type(), Some(1));
    }

    #[tokio::test]
    async fn test_unknown_group_member_fails() {
        let transport = MockTransport::new(|_, _, _| {
            let mut state = full_state();
            state["groups"]["1"]["lights"] = json!(["1", "9"]);
            Ok(state)
        });
        let bridge = bridge(transport);

        let err = bridge.sync().await.unwrap_err();
        assert!(err.to_string().contains("can not find light with id 9"));
    }

    #[tokio::test]
    async fn test_unknown_color_mode_fails() {
        let transport = MockTransport::new(|_, _, _| {
            let mut state = full_state();
            state["lights"]["2"]["state"]["colormode"] = json!("rgb");
            Ok(state)
        });
        assert!(bridge(transport).sync().await.is_err());
    }

    #[tokio::test]
    async fn test_existing_username_is_checked() {
        let transport = MockTransport::new(bridge_responder);
        let bridge = unauthenticated(transport.clone());

        assert!(bridge.authenticate_with(Some(USERNAME), false).await.unwrap());
        assert!(bridge.is_authenticated());
        assert_eq!(bridge.username().as_deref(), Some(USERNAME));

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, Method::Get);

        // Already authenticated with the same username: nothing to do.
        assert!(bridge.authenticate(false).await.unwrap());
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_authenticated_handle_is_kept() {
        let (bridge, transport) = synced_bridge().await;
        let other = "bbbbbbbbbbbbbbbbbbbbbb";
        transport.respond_with(move |method, path, body| match method {
            Method::Post => Ok(link_button()),
            _ if path.starts_with(&format!("api/{other}")) => Ok(unauthorized()),
            _ => bridge_responder(method, path, body),
        });

        assert!(bridge.authenticate_with(None, false).await.unwrap());
        assert!(bridge.authenticate_with(Some(other), true).await.unwrap());

        assert_eq!(bridge.auth_state(), AuthState::Authenticated);
        assert_eq!(bridge.username().as_deref(), Some(USERNAME));
        assert!(transport.writes().is_empty());
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(transport.requests()[0].path, format!("api/{other}"));
        assert_eq!(bridge.light_ids().await.unwrap(), vec![1, 2, 5]);
    }

    #[tokio::test]
    async fn test_requests_require_authentication() {
        let transport = MockTransport::new(bridge_responder);
        let bridge = Bridge::with_transport(transport.clone(), Some(USERNAME), SessionConfig::default()).unwrap();

        assert_eq!(bridge.set_name("Upstairs").await.unwrap_err(), Error::NotAuthenticated);
        assert_eq!(bridge.search_for_new_lights().await.unwrap_err(), Error::NotAuthenticated);
        assert_eq!(bridge.new_lights().await.unwrap_err(), Error::NotAuthenticated);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_changed_username_blocks_writes() {
        let (bridge, transport) = synced_bridge().await;
        let desk = bridge.light(1).await.unwrap().unwrap();

        bridge.set_username("bbbbbbbbbbbbbbbbbbbbbb").unwrap();
        assert!(!bridge.is_authenticated());

        assert_eq!(desk.set_on(false).await.unwrap_err(), Error::NotAuthenticated);
        assert_eq!(desk.sync().await.unwrap_err(), Error::NotAuthenticated);
        assert_eq!(bridge.set_name("Upstairs").await.unwrap_err(), Error::NotAuthenticated);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_first_write_runs_initial_sync() {
        let transport = MockTransport::new(bridge_responder);
        let bridge = bridge(transport.clone());

        bridge.search_for_new_lights().await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].path, format!("api/{USERNAME}"));
        assert_eq!(requests[1].method, Method::Post);
        assert_eq!(requests[1].path, format!("api/{USERNAME}/lights"));
    }

    #[tokio::test]
    async fn test_invalid_username_sends_nothing() {
        let transport = MockTransport::new(bridge_responder);
        let bridge = unauthenticated(transport.clone());

        assert!(bridge.authenticate_with(Some("short"), true).await.unwrap_err().is_validation());
        assert!(bridge.set_username("has a space in it").unwrap_err().is_validation());
        assert!(transport.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_grant_after_link_button() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        let transport = MockTransport::new(move |method, path, body| match (method, path) {
            (Method::Post, "api") => {
                if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                    Ok(link_button())
                } else {
                    Ok(json!([{"success": {"username": USERNAME}}]))
                }
            }
            _ if counter.load(Ordering::SeqCst) < 4 => Ok(unauthorized()),
            _ => bridge_responder(method, path, body),
        });
        let bridge = unauthenticated(transport.clone());

        assert!(bridge.authenticate_with(Some(USERNAME), true).await.unwrap());
        assert!(bridge.is_authenticated());
        assert_eq!(bridge.auth_state(), AuthState::Authenticated);
        assert_eq!(polls.load(Ordering::SeqCst), 4);

        let posts: Vec<_> = transport.writes();
        assert_eq!(
            posts[0].body,
            Some(json!({"devicetype": "hue-lights-rs#client", "username": USERNAME}))
        );
        // Username check, four polls, then the initial sync.
        assert_eq!(transport.requests().len(), 6);
        assert_eq!(bridge.light_ids().await.unwrap(), vec![1, 2, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grant_wait_times_out() {
        let transport = MockTransport::new(|_, _, _| Ok(link_button()));
        let bridge = unauthenticated(transport.clone());

        let started = Instant::now();
        assert!(!bridge.authenticate(true).await.unwrap());
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(bridge.auth_state(), AuthState::Failed);
        assert!(transport.requests().len() > 25);
    }

    #[tokio::test]
    async fn test_other_errors_stop_polling() {
        let transport = MockTransport::new(|_, _, _| {
            Ok(json!([{"error": {"type": 7, "address": "/username", "description": "invalid value"}}]))
        });
        let bridge = unauthenticated(transport.clone());

        assert!(!bridge.authenticate(true).await.unwrap());
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(bridge.auth_state(), AuthState::Failed);
    }

    #[tokio::test]
    async fn test_no_wait_polls_once() {
        let transport = MockTransport::new(|_, _, _| Ok(link_button()));
        let bridge = unauthenticated(transport.clone());

        assert!(!bridge.authenticate(false).await.unwrap());
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(transport.requests()[0].body, Some(json!({"devicetype": "hue-lights-rs#client"})));
    }

    #[tokio::test]
    async fn test_set_name() {
        let (bridge, transport) = synced_bridge().await;

        assert!(bridge.set_name(" abc ").await.unwrap_err().is_validation());
        assert!(bridge.set_name(&"n".repeat(17)).await.unwrap_err().is_validation());
        assert!(transport.requests().is_empty());

        bridge.set_name("  Upstairs ").await.unwrap();
        assert_eq!(transport.requests()[0].path, format!("api/{USERNAME}/config"));
        assert_eq!(transport.requests()[0].body, Some(json!({"name": "Upstairs"})));
        assert_eq!(bridge.name().await.unwrap(), "Upstairs");
    }

    #[tokio::test]
    async fn test_new_lights() {
        let (bridge, transport) = synced_bridge().await;
        transport.respond_with(|method, path, body| {
            if path.ends_with("lights/new") {
                return Ok(json!({"lastscan": "active", "5": {"name": "Hall"}}));
            }
            bridge_responder(method, path, body)
        });

        bridge.search_for_new_lights().await.unwrap();
        assert_eq!(bridge.new_lights().await.unwrap(), vec![5]);
        assert!(bridge.is_scan_active());
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_virtual_group_registry() {
        let (bridge, _) = synced_bridge().await;

        let first = bridge.create_virtual_group(3, "Evening").unwrap();
        assert!(bridge.create_virtual_group(3, "Again").unwrap_err().is_validation());
        bridge.create_virtual_group(1, "Morning").unwrap();

        assert_eq!(bridge.virtual_group_ids(), vec![1, 3]);
        assert!(Arc::ptr_eq(&bridge.virtual_group(3).unwrap(), &first));
        assert_eq!(bridge.virtual_groups()[0].name(), "Morning");
    }

    #[tokio::test]
    async fn test_display() {
        let transport = MockTransport::new(bridge_responder);
        let bridge = bridge(transport);
        assert_eq!(bridge.to_string(), "<Unsynced Hue Bridge>@<no address>");

        bridge.sync().await.unwrap();
        assert_eq!(bridge.to_string(), "Living room bridge@<no address>");
    }
}
