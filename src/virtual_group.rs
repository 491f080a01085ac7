//! Client-side composites of lights, groups and other virtual groups.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;

use crate::control::{LightControl, LightHandle};
use crate::errors::Error;
use crate::light::Light;
use crate::payload::StatePayload;
use crate::runtime::BoxFuture;
use crate::transaction::{self, Transactional};

type Result<T> = std::result::Result<T, Error>;

/// Serializes membership additions across all virtual groups, so that two
/// concurrent additions can not close a cycle between them.
static MEMBERSHIP: Mutex<()> = Mutex::new(());

type Changes<'a> = Box<dyn FnOnce() -> BoxFuture<'a, Result<()>> + Send + 'a>;

#[derive(Debug)]
struct VirtualCache {
    name: String,
    transition_time: Option<u16>,
    members: Vec<LightHandle>,
}

/// A group that exists only in this process.
///
/// Members may be lights, bridge groups or other virtual groups, from any
/// bridge, kept in insertion order without duplicates. Membership never
/// forms a cycle; [`VirtualGroup::add`] refuses any member that would make
/// this group reachable from itself.
#[derive(Debug)]
pub struct VirtualGroup {
    id: u32,
    cache: Mutex<VirtualCache>,
}

impl VirtualGroup {
    pub(crate) fn new(id: u32, name: &str) -> Self {
        VirtualGroup {
            id,
            cache: Mutex::new(VirtualCache {
                name: name.to_string(),
                transition_time: None,
                members: Vec::new(),
            }),
        }
    }

    fn cache(&self) -> MutexGuard<'_, VirtualCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn address(&self) -> usize {
        self as *const Self as *const () as usize
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> String {
        self.cache().name.clone()
    }

    pub fn set_name(&self, name: &str) {
        self.cache().name = name.to_string();
    }

    /// Direct members in insertion order.
    pub fn members(&self) -> Vec<LightHandle> {
        self.cache().members.clone()
    }

    pub fn contains(&self, member: &LightHandle) -> bool {
        self.cache().members.iter().any(|m| m.ptr_eq(member))
    }

    /// Add a member. Returns false if it already was a direct member.
    ///
    /// Fails with a validation error if `member` is this group or contains it
    /// at any depth.
    pub fn add(&self, member: impl Into<LightHandle>) -> Result<bool> {
        let member = member.into();
        if member.address() == self.address() {
            return Err(Error::validation(
                "member",
                "a virtual group cannot contain itself",
            ));
        }
        let _membership = MEMBERSHIP.lock().unwrap_or_else(PoisonError::into_inner);
        if reaches(&member, self.address()) {
            return Err(Error::validation(
                "member",
                format!("adding {member} would create a cycle"),
            ));
        }

        let mut cache = self.cache();
        if cache.members.iter().any(|m| m.ptr_eq(&member)) {
            return Ok(false);
        }
        cache.members.push(member);
        Ok(true)
    }

    /// Remove a direct member. Returns false if it was not one.
    pub fn remove(&self, member: &LightHandle) -> bool {
        let mut cache = self.cache();
        let before = cache.members.len();
        cache.members.retain(|m| !m.ptr_eq(member));
        cache.members.len() != before
    }

    /// Every light reachable through the members, first-seen order, without duplicates.
    pub fn lights(&self) -> Vec<Arc<Light>> {
        let mut seen = HashSet::new();
        let mut lights = Vec::new();
        for member in self.members() {
            let found = match member {
                LightHandle::Light(light) => vec![light],
                LightHandle::Group(group) => group.lights(),
                LightHandle::Virtual(nested) => nested.lights(),
            };
            for light in found {
                if seen.insert(Arc::as_ptr(&light)) {
                    lights.push(light);
                }
            }
        }
        lights
    }

    /// The first reachable light with this id.
    pub fn light(&self, id: u32) -> Option<Arc<Light>> {
        self.lights().into_iter().find(|l| l.id() == id)
    }

    /// All reachable lights with this id; lights of different bridges may share one.
    pub fn lights_with_id(&self, id: u32) -> Vec<Arc<Light>> {
        self.lights().into_iter().filter(|l| l.id() == id).collect()
    }

    pub fn light_ids(&self) -> Vec<u32> {
        let ids: BTreeSet<u32> = self.lights().iter().map(|l| l.id()).collect();
        ids.into_iter().collect()
    }

    /// Lights and bridge groups reachable through nested virtual groups,
    /// depth-first, each object once.
    fn real_members(&self) -> Vec<Arc<dyn Transactional>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        self.collect_real(&mut seen, &mut out);
        out
    }

    fn collect_real(&self, seen: &mut HashSet<usize>, out: &mut Vec<Arc<dyn Transactional>>) {
        for member in self.members() {
            if !seen.insert(member.address()) {
                continue;
            }
            match member {
                LightHandle::Light(light) => out.push(light),
                LightHandle::Group(group) => out.push(group),
                LightHandle::Virtual(nested) => nested.collect_real(seen, out),
            }
        }
    }

    /// Open a transaction on every real member, then run `changes`.
    ///
    /// Transactions are opened in reverse visiting order so that they commit
    /// in visiting order, the same order plain setter calls would reach the
    /// bridge in.
    pub async fn transaction<'a, F, Fut>(
        &'a self,
        transition_time: Option<u16>,
        changes: F,
    ) -> Result<()>
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = Result<()>> + Send + 'a,
    {
        let mut order = self.real_members();
        order.reverse();
        debug!("{self}: opening {} nested transactions", order.len());

        let changes: Changes<'a> = Box::new(move || -> BoxFuture<'a, Result<()>> { Box::pin(changes()) });
        open_nested(order.into(), transition_time, changes).await
    }
}

fn open_nested<'a>(
    mut remaining: VecDeque<Arc<dyn Transactional>>,
    transition_time: Option<u16>,
    changes: Changes<'a>,
) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        match remaining.pop_front() {
            None => changes().await,
            Some(next) => {
                transaction::run(&*next, transition_time, move || {
                    open_nested(remaining, transition_time, changes)
                })
                .await
            }
        }
    })
}

/// True if `target` is reachable from `start` through virtual group membership.
fn reaches(start: &LightHandle, target: usize) -> bool {
    let mut visited = HashSet::new();
    let mut stack = vec![start.clone()];
    while let Some(handle) = stack.pop() {
        if !visited.insert(handle.address()) {
            continue;
        }
        if let LightHandle::Virtual(group) = &handle {
            if handle.address() == target {
                return true;
            }
            stack.extend(group.members());
        }
    }
    false
}

impl LightControl for VirtualGroup {
    fn id(&self) -> u32 {
        self.id
    }

    fn transition_time(&self) -> Option<u16> {
        self.cache().transition_time
    }

    fn set_transition_time(&self, deciseconds: Option<u16>) {
        self.cache().transition_time = deciseconds;
    }

    /// Forward the change to each direct member in turn; each sends its own request.
    fn set_state(&self, payload: StatePayload) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut payload = payload;
            if payload.transition_time.is_none()
                && let Some(deciseconds) = LightControl::transition_time(self)
            {
                payload.transition_time(deciseconds);
            }
            for member in self.members() {
                member.set_state(payload.clone()).await?;
            }
            Ok(())
        })
    }
}

impl fmt::Display for VirtualGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (name, members) = {
            let cache = self.cache();
            (cache.name.clone(), cache.members.clone())
        };
        write!(f, "Virtual group #{} \"{name}\" [", self.id)?;
        for (i, member) in members.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{member}")?;
        }
        write!(f, "]")
    }
}
