//! Batched state changes scoped to a calling context.
//!
//! A transaction collects every setter call made on one object into a single
//! pending [`StatePayload`] and sends it as one request when the transaction
//! closes. Pending payloads are keyed by [`ContextId`], so concurrent tasks
//! working on the same light never see each other's changes. Each
//! top-level transaction gets a fresh context; transactions opened from
//! inside a transaction body share it.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::{debug, warn};

use crate::errors::Error;
use crate::payload::StatePayload;
use crate::runtime::BoxFuture;

type Result<T> = std::result::Result<T, Error>;

tokio::task_local! {
    static CONTEXT: ContextId;
}

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

/// Identity of one logical calling context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        ContextId(NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// The context the current task is running in, if any transaction opened one.
    pub fn current() -> Option<Self> {
        CONTEXT.try_with(|ctx| *ctx).ok()
    }
}

/// Run `f` inside the current context, creating a new one if there is none.
async fn with_context<F, Fut>(f: F) -> Fut::Output
where
    F: FnOnce(ContextId) -> Fut,
    Fut: Future,
{
    match ContextId::current() {
        Some(ctx) => f(ctx).await,
        None => {
            let ctx = ContextId::next();
            CONTEXT.scope(ctx, f(ctx)).await
        }
    }
}

/// Pending transaction payloads of one object, one per context.
#[derive(Debug, Default)]
pub(crate) struct PendingChanges(DashMap<ContextId, StatePayload>);

impl PendingChanges {
    fn open(&self, ctx: ContextId, seed: StatePayload, owner: &dyn Display) -> Result<()> {
        match self.0.entry(ctx) {
            Entry::Occupied(_) => Err(Error::TransactionOpen(owner.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(seed);
                Ok(())
            }
        }
    }

    /// Merge `change` into the payload pending in the current context.
    ///
    /// A transition time given when the transaction was opened is kept.
    /// Returns false when no transaction is open here; the caller must send the change itself.
    pub fn stage(&self, change: &StatePayload) -> bool {
        let Some(ctx) = ContextId::current() else {
            return false;
        };
        match self.0.get_mut(&ctx) {
            Some(mut pending) => {
                let seeded = pending.transition_time;
                pending.merge(change);
                if seeded.is_some() {
                    pending.transition_time = seeded;
                }
                true
            }
            None => false,
        }
    }

    fn discard(&self, ctx: ContextId) {
        if let Some(mut pending) = self.0.get_mut(&ctx) {
            *pending = StatePayload::new();
        }
    }

    fn close(&self, ctx: ContextId) -> Option<StatePayload> {
        self.0.remove(&ctx).map(|(_, payload)| payload)
    }

    #[cfg(test)]
    pub fn is_open(&self) -> bool {
        ContextId::current().is_some_and(|ctx| self.0.contains_key(&ctx))
    }
}

/// An object whose state changes can be batched.
pub(crate) trait Transactional: Display + Send + Sync {
    fn pending(&self) -> &PendingChanges;

    /// Send a batched payload and update the cache once the bridge confirms it.
    fn commit(&self, payload: StatePayload) -> BoxFuture<'_, Result<()>>;

    /// Reload the whole object from the bridge.
    fn resync(&self) -> BoxFuture<'_, Result<()>>;
}

/// Open a transaction on `target`, run `changes`, then commit what they staged.
///
/// If `changes` fails, its staged payload is dropped and `target` is resynced
/// from the bridge; the caller sees the original error unless the resync
/// fails too. A failed commit triggers the same resync.
pub(crate) async fn run<T, F, Fut>(
    target: &T,
    transition_time: Option<u16>,
    changes: F,
) -> Result<()>
where
    T: Transactional + ?Sized,
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = Result<()>> + Send,
{
    with_context(|ctx| async move {
        let mut seed = StatePayload::new();
        if let Some(deciseconds) = transition_time {
            seed.transition_time(deciseconds);
        }
        target.pending().open(ctx, seed, &target)?;
        debug!("transaction opened on {target}");

        let outcome = changes().await;
        if outcome.is_err() {
            target.pending().discard(ctx);
        }

        let committed = match target.pending().close(ctx) {
            Some(payload) if payload.has_state() => target.commit(payload).await,
            _ => Ok(()),
        };

        match outcome.and(committed) {
            Ok(()) => Ok(()),
            Err(err) => {
                debug!("transaction on {target} failed, resyncing: {err}");
                match target.resync().await {
                    Ok(()) => Err(err),
                    Err(resync_err) => {
                        warn!("resync of {target} after failed transaction failed: {resync_err}");
                        Err(resync_err)
                    }
                }
            }
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;
    use std::sync::Mutex;

    use crate::types::{Brightness, Hue};

    #[derive(Default)]
    struct Recorder {
        pending: PendingChanges,
        commits: Mutex<Vec<StatePayload>>,
        resyncs: Mutex<u32>,
        fail_commit: bool,
        fail_resync: bool,
    }

    impl fmt::Display for Recorder {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "recorder")
        }
    }

    impl Transactional for Recorder {
        fn pending(&self) -> &PendingChanges {
            &self.pending
        }

        fn commit(&self, payload: StatePayload) -> BoxFuture<'_, Result<()>> {
            self.commits.lock().unwrap().push(payload);
            let fail = self.fail_commit;
            Box::pin(async move {
                if fail {
                    Err(Error::protocol("commit refused"))
                } else {
                    Ok(())
                }
            })
        }

        fn resync(&self) -> BoxFuture<'_, Result<()>> {
            *self.resyncs.lock().unwrap() += 1;
            let fail = self.fail_resync;
            Box::pin(async move {
                if fail {
                    Err(Error::protocol("bridge unreachable"))
                } else {
                    Ok(())
                }
            })
        }
    }

    #[tokio::test]
    async fn test_changes_are_batched() {
        let recorder = Recorder::default();
        run(&recorder, Some(5), || async {
            assert!(recorder.pending.stage(&StatePayload::from(&Hue::RED)));
            assert!(recorder.pending.stage(&StatePayload::from(&Brightness::create(10).unwrap())));
            Ok(())
        })
        .await
        .unwrap();

        let commits = recorder.commits.lock().unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(
            commits[0].to_json().unwrap(),
            serde_json::json!({"hue": 0, "bri": 10, "transitiontime": 5})
        );
        assert_eq!(*recorder.resyncs.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_nothing_staged_outside_transaction() {
        let recorder = Recorder::default();
        assert!(!recorder.pending.stage(&StatePayload::from(&Hue::RED)));
    }

    #[tokio::test]
    async fn test_nested_on_same_object_is_rejected() {
        let recorder = Recorder::default();
        let result = run(&recorder, None, || async {
            run(&recorder, None, || async { Ok(()) }).await
        })
        .await;

        assert_eq!(result, Err(Error::TransactionOpen("recorder".to_string())));
        assert!(recorder.commits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_body_discards_and_resyncs() {
        let recorder = Recorder::default();
        let result = run(&recorder, Some(3), || async {
            recorder.pending.stage(&StatePayload::from(&Hue::BLUE));
            Err(Error::validation("hue", "boom"))
        })
        .await;

        assert_eq!(result, Err(Error::validation("hue", "boom")));
        assert!(recorder.commits.lock().unwrap().is_empty());
        assert_eq!(*recorder.resyncs.lock().unwrap(), 1);
        assert!(!recorder.pending.is_open());
    }

    #[tokio::test]
    async fn test_failed_commit_resyncs() {
        let recorder = Recorder {
            fail_commit: true,
            ..Default::default()
        };
        let result = run(&recorder, None, || async {
            recorder.pending.stage(&StatePayload::from(&Hue::GREEN));
            Ok(())
        })
        .await;

        assert_eq!(result, Err(Error::protocol("commit refused")));
        assert_eq!(*recorder.resyncs.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_resync_error_replaces_commit_error() {
        let recorder = Recorder {
            fail_commit: true,
            fail_resync: true,
            ..Default::default()
        };
        let result = run(&recorder, None, || async {
            recorder.pending.stage(&StatePayload::from(&Hue::GREEN));
            Ok(())
        })
        .await;

        assert_eq!(result, Err(Error::protocol("bridge unreachable")));
        assert_eq!(recorder.commits.lock().unwrap().len(), 1);
        assert_eq!(*recorder.resyncs.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_opening_transition_time_wins() {
        let recorder = Recorder::default();
        run(&recorder, Some(4), || async {
            let mut change = StatePayload::from(&Hue::RED);
            change.transition_time(9);
            recorder.pending.stage(&change);
            Ok(())
        })
        .await
        .unwrap();

        let commits = recorder.commits.lock().unwrap();
        assert_eq!(commits[0].to_json().unwrap(), serde_json::json!({"hue": 0, "transitiontime": 4}));
    }

    #[tokio::test]
    async fn test_contexts_are_isolated() {
        let recorder = std::sync::Arc::new(Recorder::default());
        let other = recorder.clone();
        run(&*recorder, None, || async move {
            // A separate task has no transaction of its own.
            let staged = tokio::spawn(async move { other.pending.stage(&StatePayload::from(&Hue::RED)) })
                .await
                .unwrap();
            assert!(!staged);
            Ok(())
        })
        .await
        .unwrap();
        assert!(recorder.commits.lock().unwrap().is_empty());
    }
}
