//! Revision-keyed store (C2, §4.2).
//!
//! A single `RwLock` serializes the whole store, generalized from
//! `agent/src/util/device_plugin_service.rs`'s `InstanceMap = Arc<Mutex<
//! HashMap<String, InstanceInfo>>>` pattern: one lock guarding one map of
//! maps, no remote I/O ever taking place while it is held. `RwLock` instead
//! of `Mutex` because the read paths (`GetPodByKey`, `GetPods`) vastly
//! outnumber the write paths, and `spec.md` §5 calls for a
//! "readers-writer lock" explicitly.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use log::trace;

use crate::model::{BizKey, BizState, BizStatusData, Pod, PodKey};

#[derive(Default)]
struct StoreState {
    pods: HashMap<PodKey, Pod>,
    biz_revisions: HashMap<BizKey, i64>,
    /// Last observed `(state, change_time)` per biz key, used by
    /// `check_container_status_need_sync` (§4.2).
    last_biz_observations: HashMap<BizKey, (BizState, DateTime<Utc>)>,
}

/// The in-memory, process-resident store of observed Pods and biz
/// revisions (§3). Safe to share across tasks via `Arc<Store>`.
pub struct Store {
    state: RwLock<StoreState>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Store {
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Upserts under pod-key. The caller is assumed to own a value they no
    /// longer need after this call — the store keeps its own copy.
    pub fn put_pod(&self, pod: Pod) {
        let key = pod.key();
        let mut state = self.state.write().expect("store lock poisoned");
        trace!("put_pod key={key}");
        state.pods.insert(key, pod);
    }

    /// Idempotent: deleting an absent key is a no-op (I3).
    pub fn delete_pod(&self, key: &str) {
        let mut state = self.state.write().expect("store lock poisoned");
        trace!("delete_pod key={key}");
        state.pods.remove(key);
    }

    /// Returns a clone of the stored Pod, if any. The store retains the
    /// authoritative copy; mutating the returned value never affects what
    /// is stored — callers that want to change it must `put_pod` again.
    pub fn get_pod_by_key(&self, key: &str) -> Option<Pod> {
        let state = self.state.read().expect("store lock poisoned");
        state.pods.get(key).cloned()
    }

    /// Order is not guaranteed (§4.2); callers sort by creation timestamp
    /// when ordering matters.
    pub fn get_pods(&self) -> Vec<Pod> {
        let state = self.state.read().expect("store lock poisoned");
        state.pods.values().cloned().collect()
    }

    /// Unconditional write (I1: last-writer-wins, serialized by the lock).
    pub fn update_biz_revision(&self, key: &str, rev: i64) {
        let mut state = self.state.write().expect("store lock poisoned");
        trace!("update_biz_revision key={key} rev={rev}");
        state.biz_revisions.insert(key.to_string(), rev);
    }

    /// Monotonic bump: writes `max(current, rev)`. This is the helper
    /// every caller that wants monotonicity (§4.2's note) should use
    /// instead of `update_biz_revision` directly.
    pub fn bump_biz_revision(&self, key: &str, rev: i64) {
        let mut state = self.state.write().expect("store lock poisoned");
        let current = state.biz_revisions.get(key).copied().unwrap_or(0);
        let next = current.max(rev);
        trace!("bump_biz_revision key={key} current={current} candidate={rev} next={next}");
        state.biz_revisions.insert(key.to_string(), next);
    }

    /// 0 if absent.
    pub fn get_biz_revision(&self, key: &str) -> i64 {
        let state = self.state.read().expect("store lock poisoned");
        state.biz_revisions.get(key).copied().unwrap_or(0)
    }

    /// The last observed `BizState` for a biz key, if any status has ever
    /// arrived for it. Used by the install/uninstall handlers (§4.4) in
    /// place of a synchronous "query current biz state" RPC — C1 only
    /// offers an asynchronous `query_all_biz_status_data`, so the
    /// handlers consult what C2 already knows instead of inventing a
    /// blocking remote call that has no contract.
    pub fn get_last_biz_state(&self, key: &str) -> Option<BizState> {
        let state = self.state.read().expect("store lock poisoned");
        state.last_biz_observations.get(key).map(|(s, _)| *s)
    }

    /// True iff no entry exists OR `rev >= current` (P2).
    pub fn should_delete_biz(&self, key: &str, rev: i64) -> bool {
        let state = self.state.read().expect("store lock poisoned");
        match state.biz_revisions.get(key) {
            None => true,
            Some(&current) => rev >= current,
        }
    }

    /// True iff the observed status differs from the last synced status
    /// for this biz key — state changed, or the change-time advanced by at
    /// least a second. §9 preserves the upstream quirk of comparing only
    /// whole seconds (`DateTime::timestamp`), not the full sub-second
    /// timestamp.
    ///
    /// As a side effect, when the observation carries a revision, bumps
    /// the biz revision for `status.key` (monotonically), and the
    /// observation is recorded as the new "last synced" baseline.
    pub fn check_container_status_need_sync(&self, _pod: &Pod, status: &BizStatusData) -> bool {
        if let Some(rev) = status.revision {
            self.bump_biz_revision(&status.key, rev);
        }

        let mut state = self.state.write().expect("store lock poisoned");
        let needs_sync = match state.last_biz_observations.get(&status.key) {
            None => true,
            Some((last_state, last_time)) => {
                *last_state != status.state || status.change_time.timestamp() != last_time.timestamp()
            }
        };
        state
            .last_biz_observations
            .insert(status.key.clone(), (status.state, status.change_time));
        needs_sync
    }
}
