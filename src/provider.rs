//! Provider façade (C5, §4.5).
//!
//! Orchestrates C2-C4 and invokes C1. Shaped after
//! `controller/src/util/instance_action.rs` (store + remote calls +
//! revision bookkeeping, one public entry point per reconciler-driven
//! action) and `controller/src/util/mod.rs`'s `ControllerError` for the
//! error boundary.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use chrono::Utc;
use log::{debug, error, trace, warn};
use tokio_util::sync::CancellationToken;

use crate::error::{ProviderError, Result};
use crate::metrics::{INSTALL_DROPPED_NOT_ACTIVATED, INSTALL_RESULT, STALE_REVISION_REJECTED, UNINSTALL_RESULT};
use crate::model::{BizKey, BizStatusData, Container, Pod, PodKey};
use crate::queue::{FixedDelayPolicy, QueueHandler, RateLimitingQueue};
use crate::status::{build_pod_status, container_status_from_biz};
use crate::store::Store;
use crate::tunnel::{Tunnel, TunnelCallback, TunnelCallbackSink};

/// The external collaborator this façade consults only during
/// `UpdatePod`'s stop-then-start termination wait (§4.5, §5). A real
/// implementation would be backed by the Kubernetes client the controller
/// runtime already holds — out of scope here (§1), referenced only by this
/// narrow contract.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait UpstreamPods: Send + Sync {
    /// True once the named container in the named Pod shows as
    /// terminated in the upstream cluster.
    async fn is_container_terminated(
        &self,
        pod_key: &str,
        container_name: &str,
    ) -> std::result::Result<bool, UpstreamReadError>;
}

#[derive(Debug, thiserror::Error)]
pub enum UpstreamReadError {
    #[error("pod not found upstream")]
    NotFound,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Upstream callback informing the host that a Pod snapshot changed
/// (§4.5's `NotifyPods`).
pub type NotifySink = Arc<dyn Fn(Pod) + Send + Sync>;

/// Shell stats response for `GetStatsSummary` (§6, SPEC_FULL §4.5): lists
/// the pods this provider knows about with no resource counters, since
/// node-level stats are a non-goal beyond this stub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSummary {
    pub pods: Vec<PodKey>,
}

#[derive(Clone)]
struct PendingOp {
    pod_key: PodKey,
    container: Container,
}

struct InstallHandler {
    store: Arc<Store>,
    tunnel: Arc<dyn Tunnel>,
    node_name: String,
    pending: Arc<Mutex<HashMap<BizKey, PendingOp>>>,
}

#[async_trait]
impl QueueHandler for InstallHandler {
    /// §4.4's install handler outcome table.
    async fn handle(&self, key: &str) -> anyhow::Result<()> {
        let op = { self.pending.lock().unwrap().get(key).cloned() };
        let Some(op) = op else {
            warn!("install handler key={key} has no pending descriptor, dropping");
            return Ok(());
        };

        if self.store.get_pod_by_key(&op.pod_key).is_none() {
            error!(
                "install handler key={key} pod_key={} missing from store, dropping (reconciler bug)",
                op.pod_key
            );
            return Ok(());
        }

        match self.store.get_last_biz_state(key) {
            Some(crate::model::BizState::Activated) => {
                trace!("install handler key={key} already ACTIVATED, nothing to do");
                Ok(())
            }
            Some(crate::model::BizState::Resolved) => {
                trace!("install handler key={key} already RESOLVED, install in flight");
                Ok(())
            }
            Some(crate::model::BizState::Deactivated) | None => {
                let result = self.tunnel.start_biz(&self.node_name, &op.pod_key, &op.container).await;
                let label = if result.is_ok() { "success" } else { "failure" };
                INSTALL_RESULT.with_label_values(&[label]).inc();
                result
            }
            Some(other) => {
                warn!(
                    "install handler key={key} state={other:?} is BizInstalledButNotActivated, dropping (no retry policy, §9)"
                );
                INSTALL_DROPPED_NOT_ACTIVATED.inc();
                Ok(())
            }
        }
    }
}

struct UninstallHandler {
    store: Arc<Store>,
    tunnel: Arc<dyn Tunnel>,
    node_name: String,
    pending: Arc<Mutex<HashMap<BizKey, PendingOp>>>,
}

#[async_trait]
impl QueueHandler for UninstallHandler {
    /// §4.4's uninstall handler.
    async fn handle(&self, key: &str) -> anyhow::Result<()> {
        let op = { self.pending.lock().unwrap().get(key).cloned() };
        let Some(op) = op else {
            warn!("uninstall handler key={key} has no pending descriptor, dropping");
            return Ok(());
        };

        match self.store.get_last_biz_state(key) {
            Some(_) => {
                let result = self.tunnel.stop_biz(&self.node_name, &op.pod_key, &op.container).await;
                let label = if result.is_ok() { "success" } else { "failure" };
                UNINSTALL_RESULT.with_label_values(&[label]).inc();
                result
            }
            None => {
                trace!("uninstall handler key={key} already absent remotely, nothing to do");
                Ok(())
            }
        }
    }
}

/// The provider façade (C5): implements the virtual-kubelet provider
/// contract and the pod-status notifier, orchestrating C2-C4 and C1.
pub struct BizProvider {
    store: Arc<Store>,
    tunnel: Arc<dyn Tunnel>,
    upstream: Arc<dyn UpstreamPods>,
    node_name: String,
    local_ip: Option<String>,
    install_queue: RateLimitingQueue,
    uninstall_queue: RateLimitingQueue,
    pending_install: Arc<Mutex<HashMap<BizKey, PendingOp>>>,
    pending_uninstall: Arc<Mutex<HashMap<BizKey, PendingOp>>>,
    notify: Arc<Mutex<Option<NotifySink>>>,
}

const TERMINATION_POLL_INTERVAL: Duration = Duration::from_secs(1);
const TERMINATION_POLL_DEADLINE: Duration = Duration::from_secs(60);

/// §4.3's biz-status-to-pod-status translation, shared by
/// `sync_biz_status_to_kube` and the callback sink `BizProvider::new`
/// registers with the tunnel — both need it without holding a `&self`.
fn apply_biz_status(
    store: &Store,
    local_ip: Option<&str>,
    notify: &Mutex<Option<NotifySink>>,
    status: BizStatusData,
) {
    let Some(mut pod) = store.get_pod_by_key(&status.pod_key) else {
        warn!(
            "apply_biz_status: no pod stored for pod_key={} (biz_key={})",
            status.pod_key, status.key
        );
        return;
    };

    if !store.check_container_status_need_sync(&pod, &status) {
        trace!("apply_biz_status: biz_key={} unchanged, skipping resync", status.key);
        return;
    }

    let new_container_status = container_status_from_biz(&status.name, Some(&status));
    let mut container_statuses = pod
        .status
        .as_ref()
        .map(|s| s.container_statuses.clone())
        .unwrap_or_default();
    container_statuses.retain(|cs| cs.name != new_container_status.name);
    container_statuses.push(new_container_status);

    let new_status = build_pod_status(
        &pod,
        container_statuses,
        local_ip,
        local_ip.into_iter().map(str::to_string).collect(),
    );
    pod.status = Some(new_status);
    store.put_pod(pod.clone());
    if let Some(cb) = notify.lock().unwrap().as_ref() {
        cb(pod);
    }
}

impl BizProvider {
    pub fn new(
        tunnel: Arc<dyn Tunnel>,
        upstream: Arc<dyn UpstreamPods>,
        node_name: impl Into<String>,
        local_ip: Option<String>,
        cancellation: CancellationToken,
    ) -> Self {
        let store = Arc::new(Store::new());
        let node_name = node_name.into();
        let pending_install = Arc::new(Mutex::new(HashMap::new()));
        let pending_uninstall = Arc::new(Mutex::new(HashMap::new()));

        let install_queue = RateLimitingQueue::start(
            "install",
            Arc::new(InstallHandler {
                store: store.clone(),
                tunnel: tunnel.clone(),
                node_name: node_name.clone(),
                pending: pending_install.clone(),
            }),
            Arc::new(FixedDelayPolicy::default()),
            cancellation.clone(),
        );
        let uninstall_queue = RateLimitingQueue::start(
            "uninstall",
            Arc::new(UninstallHandler {
                store: store.clone(),
                tunnel: tunnel.clone(),
                node_name: node_name.clone(),
                pending: pending_uninstall.clone(),
            }),
            Arc::new(FixedDelayPolicy::default()),
            cancellation,
        );

        let notify: Arc<Mutex<Option<NotifySink>>> = Arc::new(Mutex::new(None));

        // §4.1/§2: register the sink C1 invokes with status observations,
        // so `OnSingleBizStatusArrived`/`OnAllBizStatusArrived` actually
        // feed C3 instead of being reachable only by calling
        // `sync_biz_status_to_kube` directly, as tests do.
        let callback_store = store.clone();
        let callback_local_ip = local_ip.clone();
        let callback_notify = notify.clone();
        let callback_tunnel = tunnel.clone();
        tokio::spawn(async move {
            let sink: TunnelCallbackSink = Arc::new(move |event| match event {
                TunnelCallback::OnSingleBizStatusArrived { status, .. } => {
                    apply_biz_status(&callback_store, callback_local_ip.as_deref(), &callback_notify, status);
                }
                TunnelCallback::OnAllBizStatusArrived { statuses, .. } => {
                    for status in statuses {
                        apply_biz_status(&callback_store, callback_local_ip.as_deref(), &callback_notify, status);
                    }
                }
                TunnelCallback::OnBaseDiscovered { .. } | TunnelCallback::OnBaseStatusArrived { .. } => {
                    // Base/node-level callbacks have no C3 counterpart (§4.3
                    // only translates biz status); nothing to dispatch.
                }
            });
            if let Err(e) = callback_tunnel.register_callback(sink).await {
                error!("failed to register tunnel callback: {e:#}");
            }
        });

        BizProvider {
            store,
            tunnel,
            upstream,
            node_name,
            local_ip,
            install_queue,
            uninstall_queue,
            pending_install,
            pending_uninstall,
            notify,
        }
    }

    /// Registers the upstream callback invoked whenever a Pod snapshot
    /// changes phase/status.
    pub fn notify_pods(&self, cb: NotifySink) {
        *self.notify.lock().unwrap() = Some(cb);
    }

    fn notify_upstream(&self, pod: Pod) {
        if let Some(cb) = self.notify.lock().unwrap().as_ref() {
            cb(pod);
        }
    }

    /// §4.5's pod-revision derivation for a *start* path: the annotation
    /// if present and parseable, else a wall-clock nanosecond value
    /// strictly greater than the biz key's current revision.
    fn derive_start_revision(&self, pod: &Pod, biz_key: &str) -> i64 {
        if let Some(r) = pod.metadata.revision() {
            return r;
        }
        let current = self.store.get_biz_revision(biz_key);
        let now_ns = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
        now_ns.max(current.saturating_add(1))
    }

    /// §4.5's pod-revision derivation for a *stop* path: a missing
    /// annotation defaults to 0, so an unannotated Pod can never tear down
    /// a biz that has ever been claimed with an explicit revision.
    fn derive_stop_revision(&self, pod: &Pod) -> i64 {
        pod.metadata.revision().unwrap_or(0)
    }

    fn enqueue_install(&self, pod_key: &PodKey, container: &Container) {
        let biz_key = self.tunnel.biz_unique_key(container);
        self.pending_install.lock().unwrap().insert(
            biz_key.clone(),
            PendingOp {
                pod_key: pod_key.clone(),
                container: container.clone(),
            },
        );
        self.install_queue.enqueue(biz_key);
    }

    /// The revision guard (§4.4, §4.5): skips the uninstall entirely when
    /// a stale Pod tries to tear down a biz a newer Pod already claimed.
    fn enqueue_uninstall_guarded(&self, pod_key: &PodKey, container: &Container, pod_revision: i64) {
        let biz_key = self.tunnel.biz_unique_key(container);
        if !self.store.should_delete_biz(&biz_key, pod_revision) {
            debug!(
                "skipping uninstall for biz_key={biz_key}: pod_revision={pod_revision} is stale"
            );
            STALE_REVISION_REJECTED.with_label_values(&["uninstall"]).inc();
            return;
        }
        self.pending_uninstall.lock().unwrap().insert(
            biz_key.clone(),
            PendingOp {
                pod_key: pod_key.clone(),
                container: container.clone(),
            },
        );
        self.uninstall_queue.enqueue(biz_key);
    }

    /// Polls upstream every second, up to 60s, for `container_name`'s
    /// termination. Returns whether the pending start should proceed.
    async fn wait_for_termination(&self, pod_key: &str, container_name: &str) -> bool {
        let deadline = tokio::time::Instant::now() + TERMINATION_POLL_DEADLINE;
        loop {
            match self.upstream.is_container_terminated(pod_key, container_name).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(UpstreamReadError::NotFound) => {
                    warn!(
                        "upstream pod {pod_key} not found while waiting for {container_name} to terminate; abandoning pending start"
                    );
                    return false;
                }
                Err(UpstreamReadError::Other(e)) => {
                    warn!("upstream read failed while waiting for {container_name}: {e:#}");
                }
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    "timed out after {TERMINATION_POLL_DEADLINE:?} waiting for {container_name} in {pod_key} to terminate; abandoning pending start"
                );
                return false;
            }
            tokio::time::sleep(TERMINATION_POLL_INTERVAL).await;
        }
    }

    /// CreatePod (§4.5).
    pub fn create_pod(&self, pod: Pod) {
        let pod_key = pod.key();
        self.store.put_pod(pod.clone());
        crate::metrics::POD_COUNT.set(self.store.get_pods().len() as i64);
        for container in &pod.spec.containers {
            let biz_key = self.tunnel.biz_unique_key(container);
            let rev = self.derive_start_revision(&pod, &biz_key);
            self.store.bump_biz_revision(&biz_key, rev);
            self.enqueue_install(&pod_key, container);
        }
        self.notify_upstream(pod);
    }

    /// DeletePod (§4.5).
    pub fn delete_pod(&self, pod: Pod) {
        let pod_key = pod.key();
        self.store.delete_pod(&pod_key);
        crate::metrics::POD_COUNT.set(self.store.get_pods().len() as i64);
        let stop_revision = self.derive_stop_revision(&pod);
        for container in &pod.spec.containers {
            self.enqueue_uninstall_guarded(&pod_key, container, stop_revision);
        }
        self.notify_upstream(pod);
    }

    /// UpdatePod (§4.5). Rejects pods with a deletion timestamp; the
    /// virtual-kubelet framework will call `DeletePod` for those instead.
    pub async fn update_pod(&self, pod: Pod) -> Result<()> {
        if pod.metadata.deletion_timestamp.is_some() {
            return Err(ProviderError::Other(anyhow::anyhow!(
                "UpdatePod called for a pod with a deletion timestamp; DeletePod should handle it"
            )));
        }

        let pod_key = pod.key();
        let previous = self.store.get_pod_by_key(&pod_key);
        let old_containers: HashMap<&str, &Container> = previous
            .as_ref()
            .map(|p| p.spec.containers.iter().map(|c| (c.name.as_str(), c)).collect())
            .unwrap_or_default();
        let new_containers: HashMap<&str, &Container> =
            pod.spec.containers.iter().map(|c| (c.name.as_str(), c)).collect();

        let stop_revision = previous.as_ref().map(|p| self.derive_stop_revision(p)).unwrap_or(0);

        for (name, new_container) in &new_containers {
            match old_containers.get(name) {
                Some(old_container) if *old_container != *new_container => {
                    // Replacement: stop-then-start (§4.5, §8 scenario 2).
                    self.enqueue_uninstall_guarded(&pod_key, old_container, stop_revision);
                    let should_start = self.wait_for_termination(&pod_key, name).await;
                    if should_start {
                        self.enqueue_install(&pod_key, new_container);
                    } else {
                        warn!("abandoning start for container {name} in {pod_key} after termination wait failed");
                    }
                }
                Some(_) => {
                    // Unchanged container: nothing to do.
                }
                None => {
                    // Present only in the new spec: start only.
                    self.enqueue_install(&pod_key, new_container);
                }
            }
        }
        for (name, old_container) in &old_containers {
            if !new_containers.contains_key(name) {
                // Present only in the old spec: stop only.
                self.enqueue_uninstall_guarded(&pod_key, old_container, stop_revision);
            }
        }

        for container in &pod.spec.containers {
            let biz_key = self.tunnel.biz_unique_key(container);
            let rev = self.derive_start_revision(&pod, &biz_key);
            self.store.bump_biz_revision(&biz_key, rev);
        }

        self.store.put_pod(pod.clone());
        self.notify_upstream(pod);
        Ok(())
    }

    pub fn get_pod(&self, pod_key: &str) -> Option<Pod> {
        self.store.get_pod_by_key(pod_key)
    }

    pub fn get_pods(&self) -> Vec<Pod> {
        let mut pods = self.store.get_pods();
        pods.sort_by_key(|p| p.metadata.creation_timestamp);
        pods
    }

    pub fn get_pod_status(&self, pod_key: &str) -> Option<crate::model::PodStatusInfo> {
        self.store.get_pod_by_key(pod_key).and_then(|p| p.status)
    }

    /// Entry point for a single tunnel status callback (§4.5). Also the
    /// target `BizProvider::new` wires `OnSingleBizStatusArrived` into.
    pub fn sync_biz_status_to_kube(&self, status: BizStatusData) {
        apply_biz_status(&self.store, self.local_ip.as_deref(), &self.notify, status);
    }

    /// Entry point for a full tunnel status snapshot (§4.5). Also the
    /// target `BizProvider::new` wires `OnAllBizStatusArrived` into.
    pub fn sync_all_biz_status_to_kube(&self, statuses: Vec<BizStatusData>) {
        for status in statuses {
            self.sync_biz_status_to_kube(status);
        }
    }

    // --- Unsupported / stub surface (§6, SPEC_FULL §4.5 supplements) ---

    pub fn run_in_container(&self) -> Result<()> {
        Err(ProviderError::UnsupportedOperation("RunInContainer"))
    }

    pub fn attach_to_container(&self) -> Result<()> {
        Err(ProviderError::UnsupportedOperation("AttachToContainer"))
    }

    pub fn port_forward(&self) -> Result<()> {
        Err(ProviderError::UnsupportedOperation("PortForward"))
    }

    /// Non-goal beyond a stub (§1, §6): always an empty stream, never a
    /// real tail of Ark container output.
    pub fn get_container_logs(&self) -> impl futures::Stream<Item = std::io::Result<Vec<u8>>> {
        futures::stream::empty()
    }

    /// Non-goal beyond a stub (§1, §6): a summary shell listing the stored
    /// pods, with no per-pod CPU/memory counters.
    pub fn get_stats_summary(&self) -> StatsSummary {
        StatsSummary {
            pods: self.store.get_pods().into_iter().map(|p| p.key()).collect(),
        }
    }

    /// Non-goal beyond a stub (§1, §6): empty metric family list.
    pub fn get_metrics_resource(&self) -> Vec<prometheus::proto::MetricFamily> {
        Vec::new()
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{pod_key, BizState, PodMetadata, PodSpec, ANNOTATION_KEY_OF_POD_REVISION};
    use crate::tunnel::MockTunnel;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn container(name: &str, image_suffix: &str) -> Container {
        Container {
            name: name.to_string(),
            image: format!("registry/{name}:{image_suffix}.jar"),
            version: image_suffix.to_string(),
            env: vec![],
        }
    }

    fn pod_with(namespace: &str, name: &str, revision: Option<i64>, containers: Vec<Container>) -> Pod {
        let mut annotations = BTreeMap::new();
        if let Some(r) = revision {
            annotations.insert(ANNOTATION_KEY_OF_POD_REVISION.to_string(), r.to_string());
        }
        Pod {
            metadata: PodMetadata {
                namespace: namespace.to_string(),
                name: name.to_string(),
                uid: "uid".to_string(),
                creation_timestamp: Utc::now(),
                deletion_timestamp: None,
                labels: BTreeMap::new(),
                annotations,
            },
            spec: PodSpec { containers },
            status: None,
        }
    }

    fn mock_tunnel_with_key_by_name_version() -> MockTunnel {
        let mut mock = MockTunnel::new();
        mock.expect_biz_unique_key()
            .returning(|c| format!("{}:{}", c.name, c.version));
        mock.expect_start_biz().returning(|_, _, _| Ok(()));
        mock.expect_stop_biz().returning(|_, _, _| Ok(()));
        mock.expect_register_callback().returning(|_| Ok(()));
        mock
    }

    /// Reports every container as already terminated, so `update_pod`'s
    /// stop-then-start wait never actually waits in these tests.
    fn never_terminated_upstream() -> MockUpstreamPods {
        let mut mock = MockUpstreamPods::new();
        mock.expect_is_container_terminated().returning(|_, _| Ok(true));
        mock
    }

    fn provider_with(tunnel: MockTunnel, upstream: MockUpstreamPods) -> BizProvider {
        BizProvider::new(
            Arc::new(tunnel),
            Arc::new(upstream),
            "test-node",
            Some("10.0.0.1".to_string()),
            CancellationToken::new(),
        )
    }

    fn mock_tunnel_counting_stop_biz(stop_calls: Arc<AtomicUsize>) -> MockTunnel {
        let mut mock = MockTunnel::new();
        mock.expect_biz_unique_key()
            .returning(|c| format!("{}:{}", c.name, c.version));
        mock.expect_start_biz().returning(|_, _, _| Ok(()));
        mock.expect_stop_biz().returning(move |_, _, _| {
            stop_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        mock.expect_register_callback().returning(|_| Ok(()));
        mock
    }

    /// Records `"stop"`/`"start"` into a shared log as each is invoked, so
    /// a test can assert their relative order instead of just their count.
    fn mock_tunnel_recording_order(call_order: Arc<Mutex<Vec<&'static str>>>) -> MockTunnel {
        let mut mock = MockTunnel::new();
        mock.expect_biz_unique_key()
            .returning(|c| format!("{}:{}", c.name, c.version));
        let stop_order = call_order.clone();
        mock.expect_stop_biz().returning(move |_, _, _| {
            stop_order.lock().unwrap().push("stop");
            Ok(())
        });
        let start_order = call_order.clone();
        mock.expect_start_biz().returning(move |_, _, _| {
            start_order.lock().unwrap().push("start");
            Ok(())
        });
        mock.expect_register_callback().returning(|_| Ok(()));
        mock
    }

    /// Reports not-yet-terminated for `stalls` polls, then terminated —
    /// lets a test exercise `wait_for_termination`'s loop deterministically
    /// instead of racing a real clock.
    fn mock_upstream_terminates_after(stalls: usize) -> MockUpstreamPods {
        let remaining = Arc::new(AtomicUsize::new(stalls));
        let mut mock = MockUpstreamPods::new();
        mock.expect_is_container_terminated().returning(move |_, _| {
            if remaining.load(Ordering::SeqCst) == 0 {
                Ok(true)
            } else {
                remaining.fetch_sub(1, Ordering::SeqCst);
                Ok(false)
            }
        });
        mock
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_2_replacement_is_stop_then_start() {
        let call_order = Arc::new(Mutex::new(Vec::new()));
        let tunnel = mock_tunnel_recording_order(call_order.clone());
        let provider = provider_with(tunnel, mock_upstream_terminates_after(2));

        let created = pod_with("ns", "p", Some(1), vec![container("c", "1.0")]);
        provider.create_pod(created);

        // Let the install queue worker drain the pod's initial install
        // before measuring — only the stop-then-start order within the
        // replacement below is under test.
        tokio::time::sleep(Duration::from_millis(50)).await;
        call_order.lock().unwrap().clear();

        // The old container must be observed as activated before the
        // uninstall handler will actually call `stop_biz` for it (§4.4's
        // uninstall outcome table) — without this, the biz is "unknown
        // remotely" and the handler no-ops instead of tearing it down.
        provider.sync_biz_status_to_kube(BizStatusData {
            key: "c:1.0".to_string(),
            name: "c".to_string(),
            pod_key: pod_key("ns", "p"),
            state: BizState::Activated,
            change_time: Utc::now(),
            reason: None,
            message: None,
            revision: None,
        });

        // Replace the container with a new version (§8 scenario 2):
        // `update_pod` must stop the old one, wait for it to terminate,
        // and only then start the new one.
        let replaced = pod_with("ns", "p", Some(2), vec![container("c", "2.0")]);
        provider.update_pod(replaced).await.unwrap();

        // `update_pod` only enqueues the new install; give the install
        // queue worker a beat to actually drain it before asserting order.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let order = call_order.lock().unwrap().clone();
        assert_eq!(order, vec!["stop", "start"]);
    }

    #[tokio::test]
    async fn scenario_3_concurrent_updates_converge_to_highest_revision() {
        let tunnel = mock_tunnel_with_key_by_name_version();
        let provider = Arc::new(provider_with(tunnel, never_terminated_upstream()));

        let created = pod_with("ns", "p", Some(100), vec![container("c", "1.0")]);
        provider.create_pod(created);

        // Five concurrent updates to the same unchanged container, racing
        // to bump the same biz key's revision (§5's tie-breaking claim):
        // whichever order they interleave in, the highest revision must
        // win.
        let mut handles = Vec::new();
        for revision in 200..205 {
            let provider = provider.clone();
            handles.push(tokio::spawn(async move {
                let pod = pod_with("ns", "p", Some(revision), vec![container("c", "1.0")]);
                provider.update_pod(pod).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(provider.store.get_biz_revision("c:1.0"), 204);
    }

    #[tokio::test]
    async fn scenario_1_revision_wins_on_delete() {
        let stop_calls = Arc::new(AtomicUsize::new(0));
        let tunnel = mock_tunnel_counting_stop_biz(stop_calls.clone());
        let provider = provider_with(tunnel, never_terminated_upstream());

        let created = pod_with("ns", "p", Some(100), vec![container("c", "1.0")]);
        provider.create_pod(created.clone());

        // An update that bumps the revision without touching the
        // container itself: same image/version, so the diff treats it as
        // unchanged and enqueues nothing — only the revision map advances.
        let bumped = pod_with("ns", "p", Some(200), vec![container("c", "1.0")]);
        provider.update_pod(bumped).await.unwrap();

        // Delete with the *original* (stale) snapshot, revision 100.
        provider.delete_pod(created);

        assert_eq!(stop_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn scenario_4_status_driven_revision_bump_blocks_stale_delete() {
        let stop_calls = Arc::new(AtomicUsize::new(0));
        let tunnel = mock_tunnel_counting_stop_biz(stop_calls.clone());
        let provider = provider_with(tunnel, never_terminated_upstream());

        let created = pod_with("ns", "p", Some(100), vec![container("c", "1.0")]);
        provider.create_pod(created.clone());

        provider.sync_biz_status_to_kube(BizStatusData {
            key: "c:1.0".to_string(),
            name: "c".to_string(),
            pod_key: pod_key("ns", "p"),
            state: BizState::Activated,
            change_time: Utc::now(),
            reason: None,
            message: None,
            revision: Some(200),
        });

        provider.delete_pod(created);
        assert_eq!(stop_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn scenario_5_pod_phase_aggregation_running() {
        let tunnel = mock_tunnel_with_key_by_name_version();
        let provider = provider_with(tunnel, never_terminated_upstream());
        let pod = pod_with(
            "ns",
            "p",
            Some(1),
            vec![container("a", "1.0"), container("b", "1.0"), container("c", "1.0")],
        );
        provider.create_pod(pod.clone());

        for (name, state) in [
            ("a", BizState::Activated),
            ("b", BizState::Resolved),
            ("c", BizState::Deactivated),
        ] {
            provider.sync_biz_status_to_kube(BizStatusData {
                key: format!("{name}:1.0"),
                name: name.to_string(),
                pod_key: pod.key(),
                state,
                change_time: Utc::now(),
                reason: None,
                message: None,
                revision: None,
            });
        }

        let status = provider.get_pod_status(&pod.key()).unwrap();
        assert_eq!(status.phase, crate::model::PodPhase::Running);
        assert!(status.conditions.iter().all(|c| !c.status));
    }

    #[tokio::test]
    async fn scenario_6_all_terminated_is_succeeded() {
        let tunnel = mock_tunnel_with_key_by_name_version();
        let provider = provider_with(tunnel, never_terminated_upstream());
        let pod = pod_with("ns", "p", Some(1), vec![container("a", "1.0"), container("b", "1.0")]);
        provider.create_pod(pod.clone());

        for name in ["a", "b"] {
            provider.sync_biz_status_to_kube(BizStatusData {
                key: format!("{name}:1.0"),
                name: name.to_string(),
                pod_key: pod.key(),
                state: BizState::Deactivated,
                change_time: Utc::now(),
                reason: None,
                message: None,
                revision: None,
            });
        }

        let status = provider.get_pod_status(&pod.key()).unwrap();
        assert_eq!(status.phase, crate::model::PodPhase::Succeeded);
    }

    #[tokio::test]
    async fn update_pod_rejects_pods_with_deletion_timestamp() {
        let tunnel = mock_tunnel_with_key_by_name_version();
        let provider = provider_with(tunnel, never_terminated_upstream());
        let mut pod = pod_with("ns", "p", Some(1), vec![container("a", "1.0")]);
        pod.metadata.deletion_timestamp = Some(Utc::now());
        let result = provider.update_pod(pod).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn create_pod_round_trips_through_get_pod() {
        let tunnel = mock_tunnel_with_key_by_name_version();
        let provider = provider_with(tunnel, never_terminated_upstream());
        let pod = pod_with("ns", "p", Some(1), vec![container("a", "1.0")]);
        provider.create_pod(pod.clone());
        assert_eq!(provider.get_pod(&pod.key()), Some(pod));
    }

    #[tokio::test]
    async fn delete_pod_removes_from_store() {
        let tunnel = mock_tunnel_with_key_by_name_version();
        let provider = provider_with(tunnel, never_terminated_upstream());
        let pod = pod_with("ns", "p", Some(1), vec![container("a", "1.0")]);
        provider.create_pod(pod.clone());
        provider.delete_pod(pod.clone());
        assert_eq!(provider.get_pod(&pod.key()), None);
    }

    #[tokio::test]
    async fn notify_pods_invokes_callback_on_create() {
        let tunnel = mock_tunnel_with_key_by_name_version();
        let provider = provider_with(tunnel, never_terminated_upstream());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        provider.notify_pods(Arc::new(move |p: Pod| sink.lock().unwrap().push(p.key())));
        let pod = pod_with("ns", "p", Some(1), vec![container("a", "1.0")]);
        provider.create_pod(pod.clone());
        assert_eq!(*seen.lock().unwrap(), vec![pod.key()]);
    }

    #[tokio::test]
    async fn unsupported_operations_report_failure() {
        use futures::StreamExt;

        let tunnel = mock_tunnel_with_key_by_name_version();
        let provider = provider_with(tunnel, never_terminated_upstream());
        assert!(provider.run_in_container().is_err());
        assert!(provider.attach_to_container().is_err());
        assert!(provider.port_forward().is_err());
        assert_eq!(provider.get_container_logs().count().await, 0);
        assert!(provider.get_metrics_resource().is_empty());
        assert!(provider.get_stats_summary().pods.is_empty());
    }
}
