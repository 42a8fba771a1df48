//! Tunnel contract (C1, §4.1).
//!
//! A narrow capability set the reconciliation engine consumes; variants
//! exist for different transports (MQTT/HTTP to an Ark container, or any
//! other remote runtime reachable this way) but the transport itself is
//! out of scope (§1) — this module only defines the boundary.
//!
//! Shaped exactly after `shared/src/k8s/mod.rs`'s `KubeInterface`: a
//! narrow, object-safe `async_trait` with a generated mock for tests.

use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::model::Container;

/// Callback kinds a tunnel implementation invokes into the engine (§4.1).
#[derive(Debug, Clone)]
pub enum TunnelCallback {
    /// A new runtime base (node) was discovered.
    OnBaseDiscovered { node_name: String },
    /// A heartbeat/status update arrived for the base itself.
    OnBaseStatusArrived { node_name: String, healthy: bool },
    /// A full biz status snapshot arrived, in response to
    /// `query_all_biz_status_data`.
    OnAllBizStatusArrived {
        node_name: String,
        statuses: Vec<crate::model::BizStatusData>,
    },
    /// A single biz status observation arrived asynchronously.
    OnSingleBizStatusArrived {
        node_name: String,
        status: crate::model::BizStatusData,
    },
}

/// Sink a tunnel implementation invokes with every `TunnelCallback` (§4.1).
pub type TunnelCallbackSink = Arc<dyn Fn(TunnelCallback) + Send + Sync>;

/// The narrow capability set consumed from a remote runtime (§4.1). All
/// operations may fail with a transport error.
///
/// `start_biz`/`stop_biz` must be safe to call repeatedly for the same
/// biz: duplicate activation yields no error; duplicate deactivation on an
/// already-gone biz yields no error. Implementations are responsible for
/// that idempotence — the engine calls them as if they already have it.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Tunnel: Send + Sync {
    /// Request installation/activation of the biz described by
    /// `container` on the remote runtime behind `node_name`.
    async fn start_biz(
        &self,
        node_name: &str,
        pod_key: &str,
        container: &Container,
    ) -> anyhow::Result<()>;

    /// Request deactivation/uninstallation.
    async fn stop_biz(
        &self,
        node_name: &str,
        pod_key: &str,
        container: &Container,
    ) -> anyhow::Result<()>;

    /// Solicit a heartbeat from the remote runtime.
    async fn fetch_health_data(&self, node_name: &str) -> anyhow::Result<()>;

    /// Solicit a full status snapshot, delivered asynchronously via
    /// `OnAllBizStatusArrived`.
    async fn query_all_biz_status_data(&self, node_name: &str) -> anyhow::Result<()>;

    /// Deterministic biz-key derivation from a container's name and
    /// version (§3).
    fn biz_unique_key(&self, container: &Container) -> String;

    async fn register_node(&self, node_name: &str) -> anyhow::Result<()>;
    async fn unregister_node(&self, node_name: &str) -> anyhow::Result<()>;
    async fn start(&self) -> anyhow::Result<()>;
    async fn ready(&self) -> anyhow::Result<()>;
    async fn on_node_not_ready(&self, node_name: &str) -> anyhow::Result<()>;
    fn key(&self) -> &str;

    /// Registers the sink invoked for every `TunnelCallback` this
    /// implementation produces (§4.1). The engine calls this once, during
    /// construction, before any other method.
    async fn register_callback(&self, callback: TunnelCallbackSink) -> anyhow::Result<()>;
}
