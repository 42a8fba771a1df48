//! `arklet-provider`: the core reconciliation engine behind a
//! virtual-kubelet provider that projects Kubernetes Pods onto biz modules
//! running out-of-cluster, inside Java Ark containers reachable only
//! through a tunnel abstraction. See `SPEC_FULL.md` for the full contract.

#[macro_use]
extern crate serde_derive;

mod config;
mod error;
mod metrics;
mod model;
mod provider;
mod queue;
mod status;
mod store;
mod tunnel;

pub use config::{metrics_port, ActualEnvVarQuery, EnvVarQuery, DEFAULT_METRICS_PORT, METRICS_PORT_VAR};
pub use error::{ProviderError, Result};
pub use metrics::run_metrics_server;
pub use model::{
    pod_key, BizKey, BizState, BizStatusData, ConditionKind, Container, ContainerState,
    ContainerStatus, Pod, PodCondition, PodKey, PodMetadata, PodPhase, PodSpec, PodStatusInfo,
    ANNOTATION_KEY_OF_POD_REVISION, LABEL_KEY_OF_TRACE_ID,
};
pub use provider::{BizProvider, NotifySink, StatsSummary, UpstreamPods, UpstreamReadError};
pub use queue::{FixedDelayPolicy, QueueHandler, RateLimitingQueue, RetryPolicy};
pub use status::{aggregate_pod_phase, build_pod_status, container_status_from_biz};
pub use store::Store;
pub use tunnel::{Tunnel, TunnelCallback, TunnelCallbackSink};

#[cfg(test)]
pub use tunnel::MockTunnel;
#[cfg(test)]
pub use provider::MockUpstreamPods;
