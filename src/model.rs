//! Data model for the pod-to-biz reconciliation engine.
//!
//! Mirrors the shape of `shared/src/akri/instance.rs`'s CRD structs (plain
//! serde-derived records, `camelCase` on the wire) without pulling in a CRD
//! derive or a `k8s-openapi` dependency: these types are never round-tripped
//! through the Kubernetes API server directly, only built from/compared
//! against what a reconciler hands the provider, so a bespoke struct with
//! the same field shape and wire casing serves just as well.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `namespace/name`, the stable identifier for an observed Pod.
pub type PodKey = String;

/// `name:version`, the stable identifier for a biz/module instance.
pub type BizKey = String;

pub fn pod_key(namespace: &str, name: &str) -> PodKey {
    format!("{namespace}/{name}")
}

/// Recognized pod annotation carrying the monotonic per-biz-key revision.
pub const ANNOTATION_KEY_OF_POD_REVISION: &str = "virtual-kubelet.koupleless.io/pod-revision";

/// Recognized pod label carrying an opaque trace id forwarded to tracing.
pub const LABEL_KEY_OF_TRACE_ID: &str = "virtual-kubelet.koupleless.io/trace-id";

/// Metadata for an observed Pod.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodMetadata {
    pub namespace: String,
    pub name: String,
    /// Stable identity across namespace/name reuse. Used only for logging
    /// and tracing, never for keying the store.
    pub uid: String,
    pub creation_timestamp: DateTime<Utc>,
    pub deletion_timestamp: Option<DateTime<Utc>>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

impl PodMetadata {
    pub fn key(&self) -> PodKey {
        pod_key(&self.namespace, &self.name)
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.labels.get(LABEL_KEY_OF_TRACE_ID).map(String::as_str)
    }

    /// Parses the revision annotation. `None` covers both "annotation
    /// missing" and "annotation present but not a valid i64" — callers
    /// decide what a missing revision means for their path (§4.5).
    pub fn revision(&self) -> Option<i64> {
        self.annotations
            .get(ANNOTATION_KEY_OF_POD_REVISION)
            .and_then(|v| v.parse::<i64>().ok())
    }
}

/// A single container in a Pod spec, as the reconciliation engine needs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    pub image: String,
    pub version: String,
    pub env: Vec<(String, String)>,
}

impl Container {
    /// Heuristic used by §4.3(b): only containers whose image denotes a
    /// biz artifact are counted toward pod-phase aggregation.
    pub fn is_biz_container(&self) -> bool {
        self.image.contains(".jar")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    pub containers: Vec<Container>,
}

/// The last Pod snapshot received from the reconciler, plus whatever
/// status this engine has last computed for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    pub metadata: PodMetadata,
    pub spec: PodSpec,
    pub status: Option<PodStatusInfo>,
}

impl Pod {
    pub fn key(&self) -> PodKey {
        self.metadata.key()
    }

    pub fn container_by_name(&self, name: &str) -> Option<&Container> {
        self.spec.containers.iter().find(|c| c.name == name)
    }
}

/// The small state enumeration a `BizStatusData` observation carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BizState {
    Unresolved,
    Resolved,
    Activated,
    Deactivated,
    Broken,
}

/// An observation arriving from the tunnel (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BizStatusData {
    pub key: BizKey,
    pub name: String,
    pub pod_key: PodKey,
    pub state: BizState,
    pub change_time: DateTime<Utc>,
    pub reason: Option<String>,
    pub message: Option<String>,
    pub revision: Option<i64>,
}

/// Per-container status, the output of §4.3(a).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatus {
    pub name: String,
    pub state: ContainerState,
    pub ready: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContainerState {
    Waiting {
        reason: &'static str,
    },
    Running {
        started_at: DateTime<Utc>,
    },
    Terminated {
        exit_code: i32,
        reason: Option<String>,
        message: Option<String>,
        finished_at: DateTime<Utc>,
    },
}

/// Pod-level phase, the output of §4.3(b).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionKind {
    Ready,
    ContainersReady,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodCondition {
    pub kind: ConditionKind,
    pub status: bool,
    pub last_probe_time: DateTime<Utc>,
}

/// The full status this engine computes for a Pod (§4.3(b), §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStatusInfo {
    pub phase: PodPhase,
    pub conditions: Vec<PodCondition>,
    pub container_statuses: Vec<ContainerStatus>,
    pub pod_ip: Option<String>,
    pub pod_ips: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revision_parses_valid_annotation() {
        let mut annotations = BTreeMap::new();
        annotations.insert(ANNOTATION_KEY_OF_POD_REVISION.to_string(), "1200".to_string());
        let meta = PodMetadata {
            namespace: "ns".into(),
            name: "pod".into(),
            uid: "uid".into(),
            creation_timestamp: Utc::now(),
            deletion_timestamp: None,
            labels: BTreeMap::new(),
            annotations,
        };
        assert_eq!(meta.revision(), Some(1200));
    }

    #[test]
    fn revision_is_none_when_missing_or_unparseable() {
        let mut annotations = BTreeMap::new();
        annotations.insert(ANNOTATION_KEY_OF_POD_REVISION.to_string(), "not-a-number".to_string());
        let meta = PodMetadata {
            namespace: "ns".into(),
            name: "pod".into(),
            uid: "uid".into(),
            creation_timestamp: Utc::now(),
            deletion_timestamp: None,
            labels: BTreeMap::new(),
            annotations,
        };
        assert_eq!(meta.revision(), None);

        let meta_missing = PodMetadata {
            annotations: BTreeMap::new(),
            ..meta
        };
        assert_eq!(meta_missing.revision(), None);
    }

    #[test]
    fn is_biz_container_matches_jar_heuristic() {
        let biz = Container {
            name: "a".into(),
            image: "registry/biz-a:1.0.0.jar".into(),
            version: "1.0.0".into(),
            env: vec![],
        };
        let sidecar = Container {
            name: "b".into(),
            image: "registry/envoy:latest".into(),
            version: "latest".into(),
            env: vec![],
        };
        assert!(biz.is_biz_container());
        assert!(!sidecar.is_biz_container());
    }
}
