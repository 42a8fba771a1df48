//! Status translator (C3, §4.3). Pure, stateless: no I/O, no locks.
//!
//! Shaped after `controller/src/util/pod_action.rs`'s `PodActionInfo`: one
//! public entry point per responsibility, each delegating through small
//! private match-based helpers, each documented with the decision table it
//! implements rather than prose.

use crate::model::{
    BizState, BizStatusData, Container, ConditionKind, ContainerState, ContainerStatus, Pod,
    PodCondition, PodPhase, PodStatusInfo,
};
use chrono::Utc;

/// §4.3(a): container status from biz status.
///
///   | --> (UNRESOLVED | absent) ===> Waiting(BizPending)
///   | --> RESOLVED               ===> Waiting(BizResolved)
///   | --> ACTIVATED               ===> Running(started_at), ready=true
///   | --> DEACTIVATED             ===> Terminated(exit_code=0), ready=false
///   | --> BROKEN                  ===> Terminated(exit_code=1, reason/message), ready=false
pub fn container_status_from_biz(container_name: &str, status: Option<&BizStatusData>) -> ContainerStatus {
    let state = status.map(|s| s.state);
    match state {
        None | Some(BizState::Unresolved) => ContainerStatus {
            name: container_name.to_string(),
            state: ContainerState::Waiting { reason: "BizPending" },
            ready: false,
        },
        Some(BizState::Resolved) => ContainerStatus {
            name: container_name.to_string(),
            state: ContainerState::Waiting { reason: "BizResolved" },
            ready: false,
        },
        Some(BizState::Activated) => {
            let started_at = status.map(|s| s.change_time).unwrap_or_else(Utc::now);
            ContainerStatus {
                name: container_name.to_string(),
                state: ContainerState::Running { started_at },
                ready: true,
            }
        }
        Some(BizState::Deactivated) => {
            let finished_at = status.map(|s| s.change_time).unwrap_or_else(Utc::now);
            ContainerStatus {
                name: container_name.to_string(),
                state: ContainerState::Terminated {
                    exit_code: 0,
                    reason: None,
                    message: None,
                    finished_at,
                },
                ready: false,
            }
        }
        Some(BizState::Broken) => {
            let s = status.expect("Broken state implies a status was observed");
            ContainerStatus {
                name: container_name.to_string(),
                state: ContainerState::Terminated {
                    exit_code: 1,
                    reason: s.reason.clone(),
                    message: s.message.clone(),
                    finished_at: s.change_time,
                },
                ready: false,
            }
        }
    }
}

enum Readiness {
    Ready,
    NotReadyRunning,
    Terminated,
}

fn readiness_of(status: &ContainerStatus) -> Readiness {
    match &status.state {
        ContainerState::Running { .. } if status.ready => Readiness::Ready,
        ContainerState::Running { .. } => Readiness::NotReadyRunning,
        ContainerState::Waiting { .. } => Readiness::NotReadyRunning,
        ContainerState::Terminated { .. } => Readiness::Terminated,
    }
}

/// §4.3(b): pod phase aggregation over biz containers only (the
/// `.jar`-substring heuristic, `Container::is_biz_container`).
///
/// Let `B` = biz-container count, `R` = ready, `T` = terminated,
/// `N` = not-ready-but-running/waiting, `U` = uninitialized (no status at
/// all yet for that container).
///
///   | B == 0 || B == T        ===> Succeeded, Ready=False, ContainersReady=False
///   | U == B                  ===> Pending,   both False
///   | R == B                  ===> Running,   both True
///   | N > 0 || 0 < R < B      ===> Running,   both False
///   | otherwise               ===> Pending,   both False
pub fn aggregate_pod_phase(
    biz_containers: &[&Container],
    statuses_by_name: &std::collections::HashMap<&str, &ContainerStatus>,
) -> (PodPhase, bool, bool) {
    let b = biz_containers.len();
    let mut r = 0usize;
    let mut t = 0usize;
    let mut n = 0usize;
    let mut u = 0usize;

    for c in biz_containers {
        match statuses_by_name.get(c.name.as_str()) {
            None => u += 1,
            Some(status) => match readiness_of(status) {
                Readiness::Ready => r += 1,
                Readiness::Terminated => t += 1,
                Readiness::NotReadyRunning => n += 1,
            },
        }
    }

    if b == 0 || b == t {
        (PodPhase::Succeeded, false, false)
    } else if u == b {
        (PodPhase::Pending, false, false)
    } else if r == b {
        (PodPhase::Running, true, true)
    } else if n > 0 || (r > 0 && r < b) {
        (PodPhase::Running, false, false)
    } else {
        (PodPhase::Pending, false, false)
    }
}

/// Builds the full `PodStatusInfo` for a Pod given the container statuses
/// already computed for each of its containers (§4.3(a) outputs), filling
/// the pod IP from the provider's single `local_ip` and the multi-IP list.
pub fn build_pod_status(
    pod: &Pod,
    container_statuses: Vec<ContainerStatus>,
    local_ip: Option<&str>,
    pod_ips: Vec<String>,
) -> PodStatusInfo {
    let biz_containers: Vec<&Container> = pod
        .spec
        .containers
        .iter()
        .filter(|c| c.is_biz_container())
        .collect();

    let statuses_by_name: std::collections::HashMap<&str, &ContainerStatus> = container_statuses
        .iter()
        .map(|s| (s.name.as_str(), s))
        .collect();

    let (phase, ready, containers_ready) = aggregate_pod_phase(&biz_containers, &statuses_by_name);
    let now = Utc::now();

    PodStatusInfo {
        phase,
        conditions: vec![
            PodCondition {
                kind: ConditionKind::Ready,
                status: ready,
                last_probe_time: now,
            },
            PodCondition {
                kind: ConditionKind::ContainersReady,
                status: containers_ready,
                last_probe_time: now,
            },
        ],
        container_statuses,
        pod_ip: local_ip.map(str::to_string),
        pod_ips,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{pod_key, PodMetadata, PodSpec};
    use std::collections::BTreeMap;

    fn biz_container(name: &str) -> Container {
        Container {
            name: name.to_string(),
            image: format!("registry/{name}:1.0.jar"),
            version: "1.0".to_string(),
            env: vec![],
        }
    }

    fn status(name: &str, state: BizState) -> BizStatusData {
        BizStatusData {
            key: format!("{name}:1.0"),
            name: name.to_string(),
            pod_key: pod_key("ns", "pod"),
            state,
            change_time: Utc::now(),
            reason: None,
            message: None,
            revision: None,
        }
    }

    #[test]
    fn container_status_unresolved_or_absent_is_waiting_biz_pending() {
        let s = container_status_from_biz("a", None);
        assert_eq!(s.state, ContainerState::Waiting { reason: "BizPending" });
        assert!(!s.ready);

        let observed = status("a", BizState::Unresolved);
        let s2 = container_status_from_biz("a", Some(&observed));
        assert_eq!(s2.state, ContainerState::Waiting { reason: "BizPending" });
    }

    #[test]
    fn container_status_resolved_is_waiting_biz_resolved() {
        let observed = status("a", BizState::Resolved);
        let s = container_status_from_biz("a", Some(&observed));
        assert_eq!(s.state, ContainerState::Waiting { reason: "BizResolved" });
        assert!(!s.ready);
    }

    #[test]
    fn container_status_activated_is_running_and_ready() {
        let observed = status("a", BizState::Activated);
        let s = container_status_from_biz("a", Some(&observed));
        assert!(matches!(s.state, ContainerState::Running { .. }));
        assert!(s.ready);
    }

    #[test]
    fn container_status_deactivated_is_terminated_exit_zero() {
        let observed = status("a", BizState::Deactivated);
        let s = container_status_from_biz("a", Some(&observed));
        match s.state {
            ContainerState::Terminated { exit_code, .. } => assert_eq!(exit_code, 0),
            _ => panic!("expected Terminated"),
        }
        assert!(!s.ready);
    }

    #[test]
    fn container_status_broken_is_terminated_exit_one_with_reason() {
        let mut observed = status("a", BizState::Broken);
        observed.reason = Some("OOM".to_string());
        observed.message = Some("killed".to_string());
        let s = container_status_from_biz("a", Some(&observed));
        match s.state {
            ContainerState::Terminated { exit_code, reason, message, .. } => {
                assert_eq!(exit_code, 1);
                assert_eq!(reason.as_deref(), Some("OOM"));
                assert_eq!(message.as_deref(), Some("killed"));
            }
            _ => panic!("expected Terminated"),
        }
        assert!(!s.ready);
    }

    fn pod_with_containers(containers: Vec<Container>) -> Pod {
        Pod {
            metadata: PodMetadata {
                namespace: "ns".into(),
                name: "pod".into(),
                uid: "uid".into(),
                creation_timestamp: Utc::now(),
                deletion_timestamp: None,
                labels: BTreeMap::new(),
                annotations: BTreeMap::new(),
            },
            spec: PodSpec { containers },
            status: None,
        }
    }

    #[test]
    fn aggregation_mixed_states_is_running_with_false_conditions() {
        // one ACTIVATED, one RESOLVED, one DEACTIVATED -> Running, both False
        let pod = pod_with_containers(vec![
            biz_container("a"),
            biz_container("b"),
            biz_container("c"),
        ]);
        let statuses = vec![
            container_status_from_biz("a", Some(&status("a", BizState::Activated))),
            container_status_from_biz("b", Some(&status("b", BizState::Resolved))),
            container_status_from_biz("c", Some(&status("c", BizState::Deactivated))),
        ];
        let info = build_pod_status(&pod, statuses, None, vec![]);
        assert_eq!(info.phase, PodPhase::Running);
        assert!(info.conditions.iter().all(|c| !c.status));
    }

    #[test]
    fn aggregation_all_deactivated_is_succeeded() {
        let pod = pod_with_containers(vec![biz_container("a"), biz_container("b")]);
        let statuses = vec![
            container_status_from_biz("a", Some(&status("a", BizState::Deactivated))),
            container_status_from_biz("b", Some(&status("b", BizState::Deactivated))),
        ];
        let info = build_pod_status(&pod, statuses, None, vec![]);
        assert_eq!(info.phase, PodPhase::Succeeded);
        assert!(info.conditions.iter().all(|c| !c.status));
    }

    #[test]
    fn aggregation_all_activated_is_running_with_true_conditions() {
        let pod = pod_with_containers(vec![biz_container("a"), biz_container("b")]);
        let statuses = vec![
            container_status_from_biz("a", Some(&status("a", BizState::Activated))),
            container_status_from_biz("b", Some(&status("b", BizState::Activated))),
        ];
        let info = build_pod_status(&pod, statuses, None, vec![]);
        assert_eq!(info.phase, PodPhase::Running);
        assert!(info.conditions.iter().all(|c| c.status));
    }

    #[test]
    fn aggregation_no_status_yet_is_pending() {
        let pod = pod_with_containers(vec![biz_container("a")]);
        let info = build_pod_status(&pod, vec![], None, vec![]);
        assert_eq!(info.phase, PodPhase::Pending);
    }

    #[test]
    fn aggregation_ignores_non_biz_containers() {
        let sidecar = Container {
            name: "envoy".into(),
            image: "registry/envoy:latest".into(),
            version: "latest".into(),
            env: vec![],
        };
        let pod = pod_with_containers(vec![sidecar]);
        let info = build_pod_status(&pod, vec![], None, vec![]);
        // B == 0 -> Succeeded per the aggregation table.
        assert_eq!(info.phase, PodPhase::Succeeded);
    }

    #[test]
    fn pod_ip_is_filled_from_local_ip_and_pod_ips() {
        let pod = pod_with_containers(vec![biz_container("a")]);
        let statuses = vec![container_status_from_biz("a", Some(&status("a", BizState::Activated)))];
        let info = build_pod_status(&pod, statuses, Some("10.0.0.5"), vec!["10.0.0.5".to_string()]);
        assert_eq!(info.pod_ip.as_deref(), Some("10.0.0.5"));
        assert_eq!(info.pod_ips, vec!["10.0.0.5".to_string()]);
    }
}
