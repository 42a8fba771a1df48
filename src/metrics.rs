//! Ambient Prometheus metrics, shaped after `shared/src/akri/metrics.rs`
//! and `agent/src/util/metrics.rs`: a `lazy_static!` registry plus a tiny
//! `warp`-served `/metrics` route, same as the teacher.

use lazy_static::lazy_static;
use log::info;
use prometheus::{register_int_counter_vec, register_int_gauge, Encoder, IntCounterVec, IntGauge};
use warp::{Filter, Rejection, Reply};

lazy_static! {
    /// Number of Pods currently held in the store (§3).
    pub static ref POD_COUNT: IntGauge =
        register_int_gauge!("arklet_pod_count", "Pods currently tracked by the provider")
            .expect("arklet_pod_count metric can be created");

    /// Install attempts, grouped by outcome ("success" | "failure").
    pub static ref INSTALL_RESULT: IntCounterVec = register_int_counter_vec!(
        "arklet_install_result_total",
        "Install (StartBiz) attempts by outcome",
        &["result"]
    )
    .expect("arklet_install_result_total metric can be created");

    /// Uninstall attempts, grouped by outcome ("success" | "failure").
    pub static ref UNINSTALL_RESULT: IntCounterVec = register_int_counter_vec!(
        "arklet_uninstall_result_total",
        "Uninstall (StopBiz) attempts by outcome",
        &["result"]
    )
    .expect("arklet_uninstall_result_total metric can be created");

    /// Uninstalls skipped because the requesting Pod's revision was stale
    /// (§4.4's revision guard).
    pub static ref STALE_REVISION_REJECTED: IntCounterVec = register_int_counter_vec!(
        "arklet_stale_revision_rejected_total",
        "Uninstalls skipped due to a stale pod revision, by queue",
        &["queue"]
    )
    .expect("arklet_stale_revision_rejected_total metric can be created");

    /// Installs dropped because the biz was observed in a state other than
    /// RESOLVED/ACTIVATED/DEACTIVATED/absent ("BizInstalledButNotActivated",
    /// §9 — no retry policy exists for this outcome upstream, so it is
    /// logged and counted rather than retried).
    pub static ref INSTALL_DROPPED_NOT_ACTIVATED: prometheus::IntCounter = prometheus::register_int_counter!(
        "arklet_install_dropped_not_activated_total",
        "Installs dropped because the biz was not in a startable state"
    )
    .expect("arklet_install_dropped_not_activated_total metric can be created");
}

fn render() -> Vec<u8> {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .expect("couldn't encode prometheus metrics");
    buffer
}

async fn metrics_handler() -> Result<impl Reply, Rejection> {
    let body = render();
    Ok(String::from_utf8(body).expect("prometheus metrics could not be converted to String"))
}

/// Serves the current metrics snapshot at `/metrics` on `0.0.0.0:{port}`,
/// same as `shared/src/akri/metrics.rs::run_metrics_server`.
pub async fn run_metrics_server(port: u16) {
    info!("starting metrics server on port {port} at /metrics");
    let metrics_route = warp::path!("metrics").and_then(metrics_handler);
    warp::serve(metrics_route).run(([0, 0, 0, 0], port)).await;
}
