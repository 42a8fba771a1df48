//! Demonstration binary for `arklet-provider`, shaped after
//! `agent/src/main.rs`/`controller/src/main.rs`: a banner, `env_logger`
//! init, a handful of spawned tasks joined with
//! `futures::future::try_join_all`. Wires the façade against an in-memory
//! demo tunnel rather than a real Ark container connection — the
//! transport itself is out of scope (§1).

use std::sync::Arc;

use async_trait::async_trait;
use log::{info, trace};
use tokio_util::sync::CancellationToken;

use arklet_provider::{
    pod_key, BizProvider, Container, Pod, PodMetadata, PodSpec, Tunnel, UpstreamPods,
    UpstreamReadError,
};

const APP_NAME: &str = "arklet";

/// Logs every call and reports every biz as already-running — enough to
/// exercise the façade end to end without a real Ark container.
struct DemoTunnel;

#[async_trait]
impl Tunnel for DemoTunnel {
    async fn start_biz(&self, node_name: &str, pod_key: &str, container: &Container) -> anyhow::Result<()> {
        info!("[demo-tunnel] start_biz node={node_name} pod={pod_key} container={}", container.name);
        Ok(())
    }

    async fn stop_biz(&self, node_name: &str, pod_key: &str, container: &Container) -> anyhow::Result<()> {
        info!("[demo-tunnel] stop_biz node={node_name} pod={pod_key} container={}", container.name);
        Ok(())
    }

    async fn fetch_health_data(&self, node_name: &str) -> anyhow::Result<()> {
        trace!("[demo-tunnel] fetch_health_data node={node_name}");
        Ok(())
    }

    async fn query_all_biz_status_data(&self, node_name: &str) -> anyhow::Result<()> {
        trace!("[demo-tunnel] query_all_biz_status_data node={node_name}");
        Ok(())
    }

    fn biz_unique_key(&self, container: &Container) -> String {
        format!("{}:{}", container.name, container.version)
    }

    async fn register_node(&self, node_name: &str) -> anyhow::Result<()> {
        info!("[demo-tunnel] register_node {node_name}");
        Ok(())
    }

    async fn unregister_node(&self, node_name: &str) -> anyhow::Result<()> {
        info!("[demo-tunnel] unregister_node {node_name}");
        Ok(())
    }

    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn ready(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_node_not_ready(&self, node_name: &str) -> anyhow::Result<()> {
        info!("[demo-tunnel] on_node_not_ready {node_name}");
        Ok(())
    }

    fn key(&self) -> &str {
        "demo-tunnel"
    }

    async fn register_callback(&self, _callback: arklet_provider::TunnelCallbackSink) -> anyhow::Result<()> {
        info!("[demo-tunnel] register_callback (demo tunnel never calls back on its own)");
        Ok(())
    }
}

/// Reports every container as already terminated, so `UpdatePod`'s
/// stop-then-start wait never blocks in this demo.
struct DemoUpstreamPods;

#[async_trait]
impl UpstreamPods for DemoUpstreamPods {
    async fn is_container_terminated(
        &self,
        _pod_key: &str,
        _container_name: &str,
    ) -> Result<bool, UpstreamReadError> {
        Ok(true)
    }
}

fn demo_pod() -> Pod {
    Pod {
        metadata: PodMetadata {
            namespace: "default".to_string(),
            name: "demo-biz-pod".to_string(),
            uid: "demo-uid".to_string(),
            creation_timestamp: chrono::Utc::now(),
            deletion_timestamp: None,
            labels: Default::default(),
            annotations: Default::default(),
        },
        spec: PodSpec {
            containers: vec![Container {
                name: "demo-biz".to_string(),
                image: "registry.example.com/demo-biz:1.0.0.jar".to_string(),
                version: "1.0.0".to_string(),
                env: vec![],
            }],
        },
        status: None,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    println!("{APP_NAME} start");

    env_logger::try_init()?;
    trace!("{APP_NAME} env_logger::init finished");

    let cancellation = CancellationToken::new();
    let provider = Arc::new(BizProvider::new(
        Arc::new(DemoTunnel),
        Arc::new(DemoUpstreamPods),
        "demo-node",
        Some("127.0.0.1".to_string()),
        cancellation.clone(),
    ));

    let mut tasks = Vec::new();

    tasks.push(tokio::spawn(async move {
        let port = arklet_provider::metrics_port(&arklet_provider::ActualEnvVarQuery);
        arklet_provider::run_metrics_server(port).await;
        Ok::<(), Box<dyn std::error::Error + Send + Sync + 'static>>(())
    }));

    tasks.push(tokio::spawn(async move {
        let pod = demo_pod();
        info!("creating demo pod {}", pod.key());
        provider.create_pod(pod.clone());
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        info!("pods known to provider: {:?}", provider.get_pods().iter().map(Pod::key).collect::<Vec<_>>());
        info!("demo pod key would be {}", pod_key("default", "demo-biz-pod"));
        Ok::<(), Box<dyn std::error::Error + Send + Sync + 'static>>(())
    }));

    // §5's cancellation contract: Ctrl-C cancels the token the queues (and
    // any future long-lived task) were started with, instead of a hard
    // process exit.
    tasks.push(tokio::spawn(async move {
        tokio::signal::ctrl_c().await?;
        info!("{APP_NAME} received ctrl-c, cancelling");
        cancellation.cancel();
        Ok::<(), Box<dyn std::error::Error + Send + Sync + 'static>>(())
    }));

    futures::future::try_join_all(tasks).await?;
    info!("{APP_NAME} end");
    Ok(())
}
