use axum::{
    Router,
    extract::Extension,
    routing::{get, post},
};
use search_dispatch::clock::TokioClock;
use search_dispatch::cluster::handlers::{handle_cluster_snapshot, handle_node_status};
use search_dispatch::cluster::service::SearchCluster;
use search_dispatch::config::ClusterConfig;
use search_dispatch::dispatch::dispatcher::Dispatcher;
use search_dispatch::search::handlers::handle_search;
use search_dispatch::transport::client::HttpConnectionPool;
use search_dispatch::transport::protocol::{ENDPOINT_CLUSTER, ENDPOINT_NODE_STATUS, ENDPOINT_SEARCH};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 5 {
        eprintln!("Usage: {} --bind <addr:port> --cluster <cluster.json>", args[0]);
        eprintln!(
            "Example: {} --bind 127.0.0.1:8080 --cluster cluster.json",
            args[0]
        );

        std::process::exit(1);
    }

    let mut bind_addr: Option<SocketAddr> = None;
    let mut cluster_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match (args[i].as_str(), args.get(i + 1)) {
            ("--bind", Some(value)) => {
                bind_addr = Some(value.parse()?);
                i += 2;
            }
            ("--cluster", Some(value)) => {
                cluster_path = Some(PathBuf::from(value));
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    let bind_addr = bind_addr.ok_or_else(|| anyhow::anyhow!("--bind is required"))?;
    let cluster_path = cluster_path.ok_or_else(|| anyhow::anyhow!("--cluster is required"))?;

    // 1. Topology:
    let mut cluster_config = ClusterConfig::load(&cluster_path)?;
    cluster_config.dispatch = cluster_config.dispatch.with_env_overrides();
    cluster_config.dispatch.validate()?;
    let cluster = Arc::new(SearchCluster::from_config(&cluster_config)?);
    cluster.ping_iteration_completed();
    tracing::info!(
        "Loaded {} nodes in {} groups from {} (policy {:?})",
        cluster.node_count(),
        cluster.groups().len(),
        cluster_path.display(),
        cluster.config().load_balancing_policy
    );

    // 2. Dispatcher:
    let pool = Arc::new(HttpConnectionPool::new());
    let dispatcher = Arc::new(Dispatcher::new(cluster.clone(), pool, Arc::new(TokioClock)));

    // 3. HTTP Router:
    let app = Router::new()
        .route(ENDPOINT_SEARCH, get(handle_search))
        .route(ENDPOINT_NODE_STATUS, post(handle_node_status))
        .route(ENDPOINT_CLUSTER, get(handle_cluster_snapshot))
        .layer(Extension(dispatcher.clone()));

    // 4. Spawn stats reporter:
    let stats_dispatcher = dispatcher.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(5));

        loop {
            interval.tick().await;
            let cluster = stats_dispatcher.cluster();
            tracing::info!(
                "Cluster stats: {}/{} groups with sufficient coverage",
                cluster.groups_with_sufficient_coverage(),
                cluster.groups().len()
            );
            for group in cluster.groups() {
                let status = stats_dispatcher.load_balancer().group_status(group.id());
                tracing::info!(
                    "  - group {} working={}/{} docs={} allocations={} avg={:.2}ms",
                    group.id(),
                    group.working_nodes(),
                    group.nodes().len(),
                    group.active_documents(),
                    status.map(|s| s.allocations()).unwrap_or(0),
                    status.map(|s| s.average_search_time() * 1000.0).unwrap_or(0.0)
                );
            }
        }
    });

    // 5. Start HTTP server:
    tracing::info!("HTTP server listening on {}", bind_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
