use axum::http::StatusCode;
use axum::{Extension, Json};
use std::sync::Arc;

use super::types::{GroupSnapshot, NodeStatus};
use crate::dispatch::dispatcher::Dispatcher;

/// Apply one round of health reports and recompute group coverage.
pub async fn handle_node_status(
    Extension(dispatcher): Extension<Arc<Dispatcher>>,
    Json(statuses): Json<Vec<NodeStatus>>,
) -> StatusCode {
    let cluster = dispatcher.cluster();
    let unknown = statuses
        .iter()
        .filter(|status| !cluster.update_node_status(status))
        .count();
    cluster.ping_iteration_completed();

    tracing::debug!(
        "Applied {} node status reports ({} unknown)",
        statuses.len(),
        unknown
    );
    if unknown > 0 && unknown == statuses.len() {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::OK
    }
}

pub async fn handle_cluster_snapshot(
    Extension(dispatcher): Extension<Arc<Dispatcher>>,
) -> Json<Vec<GroupSnapshot>> {
    Json(cluster_snapshot(&dispatcher))
}

pub fn cluster_snapshot(dispatcher: &Dispatcher) -> Vec<GroupSnapshot> {
    let balancer = dispatcher.load_balancer();
    dispatcher
        .cluster()
        .groups()
        .iter()
        .map(|group| {
            let status = balancer.group_status(group.id());
            GroupSnapshot {
                id: group.id(),
                nodes: group.nodes().len(),
                working_nodes: group.working_nodes(),
                active_documents: group.active_documents(),
                sufficient_coverage: group.has_sufficient_coverage(),
                full_coverage: group.has_full_coverage(),
                balanced: group.is_balanced(),
                blocking_writes: group.is_blocking_writes(),
                allocations: status.map(|s| s.allocations()).unwrap_or(0),
                average_search_time_ms: status
                    .map(|s| s.average_search_time() * 1000.0)
                    .unwrap_or(0.0),
            }
        })
        .collect()
}
