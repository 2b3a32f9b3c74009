use std::sync::Arc;

use super::interleaved::InterleavedSearchInvoker;
use super::node::{ErrorInvoker, NodeInvoker};
use super::types::{InvokerKind, SearchInvoker};
use crate::clock::Clock;
use crate::cluster::service::SearchCluster;
use crate::cluster::types::Node;
use crate::search::coverage::Coverage;
use crate::search::types::ResultError;
use crate::transport::types::ConnectionPool;

/// Builds invokers for a set of nodes, deciding whether enough of them are reachable.
pub struct InvokerFactory {
    cluster: Arc<SearchCluster>,
    pool: Arc<dyn ConnectionPool>,
    clock: Arc<dyn Clock>,
}

impl InvokerFactory {
    pub fn new(cluster: Arc<SearchCluster>, pool: Arc<dyn ConnectionPool>, clock: Arc<dyn Clock>) -> Self {
        Self {
            cluster,
            pool,
            clock,
        }
    }

    /// Invoker over `nodes`, all from the same group.
    ///
    /// Nodes that are down or cannot be connected to are failed. When the rest no longer
    /// covers enough documents, `None` is returned unless `accept_incomplete_coverage`,
    /// in which case the failure is reported on the result instead.
    pub fn create_search_invoker(
        &self,
        nodes: &[Arc<Node>],
        accept_incomplete_coverage: bool,
    ) -> Option<SearchInvoker> {
        let mut invokers = Vec::with_capacity(nodes.len());
        let mut failed = Vec::new();
        for node in nodes {
            if !node.is_working() {
                failed.push(node.key());
                continue;
            }
            match self.pool.connection(node) {
                Ok(connection) => {
                    invokers.push(NodeInvoker::new(node.clone(), connection, self.clock.clone()))
                }
                Err(e) => {
                    tracing::debug!("Unable to create search invoker for {}: {}", node, e);
                    failed.push(node.key());
                }
            }
        }

        let mut failed_is_error = false;
        if !failed.is_empty() {
            let reachable: Vec<Arc<Node>> = nodes
                .iter()
                .filter(|n| !failed.contains(&n.key()))
                .cloned()
                .collect();
            if !self.cluster.is_partial_group_coverage_sufficient(&reachable) {
                if !accept_incomplete_coverage {
                    tracing::debug!(
                        "Not enough coverage without distribution-keys {:?}, giving up on these nodes",
                        failed
                    );
                    return None;
                }
                failed_is_error = true;
            }
        }

        if invokers.is_empty() {
            return failed_is_error
                .then(|| self.error_invoker_from(ErrorInvoker::connection_failure(&failed)));
        }
        if invokers.len() == 1 && failed.is_empty() {
            let invoker = invokers.remove(0);
            return Some(SearchInvoker::new(InvokerKind::Node(invoker), self.clock.clone()));
        }

        let group = self.cluster.group(invokers[0].node().group())?.clone();
        let interleaved = InterleavedSearchInvoker::new(
            invokers,
            group,
            self.cluster.clone(),
            failed,
            failed_is_error,
            self.clock.clone(),
        );
        Some(SearchInvoker::new(
            InvokerKind::Interleaved(interleaved),
            self.clock.clone(),
        ))
    }

    pub fn error_invoker(&self, error: ResultError, coverage: Coverage) -> SearchInvoker {
        self.error_invoker_from(ErrorInvoker::new(error, coverage))
    }

    fn error_invoker_from(&self, invoker: ErrorInvoker) -> SearchInvoker {
        SearchInvoker::new(InvokerKind::Error(invoker), self.clock.clone())
    }
}
