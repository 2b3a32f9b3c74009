//! Scatter/gather over all nodes of one group.
//!
//! Every node gets the query on its own task. The coordinator merges answers in the
//! order they arrive, shrinking its wait once enough of the group has answered, and
//! reports whatever did not make it in time as degraded coverage.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::node::{Completion, NodeInvoker, join_keys};
use super::timeout::AdaptiveTimeout;
use crate::clock::Clock;
use crate::cluster::service::SearchCluster;
use crate::cluster::types::Group;
use crate::search::coverage::CoverageAggregator;
use crate::search::merge::ResultMerger;
use crate::search::types::{Query, QueryResult, ResultError};
use crate::transport::protocol::NodeRequest;

pub struct InterleavedSearchInvoker {
    invokers: Vec<NodeInvoker>,
    group: Arc<Group>,
    cluster: Arc<SearchCluster>,
    /// Distribution keys of nodes that could not be connected to.
    unreachable: Vec<u32>,
    /// Report unreachable nodes as an error even when other nodes answered.
    unreachable_is_error: bool,
    clock: Arc<dyn Clock>,
}

impl InterleavedSearchInvoker {
    pub fn new(
        invokers: Vec<NodeInvoker>,
        group: Arc<Group>,
        cluster: Arc<SearchCluster>,
        unreachable: Vec<u32>,
        unreachable_is_error: bool,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            invokers,
            group,
            cluster,
            unreachable,
            unreachable_is_error,
            clock,
        }
    }

    pub fn group(&self) -> &Arc<Group> {
        &self.group
    }

    pub fn distribution_keys(&self) -> Vec<u32> {
        self.invokers.iter().map(|i| i.distribution_key()).collect()
    }

    pub fn unreachable(&self) -> &[u32] {
        &self.unreachable
    }

    /// Hits each node is asked for.
    pub fn hits_per_node(&self, query: &Query) -> u32 {
        let needed = query.hits_needed();
        let nodes = self.invokers.len() as u32;
        let estimated = if self.group.allows_top_k_estimate() {
            match query.top_k_probability {
                Some(p) => self.cluster.estimate_hits_to_fetch_with(needed, nodes, p),
                None => self.cluster.estimate_hits_to_fetch(needed, nodes),
            }
        } else {
            needed
        };
        estimated.min(self.cluster.config().max_hits_per_node)
    }

    pub async fn search(&self, query: &Query) -> QueryResult {
        let config = self.cluster.config();
        let mut coverage = CoverageAggregator::new();
        let mut merger = ResultMerger::new(query.hits_needed() as usize);
        let mut timeout = AdaptiveTimeout::new(config, query.deadline);

        let mut next = query.time_left(self.clock.now());
        let mut pending: BTreeMap<usize, u32> = BTreeMap::new();
        if let Some(time_left) = next {
            let hits = self.hits_per_node(query);
            let (sender, mut receiver) = mpsc::unbounded_channel();
            for (slot, invoker) in self.invokers.iter().enumerate() {
                invoker.send(NodeRequest::new(query, hits, time_left), slot, sender.clone());
                pending.insert(slot, invoker.distribution_key());
            }
            drop(sender);
            coverage.add_asked(self.invokers.len() as u32);
            tracing::debug!(
                "Query {} sent to {} nodes of group {}, {} hits each",
                query.id,
                pending.len(),
                self.group.id(),
                hits
            );

            while !pending.is_empty() {
                let Some(wait) = next else { break };
                match tokio::time::timeout(wait, receiver.recv()).await {
                    Ok(Some(completion)) => self.absorb(completion, &mut pending, &mut coverage, &mut merger),
                    Ok(None) => break,
                    Err(_) => {
                        tracing::debug!(
                            "Query {} timed out with {} requests made, {} responses received",
                            query.id,
                            coverage.asked_nodes(),
                            coverage.answered_nodes()
                        );
                        break;
                    }
                }
                next = timeout.next_timeout(
                    self.clock.now(),
                    coverage.asked_nodes(),
                    coverage.answered_nodes(),
                );
            }
        } else {
            coverage.add_asked(self.invokers.len() as u32);
            pending.extend(
                self.invokers
                    .iter()
                    .enumerate()
                    .map(|(slot, i)| (slot, i.distribution_key())),
            );
        }

        self.report_unanswered(&pending, &mut coverage, &mut merger);
        self.report_unreachable(&mut coverage, &mut merger);

        let coverage = coverage.finish(timeout.is_adaptive(), config.searchable_copies);
        merger.finish(query.offset, query.hits, coverage)
    }

    fn absorb(
        &self,
        completion: Completion,
        pending: &mut BTreeMap<usize, u32>,
        coverage: &mut CoverageAggregator,
        merger: &mut ResultMerger,
    ) {
        let Some(key) = pending.remove(&completion.slot) else {
            return;
        };
        match completion.outcome {
            Ok(partial) => {
                tracing::trace!("Node {} answered with {} hits", key, partial.hits.len());
                coverage.collect(&partial.coverage);
                merger.add(partial);
            }
            Err(e) => {
                tracing::warn!("Search on node {} in group {} failed: {}", key, self.group.id(), e);
                coverage.collect_failure();
                merger.add_error(ResultError::BackendCommunication(e.to_string()));
            }
        }
    }

    fn report_unanswered(
        &self,
        pending: &BTreeMap<usize, u32>,
        coverage: &mut CoverageAggregator,
        merger: &mut ResultMerger,
    ) {
        if pending.is_empty() {
            return;
        }
        let keys: Vec<u32> = pending.values().copied().collect();
        if coverage.answered_nodes() == 0 {
            merger.add_error(ResultError::BackendCommunication(format!(
                "Backend communication timeout on all nodes in group (distribution-keys: {})",
                join_keys(&keys)
            )));
        } else {
            tracing::info!(
                "Backend communication timeout on nodes with distribution-keys: {}",
                join_keys(&keys)
            );
        }
        coverage.mark_timed_out();
    }

    fn report_unreachable(&self, coverage: &mut CoverageAggregator, merger: &mut ResultMerger) {
        if self.unreachable.is_empty() {
            return;
        }
        let message = format!(
            "Connection failure on nodes with distribution-keys: {}",
            join_keys(&self.unreachable)
        );
        if self.unreachable_is_error || coverage.answered_nodes() == 0 {
            merger.add_error(ResultError::BackendCommunication(message));
        } else {
            tracing::debug!("{}", message);
        }
        coverage.add_unreachable(self.unreachable.len() as u32);
    }
}
