use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use super::types::{Group, Node, NodeStatus};
use crate::config::{ClusterConfig, DispatchConfig};
use crate::error::ConfigError;
use crate::search::topk::{DEFAULT_DEGREES_OF_FREEDOM, TopKEstimator};

/// The search cluster as the dispatcher sees it: groups of nodes plus their health.
///
/// The topology is fixed at construction. Health is written by the monitor through
/// [`SearchCluster::update_node_status`] and folded into the group aggregates by
/// [`SearchCluster::ping_iteration_completed`].
pub struct SearchCluster {
    config: DispatchConfig,
    groups: Vec<Arc<Group>>,
    nodes_by_key: HashMap<u32, Arc<Node>>,
    local_corpus_target: Option<Arc<Node>>,
    top_k: TopKEstimator,
}

impl SearchCluster {
    /// Build the topology. Group ids must be dense from 0 and distribution keys unique.
    pub fn new(
        config: DispatchConfig,
        nodes: Vec<Node>,
        self_hostname: &str,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if nodes.is_empty() {
            return Err(ConfigError::Empty);
        }

        let mut nodes_by_key = HashMap::with_capacity(nodes.len());
        let mut members: Vec<Vec<Arc<Node>>> = Vec::new();
        for node in nodes {
            let node = Arc::new(node);
            if nodes_by_key.insert(node.key(), node.clone()).is_some() {
                return Err(ConfigError::DuplicateKey(node.key()));
            }
            let group = node.group() as usize;
            if members.len() <= group {
                members.resize_with(group + 1, Vec::new);
            }
            members[group].push(node);
        }

        let mut groups = Vec::with_capacity(members.len());
        for (id, nodes) in members.into_iter().enumerate() {
            if nodes.is_empty() {
                return Err(ConfigError::MissingGroup(id as u32));
            }
            groups.push(Arc::new(Group::new(id as u32, nodes)));
        }

        let local_corpus_target = Self::find_local_corpus_target(&groups, self_hostname);
        if let Some(node) = &local_corpus_target {
            info!("Found local corpus dispatch target: {}", node);
        }

        let top_k = TopKEstimator::new(DEFAULT_DEGREES_OF_FREEDOM, config.top_k_probability);
        info!(
            "Search cluster with {} groups and {} nodes",
            groups.len(),
            nodes_by_key.len()
        );

        Ok(Self {
            config,
            groups,
            nodes_by_key,
            local_corpus_target,
            top_k,
        })
    }

    pub fn from_config(config: &ClusterConfig) -> Result<Self, ConfigError> {
        let nodes = config
            .nodes
            .iter()
            .map(|n| Node::new(n.hostname.clone(), n.port, n.key, n.group))
            .collect();
        Self::new(config.dispatch.clone(), nodes, &config.self_hostname)
    }

    /// The single node on this host, when it is alone in its group.
    fn find_local_corpus_target(groups: &[Arc<Group>], self_hostname: &str) -> Option<Arc<Node>> {
        let mut local = groups
            .iter()
            .flat_map(|g| g.nodes())
            .filter(|n| n.hostname() == self_hostname);
        let node = local.next()?;
        if local.next().is_some() {
            return None;
        }
        let group = groups.get(node.group() as usize)?;
        if group.nodes().len() != 1 {
            return None;
        }
        Some(node.clone())
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn groups(&self) -> &[Arc<Group>] {
        &self.groups
    }

    pub fn group(&self, id: u32) -> Option<&Arc<Group>> {
        self.groups.get(id as usize)
    }

    pub fn node(&self, key: u32) -> Option<&Arc<Node>> {
        self.nodes_by_key.get(&key)
    }

    pub fn node_count(&self) -> usize {
        self.nodes_by_key.len()
    }

    pub fn groups_with_sufficient_coverage(&self) -> usize {
        self.groups
            .iter()
            .filter(|g| g.has_sufficient_coverage())
            .count()
    }

    /// Direct dispatch target, if the local node is up and its group covers the corpus.
    pub fn local_corpus_dispatch_target(&self) -> Option<&Arc<Node>> {
        let node = self.local_corpus_target.as_ref()?;
        let group = self.group(node.group())?;
        (node.is_working() && group.has_sufficient_coverage()).then_some(node)
    }

    /// Apply a health report. Returns `false` for unknown distribution keys.
    pub fn update_node_status(&self, status: &NodeStatus) -> bool {
        let Some(node) = self.node(status.key) else {
            warn!("Health report for unknown distribution key {}", status.key);
            return false;
        };
        if node.is_working() != status.working {
            info!(
                "Node {} is now {}",
                node,
                if status.working { "working" } else { "down" }
            );
        }
        node.set_working(status.working);
        node.set_active_documents(status.active_documents, status.target_active_documents);
        node.set_blocking_writes(status.blocking_writes);
        true
    }

    /// Recompute group aggregates and coverage after a round of health reports.
    pub fn ping_iteration_completed(&self) {
        for group in &self.groups {
            group.aggregate_node_values();
        }
        let median = self.median_documents_per_group();
        for group in &self.groups {
            let sufficient = self.is_group_coverage_sufficient(group.active_documents(), median)
                && self.is_group_node_coverage_sufficient(group);
            let previous = group.set_has_sufficient_coverage(sufficient);
            if previous != sufficient {
                if sufficient {
                    info!("Group {} has sufficient coverage again", group.id());
                } else {
                    warn!(
                        "Group {} has insufficient coverage: {} active documents, median {}",
                        group.id(),
                        group.active_documents(),
                        median
                    );
                }
            }
            group.set_has_full_coverage(group.working_nodes() == group.nodes().len());
        }
    }

    /// Median of the groups' active document counts.
    pub fn median_documents_per_group(&self) -> u64 {
        let mut documents: Vec<u64> = self.groups.iter().map(|g| g.active_documents()).collect();
        documents.sort_unstable();
        let middle = documents.len() / 2;
        match documents.len() {
            0 => 0,
            len if len % 2 == 0 => (documents[middle - 1] + documents[middle]) / 2,
            _ => documents[middle],
        }
    }

    pub fn is_group_coverage_sufficient(&self, active_documents: u64, median_documents: u64) -> bool {
        if median_documents == 0 {
            return true;
        }
        let coverage = 100.0 * active_documents as f64 / median_documents as f64;
        coverage >= self.config.min_activedocs_percentage
    }

    fn is_group_node_coverage_sufficient(&self, group: &Group) -> bool {
        let down = group.nodes().len() - group.working_nodes();
        down as u32 <= self.config.max_nodes_down_per_group
    }

    /// Whether a subset of a group's nodes still holds enough documents to serve queries.
    pub fn is_partial_group_coverage_sufficient(&self, nodes: &[Arc<Node>]) -> bool {
        if self.groups.len() == 1 {
            return true;
        }
        let active: u64 = nodes.iter().map(|n| n.active_documents()).sum();
        self.is_group_coverage_sufficient(active, self.median_documents_per_group())
    }

    /// Hits to ask each of `partitions` nodes for when `wanted` hits are needed overall.
    pub fn estimate_hits_to_fetch(&self, wanted: u32, partitions: u32) -> u32 {
        self.top_k.estimate_k(wanted, partitions)
    }

    pub fn estimate_hits_to_fetch_with(&self, wanted: u32, partitions: u32, probability: f64) -> u32 {
        self.top_k.estimate_k_with(wanted, partitions, probability)
    }
}
