use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Largest relative deviation from the average node size for a group to count as balanced.
pub const MAX_UNBALANCE: f64 = 0.10;

/// Per-node document count a group needs before per-node hit counts are estimated.
pub const MIN_DOCS_PER_NODE_FOR_TOP_K: u64 = 100;

/// A content node. Identity is fixed; health is updated in place by the monitor.
#[derive(Debug)]
pub struct Node {
    hostname: String,
    port: u16,
    key: u32,
    group: u32,
    working: AtomicBool,
    active_documents: AtomicU64,
    target_active_documents: AtomicU64,
    blocking_writes: AtomicBool,
}

impl Node {
    pub fn new(hostname: impl Into<String>, port: u16, key: u32, group: u32) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            key,
            group,
            working: AtomicBool::new(true),
            active_documents: AtomicU64::new(0),
            target_active_documents: AtomicU64::new(0),
            blocking_writes: AtomicBool::new(false),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Distribution key.
    pub fn key(&self) -> u32 {
        self.key
    }

    pub fn group(&self) -> u32 {
        self.group
    }

    pub fn is_working(&self) -> bool {
        self.working.load(Ordering::Relaxed)
    }

    pub fn set_working(&self, working: bool) {
        self.working.store(working, Ordering::Relaxed);
    }

    pub fn active_documents(&self) -> u64 {
        self.active_documents.load(Ordering::Relaxed)
    }

    pub fn target_active_documents(&self) -> u64 {
        self.target_active_documents.load(Ordering::Relaxed)
    }

    pub fn set_active_documents(&self, active: u64, target: u64) {
        self.active_documents.store(active, Ordering::Relaxed);
        self.target_active_documents.store(target, Ordering::Relaxed);
    }

    pub fn is_blocking_writes(&self) -> bool {
        self.blocking_writes.load(Ordering::Relaxed)
    }

    pub fn set_blocking_writes(&self, blocking: bool) {
        self.blocking_writes.store(blocking, Ordering::Relaxed);
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "search node key = {} hostname = {} group = {}",
            self.key, self.hostname, self.group
        )
    }
}

/// A group of nodes that together hold one full copy of the corpus.
#[derive(Debug)]
pub struct Group {
    id: u32,
    nodes: Vec<Arc<Node>>,
    has_sufficient_coverage: AtomicBool,
    has_full_coverage: AtomicBool,
    active_documents: AtomicU64,
    target_active_documents: AtomicU64,
    blocking_writes: AtomicBool,
    balanced: AtomicBool,
}

impl Group {
    pub fn new(id: u32, nodes: Vec<Arc<Node>>) -> Self {
        Self {
            id,
            nodes,
            has_sufficient_coverage: AtomicBool::new(true),
            has_full_coverage: AtomicBool::new(true),
            active_documents: AtomicU64::new(0),
            target_active_documents: AtomicU64::new(0),
            blocking_writes: AtomicBool::new(false),
            balanced: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    pub fn working_nodes(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_working()).count()
    }

    /// Recompute the group aggregates from the current node states.
    pub fn aggregate_node_values(&self) {
        let working: Vec<&Arc<Node>> = self.nodes.iter().filter(|n| n.is_working()).collect();
        let active: u64 = working.iter().map(|n| n.active_documents()).sum();
        let target: u64 = working.iter().map(|n| n.target_active_documents()).sum();
        let blocking = working.iter().any(|n| n.is_blocking_writes());

        let balanced = if working.is_empty() || active == 0 {
            true
        } else {
            let average = active as f64 / working.len() as f64;
            let max_deviation = working
                .iter()
                .map(|n| (n.active_documents() as f64 - average).abs())
                .fold(0.0, f64::max);
            max_deviation / average <= MAX_UNBALANCE
        };

        self.active_documents.store(active, Ordering::Relaxed);
        self.target_active_documents.store(target, Ordering::Relaxed);
        self.blocking_writes.store(blocking, Ordering::Relaxed);
        let was_balanced = self.balanced.swap(balanced, Ordering::Relaxed);
        if was_balanced != balanced {
            if balanced {
                tracing::info!("Content group {} is now balanced", self.id);
            } else {
                tracing::warn!(
                    "Content group {} is unbalanced: {} active documents over {} working nodes",
                    self.id,
                    active,
                    working.len()
                );
            }
        }
    }

    pub fn has_sufficient_coverage(&self) -> bool {
        self.has_sufficient_coverage.load(Ordering::Relaxed)
    }

    /// Returns the previous value.
    pub fn set_has_sufficient_coverage(&self, sufficient: bool) -> bool {
        self.has_sufficient_coverage.swap(sufficient, Ordering::Relaxed)
    }

    pub fn has_full_coverage(&self) -> bool {
        self.has_full_coverage.load(Ordering::Relaxed)
    }

    pub fn set_has_full_coverage(&self, full: bool) {
        self.has_full_coverage.store(full, Ordering::Relaxed);
    }

    pub fn active_documents(&self) -> u64 {
        self.active_documents.load(Ordering::Relaxed)
    }

    pub fn target_active_documents(&self) -> u64 {
        self.target_active_documents.load(Ordering::Relaxed)
    }

    pub fn is_blocking_writes(&self) -> bool {
        self.blocking_writes.load(Ordering::Relaxed)
    }

    pub fn is_balanced(&self) -> bool {
        self.balanced.load(Ordering::Relaxed)
    }

    /// Per-node hit counts may be estimated only on balanced, writable groups with
    /// enough documents on every node.
    pub fn allows_top_k_estimate(&self) -> bool {
        self.is_balanced()
            && !self.is_blocking_writes()
            && self.active_documents() >= MIN_DOCS_PER_NODE_FOR_TOP_K * self.nodes.len() as u64
    }
}

/// Health report for one node, pushed by the external monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub key: u32,
    pub working: bool,
    #[serde(default)]
    pub active_documents: u64,
    #[serde(default)]
    pub target_active_documents: u64,
    #[serde(default)]
    pub blocking_writes: bool,
}

/// Snapshot of one group for the `/cluster` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSnapshot {
    pub id: u32,
    pub nodes: usize,
    pub working_nodes: usize,
    pub active_documents: u64,
    pub sufficient_coverage: bool,
    pub full_coverage: bool,
    pub balanced: bool,
    pub blocking_writes: bool,
    pub allocations: usize,
    pub average_search_time_ms: f64,
}
