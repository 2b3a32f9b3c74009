//! Shared fixtures for the module tests: scripted randomness, a manual clock, mock node
//! connections and cluster builders.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::clock::Clock;
use crate::cluster::service::SearchCluster;
use crate::cluster::types::{Node, NodeStatus};
use crate::config::DispatchConfig;
use crate::error::TransportError;
use crate::random::RandomSource;
use crate::search::coverage::Coverage;
use crate::search::types::{GlobalId, LeanHit, PartialResult};
use crate::transport::protocol::NodeRequest;
use crate::transport::types::{ConnectionPool, NodeConnection};

/// Random source replaying fixed values. Falls back to 0 when exhausted.
#[derive(Default)]
pub struct ScriptedRandom {
    floats: VecDeque<f64>,
    indexes: VecDeque<usize>,
}

impl ScriptedRandom {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_floats(mut self, values: &[f64]) -> Self {
        self.floats.extend(values);
        self
    }

    pub fn with_indexes(mut self, values: &[usize]) -> Self {
        self.indexes.extend(values);
        self
    }
}

impl RandomSource for ScriptedRandom {
    fn next_f64(&mut self) -> f64 {
        self.floats.pop_front().unwrap_or(0.0)
    }

    fn next_index(&mut self, bound: usize) -> usize {
        self.indexes.pop_front().unwrap_or(0).min(bound - 1)
    }
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(Instant::now()),
        })
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

pub fn gid(n: u64) -> GlobalId {
    let mut gid = [0u8; 12];
    gid[4..].copy_from_slice(&n.to_be_bytes());
    gid
}

pub fn hit(id: u64, relevance: f64) -> LeanHit {
    LeanHit::new(gid(id), 0, 0, relevance)
}

pub fn hit_from(key: u32, id: u64, relevance: f64) -> LeanHit {
    LeanHit::new(gid(id), 0, key, relevance)
}

/// A node answer covering `docs` documents with hits of the given relevances, sorted.
pub fn answer(key: u32, docs: u64, hits: &[(u64, f64)]) -> PartialResult {
    let mut hits: Vec<LeanHit> = hits.iter().map(|&(id, r)| hit_from(key, id, r)).collect();
    hits.sort();
    PartialResult {
        hits,
        coverage: Coverage::new(docs, docs, 1),
        ..PartialResult::default()
    }
}

#[derive(Clone)]
pub enum MockBehavior {
    Answer(PartialResult),
    Fail,
    /// Never answers within any test timeout.
    Hang,
}

/// Node connection answering after a fixed delay and recording what it was asked.
pub struct MockConnection {
    key: u32,
    delay: Duration,
    behavior: MockBehavior,
    calls: AtomicUsize,
    requests: Mutex<Vec<NodeRequest>>,
}

impl MockConnection {
    pub fn new(key: u32, delay: Duration, behavior: MockBehavior) -> Arc<Self> {
        Arc::new(Self {
            key,
            delay,
            behavior,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<NodeRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl NodeConnection for MockConnection {
    async fn search(&self, request: &NodeRequest) -> Result<PartialResult, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        match &self.behavior {
            MockBehavior::Answer(partial) => {
                tokio::time::sleep(self.delay).await;
                let mut partial = partial.clone();
                partial.hits.truncate(request.hits as usize);
                Ok(partial)
            }
            MockBehavior::Fail => {
                tokio::time::sleep(self.delay).await;
                Err(TransportError::Request {
                    key: self.key,
                    reason: "connection reset".to_string(),
                })
            }
            MockBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(TransportError::Timeout { key: self.key })
            }
        }
    }
}

/// Connection pool over mock connections. Keys without a connection are unreachable.
#[derive(Default)]
pub struct MockPool {
    connections: HashMap<u32, Arc<MockConnection>>,
    unreachable: HashSet<u32>,
}

impl MockPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answering(mut self, key: u32, delay: Duration, partial: PartialResult) -> Self {
        self.connections
            .insert(key, MockConnection::new(key, delay, MockBehavior::Answer(partial)));
        self
    }

    pub fn failing(mut self, key: u32, delay: Duration) -> Self {
        self.connections
            .insert(key, MockConnection::new(key, delay, MockBehavior::Fail));
        self
    }

    pub fn hanging(mut self, key: u32) -> Self {
        self.connections
            .insert(key, MockConnection::new(key, Duration::ZERO, MockBehavior::Hang));
        self
    }

    pub fn unreachable(mut self, key: u32) -> Self {
        self.unreachable.insert(key);
        self
    }

    pub fn connection_for(&self, key: u32) -> Arc<MockConnection> {
        self.connections[&key].clone()
    }

    pub fn total_calls(&self) -> usize {
        self.connections.values().map(|c| c.calls()).sum()
    }
}

impl ConnectionPool for MockPool {
    fn connection(&self, node: &Node) -> Result<Arc<dyn NodeConnection>, TransportError> {
        if self.unreachable.contains(&node.key()) {
            return Err(TransportError::Connect {
                key: node.key(),
                reason: "refused".to_string(),
            });
        }
        match self.connections.get(&node.key()) {
            Some(connection) => Ok(connection.clone() as Arc<dyn NodeConnection>),
            None => Err(TransportError::Connect {
                key: node.key(),
                reason: "no mock connection".to_string(),
            }),
        }
    }
}

/// `groups` groups of `nodes_per_group` nodes on distinct hosts. Key = group * nodes + index.
pub fn cluster(groups: u32, nodes_per_group: u32, config: DispatchConfig) -> Arc<SearchCluster> {
    let nodes = (0..groups)
        .flat_map(|g| {
            (0..nodes_per_group).map(move |i| {
                let key = g * nodes_per_group + i;
                Node::new(format!("node-{}", key), 19100, key, g)
            })
        })
        .collect();
    Arc::new(SearchCluster::new(config, nodes, "dispatcher-host").unwrap())
}

/// Report every node working with `docs` active documents and recompute coverage.
pub fn report_docs(cluster: &SearchCluster, docs: u64) {
    for group in cluster.groups() {
        for node in group.nodes() {
            cluster.update_node_status(&NodeStatus {
                key: node.key(),
                working: true,
                active_documents: docs,
                target_active_documents: docs,
                blocking_writes: false,
            });
        }
    }
    cluster.ping_iteration_completed();
}
