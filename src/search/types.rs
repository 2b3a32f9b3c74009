use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use super::coverage::Coverage;

pub const GID_LENGTH: usize = 12;

/// Global document id.
pub type GlobalId = [u8; GID_LENGTH];

/// Hits asked for when a query does not say.
pub const DEFAULT_HITS: u32 = 10;

/// Minimal ranked hit as returned by a content node.
///
/// Ordered by sort data when both hits carry it, otherwise by relevance descending.
/// Ties fall back to the global id so the order is total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeanHit {
    gid: GlobalId,
    part_id: u32,
    distribution_key: u32,
    relevance: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sort_data: Option<Vec<u8>>,
}

impl LeanHit {
    pub fn new(gid: GlobalId, part_id: u32, distribution_key: u32, relevance: f64) -> Self {
        Self {
            gid,
            part_id,
            distribution_key,
            relevance: if relevance.is_nan() {
                f64::NEG_INFINITY
            } else {
                relevance
            },
            sort_data: None,
        }
    }

    pub fn with_sort_data(
        gid: GlobalId,
        part_id: u32,
        distribution_key: u32,
        sort_data: Vec<u8>,
    ) -> Self {
        Self {
            sort_data: Some(sort_data),
            ..Self::new(gid, part_id, distribution_key, 0.0)
        }
    }

    pub fn gid(&self) -> &GlobalId {
        &self.gid
    }

    pub fn part_id(&self) -> u32 {
        self.part_id
    }

    pub fn distribution_key(&self) -> u32 {
        self.distribution_key
    }

    pub fn relevance(&self) -> f64 {
        self.rank()
    }

    pub fn sort_data(&self) -> Option<&[u8]> {
        self.sort_data.as_deref()
    }

    pub fn has_sort_data(&self) -> bool {
        self.sort_data.is_some()
    }

    /// Relevance with NaN ranked last, also for hits that arrived over the wire.
    fn rank(&self) -> f64 {
        if self.relevance.is_nan() {
            f64::NEG_INFINITY
        } else {
            self.relevance
        }
    }

    pub fn gid_hex(&self) -> String {
        self.gid.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl Ord for LeanHit {
    fn cmp(&self, other: &Self) -> Ordering {
        let primary = match (&self.sort_data, &other.sort_data) {
            (Some(mine), Some(theirs)) => mine.cmp(theirs),
            _ => other.rank().total_cmp(&self.rank()),
        };
        primary.then_with(|| self.gid.cmp(&other.gid))
    }
}

impl PartialOrd for LeanHit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for LeanHit {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for LeanHit {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct QueryId(pub String);

impl QueryId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for QueryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A query as seen by the dispatch layer. The payload is opaque here.
#[derive(Debug, Clone)]
pub struct Query {
    pub id: QueryId,
    pub payload: String,
    pub hits: u32,
    pub offset: u32,
    pub deadline: Instant,
    /// `NODES/GROUPS` override. Set to `/<group>` once a group has been chosen.
    pub search_path: Option<String>,
    pub top_k_probability: Option<f64>,
}

impl Query {
    pub fn new(payload: impl Into<String>, deadline: Instant) -> Self {
        Self {
            id: QueryId::new(),
            payload: payload.into(),
            hits: DEFAULT_HITS,
            offset: 0,
            deadline,
            search_path: None,
            top_k_probability: None,
        }
    }

    pub fn with_hits(mut self, hits: u32) -> Self {
        self.hits = hits;
        self
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_search_path(mut self, path: impl Into<String>) -> Self {
        self.search_path = Some(path.into());
        self
    }

    pub fn with_top_k_probability(mut self, probability: f64) -> Self {
        self.top_k_probability = Some(probability);
        self
    }

    /// Hits that must be collected before the window is cut out.
    pub fn hits_needed(&self) -> u32 {
        self.hits.saturating_add(self.offset)
    }

    /// `None` once the deadline has passed.
    pub fn time_left(&self, now: Instant) -> Option<Duration> {
        self.deadline
            .checked_duration_since(now)
            .filter(|left| !left.is_zero())
    }
}

/// Error annotation carried on a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ResultError {
    BackendCommunication(String),
    Timeout(String),
    IllegalQuery(String),
    Backend(String),
}

impl ResultError {
    pub fn message(&self) -> &str {
        match self {
            Self::BackendCommunication(m)
            | Self::Timeout(m)
            | Self::IllegalQuery(m)
            | Self::Backend(m) => m,
        }
    }
}

impl fmt::Display for ResultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::BackendCommunication(_) => "Backend communication error",
            Self::Timeout(_) => "Timeout",
            Self::IllegalQuery(_) => "Illegal query",
            Self::Backend(_) => "Backend error",
        };
        write!(f, "{}: {}", kind, self.message())
    }
}

/// One level of a grouping result tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupingNode {
    pub id: String,
    pub count: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<GroupingNode>,
}

impl GroupingNode {
    pub fn new(id: impl Into<String>, count: u64) -> Self {
        Self {
            id: id.into(),
            count,
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: GroupingNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn child(&self, id: &str) -> Option<&GroupingNode> {
        self.children.iter().find(|c| c.id == id)
    }
}

/// Auxiliary hit returned next to the ranked hits, e.g. a match-feature dump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuxHit {
    pub distribution_key: u32,
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// What a single content node answers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartialResult {
    /// Sorted by the node.
    #[serde(default)]
    pub hits: Vec<LeanHit>,
    #[serde(default)]
    pub coverage: Coverage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouping: Option<GroupingNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aux_hits: Vec<AuxHit>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ResultError>,
}

/// The merged answer for one query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResult {
    pub hits: Vec<LeanHit>,
    pub coverage: Coverage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouping: Option<GroupingNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aux_hits: Vec<AuxHit>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ResultError>,
}

impl QueryResult {
    pub fn error(error: ResultError, coverage: Coverage) -> Self {
        Self {
            coverage,
            errors: vec![error],
            ..Self::default()
        }
    }

    pub fn has_error(&self) -> bool {
        !self.errors.is_empty()
    }
}
