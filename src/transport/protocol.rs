//! Node Search Protocol
//!
//! Endpoints and DTOs exchanged between the dispatcher and content nodes. Bodies are JSON
//! over HTTP; a node answers a [`NodeRequest`] with a
//! [`PartialResult`](crate::search::types::PartialResult).

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::search::types::{Query, QueryId};

// --- API Endpoints ---

/// Content node endpoint serving one query against its local corpus.
pub const ENDPOINT_NODE_SEARCH: &str = "/internal/search";
/// Dispatcher endpoint receiving health reports from the monitor.
pub const ENDPOINT_NODE_STATUS: &str = "/internal/node_status";
/// Dispatcher query endpoint.
pub const ENDPOINT_SEARCH: &str = "/search";
/// Dispatcher endpoint describing the current group state.
pub const ENDPOINT_CLUSTER: &str = "/cluster";

// --- Data Transfer Objects ---

/// One query sent to one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRequest {
    pub query_id: QueryId,
    /// Opaque query payload, forwarded untouched.
    pub payload: String,
    /// Hits the node should return, counted from the top.
    pub hits: u32,
    pub offset: u32,
    /// Time the node has before the dispatcher stops waiting.
    pub timeout_ms: u64,
}

impl NodeRequest {
    pub fn new(query: &Query, hits: u32, timeout: Duration) -> Self {
        Self {
            query_id: query.id.clone(),
            payload: query.payload.clone(),
            hits,
            offset: 0,
            timeout_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
