use std::sync::Arc;
use tokio::sync::mpsc;

use crate::clock::Clock;
use crate::cluster::types::Node;
use crate::error::TransportError;
use crate::search::coverage::{Coverage, DegradedReason};
use crate::search::types::{PartialResult, Query, QueryResult, ResultError};
use crate::transport::protocol::NodeRequest;
use crate::transport::types::NodeConnection;

/// An answer (or failure) from one node, tagged with the slot it was sent from.
#[derive(Debug)]
pub(crate) struct Completion {
    pub slot: usize,
    pub outcome: Result<PartialResult, TransportError>,
}

/// Searches a single node.
pub struct NodeInvoker {
    node: Arc<Node>,
    connection: Arc<dyn NodeConnection>,
    clock: Arc<dyn Clock>,
}

impl NodeInvoker {
    pub fn new(node: Arc<Node>, connection: Arc<dyn NodeConnection>, clock: Arc<dyn Clock>) -> Self {
        Self {
            node,
            connection,
            clock,
        }
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub fn distribution_key(&self) -> u32 {
        self.node.key()
    }

    /// Fire the request on its own task. The answer is pushed into `completions`; if the
    /// coordinator has stopped listening the answer is dropped.
    pub(crate) fn send(
        &self,
        request: NodeRequest,
        slot: usize,
        completions: mpsc::UnboundedSender<Completion>,
    ) {
        let connection = self.connection.clone();
        let key = self.node.key();
        tokio::spawn(async move {
            let outcome = connection.search(&request).await;
            if completions.send(Completion { slot, outcome }).is_err() {
                tracing::trace!("Dropping late answer from node {}", key);
            }
        });
    }

    /// Run the whole query against this node alone.
    pub async fn search(&self, query: &Query) -> QueryResult {
        let Some(time_left) = query.time_left(self.clock.now()) else {
            return self.timeout_result();
        };
        let request = NodeRequest::new(query, query.hits_needed(), time_left);

        match tokio::time::timeout(time_left, self.connection.search(&request)).await {
            Ok(Ok(partial)) => QueryResult {
                hits: partial
                    .hits
                    .into_iter()
                    .skip(query.offset as usize)
                    .take(query.hits as usize)
                    .collect(),
                coverage: partial.coverage,
                grouping: partial.grouping,
                aux_hits: partial.aux_hits,
                errors: partial.errors,
            },
            Ok(Err(e)) => {
                tracing::warn!("Search on node {} failed: {}", self.node, e);
                QueryResult::error(
                    ResultError::BackendCommunication(e.to_string()),
                    Coverage::unanswered(1),
                )
            }
            Err(_) => self.timeout_result(),
        }
    }

    fn timeout_result(&self) -> QueryResult {
        tracing::warn!("Search on node {} timed out", self.node);
        QueryResult::error(
            ResultError::Timeout(format!(
                "Backend communication timeout on node with distribution-key {}",
                self.node.key()
            )),
            Coverage::unanswered(1),
        )
    }
}

/// Yields a prepared failure without contacting any node.
#[derive(Debug, Clone)]
pub struct ErrorInvoker {
    error: ResultError,
    coverage: Coverage,
}

impl ErrorInvoker {
    pub fn new(error: ResultError, coverage: Coverage) -> Self {
        Self { error, coverage }
    }

    /// None of `keys` could be connected to.
    pub fn connection_failure(keys: &[u32]) -> Self {
        let coverage =
            Coverage::unanswered(keys.len() as u32).with_degraded(DegradedReason::NO_RESULT);
        Self::new(
            ResultError::BackendCommunication(format!(
                "Connection failure on nodes with distribution-keys: {}",
                join_keys(keys)
            )),
            coverage,
        )
    }

    pub fn error(&self) -> &ResultError {
        &self.error
    }

    pub fn result(&self) -> QueryResult {
        QueryResult::error(self.error.clone(), self.coverage.clone())
    }
}

pub(crate) fn join_keys(keys: &[u32]) -> String {
    keys.iter()
        .map(|k| k.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
