use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::interleaved::InterleavedSearchInvoker;
use super::node::{ErrorInvoker, NodeInvoker};
use crate::clock::Clock;
use crate::search::types::{Query, QueryResult};

/// Runs once when an invoker is closed, with whether the search succeeded and how
/// long it took.
pub type Teardown = Box<dyn FnOnce(bool, Duration) + Send>;

/// The shapes a dispatched search can take.
pub enum InvokerKind {
    Node(NodeInvoker),
    Interleaved(InterleavedSearchInvoker),
    Error(ErrorInvoker),
}

impl InvokerKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Node(_) => "node",
            Self::Interleaved(_) => "interleaved",
            Self::Error(_) => "error",
        }
    }
}

/// A search ready to run against its chosen target.
///
/// Closing (explicitly or by dropping) runs the teardown exactly once.
pub struct SearchInvoker {
    kind: InvokerKind,
    clock: Arc<dyn Clock>,
    teardown: Option<Teardown>,
    started: Option<Instant>,
    success: bool,
}

impl SearchInvoker {
    pub fn new(kind: InvokerKind, clock: Arc<dyn Clock>) -> Self {
        Self {
            kind,
            clock,
            teardown: None,
            started: None,
            success: false,
        }
    }

    pub fn kind(&self) -> &InvokerKind {
        &self.kind
    }

    pub fn set_teardown(&mut self, teardown: Teardown) {
        self.teardown = Some(teardown);
    }

    /// Distribution keys this invoker will query.
    pub fn distribution_keys(&self) -> Vec<u32> {
        match &self.kind {
            InvokerKind::Node(node) => vec![node.distribution_key()],
            InvokerKind::Interleaved(interleaved) => interleaved.distribution_keys(),
            InvokerKind::Error(_) => Vec::new(),
        }
    }

    pub async fn search(&mut self, query: &Query) -> QueryResult {
        self.started = Some(self.clock.now());
        let result = match &self.kind {
            InvokerKind::Node(node) => node.search(query).await,
            InvokerKind::Interleaved(interleaved) => interleaved.search(query).await,
            InvokerKind::Error(error) => error.result(),
        };
        self.success = !result.has_error();
        result
    }

    pub fn close(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            let elapsed = self
                .started
                .map(|started| self.clock.now().saturating_duration_since(started))
                .unwrap_or_default();
            teardown(self.success, elapsed);
        }
    }
}

impl Drop for SearchInvoker {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for SearchInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchInvoker")
            .field("kind", &self.kind.name())
            .field("distribution_keys", &self.distribution_keys())
            .field("has_teardown", &self.teardown.is_some())
            .finish()
    }
}
