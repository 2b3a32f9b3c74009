use async_trait::async_trait;
use std::sync::Arc;

use super::protocol::NodeRequest;
use crate::cluster::types::Node;
use crate::error::TransportError;
use crate::search::types::PartialResult;

/// An established channel to one content node.
#[async_trait]
pub trait NodeConnection: Send + Sync {
    async fn search(&self, request: &NodeRequest) -> Result<PartialResult, TransportError>;
}

/// Hands out connections to nodes. Failing here marks the node as unreachable for the
/// query being dispatched.
pub trait ConnectionPool: Send + Sync {
    fn connection(&self, node: &Node) -> Result<Arc<dyn NodeConnection>, TransportError>;
}
