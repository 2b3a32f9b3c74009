use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::protocol::{ENDPOINT_NODE_SEARCH, NodeRequest};
use super::types::{ConnectionPool, NodeConnection};
use crate::cluster::types::Node;
use crate::error::TransportError;
use crate::search::types::PartialResult;

const CONNECT_ATTEMPTS: usize = 2;
const INITIAL_BACKOFF_MS: u64 = 20;

/// JSON-over-HTTP connection to one content node.
pub struct HttpNodeConnection {
    key: u32,
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpNodeConnection {
    pub fn new(node: &Node, http_client: reqwest::Client) -> Self {
        Self {
            key: node.key(),
            base_url: format!("http://{}:{}", node.hostname(), node.port()),
            http_client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST with a short retry on connection failures, never past `deadline`.
    async fn post_with_retry(
        &self,
        url: &str,
        request: &NodeRequest,
        deadline: Instant,
    ) -> Result<reqwest::Response, TransportError> {
        let mut delay_ms = INITIAL_BACKOFF_MS;

        for attempt in 0..CONNECT_ATTEMPTS {
            let Some(timeout) = deadline.checked_duration_since(Instant::now()) else {
                return Err(TransportError::Timeout { key: self.key });
            };
            let response = self
                .http_client
                .post(url)
                .json(request)
                .timeout(timeout)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_timeout() => return Err(TransportError::Timeout { key: self.key }),
                Err(e) if e.is_connect() && attempt + 1 < CONNECT_ATTEMPTS => {
                    let jitter = rand::random::<u64>() % 10;
                    tracing::debug!(
                        "Connect to node {} failed ({}), retrying in {} ms",
                        self.key,
                        e,
                        delay_ms + jitter
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms *= 2;
                }
                Err(e) if e.is_connect() => {
                    return Err(TransportError::Connect {
                        key: self.key,
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    return Err(TransportError::Request {
                        key: self.key,
                        reason: e.to_string(),
                    });
                }
            }
        }

        Err(TransportError::Request {
            key: self.key,
            reason: "retry attempts exhausted".to_string(),
        })
    }
}

#[async_trait]
impl NodeConnection for HttpNodeConnection {
    async fn search(&self, request: &NodeRequest) -> Result<PartialResult, TransportError> {
        let deadline = Instant::now() + request.timeout();
        let url = format!("{}{}", self.base_url, ENDPOINT_NODE_SEARCH);
        let response = self.post_with_retry(&url, request, deadline).await?;

        if !response.status().is_success() {
            return Err(TransportError::Status {
                key: self.key,
                status: response.status().as_u16(),
            });
        }

        response
            .json::<PartialResult>()
            .await
            .map_err(|e| TransportError::Request {
                key: self.key,
                reason: format!("invalid response body: {}", e),
            })
    }
}

/// One cached HTTP connection per distribution key, sharing a single reqwest client.
pub struct HttpConnectionPool {
    connections: DashMap<u32, Arc<HttpNodeConnection>>,
    http_client: reqwest::Client,
}

impl HttpConnectionPool {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            http_client: reqwest::Client::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for HttpConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionPool for HttpConnectionPool {
    fn connection(&self, node: &Node) -> Result<Arc<dyn NodeConnection>, TransportError> {
        if node.port() == 0 {
            return Err(TransportError::Connect {
                key: node.key(),
                reason: format!("no port configured for {}", node.hostname()),
            });
        }
        let connection: Arc<dyn NodeConnection> = self
            .connections
            .entry(node.key())
            .or_insert_with(|| Arc::new(HttpNodeConnection::new(node, self.http_client.clone())))
            .clone();
        Ok(connection)
    }
}
