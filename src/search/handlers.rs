use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::coverage::Coverage;
use super::types::{DEFAULT_HITS, GroupingNode, LeanHit, Query, ResultError};
use crate::dispatch::dispatcher::Dispatcher;

const DEFAULT_TIMEOUT_MS: u64 = 500;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: String,
    pub hits: Option<u32>,
    pub offset: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub searchpath: Option<String>,
    pub topk_probability: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitItem {
    pub gid: String,
    pub relevance: f64,
    pub distribution_key: u32,
}

impl From<&LeanHit> for HitItem {
    fn from(hit: &LeanHit) -> Self {
        Self {
            gid: hit.gid_hex(),
            relevance: hit.relevance(),
            distribution_key: hit.distribution_key(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageSummary {
    pub docs: u64,
    pub active: u64,
    pub nodes: u32,
    pub nodes_tried: u32,
    pub full: bool,
    pub result_percentage: u32,
    pub degraded: Vec<String>,
}

impl From<&Coverage> for CoverageSummary {
    fn from(coverage: &Coverage) -> Self {
        Self {
            docs: coverage.docs,
            active: coverage.active,
            nodes: coverage.nodes,
            nodes_tried: coverage.nodes_tried,
            full: coverage.full(),
            result_percentage: coverage.result_percentage(),
            degraded: coverage
                .degraded
                .names()
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query_id: String,
    /// Where the query ended up, e.g. `/1` for group 1.
    pub search_path: Option<String>,
    pub count: usize,
    pub hits: Vec<HitItem>,
    pub coverage: CoverageSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouping: Option<GroupingNode>,
    pub errors: Vec<ResultError>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

pub async fn handle_search(
    axum::extract::Query(params): axum::extract::Query<SearchParams>,
    Extension(dispatcher): Extension<Arc<Dispatcher>>,
) -> Result<Json<SearchResponse>, (StatusCode, Json<ErrorResponse>)> {
    let timeout = Duration::from_millis(params.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS));
    let mut query = Query::new(params.q, dispatcher.clock().now() + timeout)
        .with_hits(params.hits.unwrap_or(DEFAULT_HITS))
        .with_offset(params.offset.unwrap_or(0));
    if let Some(path) = params.searchpath {
        query = query.with_search_path(path);
    }
    if let Some(probability) = params.topk_probability {
        query = query.with_top_k_probability(probability);
    }

    let mut invoker = dispatcher.get_search_invoker(&mut query).map_err(|e| {
        tracing::warn!("Query {} could not be dispatched: {}", query.id, e);
        (
            e.status_code(),
            Json(ErrorResponse {
                code: e.error_code().to_string(),
                message: e.to_string(),
            }),
        )
    })?;

    let result = invoker.search(&query).await;
    invoker.close();

    tracing::info!(
        "Query {} returned {} hits from {}/{} nodes ({}% coverage)",
        query.id,
        result.hits.len(),
        result.coverage.nodes,
        result.coverage.nodes_tried,
        result.coverage.result_percentage()
    );

    Ok(Json(SearchResponse {
        query_id: query.id.0,
        search_path: query.search_path,
        count: result.hits.len(),
        hits: result.hits.iter().map(HitItem::from).collect(),
        coverage: CoverageSummary::from(&result.coverage),
        grouping: result.grouping,
        errors: result.errors,
    }))
}
