//! Search Result Module
//!
//! Value types that flow back from content nodes and the logic that turns many partial
//! answers into one result.
//!
//! ## Responsibilities
//! - **Hits**: `LeanHit`, the minimal comparable hit, with a total order.
//! - **Coverage**: Per-node coverage reports and their aggregation, including
//!   degradation reasons and extrapolation for nodes that did not answer.
//! - **Merging**: Bounded two-way merge of sorted hit lists plus grouping trees.
//! - **Top-K**: How many hits each node must return for the global top hits to survive.
//! - **API**: The public `/search` HTTP endpoint.
//!
//! ## Submodules
//! - **`coverage`**: `Coverage`, `DegradedReason`, `CoverageAggregator`.
//! - **`handlers`**: Axum handlers for the query front end.
//! - **`merge`**: `merge_hits`, `merge_grouping`, `ResultMerger`.
//! - **`topk`**: `TopKEstimator`.
//! - **`types`**: Hits, queries and result DTOs.

pub mod coverage;
pub mod handlers;
pub mod merge;
pub mod topk;
pub mod types;
