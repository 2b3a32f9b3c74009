//! Search Dispatch Library
//!
//! The query-dispatch layer of a grouped search cluster. Given a query it picks the group
//! of content nodes that should serve it, fans the query out to every node of that group,
//! merges the locally sorted partial answers into one globally ordered result and reports
//! how much of the corpus was actually searched.
//!
//! ## Architecture Modules
//! - **`cluster`**: Topology (groups of content nodes) and the health state fed into it
//!   by an external monitor.
//! - **`balancer`**: Per-query group selection with a per-group load/latency scoreboard.
//! - **`search`**: Value types (hits, coverage, results), the bounded k-way hit merge and
//!   the top-K hit estimator.
//! - **`invoker`**: The scatter/gather protocol with adaptive timeouts.
//! - **`dispatch`**: The `Dispatcher` facade and the explicit search-path override syntax.
//! - **`transport`**: The node connection seam and its HTTP implementation.
//! - **`config`**, **`error`**, **`clock`**, **`random`**: Ambient plumbing.

pub mod balancer;
pub mod clock;
pub mod cluster;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod invoker;
pub mod random;
pub mod search;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_utils;
