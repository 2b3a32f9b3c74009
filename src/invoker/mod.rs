//! Search Invoker Module
//!
//! Runs one query against the nodes chosen for it.
//!
//! ## Architecture Overview
//! 1. **Construction**: `InvokerFactory` turns a node list into an invoker, dropping nodes
//!    that are down or unreachable and deciding whether the rest is good enough.
//! 2. **Scatter**: Each node request runs on its own tokio task and reports back through
//!    an unbounded channel.
//! 3. **Gather**: The coordinator merges answers as they arrive, waiting the full query
//!    timeout until enough nodes have answered and then an adaptive, shrinking window.
//! 4. **Teardown**: Closing the invoker reports success and elapsed time exactly once,
//!    which the dispatcher uses to release the group to the load balancer.
//!
//! ## Submodules
//! - **`factory`**: `InvokerFactory`.
//! - **`interleaved`**: Scatter/gather over several nodes of one group.
//! - **`node`**: Single node and prepared-error invokers.
//! - **`timeout`**: The adaptive timeout state machine.
//! - **`types`**: `SearchInvoker` and its variants.

pub mod factory;
pub mod interleaved;
pub mod node;
pub mod timeout;
pub mod types;
