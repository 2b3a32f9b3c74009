//! Node Transport Module
//!
//! The seam between the dispatcher and the content nodes. The invokers only see the
//! `NodeConnection` and `ConnectionPool` traits; the production implementation speaks
//! JSON over HTTP with reqwest.
//!
//! ## Submodules
//! - **`client`**: `HttpNodeConnection` and the per-key `HttpConnectionPool`.
//! - **`protocol`**: Endpoint paths and the `NodeRequest` DTO.
//! - **`types`**: The connection traits.

pub mod client;
pub mod protocol;
pub mod types;
