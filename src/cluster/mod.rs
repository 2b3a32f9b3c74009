//! Cluster Topology Module
//!
//! Holds the static layout of the search cluster (groups of content nodes, each group a
//! full copy of the corpus) and the dynamic health state reported for it.
//!
//! ## Core Mechanisms
//! - **Node State**: Working flag, active/target document counts and write blocking,
//!   kept in atomics so queries read them without locks.
//! - **Group Aggregation**: After each round of health reports the group totals, balance
//!   and coverage sufficiency are recomputed against the median group.
//! - **Local Corpus**: A node on this host that is alone in its group is dispatched to
//!   directly.
//!
//! ## Submodules
//! - **`handlers`**: Health ingestion and cluster snapshot endpoints.
//! - **`service`**: `SearchCluster`.
//! - **`types`**: `Node`, `Group`, `NodeStatus`.

pub mod handlers;
pub mod service;
pub mod types;
