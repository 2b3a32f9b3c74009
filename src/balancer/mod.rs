//! Load Balancing Module
//!
//! Per-query group selection. Each group has a scoreboard entry holding its number of
//! running queries and a decayed average of its search latency; the configured policy
//! turns those into a choice.
//!
//! ## Policies
//! - **Round robin**: Cycles through the eligible groups.
//! - **Latency amortized over requests**: Weighted random draw, weight inversely
//!   proportional to average latency times (allocations + 1).
//! - **Latency amortized over time**: Weighted random draw over a time-decayed latency.
//! - **Best of random 2**: Two random groups, the less loaded one wins.
//!
//! Groups with sufficient coverage that accept writes are preferred, then any group
//! with sufficient coverage, then any group at all.

pub mod decay;
pub mod service;
