//! How much of the corpus a result covers.
//!
//! Nodes report their own [`Coverage`]; the scatter/gather side folds them together in a
//! [`CoverageAggregator`], which is the only place a merged coverage is built.

use serde::{Deserialize, Serialize};
use std::ops::{BitOr, BitOrAssign};

/// Why a result is degraded. A small bit set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DegradedReason(u32);

impl DegradedReason {
    pub const MATCH_PHASE: Self = Self(1);
    pub const TIMEOUT: Self = Self(2);
    pub const ADAPTIVE_TIMEOUT: Self = Self(4);
    pub const NO_RESULT: Self = Self(8);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && !other.is_empty()
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    /// Flag names, for logs and HTTP responses.
    pub fn names(self) -> Vec<&'static str> {
        [
            (Self::MATCH_PHASE, "match_phase"),
            (Self::TIMEOUT, "timeout"),
            (Self::ADAPTIVE_TIMEOUT, "adaptive_timeout"),
            (Self::NO_RESULT, "no_result"),
        ]
        .into_iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| name)
        .collect()
    }
}

impl BitOr for DegradedReason {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for DegradedReason {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coverage {
    /// Documents searched.
    pub docs: u64,
    /// Documents that should have been searched.
    pub active: u64,
    #[serde(default)]
    pub target_active: u64,
    /// Nodes that answered with data.
    pub nodes: u32,
    pub nodes_tried: u32,
    #[serde(default)]
    pub degraded: DegradedReason,
}

impl Coverage {
    /// Coverage of `nodes` nodes that all answered.
    pub fn new(docs: u64, active: u64, nodes: u32) -> Self {
        Self {
            docs,
            active,
            target_active: active,
            nodes,
            nodes_tried: nodes,
            degraded: DegradedReason::empty(),
        }
    }

    /// `tried` nodes were asked and none of them answered.
    pub fn unanswered(tried: u32) -> Self {
        Self {
            nodes_tried: tried,
            degraded: DegradedReason::TIMEOUT,
            ..Self::default()
        }
    }

    pub fn with_target_active(mut self, target_active: u64) -> Self {
        self.target_active = target_active;
        self
    }

    pub fn with_nodes_tried(mut self, tried: u32) -> Self {
        self.nodes_tried = tried;
        self
    }

    pub fn with_degraded(mut self, reason: DegradedReason) -> Self {
        self.degraded |= reason;
        self
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    pub fn is_degraded_by_match_phase(&self) -> bool {
        self.degraded.contains(DegradedReason::MATCH_PHASE)
    }

    pub fn is_degraded_by_timeout(&self) -> bool {
        self.degraded.contains(DegradedReason::TIMEOUT)
    }

    pub fn is_degraded_by_adaptive_timeout(&self) -> bool {
        self.degraded.contains(DegradedReason::ADAPTIVE_TIMEOUT)
    }

    pub fn is_degraded_by_no_result(&self) -> bool {
        self.degraded.contains(DegradedReason::NO_RESULT)
    }

    pub fn full(&self) -> bool {
        !self.is_degraded() && self.docs >= self.active && self.nodes >= self.nodes_tried
    }

    /// Share of the active documents that were searched, rounded to a whole percent.
    pub fn result_percentage(&self) -> u32 {
        if self.nodes == 0 && self.nodes_tried > 0 {
            return 0;
        }
        if self.active == 0 || self.docs >= self.active {
            return 100;
        }
        (self.docs as f64 * 100.0 / self.active as f64).round() as u32
    }
}

/// Folds per-node coverages into the coverage of one scatter/gather round.
#[derive(Debug, Default)]
pub struct CoverageAggregator {
    asked_nodes: u32,
    answered_nodes: u32,
    answered_nodes_participated: u32,
    docs: u64,
    active: u64,
    target_active: u64,
    timed_out: bool,
    degraded_by_match_phase: bool,
}

impl CoverageAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_asked(&mut self, nodes: u32) {
        self.asked_nodes += nodes;
    }

    /// A node answered with data.
    pub fn collect(&mut self, coverage: &Coverage) {
        self.answered_nodes += 1;
        self.answered_nodes_participated += coverage.nodes;
        self.docs += coverage.docs;
        self.active += coverage.active;
        self.target_active += coverage.target_active;
        if coverage.is_degraded_by_match_phase() {
            self.degraded_by_match_phase = true;
        }
        if coverage.is_degraded_by_timeout() || coverage.is_degraded_by_adaptive_timeout() {
            self.timed_out = true;
        }
    }

    /// A node answered but the answer carried no data.
    pub fn collect_failure(&mut self) {
        self.answered_nodes += 1;
    }

    /// Nodes that could not be asked at all count as asked and answered.
    pub fn add_unreachable(&mut self, nodes: u32) {
        self.asked_nodes += nodes;
        self.answered_nodes += nodes;
    }

    pub fn mark_timed_out(&mut self) {
        self.timed_out = true;
    }

    pub fn asked_nodes(&self) -> u32 {
        self.asked_nodes
    }

    pub fn answered_nodes(&self) -> u32 {
        self.answered_nodes
    }

    pub fn finish(mut self, adaptive_timeout_used: bool, searchable_copies: u32) -> Coverage {
        self.extrapolate_missing(adaptive_timeout_used, searchable_copies);

        let mut degraded = DegradedReason::empty();
        if self.timed_out {
            degraded |= if adaptive_timeout_used {
                DegradedReason::ADAPTIVE_TIMEOUT
            } else {
                DegradedReason::TIMEOUT
            };
        }
        if self.degraded_by_match_phase {
            degraded |= DegradedReason::MATCH_PHASE;
        }
        if self.answered_nodes_participated == 0 && self.asked_nodes > 0 {
            degraded |= DegradedReason::NO_RESULT;
        }

        Coverage {
            docs: self.docs,
            active: self.active,
            target_active: self.target_active,
            nodes: self.answered_nodes_participated,
            nodes_tried: self.asked_nodes.max(self.answered_nodes_participated),
            degraded,
        }
    }

    /// Estimate the active documents of nodes that did not contribute.
    fn extrapolate_missing(&mut self, adaptive_timeout_used: bool, searchable_copies: u32) {
        let participated = u64::from(self.answered_nodes_participated);
        let missing = u64::from(self.asked_nodes).saturating_sub(participated);
        if missing == 0 || participated == 0 {
            return;
        }

        let missing = if adaptive_timeout_used {
            missing
        } else {
            self.timed_out = true;
            missing.saturating_sub(u64::from(searchable_copies.saturating_sub(1)))
        };
        self.active += missing * self.active / participated;
        self.target_active += missing * self.target_active / participated;
    }
}
