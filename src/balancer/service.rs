use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::decay::{DEFAULT_HALF_LIFE, LatencyDecay};
use crate::clock::{Clock, TokioClock};
use crate::cluster::types::Group;
use crate::config::LoadBalancingPolicy;
use crate::random::{RandomSource, StdRandom};

/// Load and latency bookkeeping for one group.
pub struct GroupStatus {
    group: Arc<Group>,
    allocations: AtomicUsize,
    latency: Mutex<LatencyDecay>,
}

impl GroupStatus {
    fn new(group: Arc<Group>, policy: LoadBalancingPolicy) -> Self {
        let decay = match policy {
            LoadBalancingPolicy::LatencyAmortizedOverTime => LatencyDecay::by_time(DEFAULT_HALF_LIFE),
            _ => LatencyDecay::by_requests(),
        };
        Self {
            group,
            allocations: AtomicUsize::new(0),
            latency: Mutex::new(decay),
        }
    }

    pub fn group(&self) -> &Arc<Group> {
        &self.group
    }

    /// Queries currently running against this group.
    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::Relaxed)
    }

    /// Decayed average search time in seconds.
    pub fn average_search_time(&self) -> f64 {
        self.latency.lock().average_search_time()
    }

    fn allocate(&self) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    fn release(&self, success: bool, elapsed: Duration, now: tokio::time::Instant) {
        let _ = self
            .allocations
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        if success {
            self.latency.lock().record(elapsed, now);
        }
    }

    fn weight(&self, policy: LoadBalancingPolicy) -> f64 {
        let average = self.average_search_time();
        match policy {
            LoadBalancingPolicy::LatencyAmortizedOverTime => 1.0 / average,
            _ => 1.0 / (average * (self.allocations() + 1) as f64),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Eligibility {
    /// Sufficient coverage and accepting writes.
    Preferred,
    /// Sufficient coverage.
    Covered,
    Any,
}

impl Eligibility {
    const PASSES: [Eligibility; 3] = [Self::Preferred, Self::Covered, Self::Any];

    fn admits(self, group: &Group) -> bool {
        match self {
            Self::Preferred => group.has_sufficient_coverage() && !group.is_blocking_writes(),
            Self::Covered => group.has_sufficient_coverage(),
            Self::Any => true,
        }
    }
}

/// Chooses the group that serves each query and keeps a scoreboard of their load.
///
/// The scoreboard is indexed by group id. Shared by all queries.
pub struct LoadBalancer {
    policy: LoadBalancingPolicy,
    scoreboard: Vec<GroupStatus>,
    needle: Mutex<usize>,
    random: Mutex<Box<dyn RandomSource>>,
    clock: Arc<dyn Clock>,
}

impl LoadBalancer {
    pub fn new(groups: &[Arc<Group>], policy: LoadBalancingPolicy) -> Self {
        Self::with_sources(groups, policy, Box::new(StdRandom::new()), Arc::new(TokioClock))
    }

    pub fn with_sources(
        groups: &[Arc<Group>],
        policy: LoadBalancingPolicy,
        random: Box<dyn RandomSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            policy,
            scoreboard: groups
                .iter()
                .map(|g| GroupStatus::new(g.clone(), policy))
                .collect(),
            needle: Mutex::new(0),
            random: Mutex::new(random),
            clock,
        }
    }

    pub fn policy(&self) -> LoadBalancingPolicy {
        self.policy
    }

    pub fn group_status(&self, id: u32) -> Option<&GroupStatus> {
        self.scoreboard.get(id as usize)
    }

    /// Allocate a group for one query, skipping `rejected` ids.
    ///
    /// Every successful call must be paired with [`LoadBalancer::release_group`].
    pub fn take_group(&self, rejected: &HashSet<u32>) -> Option<Arc<Group>> {
        let status = self.select(rejected)?;
        status.allocate();
        tracing::debug!(
            "Took group {} ({} allocations, {:.3} ms average)",
            status.group.id(),
            status.allocations(),
            status.average_search_time() * 1000.0
        );
        Some(status.group.clone())
    }

    /// Free a group taken by [`LoadBalancer::take_group`]. Only successful searches
    /// contribute a latency sample.
    pub fn release_group(&self, group: &Group, success: bool, elapsed: Duration) {
        match self.scoreboard.get(group.id() as usize) {
            Some(status) => status.release(success, elapsed, self.clock.now()),
            None => tracing::warn!("Release of unknown group {}", group.id()),
        }
    }

    fn select(&self, rejected: &HashSet<u32>) -> Option<&GroupStatus> {
        for pass in Eligibility::PASSES {
            let candidates: Vec<&GroupStatus> = self
                .scoreboard
                .iter()
                .filter(|s| !rejected.contains(&s.group.id()) && pass.admits(&s.group))
                .collect();
            if candidates.is_empty() {
                continue;
            }
            if !matches!(pass, Eligibility::Preferred) {
                tracing::debug!("Selecting among groups of the {:?} pass", pass);
            }
            return match self.policy {
                LoadBalancingPolicy::RoundRobin => self.round_robin(&candidates),
                LoadBalancingPolicy::LatencyAmortizedOverRequests
                | LoadBalancingPolicy::LatencyAmortizedOverTime => self.weighted(&candidates),
                LoadBalancingPolicy::BestOfRandom2 => self.best_of_two(&candidates),
            };
        }
        None
    }

    /// The first candidate at or after the needle, cyclically by group id.
    fn round_robin<'a>(&self, candidates: &[&'a GroupStatus]) -> Option<&'a GroupStatus> {
        let size = self.scoreboard.len();
        let mut needle = self.needle.lock();
        let chosen = candidates
            .iter()
            .copied()
            .min_by_key(|s| (s.group.id() as usize + size - *needle % size) % size)?;
        *needle = (chosen.group.id() as usize + 1) % size;
        Some(chosen)
    }

    /// Random draw weighted by inverse latency.
    fn weighted<'a>(&self, candidates: &[&'a GroupStatus]) -> Option<&'a GroupStatus> {
        let weights: Vec<f64> = candidates.iter().map(|s| s.weight(self.policy)).collect();
        let total: f64 = weights.iter().sum();
        let needle = self.random.lock().next_f64() * total;

        let mut accumulated = 0.0;
        for (status, weight) in candidates.iter().zip(&weights) {
            accumulated += weight;
            if needle < accumulated {
                return Some(*status);
            }
        }
        candidates.last().copied()
    }

    /// Two distinct random candidates; the one with fewer allocations wins.
    fn best_of_two<'a>(&self, candidates: &[&'a GroupStatus]) -> Option<&'a GroupStatus> {
        let mut pool = candidates.to_vec();
        let mut random = self.random.lock();
        let first = pool.remove(random.next_index(pool.len()));
        if pool.is_empty() {
            return Some(first);
        }
        let second = pool.remove(random.next_index(pool.len()));
        Some(if second.allocations() < first.allocations() {
            second
        } else {
            first
        })
    }
}
