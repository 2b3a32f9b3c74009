//! Dispatch settings and the cluster topology file.
//!
//! [`DispatchConfig`] carries the knobs of group selection, adaptive timeouts and top-K
//! estimation. [`ClusterConfig`] is the JSON file the binary boots from: the node list
//! plus an optional `dispatch` section. Both fill missing fields with the defaults below.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How the load balancer chooses among eligible groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingPolicy {
    RoundRobin,
    #[default]
    LatencyAmortizedOverRequests,
    LatencyAmortizedOverTime,
    BestOfRandom2,
}

impl std::str::FromStr for LoadBalancingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "round_robin" | "roundrobin" => Ok(Self::RoundRobin),
            "latency_amortized_over_requests" => Ok(Self::LatencyAmortizedOverRequests),
            "latency_amortized_over_time" => Ok(Self::LatencyAmortizedOverTime),
            "best_of_random_2" | "best_of_random2" => Ok(Self::BestOfRandom2),
            other => Err(format!("unknown load balancing policy '{}'", other)),
        }
    }
}

fn default_min_search_coverage() -> f64 {
    100.0
}

fn default_min_wait_after_coverage_factor() -> f64 {
    0.0
}

fn default_max_wait_after_coverage_factor() -> f64 {
    1.0
}

fn default_top_k_probability() -> f64 {
    0.9999
}

fn default_min_activedocs_percentage() -> f64 {
    97.0
}

fn default_searchable_copies() -> u32 {
    1
}

fn default_max_hits_per_node() -> u32 {
    u32::MAX
}

/// Settings shared by every query dispatched to one cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Percentage of nodes that must answer before the adaptive window starts.
    #[serde(default = "default_min_search_coverage")]
    pub min_search_coverage: f64,

    /// Lower bound of the adaptive wait, as a fraction of the time left.
    #[serde(default = "default_min_wait_after_coverage_factor")]
    pub min_wait_after_coverage_factor: f64,

    /// Upper bound of the adaptive wait, as a fraction of the time left.
    #[serde(default = "default_max_wait_after_coverage_factor")]
    pub max_wait_after_coverage_factor: f64,

    #[serde(default)]
    pub load_balancing_policy: LoadBalancingPolicy,

    /// Confidence that the global top-K survives per-node truncation.
    #[serde(default = "default_top_k_probability")]
    pub top_k_probability: f64,

    /// A group covers the corpus when its active documents reach this percentage
    /// of the median across groups.
    #[serde(default = "default_min_activedocs_percentage")]
    pub min_activedocs_percentage: f64,

    #[serde(default)]
    pub max_nodes_down_per_group: u32,

    /// Copies of each document kept across the nodes of one group.
    #[serde(default = "default_searchable_copies")]
    pub searchable_copies: u32,

    #[serde(default = "default_max_hits_per_node")]
    pub max_hits_per_node: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            min_search_coverage: default_min_search_coverage(),
            min_wait_after_coverage_factor: default_min_wait_after_coverage_factor(),
            max_wait_after_coverage_factor: default_max_wait_after_coverage_factor(),
            load_balancing_policy: LoadBalancingPolicy::default(),
            top_k_probability: default_top_k_probability(),
            min_activedocs_percentage: default_min_activedocs_percentage(),
            max_nodes_down_per_group: 0,
            searchable_copies: default_searchable_copies(),
            max_hits_per_node: default_max_hits_per_node(),
        }
    }
}

impl DispatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_search_coverage(mut self, percentage: f64) -> Self {
        self.min_search_coverage = percentage;
        self
    }

    /// Set both adaptive wait factors.
    pub fn with_wait_after_coverage(mut self, min_factor: f64, max_factor: f64) -> Self {
        self.min_wait_after_coverage_factor = min_factor;
        self.max_wait_after_coverage_factor = max_factor;
        self
    }

    pub fn with_policy(mut self, policy: LoadBalancingPolicy) -> Self {
        self.load_balancing_policy = policy;
        self
    }

    pub fn with_top_k_probability(mut self, probability: f64) -> Self {
        self.top_k_probability = probability;
        self
    }

    pub fn with_min_activedocs_percentage(mut self, percentage: f64) -> Self {
        self.min_activedocs_percentage = percentage;
        self
    }

    pub fn with_max_nodes_down_per_group(mut self, nodes: u32) -> Self {
        self.max_nodes_down_per_group = nodes;
        self
    }

    pub fn with_searchable_copies(mut self, copies: u32) -> Self {
        self.searchable_copies = copies;
        self
    }

    pub fn with_max_hits_per_node(mut self, hits: u32) -> Self {
        self.max_hits_per_node = hits;
        self
    }

    /// Defaults overridden by `DISPATCH_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `DISPATCH_*` environment variables on top of this configuration.
    ///
    /// Environment variables:
    /// - `DISPATCH_MIN_SEARCH_COVERAGE`
    /// - `DISPATCH_MIN_WAIT_AFTER_COVERAGE_FACTOR`
    /// - `DISPATCH_MAX_WAIT_AFTER_COVERAGE_FACTOR`
    /// - `DISPATCH_LOAD_BALANCING_POLICY` (`round_robin`, `best_of_random_2`, ...)
    /// - `DISPATCH_TOP_K_PROBABILITY`
    /// - `DISPATCH_MIN_ACTIVEDOCS_PERCENTAGE`
    /// - `DISPATCH_MAX_NODES_DOWN_PER_GROUP`
    /// - `DISPATCH_SEARCHABLE_COPIES`
    /// - `DISPATCH_MAX_HITS_PER_NODE`
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup. Unparsable values are ignored.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            name: &str,
        ) -> Option<T> {
            let raw = lookup(name)?;
            match raw.trim().parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!("Ignoring unparsable value '{}' for {}", raw, name);
                    None
                }
            }
        }

        if let Some(v) = parsed(&lookup, "DISPATCH_MIN_SEARCH_COVERAGE") {
            self.min_search_coverage = v;
        }
        if let Some(v) = parsed(&lookup, "DISPATCH_MIN_WAIT_AFTER_COVERAGE_FACTOR") {
            self.min_wait_after_coverage_factor = v;
        }
        if let Some(v) = parsed(&lookup, "DISPATCH_MAX_WAIT_AFTER_COVERAGE_FACTOR") {
            self.max_wait_after_coverage_factor = v;
        }
        if let Some(v) = parsed(&lookup, "DISPATCH_LOAD_BALANCING_POLICY") {
            self.load_balancing_policy = v;
        }
        if let Some(v) = parsed(&lookup, "DISPATCH_TOP_K_PROBABILITY") {
            self.top_k_probability = v;
        }
        if let Some(v) = parsed(&lookup, "DISPATCH_MIN_ACTIVEDOCS_PERCENTAGE") {
            self.min_activedocs_percentage = v;
        }
        if let Some(v) = parsed(&lookup, "DISPATCH_MAX_NODES_DOWN_PER_GROUP") {
            self.max_nodes_down_per_group = v;
        }
        if let Some(v) = parsed(&lookup, "DISPATCH_SEARCHABLE_COPIES") {
            self.searchable_copies = v;
        }
        if let Some(v) = parsed(&lookup, "DISPATCH_MAX_HITS_PER_NODE") {
            self.max_hits_per_node = v;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |name: &'static str, reason: String| ConfigError::InvalidSetting { name, reason };

        if !(0.0..=100.0).contains(&self.min_search_coverage) {
            return Err(invalid(
                "min_search_coverage",
                format!("{} is not a percentage", self.min_search_coverage),
            ));
        }
        if !(0.0..=100.0).contains(&self.min_activedocs_percentage) {
            return Err(invalid(
                "min_activedocs_percentage",
                format!("{} is not a percentage", self.min_activedocs_percentage),
            ));
        }
        let factors = 0.0..=1.0;
        if !factors.contains(&self.min_wait_after_coverage_factor)
            || !factors.contains(&self.max_wait_after_coverage_factor)
            || self.min_wait_after_coverage_factor > self.max_wait_after_coverage_factor
        {
            return Err(invalid(
                "wait_after_coverage_factor",
                format!(
                    "need 0 <= min ({}) <= max ({}) <= 1",
                    self.min_wait_after_coverage_factor, self.max_wait_after_coverage_factor
                ),
            ));
        }
        if self.searchable_copies == 0 {
            return Err(invalid("searchable_copies", "must be at least 1".to_string()));
        }
        if self.max_hits_per_node == 0 {
            return Err(invalid("max_hits_per_node", "must be at least 1".to_string()));
        }
        Ok(())
    }
}

fn default_self_hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

/// One content node in the topology file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub hostname: String,
    #[serde(default)]
    pub port: u16,
    /// Distribution key, unique across the cluster.
    pub key: u32,
    pub group: u32,
}

/// Topology file read by the binary at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Host this dispatcher runs on, used to detect a local corpus.
    #[serde(default = "default_self_hostname")]
    pub self_hostname: String,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    pub nodes: Vec<NodeConfig>,
}

impl ClusterConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading cluster config {}", path.display()))?;
        let config: ClusterConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parsing cluster config {}", path.display()))?;
        config.dispatch.validate()?;
        Ok(config)
    }
}
