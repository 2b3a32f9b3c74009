//! Error types for query dispatch.
//!
//! Per-node failures never surface here: they degrade coverage and are carried on the
//! result as [`crate::search::types::ResultError`] annotations. These enums cover the
//! failures that stop a query from being dispatched at all, plus configuration and
//! transport problems.

use std::fmt;

use axum::http::StatusCode;
use thiserror::Error;

/// Which side of a `NODES/GROUPS` search path an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathSide {
    Nodes,
    Groups,
}

impl fmt::Display for PathSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSide::Nodes => write!(f, "node"),
            PathSide::Groups => write!(f, "group"),
        }
    }
}

/// Malformed or unsatisfiable search path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SearchPathError {
    #[error("Invalid search path '{0}': at most one '/' is allowed")]
    TooManySlashes(String),

    #[error("Invalid {side} selection in search path: '{token}'")]
    InvalidSelection { side: PathSide, token: String },

    #[error("Invalid {side} range [{lo},{hi}> in search path: lower bound must be below upper bound")]
    InvalidRange { side: PathSide, lo: u32, hi: u32 },

    #[error("Invalid search path: cluster does not have {needed} groups")]
    NoSuchGroup { needed: usize },

    #[error("Invalid search path: no group has sufficient coverage")]
    NoWorkingGroups,
}

/// Failures that prevent the dispatcher from producing an invoker.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    InvalidSearchPath(#[from] SearchPathError),

    #[error("Could not dispatch directly to {hostname} (distribution key {key})")]
    DirectDispatch { key: u32, hostname: String },

    #[error("No suitable groups to dispatch query. Rejected: {rejected:?}")]
    NoSuitableGroups { rejected: Vec<u32> },
}

impl DispatchError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidSearchPath(_) => StatusCode::BAD_REQUEST,
            Self::DirectDispatch { .. } | Self::NoSuitableGroups { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidSearchPath(_) => "INVALID_SEARCH_PATH",
            Self::DirectDispatch { .. } => "DIRECT_DISPATCH_FAILED",
            Self::NoSuitableGroups { .. } => "NO_SUITABLE_GROUPS",
        }
    }
}

/// Errors raised while talking to a single content node.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Cannot connect to node {key}: {reason}")]
    Connect { key: u32, reason: String },

    #[error("Request to node {key} failed: {reason}")]
    Request { key: u32, reason: String },

    #[error("Node {key} answered with HTTP status {status}")]
    Status { key: u32, status: u16 },

    #[error("Request to node {key} timed out")]
    Timeout { key: u32 },
}

impl TransportError {
    pub fn key(&self) -> u32 {
        match self {
            Self::Connect { key, .. }
            | Self::Request { key, .. }
            | Self::Status { key, .. }
            | Self::Timeout { key } => *key,
        }
    }
}

/// Invalid topology or dispatch settings.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Cluster has no nodes")]
    Empty,

    #[error("Distribution key {0} is used by more than one node")]
    DuplicateKey(u32),

    #[error("Group ids must be dense from 0, but group {0} has no nodes")]
    MissingGroup(u32),

    #[error("Invalid dispatch setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },
}
