//! Explicit `NODES/GROUPS` dispatch overrides.
//!
//! Each side is `*`, empty, or a comma list mixing node/group numbers and half-open
//! ranges `[from,to>`. Numbers on the node side index into the chosen group's node list;
//! numbers on the group side are group ids. Examples: `0/1` (first node of group 1),
//! `[0,2>/` (first two nodes of the first covered group), `*/[1,3>` (all nodes of group
//! 1 or 2, picked at random).

use regex::Regex;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, LazyLock};

use crate::cluster::service::SearchCluster;
use crate::cluster::types::Node;
use crate::error::{PathSide, SearchPathError};
use crate::random::RandomSource;

static WILDCARD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\*(?:,|$)").expect("wildcard pattern"));
static RANGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[(\d+),(\d+)>(?:,|$)").expect("range pattern"));

/// Half-open interval of node indexes or group ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    from: u32,
    to: u32,
}

impl Selection {
    pub fn single(id: u32) -> Self {
        Self {
            from: id,
            to: id.saturating_add(1),
        }
    }

    pub fn range(from: u32, to: u32) -> Self {
        Self { from, to }
    }

    fn ids(self, limit: usize) -> impl Iterator<Item = usize> {
        let to = (self.to as usize).min(limit);
        (self.from as usize)..to.max(self.from as usize)
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.from.checked_add(1) == Some(self.to) {
            write!(f, "{}", self.from)
        } else {
            write!(f, "[{},{}>", self.from, self.to)
        }
    }
}

/// A parsed search path. An empty side selects everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPath {
    nodes: Vec<Selection>,
    groups: Vec<Selection>,
}

impl SearchPath {
    /// `Ok(None)` for an empty path.
    pub fn parse(path: &str) -> Result<Option<SearchPath>, SearchPathError> {
        let path = path.trim();
        if path.is_empty() {
            return Ok(None);
        }
        let (nodes, groups) = match path.split_once('/') {
            Some((_, groups)) if groups.contains('/') => {
                return Err(SearchPathError::TooManySlashes(path.to_string()));
            }
            Some((nodes, groups)) => (nodes, groups),
            None => (path, ""),
        };
        Ok(Some(SearchPath {
            nodes: parse_selections(nodes, PathSide::Nodes)?,
            groups: parse_selections(groups, PathSide::Groups)?,
        }))
    }

    pub fn nodes(&self) -> &[Selection] {
        &self.nodes
    }

    pub fn groups(&self) -> &[Selection] {
        &self.groups
    }

    /// Resolve the path against the cluster. May pick a group at random.
    pub fn select_nodes(
        &self,
        cluster: &SearchCluster,
        random: &mut dyn RandomSource,
    ) -> Result<Vec<Arc<Node>>, SearchPathError> {
        let group = if self.groups.is_empty() {
            cluster
                .groups()
                .iter()
                .find(|g| g.has_sufficient_coverage())
                .ok_or(SearchPathError::NoWorkingGroups)?
        } else {
            let group_count = cluster.groups().len();
            let highest = self
                .groups
                .iter()
                .filter(|s| s.to > s.from)
                .map(|s| s.to as usize)
                .max()
                .unwrap_or(0);
            if highest > group_count {
                return Err(SearchPathError::NoSuchGroup { needed: highest });
            }
            let ids: Vec<usize> = self
                .groups
                .iter()
                .flat_map(|s| s.ids(group_count))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            let chosen = ids[random.next_index(ids.len())];
            cluster
                .group(chosen as u32)
                .ok_or(SearchPathError::NoSuchGroup { needed: chosen + 1 })?
        };

        if self.nodes.is_empty() {
            return Ok(group.nodes().to_vec());
        }
        let members = group.nodes();
        let indexes: BTreeSet<usize> = self
            .nodes
            .iter()
            .flat_map(|s| s.ids(members.len()))
            .collect();
        Ok(indexes
            .into_iter()
            .filter_map(|i| members.get(i).cloned())
            .collect())
    }
}

impl fmt::Display for SearchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", join(&self.nodes))?;
        if !self.groups.is_empty() {
            write!(f, "/{}", join(&self.groups))?;
        }
        Ok(())
    }
}

fn join(selections: &[Selection]) -> String {
    selections
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Comma separated numbers and ranges. A `*` selects everything, an empty item is an error.
fn parse_selections(mut rest: &str, side: PathSide) -> Result<Vec<Selection>, SearchPathError> {
    let mut selections = Vec::new();
    while !rest.is_empty() {
        if rest.starts_with('[') {
            let captures = RANGE
                .captures(rest)
                .ok_or_else(|| invalid(side, rest.split(',').take(2).collect::<Vec<_>>().join(",")))?;
            let from = parse_number(&captures[1], side)?;
            let to = parse_number(&captures[2], side)?;
            if from >= to {
                return Err(SearchPathError::InvalidRange { side, lo: from, hi: to });
            }
            selections.push(Selection::range(from, to));
            rest = &rest[captures[0].len()..];
        } else if WILDCARD.is_match(rest) {
            return Ok(Vec::new());
        } else {
            let (number, remaining) = rest.split_once(',').unwrap_or((rest, ""));
            let id = parse_number(number, side)?;
            // `[MAX,MAX+1>` is not representable
            if id == u32::MAX {
                return Err(invalid(side, number));
            }
            selections.push(Selection::single(id));
            rest = remaining;
        }
    }
    Ok(selections)
}

fn parse_number(token: &str, side: PathSide) -> Result<u32, SearchPathError> {
    token.trim().parse().map_err(|_| invalid(side, token))
}

fn invalid(side: PathSide, token: impl Into<String>) -> SearchPathError {
    SearchPathError::InvalidSelection {
        side,
        token: token.into(),
    }
}
