//! Bounded merging of partial node answers.
//!
//! Every node returns its hits already sorted, so the running result is combined with
//! each arriving list by a two-way merge that stops once enough hits are held. The merged
//! order does not depend on the order in which nodes answer.

use std::cmp::Ordering;

use super::coverage::Coverage;
use super::types::{AuxHit, GroupingNode, LeanHit, PartialResult, QueryResult, ResultError};

/// Merge two sorted hit lists, keeping at most `needed` hits.
///
/// Hits that compare equal are the same document reported twice; only the copy from
/// `current` is kept.
pub fn merge_hits(current: Vec<LeanHit>, partial: Vec<LeanHit>, needed: usize) -> Vec<LeanHit> {
    if partial.is_empty() {
        return current;
    }
    if current.is_empty() {
        let mut partial = partial;
        partial.truncate(needed);
        return partial;
    }

    let mut merged = Vec::with_capacity(needed.min(current.len() + partial.len()));
    let mut current = current.into_iter().peekable();
    let mut partial = partial.into_iter().peekable();

    while merged.len() < needed {
        let next = match (current.peek(), partial.peek()) {
            (Some(c), Some(p)) => match c.cmp(p) {
                Ordering::Less => current.next(),
                Ordering::Greater => partial.next(),
                Ordering::Equal => {
                    partial.next();
                    current.next()
                }
            },
            (Some(_), None) => current.next(),
            (None, Some(_)) => partial.next(),
            (None, None) => None,
        };
        match next {
            Some(hit) => merged.push(hit),
            None => break,
        }
    }
    merged
}

/// Merge `other` into `target`: children matched by id, counts summed.
pub fn merge_grouping(target: &mut GroupingNode, other: GroupingNode) {
    target.count += other.count;
    for child in other.children {
        match target.children.iter_mut().find(|c| c.id == child.id) {
            Some(existing) => merge_grouping(existing, child),
            None => target.children.push(child),
        }
    }
}

/// Running state of one scatter/gather round.
#[derive(Debug)]
pub struct ResultMerger {
    needed: usize,
    hits: Vec<LeanHit>,
    grouping: Option<GroupingNode>,
    aux_hits: Vec<AuxHit>,
    errors: Vec<ResultError>,
}

impl ResultMerger {
    pub fn new(needed: usize) -> Self {
        Self {
            needed,
            hits: Vec::new(),
            grouping: None,
            aux_hits: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn add(&mut self, partial: PartialResult) {
        let hits = std::mem::take(&mut self.hits);
        self.hits = merge_hits(hits, partial.hits, self.needed);

        if let Some(grouping) = partial.grouping {
            match &mut self.grouping {
                Some(root) => merge_grouping(root, grouping),
                None => self.grouping = Some(grouping),
            }
        }
        self.aux_hits.extend(partial.aux_hits);
        self.errors.extend(partial.errors);
    }

    pub fn add_error(&mut self, error: ResultError) {
        self.errors.push(error);
    }

    pub fn hit_count(&self) -> usize {
        self.hits.len()
    }

    /// Cut the `[offset, offset + hits)` window out of the merged hits.
    pub fn finish(self, offset: u32, hits: u32, coverage: Coverage) -> QueryResult {
        QueryResult {
            hits: self
                .hits
                .into_iter()
                .skip(offset as usize)
                .take(hits as usize)
                .collect(),
            coverage,
            grouping: self.grouping,
            aux_hits: self.aux_hits,
            errors: self.errors,
        }
    }
}
