//! Stateful accept/reject gates over `(url, metadata)` pairs.

use std::collections::HashSet;
use std::sync::Arc;

use crate::filter::{FilterError, FilterExpr};
use crate::message::Kwdict;

/// A stateful gate deciding whether an item is acted upon.
pub trait Predicate: Send {
    fn test(&mut self, url: &str, kwdict: &Kwdict) -> Result<bool, FilterError>;
}

/// Accepts each distinct URL exactly once.
#[derive(Debug, Default)]
pub struct UniquePredicate {
    seen: HashSet<String>,
}

impl UniquePredicate {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Predicate for UniquePredicate {
    fn test(&mut self, url: &str, _kwdict: &Kwdict) -> Result<bool, FilterError> {
        Ok(self.seen.insert(url.to_string()))
    }
}

/// Accepts items for which a user expression evaluates to true.
#[derive(Clone)]
pub struct FilterPredicate {
    expr: Arc<dyn FilterExpr>,
}

impl FilterPredicate {
    pub fn new(expr: Arc<dyn FilterExpr>) -> Self {
        Self { expr }
    }
}

impl Predicate for FilterPredicate {
    fn test(&mut self, _url: &str, kwdict: &Kwdict) -> Result<bool, FilterError> {
        self.expr.evaluate(kwdict)
    }
}

/// Inclusive, 1-based index ranges; `u64::MAX` stands for an open upper bound.
pub type Ranges = Vec<(u64, u64)>;

/// Accepts the n-th item only if n falls into one of the configured ranges.
#[derive(Debug, Clone)]
pub struct RangePredicate {
    ranges: Ranges,
    index: u64,
}

impl RangePredicate {
    pub fn new(ranges: Ranges) -> Self {
        Self { ranges, index: 0 }
    }

    /// Lowest accepted index, or 0 when no range is configured.
    pub fn lower(&self) -> u64 {
        self.ranges.first().map_or(0, |r| r.0)
    }

    /// Highest accepted index, or 0 when no range is configured.
    pub fn upper(&self) -> u64 {
        self.ranges.last().map_or(0, |r| r.1)
    }

    /// Count `skipped` items as already seen without evaluating them.
    pub fn advance(&mut self, skipped: u64) {
        self.index += skipped;
    }

    pub fn index(&self) -> u64 {
        self.index
    }
}

impl Predicate for RangePredicate {
    fn test(&mut self, _url: &str, _kwdict: &Kwdict) -> Result<bool, FilterError> {
        self.index += 1;
        let index = self.index;
        Ok(self
            .ranges
            .iter()
            .any(|&(lower, upper)| lower <= index && index <= upper))
    }
}

/// Left-to-right conjunction of predicates.
///
/// Evaluation stops at the first rejection, so predicates further right keep
/// their state untouched for that item.
#[derive(Default)]
pub struct PredicateChain {
    predicates: Vec<Box<dyn Predicate>>,
}

impl PredicateChain {
    pub fn build(predicates: Vec<Box<dyn Predicate>>) -> Self {
        Self { predicates }
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn test(&mut self, url: &str, kwdict: &Kwdict) -> Result<bool, FilterError> {
        for predicate in &mut self.predicates {
            if !predicate.test(url, kwdict)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Parse a range expression like `"1-3, 5, 8-"`.
///
/// Returns `None` if any part is malformed. A bare `-5` means `1-5` and a
/// trailing `8-` has no upper bound.
pub fn parse_range(spec: &str) -> Option<Ranges> {
    let mut ranges = Ranges::new();
    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let range = match part.split_once('-') {
            Some((lower, upper)) => {
                let lower = match lower.trim() {
                    "" => 1,
                    text => text.parse().ok()?,
                };
                let upper = match upper.trim() {
                    "" => u64::MAX,
                    text => text.parse().ok()?,
                };
                (lower, upper)
            }
            None => {
                let index = part.parse().ok()?;
                (index, index)
            }
        };
        ranges.push(range);
    }
    Some(ranges)
}

/// Sort ranges, drop empty ones and merge overlapping or adjacent ones.
pub fn optimize_range(mut ranges: Ranges) -> Ranges {
    ranges.retain(|&(lower, upper)| lower <= upper && upper > 0);
    for range in &mut ranges {
        range.0 = range.0.max(1);
    }
    ranges.sort_unstable();

    let mut merged: Ranges = Vec::with_capacity(ranges.len());
    for (lower, upper) in ranges {
        match merged.last_mut() {
            Some(last) if lower <= last.1.saturating_add(1) => last.1 = last.1.max(upper),
            _ => merged.push((lower, upper)),
        }
    }
    merged
}
