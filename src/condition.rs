//! Time conditions used to select nodes and intervals.

use std::fmt;

/// A set of timestamps a query is interested in.
///
/// `Range` bounds are inclusive on both ends. `Discrete` holds a sorted,
/// deduplicated, non-empty list of points.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimeRangeCondition {
    Range { min: i64, max: i64 },
    Discrete(Vec<i64>),
}

impl TimeRangeCondition {
    /// Every representable timestamp.
    pub fn all() -> Self {
        Self::Range {
            min: i64::MIN,
            max: i64::MAX,
        }
    }

    pub fn singleton(t: i64) -> Self {
        Self::Range { min: t, max: t }
    }

    /// Inclusive range; bounds are swapped when given in reverse.
    pub fn range(a: i64, b: i64) -> Self {
        Self::Range {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Returns `None` for an empty set of points.
    pub fn discrete<I: IntoIterator<Item = i64>>(points: I) -> Option<Self> {
        let mut points: Vec<i64> = points.into_iter().collect();
        if points.is_empty() {
            return None;
        }
        points.sort_unstable();
        points.dedup();
        if points.len() == 1 {
            return Some(Self::singleton(points[0]));
        }
        Some(Self::Discrete(points))
    }

    pub fn min(&self) -> i64 {
        match self {
            Self::Range { min, .. } => *min,
            Self::Discrete(points) => points[0],
        }
    }

    pub fn max(&self) -> i64 {
        match self {
            Self::Range { max, .. } => *max,
            Self::Discrete(points) => points[points.len() - 1],
        }
    }

    pub fn contains(&self, t: i64) -> bool {
        match self {
            Self::Range { min, max } => *min <= t && t <= *max,
            Self::Discrete(points) => points.binary_search(&t).is_ok(),
        }
    }

    /// Whether any point of the condition lies in `[low, high]`.
    pub fn intersects(&self, low: i64, high: i64) -> bool {
        if low > high {
            return false;
        }
        match self {
            Self::Range { min, max } => *min <= high && low <= *max,
            Self::Discrete(points) => {
                let idx = points.partition_point(|&p| p < low);
                idx < points.len() && points[idx] <= high
            }
        }
    }

    /// Whether an interval `[start, end)` overlaps the condition.
    ///
    /// A zero-length interval is treated as the single point `start`.
    pub fn intersects_interval(&self, start: i64, end: i64) -> bool {
        let last = if end > start { end - 1 } else { start };
        self.intersects(start, last)
    }

    /// Narrows the condition to `[from, to]`, or `None` if nothing is left.
    pub fn sub_condition(&self, from: i64, to: i64) -> Option<Self> {
        if from > to {
            return None;
        }
        match self {
            Self::Range { min, max } => {
                let low = (*min).max(from);
                let high = (*max).min(to);
                (low <= high).then_some(Self::Range {
                    min: low,
                    max: high,
                })
            }
            Self::Discrete(points) => {
                let lo = points.partition_point(|&p| p < from);
                let hi = points.partition_point(|&p| p <= to);
                Self::discrete(points[lo..hi].iter().copied())
            }
        }
    }
}

impl fmt::Display for TimeRangeCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Range { min, max } => write!(f, "[{min}, {max}]"),
            Self::Discrete(points) => write!(f, "{points:?}"),
        }
    }
}
