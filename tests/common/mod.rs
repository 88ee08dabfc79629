#![allow(dead_code)]

use std::path::Path;

use histree::{BasicInterval, HistoryTree, HtInterval, TreeConfig};

/// Small deterministic generator so failures reproduce.
pub struct XorShift(u64);

impl XorShift {
    pub fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    pub fn below(&mut self, bound: u64) -> i64 {
        (self.next_u64() % bound) as i64
    }
}

/// Intervals with non-decreasing starts; some are zero-length, some long.
pub fn random_intervals(count: usize, seed: u64) -> Vec<(i64, i64)> {
    let mut rng = XorShift::new(seed);
    let mut start = 0;
    (0..count)
        .map(|_| {
            start += rng.below(5);
            let duration = match rng.below(10) {
                0 => 0,
                1 => rng.below(5_000),
                _ => rng.below(200),
            };
            (start, start + duration)
        })
        .collect()
}

pub fn tagged(index: usize, start: i64, end: i64) -> BasicInterval {
    BasicInterval::new(start, end, (index as u32).to_le_bytes().to_vec()).expect("interval")
}

pub fn tag(interval: &BasicInterval) -> u32 {
    u32::from_le_bytes(interval.payload().try_into().expect("tag payload"))
}

pub fn build(path: &Path, config: TreeConfig, intervals: &[(i64, i64)]) -> HistoryTree<BasicInterval> {
    let tree = HistoryTree::create(path, config).expect("create");
    for (index, &(start, end)) in intervals.iter().enumerate() {
        tree.insert(tagged(index, start, end)).expect("insert");
    }
    tree
}

/// Sorted tags of the intervals in `found`.
pub fn tags(found: &[BasicInterval]) -> Vec<u32> {
    let mut out: Vec<u32> = found.iter().map(tag).collect();
    out.sort_unstable();
    out
}

/// Half-open overlap of `[start, end)` with the closed range `[low, high]`;
/// an empty interval is the point `start`.
pub fn overlaps(start: i64, end: i64, low: i64, high: i64) -> bool {
    if start == end {
        low <= start && start <= high
    } else {
        start <= high && end > low
    }
}

pub fn expected_tags(intervals: &[(i64, i64)], hit: impl Fn(i64, i64) -> bool) -> Vec<u32> {
    intervals
        .iter()
        .enumerate()
        .filter(|(_, &(start, end))| hit(start, end))
        .map(|(index, _)| index as u32)
        .collect()
}

pub fn bounds(interval: &BasicInterval) -> (i64, i64) {
    (interval.start(), interval.end())
}
