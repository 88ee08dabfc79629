mod common;

use histree::{BasicInterval, HistoryTree, HtInterval, TimeRangeCondition, TreeConfig};
use tempfile::tempdir;

use common::{build, expected_tags, overlaps, random_intervals, tagged, tags, XorShift};

fn config() -> TreeConfig {
    TreeConfig::default().with_block_size(512).with_max_children(3)
}

fn check_against_brute_force(tree: &HistoryTree<BasicInterval>, intervals: &[(i64, i64)], seed: u64) {
    let horizon = intervals.iter().map(|&(_, end)| end).max().unwrap_or(0) + 20;
    let mut rng = XorShift::new(seed);
    for _ in 0..150 {
        let t = rng.below(horizon as u64) - 10;
        let found = tree
            .query_all(&TimeRangeCondition::singleton(t))
            .expect("stab");
        assert_eq!(
            tags(&found),
            expected_tags(intervals, |s, e| overlaps(s, e, t, t)),
            "singleton {t}"
        );

        let a = rng.below(horizon as u64);
        let b = a + rng.below(300);
        let found = tree
            .query_all(&TimeRangeCondition::range(a, b))
            .expect("range");
        assert_eq!(
            tags(&found),
            expected_tags(intervals, |s, e| overlaps(s, e, a, b)),
            "range [{a}, {b}]"
        );

        let points = [rng.below(horizon as u64), rng.below(horizon as u64), t];
        let condition = TimeRangeCondition::discrete(points).expect("points");
        let found = tree.query_all(&condition).expect("discrete");
        assert_eq!(
            tags(&found),
            expected_tags(intervals, |s, e| points.iter().any(|&p| overlaps(s, e, p, p))),
            "discrete {points:?}"
        );
    }
}

#[test]
fn queries_match_brute_force_before_and_after_close() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("brute.ht");
    let intervals = random_intervals(2_000, 42);

    let tree = build(&path, config(), &intervals);
    check_against_brute_force(&tree, &intervals, 1);
    tree.close_tree(tree.tree_end()).expect("close");
    check_against_brute_force(&tree, &intervals, 2);
    drop(tree);

    let tree = HistoryTree::open(&path, 0).expect("open");
    check_against_brute_force(&tree, &intervals, 3);
}

#[test]
fn overlapping_siblings_do_not_hide_long_intervals() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("overlap.ht");
    let mut intervals = vec![(0, 1_000_000)];
    intervals.extend((1..3_000).map(|i| (i * 10, i * 10 + 5)));
    let tree = build(&path, config(), &intervals);
    tree.close_tree(tree.tree_end()).expect("close");

    // The long interval lives in the first leaf, whose range therefore
    // covers every later sibling.
    let first_leaf = tree.read_node(0).expect("leaf 0");
    assert_eq!(first_leaf.end(), 1_000_000);
    let root = tree.read_node(tree.root_seq()).expect("root");
    let links = root.children();
    assert!(links.len() > 1);
    assert!(links.windows(2).any(|pair| pair[0].end > pair[1].start));

    for t in [15, 12_345, 29_990, 999_999] {
        let found = tree.query_all(&TimeRangeCondition::singleton(t)).expect("stab");
        assert!(found.iter().any(|i| common::tag(i) == 0), "long interval missing at {t}");
        assert_eq!(tags(&found), expected_tags(&intervals, |s, e| overlaps(s, e, t, t)));
    }
    assert!(tree
        .query_all(&TimeRangeCondition::singleton(1_000_000))
        .expect("stab")
        .is_empty());
}

#[test]
fn exact_fill_stays_in_leaf_and_next_interval_opens_sibling() {
    let dir = tempdir().expect("tempdir");
    let config = TreeConfig::default().with_block_size(4096).with_max_children(4);
    let capacity = config.leaf_capacity();
    let tree = HistoryTree::create(dir.path().join("edge.ht"), config).expect("create");

    // 64-byte records, then one sized to use the remaining bytes exactly.
    let full_records = capacity / 64 - 1;
    for i in 0..full_records as i64 {
        tree.insert(BasicInterval::new(i, i + 100, vec![0u8; 44]).unwrap())
            .expect("insert");
    }
    let rest = capacity - full_records * 64;
    let last_start = full_records as i64;
    tree.insert(BasicInterval::new(last_start, last_start + 100, vec![1u8; rest - 20]).unwrap())
        .expect("exact fill");
    let leaf = tree.latest_branch().pop().expect("leaf");
    assert_eq!(leaf.free_space(), 0);
    assert_eq!(tree.node_count(), 1);

    let next_start = last_start + 3;
    tree.insert(tagged(0, next_start, next_start + 1)).expect("overflow");
    assert_eq!(tree.node_count(), 3);
    let branch = tree.latest_branch();
    let new_leaf = &branch[branch.len() - 1];
    assert_eq!(new_leaf.seq(), 2);
    assert_eq!(new_leaf.start(), next_start.max(leaf.start()));
    assert!(leaf.is_closed());
    assert_eq!(leaf.end(), last_start + 100);

    let found = tree
        .query_all(&TimeRangeCondition::singleton(next_start))
        .expect("stab");
    assert_eq!(found.len(), full_records + 2);
    assert!(found.iter().any(|i| i.start() == next_start));
    tree.close_tree(tree.tree_end()).expect("close");
}

#[test]
fn limits_and_predicates_stop_early() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("lazy.ht");
    let intervals: Vec<(i64, i64)> = (0..1_000).map(|i| (i, i + 10_000)).collect();
    let tree = build(&path, config(), &intervals);
    tree.close_tree(tree.tree_end()).expect("close");

    let condition = TimeRangeCondition::singleton(5_000);
    let first_five: Vec<_> = tree
        .query(&condition)
        .take(5)
        .collect::<Result<_, _>>()
        .expect("take");
    assert_eq!(first_five.len(), 5);

    let odd = tree
        .query_filtered(&condition, |i| i.start() % 2 == 1)
        .collect::<Result<Vec<_>, _>>()
        .expect("filtered");
    assert_eq!(odd.len(), 500);

    let found = tree
        .first_match(&condition, |i| common::tag(i) == 777)
        .expect("first match")
        .expect("present");
    assert_eq!(found.start(), 777);
}
