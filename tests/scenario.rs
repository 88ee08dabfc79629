use histree::io::read_header_at;
use histree::{BasicInterval, HistoryTree, HtInterval, NodeType, TimeRangeCondition, TreeConfig};
use tempfile::tempdir;

const BLOCK: usize = 4096;
const CHILDREN: usize = 4;
const COUNT: i64 = 500;

/// 20 bytes of bounds and length plus 44 bytes of payload.
fn record(start: i64) -> BasicInterval {
    BasicInterval::new(start, start + 100, vec![0xEE; 44]).expect("interval")
}

#[test]
fn five_hundred_fixed_size_intervals() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("scenario.ht");
    let config = TreeConfig::default()
        .with_block_size(BLOCK)
        .with_max_children(CHILDREN);
    let tree = HistoryTree::create(&path, config).expect("create");
    for start in 0..COUNT {
        let interval = record(start);
        assert_eq!(interval.size_on_disk(), 64);
        tree.insert(interval).expect("insert");
    }
    tree.close_tree(tree.tree_end()).expect("close");

    // 63 records per leaf: eight leaves, a full first root, then a new root.
    assert!(tree.depth() > 1);
    assert_eq!(tree.depth(), 3);
    assert_eq!(tree.node_count(), 11);
    assert_eq!(tree.tree_end(), COUNT - 1 + 100);
    assert_eq!(read_header_at(&path).expect("header").node_count, tree.node_count());

    let mut leaves = 0;
    let mut stored = 0;
    for seq in 0..tree.node_count() {
        let node = tree.read_node(seq).expect("node");
        assert!(node.is_closed());
        if node.node_type() == NodeType::Leaf {
            leaves += 1;
            stored += node.intervals().len();
        } else {
            assert!(node.child_count() <= CHILDREN);
        }
    }
    assert_eq!(leaves, 8);
    assert_eq!(stored, COUNT as usize);
    tree.verify_integrity().expect("integrity");
    drop(tree);

    let tree = HistoryTree::<BasicInterval>::open(&path, 0).expect("open");
    let found = tree
        .query_all(&TimeRangeCondition::singleton(250))
        .expect("stab");
    let mut starts: Vec<i64> = found.iter().map(|i| i.start()).collect();
    starts.sort_unstable();
    assert_eq!(starts, (151..=250).collect::<Vec<_>>());
}

#[test]
fn close_then_query_and_double_close() {
    let dir = tempdir().expect("tempdir");
    let config = TreeConfig::default()
        .with_block_size(BLOCK)
        .with_max_children(CHILDREN);
    let tree = HistoryTree::create(dir.path().join("close.ht"), config).expect("create");
    for start in 0..200 {
        tree.insert(record(start)).expect("insert");
    }
    tree.close_tree(1_000).expect("close");
    assert!(tree.is_closed());
    assert_eq!(tree.tree_end(), 1_000);

    let found = tree.query_all(&TimeRangeCondition::singleton(150)).expect("stab");
    assert_eq!(found.len(), 100);
    assert!(tree.latest_branch().iter().all(|node| node.is_closed()));
    assert!(matches!(
        tree.close_tree(2_000),
        Err(histree::Error::TreeClosed)
    ));
}
