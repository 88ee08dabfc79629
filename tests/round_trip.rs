mod common;

use std::fs;

use histree::io::read_header_at;
use histree::{BasicInterval, Error, HistoryTree, HtInterval, TimeRangeCondition, TreeConfig};
use tempfile::tempdir;

use common::{build, random_intervals, tags};

fn config() -> TreeConfig {
    TreeConfig::default()
        .with_block_size(1024)
        .with_max_children(4)
        .with_provider_version(3)
}

#[test]
fn reopened_tree_returns_every_interval() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("states.ht");
    let intervals = random_intervals(1_500, 7);

    let tree = build(&path, config(), &intervals);
    let end = tree.tree_end() + 10;
    tree.close_tree(end).expect("close");
    let (node_count, depth, root) = (tree.node_count(), tree.depth(), tree.root_seq());
    assert!(depth > 2, "expected a deep tree, got depth {depth}");
    drop(tree);

    let header = read_header_at(&path).expect("header");
    assert_eq!(header.node_count, node_count);
    assert_eq!(header.root_seq, root as i32);
    assert_eq!(header.provider_version, 3);

    let tree = HistoryTree::<BasicInterval>::open(&path, 3).expect("open");
    assert_eq!(tree.node_count(), node_count);
    assert_eq!(tree.depth(), depth);
    assert_eq!(tree.tree_start(), 0);
    assert_eq!(tree.tree_end(), end);
    assert_eq!(
        tree.file_size().expect("size"),
        4096 + node_count as u64 * 1024
    );
    tree.verify_integrity().expect("integrity");

    let all = tree.query_all(&TimeRangeCondition::all()).expect("query");
    let expected: Vec<u32> = (0..intervals.len() as u32).collect();
    assert_eq!(tags(&all), expected);
    for interval in &all {
        let (start, end) = intervals[common::tag(interval) as usize];
        assert_eq!((interval.start(), interval.end()), (start, end));
    }
}

#[test]
fn read_only_tree_rejects_writes() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("ro.ht");
    let tree = build(&path, config(), &[(0, 10), (5, 6)]);
    tree.close_tree(10).expect("close");
    drop(tree);

    let tree = HistoryTree::<BasicInterval>::open(&path, 3).expect("open");
    assert!(tree.is_read_only());
    let interval = BasicInterval::new(20, 30, Vec::new()).unwrap();
    assert!(matches!(tree.insert(interval), Err(Error::ReadOnly)));
    assert!(matches!(tree.close_tree(50), Err(Error::ReadOnly)));
}

#[test]
fn rejected_open_leaves_file_untouched() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("good.ht");
    let tree = build(&path, config(), &random_intervals(300, 11));
    tree.close_tree(tree.tree_end()).expect("close");
    drop(tree);
    let original = fs::read(&path).expect("read");

    let err = HistoryTree::<BasicInterval>::open(&path, 4).unwrap_err();
    assert!(matches!(
        err,
        Error::ProviderVersionMismatch { expected: 4, found: 3 }
    ));
    assert!(err.is_format_error());
    assert!(matches!(
        HistoryTree::<BasicInterval>::open_for_append(&path, 4),
        Err(Error::ProviderVersionMismatch { .. })
    ));
    assert_eq!(fs::read(&path).expect("read"), original);

    let bad_magic = dir.path().join("magic.ht");
    let mut bytes = original.clone();
    bytes[0] ^= 0xFF;
    fs::write(&bad_magic, &bytes).expect("write");
    assert!(matches!(
        HistoryTree::<BasicInterval>::open_for_append(&bad_magic, 3),
        Err(Error::BadMagic { .. })
    ));
    assert_eq!(fs::read(&bad_magic).expect("read"), bytes);

    let bad_version = dir.path().join("version.ht");
    let mut bytes = original.clone();
    bytes[4..8].copy_from_slice(&99u32.to_le_bytes());
    fs::write(&bad_version, &bytes).expect("write");
    assert!(matches!(
        HistoryTree::<BasicInterval>::open(&bad_version, 3),
        Err(Error::UnsupportedVersion { expected: 1, found: 99 })
    ));

    let truncated = dir.path().join("short.ht");
    fs::write(&truncated, &original[..original.len() - 100]).expect("write");
    assert!(matches!(
        HistoryTree::<BasicInterval>::open(&truncated, 3),
        Err(Error::Truncated { .. })
    ));
}

#[test]
fn corrupt_node_is_reported_on_read() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("flip.ht");
    let tree = build(&path, config(), &random_intervals(300, 5));
    tree.close_tree(tree.tree_end()).expect("close");
    assert!(tree.node_count() > 3);
    drop(tree);

    // Node 0 is the first leaf; it is never on the latest branch here.
    let mut bytes = fs::read(&path).expect("read");
    bytes[4096 + 100] ^= 0x40;
    fs::write(&path, &bytes).expect("write");

    let tree = HistoryTree::<BasicInterval>::open(&path, 3).expect("open");
    let err = tree.verify_integrity().unwrap_err();
    assert!(matches!(err, Error::Corrupt { offset: 4096, .. }));
    let results: Vec<_> = tree.query(&TimeRangeCondition::singleton(0)).collect();
    assert!(results.iter().any(|r| matches!(r, Err(Error::Corrupt { .. }))));
}

#[test]
fn unfinished_file_is_rejected() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("crash.ht");
    drop(build(&path, config(), &random_intervals(200, 3)));
    assert!(matches!(
        HistoryTree::<BasicInterval>::open(&path, 3),
        Err(Error::Unfinished)
    ));
    assert!(matches!(
        HistoryTree::<BasicInterval>::open_for_append(&path, 3),
        Err(Error::Unfinished)
    ));
}

#[test]
fn delete_file_removes_tree() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("gone.ht");
    let tree = build(&path, config(), &[(1, 2)]);
    assert!(path.exists());
    tree.delete_file().expect("delete");
    assert!(!path.exists());
}
