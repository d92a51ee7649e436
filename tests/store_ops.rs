//! # Store Operation Scenarios
//!
//! End-to-end coverage of the public store contract, plus a structural
//! validator that re-reads the whole tree from its pages and checks every
//! maintained invariant:
//!
//! - in-order traversal yields strictly ascending, duplicate-free keys
//! - non-root nodes hold at least the minimum key count; an internal
//!   root holds at least one key
//! - all leaves sit at the same depth
//! - every node's stored page id and parent link are accurate
//! - the allocation bitmap's set bits are exactly the reserved prefix
//!   plus the pages reachable from the root (no leaks, no double use)

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

use burrowdb::btree::{pad_key, BTree, Node};
use burrowdb::storage::{PagePool, PageId, MAX_KEYS, MIN_KEYS, PAGE_SIZE};
use burrowdb::Database;

#[derive(Default)]
struct TreeCheck {
    keys: Vec<Vec<u8>>,
    pages: HashSet<PageId>,
    leaf_depth: Option<usize>,
}

impl TreeCheck {
    fn push_key(&mut self, key: &[u8]) {
        if let Some(last) = self.keys.last() {
            assert!(
                last.as_slice() < key,
                "keys out of order: {:?} before {:?}",
                last,
                key
            );
        }
        self.keys.push(key.to_vec());
    }
}

fn walk(pool: &PagePool, page: PageId, parent: PageId, depth: usize, check: &mut TreeCheck) {
    let node = Node::read(pool, page).unwrap();

    assert_eq!(node.page, page);
    assert_eq!(node.parent, parent, "bad parent link in page {}", page);
    assert!(check.pages.insert(page), "node page {} used twice", page);
    assert!(pool.is_allocated(page), "node page {} not allocated", page);

    assert!(node.n_keys() <= MAX_KEYS);
    if parent != 0 {
        assert!(
            node.n_keys() >= MIN_KEYS,
            "page {} underfilled: {} keys",
            page,
            node.n_keys()
        );
    } else if !node.is_leaf {
        assert!(node.n_keys() >= 1, "internal root with no keys");
    }

    for &val_page in &node.vals {
        assert!(
            check.pages.insert(val_page),
            "value page {} used twice",
            val_page
        );
        assert!(
            pool.is_allocated(val_page),
            "value page {} not allocated",
            val_page
        );
    }

    if node.is_leaf {
        match check.leaf_depth {
            None => check.leaf_depth = Some(depth),
            Some(expected) => assert_eq!(expected, depth, "leaf {} at wrong depth", page),
        }
        for key in &node.keys {
            check.push_key(key);
        }
    } else {
        for i in 0..node.n_keys() {
            walk(pool, node.children[i], page, depth + 1, check);
            check.push_key(&node.keys[i]);
        }
        walk(pool, node.children[node.n_keys()], page, depth + 1, check);
    }
}

/// Validates the whole tree and the bitmap against it. Returns the keys
/// in order and the leaf depth (root = 0).
fn validate(pool: &PagePool, root_page: PageId) -> (Vec<Vec<u8>>, usize) {
    let mut check = TreeCheck::default();
    walk(pool, root_page, 0, 0, &mut check);

    for page in 0..pool.page_count() {
        let expected = page < pool.reserved_pages() || check.pages.contains(&page);
        assert_eq!(
            pool.is_allocated(page),
            expected,
            "bitmap disagrees about page {} (leaked or stolen)",
            page
        );
    }

    (check.keys, check.leaf_depth.unwrap())
}

fn validate_db(db: &Database) -> (Vec<Vec<u8>>, usize) {
    validate(db.pool(), db.root_page())
}

fn create_test_db(pages: u64) -> (tempfile::TempDir, Database) {
    let dir = tempdir().unwrap();
    let db = Database::create(dir.path().join("store.db"), pages * PAGE_SIZE as u64).unwrap();
    (dir, db)
}

mod scenarios {
    use super::*;

    #[test]
    fn s1_three_inserts_then_point_queries() {
        let (_dir, mut db) = create_test_db(64);

        db.insert(b"568", b"456789A").unwrap();
        db.insert(b"567", b"456789B").unwrap();
        db.insert(b"456", b"456789C").unwrap();

        assert_eq!(db.search(b"567").unwrap(), Some(b"456789B".to_vec()));
        assert_eq!(db.search(b"999").unwrap(), None);
        validate_db(&db);
    }

    #[test]
    fn s2_sorted_bulk_insert_grows_tree() {
        let (_dir, mut db) = create_test_db(2048);

        let n = 3 * MAX_KEYS;
        for i in 0..n {
            db.insert(format!("{:06}", i).as_bytes(), b"payload").unwrap();
            if i % 128 == 0 {
                validate_db(&db);
            }
        }

        let (keys, depth) = validate_db(&db);
        assert_eq!(keys.len(), n);
        assert!(depth >= 1, "tree should be at least two levels");
        for i in 0..n {
            assert!(db.search(format!("{:06}", i).as_bytes()).unwrap().is_some());
        }
    }

    #[test]
    fn s3_delete_middle_key_leaks_nothing() {
        let (_dir, mut db) = create_test_db(64);

        for (k, v) in [("a", "1"), ("b", "2"), ("c", "3"), ("d", "4"), ("e", "5")] {
            db.insert(k.as_bytes(), v.as_bytes()).unwrap();
        }

        assert!(db.delete(b"c").unwrap());

        assert_eq!(db.search(b"c").unwrap(), None);
        assert_eq!(db.search(b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(db.search(b"d").unwrap(), Some(b"4".to_vec()));
        let (keys, _) = validate_db(&db);
        assert_eq!(keys.len(), 4);
    }

    #[test]
    fn s4_random_insert_delete_torture() {
        let (_dir, mut db) = create_test_db(4096);
        let mut rng = StdRng::seed_from_u64(0xB0_44_0E);

        let mut entries: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
        let mut seen = HashSet::new();
        while entries.len() < 1024 {
            let key = format!("{:012x}", rng.gen::<u64>() & 0xFFFF_FFFF_FFFF);
            if !seen.insert(key.clone()) {
                continue;
            }
            let value: Vec<u8> = (0..rng.gen_range(1..64)).map(|_| rng.gen()).collect();
            entries.push((key.into_bytes(), value));
        }

        for (key, value) in &entries {
            db.insert(key, value).unwrap();
        }
        validate_db(&db);

        let mut order: Vec<usize> = (0..entries.len()).collect();
        order.shuffle(&mut rng);
        let (gone, kept) = order.split_at(entries.len() / 2);

        for &i in gone {
            assert!(db.delete(&entries[i].0).unwrap());
        }

        for &i in kept {
            assert_eq!(
                db.search(&entries[i].0).unwrap(),
                Some(entries[i].1.clone()),
                "kept key {:?} lost",
                entries[i].0
            );
        }
        for &i in gone {
            assert_eq!(db.search(&entries[i].0).unwrap(), None);
        }
        let (keys, _) = validate_db(&db);
        assert_eq!(keys.len(), kept.len());
    }

    #[test]
    fn s5_upsert_frees_previous_value_page() {
        let (_dir, mut db) = create_test_db(64);

        db.insert(b"k", b"first").unwrap();
        let allocated_before = db.stats().allocated_pages;

        db.insert(b"k", b"second").unwrap();

        assert_eq!(db.search(b"k").unwrap(), Some(b"second".to_vec()));
        assert_eq!(db.stats().allocated_pages, allocated_before);
        validate_db(&db);
    }

    #[test]
    fn s6_reopen_repeats_all_queries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.db");
        let mut rng = StdRng::seed_from_u64(7);

        let entries: Vec<(String, String)> = (0..512)
            .map(|i| (format!("key{:05}", i), format!("value{:08x}", rng.gen::<u32>())))
            .collect();

        {
            let mut db = Database::create(&path, 4096 * PAGE_SIZE as u64).unwrap();
            for (k, v) in &entries {
                db.insert(k.as_bytes(), v.as_bytes()).unwrap();
            }
            for (k, _) in entries.iter().step_by(3) {
                db.delete(k.as_bytes()).unwrap();
            }
            db.close().unwrap();
        }

        let db = Database::open(&path).unwrap();
        for (i, (k, v)) in entries.iter().enumerate() {
            let expected = if i % 3 == 0 {
                None
            } else {
                Some(v.as_bytes().to_vec())
            };
            assert_eq!(db.search(k.as_bytes()).unwrap(), expected, "key {}", k);
        }
        validate_db(&db);
    }
}

mod properties {
    use super::*;

    #[test]
    fn interleaved_inserts_and_deletes_hold_invariants() {
        let (_dir, mut db) = create_test_db(4096);
        let mut rng = StdRng::seed_from_u64(42);
        let mut live: Vec<u32> = Vec::new();

        for round in 0..2000 {
            if live.is_empty() || rng.gen_bool(0.6) {
                let k: u32 = rng.gen_range(0..100_000);
                db.insert(format!("{:08}", k).as_bytes(), &k.to_le_bytes())
                    .unwrap();
                if !live.contains(&k) {
                    live.push(k);
                }
            } else {
                let idx = rng.gen_range(0..live.len());
                let k = live.swap_remove(idx);
                assert!(db.delete(format!("{:08}", k).as_bytes()).unwrap());
            }

            if round % 250 == 0 {
                let (keys, _) = validate_db(&db);
                assert_eq!(keys.len(), live.len());
            }
        }

        let (keys, _) = validate_db(&db);
        let mut expected: Vec<Vec<u8>> = live
            .iter()
            .map(|k| pad_key(format!("{:08}", k).as_bytes()).unwrap().to_vec())
            .collect();
        expected.sort();
        assert_eq!(keys, expected);
    }

    #[test]
    fn delete_on_absent_key_changes_nothing() {
        let (_dir, mut db) = create_test_db(64);

        db.insert(b"present", b"value").unwrap();
        let before = validate_db(&db);

        assert!(!db.delete(b"absent").unwrap());

        assert_eq!(validate_db(&db), before);
    }

    #[test]
    fn draining_the_store_recycles_every_page() {
        let (_dir, mut db) = create_test_db(2048);
        let baseline = db.stats().allocated_pages;

        for i in 0..(2 * MAX_KEYS) {
            db.insert(format!("{:06}", i).as_bytes(), b"v").unwrap();
        }
        for i in 0..(2 * MAX_KEYS) {
            assert!(db.delete(format!("{:06}", i).as_bytes()).unwrap());
        }

        let (keys, depth) = validate_db(&db);
        assert!(keys.is_empty());
        assert_eq!(depth, 0);
        assert_eq!(db.stats().allocated_pages, baseline);
    }

    #[test]
    fn three_level_tree_deletes_rebalance_at_every_depth() {
        let dir = tempdir().unwrap();
        let mut pool = PagePool::create(dir.path().join("deep.db"), 20_480).unwrap();
        let mut root = BTree::create_empty(&mut pool).unwrap();

        // Enough sequential entries to split an internal node, giving a
        // root, a full internal level, and leaves.
        let n = 92 * MAX_KEYS;
        for i in 0..n {
            let key = pad_key(format!("{:08}", i).as_bytes()).unwrap();
            BTree::new(&mut pool, &mut root)
                .insert(key, b"deep")
                .unwrap();
        }

        let (keys, depth) = validate(&pool, root.page);
        assert_eq!(keys.len(), n);
        assert!(depth >= 2, "expected three levels, got depth {}", depth);

        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut StdRng::seed_from_u64(99));

        for (round, &i) in order.iter().enumerate() {
            let key = pad_key(format!("{:08}", i).as_bytes()).unwrap();
            assert!(BTree::new(&mut pool, &mut root).delete(key).unwrap());
            if round % 2000 == 1999 {
                validate(&pool, root.page);
            }
        }

        let (keys, depth) = validate(&pool, root.page);
        assert!(keys.is_empty());
        assert_eq!(depth, 0);
        assert!(root.is_leaf);
    }
}

mod limits {
    use super::*;
    use burrowdb::storage::{KEY_LEN, MAX_VALUE_LEN};
    use burrowdb::StoreError;

    #[test]
    fn value_at_capacity_roundtrips_but_larger_fails() {
        let (_dir, mut db) = create_test_db(64);

        let exact = vec![0x5A; MAX_VALUE_LEN];
        db.insert(b"big", &exact).unwrap();
        assert_eq!(db.search(b"big").unwrap(), Some(exact));

        let err = db.insert(b"bigger", &vec![0u8; MAX_VALUE_LEN + 1]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::ValueTooLarge { .. })
        ));
        validate_db(&db);
    }

    #[test]
    fn oversized_key_is_rejected_everywhere() {
        let (_dir, mut db) = create_test_db(64);
        let long_key = vec![b'x'; KEY_LEN + 1];

        assert!(db.insert(&long_key, b"v").is_err());
        assert!(db.search(&long_key).is_err());
        assert!(db.delete(&long_key).is_err());
    }

    #[test]
    fn store_full_surfaces_no_space_and_stays_consistent() {
        // 8 pages: header + bitmap + root leave five allocatable.
        let (_dir, mut db) = create_test_db(8);

        let mut inserted = Vec::new();
        let mut hit_no_space = false;
        for i in 0..8 {
            let key = format!("key{}", i);
            match db.insert(key.as_bytes(), b"v") {
                Ok(()) => inserted.push(key),
                Err(err) => {
                    assert_eq!(
                        err.downcast_ref::<StoreError>(),
                        Some(&StoreError::NoSpace)
                    );
                    hit_no_space = true;
                    break;
                }
            }
        }

        assert!(hit_no_space, "an 8-page store cannot hold 8 values");
        for key in &inserted {
            assert!(db.search(key.as_bytes()).unwrap().is_some());
        }
        validate_db(&db);
    }

    #[test]
    fn freed_space_is_usable_after_no_space() {
        let (_dir, mut db) = create_test_db(8);

        let mut inserted = Vec::new();
        loop {
            let key = format!("key{}", inserted.len());
            match db.insert(key.as_bytes(), b"v") {
                Ok(()) => inserted.push(key),
                Err(_) => break,
            }
        }

        let victim = inserted.pop().unwrap();
        assert!(db.delete(victim.as_bytes()).unwrap());

        db.insert(b"replacement", b"v").unwrap();
        assert!(db.search(b"replacement").unwrap().is_some());
        validate_db(&db);
    }
}
