use super::*;

use proptest::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::time::Duration;
use tempfile::TempDir;

#[derive(Clone, Debug)]
enum Op {
    Insert(u16, u32),
    Remove(u16),
    Get(u16),
}

fn ops_strategy(keys: u16) -> impl Strategy<Value = Vec<Op>> {
    let op = prop_oneof![
        4 => (0..keys, any::<u32>()).prop_map(|(k, v)| Op::Insert(k, v)),
        2 => (0..keys).prop_map(Op::Remove),
        1 => (0..keys).prop_map(Op::Get),
    ];
    prop::collection::vec(op, 0..400)
}

#[derive(Clone, Debug)]
enum StoreOp {
    Shorten(u8),
    Resolve(u8),
    Remove(u8),
}

fn store_ops_strategy() -> impl Strategy<Value = Vec<StoreOp>> {
    let op = prop_oneof![
        2 => (0..16u8).prop_map(StoreOp::Shorten),
        5 => (0..16u8).prop_map(StoreOp::Resolve),
        1 => (0..16u8).prop_map(StoreOp::Remove),
    ];
    prop::collection::vec(op, 0..120)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_ordered_index_matches_btreemap(ops in ops_strategy(200), low in 0..200u16, high in 0..200u16) {
        let mut tree: OrderedIndex<u16, u32> = OrderedIndex::new();
        let mut model: BTreeMap<u16, u32> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Insert(k, v) => prop_assert_eq!(tree.insert(k, v), model.insert(k, v)),
                Op::Remove(k) => prop_assert_eq!(tree.remove(&k), model.remove(&k)),
                Op::Get(k) => prop_assert_eq!(tree.get(&k), model.get(&k)),
            }
            prop_assert_eq!(tree.len(), model.len());
        }

        tree.check_invariants().map_err(TestCaseError::fail)?;
        let got: Vec<_> = tree.iter().map(|(k, v)| (*k, *v)).collect();
        let expected: Vec<_> = model.iter().map(|(k, v)| (*k, *v)).collect();
        prop_assert_eq!(got, expected);

        let got: Vec<u16> = tree
            .range(Bound::Included(&low), Bound::Excluded(&high))
            .map(|(k, _)| *k)
            .collect();
        let expected: Vec<u16> = if low < high {
            model.range(low..high).map(|(k, _)| *k).collect()
        } else {
            Vec::new()
        };
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn prop_cuckoo_matches_hashmap(ops in ops_strategy(500)) {
        let mut table: CuckooHashTable<u16, u32> = CuckooHashTable::new(8);
        let mut model: HashMap<u16, u32> = HashMap::new();

        for op in ops {
            match op {
                Op::Insert(k, v) => {
                    let result = table.insert(k, v);
                    if model.contains_key(&k) {
                        prop_assert!(matches!(result, Err(Error::DuplicateKey(_))));
                    } else {
                        prop_assert!(result.is_ok());
                        model.insert(k, v);
                    }
                }
                Op::Remove(k) => prop_assert_eq!(table.remove(&k), model.remove(&k)),
                Op::Get(k) => prop_assert_eq!(table.get(&k), model.get(&k)),
            }
            prop_assert_eq!(table.len(), model.len());
        }

        let mut got: Vec<_> = table.iter().map(|(k, v)| (*k, *v)).collect();
        got.sort_unstable();
        let mut expected: Vec<_> = model.into_iter().collect();
        expected.sort_unstable();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn prop_tracker_holds_top_counts(hits in prop::collection::vec(0..30usize, 0..300), k in 1..8usize) {
        let mut tracker = FrequencyTracker::new(k);
        let mut counts = vec![0u64; 30];

        for key in hits {
            counts[key] += 1;
            tracker.record(&format!("k{}", key), counts[key], key as u64);
        }
        tracker.check_invariants().map_err(TestCaseError::fail)?;

        let mut expected: Vec<u64> = counts.iter().copied().filter(|&c| c > 0).collect();
        expected.sort_unstable_by(|a, b| b.cmp(a));
        expected.truncate(k);

        let got: Vec<u64> = tracker.top_k().iter().map(|t| t.count).collect();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn prop_store_indexes_agree(ops in store_ops_strategy()) {
        let dir = TempDir::new().unwrap();
        let store = UrlStore::open(
            StoreConfig::new(dir.path())
                .with_top_k(3)
                .with_initial_capacity(8)
                .with_save_retry(0, Duration::ZERO)
                .with_access_save_interval(1_000),
        )
        .unwrap();
        let mut model: BTreeMap<String, u64> = BTreeMap::new();

        for op in ops {
            match op {
                StoreOp::Shorten(i) => {
                    let code = format!("k{:02}", i);
                    let url = format!("https://example.com/{}", i);
                    let result = store.shorten(&url, &mut |_: &str, _: u32| code.clone());
                    if model.contains_key(&code) {
                        let exhausted = matches!(result, Err(Error::GenerationExhausted { .. }));
                        prop_assert!(exhausted);
                    } else {
                        prop_assert!(result.is_ok());
                        model.insert(code, 0);
                    }
                }
                StoreOp::Resolve(i) => {
                    let code = format!("k{:02}", i);
                    match model.get_mut(&code) {
                        Some(count) => {
                            *count += 1;
                            prop_assert_eq!(store.resolve(&code).unwrap().access_count, *count);
                        }
                        None => prop_assert!(store.resolve(&code).unwrap_err().is_not_found()),
                    }
                }
                StoreOp::Remove(i) => {
                    let code = format!("k{:02}", i);
                    let removed = store.remove(&code);
                    prop_assert_eq!(removed.is_ok(), model.remove(&code).is_some());
                }
            }
            store.check_consistency().map_err(|e| TestCaseError::fail(e.to_string()))?;
        }

        let listed: Vec<(String, u64)> = store
            .list_ordered()
            .unwrap()
            .into_iter()
            .map(|e| (e.short_code, e.access_count))
            .collect();
        let expected: Vec<(String, u64)> = model.clone().into_iter().collect();
        prop_assert_eq!(listed, expected);

        let popular: Vec<u64> = store.popular(3).unwrap().iter().map(|e| e.access_count).collect();
        let mut counts: Vec<u64> = model.values().copied().filter(|&c| c > 0).collect();
        counts.sort_unstable_by(|a, b| b.cmp(a));
        counts.truncate(3);
        prop_assert_eq!(popular, counts);
    }
}
