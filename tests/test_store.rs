// Store behaviour: region queries, joins, deletes and persistence
use chainstore::record::{ChainId, Located, Record, RecordKind};
use chainstore::store::{MemoryStore, RecordStore, StoreConfig};
use chainstore::Error;
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn fragment(id: ChainId, qname: &str, qs: u64, qe: u64, ss: u64, se: u64) -> Record {
    Record::from_line(&format!(
        "{id}\t{qname}\t{qs}\t{qe}\tsubj\t{ss}\t{se}\t1e-20\t100\t95"
    ))
    .unwrap()
}

fn store_with(records: Vec<Record>, indexed: bool) -> MemoryStore {
    let mut store =
        MemoryStore::new(StoreConfig::new(RecordKind::Fragment).with_bin_index(indexed));
    store.insert_batch(records).unwrap();
    store
}

fn sample() -> Vec<Record> {
    vec![
        fragment(1, "chr1", 100, 200, 1_000, 1_100),
        fragment(1, "chr1", 300, 400, 1_200, 1_300),
        fragment(2, "chr1", 350, 150, 5_000, 4_800),
        fragment(3, "chr2", 100, 200, 10, 110),
        fragment(4, "chr1", 99_999_000, 100_001_000, 1, 2_001),
    ]
}

#[test]
fn test_region_query_exact_semantics() {
    let store = store_with(sample(), true);

    let hits = store.get_by_region("chr1", 210, 290).unwrap();
    // chain 1 spans the gap but none of its members does
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chain_id(), Some(2));

    // reversed query bounds and boundary contact
    let hits = store.get_by_region("chr1", 400, 400).unwrap();
    assert_eq!(hits.iter().map(|r| r.chain_id()).collect::<Vec<_>>(), vec![Some(1)]);

    let hits = store.get_by_region("chr1", 100_000_500, 99_000_000).unwrap();
    assert_eq!(hits.iter().map(|r| r.chain_id()).collect::<Vec<_>>(), vec![Some(4)]);

    assert!(store.get_by_region("chrUn", 0, u64::MAX).unwrap().is_empty());
}

#[test]
fn test_query_same_with_and_without_index() {
    let indexed = store_with(sample(), true);
    let scanned = store_with(sample(), false);
    for (seq, s, e) in [("chr1", 0, 1_000), ("chr1", 150, 160), ("chr2", 150, 150), ("chr1", 0, u64::MAX)] {
        assert_eq!(
            indexed.get_by_region(seq, s, e).unwrap(),
            scanned.get_by_region(seq, s, e).unwrap()
        );
    }
}

proptest! {
    #[test]
    fn prop_index_never_changes_answers(
        spans in prop::collection::vec((1u64..8, 0u64..300_000_000, 1u64..2_000_000), 1..30),
        (qa, qb) in (0u64..300_000_000, 0u64..300_000_000)
    ) {
        let records: Vec<Record> = spans
            .iter()
            .map(|&(id, start, len)| fragment(id, "chr1", start, start + len, 1, 100))
            .collect();
        let indexed = store_with(records.clone(), true);
        let scanned = store_with(records, false);
        prop_assert_eq!(
            indexed.get_by_region("chr1", qa, qb).unwrap(),
            scanned.get_by_region("chr1", qa, qb).unwrap()
        );
        indexed.verify_index().unwrap();
    }

    #[test]
    fn prop_join_is_symmetric(a in 1u64..6, b in 1u64..6) {
        let mut left = store_with(sample(), true);
        let mut right = store_with(sample(), true);
        let expected_members = left.get_by_chain_id(a).len()
            + if a == b { 0 } else { left.get_by_chain_id(b).len() };

        let w1 = left.join_chains(a, b);
        let w2 = right.join_chains(b, a);
        prop_assert_eq!(w1, a.min(b));
        prop_assert_eq!(w2, a.min(b));
        prop_assert_eq!(left.get_by_chain_id(w1).len(), expected_members);
        prop_assert_eq!(left.get_by_chain_id(w1), right.get_by_chain_id(w2));
        left.verify_index().unwrap();
    }
}

#[test]
fn test_join_updates_region_answers() {
    let mut store = store_with(sample(), true);
    assert_eq!(store.join_chains(4, 2), 2);

    let ids: Vec<_> = store
        .get_by_region("chr1", 100_000_000, 100_000_000)
        .unwrap()
        .iter()
        .map(|r| r.chain_id())
        .collect();
    assert_eq!(ids, vec![Some(2)]);
    assert!(store.get_by_chain_id(4).is_empty());
}

#[test]
fn test_join_many_is_transitive() {
    let mut store = store_with(sample(), true);
    let winners = store.join_many(&[(4, 3), (3, 2)]);
    assert_eq!(winners.get(&4), Some(&2));
    assert_eq!(store.chain_ids().collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(store.get_by_chain_id(2).len(), 3);
    store.verify_index().unwrap();
}

#[test]
fn test_delete_and_absent_ids() {
    let mut store = store_with(sample(), true);
    assert_eq!(store.delete_by_chain_ids(&[1, 42]), 2);
    assert_eq!(store.delete_by_chain_id(1), 0);
    assert!(store.get_by_chain_id(1).is_empty());
    assert!(store.get_by_region("chr1", 300, 310).unwrap().is_empty());
    assert_eq!(store.join_chains(90, 91), 90);
    store.verify_index().unwrap();
}

#[test]
fn test_next_free_chain_id() {
    let mut store = store_with(Vec::new(), true);
    assert_eq!(store.next_free_chain_id(), 1);
    store.insert_batch(sample()).unwrap();
    assert_eq!(store.next_free_chain_id(), 5);
    store.delete_by_chain_id(4);
    assert_eq!(store.next_free_chain_id(), 4);
}

#[test]
fn test_collapse_through_store() {
    let store = store_with(sample(), true);
    let chain = store.collapse_chain(1).unwrap().unwrap();
    assert_eq!((chain.query.start, chain.query.end), (100, 400));
    assert_eq!(chain.member_count, 2);
    assert!(store.collapse_chain(77).unwrap().is_none());
}

#[test]
fn test_named_ranges_are_searchable() {
    let mut store = MemoryStore::new(StoreConfig::new(RecordKind::Named));
    store
        .insert_batch(vec![
            Record::from_line("orf1\tchr1\t10\t90").unwrap(),
            Record::from_line("orf2\tchr1\t500\t400").unwrap(),
        ])
        .unwrap();
    let hits = store.get_by_region("chr1", 450, 460).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].label(), Some("orf2"));
    assert_eq!(store.next_free_chain_id(), 1);
}

#[test]
fn test_flush_and_reopen() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["store.tsv", "store.tsv.gz"] {
        let path = dir.path().join(name);
        let config = StoreConfig::new(RecordKind::Fragment).with_path(&path);

        let mut store = MemoryStore::open(config.clone()).unwrap();
        assert!(store.is_empty());
        store.insert_batch(sample()).unwrap();
        store.flush().unwrap();

        let reopened = MemoryStore::open(config).unwrap();
        assert_eq!(reopened.len(), 5);
        assert_eq!(
            reopened.records().collect::<Vec<_>>(),
            store.records().collect::<Vec<_>>()
        );
        reopened.verify_index().unwrap();
    }
}

#[test]
fn test_open_rejects_foreign_file_whole() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("named.tsv");
    std::fs::write(&path, "orf1\tchr1\t10\t90\n").unwrap();

    let result = MemoryStore::open(StoreConfig::new(RecordKind::Fragment).with_path(&path));
    assert!(matches!(result, Err(Error::MalformedRecord(_))));
}
