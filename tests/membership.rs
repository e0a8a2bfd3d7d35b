//! Membership changes: committed adds restart and admit, committed removes
//! drain the writer and drop its speculative entries.

mod fixtures;

use fixtures::{by_key_order, events, indexed_events, key, participant};
use plait::log::memory::MemoryNamespace;
use plait::log::AppendLog;
use plait::BaseError;

#[test]
fn committed_add_writer_restarts_and_admits() {
    let ns = MemoryNamespace::new();
    let founder_seed: &[u8] = b"founder";
    let joiner_seed: &[u8] = b"joiner";
    let joiner_key = key(joiner_seed);

    let mut founder = participant(&ns, founder_seed, &[]);
    founder
        .base
        .append(format!("add:{}", joiner_key.to_hex()))
        .unwrap();

    // The add committed (single indexer covers its own chain), the digest
    // flushed, and the restart rebuilt the writer set from it.
    let stats = founder.base.stats();
    assert_eq!(stats.writers, 2);
    assert_eq!(stats.indexers, 2);
    assert_eq!(stats.pending_updates, 0);

    // The indexed view prefix survived the restart untouched, and no view
    // block was written twice.
    let add_value = format!("add:{}", joiner_key.to_hex()).into_bytes();
    assert_eq!(indexed_events(&founder), vec![add_value.clone()]);
    let view_log = fixtures::raw_view_log(&ns, founder_seed, "events");
    assert_eq!(view_log.length(), 1);

    // The joiner follows the founder's log, sees its own admission, and
    // becomes writable after its restart.
    let mut joiner = participant(&ns, joiner_seed, &[key(founder_seed)]);
    assert!(!joiner.base.writable());
    joiner.base.update().unwrap();
    assert!(joiner.base.writable());
    assert_eq!(joiner.base.stats().writers, 2);
    assert_eq!(indexed_events(&joiner), vec![add_value]);

    joiner.base.append("from-joiner").unwrap();
    founder.base.update().unwrap();
    assert!(events(&founder).contains(&b"from-joiner".to_vec()));
}

#[test]
fn committed_remove_writer_drops_its_speculative_entries() {
    let ns = MemoryNamespace::new();
    let seeds = by_key_order(vec![b"rm-one".as_slice(), b"rm-two".as_slice()]);
    let bootstraps = vec![key(seeds[0]), key(seeds[1])];

    let mut keeper = participant(&ns, seeds[0], &bootstraps);
    let mut leaver = participant(&ns, seeds[1], &bootstraps);
    let leaver_key = key(seeds[1]);

    let remove_value = format!("remove:{}", leaver_key.to_hex()).into_bytes();
    keeper
        .base
        .append(format!("remove:{}", leaver_key.to_hex()))
        .unwrap();

    // The leaver sees its own removal, publishes one more entry that covers
    // it (committing the removal on its side), and is ejected.
    leaver.base.update().unwrap();
    leaver.base.append("late").unwrap();
    assert!(!leaver.base.writable());
    assert_eq!(leaver.base.stats().writers, 1);
    assert!(matches!(
        leaver.base.append("after-removal"),
        Err(BaseError::NotWritable)
    ));

    // The keeper absorbs the covering entry, commits the removal, restarts,
    // and never applies the leaver's speculative entry again.
    keeper.base.update().unwrap();
    assert_eq!(keeper.base.stats().writers, 1);
    assert_eq!(events(&keeper), vec![remove_value.clone()]);
    assert_eq!(indexed_events(&keeper), vec![remove_value.clone()]);

    // Both sides agree the removed writer's entry never materialized.
    assert_eq!(events(&leaver), vec![remove_value]);
}

#[test]
fn uncommitted_membership_change_does_not_restart() {
    let ns = MemoryNamespace::new();
    let seeds = by_key_order(vec![b"park-one".as_slice(), b"park-two".as_slice()]);
    let bootstraps = vec![key(seeds[0]), key(seeds[1])];

    let mut a = participant(&ns, seeds[0], &bootstraps);
    let newcomer = key(b"park-newcomer");
    a.base
        .append(format!("add:{}", newcomer.to_hex()))
        .unwrap();

    // With two indexers and only one head published, nothing commits, so
    // the staged add stays speculative and the writer set is unchanged.
    let stats = a.base.stats();
    assert_eq!(stats.writers, 2);
    assert_eq!(stats.pending_updates, 1);
    assert_eq!(indexed_events(&a), Vec::<Vec<u8>>::new());
}
