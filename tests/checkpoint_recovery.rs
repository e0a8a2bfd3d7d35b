//! Destroy and reopen: the digest rehydrates membership and the embedded
//! checkpoints resume the engine.

mod fixtures;

use fixtures::{bytes_of, indexed_events, participant, raw_writer_log};
use plait::log::memory::MemoryNamespace;
use plait::log::AppendLog;
use plait::{Limits, OplogMessage};

#[test]
fn latest_block_carries_checkpoint_after_indexed_batches() {
    let ns = MemoryNamespace::new();
    let mut p = participant(&ns, b"resume", &[]);
    p.base
        .append_all(vec!["a".into(), "b".into(), "c".into()])
        .unwrap();
    p.base.append("d").unwrap();

    let local = p.base.local_key().unwrap();
    let log = raw_writer_log(&ns, &local);
    assert_eq!(log.length(), 4);

    let tail = OplogMessage::decode(&log.get(3).unwrap().unwrap(), &Limits::default()).unwrap();
    assert_eq!(tail.checkpointer, 0);
    let checkpoint = tail.checkpoint.expect("tail embeds a checkpoint");
    // Two flushes so far: the bootstrap digest and d's digest.
    assert_eq!(checkpoint.length, 2);
}

#[test]
fn checkpointer_back_pointers_hop_to_the_carrier() {
    let ns = MemoryNamespace::new();
    let mut p = participant(&ns, b"hop", &[]);
    p.base
        .append_all(vec!["a".into(), "b".into(), "c".into()])
        .unwrap();

    let local = p.base.local_key().unwrap();
    let log = raw_writer_log(&ns, &local);
    let limits = Limits::default();

    // The first block after the flush carries the checkpoint; the rest of
    // the batch hops back to it.
    let first = OplogMessage::decode(&log.get(0).unwrap().unwrap(), &limits).unwrap();
    assert_eq!(first.checkpointer, 0);
    assert!(first.checkpoint.is_some());
    let second = OplogMessage::decode(&log.get(1).unwrap().unwrap(), &limits).unwrap();
    assert_eq!(second.checkpointer, 1);
    assert!(second.checkpoint.is_none());
    let third = OplogMessage::decode(&log.get(2).unwrap().unwrap(), &limits).unwrap();
    assert_eq!(third.checkpointer, 2);
}

#[test]
fn reopen_rehydrates_writers_and_resumes() {
    let ns = MemoryNamespace::new();
    {
        let mut p = participant(&ns, b"phoenix", &[]);
        p.base
            .append_all(vec!["a".into(), "b".into(), "c".into()])
            .unwrap();
        p.base.append("d").unwrap();
        p.base.close().unwrap();
    }

    let mut p = participant(&ns, b"phoenix", &[]);
    assert!(p.base.writable());
    let stats = p.base.stats();
    assert_eq!(stats.writers, 1);
    assert_eq!(stats.indexers, 1);

    // The best checkpoint across writers is the freshest one.
    let checkpoint = p.base.checkpoint().unwrap().expect("checkpoint available");
    assert_eq!(checkpoint.length, 2);

    // The view is exactly what the apply handler emitted before shutdown,
    // and nothing is replayed into it on reopen.
    assert_eq!(indexed_events(&p), bytes_of(&["a", "b", "c", "d"]));
    assert!(p.probe.borrow().calls.is_empty());

    // The engine resumes appending where it left off.
    p.base.append("e").unwrap();
    assert_eq!(indexed_events(&p), bytes_of(&["a", "b", "c", "d", "e"]));
    assert_eq!(p.probe.borrow().calls, vec![bytes_of(&["e"])]);
}

#[test]
fn fresh_base_has_no_checkpoint() {
    let ns = MemoryNamespace::new();
    let p = participant(&ns, b"blank", &[]);
    assert!(p.base.checkpoint().unwrap().is_none());
}
