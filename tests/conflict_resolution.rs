use block_ot::{
    AllowAll, CollabEngine, ContentKind, ContentStore, EngineConfig, InsertTiePolicy,
    MemoryContentStore, NullBroadcaster, Operation, ResolutionChoice, SubmitOutcome,
};
use std::sync::Arc;
use uuid::Uuid;

fn engine_with_tie(
    tie: InsertTiePolicy,
    initial: &str,
) -> (CollabEngine, Arc<MemoryContentStore>, Uuid, Uuid) {
    let content = Arc::new(MemoryContentStore::new());
    let document = Uuid::new_v4();
    let block = Uuid::new_v4();
    content.create_block(document, block, ContentKind::Text, initial);
    let engine = CollabEngine::with_config(
        Arc::clone(&content) as Arc<dyn ContentStore>,
        Arc::new(AllowAll),
        Arc::new(NullBroadcaster),
        EngineConfig {
            insert_tie: tie,
            ..EngineConfig::default()
        },
    );
    (engine, content, document, block)
}

fn conflicted(outcome: SubmitOutcome) -> block_ot::Conflict {
    match outcome {
        SubmitOutcome::Conflicted(c) => c,
        SubmitOutcome::Applied(op) => panic!("expected conflict, applied {:?}", op.id),
    }
}

#[test]
fn test_insert_tie_conflict_policy_records_instead_of_ordering() {
    let (engine, content, document, block) = engine_with_tie(InsertTiePolicy::Conflict, "xy");
    engine
        .submit_operation(Operation::insert("alice", document, block, 1, "A").unwrap())
        .unwrap();
    let conflict = conflicted(
        engine
            .submit_operation(Operation::insert("bob", document, block, 1, "B").unwrap())
            .unwrap(),
    );
    assert_eq!(content.content(document, block).unwrap(), "xAy");

    // Merge applies both, smaller author first.
    assert!(engine
        .resolve_conflict(conflict.id, "bob", ResolutionChoice::Merge)
        .unwrap());
    assert_eq!(content.content(document, block).unwrap(), "xABy");
}

#[test]
fn test_choosing_one_side_discards_the_other() {
    let (engine, content, document, block) = engine_with_tie(InsertTiePolicy::Conflict, "xy");
    engine
        .submit_operation(Operation::insert("alice", document, block, 1, "A").unwrap())
        .unwrap();
    let conflict = conflicted(
        engine
            .submit_operation(Operation::insert("bob", document, block, 1, "B").unwrap())
            .unwrap(),
    );

    // operation2 (alice's side) is already applied; choosing it means bob's
    // pending insert is dropped from the content path but stays recorded.
    assert!(engine
        .resolve_conflict(conflict.id, "alice", ResolutionChoice::Operation2)
        .unwrap());
    assert_eq!(content.content(document, block).unwrap(), "xAy");

    let record = &engine.conflicts(document, block)[0];
    assert!(record.resolved);
    assert_eq!(record.operation1.content, "B");
}

#[test]
fn test_choosing_pending_side_applies_it() {
    let (engine, content, document, block) = engine_with_tie(InsertTiePolicy::Conflict, "xy");
    engine
        .submit_operation(Operation::insert("alice", document, block, 1, "A").unwrap())
        .unwrap();
    let conflict = conflicted(
        engine
            .submit_operation(Operation::insert("bob", document, block, 1, "B").unwrap())
            .unwrap(),
    );

    assert!(engine
        .resolve_conflict(conflict.id, "bob", ResolutionChoice::Operation1)
        .unwrap());
    assert_eq!(content.content(document, block).unwrap(), "xBAy");
}

#[test]
fn test_insert_inside_delete_merge_keeps_insert() {
    let (engine, content, document, block) =
        engine_with_tie(InsertTiePolicy::LeftWins, "0123456789");
    engine
        .submit_operation(Operation::delete("bob", document, block, 2, 5).unwrap())
        .unwrap();
    assert_eq!(content.content(document, block).unwrap(), "01789");

    // Alice's insert targeted the middle of the span bob deleted.
    let conflict = conflicted(
        engine
            .submit_operation(Operation::insert("alice", document, block, 4, "x").unwrap())
            .unwrap(),
    );

    assert!(engine
        .resolve_conflict(conflict.id, "alice", ResolutionChoice::Merge)
        .unwrap());
    assert_eq!(
        content.content(document, block).unwrap(),
        "01x789",
        "insert restored into the gap, deleted span gone exactly once"
    );
}

#[test]
fn test_unresolved_conflicts_stay_visible() {
    let (engine, _, document, block) = engine_with_tie(InsertTiePolicy::LeftWins, "0123456789");
    engine
        .submit_operation(Operation::delete("alice", document, block, 4, 2).unwrap())
        .unwrap();
    conflicted(
        engine
            .submit_operation(Operation::delete("bob", document, block, 4, 3).unwrap())
            .unwrap(),
    );

    let listed = engine.conflicts(document, block);
    assert_eq!(listed.len(), 1);
    assert!(!listed[0].resolved);
    assert!(listed[0].resolved_at.is_none());
}
