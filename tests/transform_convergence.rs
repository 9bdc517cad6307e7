use block_ot::{ContentKind, InsertTiePolicy, Operation, transform};
use proptest::prelude::*;
use uuid::Uuid;

mod proptest_config;

const BASE: &str = "abcdefghij";

#[derive(Clone, Debug)]
enum OpSpec {
    Insert { pos: usize, text: String },
    Delete { pos: usize, len: usize },
}

fn op_specs() -> impl Strategy<Value = OpSpec> {
    prop_oneof![
        (0usize..=10, "[a-z]{1,3}").prop_map(|(pos, text)| OpSpec::Insert { pos, text }),
        (0usize..=9, 1usize..=4).prop_map(|(pos, len)| OpSpec::Delete { pos, len }),
    ]
}

fn realize(author: &str, document: Uuid, block: Uuid, spec: &OpSpec) -> Operation {
    match spec {
        OpSpec::Insert { pos, text } => {
            Operation::insert(author, document, block, *pos, text.clone()).unwrap()
        }
        OpSpec::Delete { pos, len } => {
            // Clamp the span to the base content so both arrival orders start
            // from a valid operation.
            let len = (*len).min(BASE.len() - *pos);
            Operation::delete(author, document, block, *pos, len.max(1)).unwrap()
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: proptest_config::cases(),
        ..ProptestConfig::default()
    })]

    /// Core OT correctness: for concurrent A and B, applying A then B-rebased
    /// must equal applying B then A-rebased, or both directions must agree
    /// the pair is a conflict.
    #[test]
    fn test_text_pairs_converge_or_conflict_symmetrically(a in op_specs(), b in op_specs()) {
        let document = Uuid::new_v4();
        let block = Uuid::new_v4();
        let op_a = realize("alice", document, block, &a).with_timestamp(100);
        let op_b = realize("bob", document, block, &b).with_timestamp(200);

        let a_rebased = transform(&op_a, std::slice::from_ref(&op_b), ContentKind::Text, InsertTiePolicy::LeftWins).unwrap();
        let b_rebased = transform(&op_b, std::slice::from_ref(&op_a), ContentKind::Text, InsertTiePolicy::LeftWins).unwrap();

        prop_assert_eq!(
            a_rebased.is_conflicted(),
            b_rebased.is_conflicted(),
            "conflict detection must not depend on arrival order"
        );

        if !a_rebased.is_conflicted() {
            let via_a = b_rebased.op.apply_to_text(&op_a.apply_to_text(BASE).unwrap()).unwrap();
            let via_b = a_rebased.op.apply_to_text(&op_b.apply_to_text(BASE).unwrap()).unwrap();
            prop_assert_eq!(via_a, via_b);
        }
    }

    /// Same property at list granularity: positions count whole items.
    #[test]
    fn test_list_pairs_converge_or_conflict_symmetrically(
        a_pos in 0usize..=4,
        b_pos in 0usize..=4,
        a_deletes in proptest::bool::ANY,
        b_deletes in proptest::bool::ANY,
    ) {
        let document = Uuid::new_v4();
        let block = Uuid::new_v4();
        let items = ["one", "two", "three", "four"];

        let make = |author: &str, pos: usize, deletes: bool| {
            if deletes {
                Operation::delete(author, document, block, pos.min(items.len() - 1), 1).unwrap()
            } else {
                Operation::insert(author, document, block, pos, "extra").unwrap()
            }
        };
        let op_a = make("alice", a_pos, a_deletes);
        let op_b = make("bob", b_pos, b_deletes);

        let a_rebased = transform(&op_a, std::slice::from_ref(&op_b), ContentKind::List, InsertTiePolicy::LeftWins).unwrap();
        let b_rebased = transform(&op_b, std::slice::from_ref(&op_a), ContentKind::List, InsertTiePolicy::LeftWins).unwrap();

        prop_assert_eq!(a_rebased.is_conflicted(), b_rebased.is_conflicted());

        if !a_rebased.is_conflicted() {
            let via_a = apply_items(&items, &[&op_a, &b_rebased.op]);
            let via_b = apply_items(&items, &[&op_b, &a_rebased.op]);
            prop_assert_eq!(via_a, via_b);
        }
    }
}

fn apply_items(base: &[&str], ops: &[&Operation]) -> Vec<String> {
    let mut items: Vec<String> = base.iter().map(|s| s.to_string()).collect();
    for op in ops {
        match op.kind {
            block_ot::OperationKind::Insert => items.insert(op.position, op.content.clone()),
            block_ot::OperationKind::Delete => {
                items.drain(op.position..op.position + op.length);
            }
            _ => {}
        }
    }
    items
}

/// Two inserts at the same position order by author, never by clock.
#[test]
fn test_tie_break_is_author_order_not_timestamps() {
    let document = Uuid::new_v4();
    let block = Uuid::new_v4();
    // bob's wall clock says he was first; alice still wins the tie.
    let alice = Operation::insert("alice", document, block, 1, "A")
        .unwrap()
        .with_timestamp(2_000);
    let bob = Operation::insert("bob", document, block, 1, "B")
        .unwrap()
        .with_timestamp(1_000);

    let bob_rebased = transform(
        &bob,
        std::slice::from_ref(&alice),
        ContentKind::Text,
        InsertTiePolicy::LeftWins,
    )
    .unwrap();
    let alice_rebased = transform(
        &alice,
        std::slice::from_ref(&bob),
        ContentKind::Text,
        InsertTiePolicy::LeftWins,
    )
    .unwrap();

    let alice_first = bob_rebased
        .op
        .apply_to_text(&alice.apply_to_text("xy").unwrap())
        .unwrap();
    let bob_first = alice_rebased
        .op
        .apply_to_text(&bob.apply_to_text("xy").unwrap())
        .unwrap();

    assert_eq!(alice_first, "xABy");
    assert_eq!(bob_first, "xABy");
}

/// The worked scenario: "helloworld", insert " " at 5 vs delete "world".
#[test]
fn test_hello_world_scenario_converges() {
    let document = Uuid::new_v4();
    let block = Uuid::new_v4();
    let insert = Operation::insert("A", document, block, 5, " ").unwrap();
    let delete = Operation::delete("B", document, block, 5, 5).unwrap();

    let insert_rebased = transform(
        &insert,
        std::slice::from_ref(&delete),
        ContentKind::Text,
        InsertTiePolicy::LeftWins,
    )
    .unwrap();
    let delete_rebased = transform(
        &delete,
        std::slice::from_ref(&insert),
        ContentKind::Text,
        InsertTiePolicy::LeftWins,
    )
    .unwrap();

    assert_eq!(insert_rebased.op.position, 5);
    assert_eq!(delete_rebased.op.position, 6);
    assert_eq!(delete_rebased.op.length, 5);

    let insert_first = delete_rebased
        .op
        .apply_to_text(&insert.apply_to_text("helloworld").unwrap())
        .unwrap();
    let delete_first = insert_rebased
        .op
        .apply_to_text(&delete.apply_to_text("helloworld").unwrap())
        .unwrap();
    assert_eq!(insert_first, "hello ");
    assert_eq!(delete_first, "hello ");
}
