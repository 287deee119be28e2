//! Algebraic and convergence properties of the OR-Set.
//!
//! Covers the merge laws (commutativity, associativity, idempotence),
//! observed-remove semantics under concurrency, partition healing, and
//! delta extraction against a version vector.

use std::collections::HashMap;

use keymesh_proto::{NodeId, Tag};
use keymesh_state::OrSet;

// -----------------------------------------------------------------------
// Helpers
// -----------------------------------------------------------------------

fn node(n: u8) -> NodeId {
    NodeId::parse(&format!("00000000-0000-4000-8000-0000000000{n:02x}")).expect("fixed test uuid")
}

fn tag(n: u8, counter: u64) -> Tag {
    Tag::new(node(n), counter)
}

fn sorted_items(set: &OrSet) -> Vec<String> {
    let mut items = set.items();
    items.sort();
    items
}

/// Three replicas with overlapping and disjoint activity.
fn three_replicas() -> (OrSet, OrSet, OrSet) {
    let mut a = OrSet::new();
    a.add("apple", tag(1, 1));
    a.add("banana", tag(1, 2));
    a.remove("banana");

    let mut b = OrSet::new();
    b.add("apple", tag(2, 1));
    b.add("cherry", tag(2, 2));

    let mut c = OrSet::new();
    c.add("banana", tag(3, 1));
    c.add("date", tag(3, 2));
    c.remove("date");

    (a, b, c)
}

// -----------------------------------------------------------------------
// Merge laws
// -----------------------------------------------------------------------

#[test]
fn merge_is_commutative() {
    let (a, b, _) = three_replicas();

    let mut ab = a.clone();
    ab.merge(&b);
    let mut ba = b.clone();
    ba.merge(&a);

    assert_eq!(sorted_items(&ab), sorted_items(&ba));
    assert_eq!(ab.tags("apple"), ba.tags("apple"));
    assert_eq!(ab.removed_tags(), ba.removed_tags());
}

#[test]
fn merge_is_associative() {
    let (a, b, c) = three_replicas();

    // (A + B) + C
    let mut left = a.clone();
    left.merge(&b);
    left.merge(&c);

    // A + (B + C)
    let mut bc = b.clone();
    bc.merge(&c);
    let mut right = a.clone();
    right.merge(&bc);

    assert_eq!(sorted_items(&left), sorted_items(&right));
    assert_eq!(left.removed_tags(), right.removed_tags());
}

#[test]
fn merge_is_idempotent() {
    let (a, _, _) = three_replicas();

    let mut merged = a.clone();
    merged.merge(&a);

    assert_eq!(sorted_items(&merged), sorted_items(&a));
    assert_eq!(merged.tags("apple"), a.tags("apple"));
    assert_eq!(merged.removed_tags(), a.removed_tags());
}

// -----------------------------------------------------------------------
// Observed-remove semantics
// -----------------------------------------------------------------------

#[test]
fn concurrent_adds_union_their_tags() {
    // Two nodes insert the same key concurrently; after any exchange
    // order both hold exactly the two tags.
    let mut a = OrSet::new();
    a.add("x", tag(1, 1));
    let mut b = OrSet::new();
    b.add("x", tag(2, 1));

    a.merge(&b);
    b.merge(&a);

    assert!(a.contains("x"));
    assert!(b.contains("x"));
    let expected: Vec<Tag> = vec![tag(1, 1), tag(2, 1)];
    assert_eq!(a.tags("x").unwrap().iter().copied().collect::<Vec<_>>(), expected);
    assert_eq!(b.tags("x").unwrap().iter().copied().collect::<Vec<_>>(), expected);
}

#[test]
fn remove_affects_only_observed_tags() {
    // A inserts and replicates to B, then A removes. C, which never saw
    // A's tag, inserts the same key concurrently. Everyone converges on
    // the key being present.
    let mut a = OrSet::new();
    a.add("x", tag(1, 1));

    let mut b = OrSet::new();
    b.merge(&a);

    a.remove("x");

    let mut c = OrSet::new();
    c.add("x", tag(3, 1));

    // Full mesh.
    let snapshots = [a.clone(), b.clone(), c.clone()];
    for replica in [&mut a, &mut b, &mut c] {
        for other in &snapshots {
            replica.merge(other);
        }
    }

    for replica in [&a, &b, &c] {
        assert!(replica.contains("x"), "fresh tag must survive the remove");
    }
}

#[test]
fn partition_heal_converges() {
    // {A, B} add-and-remove "apple"; {C, D} add "apple" with a fresh tag
    // and add "banana". After healing, everyone has both keys.
    let mut a = OrSet::new();
    let mut b = OrSet::new();
    let mut c = OrSet::new();
    let mut d = OrSet::new();

    a.add("apple", tag(1, 1));
    b.merge(&a);
    b.remove("apple");
    a.merge(&b);

    c.add("apple", tag(3, 1));
    d.add("banana", tag(4, 1));
    c.merge(&d);
    d.merge(&c);

    // Heal: full pair-wise exchange.
    let snapshots = [a.clone(), b.clone(), c.clone(), d.clone()];
    for replica in [&mut a, &mut b, &mut c, &mut d] {
        for other in &snapshots {
            replica.merge(other);
        }
    }

    for (name, replica) in [("a", &a), ("b", &b), ("c", &c), ("d", &d)] {
        assert_eq!(
            sorted_items(replica),
            vec!["apple".to_string(), "banana".to_string()],
            "replica {name}"
        );
    }
}

// -----------------------------------------------------------------------
// Delta extraction
// -----------------------------------------------------------------------

#[test]
fn diff_returns_only_unseen_tags() {
    // Recorded vector {A:5, B:3}; held tags (A,4), (A,6), (B,2), (B,4).
    // The delta is exactly {(A,6), (B,4)}.
    let mut set = OrSet::new();
    set.add("k", tag(1, 4));
    set.add("k", tag(1, 6));
    set.add("k", tag(2, 2));
    set.add("k", tag(2, 4));

    let vector: HashMap<NodeId, u64> = [(node(1), 5), (node(2), 3)].into_iter().collect();

    let delta = set.diff(&vector);
    let fresh: Vec<Tag> = delta.tags("k").unwrap().iter().copied().collect();
    assert_eq!(fresh, vec![tag(1, 6), tag(2, 4)]);
}

#[test]
fn diff_treats_unknown_origins_as_unseen() {
    let mut set = OrSet::new();
    set.add("k", tag(1, 1));
    set.add("k", tag(2, 7));

    let vector: HashMap<NodeId, u64> = [(node(1), 1)].into_iter().collect();

    let delta = set.diff(&vector);
    let fresh: Vec<Tag> = delta.tags("k").unwrap().iter().copied().collect();
    assert_eq!(fresh, vec![tag(2, 7)]);
}

#[test]
fn diff_filters_removes_and_omits_empty_buckets() {
    let mut set = OrSet::new();
    set.add("seen", tag(1, 1));
    set.add("fresh", tag(1, 5));
    set.remove("seen");
    set.remove("fresh");

    let vector: HashMap<NodeId, u64> = [(node(1), 2)].into_iter().collect();

    let delta = set.diff(&vector);
    assert!(delta.tags("seen").is_none(), "fully seen bucket is omitted");
    assert_eq!(delta.tags("fresh").unwrap().len(), 1);
    assert_eq!(
        delta.removed_tags().iter().copied().collect::<Vec<_>>(),
        vec![tag(1, 5)],
        "only unseen tombstones travel"
    );
}

#[test]
fn diff_against_empty_vector_is_the_full_state() {
    let (a, _, _) = three_replicas();
    let delta = a.diff(&HashMap::new());

    let mut merged = OrSet::new();
    merged.merge(&delta);
    assert_eq!(sorted_items(&merged), sorted_items(&a));
    assert_eq!(merged.removed_tags(), a.removed_tags());
}

#[test]
fn applying_a_delta_equals_applying_the_full_state() {
    // Receiver already holds everything its vector claims; merging just
    // the delta must land it in the same state as merging everything.
    let mut sender = OrSet::new();
    sender.add("x", tag(1, 1));
    sender.add("x", tag(1, 6));
    sender.add("y", tag(2, 4));
    sender.remove("y");

    let mut receiver = OrSet::new();
    receiver.add("x", tag(1, 1));
    let vector: HashMap<NodeId, u64> = [(node(1), 1)].into_iter().collect();

    let mut via_delta = receiver.clone();
    via_delta.merge(&sender.diff(&vector));

    let mut via_full = receiver.clone();
    via_full.merge(&sender);

    assert_eq!(sorted_items(&via_delta), sorted_items(&via_full));
    assert_eq!(via_delta.tags("x"), via_full.tags("x"));
    assert_eq!(via_delta.removed_tags(), via_full.removed_tags());
}
