use reptree::{RepTree, TxOutcome, Value};

#[test]
fn basic_structural_round_trip() {
    let mut a = RepTree::new("p1", None).unwrap();
    let root = a.create_root().unwrap();
    let docs = a.new_named_vertex(&root, "Docs").unwrap();
    let readme = a
        .new_vertex(&docs, &[("name", Value::from("README.md")), ("type", Value::from("file")), ("size", Value::from(2048.0))])
        .unwrap();
    let archive = a.new_named_vertex(&root, "Archive").unwrap();
    a.move_vertex(&readme, Some(&archive)).unwrap();

    let mut b = RepTree::new("p2", None).unwrap();
    b.merge(a.get_all_ops()).unwrap();

    assert!(b.compare_structure(&a));
    assert_eq!(b.get_property(&readme, "size"), Some(Value::from(2048.0)));
    assert_eq!(b.get_vertex_by_path("Archive/README.md"), Some(readme));
}

#[test]
fn lww_property_convergence_reversed_delivery() {
    let mut a = RepTree::new("p1", None).unwrap();
    let root = a.create_root().unwrap();
    let v = a.new_named_vertex(&root, "note").unwrap();
    a.set_property(&v, "title", Value::from("one")).unwrap();
    a.set_property(&v, "title", Value::from("two")).unwrap();
    a.set_property(&v, "title", Value::from("three")).unwrap();

    let mut ops = a.get_all_ops();
    ops.reverse();

    let mut b = RepTree::new("p2", None).unwrap();
    b.merge(ops).unwrap();

    assert_eq!(b.get_property(&v, "title"), Some(Value::from("three")));
}

#[test]
fn concurrent_move_has_a_deterministic_winner() {
    let mut seed = RepTree::new("seed", None).unwrap();
    let root = seed.create_root().unwrap();
    let a = seed.new_named_vertex(&root, "a").unwrap();
    let b = seed.new_named_vertex(&root, "b").unwrap();
    let x = seed.new_named_vertex(&root, "x").unwrap();
    let shared = seed.get_all_ops();

    let mut p1 = RepTree::new("p1", Some(shared.clone())).unwrap();
    let mut p2 = RepTree::new("p2", Some(shared)).unwrap();

    p1.move_vertex(&x, Some(&a)).unwrap();
    p2.move_vertex(&x, Some(&b)).unwrap();

    let p1_ops = p1.pop_local_ops();
    let p2_ops = p2.pop_local_ops();

    p1.merge(p2_ops.clone()).unwrap();
    p2.merge(p1_ops).unwrap();

    assert!(p1.compare_structure(&p2));
    let winner = p1.get_parent(&x).unwrap();
    assert!(winner == a || winner == b);
}

#[test]
fn cycle_refusal_leaves_structure_unchanged() {
    let mut a = RepTree::new("p1", None).unwrap();
    let root = a.create_root().unwrap();
    let va = a.new_named_vertex(&root, "a").unwrap();
    let vb = a.new_named_vertex(&va, "b").unwrap();
    let vc = a.new_named_vertex(&vb, "c").unwrap();

    a.move_vertex(&va, Some(&vc)).unwrap();
    assert_eq!(a.get_parent(&va), Some(root.clone()));

    let mut fresh = RepTree::new("p2", None).unwrap();
    fresh.merge(a.get_all_ops()).unwrap();
    assert!(fresh.compare_structure(&a));
}

#[test]
fn transaction_abort_restores_the_pre_transaction_snapshot() {
    let mut a = RepTree::new("p1", None).unwrap();
    let root = a.create_root().unwrap();
    let v = a.new_named_vertex(&root, "doc").unwrap();
    a.set_property(&v, "title", Value::from("stable")).unwrap();

    let before = a.get_all_ops();
    let before_title = a.get_property(&v, "title");

    a.transact(|tx| {
        tx.set_property(&v, "title", Value::from("scratch")).unwrap();
        tx.new_named_vertex(&root, "orphan").unwrap();
        TxOutcome::Abort
    })
    .unwrap();

    assert_eq!(a.get_all_ops(), before);
    assert_eq!(a.get_property(&v, "title"), before_title);
}
