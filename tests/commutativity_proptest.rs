use proptest::prelude::*;
use reptree::{MoveOp, Op, OpId, RepTree, SetPropertyOp, Value};

fn op_set() -> impl Strategy<Value = Vec<Op>> {
    let peers = ["p1", "p2"];
    let vertices = ["v0", "v1", "v2", "v3"];
    prop::collection::vec(
        (0usize..peers.len(), 0usize..vertices.len(), 0usize..vertices.len(), any::<bool>()),
        1..=6,
    )
    .prop_map(move |picks| {
        picks
            .into_iter()
            .enumerate()
            .map(|(i, (peer_idx, target_idx, parent_idx, is_move))| {
                let id = OpId::new(i as u64, peers[peer_idx]);
                let target_id = vertices[target_idx].to_string();
                if is_move || target_idx == parent_idx {
                    Op::Move(MoveOp {
                        id,
                        target_id,
                        parent_id: if parent_idx == target_idx { None } else { Some(vertices[parent_idx].to_string()) },
                    })
                } else {
                    Op::Set(SetPropertyOp {
                        id,
                        target_id,
                        key: "label".to_string(),
                        value: Some(Value::from(format!("v{i}"))),
                        transient: false,
                    })
                }
            })
            .collect::<Vec<_>>()
    })
}

fn apply_in_order(ops: &[Op]) -> RepTree {
    let mut tree = RepTree::new("observer", None).unwrap();
    tree.merge(ops.to_vec()).unwrap();
    tree
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn arrival_order_does_not_affect_converged_structure(ops in op_set()) {
        let forward = apply_in_order(&ops);

        let mut reversed = ops.clone();
        reversed.reverse();
        let backward = apply_in_order(&reversed);

        prop_assert!(forward.compare_structure(&backward));
        prop_assert_eq!(forward.get_state_vector(), backward.get_state_vector());
    }
}
