use super::*;
use proptest::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;

fn rng() -> StdRng {
    StdRng::seed_from_u64(7)
}

fn still() -> OrderValueManager {
    OrderValueManager::new(OrderPolicy {
        jitter_ratio: 0.0,
        ..OrderPolicy::default()
    })
    .unwrap()
}

#[test]
fn append_starts_at_base_and_steps_by_target_delta() {
    let manager = still();
    let mut rng = rng();
    assert_eq!(manager.append_value(&[], &mut rng), 0.0);
    assert_eq!(manager.append_value(&[0.0, 3.0, 1.0], &mut rng), 4.0);
}

#[test]
fn append_jitter_stays_within_the_ratio() {
    let manager = OrderValueManager::default();
    let mut rng = rng();
    for _ in 0..200 {
        let v = manager.append_value(&[10.0], &mut rng);
        assert!((10.9..=11.1).contains(&v), "append out of jitter band: {v}");
    }
}

#[test]
fn forced_rebalance_spreads_a_collapsed_list_across_the_window() {
    let manager = OrderValueManager::new(OrderPolicy {
        jitter_ratio: 0.0,
        capacity_floor: 4,
        ..OrderPolicy::default()
    })
    .unwrap();
    let mut orders = vec![0.0, 0.000_000_1, 0.000_000_2];
    assert!(manager.validate(&orders).is_err());

    let changed = manager.rebalance(&mut orders, true, &mut rng()).unwrap();
    assert_eq!(changed, vec![0, 1, 2]);
    let (capacity, width) = manager.window(3);
    assert_eq!(capacity, 4);
    let step = width / 3.0;
    assert_eq!(orders, vec![0.0, step, 2.0 * step]);
    manager.validate(&orders).unwrap();
}

#[test]
fn unforced_rebalance_is_a_no_op_inside_the_acceptable_bound() {
    let manager = still();
    let mut orders = vec![0.0, 0.5, 40.0];
    let changed = manager.rebalance(&mut orders, false, &mut rng()).unwrap();
    assert!(changed.is_empty());
    assert_eq!(orders, vec![0.0, 0.5, 40.0]);
}

#[test]
fn unforced_rebalance_fires_once_values_drift_past_the_bound() {
    let manager = still();
    // Window for 3 siblings is 8 wide; the bound is 8 windows = 64.
    let mut orders = vec![10.0, 50.0, 65.0];
    let changed = manager.rebalance(&mut orders, false, &mut rng()).unwrap();
    assert_eq!(changed.len(), 3);
    assert!(orders.iter().all(|v| *v < 8.0));
}

#[test]
fn moving_the_last_item_to_the_front_touches_only_that_item() {
    let manager = still();
    let mut orders = vec![3.0, 0.0, 1.0, 2.0];
    let changed = manager.adjust_after_reorder(&mut orders, &mut rng()).unwrap();
    assert_eq!(changed, vec![0]);
    assert_eq!(orders, vec![-1.0, 0.0, 1.0, 2.0]);
}

#[test]
fn moving_an_item_into_the_middle_centres_it_between_new_neighbours() {
    let manager = still();
    let mut orders = vec![0.0, 3.0, 1.0, 2.0];
    let changed = manager.adjust_after_reorder(&mut orders, &mut rng()).unwrap();
    assert_eq!(changed, vec![1]);
    assert_eq!(orders, vec![0.0, 0.5, 1.0, 2.0]);
}

#[test]
fn swapping_neighbours_moves_one_of_them() {
    let manager = still();
    let mut orders = vec![1.0, 0.0, 2.0];
    let changed = manager.adjust_after_reorder(&mut orders, &mut rng()).unwrap();
    assert_eq!(changed, vec![1]);
    assert_eq!(orders, vec![1.0, 1.5, 2.0]);
}

#[test]
fn already_valid_sequence_is_untouched() {
    let manager = still();
    let mut orders = vec![0.0, 1.0, 2.0];
    let changed = manager.adjust_after_reorder(&mut orders, &mut rng()).unwrap();
    assert!(changed.is_empty());
}

#[test]
fn dense_neighbourhood_falls_back_to_rebalance() {
    let manager = still();
    let mut orders = vec![1.0, 5.0, 1.0015, 1.002];
    let changed = manager.adjust_after_reorder(&mut orders, &mut rng()).unwrap();
    assert_eq!(changed, vec![0, 1, 2, 3]);
    manager.validate(&orders).unwrap();
}

#[test]
fn non_finite_values_are_repaired() {
    let manager = still();
    let mut orders = vec![0.0, f64::NAN, 2.0];
    let changed = manager.adjust_after_reorder(&mut orders, &mut rng()).unwrap();
    assert_eq!(changed, vec![1]);
    assert_eq!(orders, vec![0.0, 1.0, 2.0]);
}

#[test]
fn policy_validation_rejects_a_minimal_delta_wider_than_the_jittered_gap() {
    let err = OrderValueManager::new(OrderPolicy {
        minimal_delta: 0.9,
        jitter_ratio: 0.1,
        ..OrderPolicy::default()
    })
    .unwrap_err();
    assert!(matches!(err, OrderError::InvalidPolicy(_)));
}

#[derive(Clone, Debug)]
enum Op {
    Append,
    Move { from: usize, to: usize },
    Rebalance { forced: bool },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Append),
        3 => (0usize..64, 0usize..64).prop_map(|(from, to)| Op::Move { from, to }),
        1 => any::<bool>().prop_map(|forced| Op::Rebalance { forced }),
    ]
}

proptest! {
    #[test]
    fn spacing_holds_after_any_sequence_of_operations(
        seed in any::<u64>(),
        ops in prop::collection::vec(op(), 1..80),
    ) {
        let manager = OrderValueManager::default();
        let mut rng = StdRng::seed_from_u64(seed);
        let mut orders: Vec<f64> = Vec::new();
        for op in ops {
            match op {
                Op::Append => {
                    let v = manager.append_value(&orders, &mut rng);
                    orders.push(v);
                }
                Op::Move { from, to } => {
                    if orders.is_empty() {
                        continue;
                    }
                    let from = from % orders.len();
                    let to = to % orders.len();
                    let v = orders.remove(from);
                    orders.insert(to, v);
                    manager.adjust_after_reorder(&mut orders, &mut rng).unwrap();
                }
                Op::Rebalance { forced } => {
                    manager.rebalance(&mut orders, forced, &mut rng).unwrap();
                }
            }
            prop_assert!(manager.validate(&orders).is_ok(), "spacing broken: {:?}", orders);
        }
    }
}
