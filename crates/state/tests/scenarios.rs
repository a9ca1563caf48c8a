//! Concrete layering scenarios and round-trip laws.
//!
//! These pin the literal behaviors the randomized harness only covers
//! statistically: duplicate inserts across diffs, delegator/validator
//! coupling, flush collapse, cross-layer updates and delete-then-reput.

use std::sync::Arc;

use plateau_primitives::{NodeId, SubnetId, TxId};
use plateau_state::{
    BaseState, ConsumptionRateCalculator, KvStore, LayeredState, MemoryKv, Priority, Staker,
    StakingConfig, StateError,
};

/// 1997-01-01T00:00:00Z.
const T0: u64 = 852_076_800;
const DAY: u64 = 24 * 3_600;

fn new_system() -> LayeredState {
    let config = StakingConfig::default();
    let rewards = Arc::new(ConsumptionRateCalculator::new(config.reward.clone()));
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
    LayeredState::new(BaseState::open(kv, config, rewards).expect("open empty base"))
}

fn validator_0xaa() -> Staker {
    Staker::new(
        TxId::from_bytes([0x01; 32]),
        NodeId::from_bytes([0xaa; 20]),
        SubnetId::PRIMARY_NETWORK,
        Priority::PrimaryNetworkValidatorCurrent,
        1_000,
        T0,
        T0 + DAY,
        vec![],
    )
    .unwrap()
}

fn delegator_0xaa(tx_byte: u8) -> Staker {
    Staker::new(
        TxId::from_bytes([tx_byte; 32]),
        NodeId::from_bytes([0xaa; 20]),
        SubnetId::PRIMARY_NETWORK,
        Priority::PrimaryNetworkDelegatorCurrent,
        500,
        T0,
        T0 + 2 * DAY,
        vec![],
    )
    .unwrap()
}

fn top_times(sys: &LayeredState) -> Vec<u64> {
    sys.top_chain()
        .get_current_staker_iterator()
        .map(|s| s.next_time)
        .collect()
}

fn top_stakers(sys: &LayeredState) -> Vec<Staker> {
    sys.top_chain()
        .get_current_staker_iterator()
        .map(|s| (*s).clone())
        .collect()
}

/// S1: insert a validator, add a diff, shift it one period ahead.
#[test]
fn insert_and_shift_across_a_diff() {
    let mut sys = new_system();
    let val = validator_0xaa();
    sys.top_chain().put_current_validator(val.clone()).unwrap();

    sys.add_diff_on_top();
    let top = sys.top_chain();
    let stored = top
        .get_current_validator(val.subnet_id, val.node_id)
        .unwrap();
    let mut shifted = (*stored).clone();
    shifted.shift_ahead(shifted.next_time);
    top.update_current_validator(shifted).unwrap();

    let view = top_stakers(&sys);
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].next_time, T0 + 2 * DAY);
    assert_eq!(view[0].staking_period(), DAY);
}

/// S2: a duplicate insert on a fresh diff fails and changes nothing.
#[test]
fn duplicate_insert_on_diff_is_rejected() {
    let mut sys = new_system();
    sys.top_chain()
        .put_current_validator(validator_0xaa())
        .unwrap();

    sys.add_diff_on_top();
    let before = top_stakers(&sys);
    assert!(matches!(
        sys.top_chain().put_current_validator(validator_0xaa()),
        Err(StateError::Duplicate)
    ));
    // a different transaction against the same slot is just as dead
    let mut other = validator_0xaa();
    other.tx_id = TxId::from_bytes([0x02; 32]);
    assert!(matches!(
        sys.top_chain().put_current_validator(other),
        Err(StateError::Duplicate)
    ));
    assert_eq!(before, top_stakers(&sys));
}

/// S3: a delegator needs its validator in the same category.
#[test]
fn delegator_requires_validator_in_view() {
    let sys = new_system();
    assert!(matches!(
        sys.top_chain().put_current_delegator(delegator_0xaa(0x10)),
        Err(StateError::MissingValidator { .. })
    ));

    sys.top_chain()
        .put_current_validator(validator_0xaa())
        .unwrap();
    sys.top_chain()
        .put_current_delegator(delegator_0xaa(0x10))
        .unwrap();
    assert_eq!(top_times(&sys), vec![T0 + DAY, T0 + 2 * DAY]);
}

/// S4: flushing both diffs collapses everything into the base; a rebuild
/// reproduces the exact same iteration.
#[test]
fn flush_collapses_and_rebuild_reproduces() {
    let mut sys = new_system();
    sys.top_chain()
        .put_current_validator(validator_0xaa())
        .unwrap();

    sys.add_diff_on_top();
    sys.top_chain()
        .put_current_delegator(delegator_0xaa(0x10))
        .unwrap();

    sys.add_diff_on_top();
    sys.top_chain()
        .put_current_delegator(delegator_0xaa(0x11))
        .unwrap();

    assert!(sys.flush_bottom_diff());
    assert!(sys.flush_bottom_diff());
    assert_eq!(sys.depth(), 0);

    let before = top_stakers(&sys);
    assert_eq!(before.len(), 3);

    sys.commit_base().unwrap();
    sys.rebuild_from_disk().unwrap();
    assert_eq!(before, top_stakers(&sys));
}

/// S5: an update on a diff is visible on top but not below, until flush.
#[test]
fn cross_layer_update_stays_above_until_flush() {
    let mut sys = new_system();
    let val = validator_0xaa();
    sys.top_chain().put_current_validator(val.clone()).unwrap();

    sys.add_diff_on_top();
    let mut heavier = (*sys
        .top_chain()
        .get_current_validator(val.subnet_id, val.node_id)
        .unwrap())
    .clone();
    heavier.increase_weight(1_100);
    sys.top_chain().update_current_validator(heavier).unwrap();

    let top_weight = sys
        .top_chain()
        .get_current_validator(val.subnet_id, val.node_id)
        .unwrap()
        .weight;
    let base_weight = sys
        .base()
        .get_current_validator(val.subnet_id, val.node_id)
        .unwrap()
        .weight;
    assert_eq!(top_weight, 1_100);
    assert_eq!(base_weight, 1_000);

    assert!(sys.flush_bottom_diff());
    let base_weight = sys
        .base()
        .get_current_validator(val.subnet_id, val.node_id)
        .unwrap()
        .weight;
    assert_eq!(base_weight, 1_100);
}

/// S6: delete on a higher diff hides the record; re-putting the same
/// identity brings it back.
#[test]
fn delete_then_reput_on_higher_diff() {
    let mut sys = new_system();

    sys.add_diff_on_top();
    let val = validator_0xaa();
    sys.top_chain().put_current_validator(val.clone()).unwrap();

    sys.add_diff_on_top();
    sys.top_chain().delete_current_validator(&val).unwrap();
    assert!(top_stakers(&sys).is_empty());

    sys.top_chain().put_current_validator(val.clone()).unwrap();
    let view = top_stakers(&sys);
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].tx_id, val.tx_id);

    // and the collapsed base agrees
    assert!(sys.flush_bottom_diff());
    assert!(sys.flush_bottom_diff());
    assert_eq!(top_stakers(&sys).len(), 1);
}

/// Law 7: applying diffs bottom-up equals running the same commands
/// directly against the base.
#[test]
fn apply_composition_equals_direct_execution() {
    let mut layered = new_system();
    let direct = new_system();

    // interleave puts, an update and a delete across three diff layers
    let val_a = validator_0xaa();
    let mut val_b = validator_0xaa();
    val_b.tx_id = TxId::from_bytes([0x03; 32]);
    val_b.node_id = NodeId::from_bytes([0xbb; 20]);

    // layered run
    layered.top_chain().put_current_validator(val_a.clone()).unwrap();
    layered.add_diff_on_top();
    layered
        .top_chain()
        .put_current_delegator(delegator_0xaa(0x10))
        .unwrap();
    layered.top_chain().put_current_validator(val_b.clone()).unwrap();
    layered.add_diff_on_top();
    let mut heavier = (*layered
        .top_chain()
        .get_current_validator(val_b.subnet_id, val_b.node_id)
        .unwrap())
    .clone();
    heavier.increase_weight(2_000);
    layered.top_chain().update_current_validator(heavier).unwrap();
    layered.top_chain().delete_current_validator(&val_a).unwrap();
    while layered.flush_bottom_diff() {}

    // direct run, same command order, no diffs
    direct.top_chain().put_current_validator(val_a.clone()).unwrap();
    direct
        .top_chain()
        .put_current_delegator(delegator_0xaa(0x10))
        .unwrap();
    direct.top_chain().put_current_validator(val_b.clone()).unwrap();
    let mut heavier = (*direct
        .top_chain()
        .get_current_validator(val_b.subnet_id, val_b.node_id)
        .unwrap())
    .clone();
    heavier.increase_weight(2_000);
    direct.top_chain().update_current_validator(heavier).unwrap();
    direct.top_chain().delete_current_validator(&val_a).unwrap();

    assert_eq!(top_stakers(&layered), top_stakers(&direct));
    // the deleted validator took its delegator with it
    assert_eq!(top_stakers(&layered).len(), 1);
}

/// Law 8: an empty diff flushes to a no-op on the base content.
#[test]
fn empty_diff_flush_is_a_noop() {
    let mut sys = new_system();
    sys.top_chain()
        .put_current_validator(validator_0xaa())
        .unwrap();
    let before = top_stakers(&sys);
    let block = sys.add_diff_on_top();
    assert!(sys.flush_bottom_diff());
    assert_eq!(before, top_stakers(&sys));

    // flushing did advance the accepted block
    let accepted = match sys.state_at(block) {
        Some(layer) => layer.get_current_staker_iterator().count(),
        None => panic!("accepted block must resolve to the base"),
    };
    assert_eq!(accepted, 1);
}

/// Law 8 corollary: flushing an empty stack reports there was nothing to
/// do.
#[test]
fn flush_on_empty_stack_returns_false() {
    let mut sys = new_system();
    assert!(!sys.flush_bottom_diff());
}
