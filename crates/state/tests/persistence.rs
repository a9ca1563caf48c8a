//! Durable round trips through the LMDB backend.
//!
//! After a successful commit, closing and reopening the environment must
//! yield an equal state; uncommitted and aborted writes must vanish.

use std::sync::Arc;

use anyhow::Result;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use plateau_primitives::{BlockId, NodeId, SubnetId, TxId};
use plateau_state::{
    BaseState, ConsumptionRateCalculator, KvStore, LmdbKv, Priority, SignedTx, Staker,
    StakingConfig, StateError, TxStatus,
};

const T0: u64 = 852_076_800;

fn open_base(path: &std::path::Path) -> Result<BaseState> {
    let config = StakingConfig::default();
    let rewards = Arc::new(ConsumptionRateCalculator::new(config.reward.clone()));
    let kv: Arc<dyn KvStore> = Arc::new(LmdbKv::open(path)?);
    Ok(BaseState::open(kv, config, rewards)?)
}

fn random_validator(rng: &mut ChaCha20Rng, node_byte: u8) -> Staker {
    let mut tx = [0u8; 32];
    rng.fill(&mut tx);
    let period = rng.gen_range(1u64..365) * 24 * 3_600;
    Staker::new(
        TxId::from_bytes(tx),
        NodeId::from_bytes([node_byte; 20]),
        SubnetId::PRIMARY_NETWORK,
        Priority::PrimaryNetworkValidatorCurrent,
        rng.gen_range(1u64..1_000_000),
        T0,
        T0 + period,
        vec![rng.gen(), rng.gen()],
    )
    .unwrap()
}

fn collect(base: &BaseState) -> Vec<Staker> {
    base.get_current_staker_iterator()
        .map(|s| (*s).clone())
        .collect()
}

#[test]
fn committed_state_survives_reopen() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut rng = ChaCha20Rng::seed_from_u64(7);

    let expected = {
        let mut base = open_base(dir.path())?;
        for node_byte in 0u8..12 {
            base.put_current_validator(random_validator(&mut rng, node_byte))?;
        }
        base.add_tx(
            SignedTx::from_payload(b"accepted".to_vec()),
            TxStatus::Committed,
        )?;
        base.set_last_accepted(BlockId::derived(9));
        base.commit()?;
        let expected = collect(&base);
        base.close()?;
        expected
    };

    let base = open_base(dir.path())?;
    assert_eq!(collect(&base), expected);
    assert_eq!(base.get_last_accepted(), BlockId::derived(9));
    assert_eq!(
        base.get_tx(TxId::digest(b"accepted"))?.status,
        TxStatus::Committed
    );

    // records come back ordered even though they went in shuffled
    let view = collect(&base);
    for pair in view.windows(2) {
        assert!(pair[0].sort_key() <= pair[1].sort_key());
    }
    Ok(())
}

#[test]
fn uncommitted_writes_die_with_close() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut rng = ChaCha20Rng::seed_from_u64(8);

    {
        let mut base = open_base(dir.path())?;
        base.put_current_validator(random_validator(&mut rng, 1))?;
        base.commit()?;
        base.put_current_validator(random_validator(&mut rng, 2))?;
        // no commit for the second record
        base.close()?;
    }

    let base = open_base(dir.path())?;
    assert_eq!(collect(&base).len(), 1);
    Ok(())
}

#[test]
fn aborted_batch_leaves_disk_untouched() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut rng = ChaCha20Rng::seed_from_u64(9);

    {
        let mut base = open_base(dir.path())?;
        base.put_current_validator(random_validator(&mut rng, 1))?;
        base.abort();
        base.commit()?;
        base.close()?;
    }

    let base = open_base(dir.path())?;
    assert!(collect(&base).is_empty());
    Ok(())
}

#[test]
fn deletes_and_updates_are_durable() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut rng = ChaCha20Rng::seed_from_u64(10);
    let keep = random_validator(&mut rng, 1);
    let dropped = random_validator(&mut rng, 2);

    {
        let mut base = open_base(dir.path())?;
        base.put_current_validator(keep.clone())?;
        base.put_current_validator(dropped.clone())?;
        base.commit()?;

        let mut shifted = keep.clone();
        shifted.shift_ahead(shifted.next_time);
        base.update_current_validator(shifted)?;
        base.delete_current_validator(&dropped)?;
        base.commit()?;
        base.close()?;
    }

    let base = open_base(dir.path())?;
    let view = collect(&base);
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].tx_id, keep.tx_id);
    assert_eq!(view[0].next_time, keep.next_time + keep.staking_period());
    assert!(matches!(
        base.get_current_validator(dropped.subnet_id, dropped.node_id),
        Err(StateError::NotFound)
    ));
    Ok(())
}
