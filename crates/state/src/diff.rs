//! In-memory overlay of pending staker changes above a parent layer.
//!
//! A diff records, per category, which validator slots and delegator
//! entries were added, updated or deleted relative to its parent. The
//! parent is never mutated; reads consult the tombstones first, then the
//! local records, then recurse into the parent chain. `apply` replays the
//! net changes onto the base once the block owning this diff is accepted.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use plateau_primitives::{BlockId, TxId};

use crate::base::{check_role, BaseState, Category};
use crate::errors::{Result, StateError};
use crate::iterator::StakerIterator;
use crate::staker::{Staker, StakerKey, ValidatorKey};
use crate::tx::{SignedTx, StoredTx, TxStatus};
use crate::versions::Layer;

/// What a diff locally knows about one identity.
pub(crate) enum Visibility {
    Found(Arc<Staker>),
    Tombstoned,
    /// Not mentioned here; the parent decides.
    Unknown,
}

#[derive(Clone, Debug)]
enum LiveOp {
    Added(Arc<Staker>),
    Updated(Arc<Staker>),
}

impl LiveOp {
    fn staker(&self) -> &Arc<Staker> {
        match self {
            LiveOp::Added(s) | LiveOp::Updated(s) => s,
        }
    }
}

/// One validator slot. `deleted` tombstones the ancestor's record; `live`
/// is a replacement visible in this diff. Both can be set at once when a
/// slot was emptied and refilled by a different transaction.
#[derive(Clone, Debug, Default)]
struct ValidatorSlot {
    deleted: Option<Arc<Staker>>,
    live: Option<LiveOp>,
}

impl ValidatorSlot {
    fn is_empty(&self) -> bool {
        self.deleted.is_none() && self.live.is_none()
    }
}

#[derive(Clone, Debug)]
enum DelegatorOp {
    Added(Arc<Staker>),
    Updated(Arc<Staker>),
    Deleted(Arc<Staker>),
}

#[derive(Debug, Default)]
struct DiffStakers {
    validators: HashMap<ValidatorKey, ValidatorSlot>,
    delegators: HashMap<ValidatorKey, HashMap<TxId, DelegatorOp>>,
    /// Records visible in this diff (added and updated), iteration order.
    ordered: BTreeMap<StakerKey, Arc<Staker>>,
    /// Transaction ids this diff shadows in deeper layers (updated and
    /// deleted).
    shadow: BTreeSet<TxId>,
}

/// A stack layer of pending changes above `parent`.
pub struct Diff {
    parent: Layer,
    parent_id: BlockId,
    current: DiffStakers,
    pending: DiffStakers,
    txs: HashMap<TxId, StoredTx>,
}

impl Diff {
    pub(crate) fn new(parent: Layer, parent_id: BlockId) -> Self {
        Self {
            parent,
            parent_id,
            current: DiffStakers::default(),
            pending: DiffStakers::default(),
            txs: HashMap::new(),
        }
    }

    pub(crate) fn parent(&self) -> &Layer {
        &self.parent
    }

    pub fn parent_id(&self) -> BlockId {
        self.parent_id
    }

    fn stakers(&self, category: Category) -> &DiffStakers {
        match category {
            Category::Current => &self.current,
            Category::Pending => &self.pending,
        }
    }

    fn stakers_mut(&mut self, category: Category) -> &mut DiffStakers {
        match category {
            Category::Current => &mut self.current,
            Category::Pending => &mut self.pending,
        }
    }

    // local visibility, consulted by the layer walk

    pub(crate) fn visibility_validator(
        &self,
        category: Category,
        key: &ValidatorKey,
    ) -> Visibility {
        match self.stakers(category).validators.get(key) {
            Some(slot) => match &slot.live {
                Some(live) => Visibility::Found(Arc::clone(live.staker())),
                None if slot.deleted.is_some() => Visibility::Tombstoned,
                None => Visibility::Unknown,
            },
            None => Visibility::Unknown,
        }
    }

    pub(crate) fn visibility_delegator(
        &self,
        category: Category,
        key: &ValidatorKey,
        tx_id: &TxId,
    ) -> Visibility {
        match self
            .stakers(category)
            .delegators
            .get(key)
            .and_then(|slot| slot.get(tx_id))
        {
            Some(DelegatorOp::Added(s) | DelegatorOp::Updated(s)) => {
                Visibility::Found(Arc::clone(s))
            }
            Some(DelegatorOp::Deleted(_)) => Visibility::Tombstoned,
            None => Visibility::Unknown,
        }
    }

    /// This diff's contribution to the merged staker iterator: its live
    /// records in order, plus the transaction ids it shadows below.
    pub(crate) fn layer_stream(
        &self,
        category: Category,
    ) -> (Vec<Arc<Staker>>, BTreeSet<TxId>) {
        let stakers = self.stakers(category);
        (
            stakers.ordered.values().cloned().collect(),
            stakers.shadow.clone(),
        )
    }

    /// As [`Diff::layer_stream`], restricted to the delegators of one
    /// validator slot.
    pub(crate) fn delegator_stream(
        &self,
        category: Category,
        key: &ValidatorKey,
    ) -> (Vec<Arc<Staker>>, BTreeSet<TxId>) {
        let stakers = self.stakers(category);
        let mut local: Vec<Arc<Staker>> = stakers
            .delegators
            .get(key)
            .map(|slot| {
                slot.values()
                    .filter_map(|op| match op {
                        DelegatorOp::Added(s) | DelegatorOp::Updated(s) => {
                            Some(Arc::clone(s))
                        }
                        DelegatorOp::Deleted(_) => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        local.sort_by_key(|staker| staker.sort_key());
        (local, stakers.shadow.clone())
    }

    fn visible_delegators(&self, category: Category, key: &ValidatorKey) -> Vec<Arc<Staker>> {
        let (local, shadow) = self.delegator_stream(category, key);
        let below = self.parent.delegators_of(category, key);
        StakerIterator::from_layers(vec![(local, shadow), (below, BTreeSet::new())]).collect()
    }

    // mutations

    pub(crate) fn put_validator(&mut self, category: Category, staker: Staker) -> Result<()> {
        check_role(&staker, category, true)?;
        staker.validate()?;
        let key = staker.validator_key();
        let slot = self
            .stakers(category)
            .validators
            .get(&key)
            .cloned()
            .unwrap_or_default();

        if slot.live.is_some() {
            return Err(StateError::Duplicate);
        }
        let arc = Arc::new(staker);
        if let Some(dead) = &slot.deleted {
            if dead.tx_id == arc.tx_id {
                // the slot's own record comes back: net effect is an update
                // of the ancestor record
                if !dead.same_identity(&arc) {
                    return Err(StateError::InvalidStaker(
                        "re-put changes staker identity".into(),
                    ));
                }
                let stakers = self.stakers_mut(category);
                let slot = stakers.validators.entry(key).or_default();
                slot.deleted = None;
                slot.live = Some(LiveOp::Updated(Arc::clone(&arc)));
                stakers.ordered.insert(arc.sort_key(), arc);
                // tx id stays shadowed: the ancestor copy must not surface
                return Ok(());
            }
            // a different transaction refills the emptied slot
            let stakers = self.stakers_mut(category);
            let slot = stakers.validators.entry(key).or_default();
            slot.live = Some(LiveOp::Added(Arc::clone(&arc)));
            stakers.ordered.insert(arc.sort_key(), arc);
            return Ok(());
        }

        // no local knowledge: the parent chain must not hold this slot
        if self.parent.lookup_validator(category, &key).is_some() {
            return Err(StateError::Duplicate);
        }
        let stakers = self.stakers_mut(category);
        let slot = stakers.validators.entry(key).or_default();
        slot.live = Some(LiveOp::Added(Arc::clone(&arc)));
        stakers.ordered.insert(arc.sort_key(), arc);
        Ok(())
    }

    pub(crate) fn put_delegator(&mut self, category: Category, staker: Staker) -> Result<()> {
        check_role(&staker, category, false)?;
        staker.validate()?;
        let key = staker.validator_key();

        let validator_visible = match self.visibility_validator(category, &key) {
            Visibility::Found(_) => true,
            Visibility::Tombstoned => false,
            Visibility::Unknown => self.parent.lookup_validator(category, &key).is_some(),
        };
        if !validator_visible {
            return Err(StateError::MissingValidator {
                subnet: staker.subnet_id,
                node: staker.node_id,
            });
        }

        let arc = Arc::new(staker);
        match self.visibility_delegator(category, &key, &arc.tx_id) {
            Visibility::Found(_) => Err(StateError::Duplicate),
            Visibility::Tombstoned => {
                let dead = match self
                    .stakers(category)
                    .delegators
                    .get(&key)
                    .and_then(|slot| slot.get(&arc.tx_id))
                {
                    Some(DelegatorOp::Deleted(dead)) => Arc::clone(dead),
                    _ => unreachable!("tombstone visibility implies a deleted entry"),
                };
                if !dead.same_identity(&arc) {
                    return Err(StateError::InvalidStaker(
                        "re-put changes staker identity".into(),
                    ));
                }
                let stakers = self.stakers_mut(category);
                stakers
                    .delegators
                    .entry(key)
                    .or_default()
                    .insert(arc.tx_id, DelegatorOp::Updated(Arc::clone(&arc)));
                stakers.ordered.insert(arc.sort_key(), arc);
                Ok(())
            }
            Visibility::Unknown => {
                if self
                    .parent
                    .lookup_delegator(category, &key, &arc.tx_id)
                    .is_some()
                {
                    return Err(StateError::Duplicate);
                }
                let stakers = self.stakers_mut(category);
                stakers
                    .delegators
                    .entry(key)
                    .or_default()
                    .insert(arc.tx_id, DelegatorOp::Added(Arc::clone(&arc)));
                stakers.ordered.insert(arc.sort_key(), arc);
                Ok(())
            }
        }
    }

    pub(crate) fn update_validator(&mut self, category: Category, staker: Staker) -> Result<()> {
        check_role(&staker, category, true)?;
        staker.validate()?;
        let key = staker.validator_key();
        let arc = Arc::new(staker);

        if let Some(slot) = self.stakers(category).validators.get(&key) {
            match &slot.live {
                Some(live) => {
                    let old = Arc::clone(live.staker());
                    if old.tx_id != arc.tx_id {
                        return Err(StateError::NotFound);
                    }
                    if !old.same_identity(&arc) {
                        return Err(StateError::InvalidStaker(
                            "update changes staker identity".into(),
                        ));
                    }
                    let was_added = matches!(live, LiveOp::Added(_));
                    let stakers = self.stakers_mut(category);
                    stakers.ordered.remove(&old.sort_key());
                    stakers.ordered.insert(arc.sort_key(), Arc::clone(&arc));
                    let slot = stakers.validators.get_mut(&key).expect("slot exists");
                    slot.live = Some(if was_added {
                        LiveOp::Added(arc)
                    } else {
                        LiveOp::Updated(arc)
                    });
                    return Ok(());
                }
                None if slot.deleted.is_some() => return Err(StateError::NotFound),
                None => {}
            }
        }

        // the record lives in an ancestor; shadow it from here on
        let old = self
            .parent
            .lookup_validator(category, &key)
            .ok_or(StateError::NotFound)?;
        if old.tx_id != arc.tx_id {
            return Err(StateError::NotFound);
        }
        if !old.same_identity(&arc) {
            return Err(StateError::InvalidStaker(
                "update changes staker identity".into(),
            ));
        }
        let stakers = self.stakers_mut(category);
        let slot = stakers.validators.entry(key).or_default();
        slot.live = Some(LiveOp::Updated(Arc::clone(&arc)));
        stakers.shadow.insert(arc.tx_id);
        stakers.ordered.insert(arc.sort_key(), arc);
        Ok(())
    }

    pub(crate) fn update_delegator(&mut self, category: Category, staker: Staker) -> Result<()> {
        check_role(&staker, category, false)?;
        staker.validate()?;
        let key = staker.validator_key();
        let arc = Arc::new(staker);

        let local = self
            .stakers(category)
            .delegators
            .get(&key)
            .and_then(|slot| slot.get(&arc.tx_id))
            .cloned();
        match local {
            Some(DelegatorOp::Deleted(_)) => Err(StateError::NotFound),
            Some(DelegatorOp::Added(old)) | Some(DelegatorOp::Updated(old)) => {
                if !old.same_identity(&arc) {
                    return Err(StateError::InvalidStaker(
                        "update changes staker identity".into(),
                    ));
                }
                let was_added = matches!(
                    self.stakers(category)
                        .delegators
                        .get(&key)
                        .and_then(|slot| slot.get(&arc.tx_id)),
                    Some(DelegatorOp::Added(_))
                );
                let stakers = self.stakers_mut(category);
                stakers.ordered.remove(&old.sort_key());
                stakers.ordered.insert(arc.sort_key(), Arc::clone(&arc));
                stakers.delegators.entry(key).or_default().insert(
                    arc.tx_id,
                    if was_added {
                        DelegatorOp::Added(arc)
                    } else {
                        DelegatorOp::Updated(arc)
                    },
                );
                Ok(())
            }
            None => {
                let old = self
                    .parent
                    .lookup_delegator(category, &key, &arc.tx_id)
                    .ok_or(StateError::NotFound)?;
                if !old.same_identity(&arc) {
                    return Err(StateError::InvalidStaker(
                        "update changes staker identity".into(),
                    ));
                }
                let stakers = self.stakers_mut(category);
                stakers
                    .delegators
                    .entry(key)
                    .or_default()
                    .insert(arc.tx_id, DelegatorOp::Updated(Arc::clone(&arc)));
                stakers.shadow.insert(arc.tx_id);
                stakers.ordered.insert(arc.sort_key(), arc);
                Ok(())
            }
        }
    }

    pub(crate) fn delete_validator(&mut self, category: Category, staker: &Staker) -> Result<()> {
        check_role(staker, category, true)?;
        let key = staker.validator_key();

        let slot = self
            .stakers(category)
            .validators
            .get(&key)
            .cloned()
            .unwrap_or_default();
        match &slot.live {
            Some(live) => {
                let old = Arc::clone(live.staker());
                if old.tx_id != staker.tx_id {
                    return Err(StateError::NotFound);
                }
                let was_added = matches!(live, LiveOp::Added(_));
                let stakers = self.stakers_mut(category);
                stakers.ordered.remove(&old.sort_key());
                let entry = stakers.validators.get_mut(&key).expect("slot exists");
                entry.live = None;
                if !was_added {
                    // an Updated record stands for an ancestor record,
                    // which now needs a tombstone
                    entry.deleted = Some(old);
                }
                if entry.is_empty() {
                    stakers.validators.remove(&key);
                }
            }
            None => {
                if slot.deleted.is_some() {
                    return Err(StateError::NotFound);
                }
                let old = self
                    .parent
                    .lookup_validator(category, &key)
                    .ok_or(StateError::NotFound)?;
                if old.tx_id != staker.tx_id {
                    return Err(StateError::NotFound);
                }
                let stakers = self.stakers_mut(category);
                stakers.shadow.insert(old.tx_id);
                stakers.validators.entry(key).or_default().deleted = Some(old);
            }
        }

        // a validator takes its visible delegators with it
        for delegator in self.visible_delegators(category, &key) {
            self.delete_delegator(category, &delegator)?;
        }
        Ok(())
    }

    pub(crate) fn delete_delegator(&mut self, category: Category, staker: &Staker) -> Result<()> {
        check_role(staker, category, false)?;
        let key = staker.validator_key();

        let local = self
            .stakers(category)
            .delegators
            .get(&key)
            .and_then(|slot| slot.get(&staker.tx_id))
            .cloned();
        match local {
            Some(DelegatorOp::Deleted(_)) => Err(StateError::NotFound),
            Some(DelegatorOp::Added(old)) => {
                // purely local record: dropping it is enough, the parent
                // never had it
                let stakers = self.stakers_mut(category);
                stakers.ordered.remove(&old.sort_key());
                let slot = stakers.delegators.get_mut(&key).expect("slot exists");
                slot.remove(&staker.tx_id);
                if slot.is_empty() {
                    stakers.delegators.remove(&key);
                }
                Ok(())
            }
            Some(DelegatorOp::Updated(old)) => {
                let stakers = self.stakers_mut(category);
                stakers.ordered.remove(&old.sort_key());
                stakers
                    .delegators
                    .entry(key)
                    .or_default()
                    .insert(staker.tx_id, DelegatorOp::Deleted(old));
                Ok(())
            }
            None => {
                let old = self
                    .parent
                    .lookup_delegator(category, &key, &staker.tx_id)
                    .ok_or(StateError::NotFound)?;
                let stakers = self.stakers_mut(category);
                stakers.shadow.insert(old.tx_id);
                stakers
                    .delegators
                    .entry(key)
                    .or_default()
                    .insert(staker.tx_id, DelegatorOp::Deleted(old));
                Ok(())
            }
        }
    }

    pub(crate) fn add_tx(&mut self, tx: SignedTx, status: TxStatus) {
        self.txs.insert(tx.tx_id(), StoredTx { tx, status });
    }

    pub(crate) fn get_tx(&self, tx_id: &TxId) -> Option<StoredTx> {
        self.txs.get(tx_id).cloned()
    }

    /// Replay this diff's net changes onto the base.
    ///
    /// Order matters: delegator tombstones go first so no slot cascade can
    /// fire inside the base, then validator slots settle (tombstone before
    /// replacement), then delegator additions and updates land on the
    /// settled validators. The diff recorded explicit tombstones for every
    /// cascaded delegator, so validator deletes skip the base's own
    /// cascade.
    pub(crate) fn apply(&self, base: &mut BaseState) -> Result<()> {
        for category in [Category::Current, Category::Pending] {
            let stakers = self.stakers(category);

            for slot in stakers.delegators.values() {
                for op in slot.values() {
                    if let DelegatorOp::Deleted(old) = op {
                        base.delete_delegator(category, old)?;
                    }
                }
            }

            for slot in stakers.validators.values() {
                if let Some(dead) = &slot.deleted {
                    base.delete_validator_no_cascade(category, dead)?;
                }
                match &slot.live {
                    Some(LiveOp::Added(staker)) => {
                        base.put_validator(category, (**staker).clone())?
                    }
                    Some(LiveOp::Updated(staker)) => {
                        base.update_validator(category, (**staker).clone())?
                    }
                    None => {}
                }
            }

            for slot in stakers.delegators.values() {
                for op in slot.values() {
                    match op {
                        DelegatorOp::Added(staker) => {
                            base.put_delegator(category, (**staker).clone())?
                        }
                        DelegatorOp::Updated(staker) => {
                            base.update_delegator(category, (**staker).clone())?
                        }
                        DelegatorOp::Deleted(_) => {}
                    }
                }
            }
        }

        for stored in self.txs.values() {
            base.add_tx(stored.tx.clone(), stored.status)?;
        }
        Ok(())
    }
}
