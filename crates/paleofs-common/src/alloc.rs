//! A per-format free/used bitmap with transactional alloc/free (`spec.md` §4.3).

use std::collections::BTreeSet;
use thiserror::Error;

use crate::owner::Owner;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("no free allocation unit")]
    DiskFull,
    #[error("allocation unit out of range")]
    OutOfRange,
    #[error("a transaction is already open")]
    TransactionAlreadyOpen,
    #[error("no transaction is open")]
    NoActiveTransaction,
}

pub type Result<T> = core::result::Result<T, AllocError>;

#[derive(Debug, Clone, Copy)]
struct Unit {
    free: bool,
    owner: Option<Owner>,
}

/// One undone-on-abort mutation: the unit touched and its state immediately
/// before the mutation.
#[derive(Debug, Clone, Copy)]
struct UndoRecord {
    unit: u64,
    prior_free: bool,
    prior_owner: Option<Owner>,
}

/// A bit-per-alloc-unit free/used map with LIFO-undo transactions.
///
/// Allocation policy is lowest-numbered-free-unit, optionally restricted to
/// units `>= floor` (some formats, e.g. DOS, never hand out unit 0 — the
/// VTOC/boot area).
pub struct AllocMap {
    units: Vec<Unit>,
    floor: u64,
    undo_log: Option<Vec<UndoRecord>>,
    dirty: BTreeSet<u64>,
}

impl AllocMap {
    /// Creates a map of `count` units, all initially free, with allocation
    /// restricted to unit indices `>= floor`.
    pub fn new(count: u64, floor: u64) -> Self {
        Self {
            units: vec![
                Unit {
                    free: true,
                    owner: None
                };
                count as usize
            ],
            floor,
            undo_log: None,
            dirty: BTreeSet::new(),
        }
    }

    pub fn len(&self) -> u64 {
        self.units.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn is_free(&self, unit: u64) -> Result<bool> {
        self.units
            .get(unit as usize)
            .map(|u| u.free)
            .ok_or(AllocError::OutOfRange)
    }

    pub fn owner(&self, unit: u64) -> Result<Option<Owner>> {
        self.units
            .get(unit as usize)
            .map(|u| u.owner)
            .ok_or(AllocError::OutOfRange)
    }

    pub fn count_free(&self) -> u64 {
        self.units.iter().filter(|u| u.free).count() as u64
    }

    /// Forces a unit's bit directly, bypassing the allocation-order policy.
    /// Used when formatting a fresh volume or recreating state observed
    /// during a usage scan (e.g. marking the VTOC track used up front).
    pub fn force_state(&mut self, unit: u64, free: bool, owner: Option<Owner>) -> Result<()> {
        self.record_undo(unit)?;
        let u = self
            .units
            .get_mut(unit as usize)
            .ok_or(AllocError::OutOfRange)?;
        u.free = free;
        u.owner = owner;
        self.dirty.insert(unit);
        Ok(())
    }

    /// Allocates the lowest-numbered free unit `>= floor`, tagging it with
    /// `owner`.
    pub fn alloc(&mut self, owner: Owner) -> Result<u64> {
        let start = self.floor as usize;
        let idx = self.units[start..]
            .iter()
            .position(|u| u.free)
            .map(|i| i + start)
            .ok_or(AllocError::DiskFull)?;
        self.record_undo(idx as u64)?;
        let u = &mut self.units[idx];
        u.free = false;
        u.owner = Some(owner);
        self.dirty.insert(idx as u64);
        Ok(idx as u64)
    }

    pub fn free(&mut self, unit: u64) -> Result<()> {
        self.record_undo(unit)?;
        let u = self
            .units
            .get_mut(unit as usize)
            .ok_or(AllocError::OutOfRange)?;
        u.free = true;
        u.owner = None;
        self.dirty.insert(unit);
        Ok(())
    }

    fn record_undo(&mut self, unit: u64) -> Result<()> {
        if let Some(log) = &mut self.undo_log {
            let u = self
                .units
                .get(unit as usize)
                .copied()
                .ok_or(AllocError::OutOfRange)?;
            log.push(UndoRecord {
                unit,
                prior_free: u.free,
                prior_owner: u.owner,
            });
        } else if unit >= self.units.len() as u64 {
            return Err(AllocError::OutOfRange);
        }
        Ok(())
    }

    /// Opens a transaction. Only one may be open at a time (`spec.md` §4.3,
    /// §5: "Nested transactions are illegal").
    pub fn begin(&mut self) -> Result<()> {
        if self.undo_log.is_some() {
            return Err(AllocError::TransactionAlreadyOpen);
        }
        self.undo_log = Some(Vec::new());
        Ok(())
    }

    /// Commits the open transaction: the undo log is discarded, the
    /// mutations stand.
    pub fn commit(&mut self) -> Result<()> {
        if self.undo_log.take().is_none() {
            return Err(AllocError::NoActiveTransaction);
        }
        Ok(())
    }

    /// Aborts the open transaction, replaying undo records in LIFO order so
    /// the post-state equals the pre-state of the transaction.
    pub fn abort(&mut self) -> Result<()> {
        let log = self
            .undo_log
            .take()
            .ok_or(AllocError::NoActiveTransaction)?;
        for rec in log.into_iter().rev() {
            let u = &mut self.units[rec.unit as usize];
            u.free = rec.prior_free;
            u.owner = rec.prior_owner;
        }
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.undo_log.is_some()
    }

    /// Units written since the last [`AllocMap::mark_clean`] call, for a
    /// caller that wants to flush only dirty bitmap blocks (`spec.md` §4.3:
    /// "Flush writes dirty bitmap blocks only").
    pub fn dirty_units(&self) -> impl Iterator<Item = u64> + '_ {
        self.dirty.iter().copied()
    }

    pub fn mark_clean(&mut self) {
        self.dirty.clear();
    }
}
