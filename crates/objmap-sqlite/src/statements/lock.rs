//! Reentrancy lock and its scoped helpers.
//!
//! The lock does not serialize threads. It marks a statement cache whose
//! image buffers are in use by a load further up the call stack, so that a
//! nested load of the same type queues itself instead of overwriting them.

use objmap_core::{Error, Result, error::ContractErrorKind};
use std::cell::RefCell;

/// Binary lock flag. Pairing is checked in debug builds only.
#[derive(Debug, Default)]
pub struct ReentrancyLock {
    locked: bool,
}

impl ReentrancyLock {
    pub fn lock(&mut self, owner: &str) -> Result<()> {
        if cfg!(debug_assertions) && self.locked {
            return Err(Error::contract(
                ContractErrorKind::AlreadyLocked,
                format!("{} statements are already locked", owner),
            ));
        }
        self.locked = true;
        Ok(())
    }

    pub fn unlock(&mut self, owner: &str) -> Result<()> {
        if cfg!(debug_assertions) && !self.locked {
            return Err(Error::contract(
                ContractErrorKind::NotLocked,
                format!("{} statements are not locked", owner),
            ));
        }
        self.locked = false;
        Ok(())
    }

    pub fn locked(&self) -> bool {
        self.locked
    }
}

/// Something guarded by a [`ReentrancyLock`].
pub trait Lockable {
    fn lock(&mut self) -> Result<()>;
    fn unlock(&mut self) -> Result<()>;
    fn locked(&self) -> bool;

    /// Drop work queued under the lock. Returns how many items were dropped.
    fn discard_pending(&mut self) -> usize {
        0
    }
}

/// Scoped lock that tolerates reentry.
///
/// On a free target it takes the lock and reports `locked() == true`; when
/// dropped while still holding, it discards pending work and unlocks. On a
/// target that is already locked it reports `locked() == false` and does
/// nothing on drop: the caller is nested inside another operation on the
/// same target and must take its alternate path.
pub struct AutoLock<'a, S: Lockable> {
    target: &'a RefCell<S>,
    holding: bool,
}

impl<'a, S: Lockable> AutoLock<'a, S> {
    pub fn new(target: &'a RefCell<S>) -> Result<Self> {
        let mut inner = target.borrow_mut();
        let holding = if inner.locked() {
            false
        } else {
            inner.lock()?;
            true
        };
        drop(inner);
        Ok(Self { target, holding })
    }

    /// Whether this guard holds the lock.
    pub fn locked(&self) -> bool {
        self.holding
    }

    /// Release the lock early, keeping pending work. Must be holding.
    pub fn unlock(&mut self) -> Result<()> {
        if !self.holding {
            return Err(Error::contract(
                ContractErrorKind::NotLocked,
                "auto-lock released without holding the lock",
            ));
        }
        self.target.borrow_mut().unlock()?;
        self.holding = false;
        Ok(())
    }
}

impl<S: Lockable> Drop for AutoLock<'_, S> {
    fn drop(&mut self) {
        if !self.holding {
            return;
        }
        match self.target.try_borrow_mut() {
            Ok(mut inner) => {
                let discarded = inner.discard_pending();
                if discarded > 0 {
                    tracing::debug!(discarded, "Discarded pending work on release");
                }
                if let Err(e) = inner.unlock() {
                    tracing::warn!(error = %e, "Auto-lock failed to unlock");
                }
            }
            Err(_) => tracing::warn!("Auto-lock target borrowed during release"),
        }
    }
}

/// Temporarily releases a held lock, re-acquiring it on drop.
pub struct AutoUnlock<'a, S: Lockable> {
    target: &'a RefCell<S>,
}

impl<'a, S: Lockable> AutoUnlock<'a, S> {
    pub fn new(target: &'a RefCell<S>) -> Result<Self> {
        target.borrow_mut().unlock()?;
        Ok(Self { target })
    }
}

impl<S: Lockable> Drop for AutoUnlock<'_, S> {
    fn drop(&mut self) {
        match self.target.try_borrow_mut() {
            Ok(mut inner) => {
                if let Err(e) = inner.lock() {
                    tracing::warn!(error = %e, "Auto-unlock failed to re-lock");
                }
            }
            Err(_) => tracing::warn!("Auto-unlock target borrowed during re-lock"),
        }
    }
}
