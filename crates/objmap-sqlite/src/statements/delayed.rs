//! Delayed-load queue draining.
//!
//! Loading an object can require another object of the same type while
//! that type's statements are locked by the outer load. Such loads are
//! queued on the statements and drained once the outer object is in place.

use super::lock::AutoUnlock;
use super::object::ObjectStatements;
use crate::database::Database;
use crate::session::{ObjectRef, Position};
use crate::traits::ObjectTraits;
use objmap_core::{
    Error, Result,
    error::{ContractErrorKind, ObjectError, ObjectErrorKind},
};
use std::cell::RefCell;
use std::collections::VecDeque;

/// Custom loader for a delayed entry. Must store the object into `target`.
pub type Loader<T> = fn(&mut Database, &<T as ObjectTraits>::Id, ObjectRef<T>) -> Result<()>;

/// One queued load.
pub struct DelayedLoad<T: ObjectTraits> {
    pub id: T::Id,
    pub target: ObjectRef<T>,
    pub position: Position<T>,
    pub loader: Option<Loader<T>>,
}

impl<T: ObjectTraits> std::fmt::Debug for DelayedLoad<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayedLoad")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("custom_loader", &self.loader.is_some())
            .finish()
    }
}

/// Holds the entries being drained, apart from the statements' own queue.
///
/// Loads queued while draining land in the statements' queue, not in the
/// list being iterated. On drop, the unprocessed local entries are put back
/// behind anything still in the statements' queue, so the owner of the
/// lock sees every placement it has to finish or erase.
struct SwapGuard<'a, T: ObjectTraits> {
    sts: &'a RefCell<ObjectStatements<T>>,
    local: VecDeque<DelayedLoad<T>>,
}

impl<'a, T: ObjectTraits> SwapGuard<'a, T> {
    fn new(sts: &'a RefCell<ObjectStatements<T>>) -> Self {
        let local = std::mem::take(&mut sts.borrow_mut().delayed);
        Self { sts, local }
    }
}

impl<T: ObjectTraits> Drop for SwapGuard<'_, T> {
    fn drop(&mut self) {
        match self.sts.try_borrow_mut() {
            Ok(mut sts) => sts.delayed.append(&mut self.local),
            Err(_) => tracing::warn!(
                table = T::TABLE_NAME,
                "Statements borrowed while restoring the delayed-load queue"
            ),
        }
    }
}

/// Run every queued load for `T`, in the order queued.
///
/// The statements must be locked by the caller. Loads queued while an
/// entry is processed are drained before that entry's post-load callback.
pub fn load_delayed<T: ObjectTraits>(
    sts: &RefCell<ObjectStatements<T>>,
    db: &mut Database,
) -> Result<()> {
    {
        let sts = sts.borrow();
        if cfg!(debug_assertions) && !sts.locked() {
            return Err(Error::contract(
                ContractErrorKind::DelayWhileUnlocked,
                format!("{} delayed loads drained without the lock", T::TABLE_NAME),
            ));
        }
        if sts.delayed_count() == 0 {
            return Ok(());
        }
    }
    drain(sts, db)
}

fn drain<T: ObjectTraits>(sts: &RefCell<ObjectStatements<T>>, db: &mut Database) -> Result<()> {
    let mut guard = SwapGuard::new(sts);
    tracing::debug!(
        table = T::TABLE_NAME,
        count = guard.local.len(),
        "Draining delayed loads"
    );

    while let Some(entry) = guard.local.pop_front() {
        load_entry(sts, db, entry)?;
    }
    Ok(())
}

/// Drop every queued load of `T`, erasing the placements they reserved.
///
/// Returns the number of entries dropped.
pub fn discard_delayed<T: ObjectTraits>(
    sts: &RefCell<ObjectStatements<T>>,
    db: &mut Database,
) -> usize {
    let discarded = sts.borrow_mut().take_delayed();
    for entry in &discarded {
        db.session_mut().erase_position(&entry.position);
    }
    if !discarded.is_empty() {
        tracing::debug!(
            table = T::TABLE_NAME,
            count = discarded.len(),
            "Discarded delayed loads"
        );
    }
    discarded.len()
}

fn load_entry<T: ObjectTraits>(
    sts: &RefCell<ObjectStatements<T>>,
    db: &mut Database,
    entry: DelayedLoad<T>,
) -> Result<()> {
    let DelayedLoad {
        id,
        target,
        position,
        loader,
    } = entry;

    let loaded = match loader {
        Some(loader) => loader(db, &id, target),
        None => build_entry(sts, db, &id, target),
    };
    match loaded {
        Ok(()) => {
            db.session_mut().mark_loaded(&position);
            Ok(())
        }
        Err(e) => {
            db.session_mut().erase_position(&position);
            Err(e)
        }
    }
}

fn build_entry<T: ObjectTraits>(
    sts: &RefCell<ObjectStatements<T>>,
    db: &mut Database,
    id: &T::Id,
    target: ObjectRef<T>,
) -> Result<()> {
    if !sts.borrow_mut().find_image(id)? {
        return Err(Error::Object(ObjectError::new(
            ObjectErrorKind::NotPersistent,
            T::TABLE_NAME,
            Some(format!("{:?}", id)),
        )));
    }

    // init_object may queue further loads of T but never touches the image
    let image = sts.borrow_mut().take_image();
    let obj = T::init_object(&image, db);
    sts.borrow_mut().restore_image(image);
    let mut obj = obj?;

    {
        let mut sts = sts.borrow_mut();
        sts.bind_id_image(id);
        T::load_containers(&mut sts, &mut obj)?;
    }
    db.session_mut().store(target, obj);

    if sts.borrow().delayed_count() > 0 {
        drain(sts, db)?;
    }

    // Fully loaded, so post-load may load objects of this type directly
    let _unlocked = AutoUnlock::new(sts)?;
    T::post_load(db, target)
}
