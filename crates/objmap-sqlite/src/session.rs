//! Object cache with stable handles.
//!
//! Loaded objects live in a per-type arena. Callers and delayed loads refer
//! to them through [`ObjectRef`] handles (arena index plus generation),
//! never through addresses, so growing the arena never invalidates a
//! reference. Freed slots are reused; the generation bump on release makes
//! older handles to a reused slot resolve to nothing. Each arena also keeps
//! an identity index from object id to slot, which is what a [`Position`]
//! points at.

use crate::traits::ObjectTraits;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Stable handle to an object slot.
pub struct ObjectRef<T> {
    index: usize,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ObjectRef<T> {
    fn new(index: usize, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl<T> Clone for ObjectRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ObjectRef<T> {}

impl<T> PartialEq for ObjectRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for ObjectRef<T> {}

impl<T> Hash for ObjectRef<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for ObjectRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({}@{})", self.index, self.generation)
    }
}

/// Placement of an object in the identity index.
///
/// Used to mark a deferred entry loaded, or to remove it again if the load
/// fails or is discarded.
pub struct Position<T: ObjectTraits> {
    id: T::Id,
    target: ObjectRef<T>,
}

impl<T: ObjectTraits> Position<T> {
    pub fn id(&self) -> &T::Id {
        &self.id
    }

    /// Handle of the slot this position places.
    pub fn target(&self) -> ObjectRef<T> {
        self.target
    }
}

impl<T: ObjectTraits> Clone for Position<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            target: self.target,
        }
    }
}

impl<T: ObjectTraits> fmt::Debug for Position<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Position")
            .field("id", &self.id)
            .field("target", &self.target)
            .finish()
    }
}

enum Slot<T> {
    /// Reserved; the object is still to be loaded
    Pending,
    /// Object constructed, post-load not yet run
    Initialized(T),
    Loaded(T),
    /// On the free list
    Free,
}

impl<T> Slot<T> {
    fn object(&self) -> Option<&T> {
        match self {
            Slot::Initialized(obj) | Slot::Loaded(obj) => Some(obj),
            Slot::Pending | Slot::Free => None,
        }
    }

    fn object_mut(&mut self) -> Option<&mut T> {
        match self {
            Slot::Initialized(obj) | Slot::Loaded(obj) => Some(obj),
            Slot::Pending | Slot::Free => None,
        }
    }
}

struct Entry<T> {
    generation: u32,
    slot: Slot<T>,
}

struct TypeMap<T: ObjectTraits> {
    entries: Vec<Entry<T>>,
    free: Vec<usize>,
    index: HashMap<T::Id, ObjectRef<T>>,
}

impl<T: ObjectTraits> TypeMap<T> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn push(&mut self, id: T::Id, slot: Slot<T>) -> ObjectRef<T> {
        let handle = match self.free.pop() {
            Some(i) => {
                let entry = &mut self.entries[i];
                entry.slot = slot;
                ObjectRef::new(i, entry.generation)
            }
            None => {
                self.entries.push(Entry {
                    generation: 0,
                    slot,
                });
                ObjectRef::new(self.entries.len() - 1, 0)
            }
        };
        if let Some(old) = self.index.insert(id, handle) {
            self.release(old);
        }
        handle
    }

    /// Slot behind `handle`, if the handle is still current.
    fn slot(&self, handle: ObjectRef<T>) -> Option<&Slot<T>> {
        self.entries
            .get(handle.index)
            .filter(|e| e.generation == handle.generation)
            .map(|e| &e.slot)
    }

    fn slot_mut(&mut self, handle: ObjectRef<T>) -> Option<&mut Slot<T>> {
        self.entries
            .get_mut(handle.index)
            .filter(|e| e.generation == handle.generation)
            .map(|e| &mut e.slot)
    }

    /// Return the slot to the free list. Stale handles stop resolving.
    fn release(&mut self, handle: ObjectRef<T>) {
        let Some(entry) = self.entries.get_mut(handle.index) else {
            return;
        };
        if entry.generation != handle.generation || matches!(entry.slot, Slot::Free) {
            return;
        }
        entry.slot = Slot::Free;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(handle.index);
    }
}

/// Type-erased view used for whole-session maintenance.
trait ErasedMap: Any {
    fn release_all(&mut self);
    fn len(&self) -> usize;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: ObjectTraits> ErasedMap for TypeMap<T> {
    fn release_all(&mut self) {
        let live: Vec<_> = self.index.drain().map(|(_, handle)| handle).collect();
        for handle in live {
            self.release(handle);
        }
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Identity-mapped object cache for one database.
#[derive(Default)]
pub struct Session {
    maps: HashMap<TypeId, Box<dyn ErasedMap>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    fn map<T: ObjectTraits>(&self) -> Option<&TypeMap<T>> {
        self.maps
            .get(&TypeId::of::<T>())
            .and_then(|m| m.as_any().downcast_ref::<TypeMap<T>>())
    }

    fn map_mut<T: ObjectTraits>(&mut self) -> &mut TypeMap<T> {
        let entry = self
            .maps
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(TypeMap::<T>::new()));
        match entry.as_any_mut().downcast_mut::<TypeMap<T>>() {
            Some(map) => map,
            // Keyed by TypeId, so the entry always has this type
            None => unreachable!("session map registered under a foreign TypeId"),
        }
    }

    /// Handle of the cached object with this id, loaded or not.
    pub fn lookup<T: ObjectTraits>(&self, id: &T::Id) -> Option<ObjectRef<T>> {
        self.map::<T>()
            .and_then(|m| m.index.get(id))
            .copied()
    }

    /// Reserve a slot for an object that is about to be loaded.
    pub fn reserve<T: ObjectTraits>(&mut self, id: T::Id) -> Position<T> {
        let target = self.map_mut::<T>().push(id.clone(), Slot::Pending);
        Position { id, target }
    }

    /// Cache a fully constructed object, e.g. one just persisted.
    pub fn insert<T: ObjectTraits>(&mut self, obj: T) -> ObjectRef<T> {
        self.map_mut::<T>().push(obj.id(), Slot::Loaded(obj))
    }

    /// Fill a reserved slot. Post-load is still outstanding.
    pub fn store<T: ObjectTraits>(&mut self, target: ObjectRef<T>, obj: T) {
        if let Some(slot) = self.map_mut::<T>().slot_mut(target) {
            *slot = Slot::Initialized(obj);
        }
    }

    /// Mark a placed object completely loaded.
    pub fn mark_loaded<T: ObjectTraits>(&mut self, position: &Position<T>) {
        let Some(slot) = self.map_mut::<T>().slot_mut(position.target) else {
            return;
        };
        match std::mem::replace(slot, Slot::Pending) {
            Slot::Initialized(obj) | Slot::Loaded(obj) => *slot = Slot::Loaded(obj),
            other => {
                tracing::warn!(
                    table = T::TABLE_NAME,
                    id = ?position.id,
                    "Marking an object loaded that was never stored"
                );
                *slot = other;
            }
        }
    }

    /// Remove a placement and free its slot.
    ///
    /// The id stays indexed if it has since been placed elsewhere.
    pub fn erase_position<T: ObjectTraits>(&mut self, position: &Position<T>) {
        let map = self.map_mut::<T>();
        if map.index.get(&position.id) == Some(&position.target) {
            map.index.remove(&position.id);
        }
        map.release(position.target);
    }

    /// Forget the object with this id.
    pub fn remove<T: ObjectTraits>(&mut self, id: &T::Id) -> bool {
        let map = self.map_mut::<T>();
        match map.index.remove(id) {
            Some(handle) => {
                map.release(handle);
                true
            }
            None => false,
        }
    }

    pub fn get<T: ObjectTraits>(&self, handle: ObjectRef<T>) -> Option<&T> {
        self.map::<T>()?.slot(handle)?.object()
    }

    pub fn get_mut<T: ObjectTraits>(&mut self, handle: ObjectRef<T>) -> Option<&mut T> {
        self.map_mut::<T>().slot_mut(handle)?.object_mut()
    }

    /// Whether the object behind `handle` is completely loaded.
    pub fn is_loaded<T: ObjectTraits>(&self, handle: ObjectRef<T>) -> bool {
        self.map::<T>()
            .and_then(|m| m.slot(handle))
            .is_some_and(|s| matches!(s, Slot::Loaded(_)))
    }

    /// Number of `T` placements whose load has not completed.
    pub fn pending_count<T: ObjectTraits>(&self) -> usize {
        self.map::<T>().map_or(0, |m| {
            m.index
                .values()
                .filter(|&&handle| !matches!(m.slot(handle), Some(Slot::Loaded(_))))
                .count()
        })
    }

    /// Number of arena slots allocated for `T`, live or free.
    pub fn capacity<T: ObjectTraits>(&self) -> usize {
        self.map::<T>().map_or(0, |m| m.entries.len())
    }

    /// Number of cached objects across all types.
    pub fn len(&self) -> usize {
        self.maps.values().map(|m| m.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every cached object. Outstanding handles stop resolving.
    pub fn clear(&mut self) {
        for map in self.maps.values_mut() {
            map.release_all();
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("types", &self.maps.len())
            .field("objects", &self.len())
            .finish()
    }
}
