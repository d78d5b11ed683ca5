// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Id-indexed object storage.
//!
//! Every object handed out to clients (configs, contexts, surfaces, buffers and images) lives in
//! an [`ObjectHeap`] and is referred to by an [`ObjectId`]. The upper bits of an id encode the
//! kind of object it refers to, so ids of different kinds never collide and a heap will refuse
//! to resolve an id that was not produced by itself.

use thiserror::Error;

/// Opaque handle to an object stored in an [`ObjectHeap`].
pub type ObjectId = u32;

/// Id used by clients to signal the absence of an object.
pub const INVALID_ID: ObjectId = 0xffff_ffff;

/// Bits of an [`ObjectId`] holding the slot index.
pub const ID_INDEX_MASK: u32 = 0x00ff_ffff;
/// Bits of an [`ObjectId`] holding the kind offset.
pub const ID_OFFSET_MASK: u32 = !ID_INDEX_MASK;

pub const CONFIG_ID_OFFSET: u32 = 0x0100_0000;
pub const CONTEXT_ID_OFFSET: u32 = 0x0200_0000;
pub const SURFACE_ID_OFFSET: u32 = 0x0400_0000;
pub const BUFFER_ID_OFFSET: u32 = 0x0800_0000;
pub const IMAGE_ID_OFFSET: u32 = 0x1000_0000;

/// Number of slots the heap starts with.
const INITIAL_CAPACITY: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeapError {
    #[error("object heap exhausted ({0} objects allocated)")]
    Exhausted(usize),
}

enum Slot<T> {
    Occupied(T),
    /// Free slot, linking to the next free slot if any.
    Vacant(Option<usize>),
}

/// A slot allocator handing out [`ObjectId`]s for objects of type `T`.
///
/// Allocation and release are O(1): freed slots are kept in an intrusive free list and reused
/// before the storage grows.
pub struct ObjectHeap<T> {
    id_offset: u32,
    slots: Vec<Slot<T>>,
    next_free: Option<usize>,
    max_objects: usize,
    num_objects: usize,
}

impl<T> ObjectHeap<T> {
    /// Creates an empty heap handing out ids in the `id_offset` space.
    pub fn new(id_offset: u32) -> Self {
        Self::with_max_objects(id_offset, (ID_INDEX_MASK as usize) + 1)
    }

    /// Creates an empty heap that can hold at most `max_objects` objects at the same time.
    pub fn with_max_objects(id_offset: u32, max_objects: usize) -> Self {
        debug_assert_eq!(id_offset & ID_INDEX_MASK, 0);

        Self {
            id_offset,
            slots: Vec::with_capacity(INITIAL_CAPACITY.min(max_objects)),
            next_free: None,
            max_objects: max_objects.min((ID_INDEX_MASK as usize) + 1),
            num_objects: 0,
        }
    }

    fn index_of(&self, id: ObjectId) -> Option<usize> {
        if id & ID_OFFSET_MASK != self.id_offset {
            return None;
        }

        Some((id & ID_INDEX_MASK) as usize)
    }

    /// Stores the object built by `f` into a free slot and returns its id. `f` receives the id
    /// of the slot so objects can record it.
    pub fn allocate_with<F>(&mut self, f: F) -> Result<ObjectId, HeapError>
    where
        F: FnOnce(ObjectId) -> T,
    {
        let index = match self.next_free {
            Some(index) => index,
            None => {
                if self.slots.len() >= self.max_objects {
                    return Err(HeapError::Exhausted(self.num_objects));
                }
                // `Vec` grows its storage geometrically.
                self.slots.push(Slot::Vacant(None));
                self.slots.len() - 1
            }
        };

        let id = self.id_offset | index as u32;
        let next = match std::mem::replace(&mut self.slots[index], Slot::Occupied(f(id))) {
            Slot::Vacant(next) => next,
            Slot::Occupied(_) => unreachable!("free list points to an occupied slot"),
        };
        self.next_free = next;
        self.num_objects += 1;

        Ok(id)
    }

    /// Stores `object` into a free slot and returns its id.
    pub fn allocate(&mut self, object: T) -> Result<ObjectId, HeapError> {
        self.allocate_with(|_| object)
    }

    /// Releases the slot of `id` and returns the object it contained, or `None` if `id` does not
    /// refer to a live object of this heap.
    pub fn free(&mut self, id: ObjectId) -> Option<T> {
        let index = self.index_of(id)?;
        let slot = self.slots.get_mut(index)?;

        match slot {
            Slot::Occupied(_) => (),
            Slot::Vacant(_) => return None,
        }

        match std::mem::replace(slot, Slot::Vacant(self.next_free)) {
            Slot::Occupied(object) => {
                self.next_free = Some(index);
                self.num_objects -= 1;
                Some(object)
            }
            Slot::Vacant(_) => unreachable!(),
        }
    }

    pub fn lookup(&self, id: ObjectId) -> Option<&T> {
        match self.slots.get(self.index_of(id)?)? {
            Slot::Occupied(object) => Some(object),
            Slot::Vacant(_) => None,
        }
    }

    pub fn lookup_mut(&mut self, id: ObjectId) -> Option<&mut T> {
        let index = self.index_of(id)?;
        match self.slots.get_mut(index)? {
            Slot::Occupied(object) => Some(object),
            Slot::Vacant(_) => None,
        }
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.lookup(id).is_some()
    }

    /// Returns the number of live objects.
    pub fn len(&self) -> usize {
        self.num_objects
    }

    pub fn is_empty(&self) -> bool {
        self.num_objects == 0
    }

    /// Iterates over all live objects, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &T)> + '_ {
        let id_offset = self.id_offset;
        self.slots
            .iter()
            .enumerate()
            .filter_map(move |(index, slot)| match slot {
                Slot::Occupied(object) => Some((id_offset | index as u32, object)),
                Slot::Vacant(_) => None,
            })
    }

    /// Returns the ids of all live objects.
    pub fn ids(&self) -> Vec<ObjectId> {
        self.iter().map(|(id, _)| id).collect()
    }

    /// Frees every live object and returns them along with their ids.
    pub fn drain(&mut self) -> Vec<(ObjectId, T)> {
        let ids = self.ids();
        ids.into_iter()
            .filter_map(|id| self.free(id).map(|object| (id, object)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn allocate_free_reallocate() {
        let mut heap = ObjectHeap::new(SURFACE_ID_OFFSET);

        for round in 0..3 {
            let ids = (0..100)
                .map(|i| heap.allocate(i).unwrap())
                .collect::<Vec<_>>();
            assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 100, "round {}", round);
            assert_eq!(heap.len(), 100);

            // Free in a scrambled order.
            let mut order = ids.clone();
            order.sort_by_key(|id| ((id & ID_INDEX_MASK) * 37) % 101);
            for id in order {
                assert!(heap.free(id).is_some());
                assert_eq!(heap.lookup(id), None);
            }
            assert!(heap.is_empty());
            assert_eq!(heap.iter().count(), 0);
        }

        // Storage was reused instead of growing.
        assert_eq!(heap.slots.len(), 100);
    }

    #[test]
    fn ids_carry_their_kind() {
        let mut configs = ObjectHeap::new(CONFIG_ID_OFFSET);
        let mut surfaces = ObjectHeap::new(SURFACE_ID_OFFSET);

        let config = configs.allocate("config").unwrap();
        let surface = surfaces.allocate("surface").unwrap();

        assert_eq!(config & ID_OFFSET_MASK, CONFIG_ID_OFFSET);
        assert_eq!(surface & ID_OFFSET_MASK, SURFACE_ID_OFFSET);
        // Same index, different kinds.
        assert_eq!(config & ID_INDEX_MASK, surface & ID_INDEX_MASK);
        assert_ne!(config, surface);

        assert_eq!(configs.lookup(surface), None);
        assert_eq!(surfaces.lookup(config), None);
        assert_eq!(configs.free(surface), None);
        assert_eq!(configs.lookup(config), Some(&"config"));
    }

    #[test]
    fn freed_and_out_of_range_ids() {
        let mut heap = ObjectHeap::new(BUFFER_ID_OFFSET);
        let id = heap.allocate(5u32).unwrap();

        assert_eq!(heap.lookup(BUFFER_ID_OFFSET | 1000), None);
        assert_eq!(heap.lookup(INVALID_ID), None);
        assert_eq!(heap.free(id), Some(5));
        assert_eq!(heap.free(id), None);
        assert_eq!(heap.lookup(id), None);
        assert_eq!(heap.lookup_mut(id), None);
    }

    #[test]
    fn exhaustion() {
        let mut heap = ObjectHeap::with_max_objects(IMAGE_ID_OFFSET, 2);

        let a = heap.allocate(1).unwrap();
        let _b = heap.allocate(2).unwrap();
        assert_eq!(heap.allocate(3), Err(HeapError::Exhausted(2)));

        heap.free(a);
        assert_eq!(heap.allocate(4), Ok(a));
    }

    #[test]
    fn allocate_with_sees_its_id() {
        let mut heap = ObjectHeap::new(CONTEXT_ID_OFFSET);
        let id = heap.allocate_with(|id| id).unwrap();
        assert_eq!(heap.lookup(id), Some(&id));
    }

    #[test]
    fn iterate_and_drain() {
        let mut heap = ObjectHeap::new(BUFFER_ID_OFFSET);
        let ids = (0..5).map(|i| heap.allocate(i).unwrap()).collect::<Vec<_>>();
        heap.free(ids[2]);

        let live = heap.iter().map(|(_, v)| *v).collect::<Vec<_>>();
        assert_eq!(live, vec![0, 1, 3, 4]);
        // Restartable.
        assert_eq!(heap.iter().count(), 4);

        let drained = heap.drain();
        assert_eq!(drained.len(), 4);
        assert_eq!(drained[0], (ids[0], 0));
        assert!(heap.is_empty());
    }
}
