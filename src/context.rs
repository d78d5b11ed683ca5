// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Decode contexts and their ring of OUTPUT buffers.

use crate::object_heap::ObjectId;
use crate::picture::FrameHeaderBuilder;
use crate::Resolution;

/// OUTPUT buffers of a context, mapped into the process and reused in a round-robin fashion.
///
/// OUTPUT buffers cannot be reallocated while the device is consuming them, so a fixed number
/// of them is created with the context. Each slot records the surface whose coded picture it
/// currently holds.
pub struct InputRing<M> {
    /// Device index of the first buffer of the ring.
    first_index: u32,
    mappings: Vec<M>,
    owners: Vec<Option<ObjectId>>,
}

impl<M: AsRef<[u8]> + AsMut<[u8]>> InputRing<M> {
    pub fn new(first_index: u32, mappings: Vec<M>) -> Self {
        let owners = vec![None; mappings.len()];
        Self {
            first_index,
            mappings,
            owners,
        }
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Device index of the buffer in `slot`.
    pub fn device_index(&self, slot: usize) -> u32 {
        self.first_index + slot as u32
    }

    /// Surface whose picture occupies `slot`, if any.
    pub fn owner(&self, slot: usize) -> Option<ObjectId> {
        self.owners.get(slot).copied().flatten()
    }

    pub fn occupy(&mut self, slot: usize, surface: ObjectId) {
        if let Some(owner) = self.owners.get_mut(slot) {
            *owner = Some(surface);
        }
    }

    /// Frees `slot` if it is still occupied by `surface`.
    pub fn release(&mut self, slot: usize, surface: ObjectId) {
        if let Some(owner) = self.owners.get_mut(slot) {
            if *owner == Some(surface) {
                *owner = None;
            }
        }
    }

    pub fn mapping(&self, slot: usize) -> Option<&[u8]> {
        self.mappings.get(slot).map(|m| m.as_ref())
    }

    pub fn mapping_mut(&mut self, slot: usize) -> Option<&mut [u8]> {
        self.mappings.get_mut(slot).map(|m| m.as_mut())
    }

    /// Copies the first `len` bytes of slot `src` to slot `dst`.
    pub fn copy_slot(&mut self, src: usize, dst: usize, len: usize) -> Option<()> {
        if src == dst {
            return Some(());
        }

        let data = self.mapping(src)?.get(..len)?.to_vec();
        self.mapping_mut(dst)?.get_mut(..len)?.copy_from_slice(&data);
        Some(())
    }
}

/// A decode session for one coded stream.
pub struct Context<M> {
    pub(crate) config: ObjectId,
    pub(crate) resolution: Resolution,
    pub(crate) flags: u32,
    pub(crate) render_targets: Vec<ObjectId>,
    pub(crate) current_render_target: Option<ObjectId>,
    /// Number of pictures begun so far.
    pub(crate) rendered_picture_count: u64,
    pub(crate) frame_header: FrameHeaderBuilder,
    pub(crate) ring: InputRing<M>,
}

impl<M: AsRef<[u8]> + AsMut<[u8]>> Context<M> {
    pub fn new(
        config: ObjectId,
        resolution: Resolution,
        flags: u32,
        render_targets: Vec<ObjectId>,
        frame_header: FrameHeaderBuilder,
        ring: InputRing<M>,
    ) -> Self {
        Self {
            config,
            resolution,
            flags,
            render_targets,
            current_render_target: None,
            rendered_picture_count: 0,
            frame_header,
            ring,
        }
    }

    pub fn config(&self) -> ObjectId {
        self.config
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn render_targets(&self) -> &[ObjectId] {
        &self.render_targets
    }

    pub fn current_render_target(&self) -> Option<ObjectId> {
        self.current_render_target
    }

    pub fn rendered_picture_count(&self) -> u64 {
        self.rendered_picture_count
    }

    /// Ring slot the next picture will be submitted through.
    pub fn next_input_slot(&self) -> usize {
        (self.rendered_picture_count % self.ring.len().max(1) as u64) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_ownership() {
        let mut ring = InputRing::new(4, vec![vec![0u8; 16]; 3]);
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.device_index(2), 6);
        assert_eq!(ring.owner(0), None);

        ring.occupy(0, 0x0400_0000);
        ring.occupy(1, 0x0400_0001);
        assert_eq!(ring.owner(0), Some(0x0400_0000));

        // Only the occupant can release its slot.
        ring.release(0, 0x0400_0001);
        assert_eq!(ring.owner(0), Some(0x0400_0000));
        ring.release(0, 0x0400_0000);
        assert_eq!(ring.owner(0), None);

        assert_eq!(ring.owner(7), None);
    }

    #[test]
    fn copy_between_slots() {
        let mut ring = InputRing::new(0, vec![vec![0u8; 8]; 2]);
        ring.mapping_mut(0).unwrap()[..4].copy_from_slice(&[1, 2, 3, 4]);

        ring.copy_slot(0, 1, 3).unwrap();
        assert_eq!(ring.mapping(1).unwrap(), &[1, 2, 3, 0, 0, 0, 0, 0]);
        assert_eq!(ring.copy_slot(0, 1, 9), None);
        assert_eq!(ring.copy_slot(0, 5, 1), None);
    }

    #[test]
    fn next_slot_follows_picture_count() {
        let ring = InputRing::new(0, vec![vec![0u8; 1]; 4]);
        let mut context = Context::new(
            0x0100_0000,
            Resolution::from((320, 240)),
            0,
            vec![],
            FrameHeaderBuilder::new(crate::config::CodecKind::Mpeg2),
            ring,
        );

        let mut slots = vec![];
        for _ in 0..6 {
            slots.push(context.next_input_slot());
            context.rendered_picture_count += 1;
        }
        assert_eq!(slots, vec![0, 1, 2, 3, 0, 1]);
    }
}
