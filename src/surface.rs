// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Decode targets and the CAPTURE buffers backing them.

use enumn::N;

use crate::object_heap::ObjectId;
use crate::Resolution;

/// Status of a surface, numbered like the VA surface status enumeration.
#[derive(N, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SurfaceStatus {
    Rendering = 1,
    Ready = 4,
}

/// A picture being decoded into a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFlight {
    /// Context the picture was begun on.
    pub context: ObjectId,
    /// Whether the coded picture has been queued to the device.
    pub queued: bool,
}

#[derive(Debug)]
pub struct Surface {
    resolution: Resolution,
    status: SurfaceStatus,
    /// OUTPUT ring slot holding the coded picture.
    pub(crate) input_slot: u32,
    /// CAPTURE buffer the picture is decoded into.
    pub(crate) output_slot: u32,
    /// Request token of the picture.
    pub(crate) request: u32,
    pub(crate) in_flight: Option<InFlight>,
}

impl Surface {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            status: SurfaceStatus::Ready,
            input_slot: 0,
            output_slot: 0,
            request: 0,
            in_flight: None,
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn status(&self) -> SurfaceStatus {
        self.status
    }

    pub fn input_slot(&self) -> u32 {
        self.input_slot
    }

    pub fn output_slot(&self) -> u32 {
        self.output_slot
    }

    pub fn request(&self) -> u32 {
        self.request
    }

    /// Marks the surface as the target of a new picture.
    pub(crate) fn begin(&mut self, context: ObjectId, slots: PictureSlots) {
        self.status = SurfaceStatus::Rendering;
        self.input_slot = slots.input_slot;
        self.output_slot = slots.output_slot;
        self.request = slots.request;
        self.in_flight = Some(InFlight {
            context,
            queued: false,
        });
    }

    /// Marks the surface as decoded and returns the picture that was in flight.
    pub(crate) fn complete(&mut self) -> Option<InFlight> {
        self.status = SurfaceStatus::Ready;
        self.in_flight.take()
    }
}

/// Device slots assigned to the n-th picture begun on a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PictureSlots {
    pub input_slot: u32,
    pub output_slot: u32,
    pub request: u32,
}

impl PictureSlots {
    /// Derives the slots of submission `n` from the number of OUTPUT buffers in the context's
    /// ring and the number of CAPTURE buffers of the session. Request tokens start at 1.
    pub fn for_submission(n: u64, ring_size: u32, num_capture_buffers: u32) -> Self {
        let ring_size = u64::from(ring_size.max(1));
        let num_capture_buffers = u64::from(num_capture_buffers.max(1));

        Self {
            input_slot: (n % ring_size) as u32,
            output_slot: (n % num_capture_buffers) as u32,
            request: (n % ring_size) as u32 + 1,
        }
    }
}

/// CPU mappings of the two planes of a CAPTURE buffer.
pub struct CapturePlanes<M> {
    pub luma: M,
    pub chroma: M,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_periodic() {
        let input_slots = (0..10)
            .map(|n| PictureSlots::for_submission(n, 4, 6).input_slot)
            .collect::<Vec<_>>();
        assert_eq!(input_slots, vec![0, 1, 2, 3, 0, 1, 2, 3, 0, 1]);

        for n in 0..64 {
            let slots = PictureSlots::for_submission(n, 4, 6);
            assert_eq!(slots, PictureSlots::for_submission(n + 12, 4, 6));
            assert_eq!(slots.request, slots.input_slot + 1);
            assert_eq!(slots.output_slot, (n % 6) as u32);
        }
    }

    #[test]
    fn status_transitions() {
        let mut surface = Surface::new(Resolution::from((64, 64)));
        assert_eq!(surface.status(), SurfaceStatus::Ready);
        assert_eq!(surface.complete(), None);

        surface.begin(
            0x0200_0000,
            PictureSlots {
                input_slot: 1,
                output_slot: 5,
                request: 2,
            },
        );
        assert_eq!(surface.status(), SurfaceStatus::Rendering);
        assert_eq!((surface.input_slot(), surface.output_slot()), (1, 5));
        assert_eq!(surface.request(), 2);

        let in_flight = surface.complete().unwrap();
        assert_eq!(in_flight.context, 0x0200_0000);
        assert!(!in_flight.queued);
        assert_eq!(surface.status(), SurfaceStatus::Ready);
        assert_eq!(SurfaceStatus::n(4), Some(SurfaceStatus::Ready));
    }
}
