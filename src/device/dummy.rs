// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A device that performs no decoding and only records what is asked of it, so the driver can
//! be tested in isolation.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::ops::Range;
use std::rc::Rc;

use nix::errno::Errno;

use crate::align_up;
use crate::device::DecodeDevice;
use crate::device::DeviceError;
use crate::device::DeviceResult;
use crate::device::QueueDirection;
use crate::Fourcc;
use crate::Resolution;

/// A side effect requested from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    SetOutputFormat {
        format: Fourcc,
        coded_size: Resolution,
        max_coded_size: u32,
    },
    SetCaptureFormat {
        format: Fourcc,
        size: Resolution,
    },
    CreateBuffers {
        direction: QueueDirection,
        indices: Range<u32>,
    },
    Queue {
        direction: QueueDirection,
        index: u32,
        bytes_used: u32,
        request: Option<u32>,
    },
    Dequeue {
        direction: QueueDirection,
        index: u32,
    },
    ExtControl {
        request: u32,
        id: u32,
        payload: Vec<u8>,
    },
    StreamOn(QueueDirection),
    StreamOff(QueueDirection),
    WaitReady,
}

/// Shared view on the events recorded by a [`DummyDevice`], usable after the device has been
/// moved into a driver.
#[derive(Clone, Default)]
pub struct EventLog(Rc<RefCell<Vec<DeviceEvent>>>);

impl EventLog {
    fn push(&self, event: DeviceEvent) {
        self.0.borrow_mut().push(event);
    }

    /// Returns the events recorded so far and clears the log.
    pub fn take(&self) -> Vec<DeviceEvent> {
        self.0.take()
    }

    pub fn events(&self) -> Vec<DeviceEvent> {
        self.0.borrow().clone()
    }
}

#[derive(Default)]
struct DummyQueue {
    num_buffers: u32,
    plane_sizes: Vec<usize>,
    queued: VecDeque<u32>,
}

pub struct DummyDevice {
    log: EventLog,
    output: DummyQueue,
    capture: DummyQueue,
    /// Upper bound on the number of CAPTURE buffers created by a single call.
    max_capture_buffers: Option<u32>,
    /// Buffer whose mapping fails, to exercise error paths.
    failing_mapping: Option<(QueueDirection, u32)>,
    /// Queue on which dequeuing fails.
    failing_dequeue: Option<QueueDirection>,
}

impl DummyDevice {
    pub fn new() -> Self {
        Self {
            log: Default::default(),
            output: Default::default(),
            capture: Default::default(),
            max_capture_buffers: None,
            failing_mapping: None,
            failing_dequeue: None,
        }
    }

    pub fn event_log(&self) -> EventLog {
        self.log.clone()
    }

    pub fn with_max_capture_buffers(mut self, max: u32) -> Self {
        self.max_capture_buffers = Some(max);
        self
    }

    pub fn with_failing_mapping(mut self, direction: QueueDirection, index: u32) -> Self {
        self.failing_mapping = Some((direction, index));
        self
    }

    /// Makes every later dequeue from `direction` fail.
    pub fn fail_dequeue(&mut self, direction: QueueDirection) {
        self.failing_dequeue = Some(direction);
    }

    fn queue_mut(&mut self, direction: QueueDirection) -> &mut DummyQueue {
        match direction {
            QueueDirection::Output => &mut self.output,
            QueueDirection::Capture => &mut self.capture,
        }
    }
}

impl DecodeDevice for DummyDevice {
    type Mapping = Vec<u8>;

    fn set_output_format(
        &mut self,
        format: Fourcc,
        coded_size: Resolution,
        max_coded_size: u32,
    ) -> DeviceResult<()> {
        self.output.plane_sizes = vec![max_coded_size as usize];
        self.log.push(DeviceEvent::SetOutputFormat {
            format,
            coded_size,
            max_coded_size,
        });
        Ok(())
    }

    fn set_capture_format(
        &mut self,
        format: Fourcc,
        size: Resolution,
        num_planes: usize,
    ) -> DeviceResult<()> {
        // Frames are stored as 32x32 tiles.
        let luma =
            align_up(size.width as usize, 32) * align_up(size.height as usize, 32);
        self.capture.plane_sizes = [luma, luma / 2].into_iter().take(num_planes).collect();
        self.log.push(DeviceEvent::SetCaptureFormat { format, size });
        Ok(())
    }

    fn create_buffers(
        &mut self,
        direction: QueueDirection,
        count: u32,
    ) -> DeviceResult<Range<u32>> {
        let count = match (direction, self.max_capture_buffers) {
            (QueueDirection::Capture, Some(max)) => count.min(max),
            _ => count,
        };
        let queue = self.queue_mut(direction);
        let indices = queue.num_buffers..queue.num_buffers + count;
        queue.num_buffers += count;

        self.log.push(DeviceEvent::CreateBuffers {
            direction,
            indices: indices.clone(),
        });
        Ok(indices)
    }

    fn map_plane(
        &mut self,
        direction: QueueDirection,
        index: u32,
        plane: usize,
    ) -> DeviceResult<Self::Mapping> {
        if self.failing_mapping == Some((direction, index)) {
            return Err(DeviceError::Mmap {
                direction,
                index,
                plane,
                source: Errno::ENOMEM,
            });
        }

        let queue = self.queue_mut(direction);
        match queue.plane_sizes.get(plane) {
            Some(size) if index < queue.num_buffers => Ok(vec![0u8; *size]),
            _ => Err(DeviceError::InvalidBuffer { direction, index }),
        }
    }

    fn queue_buffer(
        &mut self,
        direction: QueueDirection,
        index: u32,
        bytes_used: u32,
        request: Option<u32>,
    ) -> DeviceResult<()> {
        let queue = self.queue_mut(direction);
        if index >= queue.num_buffers || queue.queued.contains(&index) {
            return Err(DeviceError::Ioctl("VIDIOC_QBUF", Errno::EINVAL));
        }
        queue.queued.push_back(index);

        self.log.push(DeviceEvent::Queue {
            direction,
            index,
            bytes_used,
            request,
        });
        Ok(())
    }

    fn dequeue_buffer(&mut self, direction: QueueDirection) -> DeviceResult<u32> {
        if self.failing_dequeue == Some(direction) {
            return Err(DeviceError::Ioctl("VIDIOC_DQBUF", Errno::EIO));
        }

        let index = self
            .queue_mut(direction)
            .queued
            .pop_front()
            .ok_or(DeviceError::Ioctl("VIDIOC_DQBUF", Errno::EAGAIN))?;

        self.log.push(DeviceEvent::Dequeue { direction, index });
        Ok(index)
    }

    fn set_ext_control(&mut self, request: u32, id: u32, payload: &mut [u8]) -> DeviceResult<()> {
        self.log.push(DeviceEvent::ExtControl {
            request,
            id,
            payload: payload.to_vec(),
        });
        Ok(())
    }

    fn stream_on(&mut self, direction: QueueDirection) -> DeviceResult<()> {
        self.log.push(DeviceEvent::StreamOn(direction));
        Ok(())
    }

    fn stream_off(&mut self, direction: QueueDirection) -> DeviceResult<()> {
        self.queue_mut(direction).queued.clear();
        self.log.push(DeviceEvent::StreamOff(direction));
        Ok(())
    }

    fn wait_ready(&mut self) -> DeviceResult<()> {
        self.log.push(DeviceEvent::WaitReady);
        Ok(())
    }
}
