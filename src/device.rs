// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The memory-to-memory codec device the driver submits work to.
//!
//! The device exposes two queues: the OUTPUT queue receives coded pictures from the driver, and
//! the CAPTURE queue returns decoded frames to it. Each coded picture is accompanied by a frame
//! header control, correlated with its OUTPUT buffer through a request token.

pub mod controls;
#[cfg(test)]
pub(crate) mod dummy;
#[cfg(feature = "v4l2")]
pub mod v4l2;

use std::ops::Range;
use std::path::PathBuf;

use thiserror::Error;

use crate::Fourcc;
use crate::Resolution;

/// Pixel format of the decoded frames: NV12 with luma and chroma in separate buffers.
pub const CAPTURE_PIXEL_FORMAT: &[u8; 4] = b"NM12";
/// Number of planes of [`CAPTURE_PIXEL_FORMAT`].
pub const CAPTURE_NUM_PLANES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueDirection {
    /// Coded pictures, from the driver to the device.
    Output,
    /// Decoded frames, from the device to the driver.
    Capture,
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("failed to open {0}: {1}")]
    Open(PathBuf, String),
    #[error("device does not support {0}")]
    Unsupported(&'static str),
    #[error("{0} failed: {1}")]
    Ioctl(&'static str, nix::Error),
    #[error("failed to map plane {plane} of {direction:?} buffer {index}: {source}")]
    Mmap {
        direction: QueueDirection,
        index: u32,
        plane: usize,
        source: nix::Error,
    },
    #[error("device allocated no {0:?} buffers")]
    NoBuffers(QueueDirection),
    #[error("{direction:?} buffer {index} does not exist")]
    InvalidBuffer {
        direction: QueueDirection,
        index: u32,
    },
}

pub type DeviceResult<T> = Result<T, DeviceError>;

/// Operations of a memory-to-memory decoder device.
///
/// Buffers are referred to by the index the device assigned to them when they were created.
pub trait DecodeDevice {
    /// CPU mapping of one plane of a device buffer. The mapping stays valid for as long as the
    /// value is alive.
    type Mapping: AsRef<[u8]> + AsMut<[u8]>;

    /// Sets the coded format accepted by the OUTPUT queue. Every OUTPUT buffer created afterwards
    /// can hold up to `max_coded_size` bytes.
    fn set_output_format(
        &mut self,
        format: Fourcc,
        coded_size: Resolution,
        max_coded_size: u32,
    ) -> DeviceResult<()>;

    /// Sets the format of the frames produced on the CAPTURE queue.
    fn set_capture_format(
        &mut self,
        format: Fourcc,
        size: Resolution,
        num_planes: usize,
    ) -> DeviceResult<()>;

    /// Creates up to `count` buffers on the queue of `direction` using its current format, and
    /// returns the range of indices of the created buffers. The device may create fewer buffers
    /// than requested.
    fn create_buffers(&mut self, direction: QueueDirection, count: u32)
        -> DeviceResult<Range<u32>>;

    /// Maps `plane` of the buffer at `index` into the address space of the process.
    fn map_plane(
        &mut self,
        direction: QueueDirection,
        index: u32,
        plane: usize,
    ) -> DeviceResult<Self::Mapping>;

    /// Hands the buffer at `index` to the device. `bytes_used` is the size of the payload of the
    /// first plane, and `request` correlates an OUTPUT buffer with the controls set for it.
    fn queue_buffer(
        &mut self,
        direction: QueueDirection,
        index: u32,
        bytes_used: u32,
        request: Option<u32>,
    ) -> DeviceResult<()>;

    /// Takes back the oldest buffer the device is done with and returns its index.
    fn dequeue_buffer(&mut self, direction: QueueDirection) -> DeviceResult<u32>;

    /// Sets the extended control `id` to `payload` for the work tagged with `request`.
    fn set_ext_control(&mut self, request: u32, id: u32, payload: &mut [u8]) -> DeviceResult<()>;

    fn stream_on(&mut self, direction: QueueDirection) -> DeviceResult<()>;

    fn stream_off(&mut self, direction: QueueDirection) -> DeviceResult<()>;

    /// Blocks until the device has a buffer ready to be dequeued.
    fn wait_ready(&mut self) -> DeviceResult<()>;
}

/// Streaming state of both queues of a device.
///
/// Starting a queue that is already streaming is a no-op, so callers can request streaming
/// after every submitted picture.
#[derive(Debug, Default)]
pub struct StreamState {
    output: bool,
    capture: bool,
}

impl StreamState {
    fn flag(&mut self, direction: QueueDirection) -> &mut bool {
        match direction {
            QueueDirection::Output => &mut self.output,
            QueueDirection::Capture => &mut self.capture,
        }
    }

    pub fn is_streaming(&self, direction: QueueDirection) -> bool {
        match direction {
            QueueDirection::Output => self.output,
            QueueDirection::Capture => self.capture,
        }
    }

    /// Starts streaming on `direction` unless it is already streaming.
    pub fn stream_on<D: DecodeDevice>(
        &mut self,
        device: &mut D,
        direction: QueueDirection,
    ) -> DeviceResult<()> {
        let streaming = self.flag(direction);
        if *streaming {
            return Ok(());
        }

        device.stream_on(direction)?;
        *streaming = true;
        log::debug!("{:?} queue: streaming", direction);

        Ok(())
    }

    /// Stops streaming on `direction` if it was streaming.
    pub fn stream_off<D: DecodeDevice>(
        &mut self,
        device: &mut D,
        direction: QueueDirection,
    ) -> DeviceResult<()> {
        let streaming = self.flag(direction);
        if !*streaming {
            return Ok(());
        }

        *streaming = false;
        device.stream_off(direction)?;
        log::debug!("{:?} queue: stopped", direction);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::dummy::DeviceEvent;
    use super::dummy::DummyDevice;
    use super::*;

    #[test]
    fn stream_on_once_per_direction() {
        let mut device = DummyDevice::new();
        let log = device.event_log();
        let mut state = StreamState::default();

        for _ in 0..3 {
            state.stream_on(&mut device, QueueDirection::Output).unwrap();
            state.stream_on(&mut device, QueueDirection::Capture).unwrap();
        }
        assert!(state.is_streaming(QueueDirection::Output));
        assert_eq!(
            log.take(),
            vec![
                DeviceEvent::StreamOn(QueueDirection::Output),
                DeviceEvent::StreamOn(QueueDirection::Capture),
            ]
        );

        state.stream_off(&mut device, QueueDirection::Capture).unwrap();
        state.stream_off(&mut device, QueueDirection::Capture).unwrap();
        assert_eq!(
            log.take(),
            vec![DeviceEvent::StreamOff(QueueDirection::Capture)]
        );
        assert!(!state.is_streaming(QueueDirection::Capture));
    }
}
