// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! [`DecodeDevice`] implementation for the sunxi-cedrus V4L2 driver.
//!
//! The cedrus driver predates the upstream request API: OUTPUT buffers and extended controls are
//! correlated through a `request` token stored in fields that are reserved upstream. The
//! structures below mirror that variant of the uAPI, so the corresponding ioctls are issued
//! directly instead of through `v4l2r`.

use std::ffi::c_void;
use std::num::NonZeroUsize;
use std::ops::Range;
use std::os::fd::AsRawFd;
use std::os::fd::BorrowedFd;
use std::path::Path;
use std::ptr::NonNull;

use nix::errno::Errno;
use nix::ioctl_readwrite;
use nix::ioctl_write_ptr;
use nix::poll::poll;
use nix::poll::PollFd;
use nix::poll::PollFlags;
use nix::poll::PollTimeout;
use nix::sys::mman::mmap;
use nix::sys::mman::munmap;
use nix::sys::mman::MapFlags;
use nix::sys::mman::ProtFlags;
use v4l2r::device::Device as VideoDevice;
use v4l2r::device::DeviceConfig;
use v4l2r::ioctl::Capabilities;

use crate::device::DecodeDevice;
use crate::device::DeviceError;
use crate::device::DeviceResult;
use crate::device::QueueDirection;
use crate::Fourcc;
use crate::Resolution;

const V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE: u32 = 9;
const V4L2_BUF_TYPE_VIDEO_OUTPUT_MPLANE: u32 = 10;
const V4L2_MEMORY_MMAP: u32 = 1;
const V4L2_FIELD_ANY: u32 = 0;
const V4L2_CTRL_CLASS_MPEG: u32 = 0x0099_0000;
const VIDEO_MAX_PLANES: usize = 8;

#[allow(non_camel_case_types)]
#[repr(C, packed)]
#[derive(Clone, Copy)]
struct v4l2_plane_pix_format {
    sizeimage: u32,
    bytesperline: u32,
    reserved: [u16; 6],
}

#[allow(non_camel_case_types)]
#[repr(C, packed)]
#[derive(Clone, Copy)]
struct v4l2_pix_format_mplane {
    width: u32,
    height: u32,
    pixelformat: u32,
    field: u32,
    colorspace: u32,
    plane_fmt: [v4l2_plane_pix_format; VIDEO_MAX_PLANES],
    num_planes: u8,
    flags: u8,
    ycbcr_enc: u8,
    quantization: u8,
    xfer_func: u8,
    reserved: [u8; 7],
}

#[allow(non_camel_case_types)]
#[repr(C)]
#[derive(Clone, Copy)]
union v4l2_format_fmt {
    pix_mp: v4l2_pix_format_mplane,
    raw_data: [u8; 200],
    // Some members of the kernel union hold pointers.
    _align: [u64; 25],
}

#[allow(non_camel_case_types)]
#[repr(C)]
#[derive(Clone, Copy)]
struct v4l2_format {
    type_: u32,
    fmt: v4l2_format_fmt,
}

#[allow(non_camel_case_types)]
#[repr(C)]
struct v4l2_create_buffers {
    index: u32,
    count: u32,
    memory: u32,
    format: v4l2_format,
    capabilities: u32,
    flags: u32,
    reserved: [u32; 6],
}

#[allow(non_camel_case_types)]
#[repr(C)]
#[derive(Clone, Copy)]
union v4l2_plane_m {
    mem_offset: u32,
    userptr: std::ffi::c_ulong,
    fd: i32,
}

#[allow(non_camel_case_types)]
#[repr(C)]
#[derive(Clone, Copy)]
struct v4l2_plane {
    bytesused: u32,
    length: u32,
    m: v4l2_plane_m,
    data_offset: u32,
    reserved: [u32; 11],
}

#[allow(non_camel_case_types)]
#[repr(C)]
struct v4l2_timecode {
    type_: u32,
    flags: u32,
    frames: u8,
    seconds: u8,
    minutes: u8,
    hours: u8,
    userbits: [u8; 4],
}

#[allow(non_camel_case_types)]
#[repr(C)]
struct v4l2_buffer {
    index: u32,
    type_: u32,
    bytesused: u32,
    flags: u32,
    field: u32,
    timestamp: nix::libc::timeval,
    timecode: v4l2_timecode,
    sequence: u32,
    memory: u32,
    /// `m.planes` for multiplanar buffers.
    planes: *mut v4l2_plane,
    length: u32,
    /// Request token of the cedrus uAPI, `reserved2` upstream.
    request: u32,
    reserved: u32,
}

#[allow(non_camel_case_types)]
#[repr(C, packed)]
struct v4l2_ext_control {
    id: u32,
    size: u32,
    reserved2: [u32; 1],
    ptr: *mut c_void,
}

#[allow(non_camel_case_types)]
#[repr(C)]
struct v4l2_ext_controls {
    ctrl_class: u32,
    count: u32,
    error_idx: u32,
    /// Request token of the cedrus uAPI, `request_fd` upstream.
    request: u32,
    reserved: [u32; 1],
    controls: *mut v4l2_ext_control,
}

ioctl_readwrite!(vidioc_g_fmt, b'V', 4, v4l2_format);
ioctl_readwrite!(vidioc_s_fmt, b'V', 5, v4l2_format);
ioctl_readwrite!(vidioc_querybuf, b'V', 9, v4l2_buffer);
ioctl_readwrite!(vidioc_qbuf, b'V', 15, v4l2_buffer);
ioctl_readwrite!(vidioc_dqbuf, b'V', 17, v4l2_buffer);
ioctl_write_ptr!(vidioc_streamon, b'V', 18, u32);
ioctl_write_ptr!(vidioc_streamoff, b'V', 19, u32);
ioctl_readwrite!(vidioc_s_ext_ctrls, b'V', 72, v4l2_ext_controls);
ioctl_readwrite!(vidioc_create_bufs, b'V', 92, v4l2_create_buffers);

/// Returns a zero-initialized uAPI structure.
fn zeroed<T>() -> T {
    // SAFETY: only used for the C structures of this module, which consist of integers, arrays
    // of integers and raw pointers, for which all-zeroes is a valid bit pattern.
    unsafe { std::mem::zeroed() }
}

fn buf_type(direction: QueueDirection) -> u32 {
    match direction {
        QueueDirection::Output => V4L2_BUF_TYPE_VIDEO_OUTPUT_MPLANE,
        QueueDirection::Capture => V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE,
    }
}

/// A plane of a device buffer mapped into the process. The mapping is released on drop.
pub struct MmapPlane {
    addr: NonNull<c_void>,
    len: usize,
}

impl AsRef<[u8]> for MmapPlane {
    fn as_ref(&self) -> &[u8] {
        // SAFETY: `addr` points to a live mapping of `len` bytes, which is only unmapped when
        // `self` is dropped.
        unsafe { std::slice::from_raw_parts(self.addr.as_ptr() as *const u8, self.len) }
    }
}

impl AsMut<[u8]> for MmapPlane {
    fn as_mut(&mut self) -> &mut [u8] {
        // SAFETY: `addr` points to a live, writable mapping of `len` bytes, which is only
        // unmapped when `self` is dropped. The exclusive borrow of `self` prevents aliasing
        // from this process.
        unsafe { std::slice::from_raw_parts_mut(self.addr.as_ptr() as *mut u8, self.len) }
    }
}

impl Drop for MmapPlane {
    fn drop(&mut self) {
        // SAFETY: the mapping was created by `mmap` with this address and length and is not
        // referenced anymore.
        if let Err(e) = unsafe { munmap(self.addr, self.len) } {
            log::error!("failed to unmap device buffer: {}", e);
        }
    }
}

/// A cedrus memory-to-memory decoder node.
pub struct V4l2Device {
    device: VideoDevice,
    output_num_planes: usize,
    capture_num_planes: usize,
}

impl V4l2Device {
    /// Opens the video node at `path` and checks that it is a multiplanar memory-to-memory
    /// device.
    pub fn open(path: &Path) -> DeviceResult<Self> {
        let config = DeviceConfig::new().non_blocking_dqbuf();
        let device = VideoDevice::open(path, config)
            .map_err(|e| DeviceError::Open(path.to_path_buf(), format!("{:?}", e)))?;

        let caps = device.caps();
        if !caps
            .capabilities
            .contains(Capabilities::VIDEO_M2M_MPLANE)
        {
            return Err(DeviceError::Unsupported("multiplanar memory-to-memory queues"));
        }
        log::info!(
            "using {} ({}) at {}",
            caps.driver,
            caps.bus_info,
            path.display()
        );

        Ok(Self {
            device,
            output_num_planes: 1,
            capture_num_planes: 1,
        })
    }

    fn num_planes(&self, direction: QueueDirection) -> usize {
        match direction {
            QueueDirection::Output => self.output_num_planes,
            QueueDirection::Capture => self.capture_num_planes,
        }
    }

    fn set_format(
        &mut self,
        direction: QueueDirection,
        format: Fourcc,
        size: Resolution,
        plane_sizes: &[u32],
    ) -> DeviceResult<()> {
        let mut pix_mp: v4l2_pix_format_mplane = zeroed();
        pix_mp.width = size.width;
        pix_mp.height = size.height;
        pix_mp.pixelformat = u32::from(format);
        pix_mp.field = V4L2_FIELD_ANY;
        pix_mp.num_planes = plane_sizes.len() as u8;
        for (plane_fmt, size) in pix_mp.plane_fmt.iter_mut().zip(plane_sizes) {
            plane_fmt.sizeimage = *size;
        }

        let mut fmt: v4l2_format = zeroed();
        fmt.type_ = buf_type(direction);
        fmt.fmt.pix_mp = pix_mp;

        // SAFETY: `fmt` is a valid `v4l2_format` that outlives the call.
        unsafe { vidioc_s_fmt(self.device.as_raw_fd(), &mut fmt) }
            .map_err(|e| DeviceError::Ioctl("VIDIOC_S_FMT", e))?;
        log::debug!(
            "{:?} format: {:?} {}x{}",
            direction,
            format,
            size.width,
            size.height
        );

        Ok(())
    }

    /// Fills `planes` with the description of the buffer at `index`.
    fn query_buffer(
        &self,
        direction: QueueDirection,
        index: u32,
        planes: &mut [v4l2_plane; VIDEO_MAX_PLANES],
    ) -> DeviceResult<()> {
        let mut buf: v4l2_buffer = zeroed();
        buf.index = index;
        buf.type_ = buf_type(direction);
        buf.memory = V4L2_MEMORY_MMAP;
        buf.length = self.num_planes(direction) as u32;
        buf.planes = planes.as_mut_ptr();

        // SAFETY: `buf` points to `planes`, which has room for `VIDEO_MAX_PLANES` planes, and
        // both outlive the call.
        unsafe { vidioc_querybuf(self.device.as_raw_fd(), &mut buf) }
            .map_err(|e| DeviceError::Ioctl("VIDIOC_QUERYBUF", e))?;

        Ok(())
    }
}

impl DecodeDevice for V4l2Device {
    type Mapping = MmapPlane;

    fn set_output_format(
        &mut self,
        format: Fourcc,
        coded_size: Resolution,
        max_coded_size: u32,
    ) -> DeviceResult<()> {
        self.set_format(
            QueueDirection::Output,
            format,
            coded_size,
            &[max_coded_size],
        )?;
        self.output_num_planes = 1;
        Ok(())
    }

    fn set_capture_format(
        &mut self,
        format: Fourcc,
        size: Resolution,
        num_planes: usize,
    ) -> DeviceResult<()> {
        let num_planes = num_planes.clamp(1, VIDEO_MAX_PLANES);
        self.set_format(
            QueueDirection::Capture,
            format,
            size,
            &[0; VIDEO_MAX_PLANES][..num_planes],
        )?;
        self.capture_num_planes = num_planes;
        Ok(())
    }

    fn create_buffers(
        &mut self,
        direction: QueueDirection,
        count: u32,
    ) -> DeviceResult<Range<u32>> {
        let mut create_bufs: v4l2_create_buffers = zeroed();
        create_bufs.count = count;
        create_bufs.memory = V4L2_MEMORY_MMAP;
        create_bufs.format.type_ = buf_type(direction);

        let fd = self.device.as_raw_fd();
        // SAFETY: `create_bufs.format` is a valid `v4l2_format` that outlives the call.
        unsafe { vidioc_g_fmt(fd, &mut create_bufs.format) }
            .map_err(|e| DeviceError::Ioctl("VIDIOC_G_FMT", e))?;
        // SAFETY: `create_bufs` is a valid `v4l2_create_buffers` that outlives the call.
        unsafe { vidioc_create_bufs(fd, &mut create_bufs) }
            .map_err(|e| DeviceError::Ioctl("VIDIOC_CREATE_BUFS", e))?;

        log::debug!(
            "created {} {:?} buffers from index {}",
            create_bufs.count,
            direction,
            create_bufs.index
        );
        Ok(create_bufs.index..create_bufs.index + create_bufs.count)
    }

    fn map_plane(
        &mut self,
        direction: QueueDirection,
        index: u32,
        plane: usize,
    ) -> DeviceResult<Self::Mapping> {
        if plane >= self.num_planes(direction) {
            return Err(DeviceError::InvalidBuffer { direction, index });
        }

        let mut planes: [v4l2_plane; VIDEO_MAX_PLANES] = zeroed();
        self.query_buffer(direction, index, &mut planes)?;

        let length = planes[plane].length as usize;
        // SAFETY: QUERYBUF on a MMAP buffer fills the `mem_offset` member of the union.
        let offset = unsafe { planes[plane].m.mem_offset };
        let len = NonZeroUsize::new(length).ok_or(DeviceError::InvalidBuffer { direction, index })?;

        // SAFETY: the file descriptor is owned by `self.device`, which is alive for the
        // duration of the call.
        let fd = unsafe { BorrowedFd::borrow_raw(self.device.as_raw_fd()) };
        // SAFETY: a new shared mapping is created at an address chosen by the kernel, so no
        // existing memory is affected.
        let addr = unsafe {
            mmap(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                fd,
                offset as nix::libc::off_t,
            )
        }
        .map_err(|source| DeviceError::Mmap {
            direction,
            index,
            plane,
            source,
        })?;

        Ok(MmapPlane { addr, len: length })
    }

    fn queue_buffer(
        &mut self,
        direction: QueueDirection,
        index: u32,
        bytes_used: u32,
        request: Option<u32>,
    ) -> DeviceResult<()> {
        let mut planes: [v4l2_plane; VIDEO_MAX_PLANES] = zeroed();
        planes[0].bytesused = bytes_used;

        let mut buf: v4l2_buffer = zeroed();
        buf.index = index;
        buf.type_ = buf_type(direction);
        buf.memory = V4L2_MEMORY_MMAP;
        buf.length = self.num_planes(direction) as u32;
        buf.planes = planes.as_mut_ptr();
        buf.request = request.unwrap_or(0);

        // SAFETY: `buf` points to `planes`, and both outlive the call.
        unsafe { vidioc_qbuf(self.device.as_raw_fd(), &mut buf) }
            .map_err(|e| DeviceError::Ioctl("VIDIOC_QBUF", e))?;

        Ok(())
    }

    fn dequeue_buffer(&mut self, direction: QueueDirection) -> DeviceResult<u32> {
        let mut planes: [v4l2_plane; VIDEO_MAX_PLANES] = zeroed();

        let mut buf: v4l2_buffer = zeroed();
        buf.type_ = buf_type(direction);
        buf.memory = V4L2_MEMORY_MMAP;
        buf.length = self.num_planes(direction) as u32;
        buf.planes = planes.as_mut_ptr();

        // SAFETY: `buf` points to `planes`, and both outlive the call.
        unsafe { vidioc_dqbuf(self.device.as_raw_fd(), &mut buf) }
            .map_err(|e| DeviceError::Ioctl("VIDIOC_DQBUF", e))?;

        Ok(buf.index)
    }

    fn set_ext_control(&mut self, request: u32, id: u32, payload: &mut [u8]) -> DeviceResult<()> {
        let mut control = v4l2_ext_control {
            id,
            size: payload.len() as u32,
            reserved2: [0],
            ptr: payload.as_mut_ptr() as *mut c_void,
        };
        let mut controls = v4l2_ext_controls {
            ctrl_class: V4L2_CTRL_CLASS_MPEG,
            count: 1,
            error_idx: 0,
            request,
            reserved: [0],
            controls: &mut control,
        };

        // SAFETY: `controls` points to `control`, which points to `payload`. All of them
        // outlive the call.
        unsafe { vidioc_s_ext_ctrls(self.device.as_raw_fd(), &mut controls) }
            .map_err(|e| DeviceError::Ioctl("VIDIOC_S_EXT_CTRLS", e))?;

        Ok(())
    }

    fn stream_on(&mut self, direction: QueueDirection) -> DeviceResult<()> {
        let type_ = buf_type(direction);
        // SAFETY: `type_` outlives the call.
        unsafe { vidioc_streamon(self.device.as_raw_fd(), &type_) }
            .map_err(|e| DeviceError::Ioctl("VIDIOC_STREAMON", e))?;
        Ok(())
    }

    fn stream_off(&mut self, direction: QueueDirection) -> DeviceResult<()> {
        let type_ = buf_type(direction);
        // SAFETY: `type_` outlives the call.
        unsafe { vidioc_streamoff(self.device.as_raw_fd(), &type_) }
            .map_err(|e| DeviceError::Ioctl("VIDIOC_STREAMOFF", e))?;
        Ok(())
    }

    fn wait_ready(&mut self) -> DeviceResult<()> {
        // SAFETY: the file descriptor is owned by `self.device`, which outlives `fds`.
        let fd = unsafe { BorrowedFd::borrow_raw(self.device.as_raw_fd()) };
        let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];

        loop {
            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => return Ok(()),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(DeviceError::Ioctl("poll", e)),
            }
        }
    }
}

#[cfg(all(test, target_pointer_width = "64"))]
mod tests {
    use std::mem::size_of;

    use super::*;

    #[test]
    fn uapi_layouts() {
        assert_eq!(size_of::<v4l2_pix_format_mplane>(), 192);
        assert_eq!(size_of::<v4l2_format>(), 208);
        assert_eq!(size_of::<v4l2_create_buffers>(), 256);
        assert_eq!(size_of::<v4l2_plane>(), 64);
        assert_eq!(size_of::<v4l2_buffer>(), 88);
        assert_eq!(size_of::<v4l2_ext_control>(), 20);
        assert_eq!(size_of::<v4l2_ext_controls>(), 32);
    }
}
