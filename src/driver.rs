// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The decode session exposed to clients.
//!
//! A [`Driver`] owns the device and every object created through it. Objects are referred to by
//! the ids handed out by their [`ObjectHeap`], and each picture goes through the following
//! sequence:
//!
//! 1. [`Driver::begin_picture`] assigns the device slots of the picture to its target surface,
//! 2. [`Driver::render_picture`] translates the parameter buffers of the picture and submits
//!    its slice data,
//! 3. [`Driver::end_picture`] makes sure both queues are streaming,
//! 4. [`Driver::sync_surface`] waits for the decoded frame and recycles the device buffers.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::buffer::Buffer;
use crate::buffer::BufferStorage;
use crate::buffer::BufferType;
use crate::codec::ParseError;
use crate::config;
use crate::config::Config;
use crate::config::ConfigAttrib;
use crate::config::DriverConfig;
use crate::config::Entrypoint;
use crate::config::Profile;
use crate::config::RT_FORMAT_YUV420;
use crate::context::Context;
use crate::context::InputRing;
use crate::device::DecodeDevice;
use crate::device::DeviceError;
use crate::device::DeviceResult;
use crate::device::QueueDirection;
use crate::device::StreamState;
use crate::device::CAPTURE_NUM_PLANES;
use crate::device::CAPTURE_PIXEL_FORMAT;
use crate::image::Image;
use crate::image::ImageFormat;
use crate::image::Mb32TiledConverter;
use crate::image::PlaneConverter;
use crate::image::Rect;
use crate::object_heap::HeapError;
use crate::object_heap::ObjectHeap;
use crate::object_heap::ObjectId;
use crate::object_heap::BUFFER_ID_OFFSET;
use crate::object_heap::CONFIG_ID_OFFSET;
use crate::object_heap::CONTEXT_ID_OFFSET;
use crate::object_heap::IMAGE_ID_OFFSET;
use crate::object_heap::INVALID_ID;
use crate::object_heap::SURFACE_ID_OFFSET;
use crate::picture::FrameHeaderBuilder;
use crate::surface::CapturePlanes;
use crate::surface::PictureSlots;
use crate::surface::Surface;
use crate::surface::SurfaceStatus;
use crate::Fourcc;
use crate::Resolution;

/// Vendor string reported to clients.
pub const VENDOR: &str = "Sunxi Cedrus VA driver";

pub const MAX_PROFILES: usize = 8;
pub const MAX_ENTRYPOINTS: usize = 5;
pub const MAX_IMAGE_FORMATS: usize = 1;
pub const MAX_SUBPIC_FORMATS: usize = 4;
pub const MAX_DISPLAY_ATTRIBUTES: usize = 4;

/// VA status codes returned by [`DriverError::va_status`].
pub mod va_status {
    pub const SUCCESS: u32 = 0x0000_0000;
    pub const OPERATION_FAILED: u32 = 0x0000_0001;
    pub const ALLOCATION_FAILED: u32 = 0x0000_0002;
    pub const INVALID_CONFIG: u32 = 0x0000_0004;
    pub const INVALID_CONTEXT: u32 = 0x0000_0005;
    pub const INVALID_SURFACE: u32 = 0x0000_0006;
    pub const INVALID_BUFFER: u32 = 0x0000_0007;
    pub const INVALID_IMAGE: u32 = 0x0000_0008;
    pub const MAX_NUM_EXCEEDED: u32 = 0x0000_000b;
    pub const UNSUPPORTED_PROFILE: u32 = 0x0000_000c;
    pub const UNSUPPORTED_ENTRYPOINT: u32 = 0x0000_000d;
    pub const UNSUPPORTED_RT_FORMAT: u32 = 0x0000_000e;
    pub const UNSUPPORTED_BUFFERTYPE: u32 = 0x0000_000f;
    pub const SURFACE_BUSY: u32 = 0x0000_0010;
    pub const INVALID_PARAMETER: u32 = 0x0000_0012;
    pub const UNIMPLEMENTED: u32 = 0x0000_0014;
    pub const UNKNOWN: u32 = 0xffff_ffff;
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("object not found")]
    NotFound,
    #[error("unsupported profile")]
    UnsupportedProfile,
    #[error("unsupported entrypoint")]
    UnsupportedEntrypoint,
    #[error("unsupported render target format")]
    UnsupportedFormat,
    #[error("unsupported buffer type")]
    UnsupportedBufferType,
    #[error("allocation failed")]
    AllocationFailed,
    #[error("too many config attributes")]
    MaxAttributesExceeded,
    #[error("invalid config")]
    InvalidConfig,
    #[error("invalid context")]
    InvalidContext,
    #[error("invalid surface")]
    InvalidSurface,
    #[error("invalid buffer")]
    InvalidBuffer,
    #[error("invalid image")]
    InvalidImage,
    #[error("invalid parameter")]
    InvalidParameter,
    #[error("surface is busy")]
    SurfaceBusy,
    #[error("operation not implemented")]
    Unimplemented,
    #[error("unknown error")]
    Unknown,
    #[error("malformed parameter buffer: {0}")]
    MalformedParameters(#[from] ParseError),
    #[error("device error: {0}")]
    DeviceIo(#[from] DeviceError),
}

impl From<HeapError> for DriverError {
    fn from(err: HeapError) -> Self {
        log::debug!("{}", err);
        DriverError::AllocationFailed
    }
}

impl DriverError {
    /// Returns the VA status code corresponding to this error.
    pub fn va_status(&self) -> u32 {
        match self {
            DriverError::NotFound => va_status::OPERATION_FAILED,
            DriverError::UnsupportedProfile => va_status::UNSUPPORTED_PROFILE,
            DriverError::UnsupportedEntrypoint => va_status::UNSUPPORTED_ENTRYPOINT,
            DriverError::UnsupportedFormat => va_status::UNSUPPORTED_RT_FORMAT,
            DriverError::UnsupportedBufferType => va_status::UNSUPPORTED_BUFFERTYPE,
            DriverError::AllocationFailed => va_status::ALLOCATION_FAILED,
            DriverError::MaxAttributesExceeded => va_status::MAX_NUM_EXCEEDED,
            DriverError::InvalidConfig => va_status::INVALID_CONFIG,
            DriverError::InvalidContext => va_status::INVALID_CONTEXT,
            DriverError::InvalidSurface => va_status::INVALID_SURFACE,
            DriverError::InvalidBuffer => va_status::INVALID_BUFFER,
            DriverError::InvalidImage => va_status::INVALID_IMAGE,
            DriverError::InvalidParameter | DriverError::MalformedParameters(_) => {
                va_status::INVALID_PARAMETER
            }
            DriverError::SurfaceBusy => va_status::SURFACE_BUSY,
            DriverError::Unimplemented => va_status::UNIMPLEMENTED,
            DriverError::Unknown | DriverError::DeviceIo(_) => va_status::UNKNOWN,
        }
    }
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Converts a status-returning call into the VA status code expected by the host.
pub fn to_va_status<T>(result: &DriverResult<T>) -> u32 {
    match result {
        Ok(_) => va_status::SUCCESS,
        Err(e) => e.va_status(),
    }
}

/// A decode session on a device.
pub struct Driver<D: DecodeDevice> {
    config: DriverConfig,
    device: D,
    streams: StreamState,
    configs: ObjectHeap<Config>,
    contexts: ObjectHeap<Context<D::Mapping>>,
    surfaces: ObjectHeap<Surface>,
    buffers: ObjectHeap<Buffer>,
    images: ObjectHeap<Image>,
    /// Mappings of the CAPTURE buffers, keyed by device index.
    capture_buffers: BTreeMap<u32, CapturePlanes<D::Mapping>>,
    converter: Box<dyn PlaneConverter>,
}

#[cfg(feature = "v4l2")]
impl Driver<crate::device::v4l2::V4l2Device> {
    /// Opens the device at the path given by `config` and starts a session on it.
    pub fn open(config: DriverConfig) -> DriverResult<Self> {
        let device = crate::device::v4l2::V4l2Device::open(&config.device_path)?;
        Ok(Self::new(device, config))
    }
}

impl<D: DecodeDevice> Driver<D> {
    pub fn new(device: D, config: DriverConfig) -> Self {
        Self {
            config,
            device,
            streams: Default::default(),
            configs: ObjectHeap::new(CONFIG_ID_OFFSET),
            contexts: ObjectHeap::new(CONTEXT_ID_OFFSET),
            surfaces: ObjectHeap::new(SURFACE_ID_OFFSET),
            buffers: ObjectHeap::new(BUFFER_ID_OFFSET),
            images: ObjectHeap::new(IMAGE_ID_OFFSET),
            capture_buffers: Default::default(),
            converter: Box::new(Mb32TiledConverter),
        }
    }

    pub fn driver_config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn vendor(&self) -> &'static str {
        VENDOR
    }

    /// Replaces the converter used to read back decoded frames in [`Driver::derive_image`].
    pub fn set_plane_converter(&mut self, converter: Box<dyn PlaneConverter>) {
        self.converter = converter;
    }

    pub fn query_config_profiles(&self) -> Vec<Profile> {
        config::supported_profiles().to_vec()
    }

    pub fn query_config_entrypoints(&self, profile: Profile) -> Vec<Entrypoint> {
        profile.entrypoints().to_vec()
    }

    pub fn get_config_attributes(
        &self,
        profile: Profile,
        entrypoint: Entrypoint,
        attribs: &mut [ConfigAttrib],
    ) -> DriverResult<()> {
        config::get_config_attributes(profile, entrypoint, attribs)
    }

    pub fn create_config(
        &mut self,
        profile: Profile,
        entrypoint: Entrypoint,
        attribs: &[ConfigAttrib],
    ) -> DriverResult<ObjectId> {
        let config = Config::new(profile, entrypoint, attribs)?;
        let id = self.configs.allocate(config)?;
        log::debug!("config {:#010x}: {:?}/{:?}", id, profile, entrypoint);

        Ok(id)
    }

    pub fn destroy_config(&mut self, config: ObjectId) -> DriverResult<()> {
        self.configs
            .free(config)
            .map(|_| ())
            .ok_or(DriverError::InvalidConfig)
    }

    pub fn query_config_attributes(
        &self,
        config: ObjectId,
    ) -> DriverResult<(Profile, Entrypoint, Vec<ConfigAttrib>)> {
        let config = self
            .configs
            .lookup(config)
            .ok_or(DriverError::InvalidConfig)?;

        Ok((
            config.profile(),
            config.entrypoint(),
            config.attribs().to_vec(),
        ))
    }

    /// Creates `count` surfaces of `width` x `height`, each backed by a CAPTURE buffer of the
    /// device, and queues their buffers so the device can decode into them.
    ///
    /// If a surface cannot be set up, the surfaces created by this call are released. The
    /// CAPTURE buffers already allocated on the device are kept until the session ends, and
    /// those already queued keep taking part in the rotation of decoded frames.
    pub fn create_surfaces(
        &mut self,
        width: u32,
        height: u32,
        format: u32,
        count: u32,
    ) -> DriverResult<Vec<ObjectId>> {
        if format != RT_FORMAT_YUV420 {
            return Err(DriverError::UnsupportedFormat);
        }
        if width == 0 || height == 0 {
            return Err(DriverError::InvalidParameter);
        }

        let resolution = Resolution::from((width, height));
        self.device.set_capture_format(
            Fourcc::from(CAPTURE_PIXEL_FORMAT),
            resolution,
            CAPTURE_NUM_PLANES,
        )?;
        let indices = self.device.create_buffers(QueueDirection::Capture, count)?;
        if indices.is_empty() {
            return Err(DeviceError::NoBuffers(QueueDirection::Capture).into());
        }

        let mut surfaces = Vec::with_capacity(indices.len());
        for index in indices {
            match self.provision_surface(resolution, index) {
                Ok(id) => surfaces.push((id, index)),
                Err(e) => {
                    for (id, _) in surfaces {
                        self.surfaces.free(id);
                    }
                    return Err(e);
                }
            }
        }

        log::debug!(
            "created {} surfaces of {}x{}",
            surfaces.len(),
            width,
            height
        );
        Ok(surfaces.into_iter().map(|(id, _)| id).collect())
    }

    fn provision_surface(&mut self, resolution: Resolution, index: u32) -> DriverResult<ObjectId> {
        let id = self.surfaces.allocate(Surface::new(resolution))?;

        let result = self.map_capture_buffer(index).and_then(|planes| {
            self.capture_buffers.insert(index, planes);
            self.device
                .queue_buffer(QueueDirection::Capture, index, 0, None)
        });
        if let Err(e) = result {
            self.surfaces.free(id);
            self.capture_buffers.remove(&index);
            return Err(e.into());
        }

        Ok(id)
    }

    fn map_capture_buffer(&mut self, index: u32) -> DeviceResult<CapturePlanes<D::Mapping>> {
        Ok(CapturePlanes {
            luma: self.device.map_plane(QueueDirection::Capture, index, 0)?,
            chroma: self.device.map_plane(QueueDirection::Capture, index, 1)?,
        })
    }

    /// Releases `surfaces`. Nothing is released if one of them does not exist.
    pub fn destroy_surfaces(&mut self, surfaces: &[ObjectId]) -> DriverResult<()> {
        if !surfaces.iter().all(|id| self.surfaces.contains(*id)) {
            return Err(DriverError::InvalidSurface);
        }

        for id in surfaces {
            self.surfaces.free(*id);
        }

        Ok(())
    }

    pub fn query_surface_status(&self, surface: ObjectId) -> DriverResult<SurfaceStatus> {
        self.surfaces
            .lookup(surface)
            .map(Surface::status)
            .ok_or(DriverError::InvalidSurface)
    }

    /// Creates a decode context for the codec of `config`, and allocates its ring of OUTPUT
    /// buffers on the device.
    pub fn create_context(
        &mut self,
        config: ObjectId,
        width: u32,
        height: u32,
        flags: u32,
        render_targets: &[ObjectId],
    ) -> DriverResult<ObjectId> {
        let codec = self
            .configs
            .lookup(config)
            .ok_or(DriverError::InvalidConfig)?
            .codec();
        if let Some(target) = render_targets
            .iter()
            .find(|id| !self.surfaces.contains(**id))
        {
            log::debug!("render target {:#010x} does not exist", target);
            return Err(DriverError::InvalidSurface);
        }

        let resolution = Resolution::from((width, height));
        self.device.set_output_format(
            codec.fourcc(),
            resolution,
            self.config.input_buffer_max_size,
        )?;
        let indices = self
            .device
            .create_buffers(QueueDirection::Output, self.config.ring_size)?;
        if indices.is_empty() {
            return Err(DeviceError::NoBuffers(QueueDirection::Output).into());
        }

        let first_index = indices.start;
        let mappings = indices
            .map(|index| self.device.map_plane(QueueDirection::Output, index, 0))
            .collect::<Result<Vec<_>, _>>()?;
        let ring = InputRing::new(first_index, mappings);

        let id = self.contexts.allocate(Context::new(
            config,
            resolution,
            flags,
            render_targets.to_vec(),
            FrameHeaderBuilder::new(codec),
            ring,
        ))?;
        log::debug!(
            "context {:#010x}: {:?} {}x{}, OUTPUT buffers from index {}",
            id,
            codec,
            width,
            height,
            first_index
        );

        Ok(id)
    }

    pub fn destroy_context(&mut self, context: ObjectId) -> DriverResult<()> {
        self.contexts
            .free(context)
            .map(|_| ())
            .ok_or(DriverError::InvalidContext)
    }

    /// Creates a buffer of `num_elements` elements of `element_size` bytes, initialized from
    /// `data` if given.
    ///
    /// Slice data is written directly into the OUTPUT buffer the next picture of `context` will
    /// be submitted through.
    pub fn create_buffer(
        &mut self,
        context: ObjectId,
        type_: BufferType,
        element_size: u32,
        num_elements: u32,
        data: Option<&[u8]>,
    ) -> DriverResult<ObjectId> {
        if !type_.is_supported() {
            return Err(DriverError::UnsupportedBufferType);
        }

        let size = (element_size as usize)
            .checked_mul(num_elements as usize)
            .ok_or(DriverError::AllocationFailed)?;
        let data = match data {
            Some(data) => Some(data.get(..size).ok_or(DriverError::InvalidParameter)?),
            None => None,
        };

        let buffer = match type_ {
            BufferType::SliceData => {
                let slot = self.prepare_input_slot(context, size)?;
                Buffer::new_device(context, slot, element_size, num_elements)
            }
            _ => Buffer::new_owned(type_, element_size, num_elements)?,
        };
        let id = self.buffers.allocate(buffer)?;

        if let Some(data) = data {
            self.buffer_data_mut(id)?.copy_from_slice(data);
        }

        Ok(id)
    }

    /// Returns the ring slot new slice data of `context` goes to, making sure it can hold
    /// `size` bytes and is no longer used by the device.
    fn prepare_input_slot(&mut self, context: ObjectId, size: usize) -> DriverResult<usize> {
        let ctx = self
            .contexts
            .lookup(context)
            .ok_or(DriverError::InvalidContext)?;
        let slot = ctx.next_input_slot();
        let capacity = ctx.ring.mapping(slot).map_or(0, <[u8]>::len);
        if size > capacity {
            log::debug!(
                "slice data of {} bytes exceeds the {} bytes of input slot {}",
                size,
                capacity,
                slot
            );
            return Err(DriverError::AllocationFailed);
        }

        self.reclaim_input_slot(context, slot)?;

        Ok(slot)
    }

    /// Waits until the picture occupying `slot` of `context`, if any, has been decoded.
    fn reclaim_input_slot(&mut self, context: ObjectId, slot: usize) -> DriverResult<()> {
        let owner = match self
            .contexts
            .lookup(context)
            .and_then(|ctx| ctx.ring.owner(slot))
        {
            Some(owner) => owner,
            None => return Ok(()),
        };

        if self.surfaces.contains(owner) {
            log::debug!(
                "input slot {} still holds the picture of surface {:#010x}",
                slot,
                owner
            );
            self.sync_surface(owner)?;
        }
        if let Some(ctx) = self.contexts.lookup_mut(context) {
            ctx.ring.release(slot, owner);
        }

        Ok(())
    }

    fn buffer_data(&self, buffer: ObjectId) -> DriverResult<&[u8]> {
        let buffer = self
            .buffers
            .lookup(buffer)
            .ok_or(DriverError::InvalidBuffer)?;
        let size = buffer.size();

        let data = match buffer.storage() {
            BufferStorage::Owned(data) => data.get(..size),
            BufferStorage::Device { context, slot } => self
                .contexts
                .lookup(*context)
                .and_then(|ctx| ctx.ring.mapping(*slot))
                .and_then(|mapping| mapping.get(..size)),
        };

        data.ok_or(DriverError::InvalidBuffer)
    }

    fn buffer_data_mut(&mut self, buffer: ObjectId) -> DriverResult<&mut [u8]> {
        let buffer = self
            .buffers
            .lookup_mut(buffer)
            .ok_or(DriverError::InvalidBuffer)?;
        let size = buffer.size();

        let data = match buffer.storage_mut() {
            BufferStorage::Owned(data) => data.get_mut(..size),
            BufferStorage::Device { context, slot } => {
                let slot = *slot;
                self.contexts
                    .lookup_mut(*context)
                    .and_then(|ctx| ctx.ring.mapping_mut(slot))
                    .and_then(|mapping| mapping.get_mut(..size))
            }
        };

        data.ok_or(DriverError::InvalidBuffer)
    }

    pub fn buffer_set_num_elements(
        &mut self,
        buffer: ObjectId,
        num_elements: u32,
    ) -> DriverResult<()> {
        self.buffers
            .lookup_mut(buffer)
            .ok_or(DriverError::InvalidBuffer)?
            .set_num_elements(num_elements)
    }

    /// Returns a CPU view of the content of `buffer`.
    pub fn map_buffer(&mut self, buffer: ObjectId) -> DriverResult<&mut [u8]> {
        self.buffer_data_mut(buffer)
    }

    pub fn unmap_buffer(&mut self, buffer: ObjectId) -> DriverResult<()> {
        if !self.buffers.contains(buffer) {
            return Err(DriverError::InvalidBuffer);
        }

        Ok(())
    }

    pub fn destroy_buffer(&mut self, buffer: ObjectId) -> DriverResult<()> {
        self.buffers
            .free(buffer)
            .map(|_| ())
            .ok_or(DriverError::InvalidBuffer)
    }

    /// Returns the type, element size and number of elements of `buffer`.
    pub fn buffer_info(&self, buffer: ObjectId) -> DriverResult<(BufferType, u32, u32)> {
        let buffer = self
            .buffers
            .lookup(buffer)
            .ok_or(DriverError::InvalidBuffer)?;

        Ok((buffer.type_(), buffer.element_size(), buffer.num_elements()))
    }

    /// Starts a new picture of `context`, decoded into `render_target`.
    ///
    /// If `render_target` is still the target of a previous picture, that picture is waited
    /// for first.
    pub fn begin_picture(
        &mut self,
        context: ObjectId,
        render_target: ObjectId,
    ) -> DriverResult<()> {
        let ctx = self
            .contexts
            .lookup(context)
            .ok_or(DriverError::InvalidContext)?;
        let n = ctx.rendered_picture_count;
        let ring_size = ctx.ring.len() as u32;

        let status = self
            .surfaces
            .lookup(render_target)
            .ok_or(DriverError::InvalidSurface)?
            .status();
        if status == SurfaceStatus::Rendering {
            log::debug!(
                "surface {:#010x} is still rendering, synchronizing",
                render_target
            );
            self.sync_surface(render_target)?;
        }

        let mut slots =
            PictureSlots::for_submission(n, ring_size, self.capture_buffers.len() as u32);
        // Frames are decoded into the queued CAPTURE buffers in ascending index order.
        if let Some(index) = self
            .capture_buffers
            .keys()
            .nth(slots.output_slot as usize)
        {
            slots.output_slot = *index;
        }
        self.reclaim_input_slot(context, slots.input_slot as usize)?;

        self.surfaces
            .lookup_mut(render_target)
            .ok_or(DriverError::InvalidSurface)?
            .begin(context, slots);
        let ctx = self
            .contexts
            .lookup_mut(context)
            .ok_or(DriverError::InvalidContext)?;
        ctx.ring.occupy(slots.input_slot as usize, render_target);
        ctx.current_render_target = Some(render_target);
        ctx.rendered_picture_count += 1;

        log::debug!(
            "picture {} on surface {:#010x}: input slot {}, output slot {}, request {}",
            n,
            render_target,
            slots.input_slot,
            slots.output_slot,
            slots.request
        );

        Ok(())
    }

    /// Processes `buffers` for the current picture of `context`.
    pub fn render_picture(&mut self, context: ObjectId, buffers: &[ObjectId]) -> DriverResult<()> {
        let ctx = self
            .contexts
            .lookup(context)
            .ok_or(DriverError::InvalidContext)?;
        if !self.configs.contains(ctx.config) {
            return Err(DriverError::InvalidConfig);
        }
        let target = ctx
            .current_render_target
            .ok_or(DriverError::InvalidSurface)?;
        let own_slot = self
            .surfaces
            .lookup(target)
            .ok_or(DriverError::InvalidSurface)?
            .output_slot;

        for &buffer in buffers {
            let type_ = self
                .buffers
                .lookup(buffer)
                .ok_or(DriverError::InvalidBuffer)?
                .type_();

            match type_ {
                BufferType::PictureParameter => {
                    let data = self.buffer_data(buffer)?.to_vec();
                    let surfaces = &self.surfaces;
                    let resolver = |id: ObjectId| -> Option<u32> {
                        surfaces.lookup(id).map(|surface| surface.output_slot)
                    };
                    self.contexts
                        .lookup_mut(context)
                        .ok_or(DriverError::InvalidContext)?
                        .frame_header
                        .translate_picture_params(&data, &resolver, own_slot)?;
                }
                BufferType::SliceParameter => {
                    let data = self.buffer_data(buffer)?.to_vec();
                    self.contexts
                        .lookup_mut(context)
                        .ok_or(DriverError::InvalidContext)?
                        .frame_header
                        .translate_slice_params(&data)?;
                }
                BufferType::SliceData => self.submit_slice(context, target, buffer)?,
                _ => log::debug!("ignoring {:?} buffer {:#010x}", type_, buffer),
            }
        }

        Ok(())
    }

    /// Sends the payload of `buffer` to the device, along with the frame header of the current
    /// picture.
    fn submit_slice(
        &mut self,
        context: ObjectId,
        target: ObjectId,
        buffer: ObjectId,
    ) -> DriverResult<()> {
        let (size, source) = {
            let buffer = self
                .buffers
                .lookup(buffer)
                .ok_or(DriverError::InvalidBuffer)?;
            let source = match buffer.storage() {
                BufferStorage::Device {
                    context: owner,
                    slot,
                } if *owner == context => Some(*slot),
                _ => None,
            };
            (buffer.size(), source)
        };
        let surface = self
            .surfaces
            .lookup(target)
            .ok_or(DriverError::InvalidSurface)?;
        let (input_slot, request) = (surface.input_slot as usize, surface.request);

        let ctx = self
            .contexts
            .lookup_mut(context)
            .ok_or(DriverError::InvalidContext)?;
        let control = match ctx.frame_header.translate_slice(size as u32) {
            Some(control) => control,
            None => {
                log::debug!(
                    "{:?} slice data is not submitted to the device",
                    ctx.frame_header.codec()
                );
                return Ok(());
            }
        };

        // Slice data created after the picture began was written to the next slot of the ring.
        match source {
            Some(slot) => ctx
                .ring
                .copy_slot(slot, input_slot, size)
                .ok_or(DriverError::InvalidBuffer)?,
            None => {
                let data = self.buffer_data(buffer)?.to_vec();
                self.contexts
                    .lookup_mut(context)
                    .and_then(|ctx| ctx.ring.mapping_mut(input_slot))
                    .and_then(|mapping| mapping.get_mut(..size))
                    .ok_or(DriverError::InvalidBuffer)?
                    .copy_from_slice(&data);
            }
        }

        let index = self
            .contexts
            .lookup(context)
            .ok_or(DriverError::InvalidContext)?
            .ring
            .device_index(input_slot);
        let mut payload = control.payload;
        self.device
            .set_ext_control(request, control.id, &mut payload)?;
        self.device.queue_buffer(
            QueueDirection::Output,
            index,
            size as u32,
            Some(request),
        )?;

        if let Some(in_flight) = self
            .surfaces
            .lookup_mut(target)
            .and_then(|surface| surface.in_flight.as_mut())
        {
            in_flight.queued = true;
        }
        log::debug!(
            "queued {} bytes of slice data in OUTPUT buffer {} (request {})",
            size,
            index,
            request
        );

        Ok(())
    }

    /// Ends the current picture of `context` and makes sure the device is processing its
    /// queues.
    pub fn end_picture(&mut self, context: ObjectId) -> DriverResult<()> {
        let ctx = self
            .contexts
            .lookup_mut(context)
            .ok_or(DriverError::InvalidContext)?;
        if ctx.current_render_target.take().is_none() {
            return Err(DriverError::InvalidSurface);
        }

        self.streams
            .stream_on(&mut self.device, QueueDirection::Output)?;
        self.streams
            .stream_on(&mut self.device, QueueDirection::Capture)?;

        Ok(())
    }

    /// Blocks until the picture decoded into `surface` is ready, and hands its CAPTURE buffer
    /// back to the device.
    pub fn sync_surface(&mut self, surface: ObjectId) -> DriverResult<()> {
        let target = self
            .surfaces
            .lookup(surface)
            .ok_or(DriverError::InvalidSurface)?;
        let in_flight = match target.in_flight {
            Some(in_flight) => in_flight,
            None => return Ok(()),
        };
        let input_slot = target.input_slot as usize;
        let output_slot = target.output_slot;

        if !in_flight.queued {
            log::debug!(
                "surface {:#010x} has no picture queued on the device",
                surface
            );
            self.complete_picture(surface, in_flight.context, input_slot);
            return Ok(());
        }

        self.device.wait_ready()?;

        let index = self.device.dequeue_buffer(QueueDirection::Output)?;
        if let Some(expected) = self
            .contexts
            .lookup(in_flight.context)
            .map(|ctx| ctx.ring.device_index(input_slot))
        {
            if index != expected {
                log::warn!(
                    "dequeued OUTPUT buffer {} while waiting for buffer {}",
                    index,
                    expected
                );
            }
        }
        self.complete_picture(surface, in_flight.context, input_slot);

        let index = self.device.dequeue_buffer(QueueDirection::Capture)?;
        if index != output_slot {
            log::warn!(
                "dequeued CAPTURE buffer {} while waiting for buffer {}",
                index,
                output_slot
            );
        }
        self.device
            .queue_buffer(QueueDirection::Capture, index, 0, None)?;

        Ok(())
    }

    fn complete_picture(&mut self, surface: ObjectId, context: ObjectId, input_slot: usize) {
        if let Some(target) = self.surfaces.lookup_mut(surface) {
            target.complete();
        }
        if let Some(ctx) = self.contexts.lookup_mut(context) {
            ctx.ring.release(input_slot, surface);
        }
    }

    pub fn query_image_formats(&self) -> Vec<ImageFormat> {
        vec![ImageFormat::nv12()]
    }

    /// Creates an image of `width` x `height` in `format`, along with the buffer holding its
    /// pixels.
    pub fn create_image(
        &mut self,
        format: &ImageFormat,
        width: u32,
        height: u32,
    ) -> DriverResult<Image> {
        if format.fourcc != ImageFormat::nv12().fourcc {
            return Err(DriverError::UnsupportedFormat);
        }

        if width == 0 || height == 0 {
            return Err(DriverError::InvalidParameter);
        }

        let mut image =
            Image::nv12(Resolution::from((width, height))).ok_or(DriverError::AllocationFailed)?;
        image.buf = self.create_buffer(INVALID_ID, BufferType::Image, image.data_size, 1, None)?;

        match self.images.allocate(image.clone()) {
            Ok(id) => {
                image.id = id;
                if let Some(stored) = self.images.lookup_mut(id) {
                    stored.id = id;
                }
                Ok(image)
            }
            Err(e) => {
                self.buffers.free(image.buf);
                Err(e.into())
            }
        }
    }

    /// Creates an image holding a linear copy of the frame last decoded into `surface`.
    pub fn derive_image(&mut self, surface: ObjectId) -> DriverResult<Image> {
        let target = self
            .surfaces
            .lookup(surface)
            .ok_or(DriverError::InvalidSurface)?;
        let resolution = target.resolution();
        let output_slot = target.output_slot;
        if !self.capture_buffers.contains_key(&output_slot) {
            return Err(DriverError::InvalidSurface);
        }

        let image = self.create_image(&ImageFormat::nv12(), resolution.width, resolution.height)?;

        let planes = self
            .capture_buffers
            .get(&output_slot)
            .ok_or(DriverError::InvalidSurface)?;
        let data = match self
            .buffers
            .lookup_mut(image.buf)
            .map(Buffer::storage_mut)
        {
            Some(BufferStorage::Owned(data)) => data,
            _ => return Err(DriverError::AllocationFailed),
        };
        let (luma, chroma) = image
            .planes_mut(data)
            .ok_or(DriverError::AllocationFailed)?;

        let width = resolution.width as usize;
        let height = resolution.height as usize;
        self.converter.convert(
            planes.luma.as_ref(),
            luma,
            image.pitches[0] as usize,
            width,
            height,
        );
        self.converter.convert(
            planes.chroma.as_ref(),
            chroma,
            image.pitches[1] as usize,
            width,
            (height + 1) / 2,
        );

        Ok(image)
    }

    /// Releases `image` and its buffer.
    pub fn destroy_image(&mut self, image: ObjectId) -> DriverResult<()> {
        let image = self.images.free(image).ok_or(DriverError::InvalidImage)?;
        self.buffers.free(image.buf);

        Ok(())
    }

    pub fn set_image_palette(&mut self, _image: ObjectId, _palette: &[u8]) -> DriverResult<()> {
        Ok(())
    }

    pub fn get_image(
        &mut self,
        _surface: ObjectId,
        _rect: Rect,
        _image: ObjectId,
    ) -> DriverResult<()> {
        Ok(())
    }

    pub fn put_image(
        &mut self,
        _surface: ObjectId,
        _image: ObjectId,
        _src: Rect,
        _dst: Rect,
    ) -> DriverResult<()> {
        Ok(())
    }

    /// Subpictures are not supported: no format is reported and every operation is a no-op.
    pub fn query_subpicture_formats(&self) -> Vec<(ImageFormat, u32)> {
        vec![]
    }

    pub fn create_subpicture(&mut self, _image: ObjectId) -> DriverResult<ObjectId> {
        Ok(INVALID_ID)
    }

    pub fn destroy_subpicture(&mut self, _subpicture: ObjectId) -> DriverResult<()> {
        Ok(())
    }

    pub fn set_subpicture_image(
        &mut self,
        _subpicture: ObjectId,
        _image: ObjectId,
    ) -> DriverResult<()> {
        Ok(())
    }

    pub fn set_subpicture_chromakey(
        &mut self,
        _subpicture: ObjectId,
        _min: u32,
        _max: u32,
        _mask: u32,
    ) -> DriverResult<()> {
        Ok(())
    }

    pub fn set_subpicture_global_alpha(
        &mut self,
        _subpicture: ObjectId,
        _alpha: f32,
    ) -> DriverResult<()> {
        Ok(())
    }

    pub fn associate_subpicture(
        &mut self,
        _subpicture: ObjectId,
        _surfaces: &[ObjectId],
        _src: Rect,
        _dst: Rect,
        _flags: u32,
    ) -> DriverResult<()> {
        Ok(())
    }

    pub fn deassociate_subpicture(
        &mut self,
        _subpicture: ObjectId,
        _surfaces: &[ObjectId],
    ) -> DriverResult<()> {
        Ok(())
    }

    pub fn query_display_attributes(&self) -> DriverResult<Vec<(i32, i32)>> {
        Err(DriverError::Unknown)
    }

    pub fn get_display_attributes(&self, _attribs: &mut [(i32, i32)]) -> DriverResult<()> {
        Err(DriverError::Unknown)
    }

    pub fn set_display_attributes(&mut self, _attribs: &[(i32, i32)]) -> DriverResult<()> {
        Err(DriverError::Unknown)
    }

    pub fn put_surface(&mut self, _surface: ObjectId, _src: Rect, _dst: Rect) -> DriverResult<()> {
        Err(DriverError::Unimplemented)
    }

    pub fn lock_surface(&mut self, _surface: ObjectId) -> DriverResult<()> {
        Err(DriverError::Unimplemented)
    }

    pub fn unlock_surface(&mut self, _surface: ObjectId) -> DriverResult<()> {
        Err(DriverError::Unimplemented)
    }

    /// Stops the device and releases every object of the session.
    pub fn terminate(mut self) {
        for direction in [QueueDirection::Output, QueueDirection::Capture] {
            if let Err(e) = self.streams.stream_off(&mut self.device, direction) {
                log::error!("failed to stop the {:?} queue: {}", direction, e);
            }
        }

        for (id, buffer) in self.buffers.drain() {
            log::warn!(
                "buffer {:#010x} ({:?}) was not destroyed",
                id,
                buffer.type_()
            );
        }
        for (id, _) in self.images.drain() {
            log::debug!("releasing image {:#010x}", id);
        }
        for (id, _) in self.contexts.drain() {
            log::debug!("releasing context {:#010x}", id);
        }
        for (id, _) in self.surfaces.drain() {
            log::debug!("releasing surface {:#010x}", id);
        }
        for (id, _) in self.configs.drain() {
            log::debug!("releasing config {:#010x}", id);
        }
        self.capture_buffers.clear();
    }
}
