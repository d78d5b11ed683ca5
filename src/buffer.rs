// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Client buffers: parameter sets, slice payloads and image data.

use enumn::N;

use crate::driver::DriverError;
use crate::driver::DriverResult;
use crate::object_heap::ObjectId;

/// Buffer types, numbered like the VA buffer type enumeration.
#[derive(N, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum BufferType {
    PictureParameter = 0,
    IqMatrix = 1,
    BitPlane = 2,
    SliceGroupMap = 3,
    SliceParameter = 4,
    SliceData = 5,
    MacroblockParameter = 6,
    ResidualData = 7,
    DeblockingParameter = 8,
    Image = 9,
}

impl BufferType {
    /// Whether buffers of this type can be created.
    pub fn is_supported(&self) -> bool {
        matches!(
            self,
            BufferType::PictureParameter
                | BufferType::IqMatrix
                | BufferType::SliceParameter
                | BufferType::SliceData
                | BufferType::Image
        )
    }
}

/// Where the data of a buffer lives.
#[derive(Debug, PartialEq, Eq)]
pub enum BufferStorage {
    /// Memory owned by the buffer.
    Owned(Vec<u8>),
    /// Slot `slot` of the OUTPUT ring of `context`. The mapping belongs to the context and
    /// outlives the buffer.
    Device { context: ObjectId, slot: usize },
}

#[derive(Debug)]
pub struct Buffer {
    type_: BufferType,
    storage: BufferStorage,
    element_size: u32,
    num_elements: u32,
    max_num_elements: u32,
}

impl Buffer {
    fn new(
        type_: BufferType,
        storage: BufferStorage,
        element_size: u32,
        num_elements: u32,
    ) -> Self {
        Self {
            type_,
            storage,
            element_size,
            num_elements,
            max_num_elements: num_elements,
        }
    }

    /// Creates a buffer backed by zeroed memory of its own.
    pub fn new_owned(
        type_: BufferType,
        element_size: u32,
        num_elements: u32,
    ) -> DriverResult<Self> {
        let size = (element_size as usize)
            .checked_mul(num_elements as usize)
            .ok_or(DriverError::AllocationFailed)?;
        let mut data = Vec::new();
        data.try_reserve_exact(size).map_err(|e| {
            log::debug!("cannot allocate {} bytes for {:?} buffer: {}", size, type_, e);
            DriverError::AllocationFailed
        })?;
        data.resize(size, 0);

        Ok(Self::new(
            type_,
            BufferStorage::Owned(data),
            element_size,
            num_elements,
        ))
    }

    /// Creates a slice data buffer aliasing an OUTPUT ring slot of `context`.
    pub fn new_device(
        context: ObjectId,
        slot: usize,
        element_size: u32,
        num_elements: u32,
    ) -> Self {
        Self::new(
            BufferType::SliceData,
            BufferStorage::Device { context, slot },
            element_size,
            num_elements,
        )
    }

    pub fn type_(&self) -> BufferType {
        self.type_
    }

    pub fn storage(&self) -> &BufferStorage {
        &self.storage
    }

    pub(crate) fn storage_mut(&mut self) -> &mut BufferStorage {
        &mut self.storage
    }

    pub fn element_size(&self) -> u32 {
        self.element_size
    }

    pub fn num_elements(&self) -> u32 {
        self.num_elements
    }

    /// Size of the valid data of the buffer, in bytes.
    pub fn size(&self) -> usize {
        self.element_size as usize * self.num_elements as usize
    }

    /// Shrinks or regrows the valid part of the buffer, within the size it was created with.
    pub fn set_num_elements(&mut self, num_elements: u32) -> DriverResult<()> {
        if num_elements > self.max_num_elements {
            return Err(DriverError::InvalidParameter);
        }

        self.num_elements = num_elements;
        Ok(())
    }
}
