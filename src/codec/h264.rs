// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use byteorder::ByteOrder;
use byteorder::NativeEndian;

use crate::codec::check_len;
use crate::codec::ParseError;
use crate::Resolution;

/// Size of a `VAPictureH264`, including its reserved words.
const PICTURE_SIZE: usize = 36;
/// Number of entries of the `ReferenceFrames` array.
const NUM_REFERENCE_FRAMES: usize = 16;
/// Offset of `picture_width_in_mbs_minus1`.
const DIMENSIONS_OFFSET: usize = PICTURE_SIZE * (1 + NUM_REFERENCE_FRAMES);

/// The leading fields of `VAPictureParameterBufferH264`.
///
/// The device does not accept H.264 frame headers yet, so only the picture size is read.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PictureParameterBufferH264 {
    pub picture_width_in_mbs_minus1: u16,
    pub picture_height_in_mbs_minus1: u16,
}

impl PictureParameterBufferH264 {
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        check_len("H.264 picture parameters", data, DIMENSIONS_OFFSET + 4)?;

        let dimensions = &data[DIMENSIONS_OFFSET..];
        Ok(Self {
            picture_width_in_mbs_minus1: NativeEndian::read_u16(&dimensions[0..2]),
            picture_height_in_mbs_minus1: NativeEndian::read_u16(&dimensions[2..4]),
        })
    }

    /// Coded size of the picture, in pixels.
    pub fn coded_resolution(&self) -> Resolution {
        Resolution {
            width: (u32::from(self.picture_width_in_mbs_minus1) + 1) * 16,
            height: (u32::from(self.picture_height_in_mbs_minus1) + 1) * 16,
        }
    }
}
