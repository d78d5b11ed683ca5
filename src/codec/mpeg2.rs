// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use byteorder::ByteOrder;
use byteorder::NativeEndian;

use crate::codec::bits;
use crate::codec::check_len;
use crate::codec::ParseError;
use crate::object_heap::ObjectId;

/// Bits of the `picture_coding_extension` word of the MPEG-2 picture parameters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PictureCodingExtension(pub u32);

impl PictureCodingExtension {
    pub fn intra_dc_precision(&self) -> u8 {
        bits(self.0, 0, 2)
    }
    pub fn picture_structure(&self) -> u8 {
        bits(self.0, 2, 2)
    }
    pub fn top_field_first(&self) -> u8 {
        bits(self.0, 4, 1)
    }
    pub fn frame_pred_frame_dct(&self) -> u8 {
        bits(self.0, 5, 1)
    }
    pub fn concealment_motion_vectors(&self) -> u8 {
        bits(self.0, 6, 1)
    }
    pub fn q_scale_type(&self) -> u8 {
        bits(self.0, 7, 1)
    }
    pub fn intra_vlc_format(&self) -> u8 {
        bits(self.0, 8, 1)
    }
    pub fn alternate_scan(&self) -> u8 {
        bits(self.0, 9, 1)
    }
    pub fn repeat_first_field(&self) -> u8 {
        bits(self.0, 10, 1)
    }
    pub fn progressive_frame(&self) -> u8 {
        bits(self.0, 11, 1)
    }
    pub fn is_first_field(&self) -> u8 {
        bits(self.0, 12, 1)
    }
}

/// `VAPictureParameterBufferMPEG2`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PictureParameterBufferMpeg2 {
    pub horizontal_size: u16,
    pub vertical_size: u16,
    pub forward_reference_picture: ObjectId,
    pub backward_reference_picture: ObjectId,
    pub picture_coding_type: i32,
    /// Four 4-bit motion vector ranges, `f_code[0][0]` in the most significant nibble.
    pub f_code: i32,
    pub picture_coding_extension: PictureCodingExtension,
}

impl PictureParameterBufferMpeg2 {
    /// Size of the structure, including its reserved words.
    pub const SIZE: usize = 40;
    /// Offset of the first byte past the fields the driver reads.
    const MIN_SIZE: usize = 24;

    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        check_len("MPEG-2 picture parameters", data, Self::MIN_SIZE)?;

        Ok(Self {
            horizontal_size: NativeEndian::read_u16(&data[0..2]),
            vertical_size: NativeEndian::read_u16(&data[2..4]),
            forward_reference_picture: NativeEndian::read_u32(&data[4..8]),
            backward_reference_picture: NativeEndian::read_u32(&data[8..12]),
            picture_coding_type: NativeEndian::read_i32(&data[12..16]),
            f_code: NativeEndian::read_i32(&data[16..20]),
            picture_coding_extension: PictureCodingExtension(NativeEndian::read_u32(
                &data[20..24],
            )),
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut data = [0u8; Self::SIZE];
        NativeEndian::write_u16(&mut data[0..2], self.horizontal_size);
        NativeEndian::write_u16(&mut data[2..4], self.vertical_size);
        NativeEndian::write_u32(&mut data[4..8], self.forward_reference_picture);
        NativeEndian::write_u32(&mut data[8..12], self.backward_reference_picture);
        NativeEndian::write_i32(&mut data[12..16], self.picture_coding_type);
        NativeEndian::write_i32(&mut data[16..20], self.f_code);
        NativeEndian::write_u32(&mut data[20..24], self.picture_coding_extension.0);
        data
    }

    /// Returns the motion vector range `f_code[direction][component]`, as a 2x2 array.
    pub fn f_codes(&self) -> [[u8; 2]; 2] {
        let f_code = self.f_code as u32;
        [
            [bits(f_code, 12, 4), bits(f_code, 8, 4)],
            [bits(f_code, 4, 4), bits(f_code, 0, 4)],
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_picture_parameters() {
        let params = PictureParameterBufferMpeg2 {
            horizontal_size: 720,
            vertical_size: 576,
            forward_reference_picture: 0x0400_0001,
            backward_reference_picture: 0xffff_ffff,
            picture_coding_type: 2,
            f_code: 0x12ff,
            // intra_dc_precision = 2, picture_structure = 3, top_field_first, alternate_scan.
            picture_coding_extension: PictureCodingExtension(0b10_0001_1110),
        };

        let bytes = params.to_bytes();
        let parsed = PictureParameterBufferMpeg2::parse(&bytes).unwrap();
        assert_eq!(parsed, params);

        assert_eq!(parsed.f_codes(), [[1, 2], [15, 15]]);
        let ext = parsed.picture_coding_extension;
        assert_eq!(ext.intra_dc_precision(), 2);
        assert_eq!(ext.picture_structure(), 3);
        assert_eq!(ext.top_field_first(), 1);
        assert_eq!(ext.frame_pred_frame_dct(), 0);
        assert_eq!(ext.alternate_scan(), 1);
        assert_eq!(ext.progressive_frame(), 0);
    }

    #[test]
    fn short_buffer() {
        assert_eq!(
            PictureParameterBufferMpeg2::parse(&[0u8; 20]),
            Err(ParseError::TooShort {
                name: "MPEG-2 picture parameters",
                len: 20,
                min: 24,
            })
        );
    }
}
