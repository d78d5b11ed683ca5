// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use byteorder::ByteOrder;
use byteorder::NativeEndian;

use crate::codec::bits;
use crate::codec::check_len;
use crate::codec::ParseError;
use crate::object_heap::ObjectId;

/// Video object layer flags of the MPEG-4 picture parameters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VolFields(pub u32);

impl VolFields {
    pub fn short_video_header(&self) -> u8 {
        bits(self.0, 0, 1)
    }
    pub fn chroma_format(&self) -> u8 {
        bits(self.0, 1, 2)
    }
    pub fn interlaced(&self) -> u8 {
        bits(self.0, 3, 1)
    }
    pub fn obmc_disable(&self) -> u8 {
        bits(self.0, 4, 1)
    }
    pub fn sprite_enable(&self) -> u8 {
        bits(self.0, 5, 2)
    }
    pub fn sprite_warping_accuracy(&self) -> u8 {
        bits(self.0, 7, 2)
    }
    pub fn quant_type(&self) -> u8 {
        bits(self.0, 9, 1)
    }
    pub fn quarter_sample(&self) -> u8 {
        bits(self.0, 10, 1)
    }
    pub fn data_partitioned(&self) -> u8 {
        bits(self.0, 11, 1)
    }
    pub fn reversible_vlc(&self) -> u8 {
        bits(self.0, 12, 1)
    }
    pub fn resync_marker_disable(&self) -> u8 {
        bits(self.0, 13, 1)
    }
}

/// Video object plane flags of the MPEG-4 picture parameters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VopFields(pub u32);

impl VopFields {
    pub fn vop_coding_type(&self) -> u8 {
        bits(self.0, 0, 2)
    }
    pub fn backward_reference_vop_coding_type(&self) -> u8 {
        bits(self.0, 2, 2)
    }
    pub fn vop_rounding_type(&self) -> u8 {
        bits(self.0, 4, 1)
    }
    pub fn intra_dc_vlc_thr(&self) -> u8 {
        bits(self.0, 5, 3)
    }
    pub fn top_field_first(&self) -> u8 {
        bits(self.0, 8, 1)
    }
    pub fn alternate_vertical_scan_flag(&self) -> u8 {
        bits(self.0, 9, 1)
    }
}

/// `VAPictureParameterBufferMPEG4`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PictureParameterBufferMpeg4 {
    pub vop_width: u16,
    pub vop_height: u16,
    pub forward_reference_picture: ObjectId,
    pub backward_reference_picture: ObjectId,
    pub vol_fields: VolFields,
    pub no_of_sprite_warping_points: u8,
    pub sprite_trajectory_du: [i16; 3],
    pub sprite_trajectory_dv: [i16; 3],
    pub quant_precision: u8,
    pub vop_fields: VopFields,
    pub vop_fcode_forward: u8,
    pub vop_fcode_backward: u8,
    pub vop_time_increment_resolution: u16,
    pub num_gobs_in_vop: u8,
    pub num_macroblocks_in_gob: u8,
    pub trb: i16,
    pub trd: i16,
}

impl PictureParameterBufferMpeg4 {
    pub const SIZE: usize = 64;
    const MIN_SIZE: usize = 46;

    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        check_len("MPEG-4 picture parameters", data, Self::MIN_SIZE)?;

        let mut sprite_trajectory_du = [0i16; 3];
        NativeEndian::read_i16_into(&data[18..24], &mut sprite_trajectory_du);
        let mut sprite_trajectory_dv = [0i16; 3];
        NativeEndian::read_i16_into(&data[24..30], &mut sprite_trajectory_dv);

        Ok(Self {
            vop_width: NativeEndian::read_u16(&data[0..2]),
            vop_height: NativeEndian::read_u16(&data[2..4]),
            forward_reference_picture: NativeEndian::read_u32(&data[4..8]),
            backward_reference_picture: NativeEndian::read_u32(&data[8..12]),
            vol_fields: VolFields(NativeEndian::read_u32(&data[12..16])),
            no_of_sprite_warping_points: data[16],
            sprite_trajectory_du,
            sprite_trajectory_dv,
            quant_precision: data[30],
            vop_fields: VopFields(NativeEndian::read_u32(&data[32..36])),
            vop_fcode_forward: data[36],
            vop_fcode_backward: data[37],
            vop_time_increment_resolution: NativeEndian::read_u16(&data[38..40]),
            num_gobs_in_vop: data[40],
            num_macroblocks_in_gob: data[41],
            trb: NativeEndian::read_i16(&data[42..44]),
            trd: NativeEndian::read_i16(&data[44..46]),
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut data = [0u8; Self::SIZE];
        NativeEndian::write_u16(&mut data[0..2], self.vop_width);
        NativeEndian::write_u16(&mut data[2..4], self.vop_height);
        NativeEndian::write_u32(&mut data[4..8], self.forward_reference_picture);
        NativeEndian::write_u32(&mut data[8..12], self.backward_reference_picture);
        NativeEndian::write_u32(&mut data[12..16], self.vol_fields.0);
        data[16] = self.no_of_sprite_warping_points;
        NativeEndian::write_i16_into(&self.sprite_trajectory_du, &mut data[18..24]);
        NativeEndian::write_i16_into(&self.sprite_trajectory_dv, &mut data[24..30]);
        data[30] = self.quant_precision;
        NativeEndian::write_u32(&mut data[32..36], self.vop_fields.0);
        data[36] = self.vop_fcode_forward;
        data[37] = self.vop_fcode_backward;
        NativeEndian::write_u16(&mut data[38..40], self.vop_time_increment_resolution);
        data[40] = self.num_gobs_in_vop;
        data[41] = self.num_macroblocks_in_gob;
        NativeEndian::write_i16(&mut data[42..44], self.trb);
        NativeEndian::write_i16(&mut data[44..46], self.trd);
        data
    }
}

/// `VASliceParameterBufferMPEG4`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SliceParameterBufferMpeg4 {
    pub slice_data_size: u32,
    pub slice_data_offset: u32,
    pub slice_data_flag: u32,
    pub macroblock_offset: u32,
    pub macroblock_number: u32,
    pub quant_scale: i32,
}

impl SliceParameterBufferMpeg4 {
    pub const SIZE: usize = 40;
    const MIN_SIZE: usize = 24;

    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        check_len("MPEG-4 slice parameters", data, Self::MIN_SIZE)?;

        Ok(Self {
            slice_data_size: NativeEndian::read_u32(&data[0..4]),
            slice_data_offset: NativeEndian::read_u32(&data[4..8]),
            slice_data_flag: NativeEndian::read_u32(&data[8..12]),
            macroblock_offset: NativeEndian::read_u32(&data[12..16]),
            macroblock_number: NativeEndian::read_u32(&data[16..20]),
            quant_scale: NativeEndian::read_i32(&data[20..24]),
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut data = [0u8; Self::SIZE];
        NativeEndian::write_u32(&mut data[0..4], self.slice_data_size);
        NativeEndian::write_u32(&mut data[4..8], self.slice_data_offset);
        NativeEndian::write_u32(&mut data[8..12], self.slice_data_flag);
        NativeEndian::write_u32(&mut data[12..16], self.macroblock_offset);
        NativeEndian::write_u32(&mut data[16..20], self.macroblock_number);
        NativeEndian::write_i32(&mut data[20..24], self.quant_scale);
        data
    }
}
