// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use byteorder::ByteOrder;
use byteorder::NativeEndian;

use crate::codec::mpeg4::PictureParameterBufferMpeg4;
use crate::codec::mpeg4::SliceParameterBufferMpeg4;
use crate::codec::mpeg4::VolFields;
use crate::codec::mpeg4::VopFields;
use crate::device::controls::ExtControl;
use crate::device::controls::V4L2_CID_MPEG_VIDEO_MPEG4_FRAME_HDR;

/// `struct v4l2_ctrl_mpeg4_frame_hdr` of the cedrus uAPI.
///
/// `vol_fields` and `vop_fields` are C bitfields, stored here in their packed form.
#[allow(non_camel_case_types)]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct v4l2_ctrl_mpeg4_frame_hdr {
    pub slice_pos: u32,
    pub slice_len: u32,
    pub width: u16,
    pub height: u16,
    pub vol_fields: u32,
    pub quant_precision: u32,
    pub vop_fields: u32,
    pub vop_fcode_forward: u8,
    pub vop_fcode_backward: u8,
    pub trb: u16,
    pub trd: u16,
    pub backward_index: u8,
    pub forward_index: u8,
}

impl v4l2_ctrl_mpeg4_frame_hdr {
    pub const SIZE: usize = 32;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut data = [0u8; Self::SIZE];
        NativeEndian::write_u32(&mut data[0..4], self.slice_pos);
        NativeEndian::write_u32(&mut data[4..8], self.slice_len);
        NativeEndian::write_u16(&mut data[8..10], self.width);
        NativeEndian::write_u16(&mut data[10..12], self.height);
        NativeEndian::write_u32(&mut data[12..16], self.vol_fields);
        NativeEndian::write_u32(&mut data[16..20], self.quant_precision);
        NativeEndian::write_u32(&mut data[20..24], self.vop_fields);
        data[24] = self.vop_fcode_forward;
        data[25] = self.vop_fcode_backward;
        NativeEndian::write_u16(&mut data[26..28], self.trb);
        NativeEndian::write_u16(&mut data[28..30], self.trd);
        data[30] = self.backward_index;
        data[31] = self.forward_index;
        data
    }
}

fn pack_vol_fields(fields: &VolFields) -> u32 {
    u32::from(fields.short_video_header())
        | u32::from(fields.chroma_format()) << 1
        | u32::from(fields.interlaced()) << 3
        | u32::from(fields.obmc_disable()) << 4
        | u32::from(fields.sprite_enable()) << 5
        | u32::from(fields.sprite_warping_accuracy()) << 7
        | u32::from(fields.quant_type()) << 9
        | u32::from(fields.quarter_sample()) << 10
        | u32::from(fields.data_partitioned()) << 11
        | u32::from(fields.reversible_vlc()) << 12
        | u32::from(fields.resync_marker_disable()) << 13
}

fn pack_vop_fields(fields: &VopFields) -> u32 {
    u32::from(fields.vop_coding_type())
        | u32::from(fields.backward_reference_vop_coding_type()) << 2
        | u32::from(fields.vop_rounding_type()) << 4
        | u32::from(fields.intra_dc_vlc_thr()) << 5
        | u32::from(fields.top_field_first()) << 8
        | u32::from(fields.alternate_vertical_scan_flag()) << 9
}

/// MPEG-4 frame header, built up over the picture and slice parameters of a picture.
#[derive(Debug, Default)]
pub struct V4l2CtrlMpeg4FrameHdr {
    handle: v4l2_ctrl_mpeg4_frame_hdr,
}

impl V4l2CtrlMpeg4FrameHdr {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn set_picture_params(&mut self, params: &PictureParameterBufferMpeg4) -> &mut Self {
        self.handle.width = params.vop_width;
        self.handle.height = params.vop_height;
        self.handle.vol_fields = pack_vol_fields(&params.vol_fields);
        self.handle.quant_precision = u32::from(params.quant_precision);
        self.handle.vop_fields = pack_vop_fields(&params.vop_fields);
        self.handle.vop_fcode_forward = params.vop_fcode_forward;
        self.handle.vop_fcode_backward = params.vop_fcode_backward;
        self.handle.trb = params.trb as u16;
        self.handle.trd = params.trd as u16;
        self
    }

    /// Sets the CAPTURE buffers holding the forward and backward reference frames.
    pub fn set_references(&mut self, forward_index: u8, backward_index: u8) -> &mut Self {
        self.handle.forward_index = forward_index;
        self.handle.backward_index = backward_index;
        self
    }

    /// Locates the slice within the OUTPUT buffer.
    pub fn set_slice_params(&mut self, params: &SliceParameterBufferMpeg4) -> &mut Self {
        self.handle.slice_pos = params.slice_data_offset;
        self.handle.slice_len = params.slice_data_size;
        self
    }

    pub fn handle(&self) -> &v4l2_ctrl_mpeg4_frame_hdr {
        &self.handle
    }
}

impl From<&V4l2CtrlMpeg4FrameHdr> for ExtControl {
    fn from(hdr: &V4l2CtrlMpeg4FrameHdr) -> Self {
        ExtControl {
            id: V4L2_CID_MPEG_VIDEO_MPEG4_FRAME_HDR,
            payload: hdr.handle.to_bytes().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_header_layout() {
        let params = PictureParameterBufferMpeg4 {
            vop_width: 352,
            vop_height: 288,
            // Bits above resync_marker_disable are not part of the header.
            vol_fields: VolFields(0xffff_ffff),
            quant_precision: 5,
            vop_fields: VopFields(0b00_0000_0001),
            vop_fcode_forward: 1,
            vop_fcode_backward: 2,
            trb: 3,
            trd: 4,
            ..Default::default()
        };
        let slice = SliceParameterBufferMpeg4 {
            slice_data_size: 1500,
            slice_data_offset: 7,
            ..Default::default()
        };

        let mut hdr = V4l2CtrlMpeg4FrameHdr::new();
        hdr.set_picture_params(&params)
            .set_references(0, 1)
            .set_slice_params(&slice);
        assert_eq!(hdr.handle().vol_fields, 0x3fff);
        assert_eq!(hdr.handle().vop_fields, 1);

        let control = ExtControl::from(&hdr);
        assert_eq!(control.id, V4L2_CID_MPEG_VIDEO_MPEG4_FRAME_HDR);

        let bytes = control.payload;
        assert_eq!(bytes.len(), 32);
        assert_eq!(NativeEndian::read_u32(&bytes[0..4]), 7);
        assert_eq!(NativeEndian::read_u32(&bytes[4..8]), 1500);
        assert_eq!(NativeEndian::read_u16(&bytes[8..10]), 352);
        assert_eq!(NativeEndian::read_u16(&bytes[10..12]), 288);
        assert_eq!(NativeEndian::read_u32(&bytes[12..16]), 0x3fff);
        assert_eq!(NativeEndian::read_u32(&bytes[16..20]), 5);
        assert_eq!(NativeEndian::read_u32(&bytes[20..24]), 1);
        assert_eq!(&bytes[24..26], &[1, 2]);
        assert_eq!(NativeEndian::read_u16(&bytes[26..28]), 3);
        assert_eq!(NativeEndian::read_u16(&bytes[28..30]), 4);
        assert_eq!(&bytes[30..32], &[1, 0]);
    }
}
