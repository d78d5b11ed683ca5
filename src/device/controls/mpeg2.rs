// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use byteorder::ByteOrder;
use byteorder::NativeEndian;

use crate::codec::mpeg2::PictureParameterBufferMpeg2;
use crate::device::controls::ExtControl;
use crate::device::controls::V4L2_CID_MPEG_VIDEO_MPEG2_FRAME_HDR;

/// Value of `type` for MPEG-1 streams.
pub const MPEG1: u32 = 0;
/// Value of `type` for MPEG-2 streams.
pub const MPEG2: u32 = 1;

/// `struct v4l2_ctrl_mpeg2_frame_hdr` of the cedrus uAPI.
#[allow(non_camel_case_types)]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct v4l2_ctrl_mpeg2_frame_hdr {
    pub slice_len: u32,
    pub slice_pos: u32,
    pub type_: u32,
    pub width: u16,
    pub height: u16,
    pub picture_coding_type: u32,
    pub f_code: [[u8; 2]; 2],
    pub intra_dc_precision: u8,
    pub picture_structure: u8,
    pub top_field_first: u8,
    pub frame_pred_frame_dct: u8,
    pub concealment_motion_vectors: u8,
    pub q_scale_type: u8,
    pub intra_vlc_format: u8,
    pub alternate_scan: u8,
    pub backward_index: u8,
    pub forward_index: u8,
}

impl v4l2_ctrl_mpeg2_frame_hdr {
    /// Size of the structure as laid out by the kernel, trailing padding included.
    pub const SIZE: usize = 36;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut data = [0u8; Self::SIZE];
        NativeEndian::write_u32(&mut data[0..4], self.slice_len);
        NativeEndian::write_u32(&mut data[4..8], self.slice_pos);
        NativeEndian::write_u32(&mut data[8..12], self.type_);
        NativeEndian::write_u16(&mut data[12..14], self.width);
        NativeEndian::write_u16(&mut data[14..16], self.height);
        NativeEndian::write_u32(&mut data[16..20], self.picture_coding_type);
        data[20..22].copy_from_slice(&self.f_code[0]);
        data[22..24].copy_from_slice(&self.f_code[1]);
        data[24..34].copy_from_slice(&[
            self.intra_dc_precision,
            self.picture_structure,
            self.top_field_first,
            self.frame_pred_frame_dct,
            self.concealment_motion_vectors,
            self.q_scale_type,
            self.intra_vlc_format,
            self.alternate_scan,
            self.backward_index,
            self.forward_index,
        ]);
        data
    }
}

/// MPEG-2 frame header, built up over the picture parameters and slices of a picture.
#[derive(Debug, Default)]
pub struct V4l2CtrlMpeg2FrameHdr {
    handle: v4l2_ctrl_mpeg2_frame_hdr,
}

impl V4l2CtrlMpeg2FrameHdr {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn set_picture_params(&mut self, params: &PictureParameterBufferMpeg2) -> &mut Self {
        let ext = &params.picture_coding_extension;

        self.handle.width = params.horizontal_size;
        self.handle.height = params.vertical_size;
        self.handle.picture_coding_type = params.picture_coding_type as u32;
        self.handle.f_code = params.f_codes();
        self.handle.intra_dc_precision = ext.intra_dc_precision();
        self.handle.picture_structure = ext.picture_structure();
        self.handle.top_field_first = ext.top_field_first();
        self.handle.frame_pred_frame_dct = ext.frame_pred_frame_dct();
        self.handle.concealment_motion_vectors = ext.concealment_motion_vectors();
        self.handle.q_scale_type = ext.q_scale_type();
        self.handle.intra_vlc_format = ext.intra_vlc_format();
        self.handle.alternate_scan = ext.alternate_scan();
        self
    }

    /// Sets the CAPTURE buffers holding the forward and backward reference frames.
    pub fn set_references(&mut self, forward_index: u8, backward_index: u8) -> &mut Self {
        self.handle.forward_index = forward_index;
        self.handle.backward_index = backward_index;
        self
    }

    /// Describes a slice payload spanning a whole OUTPUT buffer of `len` bytes.
    pub fn set_slice(&mut self, len: u32) -> &mut Self {
        self.handle.slice_pos = 0;
        self.handle.slice_len = len;
        self.handle.type_ = MPEG2;
        self
    }

    pub fn handle(&self) -> &v4l2_ctrl_mpeg2_frame_hdr {
        &self.handle
    }
}

impl From<&V4l2CtrlMpeg2FrameHdr> for ExtControl {
    fn from(hdr: &V4l2CtrlMpeg2FrameHdr) -> Self {
        ExtControl {
            id: V4L2_CID_MPEG_VIDEO_MPEG2_FRAME_HDR,
            payload: hdr.handle.to_bytes().to_vec(),
        }
    }
}
