// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Frame header controls of the cedrus decoder.

pub mod mpeg2;
pub mod mpeg4;

/// Base of the codec control class.
const V4L2_CID_MPEG_BASE: u32 = 0x0099_0900;

pub const V4L2_CID_MPEG_VIDEO_MPEG2_FRAME_HDR: u32 = V4L2_CID_MPEG_BASE + 450;
pub const V4L2_CID_MPEG_VIDEO_MPEG4_FRAME_HDR: u32 = V4L2_CID_MPEG_BASE + 451;

/// An extended control ready to be written to the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtControl {
    pub id: u32,
    pub payload: Vec<u8>,
}
