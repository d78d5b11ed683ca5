// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Translation of client parameter buffers into device frame headers.
//!
//! Each decode context carries one [`FrameHeaderBuilder`], selected from the codec of its
//! config. Picture and slice parameters are accumulated into it while a picture is rendered,
//! and the resulting frame header is sent along with every slice submitted to the device.

use crate::codec::h264::PictureParameterBufferH264;
use crate::codec::mpeg2::PictureParameterBufferMpeg2;
use crate::codec::mpeg4::PictureParameterBufferMpeg4;
use crate::codec::mpeg4::SliceParameterBufferMpeg4;
use crate::codec::ParseError;
use crate::config::CodecKind;
use crate::device::controls::mpeg2::V4l2CtrlMpeg2FrameHdr;
use crate::device::controls::mpeg4::V4l2CtrlMpeg4FrameHdr;
use crate::device::controls::ExtControl;
use crate::object_heap::ObjectId;
use crate::object_heap::INVALID_ID;

/// Resolves reference pictures to the CAPTURE buffer they were decoded into.
pub trait ReferenceResolver {
    /// Returns the CAPTURE buffer index of the surface `id`, or `None` if `id` is not a live
    /// surface.
    fn output_slot(&self, id: ObjectId) -> Option<u32>;
}

impl<F> ReferenceResolver for F
where
    F: Fn(ObjectId) -> Option<u32>,
{
    fn output_slot(&self, id: ObjectId) -> Option<u32> {
        self(id)
    }
}

/// Returns the CAPTURE buffer index of reference `id`. Unknown references fall back to
/// `own_slot`, the buffer the current picture is decoded into.
fn resolve_reference<R: ReferenceResolver>(resolver: &R, id: ObjectId, own_slot: u32) -> u8 {
    let slot = match resolver.output_slot(id) {
        Some(slot) => slot,
        None => {
            if id != INVALID_ID {
                log::warn!(
                    "reference surface {:#010x} does not exist, using the current picture",
                    id
                );
            }
            own_slot
        }
    };

    slot as u8
}

/// Per-codec frame header of a decode context.
pub enum FrameHeaderBuilder {
    Mpeg2(V4l2CtrlMpeg2FrameHdr),
    Mpeg4(V4l2CtrlMpeg4FrameHdr),
    H264,
}

impl FrameHeaderBuilder {
    pub fn new(codec: CodecKind) -> Self {
        match codec {
            CodecKind::Mpeg2 => FrameHeaderBuilder::Mpeg2(V4l2CtrlMpeg2FrameHdr::new()),
            CodecKind::Mpeg4 => FrameHeaderBuilder::Mpeg4(V4l2CtrlMpeg4FrameHdr::new()),
            CodecKind::H264 => FrameHeaderBuilder::H264,
        }
    }

    pub fn codec(&self) -> CodecKind {
        match self {
            FrameHeaderBuilder::Mpeg2(_) => CodecKind::Mpeg2,
            FrameHeaderBuilder::Mpeg4(_) => CodecKind::Mpeg4,
            FrameHeaderBuilder::H264 => CodecKind::H264,
        }
    }

    /// Updates the header from a picture parameter buffer. `own_slot` is the CAPTURE buffer
    /// index of the picture being decoded.
    pub fn translate_picture_params<R: ReferenceResolver>(
        &mut self,
        data: &[u8],
        resolver: &R,
        own_slot: u32,
    ) -> Result<(), ParseError> {
        match self {
            FrameHeaderBuilder::Mpeg2(hdr) => {
                let params = PictureParameterBufferMpeg2::parse(data)?;
                let forward =
                    resolve_reference(resolver, params.forward_reference_picture, own_slot);
                let backward =
                    resolve_reference(resolver, params.backward_reference_picture, own_slot);
                hdr.set_picture_params(&params)
                    .set_references(forward, backward);
            }
            FrameHeaderBuilder::Mpeg4(hdr) => {
                let params = PictureParameterBufferMpeg4::parse(data)?;
                let forward =
                    resolve_reference(resolver, params.forward_reference_picture, own_slot);
                let backward =
                    resolve_reference(resolver, params.backward_reference_picture, own_slot);
                hdr.set_picture_params(&params)
                    .set_references(forward, backward);
            }
            FrameHeaderBuilder::H264 => match PictureParameterBufferH264::parse(data) {
                Ok(params) => log::debug!(
                    "H.264 picture parameters ignored (coded size {:?})",
                    params.coded_resolution()
                ),
                Err(e) => log::debug!("H.264 picture parameters ignored: {}", e),
            },
        }

        Ok(())
    }

    /// Updates the header from a slice parameter buffer.
    pub fn translate_slice_params(&mut self, data: &[u8]) -> Result<(), ParseError> {
        if let FrameHeaderBuilder::Mpeg4(hdr) = self {
            let params = SliceParameterBufferMpeg4::parse(data)?;
            hdr.set_slice_params(&params);
        }

        Ok(())
    }

    /// Finalizes the header for a slice payload of `len` bytes and returns the control to send
    /// along with it, or `None` if the codec does not submit slices to the device.
    pub fn translate_slice(&mut self, len: u32) -> Option<ExtControl> {
        match self {
            FrameHeaderBuilder::Mpeg2(hdr) => Some(ExtControl::from(&*hdr.set_slice(len))),
            FrameHeaderBuilder::Mpeg4(hdr) => Some(ExtControl::from(&*hdr)),
            FrameHeaderBuilder::H264 => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::codec::mpeg2::PictureCodingExtension;

    #[test]
    fn mpeg2_references() {
        let slots: HashMap<ObjectId, u32> =
            HashMap::from([(0x0400_0000, 2), (0x0400_0001, 3)]);
        let surfaces = |id: ObjectId| -> Option<u32> { slots.get(&id).copied() };
        let mut builder = FrameHeaderBuilder::new(CodecKind::Mpeg2);

        let params = PictureParameterBufferMpeg2 {
            horizontal_size: 64,
            vertical_size: 32,
            forward_reference_picture: 0x0400_0001,
            backward_reference_picture: 0x0400_0000,
            picture_coding_type: 3,
            picture_coding_extension: PictureCodingExtension(0),
            ..Default::default()
        };
        builder
            .translate_picture_params(&params.to_bytes(), &surfaces, 1)
            .unwrap();
        match &builder {
            FrameHeaderBuilder::Mpeg2(hdr) => {
                assert_eq!(hdr.handle().forward_index, 3);
                assert_eq!(hdr.handle().backward_index, 2);
            }
            _ => panic!("wrong codec"),
        }

        // Unknown references point to the picture itself.
        let params = PictureParameterBufferMpeg2 {
            forward_reference_picture: 0x0400_0009,
            backward_reference_picture: INVALID_ID,
            ..params
        };
        builder
            .translate_picture_params(&params.to_bytes(), &surfaces, 1)
            .unwrap();
        match &builder {
            FrameHeaderBuilder::Mpeg2(hdr) => {
                assert_eq!(hdr.handle().forward_index, 1);
                assert_eq!(hdr.handle().backward_index, 1);
            }
            _ => panic!("wrong codec"),
        }

        let control = builder.translate_slice(512).unwrap();
        assert_eq!(control.payload.len(), 36);
        assert_eq!(&control.payload[0..4], &512u32.to_ne_bytes());
    }

    #[test]
    fn mpeg4_slice_params() {
        let resolver = |_: ObjectId| -> Option<u32> { None };
        let mut builder = FrameHeaderBuilder::new(CodecKind::Mpeg4);

        let slice = SliceParameterBufferMpeg4 {
            slice_data_size: 100,
            slice_data_offset: 4,
            ..Default::default()
        };
        builder.translate_slice_params(&slice.to_bytes()).unwrap();
        builder
            .translate_picture_params(
                &PictureParameterBufferMpeg4::default().to_bytes(),
                &resolver,
                2,
            )
            .unwrap();

        // The slice length comes from the slice parameters, not from the payload size.
        let control = builder.translate_slice(4096).unwrap();
        assert_eq!(&control.payload[0..4], &4u32.to_ne_bytes());
        assert_eq!(&control.payload[4..8], &100u32.to_ne_bytes());
        assert_eq!(&control.payload[30..32], &[2, 2]);
    }

    #[test]
    fn h264_accepts_and_submits_nothing() {
        let resolver = |_: ObjectId| -> Option<u32> { None };
        let mut builder = FrameHeaderBuilder::new(CodecKind::H264);

        builder
            .translate_picture_params(&[0u8; 700], &resolver, 0)
            .unwrap();
        // Short or empty buffers are accepted too.
        builder
            .translate_picture_params(&[0u8; 8], &resolver, 0)
            .unwrap();
        builder.translate_picture_params(&[], &resolver, 0).unwrap();
        builder.translate_slice_params(&[]).unwrap();
        assert_eq!(builder.translate_slice(100), None);
        assert_eq!(builder.codec(), CodecKind::H264);
    }

    #[test]
    fn malformed_parameters() {
        let resolver = |_: ObjectId| -> Option<u32> { None };
        let mut builder = FrameHeaderBuilder::new(CodecKind::Mpeg4);
        assert!(builder
            .translate_picture_params(&[0u8; 10], &resolver, 0)
            .is_err());
        assert!(builder.translate_slice_params(&[0u8; 10]).is_err());
    }
}
