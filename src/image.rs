// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! CPU-readable images of decoded surfaces.

use crate::align_up;
use crate::object_heap::ObjectId;
use crate::object_heap::INVALID_ID;
use crate::Fourcc;
use crate::Resolution;

/// Byte order of image formats whose samples are stored least significant byte first.
pub const LSB_FIRST: u32 = 1;

/// Alignment of the line pitch of images, in bytes.
const PITCH_ALIGNMENT: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageFormat {
    pub fourcc: Fourcc,
    pub byte_order: u32,
    pub bits_per_pixel: u32,
}

impl ImageFormat {
    pub fn nv12() -> Self {
        Self {
            fourcc: Fourcc::from(b"NV12"),
            byte_order: LSB_FIRST,
            bits_per_pixel: 12,
        }
    }
}

/// A rectangle of a surface or image, in pixels.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Layout of an image, as reported to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub id: ObjectId,
    pub format: ImageFormat,
    /// Buffer holding the pixel data.
    pub buf: ObjectId,
    pub width: u32,
    pub height: u32,
    pub data_size: u32,
    pub num_planes: u32,
    pub pitches: [u32; 3],
    pub offsets: [u32; 3],
}

impl Image {
    /// Computes the layout of an NV12 image of `resolution`: a luma plane followed by an
    /// interleaved chroma plane of half the height, both with a pitch aligned to 32 bytes.
    ///
    /// Returns `None` if the size of the image does not fit in 32 bits.
    pub fn nv12(resolution: Resolution) -> Option<Self> {
        let pitch = u32::try_from(align_up(resolution.width as usize, PITCH_ALIGNMENT)).ok()?;
        let luma_size = pitch.checked_mul(resolution.height)?;
        let chroma_size = pitch.checked_mul(resolution.height / 2 + resolution.height % 2)?;

        Some(Self {
            id: INVALID_ID,
            format: ImageFormat::nv12(),
            buf: INVALID_ID,
            width: resolution.width,
            height: resolution.height,
            data_size: luma_size.checked_add(chroma_size)?,
            num_planes: 2,
            pitches: [pitch, pitch, 0],
            offsets: [0, luma_size, 0],
        })
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::from((self.width, self.height))
    }

    /// Splits `data`, the content of the image buffer, into its luma and chroma planes.
    pub fn planes_mut<'a>(&self, data: &'a mut [u8]) -> Option<(&'a mut [u8], &'a mut [u8])> {
        let chroma_offset = self.offsets[1] as usize;
        let data = data.get_mut(..self.data_size as usize)?;
        if chroma_offset > data.len() {
            return None;
        }

        Some(data.split_at_mut(chroma_offset))
    }
}

/// Converts a plane from the layout produced by the device into a linear layout.
pub trait PlaneConverter {
    /// Writes the `width` x `height` bytes plane `src` into `dst`, whose lines are `dst_pitch`
    /// bytes apart.
    fn convert(&self, src: &[u8], dst: &mut [u8], dst_pitch: usize, width: usize, height: usize);
}

/// Size of the side of a tile, in bytes.
const TILE_SIZE: usize = 32;

/// Converter for planes stored as 32x32 tiles laid out in raster order, which is the native
/// layout of the sunxi video engine.
///
/// Lines of a tiled plane are padded to a multiple of 32 bytes, so the source is laid out as
/// rows of `align_up(width, 32) / 32` tiles of 1024 bytes each.
#[derive(Debug, Default, Clone, Copy)]
pub struct Mb32TiledConverter;

impl PlaneConverter for Mb32TiledConverter {
    fn convert(&self, src: &[u8], dst: &mut [u8], dst_pitch: usize, width: usize, height: usize) {
        if dst_pitch == 0 {
            return;
        }

        let tiles_per_row = align_up(width, TILE_SIZE) / TILE_SIZE;
        let tile_row_size = tiles_per_row * TILE_SIZE * TILE_SIZE;

        for (y, line) in dst.chunks_mut(dst_pitch).take(height).enumerate() {
            let tile_row = (y / TILE_SIZE) * tile_row_size + (y % TILE_SIZE) * TILE_SIZE;
            let len = width.min(line.len());
            let line = &mut line[..len];

            for (tile, chunk) in line.chunks_mut(TILE_SIZE).enumerate() {
                let offset = tile_row + tile * TILE_SIZE * TILE_SIZE;
                match src.get(offset..offset + chunk.len()) {
                    Some(samples) => chunk.copy_from_slice(samples),
                    None => chunk.fill(0),
                }
            }
        }
    }
}

/// Converter for planes already in a linear layout with lines `align_up(width, 32)` bytes
/// apart.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinearConverter;

impl PlaneConverter for LinearConverter {
    fn convert(&self, src: &[u8], dst: &mut [u8], dst_pitch: usize, width: usize, height: usize) {
        let src_pitch = align_up(width, TILE_SIZE);
        if src_pitch == 0 || dst_pitch == 0 {
            return;
        }

        for (src_line, dst_line) in src
            .chunks(src_pitch)
            .zip(dst.chunks_mut(dst_pitch))
            .take(height)
        {
            let len = width.min(src_line.len()).min(dst_line.len());
            dst_line[..len].copy_from_slice(&src_line[..len]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv12_layout() {
        let image = Image::nv12(Resolution::from((1920, 1080))).unwrap();
        assert_eq!(image.pitches[..2], [1920, 1920]);
        assert_eq!(image.offsets[1], 1920 * 1080);
        assert_eq!(image.data_size, 1920 * 1080 * 3 / 2);
        assert_eq!(image.format.fourcc, Fourcc::from(b"NV12"));

        // Pitch is aligned and odd heights round the chroma plane up.
        let image = Image::nv12(Resolution::from((100, 51))).unwrap();
        assert_eq!(image.pitches[0], 128);
        assert_eq!(image.offsets[1], 128 * 51);
        assert_eq!(image.data_size, 128 * 51 + 128 * 26);

        let mut data = vec![0u8; image.data_size as usize + 10];
        let (luma, chroma) = image.planes_mut(&mut data).unwrap();
        assert_eq!(luma.len(), 128 * 51);
        assert_eq!(chroma.len(), 128 * 26);
        assert!(image.planes_mut(&mut [0u8; 16]).is_none());

        assert!(Image::nv12(Resolution::from((70000, 70000))).is_none());
        assert!(Image::nv12(Resolution::from((u32::MAX, 2))).is_none());
    }

    /// Builds a tiled plane where each sample encodes its linear position.
    fn tiled_plane(width: usize, height: usize) -> Vec<u8> {
        let tiles_per_row = align_up(width, TILE_SIZE) / TILE_SIZE;
        let tile_rows = align_up(height, TILE_SIZE) / TILE_SIZE;
        let mut plane = vec![0u8; tiles_per_row * tile_rows * TILE_SIZE * TILE_SIZE];

        for y in 0..height {
            for x in 0..width {
                let tile = (y / TILE_SIZE) * tiles_per_row + x / TILE_SIZE;
                let offset =
                    tile * TILE_SIZE * TILE_SIZE + (y % TILE_SIZE) * TILE_SIZE + x % TILE_SIZE;
                plane[offset] = (x * 3 + y * 7) as u8;
            }
        }

        plane
    }

    #[test]
    fn untile() {
        let (width, height) = (40, 36);
        let src = tiled_plane(width, height);
        let pitch = 64;
        let mut dst = vec![0xffu8; pitch * height];

        Mb32TiledConverter.convert(&src, &mut dst, pitch, width, height);

        for y in 0..height {
            for x in 0..width {
                assert_eq!(dst[y * pitch + x], (x * 3 + y * 7) as u8, "({}, {})", x, y);
            }
            // Padding of the destination lines is left alone.
            assert_eq!(dst[y * pitch + width], 0xff);
        }
    }

    #[test]
    fn untile_short_source() {
        let mut dst = vec![0xffu8; 64 * 2];
        Mb32TiledConverter.convert(&[7u8; 40], &mut dst, 64, 64, 2);

        assert_eq!(&dst[..32], &[7u8; 32]);
        // Second line of the first tile starts at byte 32, which is only partially present.
        assert_eq!(&dst[64..96], &[0u8; 32]);
    }

    #[test]
    fn empty_destination() {
        let mut dst = vec![];
        Mb32TiledConverter.convert(&[1u8; 64], &mut dst, 0, 0, 4);
        LinearConverter.convert(&[1u8; 64], &mut dst, 0, 0, 4);
        assert!(dst.is_empty());
    }

    #[test]
    fn linear_copy() {
        let src = (0..64u8).collect::<Vec<_>>();
        let mut dst = vec![0u8; 2 * 48];
        LinearConverter.convert(&src, &mut dst, 48, 20, 2);

        assert_eq!(&dst[..20], &src[..20]);
        assert_eq!(&dst[48..68], &src[32..52]);
        assert_eq!(dst[20], 0);
    }
}
