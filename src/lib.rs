// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A VA-style decode driver for memory-to-memory V4L2 codec devices.
//!
//! Clients drive decoding through the call-based API exposed by [`driver::Driver`]: they create
//! configs, surfaces, contexts and buffers, referring to each of them through opaque object
//! ids, and then submit each coded picture with the `begin_picture` / `render_picture` /
//! `end_picture` / `sync_surface` sequence. The driver translates these calls into the
//! buffer-queue protocol of the device, which is abstracted by the [`device::DecodeDevice`]
//! trait.

pub mod buffer;
pub mod codec;
pub mod config;
pub mod context;
pub mod device;
pub mod driver;
pub mod image;
pub mod object_heap;
pub mod picture;
pub mod surface;

#[cfg(feature = "v4l2")]
pub use v4l2r;

use std::fmt;
use std::fmt::Debug;
use std::fmt::Display;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl From<(u32, u32)> for Resolution {
    fn from(value: (u32, u32)) -> Self {
        Self {
            width: value.0,
            height: value.1,
        }
    }
}

impl From<Resolution> for (u32, u32) {
    fn from(value: Resolution) -> Self {
        (value.width, value.height)
    }
}

/// A FourCC code, as used by V4L2 to identify pixel and coded formats.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Fourcc(u32);

impl From<u32> for Fourcc {
    fn from(fourcc: u32) -> Self {
        Self(fourcc)
    }
}

impl From<Fourcc> for u32 {
    fn from(fourcc: Fourcc) -> Self {
        fourcc.0
    }
}

impl From<&[u8; 4]> for Fourcc {
    fn from(n: &[u8; 4]) -> Self {
        Self(n[0] as u32 | (n[1] as u32) << 8 | (n[2] as u32) << 16 | (n[3] as u32) << 24)
    }
}

impl From<Fourcc> for [u8; 4] {
    fn from(n: Fourcc) -> Self {
        [n.0 as u8, (n.0 >> 8) as u8, (n.0 >> 16) as u8, (n.0 >> 24) as u8]
    }
}

impl Display for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c: [u8; 4] = (*self).into();

        f.write_fmt(format_args!(
            "{}{}{}{}",
            c[0] as char, c[1] as char, c[2] as char, c[3] as char
        ))
    }
}

impl Debug for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("0x{:08x} ({})", self.0, self))
    }
}

/// Aligns `value` up to the next multiple of `alignment`, which must be a power of two.
pub(crate) fn align_up(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourcc_string() {
        let fourcc = Fourcc::from(b"NM12");
        assert_eq!(fourcc.to_string(), "NM12");
        assert_eq!(u32::from(fourcc), 0x3231_4d4e);
        assert_eq!(<[u8; 4]>::from(fourcc), *b"NM12");
    }

    #[test]
    fn align() {
        assert_eq!(align_up(0, 32), 0);
        assert_eq!(align_up(1, 32), 32);
        assert_eq!(align_up(1920, 32), 1920);
        assert_eq!(align_up(1921, 32), 1952);
    }
}
