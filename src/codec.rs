// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Layouts of the parameter buffers clients submit for each codec.
//!
//! Parameter buffers carry the VA structures verbatim, in native byte order. Only the fields
//! the device consumes are decoded; everything else is skipped over.

pub mod h264;
pub mod mpeg2;
pub mod mpeg4;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("{name} is {len} bytes long but at least {min} bytes are required")]
    TooShort {
        name: &'static str,
        len: usize,
        min: usize,
    },
}

fn check_len(name: &'static str, data: &[u8], min: usize) -> Result<(), ParseError> {
    if data.len() < min {
        return Err(ParseError::TooShort {
            name,
            len: data.len(),
            min,
        });
    }

    Ok(())
}

/// Extracts the `width` bits starting at bit `shift` of a C bitfield word.
fn bits(value: u32, shift: u32, width: u32) -> u8 {
    ((value >> shift) & ((1 << width) - 1)) as u8
}
