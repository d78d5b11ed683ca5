// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Decode configurations and driver settings.

use std::path::PathBuf;

use enumn::N;

use crate::driver::DriverError;
use crate::driver::DriverResult;
use crate::Fourcc;

/// Maximum number of attributes a [`Config`] can hold.
pub const MAX_CONFIG_ATTRIBUTES: usize = 10;

/// Render target format for 4:2:0 planar surfaces.
pub const RT_FORMAT_YUV420: u32 = 0x0000_0001;

/// Value returned for attributes the driver does not know about.
pub const ATTRIB_NOT_SUPPORTED: u32 = 0x8000_0000;

/// Codec profiles, numbered like the VA profile enumeration.
#[derive(N, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Profile {
    None = -1,
    Mpeg2Simple = 0,
    Mpeg2Main = 1,
    Mpeg4Simple = 2,
    Mpeg4AdvancedSimple = 3,
    Mpeg4Main = 4,
    H264Baseline = 5,
    H264Main = 6,
    H264High = 7,
    Vc1Simple = 8,
    Vc1Main = 9,
    Vc1Advanced = 10,
    H263Baseline = 11,
    JpegBaseline = 12,
    H264ConstrainedBaseline = 13,
    Vp8Version0_3 = 14,
    HevcMain = 17,
    HevcMain10 = 18,
    Vp9Profile0 = 19,
}

/// Profiles supported by the driver, in the order they are reported.
const SUPPORTED_PROFILES: [Profile; 8] = [
    Profile::Mpeg2Simple,
    Profile::Mpeg2Main,
    Profile::Mpeg4Simple,
    Profile::Mpeg4AdvancedSimple,
    Profile::Mpeg4Main,
    Profile::H264Baseline,
    Profile::H264Main,
    Profile::H264High,
];

/// Entrypoints, numbered like the VA entrypoint enumeration.
#[derive(N, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Entrypoint {
    Vld = 1,
    Izz = 2,
    Idct = 3,
    MoComp = 4,
    Deblocking = 5,
    EncSlice = 6,
    EncPicture = 7,
    VideoProc = 10,
}

/// The coded formats the device can decode. Each supported [`Profile`] maps to one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    Mpeg2,
    Mpeg4,
    H264,
}

impl CodecKind {
    /// Fourcc of the coded frame format accepted by the device's output queue.
    pub fn fourcc(&self) -> Fourcc {
        match self {
            CodecKind::Mpeg2 => Fourcc::from(b"MG2F"),
            CodecKind::Mpeg4 => Fourcc::from(b"MG4F"),
            CodecKind::H264 => Fourcc::from(b"H26F"),
        }
    }
}

impl Profile {
    /// Returns the coded format of this profile, or `None` if the driver does not support it.
    pub fn codec(&self) -> Option<CodecKind> {
        match self {
            Profile::Mpeg2Simple | Profile::Mpeg2Main => Some(CodecKind::Mpeg2),
            Profile::Mpeg4Simple | Profile::Mpeg4AdvancedSimple | Profile::Mpeg4Main => {
                Some(CodecKind::Mpeg4)
            }
            Profile::H264Baseline | Profile::H264Main | Profile::H264High => {
                Some(CodecKind::H264)
            }
            _ => None,
        }
    }

    /// Returns the entrypoints available for this profile.
    pub fn entrypoints(&self) -> &'static [Entrypoint] {
        match self.codec() {
            Some(CodecKind::Mpeg2) => &[Entrypoint::Vld, Entrypoint::MoComp],
            Some(CodecKind::Mpeg4) | Some(CodecKind::H264) => &[Entrypoint::Vld],
            None => &[],
        }
    }
}

/// Config attribute types, numbered like the VA attribute enumeration.
#[derive(N, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ConfigAttribType {
    RtFormat = 0,
    SpatialResidual = 1,
    SpatialClipping = 2,
    IntraResidual = 3,
    Encryption = 4,
    RateControl = 5,
    DecSliceMode = 6,
    EncPackedHeaders = 10,
    EncInterlaced = 11,
    EncMaxRefFrames = 13,
    EncMaxSlices = 14,
    EncSliceStructure = 15,
    EncMacroblockInfo = 16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigAttrib {
    pub type_: ConfigAttribType,
    pub value: u32,
}

impl ConfigAttrib {
    pub fn new(type_: ConfigAttribType, value: u32) -> Self {
        Self { type_, value }
    }
}

/// A validated decoding configuration.
#[derive(Debug, Clone)]
pub struct Config {
    profile: Profile,
    entrypoint: Entrypoint,
    codec: CodecKind,
    attribs: Vec<ConfigAttrib>,
}

impl Config {
    /// Validates `profile` and `entrypoint` and builds a config with the default attributes
    /// overridden by `attribs`.
    pub fn new(
        profile: Profile,
        entrypoint: Entrypoint,
        attribs: &[ConfigAttrib],
    ) -> DriverResult<Self> {
        let codec = profile.codec().ok_or(DriverError::UnsupportedProfile)?;
        if !profile.entrypoints().contains(&entrypoint) {
            return Err(DriverError::UnsupportedEntrypoint);
        }

        let mut config = Self {
            profile,
            entrypoint,
            codec,
            attribs: Vec::with_capacity(MAX_CONFIG_ATTRIBUTES),
        };
        config.attribs.push(ConfigAttrib::new(
            ConfigAttribType::RtFormat,
            RT_FORMAT_YUV420,
        ));
        for attrib in attribs {
            config.update_attribute(attrib)?;
        }

        Ok(config)
    }

    /// Overwrites the attribute with the same type as `attrib`, or appends it.
    fn update_attribute(&mut self, attrib: &ConfigAttrib) -> DriverResult<()> {
        if let Some(existing) = self.attribs.iter_mut().find(|a| a.type_ == attrib.type_) {
            existing.value = attrib.value;
            return Ok(());
        }

        if self.attribs.len() >= MAX_CONFIG_ATTRIBUTES {
            return Err(DriverError::MaxAttributesExceeded);
        }
        self.attribs.push(*attrib);

        Ok(())
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    pub fn entrypoint(&self) -> Entrypoint {
        self.entrypoint
    }

    pub fn attribs(&self) -> &[ConfigAttrib] {
        &self.attribs
    }

    pub fn codec(&self) -> CodecKind {
        self.codec
    }
}

/// Returns the profiles supported by the driver.
pub fn supported_profiles() -> &'static [Profile] {
    &SUPPORTED_PROFILES
}

/// Fills the value of each of `attribs` with what the driver supports for
/// `profile`/`entrypoint`.
pub fn get_config_attributes(
    profile: Profile,
    entrypoint: Entrypoint,
    attribs: &mut [ConfigAttrib],
) -> DriverResult<()> {
    if profile.codec().is_none() {
        return Err(DriverError::UnsupportedProfile);
    }
    if !profile.entrypoints().contains(&entrypoint) {
        return Err(DriverError::UnsupportedEntrypoint);
    }

    for attrib in attribs {
        attrib.value = match attrib.type_ {
            ConfigAttribType::RtFormat => RT_FORMAT_YUV420,
            _ => ATTRIB_NOT_SUPPORTED,
        };
    }

    Ok(())
}

/// Session-wide settings of the driver.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Path to the memory-to-memory video device node.
    pub device_path: PathBuf,
    /// Number of input buffers each decode context allocates on the device.
    pub ring_size: u32,
    /// Size of each input buffer, i.e. the largest coded picture that can be submitted.
    pub input_buffer_max_size: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            device_path: PathBuf::from("/dev/video0"),
            ring_size: 4,
            input_buffer_max_size: 131072,
        }
    }
}

impl DriverConfig {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn device_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.device_path = path.into();
        self
    }

    pub fn ring_size(mut self, ring_size: u32) -> Self {
        self.ring_size = ring_size.max(1);
        self
    }

    pub fn input_buffer_max_size(mut self, size: u32) -> Self {
        self.input_buffer_max_size = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legality_table() {
        assert!(Config::new(Profile::Mpeg2Simple, Entrypoint::MoComp, &[]).is_ok());
        assert!(Config::new(Profile::Mpeg4AdvancedSimple, Entrypoint::Vld, &[]).is_ok());
        assert!(Config::new(Profile::H264High, Entrypoint::Vld, &[]).is_ok());

        assert!(matches!(
            Config::new(Profile::Mpeg4Main, Entrypoint::MoComp, &[]),
            Err(DriverError::UnsupportedEntrypoint)
        ));
        assert!(matches!(
            Config::new(Profile::H264Main, Entrypoint::EncSlice, &[]),
            Err(DriverError::UnsupportedEntrypoint)
        ));
        assert!(matches!(
            Config::new(Profile::Vp8Version0_3, Entrypoint::Vld, &[]),
            Err(DriverError::UnsupportedProfile)
        ));
    }

    #[test]
    fn default_attributes() {
        let config = Config::new(Profile::Mpeg2Main, Entrypoint::Vld, &[]).unwrap();
        assert_eq!(
            config.attribs(),
            &[ConfigAttrib::new(ConfigAttribType::RtFormat, RT_FORMAT_YUV420)]
        );
        assert_eq!(config.codec(), CodecKind::Mpeg2);
    }

    #[test]
    fn attribute_merge() {
        let config = Config::new(
            Profile::Mpeg2Main,
            Entrypoint::Vld,
            &[
                ConfigAttrib::new(ConfigAttribType::DecSliceMode, 1),
                ConfigAttrib::new(ConfigAttribType::RtFormat, 4),
                ConfigAttrib::new(ConfigAttribType::DecSliceMode, 2),
            ],
        )
        .unwrap();

        assert_eq!(
            config.attribs(),
            &[
                ConfigAttrib::new(ConfigAttribType::RtFormat, 4),
                ConfigAttrib::new(ConfigAttribType::DecSliceMode, 2),
            ]
        );
    }

    #[test]
    fn attribute_capacity() {
        let mut config = Config::new(Profile::Mpeg2Main, Entrypoint::Vld, &[]).unwrap();
        while config.attribs.len() < MAX_CONFIG_ATTRIBUTES {
            config
                .attribs
                .push(ConfigAttrib::new(ConfigAttribType::SpatialResidual, 0));
        }

        // Known types are still overwritten in place when full.
        config
            .update_attribute(&ConfigAttrib::new(ConfigAttribType::RtFormat, 7))
            .unwrap();
        assert_eq!(config.attribs()[0].value, 7);

        assert!(matches!(
            config.update_attribute(&ConfigAttrib::new(ConfigAttribType::DecSliceMode, 1)),
            Err(DriverError::MaxAttributesExceeded)
        ));
        assert_eq!(config.attribs().len(), MAX_CONFIG_ATTRIBUTES);
    }

    #[test]
    fn entrypoint_queries() {
        assert_eq!(supported_profiles().len(), 8);
        assert_eq!(
            Profile::Mpeg2Main.entrypoints(),
            &[Entrypoint::Vld, Entrypoint::MoComp]
        );
        assert_eq!(Profile::H264Baseline.entrypoints(), &[Entrypoint::Vld]);
        assert!(Profile::JpegBaseline.entrypoints().is_empty());
        assert_eq!(Profile::n(4), Some(Profile::Mpeg4Main));
        assert_eq!(Entrypoint::n(4), Some(Entrypoint::MoComp));
    }

    #[test]
    fn attribute_query() {
        let mut attribs = [
            ConfigAttrib::new(ConfigAttribType::RtFormat, 0),
            ConfigAttrib::new(ConfigAttribType::RateControl, 0),
        ];
        get_config_attributes(Profile::Mpeg4Simple, Entrypoint::Vld, &mut attribs).unwrap();
        assert_eq!(attribs[0].value, RT_FORMAT_YUV420);
        assert_eq!(attribs[1].value, ATTRIB_NOT_SUPPORTED);
    }

    #[test]
    fn driver_config() {
        let config = DriverConfig::new()
            .device_path("/dev/video3")
            .ring_size(0)
            .input_buffer_max_size(1 << 20);
        assert_eq!(config.device_path, PathBuf::from("/dev/video3"));
        assert_eq!(config.ring_size, 1);
        assert_eq!(config.input_buffer_max_size, 1 << 20);
        assert_eq!(DriverConfig::default().ring_size, 4);
    }
}
