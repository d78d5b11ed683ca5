// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! cedrus-vainfo, a program listing the decoding capabilities exposed by the driver for a video
//! device.

use std::path::PathBuf;

use anyhow::Context;
use argh::FromArgs;

use cedrus_va::config::ConfigAttrib;
use cedrus_va::config::ConfigAttribType;
use cedrus_va::config::DriverConfig;
use cedrus_va::driver::Driver;

/// List the profiles, entrypoints and image formats supported through a cedrus video device.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the video device node
    #[argh(option, default = "PathBuf::from(\"/dev/video0\")")]
    device: PathBuf,

    /// also create a config for each supported profile
    #[argh(switch)]
    create_configs: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Args = argh::from_env();

    let config = DriverConfig::new().device_path(&args.device);
    let mut driver = Driver::open(config)
        .with_context(|| format!("failed to open driver on {}", args.device.display()))?;

    println!("vendor: {}", driver.vendor());
    for profile in driver.query_config_profiles() {
        for entrypoint in driver.query_config_entrypoints(profile) {
            let mut attribs = [ConfigAttrib::new(ConfigAttribType::RtFormat, 0)];
            driver
                .get_config_attributes(profile, entrypoint, &mut attribs)
                .with_context(|| format!("failed to query attributes of {:?}", profile))?;
            println!(
                "{:?}/{:?}: rt_format={:#x}",
                profile, entrypoint, attribs[0].value
            );

            if args.create_configs {
                let id = driver
                    .create_config(profile, entrypoint, &[])
                    .with_context(|| format!("failed to create config for {:?}", profile))?;
                println!("  config {:#010x}", id);
                driver.destroy_config(id)?;
            }
        }
    }

    for format in driver.query_image_formats() {
        println!(
            "image format: {} ({} bpp)",
            format.fourcc, format.bits_per_pixel
        );
    }

    driver.terminate();

    Ok(())
}
