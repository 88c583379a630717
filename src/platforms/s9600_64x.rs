// Copyright 2023 Turing Machines
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
use super::Platform;
use crate::app::bring_up::{BringUp, ClientAttr, I2cDevice, PlatformInfo};
use crate::app::eeprom::{port_range, PortLabels};
use crate::app::error::BringUpError;
use crate::app::gpio::{Direction, GpioLayout, GpioNumbering};
use crate::app::rov::{RegWidth, RovRail, TOMAHAWK_VID};
use anyhow::Context;
use async_trait::async_trait;
use tracing::{info, warn};

pub static INFO: PlatformInfo = PlatformInfo {
    platform: "x86-64-ufispace-s9600-64x-r0",
    model: "S9600-64X",
    sys_object_id: ".9600.64",
    port_count: 64,
    port_config: "64x100",
    lpc: Some("/sys/devices/platform/x86_64_ufispace_s9600_64x_lpc"),
};

const MUXES: [I2cDevice; 12] = [
    I2cDevice::new("pca9548", 0x75, 0),
    I2cDevice::new("pca9548", 0x73, 0),
    I2cDevice::new("pca9548", 0x72, 0),
    I2cDevice::new("pca9546", 0x71, 17),
    I2cDevice::new("pca9548", 0x76, 17),
    I2cDevice::new("pca9548", 0x76, 18),
    I2cDevice::new("pca9548", 0x76, 19),
    I2cDevice::new("pca9548", 0x76, 20),
    I2cDevice::new("pca9548", 0x76, 21),
    I2cDevice::new("pca9548", 0x76, 22),
    I2cDevice::new("pca9548", 0x76, 23),
    I2cDevice::new("pca9548", 0x76, 24),
];

const CPLDS: [I2cDevice; 5] = [
    I2cDevice::new("s9600_64x_cpld1", 0x30, 1),
    I2cDevice::new("s9600_64x_cpld2", 0x31, 1),
    I2cDevice::new("s9600_64x_cpld3", 0x32, 1),
    I2cDevice::new("s9600_64x_cpld4", 0x33, 1),
    I2cDevice::new("s9600_64x_cpld5", 0x34, 1),
];

const MAC_ROV: ClientAttr = ClientAttr::new(1, 0x30, "cpld_mac_rov");

/// One regulator per MAC core, both VIDs packed in one strap register.
const ROV_RAILS: [RovRail; 2] = [
    RovRail {
        source: MAC_ROV,
        shift: 0,
        mask: 0b111,
        bus: 10,
        addr: 0x76,
        width: RegWidth::Byte,
    },
    RovRail {
        source: MAC_ROV,
        shift: 3,
        mask: 0b111,
        bus: 11,
        addr: 0x76,
        width: RegWidth::Byte,
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Build {
    Alpha,
    BetaOrLater,
}

impl Build {
    fn from_hw_build_id(id: u32) -> Option<Self> {
        match id {
            0 => None,
            1 => Some(Build::Alpha),
            _ => Some(Build::BetaOrLater),
        }
    }
}

pub struct Board;

impl Board {
    async fn build(&self, ctx: &BringUp) -> Option<Build> {
        match ctx.packed_board_id("board_id_1").await {
            Ok(id) => Build::from_hw_build_id(id.hw_build_id()),
            Err(e) => {
                warn!("Get board id from LPC failed: {}", e);
                None
            }
        }
    }

    async fn init_eeprom(&self, ctx: &BringUp, build: Build) -> anyhow::Result<()> {
        // the alpha build only wires two SFP+ cages
        let sfp_buses = match build {
            Build::Alpha => 25..27,
            Build::BetaOrLater => 25..29,
        };
        let ports = port_range(0, "QSFP", "sff8436", 29..93)
            .chain(port_range(64, "SFP", "optoe2", sfp_buses));
        ctx.init_port_eeproms(ports, PortLabels::Index).await?;
        Ok(())
    }

    async fn init_gpio(&self, ctx: &BringUp, build: Build) -> Result<(), BringUpError> {
        let mut expanders = vec![
            I2cDevice::new("pca9535", 0x77, 0), // CPU board
            I2cDevice::new("pca9535", 0x76, 6), // voltage margin
        ];
        let (lines, stage) = match build {
            Build::Alpha => {
                expanders.insert(0, I2cDevice::new("pca9535", 0x20, 3)); // board id
                (48, "Alpha")
            }
            Build::BetaOrLater => (32, "Beta and later"),
        };
        ctx.new_i2c_devices(&expanders).await;

        let layout = GpioLayout {
            offsets: 0..lines,
            default: Direction::In,
            overrides: &[],
        };
        ctx.gpio_apply(GpioNumbering::FromMax(511), &[layout])
            .await?;
        info!("{} GPIO init", stage);
        Ok(())
    }
}

#[async_trait]
impl Platform for Board {
    fn info(&self) -> &'static PlatformInfo {
        &INFO
    }

    async fn baseconfig(&self, ctx: &BringUp) -> anyhow::Result<()> {
        ctx.record_bmc_enable(true).await;

        ctx.golden_finger(0, 0x75, 0x1, &[0x30, 0x31]).await;

        ctx.insmod("x86-64-ufispace-s9600-64x-lpc").await?;

        ctx.new_i2c_devices(&MUXES).await;

        ctx.insmod("x86-64-ufispace-eeprom-mb").await?;
        ctx.insmod("optoe").await?;
        ctx.new_i2c_device(&I2cDevice::new("mb_eeprom", 0x57, 0))
            .await;

        ctx.insmod("x86-64-ufispace-s9600-64x-cpld").await?;
        ctx.new_i2c_devices(&CPLDS).await;

        if let Some(build) = self.build(ctx).await {
            self.init_eeprom(ctx, build).await?;
            self.init_gpio(ctx, build).await?;
            if build == Build::Alpha {
                ctx.new_i2c_device(&I2cDevice::new("tmp75", 0x4f, 0)).await;
            }
        }

        ctx.init_mac_rov(&TOMAHAWK_VID, &ROV_RAILS)
            .await
            .context("mac rov")?;

        ctx.insmod("x86-64-ufispace-s9600-64x-onie-syseeprom")
            .await?;

        ctx.enable_ipmi_maintenance_mode().await;
        Ok(())
    }
}
