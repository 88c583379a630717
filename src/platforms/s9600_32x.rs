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
use crate::app::i2c::I2cStatusCheck;
use crate::app::rov::{RegWidth, RovRail, TOMAHAWK_VID};
use anyhow::Context;
use async_trait::async_trait;
use tracing::{info, warn};

pub static INFO: PlatformInfo = PlatformInfo {
    platform: "x86-64-ufispace-s9600-32x-r0",
    model: "S9600-32X",
    sys_object_id: ".9600.32",
    port_count: 32,
    port_config: "32x100",
    lpc: Some("/sys/devices/platform/x86_64_ufispace_s9600_32x_lpc"),
};

const KERNEL_MODULES: [&str; 7] = [
    "i2c_i801",
    "i2c_dev",
    "i2c_mux_pca954x",
    "coretemp",
    "lm75",
    "ipmi_devintf",
    "ipmi_si",
];

const MUXES: [I2cDevice; 8] = [
    I2cDevice::new("pca9548", 0x75, 0),
    I2cDevice::new("pca9548", 0x73, 0),
    I2cDevice::new("pca9548", 0x72, 0),
    I2cDevice::new("pca9546", 0x71, 17),
    I2cDevice::new("pca9548", 0x76, 17),
    I2cDevice::new("pca9548", 0x76, 18),
    I2cDevice::new("pca9548", 0x76, 21),
    I2cDevice::new("pca9548", 0x76, 22),
];

const CPLDS: [I2cDevice; 3] = [
    I2cDevice::new("s9600_32x_cpld1", 0x30, 1),
    I2cDevice::new("s9600_32x_cpld2", 0x31, 1),
    I2cDevice::new("s9600_32x_cpld3", 0x32, 1),
];

const ROV_RAILS: [RovRail; 1] = [RovRail {
    source: ClientAttr::new(1, 0x30, "cpld_mac_rov"),
    shift: 0,
    mask: 0b111,
    bus: 10,
    addr: 0x76,
    width: RegWidth::Byte,
}];

/// CPLDs driving the port LEDs.
const LED_CPLDS: [u16; 2] = [0x31, 0x32];

pub struct Board;

impl Board {
    /// The alpha build carries a CPU board temperature sensor the later
    /// builds dropped.
    async fn init_temperature(&self, ctx: &BringUp) {
        let hw_build_id = match ctx.packed_board_id("board_id_1").await {
            Ok(id) => id.hw_build_id(),
            Err(e) => {
                warn!("Get board id from LPC failed: {}", e);
                return;
            }
        };
        if hw_build_id == 1 {
            ctx.new_i2c_device(&I2cDevice::new("tmp75", 0x4f, 0)).await;
        }
    }
}

#[async_trait]
impl Platform for Board {
    fn info(&self) -> &'static PlatformInfo {
        &INFO
    }

    async fn baseconfig(&self, ctx: &BringUp) -> anyhow::Result<()> {
        ctx.modprobe_all(&KERNEL_MODULES).await;
        ctx.insmod("x86-64-ufispace-s9600-32x-lpc").await?;

        ctx.check_i2c_status(I2cStatusCheck {
            bus: 0,
            mux: 0x71,
            reset: Some("mb_cpld/mux_reset"),
        })
        .await;
        ctx.record_bmc_enable(true).await;

        ctx.golden_finger(0, 0x75, 0x1, &[0x30, 0x31]).await;

        ctx.bsp_info("Init i2c MUXs").await;
        ctx.new_i2c_devices(&MUXES).await;
        ctx.init_mux_idle_state(&MUXES).await;

        ctx.insmod("x86-64-ufispace-eeprom-mb").await?;
        ctx.insmod("optoe").await?;

        ctx.bsp_info("Init mb eeprom").await;
        ctx.new_i2c_device(&I2cDevice::new("mb_eeprom", 0x57, 0))
            .await;

        ctx.bsp_info("Init port eeprom").await;
        let ports = port_range(0, "QSFP", "sff8436", 29..61)
            .chain(port_range(32, "SFP", "optoe2", 25..29));
        ctx.init_port_eeproms(ports, PortLabels::Index).await?;

        ctx.insmod("x86-64-ufispace-s9600-32x-cpld").await?;
        ctx.new_i2c_devices(&CPLDS).await;

        ctx.bsp_info("Init Thermal").await;
        self.init_temperature(ctx).await;

        ctx.init_mac_rov(&TOMAHAWK_VID, &ROV_RAILS)
            .await
            .context("mac rov")?;

        for addr in LED_CPLDS {
            ctx.write_attr(ctx.client_attr(1, addr, "cpld_led_mask"), 0)
                .await;
            info!("Setting disable LED mask with i2c device 1-{:04x}", addr);
        }

        ctx.enable_ipmi_maintenance_mode().await;
        ctx.disable_bmc_watchdog().await;

        ctx.bsp_info("Init done").await;
        Ok(())
    }
}
