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
use crate::app::rov::{RegWidth, RovRail, JERICHO2_VID};
use anyhow::Context;
use async_trait::async_trait;

pub static INFO: PlatformInfo = PlatformInfo {
    platform: "x86-64-ufispace-s9610-48dx-r0",
    model: "S9610-48DX",
    sys_object_id: ".9610.48",
    port_count: 48,
    port_config: "40x100 + 8x400",
    lpc: Some("/sys/devices/platform/x86_64_ufispace_s9610_48dx_lpc"),
};

const KERNEL_MODULES: [&str; 8] = [
    "i2c_i801",
    "i2c_dev",
    "gpio_pca953x",
    "i2c_mux_pca954x",
    "coretemp",
    "lm75",
    "ipmi_devintf",
    "ipmi_si",
];

const MUXES: [I2cDevice; 11] = [
    I2cDevice::new("pca9548", 0x71, 0),  // CPLD
    I2cDevice::new("pca9548", 0x72, 0),  // port root
    I2cDevice::new("pca9548", 0x73, 0),  // DC
    I2cDevice::new("pca9548", 0x76, 10), // QSFP 1-5
    I2cDevice::new("pca9548", 0x76, 11),
    I2cDevice::new("pca9548", 0x76, 12),
    I2cDevice::new("pca9548", 0x76, 13),
    I2cDevice::new("pca9548", 0x76, 14),
    I2cDevice::new("pca9548", 0x76, 9),  // QSFPDD
    I2cDevice::new("pca9546", 0x76, 15), // SFPDD
    I2cDevice::new("pca9546", 0x76, 16), // SFP
];

const CPLDS: [I2cDevice; 4] = [
    I2cDevice::new("s9610_48dx_cpld1", 0x30, 1),
    I2cDevice::new("s9610_48dx_cpld2", 0x31, 1),
    I2cDevice::new("s9610_48dx_cpld3", 0x32, 1),
    I2cDevice::new("s9610_48dx_cpld4", 0x33, 1),
];

const ROV_RAILS: [RovRail; 1] = [RovRail {
    source: ClientAttr::new(1, 0x30, "cpld_mac_rov"),
    shift: 0,
    mask: 0b111,
    bus: 21,
    addr: 0x60,
    width: RegWidth::Word,
}];

pub struct Board;

#[async_trait]
impl Platform for Board {
    fn info(&self) -> &'static PlatformInfo {
        &INFO
    }

    async fn baseconfig(&self, ctx: &BringUp) -> anyhow::Result<()> {
        ctx.modprobe_all(&KERNEL_MODULES).await;
        ctx.insmod("x86-64-ufispace-s9610-48dx-lpc").await?;

        ctx.check_i2c_status(I2cStatusCheck {
            bus: 0,
            mux: 0x71,
            reset: Some("mb_cpld/mux_reset"),
        })
        .await;

        ctx.bsp_info("Init PCA9548").await;
        ctx.new_i2c_devices(&MUXES).await;
        ctx.init_mux_idle_state(&MUXES).await;

        ctx.insmod("x86-64-ufispace-sys-eeprom").await?;
        ctx.insmod("x86-64-ufispace-optoe").await?;

        ctx.bsp_info("Init cpu eeprom").await;
        ctx.new_i2c_device(&I2cDevice::new("sys_eeprom", 0x57, 0))
            .await;

        // port_config.yml is keyed by the front panel index across all types
        ctx.bsp_info("Init port eeprom").await;
        let path = ctx.current_onl_dir().join("port_config.yml");
        let config = ctx.load_port_config(&path).await?;
        let ports = port_range(0, "QSFP", "optoe1", 25..65)
            .chain(port_range(40, "QSFPDD", "optoe3", 65..73))
            .chain(port_range(48, "SFPDD", "optoe2", 73..77))
            .chain(port_range(52, "SFP", "optoe2", 77..81));
        ctx.init_port_eeproms(
            ports,
            PortLabels::Config {
                config: &config,
                path: &path,
            },
        )
        .await?;

        ctx.bsp_info("Init CPLD").await;
        ctx.insmod("x86-64-ufispace-s9610-48dx-cpld").await?;
        ctx.new_i2c_devices(&CPLDS).await;

        ctx.bsp_info("Init MAC ROV").await;
        ctx.init_mac_rov(&JERICHO2_VID, &ROV_RAILS)
            .await
            .context("mac rov")?;

        for cpld in &CPLDS {
            ctx.write_attr(cpld.path().join("cpld_evt_ctrl"), 1).await;
        }

        ctx.enable_ipmi_maintenance_mode().await;
        ctx.remove_watchdog_node().await;

        // ice has to be up before the bcm81381 init
        ctx.bsp_info("Init ice").await;
        ctx.insmod_optional("intel_auxiliary").await?;
        ctx.insmod("ice").await?;

        ctx.bsp_info("Init bcm81381").await;
        ctx.epdm_cli(&["init", "1"]).await;

        ctx.bsp_info("Init done").await;
        Ok(())
    }
}
