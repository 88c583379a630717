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
use crate::app::bring_up::{BringUp, I2cDevice, PlatformInfo};
use crate::app::eeprom::{port_range, PortLabels};
use crate::app::i2c::I2cStatusCheck;
use async_trait::async_trait;

pub static INFO: PlatformInfo = PlatformInfo {
    platform: "x86-64-ufispace-s9500-54cf-r0",
    model: "S9500-54CF",
    sys_object_id: ".9500.54",
    port_count: 54,
    port_config: "16x1 + 24x10 + 14x25",
    lpc: Some("/sys/devices/platform/x86_64_ufispace_s9500_54cf_lpc"),
};

const BUS_I801: u32 = 0;
const BUS_ISMT: u32 = 1;

const KERNEL_MODULES: [&str; 6] = [
    "i2c_i801",
    "i2c_dev",
    "i2c_mux_pca954x",
    "coretemp",
    "ipmi_devintf",
    "ipmi_si",
];

const MUXES: [I2cDevice; 9] = [
    I2cDevice::new("pca9548", 0x72, BUS_ISMT), // timing root
    I2cDevice::new("pca9548", 0x75, BUS_I801), // SFP root
    I2cDevice::new("pca9548", 0x76, 10),
    I2cDevice::new("pca9548", 0x76, 11),
    I2cDevice::new("pca9548", 0x76, 12),
    I2cDevice::new("pca9548", 0x76, 13),
    I2cDevice::new("pca9548", 0x76, 14),
    I2cDevice::new("pca9548", 0x76, 15),
    I2cDevice::new("pca9548", 0x76, 16),
];

const CPLDS: [I2cDevice; 3] = [
    I2cDevice::new("s9500_54cf_cpld1", 0x30, 2),
    I2cDevice::new("s9500_54cf_cpld2", 0x31, 2),
    I2cDevice::new("s9500_54cf_cpld3", 0x32, 2),
];

pub struct Board;

#[async_trait]
impl Platform for Board {
    fn info(&self) -> &'static PlatformInfo {
        &INFO
    }

    async fn baseconfig(&self, ctx: &BringUp) -> anyhow::Result<()> {
        ctx.modprobe_all(&KERNEL_MODULES).await;
        ctx.insmod("x86-64-ufispace-s9500-54cf-lpc").await?;

        let hw_rev = ctx.board_strap("mb_cpld/board_hw_id", 1).await;

        ctx.modprobe("i2c-ismt").await;
        ctx.check_i2c_status(I2cStatusCheck {
            bus: BUS_I801,
            mux: 0x75,
            reset: Some("mb_cpld/mux_reset_all"),
        })
        .await;
        ctx.record_bmc_enable(true).await;

        ctx.bsp_info("Init i2c").await;
        // proto boards route the port muxes differently and are left alone
        if hw_rev >= 1 {
            ctx.new_i2c_devices(&MUXES).await;
            ctx.init_mux_idle_state(&MUXES).await;
        }
        ctx.insmod("x86-64-ufispace-eeprom-mb").await?;
        ctx.insmod("optoe").await?;

        ctx.bsp_info("Init mb eeprom").await;
        ctx.new_i2c_device(&I2cDevice::new("mb_eeprom", 0x57, BUS_ISMT))
            .await;

        ctx.bsp_info("Init port eeprom").await;
        let path = ctx.platform_onl_dir().join("port_config.yml");
        let config = ctx.load_port_config(&path).await?;
        let ports = port_range(0, "SFP", "optoe2", 18..34)
            .chain(port_range(16, "SFP+", "optoe2", 34..58))
            .chain(port_range(40, "SFP28", "optoe2", 58..72));
        ctx.init_port_eeproms(
            ports,
            PortLabels::Config {
                config: &config,
                path: &path,
            },
        )
        .await?;

        ctx.bsp_info("Init CPLD").await;
        ctx.insmod("x86-64-ufispace-s9500-54cf-cpld").await?;
        ctx.new_i2c_devices(&CPLDS).await;

        ctx.enable_ipmi_maintenance_mode().await;
        ctx.disable_bmc_watchdog().await;
        ctx.bsp_info("Init done").await;
        Ok(())
    }
}
