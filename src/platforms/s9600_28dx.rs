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
    platform: "x86-64-ufispace-s9600-28dx-r0",
    model: "S9600-28DX",
    sys_object_id: ".9600.28",
    port_count: 28,
    port_config: "48x100 + 8x400",
    lpc: Some("/sys/devices/platform/x86_64_ufispace_s9600_28dx_lpc"),
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

const MUXES: [I2cDevice; 8] = [
    I2cDevice::new("pca9548", 0x75, 0),  // CPLD
    I2cDevice::new("pca9548", 0x73, 0),  // NTM
    I2cDevice::new("pca9548", 0x72, 0),  // port root
    I2cDevice::new("pca9546", 0x71, 17), // SFP+ 0-3
    I2cDevice::new("pca9548", 0x76, 17), // QSFP 0-7
    I2cDevice::new("pca9548", 0x76, 18), // QSFP 8-15
    I2cDevice::new("pca9548", 0x76, 19), // QSFP 16-23
    I2cDevice::new("pca9548", 0x76, 23), // QSFPDD 0-7
];

const CPLDS: [I2cDevice; 3] = [
    I2cDevice::new("s9600_28dx_cpld1", 0x30, 1),
    I2cDevice::new("s9600_28dx_cpld2", 0x31, 1),
    I2cDevice::new("s9600_28dx_cpld3", 0x32, 1),
];

pub struct Board;

#[async_trait]
impl Platform for Board {
    fn info(&self) -> &'static PlatformInfo {
        &INFO
    }

    async fn baseconfig(&self, ctx: &BringUp) -> anyhow::Result<()> {
        ctx.modprobe_all(&KERNEL_MODULES).await;
        ctx.insmod("x86-64-ufispace-s9600-28dx-lpc").await?;

        ctx.check_i2c_status(I2cStatusCheck {
            bus: 0,
            mux: 0x75,
            reset: Some("mb_cpld/mux_reset"),
        })
        .await;

        ctx.bsp_info("Init PCA9548").await;
        ctx.new_i2c_devices(&MUXES).await;
        ctx.init_mux_idle_state(&MUXES).await;

        ctx.insmod("x86-64-ufispace-eeprom-mb").await?;
        ctx.insmod("optoe").await?;

        ctx.bsp_info("Init cpu eeprom").await;
        ctx.new_i2c_device(&I2cDevice::new("mb_eeprom", 0x57, 0))
            .await;

        // SFP+ cages come first on the bus but last on the front panel
        ctx.bsp_info("Init port eeprom").await;
        let path = ctx.current_onl_dir().join("port_config.yml");
        let config = ctx.load_port_config(&path).await?;
        let ports = port_range(28, "SFP", "optoe2", 25..29)
            .chain(port_range(0, "QSFP", "optoe1", 29..53))
            .chain(port_range(24, "QSFPDD", "optoe3", 53..57));
        ctx.init_port_eeproms(
            ports,
            PortLabels::Config {
                config: &config,
                path: &path,
            },
        )
        .await?;

        ctx.bsp_info("Init CPLD").await;
        ctx.insmod("x86-64-ufispace-s9600-28dx-cpld").await?;
        ctx.new_i2c_devices(&CPLDS).await;

        ctx.enable_ipmi_maintenance_mode().await;
        ctx.disable_bmc_watchdog().await;
        ctx.sync_sel_time().await;

        ctx.bsp_info("Init done").await;
        Ok(())
    }
}
