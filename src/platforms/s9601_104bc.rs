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
    platform: "x86-64-ufispace-s9601-104bc-r0",
    model: "S9601-104BC",
    sys_object_id: ".9601.104",
    port_count: 104,
    port_config: "96x25 + 4x200 + 4x100",
    lpc: Some("/sys/devices/platform/x86_64_ufispace_s9601_104bc_lpc"),
};

const BSP_VERSION: &str = "1.0.5";

const BUS_I801: u32 = 0;
const BUS_ISMT: u32 = 1;

const KERNEL_MODULES: [&str; 8] = [
    "i2c_i801",
    "i2c_ismt",
    "i2c_dev",
    "gpio_pca953x",
    "i2c_mux_pca954x",
    "coretemp",
    "ipmi_devintf",
    "ipmi_si",
];

const MUXES: [I2cDevice; 16] = [
    I2cDevice::new("pca9548", 0x73, BUS_ISMT), // CPLD root
    I2cDevice::new("pca9548", 0x72, BUS_I801), // port root 1
    I2cDevice::new("pca9548", 0x75, BUS_I801), // port root 2
    I2cDevice::new("pca9548", 0x76, 10),       // SFP 0-7
    I2cDevice::new("pca9548", 0x76, 11),
    I2cDevice::new("pca9548", 0x76, 12),
    I2cDevice::new("pca9548", 0x76, 13),
    I2cDevice::new("pca9548", 0x76, 14),
    I2cDevice::new("pca9548", 0x76, 15),
    I2cDevice::new("pca9548", 0x76, 16),
    I2cDevice::new("pca9548", 0x76, 17), // SFP 56-63
    I2cDevice::new("pca9548", 0x76, 22), // SFP 64-71
    I2cDevice::new("pca9548", 0x76, 23),
    I2cDevice::new("pca9548", 0x76, 24),
    I2cDevice::new("pca9548", 0x76, 25), // SFP 88-95
    I2cDevice::new("pca9548", 0x76, 21), // QSFP 0-7
];

const CPLDS: [I2cDevice; 5] = [
    I2cDevice::new("s9601_104bc_cpld1", 0x30, 5),
    I2cDevice::new("s9601_104bc_cpld2", 0x31, 5),
    I2cDevice::new("s9601_104bc_cpld3", 0x32, 5),
    I2cDevice::new("s9601_104bc_cpld4", 0x33, 5),
    I2cDevice::new("s9601_104bc_cpld5", 0x34, 5),
];

const SYSTEM_LED: &str = "/sys/bus/i2c/devices/5-0030/cpld_system_led_sys";
const SYSTEM_LED_GREEN: u8 = 0b1001_0000;

pub struct Board;

#[async_trait]
impl Platform for Board {
    fn info(&self) -> &'static PlatformInfo {
        &INFO
    }

    async fn baseconfig(&self, ctx: &BringUp) -> anyhow::Result<()> {
        ctx.rmmod("i2c_ismt").await;
        ctx.rmmod("i2c_i801").await;
        ctx.modprobe_all(&KERNEL_MODULES).await;

        ctx.insmod("x86-64-ufispace-s9601-104bc-lpc").await?;

        ctx.bsp_info(&format!("BSP version {}", BSP_VERSION)).await;
        ctx.config_bsp_version(BSP_VERSION).await;

        ctx.board_version().await;
        ctx.gpio_max(511).await;

        ctx.check_i2c_status(I2cStatusCheck {
            bus: BUS_I801,
            mux: 0x72,
            reset: Some("mb_cpld/mux_reset_all"),
        })
        .await;
        ctx.record_bmc_enable(true).await;

        ctx.bsp_info("Init i2c").await;
        ctx.new_i2c_devices(&MUXES).await;
        ctx.init_mux_idle_state(&MUXES).await;

        ctx.bsp_info("Init sys eeprom").await;
        ctx.insmod("x86-64-ufispace-sys-eeprom").await?;
        ctx.new_i2c_device(&I2cDevice::new("sys_eeprom", 0x57, 4))
            .await;

        ctx.bsp_info("Init CPLD").await;
        ctx.insmod("x86-64-ufispace-s9601-104bc-cpld").await?;
        ctx.new_i2c_devices(&CPLDS).await;

        ctx.bsp_info("Init port eeprom").await;
        ctx.insmod("optoe").await?;
        let path = ctx.platform_onl_dir().join("port_config.yml");
        let config = ctx.load_port_config(&path).await?;
        // the two management SFPs follow the front panel ports
        let ports = port_range(0, "SFP", "optoe2", 26..122)
            .chain(port_range(96, "QSFP", "optoe1", 122..130))
            .chain(port_range(104, "MGMT", "optoe2", 18..20));
        ctx.init_port_eeproms(
            ports,
            PortLabels::Config {
                config: &config,
                path: &path,
            },
        )
        .await?;

        ctx.enable_ipmi_maintenance_mode().await;
        ctx.disable_bmc_watchdog().await;

        ctx.bsp_info("Init bcm82752").await;
        ctx.epdm_cli(&["init", "-s", "auto_10G", "-d", "mdio"]).await;

        ctx.set_system_led(SYSTEM_LED, SYSTEM_LED_GREEN).await;
        ctx.bsp_info("Init done").await;
        Ok(())
    }
}
