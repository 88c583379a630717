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
    platform: "x86-64-ufispace-s9110-32x-r0",
    model: "S9110-32X",
    sys_object_id: ".9110.32",
    port_count: 33,
    port_config: "32x100 + 1x10",
    lpc: Some("/sys/devices/platform/x86_64_ufispace_s9110_32x_lpc"),
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

const MUXES: [I2cDevice; 7] = [
    I2cDevice::new("pca9548", 0x70, BUS_ISMT), // CPLD root
    I2cDevice::new("pca9548", 0x72, BUS_I801), // port root
    I2cDevice::new("pca9548", 0x73, 10),
    I2cDevice::new("pca9548", 0x73, 11),
    I2cDevice::new("pca9548", 0x73, 12),
    I2cDevice::new("pca9548", 0x73, 13),
    I2cDevice::new("pca9548", 0x73, 14),
];

const CPLDS: [I2cDevice; 2] = [
    I2cDevice::new("s9110_32x_cpld1", 0x30, 2),
    I2cDevice::new("s9110_32x_cpld2", 0x31, 2),
];

const SYSTEM_LED: &str = "/sys/bus/i2c/devices/2-0030/cpld_system_led_sys";
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

        ctx.insmod("x86-64-ufispace-s9110-32x-lpc").await?;

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
        ctx.new_i2c_device(&I2cDevice::new("sys_eeprom", 0x57, BUS_ISMT))
            .await;

        ctx.bsp_info("Init CPLD").await;
        ctx.insmod("x86-64-ufispace-s9110-32x-cpld").await?;
        ctx.new_i2c_devices(&CPLDS).await;

        ctx.bsp_info("Init port eeprom").await;
        ctx.insmod("optoe").await?;
        let path = ctx.platform_onl_dir().join("port_config.yml");
        let config = ctx.load_port_config(&path).await?;
        let ports = port_range(0, "QSFP", "optoe1", 18..50)
            .chain(port_range(32, "SFP", "optoe2", 51..52));
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
        ctx.set_system_led(SYSTEM_LED, SYSTEM_LED_GREEN).await;

        ctx.bsp_info("Init done").await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::bring_up::test_support::bring_up;
    use crate::hal::RecordingHal;

    const LPC: &str = "/sys/devices/platform/x86_64_ufispace_s9110_32x_lpc";
    const PORT_CONFIG: &str =
        "/lib/platform-config/x86-64-ufispace-s9110-32x-r0/onl/port_config.yml";

    fn hal() -> RecordingHal {
        [
            "x86-64-ufispace-s9110-32x-lpc",
            "x86-64-ufispace-sys-eeprom",
            "x86-64-ufispace-s9110-32x-cpld",
            "optoe",
        ]
        .iter()
        .fold(RecordingHal::new(), |hal, m| {
            hal.with_file(format!("/lib/modules/5.10.0-onl/onl/{}.ko", m), "")
        })
        .with_file(format!("{}/bsp/bsp_version", LPC), "")
        .with_file(SYSTEM_LED, "0x10")
    }

    #[tokio::test]
    async fn empty_port_config_labels_by_index() {
        let (hal, ctx) = bring_up(hal().with_file(PORT_CONFIG, ""), &INFO);
        Board.baseconfig(&ctx).await.unwrap();

        let writes = hal.writes();
        let labels: Vec<_> = writes
            .iter()
            .filter(|(p, _)| p.ends_with("port_name"))
            .collect();
        assert_eq!(labels.len(), 33);
        assert_eq!(
            labels[0],
            &(
                "/sys/bus/i2c/devices/18-0050/port_name".to_string(),
                "0".to_string()
            )
        );
        assert_eq!(
            labels[32],
            &(
                "/sys/bus/i2c/devices/51-0050/port_name".to_string(),
                "32".to_string()
            )
        );
        assert!(writes.contains(&(
            "/sys/bus/i2c/devices/i2c-51/new_device".to_string(),
            "optoe2 0x50".to_string()
        )));
        assert!(writes.contains(&(format!("{}/bsp/bsp_version", LPC), BSP_VERSION.to_string())));
        assert_eq!(hal.file(SYSTEM_LED).as_deref(), Some("144"));
    }

    #[tokio::test]
    async fn sfp_port_labelled_from_its_own_section() {
        let yaml = (0..32)
            .map(|p| format!("  {}:\n    port_name: {}\n", p, p))
            .fold(String::from("QSFP:\n"), |acc, entry| acc + &entry)
            + "SFP:\n  32:\n    port_name: MGMT\n";
        let (hal, ctx) = bring_up(hal().with_file(PORT_CONFIG, yaml), &INFO);
        Board.baseconfig(&ctx).await.unwrap();
        assert!(hal.writes().contains(&(
            "/sys/bus/i2c/devices/51-0050/port_name".to_string(),
            "MGMT".to_string()
        )));
    }
}
