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
use super::s9501_16smt::init_sfp_gpio;
use super::s9510_28dc::{GPIO_EXPANDERS, GPIO_LINES};
use super::Platform;
use crate::app::bring_up::{BringUp, I2cDevice, PlatformInfo};
use crate::app::eeprom::{port_range, PortEeprom, PortLabels};
use crate::app::gpio::Direction;
use crate::app::i2c::I2cStatusCheck;
use async_trait::async_trait;
use std::ops::Range;
use tracing::info;

pub static INFO: PlatformInfo = PlatformInfo {
    platform: "x86-64-ufispace-s9510-30xc-r0",
    model: "S9510-30XC",
    sys_object_id: ".9510.30",
    port_count: 30,
    port_config: "28x25 + 2x100",
    lpc: Some("/sys/devices/platform/x86_64_ufispace_s9510_30xc_lpc"),
};

const BSP_VERSION: &str = "1.0.3";

const BUS_I801: u32 = 0;
const BUS_ISMT: u32 = 1;

const MUXES: [I2cDevice; 7] = [
    I2cDevice::new("pca9546", 0x75, BUS_ISMT), // timing root
    I2cDevice::new("pca9546", 0x76, BUS_I801), // SFP root
    I2cDevice::new("pca9546", 0x70, 9),        // QSFP 0-1
    I2cDevice::new("pca9548", 0x71, 9),        // SFP 2-9
    I2cDevice::new("pca9548", 0x72, 9),        // SFP 10-17
    I2cDevice::new("pca9548", 0x73, 9),        // SFP 18-25
    I2cDevice::new("pca9548", 0x74, 9),        // SFP 26-29
];

const QSFP_PORTS: [PortEeprom; 2] = [
    PortEeprom::new(0, "QSFP", "optoe1", 11),
    PortEeprom::new(1, "QSFP", "optoe1", 10),
];

const GPIO_OUTPUTS: [(Range<u32>, Direction); 8] = [
    (488..490, Direction::Low),
    (464..480, Direction::Low),
    (460..464, Direction::Low),
    (448..456, Direction::Low),
    (492..494, Direction::High),
    (400..416, Direction::High),
    (396..400, Direction::High),
    (384..392, Direction::High),
];

pub struct Board;

#[async_trait]
impl Platform for Board {
    fn info(&self) -> &'static PlatformInfo {
        &INFO
    }

    async fn baseconfig(&self, ctx: &BringUp) -> anyhow::Result<()> {
        ctx.insmod("x86-64-ufispace-s9510-30xc-lpc").await?;

        ctx.bsp_info(&format!("BSP version {}", BSP_VERSION)).await;
        ctx.config_bsp_version(BSP_VERSION).await;

        let hw_rev = ctx.board_strap("mb_cpld/board_hw_id", 1).await;

        // i2c_i801 is built in
        ctx.modprobe("i2c-ismt").await;
        ctx.check_i2c_status(I2cStatusCheck {
            bus: BUS_I801,
            mux: 0x76,
            reset: Some("mb_cpld/mux_reset_all"),
        })
        .await;
        ctx.record_bmc_enable(true).await;

        ctx.bsp_info("Init i2c").await;
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
        let ports = QSFP_PORTS
            .into_iter()
            .chain(port_range(2, "SFP", "optoe2", 14..42));
        ctx.init_port_eeproms(
            ports,
            PortLabels::Config {
                config: &config,
                path: &path,
            },
        )
        .await?;

        ctx.bsp_info("Init gpio").await;
        ctx.new_i2c_devices(&GPIO_EXPANDERS).await;
        info!("GPIO init");
        init_sfp_gpio(ctx, GPIO_LINES, &GPIO_OUTPUTS).await;

        ctx.enable_ipmi_maintenance_mode().await;
        ctx.bsp_info("Init done").await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::bring_up::test_support::{bring_up, port_config_yaml, port_labels};
    use crate::hal::RecordingHal;

    const LPC: &str = "/sys/devices/platform/x86_64_ufispace_s9510_30xc_lpc";

    fn hal(hw_rev: &str) -> RecordingHal {
        ["x86-64-ufispace-s9510-30xc-lpc", "x86-64-ufispace-eeprom-mb", "optoe"]
            .iter()
            .fold(RecordingHal::new(), |hal, m| {
                hal.with_file(format!("/lib/modules/5.10.0-onl/onl/{}.ko", m), "")
            })
            .with_file(format!("{}/mb_cpld/board_hw_id", LPC), hw_rev)
            .with_file(format!("{}/bsp/bsp_version", LPC), "")
            .with_file(
                "/lib/platform-config/x86-64-ufispace-s9510-30xc-r0/onl/port_config.yml",
                port_config_yaml(&[("QSFP", 0..2), ("SFP", 2..30)]),
            )
    }

    #[tokio::test]
    async fn qsfp_cages_use_reversed_buses() {
        let (hal, ctx) = bring_up(hal("1"), &INFO);
        Board.baseconfig(&ctx).await.unwrap();

        let writes = hal.writes();
        let eeproms: Vec<_> = writes
            .iter()
            .filter(|(_, v)| v.starts_with("optoe"))
            .collect();
        assert_eq!(eeproms.len(), 30);
        assert_eq!(
            eeproms[0],
            &(
                "/sys/bus/i2c/devices/i2c-11/new_device".to_string(),
                "optoe1 0x50".to_string()
            )
        );
        assert_eq!(
            eeproms[29],
            &(
                "/sys/bus/i2c/devices/i2c-41/new_device".to_string(),
                "optoe2 0x50".to_string()
            )
        );
        assert_eq!(
            hal.file(format!("{}/bsp/bsp_version", LPC)).as_deref(),
            Some(BSP_VERSION)
        );

        let labels = port_labels(&hal);
        assert_eq!(
            labels[..3],
            [
                ("/sys/bus/i2c/devices/11-0050/port_name".to_string(), "1".to_string()),
                ("/sys/bus/i2c/devices/10-0050/port_name".to_string(), "2".to_string()),
                ("/sys/bus/i2c/devices/14-0050/port_name".to_string(), "3".to_string()),
            ]
        );
        assert_eq!(labels.len(), 30);
    }

    #[tokio::test]
    async fn gpio_directions() {
        let (hal, ctx) = bring_up(hal("1"), &INFO);
        Board.baseconfig(&ctx).await.unwrap();
        assert_eq!(hal.file("/sys/class/gpio/gpio320/direction").as_deref(), Some("in"));
        assert_eq!(hal.file("/sys/class/gpio/gpio489/direction").as_deref(), Some("low"));
        assert_eq!(hal.file("/sys/class/gpio/gpio490/direction").as_deref(), Some("in"));
        assert_eq!(hal.file("/sys/class/gpio/gpio493/direction").as_deref(), Some("high"));
        assert_eq!(hal.file("/sys/class/gpio/gpio397/direction").as_deref(), Some("high"));
    }

    #[tokio::test]
    async fn proto_board_skips_muxes() {
        let (hal, ctx) = bring_up(hal("0"), &INFO);
        Board.baseconfig(&ctx).await.unwrap();
        assert!(!hal
            .writes()
            .iter()
            .any(|(_, v)| v.starts_with("pca954")));
        assert!(hal.file("/sys/class/gpio/gpio511/direction").is_some());
    }
}
