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
use super::Platform;
use crate::app::bring_up::{BringUp, I2cDevice, PlatformInfo};
use crate::app::eeprom::{port_range, PortEeprom, PortLabels};
use crate::app::gpio::Direction;
use async_trait::async_trait;
use std::ops::Range;
use tracing::{info, warn};

pub static INFO: PlatformInfo = PlatformInfo {
    platform: "x86-64-ufispace-s9510-28dc-r0",
    model: "S9510-28DC",
    sys_object_id: ".9510.28",
    port_count: 28,
    port_config: "24x25 + 2x100 + 2x400",
    lpc: Some("/sys/devices/platform/x86_64_ufispace_s9510_28dc_lpc"),
};

const BUS_ISMT: u32 = 1;

const MUXES: [I2cDevice; 6] = [
    I2cDevice::new("pca9546", 0x75, BUS_ISMT),     // timing root
    I2cDevice::new("pca9546", 0x76, BUS_ISMT),     // SFP root
    I2cDevice::new("pca9546", 0x70, BUS_ISMT + 8), // QSFPx 0-3
    I2cDevice::new("pca9548", 0x71, BUS_ISMT + 8), // SFP 4-11
    I2cDevice::new("pca9548", 0x72, BUS_ISMT + 8), // SFP 12-19
    I2cDevice::new("pca9548", 0x73, BUS_ISMT + 8), // SFP 20-27
];

/// QSFP-DD and QSFP28 cages sit on the first channels in reverse order.
const UPLINK_PORTS: [PortEeprom; 4] = [
    PortEeprom::new(0, "QSFPDD", "optoe3", BUS_ISMT + 12),
    PortEeprom::new(1, "QSFPDD", "optoe3", BUS_ISMT + 11),
    PortEeprom::new(2, "QSFP28", "optoe1", BUS_ISMT + 10),
    PortEeprom::new(3, "QSFP28", "optoe1", BUS_ISMT + 9),
];

/// Board id, QSFPx control, TX_DIS, TX_FLT, RATE_SELECT, MOD_ABS and RX_LOS
/// expanders.
pub(super) const GPIO_EXPANDERS: [I2cDevice; 12] = [
    I2cDevice::new("pca9535", 0x20, 4),
    I2cDevice::new("pca9535", 0x21, 6),
    I2cDevice::new("pca9535", 0x22, 6),
    I2cDevice::new("pca9535", 0x24, 6),
    I2cDevice::new("pca9535", 0x26, 7),
    I2cDevice::new("pca9535", 0x27, 7),
    I2cDevice::new("pca9535", 0x25, 7),
    I2cDevice::new("pca9535", 0x23, 7),
    I2cDevice::new("pca9535", 0x20, 8),
    I2cDevice::new("pca9535", 0x22, 8),
    I2cDevice::new("pca9535", 0x21, 8),
    I2cDevice::new("pca9535", 0x24, 8),
];

pub(super) const GPIO_LINES: Range<u32> = 320..512;

const GPIO_OUTPUTS: [(Range<u32>, Direction); 7] = [
    (488..492, Direction::Low),
    (464..480, Direction::Low),
    (448..456, Direction::Low),
    (392..396, Direction::Low),
    (492..496, Direction::High),
    (400..416, Direction::High),
    (384..392, Direction::High),
];

pub struct Board;

impl Board {
    async fn board_hw_id(&self, ctx: &BringUp) -> Option<i64> {
        let path = ctx.lpc("mb_cpld/board_hw_id")?;
        match ctx.read_int(path, 10).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Get board id from LPC failed: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl Platform for Board {
    fn info(&self) -> &'static PlatformInfo {
        &INFO
    }

    async fn baseconfig(&self, ctx: &BringUp) -> anyhow::Result<()> {
        ctx.insmod("x86-64-ufispace-s9510-28dc-lpc").await?;
        // TODO: run the stuck-bus check on iSMT mux 0x75 once mux_reset_all
        // recovery works on this board
        ctx.record_bmc_enable(true).await;
        ctx.modprobe("i2c-ismt").await;

        ctx.new_i2c_devices(&MUXES).await;
        ctx.init_mux_idle_state(&MUXES).await;
        ctx.insmod("x86-64-ufispace-eeprom-mb").await?;
        ctx.insmod("optoe").await?;
        ctx.new_i2c_device(&I2cDevice::new("mb_eeprom", 0x57, BUS_ISMT))
            .await;

        let ports = UPLINK_PORTS
            .into_iter()
            .chain(port_range(4, "SFP28", "optoe2", BUS_ISMT + 13..BUS_ISMT + 37));
        ctx.init_port_eeproms(ports, PortLabels::Index).await?;

        ctx.new_i2c_devices(&GPIO_EXPANDERS).await;
        if self.board_hw_id(ctx).await.is_some() {
            info!("GPIO init");
            init_sfp_gpio(ctx, GPIO_LINES, &GPIO_OUTPUTS).await;
        }

        ctx.enable_ipmi_maintenance_mode().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::bring_up::test_support::bring_up;
    use crate::hal::RecordingHal;

    fn hal() -> RecordingHal {
        ["x86-64-ufispace-s9510-28dc-lpc", "x86-64-ufispace-eeprom-mb", "optoe"]
            .iter()
            .fold(RecordingHal::new(), |hal, m| {
                hal.with_file(format!("/lib/modules/5.10.0-onl/onl/{}.ko", m), "")
            })
    }

    #[tokio::test]
    async fn uplinks_first_then_sfp28() {
        let (hal, ctx) = bring_up(
            hal().with_file(
                "/sys/devices/platform/x86_64_ufispace_s9510_28dc_lpc/mb_cpld/board_hw_id",
                "1",
            ),
            &INFO,
        );
        Board.baseconfig(&ctx).await.unwrap();

        let labels: Vec<_> = hal
            .writes()
            .into_iter()
            .filter(|(p, _)| p.ends_with("port_name"))
            .collect();
        assert_eq!(labels.len(), 28);
        assert_eq!(
            labels[0],
            ("/sys/bus/i2c/devices/13-0050/port_name".to_string(), "0".to_string())
        );
        assert_eq!(
            labels[4],
            ("/sys/bus/i2c/devices/14-0050/port_name".to_string(), "4".to_string())
        );
        assert_eq!(hal.file("/sys/class/gpio/gpio320/direction").as_deref(), Some("in"));
        assert_eq!(hal.file("/sys/class/gpio/gpio495/direction").as_deref(), Some("high"));
        assert_eq!(hal.file("/sys/class/gpio/gpio479/direction").as_deref(), Some("low"));
    }

    #[tokio::test]
    async fn unreadable_hw_id_skips_gpio_export() {
        let (hal, ctx) = bring_up(hal(), &INFO);
        Board.baseconfig(&ctx).await.unwrap();
        assert!(!hal.writes().iter().any(|(p, _)| p == "/sys/class/gpio/export"));
    }
}
