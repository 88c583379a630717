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
use crate::app::board::PackedBoardId;
use crate::app::bring_up::{BringUp, I2cDevice, PlatformInfo};
use crate::app::eeprom::{port_range, PortLabels};
use crate::app::gpio::Direction;
use async_trait::async_trait;
use std::ops::Range;
use tracing::{info, warn};

pub static INFO: PlatformInfo = PlatformInfo {
    platform: "x86-64-ufispace-s9501-16smt-r0",
    model: "S9501-16SMT",
    sys_object_id: ".9501.16",
    port_count: 16,
    port_config: "12x1 + 4x10",
    lpc: Some("/sys/devices/platform/x86_64_ufispace_s9501_16smt_lpc"),
};

pub(super) const BUS_ISMT: u32 = 1;

/// Ports 0-3 are copper, the SFP cages start at front panel index 4.
pub(super) const FIRST_SFP_PORT: u32 = 4;

pub(super) const MUXES: [I2cDevice; 4] = [
    I2cDevice::new("pca9546", 0x75, BUS_ISMT),     // timing root
    I2cDevice::new("pca9546", 0x76, BUS_ISMT),     // SFP root
    I2cDevice::new("pca9548", 0x72, BUS_ISMT + 8), // SFP 12-19
    I2cDevice::new("pca9548", 0x73, BUS_ISMT + 8), // SFP 20-27
];

/// Board id, TX_DIS, TX_FLT, RATE_SELECT, MOD_ABS and RX_LOS expanders.
pub(super) const GPIO_EXPANDERS: [I2cDevice; 11] = [
    I2cDevice::new("pca9535", 0x20, 4),
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

/// Lines owned by the expanders. Lines not driven are inputs.
pub(super) const SFP_GPIO_LINES: Range<u32> = 336..512;

pub(super) type GpioOutputs = [(Range<u32>, Direction)];

pub(super) const BETA1_OUTPUTS: [(Range<u32>, Direction); 5] = [
    (488..492, Direction::Low),
    (464..472, Direction::Low),
    (424..428, Direction::Low),
    (404..408, Direction::Low),
    (400..404, Direction::High),
];

fn gpio_direction(outputs: &GpioOutputs, line: u32) -> Direction {
    outputs
        .iter()
        .find(|(lines, _)| lines.contains(&line))
        .map_or(Direction::In, |(_, d)| *d)
}

/// Reads a packed board id, logging and returning `None` when it cannot.
pub(super) async fn board_id(ctx: &BringUp, attr: &str) -> Option<PackedBoardId> {
    match ctx.packed_board_id(attr).await {
        Ok(id) => Some(id),
        Err(e) => {
            warn!("Get board id from LPC failed: {}", e);
            None
        }
    }
}

/// Exports `lines` with `outputs` driven and the rest as inputs.
pub(super) async fn init_sfp_gpio(ctx: &BringUp, lines: Range<u32>, outputs: &GpioOutputs) {
    ctx.gpio_setup(lines.map(|line| (line, gpio_direction(outputs, line))))
        .await;
}

/// Muxes, main board EEPROM and SFP EEPROMs on `sfp_buses`, labelled from
/// their front panel index.
pub(super) async fn init_i2c(
    ctx: &BringUp,
    muxes: &[I2cDevice],
    idle_disconnect: bool,
    sfp_buses: Range<u32>,
) -> anyhow::Result<()> {
    ctx.new_i2c_devices(muxes).await;
    if idle_disconnect {
        ctx.init_mux_idle_state(muxes).await;
    }
    ctx.insmod("x86-64-ufispace-eeprom-mb").await?;
    ctx.insmod("optoe").await?;

    ctx.new_i2c_device(&I2cDevice::new("mb_eeprom", 0x57, BUS_ISMT))
        .await;
    ctx.init_port_eeproms(
        port_range(FIRST_SFP_PORT, "SFP", "optoe2", sfp_buses),
        PortLabels::Index,
    )
    .await?;
    ctx.modprobe("jc42").await;
    Ok(())
}

pub struct Board;

#[async_trait]
impl Platform for Board {
    fn info(&self) -> &'static PlatformInfo {
        &INFO
    }

    async fn baseconfig(&self, ctx: &BringUp) -> anyhow::Result<()> {
        ctx.record_bmc_enable(false).await;
        ctx.modprobe("i2c-ismt").await;
        ctx.insmod("x86-64-ufispace-s9501-16smt-lpc").await?;

        init_i2c(ctx, &MUXES, true, BUS_ISMT + 9..BUS_ISMT + 21).await?;

        ctx.new_i2c_devices(&GPIO_EXPANDERS).await;
        let Some(id) = board_id(ctx, "board_id_0").await else {
            return Ok(());
        };
        let outputs: &GpioOutputs = if id.hw_build_rev() == 8 {
            info!("Beta 1 and later GPIO init");
            &BETA1_OUTPUTS
        } else {
            &[]
        };
        init_sfp_gpio(ctx, SFP_GPIO_LINES, outputs).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::bring_up::test_support::bring_up;
    use crate::hal::RecordingHal;

    const LPC: &str = "/sys/devices/platform/x86_64_ufispace_s9501_16smt_lpc";

    fn hal() -> RecordingHal {
        [
            "x86-64-ufispace-s9501-16smt-lpc",
            "x86-64-ufispace-eeprom-mb",
            "optoe",
        ]
        .iter()
        .fold(RecordingHal::new(), |hal, m| {
            hal.with_file(format!("/lib/modules/5.10.0-onl/onl/{}.ko", m), "")
        })
    }

    #[test]
    fn undriven_lines_are_inputs() {
        assert_eq!(gpio_direction(&BETA1_OUTPUTS, 491), Direction::Low);
        assert_eq!(gpio_direction(&BETA1_OUTPUTS, 492), Direction::In);
        assert_eq!(gpio_direction(&BETA1_OUTPUTS, 400), Direction::High);
        assert_eq!(gpio_direction(&[], 400), Direction::In);
    }

    #[tokio::test]
    async fn beta1_drives_sfp_controls() {
        // hw rev 2, build rev 0
        let (hal, ctx) = bring_up(
            hal().with_file(format!("{}/mb_cpld/board_id_0", LPC), "32"),
            &INFO,
        );
        Board.baseconfig(&ctx).await.unwrap();

        assert_eq!(hal.file("/etc/onl/bmc_en").as_deref(), Some("0"));
        assert_eq!(hal.file("/sys/class/gpio/gpio403/direction").as_deref(), Some("high"));
        assert_eq!(hal.file("/sys/class/gpio/gpio404/direction").as_deref(), Some("low"));
        assert_eq!(hal.file("/sys/class/gpio/gpio336/direction").as_deref(), Some("in"));
        assert!(hal.writes().contains(&(
            "/sys/bus/i2c/devices/21-0050/port_name".to_string(),
            "15".to_string()
        )));
    }

    #[tokio::test]
    async fn unreadable_board_id_skips_gpio_export() {
        let (hal, ctx) = bring_up(hal(), &INFO);
        Board.baseconfig(&ctx).await.unwrap();
        assert!(!hal.writes().iter().any(|(p, _)| p == "/sys/class/gpio/export"));
        assert!(hal.writes().contains(&(
            "/sys/bus/i2c/devices/i2c-8/new_device".to_string(),
            "pca9535 0x24".to_string()
        )));
    }
}
