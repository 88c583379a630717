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
use super::s9501_16smt::{
    board_id, init_i2c, init_sfp_gpio, BUS_ISMT, GPIO_EXPANDERS, SFP_GPIO_LINES,
};
use super::Platform;
use crate::app::bring_up::{BringUp, I2cDevice, PlatformInfo};
use crate::app::gpio::Direction;
use crate::hal::{SmbusRead, SmbusTarget};
use async_trait::async_trait;
use std::ops::Range;
use std::path::Path;
use tracing::{info, warn};

pub static INFO: PlatformInfo = PlatformInfo {
    platform: "x86-64-ufispace-s9501-28smt-r0",
    model: "S9501-28SMT",
    sys_object_id: ".9501.28",
    port_count: 28,
    port_config: "20x1 + 8x10",
    lpc: Some("/sys/devices/platform/x86_64_ufispace_s9501_28smt_lpc"),
};

const MUXES: [I2cDevice; 5] = [
    I2cDevice::new("pca9546", 0x75, BUS_ISMT),     // timing root
    I2cDevice::new("pca9546", 0x76, BUS_ISMT),     // SFP root
    I2cDevice::new("pca9548", 0x71, BUS_ISMT + 8), // SFP 4-11
    I2cDevice::new("pca9548", 0x72, BUS_ISMT + 8), // SFP 12-19
    I2cDevice::new("pca9548", 0x73, BUS_ISMT + 8), // SFP 20-27
];

/// The iSMT controller hosting the root mux.
const ISMT_REMOVE: &str = "/sys/bus/pci/devices/0000:00:12.0/remove";
const PCI_RESCAN: &str = "/sys/bus/pci/rescan";

const ALPHA1_OUTPUTS: [(Range<u32>, Direction); 6] = [
    (488..496, Direction::Low),
    (476..484, Direction::Low),
    (464..472, Direction::Low),
    (424..432, Direction::High),
    (412..420, Direction::High),
    (400..408, Direction::High),
];

const ALPHA2_OUTPUTS: [(Range<u32>, Direction); 8] = [
    (488..496, Direction::Low),
    (476..484, Direction::Low),
    (464..472, Direction::Low),
    (424..432, Direction::Low),
    (416..420, Direction::Low),
    (404..408, Direction::Low),
    (412..416, Direction::High),
    (400..404, Direction::High),
];

/// `board_id_1` bit set on every build after alpha 1.
const DEPH_ID: u32 = 0b0001_0000;

pub struct Board;

impl Board {
    /// A stuck iSMT bus is recovered by resetting the muxes and re-probing
    /// the controller, which also needs the driver reloaded.
    async fn check_i2c_status(&self, ctx: &BringUp) {
        let target = SmbusTarget::forced(BUS_ISMT, 0x75);
        let Err(e) = ctx.hal().smbus_read(target, SmbusRead::Byte).await else {
            return;
        };
        warn!("Read I2C Mux Failed!! ({}: {})", target, e);

        let Some(mux_reset) = ctx.lpc("mb_cpld/mux_reset") else {
            return;
        };
        let hal = ctx.hal();
        if !(hal.exists(&mux_reset).await
            && hal.exists(Path::new(ISMT_REMOVE)).await
            && hal.exists(Path::new(PCI_RESCAN)).await)
        {
            warn!(
                "I2C recovery sysfs does not exist!! (path={})",
                mux_reset.display()
            );
            return;
        }
        ctx.write_attr(&mux_reset, 0).await;
        ctx.write_attr(ISMT_REMOVE, 1).await;
        ctx.write_attr(PCI_RESCAN, 1).await;
        ctx.rmmod("i2c-ismt").await;
        ctx.modprobe("i2c-ismt").await;
        info!("I2C bus recovery done.");
    }

    async fn init_gpio(&self, ctx: &BringUp) {
        ctx.new_i2c_devices(&GPIO_EXPANDERS).await;
        let Some(id) = board_id(ctx, "board_id_0").await else {
            return;
        };
        let Some(ext_id) = board_id(ctx, "board_id_1").await else {
            return;
        };
        if id.hw_build_rev() == 4 && ext_id.0 & DEPH_ID == 0 {
            info!("Alpha 1 GPIO init");
            init_sfp_gpio(ctx, SFP_GPIO_LINES, &ALPHA1_OUTPUTS).await;
        } else {
            info!("Alpha 2 and later GPIO init");
            init_sfp_gpio(ctx, SFP_GPIO_LINES, &ALPHA2_OUTPUTS).await;
        }
    }
}

#[async_trait]
impl Platform for Board {
    fn info(&self) -> &'static PlatformInfo {
        &INFO
    }

    async fn baseconfig(&self, ctx: &BringUp) -> anyhow::Result<()> {
        ctx.insmod("x86-64-ufispace-s9501-28smt-lpc").await?;
        self.check_i2c_status(ctx).await;
        ctx.record_bmc_enable(true).await;
        ctx.modprobe("i2c-ismt").await;

        ctx.bsp_info("Init i2c MUXs").await;
        init_i2c(ctx, &MUXES, true, BUS_ISMT + 9..BUS_ISMT + 33).await?;

        ctx.bsp_info("Init gpio").await;
        self.init_gpio(ctx).await;

        ctx.enable_ipmi_maintenance_mode().await;
        ctx.bsp_info("Init done").await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::bring_up::test_support::bring_up;
    use crate::hal::RecordingHal;

    const LPC: &str = "/sys/devices/platform/x86_64_ufispace_s9501_28smt_lpc";

    fn hal(board_id_0: &str, board_id_1: &str) -> RecordingHal {
        ["x86-64-ufispace-s9501-28smt-lpc", "x86-64-ufispace-eeprom-mb", "optoe"]
            .iter()
            .fold(RecordingHal::new(), |hal, m| {
                hal.with_file(format!("/lib/modules/5.10.0-onl/onl/{}.ko", m), "")
            })
            .with_file(format!("{}/mb_cpld/board_id_0", LPC), board_id_0)
            .with_file(format!("{}/mb_cpld/board_id_1", LPC), board_id_1)
    }

    #[tokio::test]
    async fn alpha1_drives_rate_select_high() {
        // hw rev 1, build rev 0, no deph id
        let (hal, ctx) = bring_up(hal("16", "0"), &INFO);
        Board.baseconfig(&ctx).await.unwrap();
        assert_eq!(hal.file("/sys/class/gpio/gpio430/direction").as_deref(), Some("high"));
        assert!(hal.writes().contains(&(
            "/sys/bus/i2c/devices/33-0050/port_name".to_string(),
            "27".to_string()
        )));
    }

    #[tokio::test]
    async fn deph_id_selects_later_layout() {
        let (hal, ctx) = bring_up(hal("16", "16"), &INFO);
        Board.baseconfig(&ctx).await.unwrap();
        assert_eq!(hal.file("/sys/class/gpio/gpio430/direction").as_deref(), Some("low"));
        assert_eq!(hal.file("/sys/class/gpio/gpio413/direction").as_deref(), Some("high"));
    }

    #[tokio::test]
    async fn stuck_ismt_bus_reprobes_controller() {
        let (hal, ctx) = bring_up(
            hal("16", "16")
                .with_absent_device(BUS_ISMT, 0x75)
                .with_file(format!("{}/mb_cpld/mux_reset", LPC), "1")
                .with_file(ISMT_REMOVE, "")
                .with_file(PCI_RESCAN, ""),
            &INFO,
        );
        Board.baseconfig(&ctx).await.unwrap();

        let writes = hal.writes();
        assert_eq!(
            &writes[..3],
            &[
                (format!("{}/mb_cpld/mux_reset", LPC), "0".to_string()),
                (ISMT_REMOVE.to_string(), "1".to_string()),
                (PCI_RESCAN.to_string(), "1".to_string()),
            ]
        );
        let commands = hal.commands();
        assert_eq!(commands[1], "rmmod i2c-ismt");
        assert_eq!(commands[2], "modprobe i2c-ismt");
    }
}
