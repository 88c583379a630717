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
use crate::app::gpio::{Direction, GpioLayout, GpioNumbering};
use crate::app::i2c::I2cStatusCheck;
use crate::app::rov::{RegWidth, RovRail, TOMAHAWK_VID};
use anyhow::Context;
use async_trait::async_trait;

pub static INFO: PlatformInfo = PlatformInfo {
    platform: "x86-64-ufispace-s9700-23d-r5",
    model: "S9700-23D",
    sys_object_id: ".9700.23",
    port_count: 23,
    port_config: "10x400 + 13x400",
    lpc: Some("/sys/devices/platform/x86_64_ufispace_s9700_23d_lpc"),
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

const MUXES: [I2cDevice; 7] = [
    I2cDevice::new("pca9548", 0x75, 0),
    I2cDevice::new("pca9548", 0x72, 0),
    I2cDevice::new("pca9548", 0x73, 0),
    I2cDevice::new("pca9548", 0x76, 9),
    I2cDevice::new("pca9548", 0x76, 10),
    I2cDevice::new("pca9548", 0x76, 15),
    I2cDevice::new("pca9548", 0x76, 16),
];

const GPIO_EXPANDERS: [I2cDevice; 4] = [
    I2cDevice::new("pca9539", 0x74, 0), // host GPIO
    I2cDevice::new("pca9555", 0x20, 7), // beacon LED
    I2cDevice::new("pca9555", 0x20, 3), // board id
    I2cDevice::new("pca9539", 0x77, 0), // CPU I2C
];

/// Layout when the expanders are numbered upwards from `bsp_gpio_base`.
const GPIO_FROM_BASE: [GpioLayout<'static>; 3] = [
    GpioLayout {
        offsets: 0..16,
        default: Direction::In,
        overrides: &[
            (0, Direction::High),
            (2, Direction::High),
            (3, Direction::Low),
            (4, Direction::Low),
            (14, Direction::High),
            (15, Direction::High),
        ],
    },
    GpioLayout {
        offsets: 16..32,
        default: Direction::Low,
        overrides: &[
            (20, Direction::High),
            (23, Direction::In),
            (30, Direction::High),
            (31, Direction::In),
        ],
    },
    GpioLayout {
        offsets: 32..64,
        default: Direction::In,
        overrides: &[],
    },
];

/// Layout when the lines are counted down from `bsp_gpio_max`.
const GPIO_FROM_MAX: [GpioLayout<'static>; 3] = [
    GpioLayout {
        offsets: 0..16,
        default: Direction::In,
        overrides: &[
            (0, Direction::High),
            (1, Direction::High),
            (11, Direction::Low),
            (12, Direction::Low),
            (13, Direction::High),
            (15, Direction::High),
        ],
    },
    GpioLayout {
        offsets: 16..32,
        default: Direction::Low,
        overrides: &[
            (16, Direction::In),
            (17, Direction::High),
            (24, Direction::In),
            (27, Direction::High),
        ],
    },
    GpioLayout {
        offsets: 32..64,
        default: Direction::In,
        overrides: &[],
    },
];

const CPLDS: [I2cDevice; 3] = [
    I2cDevice::new("s9700_23d_cpld1", 0x30, 1),
    I2cDevice::new("s9700_23d_cpld2", 0x31, 1),
    I2cDevice::new("s9700_23d_cpld3", 0x32, 1),
];

const ROV_RAILS: [RovRail; 1] = [RovRail {
    source: ClientAttr::new(1, 0x30, "cpld_psu_status_0"),
    shift: 1,
    mask: 0b111,
    bus: 4,
    addr: 0x76,
    width: RegWidth::Word,
}];

pub struct Board;

impl Board {
    async fn init_gpio(&self, ctx: &BringUp) -> anyhow::Result<()> {
        ctx.new_i2c_devices(&GPIO_EXPANDERS).await;
        let numbering = ctx.gpio_numbering().await?;
        let layout = match numbering {
            GpioNumbering::FromBase(_) => &GPIO_FROM_BASE,
            GpioNumbering::FromMax(_) => &GPIO_FROM_MAX,
        };
        ctx.gpio_apply(numbering, layout).await?;
        Ok(())
    }
}

#[async_trait]
impl Platform for Board {
    fn info(&self) -> &'static PlatformInfo {
        &INFO
    }

    async fn baseconfig(&self, ctx: &BringUp) -> anyhow::Result<()> {
        ctx.modprobe_remove("i2c_i801").await;
        ctx.insmod_optional("i2c-smbus").await?;
        ctx.modprobe_all(&KERNEL_MODULES).await;

        ctx.insmod("x86-64-ufispace-s9700-23d-lpc").await?;

        ctx.check_i2c_status(I2cStatusCheck {
            bus: 0,
            mux: 0x75,
            reset: Some("cpu_cpld/mux_reset"),
        })
        .await;
        ctx.record_bmc_enable(true).await;

        ctx.new_i2c_devices(&MUXES).await;
        ctx.init_mux_idle_state(&MUXES).await;

        ctx.insmod("x86-64-ufispace-eeprom-mb").await?;
        ctx.insmod("optoe").await?;
        ctx.new_i2c_device(&I2cDevice::new("mb_eeprom", 0x57, 0))
            .await;

        // NIF cages first, then the fabric cages
        let ports = port_range(0, "QSFPDD", "optoe1", 25..35)
            .chain(port_range(10, "QSFPDD", "optoe1", 41..54));
        ctx.init_port_eeproms(ports, PortLabels::Index).await?;

        ctx.new_i2c_device(&I2cDevice::new("tmp75", 0x4f, 0))
            .await;

        self.init_gpio(ctx).await.context("gpio init")?;

        ctx.insmod("x86-64-ufispace-s9700-23d-cpld").await?;
        ctx.new_i2c_devices(&CPLDS).await;

        ctx.init_mac_rov(&TOMAHAWK_VID, &ROV_RAILS)
            .await
            .context("mac rov")?;

        ctx.enable_ipmi_maintenance_mode().await;
        ctx.disable_bmc_watchdog().await;
        ctx.sync_sel_time().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::bring_up::test_support::bring_up;
    use crate::hal::stub::Action;
    use crate::hal::{RecordingHal, SmbusTarget, SmbusWrite};

    const LPC: &str = "/sys/devices/platform/x86_64_ufispace_s9700_23d_lpc";

    fn hal() -> RecordingHal {
        [
            "x86-64-ufispace-s9700-23d-lpc",
            "x86-64-ufispace-eeprom-mb",
            "optoe",
            "x86-64-ufispace-s9700-23d-cpld",
        ]
        .iter()
        .fold(RecordingHal::new(), |hal, m| {
            hal.with_file(format!("/lib/modules/5.10.0-onl/onl/{}.ko", m), "")
        })
        .with_file("/sys/bus/i2c/devices/1-0030/cpld_psu_status_0", "0x6")
    }

    fn direction(hal: &RecordingHal, line: u32) -> Option<String> {
        hal.file(format!("/sys/class/gpio/gpio{}/direction", line))
    }

    #[tokio::test]
    async fn gpio_base_takes_precedence() {
        let (hal, ctx) = bring_up(
            hal()
                .with_file(format!("{}/bsp/bsp_gpio_base", LPC), "448")
                .with_file(format!("{}/bsp/bsp_gpio_max", LPC), "511"),
            &INFO,
        );
        Board.baseconfig(&ctx).await.unwrap();
        assert_eq!(direction(&hal, 448).as_deref(), Some("high"));
        assert_eq!(direction(&hal, 449).as_deref(), Some("in"));
        assert_eq!(direction(&hal, 451).as_deref(), Some("low"));
        assert_eq!(direction(&hal, 471).as_deref(), Some("in"));
        assert_eq!(direction(&hal, 511).as_deref(), Some("in"));
    }

    #[tokio::test]
    async fn gpio_max_counts_down() {
        let (hal, ctx) = bring_up(
            hal().with_file(format!("{}/bsp/bsp_gpio_max", LPC), "511"),
            &INFO,
        );
        Board.baseconfig(&ctx).await.unwrap();
        assert_eq!(direction(&hal, 511).as_deref(), Some("high"));
        assert_eq!(direction(&hal, 500).as_deref(), Some("low"));
        assert_eq!(direction(&hal, 495).as_deref(), Some("in"));
        assert_eq!(direction(&hal, 494).as_deref(), Some("high"));
        assert_eq!(direction(&hal, 448).as_deref(), Some("in"));
    }

    #[tokio::test]
    async fn missing_gpio_numbering_stops_bring_up() {
        let (hal, ctx) = bring_up(hal(), &INFO);
        assert!(Board.baseconfig(&ctx).await.is_err());
        assert!(!hal.writes().iter().any(|(p, _)| p == "/sys/class/gpio/export"));
    }

    #[tokio::test]
    async fn rov_uses_psu_status_vid() {
        let (hal, ctx) = bring_up(
            hal().with_file(format!("{}/bsp/bsp_gpio_max", LPC), "511"),
            &INFO,
        );
        Board.baseconfig(&ctx).await.unwrap();
        // 0x6 carries vid 3
        assert!(hal.actions().contains(&Action::SmbusWrite {
            target: SmbusTarget::new(4, 0x76),
            op: SmbusWrite::WordData(0x21, 0x6b),
        }));
        assert!(hal.writes().contains(&(
            "/sys/bus/i2c/devices/53-0050/port_name".to_string(),
            "22".to_string()
        )));
    }
}
