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
//! Jericho2 fabric board. The clock generator is switched to free-run before
//! the mux tree is populated.
use super::Platform;
use crate::app::bring_up::{BringUp, ClientAttr, I2cDevice, PlatformInfo};
use crate::app::clkgen::{step, word_step, Clkgen, ClkgenSequence, ClkgenStep};
use crate::app::eeprom::{port_range, PortLabels};
use crate::app::gpio::{Direction, GpioLayout, GpioNumbering};
use crate::app::i2c::I2cStatusCheck;
use crate::app::rov::{RegWidth, RovRail, VidTable};
use anyhow::Context;
use async_trait::async_trait;

pub static INFO: PlatformInfo = PlatformInfo {
    platform: "x86-64-ufispace-s9705-48d-r2",
    model: "S9705-48D",
    sys_object_id: ".9705.48",
    port_count: 48,
    port_config: "48x400",
    lpc: Some("/sys/devices/platform/x86_64_ufispace_s9705_48d_lpc"),
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

const CLKGEN: Clkgen = Clkgen {
    bus: 0,
    addr: 0x64,
    mux: 0x71,
    channel: 0x2,
};

const FREE_RUN_PREAMBLE: [ClkgenStep; 3] = [
    step(0xb, 0x24, 0xc0),
    step(0xb, 0x25, 0x00),
    step(0x5, 0x40, 0x01),
];

const FREE_RUN: [ClkgenStep; 90] = [
    step(0x0, 0x18, 0xff),
    step(0x0, 0x19, 0xff),
    step(0x0, 0x1a, 0xff),
    step(0x0, 0x2c, 0x00),
    step(0x0, 0x2e, 0x00),
    step(0x0, 0x36, 0x00),
    step(0x0, 0x3e, 0x00),
    step(0x0, 0x3f, 0x00),
    step(0x0, 0x41, 0x00),
    step(0x0, 0x46, 0x00),
    step(0x0, 0x4a, 0x00),
    step(0x0, 0x4e, 0x00),
    step(0x0, 0x51, 0x00),
    step(0x0, 0x55, 0x00),
    step(0x0, 0x59, 0x00),
    step(0x0, 0x5a, 0x00),
    step(0x0, 0x5b, 0x00),
    step(0x0, 0x5c, 0x00),
    step(0x0, 0x92, 0x00),
    step(0x0, 0x93, 0x00),
    step(0x0, 0x96, 0x00),
    step(0x0, 0x98, 0x00),
    step(0x0, 0x9a, 0x00),
    step(0x0, 0x9b, 0x00),
    step(0x0, 0x9d, 0x00),
    step(0x0, 0x9e, 0x00),
    step(0x0, 0xa0, 0x00),
    step(0x0, 0xa9, 0x00),
    step(0x0, 0xaa, 0x00),
    step(0x0, 0xe5, 0x01),
    step(0x0, 0xea, 0x00),
    step(0x0, 0xeb, 0x00),
    step(0x2, 0x08, 0x00),
    step(0x2, 0x0e, 0x00),
    step(0x2, 0x94, 0x80),
    step(0x2, 0x96, 0x00),
    step(0x2, 0x97, 0x00),
    step(0x2, 0x99, 0x00),
    word_step(0x2, 0x9d, 0x0000),
    word_step(0x2, 0xa9, 0x0000),
    step(0x5, 0x08, 0x00),
    step(0x5, 0x09, 0x00),
    step(0x5, 0x0a, 0x00),
    step(0x5, 0x0b, 0x00),
    step(0x5, 0x0c, 0x00),
    step(0x5, 0x0d, 0x00),
    step(0x5, 0x0e, 0x00),
    step(0x5, 0x0f, 0x00),
    step(0x5, 0x10, 0x00),
    step(0x5, 0x11, 0x00),
    step(0x5, 0x12, 0x00),
    step(0x5, 0x13, 0x00),
    step(0x5, 0x19, 0x00),
    step(0x5, 0x1a, 0x00),
    step(0x5, 0x1f, 0x00),
    step(0x5, 0x2c, 0x0f),
    step(0x5, 0x2e, 0x00),
    step(0x5, 0x2f, 0x00),
    step(0x5, 0x32, 0x00),
    step(0x5, 0x33, 0x04),
    step(0x5, 0x35, 0x01),
    step(0x5, 0x3d, 0x0a),
    step(0x5, 0x3e, 0x06),
    step(0x5, 0x88, 0x00),
    step(0x5, 0x89, 0x0c),
    step(0x5, 0x8b, 0x00),
    step(0x5, 0x8c, 0x00),
    step(0x5, 0x9b, 0x18),
    step(0x5, 0x9c, 0x0c),
    step(0x5, 0x9d, 0x00),
    step(0x5, 0x9e, 0x00),
    step(0x5, 0x9f, 0x00),
    step(0x5, 0xa0, 0x00),
    step(0x5, 0xa1, 0x00),
    step(0x5, 0xa2, 0x00),
    step(0x5, 0xa4, 0x20),
    step(0x5, 0xa6, 0x00),
    step(0x5, 0xac, 0x00),
    step(0x5, 0xad, 0x00),
    step(0x5, 0xae, 0x00),
    step(0x5, 0xb2, 0x00),
    step(0x8, 0x04, 0x01),
    step(0x9, 0x49, 0x00),
    step(0x9, 0x4a, 0x00),
    step(0xb, 0x44, 0x0f),
    step(0xb, 0x47, 0x0f),
    step(0xb, 0x48, 0x0f),
    step(0xc, 0x03, 0x00),
    step(0xc, 0x07, 0x00),
    step(0xc, 0x08, 0x00),
];

const FREE_RUN_SOFT_RESET: [ClkgenStep; 1] = [step(0x0, 0x1c, 0x01)];

const FREE_RUN_POSTAMBLE: [ClkgenStep; 3] = [
    step(0x5, 0x40, 0x00),
    step(0xb, 0x24, 0xc3),
    step(0xb, 0x25, 0x02),
];

const MUXES: [I2cDevice; 10] = [
    I2cDevice::new("pca9548", 0x75, 0),
    I2cDevice::new("pca9546", 0x71, 0),
    I2cDevice::new("pca9546", 0x72, 6),
    I2cDevice::new("pca9546", 0x74, 6),
    I2cDevice::new("pca9548", 0x70, 14),
    I2cDevice::new("pca9548", 0x70, 15),
    I2cDevice::new("pca9548", 0x70, 16),
    I2cDevice::new("pca9548", 0x70, 18),
    I2cDevice::new("pca9548", 0x70, 19),
    I2cDevice::new("pca9548", 0x70, 20),
];

const GPIO_EXPANDERS: [I2cDevice; 3] = [
    I2cDevice::new("pca9539", 0x74, 1),
    I2cDevice::new("pca9555", 0x20, 3),
    I2cDevice::new("pca9539", 0x77, 0),
];

const GPIO_FROM_BASE: [GpioLayout<'static>; 2] = [
    GpioLayout {
        offsets: 0..16,
        default: Direction::In,
        overrides: &[
            (0, Direction::High),
            (2, Direction::High),
            (3, Direction::Low),
            (4, Direction::Low),
            (5, Direction::Low),
            (14, Direction::High),
            (15, Direction::High),
        ],
    },
    GpioLayout {
        offsets: 16..48,
        default: Direction::In,
        overrides: &[],
    },
];

const GPIO_FROM_MAX: [GpioLayout<'static>; 2] = [
    GpioLayout {
        offsets: 0..16,
        default: Direction::In,
        overrides: &[
            (0, Direction::High),
            (1, Direction::High),
            (10, Direction::Low),
            (11, Direction::Low),
            (12, Direction::Low),
            (13, Direction::High),
            (15, Direction::High),
        ],
    },
    GpioLayout {
        offsets: 16..48,
        default: Direction::In,
        overrides: &[],
    },
];

const CPLDS: [I2cDevice; 4] = [
    I2cDevice::new("s9705_48d_cpld1", 0x30, 2),
    I2cDevice::new("s9705_48d_cpld2", 0x31, 2),
    I2cDevice::new("s9705_48d_cpld3", 0x32, 2),
    I2cDevice::new("s9705_48d_cpld4", 0x33, 2),
];

/// CPLDs whose port LEDs follow the local clock.
const LED_CLOCK_CPLDS: [u16; 2] = [0x31, 0x33];

const MAC_VID: VidTable = VidTable {
    vdd: [0.82, 0.82, 0.80, 0.82, 0.84, 0.86, 0.82, 0.78],
    code: [0x73, 0x73, 0x6f, 0x73, 0x77, 0x7b, 0x73, 0x6b],
};

const ROV_RAILS: [RovRail; 2] = [
    RovRail {
        source: ClientAttr::new(2, 0x30, "cpld_10gmux_config"),
        shift: 0,
        mask: 0b111,
        bus: 5,
        addr: 0x70,
        width: RegWidth::Word,
    },
    RovRail {
        source: ClientAttr::new(2, 0x32, "cpld_10gmux_config"),
        shift: 0,
        mask: 0b111,
        bus: 4,
        addr: 0x70,
        width: RegWidth::Word,
    },
];

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

        ctx.insmod("x86-64-ufispace-s9705-48d-lpc").await?;

        ctx.check_i2c_status(I2cStatusCheck {
            bus: 0,
            mux: 0x75,
            reset: Some("cpu_cpld/mux_reset"),
        })
        .await;
        ctx.record_bmc_enable(true).await;

        ctx.golden_finger(0, 0x75, 0x2, &[0x30, 0x31, 0x32, 0x33])
            .await;
        ctx.clkgen_program(
            &CLKGEN,
            &ClkgenSequence {
                preamble: &FREE_RUN_PREAMBLE,
                body: &FREE_RUN,
                soft_reset: &FREE_RUN_SOFT_RESET,
                postamble: &FREE_RUN_POSTAMBLE,
            },
        )
        .await;

        ctx.new_i2c_devices(&MUXES).await;
        ctx.init_mux_idle_state(&MUXES).await;

        ctx.insmod("x86-64-ufispace-eeprom-mb").await?;
        ctx.insmod("optoe").await?;
        ctx.new_i2c_device(&I2cDevice::new("mb_eeprom", 0x57, 0))
            .await;
        ctx.init_port_eeproms(port_range(0, "QSFPDD", "optoe3", 21..69), PortLabels::Index)
            .await?;
        ctx.new_i2c_device(&I2cDevice::new("tmp75", 0x4f, 0))
            .await;

        self.init_gpio(ctx).await.context("gpio init")?;

        ctx.insmod("x86-64-ufispace-s9705-48d-cpld").await?;
        ctx.new_i2c_devices(&CPLDS).await;
        for addr in LED_CLOCK_CPLDS {
            ctx.write_attr(ctx.client_attr(2, addr, "cpld_led_clk_src"), 0)
                .await;
        }

        ctx.init_mac_rov(&MAC_VID, &ROV_RAILS)
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

    const LPC: &str = "/sys/devices/platform/x86_64_ufispace_s9705_48d_lpc";

    fn hal() -> RecordingHal {
        [
            "x86-64-ufispace-s9705-48d-lpc",
            "x86-64-ufispace-eeprom-mb",
            "optoe",
            "x86-64-ufispace-s9705-48d-cpld",
        ]
        .iter()
        .fold(RecordingHal::new(), |hal, m| {
            hal.with_file(format!("/lib/modules/5.10.0-onl/onl/{}.ko", m), "")
        })
        .with_file("/sys/bus/i2c/devices/2-0030/cpld_10gmux_config", "0x2")
        .with_file("/sys/bus/i2c/devices/2-0032/cpld_10gmux_config", "0x7")
        .with_file(format!("{}/bsp/bsp_gpio_max", LPC), "511")
    }

    #[tokio::test]
    async fn clock_runs_free_before_muxes_exist() {
        let (hal, ctx) = bring_up(hal(), &INFO);
        Board.baseconfig(&ctx).await.unwrap();

        let actions = hal.actions();
        let soft_reset = actions
            .iter()
            .position(|a| {
                *a == Action::SmbusWrite {
                    target: SmbusTarget::new(0, 0x64),
                    op: SmbusWrite::ByteData(0x1c, 0x01),
                }
            })
            .unwrap();
        let first_mux = actions
            .iter()
            .position(|a| matches!(a, Action::Write { value, .. } if value == "pca9548 0x75"))
            .unwrap();
        assert!(soft_reset < first_mux);

        let lines: Vec<String> = actions.iter().map(ToString::to_string).collect();
        let word = lines
            .iter()
            .position(|l| l == "i2cset -y 0 0x64 0x01 0x009d w")
            .unwrap();
        assert_eq!(lines[word - 1], "i2cset -y 0 0x64 0x01 0x02");
        assert_eq!(lines[word + 1], "i2cget -y 0 0x64 0x9d w");
        assert!(lines.contains(&"i2cset -y 0 0x64 0x01 0x00a9 w".to_string()));
    }

    #[tokio::test]
    async fn each_mac_rail_follows_its_cpld() {
        let (hal, ctx) = bring_up(hal(), &INFO);
        Board.baseconfig(&ctx).await.unwrap();

        let actions = hal.actions();
        assert!(actions.contains(&Action::SmbusWrite {
            target: SmbusTarget::new(5, 0x70),
            op: SmbusWrite::WordData(0x21, 0x6f),
        }));
        assert!(actions.contains(&Action::SmbusWrite {
            target: SmbusTarget::new(4, 0x70),
            op: SmbusWrite::WordData(0x21, 0x6b),
        }));
        assert_eq!(
            hal.file("/sys/bus/i2c/devices/2-0033/cpld_led_clk_src")
                .as_deref(),
            Some("0")
        );
    }

    #[tokio::test]
    async fn gpio_counts_down_from_max() {
        let (hal, ctx) = bring_up(hal(), &INFO);
        Board.baseconfig(&ctx).await.unwrap();
        let direction = |line: u32| hal.file(format!("/sys/class/gpio/gpio{}/direction", line));
        assert_eq!(direction(511).as_deref(), Some("high"));
        assert_eq!(direction(501).as_deref(), Some("low"));
        assert_eq!(direction(497).as_deref(), Some("in"));
        assert_eq!(direction(464).as_deref(), Some("in"));
        assert_eq!(direction(463), None);
    }
}
