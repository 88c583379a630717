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
use crate::app::error::BringUpError;
use crate::app::gpio::{Direction, GpioChipStack};
use crate::app::i2c::I2cStatusCheck;
use async_trait::async_trait;
use std::time::Duration;

pub static INFO: PlatformInfo = PlatformInfo {
    platform: "x86-64-ufispace-s6301-56st-r0",
    model: "S6301-56ST",
    sys_object_id: ".6301.56",
    port_count: 56,
    port_config: "48x1 + 8x10",
    lpc: Some("/sys/devices/platform/x86_64_ufispace_s6301_56st_lpc"),
};

pub(super) const BUS_I801: u32 = 0;
pub(super) const BUS_ISMT: u32 = 1;

/// Revision of the alpha build, later builds add a fan direction expander.
pub(super) const HW_REV_ALPHA: u32 = 1;

pub(super) const KERNEL_MODULES: [&str; 7] = [
    "i2c_i801",
    "i2c_ismt",
    "i2c_dev",
    "gpio_pca953x",
    "i2c_mux_pca954x",
    "coretemp",
    "eeprom",
];

pub(super) const MUXES: [I2cDevice; 3] = [
    I2cDevice::new("pca9546", 0x72, BUS_ISMT),
    I2cDevice::new("pca9546", 0x70, BUS_ISMT),
    I2cDevice::new("pca9548", 0x71, BUS_I801),
];

pub(super) const I2C_STATUS: I2cStatusCheck = I2cStatusCheck {
    bus: BUS_I801,
    mux: 0x71,
    reset: Some("mb_cpld/mux_reset"),
};

const GPIO_EXPANDERS: [I2cDevice; 4] = [
    I2cDevice::new("pca9535", 0x20, 6), // MOD_ABS 0-7
    I2cDevice::new("pca9535", 0x21, 7), // RS, TX_DIS 0-7
    I2cDevice::new("pca9535", 0x22, 8), // TX_FLT, RX_LOS 0-7
    I2cDevice::new("pca9554", 0x21, 3), // fan direction
];

pub(super) const SFP_PORT_BASE: u32 = 48;
pub(super) const SFP_BUSES: std::ops::Range<u32> = 10..18;

pub(super) fn gpio_expanders(hw_rev: u32) -> &'static [I2cDevice] {
    if hw_rev > HW_REV_ALPHA {
        &GPIO_EXPANDERS
    } else {
        &GPIO_EXPANDERS[..3]
    }
}

/// SFP+ module EEPROMs and both PSU FRUs.
pub(super) async fn init_eeprom(ctx: &BringUp, first_port: u32) -> anyhow::Result<()> {
    ctx.init_port_eeproms(
        port_range(first_port, "SFP", "optoe2", SFP_BUSES),
        PortLabels::Index,
    )
    .await?;
    ctx.new_i2c_devices(&[
        I2cDevice::new("eeprom", 0x50, BUS_ISMT + 1),
        I2cDevice::new("eeprom", 0x51, BUS_ISMT + 1),
    ])
    .await;
    Ok(())
}

pub(super) async fn init_hwmon(ctx: &BringUp, hw_rev: u32) {
    ctx.modprobe_all(&["ucd9000", "lm75"]).await;
    // the sequencer moved behind the mux after the alpha build
    let ucd_bus = if hw_rev > HW_REV_ALPHA { 5 } else { 1 };
    ctx.new_i2c_devices(&[
        I2cDevice::new("tmp75", 0x49, 3),
        I2cDevice::new("tmp75", 0x4a, 3),
        I2cDevice::new("ucd90124", 0x34, ucd_bus),
    ])
    .await;
}

pub(super) async fn reset_port_leds(ctx: &BringUp) {
    if let Some(clear) = ctx.lpc("mb_cpld/port_led_clear") {
        ctx.write_attr(&clear, 0).await;
        ctx.hal().sleep(Duration::from_millis(500)).await;
        ctx.write_attr(&clear, 1).await;
    }
}

pub struct Board;

impl Board {
    async fn init_gpio(&self, ctx: &BringUp, hw_rev: u32) -> Result<(), BringUpError> {
        ctx.new_i2c_devices(gpio_expanders(hw_rev)).await;

        // gpio_max is at most i32::MAX
        let gpio_max = ctx.gpio_max(511).await;
        let stack = GpioChipStack {
            top: gpio_max + 1,
            ngpio: 16,
        };
        let (presence, tx, misc) = (stack.block(0)?, stack.block(1)?, stack.block(2)?);
        let fan = GpioChipStack {
            top: misc.start,
            ngpio: 8,
        };
        let fan = if hw_rev > HW_REV_ALPHA {
            Some(fan.block(0)?)
        } else {
            None
        };

        for line in presence {
            ctx.gpio_export(line).await;
        }
        // RS and TX_DIS driven low
        for line in tx {
            ctx.gpio_export(line).await;
            ctx.gpio_direction(line, Direction::Out).await;
            ctx.gpio_value(line, 0).await;
        }
        for line in misc {
            ctx.gpio_export(line).await;
        }
        for line in fan.into_iter().flatten() {
            ctx.gpio_export(line).await;
        }
        Ok(())
    }
}

#[async_trait]
impl Platform for Board {
    fn info(&self) -> &'static PlatformInfo {
        &INFO
    }

    async fn baseconfig(&self, ctx: &BringUp) -> anyhow::Result<()> {
        ctx.rmmod("i2c_ismt").await;
        ctx.rmmod("i2c_i801").await;
        ctx.modprobe_all(&KERNEL_MODULES).await;

        ctx.insmod("x86-64-ufispace-s6301-56st-lpc").await?;
        ctx.check_i2c_status(I2C_STATUS).await;

        ctx.record_bmc_enable(false).await;
        let hw_rev = ctx.board_strap("mb_cpld/board_hw_id", 0).await;

        ctx.bsp_info("Init i2c MUXs").await;
        ctx.new_i2c_devices(&MUXES).await;
        ctx.init_mux_idle_state(&MUXES).await;

        ctx.insmod("x86-64-ufispace-sys-eeprom").await?;
        ctx.insmod("optoe").await?;

        ctx.bsp_info("Init sys eeprom").await;
        ctx.new_i2c_device(&I2cDevice::new("sys_eeprom", 0x56, BUS_ISMT))
            .await;

        ctx.bsp_info("Init port eeprom").await;
        init_eeprom(ctx, SFP_PORT_BASE).await?;

        ctx.bsp_info("Init gpio").await;
        self.init_gpio(ctx, hw_rev).await?;

        ctx.bsp_info("Init HWMON").await;
        init_hwmon(ctx, hw_rev).await;

        reset_port_leds(ctx).await;

        ctx.bsp_info("Init done").await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::bring_up::test_support::bring_up;
    use crate::hal::RecordingHal;

    const LPC: &str = "/sys/devices/platform/x86_64_ufispace_s6301_56st_lpc";

    fn hal(hw_rev: &str) -> RecordingHal {
        ["x86-64-ufispace-s6301-56st-lpc", "x86-64-ufispace-sys-eeprom", "optoe"]
            .iter()
            .fold(RecordingHal::new(), |hal, m| {
                hal.with_file(format!("/lib/modules/5.10.0-onl/onl/{}.ko", m), "")
            })
            .with_file(format!("{}/mb_cpld/board_hw_id", LPC), hw_rev)
            .with_file(format!("{}/mb_cpld/port_led_clear", LPC), "1")
    }

    fn exported(hal: &RecordingHal) -> Vec<String> {
        hal.writes()
            .into_iter()
            .filter(|(p, _)| p == "/sys/class/gpio/export")
            .map(|(_, v)| v)
            .collect()
    }

    #[tokio::test]
    async fn later_builds_export_fan_direction() {
        let (hal, ctx) = bring_up(hal("2"), &INFO);
        Board.baseconfig(&ctx).await.unwrap();

        let lines = exported(&hal);
        assert_eq!(lines.len(), 56);
        assert_eq!(lines.last().map(String::as_str), Some("463"));
        assert!(hal.writes().contains(&(
            "/sys/bus/i2c/devices/i2c-5/new_device".to_string(),
            "ucd90124 0x34".to_string()
        )));
        assert!(hal.writes().contains(&(
            "/sys/bus/i2c/devices/17-0050/port_name".to_string(),
            "55".to_string()
        )));
        let led: Vec<_> = hal
            .writes()
            .into_iter()
            .filter(|(p, _)| p.ends_with("port_led_clear"))
            .map(|(_, v)| v)
            .collect();
        assert_eq!(led, vec!["0", "1"]);
    }

    #[tokio::test]
    async fn alpha_build() {
        let (hal, ctx) = bring_up(hal("1"), &INFO);
        Board.baseconfig(&ctx).await.unwrap();
        assert_eq!(exported(&hal).len(), 48);
        assert!(hal.writes().contains(&(
            "/sys/bus/i2c/devices/i2c-1/new_device".to_string(),
            "ucd90124 0x34".to_string()
        )));
        assert!(hal.commands().starts_with(&[
            "rmmod i2c_ismt".to_string(),
            "rmmod i2c_i801".to_string()
        ]));
    }
}
