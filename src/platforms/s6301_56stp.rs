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
//! PoE variant of the S6301-56ST: same I2C tree, plus the PoE controller and
//! a fixed GPIO map.
use super::s6301_56st::{
    gpio_expanders, init_eeprom, init_hwmon, reset_port_leds, BUS_ISMT, HW_REV_ALPHA,
    I2C_STATUS, KERNEL_MODULES, MUXES, SFP_PORT_BASE,
};
use super::Platform;
use crate::app::bring_up::{BringUp, I2cDevice, PciAction, PlatformInfo};
use crate::app::error::BringUpError;
use crate::app::gpio::{Direction, GpioLayout, GpioNumbering};
use async_trait::async_trait;

pub static INFO: PlatformInfo = PlatformInfo {
    platform: "x86-64-ufispace-s6301-56stp-r0",
    model: "S6301-56STP",
    sys_object_id: ".6301.56",
    port_count: 56,
    port_config: "48x1 + 8x10",
    lpc: Some("/sys/devices/platform/x86_64_ufispace_s6301_56stp_lpc"),
};

/// `board_ext_id` of builds labelling the SFP+ ports from 49.
const EXT_1BASE: u32 = 2;

/// Unbind both SMBus controllers and bind them back in a fixed order so
/// i801 always enumerates as bus 0.
const I2C_BUS_ORDER: [(&str, &str, PciAction); 4] = [
    ("i801_smbus", "0000:00:1f.4", PciAction::Unbind),
    ("ismt_smbus", "0000:00:12.0", PciAction::Unbind),
    ("i801_smbus", "0000:00:1f.4", PciAction::Bind),
    ("ismt_smbus", "0000:00:12.0", PciAction::Bind),
];

/// Counted down from `bsp_gpio_max`: reserved and MOD_ABS inputs, TX_DIS
/// and RS held low, RX_LOS and TX_FLT inputs, then fan direction on later
/// builds.
const GPIO_LAYOUT: [GpioLayout<'static>; 3] = [
    GpioLayout {
        offsets: 0..16,
        default: Direction::In,
        overrides: &[],
    },
    GpioLayout {
        offsets: 16..32,
        default: Direction::Low,
        overrides: &[],
    },
    GpioLayout {
        offsets: 32..48,
        default: Direction::In,
        overrides: &[],
    },
];

const FAN_DIR_LAYOUT: GpioLayout<'static> = GpioLayout {
    offsets: 48..56,
    default: Direction::In,
    overrides: &[],
};

const POE_INIT: &str = "/sys/bus/i2c/devices/i2c-4/4-0020/sys/poe_init";

/// Solid green.
const SYS_LED_GREEN: u8 = 0x09;

pub struct Board;

impl Board {
    async fn init_gpio(&self, ctx: &BringUp, hw_rev: u32) -> Result<(), BringUpError> {
        ctx.new_i2c_devices(gpio_expanders(hw_rev)).await;

        let gpio_max = ctx.gpio_max(511).await;
        let mut layout = GPIO_LAYOUT.to_vec();
        if hw_rev > HW_REV_ALPHA {
            layout.push(FAN_DIR_LAYOUT);
        }
        ctx.gpio_apply(GpioNumbering::FromMax(gpio_max), &layout)
            .await
    }

    async fn init_poe(&self, ctx: &BringUp) {
        ctx.bsp_info("Init POE").await;
        ctx.modprobe("x86-64-ufispace-s6301-56stp-poe").await;
        ctx.new_i2c_device(&I2cDevice::new("s6301_56stp_poe", 0x20, 4))
            .await;
        ctx.write_attr(POE_INIT, 1).await;
    }
}

#[async_trait]
impl Platform for Board {
    fn info(&self) -> &'static PlatformInfo {
        &INFO
    }

    async fn baseconfig(&self, ctx: &BringUp) -> anyhow::Result<()> {
        for (driver, device, action) in I2C_BUS_ORDER {
            ctx.update_pci_device(driver, device, action).await;
        }
        ctx.modprobe_all(&KERNEL_MODULES).await;

        ctx.insmod("x86-64-ufispace-s6301-56stp-lpc").await?;
        ctx.check_i2c_status(I2C_STATUS).await;

        ctx.record_bmc_enable(false).await;
        let hw_rev = ctx.board_strap("mb_cpld/board_hw_id", 0).await;
        let ext_id = ctx.board_strap("mb_cpld/board_ext_id", 0).await;

        ctx.bsp_info("Init i2c MUXs").await;
        ctx.new_i2c_devices(&MUXES).await;
        ctx.init_mux_idle_state(&MUXES).await;

        ctx.insmod("x86-64-ufispace-sys-eeprom").await?;
        ctx.insmod("optoe").await?;

        ctx.bsp_info("Init sys eeprom").await;
        ctx.new_i2c_device(&I2cDevice::new("sys_eeprom", 0x56, BUS_ISMT))
            .await;

        ctx.bsp_info("Init port eeprom").await;
        let first_port = if ext_id == EXT_1BASE {
            SFP_PORT_BASE + 1
        } else {
            SFP_PORT_BASE
        };
        init_eeprom(ctx, first_port).await?;

        ctx.bsp_info("Init gpio").await;
        self.init_gpio(ctx, hw_rev).await?;

        ctx.bsp_info("Init HWMON").await;
        init_hwmon(ctx, hw_rev).await;

        self.init_poe(ctx).await;

        reset_port_leds(ctx).await;

        if let Some(led) = ctx.lpc("mb_cpld/led_sys") {
            ctx.write_attr(led, format!("{:#04x}", SYS_LED_GREEN)).await;
        }

        ctx.bsp_info("Init done").await;
        Ok(())
    }
}
