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
use crate::app::eeprom::{port_range, PortEeprom, PortLabels};
use crate::app::gpio::{Direction, GpioLayout, GpioNumbering};
use crate::app::i2c::I2cStatusCheck;
use async_trait::async_trait;

pub static INFO: PlatformInfo = PlatformInfo {
    platform: "x86-64-ufispace-s9321-64e-r0",
    model: "S9321-64E",
    sys_object_id: ".9321.64",
    port_count: 48,
    port_config: "40x100 + 8x400",
    lpc: Some("/sys/devices/platform/x86_64_ufispace_s9321_64e_lpc"),
};

pub(super) const KERNEL_MODULES: [&str; 9] = [
    "i2c_i801",
    "i2c_dev",
    "i2c_mux",
    "gpio_pca953x",
    "i2c_mux_pca954x",
    "coretemp",
    "lm75",
    "ipmi_devintf",
    "ipmi_si",
];

pub(super) const MUXES: [I2cDevice; 2] = [
    I2cDevice::new("pca9548", 0x72, 0), // CPLD
    I2cDevice::new("pca9548", 0x73, 0), // DC
];

pub(super) const I2C_STATUS: I2cStatusCheck = I2cStatusCheck {
    bus: 0,
    mux: 0x72,
    reset: None,
};

pub(super) const EVENT_CTRL: [ClientAttr; 3] = [
    ClientAttr::new(1, 0x30, "cpld_evt_ctrl"),
    ClientAttr::new(1, 0x31, "cpld_evt_ctrl"),
    ClientAttr::new(1, 0x32, "cpld_evt_ctrl"),
];

pub(super) const PORT_LED_CTRL: ClientAttr = ClientAttr::new(1, 0x30, "cpld_port_led_clr");

/// Front panel cages in groups of 16 followed by the two management SFPs.
pub(super) fn front_ports(kind: &'static str) -> impl Iterator<Item = PortEeprom> {
    [(0, 17), (16, 49), (32, 33), (48, 65)]
        .into_iter()
        .flat_map(move |(first, bus)| port_range(first, kind, "optoe3", bus..bus + 16))
        .chain(port_range(64, "MGMT", "optoe2", 81..83))
}

/// Brings the board up to the point where both variants diverge: LPC, muxes,
/// system EEPROM, CPLDs and labelled port EEPROMs. Returns the hw revision
/// and `bsp_gpio_max`.
pub(super) async fn init_common(
    ctx: &BringUp,
    sku: &str,
    cplds: &[I2cDevice],
    port_kind: &'static str,
) -> anyhow::Result<(u32, u32)> {
    ctx.modprobe_all(&KERNEL_MODULES).await;
    ctx.insmod(&format!("x86-64-ufispace-{}-lpc", sku)).await?;

    let board = ctx.board_version().await;
    let gpio_max = ctx.gpio_max(511).await;

    ctx.check_i2c_status(I2C_STATUS).await;
    ctx.record_bmc_enable(true).await;

    ctx.bsp_info("Init I2C").await;
    ctx.new_i2c_devices(&MUXES).await;
    ctx.init_mux_idle_state(&MUXES).await;

    ctx.bsp_info("Init sys eeprom").await;
    ctx.insmod("x86-64-ufispace-sys-eeprom").await?;
    ctx.new_i2c_device(&I2cDevice::new("sys_eeprom", 0x57, 0))
        .await;

    // port EEPROMs stay on the legacy I2C path, the FPGA PCI path is off
    ctx.bsp_info("Init CPLD").await;
    if let Some(path) = ctx.lpc("bsp/bsp_fpga_pci_enable") {
        ctx.write_attr_if_exists(path, 0).await;
    }
    ctx.insmod_with(&format!("x86-64-ufispace-{}-cpld", sku), true, &[("mux_en", "1")])
        .await?;
    ctx.new_i2c_devices(cplds).await;

    ctx.bsp_info("Init legacy I2C port eeprom").await;
    ctx.insmod("optoe").await?;
    let path = ctx.platform_onl_dir().join("port_config.yml");
    let config = ctx.load_port_config(&path).await?;
    ctx.init_port_eeproms(
        front_ports(port_kind),
        PortLabels::Config {
            config: &config,
            path: &path,
        },
    )
    .await?;

    Ok((board.hw_rev, gpio_max))
}

/// Seven segment display of the alpha LED board, counted down from
/// `bsp_gpio_max`.
const SEVEN_SEGMENT: GpioLayout<'static> = GpioLayout {
    offsets: 0..16,
    default: Direction::Low,
    overrides: &[
        (0, Direction::In),
        (5, Direction::High),
        (8, Direction::In),
        (12, Direction::High),
    ],
};

/// ID LED, the only line left on later LED boards.
const ID_LED: GpioLayout<'static> = GpioLayout {
    offsets: 0..1,
    default: Direction::Low,
    overrides: &[],
};

const CPLDS: [I2cDevice; 4] = [
    I2cDevice::new("s9321_64e_cpld1", 0x30, 1),
    I2cDevice::new("s9321_64e_cpld2", 0x31, 1),
    I2cDevice::new("s9321_64e_cpld3", 0x32, 1),
    I2cDevice::new("s9321_64e_fpga", 0x37, 1),
];

pub struct Board;

#[async_trait]
impl Platform for Board {
    fn info(&self) -> &'static PlatformInfo {
        &INFO
    }

    async fn baseconfig(&self, ctx: &BringUp) -> anyhow::Result<()> {
        let (hw_rev, gpio_max) = init_common(ctx, "s9321-64e", &CPLDS, "QSFPDD").await?;

        ctx.bsp_info("Init gpio").await;
        ctx.new_i2c_device(&I2cDevice::new("pca9555", 0x20, 4)).await;
        let layout = if hw_rev == 1 { SEVEN_SEGMENT } else { ID_LED };
        ctx.gpio_apply(GpioNumbering::FromMax(gpio_max), &[layout])
            .await?;

        ctx.enable_ipmi_maintenance_mode().await;
        ctx.disable_bmc_watchdog().await;

        ctx.bsp_info("Enable event control").await;
        for attr in EVENT_CTRL {
            ctx.write_attr(attr.path(), 1).await;
        }
        ctx.bsp_info("Enable port led control").await;
        ctx.write_attr(PORT_LED_CTRL.path(), 1).await;

        // ice has to be loaded before the PHY is initialised
        ctx.bsp_info("Init ice").await;
        ctx.insmod_optional("intel_auxiliary").await?;
        ctx.insmod("ice").await?;

        ctx.bsp_info("Init bcm82399").await;
        ctx.epdm_cli(&["init", "-s", "10G"]).await;

        ctx.bsp_info("Init done").await;
        Ok(())
    }
}
