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
use super::s9501_16smt::{board_id, init_sfp_gpio, BETA1_OUTPUTS, SFP_GPIO_LINES};
use super::Platform;
use crate::app::bring_up::{BringUp, I2cDevice, PciAction, PlatformInfo};
use crate::app::eeprom::{port_range, PortLabels};
use crate::app::i2c::I2cStatusCheck;
use async_trait::async_trait;
use std::ops::Range;
use tracing::info;

pub static INFO: PlatformInfo = PlatformInfo {
    platform: "x86-64-ufispace-s9502-12sm-r0",
    model: "S9502-12SM",
    sys_object_id: ".9502.12",
    port_count: 12,
    port_config: "8x1 + 4x10",
    lpc: Some("/sys/devices/platform/x86_64_ufispace_s9502_12sm_lpc"),
};

const BUS_I801: u32 = 0;
const BUS_ISMT: u32 = 1;

const I2C_BUS_ORDER: [(&str, &str, PciAction); 4] = [
    ("i801_smbus", "0000:00:1f.4", PciAction::Unbind),
    ("ismt_smbus", "0000:00:12.0", PciAction::Unbind),
    ("i801_smbus", "0000:00:1f.4", PciAction::Bind),
    ("ismt_smbus", "0000:00:12.0", PciAction::Bind),
];

const KERNEL_MODULES: [&str; 10] = [
    "i2c_i801",
    "i2c_ismt",
    "i2c_dev",
    "gpio_pca953x",
    "i2c_mux_pca954x",
    "coretemp",
    "lm90",
    "ucd9000",
    "ipmi_devintf",
    "ipmi_si",
];

const MUXES: [I2cDevice; 5] = [
    I2cDevice::new("pca9546", 0x75, BUS_ISMT),      // timing root
    I2cDevice::new("pca9546", 0x77, BUS_I801),      // hwmon root
    I2cDevice::new("pca9546", 0x76, BUS_I801),      // SFP root
    I2cDevice::new("pca9548", 0x72, BUS_ISMT + 12), // SFP 12-19
    I2cDevice::new("pca9548", 0x73, BUS_ISMT + 12), // SFP 20-27
];

const SFP_BUSES: Range<u32> = BUS_ISMT + 13..BUS_ISMT + 25;

/// Board id, TX_DIS, TX_FLT, RATE_SELECT, MOD_ABS and RX_LOS expanders.
const GPIO_EXPANDERS: [I2cDevice; 11] = [
    I2cDevice::new("pca9535", 0x20, 4),
    I2cDevice::new("pca9535", 0x22, 10),
    I2cDevice::new("pca9535", 0x24, 10),
    I2cDevice::new("pca9535", 0x26, 11),
    I2cDevice::new("pca9535", 0x27, 11),
    I2cDevice::new("pca9535", 0x25, 11),
    I2cDevice::new("pca9535", 0x23, 11),
    I2cDevice::new("pca9535", 0x20, 12),
    I2cDevice::new("pca9535", 0x22, 12),
    I2cDevice::new("pca9535", 0x21, 12),
    I2cDevice::new("pca9535", 0x24, 12),
];

pub(super) const HWMON: [I2cDevice; 2] = [
    I2cDevice::new("ucd90124", 0x41, 9),
    I2cDevice::new("tmp451", 0x4e, 9),
];

/// The port muxes are only reachable with `mux_ctrl` at its default.
pub(super) async fn init_mux_ctrl(ctx: &BringUp) {
    const DEFAULT: i64 = 0;
    let Some(path) = ctx.lpc("mb_cpld/mux_ctrl") else {
        return;
    };
    let mux_ctrl = match ctx.read_int(&path, 10).await {
        Ok(value) => value,
        Err(e) => {
            info!("Get mux ctrl from LPC failed: {}", e);
            return;
        }
    };
    if mux_ctrl != DEFAULT {
        info!(
            "Invalid Mux ctrl value({}), set to default {}",
            mux_ctrl, DEFAULT
        );
        ctx.write_attr(&path, DEFAULT).await;
    }
}

/// Muxes, main board and port EEPROMs. Ports are labelled from `first_port`.
pub(super) async fn init_i2c(ctx: &BringUp, first_port: u32) -> anyhow::Result<()> {
    ctx.new_i2c_devices(&MUXES).await;
    ctx.init_mux_idle_state(&MUXES).await;
    ctx.insmod("x86-64-ufispace-eeprom-mb").await?;
    ctx.insmod("optoe").await?;

    ctx.bsp_info("Init mb eeprom").await;
    ctx.new_i2c_device(&I2cDevice::new("mb_eeprom", 0x57, BUS_ISMT))
        .await;

    ctx.bsp_info("Init port eeprom").await;
    ctx.init_port_eeproms(
        port_range(first_port, "SFP", "optoe2", SFP_BUSES),
        PortLabels::Index,
    )
    .await?;
    Ok(())
}

/// Same SFP control lines on every build. Nothing is exported when the
/// board id cannot be read.
pub(super) async fn init_gpio(ctx: &BringUp) {
    ctx.new_i2c_devices(&GPIO_EXPANDERS).await;
    if board_id(ctx, "board_id_0").await.is_none() {
        return;
    }
    info!("Alpha 1 and later GPIO init");
    init_sfp_gpio(ctx, SFP_GPIO_LINES, &BETA1_OUTPUTS).await;
}

pub struct Board;

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
        ctx.insmod("x86-64-ufispace-s9502-12sm-lpc").await?;

        ctx.check_i2c_status(I2cStatusCheck {
            bus: BUS_I801,
            mux: 0x76,
            reset: Some("mb_cpld/mux_reset"),
        })
        .await;
        ctx.record_bmc_enable(false).await;

        ctx.modprobe("i2c-ismt").await;
        init_mux_ctrl(ctx).await;

        ctx.bsp_info("Init i2c MUXs").await;
        init_i2c(ctx, 0).await?;

        ctx.bsp_info("Init gpio").await;
        init_gpio(ctx).await;

        ctx.bsp_info("Init HWMON").await;
        ctx.modprobe_all(&["ucd9000", "lm90"]).await;
        ctx.new_i2c_devices(&HWMON).await;
        ctx.modprobe("jc42").await;
        ctx.new_i2c_devices(&[
            I2cDevice::new("jc42", 0x1a, BUS_I801),
            I2cDevice::new("jc42", 0x1b, BUS_I801),
        ])
        .await;

        ctx.sync_sel_time().await;
        ctx.bsp_info("Init done").await;
        Ok(())
    }
}
