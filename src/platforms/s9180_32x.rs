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
//! Tofino board without an LPC driver. Whether a BMC shares the management
//! bus decides between two sequences: the host owns the fan controller, PSU
//! and board-id expanders only when no BMC is fitted.
use super::Platform;
use crate::app::bring_up::{BringUp, I2cDevice, PlatformInfo};
use crate::app::eeprom::{PortEeprom, PortLabels};
use crate::app::error::BringUpError;
use crate::app::gpio::Direction;
use crate::app::i2c::{reg_write, RegisterWrite};
use crate::app::rov::{StrapRegister, TOFINO_VID};
use async_trait::async_trait;

pub static INFO: PlatformInfo = PlatformInfo {
    platform: "x86-64-ingrasys-s9180-32x-r0",
    model: "S9180-32X",
    sys_object_id: ".9180.32",
    port_count: 32,
    port_config: "32x100",
    lpc: None,
};

const MUXES: [I2cDevice; 8] = [
    I2cDevice::new("pca9548", 0x70, 0),
    I2cDevice::new("pca9548", 0x71, 1),
    I2cDevice::new("pca9548", 0x71, 2),
    I2cDevice::new("pca9548", 0x71, 3),
    I2cDevice::new("pca9548", 0x71, 4),
    I2cDevice::new("pca9548", 0x71, 7),
    I2cDevice::new("pca9548", 0x76, 0),
    I2cDevice::new("pca9545", 0x72, 0),
];

/// Muxes left to the host when the BMC owns the rest of the tree.
const BMC_MUXES: [I2cDevice; 6] = [
    I2cDevice::new("pca9548", 0x70, 0),
    I2cDevice::new("pca9548", 0x71, 1),
    I2cDevice::new("pca9548", 0x71, 2),
    I2cDevice::new("pca9548", 0x71, 3),
    I2cDevice::new("pca9548", 0x71, 4),
    I2cDevice::new("pca9548", 0x71, 7),
];

const IO_EXPANDERS: [I2cDevice; 10] = [
    I2cDevice::new("pca9535", 0x20, 5), // ABS port 0-15
    I2cDevice::new("pca9535", 0x21, 5), // ABS port 16-31
    I2cDevice::new("pca9535", 0x22, 5), // INT port 0-15
    I2cDevice::new("pca9535", 0x23, 5), // INT port 16-31
    I2cDevice::new("pca9535", 0x27, 5), // SFP status
    I2cDevice::new("pca9535", 0x20, 6), // LP mode port 0-15
    I2cDevice::new("pca9535", 0x21, 6), // LP mode port 16-31
    I2cDevice::new("pca9535", 0x22, 6), // RST port 0-15
    I2cDevice::new("pca9535", 0x23, 6), // RST port 16-31
    I2cDevice::new("pca9535", 0x25, 0), // PSU status
];

/// SFP status expander offsets driven by the host.
const SFP_OUTPUTS: [u32; 6] = [4, 5, 8, 9, 10, 11];
/// PSU status expander offsets with inverted polarity.
const PSU_ACTIVE_LOW: [u32; 8] = [1, 2, 4, 5, 6, 9, 10, 12];

const DUMMY_BMC_BOARD: &[RegisterWrite] = &[
    reg_write(0, 0x26, 4, 0x00),
    reg_write(0, 0x26, 5, 0x00),
    reg_write(0, 0x26, 2, 0x3f),
    reg_write(0, 0x26, 3, 0x1f),
    reg_write(0, 0x26, 6, 0xc0),
    reg_write(0, 0x26, 7, 0x00),
];

const CPU_BOARD: &[RegisterWrite] = &[reg_write(0, 0x77, 6, 0xff), reg_write(0, 0x77, 7, 0xff)];

const ABS_PORTS: &[RegisterWrite] = &[
    reg_write(5, 0x20, 4, 0x00),
    reg_write(5, 0x20, 5, 0x00),
    reg_write(5, 0x20, 6, 0xff),
    reg_write(5, 0x20, 7, 0xff),
    reg_write(5, 0x21, 4, 0x00),
    reg_write(5, 0x21, 5, 0x00),
    reg_write(5, 0x21, 6, 0xff),
    reg_write(5, 0x21, 7, 0xff),
    reg_write(5, 0x22, 4, 0x00),
    reg_write(5, 0x22, 5, 0x00),
    reg_write(5, 0x22, 6, 0xff),
    reg_write(5, 0x22, 7, 0xff),
];

const INT_PORTS_HIGH: &[RegisterWrite] = &[
    reg_write(5, 0x23, 4, 0x00),
    reg_write(5, 0x23, 5, 0x00),
    reg_write(5, 0x23, 6, 0xff),
    reg_write(5, 0x23, 7, 0xff),
];

const INT_PORTS_HIGH_BMC: &[RegisterWrite] = &[
    reg_write(5, 0x23, 4, 0x00),
    reg_write(5, 0x23, 5, 0x00),
    reg_write(5, 0x23, 2, 0xcf),
    reg_write(5, 0x23, 3, 0xf0),
    reg_write(5, 0x23, 6, 0xcf),
    reg_write(5, 0x23, 7, 0xf0),
];

/// SFP status, QSFP LP_MODE low and QSFP reset held, host GPIO.
const PORT_CONTROL: &[RegisterWrite] = &[
    reg_write(5, 0x27, 4, 0x00),
    reg_write(5, 0x27, 5, 0x00),
    reg_write(5, 0x27, 2, 0x00),
    reg_write(5, 0x27, 3, 0x00),
    reg_write(5, 0x27, 6, 0xcf),
    reg_write(5, 0x27, 7, 0xf0),
    reg_write(6, 0x20, 4, 0x00),
    reg_write(6, 0x20, 5, 0x00),
    reg_write(6, 0x20, 2, 0x00),
    reg_write(6, 0x20, 3, 0x00),
    reg_write(6, 0x20, 6, 0x00),
    reg_write(6, 0x20, 7, 0x00),
    reg_write(6, 0x21, 4, 0x00),
    reg_write(6, 0x21, 5, 0x00),
    reg_write(6, 0x21, 2, 0x00),
    reg_write(6, 0x21, 3, 0x00),
    reg_write(6, 0x21, 6, 0x00),
    reg_write(6, 0x21, 7, 0x00),
    reg_write(6, 0x22, 4, 0x00),
    reg_write(6, 0x22, 5, 0x00),
    reg_write(6, 0x22, 2, 0xff),
    reg_write(6, 0x22, 3, 0xff),
    reg_write(6, 0x22, 6, 0x00),
    reg_write(6, 0x22, 7, 0x00),
    reg_write(6, 0x23, 4, 0x00),
    reg_write(6, 0x23, 5, 0x00),
    reg_write(6, 0x23, 2, 0xff),
    reg_write(6, 0x23, 3, 0xff),
    reg_write(6, 0x23, 6, 0x00),
    reg_write(6, 0x23, 7, 0x00),
    reg_write(0, 0x74, 4, 0x00),
    reg_write(0, 0x74, 5, 0x00),
    reg_write(0, 0x74, 2, 0x0f),
    reg_write(0, 0x74, 3, 0xdf),
    reg_write(0, 0x74, 6, 0x08),
    reg_write(0, 0x74, 7, 0x1f),
];

/// Board id, dummy BMC board id, PSU and fan expanders.
const HOST_OWNED_EXPANDERS: &[RegisterWrite] = &[
    reg_write(51, 0x27, 4, 0x00),
    reg_write(51, 0x27, 5, 0x00),
    reg_write(51, 0x27, 6, 0xff),
    reg_write(51, 0x27, 7, 0xff),
    reg_write(0, 0x24, 4, 0x00),
    reg_write(0, 0x24, 5, 0x00),
    reg_write(0, 0x24, 6, 0xff),
    reg_write(0, 0x24, 7, 0xff),
    reg_write(0, 0x25, 4, 0x00),
    reg_write(0, 0x25, 5, 0x00),
    reg_write(0, 0x25, 2, 0x00),
    reg_write(0, 0x25, 3, 0x1d),
    reg_write(0, 0x25, 6, 0xdb),
    reg_write(0, 0x25, 7, 0x03),
    reg_write(59, 0x20, 4, 0x00),
    reg_write(59, 0x20, 5, 0x00),
    reg_write(59, 0x20, 2, 0x11),
    reg_write(59, 0x20, 3, 0x11),
    reg_write(59, 0x20, 6, 0xcc),
    reg_write(59, 0x20, 7, 0xcc),
];

/// W83795: FANIN 1-8 on, 9-14 off, PWM mode, then the voltage monitor.
const HW_MONITOR: &[RegisterWrite] = &[
    reg_write(56, 0x2f, 0x00, 0x80),
    reg_write(56, 0x2f, 0x06, 0xff),
    reg_write(56, 0x2f, 0x07, 0x00),
    reg_write(56, 0x2f, 0x00, 0x82),
    reg_write(56, 0x2f, 0x0f, 0x00),
    reg_write(56, 0x2f, 0x00, 0x80),
    reg_write(56, 0x2f, 0x01, 0x1c),
    reg_write(56, 0x2f, 0x00, 0x80),
    reg_write(56, 0x2f, 0x02, 0xff),
    reg_write(56, 0x2f, 0x03, 0x50),
    reg_write(56, 0x2f, 0x04, 0x0a),
    reg_write(56, 0x2f, 0x00, 0x80),
    reg_write(56, 0x2f, 0x01, 0x1d),
];

const SYS_LED: &[RegisterWrite] = &[
    reg_write(50, 0x75, 2, 0x01),
    reg_write(50, 0x75, 4, 0x00),
    reg_write(50, 0x75, 5, 0x00),
    reg_write(50, 0x75, 6, 0x00),
    reg_write(50, 0x75, 7, 0x00),
];

const THERMAL_SENSORS: [I2cDevice; 6] = [
    I2cDevice::new("lm86", 0x4c, 53),  // ASIC coretemp and front MAC
    I2cDevice::new("tmp75", 0x4f, 0),  // CPU board
    I2cDevice::new("tmp75", 0x48, 53), // near PSU1
    I2cDevice::new("tmp75", 0x4a, 53), // rear MAC
    I2cDevice::new("tmp75", 0x4b, 53), // near port 32
    I2cDevice::new("tmp75", 0x4d, 53), // near PSU2
];

const FAN_PWM: [&str; 2] = [
    "/sys/class/hwmon/hwmon1/device/pwm1",
    "/sys/class/hwmon/hwmon1/device/pwm2",
];
const FAN_DEFAULT_PWM: u8 = 120;

const MAC_VID: StrapRegister = StrapRegister {
    bus: 44,
    addr: 0x33,
    reg: 0x42,
    mask: 0x7,
};

/// Bus of the module EEPROM behind front panel `port` (1-based). The QSFP
/// channels are wired pairwise swapped on each mux.
pub fn port_bus(port: u32) -> Option<u32> {
    match port {
        1..=32 => {
            let group = (port - 1) / 8;
            Some(9 + group * 8 + (((port - 1) % 8) ^ 1))
        }
        33 => Some(45),
        34 => Some(46),
        _ => None,
    }
}

fn port_eeproms() -> impl Iterator<Item = PortEeprom> {
    (1..=34).filter_map(|port| {
        let driver = if port <= 32 { "optoe1" } else { "sff8436" };
        port_bus(port).map(|bus| PortEeprom::new(port, "QSFP", driver, bus))
    })
}

pub struct Board;

impl Board {
    async fn init_gpio(&self, ctx: &BringUp, bmc: bool) -> Result<(), BringUpError> {
        let expanders = if bmc {
            &IO_EXPANDERS[..9]
        } else {
            &IO_EXPANDERS[..]
        };
        ctx.new_i2c_devices(expanders).await;
        let stack = ctx.gpiochip_stack().await?;

        let qsfp = stack.lines(0..4)?;
        let sfp = stack.block(4)?;
        let lp_mode = stack.lines(5..7)?;
        let reset = stack.lines(7..9)?;
        let psu = if bmc { None } else { Some(stack.block(9)?) };

        // presence and interrupt of every QSFP
        for line in qsfp {
            ctx.gpio_export(line).await;
            ctx.gpio_active_low(line, true).await;
        }

        for line in sfp.clone() {
            ctx.gpio_export(line).await;
            if SFP_OUTPUTS.contains(&(line - sfp.start)) {
                ctx.gpio_direction(line, Direction::Out).await;
            } else {
                ctx.gpio_active_low(line, true).await;
            }
        }

        // LP_MODE
        for line in lp_mode {
            ctx.gpio_export(line).await;
            ctx.gpio_direction(line, Direction::Out).await;
        }

        // reset, released
        for line in reset {
            ctx.gpio_export(line).await;
            ctx.gpio_direction(line, Direction::Out).await;
            ctx.gpio_active_low(line, true).await;
            ctx.gpio_value(line, 0).await;
        }

        let Some(psu) = psu else {
            return Ok(());
        };
        for line in psu.clone() {
            ctx.gpio_export(line).await;
            if PSU_ACTIVE_LOW.contains(&(line - psu.start)) {
                ctx.gpio_active_low(line, true).await;
            }
        }
        Ok(())
    }

    async fn baseconfig_standalone(&self, ctx: &BringUp) -> anyhow::Result<()> {
        ctx.insmod("eeprom_mb").await?;
        ctx.new_i2c_devices(&[
            I2cDevice::new("mb_eeprom", 0x55, 0), // main board
            I2cDevice::new("mb_eeprom", 0x51, 0), // CPU board
        ])
        .await;

        ctx.modprobe_all(&["w83795", "eeprom", "gpio_pca953x"]).await;
        ctx.insmod("optoe").await?;

        ctx.new_i2c_devices(&MUXES).await;
        ctx.init_mux_idle_state(&MUXES).await;

        // golden finger
        ctx.i2c_get(44, 0x74, 2).await;

        for table in [
            DUMMY_BMC_BOARD,
            CPU_BOARD,
            ABS_PORTS,
            INT_PORTS_HIGH,
            PORT_CONTROL,
            HOST_OWNED_EXPANDERS,
            HW_MONITOR,
        ] {
            ctx.i2c_set_table(table).await;
        }
        ctx.new_i2c_device(&I2cDevice::new("w83795adg", 0x2f, 56))
            .await;
        for pwm in FAN_PWM {
            ctx.write_attr(pwm, FAN_DEFAULT_PWM).await;
        }

        ctx.new_i2c_devices(&THERMAL_SENSORS).await;

        self.init_gpio(ctx, false).await?;
        ctx.init_port_eeproms(port_eeproms(), PortLabels::Index)
            .await?;

        // PSU FRU
        ctx.new_i2c_devices(&[
            I2cDevice::new("eeprom", 0x50, 57),
            I2cDevice::new("eeprom", 0x50, 58),
        ])
        .await;

        ctx.init_mac_rov_register(&TOFINO_VID, MAC_VID, (55, 0x22))
            .await;
        ctx.i2c_set_table(SYS_LED).await;
        Ok(())
    }

    async fn baseconfig_bmc(&self, ctx: &BringUp) -> anyhow::Result<()> {
        ctx.insmod("eeprom_mb").await?;
        ctx.new_i2c_device(&I2cDevice::new("mb_eeprom", 0x51, 0))
            .await;

        ctx.modprobe_all(&["eeprom", "gpio_pca953x"]).await;
        ctx.insmod("optoe").await?;

        ctx.new_i2c_devices(&BMC_MUXES).await;

        // golden finger
        ctx.i2c_get(44, 0x74, 2).await;

        for table in [CPU_BOARD, ABS_PORTS, INT_PORTS_HIGH_BMC, PORT_CONTROL] {
            ctx.i2c_set_table(table).await;
        }

        ctx.new_i2c_device(&I2cDevice::new("tmp75", 0x4f, 0)).await;

        self.init_gpio(ctx, true).await?;
        ctx.init_port_eeproms(port_eeproms(), PortLabels::Index)
            .await?;

        ctx.init_mac_rov_register(&TOFINO_VID, MAC_VID, (8, 0x22))
            .await;
        Ok(())
    }
}

#[async_trait]
impl Platform for Board {
    fn info(&self) -> &'static PlatformInfo {
        &INFO
    }

    async fn baseconfig(&self, ctx: &BringUp) -> anyhow::Result<()> {
        let bmc = ctx.probe_bmc(0, 0x76).await;
        ctx.record_bmc_enable(bmc).await;

        if bmc {
            self.baseconfig_bmc(ctx).await
        } else {
            self.baseconfig_standalone(ctx).await
        }
    }
}
