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
use crate::app::i2c::I2cStatusCheck;
use async_trait::async_trait;

pub static INFO: PlatformInfo = PlatformInfo {
    platform: "x86-64-ufispace-s9300-32d-r0",
    model: "s9300-32d",
    sys_object_id: ".9300.32",
    port_count: 32,
    port_config: "32x400",
    lpc: Some("/sys/devices/platform/x86_64_ufispace_s9300_32d_lpc"),
};

const MUXES: [I2cDevice; 6] = [
    I2cDevice::new("pca9548", 0x73, 0),
    I2cDevice::new("pca9548", 0x72, 0),
    I2cDevice::new("pca9548", 0x76, 9),
    I2cDevice::new("pca9548", 0x76, 10),
    I2cDevice::new("pca9548", 0x76, 11),
    I2cDevice::new("pca9548", 0x76, 12),
];

const CPLDS: [I2cDevice; 3] = [
    I2cDevice::new("s9300_32d_cpld1", 0x30, 2),
    I2cDevice::new("s9300_32d_cpld2", 0x31, 2),
    I2cDevice::new("s9300_32d_cpld3", 0x32, 2),
];

pub struct Board;

#[async_trait]
impl Platform for Board {
    fn info(&self) -> &'static PlatformInfo {
        &INFO
    }

    async fn baseconfig(&self, ctx: &BringUp) -> anyhow::Result<()> {
        ctx.insmod("x86-64-ufispace-s9300-32d-lpc").await?;

        ctx.check_i2c_status(I2cStatusCheck {
            bus: 0,
            mux: 0x73,
            reset: Some("mb_cpld/mux_reset"),
        })
        .await;
        ctx.record_bmc_enable(true).await;

        ctx.new_i2c_devices(&MUXES).await;
        ctx.init_mux_idle_state(&MUXES).await;

        ctx.insmod("x86-64-ufispace-eeprom-mb").await?;
        ctx.insmod("optoe").await?;

        ctx.new_i2c_device(&I2cDevice::new("mb_eeprom", 0x57, 0))
            .await;
        let ports = port_range(0, "QSFPDD", "optoe3", 17..49)
            .chain(port_range(32, "SFP", "sff8436", 13..17));
        ctx.init_port_eeproms(ports, PortLabels::Index).await?;

        ctx.insmod("x86-64-ufispace-s9300-32d-cpld").await?;
        ctx.new_i2c_devices(&CPLDS).await;

        ctx.enable_ipmi_maintenance_mode().await;
        ctx.insmod("i40e").await?;

        ctx.write_attr(ctx.client_attr(2, 0x30, "cpld_port_led_clr_ctrl"), 1)
            .await;
        Ok(())
    }
}
