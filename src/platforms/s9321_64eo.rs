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
use super::s9321_64e::{init_common, EVENT_CTRL, PORT_LED_CTRL};
use super::Platform;
use crate::app::bring_up::{BringUp, ClientAttr, I2cDevice, PlatformInfo};
use crate::app::rov::AvsEntry;
use async_trait::async_trait;

pub static INFO: PlatformInfo = PlatformInfo {
    platform: "x86-64-ufispace-s9321-64eo-r0",
    model: "S9321-64EO",
    sys_object_id: ".9321.64",
    port_count: 48,
    port_config: "40x100 + 8x400",
    lpc: Some("/sys/devices/platform/x86_64_ufispace_s9321_64eo_lpc"),
};

const CPLDS: [I2cDevice; 4] = [
    I2cDevice::new("s9321_64eo_cpld1", 0x30, 1),
    I2cDevice::new("s9321_64eo_cpld2", 0x31, 1),
    I2cDevice::new("s9321_64eo_cpld3", 0x32, 1),
    I2cDevice::new("s9321_64eo_fpga", 0x37, 1),
];

const FPGA_EVENT_CTRL: ClientAttr = ClientAttr::new(1, 0x37, "fpga_evt_ctrl");
const MAC_ROV: ClientAttr = ClientAttr::new(1, 0x30, "cpld_mac_rov");

const MAC_AVS: [AvsEntry; 11] = [
    AvsEntry { code: 0x84, vdd: "0.7875", vout: 0x064f },
    AvsEntry { code: 0x86, vdd: "0.775", vout: 0x063b },
    AvsEntry { code: 0x88, vdd: "0.7625", vout: 0x0622 },
    AvsEntry { code: 0x8a, vdd: "0.75", vout: 0x060e },
    AvsEntry { code: 0x8c, vdd: "0.7375", vout: 0x05f5 },
    AvsEntry { code: 0x8e, vdd: "0.725", vout: 0x05dc },
    AvsEntry { code: 0x90, vdd: "0.7125", vout: 0x05c3 },
    AvsEntry { code: 0x92, vdd: "0.7", vout: 0x05aa },
    AvsEntry { code: 0x94, vdd: "0.6875", vout: 0x0591 },
    AvsEntry { code: 0x96, vdd: "0.675", vout: 0x0578 },
    AvsEntry { code: 0x98, vdd: "0.6625", vout: 0x055f },
];
const MAC_REGULATORS: [(u32, u16); 1] = [(13, 0x64)];

pub struct Board;

#[async_trait]
impl Platform for Board {
    fn info(&self) -> &'static PlatformInfo {
        &INFO
    }

    async fn baseconfig(&self, ctx: &BringUp) -> anyhow::Result<()> {
        init_common(ctx, "s9321-64eo", &CPLDS, "OSFP").await?;

        ctx.bsp_info("Init MAC ROV").await;
        ctx.init_mac_avs(&MAC_ROV.path(), &MAC_AVS, &MAC_REGULATORS)
            .await?;

        ctx.enable_ipmi_maintenance_mode().await;
        ctx.disable_bmc_watchdog().await;

        ctx.bsp_info("Enable event control").await;
        for attr in EVENT_CTRL.iter().chain([&FPGA_EVENT_CTRL]) {
            ctx.write_attr(attr.path(), 1).await;
        }
        ctx.bsp_info("Enable port led control").await;
        ctx.write_attr(PORT_LED_CTRL.path(), 1).await;

        ctx.bsp_info("Init done").await;
        Ok(())
    }
}
