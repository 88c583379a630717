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
use crate::app::i2c::I2cStatusCheck;
use crate::app::rov::{RegWidth, RovRail, VidTable};
use anyhow::Context;
use async_trait::async_trait;

pub static INFO: PlatformInfo = PlatformInfo {
    platform: "x86-64-ufispace-s9701-82dc-r0",
    model: "s9701-82dc",
    sys_object_id: ".9701.82",
    port_count: 82,
    port_config: "64x25 + 12x100 + 6x400",
    lpc: Some("/sys/devices/platform/x86_64_ufispace_s9701_82dc_lpc"),
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

const MUXES: [I2cDevice; 14] = [
    I2cDevice::new("pca9548", 0x75, 0),
    I2cDevice::new("pca9548", 0x73, 0),
    I2cDevice::new("pca9548", 0x72, 0),
    I2cDevice::new("pca9548", 0x76, 17),
    I2cDevice::new("pca9548", 0x76, 18),
    I2cDevice::new("pca9548", 0x76, 19),
    I2cDevice::new("pca9548", 0x76, 20),
    I2cDevice::new("pca9548", 0x76, 21),
    I2cDevice::new("pca9548", 0x76, 22),
    I2cDevice::new("pca9548", 0x76, 23),
    I2cDevice::new("pca9548", 0x76, 24),
    I2cDevice::new("pca9548", 0x76, 6),
    I2cDevice::new("pca9548", 0x76, 7),
    I2cDevice::new("pca9548", 0x76, 8),
];

const CPLDS: [I2cDevice; 4] = [
    I2cDevice::new("s9701_82dc_cpld1", 0x30, 1),
    I2cDevice::new("s9701_82dc_cpld2", 0x31, 1),
    I2cDevice::new("s9701_82dc_cpld3", 0x32, 1),
    I2cDevice::new("s9701_82dc_cpld4", 0x33, 1),
];

/// VR13 VID codes, 5mV per step from 0.25V.
const MAC_VID: VidTable = VidTable {
    vdd: [0.82, 0.82, 0.90, 0.78, 0.80, 0.84, 0.86, 0.88],
    code: [0x73, 0x73, 0x83, 0x6b, 0x6f, 0x77, 0x7b, 0x7f],
};

const ROV_RAILS: [RovRail; 1] = [RovRail {
    source: ClientAttr::new(1, 0x30, "cpld_mac_status_3"),
    shift: 5,
    mask: 0b111,
    bus: 9,
    addr: 0x70,
    width: RegWidth::Word,
}];

pub struct Board;

#[async_trait]
impl Platform for Board {
    fn info(&self) -> &'static PlatformInfo {
        &INFO
    }

    async fn baseconfig(&self, ctx: &BringUp) -> anyhow::Result<()> {
        ctx.modprobe_all(&KERNEL_MODULES).await;
        ctx.insmod("x86-64-ufispace-s9701-82dc-lpc").await?;

        ctx.check_i2c_status(I2cStatusCheck {
            bus: 0,
            mux: 0x75,
            reset: Some("mb_cpld/mux_reset"),
        })
        .await;
        ctx.record_bmc_enable(true).await;

        ctx.bsp_info("Init i2c").await;
        ctx.new_i2c_devices(&MUXES).await;
        ctx.init_mux_idle_state(&MUXES).await;

        ctx.insmod("x86-64-ufispace-eeprom-mb").await?;
        ctx.insmod("optoe").await?;

        ctx.bsp_info("Init eeprom").await;
        ctx.new_i2c_device(&I2cDevice::new("mb_eeprom", 0x57, 0))
            .await;
        let ports = port_range(0, "SFP+", "optoe2", 25..89)
            .chain(port_range(64, "QSFP", "optoe1", 89..101))
            .chain(port_range(76, "QSFPDD", "optoe3", 105..111))
            .chain(port_range(82, "MGMT", "optoe2", 10..12));
        ctx.init_port_eeproms(ports, PortLabels::Index).await?;

        ctx.bsp_info("Init mb cpld").await;
        ctx.insmod("x86-64-ufispace-s9701-82dc-cpld").await?;
        ctx.new_i2c_devices(&CPLDS).await;

        ctx.bsp_info("Init mac rov").await;
        ctx.init_mac_rov(&MAC_VID, &ROV_RAILS)
            .await
            .context("mac rov")?;

        ctx.enable_ipmi_maintenance_mode().await;
        ctx.disable_bmc_watchdog().await;

        ctx.bsp_info("Init bcm82752").await;
        // the PHY init fails unless i40e is up
        ctx.insmod("i40e").await?;
        ctx.epdm_cli(&["init"]).await;

        ctx.bsp_info("Init done").await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::bring_up::test_support::bring_up;
    use crate::hal::stub::Action;
    use crate::hal::{RecordingHal, SmbusTarget, SmbusWrite};

    const MAC_STATUS: &str = "/sys/bus/i2c/devices/1-0030/cpld_mac_status_3";

    fn hal() -> RecordingHal {
        [
            "x86-64-ufispace-s9701-82dc-lpc",
            "x86-64-ufispace-eeprom-mb",
            "optoe",
            "x86-64-ufispace-s9701-82dc-cpld",
            "i40e",
        ]
        .iter()
        .fold(RecordingHal::new(), |hal, m| {
            hal.with_file(format!("/lib/modules/5.10.0-onl/onl/{}.ko", m), "")
        })
    }

    #[tokio::test]
    async fn rov_stamp_from_upper_bits() {
        let (hal, ctx) = bring_up(hal().with_file(MAC_STATUS, "0x5f"), &INFO);
        Board.baseconfig(&ctx).await.unwrap();

        // 0x5f >> 5 == 2
        assert!(hal.actions().contains(&Action::SmbusWrite {
            target: SmbusTarget::new(9, 0x70),
            op: SmbusWrite::WordData(0x21, 0x83),
        }));
        let commands = hal.commands();
        let i40e = commands.iter().position(|c| c.contains("i40e.ko"));
        let phy = commands.iter().position(|c| c.ends_with("epdm_cli init"));
        assert!(i40e.is_some() && phy.is_some() && i40e < phy);
    }

    #[tokio::test]
    async fn port_names_run_through_management_ports() {
        let (hal, ctx) = bring_up(hal().with_file(MAC_STATUS, "0x00"), &INFO);
        Board.baseconfig(&ctx).await.unwrap();

        let labels: Vec<_> = hal
            .writes()
            .into_iter()
            .filter(|(p, _)| p.ends_with("port_name"))
            .collect();
        assert_eq!(labels.len(), 84);
        assert_eq!(
            labels[76],
            ("/sys/bus/i2c/devices/105-0050/port_name".to_string(), "76".to_string())
        );
        assert_eq!(
            labels[83],
            ("/sys/bus/i2c/devices/11-0050/port_name".to_string(), "83".to_string())
        );
    }

    #[tokio::test]
    async fn missing_rov_stamp_is_fatal() {
        let (_, ctx) = bring_up(hal(), &INFO);
        assert!(Board.baseconfig(&ctx).await.is_err());
    }
}
