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
use crate::app::rov::{RegWidth, RovRail, JERICHO2_VID};
use anyhow::Context;
use async_trait::async_trait;

pub static INFO: PlatformInfo = PlatformInfo {
    platform: "x86-64-ufispace-s9610-36d-r0",
    model: "S9610-36D",
    sys_object_id: ".9610.36",
    port_count: 36,
    port_config: "36x400",
    lpc: Some("/sys/devices/platform/x86_64_ufispace_s9610_36d_lpc"),
};

const MUXES: [I2cDevice; 8] = [
    I2cDevice::new("pca9548", 0x71, 0),  // CPLD
    I2cDevice::new("pca9548", 0x72, 0),  // NIF root
    I2cDevice::new("pca9548", 0x73, 0),  // DC
    I2cDevice::new("pca9548", 0x76, 10), // NIF 1
    I2cDevice::new("pca9548", 0x76, 11),
    I2cDevice::new("pca9548", 0x76, 12),
    I2cDevice::new("pca9548", 0x76, 13),
    I2cDevice::new("pca9548", 0x76, 14),
];

const CPLDS: [I2cDevice; 3] = [
    I2cDevice::new("s9610_36d_cpld1", 0x30, 1),
    I2cDevice::new("s9610_36d_cpld2", 0x31, 1),
    I2cDevice::new("s9610_36d_cpld3", 0x32, 1),
];

const MAC_ROV: ClientAttr = ClientAttr::new(1, 0x30, "cpld_mac_rov");

const ROV_RAILS: [RovRail; 2] = [
    RovRail {
        source: MAC_ROV,
        shift: 0,
        mask: 0b111,
        bus: 21,
        addr: 0x60,
        width: RegWidth::Word,
    },
    RovRail {
        source: MAC_ROV,
        shift: 3,
        mask: 0b111,
        bus: 21,
        addr: 0x62,
        width: RegWidth::Word,
    },
];

/// Beacon LED expander (offsets 0-15) and CPU board expander (16-31),
/// counted down from `bsp_gpio_max`.
const GPIO_LAYOUT: [GpioLayout<'static>; 2] = [
    GpioLayout {
        offsets: 0..16,
        default: Direction::Low,
        overrides: &[
            (0, Direction::In),
            (5, Direction::High),
            (8, Direction::In),
            (12, Direction::High),
        ],
    },
    GpioLayout {
        offsets: 16..32,
        default: Direction::In,
        overrides: &[],
    },
];

pub struct Board;

#[async_trait]
impl Platform for Board {
    fn info(&self) -> &'static PlatformInfo {
        &INFO
    }

    async fn baseconfig(&self, ctx: &BringUp) -> anyhow::Result<()> {
        ctx.insmod("x86-64-ufispace-s9610-36d-lpc").await?;

        ctx.check_i2c_status(I2cStatusCheck {
            bus: 0,
            mux: 0x71,
            reset: Some("mb_cpld/mux_reset"),
        })
        .await;

        ctx.golden_finger(0, 0x71, 0x1, &[0x30, 0x31, 0x32]).await;

        ctx.bsp_info("Init PCA9548").await;
        ctx.new_i2c_devices(&MUXES).await;
        ctx.init_mux_idle_state(&MUXES).await;

        ctx.insmod("x86-64-ufispace-sys-eeprom").await?;
        ctx.insmod("optoe").await?;

        ctx.bsp_info("Init cpu eeprom").await;
        ctx.new_i2c_device(&I2cDevice::new("sys_eeprom", 0x57, 0))
            .await;

        ctx.bsp_info("Init port eeprom").await;
        let path = ctx.current_onl_dir().join("port_config.yml");
        let config = ctx.load_port_config(&path).await?;
        let labels = PortLabels::Config {
            config: &config,
            path: &path,
        };
        ctx.init_port_eeproms(port_range(0, "QSFPDD", "optoe3", 25..61), labels)
            .await?;
        ctx.init_port_eeproms(port_range(0, "SFP", "optoe2", 61..63), labels)
            .await?;

        let gpio_max = ctx.gpio_max(511).await;
        ctx.bsp_info("Init GPIO sysfs").await;
        ctx.new_i2c_devices(&[
            I2cDevice::new("pca9555", 0x20, 4),
            I2cDevice::new("pca9539", 0x77, 0),
        ])
        .await;
        ctx.gpio_apply(GpioNumbering::FromMax(gpio_max), &GPIO_LAYOUT)
            .await?;

        ctx.bsp_info("Init CPLD").await;
        ctx.insmod("x86-64-ufispace-s9610-36d-cpld").await?;
        ctx.new_i2c_devices(&CPLDS).await;

        ctx.bsp_info("Init MAC ROV").await;
        ctx.init_mac_rov(&JERICHO2_VID, &ROV_RAILS)
            .await
            .context("mac rov")?;

        for cpld in &CPLDS {
            ctx.write_attr(cpld.path().join("cpld_evt_ctrl"), 1).await;
        }

        ctx.enable_ipmi_maintenance_mode().await;

        // i40e has to be up before the bcm82752 init
        ctx.bsp_info("Init i40e").await;
        ctx.insmod("i40e").await?;

        ctx.bsp_info("Init bcm82752").await;
        ctx.epdm_cli(&["init", "mdio", "10G", "optics"]).await;

        ctx.bsp_info("Init done").await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::bring_up::test_support::{bring_up, port_config_yaml, port_labels};
    use crate::hal::stub::Action;
    use crate::hal::{RecordingHal, SmbusTarget, SmbusWrite};

    const MODULES: &str = "/lib/modules/5.10.0-onl/onl/onl";

    fn hal() -> RecordingHal {
        [
            "x86-64-ufispace-s9610-36d-lpc",
            "x86-64-ufispace-sys-eeprom",
            "optoe",
            "x86-64-ufispace-s9610-36d-cpld",
            "i40e",
        ]
        .iter()
        .fold(RecordingHal::new(), |hal, m| {
            hal.with_file(format!("{}/{}.ko", MODULES, m), "")
        })
        .with_file(
            "/lib/platform-config/current/onl/port_config.yml",
            port_config_yaml(&[("QSFPDD", 0..36), ("SFP", 0..2)]),
        )
        .with_file("/sys/bus/i2c/devices/1-0030/cpld_mac_rov", "0x09")
    }

    #[tokio::test]
    async fn full_sequence() {
        let (hal, ctx) = bring_up(hal(), &INFO);
        Board.baseconfig(&ctx).await.unwrap();

        let writes = hal.writes();
        let new_devices: Vec<_> = writes
            .iter()
            .filter(|(p, _)| p.ends_with("new_device"))
            .collect();
        // 8 muxes, sys eeprom, 38 ports, 2 expanders, 3 cplds
        assert_eq!(new_devices.len(), 52);
        assert_eq!(
            new_devices[9],
            &(
                "/sys/bus/i2c/devices/i2c-25/new_device".to_string(),
                "optoe3 0x50".to_string()
            )
        );
        let labels = port_labels(&hal);
        assert_eq!(labels.len(), 38);
        assert_eq!(
            labels[35],
            ("/sys/bus/i2c/devices/60-0050/port_name".to_string(), "36".to_string())
        );
        assert_eq!(
            labels[37],
            ("/sys/bus/i2c/devices/62-0050/port_name".to_string(), "2".to_string())
        );
        assert!(writes.contains(&(
            "/sys/class/gpio/gpio506/direction".to_string(),
            "high".to_string()
        )));
        assert!(writes.contains(&(
            "/sys/bus/i2c/devices/1-0032/cpld_evt_ctrl".to_string(),
            "1".to_string()
        )));

        // vid 1 on both rails
        let actions = hal.actions();
        for addr in [0x60, 0x62] {
            assert!(actions.contains(&Action::SmbusWrite {
                target: SmbusTarget::new(21, addr),
                op: SmbusWrite::WordData(0x21, 0x6f)
            }));
        }
        assert!(actions.contains(&Action::SetMaintenanceMode(
            crate::hal::MaintenanceMode::On
        )));
        assert_eq!(
            hal.commands().last().unwrap(),
            "timeout 120s /lib/platform-config/current/onl/epdm_cli init mdio 10G optics"
        );
    }

    #[tokio::test]
    async fn missing_lpc_driver_stops_bring_up() {
        let (hal, ctx) = bring_up(
            RecordingHal::new().with_file(format!("{}/optoe.ko", MODULES), ""),
            &INFO,
        );
        assert!(Board.baseconfig(&ctx).await.is_err());
        assert!(hal.writes().is_empty());
    }
}
