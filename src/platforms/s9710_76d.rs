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
    platform: "x86-64-ufispace-s9710-76d-r0",
    model: "S9710-76D",
    sys_object_id: ".9710.76",
    port_count: 76,
    port_config: "76x400",
    lpc: Some("/sys/devices/platform/x86_64_ufispace_s9710_76d_lpc"),
};

const MUXES: [I2cDevice; 14] = [
    I2cDevice::new("pca9548", 0x71, 0),  // CPLD
    I2cDevice::new("pca9548", 0x72, 0),  // NIF root
    I2cDevice::new("pca9548", 0x73, 0),  // DC
    I2cDevice::new("pca9548", 0x76, 9),  // FAB root
    I2cDevice::new("pca9548", 0x75, 25), // FAB 1-5
    I2cDevice::new("pca9548", 0x75, 26),
    I2cDevice::new("pca9548", 0x75, 27),
    I2cDevice::new("pca9548", 0x75, 28),
    I2cDevice::new("pca9548", 0x75, 29),
    I2cDevice::new("pca9548", 0x76, 10), // NIF 1-5
    I2cDevice::new("pca9548", 0x76, 11),
    I2cDevice::new("pca9548", 0x76, 12),
    I2cDevice::new("pca9548", 0x76, 13),
    I2cDevice::new("pca9548", 0x76, 14),
];

/// Three CPLDs on the main board, two on the fabric board.
const CPLDS: [I2cDevice; 5] = [
    I2cDevice::new("s9710_76d_cpld1", 0x30, 1),
    I2cDevice::new("s9710_76d_cpld2", 0x31, 1),
    I2cDevice::new("s9710_76d_cpld3", 0x32, 1),
    I2cDevice::new("s9710_76d_cpld4", 0x33, 30),
    I2cDevice::new("s9710_76d_cpld5", 0x34, 30),
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

const GPIO_MAX: u32 = 511;

const GPIO_LAYOUT: [GpioLayout<'static>; 2] = [
    // beacon LED expander
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
    // CPU board expander
    GpioLayout {
        offsets: 16..32,
        default: Direction::In,
        overrides: &[],
    },
];

pub struct Board;

impl Board {
    /// The fabric CPLDs sit behind channel 5 of the FAB root mux, itself
    /// behind channel 0 of the NIF root.
    async fn show_fabric_cplds(&self, ctx: &BringUp) {
        ctx.i2c_send(0, 0x72, 0x1).await;
        ctx.i2c_send(0, 0x76, 0x20).await;
        for cpld in [0x33, 0x34] {
            ctx.i2c_get(0, cpld, 0x2).await;
        }
        ctx.i2c_send(0, 0x76, 0x0).await;
        ctx.i2c_send(0, 0x72, 0x0).await;
    }
}

#[async_trait]
impl Platform for Board {
    fn info(&self) -> &'static PlatformInfo {
        &INFO
    }

    async fn baseconfig(&self, ctx: &BringUp) -> anyhow::Result<()> {
        ctx.insmod("x86-64-ufispace-s9710-76d-lpc").await?;

        ctx.check_i2c_status(I2cStatusCheck {
            bus: 0,
            mux: 0x71,
            reset: Some("mb_cpld/mux_reset"),
        })
        .await;

        ctx.golden_finger(0, 0x71, 0x1, &[0x30, 0x31, 0x32]).await;
        self.show_fabric_cplds(ctx).await;

        ctx.bsp_info("Init PCA9548").await;
        ctx.new_i2c_devices(&MUXES).await;
        ctx.init_mux_idle_state(&MUXES).await;

        ctx.insmod("x86-64-ufispace-eeprom-mb").await?;
        ctx.insmod("optoe").await?;

        ctx.bsp_info("Init cpu eeprom").await;
        ctx.new_i2c_device(&I2cDevice::new("mb_eeprom", 0x57, 0))
            .await;

        ctx.bsp_info("Init port eeprom").await;
        let path = ctx.current_onl_dir().join("port_config.yml");
        let config = ctx.load_port_config(&path).await?;
        let ports = port_range(0, "QSFPDD_NIF", "optoe3", 73..109)
            .chain(port_range(0, "QSFPDD_FAB", "optoe3", 33..73))
            .chain(port_range(0, "SFP", "sff8436", 109..111));
        ctx.init_port_eeproms(
            ports,
            PortLabels::Config {
                config: &config,
                path: &path,
            },
        )
        .await?;

        ctx.bsp_info("Init GPIO sysfs").await;
        ctx.new_i2c_devices(&[
            I2cDevice::new("pca9555", 0x20, 4),
            I2cDevice::new("pca9539", 0x77, 0),
        ])
        .await;
        ctx.gpio_apply(GpioNumbering::FromMax(GPIO_MAX), &GPIO_LAYOUT)
            .await?;

        ctx.bsp_info("Init CPLD").await;
        ctx.insmod("x86-64-ufispace-s9710-76d-cpld").await?;
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
    use crate::hal::{RecordingHal, SmbusRead, SmbusTarget, SmbusWrite};

    #[tokio::test]
    async fn fabric_cplds_shown_through_nested_muxes() {
        let (hal, ctx) = bring_up(RecordingHal::new(), &INFO);
        Board.show_fabric_cplds(&ctx).await;
        let send = |addr, value| Action::SmbusWrite {
            target: SmbusTarget::new(0, addr),
            op: SmbusWrite::Byte(value),
        };
        let get = |addr| Action::SmbusRead {
            target: SmbusTarget::new(0, addr),
            op: SmbusRead::ByteData(0x2),
        };
        assert_eq!(
            hal.actions(),
            vec![
                send(0x72, 0x1),
                send(0x76, 0x20),
                get(0x33),
                get(0x34),
                send(0x76, 0x0),
                send(0x72, 0x0),
            ]
        );
    }

    #[tokio::test]
    async fn fabric_cpld_events_enabled() {
        let hal = [
            "x86-64-ufispace-s9710-76d-lpc",
            "x86-64-ufispace-eeprom-mb",
            "optoe",
            "x86-64-ufispace-s9710-76d-cpld",
            "i40e",
        ]
        .iter()
        .fold(RecordingHal::new(), |hal, m| {
            hal.with_file(format!("/lib/modules/5.10.0-onl/onl/{}.ko", m), "")
        })
        .with_file(
            "/lib/platform-config/current/onl/port_config.yml",
            port_config_yaml(&[("QSFPDD_NIF", 0..36), ("QSFPDD_FAB", 0..40), ("SFP", 0..2)]),
        )
        .with_file("/sys/bus/i2c/devices/1-0030/cpld_mac_rov", "0x3f");

        let (hal, ctx) = bring_up(hal, &INFO);
        Board.baseconfig(&ctx).await.unwrap();

        let writes = hal.writes();
        assert!(writes.contains(&(
            "/sys/bus/i2c/devices/i2c-30/new_device".to_string(),
            "s9710_76d_cpld5 0x34".to_string()
        )));
        assert!(writes.contains(&(
            "/sys/bus/i2c/devices/30-0034/cpld_evt_ctrl".to_string(),
            "1".to_string()
        )));
        assert!(writes.contains(&(
            "/sys/bus/i2c/devices/i2c-110/new_device".to_string(),
            "sff8436 0x50".to_string()
        )));
        let labels = port_labels(&hal);
        assert_eq!(labels.len(), 78);
        assert_eq!(
            labels[36],
            ("/sys/bus/i2c/devices/33-0050/port_name".to_string(), "1".to_string())
        );
        assert_eq!(
            labels[77],
            ("/sys/bus/i2c/devices/110-0050/port_name".to_string(), "2".to_string())
        );
        // vid 7 on both rails
        assert!(hal.actions().contains(&Action::SmbusWrite {
            target: SmbusTarget::new(21, 0x62),
            op: SmbusWrite::WordData(0x21, 0x73)
        }));
    }
}
