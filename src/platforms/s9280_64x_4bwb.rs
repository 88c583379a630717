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
use crate::app::eeprom::{port_range, PortEeprom, PortLabels};
use crate::app::i2c::{reg_write, RegisterWrite};
use async_trait::async_trait;
use std::time::Duration;

pub static INFO: PlatformInfo = PlatformInfo {
    platform: "x86-64-ingrasys-s9280-64x-4bwb-r0",
    model: "S9280-64X-4BWB",
    sys_object_id: ".9280.64",
    port_count: 64,
    port_config: "64x100",
    lpc: None,
};

/// Front panel port to MAC port.
const FP2PHY: [u32; 64] = [
    0, 1, 4, 5, 8, 9, 12, 13, 16, 17, 20, 21, 24, 25, 28, 29, //
    32, 33, 36, 37, 40, 41, 44, 45, 48, 49, 52, 53, 56, 57, 60, 61, //
    2, 3, 6, 7, 10, 11, 14, 15, 18, 19, 22, 23, 26, 27, 30, 31, //
    34, 35, 38, 39, 42, 43, 46, 47, 50, 51, 54, 55, 58, 59, 62, 63,
];

/// First bus of the QSFP mux channels, one per MAC port.
const QSFP_BUS_BASE: u32 = 29;

const MUXES: [I2cDevice; 12] = [
    I2cDevice::new("pca9548", 0x70, 0),
    I2cDevice::new("pca9548", 0x71, 0),
    I2cDevice::new("pca9546", 0x72, 0),
    I2cDevice::new("pca9548", 0x75, 0),
    I2cDevice::new("pca9548", 0x74, 9),
    I2cDevice::new("pca9548", 0x74, 10),
    I2cDevice::new("pca9548", 0x74, 11),
    I2cDevice::new("pca9548", 0x74, 12),
    I2cDevice::new("pca9548", 0x74, 13),
    I2cDevice::new("pca9548", 0x74, 14),
    I2cDevice::new("pca9548", 0x74, 15),
    I2cDevice::new("pca9548", 0x74, 16),
];

/// System SEL and RST expander.
const SYS_IO_EXPANDER: &[RegisterWrite] = &[
    reg_write(20, 0x76, 2, 0x04),
    reg_write(20, 0x76, 3, 0xdf),
    reg_write(20, 0x76, 6, 0x09),
    reg_write(20, 0x76, 7, 0x3f),
    reg_write(20, 0x76, 4, 0x00),
    reg_write(20, 0x76, 5, 0x00),
];

/// Output bit of the system expander clocking the port LED shift register.
const LED_SHIFT_RESET: u8 = 0x04;

fn port_eeproms() -> impl Iterator<Item = PortEeprom> {
    FP2PHY
        .iter()
        .enumerate()
        .map(|(port, phy)| PortEeprom::new(port as u32, "QSFP", "optoe1", QSFP_BUS_BASE + phy))
        .chain(port_range(64, "SFP", "sff8436", 17..19))
}

pub struct Board;

#[async_trait]
impl Platform for Board {
    fn info(&self) -> &'static PlatformInfo {
        &INFO
    }

    async fn baseconfig(&self, ctx: &BringUp) -> anyhow::Result<()> {
        ctx.insmod("eeprom_mb").await?;
        ctx.modprobe("gpio_pca953x").await;
        ctx.insmod("optoe").await?;

        ctx.new_i2c_devices(&MUXES).await;
        ctx.init_mux_idle_state(&MUXES).await;

        ctx.i2c_set_table(SYS_IO_EXPANDER).await;

        ctx.new_i2c_device(&I2cDevice::new("mb_eeprom", 0x53, 0))
            .await;
        ctx.init_port_eeproms(port_eeproms(), PortLabels::Index)
            .await?;

        ctx.modprobe("coretemp").await;
        ctx.new_i2c_device(&I2cDevice::new("tmp75", 0x4f, 0)).await;

        ctx.insmod("ingrasys_s9280_64x_4bwb_i2c_cpld").await?;
        for bus in 1..=5 {
            let driver = match bus {
                1 => "ingrasys_cpld1",
                2 => "ingrasys_cpld2",
                3 => "ingrasys_cpld3",
                4 => "ingrasys_cpld4",
                _ => "ingrasys_cpld5",
            };
            ctx.new_i2c_device(&I2cDevice::new(driver, 0x33, bus)).await;
        }

        ctx.i2c_set_masked(20, 0x76, 2, 0x00, LED_SHIFT_RESET).await;
        ctx.hal().sleep(Duration::from_secs(1)).await;
        ctx.i2c_set_masked(20, 0x76, 2, 0xff, LED_SHIFT_RESET).await;

        ctx.enable_ipmi_maintenance_mode().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::bring_up::test_support::bring_up;
    use crate::hal::stub::Action;
    use crate::hal::{RecordingHal, SmbusTarget, SmbusWrite};

    #[test]
    fn front_panel_ports_follow_mac_order() {
        let ports: Vec<_> = port_eeproms().collect();
        assert_eq!(ports.len(), 66);
        assert_eq!(ports[2].bus, 33);
        assert_eq!(ports[32].bus, 31);
        assert_eq!(ports[65], PortEeprom::new(65, "SFP", "sff8436", 18));
    }

    #[tokio::test]
    async fn led_shift_register_is_pulsed() {
        let hal = [
            "eeprom_mb",
            "optoe",
            "ingrasys_s9280_64x_4bwb_i2c_cpld",
        ]
        .iter()
        .fold(RecordingHal::new(), |hal, m| {
            hal.with_file(format!("/lib/modules/5.10.0-onl/onl/{}.ko", m), "")
        });
        let (hal, ctx) = bring_up(hal, &INFO);
        Board.baseconfig(&ctx).await.unwrap();

        let expander = SmbusTarget::new(20, 0x76);
        let writes: Vec<_> = hal
            .actions()
            .into_iter()
            .filter_map(|a| match a {
                Action::SmbusWrite { target, op } if target == expander => Some(op),
                _ => None,
            })
            .collect();
        assert_eq!(writes.first(), Some(&SmbusWrite::ByteData(2, 0x04)));
        assert_eq!(
            &writes[writes.len() - 2..],
            &[SmbusWrite::ByteData(2, 0x00), SmbusWrite::ByteData(2, 0x04)]
        );
        assert!(hal.writes().contains(&(
            "/sys/bus/i2c/devices/i2c-5/new_device".to_string(),
            "ingrasys_cpld5 0x33".to_string()
        )));
    }
}
