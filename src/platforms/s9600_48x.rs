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
use crate::app::gpio::{Direction, GpioLayout, GpioNumbering};
use async_trait::async_trait;

pub static INFO: PlatformInfo = PlatformInfo {
    platform: "x86-64-ufispace-s9600-48x-r0",
    model: "S9600-48X",
    sys_object_id: ".9600.48",
    port_count: 48,
    port_config: "48x100",
    lpc: Some("/sys/devices/platform/x86_64_ufispace_s9600_48x_lpc"),
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

const MUXES: [I2cDevice; 9] = [
    I2cDevice::new("pca9548", 0x75, 0),
    I2cDevice::new("pca9548", 0x72, 0),
    I2cDevice::new("pca9548", 0x73, 0),
    I2cDevice::new("pca9548", 0x76, 9),
    I2cDevice::new("pca9548", 0x76, 10),
    I2cDevice::new("pca9548", 0x76, 11),
    I2cDevice::new("pca9548", 0x76, 12),
    I2cDevice::new("pca9548", 0x76, 13),
    I2cDevice::new("pca9548", 0x76, 14),
];

const GPIO_EXPANDERS: [I2cDevice; 3] = [
    I2cDevice::new("pca9555", 0x20, 7), // beacon LED
    I2cDevice::new("pca9539", 0x74, 0), // host GPIO
    I2cDevice::new("pca9539", 0x77, 0), // CPU board
];

const GPIO_LAYOUT: [GpioLayout<'static>; 2] = [
    GpioLayout {
        offsets: 0..16,
        default: Direction::Low,
        overrides: &[
            (0, Direction::In),
            (1, Direction::High),
            (8, Direction::In),
            (11, Direction::High),
        ],
    },
    GpioLayout {
        offsets: 16..48,
        default: Direction::In,
        overrides: &[],
    },
];

const CPLDS: [I2cDevice; 4] = [
    I2cDevice::new("s9600_48x_cpld1", 0x30, 1),
    I2cDevice::new("s9600_48x_cpld2", 0x31, 1),
    I2cDevice::new("s9600_48x_cpld3", 0x32, 1),
    I2cDevice::new("s9600_48x_cpld4", 0x33, 1),
];

pub struct Board;

#[async_trait]
impl Platform for Board {
    fn info(&self) -> &'static PlatformInfo {
        &INFO
    }

    async fn baseconfig(&self, ctx: &BringUp) -> anyhow::Result<()> {
        ctx.modprobe_all(&KERNEL_MODULES).await;
        ctx.insmod("x86-64-ufispace-s9600-48x-lpc").await?;

        // TODO: probe the root mux once cpu_cpld/mux_reset is wired up on this board
        ctx.record_bmc_enable(true).await;

        ctx.golden_finger(0, 0x75, 0x1, &[0x30, 0x31, 0x32, 0x33])
            .await;

        ctx.new_i2c_devices(&MUXES).await;
        ctx.init_mux_idle_state(&MUXES).await;

        ctx.insmod("x86-64-ufispace-eeprom-mb").await?;
        ctx.insmod("optoe").await?;
        ctx.new_i2c_device(&I2cDevice::new("mb_eeprom", 0x57, 0))
            .await;

        ctx.init_port_eeproms(port_range(0, "QSFP", "sff8436", 25..73), PortLabels::Index)
            .await?;

        ctx.new_i2c_device(&I2cDevice::new("tmp75", 0x4f, 0)).await;

        ctx.new_i2c_devices(&GPIO_EXPANDERS).await;
        ctx.gpio_apply(GpioNumbering::FromMax(511), &GPIO_LAYOUT)
            .await?;

        ctx.insmod("x86-64-ufispace-s9600-48x-cpld").await?;
        ctx.new_i2c_devices(&CPLDS).await;

        ctx.enable_ipmi_maintenance_mode().await;
        ctx.disable_bmc_watchdog().await;
        ctx.sync_sel_time().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::bring_up::test_support::bring_up;
    use crate::hal::RecordingHal;

    fn hal() -> RecordingHal {
        [
            "x86-64-ufispace-s9600-48x-lpc",
            "x86-64-ufispace-eeprom-mb",
            "optoe",
            "x86-64-ufispace-s9600-48x-cpld",
        ]
        .iter()
        .fold(RecordingHal::new(), |hal, m| {
            hal.with_file(format!("/lib/modules/5.10.0-onl/onl/{}.ko", m), "")
        })
    }

    #[tokio::test]
    async fn full_sequence() {
        let (hal, ctx) = bring_up(hal(), &INFO);
        Board.baseconfig(&ctx).await.unwrap();
        let writes = hal.writes();

        let direction = |line: u32| {
            writes
                .iter()
                .find(|(p, _)| p == &format!("/sys/class/gpio/gpio{}/direction", line))
                .map(|(_, v)| v.clone())
        };
        assert_eq!(direction(511).as_deref(), Some("in"));
        assert_eq!(direction(510).as_deref(), Some("high"));
        assert_eq!(direction(509).as_deref(), Some("low"));
        assert_eq!(direction(500).as_deref(), Some("high"));
        assert_eq!(direction(464).as_deref(), Some("in"));
        assert_eq!(direction(463), None);

        assert!(writes.contains(&(
            "/sys/bus/i2c/devices/72-0050/port_name".to_string(),
            "47".to_string()
        )));
        assert!(hal
            .commands()
            .iter()
            .any(|c| c.contains("sel time set now")));
    }
}
