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
use crate::app::i2c::I2cStatusCheck;
use async_trait::async_trait;

pub static INFO: PlatformInfo = PlatformInfo {
    platform: "x86-64-ufispace-s8901-54xc-r0",
    model: "S8901-54XC",
    sys_object_id: ".8901.54",
    port_count: 54,
    port_config: "48x25 + 6x100",
    lpc: Some("/sys/devices/platform/x86_64_ufispace_s8901_54xc_lpc"),
};

const BUS_I801: u32 = 0;
const BUS_ISMT: u32 = 1;

const KERNEL_MODULES: [&str; 8] = [
    "i2c_i801",
    "i2c_ismt",
    "i2c_dev",
    "gpio_pca953x",
    "i2c_mux_pca954x",
    "coretemp",
    "ipmi_devintf",
    "ipmi_si",
];

const MUXES: [I2cDevice; 10] = [
    I2cDevice::new("pca9548", 0x70, BUS_ISMT), // CPLD
    I2cDevice::new("pca9548", 0x71, BUS_ISMT), // FRU
    I2cDevice::new("pca9548", 0x72, BUS_I801), // SFP root
    I2cDevice::new("pca9548", 0x73, 18),
    I2cDevice::new("pca9548", 0x73, 19),
    I2cDevice::new("pca9548", 0x73, 20),
    I2cDevice::new("pca9548", 0x73, 21),
    I2cDevice::new("pca9548", 0x73, 22),
    I2cDevice::new("pca9548", 0x73, 23),
    I2cDevice::new("pca9548", 0x73, 24),
];

const CPLDS: [I2cDevice; 2] = [
    I2cDevice::new("s8901_54xc_cpld1", 0x30, 2),
    I2cDevice::new("s8901_54xc_cpld2", 0x31, 2),
];

/// RX/TX rate select expanders.
const GPIO_EXPANDERS: [I2cDevice; 4] = [
    I2cDevice::new("tca6424", 0x22, 7),
    I2cDevice::new("tca6424", 0x22, 6),
    I2cDevice::new("tca6424", 0x23, 7),
    I2cDevice::new("tca6424", 0x23, 6),
];

/// Every rate select line driven high.
const GPIO_LAYOUT: [GpioLayout<'static>; 1] = [GpioLayout {
    offsets: 0..96,
    default: Direction::High,
    overrides: &[],
}];

pub struct Board;

#[async_trait]
impl Platform for Board {
    fn info(&self) -> &'static PlatformInfo {
        &INFO
    }

    async fn baseconfig(&self, ctx: &BringUp) -> anyhow::Result<()> {
        ctx.rmmod("i2c_ismt").await;
        ctx.rmmod("i2c_i801").await;
        ctx.modprobe_all(&KERNEL_MODULES).await;

        ctx.insmod("x86-64-ufispace-s8901-54xc-lpc").await?;
        ctx.modprobe("i2c-ismt").await;

        ctx.check_i2c_status(I2cStatusCheck {
            bus: BUS_I801,
            mux: 0x72,
            reset: Some("mb_cpld/mux_reset"),
        })
        .await;

        ctx.golden_finger(BUS_ISMT, 0x70, 0x1, &[0x30, 0x31]).await;

        ctx.bsp_info("Init I2C Mux").await;
        ctx.new_i2c_devices(&MUXES).await;
        ctx.init_mux_idle_state(&MUXES).await;

        ctx.bsp_info("Init System EEPROM").await;
        ctx.insmod("x86-64-ufispace-sys-eeprom").await?;
        ctx.new_i2c_device(&I2cDevice::new("sys_eeprom", 0x53, 5))
            .await;

        ctx.bsp_info("Init Port EEPROM").await;
        ctx.insmod("optoe").await?;
        let path = ctx.current_onl_dir().join("port_config.yml");
        let config = ctx.load_port_config(&path).await?;
        let ports = port_range(0, "SFP", "optoe2", 26..74)
            .chain(port_range(48, "QSFP", "optoe1", 74..80));
        ctx.init_port_eeproms(
            ports,
            PortLabels::Config {
                config: &config,
                path: &path,
            },
        )
        .await?;

        ctx.bsp_info("Init GPIO").await;
        ctx.new_i2c_devices(&GPIO_EXPANDERS).await;
        let gpio_max = ctx.gpio_max(511).await;
        ctx.gpio_apply(GpioNumbering::FromMax(gpio_max), &GPIO_LAYOUT)
            .await?;

        ctx.bsp_info("Init CPLD").await;
        ctx.insmod("x86-64-ufispace-s8901-54xc-cpld").await?;
        ctx.new_i2c_devices(&CPLDS).await;
        for cpld in &CPLDS {
            ctx.write_attr(cpld.path().join("cpld_evt_ctrl"), 1).await;
        }

        ctx.enable_ipmi_maintenance_mode().await;
        ctx.disable_bmc_watchdog().await;

        ctx.bsp_info("Init done").await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::bring_up::test_support::bring_up;
    use crate::app::error::BringUpError;
    use crate::hal::RecordingHal;

    const PORT_CONFIG: &str = "/lib/platform-config/current/onl/port_config.yml";

    fn hal() -> RecordingHal {
        [
            "x86-64-ufispace-s8901-54xc-lpc",
            "x86-64-ufispace-sys-eeprom",
            "optoe",
            "x86-64-ufispace-s8901-54xc-cpld",
        ]
        .iter()
        .fold(RecordingHal::new(), |hal, m| {
            hal.with_file(format!("/lib/modules/5.10.0-onl/onl/{}.ko", m), "")
        })
    }

    fn port_config() -> String {
        let mut yaml = String::from("SFP:\n");
        for port in 0..48 {
            yaml.push_str(&format!("  {}:\n    port_name: {}\n", port, port + 1));
        }
        yaml.push_str("QSFP:\n");
        for port in 48..54 {
            yaml.push_str(&format!("  {}:\n    port_name: {}\n", port, port + 1));
        }
        yaml
    }

    #[tokio::test]
    async fn labels_come_from_port_config() {
        let (hal, ctx) = bring_up(hal().with_file(PORT_CONFIG, port_config()), &INFO);
        Board.baseconfig(&ctx).await.unwrap();

        let writes = hal.writes();
        assert!(writes.contains(&(
            "/sys/bus/i2c/devices/26-0050/port_name".to_string(),
            "1".to_string()
        )));
        assert!(writes.contains(&(
            "/sys/bus/i2c/devices/79-0050/port_name".to_string(),
            "54".to_string()
        )));
        assert_eq!(
            writes
                .iter()
                .filter(|(p, v)| p.ends_with("/direction") && v == "high")
                .count(),
            96
        );
        assert!(writes.contains(&(
            "/sys/bus/i2c/devices/2-0031/cpld_evt_ctrl".to_string(),
            "1".to_string()
        )));
    }

    #[tokio::test]
    async fn missing_port_config_is_fatal() {
        let (_, ctx) = bring_up(hal(), &INFO);
        let err = Board.baseconfig(&ctx).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BringUpError>(),
            Some(BringUpError::PortConfig { .. })
        ));
    }
}
