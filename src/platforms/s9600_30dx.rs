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
    platform: "x86-64-ufispace-s9600-30dx-r0",
    model: "S9600-30DX",
    sys_object_id: ".9600.30",
    port_count: 30,
    port_config: "24x100 + 6x400",
    lpc: Some("/sys/devices/platform/x86_64_ufispace_s9600_30dx_lpc"),
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

const MUXES: [I2cDevice; 7] = [
    I2cDevice::new("pca9548", 0x75, 0),  // CPLD
    I2cDevice::new("pca9548", 0x73, 0),  // CPLD upgrade
    I2cDevice::new("pca9548", 0x72, 0),  // port root
    I2cDevice::new("pca9548", 0x76, 17), // QSFP 0-7
    I2cDevice::new("pca9548", 0x76, 18), // QSFP 8-15
    I2cDevice::new("pca9548", 0x76, 19), // QSFPDD 16-23
    I2cDevice::new("pca9548", 0x76, 20), // QSFPDD 24-29
];

const CPLDS: [I2cDevice; 3] = [
    I2cDevice::new("s9600_30dx_cpld1", 0x30, 1),
    I2cDevice::new("s9600_30dx_cpld2", 0x31, 1),
    I2cDevice::new("s9600_30dx_cpld3", 0x32, 1),
];

const SFP_MUX_CTRL: &str = "/sys/bus/i2c/devices/1-0031/cpld_sfp_mux_ctrl";

pub struct Board;

impl Board {
    /// The SFP mux exists from the PVT build on: deph id 1, or deph id 0
    /// with hardware id 3 and later.
    async fn is_pvt_or_later(&self, ctx: &BringUp) -> bool {
        let mut ids = [0; 2];
        for (id, attr) in ids.iter_mut().zip(["mb_cpld/board_deph_id", "mb_cpld/board_hw_id"]) {
            let Some(path) = ctx.lpc(attr) else {
                return false;
            };
            match ctx.read_int(&path, 10).await {
                Ok(value) => *id = value,
                Err(e) => {
                    ctx.bsp_info(&format!("{} unavailable: {}", attr, e)).await;
                    return false;
                }
            }
        }

        let [deph_id, hw_id] = ids;
        if deph_id == 1 || (deph_id == 0 && hw_id >= 3) {
            true
        } else {
            ctx.bsp_info(&format!(
                "device is not PVT or later, deph_id={}, hw_id={}",
                deph_id, hw_id
            ))
            .await;
            false
        }
    }

    async fn enable_sfp_mux(&self, ctx: &BringUp) {
        if let Err(e) = ctx
            .hal()
            .write(std::path::Path::new(SFP_MUX_CTRL), "0x1")
            .await
        {
            ctx.bsp_err(&format!("enable_sfp_mux() failed: {}", e)).await;
        }
    }
}

#[async_trait]
impl Platform for Board {
    fn info(&self) -> &'static PlatformInfo {
        &INFO
    }

    async fn baseconfig(&self, ctx: &BringUp) -> anyhow::Result<()> {
        ctx.modprobe_all(&KERNEL_MODULES).await;
        ctx.insmod("x86-64-ufispace-s9600-30dx-lpc").await?;

        ctx.check_i2c_status(I2cStatusCheck {
            bus: 0,
            mux: 0x75,
            reset: Some("mb_cpld/mux_reset"),
        })
        .await;

        ctx.golden_finger(0, 0x75, 0x1, &[0x30, 0x31, 0x32]).await;

        ctx.bsp_info("Init PCA9548").await;
        ctx.new_i2c_devices(&MUXES).await;
        ctx.init_mux_idle_state(&MUXES).await;

        ctx.insmod("x86-64-ufispace-sys-eeprom").await?;
        ctx.insmod("optoe").await?;

        ctx.bsp_info("Init system eeprom").await;
        ctx.new_i2c_device(&I2cDevice::new("sys_eeprom", 0x57, 0))
            .await;

        ctx.bsp_info("Init port eeprom").await;
        let path = ctx.current_onl_dir().join("port_config.yml");
        let config = ctx.load_port_config(&path).await?;
        let labels = PortLabels::Config {
            config: &config,
            path: &path,
        };
        let ports = port_range(0, "QSFP", "optoe1", 25..41)
            .chain(port_range(16, "QSFPDD", "optoe3", 41..55));
        ctx.init_port_eeproms(ports, labels).await?;

        ctx.new_i2c_device(&I2cDevice::new("pca9539", 0x77, 0))
            .await;
        let gpio_max = ctx.gpio_max(511).await;
        let cpu_expander = GpioLayout {
            offsets: 0..16,
            default: Direction::In,
            overrides: &[],
        };
        ctx.gpio_apply(GpioNumbering::FromMax(gpio_max), &[cpu_expander])
            .await?;

        ctx.bsp_info("Init CPLD").await;
        ctx.insmod("x86-64-ufispace-s9600-30dx-cpld").await?;
        ctx.new_i2c_devices(&CPLDS).await;
        for cpld in &CPLDS {
            ctx.write_attr(cpld.path().join("cpld_evt_ctrl"), 1).await;
        }

        if self.is_pvt_or_later(ctx).await {
            self.enable_sfp_mux(ctx).await;
            ctx.init_port_eeproms(port_range(30, "SFP", "optoe2", 23..25), labels)
                .await?;
        }

        ctx.enable_ipmi_maintenance_mode().await;
        ctx.disable_bmc_watchdog().await;

        // i40e has to be up before the PHY init
        ctx.bsp_info("Init i40e").await;
        ctx.insmod_optional("intel_auxiliary").await?;
        ctx.insmod("i40e").await?;

        ctx.bsp_info("Init done").await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::bring_up::test_support::{bring_up, port_config_yaml, port_labels};
    use crate::hal::RecordingHal;

    const LPC: &str = "/sys/devices/platform/x86_64_ufispace_s9600_30dx_lpc";

    fn hal() -> RecordingHal {
        [
            "x86-64-ufispace-s9600-30dx-lpc",
            "x86-64-ufispace-sys-eeprom",
            "optoe",
            "x86-64-ufispace-s9600-30dx-cpld",
            "i40e",
        ]
        .iter()
        .fold(RecordingHal::new(), |hal, m| {
            hal.with_file(format!("/lib/modules/5.10.0-onl/onl/{}.ko", m), "")
        })
        .with_file(
            "/lib/platform-config/current/onl/port_config.yml",
            port_config_yaml(&[("QSFP", 0..16), ("QSFPDD", 16..30), ("SFP", 30..32)]),
        )
    }

    async fn pvt(deph_id: &str, hw_id: &str) -> bool {
        let (_, ctx) = bring_up(
            RecordingHal::new()
                .with_file(format!("{}/mb_cpld/board_deph_id", LPC), deph_id)
                .with_file(format!("{}/mb_cpld/board_hw_id", LPC), hw_id),
            &INFO,
        );
        Board.is_pvt_or_later(&ctx).await
    }

    #[tokio::test]
    async fn pvt_detection() {
        assert!(pvt("1", "0").await);
        assert!(pvt("0", "3").await);
        assert!(!pvt("0", "2").await);

        let (_, ctx) = bring_up(RecordingHal::new(), &INFO);
        assert!(!Board.is_pvt_or_later(&ctx).await);
    }

    #[tokio::test]
    async fn sfp_ports_only_on_pvt() {
        let (hal, ctx) = bring_up(hal(), &INFO);
        Board.baseconfig(&ctx).await.unwrap();
        assert!(!hal
            .writes()
            .iter()
            .any(|(path, _)| path == "/sys/bus/i2c/devices/i2c-23/new_device"));
        assert_eq!(port_labels(&hal).len(), 30);

        let (hal, ctx) = bring_up(
            self::hal()
                .with_file(format!("{}/mb_cpld/board_deph_id", LPC), "1\n")
                .with_file(format!("{}/mb_cpld/board_hw_id", LPC), "1\n"),
            &INFO,
        );
        Board.baseconfig(&ctx).await.unwrap();
        let writes = hal.writes();
        let mux_ctrl = writes
            .iter()
            .position(|(path, _)| path == SFP_MUX_CTRL)
            .unwrap();
        let sfp = writes
            .iter()
            .position(|(path, value)| {
                path == "/sys/bus/i2c/devices/i2c-24/new_device" && value == "optoe2 0x50"
            })
            .unwrap();
        assert!(mux_ctrl < sfp);

        let labels = port_labels(&hal);
        assert_eq!(labels.len(), 32);
        assert_eq!(
            labels[16],
            ("/sys/bus/i2c/devices/41-0050/port_name".to_string(), "17".to_string())
        );
        assert_eq!(
            labels[31],
            ("/sys/bus/i2c/devices/24-0050/port_name".to_string(), "32".to_string())
        );
    }
}
