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
use crate::app::bring_up::{BringUp, ClientAttr, I2cDevice, PciAction, PlatformInfo};
use crate::app::eeprom::{port_range, PortEeprom, PortLabels};
use crate::app::i2c::I2cStatusCheck;
use crate::app::rov::AvsEntry;
use crate::hal::Cmd;
use async_trait::async_trait;

pub static INFO: PlatformInfo = PlatformInfo {
    platform: "x86-64-ufispace-s9311-64d-r0",
    model: "S9311-64D",
    sys_object_id: ".9311.64",
    port_count: 48,
    port_config: "64x400 + 2x25",
    lpc: Some("/sys/devices/platform/x86_64_ufispace_s9311_64d_lpc"),
};

const I2C_BUS_ORDER: [(&str, &str, PciAction); 4] = [
    ("i801_smbus", "0000:00:1f.4", PciAction::Unbind),
    ("ismt_smbus", "0000:00:0f.0", PciAction::Unbind),
    ("i801_smbus", "0000:00:1f.4", PciAction::Bind),
    ("ismt_smbus", "0000:00:0f.0", PciAction::Bind),
];

const KERNEL_MODULES: [&str; 9] = [
    "i2c_ismt",
    "i2c_dev",
    "i2c_mux",
    "gpio_pca953x",
    "i2c_mux_pca954x",
    "coretemp",
    "lm75",
    "ipmi_devintf",
    "ipmi_si",
];

const MUXES: [I2cDevice; 2] = [
    I2cDevice::new("pca9548", 0x72, 0), // CPLD
    I2cDevice::new("pca9548", 0x73, 0), // DC/SFP
];

const CPLDS: [I2cDevice; 4] = [
    I2cDevice::new("s9311_64d_cpld1", 0x30, 2),
    I2cDevice::new("s9311_64d_cpld2", 0x31, 2),
    I2cDevice::new("s9311_64d_cpld3", 0x32, 2),
    I2cDevice::new("s9311_64d_fpga", 0x37, 2),
];

const EVENT_CTRL: [ClientAttr; 3] = [
    ClientAttr::new(2, 0x30, "cpld_evt_ctrl"),
    ClientAttr::new(2, 0x31, "cpld_evt_ctrl"),
    ClientAttr::new(2, 0x32, "cpld_evt_ctrl"),
];

const PORT_LED_CTRL: ClientAttr = ClientAttr::new(2, 0x30, "cpld_port_led_clr");
const MAC_ROV: ClientAttr = ClientAttr::new(2, 0x30, "cpld_mac_rov");

/// Port EEPROMs hang off the FPGA over PCI when enabled, legacy I2C otherwise.
const FPGA_PCI_ENABLE: bool = false;

const MAC_AVS: [AvsEntry; 5] = [
    AvsEntry { code: 0x7e, vdd: "0.825", vout: 0x034d },
    AvsEntry { code: 0x82, vdd: "0.8", vout: 0x0333 },
    AvsEntry { code: 0x86, vdd: "0.775", vout: 0x031a },
    AvsEntry { code: 0x8a, vdd: "0.75", vout: 0x0300 },
    AvsEntry { code: 0x8e, vdd: "0.725", vout: 0x02e6 },
];
const MAC_REGULATORS: [(u32, u16); 1] = [(12, 0x58)];

/// QSFP-DD cages in groups of 16, each group on its own run of mux channels.
fn qsfpdd_ports() -> impl Iterator<Item = PortEeprom> {
    [(0, 18), (16, 52), (32, 34), (48, 68)]
        .into_iter()
        .flat_map(|(first, bus)| port_range(first, "QSFPDD", "optoe3", bus..bus + 16))
}

/// Management SFPs moved behind the DC mux after the alpha build.
fn mgmt_ports(hw_rev: u32) -> impl Iterator<Item = PortEeprom> {
    let first_bus = if hw_rev == 1 { 15 } else { 50 };
    port_range(64, "MGMT", "optoe2", first_bus..first_bus + 2)
}

pub struct Board;

#[async_trait]
impl Platform for Board {
    fn info(&self) -> &'static PlatformInfo {
        &INFO
    }

    async fn baseconfig(&self, ctx: &BringUp) -> anyhow::Result<()> {
        for (driver, device, action) in I2C_BUS_ORDER {
            ctx.update_pci_device(driver, device, action).await;
        }
        ctx.modprobe("i2c_i801").await;
        ctx.insmod_optional("i2c-ismt").await?;
        ctx.modprobe_all(&KERNEL_MODULES).await;

        ctx.insmod("x86-64-ufispace-s9311-64d-lpc").await?;

        let board = ctx.board_version().await;
        ctx.gpio_max(511).await;

        ctx.check_i2c_status(I2cStatusCheck {
            bus: 0,
            mux: 0x72,
            reset: None,
        })
        .await;
        ctx.record_bmc_enable(true).await;

        ctx.bsp_info("Init I2C").await;
        ctx.new_i2c_devices(&MUXES).await;
        ctx.init_mux_idle_state(&MUXES).await;

        ctx.bsp_info("Init sys eeprom").await;
        ctx.insmod("x86-64-ufispace-sys-eeprom").await?;
        ctx.new_i2c_device(&I2cDevice::new("sys_eeprom", 0x57, 1))
            .await;

        ctx.bsp_info("Init CPLD").await;
        if let Some(path) = ctx.lpc("bsp/bsp_fpga_pci_enable") {
            ctx.write_attr_if_exists(path, u8::from(FPGA_PCI_ENABLE))
                .await;
        }
        if FPGA_PCI_ENABLE {
            ctx.insmod("x86-64-ufispace-s9311-64d-cpld").await?;
        } else {
            ctx.insmod_with("x86-64-ufispace-s9311-64d-cpld", true, &[("mux_en", "1")])
                .await?;
        }
        ctx.new_i2c_devices(&CPLDS).await;

        if FPGA_PCI_ENABLE {
            ctx.bsp_info("Init FPGA PCI port eeprom").await;
            ctx.run(Cmd::new("setpci").args(["-s", "18:00.0", "COMMAND=0x02"]))
                .await;
        } else {
            ctx.bsp_info("Init legacy I2C port eeprom").await;
            ctx.insmod("optoe").await?;
            let path = ctx.platform_onl_dir().join("port_config.yml");
            let config = ctx.load_port_config(&path).await?;
            ctx.init_port_eeproms(
                qsfpdd_ports().chain(mgmt_ports(board.hw_rev)),
                PortLabels::Config {
                    config: &config,
                    path: &path,
                },
            )
            .await?;
        }

        ctx.bsp_info("Init MAC ROV").await;
        ctx.init_mac_avs(&MAC_ROV.path(), &MAC_AVS, &MAC_REGULATORS)
            .await?;

        ctx.enable_ipmi_maintenance_mode().await;
        ctx.disable_bmc_watchdog().await;

        ctx.bsp_info("Enable event control").await;
        for attr in EVENT_CTRL {
            ctx.write_attr(attr.path(), 1).await;
        }
        ctx.bsp_info("Enable port led control").await;
        ctx.write_attr(PORT_LED_CTRL.path(), 1).await;

        ctx.sync_sel_time().await;
        ctx.bsp_info("Init done").await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::bring_up::test_support::{bring_up, port_config_yaml, port_labels};
    use crate::app::rov::VOUT_COMMAND;
    use crate::hal::stub::Action;
    use crate::hal::{RecordingHal, SmbusTarget, SmbusWrite};

    const LPC: &str = "/sys/devices/platform/x86_64_ufispace_s9311_64d_lpc";
    const PORT_CONFIG: &str =
        "/lib/platform-config/x86-64-ufispace-s9311-64d-r0/onl/port_config.yml";

    fn hal(hw_rev: &str, rov: &str) -> RecordingHal {
        [
            "x86-64-ufispace-s9311-64d-lpc",
            "x86-64-ufispace-sys-eeprom",
            "x86-64-ufispace-s9311-64d-cpld",
            "optoe",
        ]
        .iter()
        .fold(RecordingHal::new(), |hal, m| {
            hal.with_file(format!("/lib/modules/5.10.0-onl/onl/{}.ko", m), "")
        })
        .with_file(format!("{}/mb_cpld/board_hw_id", LPC), hw_rev)
        .with_file(format!("{}/bsp/bsp_fpga_pci_enable", LPC), "1")
        .with_file("/sys/bus/i2c/devices/2-0030/cpld_mac_rov", rov)
        .with_file(
            PORT_CONFIG,
            port_config_yaml(&[("QSFPDD", 0..64), ("MGMT", 64..66)]),
        )
    }

    #[test]
    fn qsfpdd_groups_are_not_in_bus_order() {
        let ports: Vec<_> = qsfpdd_ports().collect();
        assert_eq!(ports.len(), 64);
        assert_eq!(ports[15].bus, 33);
        assert_eq!(ports[16].bus, 52);
        assert_eq!(ports[32].bus, 34);
        assert_eq!(ports[63].bus, 83);
        assert_eq!(mgmt_ports(1).map(|p| p.bus).collect::<Vec<_>>(), vec![15, 16]);
        assert_eq!(mgmt_ports(2).map(|p| p.bus).collect::<Vec<_>>(), vec![50, 51]);
    }

    #[tokio::test]
    async fn legacy_eeprom_path_and_avs() {
        let (hal, ctx) = bring_up(hal("2", "0x86\n"), &INFO);
        Board.baseconfig(&ctx).await.unwrap();

        let writes = hal.writes();
        assert!(writes.contains(&(format!("{}/bsp/bsp_fpga_pci_enable", LPC), "0".to_string())));
        assert!(writes.contains(&(
            "/sys/bus/i2c/devices/i2c-50/new_device".to_string(),
            "optoe2 0x50".to_string()
        )));
        let labels = port_labels(&hal);
        assert_eq!(labels.len(), 66);
        assert_eq!(
            labels[16],
            ("/sys/bus/i2c/devices/52-0050/port_name".to_string(), "17".to_string())
        );
        assert!(hal.commands().iter().any(|c| c.ends_with("s9311-64d-cpld.ko mux_en=1")));
        assert!(hal.actions().contains(&Action::SmbusWrite {
            target: SmbusTarget::new(12, 0x58),
            op: SmbusWrite::WordData(VOUT_COMMAND, 0x031a)
        }));
        assert_eq!(
            hal.file("/sys/bus/i2c/devices/2-0030/cpld_port_led_clr").as_deref(),
            Some("1")
        );
    }

    #[tokio::test]
    async fn unknown_avs_code_leaves_regulator_alone() {
        let (hal, ctx) = bring_up(hal("1", "0x90"), &INFO);
        Board.baseconfig(&ctx).await.unwrap();
        assert!(!hal
            .actions()
            .iter()
            .any(|a| matches!(a, Action::SmbusWrite { target, .. } if target.bus == 12)));
    }
}
