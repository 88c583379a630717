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
use super::s9501_16smt::{
    board_id, init_i2c, init_sfp_gpio, GpioOutputs, BUS_ISMT, GPIO_EXPANDERS, MUXES,
    SFP_GPIO_LINES,
};
use super::Platform;
use crate::app::bring_up::{BringUp, PlatformInfo};
use crate::app::gpio::Direction;
use async_trait::async_trait;
use std::ops::Range;
use tracing::info;

pub static INFO: PlatformInfo = PlatformInfo {
    platform: "x86-64-ufispace-s9501-18smt-r0",
    model: "S9501-18SMT",
    sys_object_id: ".9501.18",
    port_count: 18,
    port_config: "12x1 + 6x10",
    lpc: Some("/sys/devices/platform/x86_64_ufispace_s9501_18smt_lpc"),
};

const BETA1_OUTPUTS: [(Range<u32>, Direction); 7] = [
    (488..492, Direction::Low),
    (478..480, Direction::Low),
    (464..472, Direction::Low),
    (424..428, Direction::Low),
    (404..408, Direction::Low),
    (414..416, Direction::High),
    (400..404, Direction::High),
];

pub struct Board;

#[async_trait]
impl Platform for Board {
    fn info(&self) -> &'static PlatformInfo {
        &INFO
    }

    async fn baseconfig(&self, ctx: &BringUp) -> anyhow::Result<()> {
        ctx.record_bmc_enable(true).await;
        ctx.modprobe("i2c-ismt").await;
        ctx.insmod("x86-64-ufispace-s9501-18smt-lpc").await?;

        init_i2c(ctx, &MUXES, false, BUS_ISMT + 9..BUS_ISMT + 23).await?;

        ctx.new_i2c_devices(&GPIO_EXPANDERS).await;
        if let Some(id) = board_id(ctx, "board_id_0").await {
            let outputs: &GpioOutputs = if id.hw_build_rev() == 8 {
                info!("Beta 1 and later GPIO init");
                &BETA1_OUTPUTS
            } else {
                &[]
            };
            init_sfp_gpio(ctx, SFP_GPIO_LINES, outputs).await;
        }

        ctx.insmod("x86-64-ufispace-s9501-18smt-onie-syseeprom")
            .await?;
        ctx.enable_ipmi_maintenance_mode().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::bring_up::test_support::bring_up;
    use crate::hal::RecordingHal;

    #[tokio::test]
    async fn six_ten_gig_ports_and_no_idle_state() {
        let hal = [
            "x86-64-ufispace-s9501-18smt-lpc",
            "x86-64-ufispace-eeprom-mb",
            "optoe",
            "x86-64-ufispace-s9501-18smt-onie-syseeprom",
        ]
        .iter()
        .fold(RecordingHal::new(), |hal, m| {
            hal.with_file(format!("/lib/modules/5.10.0-onl/onl/{}.ko", m), "")
        })
        .with_file("/sys/bus/i2c/devices/9-0072/idle_state", "-1")
        .with_file(
            "/sys/devices/platform/x86_64_ufispace_s9501_18smt_lpc/mb_cpld/board_id_0",
            "32",
        );
        let (hal, ctx) = bring_up(hal, &INFO);
        Board.baseconfig(&ctx).await.unwrap();

        let writes = hal.writes();
        assert!(writes.contains(&(
            "/sys/bus/i2c/devices/23-0050/port_name".to_string(),
            "17".to_string()
        )));
        assert_eq!(hal.file("/sys/bus/i2c/devices/9-0072/idle_state").as_deref(), Some("-1"));
        assert_eq!(hal.file("/sys/class/gpio/gpio415/direction").as_deref(), Some("high"));
        assert_eq!(hal.file("/etc/onl/bmc_en").as_deref(), Some("1"));
        assert!(hal
            .commands()
            .last()
            .is_some_and(|c| c.ends_with("s9501-18smt-onie-syseeprom.ko")));
    }
}
