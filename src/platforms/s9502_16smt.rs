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
use super::s9502_12sm::{init_gpio, init_i2c, init_mux_ctrl, HWMON};
use super::Platform;
use crate::app::bring_up::{BringUp, I2cDevice, PlatformInfo};
use async_trait::async_trait;

pub static INFO: PlatformInfo = PlatformInfo {
    platform: "x86-64-ufispace-s9502-16smt-r0",
    model: "S9502-16SMT",
    sys_object_id: ".9502.16",
    port_count: 16,
    port_config: "12x1 + 4x10",
    lpc: Some("/sys/devices/platform/x86_64_ufispace_s9502_16smt_lpc"),
};

/// Ports 0-3 are copper.
const FIRST_SFP_PORT: u32 = 4;

pub struct Board;

#[async_trait]
impl Platform for Board {
    fn info(&self) -> &'static PlatformInfo {
        &INFO
    }

    async fn baseconfig(&self, ctx: &BringUp) -> anyhow::Result<()> {
        ctx.record_bmc_enable(false).await;
        ctx.modprobe("i2c-ismt").await;
        ctx.insmod("x86-64-ufispace-s9502-16smt-lpc").await?;
        init_mux_ctrl(ctx).await;

        init_i2c(ctx, FIRST_SFP_PORT).await?;
        init_gpio(ctx).await;

        ctx.modprobe_all(&["ucd9000", "lm90", "jc42"]).await;
        ctx.new_i2c_devices(&HWMON).await;
        ctx.new_i2c_device(&I2cDevice::new("jc42", 0x1a, 0)).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::bring_up::test_support::bring_up;
    use crate::hal::RecordingHal;

    #[tokio::test]
    async fn sfp_labels_start_after_copper_ports() {
        let hal = ["x86-64-ufispace-s9502-16smt-lpc", "x86-64-ufispace-eeprom-mb", "optoe"]
            .iter()
            .fold(RecordingHal::new(), |hal, m| {
                hal.with_file(format!("/lib/modules/5.10.0-onl/onl/{}.ko", m), "")
            });
        let (hal, ctx) = bring_up(hal, &INFO);
        Board.baseconfig(&ctx).await.unwrap();

        let writes = hal.writes();
        assert!(writes.contains(&(
            "/sys/bus/i2c/devices/14-0050/port_name".to_string(),
            "4".to_string()
        )));
        assert!(!writes.iter().any(|(p, _)| p == "/sys/class/gpio/export"));
        assert_eq!(
            writes.last(),
            Some(&(
                "/sys/bus/i2c/devices/i2c-0/new_device".to_string(),
                "jc42 0x1a".to_string()
            ))
        );
    }
}
