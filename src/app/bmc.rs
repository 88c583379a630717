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
use super::bring_up::BringUp;
use crate::hal::{Cmd, MaintenanceMode};
use std::path::Path;
use tracing::{info, warn};

const WATCHDOG_NODE: &str = "/dev/watchdog";

impl BringUp {
    /// Puts the IPMI message handler in maintenance mode so firmware
    /// commands are not throttled while the BMC is being set up.
    pub async fn enable_ipmi_maintenance_mode(&self) {
        let hal = self.hal();
        let mode = match hal.maintenance_mode().await {
            Ok(mode) => mode,
            Err(e) => {
                warn!("no usable ipmi device, skipping maintenance mode: {}", e);
                return;
            }
        };
        info!("Current IPMI_MAINTENANCE_MODE={}", mode);

        if let Err(e) = hal.set_maintenance_mode(MaintenanceMode::On).await {
            warn!("set IPMI_MAINTENANCE_MODE: {}", e);
        }

        match hal.maintenance_mode().await {
            Ok(mode) => info!("After IPMI_IOCTL IPMI_MAINTENANCE_MODE={}", mode),
            Err(e) => warn!("get IPMI_MAINTENANCE_MODE: {}", e),
        }
    }

    /// Removes the `/dev/watchdog` node so nothing in userspace arms the
    /// BMC watchdog through it.
    pub async fn remove_watchdog_node(&self) {
        let node = Path::new(WATCHDOG_NODE);
        if !self.hal().exists(node).await {
            return;
        }
        match self.hal().remove(node).await {
            Ok(()) => info!("Disable Watchdog Done."),
            Err(e) => warn!("remove {}: {}", WATCHDOG_NODE, e),
        }
    }

    pub async fn disable_bmc_watchdog(&self) {
        self.run(Cmd::new("ipmitool").args(["mc", "watchdog", "off"]))
            .await;
    }

    /// Syncs the BMC event log clock with the host.
    pub async fn sync_sel_time(&self) {
        let timeout = self.timeouts().ipmitool;
        self.run(
            Cmd::new("timeout")
                .arg(timeout.as_secs().to_string())
                .args(["ipmitool", "sel", "time", "set", "now"])
                .timeout(timeout + timeout),
        )
        .await;
    }

    /// Boards sharing the management bus with a BMC: when the BMC owns the
    /// bus the root mux does not answer the host.
    pub async fn probe_bmc(&self, bus: u32, mux: u16) -> bool {
        self.i2c_get(bus, mux, 0x0).await.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::bring_up::test_support::*;
    use crate::hal::stub::Action;
    use crate::hal::{Hal, RecordingHal};

    #[tokio::test]
    async fn maintenance_mode_is_switched_on() {
        let (hal, ctx) = bring_up(RecordingHal::new(), &TEST_PLATFORM);
        ctx.enable_ipmi_maintenance_mode().await;
        assert_eq!(
            hal.actions(),
            vec![
                Action::GetMaintenanceMode,
                Action::SetMaintenanceMode(MaintenanceMode::On),
                Action::GetMaintenanceMode,
            ]
        );
        assert_eq!(hal.maintenance_mode().await.unwrap(), MaintenanceMode::On);
    }

    #[tokio::test]
    async fn missing_ipmi_device_is_skipped() {
        let (hal, ctx) = bring_up(RecordingHal::new().without_ipmi(), &TEST_PLATFORM);
        ctx.enable_ipmi_maintenance_mode().await;
        assert_eq!(hal.actions(), vec![Action::GetMaintenanceMode]);
    }

    #[tokio::test]
    async fn ipmitool_commands() {
        let (hal, ctx) = bring_up(RecordingHal::new(), &TEST_PLATFORM);
        ctx.disable_bmc_watchdog().await;
        ctx.sync_sel_time().await;
        assert_eq!(
            hal.commands(),
            vec![
                "ipmitool mc watchdog off",
                "timeout 5 ipmitool sel time set now"
            ]
        );
    }

    #[tokio::test]
    async fn watchdog_node_removed_once() {
        let (hal, ctx) = bring_up(
            RecordingHal::new().with_file("/dev/watchdog", ""),
            &TEST_PLATFORM,
        );
        ctx.remove_watchdog_node().await;
        ctx.remove_watchdog_node().await;
        assert_eq!(
            hal.actions(),
            vec![Action::Remove("/dev/watchdog".into())]
        );
    }

    #[tokio::test]
    async fn bmc_detected_when_mux_is_silent() {
        let (_, ctx) = bring_up(RecordingHal::new().with_absent_device(0, 0x76), &TEST_PLATFORM);
        assert!(ctx.probe_bmc(0, 0x76).await);
        let (_, ctx) = bring_up(RecordingHal::new(), &TEST_PLATFORM);
        assert!(!ctx.probe_bmc(0, 0x76).await);
    }
}
