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
//! Shared context of a bring-up sequence and the driver-loading primitives
//! every platform uses.
use super::error::BringUpError;
use crate::config::{Config, Timeouts};
use crate::hal::{Cmd, CmdOutput, Hal};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const I2C_DEVICES: &str = "/sys/bus/i2c/devices";
const PCI_DRIVERS: &str = "/sys/bus/pci/drivers";

/// Identity of a switch model as exported to ONLP.
#[derive(Debug)]
pub struct PlatformInfo {
    pub platform: &'static str,
    pub model: &'static str,
    pub sys_object_id: &'static str,
    pub port_count: usize,
    pub port_config: &'static str,
    /// sysfs node of the platform LPC driver, if the board has one
    pub lpc: Option<&'static str>,
}

impl PlatformInfo {
    /// Platform name without the trailing `-r<N>` revision.
    pub fn basename(&self) -> &'static str {
        match self.platform.rsplit_once('-') {
            Some((base, rev)) if rev.starts_with('r') => base,
            _ => self.platform,
        }
    }

    /// Vendor component of `<arch>-<vendor>-<model>-r<N>`.
    pub fn vendor(&self) -> &'static str {
        self.platform
            .strip_prefix("x86-64-")
            .and_then(|rest| rest.split('-').next())
            .unwrap_or("onl")
    }
}

/// An i2c client to instantiate through the adapter's `new_device`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct I2cDevice {
    pub driver: &'static str,
    pub addr: u16,
    pub bus: u32,
}

impl I2cDevice {
    pub const fn new(driver: &'static str, addr: u16, bus: u32) -> Self {
        Self { driver, addr, bus }
    }

    pub fn path(&self) -> PathBuf {
        client_path(self.bus, self.addr)
    }
}

impl Display for I2cDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}-{:04x}", self.driver, self.bus, self.addr)
    }
}

/// A sysfs attribute of an instantiated i2c client, typically a CPLD
/// register exported by its driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAttr {
    pub bus: u32,
    pub addr: u16,
    pub attr: &'static str,
}

impl ClientAttr {
    pub const fn new(bus: u32, addr: u16, attr: &'static str) -> Self {
        Self { bus, addr, attr }
    }

    pub fn path(&self) -> PathBuf {
        client_path(self.bus, self.addr).join(self.attr)
    }
}

/// `/sys/bus/i2c/devices/<bus>-<addr:04x>`
pub fn client_path(bus: u32, addr: u16) -> PathBuf {
    Path::new(I2C_DEVICES).join(format!("{}-{:04x}", bus, addr))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BspLevel {
    Info,
    Err,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PciAction {
    Bind,
    Unbind,
}

impl Display for PciAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PciAction::Bind => write!(f, "bind"),
            PciAction::Unbind => write!(f, "unbind"),
        }
    }
}

/// Everything a platform sequence needs: the hardware seam, its identity and
/// the locations of ONL files.
pub struct BringUp {
    hal: Arc<dyn Hal>,
    info: &'static PlatformInfo,
    onl_dir: PathBuf,
    platform_config_dir: PathBuf,
    timeouts: Timeouts,
}

impl BringUp {
    pub fn new(hal: Arc<dyn Hal>, info: &'static PlatformInfo, config: &Config) -> Self {
        Self {
            hal,
            info,
            onl_dir: config.onl_dir.clone(),
            platform_config_dir: config.platform_config_dir.clone(),
            timeouts: config.timeouts.clone(),
        }
    }

    pub fn hal(&self) -> &dyn Hal {
        self.hal.as_ref()
    }

    pub fn info(&self) -> &'static PlatformInfo {
        self.info
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    /// `<lpc>/<attr>`, `None` for boards without an LPC driver.
    pub fn lpc(&self, attr: &str) -> Option<PathBuf> {
        self.info.lpc.map(|lpc| Path::new(lpc).join(attr))
    }

    /// `/lib/platform-config/current/onl`, the platform data of the running
    /// platform including vendor tools.
    pub fn current_onl_dir(&self) -> PathBuf {
        self.platform_config_dir.join("current").join("onl")
    }

    /// `/lib/platform-config/<platform>/onl`
    pub fn platform_onl_dir(&self) -> PathBuf {
        self.platform_config_dir.join(self.info.platform).join("onl")
    }

    /// Runs an external tool. Failures are logged, never fatal.
    pub async fn run(&self, cmd: Cmd) -> Option<CmdOutput> {
        match self.hal.run(&cmd).await {
            Ok(output) => {
                if !output.success() {
                    warn!(
                        "`{}` exited with {:?} {}",
                        cmd,
                        output.code,
                        output.stderr.trim()
                    );
                }
                Some(output)
            }
            Err(e) => {
                warn!("cannot run `{}`: {}", cmd, e);
                None
            }
        }
    }

    /// Runs the vendor PHY tool shipped with the platform data, bounded by
    /// the configured timeout.
    pub async fn epdm_cli(&self, args: &[&str]) {
        let timeout = self.timeouts.epdm;
        let tool = self.current_onl_dir().join("epdm_cli");
        self.run(
            Cmd::new("timeout")
                .arg(format!("{}s", timeout.as_secs()))
                .arg(tool.to_string_lossy())
                .args(args.iter().copied())
                .timeout(timeout + timeout),
        )
        .await;
    }

    pub async fn modprobe(&self, module: &str) {
        self.run(Cmd::new("modprobe").arg(module)).await;
    }

    pub async fn modprobe_all(&self, modules: &[&str]) {
        for module in modules {
            self.modprobe(module).await;
        }
    }

    pub async fn modprobe_remove(&self, module: &str) {
        self.run(Cmd::new("modprobe").args(["-r", module])).await;
    }

    pub async fn rmmod(&self, module: &str) {
        self.run(Cmd::new("rmmod").arg(module)).await;
    }

    pub async fn insmod(&self, module: &str) -> Result<(), BringUpError> {
        self.insmod_with(module, true, &[]).await
    }

    pub async fn insmod_optional(&self, module: &str) -> Result<(), BringUpError> {
        self.insmod_with(module, false, &[]).await
    }

    /// Loads an out-of-tree module shipped with ONL. Lookup order under
    /// `/lib/modules/<release>/onl` is the full platform name, the platform
    /// without revision, `<vendor>/common`, `onl` and finally the top level.
    pub async fn insmod_with(
        &self,
        module: &str,
        required: bool,
        params: &[(&str, &str)],
    ) -> Result<(), BringUpError> {
        let candidates = self.module_candidates(module);
        for path in &candidates {
            if self.hal.exists(path).await {
                let cmd = Cmd::new("insmod")
                    .arg(path.to_string_lossy())
                    .args(params.iter().map(|(k, v)| format!("{}={}", k, v)));
                self.run(cmd).await;
                return Ok(());
            }
        }

        let searched = candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        if required {
            return Err(BringUpError::ModuleNotFound {
                name: module.to_string(),
                searched,
            });
        }
        info!("optional kernel module {} not present", module);
        Ok(())
    }

    fn module_candidates(&self, module: &str) -> Vec<PathBuf> {
        let base = PathBuf::from("/lib/modules")
            .join(self.hal.kernel_release())
            .join("onl");
        let vendor_common = format!("{}/common", self.info.vendor());
        [
            self.info.platform,
            self.info.basename(),
            vendor_common.as_str(),
            "onl",
            ".",
        ]
        .iter()
        .flat_map(|dir| {
            let dir = base.join(dir);
            [
                dir.join(format!("{}.ko", module)),
                dir.join(module),
            ]
        })
        .collect()
    }

    /// Instantiates an i2c client unless the kernel already knows it.
    pub async fn new_i2c_device(&self, device: &I2cDevice) {
        let adapter = Path::new(I2C_DEVICES).join(format!("i2c-{}", device.bus));
        let client = adapter.join(format!("{}-{:04x}", device.bus, device.addr));
        if self.hal.exists(&client).await {
            debug!("{} already instantiated", device);
            return;
        }
        self.write_attr(
            adapter.join("new_device"),
            format!("{} {:#04x}\n", device.driver, device.addr),
        )
        .await;
    }

    pub async fn new_i2c_devices(&self, devices: &[I2cDevice]) {
        for device in devices {
            self.new_i2c_device(device).await;
        }
    }

    /// `echo <value> > <path>`. A failed write is logged and ignored.
    pub async fn write_attr(&self, path: impl AsRef<Path>, value: impl Display) {
        let path = path.as_ref();
        if let Err(e) = self.hal.write(path, &value.to_string()).await {
            warn!("write {} to {}: {}", value, path.display(), e);
        }
    }

    /// Like [`BringUp::write_attr`] but only when the attribute exists.
    pub async fn write_attr_if_exists(&self, path: impl AsRef<Path>, value: impl Display) -> bool {
        let path = path.as_ref();
        if !self.hal.exists(path).await {
            warn!("{} does not exist", path.display());
            return false;
        }
        self.write_attr(path, value).await;
        true
    }

    pub async fn read_attr(&self, path: impl AsRef<Path>) -> Result<String, BringUpError> {
        let path = path.as_ref();
        self.hal
            .read(path)
            .await
            .map(|v| v.trim().to_string())
            .map_err(|e| BringUpError::attribute(path, e))
    }

    /// Reads an integer attribute. Hex values may carry a `0x` prefix, radix
    /// 0 picks hex or decimal from that prefix.
    pub async fn read_int(&self, path: impl AsRef<Path>, radix: u32) -> Result<i64, BringUpError> {
        let path = path.as_ref();
        let raw = self.read_attr(path).await?;
        let hex = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X"));
        let (digits, radix) = match (radix, hex) {
            (0 | 16, Some(digits)) => (digits, 16),
            (0, None) => (raw.as_str(), 10),
            (radix, _) => (raw.as_str(), radix),
        };
        i64::from_str_radix(digits, radix).map_err(|e| {
            BringUpError::attribute(
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })
    }

    /// Publishes whether the BMC owns the management buses, for ONLP.
    pub async fn record_bmc_enable(&self, enabled: bool) {
        info!("bmc enable : {}", enabled);
        self.write_attr(self.onl_dir.join("bmc_en"), format!("{}\n", u8::from(enabled)))
            .await;
    }

    /// Logs a bring-up milestone, mirrored to the kernel log through the LPC
    /// driver when it provides `bsp/bsp_pr_*`.
    pub async fn bsp_pr(&self, message: &str, level: BspLevel) {
        match level {
            BspLevel::Info => info!("{}", message),
            BspLevel::Err => error!("{}", message),
        }

        let attr = match level {
            BspLevel::Info => "bsp/bsp_pr_info",
            BspLevel::Err => "bsp/bsp_pr_err",
        };
        let Some(path) = self.lpc(attr) else {
            return;
        };
        if self.hal.exists(&path).await {
            self.write_attr(&path, message).await;
        } else {
            debug!("bsp_pr sysfs does not exist");
        }
    }

    pub async fn bsp_info(&self, message: &str) {
        self.bsp_pr(message, BspLevel::Info).await
    }

    pub async fn bsp_err(&self, message: &str) {
        self.bsp_pr(message, BspLevel::Err).await
    }

    pub async fn config_bsp_version(&self, version: &str) {
        if let Some(path) = self.lpc("bsp/bsp_version") {
            self.write_attr_if_exists(path, version).await;
        }
    }

    /// Binds or unbinds a PCI function, used to pin the enumeration order of
    /// SMBus controllers.
    pub async fn update_pci_device(&self, driver: &str, device: &str, action: PciAction) {
        let path = Path::new(PCI_DRIVERS)
            .join(driver)
            .join(action.to_string());
        if self.hal.exists(&path).await {
            self.write_attr(path, device).await;
        } else {
            warn!("pci driver {} has no {} attribute", driver, action);
        }
    }

    /// Writes `value` to the system LED attribute of the CPLD and reports the
    /// value it replaced.
    pub async fn set_system_led(&self, path: impl AsRef<Path>, value: u8) {
        let path = path.as_ref();
        let Ok(current) = self.hal.read(path).await else {
            self.bsp_info("System LED sysfs not exist").await;
            return;
        };
        self.write_attr(path, value).await;
        self.bsp_info(&format!(
            "Current System LED: {} -> {:#04x}",
            current.trim(),
            value
        ))
        .await;
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::hal::RecordingHal;

    pub static TEST_PLATFORM: PlatformInfo = PlatformInfo {
        platform: "x86-64-ufispace-s9999-8x-r0",
        model: "S9999-8X",
        sys_object_id: ".9999.8",
        port_count: 8,
        port_config: "8x100",
        lpc: Some("/sys/devices/platform/x86_64_ufispace_s9999_8x_lpc"),
    };

    pub fn bring_up(hal: RecordingHal, info: &'static PlatformInfo) -> (Arc<RecordingHal>, BringUp) {
        let hal = Arc::new(hal);
        let config = Config::load(Path::new("/nonexistent/baseconfig.yaml")).unwrap();
        let ctx = BringUp::new(hal.clone(), info, &config);
        (hal, ctx)
    }

    /// `port_config.yml` naming every port of each `(type, ports)` section
    /// after its one-based front panel number.
    pub fn port_config_yaml(sections: &[(&str, std::ops::Range<u32>)]) -> String {
        let mut yaml = String::new();
        for (kind, ports) in sections {
            yaml.push_str(&format!("{}:\n", kind));
            for port in ports.clone() {
                yaml.push_str(&format!("  {}:\n    port_name: {}\n", port, port + 1));
            }
        }
        yaml
    }

    /// `(path, label)` of every `port_name` write, in order.
    pub fn port_labels(hal: &RecordingHal) -> Vec<(String, String)> {
        hal.writes()
            .into_iter()
            .filter(|(path, _)| path.ends_with("/port_name"))
            .collect()
    }
}
