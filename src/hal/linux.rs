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
use super::{ipmi, smbus, Cmd, CmdOutput, Hal, MaintenanceMode, SmbusRead, SmbusTarget, SmbusWrite};
use async_trait::async_trait;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::task::spawn_blocking;
use tracing::{debug, trace};

/// Talks to the real machine. All absolute paths are resolved relative to
/// `root`, which is `/` on a switch and a scratch directory in tests.
#[derive(Debug, Clone)]
pub struct LinuxHal {
    root: PathBuf,
}

impl LinuxHal {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn rebase(&self, path: &Path) -> PathBuf {
        rebase(&self.root, path)
    }

    fn i2c_dev(&self, bus: u32) -> PathBuf {
        self.rebase(Path::new(&format!("/dev/i2c-{}", bus)))
    }
}

impl Default for LinuxHal {
    fn default() -> Self {
        Self::new("/")
    }
}

fn rebase(root: &Path, path: &Path) -> PathBuf {
    let relative: PathBuf = path
        .components()
        .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
        .collect();
    root.join(relative)
}

#[async_trait]
impl Hal for LinuxHal {
    async fn read(&self, path: &Path) -> io::Result<String> {
        tokio::fs::read_to_string(self.rebase(path)).await
    }

    async fn write(&self, path: &Path, value: &str) -> io::Result<()> {
        trace!("echo {} > {}", value.trim_end(), path.display());
        tokio::fs::write(self.rebase(path), value).await
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(self.rebase(path))
            .await
            .unwrap_or(false)
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        debug!("rm {}", path.display());
        tokio::fs::remove_file(self.rebase(path)).await
    }

    async fn list(&self, path: &Path) -> io::Result<Vec<String>> {
        let mut dir = tokio::fs::read_dir(self.rebase(path)).await?;
        let mut names = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn run(&self, cmd: &Cmd) -> io::Result<CmdOutput> {
        debug!("exec: {}", cmd);
        let child = Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = match cmd.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, child.wait_with_output()).await {
                Ok(output) => output?,
                Err(_) => {
                    debug!("{} timed out after {:?}", cmd.program, timeout);
                    return Ok(CmdOutput::default());
                }
            },
            None => child.wait_with_output().await?,
        };

        Ok(CmdOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn smbus_read(&self, target: SmbusTarget, op: SmbusRead) -> io::Result<u16> {
        let device = self.i2c_dev(target.bus);
        let value = spawn_blocking(move || smbus::read(&device, target, op)).await??;
        trace!("smbus read {} {:?} -> {:#x}", target, op, value);
        Ok(value)
    }

    async fn smbus_write(&self, target: SmbusTarget, op: SmbusWrite) -> io::Result<()> {
        trace!("smbus write {} {:?}", target, op);
        let device = self.i2c_dev(target.bus);
        spawn_blocking(move || smbus::write(&device, target, op)).await?
    }

    async fn maintenance_mode(&self) -> io::Result<MaintenanceMode> {
        let root = self.root.clone();
        spawn_blocking(move || {
            let device = ipmi::open_device(|p| rebase(&root, p))?;
            ipmi::get_maintenance_mode(&device)
        })
        .await?
    }

    async fn set_maintenance_mode(&self, mode: MaintenanceMode) -> io::Result<()> {
        let root = self.root.clone();
        spawn_blocking(move || {
            let device = ipmi::open_device(|p| rebase(&root, p))?;
            ipmi::set_maintenance_mode(&device, mode)
        })
        .await?
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await
    }

    fn kernel_release(&self) -> String {
        nix::sys::utsname::uname()
            .map(|u| u.release().to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn paths_are_rebased_under_root() {
        let hal = LinuxHal::new("/tmp/switch");
        assert_eq!(
            hal.rebase(Path::new("/sys/class/gpio/export")),
            PathBuf::from("/tmp/switch/sys/class/gpio/export")
        );
        assert_eq!(
            LinuxHal::default().rebase(Path::new("/etc/onl/bmc_en")),
            PathBuf::from("/etc/onl/bmc_en")
        );
    }

    #[tokio::test]
    async fn filesystem_roundtrip_inside_root() {
        let tmp_dir = TempDir::new("linux_hal").unwrap();
        let hal = LinuxHal::new(tmp_dir.path());
        std::fs::create_dir_all(tmp_dir.path().join("sys/class/gpio")).unwrap();
        std::fs::write(tmp_dir.path().join("sys/class/gpio/gpiochip496"), "").unwrap();
        std::fs::write(tmp_dir.path().join("sys/class/gpio/gpiochip480"), "").unwrap();

        hal.write(Path::new("/sys/class/gpio/export"), "511")
            .await
            .unwrap();
        assert_eq!(
            hal.read(Path::new("/sys/class/gpio/export")).await.unwrap(),
            "511"
        );
        assert!(hal.exists(Path::new("/sys/class/gpio/export")).await);
        assert!(!hal.exists(Path::new("/sys/class/gpio/unexport")).await);
        assert_eq!(
            hal.list(Path::new("/sys/class/gpio")).await.unwrap(),
            vec!["export", "gpiochip480", "gpiochip496"]
        );
    }

    #[tokio::test]
    async fn missing_ipmi_device_is_an_error() {
        let tmp_dir = TempDir::new("linux_hal_ipmi").unwrap();
        let hal = LinuxHal::new(tmp_dir.path());
        let err = hal.maintenance_mode().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
