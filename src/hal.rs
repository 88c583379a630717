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
//! Hardware abstraction layer. Everything a bring-up sequence does to the
//! machine goes through [`Hal`], so the same sequence can be executed on a
//! switch, recorded for a dry-run, or asserted in a test.
mod ipmi;
mod linux;
mod smbus;
pub mod stub;

pub use ipmi::MaintenanceMode;
pub use linux::LinuxHal;
pub use stub::RecordingHal;

use async_trait::async_trait;
use std::fmt::Display;
use std::io;
use std::path::Path;
use std::time::Duration;

/// SMBus transfer types used by the bring-up sequences. They map one-to-one
/// onto the `i2cget`/`i2cset` modes of i2c-tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmbusRead {
    /// read a byte without register (`i2cget <bus> <addr>`)
    Byte,
    ByteData(u8),
    WordData(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmbusWrite {
    /// write a single byte without register (`i2cset <bus> <addr> <byte>`)
    Byte(u8),
    ByteData(u8, u8),
    WordData(u8, u16),
}

/// Address of a target on a given i2c-dev bus. `force` claims the address
/// even when a kernel driver is bound to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmbusTarget {
    pub bus: u32,
    pub addr: u16,
    pub force: bool,
}

impl SmbusTarget {
    pub const fn new(bus: u32, addr: u16) -> Self {
        Self {
            bus,
            addr,
            force: false,
        }
    }

    pub const fn forced(bus: u32, addr: u16) -> Self {
        Self {
            bus,
            addr,
            force: true,
        }
    }
}

impl Display for SmbusTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "i2c-{}@{:#04x}", self.bus, self.addr)
    }
}

/// External program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Option<Duration>,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl Display for Cmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmdOutput {
    /// `None` when the process was killed by a signal or timed out
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[async_trait]
pub trait Hal: Send + Sync + std::fmt::Debug {
    async fn read(&self, path: &Path) -> io::Result<String>;
    async fn write(&self, path: &Path, value: &str) -> io::Result<()>;
    async fn exists(&self, path: &Path) -> bool;
    async fn remove(&self, path: &Path) -> io::Result<()>;
    /// names of the entries of a directory, sorted
    async fn list(&self, path: &Path) -> io::Result<Vec<String>>;

    async fn run(&self, cmd: &Cmd) -> io::Result<CmdOutput>;

    async fn smbus_read(&self, target: SmbusTarget, op: SmbusRead) -> io::Result<u16>;
    async fn smbus_write(&self, target: SmbusTarget, op: SmbusWrite) -> io::Result<()>;

    async fn maintenance_mode(&self) -> io::Result<MaintenanceMode>;
    async fn set_maintenance_mode(&self, mode: MaintenanceMode) -> io::Result<()>;

    async fn sleep(&self, duration: Duration);
    fn kernel_release(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmd_renders_like_a_shell_line() {
        let cmd = Cmd::new("ipmitool")
            .args(["mc", "watchdog", "off"])
            .timeout(Duration::from_secs(5));
        assert_eq!(cmd.to_string(), "ipmitool mc watchdog off");
        assert_eq!(cmd.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn smbus_target_display() {
        assert_eq!(SmbusTarget::new(0, 0x75).to_string(), "i2c-0@0x75");
        assert!(SmbusTarget::forced(1, 0x72).force);
    }
}
