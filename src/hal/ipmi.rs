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
//! Maintenance-mode control of the IPMI message handler (`linux/ipmi.h`).
use std::fmt::Display;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::raw::c_int;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

/// Device nodes the ipmi_devintf driver is known to create, in search order.
pub const IPMI_DEVICE_NODES: [&str; 3] = ["/dev/ipmi0", "/dev/ipmi/0", "/dev/ipmidev/0"];

const IPMI_IOC_MAGIC: u8 = b'i';

nix::ioctl_read!(ipmi_get_maintenance_mode, IPMI_IOC_MAGIC, 30, c_int);
nix::ioctl_write_ptr!(ipmi_set_maintenance_mode, IPMI_IOC_MAGIC, 31, c_int);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceMode {
    Auto,
    Off,
    On,
    Unknown(i32),
}

impl From<i32> for MaintenanceMode {
    fn from(value: i32) -> Self {
        match value {
            0 => MaintenanceMode::Auto,
            1 => MaintenanceMode::Off,
            2 => MaintenanceMode::On,
            x => MaintenanceMode::Unknown(x),
        }
    }
}

impl From<MaintenanceMode> for i32 {
    fn from(value: MaintenanceMode) -> Self {
        match value {
            MaintenanceMode::Auto => 0,
            MaintenanceMode::Off => 1,
            MaintenanceMode::On => 2,
            MaintenanceMode::Unknown(x) => x,
        }
    }
}

impl Display for MaintenanceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", i32::from(*self))
    }
}

/// Opens the first IPMI device node that can be opened read/write. `rebase`
/// maps the canonical node path onto the filesystem in use.
pub fn open_device(rebase: impl Fn(&Path) -> PathBuf) -> io::Result<File> {
    let mut last_error = io::Error::new(io::ErrorKind::NotFound, "no ipmi device node");
    for node in IPMI_DEVICE_NODES {
        match OpenOptions::new()
            .read(true)
            .write(true)
            .open(rebase(Path::new(node)))
        {
            Ok(file) => return Ok(file),
            Err(err) => {
                tracing::debug!("open {} failed: {}", node, err);
                last_error = err;
            }
        }
    }
    Err(last_error)
}

pub fn get_maintenance_mode(device: &File) -> io::Result<MaintenanceMode> {
    let mut mode: c_int = 0;
    // SAFETY: `mode` is a valid int the driver writes the current mode into.
    unsafe { ipmi_get_maintenance_mode(device.as_raw_fd(), &mut mode) }?;
    Ok(mode.into())
}

pub fn set_maintenance_mode(device: &File, mode: MaintenanceMode) -> io::Result<()> {
    let mode: c_int = mode.into();
    // SAFETY: the driver copies one int from the pointer.
    unsafe { ipmi_set_maintenance_mode(device.as_raw_fd(), &mode) }?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maintenance_mode_values_follow_ipmi_h() {
        assert_eq!(i32::from(MaintenanceMode::Auto), 0);
        assert_eq!(i32::from(MaintenanceMode::Off), 1);
        assert_eq!(i32::from(MaintenanceMode::On), 2);
        assert_eq!(MaintenanceMode::from(7), MaintenanceMode::Unknown(7));
    }
}
