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
//! Mux housekeeping and raw SMBus register access, the `i2cget`/`i2cset`
//! side of a bring-up sequence.
use super::bring_up::{client_path, BringUp, I2cDevice};
use crate::hal::{SmbusRead, SmbusTarget, SmbusWrite};
use tracing::{debug, info, warn};

/// Value of a PCA954x `idle_state` that disconnects every channel.
const IDLE_STATE_DISCONNECT: i32 = -2;

/// How a board checks its root mux and what it pokes when the bus is stuck.
#[derive(Debug, Clone, Copy)]
pub struct I2cStatusCheck {
    pub bus: u32,
    pub mux: u16,
    /// LPC attribute resetting the muxes, `None` when recovery is disabled
    pub reset: Option<&'static str>,
}

/// One `i2cset -y -r` step of a register init table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterWrite {
    pub bus: u32,
    pub addr: u16,
    pub reg: u8,
    pub value: u8,
}

pub const fn reg_write(bus: u32, addr: u16, reg: u8, value: u8) -> RegisterWrite {
    RegisterWrite {
        bus,
        addr,
        reg,
        value,
    }
}

impl BringUp {
    pub async fn init_mux_idle_state(&self, muxes: &[I2cDevice]) {
        for mux in muxes {
            let idle_state = mux.path().join("idle_state");
            if self.hal().exists(&idle_state).await {
                self.write_attr(idle_state, IDLE_STATE_DISCONNECT).await;
            }
        }
    }

    /// Probes the root mux and resets the mux tree once if nothing answers.
    pub async fn check_i2c_status(&self, check: I2cStatusCheck) {
        let target = SmbusTarget::forced(check.bus, check.mux);
        let Err(e) = self.hal().smbus_read(target, SmbusRead::Byte).await else {
            return;
        };
        warn!("Read I2C Mux Failed!! ({}: {})", target, e);

        let Some(reset) = check.reset else {
            return;
        };
        let Some(path) = self.lpc(reset) else {
            return;
        };
        if self.hal().exists(&path).await {
            self.write_attr(&path, 0).await;
            info!("I2C bus recovery done.");
        } else {
            warn!(
                "I2C recovery sysfs does not exist!! (path={})",
                path.display()
            );
        }
    }

    /// Makes the CPLDs behind `mux` visible to the kernel: open `channel`,
    /// touch register 2 of each CPLD, close the channel.
    pub async fn golden_finger(&self, bus: u32, mux: u16, channel: u8, cplds: &[u16]) {
        self.i2c_send(bus, mux, channel).await;
        for cpld in cplds {
            self.i2c_get(bus, *cpld, 0x2).await;
        }
        self.i2c_send(bus, mux, 0x0).await;
    }

    async fn smbus_read(&self, target: SmbusTarget, op: SmbusRead) -> Option<u16> {
        match self.hal().smbus_read(target, op).await {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("read {} {:?}: {}", target, op, e);
                None
            }
        }
    }

    async fn smbus_write(&self, target: SmbusTarget, op: SmbusWrite) -> bool {
        match self.hal().smbus_write(target, op).await {
            Ok(()) => true,
            Err(e) => {
                warn!("write {} {:?}: {}", target, op, e);
                false
            }
        }
    }

    /// `i2cget -y <bus> <addr> <reg>`
    pub async fn i2c_get(&self, bus: u32, addr: u16, reg: u8) -> Option<u8> {
        self.smbus_read(SmbusTarget::new(bus, addr), SmbusRead::ByteData(reg))
            .await
            .map(|v| v as u8)
    }

    /// `i2cget -y <bus> <addr> <reg> w`
    pub async fn i2c_get_word(&self, bus: u32, addr: u16, reg: u8) -> Option<u16> {
        self.smbus_read(SmbusTarget::new(bus, addr), SmbusRead::WordData(reg))
            .await
    }

    /// `i2cset -y <bus> <addr> <value>`
    pub async fn i2c_send(&self, bus: u32, addr: u16, value: u8) -> bool {
        self.smbus_write(SmbusTarget::new(bus, addr), SmbusWrite::Byte(value))
            .await
    }

    /// `i2cset -y <bus> <addr> <reg> <value>`
    pub async fn i2c_set(&self, bus: u32, addr: u16, reg: u8, value: u8) -> bool {
        self.smbus_write(SmbusTarget::new(bus, addr), SmbusWrite::ByteData(reg, value))
            .await
    }

    /// `i2cset -y <bus> <addr> <reg> <value> w`
    pub async fn i2c_set_word(&self, bus: u32, addr: u16, reg: u8, value: u16) -> bool {
        self.smbus_write(SmbusTarget::new(bus, addr), SmbusWrite::WordData(reg, value))
            .await
    }

    /// `i2cset -y -r <bus> <addr> <reg> <value>`: write, then read back.
    pub async fn i2c_set_verified(&self, bus: u32, addr: u16, reg: u8, value: u8) -> bool {
        if !self.i2c_set(bus, addr, reg, value).await {
            return false;
        }
        match self.i2c_get(bus, addr, reg).await {
            Some(readback) if readback == value => true,
            Some(readback) => {
                warn!(
                    "{} reg {:#04x}: wrote {:#04x}, read back {:#04x}",
                    SmbusTarget::new(bus, addr),
                    reg,
                    value,
                    readback
                );
                false
            }
            None => false,
        }
    }

    /// `i2cset -y -m <mask> <bus> <addr> <reg> <value>`: only the bits in
    /// `mask` are taken from `value`.
    pub async fn i2c_set_masked(&self, bus: u32, addr: u16, reg: u8, value: u8, mask: u8) -> bool {
        let Some(current) = self.i2c_get(bus, addr, reg).await else {
            return false;
        };
        self.i2c_set(bus, addr, reg, (current & !mask) | (value & mask))
            .await
    }

    /// Runs a register table in order, returning how many steps failed.
    pub async fn i2c_set_table(&self, table: &[RegisterWrite]) -> usize {
        let mut failed = 0;
        for w in table {
            if !self.i2c_set_verified(w.bus, w.addr, w.reg, w.value).await {
                failed += 1;
            }
        }
        failed
    }

    /// Path of a client attribute, `/sys/bus/i2c/devices/<bus>-<addr>/<attr>`.
    pub fn client_attr(&self, bus: u32, addr: u16, attr: &str) -> std::path::PathBuf {
        client_path(bus, addr).join(attr)
    }
}
