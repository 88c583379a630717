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
//! MAC core voltage: the CPLD exposes the VID/AVS strap of the ASIC, the
//! matching output voltage is programmed into the regulator.
use super::bring_up::{BringUp, ClientAttr};
use super::error::BringUpError;
use std::path::Path;
use tracing::{info, warn};

/// PMBus `VOUT_COMMAND`
pub const VOUT_COMMAND: u8 = 0x21;

/// VID strap to core voltage and regulator code.
#[derive(Debug)]
pub struct VidTable {
    pub vdd: [f32; 8],
    pub code: [u8; 8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegWidth {
    Byte,
    Word,
}

/// One regulator and where its VID is found in the strap register.
#[derive(Debug, Clone, Copy)]
pub struct RovRail {
    pub source: ClientAttr,
    pub shift: u32,
    pub mask: u32,
    pub bus: u32,
    pub addr: u16,
    pub width: RegWidth,
}

/// VID strap held in a CPLD register rather than a sysfs attribute.
#[derive(Debug, Clone, Copy)]
pub struct StrapRegister {
    pub bus: u32,
    pub addr: u16,
    pub reg: u8,
    pub mask: u8,
}

#[derive(Debug, Clone, Copy)]
pub struct AvsEntry {
    pub code: u32,
    pub vdd: &'static str,
    pub vout: u16,
}

impl VidTable {
    pub fn lookup(&self, vid: usize) -> Option<(f32, u8)> {
        Some((*self.vdd.get(vid)?, *self.code.get(vid)?))
    }
}

impl BringUp {
    /// Programs every rail from its VID strap. Failing to read a strap stops
    /// the bring-up. Progress goes to the log only, not the BSP log.
    pub async fn init_mac_rov(&self, table: &VidTable, rails: &[RovRail]) -> Result<(), BringUpError> {
        for (index, rail) in rails.iter().enumerate() {
            let strap = self.read_int(rail.source.path(), 16).await?;
            let vid = ((strap as u32) >> rail.shift) & rail.mask;
            let Some((vdd, code)) = table.lookup(vid as usize) else {
                warn!("mac[{}] vid {} out of range", index, vid);
                continue;
            };

            info!(
                "Setting mac[{}] vdd {:.2} with rov register value {:#x}",
                index, vdd, code
            );
            match rail.width {
                RegWidth::Byte => self.i2c_set(rail.bus, rail.addr, VOUT_COMMAND, code).await,
                RegWidth::Word => {
                    self.i2c_set_word(rail.bus, rail.addr, VOUT_COMMAND, code.into())
                        .await
                }
            };
        }
        Ok(())
    }

    /// Register flavour for boards without an LPC driver. An unreadable strap
    /// leaves the regulator at its power-on default.
    pub async fn init_mac_rov_register(
        &self,
        table: &VidTable,
        strap: StrapRegister,
        regulator: (u32, u16),
    ) {
        let Some(raw) = self.i2c_get(strap.bus, strap.addr, strap.reg).await else {
            return;
        };
        let vid = raw & strap.mask;
        let Some((vdd, code)) = table.lookup(vid as usize) else {
            return;
        };
        let (bus, addr) = regulator;
        if self
            .i2c_set_word(bus, addr, VOUT_COMMAND, code.into())
            .await
        {
            info!(
                "Setting mac vdd {:.2} with rov register value {:#x}",
                vdd, code
            );
        }
    }

    /// AVS flavour: the strap is a code, only codes listed in `table` are
    /// programmed.
    pub async fn init_mac_avs(
        &self,
        source: &Path,
        table: &[AvsEntry],
        regulators: &[(u32, u16)],
    ) -> Result<(), BringUpError> {
        let raw = self.read_attr(source).await?;
        let code = self.read_int(source, 0).await? as u32;
        self.bsp_info(&format!("{}={}", source.display(), raw)).await;

        let Some(entry) = table.iter().find(|e| e.code == code) else {
            self.bsp_info(&format!("no vout command for avs code {:#04X}", code))
                .await;
            return Ok(());
        };
        for (index, (bus, addr)) in regulators.iter().enumerate() {
            self.bsp_info(&format!(
                "Setting mac[{}] vdd {} with rov register value {:#06x}",
                index, entry.vdd, entry.vout
            ))
            .await;
            self.i2c_set_word(*bus, *addr, VOUT_COMMAND, entry.vout)
                .await;
        }
        Ok(())
    }
}

/// Regulator codes shared by the Tomahawk boards.
pub const TOMAHAWK_VID: VidTable = VidTable {
    vdd: [0.82, 0.82, 0.76, 0.78, 0.80, 0.84, 0.86, 0.88],
    code: [0x73, 0x73, 0x67, 0x6b, 0x6f, 0x77, 0x7b, 0x7f],
};

/// Regulator codes of the Tofino boards.
pub const TOFINO_VID: VidTable = VidTable {
    vdd: [0.85, 0.82, 0.77, 0.87, 0.74, 0.84, 0.79, 0.89],
    code: [0x24, 0x21, 0x1c, 0x26, 0x19, 0x23, 0x1e, 0x28],
};

/// Regulator codes of the Jericho2 family.
pub const JERICHO2_VID: VidTable = VidTable {
    vdd: [0.84, 0.80, 0.70, 0.72, 0.74, 0.76, 0.78, 0.82],
    code: [0x77, 0x6f, 0x5b, 0x5f, 0x63, 0x67, 0x6b, 0x73],
};
