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
//! Paged register programming of the Si534x style clock generator.
use super::bring_up::BringUp;
use std::time::Duration;
use tracing::warn;

/// Register selecting the active page.
const PAGE_REG: u8 = 0x01;
const SETTLE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClkgenValue {
    Byte(u8),
    /// The step's register number goes out as a word on the page register
    /// (`i2cset <addr> 0x01 <reg> w`), then `reg` is read back as a word and
    /// compared with this value.
    PageWord(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClkgenStep {
    pub page: u8,
    pub reg: u8,
    pub value: ClkgenValue,
}

/// Shorthand for the byte-wide steps making up most sequences.
pub const fn step(page: u8, reg: u8, value: u8) -> ClkgenStep {
    ClkgenStep {
        page,
        reg,
        value: ClkgenValue::Byte(value),
    }
}

pub const fn word_step(page: u8, reg: u8, value: u16) -> ClkgenStep {
    ClkgenStep {
        page,
        reg,
        value: ClkgenValue::PageWord(value),
    }
}

/// Where the clock generator sits: behind channel `channel` of `mux`.
#[derive(Debug, Clone, Copy)]
pub struct Clkgen {
    pub bus: u32,
    pub addr: u16,
    pub mux: u16,
    pub channel: u8,
}

/// A full reprogramming, in the order the device requires it.
#[derive(Debug)]
pub struct ClkgenSequence<'a> {
    pub preamble: &'a [ClkgenStep],
    pub body: &'a [ClkgenStep],
    pub soft_reset: &'a [ClkgenStep],
    pub postamble: &'a [ClkgenStep],
}

impl BringUp {
    /// Writes one block of steps. A step whose read back differs is logged,
    /// the block still runs to the end.
    pub async fn clkgen_write(&self, clkgen: &Clkgen, block: &str, steps: &[ClkgenStep]) -> usize {
        let mut mismatches = 0;
        for (index, step) in steps.iter().enumerate() {
            self.i2c_set(clkgen.bus, clkgen.addr, PAGE_REG, step.page)
                .await;
            let matched = match step.value {
                ClkgenValue::Byte(value) => {
                    self.i2c_set(clkgen.bus, clkgen.addr, step.reg, value).await;
                    let readback = self.i2c_get(clkgen.bus, clkgen.addr, step.reg).await;
                    check_readback(block, index, readback.map(u16::from), value.into())
                }
                ClkgenValue::PageWord(value) => {
                    self.i2c_set_word(clkgen.bus, clkgen.addr, PAGE_REG, step.reg.into())
                        .await;
                    let readback = self.i2c_get_word(clkgen.bus, clkgen.addr, step.reg).await;
                    check_readback(block, index, readback, value)
                }
            };
            if !matched {
                mismatches += 1;
            }
        }
        mismatches
    }

    pub async fn clkgen_program(&self, clkgen: &Clkgen, sequence: &ClkgenSequence<'_>) {
        self.i2c_send(clkgen.bus, clkgen.mux, clkgen.channel).await;

        self.clkgen_write(clkgen, "write_preamble", sequence.preamble)
            .await;
        self.hal().sleep(SETTLE).await;
        self.clkgen_write(clkgen, "perform_freerun", sequence.body)
            .await;
        self.clkgen_write(clkgen, "write_soft_rst", sequence.soft_reset)
            .await;
        self.clkgen_write(clkgen, "write_post_amble", sequence.postamble)
            .await;

        self.i2c_send(clkgen.bus, clkgen.mux, 0x0).await;
    }
}

fn check_readback(block: &str, index: usize, readback: Option<u16>, expected: u16) -> bool {
    match readback {
        Some(value) if value == expected => true,
        Some(value) => {
            warn!(
                "Get {} {} for CLKGEN failed. {:#x}=/={:#x}",
                block, index, value, expected
            );
            false
        }
        None => {
            warn!("Get {} {} for CLKGEN failed.", block, index);
            false
        }
    }
}
