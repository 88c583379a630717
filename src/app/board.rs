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
//! Board revision straps exported by the main board CPLD.
use super::bring_up::BringUp;
use super::error::BringUpError;
use std::io;
use tracing::debug;

/// Revision read from the individual `board_*_id` attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardVersion {
    pub hw_rev: u32,
    pub deph_id: u32,
    pub hw_build: u32,
    pub ext_id: u32,
}

/// A revision packed into one CPLD register (`board_id_0`/`board_id_1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedBoardId(pub u32);

impl PackedBoardId {
    /// `board_id_0` layout: model in bits 0-3, hw revision in 4-5, build
    /// revision in 6-7.
    pub fn hw_rev(&self) -> u32 {
        (self.0 & 0b0011_0000) >> 4
    }

    pub fn build_rev(&self) -> u32 {
        (self.0 & 0b1100_0000) >> 6
    }

    pub fn hw_build_rev(&self) -> u32 {
        (self.hw_rev() << 2) | self.build_rev()
    }

    /// `board_id_1` layout of the S9600 family: hw revision in bits 0-1,
    /// deph id in bit 2.
    pub fn hw_build_id(&self) -> u32 {
        let hw_rev = self.0 & 0b0000_0011;
        let deph_id = (self.0 & 0b0000_0100) >> 2;
        (deph_id << 2) + hw_rev
    }
}

impl BringUp {
    /// Reads `mb_cpld/board_{hw,deph,build,ext}_id`. Unreadable values count
    /// as 1 and are reported through the BSP log.
    pub async fn board_version(&self) -> BoardVersion {
        let version = BoardVersion {
            hw_rev: self.board_strap("mb_cpld/board_hw_id", 1).await,
            deph_id: self.board_strap("mb_cpld/board_deph_id", 1).await,
            hw_build: self.board_strap("mb_cpld/board_build_id", 1).await,
            ext_id: self.board_strap("mb_cpld/board_ext_id", 1).await,
        };
        debug!(
            "board version: hw_rev={} deph_id={} build={} ext_id={}",
            version.hw_rev, version.deph_id, version.hw_build, version.ext_id
        );
        version
    }

    /// Reads one `mb_cpld` strap as a decimal number, `default` when it
    /// cannot be read.
    pub async fn board_strap(&self, attr: &str, default: u32) -> u32 {
        let value = match self.lpc(attr) {
            Some(path) => self.read_int(path, 10).await,
            None => return default,
        };
        match value.map(u32::try_from) {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => {
                self.bsp_err(&format!("Get {} from LPC failed: {}", attr, e))
                    .await;
                default
            }
            Err(e) => {
                self.bsp_err(&format!("Get {} from LPC failed: {}", attr, e))
                    .await;
                default
            }
        }
    }

    /// Reads a packed id register of the main board CPLD, e.g. `board_id_0`.
    pub async fn packed_board_id(&self, attr: &str) -> Result<PackedBoardId, BringUpError> {
        let attr = format!("mb_cpld/{}", attr);
        let path = self.lpc(&attr).ok_or_else(|| {
            BringUpError::attribute(
                &attr,
                io::Error::new(io::ErrorKind::NotFound, "platform has no lpc driver"),
            )
        })?;
        let value = self.read_int(&path, 10).await?;
        Ok(PackedBoardId(value as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::bring_up::test_support::*;
    use crate::hal::RecordingHal;

    const LPC: &str = "/sys/devices/platform/x86_64_ufispace_s9999_8x_lpc";

    #[test]
    fn board_id_0_fields() {
        // build 2, hw 1, model 5
        let id = PackedBoardId(0b1001_0101);
        assert_eq!(id.hw_rev(), 1);
        assert_eq!(id.build_rev(), 2);
        assert_eq!(id.hw_build_rev(), 0b0110);
        assert_eq!(PackedBoardId(0b1000_0000).hw_build_rev(), 2);
        assert_eq!(PackedBoardId(0b0010_0000).hw_build_rev(), 8);
    }

    #[test]
    fn board_id_1_fields() {
        assert_eq!(PackedBoardId(0b0000_0001).hw_build_id(), 1);
        assert_eq!(PackedBoardId(0b0000_0110).hw_build_id(), 6);
        assert_eq!(PackedBoardId(0b0011_1101).hw_build_id(), 5);
    }

    #[tokio::test]
    async fn missing_straps_default_to_one() {
        let (_, ctx) = bring_up(
            RecordingHal::new()
                .with_file(format!("{}/mb_cpld/board_hw_id", LPC), "2\n")
                .with_file(format!("{}/mb_cpld/board_deph_id", LPC), "0\n"),
            &TEST_PLATFORM,
        );
        assert_eq!(
            ctx.board_version().await,
            BoardVersion {
                hw_rev: 2,
                deph_id: 0,
                hw_build: 1,
                ext_id: 1
            }
        );
    }

    #[tokio::test]
    async fn packed_id_is_required() {
        let (_, ctx) = bring_up(
            RecordingHal::new().with_file(format!("{}/mb_cpld/board_id_0", LPC), "32"),
            &TEST_PLATFORM,
        );
        assert_eq!(
            ctx.packed_board_id("board_id_0").await.unwrap().hw_build_rev(),
            8
        );
        assert!(ctx.packed_board_id("board_id_1").await.is_err());
    }
}
