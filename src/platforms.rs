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
//! One bring-up sequence per supported switch model.
use crate::app::bring_up::{BringUp, PlatformInfo};
use crate::app::error::BringUpError;
use async_trait::async_trait;

mod s6301_56st;
mod s6301_56stp;
mod s8901_54xc;
mod s9110_32x;
mod s9180_32x;
mod s9280_64x_4bwb;
mod s9300_32d;
mod s9311_64d;
mod s9321_64e;
mod s9321_64eo;
mod s9500_54cf;
mod s9501_16smt;
mod s9501_18smt;
mod s9501_28smt;
mod s9502_12sm;
mod s9502_16smt;
mod s9510_28dc;
mod s9510_30xc;
mod s9600_28dx;
mod s9600_30dx;
mod s9600_32x;
mod s9600_48x;
mod s9600_64x;
mod s9601_104bc;
mod s9610_36d;
mod s9610_48dx;
mod s9700_23d;
mod s9701_82dc;
mod s9705_48d;
mod s9710_76d;

#[async_trait]
pub trait Platform: Send + Sync {
    fn info(&self) -> &'static PlatformInfo;

    /// Brings the board from a bare kernel to the state ONLP expects.
    async fn baseconfig(&self, ctx: &BringUp) -> anyhow::Result<()>;
}

static PLATFORMS: &[&dyn Platform] = &[
    &s9180_32x::Board,
    &s9280_64x_4bwb::Board,
    &s6301_56st::Board,
    &s6301_56stp::Board,
    &s8901_54xc::Board,
    &s9110_32x::Board,
    &s9300_32d::Board,
    &s9311_64d::Board,
    &s9321_64e::Board,
    &s9321_64eo::Board,
    &s9500_54cf::Board,
    &s9501_16smt::Board,
    &s9501_18smt::Board,
    &s9501_28smt::Board,
    &s9502_12sm::Board,
    &s9502_16smt::Board,
    &s9510_28dc::Board,
    &s9510_30xc::Board,
    &s9600_28dx::Board,
    &s9600_30dx::Board,
    &s9600_32x::Board,
    &s9600_48x::Board,
    &s9600_64x::Board,
    &s9601_104bc::Board,
    &s9610_36d::Board,
    &s9610_48dx::Board,
    &s9700_23d::Board,
    &s9701_82dc::Board,
    &s9705_48d::Board,
    &s9710_76d::Board,
];

pub fn all() -> &'static [&'static dyn Platform] {
    PLATFORMS
}

pub fn find(name: &str) -> Result<&'static dyn Platform, BringUpError> {
    PLATFORMS
        .iter()
        .copied()
        .find(|p| p.info().platform == name)
        .ok_or_else(|| BringUpError::UnknownPlatform(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn platform_names_are_unique() {
        let names: HashSet<_> = all().iter().map(|p| p.info().platform).collect();
        assert_eq!(names.len(), all().len());
    }

    #[test]
    fn lookup_by_onl_name() {
        let platform = find("x86-64-ufispace-s9610-36d-r0").unwrap();
        assert_eq!(platform.info().model, "S9610-36D");
        assert_eq!(platform.info().port_count, 36);

        assert!(matches!(
            find("x86-64-ufispace-s0000-0x-r0"),
            Err(BringUpError::UnknownPlatform(_))
        ));
    }

    #[test]
    fn lpc_nodes_follow_platform_name() {
        for platform in all() {
            let info = platform.info();
            if let Some(lpc) = info.lpc {
                let expected = format!("{}_lpc", info.basename().replace('-', "_"));
                assert!(lpc.ends_with(&expected), "{} {}", info.platform, lpc);
            }
        }
    }
}
