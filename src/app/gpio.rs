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
//! Legacy sysfs GPIO (`/sys/class/gpio`) export and line configuration.
use super::bring_up::BringUp;
use super::error::BringUpError;
use std::fmt::Display;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::info;

const GPIO_CLASS: &str = "/sys/class/gpio";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
    /// output, initially driven high
    High,
    /// output, initially driven low
    Low,
}

impl Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Direction::In => "in",
            Direction::Out => "out",
            Direction::High => "high",
            Direction::Low => "low",
        };
        write!(f, "{}", s)
    }
}

/// How expander offsets map onto global line numbers. Older BSPs publish the
/// first line (`bsp_gpio_base`), newer ones the last (`bsp_gpio_max`) and
/// count downwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioNumbering {
    FromBase(u32),
    FromMax(u32),
}

impl GpioNumbering {
    /// Global line of `offset`, `None` when it falls outside `0..=u32::MAX`.
    pub fn line(&self, offset: u32) -> Option<u32> {
        match self {
            GpioNumbering::FromBase(base) => base.checked_add(offset),
            GpioNumbering::FromMax(max) => max.checked_sub(offset),
        }
    }
}

impl Display for GpioNumbering {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GpioNumbering::FromBase(base) => write!(f, "bsp_gpio_base {}", base),
            GpioNumbering::FromMax(max) => write!(f, "bsp_gpio_max {}", max),
        }
    }
}

/// Kernel gpio numbers are C ints; anything outside `0..=i32::MAX` is garbage.
fn gpio_number(value: i64) -> Option<u32> {
    u32::try_from(i32::try_from(value).ok()?).ok()
}

/// Expander blocks allocated downwards from the highest gpiochip, as the
/// gpio core does for dynamically numbered chips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpioChipStack {
    pub top: u32,
    pub ngpio: u32,
}

impl GpioChipStack {
    /// Lines of the `index`-th expander counted from the top.
    pub fn block(&self, index: u32) -> Result<Range<u32>, BringUpError> {
        index
            .checked_mul(self.ngpio)
            .and_then(|below| self.top.checked_sub(below))
            .and_then(|end| Some(end.checked_sub(self.ngpio)?..end))
            .ok_or(BringUpError::GpioBlock {
                top: self.top,
                ngpio: self.ngpio,
                index,
            })
    }

    /// Every line of the expanders in `blocks`, in block order.
    pub fn lines(&self, blocks: Range<u32>) -> Result<Vec<u32>, BringUpError> {
        let mut lines = Vec::new();
        for index in blocks {
            lines.extend(self.block(index)?);
        }
        Ok(lines)
    }
}

/// Lines configured together: every offset gets `default` unless `overrides`
/// lists it.
#[derive(Debug, Clone)]
pub struct GpioLayout<'a> {
    pub offsets: Range<u32>,
    pub default: Direction,
    pub overrides: &'a [(u32, Direction)],
}

impl GpioLayout<'_> {
    pub fn direction(&self, offset: u32) -> Direction {
        self.overrides
            .iter()
            .find(|(o, _)| *o == offset)
            .map_or(self.default, |(_, d)| *d)
    }
}

pub fn gpio_attr(line: u32, attr: &str) -> PathBuf {
    Path::new(GPIO_CLASS).join(format!("gpio{}", line)).join(attr)
}

impl BringUp {
    pub async fn gpio_export(&self, line: u32) {
        self.write_attr(Path::new(GPIO_CLASS).join("export"), line)
            .await;
    }

    pub async fn gpio_direction(&self, line: u32, direction: Direction) {
        self.write_attr(gpio_attr(line, "direction"), direction)
            .await;
    }

    pub async fn gpio_active_low(&self, line: u32, active_low: bool) {
        self.write_attr(gpio_attr(line, "active_low"), u8::from(active_low))
            .await;
    }

    pub async fn gpio_value(&self, line: u32, value: u8) {
        self.write_attr(gpio_attr(line, "value"), value).await;
    }

    /// Exports every line and sets its direction.
    pub async fn gpio_setup<I>(&self, lines: I)
    where
        I: IntoIterator<Item = (u32, Direction)>,
    {
        for (line, direction) in lines {
            self.gpio_export(line).await;
            self.gpio_direction(line, direction).await;
        }
    }

    /// Exports every line of `layouts`, then sets the directions. Nothing is
    /// touched when an offset does not map onto a line.
    pub async fn gpio_apply(
        &self,
        numbering: GpioNumbering,
        layouts: &[GpioLayout<'_>],
    ) -> Result<(), BringUpError> {
        let mut lines = Vec::new();
        for layout in layouts {
            for offset in layout.offsets.clone() {
                let Some(line) = numbering.line(offset) else {
                    let err = BringUpError::GpioOffset { numbering, offset };
                    self.bsp_err(&err.to_string()).await;
                    return Err(err);
                };
                lines.push((line, layout.direction(offset)));
            }
        }

        for (line, _) in &lines {
            self.gpio_export(*line).await;
        }
        for (line, direction) in lines {
            self.gpio_direction(line, direction).await;
        }
        Ok(())
    }

    /// Highest line number published by the LPC driver, `default` when the
    /// attribute cannot be read.
    pub async fn gpio_max(&self, default: u32) -> u32 {
        let attr = self.lpc("bsp/bsp_gpio_max");
        let value = match &attr {
            Some(path) => self.read_int(path, 10).await.map_err(|e| e.to_string()),
            None => Err("platform has no lpc driver".to_string()),
        };
        let gpio_max = match value {
            Ok(max) => gpio_number(max).ok_or_else(|| format!("Invalid gpio max: {}", max)),
            Err(e) => Err(format!("Get gpio max failed: {}", e)),
        };
        let gpio_max = match gpio_max {
            Ok(max) => max,
            Err(msg) => {
                self.bsp_err(&msg).await;
                self.bsp_err(&format!("Use default GPIO MAX value {}", default))
                    .await;
                default
            }
        };
        self.bsp_info(&format!("GPIO MAX: {}", gpio_max)).await;
        gpio_max
    }

    /// Resolves the numbering from `bsp_gpio_base` and `bsp_gpio_max`. A
    /// valid base wins; neither being valid stops the bring-up.
    pub async fn gpio_numbering(&self) -> Result<GpioNumbering, BringUpError> {
        let max = self.bsp_gpio_attr("bsp/bsp_gpio_max").await;
        let base = self.bsp_gpio_attr("bsp/bsp_gpio_base").await;
        info!("GPIO MAX: {}, GPIO Base: {}", max, base);

        if let Ok(base) = u32::try_from(base) {
            Ok(GpioNumbering::FromBase(base))
        } else if let Ok(max) = u32::try_from(max) {
            Ok(GpioNumbering::FromMax(max))
        } else {
            self.bsp_err(&format!(
                "invalid gpio_max {} and gpio_base {}, bsp init stopped",
                max, base
            ))
            .await;
            Err(BringUpError::InvalidGpioBase { base, max })
        }
    }

    async fn bsp_gpio_attr(&self, attr: &str) -> i32 {
        let Some(path) = self.lpc(attr) else {
            return -1;
        };
        match self.read_int(&path, 10).await {
            Ok(value) => i32::try_from(value).unwrap_or(-1),
            Err(e) => {
                info!("{}, using -1", e);
                -1
            }
        }
    }

    /// Finds the gpiochip with the highest base and derives the top of the
    /// dynamically allocated range from it.
    pub async fn gpiochip_stack(&self) -> Result<GpioChipStack, BringUpError> {
        let class = Path::new(GPIO_CLASS);
        let chips = self
            .hal()
            .list(class)
            .await
            .map_err(|e| BringUpError::attribute(class, e))?;

        let mut highest: Option<(&str, i64, i64)> = None;
        for chip in chips.iter().filter(|c| c.starts_with("gpiochip")) {
            let base = self.read_int(class.join(chip).join("base"), 10).await?;
            let ngpio = self.read_int(class.join(chip).join("ngpio"), 10).await?;
            if highest.map_or(true, |(_, b, _)| base > b) {
                highest = Some((chip.as_str(), base, ngpio));
            }
        }

        let (chip, base, ngpio) =
            highest.ok_or_else(|| BringUpError::NoGpioChip(class.into()))?;
        let top = base.checked_add(ngpio).and_then(gpio_number);
        let (Some(top), Some(ngpio_lines)) = (top, gpio_number(ngpio)) else {
            return Err(BringUpError::InvalidGpioChip {
                chip: chip.to_string(),
                base,
                ngpio,
            });
        };
        let stack = GpioChipStack {
            top,
            ngpio: ngpio_lines,
        };
        info!("GPIO_BASE = {}", stack.top);
        Ok(stack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::bring_up::test_support::*;
    use crate::hal::RecordingHal;

    const LPC: &str = "/sys/devices/platform/x86_64_ufispace_s9999_8x_lpc";

    #[test]
    fn numbering_counts_from_either_end() {
        assert_eq!(GpioNumbering::FromBase(464).line(3), Some(467));
        assert_eq!(GpioNumbering::FromMax(511).line(3), Some(508));
        assert_eq!(GpioNumbering::FromMax(5).line(10), None);
        assert_eq!(GpioNumbering::FromBase(u32::MAX).line(1), None);
    }

    #[test]
    fn chip_stack_blocks_grow_downwards() {
        let stack = GpioChipStack {
            top: 512,
            ngpio: 16,
        };
        assert_eq!(stack.block(0).unwrap(), 496..512);
        assert_eq!(stack.block(2).unwrap(), 464..480);
        assert_eq!(stack.lines(0..2).unwrap(), (480..512).collect::<Vec<_>>());
    }

    #[test]
    fn chip_stack_block_below_zero_is_an_error() {
        let stack = GpioChipStack {
            top: 32,
            ngpio: 16,
        };
        assert_eq!(stack.block(1).unwrap(), 0..16);
        assert!(matches!(
            stack.block(2),
            Err(BringUpError::GpioBlock {
                top: 32,
                ngpio: 16,
                index: 2
            })
        ));
        assert!(stack.lines(0..3).is_err());
        assert!(stack.block(u32::MAX).is_err());
    }

    #[tokio::test]
    async fn setup_exports_before_direction() {
        let (hal, ctx) = bring_up(RecordingHal::new(), &TEST_PLATFORM);
        ctx.gpio_setup([(511, Direction::In), (510, Direction::Low)])
            .await;
        assert_eq!(
            hal.writes(),
            vec![
                ("/sys/class/gpio/export".to_string(), "511".to_string()),
                (
                    "/sys/class/gpio/gpio511/direction".to_string(),
                    "in".to_string()
                ),
                ("/sys/class/gpio/export".to_string(), "510".to_string()),
                (
                    "/sys/class/gpio/gpio510/direction".to_string(),
                    "low".to_string()
                ),
            ]
        );
    }

    #[tokio::test]
    async fn layout_overrides_default_direction() {
        let (hal, ctx) = bring_up(RecordingHal::new(), &TEST_PLATFORM);
        let layout = GpioLayout {
            offsets: 0..3,
            default: Direction::In,
            overrides: &[(1, Direction::High)],
        };
        ctx.gpio_apply(GpioNumbering::FromMax(511), &[layout])
            .await
            .unwrap();

        let directions: Vec<_> = hal
            .writes()
            .into_iter()
            .filter(|(path, _)| path.ends_with("direction"))
            .map(|(_, value)| value)
            .collect();
        assert_eq!(directions, vec!["in", "high", "in"]);
        assert_eq!(
            hal.writes()[..3],
            [
                ("/sys/class/gpio/export".to_string(), "511".to_string()),
                ("/sys/class/gpio/export".to_string(), "510".to_string()),
                ("/sys/class/gpio/export".to_string(), "509".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn layout_past_line_zero_touches_nothing() {
        let (hal, ctx) = bring_up(RecordingHal::new(), &TEST_PLATFORM);
        let layout = GpioLayout {
            offsets: 0..16,
            default: Direction::In,
            overrides: &[],
        };
        let err = ctx
            .gpio_apply(GpioNumbering::FromMax(5), &[layout])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BringUpError::GpioOffset {
                numbering: GpioNumbering::FromMax(5),
                offset: 6
            }
        ));
        assert!(!hal
            .writes()
            .iter()
            .any(|(path, _)| path.starts_with(GPIO_CLASS)));
    }

    #[tokio::test]
    async fn gpio_max_falls_back_to_default() {
        let (_, ctx) = bring_up(
            RecordingHal::new().with_file(format!("{}/bsp/bsp_gpio_max", LPC), "767\n"),
            &TEST_PLATFORM,
        );
        assert_eq!(ctx.gpio_max(511).await, 767);

        let (_, ctx) = bring_up(
            RecordingHal::new().with_file(format!("{}/bsp/bsp_gpio_max", LPC), "-3"),
            &TEST_PLATFORM,
        );
        assert_eq!(ctx.gpio_max(511).await, 511);
        let (_, ctx) = bring_up(
            RecordingHal::new().with_file(format!("{}/bsp/bsp_gpio_max", LPC), "4294967296"),
            &TEST_PLATFORM,
        );
        assert_eq!(ctx.gpio_max(511).await, 511);

        let (hal, ctx) = bring_up(RecordingHal::new(), &TEST_PLATFORM);
        assert_eq!(ctx.gpio_max(511).await, 511);
        assert!(hal.writes().is_empty());
    }

    #[tokio::test]
    async fn gpio_base_wins_over_max() {
        let (_, ctx) = bring_up(
            RecordingHal::new()
                .with_file(format!("{}/bsp/bsp_gpio_max", LPC), "511")
                .with_file(format!("{}/bsp/bsp_gpio_base", LPC), "464"),
            &TEST_PLATFORM,
        );
        assert_eq!(
            ctx.gpio_numbering().await.unwrap(),
            GpioNumbering::FromBase(464)
        );

        let (_, ctx) = bring_up(
            RecordingHal::new()
                .with_file(format!("{}/bsp/bsp_gpio_max", LPC), "511")
                .with_file(format!("{}/bsp/bsp_gpio_base", LPC), "-1"),
            &TEST_PLATFORM,
        );
        assert_eq!(
            ctx.gpio_numbering().await.unwrap(),
            GpioNumbering::FromMax(511)
        );
    }

    #[tokio::test]
    async fn no_numbering_aborts() {
        let (_, ctx) = bring_up(RecordingHal::new(), &TEST_PLATFORM);
        assert!(matches!(
            ctx.gpio_numbering().await,
            Err(BringUpError::InvalidGpioBase { base: -1, max: -1 })
        ));
    }

    #[tokio::test]
    async fn chip_stack_uses_highest_chip() {
        let (_, ctx) = bring_up(
            RecordingHal::new()
                .with_file("/sys/class/gpio/gpiochip96/base", "96")
                .with_file("/sys/class/gpio/gpiochip96/ngpio", "16")
                .with_file("/sys/class/gpio/gpiochip480/base", "480")
                .with_file("/sys/class/gpio/gpiochip480/ngpio", "16")
                .with_file("/sys/class/gpio/export", ""),
            &TEST_PLATFORM,
        );
        assert_eq!(
            ctx.gpiochip_stack().await.unwrap(),
            GpioChipStack {
                top: 496,
                ngpio: 16
            }
        );
    }

    #[tokio::test]
    async fn negative_chip_base_is_rejected() {
        let (_, ctx) = bring_up(
            RecordingHal::new()
                .with_file("/sys/class/gpio/gpiochip0/base", "-32")
                .with_file("/sys/class/gpio/gpiochip0/ngpio", "16"),
            &TEST_PLATFORM,
        );
        assert!(matches!(
            ctx.gpiochip_stack().await,
            Err(BringUpError::InvalidGpioChip { base: -32, ngpio: 16, .. })
        ));
    }
}
