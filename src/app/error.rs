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
use super::gpio::GpioNumbering;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Conditions that abort a bring-up sequence. Everything else is logged and
/// the sequence carries on.
#[derive(Debug, Error)]
pub enum BringUpError {
    #[error("platform '{0}' is not supported")]
    UnknownPlatform(String),
    #[error("kernel module {name} not found, searched {}", .searched.join(", "))]
    ModuleNotFound { name: String, searched: Vec<String> },
    #[error("invalid gpio numbering: bsp_gpio_base={base}, bsp_gpio_max={max}")]
    InvalidGpioBase { base: i32, max: i32 },
    #[error("gpio offset {offset} does not fit below {numbering}")]
    GpioOffset {
        numbering: GpioNumbering,
        offset: u32,
    },
    #[error("gpio block {index} of {ngpio} lines does not fit below line {top}")]
    GpioBlock { top: u32, ngpio: u32, index: u32 },
    #[error("{chip} reports base {base} with {ngpio} lines")]
    InvalidGpioChip { chip: String, base: i64, ngpio: i64 },
    #[error("no gpiochip found under {0}")]
    NoGpioChip(PathBuf),
    #[error("port config {}: {reason}", .path.display())]
    PortConfig { path: PathBuf, reason: String },
    #[error("cannot read {}", .path.display())]
    Attribute {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl BringUpError {
    pub fn attribute(path: impl Into<PathBuf>, source: io::Error) -> Self {
        BringUpError::Attribute {
            path: path.into(),
            source,
        }
    }

    pub fn port_config(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        BringUpError::PortConfig {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
