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
//! Pluggable module EEPROMs and their front panel labels.
use super::bring_up::{client_path, BringUp, I2cDevice};
use super::error::BringUpError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::Path;

/// Address of the module EEPROM behind every port mux channel.
pub const PORT_EEPROM_ADDR: u16 = 0x50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortEeprom {
    /// front panel index, the key in `port_config.yml`
    pub port: u32,
    /// port type section in `port_config.yml`
    pub kind: &'static str,
    pub driver: &'static str,
    pub bus: u32,
}

impl PortEeprom {
    pub const fn new(port: u32, kind: &'static str, driver: &'static str, bus: u32) -> Self {
        Self {
            port,
            kind,
            driver,
            bus,
        }
    }
}

/// Consecutive ports of one type on consecutive buses.
pub fn port_range(
    first_port: u32,
    kind: &'static str,
    driver: &'static str,
    buses: std::ops::Range<u32>,
) -> impl Iterator<Item = PortEeprom> {
    buses
        .enumerate()
        .map(move |(i, bus)| PortEeprom::new(first_port + i as u32, kind, driver, bus))
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum PortName {
    Number(i64),
    Text(String),
}

impl Display for PortName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortName::Number(n) => write!(f, "{}", n),
            PortName::Text(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortEntry {
    pub port_name: PortName,
}

/// `port_config.yml`: `<type>: { <port>: { port_name: <label> } }`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct PortConfig(BTreeMap<String, BTreeMap<u32, PortEntry>>);

impl PortConfig {
    pub fn parse(yaml: &str) -> Result<Self, serde_yaml::Error> {
        let config: Option<PortConfig> = serde_yaml::from_str(yaml)?;
        Ok(config.unwrap_or_default())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn port_name(&self, kind: &str, port: u32) -> Option<&PortName> {
        self.0
            .get(kind)
            .and_then(|ports| ports.get(&port))
            .map(|entry| &entry.port_name)
    }
}

/// Where the label written to `port_name` comes from.
#[derive(Debug, Clone, Copy)]
pub enum PortLabels<'a> {
    /// the front panel index itself
    Index,
    Config {
        config: &'a PortConfig,
        path: &'a Path,
    },
}

impl BringUp {
    pub async fn load_port_config(&self, path: &Path) -> Result<PortConfig, BringUpError> {
        let yaml = self
            .hal()
            .read(path)
            .await
            .map_err(|e| BringUpError::port_config(path, e))?;
        PortConfig::parse(&yaml).map_err(|e| BringUpError::port_config(path, e))
    }

    /// Instantiates the module EEPROM of every port and labels it. An empty
    /// `port_config.yml` labels by index; a port missing from a non-empty
    /// one aborts.
    pub async fn init_port_eeproms<I>(&self, ports: I, labels: PortLabels<'_>) -> Result<(), BringUpError>
    where
        I: IntoIterator<Item = PortEeprom>,
    {
        for port in ports {
            self.new_i2c_device(&I2cDevice::new(port.driver, PORT_EEPROM_ADDR, port.bus))
                .await;

            let label = match labels {
                PortLabels::Index => port.port.to_string(),
                PortLabels::Config { config, .. } if config.is_empty() => port.port.to_string(),
                PortLabels::Config { config, path } => config
                    .port_name(port.kind, port.port)
                    .ok_or_else(|| {
                        BringUpError::port_config(
                            path,
                            format!("no port_name for {} port {}", port.kind, port.port),
                        )
                    })?
                    .to_string(),
            };
            self.write_attr(
                client_path(port.bus, PORT_EEPROM_ADDR).join("port_name"),
                label,
            )
            .await;
        }
        Ok(())
    }
}
