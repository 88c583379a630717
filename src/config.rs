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
use anyhow::Context;
use config::{Environment, FileFormat};
use serde::Deserialize;
use serde_with::serde_as;
use serde_with::DurationSeconds;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_YAML: &str = include_str!("../default_config.yaml");
pub const DEFAULT_CONFIG_PATH: &str = "/etc/onl/baseconfig.yaml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub platform: String,
    pub root: PathBuf,
    pub onl_dir: PathBuf,
    pub platform_config_dir: PathBuf,
    pub dry_run: bool,
    pub log: Log,
    pub timeouts: Timeouts,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Log {
    pub stdout: bool,
    pub directive: String,
    pub directory: PathBuf,
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct Timeouts {
    #[serde_as(as = "DurationSeconds<u64>")]
    pub ipmitool: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub epdm: Duration,
}

impl Config {
    /// Layers the built-in defaults, the optional `config_file` and
    /// `BASECONFIG_*` environment variables, in that order.
    pub fn load(config_file: &Path) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_YAML, FileFormat::Yaml))
            .add_source(
                config::File::new(&config_file.to_string_lossy(), FileFormat::Yaml).required(false),
            )
            .add_source(
                Environment::with_prefix("BASECONFIG")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Platform name from the configuration, falling back to the one ONL
    /// installed in `<onl_dir>/platform`.
    pub async fn platform_name(&self) -> anyhow::Result<String> {
        if !self.platform.is_empty() {
            return Ok(self.platform.clone());
        }
        let path = self
            .root
            .join(self.onl_dir.strip_prefix("/").unwrap_or(&self.onl_dir))
            .join("platform");
        let name = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("cannot read {}", path.display()))?;
        Ok(name.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempdir::TempDir;

    #[test]
    fn defaults_are_complete() {
        let config = Config::load(Path::new("/nonexistent/baseconfig.yaml")).unwrap();
        assert_eq!(config.root, PathBuf::from("/"));
        assert_eq!(config.onl_dir, PathBuf::from("/etc/onl"));
        assert_eq!(config.timeouts.epdm, Duration::from_secs(120));
        assert_eq!(config.timeouts.ipmitool, Duration::from_secs(5));
        assert!(!config.dry_run);
    }

    #[tokio::test]
    async fn file_overrides_defaults() {
        let tmp_dir = TempDir::new("config").unwrap();
        let path = tmp_dir.path().join("baseconfig.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "platform: x86-64-ufispace-s9600-32x-r0").unwrap();
        writeln!(file, "timeouts:\n  ipmitool: 10\n  epdm: 60").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.platform_name().await.unwrap(),
            "x86-64-ufispace-s9600-32x-r0"
        );
        assert_eq!(config.timeouts.ipmitool, Duration::from_secs(10));
        assert_eq!(config.log.directive, "info");
    }

    #[tokio::test]
    async fn platform_name_falls_back_to_onl_file() {
        let tmp_dir = TempDir::new("config_platform").unwrap();
        std::fs::create_dir_all(tmp_dir.path().join("etc/onl")).unwrap();
        std::fs::write(
            tmp_dir.path().join("etc/onl/platform"),
            "x86-64-ufispace-s9705-48d-r2\n",
        )
        .unwrap();

        let config = Config {
            root: tmp_dir.path().to_path_buf(),
            ..Config::load(Path::new("/nonexistent/baseconfig.yaml")).unwrap()
        };
        assert_eq!(
            config.platform_name().await.unwrap(),
            "x86-64-ufispace-s9705-48d-r2"
        );

        let config = Config {
            root: tmp_dir.path().join("missing"),
            ..config
        };
        assert!(config.platform_name().await.is_err());
    }
}
