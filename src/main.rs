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
#![deny(clippy::mod_module_files)]
mod app;
mod config;
mod hal;
mod platforms;

use crate::app::bring_up::BringUp;
use crate::config::{Config, Log, DEFAULT_CONFIG_PATH};
use crate::hal::{Hal, LinuxHal, RecordingHal};
use anyhow::Context;
use clap::{command, value_parser, Arg, ArgAction, ArgMatches};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();

    if matches.get_flag("list") {
        for platform in platforms::all() {
            let info = platform.info();
            println!("{:<36} {}", info.platform, info.model);
        }
        return Ok(());
    }

    let config = load_config(&matches)?;
    let _logger_lifetime = init_logger(&config.log)?;

    if let Err(e) = run(&config).await {
        tracing::error!("baseconfig failed: {:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn run(config: &Config) -> anyhow::Result<()> {
    let name = config.platform_name().await?;
    let platform = platforms::find(&name)?;
    let info = platform.info();
    tracing::info!("{} ({}), {} ports", info.model, info.platform, info.port_count);

    let live: Arc<dyn Hal> = Arc::new(LinuxHal::new(&config.root));
    if !config.dry_run {
        let ctx = BringUp::new(live, info, config);
        platform.baseconfig(&ctx).await?;
        tracing::info!("{} bring-up done", info.model);
        return Ok(());
    }

    let recorder = Arc::new(RecordingHal::over(live));
    let ctx = BringUp::new(recorder.clone(), info, config);
    let result = platform.baseconfig(&ctx).await;
    for action in recorder.actions() {
        println!("{}", action);
    }
    result
}

fn cli() -> clap::Command {
    command!()
        .arg(
            Arg::new("config")
                .long("config")
                .value_parser(value_parser!(PathBuf))
                .default_value(DEFAULT_CONFIG_PATH),
        )
        .arg(
            Arg::new("platform")
                .long("platform")
                .help("ONL platform name, e.g. x86-64-ufispace-s9600-32x-r0"),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .action(ArgAction::SetTrue)
                .help("print the bring-up sequence instead of executing it"),
        )
        .arg(
            Arg::new("list")
                .long("list")
                .action(ArgAction::SetTrue)
                .help("list supported platforms"),
        )
}

fn load_config(matches: &ArgMatches) -> anyhow::Result<Config> {
    let path = matches
        .get_one::<PathBuf>("config")
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), Clone::clone);
    let mut config = Config::load(&path)
        .with_context(|| format!("Error parsing config file {}", path.display()))?;

    if let Some(platform) = matches.get_one::<String>("platform") {
        config.platform = platform.clone();
    }
    config.dry_run |= matches.get_flag("dry-run");
    Ok(config)
}

fn init_logger(log: &Log) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_new(&log.directive)
        .with_context(|| format!("invalid log directive `{}`", log.directive))?;

    let file_appender = tracing_appender::rolling::Builder::new()
        .rotation(Rotation::HOURLY)
        .max_log_files(3)
        .filename_prefix("baseconfig.log")
        .build(&log.directory);

    let (file_layer, guard, file_error) = match file_appender {
        Ok(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard), None)
        }
        Err(e) => (None, None, Some(e)),
    };

    let stdout_layer = log.stdout.then(|| {
        fmt::layer()
            .without_time()
            .with_writer(std::io::stdout)
            .compact()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    if let Some(e) = file_error {
        tracing::warn!("no log file in {}: {}", log.directory.display(), e);
    }
    tracing::info!("ONL platform baseconfig v{}", env!("CARGO_PKG_VERSION"));
    Ok(guard)
}
