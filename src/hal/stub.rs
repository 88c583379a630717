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
use super::{Cmd, CmdOutput, Hal, MaintenanceMode, SmbusRead, SmbusTarget, SmbusWrite};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt::Display;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Everything a bring-up sequence did to the machine, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Write { path: PathBuf, value: String },
    Remove(PathBuf),
    Exec(Cmd),
    SmbusRead { target: SmbusTarget, op: SmbusRead },
    SmbusWrite { target: SmbusTarget, op: SmbusWrite },
    GetMaintenanceMode,
    SetMaintenanceMode(MaintenanceMode),
    Sleep(Duration),
}

impl Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let force = |t: &SmbusTarget| if t.force { " -f" } else { "" };
        match self {
            Action::Write { path, value } => {
                write!(f, "echo '{}' > {}", value.trim_end(), path.display())
            }
            Action::Remove(path) => write!(f, "rm {}", path.display()),
            Action::Exec(cmd) => write!(f, "{}", cmd),
            Action::SmbusRead { target, op } => {
                write!(f, "i2cget{} -y {} {:#04x}", force(target), target.bus, target.addr)?;
                match op {
                    SmbusRead::Byte => Ok(()),
                    SmbusRead::ByteData(reg) => write!(f, " {:#04x}", reg),
                    SmbusRead::WordData(reg) => write!(f, " {:#04x} w", reg),
                }
            }
            Action::SmbusWrite { target, op } => {
                write!(f, "i2cset{} -y {} {:#04x}", force(target), target.bus, target.addr)?;
                match op {
                    SmbusWrite::Byte(value) => write!(f, " {:#04x}", value),
                    SmbusWrite::ByteData(reg, value) => write!(f, " {:#04x} {:#04x}", reg, value),
                    SmbusWrite::WordData(reg, value) => {
                        write!(f, " {:#04x} {:#06x} w", reg, value)
                    }
                }
            }
            Action::GetMaintenanceMode => write!(f, "ioctl IPMICTL_GET_MAINTENANCE_MODE_CMD"),
            Action::SetMaintenanceMode(mode) => {
                write!(f, "ioctl IPMICTL_SET_MAINTENANCE_MODE_CMD {}", mode)
            }
            Action::Sleep(duration) => write!(f, "sleep {}", duration.as_secs_f32()),
        }
    }
}

type Register = (u32, u16, Option<u8>);

#[derive(Debug)]
struct State {
    files: BTreeMap<PathBuf, String>,
    dirs: BTreeSet<PathBuf>,
    registers: HashMap<Register, u16>,
    absent_devices: HashSet<(u32, u16)>,
    exit_codes: HashMap<String, i32>,
    maintenance_mode: Option<MaintenanceMode>,
    actions: Vec<Action>,
}

/// In-memory [`Hal`] used for `--dry-run` and tests. Reads are served from a
/// seeded file tree and register map, every mutation is recorded.
///
/// With a backing HAL, file reads the seeded tree cannot answer go to the
/// backing one. Mutations and SMBus traffic never reach it.
///
/// Writing `<driver> <addr>` to an adapter's `new_device` creates the client
/// directory the i2c core would create, so later existence checks behave like
/// on hardware.
#[derive(Debug)]
pub struct RecordingHal {
    state: Mutex<State>,
    kernel_release: String,
    backing: Option<Arc<dyn Hal>>,
}

impl Default for RecordingHal {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                files: BTreeMap::new(),
                dirs: BTreeSet::new(),
                registers: HashMap::new(),
                absent_devices: HashSet::new(),
                exit_codes: HashMap::new(),
                maintenance_mode: Some(MaintenanceMode::Auto),
                actions: Vec::new(),
            }),
            kernel_release: "5.10.0-onl".to_string(),
            backing: None,
        }
    }
}

impl RecordingHal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records on top of a live filesystem, as `--dry-run` does.
    pub fn over(backing: Arc<dyn Hal>) -> Self {
        Self {
            kernel_release: backing.kernel_release(),
            backing: Some(backing),
            ..Self::default()
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn state_mut(&mut self) -> &mut State {
        self.state.get_mut().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        self.state_mut().files.insert(path.into(), content.into());
        self
    }

    pub fn with_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_mut().dirs.insert(path.into());
        self
    }

    /// Seeds the value returned for `op` on `bus`/`addr`.
    pub fn with_register(mut self, bus: u32, addr: u16, op: SmbusRead, value: u16) -> Self {
        self.state_mut()
            .registers
            .insert(register_key(bus, addr, op), value);
        self
    }

    /// Every transfer to `bus`/`addr` fails as if nothing acknowledged it.
    pub fn with_absent_device(mut self, bus: u32, addr: u16) -> Self {
        self.state_mut().absent_devices.insert((bus, addr));
        self
    }

    pub fn with_exit_code(mut self, program: impl Into<String>, code: i32) -> Self {
        self.state_mut().exit_codes.insert(program.into(), code);
        self
    }

    pub fn without_ipmi(mut self) -> Self {
        self.state_mut().maintenance_mode = None;
        self
    }

    pub fn with_kernel_release(mut self, release: impl Into<String>) -> Self {
        self.kernel_release = release.into();
        self
    }

    pub fn actions(&self) -> Vec<Action> {
        self.state().actions.clone()
    }

    /// Recorded sysfs writes as `(path, value)` with trailing newlines removed.
    pub fn writes(&self) -> Vec<(String, String)> {
        self.state()
            .actions
            .iter()
            .filter_map(|a| match a {
                Action::Write { path, value } => Some((
                    path.display().to_string(),
                    value.trim_end().to_string(),
                )),
                _ => None,
            })
            .collect()
    }

    pub fn commands(&self) -> Vec<String> {
        self.state()
            .actions
            .iter()
            .filter_map(|a| match a {
                Action::Exec(cmd) => Some(cmd.to_string()),
                _ => None,
            })
            .collect()
    }

    pub fn file(&self, path: impl AsRef<Path>) -> Option<String> {
        self.state().files.get(path.as_ref()).cloned()
    }

    fn record(&self, action: Action) {
        self.state().actions.push(action);
    }
}

fn register_key(bus: u32, addr: u16, op: SmbusRead) -> Register {
    match op {
        SmbusRead::Byte => (bus, addr, None),
        SmbusRead::ByteData(reg) | SmbusRead::WordData(reg) => (bus, addr, Some(reg)),
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{}: no such file or directory", path.display()),
    )
}

/// Mirrors the i2c core: `i2c-<bus>/new_device` gets a client `<bus>-<addr>`.
fn instantiated_client(path: &Path, value: &str) -> Option<Vec<PathBuf>> {
    if path.file_name()? != "new_device" {
        return None;
    }
    let adapter = path.parent()?;
    let bus = adapter.file_name()?.to_str()?.strip_prefix("i2c-")?;
    let addr = value.split_whitespace().nth(1)?;
    let addr = u16::from_str_radix(addr.trim_start_matches("0x"), 16).ok()?;
    let client = format!("{}-{:04x}", bus, addr);
    Some(vec![
        adapter.join(&client),
        PathBuf::from("/sys/bus/i2c/devices").join(&client),
    ])
}

#[async_trait]
impl Hal for RecordingHal {
    async fn read(&self, path: &Path) -> io::Result<String> {
        let seeded = self.state().files.get(path).cloned();
        match (seeded, &self.backing) {
            (Some(content), _) => Ok(content),
            (None, Some(backing)) => backing.read(path).await,
            (None, None) => Err(not_found(path)),
        }
    }

    async fn write(&self, path: &Path, value: &str) -> io::Result<()> {
        let mut state = self.state();
        state.actions.push(Action::Write {
            path: path.to_path_buf(),
            value: value.to_string(),
        });
        if let Some(clients) = instantiated_client(path, value) {
            state.dirs.extend(clients);
        }
        state.files.insert(path.to_path_buf(), value.to_string());
        Ok(())
    }

    async fn exists(&self, path: &Path) -> bool {
        let seeded = {
            let state = self.state();
            state.files.keys().any(|f| f.starts_with(path))
                || state.dirs.iter().any(|d| d.starts_with(path))
        };
        match &self.backing {
            Some(backing) if !seeded => backing.exists(path).await,
            _ => seeded,
        }
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        let mut state = self.state();
        state.actions.push(Action::Remove(path.to_path_buf()));
        match state.files.remove(path) {
            Some(_) => Ok(()),
            None => Err(not_found(path)),
        }
    }

    async fn list(&self, path: &Path) -> io::Result<Vec<String>> {
        let (mut names, known) = {
            let state = self.state();
            let names: BTreeSet<String> = state
                .files
                .keys()
                .chain(state.dirs.iter())
                .filter_map(|p| p.strip_prefix(path).ok())
                .filter_map(|rest| rest.components().next())
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            let known = !names.is_empty() || state.dirs.contains(path);
            (names, known)
        };

        if let Some(backing) = &self.backing {
            match backing.list(path).await {
                Ok(live) => names.extend(live),
                Err(e) if !known => return Err(e),
                Err(_) => {}
            }
        } else if !known {
            return Err(not_found(path));
        }
        Ok(names.into_iter().collect())
    }

    async fn run(&self, cmd: &Cmd) -> io::Result<CmdOutput> {
        let mut state = self.state();
        state.actions.push(Action::Exec(cmd.clone()));
        let code = state.exit_codes.get(&cmd.program).copied().unwrap_or(0);
        Ok(CmdOutput {
            code: Some(code),
            ..Default::default()
        })
    }

    async fn smbus_read(&self, target: SmbusTarget, op: SmbusRead) -> io::Result<u16> {
        let mut state = self.state();
        state.actions.push(Action::SmbusRead { target, op });
        if state.absent_devices.contains(&(target.bus, target.addr)) {
            return Err(io::Error::from_raw_os_error(nix::libc::ENXIO));
        }
        Ok(state
            .registers
            .get(&register_key(target.bus, target.addr, op))
            .copied()
            .unwrap_or(0))
    }

    async fn smbus_write(&self, target: SmbusTarget, op: SmbusWrite) -> io::Result<()> {
        let mut state = self.state();
        state.actions.push(Action::SmbusWrite { target, op });
        if state.absent_devices.contains(&(target.bus, target.addr)) {
            return Err(io::Error::from_raw_os_error(nix::libc::ENXIO));
        }
        let (key, value) = match op {
            SmbusWrite::Byte(value) => ((target.bus, target.addr, None), value.into()),
            SmbusWrite::ByteData(reg, value) => {
                ((target.bus, target.addr, Some(reg)), value.into())
            }
            SmbusWrite::WordData(reg, value) => ((target.bus, target.addr, Some(reg)), value),
        };
        state.registers.insert(key, value);
        Ok(())
    }

    async fn maintenance_mode(&self) -> io::Result<MaintenanceMode> {
        let mut state = self.state();
        state.actions.push(Action::GetMaintenanceMode);
        state
            .maintenance_mode
            .ok_or_else(|| not_found(Path::new("/dev/ipmi0")))
    }

    async fn set_maintenance_mode(&self, mode: MaintenanceMode) -> io::Result<()> {
        let mut state = self.state();
        state.actions.push(Action::SetMaintenanceMode(mode));
        match state.maintenance_mode.as_mut() {
            Some(current) => {
                *current = mode;
                Ok(())
            }
            None => Err(not_found(Path::new("/dev/ipmi0"))),
        }
    }

    async fn sleep(&self, duration: Duration) {
        self.record(Action::Sleep(duration));
    }

    fn kernel_release(&self) -> String {
        self.kernel_release.clone()
    }
}
