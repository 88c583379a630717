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
//! Blocking SMBus transfers over the Linux i2c-dev interface (`linux/i2c-dev.h`).
use super::{SmbusRead, SmbusTarget, SmbusWrite};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::path::Path;

const I2C_SLAVE: u16 = 0x0703;
const I2C_SLAVE_FORCE: u16 = 0x0706;
const I2C_SMBUS: u16 = 0x0720;

const I2C_SMBUS_WRITE: u8 = 0;
const I2C_SMBUS_READ: u8 = 1;

const I2C_SMBUS_BYTE: u32 = 1;
const I2C_SMBUS_BYTE_DATA: u32 = 2;
const I2C_SMBUS_WORD_DATA: u32 = 3;

const I2C_SMBUS_BLOCK_MAX: usize = 32;

#[repr(C)]
union SmbusData {
    byte: u8,
    word: u16,
    block: [u8; I2C_SMBUS_BLOCK_MAX + 2],
}

#[repr(C)]
struct SmbusIoctlData {
    read_write: u8,
    command: u8,
    size: u32,
    data: *mut SmbusData,
}

nix::ioctl_write_int_bad!(i2c_set_slave, I2C_SLAVE);
nix::ioctl_write_int_bad!(i2c_set_slave_force, I2C_SLAVE_FORCE);
nix::ioctl_write_ptr_bad!(i2c_smbus, I2C_SMBUS, SmbusIoctlData);

fn open(device: &Path, target: SmbusTarget) -> io::Result<File> {
    let file = OpenOptions::new().read(true).write(true).open(device)?;
    let fd = file.as_raw_fd();
    // SAFETY: `fd` is an open i2c-dev node for the lifetime of `file`.
    unsafe {
        if target.force {
            i2c_set_slave_force(fd, target.addr.into())?;
        } else {
            i2c_set_slave(fd, target.addr.into())?;
        }
    }
    Ok(file)
}

fn transfer(
    file: &File,
    read_write: u8,
    command: u8,
    size: u32,
    data: Option<&mut SmbusData>,
) -> io::Result<()> {
    let args = SmbusIoctlData {
        read_write,
        command,
        size,
        data: data.map_or(std::ptr::null_mut(), |d| d as *mut SmbusData),
    };
    // SAFETY: `args` and the buffer it points to outlive the call, and the
    // buffer is large enough for every transfer size the kernel accepts.
    unsafe { i2c_smbus(file.as_raw_fd(), &args) }?;
    Ok(())
}

pub fn read(device: &Path, target: SmbusTarget, op: SmbusRead) -> io::Result<u16> {
    let file = open(device, target)?;
    let mut data = SmbusData {
        block: [0; I2C_SMBUS_BLOCK_MAX + 2],
    };

    let (command, size) = match op {
        SmbusRead::Byte => (0, I2C_SMBUS_BYTE),
        SmbusRead::ByteData(reg) => (reg, I2C_SMBUS_BYTE_DATA),
        SmbusRead::WordData(reg) => (reg, I2C_SMBUS_WORD_DATA),
    };
    transfer(&file, I2C_SMBUS_READ, command, size, Some(&mut data))?;

    // SAFETY: the kernel filled the member that matches `size`
    let value = unsafe {
        if size == I2C_SMBUS_WORD_DATA {
            data.word
        } else {
            data.byte.into()
        }
    };
    Ok(value)
}

pub fn write(device: &Path, target: SmbusTarget, op: SmbusWrite) -> io::Result<()> {
    let file = open(device, target)?;

    match op {
        SmbusWrite::Byte(value) => transfer(&file, I2C_SMBUS_WRITE, value, I2C_SMBUS_BYTE, None),
        SmbusWrite::ByteData(reg, value) => {
            let mut data = SmbusData { byte: value };
            transfer(
                &file,
                I2C_SMBUS_WRITE,
                reg,
                I2C_SMBUS_BYTE_DATA,
                Some(&mut data),
            )
        }
        SmbusWrite::WordData(reg, value) => {
            let mut data = SmbusData { word: value };
            transfer(
                &file,
                I2C_SMBUS_WRITE,
                reg,
                I2C_SMBUS_WORD_DATA,
                Some(&mut data),
            )
        }
    }
}
