/*
 *  Copyright (C) 2025  Markus Elias Gerber
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  You should have received a copy of the GNU General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use core::mem::size_of;

use log::error;
use memoffset::offset_of;
use static_assertions::const_assert;

use crate::{
    config::SystemIdentity,
    error::IncompatibleImage,
    modules::swap::SwapEntry,
    pagedir::{get_link, set_link, LINK_OFFSET},
    PhysAddr, PAGE_SIZE,
};

pub const MACHINE_LEN: usize = 8;
pub const VERSION_LEN: usize = 20;

/// First slot of the image chain, describes the system that wrote the image.
///
/// Stored little endian with the field offsets of this `repr(C)` layout,
/// followed by the link to the last directory slot at the end of the page.
#[repr(C)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuspendHeader {
    pub version_code: u32,
    pub num_cpus: u32,
    pub num_physpages: u64,
    pub page_size: u64,
    pub machine: [u8; MACHINE_LEN],
    pub version: [u8; VERSION_LEN],
    pub num_pbes: u64,

    /// Address of the page directory at the time the image was written
    pub suspend_pagedir: u64,
}

const_assert!(size_of::<SuspendHeader>() <= LINK_OFFSET);

/// Copies `value` into a zero padded fixed size field, cutting it off if it is too long
fn fixed_str<const N: usize>(value: &str) -> [u8; N] {
    let mut res = [0u8; N];
    let len = value.len().min(N);
    res[..len].copy_from_slice(&value.as_bytes()[..len]);
    res
}

macro_rules! put_field {
    ($page: expr, $header: expr, $field: ident) => {{
        let bytes = $header.$field.to_le_bytes();
        let offset = offset_of!(SuspendHeader, $field);
        $page[offset..offset + bytes.len()].copy_from_slice(&bytes);
    }};
}

macro_rules! get_field {
    ($page: expr, $ty: ty, $field: ident) => {{
        let offset = offset_of!(SuspendHeader, $field);
        let mut bytes = [0u8; size_of::<$ty>()];
        bytes.copy_from_slice(&$page[offset..offset + size_of::<$ty>()]);
        <$ty>::from_le_bytes(bytes)
    }};
}

impl SuspendHeader {
    pub fn fill(
        identity: &SystemIdentity,
        num_physpages: usize,
        num_pbes: usize,
        suspend_pagedir: PhysAddr,
    ) -> Self {
        Self {
            version_code: identity.version_code,
            num_cpus: identity.num_cpus,
            num_physpages: num_physpages as u64,
            page_size: PAGE_SIZE as u64,
            machine: fixed_str(&identity.machine),
            version: fixed_str(&identity.version),
            num_pbes: num_pbes as u64,
            suspend_pagedir,
        }
    }

    /// Encodes this header into `page`, `link` points to the previously written slot
    pub fn encode(&self, link: SwapEntry, page: &mut [u8]) {
        debug_assert_eq!(page.len(), PAGE_SIZE);
        page.fill(0);

        put_field!(page, self, version_code);
        put_field!(page, self, num_cpus);
        put_field!(page, self, num_physpages);
        put_field!(page, self, page_size);
        put_field!(page, self, num_pbes);
        put_field!(page, self, suspend_pagedir);

        let machine = offset_of!(SuspendHeader, machine);
        page[machine..machine + MACHINE_LEN].copy_from_slice(&self.machine);
        let version = offset_of!(SuspendHeader, version);
        page[version..version + VERSION_LEN].copy_from_slice(&self.version);

        set_link(page, link);
    }

    /// Decodes a header slot, returns the header and its link
    pub fn decode(page: &[u8]) -> (Self, SwapEntry) {
        debug_assert_eq!(page.len(), PAGE_SIZE);

        let mut machine = [0u8; MACHINE_LEN];
        let offset = offset_of!(SuspendHeader, machine);
        machine.copy_from_slice(&page[offset..offset + MACHINE_LEN]);

        let mut version = [0u8; VERSION_LEN];
        let offset = offset_of!(SuspendHeader, version);
        version.copy_from_slice(&page[offset..offset + VERSION_LEN]);

        let header = Self {
            version_code: get_field!(page, u32, version_code),
            num_cpus: get_field!(page, u32, num_cpus),
            num_physpages: get_field!(page, u64, num_physpages),
            page_size: get_field!(page, u64, page_size),
            machine,
            version,
            num_pbes: get_field!(page, u64, num_pbes),
            suspend_pagedir: get_field!(page, u64, suspend_pagedir),
        };

        (header, get_link(page))
    }

    /// Checks every field against the running system, the first mismatch is reported
    pub fn sanity_check(
        &self,
        identity: &SystemIdentity,
        num_physpages: usize,
    ) -> Result<(), IncompatibleImage> {
        let res = if self.version_code != identity.version_code {
            Err(IncompatibleImage::KernelVersion)
        } else if self.num_physpages != num_physpages as u64 {
            Err(IncompatibleImage::MemorySize)
        } else if self.machine != fixed_str::<MACHINE_LEN>(&identity.machine) {
            Err(IncompatibleImage::MachineType)
        } else if self.version != fixed_str::<VERSION_LEN>(&identity.version) {
            Err(IncompatibleImage::Version)
        } else if self.num_cpus != identity.num_cpus {
            Err(IncompatibleImage::CpuCount)
        } else if self.page_size != PAGE_SIZE as u64 {
            Err(IncompatibleImage::PageSize)
        } else {
            Ok(())
        };

        if let Err(reason) = res {
            error!("Resume: {}", reason);
        }
        res
    }
}
