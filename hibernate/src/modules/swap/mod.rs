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

use core::fmt;

use log::{debug, warn};

use super::block_device::BlockDeviceModule;
use crate::util::bit_array::BitArray;

const SWAP_TYPE_SHIFT: u32 = 56;
const SWAP_OFFSET_MASK: u64 = (1 << SWAP_TYPE_SHIFT) - 1;

/// Identifies a slot on one of the swap devices (`swap_type << 56 | offset`).
///
/// Offset 0 of every device holds the swap signature and is never handed out,
/// so the raw value 0 can be used as "no entry".
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct SwapEntry(u64);

impl SwapEntry {
    pub const NONE: SwapEntry = SwapEntry(0);

    pub const fn new(swap_type: usize, offset: usize) -> Self {
        Self(((swap_type as u64) << SWAP_TYPE_SHIFT) | (offset as u64 & SWAP_OFFSET_MASK))
    }

    pub const fn swap_type(&self) -> usize {
        (self.0 >> SWAP_TYPE_SHIFT) as usize
    }

    pub const fn offset(&self) -> usize {
        (self.0 & SWAP_OFFSET_MASK) as usize
    }

    pub const fn is_none(&self) -> bool {
        self.0 == 0
    }

    pub const fn to_raw(self) -> u64 {
        self.0
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for SwapEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "SwapEntry(none)")
        } else {
            write!(f, "SwapEntry({}:{})", self.swap_type(), self.offset())
        }
    }
}

/// What a swap device is used for while an image is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapFileUsage {
    Unused,
    /// This is the device the image is written to
    Suspend,
    /// Other active devices, locked while the image is written
    Ignored,
}

struct SwapDevice<B: BlockDeviceModule> {
    device: B,

    /// one bit per slot, set if the slot is in use
    slot_map: BitArray,

    /// cached number of free slots
    free: usize,

    /// disabled devices do not hand out slots
    enabled: bool,

    usage: SwapFileUsage,
}

/// All active swap devices, indexed by their swap type.
///
/// Slots are handed out from the enabled devices in the order they were added.
pub struct SwapArea<B: BlockDeviceModule> {
    devices: Vec<SwapDevice<B>>,
}

impl<B: BlockDeviceModule> Default for SwapArea<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: BlockDeviceModule> SwapArea<B> {
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
        }
    }

    /// Activates `device` and returns its swap type.
    ///
    /// All slots except the signature slot start out free.
    pub fn swapon(&mut self, device: B) -> usize {
        let blocks = device.block_count();
        assert!(blocks >= 1, "a swap device needs at least its signature block");

        let mut slot_map = BitArray::new(blocks);
        slot_map.set(true, 0);

        self.devices.push(SwapDevice {
            device,
            slot_map,
            free: blocks - 1,
            enabled: true,
            usage: SwapFileUsage::Unused,
        });

        let swap_type = self.devices.len() - 1;
        debug!("swapon: type {} with {} slots", swap_type, blocks - 1);
        swap_type
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn device(&self, swap_type: usize) -> Option<&B> {
        self.devices.get(swap_type).map(|d| &d.device)
    }

    pub fn device_mut(&mut self, swap_type: usize) -> Option<&mut B> {
        self.devices.get_mut(swap_type).map(|d| &mut d.device)
    }

    /// Returns all devices, consuming this area (e.g. when the machine powers off)
    pub fn into_devices(self) -> Vec<B> {
        self.devices.into_iter().map(|d| d.device).collect()
    }

    pub fn free_slots(&self, swap_type: usize) -> usize {
        self.devices.get(swap_type).map_or(0, |d| d.free)
    }

    /// Free slots over all enabled devices
    pub fn nr_swap_pages(&self) -> usize {
        self.devices.iter().filter(|d| d.enabled).map(|d| d.free).sum()
    }

    pub fn is_enabled(&self, swap_type: usize) -> bool {
        self.devices.get(swap_type).map_or(false, |d| d.enabled)
    }

    pub fn usage(&self, swap_type: usize) -> Option<SwapFileUsage> {
        self.devices.get(swap_type).map(|d| d.usage)
    }

    /// Allocates a free slot from the first enabled device that has one left.
    ///
    /// Returns `SwapEntry::NONE` if all enabled devices are full.
    pub fn get_swap_page(&mut self) -> SwapEntry {
        for (swap_type, device) in self.devices.iter_mut().enumerate() {
            if !device.enabled || device.free == 0 {
                continue;
            }

            if let Some(offset) = device.slot_map.first_unset_from(1) {
                device.slot_map.set(true, offset);
                device.free -= 1;
                return SwapEntry::new(swap_type, offset);
            }
        }

        SwapEntry::NONE
    }

    /// Releases a slot obtained from `get_swap_page`
    pub fn swap_free(&mut self, entry: SwapEntry) {
        let device = match self.devices.get_mut(entry.swap_type()) {
            Some(device) => device,
            None => {
                warn!("swap_free: bad swap type of {:?}", entry);
                return;
            }
        };

        let offset = entry.offset();
        if offset == 0 || offset >= device.slot_map.len() || !device.slot_map.is_set(offset) {
            warn!("swap_free: {:?} is not in use", entry);
            return;
        }

        device.slot_map.set(false, offset);
        device.free += 1;
    }

    pub fn read_slot(&mut self, entry: SwapEntry, dest: &mut [u8]) -> Result<(), ()> {
        let device = self.devices.get_mut(entry.swap_type()).ok_or(())?;
        if entry.offset() >= device.slot_map.len() {
            return Err(());
        }
        device.device.read_block(entry.offset(), dest)
    }

    pub fn write_slot(&mut self, entry: SwapEntry, src: &[u8]) -> Result<(), ()> {
        let device = self.devices.get_mut(entry.swap_type()).ok_or(())?;
        if entry.offset() >= device.slot_map.len() {
            return Err(());
        }
        device.device.write_block(entry.offset(), src)
    }

    /// Decides which device receives the image and which ones are ignored.
    ///
    /// With `resume_device` set, only that device is used. Otherwise the first device is used.
    /// Returns the swap type of the suspend device.
    pub fn mark_suspend_device(&mut self, resume_device: Option<usize>) -> Option<usize> {
        let mut root_swap = None;
        if resume_device.is_none() {
            warn!("resume device should be configured to set suspend device");
        }

        for (swap_type, device) in self.devices.iter_mut().enumerate() {
            let is_suspend = match resume_device {
                Some(resume) => resume == swap_type,
                None => root_swap.is_none(),
            };

            if is_suspend {
                device.usage = SwapFileUsage::Suspend;
                root_swap = Some(swap_type);
            } else {
                device.usage = SwapFileUsage::Ignored;
            }
        }

        root_swap
    }

    /// Toggles all ignored devices between enabled and disabled.
    ///
    /// Called once before the image is written (so slots can only come from the suspend device)
    /// and once afterwards.
    pub fn lock_swapdevices(&mut self) {
        for device in self.devices.iter_mut() {
            if device.usage == SwapFileUsage::Ignored {
                device.enabled = !device.enabled;
            }
        }
    }
}
