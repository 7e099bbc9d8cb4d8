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

mod buddy;
mod simulated;

pub use buddy::FrameBuddyAllocator;
pub use simulated::SimulatedMemory;

use crate::{Pfn, PAGE_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Kernel code and data, never handed out by the page allocator
    Reserved,
    Free,
    InUse,
}

/// Access to physical memory: page frames, their flags and the page allocator.
///
/// All frame accesses take exactly one page (`PAGE_SIZE` bytes).
pub trait PhysicalMemoryModule {
    /// Number of page frames. Valid frame numbers are `[0, num_physpages())`.
    fn num_physpages(&self) -> usize;

    fn frame_kind(&self, pfn: Pfn) -> FrameKind;

    /// Is this frame excluded from any snapshot?
    fn is_nosave(&self, pfn: Pfn) -> bool;

    fn set_nosave(&mut self, pfn: Pfn, value: bool);

    /// Does this (reserved) frame belong to the data section that is never saved?
    fn in_nosave_section(&self, pfn: Pfn) -> bool;

    /// If `pfn` is the first frame of a free block, returns the number of frames in that block.
    /// Returns 0 otherwise.
    fn free_region_len(&self, pfn: Pfn) -> usize;

    fn nr_free_pages(&self) -> usize;

    /// Allocates `2^order` contiguous frames and returns the first one
    fn alloc_pages(&mut self, order: u32) -> Result<Pfn, ()>;

    /// Frees `2^order` frames previously returned by `alloc_pages`
    fn free_pages(&mut self, pfn: Pfn, order: u32);

    fn read_frame(&self, pfn: Pfn, dest: &mut [u8]);

    fn write_frame(&mut self, pfn: Pfn, src: &[u8]);

    /// Moves cached free pages back to the allocator so they are seen as free
    fn drain_local_pages(&mut self) {}

    fn copy_frame(&mut self, from: Pfn, to: Pfn) {
        let mut page = [0u8; PAGE_SIZE];
        self.read_frame(from, &mut page);
        self.write_frame(to, &page);
    }

    fn zero_frame(&mut self, pfn: Pfn) {
        self.write_frame(pfn, &[0u8; PAGE_SIZE]);
    }

    fn get_zeroed_page(&mut self) -> Result<Pfn, ()> {
        let pfn = self.alloc_pages(0)?;
        self.zero_frame(pfn);
        Ok(pfn)
    }
}
