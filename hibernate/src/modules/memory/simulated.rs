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

use core::ops::Range;

use super::{FrameBuddyAllocator, FrameKind, PhysicalMemoryModule};
use crate::{util::bit_array::BitArray, Pfn, PAGE_SIZE};

/// Largest block handed out by the simulated page allocator is `2^(MAX_ORDER - 1)` frames
const MAX_ORDER: usize = 11;

/// Physical memory kept inside a host buffer.
///
/// Frames `[0, reserved_end)` hold the kernel and are never allocated,
/// all other frames are managed by a buddy allocator.
pub struct SimulatedMemory {
    frames: Vec<u8>,
    nosave: BitArray,
    reserved_end: Pfn,
    nosave_section: Range<Pfn>,
    allocator: FrameBuddyAllocator<MAX_ORDER>,
}

impl SimulatedMemory {
    /// Creates a machine with `num_pages` frames.
    ///
    /// `nosave_section` has to lie inside the reserved frames `[0, reserved_end)`.
    pub fn new(num_pages: usize, reserved_end: Pfn, nosave_section: Range<Pfn>) -> Self {
        assert!(reserved_end <= num_pages);
        assert!(
            nosave_section.is_empty() || nosave_section.end <= reserved_end,
            "nosave section has to be reserved"
        );

        let mut allocator = FrameBuddyAllocator::new();
        allocator.add_frames(reserved_end, num_pages);

        Self {
            frames: vec![0u8; num_pages * PAGE_SIZE],
            nosave: BitArray::new(num_pages),
            reserved_end,
            nosave_section,
            allocator,
        }
    }

    /// Raw view of the content of `pfn`
    pub fn frame(&self, pfn: Pfn) -> &[u8] {
        &self.frames[pfn * PAGE_SIZE..(pfn + 1) * PAGE_SIZE]
    }

    pub fn frame_mut(&mut self, pfn: Pfn) -> &mut [u8] {
        &mut self.frames[pfn * PAGE_SIZE..(pfn + 1) * PAGE_SIZE]
    }

    pub fn reserved_end(&self) -> Pfn {
        self.reserved_end
    }

    /// Number of frames that currently carry the nosave flag
    pub fn nosave_count(&self) -> usize {
        self.nosave.count_set()
    }
}

impl PhysicalMemoryModule for SimulatedMemory {
    fn num_physpages(&self) -> usize {
        self.nosave.len()
    }

    fn frame_kind(&self, pfn: Pfn) -> FrameKind {
        if pfn < self.reserved_end {
            FrameKind::Reserved
        } else if self.allocator.is_free(pfn) {
            FrameKind::Free
        } else {
            FrameKind::InUse
        }
    }

    fn is_nosave(&self, pfn: Pfn) -> bool {
        self.nosave.is_set(pfn)
    }

    fn set_nosave(&mut self, pfn: Pfn, value: bool) {
        self.nosave.set(value, pfn)
    }

    fn in_nosave_section(&self, pfn: Pfn) -> bool {
        self.nosave_section.contains(&pfn)
    }

    fn free_region_len(&self, pfn: Pfn) -> usize {
        self.allocator
            .free_block_order(pfn)
            .map_or(0, |order| 1 << order)
    }

    fn nr_free_pages(&self) -> usize {
        self.allocator.nr_free()
    }

    fn alloc_pages(&mut self, order: u32) -> Result<Pfn, ()> {
        self.allocator.alloc(order)
    }

    fn free_pages(&mut self, pfn: Pfn, order: u32) {
        debug_assert!(pfn >= self.reserved_end, "freeing reserved frame {:#x}", pfn);
        self.allocator.dealloc(pfn, order)
    }

    fn read_frame(&self, pfn: Pfn, dest: &mut [u8]) {
        dest.copy_from_slice(self.frame(pfn));
    }

    fn write_frame(&mut self, pfn: Pfn, src: &[u8]) {
        self.frame_mut(pfn).copy_from_slice(src);
    }

    fn copy_frame(&mut self, from: Pfn, to: Pfn) {
        self.frames
            .copy_within(from * PAGE_SIZE..(from + 1) * PAGE_SIZE, to * PAGE_SIZE);
    }
}

#[cfg(test)]
mod test {
    use super::SimulatedMemory;
    use crate::{
        modules::memory::{FrameKind, PhysicalMemoryModule},
        PAGE_SIZE,
    };

    #[test]
    fn test_frame_classification() {
        let mut mem = SimulatedMemory::new(64, 8, 2..4);
        assert_eq!(mem.num_physpages(), 64);
        assert_eq!(mem.nr_free_pages(), 56);

        assert_eq!(mem.frame_kind(0), FrameKind::Reserved);
        assert_eq!(mem.frame_kind(7), FrameKind::Reserved);
        assert_eq!(mem.frame_kind(8), FrameKind::Free);
        assert!(mem.in_nosave_section(2) && mem.in_nosave_section(3));
        assert!(!mem.in_nosave_section(4));

        let pfn = mem.alloc_pages(0).unwrap();
        assert_eq!(pfn, 8);
        assert_eq!(mem.frame_kind(pfn), FrameKind::InUse);
        assert_eq!(mem.free_region_len(pfn), 0);
        assert_eq!(mem.free_region_len(9), 1);
        assert_eq!(mem.nr_free_pages(), 55);

        mem.free_pages(pfn, 0);
        assert_eq!(mem.frame_kind(pfn), FrameKind::Free);
        assert_eq!(mem.free_region_len(8), 8);
    }

    #[test]
    fn test_frame_access() {
        let mut mem = SimulatedMemory::new(16, 0, 0..0);
        mem.write_frame(3, &[5u8; PAGE_SIZE]);
        mem.copy_frame(3, 4);

        let mut page = [0u8; PAGE_SIZE];
        mem.read_frame(4, &mut page);
        assert_eq!(page, [5u8; PAGE_SIZE]);

        mem.zero_frame(3);
        assert!(mem.frame(3).iter().all(|x| *x == 0));

        mem.set_nosave(4, true);
        assert!(mem.is_nosave(4));
        assert_eq!(mem.nosave_count(), 1);
        mem.set_nosave(4, false);
        assert_eq!(mem.nosave_count(), 0);
    }
}
