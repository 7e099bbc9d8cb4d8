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

// code modified from: https://github.com/rcore-os/buddy_system_allocator
// modifications: manages page frame numbers instead of addresses, sorted free lists,
// lookup of free blocks by their first frame

use log::trace;

use core::array;
use core::cmp::min;
use std::collections::BTreeSet;

use crate::Pfn;

/// Buddy allocator for page frames with blocks of up to `2^(ORDER - 1)` frames
pub struct FrameBuddyAllocator<const ORDER: usize> {
    /// buddy system with max order of `ORDER`, every list is sorted by frame number
    free_list: [BTreeSet<Pfn>; ORDER],

    /// number of free frames
    free: usize,
}

impl<const ORDER: usize> FrameBuddyAllocator<ORDER> {
    pub fn new() -> Self {
        Self {
            free_list: array::from_fn(|_| BTreeSet::new()),
            free: 0,
        }
    }

    /// Adds the frames `[start, end)` to the allocator
    pub fn add_frames(&mut self, start: Pfn, end: Pfn) {
        assert!(start <= end);

        let mut current_start = start;
        while current_start < end {
            let remaining = prev_power_of_two(end - current_start);
            let size = if current_start == 0 {
                remaining
            } else {
                let lowbit = current_start & (!current_start + 1);
                min(lowbit, remaining)
            };
            let size = min(size, 1 << (ORDER - 1));

            self.free_list[size.trailing_zeros() as usize].insert(current_start);
            self.free += size;
            current_start += size;
        }
    }

    /// Allocates `2^order` frames and returns the first frame
    pub fn alloc(&mut self, order: u32) -> Result<Pfn, ()> {
        let class = order as usize;
        if class >= ORDER {
            return Err(());
        }

        for i in class..self.free_list.len() {
            // Find the first non-empty size class
            if !self.free_list[i].is_empty() {
                // Split buffers
                trace!("Allocate: Have to split {} bucket(s)", (class + 1..i + 1).len());
                for j in (class + 1..i + 1).rev() {
                    if let Some(block) = self.free_list[j].pop_first() {
                        self.free_list[j - 1].insert(block + (1 << (j - 1)));
                        self.free_list[j - 1].insert(block);
                    } else {
                        return Err(());
                    }
                }

                let block = self.free_list[class].pop_first().ok_or(())?;
                self.free -= 1 << class;
                return Ok(block);
            }
        }
        Err(())
    }

    /// Frees `2^order` frames starting at `pfn`
    pub fn dealloc(&mut self, pfn: Pfn, order: u32) {
        let class = order as usize;
        debug_assert!(class < ORDER);
        debug_assert!(
            self.free_block_order(pfn).is_none(),
            "double free of frame {:#x}",
            pfn
        );

        // Put back into free list
        self.free_list[class].insert(pfn);
        self.free += 1 << class;

        // Merge free buddy lists
        let mut current = pfn;
        let mut current_class = class;

        while current_class < self.free_list.len() - 1 {
            let buddy = current ^ (1 << current_class);

            // Free buddy found
            if self.free_list[current_class].remove(&buddy) {
                self.free_list[current_class].remove(&current);
                current = min(current, buddy);
                current_class += 1;
                self.free_list[current_class].insert(current);
            } else {
                break;
            }
        }
    }

    /// Returns the order of the free block starting at `pfn`, if any
    pub fn free_block_order(&self, pfn: Pfn) -> Option<u32> {
        self.free_list
            .iter()
            .position(|list| list.contains(&pfn))
            .map(|order| order as u32)
    }

    /// Is `pfn` part of any free block?
    pub fn is_free(&self, pfn: Pfn) -> bool {
        (0..ORDER).any(|order| {
            let head = pfn & !((1 << order) - 1);
            self.free_list[order].contains(&head)
        })
    }

    pub fn nr_free(&self) -> usize {
        self.free
    }
}

impl<const ORDER: usize> Default for FrameBuddyAllocator<ORDER> {
    fn default() -> Self {
        Self::new()
    }
}

fn prev_power_of_two(num: usize) -> usize {
    1 << (usize::BITS as usize - num.leading_zeros() as usize - 1)
}

#[cfg(test)]
mod test {
    use super::FrameBuddyAllocator;
    use crate::Pfn;

    #[derive(Debug, Clone, Copy)]
    struct AllocatedRegion {
        pfn: Pfn,
        order: u32,
    }

    fn check_no_overlap(regions: &Vec<AllocatedRegion>) {
        for (i, region) in regions.iter().enumerate() {
            for (j, cmp) in regions.iter().enumerate() {
                if i == j {
                    continue;
                }

                assert!(
                    (cmp.pfn + (1 << cmp.order) <= region.pfn)
                        || (region.pfn + (1 << region.order) <= cmp.pfn),
                    "allocated regions should not overlap"
                )
            }
        }
    }

    #[test]
    fn test_frame_buddy_simple() {
        let mut allocator = FrameBuddyAllocator::<8>::new();
        allocator.add_frames(0, 64);
        assert_eq!(allocator.nr_free(), 64);
        assert_eq!(allocator.free_block_order(0), Some(6));

        let mut regions = vec![];
        for order in [0, 0, 2, 1, 3, 0] {
            let pfn = allocator.alloc(order).expect("should have space left");
            assert_eq!(pfn % (1 << order), 0, "blocks should be aligned");
            regions.push(AllocatedRegion { pfn, order });
            check_no_overlap(&regions);
        }
        assert_eq!(allocator.nr_free(), 64 - (1 + 1 + 4 + 2 + 8 + 1));

        for region in regions.iter() {
            assert!(!allocator.is_free(region.pfn));
        }

        for region in regions.drain(..) {
            allocator.dealloc(region.pfn, region.order);
        }

        // everything merged back together
        assert_eq!(allocator.nr_free(), 64);
        assert_eq!(allocator.free_block_order(0), Some(6));
        assert_eq!(allocator.alloc(6), Ok(0));
        allocator.alloc(0).expect_err("should have no space left");
    }

    #[test]
    fn test_frame_buddy_unaligned_range() {
        let mut allocator = FrameBuddyAllocator::<4>::new();
        allocator.add_frames(3, 21);
        assert_eq!(allocator.nr_free(), 18);

        // blocks never leave the range and never exceed the max order
        assert_eq!(allocator.free_block_order(3), Some(0));
        assert_eq!(allocator.free_block_order(4), Some(2));
        assert_eq!(allocator.free_block_order(8), Some(3));
        assert_eq!(allocator.free_block_order(16), Some(2));
        assert_eq!(allocator.free_block_order(20), Some(0));
        assert!(allocator.is_free(3) && allocator.is_free(20));
        assert!(!allocator.is_free(2) && !allocator.is_free(21));

        let mut total = 0;
        while let Ok(pfn) = allocator.alloc(0) {
            assert!((3..21).contains(&pfn));
            total += 1;
        }
        assert_eq!(total, 18);
        assert_eq!(allocator.nr_free(), 0);
    }

    #[test]
    fn test_frame_buddy_lowest_first() {
        let mut allocator = FrameBuddyAllocator::<6>::new();
        allocator.add_frames(0, 32);

        assert_eq!(allocator.alloc(0), Ok(0));
        assert_eq!(allocator.alloc(0), Ok(1));
        assert_eq!(allocator.alloc(1), Ok(2));

        allocator.dealloc(1, 0);
        assert_eq!(allocator.free_block_order(1), Some(0));
        assert_eq!(allocator.alloc(0), Ok(1));
    }
}
