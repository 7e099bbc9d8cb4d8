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

pub const PAGE_SHIFT: usize = 12;

/// Size of a page frame, of a swap slot and of a block on the backing device
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Page frame number
pub type Pfn = usize;

/// Physical address of a byte in memory
pub type PhysAddr = u64;

#[inline]
pub const fn pfn_to_phys(pfn: Pfn) -> PhysAddr {
    (pfn as PhysAddr) << PAGE_SHIFT
}

#[inline]
pub const fn phys_to_pfn(addr: PhysAddr) -> Pfn {
    (addr >> PAGE_SHIFT) as Pfn
}

/// Smallest `k` such that `2^k >= pages`
#[inline]
pub const fn order_for_pages(pages: usize) -> u32 {
    if pages <= 1 {
        0
    } else {
        pages.next_power_of_two().trailing_zeros()
    }
}
