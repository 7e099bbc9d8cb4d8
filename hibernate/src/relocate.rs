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

//! Finds memory for a loaded image that none of its pages will be copied back into.

use log::{debug, trace};

use crate::{
    error::RelocationFailure,
    modules::memory::PhysicalMemoryModule,
    pagedir::{Pbe, PageDir},
    pfn_to_phys, phys_to_pfn, Pfn, PhysAddr, PAGE_SIZE,
};

/// Sorted `orig_address` values of a directory
pub struct OrigAddressSet {
    addresses: Vec<PhysAddr>,
}

impl OrigAddressSet {
    /// Builds the set, returns the index of the first duplicate address on failure
    pub fn new(pbes: &[Pbe]) -> Result<Self, usize> {
        let mut indexed: Vec<(PhysAddr, usize)> = pbes
            .iter()
            .enumerate()
            .map(|(i, pbe)| (pbe.orig_address, i))
            .collect();
        indexed.sort_unstable();

        if let Some(window) = indexed.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(window[0].1.max(window[1].1));
        }

        Ok(Self {
            addresses: indexed.into_iter().map(|(addr, _)| addr).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn contains(&self, addr: PhysAddr) -> bool {
        self.addresses.binary_search(&addr).is_ok()
    }

    /// Does any original address lie inside the `2^order` pages starting at `addr`?
    pub fn does_collide_order(&self, addr: PhysAddr, order: u32) -> bool {
        let end = addr + ((PAGE_SIZE as u64) << order);
        let first = self.addresses.partition_point(|orig| *orig < addr);
        self.addresses.get(first).map_or(false, |orig| *orig < end)
    }
}

/// Allocates zeroed blocks of `order` until one does not collide.
///
/// Rejected blocks are kept allocated while searching, so the allocator does not hand them
/// out again, and are freed once the search ends.
fn alloc_collision_free<M: PhysicalMemoryModule>(
    memory: &mut M,
    set: &OrigAddressSet,
    order: u32,
    max_attempts: usize,
    rejected: &mut Vec<Pfn>,
) -> Result<Pfn, usize> {
    let mut attempts = 0;
    loop {
        let pfn = match memory.alloc_pages(order) {
            Ok(pfn) => pfn,
            Err(()) => return Err(attempts),
        };
        for i in 0..(1 << order) {
            memory.zero_frame(pfn + i);
        }

        if !set.does_collide_order(pfn_to_phys(pfn), order) {
            return Ok(pfn);
        }

        trace!("rejecting {:#x} (order {})", pfn, order);
        rejected.push(pfn);
        attempts += 1;
        if attempts >= max_attempts {
            memory.free_pages(pfn, order);
            rejected.pop();
            return Err(attempts);
        }
    }
}

fn free_rejected<M: PhysicalMemoryModule>(memory: &mut M, rejected: Vec<Pfn>, order: u32) {
    for pfn in rejected {
        memory.free_pages(pfn, order);
    }
}

/// Moves the directory block if it overlaps an original address.
///
/// Returns the number of rejected candidates.
pub fn relocate_pagedir<M: PhysicalMemoryModule>(
    memory: &mut M,
    pagedir: &mut PageDir,
    set: &OrigAddressSet,
    max_attempts: usize,
) -> Result<usize, RelocationFailure> {
    let order = pagedir.order();
    if !set.does_collide_order(pagedir.address(), order) {
        return Ok(0);
    }

    debug!("Relocating pagedir at {:#x}", pagedir.address());
    let mut rejected = Vec::new();
    let res = alloc_collision_free(memory, set, order, max_attempts, &mut rejected);
    let rejects = rejected.len();
    free_rejected(memory, rejected, order);

    let new_base = match res {
        Ok(pfn) => pfn,
        Err(attempts) if attempts < max_attempts => return Err(RelocationFailure::OutOfMemory),
        Err(attempts) => return Err(RelocationFailure::Directory { attempts }),
    };

    let old_base = pagedir.base();
    for i in 0..(1 << order) {
        memory.copy_frame(old_base + i, new_base + i);
    }
    memory.free_pages(old_base, order);
    pagedir.set_base(new_base);

    debug!("Relocated pagedir to {:#x} ({} rejects)", pagedir.address(), rejects);
    Ok(rejects)
}

/// Assigns every pbe a zeroed buffer page that is not an original address.
///
/// Returns the number of rejected pages. On failure the buffers assigned so far stay in the
/// directory and are released with it.
pub fn check_pagedir<M: PhysicalMemoryModule>(
    memory: &mut M,
    pagedir: &mut PageDir,
    set: &OrigAddressSet,
    max_attempts: usize,
) -> Result<usize, RelocationFailure> {
    let mut rejected = Vec::new();
    let mut res = Ok(());

    for (index, pbe) in pagedir.pbes_mut().iter_mut().enumerate() {
        match alloc_collision_free(memory, set, 0, max_attempts, &mut rejected) {
            Ok(pfn) => pbe.address = pfn_to_phys(pfn),
            Err(attempts) => {
                res = if attempts < max_attempts {
                    Err(RelocationFailure::OutOfMemory)
                } else {
                    Err(RelocationFailure::Buffer { index, attempts })
                };
                break;
            }
        }
    }

    let rejects = rejected.len();
    free_rejected(memory, rejected, 0);
    res.map(|_| rejects)
}

/// Verifies that no buffer lies on an original address
pub fn is_collision_free(pbes: &[Pbe], set: &OrigAddressSet) -> bool {
    pbes.iter()
        .all(|pbe| pbe.address != 0 && !set.contains(pbe.address))
}

/// Frame of the pbe's buffer
pub(crate) fn buffer_pfn(pbe: &Pbe) -> Pfn {
    phys_to_pfn(pbe.address)
}
