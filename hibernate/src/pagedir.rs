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

//! The page directory: one [`Pbe`] per saved page, stored in its own block of page frames.
//!
//! Directory pages use the same layout in memory and on disk:
//!
//! ```text
//! [ pbe 0 | pbe 1 | ... | pbe 169 | unused | link (8 bytes) ]
//! ```
//!
//! The `link` trailer is only filled in while the page is written to swap,
//! pbe records never reach into it.

use core::mem::size_of;

use log::{trace, warn};
use static_assertions::const_assert;

use crate::{
    modules::{memory::PhysicalMemoryModule, swap::SwapEntry},
    order_for_pages, pfn_to_phys, phys_to_pfn,
    util::ceil_div,
    Pfn, PhysAddr, PAGE_SIZE,
};

/// Size of an encoded pbe record
pub const PBE_SIZE: usize = 3 * size_of::<u64>();

/// Size of the trailer linking image pages together
pub const LINK_SIZE: usize = size_of::<u64>();

/// Offset of the link trailer inside a page
pub const LINK_OFFSET: usize = PAGE_SIZE - LINK_SIZE;

pub const PBES_PER_PAGE: usize = LINK_OFFSET / PBE_SIZE;

const_assert!(PBES_PER_PAGE * PBE_SIZE <= LINK_OFFSET);
const_assert!(PBES_PER_PAGE > 0);

/// Page block entry: where a saved page came from, where its copy is and where it is on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pbe {
    /// Address the content came from and has to be restored to
    pub orig_address: PhysAddr,

    /// Address of the buffer page holding the content right now
    pub address: PhysAddr,

    /// Slot holding the content while the image is on disk
    pub swap_address: SwapEntry,
}

impl Pbe {
    fn encode(&self, dest: &mut [u8]) {
        dest[0..8].copy_from_slice(&self.orig_address.to_le_bytes());
        dest[8..16].copy_from_slice(&self.address.to_le_bytes());
        dest[16..24].copy_from_slice(&self.swap_address.to_raw().to_le_bytes());
    }

    fn decode(src: &[u8]) -> Self {
        let read = |range: core::ops::Range<usize>| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&src[range]);
            u64::from_le_bytes(bytes)
        };

        Self {
            orig_address: read(0..8),
            address: read(8..16),
            swap_address: SwapEntry::from_raw(read(16..24)),
        }
    }
}

/// Reads the link trailer of an image page
pub fn get_link(page: &[u8]) -> SwapEntry {
    let mut bytes = [0u8; LINK_SIZE];
    bytes.copy_from_slice(&page[LINK_OFFSET..PAGE_SIZE]);
    SwapEntry::from_raw(u64::from_le_bytes(bytes))
}

/// Slots referenced by an encoded directory page, unused entries are skipped
pub(crate) fn page_slots(page: &[u8]) -> impl Iterator<Item = SwapEntry> + '_ {
    page[..PBES_PER_PAGE * PBE_SIZE]
        .chunks_exact(PBE_SIZE)
        .map(|chunk| Pbe::decode(chunk).swap_address)
        .filter(|entry| !entry.is_none())
}

/// Sets the link trailer of an image page
pub fn set_link(page: &mut [u8], link: SwapEntry) {
    page[LINK_OFFSET..PAGE_SIZE].copy_from_slice(&link.to_raw().to_le_bytes());
}

/// Number of pages needed to store `nr_pbes` entries (at least one)
pub const fn pagedir_pages(nr_pbes: usize) -> usize {
    if nr_pbes == 0 {
        1
    } else {
        ceil_div(nr_pbes, PBES_PER_PAGE)
    }
}

pub const fn pagedir_order(nr_pbes: usize) -> u32 {
    order_for_pages(pagedir_pages(nr_pbes))
}

pub struct PageDir {
    /// first frame of the `2^order` frames holding this directory
    base: Pfn,
    order: u32,
    pbes: Vec<Pbe>,

    /// false once all frames were handed back
    live: bool,
}

impl PageDir {
    /// Allocates a directory for `nr_pbes` pages including one zeroed buffer page per entry.
    ///
    /// All allocated frames are marked nosave so they never end up in a snapshot themselves.
    /// If any allocation fails, everything allocated so far is released again.
    pub fn create<M: PhysicalMemoryModule>(memory: &mut M, nr_pbes: usize) -> Result<Self, ()> {
        let mut pagedir = Self::alloc_block(memory, nr_pbes)?;
        for i in 0..(1 << pagedir.order) {
            memory.set_nosave(pagedir.base + i, true);
        }

        for i in 0..nr_pbes {
            let pfn = match memory.get_zeroed_page() {
                Ok(pfn) => pfn,
                Err(()) => {
                    warn!("Could only allocate {} of {} buffer pages", i, nr_pbes);
                    pagedir.destroy(memory);
                    return Err(());
                }
            };

            memory.set_nosave(pfn, true);
            pagedir.pbes[i] = Pbe {
                orig_address: 0,
                address: pfn_to_phys(pfn),
                swap_address: SwapEntry::NONE,
            };
        }

        trace!(
            "Created pagedir at {:#x} (order {}) for {} pages",
            pagedir.base,
            pagedir.order,
            nr_pbes
        );
        Ok(pagedir)
    }

    /// Allocates only the directory frames, all entries are empty
    pub(crate) fn alloc_block<M: PhysicalMemoryModule>(
        memory: &mut M,
        nr_pbes: usize,
    ) -> Result<Self, ()> {
        let order = pagedir_order(nr_pbes);
        let base = memory.alloc_pages(order)?;

        Ok(Self {
            base,
            order,
            pbes: vec![Pbe::default(); nr_pbes],
            live: true,
        })
    }

    /// Releases all buffer pages and the directory frames and clears their nosave flags
    pub fn destroy<M: PhysicalMemoryModule>(mut self, memory: &mut M) {
        for pbe in self.pbes.iter().filter(|pbe| pbe.address != 0) {
            let pfn = phys_to_pfn(pbe.address);
            memory.set_nosave(pfn, false);
            memory.free_pages(pfn, 0);
        }

        for i in 0..(1 << self.order) {
            memory.set_nosave(self.base + i, false);
        }
        memory.free_pages(self.base, self.order);

        self.live = false;
    }

    pub fn base(&self) -> Pfn {
        self.base
    }

    /// Physical address of the directory
    pub fn address(&self) -> PhysAddr {
        pfn_to_phys(self.base)
    }

    pub fn order(&self) -> u32 {
        self.order
    }

    pub fn nr_pbes(&self) -> usize {
        self.pbes.len()
    }

    /// Number of directory pages that hold entries
    pub fn pages(&self) -> usize {
        pagedir_pages(self.pbes.len())
    }

    pub fn pbes(&self) -> &[Pbe] {
        &self.pbes
    }

    pub fn pbes_mut(&mut self) -> &mut [Pbe] {
        &mut self.pbes
    }

    /// Moves the directory to another block of the same order.
    /// The caller is responsible for the frames.
    pub(crate) fn set_base(&mut self, base: Pfn) {
        self.base = base;
    }

    /// Encodes directory page `index` into `page` with the given link trailer
    pub fn encode_page(&self, index: usize, link: SwapEntry, page: &mut [u8]) {
        debug_assert_eq!(page.len(), PAGE_SIZE);
        page.fill(0);

        let start = index * PBES_PER_PAGE;
        let end = (start + PBES_PER_PAGE).min(self.pbes.len());
        for (i, pbe) in self.pbes[start.min(end)..end].iter().enumerate() {
            pbe.encode(&mut page[i * PBE_SIZE..(i + 1) * PBE_SIZE]);
        }

        set_link(page, link);
    }

    /// Fills the entries of directory page `index` from `page` and returns its link trailer
    pub fn decode_page(&mut self, index: usize, page: &[u8]) -> SwapEntry {
        debug_assert_eq!(page.len(), PAGE_SIZE);

        let start = index * PBES_PER_PAGE;
        let end = (start + PBES_PER_PAGE).min(self.pbes.len());
        for (i, pbe) in self.pbes[start.min(end)..end].iter_mut().enumerate() {
            *pbe = Pbe::decode(&page[i * PBE_SIZE..(i + 1) * PBE_SIZE]);
        }

        get_link(page)
    }

    /// Writes all entries into the directory frames
    pub fn store<M: PhysicalMemoryModule>(&self, memory: &mut M) {
        let mut page = [0u8; PAGE_SIZE];
        for i in 0..self.pages() {
            self.encode_page(i, SwapEntry::NONE, &mut page);
            memory.write_frame(self.base + i, &page);
        }
    }

    /// Reads the entries back from the directory frames
    pub fn load_pbes<M: PhysicalMemoryModule>(&self, memory: &M) -> Vec<Pbe> {
        let mut page = [0u8; PAGE_SIZE];
        let mut pbes = Vec::with_capacity(self.pbes.len());

        for i in 0..self.pages() {
            memory.read_frame(self.base + i, &mut page);
            let count = (self.pbes.len() - pbes.len()).min(PBES_PER_PAGE);
            for j in 0..count {
                pbes.push(Pbe::decode(&page[j * PBE_SIZE..(j + 1) * PBE_SIZE]));
            }
        }

        pbes
    }
}

impl Drop for PageDir {
    fn drop(&mut self) {
        if self.live {
            warn!(
                "pagedir at {:#x} with {} pages dropped without destroy, frames leaked",
                self.base,
                self.pbes.len()
            );
        }
    }
}
