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

//! The on-disk image: data slots, directory slots and the header slot.
//!
//! Directory and header slots form a chain through their link trailer: every slot points to
//! the slot written right before it, the first directory slot ends the chain with an empty link.
//! The marker stores the header slot, so the chain is read back in reverse write order.

pub mod header;
pub mod reader;
pub mod writer;

use std::collections::BTreeSet;

use log::{debug, trace, warn};

use crate::{
    error::{HibernateError, ImageCorruption, IoFailure, IoFailureKind, IoPhase},
    modules::{
        block_device::BlockDeviceModule,
        swap::{SwapArea, SwapEntry},
    },
    pagedir::{get_link, page_slots},
    PAGE_SIZE,
};

/// One slot of the chain together with the slot it links to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainLink {
    pub slot: SwapEntry,
    pub prev: SwapEntry,
}

/// Follows an image chain from its entry point, rejecting loops and slots of other devices
pub struct ChainWalker {
    swap_type: usize,
    next: SwapEntry,
    visited: BTreeSet<SwapEntry>,
}

impl ChainWalker {
    pub fn new(swap_type: usize, entry_point: SwapEntry) -> Self {
        Self {
            swap_type,
            next: entry_point,
            visited: BTreeSet::new(),
        }
    }

    /// Is the end of the chain reached?
    pub fn is_done(&self) -> bool {
        self.next.is_none()
    }

    /// Reads the next slot of the chain into `page`.
    ///
    /// Returns `None` once the chain terminator was reached.
    pub fn read_next<B: BlockDeviceModule>(
        &mut self,
        swap: &mut SwapArea<B>,
        page: &mut [u8],
    ) -> Result<Option<ChainLink>, HibernateError> {
        let slot = self.next;
        if slot.is_none() {
            return Ok(None);
        }

        if slot.swap_type() != self.swap_type {
            return Err(IoFailure::new(IoPhase::Resume, IoFailureKind::ForeignSlot(slot)).into());
        }

        if !self.visited.insert(slot) {
            return Err(ImageCorruption::ChainLoop(slot).into());
        }

        swap.read_slot(slot, page)
            .map_err(|_| IoFailure::new(IoPhase::Resume, IoFailureKind::ReadFailed(slot)))?;

        let prev = get_link(page);
        trace!("chain: {:?} -> {:?}", slot, prev);
        self.next = prev;

        Ok(Some(ChainLink { slot, prev }))
    }
}

/// Slots claimed on the suspend device while an image is written.
///
/// If writing fails, `release` hands every claimed slot back.
pub(crate) struct SlotClaims {
    swap_type: usize,
    claimed: Vec<SwapEntry>,
}

impl SlotClaims {
    pub(crate) fn new(swap_type: usize) -> Self {
        Self {
            swap_type,
            claimed: Vec::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.claimed.len()
    }

    /// Allocates a slot, which has to be located on the suspend device
    pub(crate) fn alloc<B: BlockDeviceModule>(
        &mut self,
        swap: &mut SwapArea<B>,
        phase: IoPhase,
    ) -> Result<SwapEntry, IoFailure> {
        let entry = swap.get_swap_page();
        if entry.is_none() {
            return Err(IoFailure::new(phase, IoFailureKind::SlotsExhausted));
        }

        // keep track of foreign slots too, so they are released again
        self.claimed.push(entry);
        if entry.swap_type() != self.swap_type {
            return Err(IoFailure::new(phase, IoFailureKind::ForeignSlot(entry)));
        }

        Ok(entry)
    }

    /// Allocates a slot and writes `page` to it
    pub(crate) fn write<B: BlockDeviceModule>(
        &mut self,
        swap: &mut SwapArea<B>,
        page: &[u8],
        phase: IoPhase,
    ) -> Result<SwapEntry, IoFailure> {
        let entry = self.alloc(swap, phase)?;
        swap.write_slot(entry, page)
            .map_err(|_| IoFailure::new(phase, IoFailureKind::WriteFailed(entry)))?;
        Ok(entry)
    }

    pub(crate) fn release<B: BlockDeviceModule>(self, swap: &mut SwapArea<B>) {
        for entry in self.claimed {
            swap.swap_free(entry);
        }
    }
}

/// Hands every slot of the image at `entry_point` back to the swap area.
///
/// The header slot comes first in the chain, every following slot is a directory page whose
/// entries name the data slots. A broken chain ends the walk, the slots found up to there are
/// released anyway. Returns the number of released slots.
pub(crate) fn release_image_slots<B: BlockDeviceModule>(
    swap: &mut SwapArea<B>,
    swap_type: usize,
    entry_point: SwapEntry,
) -> usize {
    let mut page = [0u8; PAGE_SIZE];
    let mut walker = ChainWalker::new(swap_type, entry_point);
    let mut slots = BTreeSet::new();
    let mut is_header = true;

    loop {
        match walker.read_next(swap, &mut page) {
            Ok(Some(link)) => {
                slots.insert(link.slot);
                if !is_header {
                    slots.extend(page_slots(&page).filter(|entry| entry.swap_type() == swap_type));
                }
                is_header = false;
            }
            Ok(None) => break,
            Err(err) => {
                warn!("Image chain broken while releasing its slots: {}", err);
                break;
            }
        }
    }

    let count = slots.len();
    for entry in slots {
        swap.swap_free(entry);
    }
    debug!("Released {} slots of image at {:?}", count, entry_point);
    count
}
