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

//! The marker in the first block of the suspend device.
//!
//! The last 10 bytes of block 0 hold a magic string telling what the device contains:
//!
//! | state     | v1             | v2             |
//! |-----------|----------------|----------------|
//! | normal    | `"SWAP-SPACE"` | `"SWAPSPACE2"` |
//! | pending   | `"P1SUSP...."` | `"P2SUSP...."` |
//! | committed | `"S1"` + entry | `"S2"` + entry |
//!
//! A committed marker keeps its two byte prefix and stores the entry point of the
//! image chain in the last 8 bytes of the page. Every transition is one block write.

use log::{debug, info, warn};
use static_assertions::const_assert;

use crate::{
    error::{HibernateError, IoFailure, IoFailureKind, IoPhase},
    modules::{
        block_device::BlockDeviceModule,
        swap::{SwapArea, SwapEntry},
    },
    pagedir::{get_link, set_link, LINK_OFFSET},
    PAGE_SIZE,
};

pub const MAGIC_LEN: usize = 10;
pub const MAGIC_OFFSET: usize = PAGE_SIZE - MAGIC_LEN;

/// The entry point overlaps the magic right after the two byte prefix
pub const ENTRY_OFFSET: usize = MAGIC_OFFSET + 2;

const_assert!(ENTRY_OFFSET == LINK_OFFSET);

const SWAP_SPACE_V1: &[u8; MAGIC_LEN] = b"SWAP-SPACE";
const SWAP_SPACE_V2: &[u8; MAGIC_LEN] = b"SWAPSPACE2";
const PENDING_V1: &[u8; MAGIC_LEN] = b"P1SUSP....";
const PENDING_V2: &[u8; MAGIC_LEN] = b"P2SUSP....";
const COMMITTED_V1: &[u8; 2] = b"S1";
const COMMITTED_V2: &[u8; 2] = b"S2";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapVersion {
    V1,
    V2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// Plain swap space
    Normal(SwapVersion),

    /// An image is being written but is not complete yet
    Pending(SwapVersion),

    /// A complete image, its chain starts at `entry`
    Committed {
        version: SwapVersion,
        entry: SwapEntry,
    },

    Unknown([u8; MAGIC_LEN]),
}

impl Marker {
    pub fn parse(page: &[u8]) -> Self {
        let mut magic = [0u8; MAGIC_LEN];
        magic.copy_from_slice(&page[MAGIC_OFFSET..PAGE_SIZE]);

        match &magic {
            SWAP_SPACE_V1 => return Marker::Normal(SwapVersion::V1),
            SWAP_SPACE_V2 => return Marker::Normal(SwapVersion::V2),
            PENDING_V1 => return Marker::Pending(SwapVersion::V1),
            PENDING_V2 => return Marker::Pending(SwapVersion::V2),
            _ => {}
        }

        let version = if &magic[0..2] == COMMITTED_V1 {
            SwapVersion::V1
        } else if &magic[0..2] == COMMITTED_V2 {
            SwapVersion::V2
        } else {
            return Marker::Unknown(magic);
        };

        let entry = get_link(page);
        if entry.is_none() {
            // a committed image always has a header slot
            return Marker::Unknown(magic);
        }

        Marker::Committed { version, entry }
    }

    /// Writes this marker into the magic field of `page`, the rest of the page is untouched
    pub fn write_to(&self, page: &mut [u8]) {
        let magic = &mut page[MAGIC_OFFSET..PAGE_SIZE];
        match self {
            Marker::Normal(SwapVersion::V1) => magic.copy_from_slice(SWAP_SPACE_V1),
            Marker::Normal(SwapVersion::V2) => magic.copy_from_slice(SWAP_SPACE_V2),
            Marker::Pending(SwapVersion::V1) => magic.copy_from_slice(PENDING_V1),
            Marker::Pending(SwapVersion::V2) => magic.copy_from_slice(PENDING_V2),
            Marker::Committed { version, entry } => {
                let prefix = match version {
                    SwapVersion::V1 => COMMITTED_V1,
                    SwapVersion::V2 => COMMITTED_V2,
                };
                magic[0..2].copy_from_slice(prefix);
                set_link(page, *entry);
            }
            Marker::Unknown(raw) => magic.copy_from_slice(raw),
        }
    }
}

/// Prepares `device` as plain swap space
pub fn format_swap<B: BlockDeviceModule>(device: &mut B, version: SwapVersion) -> Result<(), ()> {
    let mut page = [0u8; PAGE_SIZE];
    Marker::Normal(version).write_to(&mut page);
    device.write_block(0, &page)
}

/// Owns the marker protocol of one swap device
pub struct SignatureManager {
    swap_type: usize,
}

impl SignatureManager {
    pub fn new(swap_type: usize) -> Self {
        Self { swap_type }
    }

    pub fn swap_type(&self) -> usize {
        self.swap_type
    }

    fn marker_entry(&self) -> SwapEntry {
        SwapEntry::new(self.swap_type, 0)
    }

    fn load<B: BlockDeviceModule>(
        &self,
        swap: &mut SwapArea<B>,
        page: &mut [u8],
        phase: IoPhase,
    ) -> Result<Marker, IoFailure> {
        let entry = self.marker_entry();
        swap.read_slot(entry, page)
            .map_err(|_| IoFailure::new(phase, IoFailureKind::ReadFailed(entry)))?;
        Ok(Marker::parse(page))
    }

    fn store<B: BlockDeviceModule>(
        &self,
        swap: &mut SwapArea<B>,
        page: &mut [u8],
        marker: Marker,
    ) -> Result<(), IoFailure> {
        let entry = self.marker_entry();
        marker.write_to(page);
        swap.write_slot(entry, page)
            .map_err(|_| IoFailure::new(IoPhase::Signature, IoFailureKind::WriteFailed(entry)))
    }

    /// Reads the current marker while looking for an image to resume from
    pub fn read<B: BlockDeviceModule>(&self, swap: &mut SwapArea<B>) -> Result<Marker, HibernateError> {
        let mut page = [0u8; PAGE_SIZE];
        Ok(self.load(swap, &mut page, IoPhase::Resume)?)
    }

    /// normal -> pending, done right before the first image slot is written.
    ///
    /// A stale pending marker of an aborted attempt and the marker of an image that was
    /// never resumed are taken over, the old image is lost.
    pub fn mark_pending<B: BlockDeviceModule>(
        &self,
        swap: &mut SwapArea<B>,
    ) -> Result<SwapVersion, HibernateError> {
        let mut page = [0u8; PAGE_SIZE];
        let version = match self.load(swap, &mut page, IoPhase::Signature)? {
            Marker::Normal(version) | Marker::Pending(version) => version,
            Marker::Committed { version, entry } => {
                warn!("Discarding unused image starting at {:?}", entry);
                version
            }
            Marker::Unknown(magic) => {
                warn!(
                    "Swapspace is not swapspace ({})",
                    String::from_utf8_lossy(&magic)
                );
                return Err(HibernateError::BadSignature(magic));
            }
        };

        self.store(swap, &mut page, Marker::Pending(version))?;
        debug!("Marked swap type {} as pending", self.swap_type);
        Ok(version)
    }

    /// pending -> committed, `entry` is the slot of the image header
    pub fn commit<B: BlockDeviceModule>(
        &self,
        swap: &mut SwapArea<B>,
        entry: SwapEntry,
    ) -> Result<(), HibernateError> {
        let mut page = [0u8; PAGE_SIZE];
        let version = match self.load(swap, &mut page, IoPhase::Signature)? {
            Marker::Pending(version) => version,
            Marker::Normal(_) | Marker::Committed { .. } => {
                let mut magic = [0u8; MAGIC_LEN];
                magic.copy_from_slice(&page[MAGIC_OFFSET..PAGE_SIZE]);
                return Err(HibernateError::BadSignature(magic));
            }
            Marker::Unknown(magic) => return Err(HibernateError::BadSignature(magic)),
        };

        self.store(swap, &mut page, Marker::Committed { version, entry })?;
        info!("Image committed, entry point {:?}", entry);
        Ok(())
    }

    /// committed or pending -> normal.
    ///
    /// Returns false if there was nothing to revert. An unknown marker is left untouched.
    pub fn revert<B: BlockDeviceModule>(&self, swap: &mut SwapArea<B>) -> Result<bool, HibernateError> {
        let mut page = [0u8; PAGE_SIZE];
        let version = match self.load(swap, &mut page, IoPhase::Signature)? {
            Marker::Committed { version, .. } | Marker::Pending(version) => version,
            Marker::Normal(_) => return Ok(false),
            Marker::Unknown(magic) => {
                warn!(
                    "Unable to find suspended-data signature ({} - misspelled?)",
                    String::from_utf8_lossy(&magic)
                );
                return Ok(false);
            }
        };

        self.store(swap, &mut page, Marker::Normal(version))?;
        debug!("Fixed swap signature of swap type {}", self.swap_type);
        Ok(true)
    }
}
