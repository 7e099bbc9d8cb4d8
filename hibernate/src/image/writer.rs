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

use log::{debug, error, info, trace, warn};

use super::{header::SuspendHeader, SlotClaims};
use crate::{
    config::{HibernateConfig, SystemIdentity},
    error::{HibernateError, IoPhase},
    modules::{
        block_device::BlockDeviceModule,
        memory::PhysicalMemoryModule,
        swap::{SwapArea, SwapEntry},
    },
    pagedir::PageDir,
    phys_to_pfn,
    signature::SignatureManager,
    PAGE_SIZE,
};

/// Result of a completed image write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrittenImage {
    /// Slot of the header, stored in the marker
    pub entry_point: SwapEntry,

    /// Number of slots holding the image
    pub slots: usize,
}

/// Writes the snapshot in `pagedir` to the suspend device and commits the marker.
///
/// Order on disk: one slot per data page, the directory pages and finally the header.
/// Directory and header slots are chained through their link trailer.
///
/// If any step fails, all claimed slots are released, the `swap_address` of every pbe is
/// cleared and the marker is reverted to plain swap.
pub fn write_suspend_image<M: PhysicalMemoryModule, B: BlockDeviceModule>(
    memory: &M,
    swap: &mut SwapArea<B>,
    signature: &SignatureManager,
    pagedir: &mut PageDir,
    identity: &SystemIdentity,
    config: &HibernateConfig,
) -> Result<WrittenImage, HibernateError> {
    signature.mark_pending(swap)?;

    let mut claims = SlotClaims::new(signature.swap_type());
    match write_image_slots(memory, swap, &mut claims, pagedir, identity, config)
        .and_then(|entry| signature.commit(swap, entry).map(|_| entry))
    {
        Ok(entry_point) => {
            let slots = claims.len();
            info!("Image written: {} slots", slots);
            Ok(WrittenImage { entry_point, slots })
        }
        Err(err) => {
            error!("Writing image failed: {}", err);
            claims.release(swap);
            for pbe in pagedir.pbes_mut() {
                pbe.swap_address = SwapEntry::NONE;
            }

            if let Err(revert_err) = signature.revert(swap) {
                warn!("Could not revert swap signature: {}", revert_err);
            }
            Err(err)
        }
    }
}

fn write_image_slots<M: PhysicalMemoryModule, B: BlockDeviceModule>(
    memory: &M,
    swap: &mut SwapArea<B>,
    claims: &mut SlotClaims,
    pagedir: &mut PageDir,
    identity: &SystemIdentity,
    config: &HibernateConfig,
) -> Result<SwapEntry, HibernateError> {
    let mut page = [0u8; PAGE_SIZE];
    let nr_pbes = pagedir.nr_pbes();
    let interval = config.progress_interval.max(1);

    debug!("Writing data to swap ({} pages)", nr_pbes);
    for (i, pbe) in pagedir.pbes_mut().iter_mut().enumerate() {
        if i % interval == 0 {
            trace!("data: {}/{}", i, nr_pbes);
        }

        memory.read_frame(phys_to_pfn(pbe.address), &mut page);
        pbe.swap_address = claims.write(swap, &page, IoPhase::Data)?;
    }

    debug!("Writing pagedir ({} pages)", pagedir.pages());
    let mut prev = SwapEntry::NONE;
    for i in 0..pagedir.pages() {
        pagedir.encode_page(i, prev, &mut page);
        prev = claims.write(swap, &page, IoPhase::Directory)?;
    }

    debug!("Writing header");
    let header = SuspendHeader::fill(
        identity,
        memory.num_physpages(),
        nr_pbes,
        pagedir.address(),
    );
    header.encode(prev, &mut page);
    Ok(claims.write(swap, &page, IoPhase::Header)?)
}

#[cfg(test)]
mod test {
    use super::write_suspend_image;
    use crate::{
        error::{HibernateError, IoFailureKind, IoPhase},
        image::header::SuspendHeader,
        modules::{
            block_device::RamBlockDevice,
            memory::{PhysicalMemoryModule, SimulatedMemory},
            swap::{SwapArea, SwapEntry},
        },
        pagedir::{get_link, PageDir},
        signature::{format_swap, Marker, SignatureManager, SwapVersion},
        snapshot::count_and_copy_data_pages,
        test::get_test_identity,
        HibernateConfig, PAGE_SIZE,
    };

    fn get_snapshot(mem: &mut SimulatedMemory) -> PageDir {
        let count = count_and_copy_data_pages(mem, None).unwrap();
        let mut pagedir = PageDir::create(mem, count).unwrap();
        count_and_copy_data_pages(mem, Some(&mut pagedir)).unwrap();
        pagedir
    }

    fn get_swap(blocks: usize) -> (SwapArea<RamBlockDevice>, SignatureManager) {
        let mut device = RamBlockDevice::new(blocks);
        format_swap(&mut device, SwapVersion::V2).unwrap();
        let mut area = SwapArea::new();
        let swap_type = area.swapon(device);
        (area, SignatureManager::new(swap_type))
    }

    #[test]
    fn test_write_layout() {
        let mut mem = SimulatedMemory::new(64, 4, 0..0);
        for pfn in 0..4 {
            mem.write_frame(pfn, &[pfn as u8 + 1; PAGE_SIZE]);
        }
        let mut pagedir = get_snapshot(&mut mem);
        assert_eq!(pagedir.nr_pbes(), 4);

        let (mut area, signature) = get_swap(8);
        let identity = get_test_identity();
        let written = write_suspend_image(
            &mem,
            &mut area,
            &signature,
            &mut pagedir,
            &identity,
            &HibernateConfig::default(),
        )
        .unwrap();

        // 4 data slots, 1 directory slot, 1 header slot
        assert_eq!(written.slots, 6);
        assert_eq!(written.entry_point, SwapEntry::new(0, 6));
        assert_eq!(
            signature.read(&mut area).unwrap(),
            Marker::Committed {
                version: SwapVersion::V2,
                entry: written.entry_point
            }
        );

        let device = area.device(0).unwrap();
        for (i, pbe) in pagedir.pbes().iter().enumerate() {
            assert_eq!(pbe.swap_address, SwapEntry::new(0, i + 1));
            assert_eq!(device.block(i + 1), mem.frame(pbe.orig_address as usize / PAGE_SIZE));
        }

        assert!(get_link(device.block(5)).is_none());
        let (header, link) = SuspendHeader::decode(device.block(6));
        assert_eq!(link, SwapEntry::new(0, 5));
        assert_eq!(header.num_pbes, 4);
        assert_eq!(header.suspend_pagedir, pagedir.address());
        assert_eq!(header.sanity_check(&identity, 64), Ok(()));

        pagedir.destroy(&mut mem);
    }

    #[test]
    fn test_failed_write_is_rolled_back() {
        let mut mem = SimulatedMemory::new(64, 4, 0..0);
        let mut pagedir = get_snapshot(&mut mem);

        let (mut area, signature) = get_swap(8);
        // format + pending marker + 3 data slots
        area.device_mut(0).unwrap().fail_after_writes(Some(5));

        let err = write_suspend_image(
            &mem,
            &mut area,
            &signature,
            &mut pagedir,
            &get_test_identity(),
            &HibernateConfig::default(),
        )
        .unwrap_err();

        assert_eq!(
            err,
            HibernateError::Io(crate::IoFailure::new(
                IoPhase::Data,
                IoFailureKind::WriteFailed(SwapEntry::new(0, 4))
            ))
        );
        assert!(err.is_fatal());
        assert_eq!(area.free_slots(0), 7);
        assert!(pagedir.pbes().iter().all(|pbe| pbe.swap_address.is_none()));

        // revert could not be written either, the marker is still pending
        area.device_mut(0).unwrap().fail_after_writes(None);
        assert_eq!(
            signature.read(&mut area).unwrap(),
            Marker::Pending(SwapVersion::V2)
        );

        pagedir.destroy(&mut mem);
    }

    #[test]
    fn test_slots_exhausted() {
        let mut mem = SimulatedMemory::new(64, 4, 0..0);
        let mut pagedir = get_snapshot(&mut mem);

        // 5 usable slots, 6 needed
        let (mut area, signature) = get_swap(6);
        let err = write_suspend_image(
            &mem,
            &mut area,
            &signature,
            &mut pagedir,
            &get_test_identity(),
            &HibernateConfig::default(),
        )
        .unwrap_err();

        assert_eq!(
            err,
            HibernateError::Io(crate::IoFailure::new(
                IoPhase::Header,
                IoFailureKind::SlotsExhausted
            ))
        );
        assert_eq!(area.free_slots(0), 5);
        assert_eq!(
            signature.read(&mut area).unwrap(),
            Marker::Normal(SwapVersion::V2)
        );

        pagedir.destroy(&mut mem);
    }
}
