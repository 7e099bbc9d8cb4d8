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

use super::{header::SuspendHeader, ChainWalker};
use crate::{
    config::{HibernateConfig, SystemIdentity},
    error::{HibernateError, ImageCorruption, IoFailure, IoFailureKind, IoPhase, RelocationFailure},
    modules::{
        block_device::BlockDeviceModule,
        memory::PhysicalMemoryModule,
        swap::{SwapArea, SwapEntry},
    },
    pagedir::PageDir,
    phys_to_pfn,
    relocate::{check_pagedir, relocate_pagedir, OrigAddressSet},
    signature::{Marker, SignatureManager},
    PhysAddr, PAGE_SIZE,
};

/// An image that is fully loaded into collision free memory and ready to be copied back
pub struct LoadedImage {
    pub header: SuspendHeader,
    pub pagedir: PageDir,

    /// Address of the directory when the image was written
    pub saved_pagedir: PhysAddr,

    pub entry_point: SwapEntry,

    /// Directory and header slots that were read
    pub chain_slots: usize,

    pub relocation_rejects: usize,
}

/// Looks for an image on the device of `signature` and loads it.
///
/// Returns `Ok(None)` if the device holds plain swap. A stale pending marker of an attempt that
/// never completed is reverted and also counts as no image. On any error the image is left on
/// disk and all memory allocated so far is released.
pub fn read_suspend_image<M: PhysicalMemoryModule, B: BlockDeviceModule>(
    memory: &mut M,
    swap: &mut SwapArea<B>,
    signature: &SignatureManager,
    identity: &SystemIdentity,
    config: &HibernateConfig,
) -> Result<Option<LoadedImage>, HibernateError> {
    let entry_point = match signature.read(swap)? {
        Marker::Normal(_) => {
            debug!("Resume: no image found");
            return Ok(None);
        }
        Marker::Pending(_) => {
            warn!("Resume: found incomplete image, fixing signature");
            if let Err(err) = signature.revert(swap) {
                warn!("Could not revert swap signature: {}", err);
            }
            return Ok(None);
        }
        Marker::Unknown(magic) => {
            error!(
                "Resume: invalid signature ({})",
                String::from_utf8_lossy(&magic)
            );
            return Err(HibernateError::BadSignature(magic));
        }
        Marker::Committed { entry, .. } => entry,
    };

    info!("Resume: signature found, resuming from {:?}", entry_point);

    let mut page = [0u8; PAGE_SIZE];
    let mut walker = ChainWalker::new(signature.swap_type(), entry_point);
    if walker.read_next(swap, &mut page)?.is_none() {
        return Err(ImageCorruption::ChainTooShort {
            expected: 1,
            found: 0,
        }
        .into());
    }

    let (header, _) = SuspendHeader::decode(&page);
    header.sanity_check(identity, memory.num_physpages())?;

    if header.num_pbes > memory.num_physpages() as u64 {
        return Err(ImageCorruption::TooManyPages(header.num_pbes).into());
    }
    let nr_pbes = header.num_pbes as usize;

    let mut pagedir =
        PageDir::alloc_block(memory, nr_pbes).map_err(|_| RelocationFailure::OutOfMemory)?;

    match load_image(memory, swap, signature, config, &mut walker, &mut pagedir) {
        Ok((chain_slots, relocation_rejects)) => {
            info!(
                "Resume: loaded {} pages ({} relocation rejects)",
                nr_pbes, relocation_rejects
            );
            Ok(Some(LoadedImage {
                saved_pagedir: header.suspend_pagedir,
                header,
                pagedir,
                entry_point,
                chain_slots: chain_slots + 1,
                relocation_rejects,
            }))
        }
        Err(err) => {
            error!("Resume: loading image failed: {}", err);
            pagedir.destroy(memory);
            Err(err)
        }
    }
}

/// Reads the directory from the chain, moves it out of the way and reads all data pages.
///
/// Returns the number of directory slots and the number of rejected relocation candidates.
fn load_image<M: PhysicalMemoryModule, B: BlockDeviceModule>(
    memory: &mut M,
    swap: &mut SwapArea<B>,
    signature: &SignatureManager,
    config: &HibernateConfig,
    walker: &mut ChainWalker,
    pagedir: &mut PageDir,
) -> Result<(usize, usize), HibernateError> {
    let mut page = [0u8; PAGE_SIZE];
    let pages = pagedir.pages();

    debug!("Reading pagedir ({} pages)", pages);
    for i in (0..pages).rev() {
        if walker.read_next(swap, &mut page)?.is_none() {
            return Err(ImageCorruption::ChainTooShort {
                expected: pages,
                found: pages - 1 - i,
            }
            .into());
        }
        pagedir.decode_page(i, &page);
    }
    if !walker.is_done() {
        return Err(ImageCorruption::ChainTooLong.into());
    }

    let device_blocks = swap
        .device(signature.swap_type())
        .map(|device| device.block_count())
        .ok_or(IoFailure::new(
            IoPhase::Resume,
            IoFailureKind::NoDevice(signature.swap_type()),
        ))?;
    let num_physpages = memory.num_physpages();

    for (index, pbe) in pagedir.pbes_mut().iter_mut().enumerate() {
        let slot = pbe.swap_address;
        let valid = pbe.orig_address % PAGE_SIZE as u64 == 0
            && phys_to_pfn(pbe.orig_address) < num_physpages
            && slot.swap_type() == signature.swap_type()
            && slot.offset() != 0
            && slot.offset() < device_blocks;
        if !valid {
            return Err(ImageCorruption::InvalidPbe { index }.into());
        }

        // save time buffer, meaningless now
        pbe.address = 0;
    }

    let set = OrigAddressSet::new(pagedir.pbes())
        .map_err(|index| ImageCorruption::DuplicateOrigAddress { index })?;

    pagedir.store(memory);
    let mut rejects = relocate_pagedir(memory, pagedir, &set, config.max_relocation_attempts)?;
    rejects += check_pagedir(memory, pagedir, &set, config.max_relocation_attempts)?;

    debug!("Reading image data ({} pages)", pagedir.nr_pbes());
    let interval = config.progress_interval.max(1);
    let nr_pbes = pagedir.nr_pbes();
    for (i, pbe) in pagedir.pbes().iter().enumerate() {
        if i % interval == 0 {
            trace!("data: {}/{}", i, nr_pbes);
        }

        swap.read_slot(pbe.swap_address, &mut page).map_err(|_| {
            IoFailure::new(IoPhase::Resume, IoFailureKind::ReadFailed(pbe.swap_address))
        })?;
        memory.write_frame(phys_to_pfn(pbe.address), &page);
    }

    pagedir.store(memory);
    Ok((pages, rejects))
}

#[cfg(test)]
mod test {
    use super::read_suspend_image;
    use crate::{
        error::{HibernateError, ImageCorruption, IncompatibleImage},
        image::writer::write_suspend_image,
        modules::{
            block_device::RamBlockDevice,
            memory::{PhysicalMemoryModule, SimulatedMemory},
            swap::SwapArea,
        },
        pagedir::{set_link, PageDir},
        relocate::{is_collision_free, OrigAddressSet},
        signature::{format_swap, Marker, SignatureManager, SwapVersion},
        snapshot::count_and_copy_data_pages,
        test::get_test_identity,
        HibernateConfig, PAGE_SIZE,
    };

    /// Writes an image of a machine with `pages` filled frames and returns the swap area
    fn write_image(pages: usize) -> (SwapArea<RamBlockDevice>, SignatureManager) {
        let mut mem = SimulatedMemory::new(64, 2, 0..0);
        for i in 0..pages {
            let pfn = mem.alloc_pages(0).unwrap();
            mem.write_frame(pfn, &[i as u8 + 1; PAGE_SIZE]);
        }

        let count = count_and_copy_data_pages(&mut mem, None).unwrap();
        let mut pagedir = PageDir::create(&mut mem, count).unwrap();
        count_and_copy_data_pages(&mut mem, Some(&mut pagedir)).unwrap();

        let mut device = RamBlockDevice::new(32);
        format_swap(&mut device, SwapVersion::V1).unwrap();
        let mut area = SwapArea::new();
        let signature = SignatureManager::new(area.swapon(device));

        write_suspend_image(
            &mem,
            &mut area,
            &signature,
            &mut pagedir,
            &get_test_identity(),
            &HibernateConfig::default(),
        )
        .unwrap();

        pagedir.destroy(&mut mem);
        (area, signature)
    }

    #[test]
    fn test_read_image() {
        let (mut area, signature) = write_image(5);
        let mut mem = SimulatedMemory::new(64, 2, 0..0);
        let free_before = mem.nr_free_pages();

        let image = read_suspend_image(
            &mut mem,
            &mut area,
            &signature,
            &get_test_identity(),
            &HibernateConfig::default(),
        )
        .unwrap()
        .expect("image should be found");

        assert_eq!(image.header.num_pbes, 7);
        assert_eq!(image.pagedir.nr_pbes(), 7);
        assert_eq!(image.chain_slots, 2);

        let set = OrigAddressSet::new(image.pagedir.pbes()).unwrap();
        assert!(is_collision_free(image.pagedir.pbes(), &set));
        assert!(!set.does_collide_order(image.pagedir.address(), image.pagedir.order()));
        assert_eq!(image.pagedir.load_pbes(&mem), image.pagedir.pbes().to_vec());

        // buffers of the allocated frames hold their content
        for pbe in image.pagedir.pbes().iter().skip(2) {
            let pfn = pbe.orig_address as usize / PAGE_SIZE;
            let buffer = pbe.address as usize / PAGE_SIZE;
            assert_eq!(mem.frame(buffer)[0] as usize, pfn - 2 + 1);
        }

        // the image stays on disk until it is consumed
        assert!(matches!(
            signature.read(&mut area).unwrap(),
            Marker::Committed { .. }
        ));

        image.pagedir.destroy(&mut mem);
        assert_eq!(mem.nr_free_pages(), free_before);
    }

    #[test]
    fn test_no_image() {
        let mut device = RamBlockDevice::new(4);
        format_swap(&mut device, SwapVersion::V2).unwrap();
        let mut area = SwapArea::new();
        let signature = SignatureManager::new(area.swapon(device));

        let mut mem = SimulatedMemory::new(64, 2, 0..0);
        let res = read_suspend_image(
            &mut mem,
            &mut area,
            &signature,
            &get_test_identity(),
            &HibernateConfig::default(),
        );
        assert!(matches!(res, Ok(None)));

        // a pending marker is reverted
        signature.mark_pending(&mut area).unwrap();
        let res = read_suspend_image(
            &mut mem,
            &mut area,
            &signature,
            &get_test_identity(),
            &HibernateConfig::default(),
        );
        assert!(matches!(res, Ok(None)));
        assert_eq!(
            signature.read(&mut area).unwrap(),
            Marker::Normal(SwapVersion::V2)
        );
    }

    #[test]
    fn test_incompatible_image_is_kept() {
        let (mut area, signature) = write_image(3);
        let mut mem = SimulatedMemory::new(64, 2, 0..0);
        let free_before = mem.nr_free_pages();

        let mut identity = get_test_identity();
        identity.num_cpus += 1;
        let res = read_suspend_image(
            &mut mem,
            &mut area,
            &signature,
            &identity,
            &HibernateConfig::default(),
        );
        assert!(matches!(
            res,
            Err(HibernateError::Incompatible(IncompatibleImage::CpuCount))
        ));
        assert_eq!(mem.nr_free_pages(), free_before);
        assert!(matches!(
            signature.read(&mut area).unwrap(),
            Marker::Committed { .. }
        ));

        // different memory size
        let mut mem = SimulatedMemory::new(128, 2, 0..0);
        let res = read_suspend_image(
            &mut mem,
            &mut area,
            &signature,
            &get_test_identity(),
            &HibernateConfig::default(),
        );
        assert!(matches!(
            res,
            Err(HibernateError::Incompatible(IncompatibleImage::MemorySize))
        ));
    }

    #[test]
    fn test_broken_chain() {
        let (mut area, signature) = write_image(3);
        let mut mem = SimulatedMemory::new(64, 2, 0..0);
        let free_before = mem.nr_free_pages();

        // 5 data slots at 1..6, the directory at 6, the header at 7
        let header = crate::modules::swap::SwapEntry::new(0, 7);
        set_link(area.device_mut(0).unwrap().block_mut(6), header);

        let res = read_suspend_image(
            &mut mem,
            &mut area,
            &signature,
            &get_test_identity(),
            &HibernateConfig::default(),
        );
        assert_eq!(
            res.err(),
            Some(HibernateError::Corrupt(ImageCorruption::ChainTooLong))
        );
        assert_eq!(mem.nr_free_pages(), free_before);
    }

    #[test]
    fn test_unreadable_data_slot() {
        let (mut area, signature) = write_image(3);
        area.device_mut(0).unwrap().fail_read_block(Some(2));

        let mut mem = SimulatedMemory::new(64, 2, 0..0);
        let free_before = mem.nr_free_pages();
        let err = read_suspend_image(
            &mut mem,
            &mut area,
            &signature,
            &get_test_identity(),
            &HibernateConfig::default(),
        )
        .err()
        .unwrap();

        assert!(!err.is_fatal());
        assert_eq!(mem.nr_free_pages(), free_before);
    }
}
