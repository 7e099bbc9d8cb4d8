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

use log::trace;

use crate::{
    error::ConsistencyViolation,
    modules::memory::{FrameKind, PhysicalMemoryModule},
    pagedir::PageDir,
    pfn_to_phys, phys_to_pfn,
};

/// Walks all page frames once in ascending order and counts the ones that belong into a snapshot.
///
/// Skipped without being counted are reserved frames of the nosave section, frames flagged as
/// nosave and whole free blocks. If `pagedir` is given, every counted frame is copied into the
/// buffer of the next pbe and its address is recorded as `orig_address`.
///
/// Two calls without any page allocation in between return the same count.
pub fn count_and_copy_data_pages<M: PhysicalMemoryModule>(
    memory: &mut M,
    mut pagedir: Option<&mut PageDir>,
) -> Result<usize, ConsistencyViolation> {
    let max_pfn = memory.num_physpages();
    let mut nr_copy_pages = 0;
    let mut pfn = 0;

    while pfn < max_pfn {
        match memory.frame_kind(pfn) {
            FrameKind::Reserved => {
                if memory.is_nosave(pfn) {
                    return Err(ConsistencyViolation::ReservedNosave { pfn });
                }

                if memory.in_nosave_section(pfn) {
                    trace!("[nosave {:#x}]", pfn_to_phys(pfn));
                    pfn += 1;
                    continue;
                }
            }
            FrameKind::Free | FrameKind::InUse => {
                if memory.is_nosave(pfn) {
                    pfn += 1;
                    continue;
                }

                let chunk_size = memory.free_region_len(pfn);
                if chunk_size != 0 {
                    pfn += chunk_size;
                    continue;
                }
            }
        }

        if let Some(pagedir) = pagedir.as_deref_mut() {
            let capacity = pagedir.nr_pbes();
            let pbe = pagedir
                .pbes_mut()
                .get_mut(nr_copy_pages)
                .ok_or(ConsistencyViolation::DirectoryTooSmall { capacity })?;

            pbe.orig_address = pfn_to_phys(pfn);
            memory.copy_frame(pfn, phys_to_pfn(pbe.address));
        }

        nr_copy_pages += 1;
        pfn += 1;
    }

    Ok(nr_copy_pages)
}

#[cfg(test)]
mod test {
    use super::count_and_copy_data_pages;
    use crate::{
        error::ConsistencyViolation,
        modules::memory::{PhysicalMemoryModule, SimulatedMemory},
        pagedir::PageDir,
        phys_to_pfn, PAGE_SIZE,
    };

    #[test]
    fn test_counting_skips_free_and_nosave() {
        // frames 0..8 reserved, 2..4 of them in the nosave section
        let mut mem = SimulatedMemory::new(64, 8, 2..4);
        assert_eq!(count_and_copy_data_pages(&mut mem, None), Ok(6));

        let a = mem.alloc_pages(0).unwrap();
        let b = mem.alloc_pages(2).unwrap();
        assert_eq!(count_and_copy_data_pages(&mut mem, None), Ok(6 + 1 + 4));

        mem.set_nosave(b + 1, true);
        assert_eq!(count_and_copy_data_pages(&mut mem, None), Ok(6 + 1 + 3));
        mem.set_nosave(b + 1, false);

        mem.free_pages(a, 0);
        mem.free_pages(b, 2);
        assert_eq!(count_and_copy_data_pages(&mut mem, None), Ok(6));
    }

    #[test]
    fn test_reserved_nosave_is_inconsistent() {
        let mut mem = SimulatedMemory::new(32, 8, 0..0);
        mem.set_nosave(5, true);
        assert_eq!(
            count_and_copy_data_pages(&mut mem, None),
            Err(ConsistencyViolation::ReservedNosave { pfn: 5 })
        );
    }

    #[test]
    fn test_copy_pass_matches_count() {
        let mut mem = SimulatedMemory::new(128, 8, 0..2);
        let mut used = vec![];
        for i in 0..5 {
            let pfn = mem.alloc_pages(0).unwrap();
            mem.write_frame(pfn, &[i as u8 + 1; PAGE_SIZE]);
            used.push(pfn);
        }

        let count = count_and_copy_data_pages(&mut mem, None).unwrap();
        assert_eq!(count, 6 + 5);

        let mut pagedir = PageDir::create(&mut mem, count).unwrap();
        assert_eq!(count_and_copy_data_pages(&mut mem, Some(&mut pagedir)), Ok(count));

        let mut last = None;
        for pbe in pagedir.pbes() {
            // ascending and unique
            assert!(last.map_or(true, |last| last < pbe.orig_address));
            last = Some(pbe.orig_address);

            let orig = phys_to_pfn(pbe.orig_address);
            let copy = phys_to_pfn(pbe.address);
            assert_eq!(mem.frame(orig), mem.frame(copy));
        }

        pagedir.destroy(&mut mem);
    }

    #[test]
    fn test_copy_into_small_directory() {
        let mut mem = SimulatedMemory::new(64, 8, 0..0);
        let mut pagedir = PageDir::create(&mut mem, 3).unwrap();
        assert_eq!(
            count_and_copy_data_pages(&mut mem, Some(&mut pagedir)),
            Err(ConsistencyViolation::DirectoryTooSmall { capacity: 3 })
        );
        pagedir.destroy(&mut mem);
    }
}
