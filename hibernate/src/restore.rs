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
    error::ConsistencyViolation, modules::memory::PhysicalMemoryModule, pagedir::PageDir,
    phys_to_pfn, relocate::buffer_pfn,
};

/// Copies every buffer back to its original address.
///
/// The pbes are taken from the directory frames, exactly like the low level restore path of an
/// architecture would walk them. Once started, this has to run to completion.
pub fn copy_pages_back<M: PhysicalMemoryModule>(memory: &mut M, pagedir: &PageDir) -> usize {
    let pbes = pagedir.load_pbes(memory);
    for pbe in pbes.iter() {
        memory.copy_frame(buffer_pfn(pbe), phys_to_pfn(pbe.orig_address));
    }

    trace!("copied {} pages back", pbes.len());
    pbes.len()
}

/// Checks that the directory frames survived the copy-back unchanged
pub fn check_directory<M: PhysicalMemoryModule>(
    memory: &M,
    pagedir: &PageDir,
) -> Result<(), ConsistencyViolation> {
    let stored = pagedir.load_pbes(memory);
    match stored
        .iter()
        .zip(pagedir.pbes())
        .position(|(stored, expected)| stored != expected)
    {
        Some(index) => Err(ConsistencyViolation::DirectoryClobbered { index }),
        None => Ok(()),
    }
}
