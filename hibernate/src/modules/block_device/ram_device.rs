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

use super::BlockDeviceModule;
use crate::PAGE_SIZE;

/// Block device kept in RAM. Counts accesses and can be told to fail.
pub struct RamBlockDevice {
    data: Vec<u8>,
    reads: usize,
    writes: usize,

    /// writes fail once this many writes succeeded
    fail_after_writes: Option<usize>,

    /// reads of this block fail
    fail_read_block: Option<usize>,
}

impl RamBlockDevice {
    pub fn new(blocks: usize) -> Self {
        Self {
            data: vec![0u8; blocks * PAGE_SIZE],
            reads: 0,
            writes: 0,
            fail_after_writes: None,
            fail_read_block: None,
        }
    }

    pub fn read_count(&self) -> usize {
        self.reads
    }

    pub fn write_count(&self) -> usize {
        self.writes
    }

    pub fn fail_after_writes(&mut self, writes: Option<usize>) {
        self.fail_after_writes = writes;
    }

    pub fn fail_read_block(&mut self, block: Option<usize>) {
        self.fail_read_block = block;
    }

    /// Raw view of one block, bypassing counters and failure injection
    pub fn block(&self, index: usize) -> &[u8] {
        &self.data[index * PAGE_SIZE..(index + 1) * PAGE_SIZE]
    }

    /// Raw mutable view of one block, bypassing counters and failure injection
    pub fn block_mut(&mut self, index: usize) -> &mut [u8] {
        &mut self.data[index * PAGE_SIZE..(index + 1) * PAGE_SIZE]
    }
}

impl BlockDeviceModule for RamBlockDevice {
    fn read_block(&mut self, index: usize, dest: &mut [u8]) -> Result<(), ()> {
        debug_assert_eq!(dest.len(), PAGE_SIZE);
        if index >= self.block_count() || self.fail_read_block == Some(index) {
            return Err(());
        }

        self.reads += 1;
        dest.copy_from_slice(self.block(index));
        Ok(())
    }

    fn write_block(&mut self, index: usize, src: &[u8]) -> Result<(), ()> {
        debug_assert_eq!(src.len(), PAGE_SIZE);
        if index >= self.block_count() {
            return Err(());
        }
        if let Some(limit) = self.fail_after_writes {
            if self.writes >= limit {
                return Err(());
            }
        }

        self.writes += 1;
        self.block_mut(index).copy_from_slice(src);
        Ok(())
    }

    fn block_count(&self) -> usize {
        self.data.len() / PAGE_SIZE
    }
}
