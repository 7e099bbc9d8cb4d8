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

mod file_device;
mod ram_device;

pub use file_device::FileBlockDevice;
pub use ram_device::RamBlockDevice;

/// A device that is accessed in blocks of `PAGE_SIZE` bytes
/// (e.g. a swap partition or a swap file)
pub trait BlockDeviceModule {
    /// Reads block `index` into `dest`, which is exactly one block big.
    ///
    /// If this call fails, it could be that already some data was written to `dest`.
    fn read_block(&mut self, index: usize, dest: &mut [u8]) -> Result<(), ()>;

    /// Writes `src`, which is exactly one block big, to block `index`
    fn write_block(&mut self, index: usize, src: &[u8]) -> Result<(), ()>;

    /// Returns the number of blocks of this device
    ///
    /// **It is illegal to read/write blocks past this number!**
    fn block_count(&self) -> usize;
}
