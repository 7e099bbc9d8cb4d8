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

use std::{
    fs::{remove_file, File},
    io::{Read, Seek, SeekFrom, Write},
    mem::ManuallyDrop,
    path::Path,
};

use super::BlockDeviceModule;
use crate::PAGE_SIZE;

/// Block device backed by a regular file, like a swap file
pub struct FileBlockDevice {
    /// underlying file
    file: ManuallyDrop<File>,

    /// path of file, save for deleting file later
    file_path: String,

    /// cached block count, so no `metadata` call necessary
    blocks: usize,
}

impl FileBlockDevice {
    /// Creates a new zeroed file with `blocks` blocks.
    ///
    /// The file is removed again once this device is dropped.
    pub fn new(filepath: String, blocks: usize) -> std::io::Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .truncate(true)
            .create(true)
            .open(filepath.clone())?;

        file.set_len((blocks * PAGE_SIZE) as u64)?;

        Ok(Self {
            file: ManuallyDrop::new(file),
            file_path: filepath,
            blocks,
        })
    }

    pub fn path(&self) -> &str {
        &self.file_path
    }
}

impl BlockDeviceModule for FileBlockDevice {
    fn read_block(&mut self, index: usize, dest: &mut [u8]) -> Result<(), ()> {
        debug_assert_eq!(dest.len(), PAGE_SIZE);
        debug_assert!(
            index < self.blocks,
            "illegal access, block: {}, blocks: {}",
            index,
            self.blocks
        );

        self.file
            .seek(SeekFrom::Start((index * PAGE_SIZE) as u64))
            .map_err(|_| ())?;
        self.file.read_exact(dest).map_err(|_| ())?;

        Ok(())
    }

    fn write_block(&mut self, index: usize, src: &[u8]) -> Result<(), ()> {
        debug_assert_eq!(src.len(), PAGE_SIZE);
        debug_assert!(
            index < self.blocks,
            "illegal access, block: {}, blocks: {}",
            index,
            self.blocks
        );

        self.file
            .seek(SeekFrom::Start((index * PAGE_SIZE) as u64))
            .map_err(|_| ())?;
        self.file.write_all(src).map_err(|_| ())?;

        // like rw_swap_page_sync: the block is on disk once this returns
        self.file.sync_data().map_err(|_| ())?;

        Ok(())
    }

    fn block_count(&self) -> usize {
        self.blocks
    }
}

impl Drop for FileBlockDevice {
    fn drop(&mut self) {
        // drop and close file before removing
        // note that after this call, file should never be accessed again...
        unsafe {
            ManuallyDrop::drop(&mut self.file);
        }

        if Path::new(self.file_path.as_str()).exists() {
            let _ = remove_file(self.file_path.as_str());
        }
    }
}

#[cfg(test)]
mod test {
    use super::super::test::{test_block_device_normal, BLOCK_DEVICE_TEST_BLOCKS};
    use super::FileBlockDevice;

    #[test]
    fn test_file_block_device_normal() {
        let device = FileBlockDevice::new(
            "/tmp/test_file_block_device_normal.tmp".into(),
            BLOCK_DEVICE_TEST_BLOCKS,
        )
        .unwrap();
        test_block_device_normal(device);
    }

    #[test]
    fn test_file_block_device_removed_on_drop() {
        let path = "/tmp/test_file_block_device_removed_on_drop.tmp";
        let device = FileBlockDevice::new(path.into(), 2).unwrap();
        assert_eq!(device.path(), path);
        assert!(std::path::Path::new(path).exists());

        drop(device);
        assert!(!std::path::Path::new(path).exists());
    }
}
