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

/// Pages that are kept free on top of the image so that the
/// write-out can do I/O without running out of memory
pub const PAGES_FOR_IO: usize = 512;

/// Identifies the running system.
///
/// An image is only resumed by a system with the same identity
/// (and the same amount of memory and page size).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemIdentity {
    pub version_code: u32,
    /// Only the first 8 bytes are stored inside an image
    pub machine: String,
    /// Only the first 20 bytes are stored inside an image
    pub version: String,
    pub num_cpus: u32,
}

#[derive(Debug, Clone)]
pub struct HibernateConfig {
    /// Swap type of the device that should hold the image.
    ///
    /// If unset, hibernation uses the first active swap device and
    /// resume is skipped.
    pub resume_device: Option<usize>,

    /// Skip resume, leave any image untouched
    pub noresume: bool,

    /// Free pages required in addition to the image itself
    pub pages_for_io: usize,

    /// Upper bound of rejected candidates while looking for
    /// collision free memory during resume
    pub max_relocation_attempts: usize,

    /// Log progress every `progress_interval` pages
    pub progress_interval: usize,
}

impl Default for HibernateConfig {
    fn default() -> Self {
        Self {
            resume_device: None,
            noresume: false,
            pages_for_io: PAGES_FOR_IO,
            max_relocation_attempts: 4096,
            progress_interval: 100,
        }
    }
}
