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

use crate::modules::swap::SwapEntry;

/// What happened while an image was written or restored
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "report", derive(serde::Serialize))]
pub struct ImageStats {
    /// Number of saved pages
    pub pages: usize,

    pub pagedir_pages: usize,
    pub pagedir_order: u32,

    /// Slots written (data, directory and header) or read back
    pub slots: usize,

    /// Candidates thrown away while looking for collision free memory
    pub relocation_rejects: usize,

    /// Header slot the marker points to, as raw swap entry
    pub entry_point: u64,
}

impl ImageStats {
    pub(crate) fn set_entry_point(&mut self, entry: SwapEntry) {
        self.entry_point = entry.to_raw();
    }
}
