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

mod config;
mod error;
pub mod image;
pub mod modules;
mod page;
pub mod pagedir;
pub mod relocate;
mod restore;
mod session;
pub mod signature;
pub mod snapshot;
mod stats;
mod util;

#[cfg(test)]
mod test;

pub use config::{HibernateConfig, SystemIdentity, PAGES_FOR_IO};
pub use error::{
    ConsistencyViolation, HibernateError, ImageCorruption, IncompatibleImage, IoFailure,
    IoFailureKind, IoPhase, PreparationFailure, RelocationFailure,
};
pub use page::{order_for_pages, pfn_to_phys, phys_to_pfn, Pfn, PhysAddr, PAGE_SHIFT, PAGE_SIZE};
pub use session::HibernationSession;
pub use stats::ImageStats;
