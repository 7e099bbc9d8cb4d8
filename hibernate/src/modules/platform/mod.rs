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

mod simulated;

pub use simulated::{PlatformEvent, SimulatedPlatform};

/// Everything around the snapshot that is owned by other parts of the system:
/// the task freezer, device power management and the architecture code.
pub trait PlatformModule {
    /// Last chance for the architecture to refuse hibernation
    fn prepare_suspend(&mut self) -> Result<(), ()> {
        Ok(())
    }

    /// Stops all tasks and drivers so nothing else touches memory
    fn freeze_all(&mut self) -> Result<(), ()>;

    fn thaw_all(&mut self);

    fn tasks_frozen(&self) -> bool;

    fn local_irq_disable(&mut self);

    fn local_irq_enable(&mut self);

    /// Brings devices back so the image can be written
    fn device_resume(&mut self);

    /// Saves the processor state that belongs to the snapshot
    fn capture_context(&mut self);

    /// Restores the processor state once all pages are back in place
    fn restore_context(&mut self);
}
