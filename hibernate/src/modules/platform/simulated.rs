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

use super::PlatformModule;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformEvent {
    PrepareSuspend,
    FreezeAll,
    ThawAll,
    IrqDisable,
    IrqEnable,
    DeviceResume,
    CaptureContext,
    RestoreContext,
}

/// Platform that records every call, for tests and the desktop demo
pub struct SimulatedPlatform {
    events: Vec<PlatformEvent>,
    frozen: bool,
    irqs_enabled: bool,

    /// `prepare_suspend` fails if set
    pub refuse_suspend: bool,

    /// `freeze_all` fails if set
    pub fail_freeze: bool,
}

impl SimulatedPlatform {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            frozen: false,
            irqs_enabled: true,
            refuse_suspend: false,
            fail_freeze: false,
        }
    }

    pub fn events(&self) -> &[PlatformEvent] {
        &self.events
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    pub fn irqs_enabled(&self) -> bool {
        self.irqs_enabled
    }
}

impl Default for SimulatedPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformModule for SimulatedPlatform {
    fn prepare_suspend(&mut self) -> Result<(), ()> {
        self.events.push(PlatformEvent::PrepareSuspend);
        if self.refuse_suspend {
            Err(())
        } else {
            Ok(())
        }
    }

    fn freeze_all(&mut self) -> Result<(), ()> {
        self.events.push(PlatformEvent::FreezeAll);
        if self.fail_freeze {
            return Err(());
        }
        self.frozen = true;
        Ok(())
    }

    fn thaw_all(&mut self) {
        self.events.push(PlatformEvent::ThawAll);
        self.frozen = false;
    }

    fn tasks_frozen(&self) -> bool {
        self.frozen
    }

    fn local_irq_disable(&mut self) {
        self.events.push(PlatformEvent::IrqDisable);
        self.irqs_enabled = false;
    }

    fn local_irq_enable(&mut self) {
        self.events.push(PlatformEvent::IrqEnable);
        self.irqs_enabled = true;
    }

    fn device_resume(&mut self) {
        self.events.push(PlatformEvent::DeviceResume);
    }

    fn capture_context(&mut self) {
        debug_assert!(!self.irqs_enabled, "context captured with interrupts enabled");
        self.events.push(PlatformEvent::CaptureContext);
    }

    fn restore_context(&mut self) {
        debug_assert!(!self.irqs_enabled, "context restored with interrupts enabled");
        self.events.push(PlatformEvent::RestoreContext);
    }
}
