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

use log::{debug, error, info, warn};
use try_lock::{Locked, TryLock};

use crate::{
    config::{HibernateConfig, SystemIdentity},
    error::{ConsistencyViolation, HibernateError, IoFailure, IoFailureKind, IoPhase, PreparationFailure},
    image::{
        reader::{read_suspend_image, LoadedImage},
        release_image_slots,
        writer::write_suspend_image,
    },
    modules::{
        block_device::BlockDeviceModule, memory::PhysicalMemoryModule, platform::PlatformModule,
        swap::SwapArea,
    },
    pagedir::{pagedir_order, pagedir_pages, PageDir},
    restore::{check_directory, copy_pages_back},
    signature::{Marker, SignatureManager},
    snapshot::count_and_copy_data_pages,
    stats::ImageStats,
};

/// Owns everything a hibernation or resume touches.
///
/// Only one operation runs at a time. If a second one is started while the first one is still
/// running (e.g. from a callback of one of the modules), it fails with
/// [`PreparationFailure::Busy`]. After a consistency violation the session is halted and
/// refuses any further operation.
pub struct HibernationSession<M: PhysicalMemoryModule, B: BlockDeviceModule, P: PlatformModule> {
    inner: TryLock<SessionInner<M, B, P>>,
}

struct SessionInner<M: PhysicalMemoryModule, B: BlockDeviceModule, P: PlatformModule> {
    memory: M,
    swap: SwapArea<B>,
    platform: P,
    config: HibernateConfig,
    identity: SystemIdentity,
    halted: bool,

    /// Image read by `read_image`, waiting to be restored
    loaded: Option<(SignatureManager, LoadedImage)>,
}

impl<M: PhysicalMemoryModule, B: BlockDeviceModule, P: PlatformModule> HibernationSession<M, B, P> {
    pub fn new(
        memory: M,
        swap: SwapArea<B>,
        platform: P,
        config: HibernateConfig,
        identity: SystemIdentity,
    ) -> Self {
        Self {
            inner: TryLock::new(SessionInner {
                memory,
                swap,
                platform,
                config,
                identity,
                halted: false,
                loaded: None,
            }),
        }
    }

    fn lock(&self) -> Result<Locked<'_, SessionInner<M, B, P>>, HibernateError> {
        let inner = self.inner.try_lock().ok_or(PreparationFailure::Busy)?;
        if inner.halted {
            return Err(HibernateError::Halted);
        }
        Ok(inner)
    }

    fn run<R>(
        &self,
        f: impl FnOnce(&mut SessionInner<M, B, P>) -> Result<R, HibernateError>,
    ) -> Result<R, HibernateError> {
        let mut inner = self.lock()?;
        let res = f(&mut inner);
        if let Err(err) = &res {
            if err.halts_session() {
                error!("{}, halting", err);
                inner.halted = true;
            }
        }
        res
    }

    /// Takes a snapshot of memory and writes it to the suspend device.
    ///
    /// On success the image is committed and the machine can be powered off.
    pub fn hibernate(&self) -> Result<ImageStats, HibernateError> {
        self.run(|inner| inner.hibernate())
    }

    /// Looks for an image on the resume device and loads it into collision free memory.
    ///
    /// Returns false if there is nothing to resume from. Nothing of the running system is
    /// changed yet, so a loaded image can still be dropped with [`Self::abort_resume`].
    pub fn read_image(&self) -> Result<bool, HibernateError> {
        self.run(|inner| inner.read_image())
    }

    /// Copies a loaded image back to its original location and reverts the marker.
    ///
    /// This can not be aborted once started.
    pub fn restore_image(&self) -> Result<ImageStats, HibernateError> {
        self.run(|inner| inner.restore_image())
    }

    /// Reads and restores an image if there is one
    pub fn resume(&self) -> Result<Option<ImageStats>, HibernateError> {
        if self.read_image()? {
            self.restore_image().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Drops a loaded image without touching the image on disk
    pub fn abort_resume(&self) -> Result<(), HibernateError> {
        self.run(|inner| {
            inner.drop_loaded();
            Ok(())
        })
    }

    /// Turns the resume device back into plain swap, e.g. after an incompatible image was found.
    ///
    /// Returns false if the device did not hold an image.
    pub fn discard_image(&self) -> Result<bool, HibernateError> {
        self.run(|inner| inner.discard_image())
    }

    /// Returns true if the session was stopped by a consistency violation.
    /// Also false while another operation is running.
    pub fn is_halted(&self) -> bool {
        self.inner.try_lock().map_or(false, |inner| inner.halted)
    }

    /// Gives access to the modules, e.g. to change memory between operations
    pub fn with_components<R>(
        &self,
        f: impl FnOnce(&mut M, &mut SwapArea<B>, &mut P) -> R,
    ) -> Result<R, HibernateError> {
        let mut inner = self.inner.try_lock().ok_or(PreparationFailure::Busy)?;
        let SessionInner {
            memory,
            swap,
            platform,
            ..
        } = &mut *inner;
        Ok(f(memory, swap, platform))
    }

    /// Ends this session and returns its modules.
    ///
    /// A loaded but not restored image is released first.
    pub fn power_off(self) -> (M, SwapArea<B>, P) {
        let mut inner = self.inner.into_inner();
        inner.drop_loaded();
        (inner.memory, inner.swap, inner.platform)
    }
}

impl<M: PhysicalMemoryModule, B: BlockDeviceModule, P: PlatformModule> SessionInner<M, B, P> {
    fn hibernate(&mut self) -> Result<ImageStats, HibernateError> {
        if self.loaded.is_some() {
            warn!("Dropping loaded image to hibernate");
            self.drop_loaded();
        }

        info!("Hibernating");
        self.platform
            .prepare_suspend()
            .map_err(|_| PreparationFailure::PlatformRefused)?;

        if self.platform.freeze_all().is_err() {
            error!("Couldn't freeze tasks");
            self.platform.thaw_all();
            return Err(PreparationFailure::FreezeFailed.into());
        }

        let res = self.hibernate_frozen();
        self.platform.thaw_all();

        match &res {
            Ok(stats) => info!("Hibernation image of {} pages written", stats.pages),
            Err(err) => error!("Hibernation failed: {}", err),
        }
        res
    }

    fn hibernate_frozen(&mut self) -> Result<ImageStats, HibernateError> {
        let swap_type = self
            .swap
            .mark_suspend_device(self.config.resume_device)
            .ok_or(PreparationFailure::NoSuspendDevice)?;
        let signature = SignatureManager::new(swap_type);

        // the new image takes the place of an unused one
        let marker = signature.read(&mut self.swap).map_err(|err| match err {
            HibernateError::Io(failure) => IoFailure::new(IoPhase::Signature, failure.kind).into(),
            err => err,
        })?;
        if let Marker::Committed { entry, .. } = marker {
            warn!("Discarding unused image starting at {:?}", entry);
            self.discard_committed(&signature)?;
        }

        self.platform.local_irq_disable();
        let res = self.save_snapshot(swap_type);
        self.platform.local_irq_enable();
        self.platform.device_resume();
        let mut pagedir = res?;

        // only touch other swap devices while nobody else can use them
        let lock_devices = self.platform.tasks_frozen();
        if lock_devices {
            self.swap.lock_swapdevices();
        } else {
            warn!("Tasks are not frozen, leaving ignored swap devices enabled");
        }

        let res = write_suspend_image(
            &self.memory,
            &mut self.swap,
            &signature,
            &mut pagedir,
            &self.identity,
            &self.config,
        );

        if lock_devices {
            self.swap.lock_swapdevices();
        }

        let mut stats = ImageStats {
            pages: pagedir.nr_pbes(),
            pagedir_pages: pagedir.pages(),
            pagedir_order: pagedir.order(),
            ..Default::default()
        };
        pagedir.destroy(&mut self.memory);

        let written = res?;
        stats.slots = written.slots;
        stats.set_entry_point(written.entry_point);
        Ok(stats)
    }

    /// The critical section: counts the pages, allocates the directory and copies all pages.
    /// Runs with interrupts disabled, nothing else may allocate pages in here.
    fn save_snapshot(&mut self, swap_type: usize) -> Result<PageDir, HibernateError> {
        self.memory.drain_local_pages();
        let nr_copy_pages = count_and_copy_data_pages(&mut self.memory, None)?;

        let dir_pages = pagedir_pages(nr_copy_pages);
        let dir_block = 1 << pagedir_order(nr_copy_pages);
        let needed = nr_copy_pages + self.config.pages_for_io + dir_block;
        let free = self.memory.nr_free_pages();
        debug!(
            "pages needed: {}+{}+{}={} free: {}",
            nr_copy_pages,
            self.config.pages_for_io,
            dir_block,
            needed,
            free
        );
        if free < needed {
            return Err(PreparationFailure::NotEnoughFreePages { needed, free }.into());
        }

        // data pages, directory pages and the header, all on the suspend device
        let needed = nr_copy_pages + dir_pages + 1;
        let free = self.swap.free_slots(swap_type);
        if free < needed {
            return Err(PreparationFailure::NotEnoughSwap { needed, free }.into());
        }

        let mut pagedir = PageDir::create(&mut self.memory, nr_copy_pages)
            .map_err(|_| PreparationFailure::DirectoryAllocation)?;

        self.memory.drain_local_pages();
        self.platform.capture_context();

        let copied = match count_and_copy_data_pages(&mut self.memory, Some(&mut pagedir)) {
            Ok(copied) => copied,
            Err(violation) => {
                pagedir.destroy(&mut self.memory);
                return Err(violation.into());
            }
        };

        if copied != nr_copy_pages {
            pagedir.destroy(&mut self.memory);
            return Err(ConsistencyViolation::CountMismatch {
                counted: nr_copy_pages,
                copied,
            }
            .into());
        }

        pagedir.store(&mut self.memory);
        debug!("Snapshot of {} pages taken", copied);
        Ok(pagedir)
    }

    fn read_image(&mut self) -> Result<bool, HibernateError> {
        if self.loaded.is_some() {
            debug!("Resume: image already loaded");
            return Ok(true);
        }

        if self.config.noresume {
            info!("Resume: skipped (noresume)");
            return Ok(false);
        }

        let swap_type = match self.config.resume_device {
            Some(swap_type) => swap_type,
            None => {
                info!("Resume: no resume device configured");
                return Ok(false);
            }
        };

        if swap_type >= self.swap.device_count() {
            return Err(IoFailure::new(IoPhase::Resume, IoFailureKind::NoDevice(swap_type)).into());
        }

        let signature = SignatureManager::new(swap_type);
        match read_suspend_image(
            &mut self.memory,
            &mut self.swap,
            &signature,
            &self.identity,
            &self.config,
        )? {
            Some(image) => {
                self.loaded = Some((signature, image));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn restore_image(&mut self) -> Result<ImageStats, HibernateError> {
        let (signature, image) = self.loaded.take().ok_or(HibernateError::NoImage)?;

        if self.platform.freeze_all().is_err() {
            error!("Resume: couldn't freeze tasks");
            self.platform.thaw_all();
            self.loaded = Some((signature, image));
            return Err(PreparationFailure::FreezeFailed.into());
        }

        let LoadedImage {
            header,
            pagedir,
            entry_point,
            chain_slots,
            relocation_rejects,
            ..
        } = image;

        let expected_pbes = header.num_pbes as usize;
        let expected_order = pagedir_order(expected_pbes);

        info!("Resume: copying {} pages back", expected_pbes);
        self.platform.local_irq_disable();
        let copied = copy_pages_back(&mut self.memory, &pagedir);
        self.platform.restore_context();
        let check = if copied != expected_pbes {
            Err(ConsistencyViolation::CountMismatch {
                counted: expected_pbes,
                copied,
            })
        } else if pagedir.order() != expected_order {
            Err(ConsistencyViolation::OrderMismatch {
                expected: expected_order,
                found: pagedir.order(),
            })
        } else {
            check_directory(&self.memory, &pagedir)
        };
        self.platform.local_irq_enable();
        self.platform.device_resume();
        self.platform.thaw_all();

        let stats = ImageStats {
            pages: pagedir.nr_pbes(),
            pagedir_pages: pagedir.pages(),
            pagedir_order: pagedir.order(),
            slots: pagedir.nr_pbes() + chain_slots,
            relocation_rejects,
            entry_point: entry_point.to_raw(),
        };
        pagedir.destroy(&mut self.memory);
        check?;

        debug!("Fixing swap signatures");
        match signature.revert(&mut self.swap) {
            Ok(_) => {
                release_image_slots(&mut self.swap, signature.swap_type(), entry_point);
            }
            Err(HibernateError::Io(failure)) => {
                // memory is already restored, the next boot would find the image again
                error!("Resume: restored, but the swap signature was not reset: {}", failure);
                return Err(HibernateError::MarkerNotCleared(failure));
            }
            Err(err) => return Err(err),
        }
        info!("Resume: done");
        Ok(stats)
    }

    fn discard_image(&mut self) -> Result<bool, HibernateError> {
        self.drop_loaded();
        let swap_type = self
            .config
            .resume_device
            .ok_or(PreparationFailure::NoSuspendDevice)?;
        if swap_type >= self.swap.device_count() {
            return Err(IoFailure::new(IoPhase::Resume, IoFailureKind::NoDevice(swap_type)).into());
        }

        self.discard_committed(&SignatureManager::new(swap_type))
    }

    /// Resets the marker and releases the slots of a committed image.
    ///
    /// Returns false if there was no image to discard.
    fn discard_committed(&mut self, signature: &SignatureManager) -> Result<bool, HibernateError> {
        let entry = match signature.read(&mut self.swap)? {
            Marker::Committed { entry, .. } => Some(entry),
            _ => None,
        };

        let reverted = signature.revert(&mut self.swap)?;
        if let Some(entry) = entry {
            release_image_slots(&mut self.swap, signature.swap_type(), entry);
        }
        Ok(reverted)
    }

    fn drop_loaded(&mut self) {
        if let Some((_, image)) = self.loaded.take() {
            debug!("Releasing loaded image");
            image.pagedir.destroy(&mut self.memory);
        }
    }
}
