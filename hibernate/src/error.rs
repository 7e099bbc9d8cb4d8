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

use core::fmt;

use crate::{modules::swap::SwapEntry, Pfn};

/// Hibernation could not be prepared. Nothing was written, normal operation continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreparationFailure {
    NotEnoughFreePages { needed: usize, free: usize },
    NotEnoughSwap { needed: usize, free: usize },
    NoSuspendDevice,
    DirectoryAllocation,
    FreezeFailed,
    PlatformRefused,
    /// Another attempt is currently running
    Busy,
}

/// The snapshot itself is inconsistent.
///
/// This is a hard stop: the session refuses any further work afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsistencyViolation {
    CountMismatch { counted: usize, copied: usize },
    DirectoryTooSmall { capacity: usize },
    ReservedNosave { pfn: Pfn },
    DirectoryClobbered { index: usize },
    OrderMismatch { expected: u32, found: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoPhase {
    Data,
    Directory,
    Header,
    Signature,
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoFailureKind {
    SlotsExhausted,
    ForeignSlot(SwapEntry),
    WriteFailed(SwapEntry),
    ReadFailed(SwapEntry),
    NoDevice(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoFailure {
    pub phase: IoPhase,
    pub kind: IoFailureKind,
}

impl IoFailure {
    pub(crate) fn new(phase: IoPhase, kind: IoFailureKind) -> Self {
        Self { phase, kind }
    }
}

/// The image was written by a different system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncompatibleImage {
    KernelVersion,
    MemorySize,
    MachineType,
    Version,
    CpuCount,
    PageSize,
}

/// The on-disk image is malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageCorruption {
    ChainTooShort { expected: usize, found: usize },
    ChainTooLong,
    ChainLoop(SwapEntry),
    TooManyPages(u64),
    InvalidPbe { index: usize },
    DuplicateOrigAddress { index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocationFailure {
    OutOfMemory,
    Directory { attempts: usize },
    Buffer { index: usize, attempts: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HibernateError {
    Preparation(PreparationFailure),
    Consistency(ConsistencyViolation),
    Io(IoFailure),
    Incompatible(IncompatibleImage),
    Corrupt(ImageCorruption),
    BadSignature([u8; 10]),
    Relocation(RelocationFailure),
    /// `restore_image` was called without a loaded image
    NoImage,
    /// A previous consistency violation stopped this session
    Halted,
    /// Memory was restored, but the committed marker is still on disk
    MarkerNotCleared(IoFailure),
}

impl HibernateError {
    /// Fatal errors abort the attempt in a way that can not be rolled back.
    pub fn is_fatal(&self) -> bool {
        match self {
            HibernateError::Consistency(_) | HibernateError::Halted => true,
            HibernateError::Io(failure) => failure.phase != IoPhase::Resume,
            _ => false,
        }
    }

    /// Errors after which the session must not be used any more
    pub(crate) fn halts_session(&self) -> bool {
        matches!(self, HibernateError::Consistency(_))
    }
}

impl From<PreparationFailure> for HibernateError {
    fn from(value: PreparationFailure) -> Self {
        HibernateError::Preparation(value)
    }
}

impl From<ConsistencyViolation> for HibernateError {
    fn from(value: ConsistencyViolation) -> Self {
        HibernateError::Consistency(value)
    }
}

impl From<IoFailure> for HibernateError {
    fn from(value: IoFailure) -> Self {
        HibernateError::Io(value)
    }
}

impl From<IncompatibleImage> for HibernateError {
    fn from(value: IncompatibleImage) -> Self {
        HibernateError::Incompatible(value)
    }
}

impl From<ImageCorruption> for HibernateError {
    fn from(value: ImageCorruption) -> Self {
        HibernateError::Corrupt(value)
    }
}

impl From<RelocationFailure> for HibernateError {
    fn from(value: RelocationFailure) -> Self {
        HibernateError::Relocation(value)
    }
}

impl fmt::Display for PreparationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreparationFailure::NotEnoughFreePages { needed, free } => write!(
                f,
                "Couldn't get enough free pages, on {} pages short",
                needed - free
            ),
            PreparationFailure::NotEnoughSwap { needed, free } => write!(
                f,
                "There's not enough swap space available, on {} pages short",
                needed - free
            ),
            PreparationFailure::NoSuspendDevice => write!(f, "No swap device to suspend to"),
            PreparationFailure::DirectoryAllocation => write!(f, "Couldn't allocate enough pages"),
            PreparationFailure::FreezeFailed => write!(f, "Couldn't freeze tasks"),
            PreparationFailure::PlatformRefused => write!(f, "Platform refused to suspend"),
            PreparationFailure::Busy => write!(f, "Another attempt is in progress"),
        }
    }
}

impl fmt::Display for ConsistencyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsistencyViolation::CountMismatch { counted, copied } => write!(
                f,
                "Counted {} pages but copied {} pages",
                counted, copied
            ),
            ConsistencyViolation::DirectoryTooSmall { capacity } => {
                write!(f, "More pages to copy than the directory holds ({})", capacity)
            }
            ConsistencyViolation::ReservedNosave { pfn } => {
                write!(f, "Reserved page {:#x} is marked nosave", pfn)
            }
            ConsistencyViolation::DirectoryClobbered { index } => {
                write!(f, "Directory entry {} changed while copying pages back", index)
            }
            ConsistencyViolation::OrderMismatch { expected, found } => write!(
                f,
                "Directory order is {} after resume, expected {}",
                found, expected
            ),
        }
    }
}

impl fmt::Display for IoFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self.phase {
            IoPhase::Data => "data",
            IoPhase::Directory => "pagedir",
            IoPhase::Header => "header",
            IoPhase::Signature => "signature",
            IoPhase::Resume => "resume",
        };

        match self.kind {
            IoFailureKind::SlotsExhausted => {
                write!(f, "Not enough swapspace when writing {}", phase)
            }
            IoFailureKind::ForeignSlot(entry) => write!(
                f,
                "Not enough swapspace for {} on suspend device (got slot {:?})",
                phase, entry
            ),
            IoFailureKind::WriteFailed(entry) => {
                write!(f, "Writing {} to slot {:?} failed", phase, entry)
            }
            IoFailureKind::ReadFailed(entry) => {
                write!(f, "Reading {} from slot {:?} failed", phase, entry)
            }
            IoFailureKind::NoDevice(swap_type) => {
                write!(f, "No swap device with type {} ({})", swap_type, phase)
            }
        }
    }
}

impl fmt::Display for IncompatibleImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            IncompatibleImage::KernelVersion => "Incorrect kernel version",
            IncompatibleImage::MemorySize => "Incorrect memory size",
            IncompatibleImage::MachineType => "Incorrect machine type",
            IncompatibleImage::Version => "Incorrect version",
            IncompatibleImage::CpuCount => "Incorrect number of cpus",
            IncompatibleImage::PageSize => "Incorrect PAGE_SIZE",
        };
        f.write_str(reason)
    }
}

impl fmt::Display for ImageCorruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageCorruption::ChainTooShort { expected, found } => write!(
                f,
                "Image chain ended after {} of {} pagedir pages",
                found, expected
            ),
            ImageCorruption::ChainTooLong => write!(f, "Image chain continues after the first pagedir page"),
            ImageCorruption::ChainLoop(entry) => write!(f, "Image chain visits slot {:?} twice", entry),
            ImageCorruption::TooManyPages(count) => {
                write!(f, "Image claims {} pages, more than this system has", count)
            }
            ImageCorruption::InvalidPbe { index } => write!(f, "Pagedir entry {} is invalid", index),
            ImageCorruption::DuplicateOrigAddress { index } => {
                write!(f, "Pagedir entry {} restores to an address used twice", index)
            }
        }
    }
}

impl fmt::Display for RelocationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelocationFailure::OutOfMemory => write!(f, "Out of memory while loading the image"),
            RelocationFailure::Directory { attempts } => write!(
                f,
                "No collision free memory for the pagedir after {} attempts",
                attempts
            ),
            RelocationFailure::Buffer { index, attempts } => write!(
                f,
                "No collision free page for entry {} after {} attempts",
                index, attempts
            ),
        }
    }
}

impl fmt::Display for HibernateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HibernateError::Preparation(err) => err.fmt(f),
            HibernateError::Consistency(err) => err.fmt(f),
            HibernateError::Io(err) => err.fmt(f),
            HibernateError::Incompatible(err) => err.fmt(f),
            HibernateError::Corrupt(err) => err.fmt(f),
            HibernateError::BadSignature(magic) => write!(
                f,
                "Unable to find suspended-data signature ({} - misspelled?)",
                String::from_utf8_lossy(magic)
            ),
            HibernateError::Relocation(err) => err.fmt(f),
            HibernateError::NoImage => write!(f, "No image loaded"),
            HibernateError::Halted => write!(f, "Session was halted after a consistency violation"),
            HibernateError::MarkerNotCleared(err) => {
                write!(f, "Image restored, but the swap signature was not reset: {}", err)
            }
        }
    }
}

impl std::error::Error for HibernateError {}
