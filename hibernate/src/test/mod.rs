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

use core::ops::Range;

use env_logger::{Builder, Env};
use rand::{rngs::SmallRng, RngCore, SeedableRng};
use rand_xoshiro::{
    rand_core::{RngCore as _, SeedableRng as _},
    Xoshiro128StarStar,
};

use crate::{
    modules::{
        block_device::{BlockDeviceModule, FileBlockDevice, RamBlockDevice},
        memory::{FrameKind, PhysicalMemoryModule, SimulatedMemory},
        platform::SimulatedPlatform,
        swap::SwapArea,
    },
    signature::{format_swap, SwapVersion},
    HibernateConfig, HibernationSession, Pfn, SystemIdentity, PAGE_SIZE,
};

mod roundtrip;

pub(crate) fn init_logger() {
    let _ = Builder::from_env(Env::default())
        .format_module_path(false)
        .is_test(true)
        .try_init();
}

pub(crate) fn get_test_identity() -> SystemIdentity {
    SystemIdentity {
        version_code: 0x020600,
        machine: "x86_64".to_string(),
        version: "#1 SMP PREEMPT".to_string(),
        num_cpus: 2,
    }
}

/// Config for small test machines: only a few pages kept free for I/O
pub(crate) fn get_test_config(resume_device: Option<usize>) -> HibernateConfig {
    HibernateConfig {
        resume_device,
        pages_for_io: 4,
        progress_interval: 16,
        ..Default::default()
    }
}

/// Creates a machine with `num_pages` frames.
///
/// Frames `[0, reserved_end)` are reserved, `nosave_section` of them are never saved.
/// `used` single frames are allocated, every saved frame is filled with random data.
pub(crate) fn get_test_machine(
    num_pages: usize,
    reserved_end: Pfn,
    nosave_section: Range<Pfn>,
    used: usize,
    seed: u64,
) -> SimulatedMemory {
    let mut mem = SimulatedMemory::new(num_pages, reserved_end, nosave_section);
    let mut rand = SmallRng::seed_from_u64(seed);

    for _ in 0..used {
        mem.alloc_pages(0).unwrap();
    }

    let mut page = [0u8; PAGE_SIZE];
    for pfn in 0..num_pages {
        if mem.frame_kind(pfn) != FrameKind::Free {
            rand.fill_bytes(&mut page);
            mem.write_frame(pfn, &page);
        }
    }

    mem
}

/// Creates the machine a resume runs on: same size, but the booting system already
/// allocated `busy` frames at random places
pub(crate) fn get_rebooted_machine(
    num_pages: usize,
    reserved_end: Pfn,
    nosave_section: Range<Pfn>,
    busy: usize,
) -> SimulatedMemory {
    const LAYOUT_SEED: [u8; 16] = [
        83, 12, 201, 77, 150, 3, 99, 245, 18, 64, 171, 230, 5, 142, 88, 61,
    ];

    let mut mem = SimulatedMemory::new(num_pages, reserved_end, nosave_section);
    let mut rng = Xoshiro128StarStar::from_seed(LAYOUT_SEED);

    // allocate twice as much and hand back every other frame at random
    let mut allocated = vec![];
    for _ in 0..busy * 2 {
        match mem.alloc_pages(0) {
            Ok(pfn) => allocated.push(pfn),
            Err(()) => break,
        }
    }

    let mut kept = 0;
    for pfn in allocated {
        if kept < busy && rng.next_u32() % 2 == 0 {
            kept += 1;
        } else {
            mem.free_pages(pfn, 0);
        }
    }

    mem
}

/// Every frame a snapshot of `mem` has to contain, with its content
pub(crate) fn saved_frames(mem: &SimulatedMemory) -> Vec<(Pfn, Vec<u8>)> {
    (0..mem.num_physpages())
        .filter(|pfn| match mem.frame_kind(*pfn) {
            FrameKind::Reserved => !mem.in_nosave_section(*pfn),
            FrameKind::InUse => !mem.is_nosave(*pfn),
            FrameKind::Free => false,
        })
        .map(|pfn| (pfn, mem.frame(pfn).to_vec()))
        .collect()
}

/// Swap area with one formatted RAM device per entry of `blocks`
pub(crate) fn get_ram_swap(blocks: &[usize]) -> SwapArea<RamBlockDevice> {
    let mut area = SwapArea::new();
    for count in blocks {
        let mut device = RamBlockDevice::new(*count);
        format_swap(&mut device, SwapVersion::V2).unwrap();
        area.swapon(device);
    }
    area
}

/// Swap area with one formatted swap file at `/tmp/<test_name>.tmp`
pub(crate) fn get_test_swap(test_name: &str, blocks: usize) -> SwapArea<FileBlockDevice> {
    let mut device = FileBlockDevice::new(format!("/tmp/{}.tmp", test_name), blocks).unwrap();
    format_swap(&mut device, SwapVersion::V1).unwrap();
    let mut area = SwapArea::new();
    area.swapon(device);
    area
}

pub(crate) fn get_test_session<B: BlockDeviceModule>(
    memory: SimulatedMemory,
    swap: SwapArea<B>,
    config: HibernateConfig,
) -> HibernationSession<SimulatedMemory, B, SimulatedPlatform> {
    init_logger();
    HibernationSession::new(
        memory,
        swap,
        SimulatedPlatform::new(),
        config,
        get_test_identity(),
    )
}
