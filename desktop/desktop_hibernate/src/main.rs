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

use std::process::exit;

use env_logger::{Builder, Env};
use hibernate::{
    modules::{
        block_device::FileBlockDevice,
        memory::{FrameKind, PhysicalMemoryModule, SimulatedMemory},
        platform::SimulatedPlatform,
        swap::SwapArea,
    },
    signature::{format_swap, SwapVersion},
    HibernateConfig, HibernationSession, Pfn, SystemIdentity, PAGE_SIZE,
};
use log::{error, info};
use rand::{rngs::SmallRng, RngCore, SeedableRng};

const NUM_PAGES: usize = 4096;
const RESERVED_END: Pfn = 64;
const USED_PAGES: usize = 1500;
const SWAP_BLOCKS: usize = 2048;
const SWAP_FILE: &str = "/tmp/desktop_hibernate_swap.tmp";

fn get_identity() -> SystemIdentity {
    SystemIdentity {
        version_code: 0x020600,
        machine: std::env::consts::ARCH.to_string(),
        version: "#1 desktop".to_string(),
        num_cpus: 1,
    }
}

/// Machine before hibernation, every used frame holds random data
fn boot_machine(seed: u64) -> SimulatedMemory {
    let mut mem = SimulatedMemory::new(NUM_PAGES, RESERVED_END, 0..4);
    let mut rand = SmallRng::seed_from_u64(seed);

    for _ in 0..USED_PAGES {
        if mem.alloc_pages(0).is_err() {
            break;
        }
    }

    let mut page = [0u8; PAGE_SIZE];
    for pfn in 0..NUM_PAGES {
        if mem.frame_kind(pfn) != FrameKind::Free {
            rand.fill_bytes(&mut page);
            mem.write_frame(pfn, &page);
        }
    }
    mem
}

fn saved_frames(mem: &SimulatedMemory) -> Vec<(Pfn, Vec<u8>)> {
    (0..mem.num_physpages())
        .filter(|pfn| match mem.frame_kind(*pfn) {
            FrameKind::Reserved => !mem.in_nosave_section(*pfn),
            FrameKind::InUse => !mem.is_nosave(*pfn),
            FrameKind::Free => false,
        })
        .map(|pfn| (pfn, mem.frame(pfn).to_vec()))
        .collect()
}

fn main() {
    Builder::from_env(Env::default())
        .format_module_path(false)
        .init();

    let mut device = match FileBlockDevice::new(SWAP_FILE.to_string(), SWAP_BLOCKS) {
        Ok(device) => device,
        Err(err) => {
            error!("Could not create swap file {}: {}", SWAP_FILE, err);
            exit(1);
        }
    };
    if format_swap(&mut device, SwapVersion::V2).is_err() {
        error!("Could not format swap file {}", SWAP_FILE);
        exit(1);
    }
    let mut swap = SwapArea::new();
    let swap_type = swap.swapon(device);

    let config = HibernateConfig {
        resume_device: Some(swap_type),
        ..Default::default()
    };

    let mem = boot_machine(42);
    let expected = saved_frames(&mem);
    info!("Machine has {} pages worth saving", expected.len());

    let session = HibernationSession::new(
        mem,
        swap,
        SimulatedPlatform::new(),
        config.clone(),
        get_identity(),
    );
    let written = match session.hibernate() {
        Ok(stats) => stats,
        Err(err) => {
            error!("Hibernation failed: {}", err);
            exit(1);
        }
    };
    let (_, swap, _) = session.power_off();

    // the new boot only knows its reserved frames
    let mut mem = SimulatedMemory::new(NUM_PAGES, RESERVED_END, 0..4);
    let mut rand = SmallRng::seed_from_u64(7);
    for _ in 0..200 {
        if let Ok(pfn) = mem.alloc_pages(0) {
            if rand.next_u32() % 2 == 0 {
                mem.free_pages(pfn, 0);
            }
        }
    }

    let session = HibernationSession::new(mem, swap, SimulatedPlatform::new(), config, get_identity());
    let resumed = match session.resume() {
        Ok(Some(stats)) => stats,
        Ok(None) => {
            error!("No image found after hibernation");
            exit(1);
        }
        Err(err) => {
            error!("Resume failed: {}", err);
            exit(1);
        }
    };
    let (mem, _, _) = session.power_off();

    let differing = expected
        .iter()
        .filter(|(pfn, content)| mem.frame(*pfn) != &content[..])
        .count();
    if differing != 0 {
        error!("{} frames differ after resume", differing);
        exit(1);
    }
    info!("All {} frames restored", expected.len());

    let report = serde_json::json!({
        "written": written,
        "resumed": resumed,
    });
    match serde_json::to_string_pretty(&report) {
        Ok(report) => println!("{}", report),
        Err(err) => error!("Could not serialize report: {}", err),
    }
}
