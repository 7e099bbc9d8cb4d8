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

use super::{
    get_ram_swap, get_rebooted_machine, get_test_config, get_test_identity, get_test_machine,
    get_test_session, get_test_swap, saved_frames,
};
use crate::{
    image::{reader::read_suspend_image, writer::write_suspend_image},
    modules::{
        block_device::BlockDeviceModule,
        memory::PhysicalMemoryModule,
        swap::SwapArea,
    },
    pagedir::PageDir,
    relocate::{is_collision_free, OrigAddressSet},
    signature::{Marker, SignatureManager},
    snapshot::count_and_copy_data_pages,
    HibernateConfig,
};

/// Hibernates a machine, "reboots" into a machine with a different layout and resumes.
/// Every saved frame has to be back at its original address afterwards.
fn test_roundtrip<B: BlockDeviceModule>(
    num_pages: usize,
    reserved_end: usize,
    used: usize,
    busy_after_reboot: usize,
    swap: SwapArea<B>,
) {
    let nosave = 0..reserved_end.min(2);
    let mem = get_test_machine(num_pages, reserved_end, nosave.clone(), used, 7 + used as u64);
    let expected = saved_frames(&mem);

    let free_slots = swap.free_slots(0);
    let session = get_test_session(mem, swap, get_test_config(Some(0)));
    let stats = session.hibernate().unwrap();
    assert_eq!(stats.pages, expected.len());
    assert_eq!(stats.slots, stats.pages + stats.pagedir_pages + 1);

    // writing the image does not change any saved frame
    let (mem, swap, _) = session.power_off();
    assert_eq!(saved_frames(&mem), expected);

    let mem = get_rebooted_machine(num_pages, reserved_end, nosave, busy_after_reboot);
    let free_before = mem.nr_free_pages();

    let session = get_test_session(mem, swap, get_test_config(Some(0)));
    let resumed = session.resume().unwrap().expect("image should be found");
    assert_eq!(resumed.pages, stats.pages);
    assert_eq!(resumed.entry_point, stats.entry_point);
    assert_eq!(resumed.pagedir_order, stats.pagedir_order);

    let (mut mem, mut swap, platform) = session.power_off();
    for (pfn, content) in expected.iter() {
        assert_eq!(mem.frame(*pfn), &content[..], "frame {:#x} differs", pfn);
    }
    assert_eq!(mem.nr_free_pages(), free_before);
    assert_eq!(mem.nosave_count(), 0);
    assert!(platform.irqs_enabled());

    let signature = SignatureManager::new(0);
    assert!(matches!(
        signature.read(&mut swap).unwrap(),
        Marker::Normal(_)
    ));
    assert_eq!(swap.free_slots(0), free_slots);

    // consumed, nothing to resume from anymore
    let session = get_test_session(mem, swap, get_test_config(Some(0)));
    assert_eq!(session.resume().unwrap(), None);
}

#[test]
fn test_roundtrip_empty() {
    test_roundtrip(64, 0, 0, 0, get_ram_swap(&[4]));
}

#[test]
fn test_roundtrip_reserved_only() {
    test_roundtrip(64, 8, 0, 10, get_ram_swap(&[16]));
}

#[test]
fn test_roundtrip_small() {
    test_roundtrip(256, 8, 40, 60, get_ram_swap(&[64]));
}

#[test]
fn test_roundtrip_multi_page_directory() {
    test_roundtrip(1024, 8, 400, 300, get_ram_swap(&[420]));
}

#[test]
fn test_roundtrip_swap_file() {
    test_roundtrip(
        256,
        16,
        100,
        20,
        get_test_swap("test_roundtrip_swap_file", 128),
    );
}

#[test]
fn test_orig_addresses_unique() {
    let mut mem = get_test_machine(512, 16, 0..4, 200, 99);

    // free some frames in between
    for pfn in (40..200).step_by(3) {
        mem.free_pages(pfn, 0);
    }

    let count = count_and_copy_data_pages(&mut mem, None).unwrap();
    let mut pagedir = PageDir::create(&mut mem, count).unwrap();
    assert_eq!(count_and_copy_data_pages(&mut mem, Some(&mut pagedir)), Ok(count));

    let set = OrigAddressSet::new(pagedir.pbes());
    assert!(set.is_ok(), "orig addresses are not unique");
    assert_eq!(set.unwrap().len(), count);

    pagedir.destroy(&mut mem);
}

#[test]
fn test_loaded_image_is_collision_free() {
    let mut mem = get_test_machine(512, 8, 0..2, 200, 3);
    let config = HibernateConfig {
        pages_for_io: 4,
        ..Default::default()
    };

    let count = count_and_copy_data_pages(&mut mem, None).unwrap();
    let mut pagedir = PageDir::create(&mut mem, count).unwrap();
    count_and_copy_data_pages(&mut mem, Some(&mut pagedir)).unwrap();

    let mut swap = get_ram_swap(&[300]);
    let signature = SignatureManager::new(0);
    write_suspend_image(
        &mem,
        &mut swap,
        &signature,
        &mut pagedir,
        &get_test_identity(),
        &config,
    )
    .unwrap();
    pagedir.destroy(&mut mem);

    // most free frames of the new machine are original addresses
    let mut mem = get_rebooted_machine(512, 8, 0..2, 100);
    let image = read_suspend_image(&mut mem, &mut swap, &signature, &get_test_identity(), &config)
        .unwrap()
        .unwrap();

    let set = OrigAddressSet::new(image.pagedir.pbes()).unwrap();
    assert!(image.relocation_rejects > 0);
    assert!(is_collision_free(image.pagedir.pbes(), &set));
    assert!(!set.does_collide_order(image.pagedir.address(), image.pagedir.order()));

    image.pagedir.destroy(&mut mem);
}
