//! Mount/unmount protocol: strobe contents, idempotence, rejection of
//! unsupported layouts, and the menu change feed.

use shell_firmware::vdr::ImageFormat;
use shell_firmware::{Shell, ShellError};
use shell_sim::{MemVolume, SimMachine};

fn d64_image(seed: u8) -> Vec<u8> {
    (0..174_848u32)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

fn boot_with(files: Vec<(&str, Vec<u8>)>) -> Shell<SimMachine, MemVolume> {
    let mut vol = MemVolume::new();
    for (path, data) in files {
        vol.insert_file(path, data);
    }
    Shell::boot(SimMachine::new(), vol).expect("boot")
}

#[test]
fn mount_pulses_once_with_latched_metadata() {
    let mut shell = boot_with(vec![("/demo.d64", d64_image(7))]);
    shell.mount_drive(0, "/demo.d64", false).unwrap();

    let events = shell.bus_mut().mount_events(0);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].size, 174_848);
    assert_eq!(events[0].size & 0xFFFF, 0xAB00);
    assert_eq!(events[0].size >> 16, 0x0002);
    assert_eq!(events[0].image_type, 0);
    assert!(!events[0].read_only);
}

#[test]
fn mount_clears_auxiliaries_after_pulse() {
    let mut shell = boot_with(vec![("/demo.d64", d64_image(7))]);
    shell.mount_drive(0, "/demo.d64", true).unwrap();

    use shell_core::regmap::{drivereg, DEV_DRIVE_CTL, WIN_DATA, WIN_DEVICE, WIN_PAGE};
    use shell_core::Mmio;
    let bus = shell.bus_mut();
    bus.write(WIN_DEVICE, DEV_DRIVE_CTL);
    bus.write(WIN_PAGE, 0);
    assert_eq!(bus.read(WIN_DATA + drivereg::MOUNT_SIZE_LO), 0);
    assert_eq!(bus.read(WIN_DATA + drivereg::MOUNT_SIZE_HI), 0);
    assert_eq!(bus.read(WIN_DATA + drivereg::MOUNT_RO), 0);
    assert_eq!(bus.read(WIN_DATA + drivereg::MOUNT_TYPE), 0);
    assert_eq!(bus.read(WIN_DATA + drivereg::MOUNT), 0);
}

#[test]
fn image_contents_land_in_the_buffer() {
    let data = d64_image(3);
    let mut shell = boot_with(vec![("/demo.d64", data.clone())]);
    shell.mount_drive(0, "/demo.d64", false).unwrap();

    let image = shell.bus_mut().image(0);
    assert_eq!(&image[..data.len()], &data[..]);
}

#[test]
fn remount_of_same_image_is_a_no_op() {
    let mut shell = boot_with(vec![("/demo.d64", d64_image(1))]);
    shell.mount_drive(0, "/demo.d64", false).unwrap();

    // dirty the cache, then mount the same name again
    shell.bus_mut().raise_write(0, 0, &[0x42]);
    shell.run_pass().unwrap();
    assert!(shell.vdr().drive(0).cache_dirty());

    shell.mount_drive(0, "/demo.d64", false).unwrap();
    assert!(shell.vdr().drive(0).cache_dirty());
    assert_eq!(shell.bus_mut().mount_events(0).len(), 1);
}

#[test]
fn unmount_strobes_size_zero() {
    let mut shell = boot_with(vec![("/demo.d64", d64_image(1))]);
    shell.mount_drive(0, "/demo.d64", false).unwrap();
    shell.unmount_drive(0).unwrap();

    let events = shell.bus_mut().mount_events(0);
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].size, 0);
    assert!(!shell.vdr().mounted(0));
}

#[test]
fn unmount_writes_dirty_cache_back() {
    let mut shell = boot_with(vec![("/demo.d64", d64_image(1))]);
    shell.mount_drive(0, "/demo.d64", false).unwrap();

    shell.bus_mut().raise_write(0, 5, &[0xAA, 0xBB]);
    shell.run_pass().unwrap();
    shell.unmount_drive(0).unwrap();

    let file = shell.volume_mut().file("/demo.d64").unwrap();
    assert_eq!(file[5], 0xAA);
    assert_eq!(file[6], 0xBB);
}

#[test]
fn forty_track_image_gets_type_one() {
    let data: Vec<u8> = vec![0x55; 196_608];
    let mut shell = boot_with(vec![("/big.d64", data)]);
    shell.mount_drive(1, "/big.d64", false).unwrap();

    let events = shell.bus_mut().mount_events(1);
    assert_eq!(events[0].image_type, ImageFormat::Disk40.id());
}

#[test]
fn odd_sized_image_is_rejected() {
    // a 35-track layout with appended error bytes is not a supported
    // fixed layout
    let mut shell = boot_with(vec![("/odd.d64", vec![0; 175_531])]);
    let err = shell.mount_drive(0, "/odd.d64", false).unwrap_err();
    assert_eq!(err, ShellError::UnsupportedImage { size: 175_531 });
    assert!(!shell.vdr().mounted(0));
    assert!(shell.bus_mut().mount_events(0).is_empty());
}

#[test]
fn missing_image_leaves_drive_unmounted() {
    let mut shell = boot_with(vec![]);
    let err = shell.mount_drive(0, "/nope.d64", false).unwrap_err();
    assert!(matches!(err, ShellError::ImageLoad(_)));
    assert!(!shell.vdr().mounted(0));
}

#[test]
fn menu_feed_tracks_mount_state() {
    let mut shell = boot_with(vec![("/demo.d64", d64_image(1))]);
    shell.vdr_mut().drive_mut(0).set_menu_group(Some(4));

    shell.mount_drive(0, "/demo.d64", false).unwrap();
    assert_eq!(shell.vdr_mut().take_menu_changes(), vec![(4, true)]);
    assert!(shell.vdr_mut().take_menu_changes().is_empty());

    shell.unmount_drive(0).unwrap();
    assert_eq!(shell.vdr_mut().take_menu_changes(), vec![(4, false)]);
}

#[test]
fn hot_swap_inhibits_then_mount_restarts_card() {
    let mut shell = boot_with(vec![("/demo.d64", d64_image(1))]);

    shell.bus_mut().set_sd_slot(1);
    shell.run_pass().unwrap();
    assert!(shell.dispatcher().sd_changed());

    shell.mount_drive(0, "/demo.d64", false).unwrap();
    assert!(!shell.dispatcher().sd_changed());
    assert!(shell.vdr().mounted(0));
}
