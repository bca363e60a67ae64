//! Core read/write request servicing through the drive register files.

use shell_firmware::Shell;
use shell_sim::{MemVolume, SimMachine};

fn d64_image(seed: u8) -> Vec<u8> {
    (0..174_848u32)
        .map(|i| (i as u8).wrapping_mul(13).wrapping_add(seed))
        .collect()
}

fn mounted_shell() -> Shell<SimMachine, MemVolume> {
    let mut vol = MemVolume::new();
    vol.insert_file("/demo.d64", d64_image(0));
    let mut shell = Shell::boot(SimMachine::new(), vol).expect("boot");
    shell.mount_drive(0, "/demo.d64", false).unwrap();
    shell
}

#[test]
fn read_request_fills_the_drive_buffer() {
    let mut shell = mounted_shell();
    let expected: Vec<u8> = shell.bus_mut().image(0)[0x100..0x120].to_vec();

    shell.bus_mut().raise_read(0, 0x100, 32);
    shell.run_pass().unwrap();

    assert_eq!(&shell.bus_mut().drive_buf(0)[..32], &expected[..]);
    assert_eq!(shell.bus_mut().request_pending(0), (false, false));
    assert!(!shell.vdr().drive(0).cache_dirty());
}

#[test]
fn read_crossing_a_window_boundary() {
    let mut shell = mounted_shell();
    let expected: Vec<u8> = shell.bus_mut().image(0)[4090..4110].to_vec();

    shell.bus_mut().raise_read(0, 4090, 20);
    shell.run_pass().unwrap();

    assert_eq!(&shell.bus_mut().drive_buf(0)[..20], &expected[..]);
}

#[test]
fn acknowledge_asserted_and_released_exactly_once() {
    let mut shell = mounted_shell();
    shell.bus_mut().reset_ack_counts(0);

    shell.bus_mut().raise_read(0, 0, 16);
    shell.run_pass().unwrap();
    assert_eq!(shell.bus_mut().ack_counts(0), (1, 1));

    // no request pending: further passes must not touch the line
    shell.run_pass().unwrap();
    shell.run_pass().unwrap();
    assert_eq!(shell.bus_mut().ack_counts(0), (1, 1));

    shell.bus_mut().raise_write(0, 0, &[1, 2, 3]);
    shell.run_pass().unwrap();
    assert_eq!(shell.bus_mut().ack_counts(0), (2, 2));
}

#[test]
fn write_request_patches_the_image_and_dirties_the_cache() {
    let mut shell = mounted_shell();

    shell.bus_mut().raise_write(0, 0x2AB, &[0xDE, 0xAD, 0xBE, 0xEF]);
    shell.run_pass().unwrap();

    let image = shell.bus_mut().image(0);
    assert_eq!(&image[0x2AB..0x2AF], &[0xDE, 0xAD, 0xBE, 0xEF]);
    assert!(shell.vdr().drive(0).cache_dirty());
    assert!(!shell.vdr().drive(0).flushing());
}

#[test]
fn requests_on_unmounted_drives_are_ignored() {
    let mut vol = MemVolume::new();
    vol.insert_file("/demo.d64", d64_image(0));
    let mut shell = Shell::boot(SimMachine::new(), vol).expect("boot");

    shell.bus_mut().raise_read(0, 0, 16);
    shell.run_pass().unwrap();
    // nothing serviced: the request stays up and no acknowledge happened
    assert_eq!(shell.bus_mut().request_pending(0), (true, false));
    assert_eq!(shell.bus_mut().ack_counts(0), (0, 0));
}

#[test]
fn both_drives_serviced_in_one_pass_in_ascending_order() {
    let mut vol = MemVolume::new();
    vol.insert_file("/a.d64", d64_image(1));
    vol.insert_file("/b.d64", d64_image(2));
    let mut shell = Shell::boot(SimMachine::new(), vol).expect("boot");
    shell.mount_drive(0, "/a.d64", false).unwrap();
    shell.mount_drive(1, "/b.d64", false).unwrap();

    let want0: Vec<u8> = shell.bus_mut().image(0)[..8].to_vec();
    let want1: Vec<u8> = shell.bus_mut().image(1)[16..24].to_vec();
    shell.bus_mut().raise_read(0, 0, 8);
    shell.bus_mut().raise_read(1, 16, 8);
    shell.run_pass().unwrap();

    assert_eq!(&shell.bus_mut().drive_buf(0)[..8], &want0[..]);
    assert_eq!(&shell.bus_mut().drive_buf(1)[..8], &want1[..]);
    assert_eq!(shell.bus_mut().request_pending(0), (false, false));
    assert_eq!(shell.bus_mut().request_pending(1), (false, false));
}
