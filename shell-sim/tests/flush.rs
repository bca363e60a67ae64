//! Deferred write-back: anti-thrash delay, bounded iterations, restart
//! on write, faithfulness of the flushed image, and the fatal path.

use shell_firmware::flush::{ANTI_THRASH_MS, FLUSH_ITER_BYTES};
use shell_firmware::{FatalCode, Shell, ShellError};
use shell_sim::{FailOp, MemVolume, SimMachine};

const IMAGE_LEN: u32 = 174_848;

fn d64_image(seed: u8) -> Vec<u8> {
    (0..IMAGE_LEN)
        .map(|i| (i as u8).wrapping_mul(17).wrapping_add(seed))
        .collect()
}

fn mounted_shell(path: &str, seed: u8) -> Shell<SimMachine, MemVolume> {
    let mut vol = MemVolume::new();
    vol.insert_file(path, d64_image(seed));
    let mut shell = Shell::boot(SimMachine::new(), vol).expect("boot");
    shell.mount_drive(0, path, false).unwrap();
    shell
}

/// Run passes until drive 0 is clean again. Panics if it never drains.
fn run_until_clean(shell: &mut Shell<SimMachine, MemVolume>) {
    for _ in 0..4000 {
        shell.run_pass().unwrap();
        if !shell.vdr().drive(0).cache_dirty() {
            return;
        }
    }
    panic!("flush never completed");
}

#[test]
fn single_write_reaches_the_file_after_the_quiet_period() {
    let mut shell = mounted_shell("/demo.d64", 9);

    shell.bus_mut().raise_write(0, 0, &[0x42]);
    shell.run_pass().unwrap();
    assert!(shell.vdr().drive(0).cache_dirty());

    shell.bus_mut().advance_ms(ANTI_THRASH_MS);
    run_until_clean(&mut shell);

    assert_eq!(shell.volume_mut().file("/demo.d64").unwrap()[0], 0x42);
    assert!(!shell.vdr().drive(0).cache_dirty());
    assert!(!shell.vdr().drive(0).flushing());
}

#[test]
fn flush_never_starts_inside_the_quiet_period() {
    let mut shell = mounted_shell("/demo.d64", 9);

    shell.bus_mut().raise_write(0, 100, &[1, 2, 3]);
    shell.run_pass().unwrap();

    // well inside the quiet period: nothing may start
    shell.bus_mut().advance_ms(ANTI_THRASH_MS / 2);
    for _ in 0..10 {
        shell.run_pass().unwrap();
        assert!(!shell.vdr().drive(0).flushing());
    }
    assert_eq!(shell.volume_mut().write_count(), 0);
}

#[test]
fn a_second_write_restarts_the_quiet_period() {
    let mut shell = mounted_shell("/demo.d64", 9);

    shell.bus_mut().raise_write(0, 0, &[1]);
    shell.run_pass().unwrap();

    // 1500 ms later: still quiet, write again
    shell.bus_mut().advance_ms(1500);
    shell.bus_mut().raise_write(0, 1, &[2]);
    shell.run_pass().unwrap();

    // 1990 ms after the second write: still not ready
    shell.bus_mut().advance_ms(1990);
    for _ in 0..5 {
        shell.run_pass().unwrap();
        assert!(!shell.vdr().drive(0).flushing());
    }

    shell.bus_mut().advance_ms(20);
    shell.run_pass().unwrap();
    shell.run_pass().unwrap();
    assert!(shell.vdr().drive(0).flushing());
}

#[test]
fn at_most_iter_size_bytes_per_pass() {
    let mut shell = mounted_shell("/demo.d64", 9);

    shell.bus_mut().raise_write(0, 0, &[0xFF; 8]);
    shell.run_pass().unwrap();
    shell.bus_mut().advance_ms(ANTI_THRASH_MS);

    // setup pass (seek + cursor capture), then bounded data passes
    shell.run_pass().unwrap();
    assert!(shell.vdr().drive(0).flushing());

    for _ in 0..20 {
        shell.volume_mut().reset_write_count();
        shell.run_pass().unwrap();
        assert!(shell.volume_mut().write_count() <= FLUSH_ITER_BYTES as u32);
    }
}

#[test]
fn write_during_flush_drops_back_to_pending() {
    let mut shell = mounted_shell("/demo.d64", 9);

    shell.bus_mut().raise_write(0, 0, &[1]);
    shell.run_pass().unwrap();
    shell.bus_mut().advance_ms(ANTI_THRASH_MS);
    shell.run_pass().unwrap();
    shell.run_pass().unwrap();
    assert!(shell.vdr().drive(0).flushing());

    shell.bus_mut().raise_write(0, 50, &[7]);
    shell.run_pass().unwrap();

    assert!(shell.vdr().drive(0).cache_dirty());
    assert!(!shell.vdr().drive(0).flushing());
}

#[test]
fn flushed_image_matches_the_cache_byte_for_byte() {
    let mut shell = mounted_shell("/demo.d64", 5);
    let mut expected = d64_image(5);

    // scattered writes, including a window crossing and the image tail
    let patches: &[(u32, &[u8])] = &[
        (10, &[0xAA, 0xBB, 0xCC]),
        (4090, &[0x11; 20]),
        (IMAGE_LEN - 3, &[0xE0, 0xE1, 0xE2]),
    ];
    for &(addr, data) in patches {
        shell.bus_mut().raise_write(0, addr, data);
        shell.run_pass().unwrap();
        for (i, &b) in data.iter().enumerate() {
            expected[addr as usize + i] = b;
        }
    }
    // a later write overlapping an earlier one: the last one wins
    shell.bus_mut().raise_write(0, 11, &[0x99]);
    shell.run_pass().unwrap();
    expected[11] = 0x99;

    shell.bus_mut().advance_ms(ANTI_THRASH_MS);
    run_until_clean(&mut shell);

    assert_eq!(shell.volume_mut().file("/demo.d64").unwrap(), &expected[..]);
}

#[test]
fn two_dirty_drives_advance_together() {
    let mut vol = MemVolume::new();
    vol.insert_file("/a.d64", d64_image(1));
    vol.insert_file("/b.d64", d64_image(2));
    let mut shell = Shell::boot(SimMachine::new(), vol).expect("boot");
    shell.mount_drive(0, "/a.d64", false).unwrap();
    shell.mount_drive(1, "/b.d64", false).unwrap();

    shell.bus_mut().raise_write(0, 0, &[1]);
    shell.bus_mut().raise_write(1, 0, &[2]);
    shell.run_pass().unwrap();
    shell.bus_mut().advance_ms(ANTI_THRASH_MS);

    // setup pass for both, then both advance in lockstep
    shell.run_pass().unwrap();
    assert!(shell.vdr().drive(0).flushing());
    assert!(shell.vdr().drive(1).flushing());

    shell.run_pass().unwrap();
    let c0 = shell.vdr().drive(0).cursor();
    let c1 = shell.vdr().drive(1).cursor();
    assert_eq!(c0.remaining, IMAGE_LEN - FLUSH_ITER_BYTES as u32);
    assert_eq!(c1.remaining, IMAGE_LEN - FLUSH_ITER_BYTES as u32);

    for _ in 0..4000 {
        shell.run_pass().unwrap();
        if !shell.vdr().drive(0).cache_dirty() && !shell.vdr().drive(1).cache_dirty() {
            break;
        }
    }
    assert!(!shell.vdr().drive(0).cache_dirty());
    assert!(!shell.vdr().drive(1).cache_dirty());
    assert_eq!(shell.volume_mut().file("/a.d64").unwrap()[0], 1);
    assert_eq!(shell.volume_mut().file("/b.d64").unwrap()[0], 2);
}

#[test]
fn write_error_during_flush_is_fatal() {
    let mut shell = mounted_shell("/demo.d64", 9);

    shell.bus_mut().raise_write(0, 0, &[1]);
    shell.run_pass().unwrap();
    shell.bus_mut().advance_ms(ANTI_THRASH_MS);
    shell.run_pass().unwrap();
    assert!(shell.vdr().drive(0).flushing());

    shell.volume_mut().fail_next(FailOp::Write);
    let err = shell.run_pass().unwrap_err();
    assert_eq!(err, ShellError::Fatal(FatalCode::FlushWrite));

    // the main loop publishes the code and halts
    shell.report_fatal(FatalCode::FlushWrite);
    assert_eq!(shell.bus_mut().cart().err, FatalCode::FlushWrite.as_u16());
}

#[test]
fn seek_error_at_flush_start_is_fatal() {
    let mut shell = mounted_shell("/demo.d64", 9);

    shell.bus_mut().raise_write(0, 0, &[1]);
    shell.run_pass().unwrap();
    shell.bus_mut().advance_ms(ANTI_THRASH_MS);

    shell.volume_mut().fail_next(FailOp::Seek);
    let err = shell.run_pass().unwrap_err();
    assert_eq!(err, ShellError::Fatal(FatalCode::FlushSeek));
}
