//! Configuration persistence: defaults, bit order, corruption, and the
//! boot-slot write gate.

use shell_firmware::settings::{CONFIG_FILE, MENU_ITEM_COUNT};
use shell_firmware::{FatalCode, Shell, ShellError};
use shell_sim::{MemVolume, SimMachine};

#[test]
fn missing_file_means_defaults() {
    let mut shell = Shell::boot(SimMachine::new(), MemVolume::new()).expect("boot");
    for i in 0..MENU_ITEM_COUNT {
        assert!(!shell.settings_mut().get(i));
    }
}

#[test]
fn unprogrammed_marker_means_defaults_and_rewrite() {
    let mut vol = MemVolume::new();
    vol.insert_file(CONFIG_FILE, vec![0xFF; MENU_ITEM_COUNT]);
    let mut shell = Shell::boot(SimMachine::new(), vol).expect("boot");

    assert!(shell.settings_mut().needs_rewrite());
    for i in 0..MENU_ITEM_COUNT {
        assert!(!shell.settings_mut().get(i));
    }
}

#[test]
fn programmed_bits_load() {
    let mut raw = vec![0u8; MENU_ITEM_COUNT];
    raw[0] = 1;
    raw[7] = 1;
    let mut vol = MemVolume::new();
    vol.insert_file(CONFIG_FILE, raw);
    let mut shell = Shell::boot(SimMachine::new(), vol).expect("boot");

    assert!(shell.settings_mut().get(0));
    assert!(!shell.settings_mut().get(1));
    assert!(shell.settings_mut().get(7));
}

#[test]
fn corrupt_byte_is_fatal_at_boot() {
    let mut raw = vec![0u8; MENU_ITEM_COUNT];
    raw[2] = 0x42;
    let mut vol = MemVolume::new();
    vol.insert_file(CONFIG_FILE, raw);

    let err = Shell::boot(SimMachine::new(), vol).unwrap_err();
    assert_eq!(err, ShellError::Fatal(FatalCode::ConfigCorrupt));
}

#[test]
fn short_file_is_corrupt() {
    let mut vol = MemVolume::new();
    vol.insert_file(CONFIG_FILE, vec![0, 1, 0]);

    let err = Shell::boot(SimMachine::new(), vol).unwrap_err();
    assert_eq!(err, ShellError::Fatal(FatalCode::ConfigCorrupt));
}

#[test]
fn save_writes_one_byte_per_bit_lowest_first() {
    let mut shell = Shell::boot(SimMachine::new(), MemVolume::new()).expect("boot");
    shell.settings_mut().set(0, true);
    shell.settings_mut().set(3, true);

    assert!(shell.save_settings().unwrap());

    let mut expected = vec![0u8; MENU_ITEM_COUNT];
    expected[0] = 1;
    expected[3] = 1;
    assert_eq!(shell.volume_mut().file(CONFIG_FILE).unwrap(), &expected[..]);
}

#[test]
fn slot_change_disables_persistence() {
    let mut shell = Shell::boot(SimMachine::new(), MemVolume::new()).expect("boot");

    shell.bus_mut().set_sd_slot(1);
    shell.run_pass().unwrap();
    assert!(!shell.dispatcher().persist_enabled());

    shell.settings_mut().set(1, true);
    assert!(!shell.save_settings().unwrap());
    assert!(shell.volume_mut().file(CONFIG_FILE).is_none());
}
