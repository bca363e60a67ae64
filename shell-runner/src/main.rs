//! Headless Shell runner.
//!
//! Boots the firmware against the simulated machine, mounts the images a
//! JSON machine description names, optionally hands it a cartridge, runs
//! a bounded number of main-loop passes and reports what happened.
//!
//! ```text
//! shell-runner machine.json
//! ```
//!
//! with a description like:
//!
//! ```json
//! {
//!     "drives": [{ "drive": 0, "path": "demo.d64" }],
//!     "cartridge": "game.crt",
//!     "passes": 5000
//! }
//! ```

use std::fs;
use std::path::Path;
use std::process::ExitCode;

use serde::Deserialize;

use shell_firmware::crt::LoaderStatus;
use shell_firmware::{Shell, ShellError};
use shell_sim::{MemVolume, SimMachine};

#[derive(Deserialize)]
struct MachineSpec {
    #[serde(default)]
    drives: Vec<DriveSpec>,
    #[serde(default)]
    cartridge: Option<String>,
    #[serde(default = "default_passes")]
    passes: u32,
}

#[derive(Deserialize)]
struct DriveSpec {
    drive: usize,
    path: String,
    #[serde(default)]
    write_protect: bool,
}

fn default_passes() -> u32 {
    1000
}

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let Some(spec_path) = args.get(1) else {
        eprintln!("Usage: shell-runner <machine.json>");
        eprintln!("       RUST_LOG=debug shell-runner <machine.json>");
        return ExitCode::FAILURE;
    };

    match run(spec_path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("[FATAL] {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(spec_path: &str) -> Result<(), String> {
    let raw = fs::read_to_string(spec_path).map_err(|e| format!("read {spec_path}: {e}"))?;
    let spec: MachineSpec =
        serde_json::from_str(&raw).map_err(|e| format!("parse {spec_path}: {e}"))?;

    // the "card": every drive image under its basename
    let mut vol = MemVolume::new();
    let mut card_paths = Vec::new();
    for d in &spec.drives {
        let data = fs::read(&d.path).map_err(|e| format!("read {}: {e}", d.path))?;
        let name = card_name(&d.path);
        vol.insert_file(&name, data);
        card_paths.push(name);
    }

    let mut machine = SimMachine::new();
    if let Some(crt_path) = &spec.cartridge {
        let data = fs::read(crt_path).map_err(|e| format!("read {crt_path}: {e}"))?;
        machine.load_dram_bytes(0, &data);
        machine.set_cart_file(0, data.len() as u32);
    }

    let mut shell = Shell::boot(machine, vol).map_err(|e| format!("boot: {e}"))?;

    for (d, name) in spec.drives.iter().zip(&card_paths) {
        shell
            .mount_drive(d.drive, name, d.write_protect)
            .map_err(|e| format!("mount drive {}: {e}", d.drive))?;
        println!(
            "drive {}: {} mounted ({} bytes)",
            d.drive,
            name,
            shell.vdr().drive(d.drive).image_size()
        );
    }

    if spec.cartridge.is_some() {
        shell.start_cartridge();
    }

    for pass in 0..spec.passes {
        if let Err(e) = shell.run_pass() {
            if let ShellError::Fatal(code) = e {
                shell.report_fatal(code);
            }
            return Err(format!("pass {pass}: {e}"));
        }
        // one simulated millisecond between passes
        shell.bus_mut().advance_ms(1);
    }

    println!("{} passes clean", spec.passes);
    if spec.cartridge.is_some() {
        let crt = shell.crt();
        match crt.status() {
            LoaderStatus::Ready => {
                println!(
                    "cartridge \"{}\" ({:?}): {} bank(s), lo/hi active {:?}",
                    crt.name(),
                    crt.kind(),
                    crt.banks().len(),
                    crt.active_banks()
                );
            }
            status => println!("cartridge status: {status:?} {:?}", crt.error()),
        }
    }
    for d in &spec.drives {
        let rec = shell.vdr().drive(d.drive);
        println!(
            "drive {}: dirty={} flushing={}",
            d.drive,
            rec.cache_dirty(),
            rec.flushing()
        );
    }
    Ok(())
}

/// Basename of a host path, as an absolute card path.
fn card_name(path: &str) -> String {
    let base = Path::new(path)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("image");
    format!("/{base}")
}
