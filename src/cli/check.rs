use std::io::Read;
use std::path::Path;

use anyhow::{bail, Result};

use intelliplug::load::parse_procs_running;
use intelliplug::topology::SysfsTopology;
use intelliplug::tuning::GOVERNED_CORES;

fn check_kernel_config() -> bool {
    let file = match std::fs::File::open("/proc/config.gz") {
        Ok(f) => f,
        Err(_) => {
            println!("  /proc/config.gz       NOT FOUND (SKIPPED)");
            return true;
        }
    };
    let mut decoder = flate2::read::GzDecoder::new(file);
    let mut config = String::new();
    if decoder.read_to_string(&mut config).is_err() {
        println!("  /proc/config.gz       UNREADABLE (SKIPPED)");
        return true;
    }
    let found = config.lines().any(|l| l.trim() == "CONFIG_HOTPLUG_CPU=y");
    if found {
        println!("  CONFIG_HOTPLUG_CPU    OK");
    } else {
        println!("  CONFIG_HOTPLUG_CPU    NOT FOUND -- cores cannot be taken offline");
    }
    found
}

fn check_hotplug_files(topo: &SysfsTopology) -> bool {
    let possible = topo.possible_cpus();
    let mut ok = true;
    for cpu in 1..GOVERNED_CORES {
        if !possible.contains(&cpu) {
            println!("  cpu{:<20}NOT PRESENT", cpu);
            ok = false;
        } else if topo.is_hotpluggable(cpu) {
            println!("  cpu{:<20}HOTPLUGGABLE", cpu);
        } else {
            println!("  cpu{:<20}NO online FILE", cpu);
            ok = false;
        }
    }
    ok
}

fn check_load_source() -> bool {
    let stat = std::fs::read_to_string("/proc/stat").unwrap_or_default();
    match parse_procs_running(&stat) {
        Some(n) => {
            println!("  procs_running         OK ({})", n);
            true
        }
        None => {
            println!("  procs_running         MISSING FROM /proc/stat");
            false
        }
    }
}

pub fn run_check() -> Result<()> {
    println!("INTELLIPLUG HOTPLUG CHECK");
    println!();

    let mut ok = true;

    let root = unsafe { libc::geteuid() } == 0;
    println!("  {:<22}{}", "root", if root { "OK" } else { "NO (run needs root)" });
    ok &= root;
    println!();

    println!("KERNEL CONFIG:");
    ok &= check_kernel_config();
    println!();

    println!("GOVERNED CORES:");
    let topo = SysfsTopology::new();
    if !Path::new("/sys/devices/system/cpu").exists() {
        println!("  /sys/devices/system/cpu MISSING");
        ok = false;
    } else {
        ok &= check_hotplug_files(&topo);
    }
    println!();

    println!("LOAD SOURCE:");
    ok &= check_load_source();
    println!();

    if !ok {
        bail!("SOME CHECKS FAILED");
    }
    println!("ALL CHECKS PASSED");
    Ok(())
}
