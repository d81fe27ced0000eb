// ONLINE CPU READER -- PRINTS THE KERNEL'S ONLINE LIST AND THE GOVERNED VIEW

use anyhow::{bail, Result};

use intelliplug::topology::{CpuTopology, SysfsTopology};
use intelliplug::tuning::GOVERNED_CORES;

pub fn run_online() -> Result<()> {
    let topo = SysfsTopology::new();
    let online = topo.online_cpus();
    if online.is_empty() {
        bail!("cannot read /sys/devices/system/cpu/online");
    }

    for cpu in &online {
        print!("{} ", cpu);
    }
    println!();
    println!("GOVERNED: {}/{}", topo.online_count(), GOVERNED_CORES);

    Ok(())
}
