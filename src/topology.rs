// INTELLIPLUG CORE TOPOLOGY
// THE HOTPLUG PRIMITIVES THE GOVERNOR DRIVES. THE OS IS THE SOURCE OF TRUTH
// FOR "ONLINE"; THE GOVERNOR NEVER CACHES IT ACROSS CYCLES.

use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use parking_lot::Mutex;
use regex::Regex;

use crate::error::TopologyError;
use crate::tuning::GOVERNED_CORES;

const SYSFS_CPU_ROOT: &str = "/sys/devices/system/cpu";

// HOTPLUG PRIMITIVES. BRING-UP AND TAKE-DOWN BLOCK UNTIL THE OS IS DONE.
pub trait CpuTopology: Send + Sync {
    fn is_online(&self, cpu: u32) -> bool;

    fn bring_online(&self, cpu: u32) -> Result<(), TopologyError>;

    fn take_offline(&self, cpu: u32) -> Result<(), TopologyError>;

    // ONLINE CORES AMONG 0..GOVERNED_CORES ONLY
    fn online_count(&self) -> u32 {
        (0..GOVERNED_CORES).filter(|&cpu| self.is_online(cpu)).count() as u32
    }
}

// --- CPU LIST PARSING ---

fn cpu_range_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d+)(?:-(\d+))?$").expect("static cpu range pattern")
    })
}

// PARSE A KERNEL CPU LIST ("0-3,6,8-9") INTO SORTED IDS. MALFORMED PARTS ARE SKIPPED.
pub fn parse_cpu_list(raw: &str) -> Vec<u32> {
    let re = cpu_range_regex();
    let mut cpus = Vec::new();
    for part in raw.trim().split(',') {
        let Some(caps) = re.captures(part.trim()) else {
            continue;
        };
        let Ok(lo) = caps[1].parse::<u32>() else {
            continue;
        };
        let hi = match caps.get(2) {
            Some(m) => match m.as_str().parse::<u32>() {
                Ok(hi) => hi,
                Err(_) => continue,
            },
            None => lo,
        };
        if hi >= lo {
            cpus.extend(lo..=hi);
        }
    }
    cpus.sort_unstable();
    cpus.dedup();
    cpus
}

// --- SYSFS ---

// REAL HOTPLUG THROUGH /sys/devices/system/cpu/cpuN/online
pub struct SysfsTopology {
    root: PathBuf,
}

impl Default for SysfsTopology {
    fn default() -> Self {
        Self::new()
    }
}

impl SysfsTopology {
    pub fn new() -> Self {
        Self { root: PathBuf::from(SYSFS_CPU_ROOT) }
    }

    // ALTERNATE ROOT (FAKE TREES IN TESTS)
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn online_path(&self, cpu: u32) -> PathBuf {
        self.root.join(format!("cpu{}", cpu)).join("online")
    }

    fn read_list(&self, name: &str) -> Vec<u32> {
        fs::read_to_string(self.root.join(name))
            .map(|raw| parse_cpu_list(&raw))
            .unwrap_or_default()
    }

    pub fn online_cpus(&self) -> Vec<u32> {
        self.read_list("online")
    }

    pub fn possible_cpus(&self) -> Vec<u32> {
        self.read_list("possible")
    }

    pub fn is_hotpluggable(&self, cpu: u32) -> bool {
        self.online_path(cpu).exists()
    }

    fn write_online(&self, cpu: u32, online: bool) -> Result<(), TopologyError> {
        if cpu >= GOVERNED_CORES {
            return Err(TopologyError::OutOfRange(cpu));
        }
        if self.is_online(cpu) == online {
            return Ok(());
        }
        if !self.is_hotpluggable(cpu) {
            return Err(TopologyError::NotHotpluggable(cpu));
        }
        fs::write(self.online_path(cpu), if online { "1" } else { "0" })
            .map_err(|source| TopologyError::Io { cpu, source })
    }
}

impl CpuTopology for SysfsTopology {
    fn is_online(&self, cpu: u32) -> bool {
        // CPU 0 USUALLY HAS NO online FILE AND IS ALWAYS UP
        match fs::read_to_string(self.online_path(cpu)) {
            Ok(s) => s.trim() == "1",
            Err(_) => self.online_cpus().contains(&cpu),
        }
    }

    fn bring_online(&self, cpu: u32) -> Result<(), TopologyError> {
        self.write_online(cpu, true)
    }

    fn take_offline(&self, cpu: u32) -> Result<(), TopologyError> {
        if cpu == 0 {
            return Err(TopologyError::NotHotpluggable(0));
        }
        self.write_online(cpu, false)
    }
}

// --- IN-MEMORY ---

// IN-MEMORY TOPOLOGY FOR DRY RUNS AND TESTS. RECORDS EVERY REAL TRANSITION.
pub struct SimTopology {
    inner: Mutex<SimInner>,
}

struct SimInner {
    online: [bool; GOVERNED_CORES as usize],
    transitions: Vec<(u32, bool)>,
    failing: Vec<u32>,
}

impl SimTopology {
    // CORES 0..online UP, CORE 0 ALWAYS
    pub fn new(online: u32) -> Self {
        let mut cores = [false; GOVERNED_CORES as usize];
        for (cpu, up) in cores.iter_mut().enumerate() {
            *up = cpu == 0 || (cpu as u32) < online;
        }
        Self {
            inner: Mutex::new(SimInner {
                online: cores,
                transitions: Vec::new(),
                failing: Vec::new(),
            }),
        }
    }

    // EVERY HOTPLUG CALL ON `cpu` FAILS FROM NOW ON
    pub fn fail_cpu(&self, cpu: u32) {
        self.inner.lock().failing.push(cpu);
    }

    pub fn online_cpus(&self) -> Vec<u32> {
        let inner = self.inner.lock();
        (0..GOVERNED_CORES).filter(|&c| inner.online[c as usize]).collect()
    }

    // (cpu, now_online) PER STATE CHANGE, OLDEST FIRST
    pub fn transitions(&self) -> Vec<(u32, bool)> {
        self.inner.lock().transitions.clone()
    }

    pub fn clear_transitions(&self) {
        self.inner.lock().transitions.clear();
    }

    fn set(&self, cpu: u32, online: bool) -> Result<(), TopologyError> {
        if cpu >= GOVERNED_CORES {
            return Err(TopologyError::OutOfRange(cpu));
        }
        let mut inner = self.inner.lock();
        if inner.failing.contains(&cpu) {
            return Err(TopologyError::Io {
                cpu,
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            });
        }
        if inner.online[cpu as usize] != online {
            inner.online[cpu as usize] = online;
            inner.transitions.push((cpu, online));
        }
        Ok(())
    }
}

impl CpuTopology for SimTopology {
    fn is_online(&self, cpu: u32) -> bool {
        cpu < GOVERNED_CORES && self.inner.lock().online[cpu as usize]
    }

    fn bring_online(&self, cpu: u32) -> Result<(), TopologyError> {
        self.set(cpu, true)
    }

    fn take_offline(&self, cpu: u32) -> Result<(), TopologyError> {
        if cpu == 0 {
            return Err(TopologyError::NotHotpluggable(0));
        }
        self.set(cpu, false)
    }
}
