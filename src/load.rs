// INTELLIPLUG LOAD SAMPLER
// RUN-THREAD AVERAGE IN KERNEL FIXED POINT (FSHIFT). POLLED ONCE PER CYCLE.

use std::fs;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::warn;

use crate::tuning::FSHIFT;

const PROC_STAT: &str = "/proc/stat";

// AVERAGE RUNNING THREADS << FSHIFT
pub trait LoadSource: Send {
    fn sample(&mut self) -> u32;
}

// PULL procs_running OUT OF /proc/stat CONTENT
pub fn parse_procs_running(stat: &str) -> Option<u32> {
    stat.lines()
        .find_map(|line| line.strip_prefix("procs_running"))
        .and_then(|rest| rest.trim().parse().ok())
}

// /proc/stat SAMPLER. EXCLUDES THE SAMPLING THREAD ITSELF.
// EACH SAMPLE IS AVERAGED WITH THE PREVIOUS ONE.
pub struct ProcLoad {
    path: String,
    avg: Option<u32>,
    warned: bool,
}

impl Default for ProcLoad {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcLoad {
    pub fn new() -> Self {
        Self::with_path(PROC_STAT)
    }

    pub fn with_path(path: impl Into<String>) -> Self {
        Self { path: path.into(), avg: None, warned: false }
    }

    fn read_running(&mut self) -> Option<u32> {
        let parsed = fs::read_to_string(&self.path)
            .ok()
            .as_deref()
            .and_then(parse_procs_running);
        if parsed.is_none() && !self.warned {
            warn!("LOAD: CANNOT READ procs_running FROM {}", self.path);
            self.warned = true;
        }
        parsed
    }
}

impl LoadSource for ProcLoad {
    fn sample(&mut self) -> u32 {
        let Some(running) = self.read_running() else {
            return self.avg.unwrap_or(0);
        };
        let now = running.saturating_sub(1).saturating_mul(1 << FSHIFT);
        let avg = match self.avg {
            Some(prev) => ((prev as u64 + now as u64) / 2) as u32,
            None => now,
        };
        self.avg = Some(avg);
        avg
    }
}

pub struct FixedLoad(pub u32);

impl LoadSource for FixedLoad {
    fn sample(&mut self) -> u32 {
        self.0
    }
}

// SETTABLE FROM ANOTHER THREAD WHILE THE GOVERNOR RUNS
#[derive(Clone, Default)]
pub struct SharedLoad {
    value: Arc<AtomicU32>,
}

impl SharedLoad {
    pub fn new(value: u32) -> Self {
        Self { value: Arc::new(AtomicU32::new(value)) }
    }

    pub fn set(&self, value: u32) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u32 {
        self.value.load(Ordering::Relaxed)
    }
}

impl LoadSource for SharedLoad {
    fn sample(&mut self) -> u32 {
        self.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAT: &str = "cpu  10 0 5 100 0 0 0 0 0 0\n\
                        ctxt 12345\n\
                        procs_running 3\n\
                        procs_blocked 0\n";

    #[test]
    fn parses_procs_running() {
        assert_eq!(parse_procs_running(STAT), Some(3));
        assert_eq!(parse_procs_running("cpu 1 2 3\n"), None);
    }

    #[test]
    fn proc_load_excludes_self_and_smooths() {
        let path = std::env::temp_dir().join(format!("intelliplug-stat-{}", std::process::id()));
        fs::write(&path, STAT).unwrap();
        let mut load = ProcLoad::with_path(path.to_string_lossy().into_owned());
        assert_eq!(load.sample(), 2 << FSHIFT);

        fs::write(&path, "procs_running 1\n").unwrap();
        assert_eq!(load.sample(), 1 << FSHIFT);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn proc_load_missing_file_is_zero() {
        let mut load = ProcLoad::with_path("/nonexistent/intelliplug/stat");
        assert_eq!(load.sample(), 0);
    }

    #[test]
    fn shared_load_is_shared() {
        let handle = SharedLoad::new(1);
        let mut source = handle.clone();
        handle.set(42);
        assert_eq!(source.sample(), 42);
    }
}
