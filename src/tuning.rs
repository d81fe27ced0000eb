// INTELLIPLUG TUNING TABLES
// PURE-RUST MODULE: NO SYSFS, NO THREADS
// SHARED BETWEEN THE DAEMON (governor.rs, actuator.rs) AND THE OFFLINE TESTS

use std::time::Duration;

// KERNEL FIXED-POINT RESOLUTION FOR LOAD METRICS (1.0 = 1 << FSHIFT)
pub const FSHIFT: u32 = 11;

// CORES UNDER GOVERNOR CONTROL. CORE 0 IS ALWAYS ONLINE.
pub const GOVERNED_CORES: u32 = 4;

// RUN-THREAD THRESHOLDS PER TARGET CORE COUNT
// UNITS: AVG RUNNING THREADS << TABLE SHIFT (FULL: 9 = 1.125 THREADS)
// LAST ENTRY IS THE +INF SENTINEL: ALWAYS SATISFIED

pub const THRESHOLD_SENTINEL: u32 = u32::MAX;

const FULL_THRESHOLDS: [u32; 4] = [5, 7, 9, THRESHOLD_SENTINEL];
const FULL_HYSTERESIS: u32 = 8;
const FULL_TABLE_SHIFT: u32 = 3;

const ECO_THRESHOLDS: [u32; 2] = [3, THRESHOLD_SENTINEL];
const ECO_HYSTERESIS: u32 = 4;
const ECO_TABLE_SHIFT: u32 = 1;

// PERSISTENCE: CYCLES OF RANK-1 DEMAND BEFORE DROPPING TO ONE CORE
// LOWER RANKS GET LONGER COOL-DOWN

pub const DUAL_CORE_PERSISTENCE: u32 = 50;
pub const TRI_CORE_PERSISTENCE: u32 = 40;
pub const QUAD_CORE_PERSISTENCE: u32 = 30;

// TIMING

pub const SAMPLING_INTERVAL: Duration = Duration::from_millis(50);
pub const RESUME_DELAY: Duration = Duration::from_millis(10);

pub const VERSION_MAJOR: u32 = 1;
pub const VERSION_MINOR: u32 = 1;

// OPERATING MODE

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OperatingMode {
    Full,
    Eco,
}

impl OperatingMode {
    pub fn from_eco(eco: bool) -> Self {
        if eco {
            Self::Eco
        } else {
            Self::Full
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Full => "FULL",
            Self::Eco => "ECO",
        }
    }

    // HIGHEST CORE COUNT THE MODE MAY BRING ONLINE
    pub fn core_ceiling(self) -> u32 {
        match self {
            Self::Full => GOVERNED_CORES,
            Self::Eco => 2,
        }
    }

    pub fn profile(self) -> ModeProfile {
        match self {
            Self::Full => ModeProfile {
                thresholds: &FULL_THRESHOLDS,
                hysteresis: FULL_HYSTERESIS,
                table_shift: FULL_TABLE_SHIFT,
            },
            Self::Eco => ModeProfile {
                thresholds: &ECO_THRESHOLDS,
                hysteresis: ECO_HYSTERESIS,
                table_shift: ECO_TABLE_SHIFT,
            },
        }
    }
}

// MODE PROFILE
// IMMUTABLE. ENTRY i IS THE THRESHOLD FOR RANK i + 1.

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ModeProfile {
    pub thresholds: &'static [u32],
    pub hysteresis: u32,
    pub table_shift: u32,
}

impl ModeProfile {
    // NUMBER OF RANKS (N): 4 UNDER FULL, 2 UNDER ECO
    pub fn max_rank(&self) -> u32 {
        self.thresholds.len() as u32
    }

    // RIGHT SHIFT THAT BRINGS AN FSHIFT LOAD DOWN TO TABLE RESOLUTION
    pub fn shift_diff(&self) -> u32 {
        FSHIFT.saturating_sub(self.table_shift)
    }

    pub fn threshold(&self, rank: u32) -> Option<u32> {
        if rank == 0 {
            return None;
        }
        self.thresholds.get(rank as usize - 1).copied()
    }

    // FINITE THRESHOLDS STRICTLY INCREASE AND THE TABLE ENDS WITH THE SENTINEL
    pub fn is_well_formed(&self) -> bool {
        let Some((&last, finite)) = self.thresholds.split_last() else {
            return false;
        };
        last == THRESHOLD_SENTINEL
            && finite.windows(2).all(|w| w[0] < w[1])
            && finite.iter().all(|&t| t != THRESHOLD_SENTINEL)
    }
}

// PERSISTENCE RESET VALUE FOR A SCALE-UP INTO `rank`

pub fn persistence_for_rank(rank: u32) -> Option<u32> {
    match rank {
        2 => Some(DUAL_CORE_PERSISTENCE),
        3 => Some(TRI_CORE_PERSISTENCE),
        4 => Some(QUAD_CORE_PERSISTENCE),
        _ => None,
    }
}

// FIRST-CYCLE DELAY
// ALIGN THE FIRST SAMPLE NEAR A SHARED INTERVAL BOUNDARY WHEN MULTIPLE CORES ARE UP

pub fn initial_delay(now_ms: u64, online: u32) -> Duration {
    let interval_ms = SAMPLING_INTERVAL.as_millis() as u64;
    if online > 1 {
        Duration::from_millis(interval_ms - now_ms % interval_ms)
    } else {
        SAMPLING_INTERVAL
    }
}
