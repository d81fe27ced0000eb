// INTELLIPLUG DECISION ENGINE
// MAPS THE RUN-THREAD AVERAGE TO A TARGET ONLINE-CORE COUNT (RANK)
//
// ASYMMETRIC HYSTERESIS: THE MARGIN IS ADDED TO EVERY RANK AT OR ABOVE THE
// PREVIOUS DECISION. CLIMBING NEEDS MORE LOAD THAN HOLDING, AND LEAVING A
// RANK DOWNWARD NEEDS THE LOAD TO FALL BELOW THE BARE THRESHOLD.

use crate::tuning::{ModeProfile, OperatingMode};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecisionState {
    pub last_rank: u32,
    pub hysteresis_margin: u32,
    pub fixed_point_shift: u32,
}

pub struct DecisionEngine {
    state: DecisionState,
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionEngine {
    pub fn new() -> Self {
        let full = OperatingMode::Full.profile();
        Self {
            state: DecisionState {
                last_rank: 1,
                hysteresis_margin: full.hysteresis,
                fixed_point_shift: full.table_shift,
            },
        }
    }

    // START FROM AN EXPLICIT PREVIOUS RANK
    pub fn with_last_rank(last_rank: u32) -> Self {
        let mut engine = Self::new();
        engine.state.last_rank = last_rank.max(1);
        engine
    }

    pub fn state(&self) -> DecisionState {
        self.state
    }

    pub fn last_rank(&self) -> u32 {
        self.state.last_rank
    }

    // RANK FOR `avg_load` (FSHIFT FIXED POINT) UNDER `mode`.
    // ALWAYS IN 1..=N. RECORDED AS THE PREVIOUS DECISION.
    pub fn compute_target_rank(&mut self, mode: OperatingMode, avg_load: u32) -> u32 {
        self.compute_target_rank_with(&mode.profile(), avg_load)
    }

    // SAME, AGAINST AN EXPLICIT PROFILE
    pub fn compute_target_rank_with(&mut self, profile: &ModeProfile, avg_load: u32) -> u32 {
        self.state.hysteresis_margin = profile.hysteresis;
        self.state.fixed_point_shift = profile.table_shift;

        let rank = select_rank(profile, normalize(profile, avg_load), self.state.last_rank);
        self.state.last_rank = rank;
        rank
    }
}

// BRING A KERNEL FIXED-POINT LOAD DOWN TO THE TABLE'S RESOLUTION
pub fn normalize(profile: &ModeProfile, avg_load: u32) -> u32 {
    avg_load.checked_shr(profile.shift_diff()).unwrap_or(0)
}

// PURE RANK SELECTION. THE LAST RANK IS THE SENTINEL AND NEEDS NO COMPARISON.
pub fn select_rank(profile: &ModeProfile, normalized: u32, last_rank: u32) -> u32 {
    let max_rank = profile.max_rank().max(1);
    for rank in 1..max_rank {
        let mut threshold = profile.thresholds[rank as usize - 1];
        if last_rank <= rank {
            threshold = threshold.saturating_add(profile.hysteresis);
        }
        if normalized <= threshold {
            return rank;
        }
    }
    max_rank
}
