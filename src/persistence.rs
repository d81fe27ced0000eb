// INTELLIPLUG PERSISTENCE COUNTER
// COOL-DOWN BEFORE A DUAL-CORE SYSTEM MAY DROP TO ONE CORE.
// RESET ON EVERY SCALE-UP RANK, DRAINED ONE STEP PER RANK-1 CYCLE.

use crate::tuning::{persistence_for_rank, DUAL_CORE_PERSISTENCE};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PersistenceCounter {
    remaining: u32,
}

impl PersistenceCounter {
    pub fn new() -> Self {
        Self { remaining: 0 }
    }

    pub fn value(&self) -> u32 {
        self.remaining
    }

    pub fn is_expired(&self) -> bool {
        self.remaining == 0
    }

    // RESET FOR A RANK 2/3/4 DECISION. OTHER RANKS LEAVE THE COUNTER ALONE.
    pub fn reset_for_rank(&mut self, rank: u32) {
        if let Some(budget) = persistence_for_rank(rank) {
            self.remaining = budget;
        }
    }

    // POST-RESUME GRACE: KEEP EXTRA CORES AWAKE FOR A DUAL-CORE BUDGET
    pub fn reset_for_resume(&mut self) {
        self.remaining = DUAL_CORE_PERSISTENCE;
    }

    pub fn tick_down(&mut self) {
        self.remaining = self.remaining.saturating_sub(1);
    }

    // RANK-1 BOOKKEEPING. RETURNS TRUE WHEN A DUAL-CORE SYSTEM MAY DROP CORE 1.
    pub fn observe_rank_one(&mut self, online: u32) -> bool {
        if online > 1 {
            self.tick_down();
        }
        online == 2 && self.is_expired()
    }
}
