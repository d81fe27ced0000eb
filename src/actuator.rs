// INTELLIPLUG TOPOLOGY ACTUATOR
// PER-RANK TRANSITION POLICY. NOT A GENERIC "SET N CORES ONLINE": EACH RANK
// STEPS AT MOST ONE CORE UP, OR TRIMS THE CORES ABOVE IT.
//
//   RANK 1: DRAIN PERSISTENCE; DROP CORE 1 WHEN DRAINED AT 2 ONLINE; ECO DROPS 3, 2
//   RANK 2: RESET; 1 ONLINE -> CORE 1 UP, ELSE DROP 3, 2
//   RANK 3: RESET; 2 ONLINE -> CORE 2 UP, ELSE DROP 3
//   RANK 4: RESET; 3 ONLINE -> CORE 3 UP
//
// PLANNING IS PURE BOOKKEEPING. EXECUTION IS FIRE-AND-FORGET: FAILURES ARE
// LOGGED AND THE NEXT CYCLE RE-EVALUATES FROM THE OBSERVED TOPOLOGY.

use log::{debug, warn};

use crate::error::{GovernorError, GovernorResult};
use crate::persistence::PersistenceCounter;
use crate::topology::CpuTopology;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoreOp {
    Up(u32),
    Down(u32),
}

// OUTCOME OF ONE EXECUTED PLAN
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Transition {
    pub planned: Vec<CoreOp>,
    pub changed: u32,   // OPS THAT MOVED A CORE
    pub failed:  u32,   // OPS WHOSE HOTPLUG CALL FAILED
}

pub fn plan(
    rank: u32,
    eco_mode: bool,
    online: u32,
    persistence: &mut PersistenceCounter,
) -> GovernorResult<Vec<CoreOp>> {
    let mut ops = Vec::new();
    match rank {
        1 => {
            if persistence.observe_rank_one(online) {
                ops.push(CoreOp::Down(1));
            }
            if eco_mode {
                ops.push(CoreOp::Down(3));
                ops.push(CoreOp::Down(2));
            }
        }
        2 => {
            persistence.reset_for_rank(2);
            if online == 1 {
                ops.push(CoreOp::Up(1));
            } else {
                ops.push(CoreOp::Down(3));
                ops.push(CoreOp::Down(2));
            }
        }
        3 => {
            persistence.reset_for_rank(3);
            if online == 2 {
                ops.push(CoreOp::Up(2));
            } else {
                ops.push(CoreOp::Down(3));
            }
        }
        4 => {
            persistence.reset_for_rank(4);
            if online == 3 {
                ops.push(CoreOp::Up(3));
            }
        }
        bad => return Err(GovernorError::InvalidRank(bad)),
    }
    Ok(ops)
}

// RUN OPS IN ORDER. CORES ALREADY IN THE REQUESTED STATE ARE SKIPPED SILENTLY.
// TAKES NO LOCKS: HOTPLUG CALLS MAY BLOCK FOR A WHILE.
pub fn execute<T: CpuTopology + ?Sized>(topology: &T, planned: Vec<CoreOp>) -> Transition {
    let mut changed = 0;
    let mut failed = 0;
    for &op in &planned {
        let result = match op {
            CoreOp::Up(cpu) if !topology.is_online(cpu) => topology.bring_online(cpu),
            CoreOp::Down(cpu) if topology.is_online(cpu) => topology.take_offline(cpu),
            _ => continue,
        };
        match result {
            Ok(()) => {
                debug!("HOTPLUG: {:?}", op);
                changed += 1;
            }
            Err(e) => {
                warn!("HOTPLUG {:?} FAILED: {}", op, e);
                failed += 1;
            }
        }
    }
    Transition { planned, changed, failed }
}

// PLAN + EXECUTE IN ONE STEP
pub fn apply<T: CpuTopology + ?Sized>(
    topology: &T,
    rank: u32,
    eco_mode: bool,
    online: u32,
    persistence: &mut PersistenceCounter,
) -> GovernorResult<Transition> {
    let planned = plan(rank, eco_mode, online, persistence)?;
    Ok(execute(topology, planned))
}
