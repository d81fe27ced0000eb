// INTELLIPLUG LIFECYCLE TESTS
// SUSPEND / RESUME, ACTIVE FLAG, WORKER THREAD
//
// IN-MEMORY TOPOLOGY ONLY. THE THREADED TESTS POLL WITH A GENEROUS
// TIMEOUT INSTEAD OF SLEEPING FOR A FIXED NUMBER OF CYCLES.

use std::sync::Arc;
use std::time::{Duration, Instant};

use intelliplug::governor::{ControlLoop, GovernorCore};
use intelliplug::load::{FixedLoad, SharedLoad};
use intelliplug::topology::{CpuTopology, SimTopology};
use intelliplug::tuning::{DUAL_CORE_PERSISTENCE, FSHIFT, SAMPLING_INTERVAL};
use intelliplug::{Governor, LifecycleRequest, LifecycleState, Tunables};

const WAIT_LIMIT: Duration = Duration::from_secs(5);

fn full_load(n: u32) -> u32 {
    n << (FSHIFT - 3)
}

fn core_with(online: u32, eco: bool) -> (Arc<SimTopology>, Arc<GovernorCore<SimTopology>>) {
    let topo = Arc::new(SimTopology::new(online));
    let core = Arc::new(GovernorCore::new(
        Arc::clone(&topo),
        Arc::new(Tunables::new(true, eco)),
    ));
    (topo, core)
}

// POLL UNTIL `cond` HOLDS OR THE LIMIT PASSES
fn wait_until(cond: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < WAIT_LIMIT {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

// === SUSPEND / RESUME ON THE SHARED CORE ===

#[test]
fn suspend_parks_on_core_zero_highest_first() {
    let (topo, core) = core_with(4, false);
    core.enter_suspend();
    assert_eq!(topo.online_cpus(), vec![0]);
    assert_eq!(topo.transitions(), vec![(3, false), (2, false), (1, false)]);
    assert_eq!(core.lifecycle(), LifecycleState::Suspended);
}

#[test]
fn suspend_from_partial_topology() {
    let (topo, core) = core_with(2, false);
    core.enter_suspend();
    assert_eq!(topo.online_cpus(), vec![0]);
    assert_eq!(topo.transitions(), vec![(1, false)]);
}

#[test]
fn resume_full_wakes_all_four() {
    let (topo, core) = core_with(4, false);
    core.enter_suspend();
    topo.clear_transitions();

    core.leave_suspend();
    assert_eq!(topo.online_cpus(), vec![0, 1, 2, 3]);
    assert_eq!(topo.transitions(), vec![(1, true), (2, true), (3, true)]);
    assert_eq!(core.persistence(), DUAL_CORE_PERSISTENCE);
    assert_eq!(core.lifecycle(), LifecycleState::Active);
}

#[test]
fn resume_eco_wakes_two() {
    let (topo, core) = core_with(4, true);
    core.enter_suspend();
    core.leave_suspend();
    assert_eq!(topo.online_cpus(), vec![0, 1]);
    assert_eq!(core.persistence(), DUAL_CORE_PERSISTENCE);
}

#[test]
fn resume_budget_delays_scale_down() {
    // AFTER AN ECO RESUME, IDLE LOAD NEEDS THE FULL DUAL-CORE BUDGET
    let (topo, core) = core_with(4, true);
    core.enter_suspend();
    core.leave_suspend();

    let mut ctl = ControlLoop::new(Arc::clone(&core), Box::new(FixedLoad(0)));
    for _ in 0..DUAL_CORE_PERSISTENCE - 1 {
        ctl.cycle();
        assert_eq!(topo.online_count(), 2);
    }
    ctl.cycle();
    assert_eq!(topo.online_cpus(), vec![0]);
    assert_eq!(ctl.log().len(), DUAL_CORE_PERSISTENCE as usize);
}

#[test]
fn restore_brings_everything_back() {
    let (topo, core) = core_with(1, true);
    core.restore_all_online().unwrap();
    assert_eq!(topo.online_count(), 4);
}

// === ACTIVE FLAG ===

#[test]
fn inactive_loop_leaves_topology_alone() {
    let (topo, core) = core_with(1, false);
    core.tunables().set_active(false);

    let mut ctl = ControlLoop::new(Arc::clone(&core), Box::new(FixedLoad(full_load(14))));
    for _ in 0..10 {
        assert!(ctl.cycle().is_none());
    }
    assert!(topo.transitions().is_empty());

    core.tunables().set_active(true);
    let rec = ctl.cycle().unwrap();
    assert_eq!(rec.rank, 2);
    assert_eq!(topo.online_count(), 2);
}

#[test]
fn eco_cycles_never_exceed_two_cores() {
    let rising = (0..64u32).map(|n| n << 8);
    let falling = (0..64u32).rev().map(|n| n << 8);
    let spikes = [u32::MAX, 0, u32::MAX, 1 << FSHIFT, 0];
    let loads: Vec<u32> = rising.chain(falling).chain(spikes).collect();

    for start in 1..=4 {
        let (topo, core) = core_with(start, true);
        let load = SharedLoad::new(0);
        let mut ctl = ControlLoop::new(Arc::clone(&core), Box::new(load.clone()));
        for &l in &loads {
            load.set(l);
            ctl.cycle().unwrap();
            assert!(
                topo.online_count() <= 2,
                "start {} load {}: {:?} online",
                start,
                l,
                topo.online_cpus()
            );
        }
    }
}

// === WORKER THREAD ===

#[test]
fn worker_scales_up_once_activated() {
    let topo = Arc::new(SimTopology::new(1));
    let tunables = Arc::new(Tunables::new(false, false));
    let gov = Governor::start_with_delay(
        Arc::clone(&topo),
        FixedLoad(full_load(14)),
        Arc::clone(&tunables),
        Duration::from_millis(1),
    )
    .unwrap();

    // SEVERAL INERT CYCLES
    std::thread::sleep(SAMPLING_INTERVAL * 3);
    assert_eq!(topo.online_count(), 1);

    tunables.set_active(true);
    assert!(wait_until(|| topo.online_count() == 2));

    let log = gov.shutdown().unwrap();
    assert!(!log.is_empty());
    assert!(log.iter_chronological().all(|r| r.rank == 2));
}

#[test]
fn worker_suspend_resume_round_trip() {
    let topo = Arc::new(SimTopology::new(4));
    let load = SharedLoad::new(full_load(100));
    let tunables = Arc::new(Tunables::default());
    let gov = Governor::start_with_delay(
        Arc::clone(&topo),
        load.clone(),
        Arc::clone(&tunables),
        Duration::from_millis(1),
    )
    .unwrap();

    gov.suspend();
    assert_eq!(topo.online_cpus(), vec![0]);
    assert_eq!(gov.lifecycle(), LifecycleState::Suspended);

    // NO CYCLE RUNS WHILE SUSPENDED
    topo.clear_transitions();
    std::thread::sleep(SAMPLING_INTERVAL * 4);
    assert!(topo.transitions().is_empty());
    assert_eq!(topo.online_cpus(), vec![0]);

    // INACTIVE SO THE RESUMED LOOP CANNOT TOUCH THE BUDGET YET
    tunables.set_active(false);
    gov.resume();
    assert_eq!(gov.lifecycle(), LifecycleState::Active);
    assert_eq!(topo.online_count(), 4);
    assert_eq!(gov.core().persistence(), DUAL_CORE_PERSISTENCE);

    // IDLE LOAD AT 4 ONLINE: RANK 1 DRAINS THE BUDGET WITHOUT HOTPLUG
    load.set(0);
    tunables.set_active(true);
    assert!(wait_until(|| gov.core().persistence() < DUAL_CORE_PERSISTENCE));
    assert_eq!(topo.online_count(), 4);

    gov.shutdown().unwrap();
}

#[test]
fn suspend_twice_is_harmless() {
    let topo = Arc::new(SimTopology::new(3));
    let gov = Governor::start_with_delay(
        Arc::clone(&topo),
        FixedLoad(0),
        Arc::new(Tunables::default()),
        Duration::from_secs(60),
    )
    .unwrap();

    gov.suspend();
    gov.suspend();
    assert_eq!(topo.online_cpus(), vec![0]);
    assert_eq!(topo.transitions(), vec![(2, false), (1, false)]);

    let log = gov.shutdown().unwrap();
    assert!(log.is_empty());
}

#[test]
fn eco_switch_at_runtime_caps_cores() {
    let topo = Arc::new(SimTopology::new(4));
    let tunables = Arc::new(Tunables::default());
    let gov = Governor::start_with_delay(
        Arc::clone(&topo),
        FixedLoad(0),
        Arc::clone(&tunables),
        Duration::from_millis(1),
    )
    .unwrap();

    tunables.set_eco_mode(true);
    assert!(wait_until(|| topo.online_count() <= 2));
    assert!(wait_until(|| {
        tunables.hysteresis_margin() == 4 && tunables.fixed_point_shift() == 1
    }));

    gov.shutdown().unwrap();
}

#[test]
fn last_lifecycle_request_wins() {
    let topo = Arc::new(SimTopology::new(4));
    let gov = Governor::start_with_delay(
        Arc::clone(&topo),
        FixedLoad(full_load(100)),
        Arc::new(Tunables::default()),
        Duration::from_secs(60),
    )
    .unwrap();
    let req = LifecycleRequest::new();

    // RESUME THEN SUSPEND IN ONE WINDOW: ENDS SUSPENDED
    req.request(LifecycleState::Active);
    req.request(LifecycleState::Suspended);
    if let Some(target) = req.take() {
        gov.transition_to(target);
    }
    assert_eq!(gov.lifecycle(), LifecycleState::Suspended);
    assert_eq!(topo.online_cpus(), vec![0]);

    // SUSPEND THEN RESUME: ENDS ACTIVE
    req.request(LifecycleState::Suspended);
    req.request(LifecycleState::Active);
    if let Some(target) = req.take() {
        gov.transition_to(target);
    }
    assert_eq!(gov.lifecycle(), LifecycleState::Active);
    assert_eq!(topo.online_count(), 4);

    // ALREADY ACTIVE: NO HOTPLUG
    topo.clear_transitions();
    gov.transition_to(LifecycleState::Active);
    assert!(topo.transitions().is_empty());

    gov.shutdown().unwrap();
}
