// INTELLIPLUG LIFECYCLE CONTROLLER
// PERIODIC CONTROL LOOP + SUSPEND/RESUME HOOKS
//
// ONE WORKER THREAD, PINNED TO CPU 0, PLAYS THE DELAYED WORK ITEM:
//   IT WAKES AT ITS DEADLINE, RUNS ONE CYCLE (SAMPLE -> DECIDE -> ACTUATE),
//   AND RE-ARMS ITSELF EVERY SAMPLING INTERVAL WHETHER OR NOT IT DECIDED.
// COMMANDS (SCHEDULE / CANCEL / SHUTDOWN) ARE ONLY HANDLED BETWEEN CYCLES,
// SO A CANCEL ACK MEANS NO CYCLE IS IN FLIGHT.
//
// SUSPEND FLAG + PERSISTENCE COUNTER SHARE ONE LOCK. TUNABLES ARE ATOMICS.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::actuator;
use crate::decision::{normalize, DecisionEngine, DecisionState};
use crate::error::{GovernorError, GovernorResult};
use crate::event::{now_ns, CycleRecord, DecisionLog};
use crate::load::LoadSource;
use crate::persistence::PersistenceCounter;
use crate::topology::CpuTopology;
use crate::tuning::{
    initial_delay, OperatingMode, GOVERNED_CORES, RESUME_DELAY, SAMPLING_INTERVAL,
};

// --- TUNABLES ---

// RUNTIME TUNABLES, READ/WRITE FROM ANY THREAD
//
// hysteresis_margin AND fixed_point_shift REPORT WHAT THE LAST CYCLE DECIDED
// WITH. THE MODE PROFILE IS AUTHORITATIVE: EVERY CYCLE REPUBLISHES THEM AND A
// DIFFERING OPERATOR WRITE IS LOGGED AS IGNORED, NEVER APPLIED.
pub struct Tunables {
    active: AtomicBool,
    eco_mode: AtomicBool,
    hysteresis_margin: AtomicU32,
    fixed_point_shift: AtomicU32,
}

impl Tunables {
    pub fn new(active: bool, eco_mode: bool) -> Self {
        let profile = OperatingMode::from_eco(eco_mode).profile();
        Self {
            active: AtomicBool::new(active),
            eco_mode: AtomicBool::new(eco_mode),
            hysteresis_margin: AtomicU32::new(profile.hysteresis),
            fixed_point_shift: AtomicU32::new(profile.table_shift),
        }
    }

    pub fn active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    pub fn eco_mode(&self) -> bool {
        self.eco_mode.load(Ordering::Relaxed)
    }

    pub fn set_eco_mode(&self, eco: bool) {
        self.eco_mode.store(eco, Ordering::Relaxed);
    }

    pub fn mode(&self) -> OperatingMode {
        OperatingMode::from_eco(self.eco_mode())
    }

    pub fn hysteresis_margin(&self) -> u32 {
        self.hysteresis_margin.load(Ordering::Relaxed)
    }

    pub fn set_hysteresis_margin(&self, margin: u32) {
        self.hysteresis_margin.store(margin, Ordering::Relaxed);
    }

    pub fn fixed_point_shift(&self) -> u32 {
        self.fixed_point_shift.load(Ordering::Relaxed)
    }

    pub fn set_fixed_point_shift(&self, shift: u32) {
        self.fixed_point_shift.store(shift, Ordering::Relaxed);
    }

    // SWAP IN THE DECISION'S VALUES. RETURNS WHAT WAS THERE BEFORE.
    fn publish(&self, state: &DecisionState) -> (u32, u32) {
        (
            self.hysteresis_margin.swap(state.hysteresis_margin, Ordering::Relaxed),
            self.fixed_point_shift.swap(state.fixed_point_shift, Ordering::Relaxed),
        )
    }
}

impl Default for Tunables {
    fn default() -> Self {
        Self::new(true, false)
    }
}

// --- LIFECYCLE REQUESTS ---

const REQ_NONE: u8 = 0;
const REQ_SUSPEND: u8 = 1;
const REQ_RESUME: u8 = 2;

// PENDING SUSPEND/RESUME REQUEST. LAST WRITER WINS.
// ONE ATOMIC STORE PER REQUEST, SO SIGNAL HANDLERS MAY CALL `request`.
pub struct LifecycleRequest {
    pending: AtomicU8,
}

impl LifecycleRequest {
    pub const fn new() -> Self {
        Self { pending: AtomicU8::new(REQ_NONE) }
    }

    pub fn request(&self, target: LifecycleState) {
        let code = match target {
            LifecycleState::Suspended => REQ_SUSPEND,
            LifecycleState::Active => REQ_RESUME,
        };
        self.pending.store(code, Ordering::Release);
    }

    // CONSUME THE MOST RECENT REQUEST, IF ANY
    pub fn take(&self) -> Option<LifecycleState> {
        match self.pending.swap(REQ_NONE, Ordering::Acquire) {
            REQ_SUSPEND => Some(LifecycleState::Suspended),
            REQ_RESUME => Some(LifecycleState::Active),
            _ => None,
        }
    }
}

impl Default for LifecycleRequest {
    fn default() -> Self {
        Self::new()
    }
}

// --- SHARED CORE ---

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Active,
    Suspended,
}

#[derive(Default)]
struct GovernorState {
    suspended: bool,
    persistence: PersistenceCounter,
}

// STATE SHARED BY THE WORKER AND THE SUSPEND/RESUME HOOKS
pub struct GovernorCore<T: CpuTopology> {
    state: Mutex<GovernorState>,
    tunables: Arc<Tunables>,
    topology: Arc<T>,
}

impl<T: CpuTopology> GovernorCore<T> {
    pub fn new(topology: Arc<T>, tunables: Arc<Tunables>) -> Self {
        Self {
            state: Mutex::new(GovernorState::default()),
            tunables,
            topology,
        }
    }

    pub fn tunables(&self) -> &Arc<Tunables> {
        &self.tunables
    }

    pub fn topology(&self) -> &Arc<T> {
        &self.topology
    }

    pub fn lifecycle(&self) -> LifecycleState {
        if self.state.lock().suspended {
            LifecycleState::Suspended
        } else {
            LifecycleState::Active
        }
    }

    pub fn persistence(&self) -> u32 {
        self.state.lock().persistence.value()
    }

    // MARK SUSPENDED, THEN PARK EVERY CORE BUT 0, HIGHEST FIRST.
    // CALLER MUST HAVE STOPPED THE PERIODIC CYCLE.
    pub fn enter_suspend(&self) {
        self.state.lock().suspended = true;

        for cpu in (1..GOVERNED_CORES).rev() {
            if self.topology.is_online(cpu) {
                if let Err(e) = self.topology.take_offline(cpu) {
                    warn!("SUSPEND: {}", e);
                }
            }
        }
        info!("SUSPENDED: {} CORE(S) ONLINE", self.topology.online_count());
    }

    // CLEAR SUSPENDED WITH A FRESH DUAL-CORE PERSISTENCE BUDGET, THEN WAKE
    // CORES UP TO THE MODE CEILING, LOWEST FIRST.
    pub fn leave_suspend(&self) {
        {
            let mut state = self.state.lock();
            state.persistence.reset_for_resume();
            state.suspended = false;
        }

        let ceiling = self.tunables.mode().core_ceiling();
        for cpu in 1..ceiling {
            if !self.topology.is_online(cpu) {
                if let Err(e) = self.topology.bring_online(cpu) {
                    warn!("RESUME: {}", e);
                }
            }
        }
        info!("RESUMED: {} CORE(S) ONLINE", self.topology.online_count());
    }

    // BRING EVERY GOVERNED CORE BACK ONLINE (EXIT PATH)
    pub fn restore_all_online(&self) -> GovernorResult<()> {
        for cpu in 1..GOVERNED_CORES {
            if !self.topology.is_online(cpu) {
                self.topology.bring_online(cpu)?;
            }
        }
        Ok(())
    }
}

// --- CONTROL LOOP ---

// PER-CYCLE STATE: ENGINE, LOAD SOURCE, LOG. OWNED BY THE WORKER.
pub struct ControlLoop<T: CpuTopology> {
    core: Arc<GovernorCore<T>>,
    engine: DecisionEngine,
    load: Box<dyn LoadSource>,
    log: DecisionLog,
    published: (u32, u32),
}

impl<T: CpuTopology> ControlLoop<T> {
    pub fn new(core: Arc<GovernorCore<T>>, load: Box<dyn LoadSource>) -> Self {
        let published = (core.tunables.hysteresis_margin(), core.tunables.fixed_point_shift());
        Self {
            core,
            engine: DecisionEngine::new(),
            load,
            log: DecisionLog::new(),
            published,
        }
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    pub fn log(&self) -> &DecisionLog {
        &self.log
    }

    pub fn into_log(self) -> DecisionLog {
        self.log
    }

    // ONE CYCLE. NONE WHEN INACTIVE OR SUSPENDED.
    pub fn cycle(&mut self) -> Option<CycleRecord> {
        let tunables = Arc::clone(&self.core.tunables);
        if !tunables.active() {
            return None;
        }
        // FLAG READ WITHOUT HOLDING THE LOCK ACROSS THE DECISION
        if self.core.state.lock().suspended {
            return None;
        }

        let mode = tunables.mode();
        let profile = mode.profile();
        let raw = self.load.sample();
        let prev_rank = self.engine.last_rank();
        let rank = self.engine.compute_target_rank_with(&profile, raw);
        self.publish(&tunables);

        let topology = &self.core.topology;
        let online = topology.online_count();
        let eco = mode == OperatingMode::Eco;

        // BOOKKEEPING UNDER THE LOCK, HOTPLUG I/O OUTSIDE IT
        let (planned, persistence) = {
            let mut state = self.core.state.lock();
            let planned = actuator::plan(rank, eco, online, &mut state.persistence);
            (planned, state.persistence.value())
        };
        match planned {
            Ok(ops) => {
                let t = actuator::execute(topology.as_ref(), ops);
                if t.failed > 0 {
                    debug!("CYCLE: {} OF {:?} FAILED", t.failed, t.planned);
                } else if t.changed > 0 {
                    debug!("CYCLE: {} CORE(S) MOVED {:?}", t.changed, t.planned);
                }
            }
            Err(e) => error!("{}", e),
        }

        let rec = CycleRecord {
            ts_ns: 0,
            load: normalize(&profile, raw),
            rank,
            online_before: online,
            online_after: topology.online_count(),
            persistence,
            eco,
        };
        if rank != prev_rank {
            info!("RANK {} -> {} [{}] LOAD: {} ONLINE: {} -> {}",
                prev_rank, rank, mode.label(), rec.load, rec.online_before, rec.online_after);
        }
        Some(self.log.record(rec))
    }

    fn publish(&mut self, tunables: &Tunables) {
        let state = self.engine.state();
        let (margin, shift) = tunables.publish(&state);
        if margin != self.published.0 {
            warn!("HYSTERESIS_MARGIN={} IGNORED: MODE PROFILE USES {}", margin, state.hysteresis_margin);
        }
        if shift != self.published.1 {
            warn!("FIXED_POINT_SHIFT={} IGNORED: MODE PROFILE USES {}", shift, state.fixed_point_shift);
        }
        self.published = (state.hysteresis_margin, state.fixed_point_shift);
    }
}

// --- WORKER ---

enum Command {
    Schedule(Duration),
    Cancel(Sender<()>),
    Shutdown,
}

// PIN THE CALLING THREAD TO ONE CPU. BEST EFFORT.
fn pin_to_cpu(cpu: usize) -> bool {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(cpu, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) == 0
    }
}

fn worker_loop<T: CpuTopology>(
    mut control: ControlLoop<T>,
    commands: Receiver<Command>,
    first_delay: Duration,
) -> DecisionLog {
    if !pin_to_cpu(0) {
        warn!("WORKER: CANNOT PIN TO CPU 0, RUNNING UNPINNED");
    }

    let mut deadline = Some(Instant::now() + first_delay);
    loop {
        let next = match deadline {
            Some(at) => commands.recv_deadline(at),
            None => commands.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match next {
            Ok(Command::Schedule(delay)) => {
                // ALREADY PENDING: KEEP THE EXISTING DEADLINE
                if deadline.is_none() {
                    deadline = Some(Instant::now() + delay);
                }
            }
            Ok(Command::Cancel(ack)) => {
                deadline = None;
                let _ = ack.send(());
            }
            Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                control.cycle();
                deadline = Some(Instant::now() + SAMPLING_INTERVAL);
            }
        }
    }
    control.into_log()
}

// --- GOVERNOR ---

// THE RUNNING GOVERNOR: SHARED CORE + WORKER THREAD
pub struct Governor<T: CpuTopology + 'static> {
    core: Arc<GovernorCore<T>>,
    commands: Sender<Command>,
    worker: Option<JoinHandle<DecisionLog>>,
}

impl<T: CpuTopology + 'static> Governor<T> {
    // START WITH THE BOOT-TIME PHASE OFFSET
    pub fn start<L: LoadSource + 'static>(
        topology: Arc<T>,
        load: L,
        tunables: Arc<Tunables>,
    ) -> GovernorResult<Self> {
        let now_ms = now_ns() / 1_000_000;
        let delay = initial_delay(now_ms, topology.online_count());
        debug!("SCHEDULER DELAY: {:?}", delay);
        Self::start_with_delay(topology, load, tunables, delay)
    }

    pub fn start_with_delay<L: LoadSource + 'static>(
        topology: Arc<T>,
        load: L,
        tunables: Arc<Tunables>,
        first_delay: Duration,
    ) -> GovernorResult<Self> {
        let core = Arc::new(GovernorCore::new(topology, tunables));
        let control = ControlLoop::new(Arc::clone(&core), Box::new(load));
        let (tx, rx) = unbounded();

        let worker = std::thread::Builder::new()
            .name("intelliplug".into())
            .spawn(move || worker_loop(control, rx, first_delay))?;

        Ok(Self { core, commands: tx, worker: Some(worker) })
    }

    pub fn core(&self) -> &Arc<GovernorCore<T>> {
        &self.core
    }

    pub fn tunables(&self) -> &Arc<Tunables> {
        &self.core.tunables
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.core.lifecycle()
    }

    // CANCEL THE PENDING CYCLE AND WAIT OUT ANY IN-FLIGHT ONE
    fn cancel_sync(&self) -> GovernorResult<()> {
        let (ack_tx, ack_rx) = bounded(1);
        self.commands
            .send(Command::Cancel(ack_tx))
            .map_err(|_| GovernorError::WorkerGone)?;
        ack_rx.recv().map_err(|_| GovernorError::WorkerGone)
    }

    // STOP THE LOOP, THEN COLLAPSE TO CORE 0
    pub fn suspend(&self) {
        if let Err(e) = self.cancel_sync() {
            // NO WORKER MEANS NO CYCLE TO RACE WITH
            warn!("SUSPEND: {}", e);
        }
        self.core.enter_suspend();
    }

    // WAKE CORES TO THE MODE CEILING, SAMPLE AGAIN SHORTLY
    pub fn resume(&self) {
        self.core.leave_suspend();
        if self.commands.send(Command::Schedule(RESUME_DELAY)).is_err() {
            warn!("RESUME: {}", GovernorError::WorkerGone);
        }
    }

    // DRIVE TOWARD `target`. NO-OP WHEN ALREADY THERE.
    pub fn transition_to(&self, target: LifecycleState) {
        if self.lifecycle() == target {
            return;
        }
        match target {
            LifecycleState::Suspended => self.suspend(),
            LifecycleState::Active => self.resume(),
        }
    }

    // STOP THE WORKER, HAND BACK ITS DECISION LOG
    pub fn shutdown(mut self) -> GovernorResult<DecisionLog> {
        let _ = self.commands.send(Command::Shutdown);
        let worker = self.worker.take().ok_or(GovernorError::WorkerGone)?;
        worker.join().map_err(|_| GovernorError::WorkerGone)
    }
}

impl<T: CpuTopology + 'static> Drop for Governor<T> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.commands.send(Command::Shutdown);
            let _ = worker.join();
        }
    }
}
