// INTELLIPLUG v1.1 -- LOAD-DRIVEN CPU HOTPLUG GOVERNOR
// BRINGS CORES 1-3 ONLINE/OFFLINE FROM THE RUN-THREAD AVERAGE
//
// DECISIONS HAPPEN ON ONE WORKER THREAD PINNED TO CPU 0.
// THE MAIN THREAD HANDLES: CONFIGURATION, SIGNALS, REPORTING
//
// SIGUSR1 = SUSPEND (PARK TO CORE 0), SIGUSR2 = RESUME, SIGINT/SIGTERM = EXIT

mod cli;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};

use intelliplug::load::ProcLoad;
use intelliplug::topology::{CpuTopology, SimTopology, SysfsTopology};
use intelliplug::tuning::{GOVERNED_CORES, VERSION_MAJOR, VERSION_MINOR};
use intelliplug::{Governor, LifecycleRequest, LifecycleState, Tunables};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);
// LATEST SIGUSR1/SIGUSR2 WINS WHEN BOTH LAND IN ONE POLL WINDOW
static LIFECYCLE_REQ: LifecycleRequest = LifecycleRequest::new();

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Parser)]
#[command(name = "intelliplug")]
#[command(about = "INTELLIPLUG -- LOAD-DRIVEN CPU HOTPLUG GOVERNOR")]
struct Cli {
    // PRINT DEBUG OUTPUT
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "RUN THE GOVERNOR")]
    Run(RunArgs),
    #[command(about = "CHECK HOTPLUG PREREQUISITES")]
    Check,
    #[command(about = "PRINT ONLINE CPUS")]
    Online,
    #[command(about = "PRINT THE LOAD METRIC AND THE RANK EACH MODE WOULD PICK")]
    Sample {
        // STOP AFTER N SAMPLES
        #[arg(long)]
        count: Option<u64>,
    },
}

#[derive(clap::Args, Default)]
struct RunArgs {
    // ECO MODE: CAP AT 2 CORES
    #[arg(long)]
    eco_mode: bool,

    // START WITH DECISIONS DISABLED (LOOP STAYS ALIVE)
    #[arg(long)]
    inactive: bool,

    // GOVERN AN IN-MEMORY TOPOLOGY INSTEAD OF SYSFS
    #[arg(long)]
    dry_run: bool,

    // LEAVE CORES AS THEY ARE ON EXIT
    #[arg(long)]
    no_restore: bool,

    // DUMP FULL DECISION LOG ON EXIT
    #[arg(long)]
    dump_log: bool,
}

extern "C" fn on_sigusr1(_: libc::c_int) {
    LIFECYCLE_REQ.request(LifecycleState::Suspended);
}

extern "C" fn on_sigusr2(_: libc::c_int) {
    LIFECYCLE_REQ.request(LifecycleState::Active);
}

fn install_lifecycle_signals() -> Result<()> {
    let handlers = [
        (libc::SIGUSR1, on_sigusr1 as extern "C" fn(libc::c_int)),
        (libc::SIGUSR2, on_sigusr2 as extern "C" fn(libc::c_int)),
    ];
    for (sig, handler) in handlers {
        let prev = unsafe { libc::signal(sig, handler as libc::sighandler_t) };
        if prev == libc::SIG_ERR {
            bail!("cannot install handler for signal {}", sig);
        }
    }
    Ok(())
}

fn init_logger(verbose: bool) -> Result<()> {
    let loglevel = if verbose {
        simplelog::LevelFilter::Debug
    } else {
        simplelog::LevelFilter::Info
    };

    let mut lcfg = simplelog::ConfigBuilder::new();
    lcfg.set_time_level(simplelog::LevelFilter::Error)
        .set_location_level(simplelog::LevelFilter::Off)
        .set_target_level(simplelog::LevelFilter::Off)
        .set_thread_level(simplelog::LevelFilter::Off);
    simplelog::TermLogger::init(
        loglevel,
        lcfg.build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;
    Ok(())
}

fn govern<T: CpuTopology + 'static>(topology: Arc<T>, args: &RunArgs) -> Result<()> {
    let tunables = Arc::new(Tunables::new(!args.inactive, args.eco_mode));
    let governor = Governor::start(topology, ProcLoad::new(), tunables)?;

    info!("INTELLIPLUG IS ACTIVE (CTRL+C TO EXIT)");

    while !SHUTDOWN.load(Ordering::Relaxed) {
        std::thread::sleep(POLL_INTERVAL);

        if let Some(target) = LIFECYCLE_REQ.take() {
            governor.transition_to(target);
        }
    }

    info!("INTELLIPLUG IS SHUTTING DOWN");

    let core = Arc::clone(governor.core());
    let log = governor.shutdown()?;

    if !args.no_restore {
        if let Err(e) = core.restore_all_online() {
            warn!("RESTORE FAILED: {}", e);
        }
    }

    if args.dump_log {
        log.dump();
    }
    log.summary();
    Ok(())
}

fn run(args: RunArgs) -> Result<()> {
    ctrlc::set_handler(move || {
        SHUTDOWN.store(true, Ordering::Relaxed);
    })
    .context("Error setting Ctrl-C handler")?;
    install_lifecycle_signals()?;

    info!("intelli_plug: version {}.{}", VERSION_MAJOR, VERSION_MINOR);
    info!("MODE:            {}", if args.eco_mode { "ECO" } else { "FULL" });
    info!("ACTIVE:          {}", !args.inactive);
    info!("TOPOLOGY:        {}", if args.dry_run { "IN-MEMORY" } else { "SYSFS" });

    if args.dry_run {
        return govern(Arc::new(SimTopology::new(GOVERNED_CORES)), &args);
    }

    if unsafe { libc::geteuid() } != 0 {
        bail!("CPU HOTPLUG REQUIRES ROOT (OR USE --dry-run)");
    }
    let topology = SysfsTopology::new();
    info!("ONLINE:          {:?}", topology.online_cpus());
    govern(Arc::new(topology), &args)
}

fn main() -> Result<()> {
    let opts = Cli::parse();
    init_logger(opts.verbose)?;

    match opts.command {
        None => run(RunArgs::default())?,
        Some(Command::Run(args)) => run(args)?,
        Some(Command::Check) => cli::check::run_check()?,
        Some(Command::Online) => cli::online::run_online()?,
        Some(Command::Sample { count }) => cli::sample::run_sample(count)?,
    }

    Ok(())
}
