// INTELLIPLUG -- LOAD-DRIVEN CPU HOTPLUG GOVERNOR
// LIBRARY CRATE: THE CONTROL CORE, TESTABLE OFFLINE AGAINST SimTopology
//
// LEAF TO ROOT:
//   tuning      THRESHOLD TABLES, MODE PROFILES, CONSTANTS
//   load        RUN-THREAD AVERAGE SAMPLER
//   decision    RANK SELECTION WITH HYSTERESIS
//   persistence SCALE-DOWN COOL-DOWN
//   actuator    PER-RANK HOTPLUG POLICY
//   topology    HOTPLUG PRIMITIVES (SYSFS, IN-MEMORY)
//   governor    WORKER LOOP, SUSPEND/RESUME, TUNABLES
//   event       PER-CYCLE DECISION LOG

pub mod actuator;
pub mod decision;
pub mod error;
pub mod event;
pub mod governor;
pub mod load;
pub mod persistence;
pub mod topology;
pub mod tuning;

pub use error::{GovernorError, GovernorResult, TopologyError};
pub use governor::{Governor, LifecycleRequest, LifecycleState, Tunables};
pub use tuning::OperatingMode;
