// INTELLIPLUG ERROR TYPES

use thiserror::Error;

// FAILURES OF A SINGLE HOTPLUG PRIMITIVE
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("cpu{cpu}: hotplug write failed: {source}")]
    Io {
        cpu: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("cpu{0} is not hotpluggable")]
    NotHotpluggable(u32),

    #[error("cpu{0} is outside the governed range")]
    OutOfRange(u32),
}

#[derive(Debug, Error)]
pub enum GovernorError {
    #[error("run stat error: bad rank {0}")]
    InvalidRank(u32),

    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),

    #[error("governor worker is gone")]
    WorkerGone,

    #[error("cannot spawn governor worker: {0}")]
    Spawn(#[from] std::io::Error),
}

pub type GovernorResult<T> = Result<T, GovernorError>;
