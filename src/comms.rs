//! Commands and control signals shared between units.

use std::fmt;

/// A command sent from the central command to a single unit.
#[derive(Debug, Clone)]
pub enum ApplicationCommand {
    /// Ask the unit to re-read whatever parts of [`Config`](crate::Config)
    /// it caches and apply changes.
    Reconfigure,

    /// Ask the unit to shut down. A unit that receives this must drop its
    /// command channel receiver so the sender observes `.closed()`.
    Terminate,
}

impl fmt::Display for ApplicationCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reconfigure => f.write_str("Reconfigure"),
            Self::Terminate => f.write_str("Terminate"),
        }
    }
}

/// A unit terminated, whether cleanly or not. Units surface this instead of
/// panicking so the manager can log and unwind gracefully.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Terminated;

impl fmt::Display for Terminated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a unit terminated")
    }
}

impl std::error::Error for Terminated {}
