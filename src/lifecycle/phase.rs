//! The fixed phase table

use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};

/// A lifecycle phase.
///
/// Phases are totally ordered by declaration (`start` first). The forward
/// run visits every phase except [`Phase::Exit`], which only runs when the
/// lifecycle is stopped.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
    IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    /// Bean discovery; hooks registered here may still register more work
    Start,
    /// Dependency wiring and order adjustments
    Register,
    /// Route registration
    Routing,
    /// Setup hooks
    Init,
    /// Serving
    Run,
    /// Shutdown hooks
    Exit,
}

impl Phase {
    /// Position of the phase in the table
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Reverse lookup of [`Phase::index`]
    pub fn from_index(index: usize) -> Option<Phase> {
        Phase::iter().nth(index)
    }

    /// Whether the phase is excluded from the forward run
    pub const fn is_terminal(self) -> bool {
        matches!(self, Phase::Exit)
    }

    /// Phases of the forward run, in execution order
    pub fn forward() -> impl Iterator<Item = Phase> {
        Phase::iter().filter(|phase| !phase.is_terminal())
    }

    /// The phase that follows this one in the forward run
    pub fn next(self) -> Option<Phase> {
        Phase::forward().find(|phase| *phase > self)
    }
}
