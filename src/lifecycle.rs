//! Lifecycle shared by both adapters
//!
//! `Idle -> Active -> {Ended | Errored | Destroyed}`. The three terminal
//! phases are mutually exclusive and never left once entered.

use std::fmt;

/// Lifecycle phase of a readable or writable endpoint
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Constructed, no demand issued yet
    #[default]
    Idle,
    /// Demand loop running
    Active,
    /// Completed normally
    Ended,
    /// Completed with an error from the wrapped capability
    Errored,
    /// Terminated by `destroy`
    Destroyed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Ended | Phase::Errored | Phase::Destroyed)
    }

    /// Move to `next` unless already terminal.
    ///
    /// Returns `true` if the transition happened.
    pub fn advance(&mut self, next: Phase) -> bool {
        if self.is_terminal() || *self == next {
            return false;
        }
        *self = next;
        true
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Active => "active",
            Phase::Ended => "ended",
            Phase::Errored => "errored",
            Phase::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}
