//! C1 — the spin state machine.
//!
//! A particle's lifecycle is `NEUTRAL → UP → DOWN`. There is no transition
//! out of `DOWN`, and no transition skips a step.

use serde::{Deserialize, Serialize};

/// The three lifecycle states a particle may occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Spin {
    Neutral,
    Up,
    Down,
}

impl Spin {
    /// The successor of `self`, or `None` if `self` is terminal (`Down`).
    pub fn next(self) -> Option<Spin> {
        match self {
            Spin::Neutral => Some(Spin::Up),
            Spin::Up => Some(Spin::Down),
            Spin::Down => None,
        }
    }

    /// `true` if `target` is exactly `self.next()`.
    pub fn can_advance_to(self, target: Spin) -> bool {
        self.next() == Some(target)
    }
}

impl std::fmt::Display for Spin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Spin::Neutral => write!(f, "NEUTRAL"),
            Spin::Up => write!(f, "UP"),
            Spin::Down => write!(f, "DOWN"),
        }
    }
}
