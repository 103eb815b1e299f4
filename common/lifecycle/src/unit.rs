//! Per-unit lifecycle bookkeeping shared between the supervisor and the unit's task.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use crate::error::UnitError;

/// Lifecycle of a supervised unit. Transitions only move forward:
/// `Pending -> Running -> {Cancelling -> Terminated, Errored}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum UnitState {
    Pending = 0,
    Running = 1,
    Cancelling = 2,
    Terminated = 3,
    Errored = 4,
}

impl UnitState {
    /// Terminated and Errored units are never resurrected.
    pub fn is_terminal(self) -> bool {
        matches!(self, UnitState::Terminated | UnitState::Errored)
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => UnitState::Pending,
            1 => UnitState::Running,
            2 => UnitState::Cancelling,
            3 => UnitState::Terminated,
            _ => UnitState::Errored,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UnitState::Pending => "pending",
            UnitState::Running => "running",
            UnitState::Cancelling => "cancelling",
            UnitState::Terminated => "terminated",
            UnitState::Errored => "errored",
        }
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of one unit, as returned by [`Supervisor::status`](crate::Supervisor::status).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnitStatus {
    pub state: UnitState,
    /// Set once the unit is `Errored`.
    pub error: Option<UnitError>,
}

/// State cell written by the unit's task and by `cancel_all`, read lock-free by `status`.
pub(crate) struct UnitCell {
    state: AtomicU8,
    error: Mutex<Option<UnitError>>,
}

impl UnitCell {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(UnitState::Pending as u8),
            error: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> UnitState {
        UnitState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn status(&self) -> UnitStatus {
        UnitStatus {
            state: self.state(),
            error: self
                .error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    /// Moves the unit forward to `next`. Returns false, leaving the state untouched,
    /// if the unit is already terminal, already at or past `next`, or if `next` is
    /// `Terminated` and the unit is not `Cancelling`.
    pub(crate) fn advance(&self, next: UnitState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let from = UnitState::from_u8(current);
            if from.is_terminal() || from >= next {
                return false;
            }
            if next == UnitState::Terminated && from != UnitState::Cancelling {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Marks the unit `Errored` with `reason`. The first terminal transition wins:
    /// a unit that already terminated keeps its state and no reason is recorded.
    pub(crate) fn fail(&self, reason: UnitError) -> bool {
        let mut slot = self.error.lock().unwrap_or_else(PoisonError::into_inner);
        if self.advance(UnitState::Errored) {
            *slot = Some(reason);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn transitions_only_move_forward() {
        let cell = UnitCell::new();
        assert_eq!(cell.state(), UnitState::Pending);

        assert!(cell.advance(UnitState::Running));
        assert!(!cell.advance(UnitState::Pending));
        assert!(!cell.advance(UnitState::Running));

        assert!(cell.advance(UnitState::Cancelling));
        assert!(cell.advance(UnitState::Terminated));
        assert_eq!(cell.state(), UnitState::Terminated);
    }

    #[test]
    fn only_cancelling_units_can_terminate() {
        let cell = UnitCell::new();
        assert!(!cell.advance(UnitState::Terminated));
        assert_eq!(cell.state(), UnitState::Pending);

        assert!(cell.advance(UnitState::Running));
        assert!(!cell.advance(UnitState::Terminated));
        assert_eq!(cell.state(), UnitState::Running);
    }

    #[test]
    fn terminal_states_are_final() {
        let cell = UnitCell::new();
        assert!(cell.advance(UnitState::Cancelling));
        assert!(cell.advance(UnitState::Terminated));
        assert!(!cell.fail(UnitError::Exited));
        assert_eq!(cell.status().error, None);

        let cell = UnitCell::new();
        assert!(cell.fail(UnitError::ShutdownTimeout {
            timeout: Duration::from_secs(1)
        }));
        assert!(!cell.advance(UnitState::Terminated));
        assert!(!cell.fail(UnitError::Exited));
        assert_eq!(
            cell.status(),
            UnitStatus {
                state: UnitState::Errored,
                error: Some(UnitError::ShutdownTimeout {
                    timeout: Duration::from_secs(1)
                }),
            }
        );
    }

    #[test]
    fn pending_unit_can_be_cancelled_before_it_runs() {
        let cell = UnitCell::new();
        assert!(cell.advance(UnitState::Cancelling));
        assert!(!cell.advance(UnitState::Running));
        assert_eq!(cell.state(), UnitState::Cancelling);
    }
}
