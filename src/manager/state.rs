//! Unsaved-changes state machine
//!
//! Clean means the host matches the last committed configuration as far as
//! the engine knows; Dirty means a mutation happened since.

use crate::error;
use state_machines::state_machine;

state_machine! {
    name: ChangeMachine,
    dynamic: true,
    initial: Clean,
    states: [Clean, Dirty],
    events {
        touch {
            transition: { from: Clean, to: Dirty }
        }
        settle {
            transition: { from: Dirty, to: Clean }
        }
    }
}

/// Tracks whether the host has diverged from the committed configuration
pub struct ChangeTracker {
    machine: DynamicChangeMachine<()>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self {
            machine: ChangeMachine::new(()).into_dynamic(),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.machine.current_state() == "Dirty"
    }

    /// Record a mutation; a no-op when already Dirty
    pub fn touch(&mut self) -> error::Result<()> {
        if self.is_dirty() {
            return Ok(());
        }
        self.machine
            .handle(ChangeMachineEvent::Touch)
            .map_err(|e| error::Error::StateTransition(format!("touch: {:?}", e)))
    }

    /// Record that host and committed configuration agree again
    pub fn settle(&mut self) -> error::Result<()> {
        if !self.is_dirty() {
            return Ok(());
        }
        self.machine
            .handle(ChangeMachineEvent::Settle)
            .map_err(|e| error::Error::StateTransition(format!("settle: {:?}", e)))
    }
}

impl Default for ChangeTracker {
    fn default() -> Self {
        Self::new()
    }
}
