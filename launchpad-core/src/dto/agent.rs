//! Agent-level DTOs

use serde::{Deserialize, Serialize};

/// Point-in-time view of the agent's capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStats {
    /// Jobs between admission and their terminal stage
    pub active: usize,
    /// Jobs waiting for a slot
    pub queued: usize,
    /// Configured slot count (`None` = unbounded)
    pub capacity: Option<usize>,
    /// Slots available for new admissions (`None` = unbounded)
    pub free_slots: Option<usize>,
    pub shutting_down: bool,
}

impl AgentStats {
    /// How many more launches the agent could admit right away
    ///
    /// Queued jobs take precedence over new work, so they are subtracted
    /// from the free slots.
    pub fn admissible(&self, unbounded_batch: usize) -> usize {
        if self.shutting_down {
            return 0;
        }
        match self.free_slots {
            Some(free) => free.saturating_sub(self.queued),
            None => unbounded_batch,
        }
    }
}

/// Request to shut the agent down
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownRequest {
    /// Let active jobs finish instead of cancelling them
    pub drain: bool,
}

impl Default for ShutdownRequest {
    fn default() -> Self {
        Self { drain: true }
    }
}
