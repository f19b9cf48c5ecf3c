use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{time::EpochMs, ActivityKind, AgentStatus, ResourceDelta};

/// Read-only view of the agent's resources used to plan one cycle.
/// The daemon is responsible for producing it from the remote status call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub energy: u32,
    pub energy_max: u32,
    pub nerve: u32,
    pub nerve_max: u32,
    pub happiness: u32,
    pub happiness_max: u32,
    pub status: AgentStatus,
    /// Next-available time per kind. Absent means no cooldown.
    pub cooldowns: BTreeMap<ActivityKind, EpochMs>,
    pub captured_at: EpochMs,
}

impl ResourceSnapshot {
    pub fn cooldown_active(&self, kind: ActivityKind) -> bool {
        self.cooldowns
            .get(&kind)
            .is_some_and(|until| *until > self.captured_at)
    }

    /// Copy with a different capture time; the scheduler uses this to keep
    /// capture times strictly increasing.
    pub fn recaptured(mut self, captured_at: EpochMs) -> Self {
        self.captured_at = captured_at;
        self
    }

    /// Estimated resources after an action, saturating at zero.
    pub fn estimate_after(&self, delta: &ResourceDelta) -> Self {
        fn apply(v: u32, d: i64) -> u32 {
            (v as i64 + d).clamp(0, u32::MAX as i64) as u32
        }
        let mut next = self.clone();
        next.energy = apply(self.energy, delta.energy);
        next.nerve = apply(self.nerve, delta.nerve);
        next.happiness = apply(self.happiness, delta.happiness);
        next
    }
}
