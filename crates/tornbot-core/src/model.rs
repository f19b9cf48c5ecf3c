use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::BotError;

/// The closed set of things the agent can do.
///
/// Declaration order is the tie-break order used when two modules share a
/// priority, so the derived `Ord` is load-bearing.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Crime,
    Gym,
    Education,
    ItemUse,
    Travel,
}

impl ActivityKind {
    pub const ALL: [ActivityKind; 5] = [
        ActivityKind::Crime,
        ActivityKind::Gym,
        ActivityKind::Education,
        ActivityKind::ItemUse,
        ActivityKind::Travel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Crime => "crime",
            ActivityKind::Gym => "gym",
            ActivityKind::Education => "education",
            ActivityKind::ItemUse => "item_use",
            ActivityKind::Travel => "travel",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse agent state as reported by the remote status call.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Okay,
    Hospital,
    Jail,
    Traveling,
    Abroad,
    Other(String),
}

impl AgentStatus {
    pub fn from_remote(state: &str) -> Self {
        match state.to_ascii_lowercase().as_str() {
            "okay" => AgentStatus::Okay,
            "hospital" => AgentStatus::Hospital,
            "jail" | "federal" => AgentStatus::Jail,
            "traveling" => AgentStatus::Traveling,
            "abroad" => AgentStatus::Abroad,
            _ => AgentStatus::Other(state.to_string()),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, AgentStatus::Okay)
    }

    pub fn is_travelling(&self) -> bool {
        matches!(self, AgentStatus::Traveling | AgentStatus::Abroad)
    }
}

/// Inventory item identifier as used by the remote service.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EducationStatus {
    Idle,
    Enrolled { course_id: String, seconds_left: u64 },
    /// Course time has run out but the remote service has not marked it complete yet.
    PendingCompletion { course_id: String },
}

/// Per-variant eligibility parameters. The variant fixes the module's kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Requirement {
    Crime { min_nerve: u32 },
    Gym { min_energy: u32 },
    ItemUse { energy_threshold: u32 },
    Education,
    Travel,
}

impl Requirement {
    pub fn kind(&self) -> ActivityKind {
        match self {
            Requirement::Crime { .. } => ActivityKind::Crime,
            Requirement::Gym { .. } => ActivityKind::Gym,
            Requirement::ItemUse { .. } => ActivityKind::ItemUse,
            Requirement::Education => ActivityKind::Education,
            Requirement::Travel => ActivityKind::Travel,
        }
    }

    /// Default requirement for a kind, used to fill unconfigured slots.
    pub fn default_for(kind: ActivityKind) -> Self {
        match kind {
            ActivityKind::Crime => Requirement::Crime { min_nerve: 2 },
            ActivityKind::Gym => Requirement::Gym { min_energy: 5 },
            ActivityKind::ItemUse => Requirement::ItemUse { energy_threshold: 25 },
            ActivityKind::Education => Requirement::Education,
            ActivityKind::Travel => Requirement::Travel,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityModule {
    pub enabled: bool,
    pub priority: i32,
    pub requirement: Requirement,
}

impl ActivityModule {
    pub fn new(requirement: Requirement, enabled: bool, priority: i32) -> Self {
        Self {
            enabled,
            priority,
            requirement,
        }
    }

    pub fn kind(&self) -> ActivityKind {
        self.requirement.kind()
    }
}

/// Exactly one module per kind. Kinds not supplied are present but disabled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleSet {
    modules: BTreeMap<ActivityKind, ActivityModule>,
}

impl ModuleSet {
    pub fn new(modules: impl IntoIterator<Item = ActivityModule>) -> Result<Self, BotError> {
        let mut map = BTreeMap::new();
        for m in modules {
            let kind = m.kind();
            if map.insert(kind, m).is_some() {
                return Err(BotError::Configuration(format!(
                    "module {kind} configured more than once"
                )));
            }
        }
        for kind in ActivityKind::ALL {
            map.entry(kind)
                .or_insert_with(|| ActivityModule::new(Requirement::default_for(kind), false, 0));
        }
        Ok(Self { modules: map })
    }

    pub fn get(&self, kind: ActivityKind) -> &ActivityModule {
        // Every kind is populated by `new`.
        &self.modules[&kind]
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActivityModule> {
        self.modules.values()
    }

    pub fn enabled(&self) -> impl Iterator<Item = &ActivityModule> {
        self.modules.values().filter(|m| m.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_order_is_tie_break_order() {
        let mut kinds = vec![
            ActivityKind::Travel,
            ActivityKind::ItemUse,
            ActivityKind::Gym,
            ActivityKind::Education,
            ActivityKind::Crime,
        ];
        kinds.sort();
        assert_eq!(kinds, ActivityKind::ALL.to_vec());
    }

    #[test]
    fn module_set_fills_missing_kinds_disabled() {
        let set = ModuleSet::new([ActivityModule::new(
            Requirement::Gym { min_energy: 40 },
            true,
            0,
        )])
        .unwrap();
        assert!(set.get(ActivityKind::Gym).enabled);
        assert!(!set.get(ActivityKind::Travel).enabled);
        assert_eq!(set.iter().count(), 5);
        assert_eq!(set.enabled().count(), 1);
    }

    #[test]
    fn module_set_rejects_duplicates() {
        let err = ModuleSet::new([
            ActivityModule::new(Requirement::Education, true, 0),
            ActivityModule::new(Requirement::Education, false, 3),
        ])
        .unwrap_err();
        assert!(matches!(err, BotError::Configuration(_)));
    }

    #[test]
    fn remote_status_mapping() {
        assert_eq!(AgentStatus::from_remote("Okay"), AgentStatus::Okay);
        assert_eq!(AgentStatus::from_remote("Federal"), AgentStatus::Jail);
        assert!(AgentStatus::from_remote("Abroad").is_travelling());
        assert!(!AgentStatus::from_remote("Hospital").is_available());
    }
}
