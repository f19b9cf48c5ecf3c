use crate::{
    time::EpochMs, ActivityKind, ActivityModule, EducationStatus, ItemId, ModuleSet, Requirement,
    ResourceSnapshot, RetryBook,
};

/// Facts queried from the executor before evaluation because they are not
/// part of the snapshot. `None` means the probe failed or was not run, and
/// the modules depending on it are treated as ineligible.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProbeResults {
    pub usable_item: Option<ItemId>,
    pub education: Option<EducationStatus>,
}

/// Which executor probes a module needs before it can be evaluated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Probe {
    UsableItem,
    Education,
}

impl ActivityModule {
    /// Pure predicate over the snapshot and probe results.
    pub fn is_eligible(&self, snapshot: &ResourceSnapshot, probes: &ProbeResults) -> bool {
        if !self.enabled {
            return false;
        }
        match &self.requirement {
            Requirement::Crime { min_nerve } => {
                snapshot.nerve >= *min_nerve && !snapshot.cooldown_active(ActivityKind::Crime)
            }
            Requirement::Gym { min_energy } => snapshot.energy >= *min_energy,
            Requirement::ItemUse { energy_threshold } => {
                snapshot.energy < *energy_threshold
                    && probes.usable_item.is_some()
                    && !snapshot.cooldown_active(ActivityKind::ItemUse)
            }
            Requirement::Education => matches!(probes.education, Some(EducationStatus::Idle)),
            Requirement::Travel => {
                !snapshot.cooldown_active(ActivityKind::Travel) && !snapshot.status.is_travelling()
            }
        }
    }

    pub fn required_probe(&self) -> Option<Probe> {
        match self.requirement {
            Requirement::ItemUse { .. } => Some(Probe::UsableItem),
            Requirement::Education => Some(Probe::Education),
            _ => None,
        }
    }
}

/// Probes needed by the enabled modules that are not backed off.
pub fn probes_needed(modules: &ModuleSet, retry: &RetryBook, now: EpochMs) -> Vec<Probe> {
    modules
        .enabled()
        .filter(|m| retry.is_ready(m.kind(), now))
        .filter_map(|m| m.required_probe())
        .collect()
}

/// Order the modules to attempt this cycle.
///
/// Keeps enabled, eligible modules that are not held back by retry state,
/// sorted by descending priority with kind order as the tie-break.
pub fn plan_attempts(
    modules: &ModuleSet,
    snapshot: &ResourceSnapshot,
    probes: &ProbeResults,
    retry: &RetryBook,
    now: EpochMs,
) -> Vec<ActivityKind> {
    let mut eligible: Vec<&ActivityModule> = modules
        .enabled()
        .filter(|m| retry.is_ready(m.kind(), now))
        .filter(|m| m.is_eligible(snapshot, probes))
        .collect();
    eligible.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.kind().cmp(&b.kind())));
    eligible.into_iter().map(|m| m.kind()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(energy: u32, nerve: u32) -> ResourceSnapshot {
        ResourceSnapshot {
            energy,
            nerve,
            happiness: 80,
            captured_at: 10_000,
            ..Default::default()
        }
    }

    fn gym(min_energy: u32) -> ActivityModule {
        ActivityModule::new(Requirement::Gym { min_energy }, true, 0)
    }

    #[test]
    fn gym_eligibility_is_energy_threshold() {
        let m = gym(40);
        for energy in [0, 39, 40, 41, 150] {
            assert_eq!(
                m.is_eligible(&snap(energy, 0), &ProbeResults::default()),
                energy >= 40
            );
        }
    }

    #[test]
    fn crime_respects_cooldown() {
        let m = ActivityModule::new(Requirement::Crime { min_nerve: 5 }, true, 0);
        let mut s = snap(0, 10);
        assert!(m.is_eligible(&s, &ProbeResults::default()));
        s.cooldowns.insert(ActivityKind::Crime, s.captured_at + 60_000);
        assert!(!m.is_eligible(&s, &ProbeResults::default()));
    }

    #[test]
    fn item_use_needs_probe_and_low_energy() {
        let m = ActivityModule::new(Requirement::ItemUse { energy_threshold: 25 }, true, 0);
        let with_item = ProbeResults {
            usable_item: Some(ItemId("180".into())),
            ..Default::default()
        };
        assert!(m.is_eligible(&snap(10, 0), &with_item));
        assert!(!m.is_eligible(&snap(25, 0), &with_item));
        assert!(!m.is_eligible(&snap(10, 0), &ProbeResults::default()));
    }

    #[test]
    fn item_use_waits_for_booster_cooldown() {
        let m = ActivityModule::new(Requirement::ItemUse { energy_threshold: 25 }, true, 0);
        let with_item = ProbeResults {
            usable_item: Some(ItemId("180".into())),
            ..Default::default()
        };
        let mut s = snap(10, 0);
        s.cooldowns
            .insert(ActivityKind::ItemUse, s.captured_at + 3_600_000);
        assert!(!m.is_eligible(&s, &with_item));

        s.cooldowns.insert(ActivityKind::ItemUse, s.captured_at);
        assert!(m.is_eligible(&s, &with_item));
    }

    #[test]
    fn education_only_when_idle() {
        let m = ActivityModule::new(Requirement::Education, true, 0);
        let s = snap(0, 0);
        let probe = |education| ProbeResults {
            education,
            ..Default::default()
        };
        assert!(m.is_eligible(&s, &probe(Some(EducationStatus::Idle))));
        assert!(!m.is_eligible(
            &s,
            &probe(Some(EducationStatus::Enrolled {
                course_id: "1".into(),
                seconds_left: 30
            }))
        ));
        assert!(!m.is_eligible(
            &s,
            &probe(Some(EducationStatus::PendingCompletion {
                course_id: "1".into()
            }))
        ));
        assert!(!m.is_eligible(&s, &probe(None)));
    }

    #[test]
    fn disabled_travel_is_never_eligible() {
        let off = ActivityModule::new(Requirement::Travel, false, 0);
        let on = ActivityModule::new(Requirement::Travel, true, 0);
        let s = snap(0, 0);
        assert!(!off.is_eligible(&s, &ProbeResults::default()));
        assert!(on.is_eligible(&s, &ProbeResults::default()));
    }

    #[test]
    fn equal_priorities_fall_back_to_kind_order() {
        let modules = ModuleSet::new([
            gym(40),
            ActivityModule::new(Requirement::Crime { min_nerve: 25 }, true, 0),
        ])
        .unwrap();
        let plan = plan_attempts(
            &modules,
            &snap(50, 30),
            &ProbeResults::default(),
            &RetryBook::default(),
            0,
        );
        assert_eq!(plan, vec![ActivityKind::Crime, ActivityKind::Gym]);
    }

    #[test]
    fn higher_priority_goes_first() {
        let modules = ModuleSet::new([
            ActivityModule::new(Requirement::Gym { min_energy: 40 }, true, 5),
            ActivityModule::new(Requirement::Crime { min_nerve: 25 }, true, 0),
        ])
        .unwrap();
        let plan = plan_attempts(
            &modules,
            &snap(50, 30),
            &ProbeResults::default(),
            &RetryBook::default(),
            0,
        );
        assert_eq!(plan, vec![ActivityKind::Gym, ActivityKind::Crime]);
    }
}
