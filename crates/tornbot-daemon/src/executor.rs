use async_trait::async_trait;
use std::cmp::Reverse;
use tracing::{debug, info};

use tornbot_core::{
    now_ms, ActionOutcome, ActivityKind, BotError, EducationStatus, FailureKind, ItemId,
    ResourceDelta, ResourceSnapshot,
};

use crate::api::{CrimeOption, GameApi, InventoryItem};
use crate::browser::{ActionRequest, BrowserDriver, DriverReply};
use crate::config::ExecutorSettings;

/// The only component that talks to the remote service on the scheduler's behalf.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Id of an inventory item the ItemUse module could consume.
    async fn probe_usable_item(&self) -> Result<Option<ItemId>, BotError>;
    async fn probe_education(&self) -> Result<EducationStatus, BotError>;
    /// Perform one action. Never returns an error: failures are classified in the outcome.
    async fn attempt(&mut self, kind: ActivityKind, snapshot: &ResourceSnapshot) -> ActionOutcome;
}

pub const GYM_ROTATION: [&str; 4] = ["strength", "defense", "speed", "dexterity"];

enum Plan {
    Act(ActionRequest, Option<ResourceDelta>),
    Skip(String),
}

/// Executor that reads through [`GameApi`] and acts through a [`BrowserDriver`].
pub struct GameExecutor<A, B> {
    api: A,
    driver: B,
    settings: ExecutorSettings,
    gym_turn: usize,
}

impl<A: GameApi, B: BrowserDriver> GameExecutor<A, B> {
    pub fn new(api: A, driver: B, settings: ExecutorSettings) -> Self {
        Self {
            api,
            driver,
            settings,
            gym_turn: 0,
        }
    }

    /// Stat the next gym session will train.
    pub fn next_gym_stat(&self) -> &'static str {
        GYM_ROTATION[self.gym_turn % GYM_ROTATION.len()]
    }

    fn matching_item<'a>(&self, items: &'a [InventoryItem]) -> Option<&'a InventoryItem> {
        items
            .iter()
            .find(|i| i.quantity > 0 && i.name.to_lowercase().contains(&self.settings.item_keyword))
    }

    async fn plan(&self, kind: ActivityKind, snapshot: &ResourceSnapshot) -> Result<Plan, BotError> {
        let plan = match kind {
            ActivityKind::Crime => {
                let crimes = self.api.crimes().await?;
                match best_crime(&crimes, snapshot.nerve) {
                    Some(c) => Plan::Act(
                        ActionRequest::new(kind)
                            .param("crime_id", &c.id)
                            .param("name", &c.name),
                        Some(ResourceDelta {
                            nerve: -i64::from(c.nerve),
                            ..Default::default()
                        }),
                    ),
                    None => Plan::Skip(format!("no crime fits {} nerve", snapshot.nerve)),
                }
            }
            ActivityKind::Gym => {
                if snapshot.energy == 0 {
                    return Ok(Plan::Skip("no energy to train with".into()));
                }
                Plan::Act(
                    ActionRequest::new(kind)
                        .param("stat", self.next_gym_stat())
                        .param("energy", snapshot.energy.to_string()),
                    Some(ResourceDelta {
                        energy: -i64::from(snapshot.energy),
                        ..Default::default()
                    }),
                )
            }
            ActivityKind::ItemUse => {
                let items = self.api.inventory().await?;
                match self.matching_item(&items) {
                    Some(item) => Plan::Act(
                        ActionRequest::new(kind)
                            .param("item_id", item.id.as_str())
                            .param("name", &item.name),
                        None,
                    ),
                    None => Plan::Skip(format!("no '{}' in inventory", self.settings.item_keyword)),
                }
            }
            ActivityKind::Education => {
                let record = self.api.education().await?;
                if record.status != EducationStatus::Idle {
                    return Ok(Plan::Skip("a course is already in progress".into()));
                }
                let courses = self.api.courses().await?;
                match courses.iter().find(|c| !record.completed.contains(&c.id)) {
                    Some(course) => Plan::Act(
                        ActionRequest::new(kind)
                            .param("course_id", &course.id)
                            .param("name", &course.name),
                        None,
                    ),
                    None => Plan::Skip("every course is completed".into()),
                }
            }
            ActivityKind::Travel => Plan::Act(
                ActionRequest::new(kind).param("destination", &self.settings.travel_destination),
                None,
            ),
        };
        Ok(plan)
    }
}

/// Highest success rate among the crimes `nerve` can pay for; cheaper wins a tie.
pub fn best_crime(crimes: &[CrimeOption], nerve: u32) -> Option<&CrimeOption> {
    crimes
        .iter()
        .filter(|c| c.nerve <= nerve)
        .max_by_key(|c| (c.success, Reverse(c.nerve)))
}

#[async_trait]
impl<A: GameApi, B: BrowserDriver> ActionExecutor for GameExecutor<A, B> {
    async fn probe_usable_item(&self) -> Result<Option<ItemId>, BotError> {
        let items = self.api.inventory().await?;
        Ok(self.matching_item(&items).map(|i| i.id.clone()))
    }

    async fn probe_education(&self) -> Result<EducationStatus, BotError> {
        Ok(self.api.education().await?.status)
    }

    async fn attempt(&mut self, kind: ActivityKind, snapshot: &ResourceSnapshot) -> ActionOutcome {
        let at = now_ms();
        let (request, delta) = match self.plan(kind, snapshot).await {
            Ok(Plan::Act(request, delta)) => (request, delta),
            Ok(Plan::Skip(reason)) => {
                debug!("{kind} skipped: {reason}");
                return ActionOutcome::skipped(kind, at, reason);
            }
            // Nothing was sent yet, so the action cannot have applied.
            Err(e) => return ActionOutcome::failure(kind, at, e.failure_kind(), e.to_string()),
        };

        match self.driver.perform_action(&request).await {
            Ok(DriverReply::Applied { message }) => {
                info!("{kind} applied {:?} {message}", request.params);
                if kind == ActivityKind::Gym {
                    self.gym_turn = (self.gym_turn + 1) % GYM_ROTATION.len();
                }
                ActionOutcome::success(kind, at, delta)
            }
            Ok(DriverReply::Rejected { message }) => {
                ActionOutcome::failure(kind, at, FailureKind::Transient, format!("rejected: {message}"))
            }
            Err(e) => ActionOutcome::failure(kind, at, e.failure_kind(), e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Course, EducationRecord};
    use std::sync::{Arc, Mutex};
    use tornbot_core::ActionResult;

    #[derive(Default)]
    struct FakeApi {
        items: Vec<InventoryItem>,
        crimes: Vec<CrimeOption>,
        education: Option<EducationRecord>,
        courses: Vec<Course>,
        key_rejected: bool,
    }

    #[async_trait]
    impl GameApi for FakeApi {
        async fn user_status(&self) -> Result<ResourceSnapshot, BotError> {
            Ok(ResourceSnapshot::default())
        }
        async fn inventory(&self) -> Result<Vec<InventoryItem>, BotError> {
            Ok(self.items.clone())
        }
        async fn education(&self) -> Result<EducationRecord, BotError> {
            self.education
                .clone()
                .ok_or_else(|| BotError::transient("education down"))
        }
        async fn courses(&self) -> Result<Vec<Course>, BotError> {
            Ok(self.courses.clone())
        }
        async fn crimes(&self) -> Result<Vec<CrimeOption>, BotError> {
            if self.key_rejected {
                return Err(BotError::fatal_auth("api error 2: Incorrect key"));
            }
            Ok(self.crimes.clone())
        }
    }

    #[derive(Clone)]
    struct FakeDriver {
        sent: Arc<Mutex<Vec<ActionRequest>>>,
        reply: Result<DriverReply, BotError>,
    }

    impl FakeDriver {
        fn replying(reply: Result<DriverReply, BotError>) -> Self {
            Self {
                sent: Arc::default(),
                reply,
            }
        }
    }

    #[async_trait]
    impl BrowserDriver for FakeDriver {
        async fn perform_action(&self, request: &ActionRequest) -> Result<DriverReply, BotError> {
            self.sent.lock().unwrap().push(request.clone());
            self.reply.clone()
        }
    }

    fn applied() -> Result<DriverReply, BotError> {
        Ok(DriverReply::Applied {
            message: String::new(),
        })
    }

    fn settings() -> ExecutorSettings {
        ExecutorSettings {
            item_keyword: "energy drink".into(),
            travel_destination: "mexico".into(),
        }
    }

    fn crime(id: &str, nerve: u32, success: u32) -> CrimeOption {
        CrimeOption {
            id: id.into(),
            name: format!("crime {id}"),
            nerve,
            success,
        }
    }

    fn snap(energy: u32, nerve: u32) -> ResourceSnapshot {
        ResourceSnapshot {
            energy,
            nerve,
            ..Default::default()
        }
    }

    #[test]
    fn best_crime_respects_nerve() {
        let crimes = vec![crime("a", 2, 60), crime("b", 5, 90), crime("c", 3, 90)];
        assert_eq!(best_crime(&crimes, 4).map(|c| c.id.as_str()), Some("c"));
        assert_eq!(best_crime(&crimes, 10).map(|c| c.id.as_str()), Some("c"));
        assert_eq!(best_crime(&crimes, 2).map(|c| c.id.as_str()), Some("a"));
        assert!(best_crime(&crimes, 1).is_none());
    }

    #[tokio::test]
    async fn crime_success_reports_nerve_spent() {
        let api = FakeApi {
            crimes: vec![crime("7", 4, 80)],
            ..Default::default()
        };
        let driver = FakeDriver::replying(applied());
        let sent = driver.sent.clone();
        let mut exec = GameExecutor::new(api, driver, settings());

        let out = exec.attempt(ActivityKind::Crime, &snap(0, 10)).await;
        assert!(out.is_success());
        assert_eq!(out.resource_delta.unwrap().nerve, -4);
        assert_eq!(sent.lock().unwrap()[0].params["crime_id"], "7");
    }

    #[tokio::test]
    async fn gym_rotation_advances_only_on_success() {
        let driver = FakeDriver::replying(Err(BotError::ambiguous("timed out")));
        let mut exec = GameExecutor::new(FakeApi::default(), driver, settings());
        let out = exec.attempt(ActivityKind::Gym, &snap(50, 0)).await;
        assert!(matches!(
            out.result,
            ActionResult::Failure {
                kind: FailureKind::Ambiguous,
                ..
            }
        ));
        assert_eq!(exec.next_gym_stat(), "strength");

        exec.driver.reply = applied();
        let out = exec.attempt(ActivityKind::Gym, &snap(50, 0)).await;
        assert_eq!(out.resource_delta.unwrap().energy, -50);
        assert_eq!(exec.next_gym_stat(), "defense");
    }

    #[tokio::test]
    async fn missing_item_is_skipped_without_driver_call() {
        let api = FakeApi {
            items: vec![InventoryItem {
                id: ItemId("1".into()),
                name: "Xanax".into(),
                quantity: 3,
            }],
            ..Default::default()
        };
        let driver = FakeDriver::replying(applied());
        let sent = driver.sent.clone();
        let mut exec = GameExecutor::new(api, driver, settings());

        assert_eq!(exec.probe_usable_item().await.unwrap(), None);
        let out = exec.attempt(ActivityKind::ItemUse, &snap(0, 0)).await;
        assert!(out.is_skipped());
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn item_probe_matches_keyword_case_insensitively() {
        let api = FakeApi {
            items: vec![
                InventoryItem {
                    id: ItemId("9".into()),
                    name: "Can of Energy Drink".into(),
                    quantity: 0,
                },
                InventoryItem {
                    id: ItemId("10".into()),
                    name: "Big Energy Drink".into(),
                    quantity: 2,
                },
            ],
            ..Default::default()
        };
        let exec = GameExecutor::new(api, FakeDriver::replying(applied()), settings());
        assert_eq!(
            exec.probe_usable_item().await.unwrap(),
            Some(ItemId("10".into()))
        );
    }

    #[tokio::test]
    async fn education_starts_first_uncompleted_course() {
        let api = FakeApi {
            education: Some(EducationRecord {
                status: EducationStatus::Idle,
                completed: vec!["1".into()],
            }),
            courses: vec![
                Course {
                    id: "1".into(),
                    name: "Intro".into(),
                },
                Course {
                    id: "2".into(),
                    name: "Next".into(),
                },
            ],
            ..Default::default()
        };
        let driver = FakeDriver::replying(applied());
        let sent = driver.sent.clone();
        let mut exec = GameExecutor::new(api, driver, settings());

        let out = exec.attempt(ActivityKind::Education, &snap(0, 0)).await;
        assert!(out.is_success());
        assert_eq!(sent.lock().unwrap()[0].params["course_id"], "2");
    }

    #[tokio::test]
    async fn planning_fetch_error_is_transient_failure() {
        let mut exec = GameExecutor::new(FakeApi::default(), FakeDriver::replying(applied()), settings());
        assert!(exec.probe_education().await.is_err());
        let out = exec.attempt(ActivityKind::Education, &snap(0, 0)).await;
        assert!(matches!(
            out.result,
            ActionResult::Failure {
                kind: FailureKind::Transient,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn rejected_key_is_tagged_on_the_outcome() {
        let api = FakeApi {
            key_rejected: true,
            ..Default::default()
        };
        let mut exec = GameExecutor::new(api, FakeDriver::replying(applied()), settings());
        let out = exec.attempt(ActivityKind::Crime, &snap(0, 30)).await;
        assert!(matches!(
            out.result,
            ActionResult::Failure {
                kind: FailureKind::AuthRejected,
                ..
            }
        ));
        assert!(out.auth_rejection().is_some());
    }

    #[tokio::test]
    async fn rejected_action_is_transient() {
        let driver = FakeDriver::replying(Ok(DriverReply::Rejected {
            message: "You are in hospital".into(),
        }));
        let mut exec = GameExecutor::new(FakeApi::default(), driver, settings());
        let out = exec.attempt(ActivityKind::Travel, &snap(0, 0)).await;
        assert!(matches!(
            out.result,
            ActionResult::Failure {
                kind: FailureKind::Transient,
                ..
            }
        ));
    }
}
