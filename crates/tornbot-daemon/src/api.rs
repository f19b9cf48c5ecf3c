use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use tornbot_core::{
    now_ms, ActivityKind, AgentStatus, BotError, EducationStatus, EpochMs, ItemId,
    ResourceSnapshot,
};

use crate::config::ApiConfig;

/// One inventory entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InventoryItem {
    pub id: ItemId,
    pub name: String,
    pub quantity: u32,
}

/// A crime the agent could commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CrimeOption {
    pub id: String,
    pub name: String,
    pub nerve: u32,
    /// Success rate in percent.
    pub success: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EducationRecord {
    pub status: EducationStatus,
    pub completed: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Course {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Profile {
    pub player_id: u64,
    pub name: String,
}

/// Read side of the remote service.
#[async_trait]
pub trait GameApi: Send + Sync {
    async fn user_status(&self) -> Result<ResourceSnapshot, BotError>;
    async fn inventory(&self) -> Result<Vec<InventoryItem>, BotError>;
    async fn education(&self) -> Result<EducationRecord, BotError>;
    async fn courses(&self) -> Result<Vec<Course>, BotError>;
    async fn crimes(&self) -> Result<Vec<CrimeOption>, BotError>;
}

/// Where the scheduler gets its snapshot from.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn refresh(&self) -> Result<ResourceSnapshot, BotError>;
}

/// HTTP client for the remote API with a minimum spacing between calls.
pub struct TornApi {
    client: Client,
    cfg: ApiConfig,
    last_request: Mutex<Option<Instant>>,
}

impl TornApi {
    pub fn new(cfg: ApiConfig) -> Result<Self, BotError> {
        let client = Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(BotError::configuration)?;
        Ok(Self {
            client,
            cfg,
            last_request: Mutex::new(None),
        })
    }

    /// Who the key belongs to. Used once at startup to fail fast on a bad key.
    pub async fn profile(&self) -> Result<Profile, BotError> {
        let raw: ProfileResponse = self.get("user", &["profile"]).await?;
        Ok(Profile {
            player_id: raw.player_id,
            name: raw.name,
        })
    }

    async fn get<T: DeserializeOwned>(&self, section: &str, selections: &[&str]) -> Result<T, BotError> {
        self.pace().await;

        // The key is part of the URL; errors below are stripped of it.
        let url = format!(
            "{}/{}/?selections={}&key={}",
            self.cfg.base_url,
            section,
            selections.join(","),
            self.cfg.key.expose()
        );
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BotError::transient(format!("{section} request: {}", e.without_url())))?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(BotError::fatal_auth(format!("{section}: http {status}")));
        }
        if !status.is_success() {
            return Err(BotError::transient(format!("{section}: http {status}")));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| BotError::transient(format!("{section} decode: {}", e.without_url())))?;
        decode_body(section, body)
    }

    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.cfg.call_interval {
                let wait = self.cfg.call_interval - elapsed;
                debug!("rate limiting: sleeping {:?}", wait);
                sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[async_trait]
impl StatusSource for TornApi {
    async fn refresh(&self) -> Result<ResourceSnapshot, BotError> {
        self.user_status().await
    }
}

/// Lets one client serve both the scheduler and the executor.
#[async_trait]
impl<T: StatusSource + ?Sized> StatusSource for Arc<T> {
    async fn refresh(&self) -> Result<ResourceSnapshot, BotError> {
        (**self).refresh().await
    }
}

#[async_trait]
impl<T: GameApi + ?Sized> GameApi for Arc<T> {
    async fn user_status(&self) -> Result<ResourceSnapshot, BotError> {
        (**self).user_status().await
    }
    async fn inventory(&self) -> Result<Vec<InventoryItem>, BotError> {
        (**self).inventory().await
    }
    async fn education(&self) -> Result<EducationRecord, BotError> {
        (**self).education().await
    }
    async fn courses(&self) -> Result<Vec<Course>, BotError> {
        (**self).courses().await
    }
    async fn crimes(&self) -> Result<Vec<CrimeOption>, BotError> {
        (**self).crimes().await
    }
}

#[async_trait]
impl GameApi for TornApi {
    async fn user_status(&self) -> Result<ResourceSnapshot, BotError> {
        let raw: StatusResponse = self
            .get("user", &["bars", "cooldowns", "profile", "travel"])
            .await?;
        raw.into_snapshot(now_ms())
    }

    async fn inventory(&self) -> Result<Vec<InventoryItem>, BotError> {
        let raw: InventoryResponse = self.get("user", &["inventory"]).await?;
        Ok(raw.into_items())
    }

    async fn education(&self) -> Result<EducationRecord, BotError> {
        let raw: EducationResponse = self.get("user", &["education"]).await?;
        Ok(raw.into_record())
    }

    async fn courses(&self) -> Result<Vec<Course>, BotError> {
        let raw: CourseCatalogue = self.get("torn", &["education"]).await?;
        Ok(raw.into_courses())
    }

    async fn crimes(&self) -> Result<Vec<CrimeOption>, BotError> {
        let raw: CrimesResponse = self.get("user", &["crimes"]).await?;
        Ok(raw.into_options())
    }
}

/// Only a rejected key stops startup; anything else is left to the refresh loop.
pub fn startup_profile(fetched: Result<Profile, BotError>) -> Result<Option<Profile>, BotError> {
    match fetched {
        Ok(profile) => Ok(Some(profile)),
        Err(e @ BotError::FatalAuth(_)) => Err(e),
        Err(e) => {
            warn!("profile unavailable, starting anyway: {e}");
            Ok(None)
        }
    }
}

/// Key-level error codes that no amount of retrying will fix.
const FATAL_KEY_CODES: &[i64] = &[2, 10, 13, 16, 18];

/// Split an API body into its error envelope or the expected payload.
pub fn decode_body<T: DeserializeOwned>(section: &str, body: serde_json::Value) -> Result<T, BotError> {
    if let Some(err) = body.get("error") {
        let code = err.get("code").and_then(|c| c.as_i64()).unwrap_or(-1);
        let msg = err
            .get("error")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error");
        if FATAL_KEY_CODES.contains(&code) {
            return Err(BotError::fatal_auth(format!("{section}: api error {code}: {msg}")));
        }
        return Err(BotError::transient(format!("{section}: api error {code}: {msg}")));
    }
    serde_json::from_value(body).map_err(|e| BotError::transient(format!("{section}: malformed payload: {e}")))
}

#[derive(Debug, Deserialize)]
struct ProfileResponse {
    player_id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct Bar {
    current: i64,
    maximum: i64,
}

impl Bar {
    fn checked(&self, name: &str) -> Result<(u32, u32), BotError> {
        let cur = u32::try_from(self.current)
            .map_err(|_| BotError::transient(format!("{name} bar out of range: {}", self.current)))?;
        let max = u32::try_from(self.maximum)
            .map_err(|_| BotError::transient(format!("{name} maximum out of range: {}", self.maximum)))?;
        Ok((cur, max))
    }
}

#[derive(Debug, Deserialize)]
struct StatusInfo {
    state: String,
}

#[derive(Debug, Deserialize)]
struct TravelInfo {
    #[serde(default)]
    time_left: i64,
}

#[derive(Debug, Deserialize)]
pub struct StatusResponse {
    energy: Bar,
    nerve: Bar,
    happy: Bar,
    #[serde(default)]
    cooldowns: HashMap<String, i64>,
    status: Option<StatusInfo>,
    travel: Option<TravelInfo>,
}

impl StatusResponse {
    /// Convert remaining-seconds fields into absolute times relative to `captured_at`.
    pub fn into_snapshot(self, captured_at: EpochMs) -> Result<ResourceSnapshot, BotError> {
        let (energy, energy_max) = self.energy.checked("energy")?;
        let (nerve, nerve_max) = self.nerve.checked("nerve")?;
        let (happiness, happiness_max) = self.happy.checked("happy")?;

        let mut cooldowns = BTreeMap::new();
        let mut set = |kind: ActivityKind, secs: i64| {
            if secs > 0 {
                let until = captured_at.saturating_add(secs.saturating_mul(1000));
                let slot = cooldowns.entry(kind).or_insert(until);
                *slot = (*slot).max(until);
            }
        };
        for (name, secs) in &self.cooldowns {
            match name.as_str() {
                "booster" => set(ActivityKind::ItemUse, *secs),
                "crime" => set(ActivityKind::Crime, *secs),
                _ => {}
            }
        }
        if let Some(travel) = &self.travel {
            set(ActivityKind::Travel, travel.time_left);
        }

        Ok(ResourceSnapshot {
            energy,
            energy_max,
            nerve,
            nerve_max,
            happiness,
            happiness_max,
            status: self
                .status
                .map(|s| AgentStatus::from_remote(&s.state))
                .unwrap_or_default(),
            cooldowns,
            captured_at,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawItem {
    #[serde(rename = "ID")]
    id: u64,
    name: String,
    #[serde(default)]
    quantity: u32,
}

#[derive(Debug, Deserialize)]
struct InventoryResponse {
    inventory: Option<Vec<RawItem>>,
}

impl InventoryResponse {
    fn into_items(self) -> Vec<InventoryItem> {
        self.inventory
            .unwrap_or_default()
            .into_iter()
            .map(|i| InventoryItem {
                id: ItemId(i.id.to_string()),
                name: i.name,
                quantity: i.quantity,
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct EducationResponse {
    #[serde(default)]
    education_current: u64,
    #[serde(default)]
    education_timeleft: u64,
    #[serde(default)]
    education_completed: Vec<u64>,
}

impl EducationResponse {
    pub fn into_record(self) -> EducationRecord {
        let status = match (self.education_current, self.education_timeleft) {
            (0, _) => EducationStatus::Idle,
            (id, 0) => EducationStatus::PendingCompletion {
                course_id: id.to_string(),
            },
            (id, left) => EducationStatus::Enrolled {
                course_id: id.to_string(),
                seconds_left: left,
            },
        };
        EducationRecord {
            status,
            completed: self
                .education_completed
                .into_iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawCourse {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CourseCatalogue {
    #[serde(default)]
    education: BTreeMap<String, RawCourse>,
}

impl CourseCatalogue {
    fn into_courses(self) -> Vec<Course> {
        let mut courses: Vec<Course> = self
            .education
            .into_iter()
            .map(|(id, c)| Course { id, name: c.name })
            .collect();
        // Numeric ids sort as numbers, not strings.
        courses.sort_by_key(|c| c.id.parse::<u64>().unwrap_or(u64::MAX));
        courses
    }
}

#[derive(Debug, Deserialize)]
struct RawCrime {
    name: String,
    #[serde(default = "unaffordable")]
    nerve: u32,
    #[serde(default)]
    success: u32,
}

fn unaffordable() -> u32 {
    u32::MAX
}

#[derive(Debug, Deserialize)]
struct CrimesResponse {
    #[serde(default)]
    crimes: BTreeMap<String, RawCrime>,
}

impl CrimesResponse {
    fn into_options(self) -> Vec<CrimeOption> {
        self.crimes
            .into_iter()
            .map(|(id, c)| CrimeOption {
                id,
                name: c.name,
                nerve: c.nerve,
                success: c.success,
            })
            .collect()
    }
}
