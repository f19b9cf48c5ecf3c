use clap::{builder::BoolishValueParser, Parser};
use std::fmt;
use std::time::Duration;

use tornbot_core::{ActivityModule, Backoff, BotError, ModuleSet, Requirement, RetryPolicy};

/// Process flags. Every flag can also be supplied through the environment
/// (a `.env` file is loaded first by `main`).
#[derive(Debug, Parser)]
#[command(name = "tornbot", version, about = "Resource-aware action scheduler for a Torn account")]
pub struct Cli {
    /// API key for the remote service.
    #[arg(long, env = "API_CREDENTIALS", hide_env_values = true)]
    pub api_credentials: Option<String>,

    #[arg(long, env = "ENABLE_CRIME", default_value_t = true, value_parser = BoolishValueParser::new(), action = clap::ArgAction::Set)]
    pub enable_crime: bool,
    #[arg(long, env = "ENABLE_GYM", default_value_t = true, value_parser = BoolishValueParser::new(), action = clap::ArgAction::Set)]
    pub enable_gym: bool,
    #[arg(long, env = "ENABLE_ITEM_USE", default_value_t = true, value_parser = BoolishValueParser::new(), action = clap::ArgAction::Set)]
    pub enable_item_use: bool,
    #[arg(long, env = "ENABLE_EDUCATION", default_value_t = true, value_parser = BoolishValueParser::new(), action = clap::ArgAction::Set)]
    pub enable_education: bool,
    #[arg(long, env = "ENABLE_TRAVEL", default_value_t = false, value_parser = BoolishValueParser::new(), action = clap::ArgAction::Set)]
    pub enable_travel: bool,

    /// Base time between cycles.
    #[arg(long, env = "CYCLE_INTERVAL_SECONDS", default_value_t = 60)]
    pub cycle_interval_seconds: u64,
    /// Lower bound on the time between cycles, whatever retries are pending.
    #[arg(long, env = "MIN_CYCLE_INTERVAL_SECONDS", default_value_t = 10)]
    pub min_cycle_interval_seconds: u64,

    #[arg(long, env = "MIN_NERVE_FOR_CRIME", default_value_t = 2)]
    pub min_nerve_for_crime: u32,
    #[arg(long, env = "MIN_ENERGY_FOR_GYM", default_value_t = 5)]
    pub min_energy_for_gym: u32,
    /// Use an item only while energy is below this.
    #[arg(long, env = "ITEM_USE_ENERGY_THRESHOLD", default_value_t = 25)]
    pub item_use_energy_threshold: u32,
    /// Case-insensitive substring matched against inventory item names.
    #[arg(long, env = "ITEM_USE_KEYWORD", default_value = "energy drink")]
    pub item_use_keyword: String,
    #[arg(long, env = "TRAVEL_DESTINATION", default_value = "mexico")]
    pub travel_destination: String,

    #[arg(long, env = "CRIME_PRIORITY", default_value_t = 0, allow_negative_numbers = true)]
    pub crime_priority: i32,
    #[arg(long, env = "GYM_PRIORITY", default_value_t = 0, allow_negative_numbers = true)]
    pub gym_priority: i32,
    #[arg(long, env = "ITEM_USE_PRIORITY", default_value_t = 0, allow_negative_numbers = true)]
    pub item_use_priority: i32,
    #[arg(long, env = "EDUCATION_PRIORITY", default_value_t = 0, allow_negative_numbers = true)]
    pub education_priority: i32,
    #[arg(long, env = "TRAVEL_PRIORITY", default_value_t = 0, allow_negative_numbers = true)]
    pub travel_priority: i32,

    #[arg(long, env = "RETRY_BASE_SECONDS", default_value_t = 5)]
    pub retry_base_seconds: u64,
    #[arg(long, env = "RETRY_FACTOR", default_value_t = 2)]
    pub retry_factor: u32,
    #[arg(long, env = "RETRY_CAP_SECONDS", default_value_t = 600)]
    pub retry_cap_seconds: u64,
    /// Consecutive failures after which a module is escalated and disabled.
    #[arg(long, env = "RETRY_CEILING", default_value_t = 10)]
    pub retry_ceiling: u32,

    #[arg(long, env = "API_BASE_URL", default_value = "https://api.torn.com")]
    pub api_base_url: String,
    /// Minimum spacing between two remote API requests.
    #[arg(long, env = "API_CALL_INTERVAL_SECONDS", default_value_t = 2)]
    pub api_call_interval_seconds: u64,
    #[arg(long, env = "API_TIMEOUT_SECONDS", default_value_t = 20)]
    pub api_timeout_seconds: u64,

    /// Browser automation sidecar, e.g. http://127.0.0.1:9515
    #[arg(long, env = "BROWSER_DRIVER_URL")]
    pub browser_driver_url: Option<String>,
    #[arg(long, env = "HEADLESS_BROWSER", default_value_t = false, value_parser = BoolishValueParser::new(), action = clap::ArgAction::Set)]
    pub headless_browser: bool,
}

/// API key wrapper that never prints its value.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub key: ApiKey,
    pub call_interval: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub driver_url: Option<String>,
    pub headless: bool,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub item_keyword: String,
    pub travel_destination: String,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub cycle_interval: Duration,
    pub min_cycle_interval: Duration,
}

/// Immutable configuration built once at startup.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub modules: ModuleSet,
    pub retry: RetryPolicy,
    pub scheduler: SchedulerSettings,
    pub api: ApiConfig,
    pub browser: BrowserConfig,
    pub executor: ExecutorSettings,
}

impl BotConfig {
    pub fn from_cli(cli: Cli) -> Result<Self, BotError> {
        let key = match cli.api_credentials.as_deref().map(str::trim) {
            Some(k) if !k.is_empty() => ApiKey::new(k),
            _ => return Err(BotError::fatal_auth("API_CREDENTIALS is missing or blank")),
        };

        if cli.cycle_interval_seconds == 0 {
            return Err(BotError::configuration("CYCLE_INTERVAL_SECONDS must be positive"));
        }
        if cli.min_cycle_interval_seconds > cli.cycle_interval_seconds {
            return Err(BotError::configuration(format!(
                "MIN_CYCLE_INTERVAL_SECONDS ({}) exceeds CYCLE_INTERVAL_SECONDS ({})",
                cli.min_cycle_interval_seconds, cli.cycle_interval_seconds
            )));
        }
        if cli.retry_factor == 0 {
            return Err(BotError::configuration("RETRY_FACTOR must be at least 1"));
        }
        if cli.retry_ceiling == 0 {
            return Err(BotError::configuration("RETRY_CEILING must be at least 1"));
        }
        if cli.retry_cap_seconds < cli.retry_base_seconds {
            return Err(BotError::configuration(
                "RETRY_CAP_SECONDS must not be below RETRY_BASE_SECONDS",
            ));
        }
        if cli.enable_item_use && cli.item_use_keyword.trim().is_empty() {
            return Err(BotError::configuration("ITEM_USE_KEYWORD must not be blank"));
        }

        // Every action goes through the browser driver.
        let driver_url = cli
            .browser_driver_url
            .as_deref()
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty());
        let any_enabled = [
            cli.enable_crime,
            cli.enable_gym,
            cli.enable_item_use,
            cli.enable_education,
            cli.enable_travel,
        ]
        .contains(&true);
        if any_enabled && driver_url.is_none() {
            return Err(BotError::configuration(
                "BROWSER_DRIVER_URL must be set while any module is enabled",
            ));
        }

        let modules = ModuleSet::new([
            ActivityModule::new(
                Requirement::Crime {
                    min_nerve: cli.min_nerve_for_crime,
                },
                cli.enable_crime,
                cli.crime_priority,
            ),
            ActivityModule::new(
                Requirement::Gym {
                    min_energy: cli.min_energy_for_gym,
                },
                cli.enable_gym,
                cli.gym_priority,
            ),
            ActivityModule::new(
                Requirement::ItemUse {
                    energy_threshold: cli.item_use_energy_threshold,
                },
                cli.enable_item_use,
                cli.item_use_priority,
            ),
            ActivityModule::new(
                Requirement::Education,
                cli.enable_education,
                cli.education_priority,
            ),
            ActivityModule::new(Requirement::Travel, cli.enable_travel, cli.travel_priority),
        ])?;

        let timeout = Duration::from_secs(cli.api_timeout_seconds.max(1));

        Ok(Self {
            modules,
            retry: RetryPolicy {
                backoff: Backoff {
                    base: Duration::from_secs(cli.retry_base_seconds),
                    factor: cli.retry_factor,
                    cap: Duration::from_secs(cli.retry_cap_seconds),
                },
                ceiling: cli.retry_ceiling,
            },
            scheduler: SchedulerSettings {
                cycle_interval: Duration::from_secs(cli.cycle_interval_seconds),
                min_cycle_interval: Duration::from_secs(cli.min_cycle_interval_seconds),
            },
            api: ApiConfig {
                base_url: cli.api_base_url.trim_end_matches('/').to_string(),
                key,
                call_interval: Duration::from_secs(cli.api_call_interval_seconds),
                timeout,
            },
            browser: BrowserConfig {
                driver_url,
                headless: cli.headless_browser,
                timeout,
            },
            executor: ExecutorSettings {
                item_keyword: cli.item_use_keyword.to_lowercase(),
                travel_destination: cli.travel_destination,
            },
        })
    }
}
