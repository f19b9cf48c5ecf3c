use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use tornbot_core::{ActivityKind, BotError};

use crate::config::BrowserConfig;

/// An action that only the browser flow can perform.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ActionRequest {
    pub kind: ActivityKind,
    pub params: BTreeMap<String, String>,
}

impl ActionRequest {
    pub fn new(kind: ActivityKind) -> Self {
        Self {
            kind,
            params: BTreeMap::new(),
        }
    }

    pub fn param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }
}

/// What the driver saw after submitting the action.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DriverReply {
    /// The game accepted and applied the action.
    Applied {
        #[serde(default)]
        message: String,
    },
    /// The game refused the action; nothing was applied.
    Rejected {
        #[serde(default)]
        message: String,
    },
}

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn perform_action(&self, request: &ActionRequest) -> Result<DriverReply, BotError>;
}

#[async_trait]
impl BrowserDriver for Box<dyn BrowserDriver> {
    async fn perform_action(&self, request: &ActionRequest) -> Result<DriverReply, BotError> {
        (**self).perform_action(request).await
    }
}

#[derive(Serialize)]
struct DriverCall<'a> {
    kind: ActivityKind,
    params: &'a BTreeMap<String, String>,
    headless: bool,
}

/// Talks to a browser automation sidecar over HTTP.
pub struct HttpBrowserDriver {
    client: Client,
    url: String,
    headless: bool,
}

impl HttpBrowserDriver {
    pub fn new(url: impl Into<String>, cfg: &BrowserConfig) -> Result<Self, BotError> {
        let client = Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(BotError::configuration)?;
        Ok(Self {
            client,
            url: url.into(),
            headless: cfg.headless,
        })
    }
}

#[async_trait]
impl BrowserDriver for HttpBrowserDriver {
    async fn perform_action(&self, request: &ActionRequest) -> Result<DriverReply, BotError> {
        let call = DriverCall {
            kind: request.kind,
            params: &request.params,
            headless: self.headless,
        };
        debug!("driver action {} {:?}", request.kind, request.params);

        let resp = self
            .client
            .post(format!("{}/actions", self.url))
            .json(&call)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = resp.status();
        if let Some(err) = classify_status(status) {
            return Err(err);
        }
        // The request went through; an unreadable answer leaves the effect unknown.
        resp.json::<DriverReply>()
            .await
            .map_err(|e| BotError::ambiguous(format!("driver reply unreadable: {e}")))
    }
}

/// Request never left, or it may have been processed.
fn classify_send_error(e: reqwest::Error) -> BotError {
    if e.is_connect() || e.is_builder() {
        BotError::transient(format!("driver unreachable: {e}"))
    } else {
        BotError::ambiguous(format!("driver request interrupted: {e}"))
    }
}

pub fn classify_status(status: StatusCode) -> Option<BotError> {
    if status.is_success() {
        return None;
    }
    let err = match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
            BotError::transient(format!("driver busy: http {status}"))
        }
        s if s.is_client_error() => BotError::configuration(format!("driver refused request: http {s}")),
        s => BotError::ambiguous(format!("driver failed mid-action: http {s}")),
    };
    Some(err)
}

/// Used when no driver URL is configured; every action fails as misconfigured.
pub struct DisabledBrowserDriver;

#[async_trait]
impl BrowserDriver for DisabledBrowserDriver {
    async fn perform_action(&self, request: &ActionRequest) -> Result<DriverReply, BotError> {
        Err(BotError::configuration(format!(
            "{} needs browser automation but BROWSER_DRIVER_URL is not set",
            request.kind
        )))
    }
}
