//! Feature flag lookups.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::config::{FlagsConfig, FlagsmithConfig};
use crate::{Error, Result};

/// When on, image messages go to the generic message-bus topic instead of
/// the dedicated image topic.
pub const IMAGE_BUS_FLAG: &str = "enable_kafka";

#[async_trait]
pub trait FlagService: Send + Sync {
    async fn is_enabled(&self, name: &str) -> Result<bool>;
}

/// Fixed flag values. Unknown flags are off.
#[derive(Debug, Clone, Default)]
pub struct StaticFlags {
    flags: HashMap<String, bool>,
}

impl StaticFlags {
    pub fn new(flags: HashMap<String, bool>) -> Self {
        Self { flags }
    }

    pub fn with(mut self, name: impl Into<String>, enabled: bool) -> Self {
        self.flags.insert(name.into(), enabled);
        self
    }
}

#[async_trait]
impl FlagService for StaticFlags {
    async fn is_enabled(&self, name: &str) -> Result<bool> {
        Ok(self.flags.get(name).copied().unwrap_or(false))
    }
}

#[derive(Debug, Deserialize)]
struct FeatureState {
    feature: Feature,
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct Feature {
    name: String,
}

/// Environment flags from the Flagsmith REST API.
///
/// Flags are fetched on every lookup so a toggle takes effect on the next
/// event.
pub struct FlagsmithClient {
    client: Client,
    flags_url: String,
    environment_key: String,
}

impl FlagsmithClient {
    pub fn new(config: &FlagsmithConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("anime-sync/0.1")
            .build()
            .map_err(|e| Error::FlagService(format!("Failed to build HTTP client: {e}")))?;

        let base = config.base_url.trim_end_matches('/');

        Ok(Self {
            client,
            flags_url: format!("{base}/flags/"),
            environment_key: config.environment_key.clone(),
        })
    }

    pub fn flags_url(&self) -> &str {
        &self.flags_url
    }

    async fn environment_flags(&self) -> Result<Vec<FeatureState>> {
        let response = self
            .client
            .get(&self.flags_url)
            .header("X-Environment-Key", &self.environment_key)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::FlagService(format!("Flagsmith returned {status}")));
        }

        response
            .json()
            .await
            .map_err(|e| Error::FlagService(format!("Invalid flags response: {e}")))
    }
}

#[async_trait]
impl FlagService for FlagsmithClient {
    async fn is_enabled(&self, name: &str) -> Result<bool> {
        let flags = self.environment_flags().await?;
        let enabled = flag_enabled(&flags, name);
        debug!(flag = name, enabled, "Flag evaluated");
        Ok(enabled)
    }
}

fn request_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout {
            message: format!("Flagsmith did not answer: {e}"),
        }
    } else {
        Error::FlagService(format!("Request failed: {e}"))
    }
}

fn flag_enabled(flags: &[FeatureState], name: &str) -> bool {
    flags
        .iter()
        .find(|state| state.feature.name == name)
        .map(|state| state.enabled)
        .unwrap_or(false)
}

/// Flagsmith when configured, otherwise the static map.
pub fn from_config(config: &FlagsConfig) -> Result<Arc<dyn FlagService>> {
    match &config.flagsmith {
        Some(flagsmith) => Ok(Arc::new(FlagsmithClient::new(flagsmith)?)),
        None => Ok(Arc::new(StaticFlags::new(config.static_flags.clone()))),
    }
}
