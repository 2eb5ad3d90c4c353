//! Effect dispatch. Executing an approval item means handing the chosen
//! action to the channel integration behind a webhook; everything the
//! pipeline knows about the outside world goes through [`EffectDispatcher`].

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::model::{ActionType, Channel};

/// What the executor sends downstream for one claimed item.
#[derive(Debug, Clone, Serialize)]
pub struct EffectRequest {
    pub approval_item_id: i64,
    pub candidate_id: String,
    pub workspace_id: String,
    pub action_type: ActionType,
    pub channel: Channel,
    pub target_contact_id: String,
    pub target_campaign_id: Option<String>,
    /// Present when a campaign sequence step proposed the action, so the
    /// downstream step can be rewired after execution.
    pub scheduled_step_id: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Error)]
pub enum EffectError {
    #[error("no endpoint configured for channel {0}")]
    NotConfigured(Channel),
    #[error("downstream returned status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("dispatch timed out after {0:?}")]
    Timeout(Duration),
}

impl EffectError {
    /// Timeouts and transport faults are worth retrying on a later run;
    /// a configured endpoint rejecting the payload is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            EffectError::Timeout(_) | EffectError::Transport(_) => true,
            EffectError::Status(code) => *code >= 500,
            EffectError::NotConfigured(_) => false,
        }
    }
}

pub trait EffectDispatcher: Send + Sync {
    fn dispatch(
        &self,
        request: &EffectRequest,
    ) -> impl std::future::Future<Output = Result<(), EffectError>> + Send;
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Per-channel webhook endpoints. A channel without an entry falls back
    /// to `default_endpoint`.
    pub endpoints: HashMap<Channel, String>,
    pub default_endpoint: Option<String>,
    pub timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            endpoints: HashMap::new(),
            default_endpoint: None,
            timeout: Duration::from_secs(10),
        }
    }
}

impl DispatchConfig {
    /// Reads `SOPHIA_WEBHOOK_EMAIL_URL`, `SOPHIA_WEBHOOK_LINKEDIN_URL`,
    /// `SOPHIA_WEBHOOK_SMS_URL`, `SOPHIA_WEBHOOK_PHONE_URL`,
    /// `SOPHIA_WEBHOOK_DEFAULT_URL` and `SOPHIA_WEBHOOK_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        let mut endpoints = HashMap::new();
        for (channel, key) in [
            (Channel::Email, "SOPHIA_WEBHOOK_EMAIL_URL"),
            (Channel::Linkedin, "SOPHIA_WEBHOOK_LINKEDIN_URL"),
            (Channel::Sms, "SOPHIA_WEBHOOK_SMS_URL"),
            (Channel::Phone, "SOPHIA_WEBHOOK_PHONE_URL"),
        ] {
            if let Ok(url) = std::env::var(key) {
                if !url.trim().is_empty() {
                    endpoints.insert(channel, url);
                }
            }
        }

        let default_endpoint = std::env::var("SOPHIA_WEBHOOK_DEFAULT_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());

        let timeout_secs = std::env::var("SOPHIA_WEBHOOK_TIMEOUT_SECS")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(10u64);

        Self {
            endpoints,
            default_endpoint,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn endpoint_for(&self, channel: Channel) -> Option<&str> {
        self.endpoints
            .get(&channel)
            .or(self.default_endpoint.as_ref())
            .map(String::as_str)
    }
}

/// Posts the effect payload to the channel's webhook. 2xx means executed;
/// anything else is reported to the caller and never retried in-line.
pub struct WebhookDispatcher {
    client: reqwest::Client,
    config: DispatchConfig,
}

impl WebhookDispatcher {
    pub fn new(config: DispatchConfig) -> Result<Self, EffectError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| EffectError::Transport(err.to_string()))?;
        Ok(Self { client, config })
    }
}

impl EffectDispatcher for WebhookDispatcher {
    async fn dispatch(&self, request: &EffectRequest) -> Result<(), EffectError> {
        let endpoint = self
            .config
            .endpoint_for(request.channel)
            .ok_or(EffectError::NotConfigured(request.channel))?;

        let response = self
            .client
            .post(endpoint)
            .json(request)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    EffectError::Timeout(self.config.timeout)
                } else {
                    EffectError::Transport(err.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(EffectError::Status(status.as_u16()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_endpoint_beats_the_default() {
        let mut endpoints = HashMap::new();
        endpoints.insert(Channel::Email, "https://hooks.test/email".to_string());
        let config = DispatchConfig {
            endpoints,
            default_endpoint: Some("https://hooks.test/any".to_string()),
            timeout: Duration::from_secs(10),
        };

        assert_eq!(
            config.endpoint_for(Channel::Email),
            Some("https://hooks.test/email")
        );
        assert_eq!(
            config.endpoint_for(Channel::Sms),
            Some("https://hooks.test/any")
        );
    }

    #[test]
    fn payload_reports_the_scheduled_step() {
        let request = EffectRequest {
            approval_item_id: 7,
            candidate_id: "cand-1".into(),
            workspace_id: "ws-1".into(),
            action_type: ActionType::SendFollowUp,
            channel: Channel::Email,
            target_contact_id: "contact-1".into(),
            target_campaign_id: None,
            scheduled_step_id: Some("step-4".into()),
            content: Some("hello".into()),
        };

        let payload = serde_json::to_value(&request).unwrap();
        assert_eq!(payload["scheduled_step_id"], "step-4");
    }

    #[test]
    fn missing_endpoint_is_not_retryable() {
        let err = EffectError::NotConfigured(Channel::Phone);
        assert!(!err.is_retryable());
        assert!(EffectError::Timeout(Duration::from_secs(10)).is_retryable());
        assert!(EffectError::Status(502).is_retryable());
        assert!(!EffectError::Status(422).is_retryable());
    }
}
