use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The fixed set of actions Sophia is allowed to propose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    SendFollowUp,
    ScheduleMeeting,
    EscalateToHuman,
    DisqualifyLead,
    ContinueNurture,
    PauseOutreach,
    ChannelSwitch,
    Optimization,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::SendFollowUp => "send_follow_up",
            ActionType::ScheduleMeeting => "schedule_meeting",
            ActionType::EscalateToHuman => "escalate_to_human",
            ActionType::DisqualifyLead => "disqualify_lead",
            ActionType::ContinueNurture => "continue_nurture",
            ActionType::PauseOutreach => "pause_outreach",
            ActionType::ChannelSwitch => "channel_switch",
            ActionType::Optimization => "optimization",
        }
    }

    pub fn parse(value: &str) -> Result<Self, InvalidCandidate> {
        match value {
            "send_follow_up" => Ok(ActionType::SendFollowUp),
            "schedule_meeting" => Ok(ActionType::ScheduleMeeting),
            "escalate_to_human" => Ok(ActionType::EscalateToHuman),
            "disqualify_lead" => Ok(ActionType::DisqualifyLead),
            "continue_nurture" => Ok(ActionType::ContinueNurture),
            "pause_outreach" => Ok(ActionType::PauseOutreach),
            "channel_switch" => Ok(ActionType::ChannelSwitch),
            "optimization" => Ok(ActionType::Optimization),
            other => Err(InvalidCandidate::UnknownActionType(other.to_string())),
        }
    }

    /// Actions that place content in front of a contact need at least one
    /// proposed variant; bookkeeping actions do not.
    pub fn requires_content(&self) -> bool {
        matches!(self, ActionType::SendFollowUp | ActionType::ScheduleMeeting)
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Linkedin,
    Sms,
    Phone,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Linkedin => "linkedin",
            Channel::Sms => "sms",
            Channel::Phone => "phone",
        }
    }

    pub fn parse(value: &str) -> Result<Self, InvalidCandidate> {
        match value {
            "email" => Ok(Channel::Email),
            "linkedin" => Ok(Channel::Linkedin),
            "sms" => Ok(Channel::Sms),
            "phone" => Ok(Channel::Phone),
            other => Err(InvalidCandidate::UnknownChannel(other.to_string())),
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One proposed rendition of the action's content. The producer may flag at
/// most one variant as preferred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseVariant {
    pub content: String,
    #[serde(default)]
    pub preferred: bool,
}

/// A proposed autonomous action, immutable once accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionCandidate {
    /// Caller-supplied key; the store enforces one approval item per key.
    pub candidate_id: String,
    pub workspace_id: String,
    pub action_type: ActionType,
    pub channel: Channel,
    pub target_contact_id: String,
    pub target_campaign_id: Option<String>,
    /// Campaign sequence step that proposed this action, when there is
    /// one; executions report it downstream so the step can be rewired.
    pub scheduled_step_id: Option<String>,
    pub variants: Vec<ResponseVariant>,
    pub raw_confidence: i32,
    pub reasoning: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidCandidate {
    #[error("candidate id is empty")]
    MissingCandidateId,
    #[error("workspace id is empty")]
    MissingWorkspace,
    #[error("target contact id is empty")]
    MissingContact,
    #[error("raw confidence {0} is outside 0..=100")]
    ConfidenceOutOfRange(i32),
    #[error("action type {0} requires at least one proposed variant")]
    MissingVariants(ActionType),
    #[error("more than one variant is flagged preferred")]
    MultiplePreferred,
    #[error("unknown action type: {0}")]
    UnknownActionType(String),
    #[error("unknown channel: {0}")]
    UnknownChannel(String),
}

impl ActionCandidate {
    pub fn new(
        candidate_id: &str,
        workspace_id: &str,
        action_type: ActionType,
        channel: Channel,
        target_contact_id: &str,
        raw_confidence: i32,
        reasoning: &str,
    ) -> Self {
        Self {
            candidate_id: candidate_id.to_string(),
            workspace_id: workspace_id.to_string(),
            action_type,
            channel,
            target_contact_id: target_contact_id.to_string(),
            target_campaign_id: None,
            scheduled_step_id: None,
            variants: Vec::new(),
            raw_confidence,
            reasoning: reasoning.to_string(),
            created_at: Utc::now(),
        }
    }

    /// Validate a submission before it is allowed anywhere near the store.
    pub fn validate(&self) -> Result<(), InvalidCandidate> {
        if self.candidate_id.trim().is_empty() {
            return Err(InvalidCandidate::MissingCandidateId);
        }
        if self.workspace_id.trim().is_empty() {
            return Err(InvalidCandidate::MissingWorkspace);
        }
        if self.target_contact_id.trim().is_empty() {
            return Err(InvalidCandidate::MissingContact);
        }
        if !(0..=100).contains(&self.raw_confidence) {
            return Err(InvalidCandidate::ConfidenceOutOfRange(self.raw_confidence));
        }
        if self.action_type.requires_content() && self.variants.is_empty() {
            return Err(InvalidCandidate::MissingVariants(self.action_type));
        }
        if self.variants.iter().filter(|v| v.preferred).count() > 1 {
            return Err(InvalidCandidate::MultiplePreferred);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ActionCandidate {
        let mut candidate = ActionCandidate::new(
            "cand-1",
            "ws-1",
            ActionType::SendFollowUp,
            Channel::Email,
            "contact-1",
            72,
            "no reply after two touches",
        );
        candidate.variants.push(ResponseVariant {
            content: "Hi, just checking in".into(),
            preferred: false,
        });
        candidate
    }

    #[test]
    fn valid_candidate_passes() {
        assert_eq!(sample().validate(), Ok(()));
    }

    #[test]
    fn confidence_must_stay_in_percent_range() {
        let mut candidate = sample();
        candidate.raw_confidence = 101;
        assert_eq!(
            candidate.validate(),
            Err(InvalidCandidate::ConfidenceOutOfRange(101))
        );

        candidate.raw_confidence = -1;
        assert_eq!(
            candidate.validate(),
            Err(InvalidCandidate::ConfidenceOutOfRange(-1))
        );
    }

    #[test]
    fn content_bearing_actions_need_variants() {
        let mut candidate = sample();
        candidate.variants.clear();
        assert_eq!(
            candidate.validate(),
            Err(InvalidCandidate::MissingVariants(ActionType::SendFollowUp))
        );

        // Bookkeeping actions are fine without content.
        candidate.action_type = ActionType::PauseOutreach;
        assert_eq!(candidate.validate(), Ok(()));
    }

    #[test]
    fn at_most_one_preferred_variant() {
        let mut candidate = sample();
        candidate.variants.push(ResponseVariant {
            content: "alt".into(),
            preferred: true,
        });
        candidate.variants.push(ResponseVariant {
            content: "alt 2".into(),
            preferred: true,
        });
        assert_eq!(
            candidate.validate(),
            Err(InvalidCandidate::MultiplePreferred)
        );
    }

    #[test]
    fn action_type_round_trips_through_strings() {
        for action in [
            ActionType::SendFollowUp,
            ActionType::ScheduleMeeting,
            ActionType::EscalateToHuman,
            ActionType::DisqualifyLead,
            ActionType::ContinueNurture,
            ActionType::PauseOutreach,
            ActionType::ChannelSwitch,
            ActionType::Optimization,
        ] {
            assert_eq!(ActionType::parse(action.as_str()), Ok(action));
        }
        assert!(ActionType::parse("send_carrier_pigeon").is_err());
    }
}
