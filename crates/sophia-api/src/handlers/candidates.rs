use axum::{
    Json,
    extract::{Path, State},
};
use serde::Deserialize;
use sophia_common::db::{
    create_approval, get_candidate as fetch_candidate, group_stats, revenue_summary,
};
use sophia_common::engine;
use sophia_common::learning::{derive_bias_table, fold_revenue_signal};
use sophia_common::model::{ActionCandidate, ActionType, ApprovalItem, Channel, ResponseVariant};

use crate::SharedState;
use crate::auth::AuthUser;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct SubmitCandidateRequest {
    pub candidate_id: String,
    pub workspace_id: String,
    pub action_type: String,
    pub channel: String,
    pub target_contact_id: String,
    #[serde(default)]
    pub target_campaign_id: Option<String>,
    #[serde(default)]
    pub scheduled_step_id: Option<String>,
    #[serde(default)]
    pub variants: Vec<ResponseVariant>,
    pub raw_confidence: i32,
    #[serde(default)]
    pub reasoning: String,
}

impl SubmitCandidateRequest {
    fn into_candidate(self) -> Result<ActionCandidate, ApiError> {
        let action_type = ActionType::parse(&self.action_type)?;
        let channel = Channel::parse(&self.channel)?;

        let mut candidate = ActionCandidate::new(
            &self.candidate_id,
            &self.workspace_id,
            action_type,
            channel,
            &self.target_contact_id,
            self.raw_confidence,
            &self.reasoning,
        );
        candidate.target_campaign_id = self.target_campaign_id;
        candidate.scheduled_step_id = self.scheduled_step_id;
        candidate.variants = self.variants;

        candidate.validate()?;
        Ok(candidate)
    }
}

/// Intake endpoint: validate, score against the workspace's current bias
/// table, and persist the decision as an approval item.
pub async fn submit_candidate(
    State(state): State<SharedState>,
    _auth: AuthUser,
    Json(request): Json<SubmitCandidateRequest>,
) -> Result<Json<ApprovalItem>, ApiError> {
    let candidate = request.into_candidate()?;

    let groups = group_stats(&state.pool, Some(&candidate.workspace_id)).await?;
    let (mut bias, _patterns) = derive_bias_table(&groups, &state.learning_config);

    let revenue = revenue_summary(&state.pool, &candidate.workspace_id).await?;
    fold_revenue_signal(
        &mut bias,
        &candidate.workspace_id,
        &revenue.channel_autonomous_shares(),
        &state.learning_config,
    );

    let decision = engine::evaluate(&candidate, &bias, &state.engine_config)?;
    let item = create_approval(&state.pool, &candidate, &decision).await?;

    Ok(Json(item))
}

pub async fn get_candidate(
    State(state): State<SharedState>,
    _auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ActionCandidate>, ApiError> {
    let candidate = fetch_candidate(&state.pool, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("candidate {id} not found")))?;

    Ok(Json(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> SubmitCandidateRequest {
        SubmitCandidateRequest {
            candidate_id: "cand-1".into(),
            workspace_id: "ws-1".into(),
            action_type: "send_follow_up".into(),
            channel: "email".into(),
            target_contact_id: "contact-1".into(),
            target_campaign_id: None,
            scheduled_step_id: None,
            variants: vec![ResponseVariant {
                content: "Hi there".into(),
                preferred: false,
            }],
            raw_confidence: 72,
            reasoning: "warm reply".into(),
        }
    }

    #[test]
    fn parses_action_type_and_channel() {
        let candidate = request().into_candidate().unwrap();
        assert_eq!(candidate.action_type, ActionType::SendFollowUp);
        assert_eq!(candidate.channel, Channel::Email);
    }

    #[test]
    fn scheduled_step_survives_intake() {
        let mut req = request();
        req.scheduled_step_id = Some("step-3".into());
        let candidate = req.into_candidate().unwrap();
        assert_eq!(candidate.scheduled_step_id.as_deref(), Some("step-3"));
    }

    #[test]
    fn rejects_unknown_action_type() {
        let mut req = request();
        req.action_type = "launch_rocket".into();
        let err = req.into_candidate().unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn rejects_content_action_without_variants() {
        let mut req = request();
        req.variants.clear();
        let err = req.into_candidate().unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}
